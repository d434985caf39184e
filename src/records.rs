//! Mirrors a batch of table change events into the document store.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use crate::change::{parse_image, ChangeBatch, ChangeEvent};
use crate::document::{document_id, to_document, Document};
use crate::document_store::DocumentStore;
use crate::error::ReplicationError;
use crate::invocation::{InvocationResponse, STATUS_OK, STATUS_PARTIAL};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplicationOutcome {
    Success { id: String },
    Failure { id: Option<String>, reason: String },
}

impl ReplicationOutcome {
    fn failure(id: Option<String>, error: &ReplicationError) -> Self {
        Self::Failure {
            id,
            reason: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for ReplicationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { id } => write!(f, "OK: {id}"),
            Self::Failure { id, reason } => {
                write!(f, "Error: {}: {reason}", id.as_deref().unwrap_or("unknown"))
            }
        }
    }
}

/// Outcomes of one batch, in the order the events arrived
#[derive(Serialize, Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ReplicationOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// 200 when every record made it across, 207 otherwise
    pub fn status_code(&self) -> u16 {
        if self.failures() == 0 {
            STATUS_OK
        } else {
            STATUS_PARTIAL
        }
    }

    pub fn response(&self) -> InvocationResponse {
        let summaries = self
            .outcomes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        InvocationResponse::new(self.status_code(), summaries)
    }
}

/// Events sharing a document id, kept in source order
struct IdGroup {
    id: String,
    documents: Vec<(usize, Document)>,
}

#[derive(Clone, Debug)]
pub struct RecordReplicator {
    store: DocumentStore,
    concurrency: usize,
    deadline: Duration,
}

impl RecordReplicator {
    #[tracing::instrument(skip_all)]
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            concurrency: 8,
            deadline: Duration::from_secs(300),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Replicate every insert and modify in the batch. A failing record never
    /// stops the batch; its failure is reported in its slot of the report.
    ///
    /// Distinct ids are written concurrently, while writes to the same id stay
    /// sequential so the last event in the batch is the one that sticks.
    #[tracing::instrument(skip_all, fields(batch.size = batch.records.len()))]
    pub async fn replicate_batch(&self, batch: &ChangeBatch) -> BatchReport {
        let deadline = Instant::now() + self.deadline;

        let mut outcomes: Vec<Option<ReplicationOutcome>> = Vec::new();
        let mut groups: Vec<IdGroup> = Vec::new();
        let mut group_by_id: HashMap<String, usize> = HashMap::new();

        for event in batch.records.iter().filter(|event| event.is_replicable()) {
            let position = outcomes.len();
            match prepare(event) {
                Ok((id, document)) => {
                    outcomes.push(None);
                    let group = *group_by_id.entry(id.clone()).or_insert_with(|| {
                        groups.push(IdGroup {
                            id,
                            documents: Vec::new(),
                        });
                        groups.len() - 1
                    });
                    groups[group].documents.push((position, document));
                }
                Err((id, error)) => {
                    tracing::warn!(id = ?id, %error, "Record cannot be replicated");
                    outcomes.push(Some(ReplicationOutcome::failure(id, &error)));
                }
            }
        }

        let written = stream::iter(groups)
            .map(|group| self.write_group(group, deadline))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for (position, outcome) in written.into_iter().flatten() {
            outcomes[position] = Some(outcome);
        }

        let report = BatchReport {
            outcomes: outcomes.into_iter().flatten().collect(),
        };
        tracing::info!(
            records = report.outcomes.len(),
            failures = report.failures(),
            "Batch replicated"
        );
        report
    }

    async fn write_group(
        &self,
        group: IdGroup,
        deadline: Instant,
    ) -> Vec<(usize, ReplicationOutcome)> {
        let mut outcomes = Vec::with_capacity(group.documents.len());
        for (position, document) in group.documents {
            let result = timeout_at(deadline, self.store.write_document(&group.id, &document))
                .await
                .unwrap_or(Err(ReplicationError::DeadlineExceeded));

            let outcome = match result {
                Ok(()) => {
                    tracing::info!(id = %group.id, "Record replicated");
                    ReplicationOutcome::Success {
                        id: group.id.clone(),
                    }
                }
                Err(error) => {
                    tracing::warn!(id = %group.id, %error, "Record replication failed");
                    ReplicationOutcome::failure(Some(group.id.clone()), &error)
                }
            };
            outcomes.push((position, outcome));
        }
        outcomes
    }
}

/// Turn one event into its document and id, or explain why it cannot be sent.
/// The id is recovered from the raw image when conversion fails.
fn prepare(
    event: &ChangeEvent,
) -> std::result::Result<(String, Document), (Option<String>, ReplicationError)> {
    let image = event.dynamodb.new_image.as_ref().ok_or_else(|| {
        (
            None,
            ReplicationError::InvalidNotification("record has no new image".into()),
        )
    })?;

    let raw_id = image
        .get("id")
        .and_then(|id| id.get("S"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    let image = parse_image(image).map_err(|error| (raw_id.clone(), error))?;
    let document = to_document(&image).map_err(|error| (raw_id.clone(), error))?;
    let id = document_id(&document)
        .map_err(|error| (raw_id, error))?
        .to_string();

    Ok((id, document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentStoreConfig;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const KEY: &str = "c2VjcmV0LW1hc3Rlci1rZXk=";

    fn replicator(server: &MockServer) -> RecordReplicator {
        let store = DocumentStore::new(
            reqwest::Client::new(),
            DocumentStoreConfig::new(&server.uri(), KEY),
        )
        .with_max_retries(0);
        RecordReplicator::new(store)
    }

    fn event(name: &str, image: JsonValue) -> JsonValue {
        json!({ "eventName": name, "dynamodb": { "NewImage": image } })
    }

    fn batch(records: Vec<JsonValue>) -> ChangeBatch {
        serde_json::from_value(json!({ "Records": records })).unwrap()
    }

    fn user(id: &str) -> JsonValue {
        json!({ "id": { "S": id }, "nombre": { "S": format!("name of {id}") } })
    }

    fn posted_ids(requests: &[Request]) -> Vec<String> {
        requests
            .iter()
            .map(|request| {
                let body: JsonValue = serde_json::from_slice(&request.body).unwrap();
                body["id"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_remove_events_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let report = replicator(&server)
            .replicate_batch(&batch(vec![
                json!({ "eventName": "REMOVE", "dynamodb": { "Keys": { "id": { "S": "a" } } } }),
                event("REMOVE", user("b")),
            ]))
            .await;

        assert!(report.outcomes.is_empty());
        assert_eq!(report.response().status_code, 200);
        assert_eq!(report.response().body, "[]");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-ms-documentdb-partitionkey", r#"["u2"]"#))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad document"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let report = replicator(&server)
            .replicate_batch(&batch(vec![
                event("INSERT", user("u1")),
                event("MODIFY", user("u2")),
                event("REMOVE", user("ignored")),
                event("INSERT", user("u3")),
                event("INSERT", user("u4")),
            ]))
            .await;

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.failures(), 1);
        assert_eq!(
            report.outcomes[0],
            ReplicationOutcome::Success { id: "u1".into() }
        );
        assert!(matches!(
            &report.outcomes[1],
            ReplicationOutcome::Failure { id: Some(id), reason } if id == "u2" && reason.contains("bad document")
        ));
        assert_eq!(
            report.outcomes[2],
            ReplicationOutcome::Success { id: "u3".into() }
        );
        assert_eq!(
            report.outcomes[3],
            ReplicationOutcome::Success { id: "u4".into() }
        );

        let response = report.response();
        assert_eq!(response.status_code, 207);
        let body: Vec<String> = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body[0], "OK: u1");
        assert!(body[1].starts_with("Error: u2: "));
        assert_eq!(body[3], "OK: u4");
    }

    #[tokio::test]
    async fn test_missing_id_is_failure_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let report = replicator(&server)
            .replicate_batch(&batch(vec![
                event("INSERT", json!({ "nombre": { "S": "no id" } })),
                event("INSERT", user("u1")),
            ]))
            .await;

        assert_eq!(
            report.outcomes[0],
            ReplicationOutcome::Failure {
                id: None,
                reason: ReplicationError::MissingId.to_string()
            }
        );
        assert!(report.outcomes[1].is_success());
        assert_eq!(
            report.outcomes[0].to_string(),
            format!("Error: unknown: {}", ReplicationError::MissingId)
        );
    }

    #[tokio::test]
    async fn test_unsupported_attribute_fails_only_its_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let report = replicator(&server)
            .replicate_batch(&batch(vec![
                event(
                    "INSERT",
                    json!({ "id": { "S": "u1" }, "avatar": { "B": "aGVsbG8=" } }),
                ),
                event("INSERT", user("u2")),
            ]))
            .await;

        assert!(matches!(
            &report.outcomes[0],
            ReplicationOutcome::Failure { id: Some(id), .. } if id == "u1"
        ));
        assert!(report.outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_malformed_value_fails_only_its_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let report = replicator(&server)
            .replicate_batch(&batch(vec![
                event("INSERT", user("good")),
                event("INSERT", json!({ "id": { "S": "bad" }, "age": { "N": 30 } })),
            ]))
            .await;

        assert!(report.outcomes[0].is_success());
        assert!(matches!(
            &report.outcomes[1],
            ReplicationOutcome::Failure { id: Some(id), reason }
                if id == "bad" && reason.contains("age")
        ));
        assert_eq!(report.status_code(), 207);
        assert_eq!(posted_ids(&server.received_requests().await.unwrap()), vec!["good"]);
    }

    #[tokio::test]
    async fn test_writes_to_same_id_keep_source_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(20)))
            .mount(&server)
            .await;

        let mut records = Vec::new();
        for version in 0..5 {
            records.push(event(
                "MODIFY",
                json!({ "id": { "S": "same" }, "version": { "N": version.to_string() } }),
            ));
        }
        let report = replicator(&server)
            .with_concurrency(4)
            .replicate_batch(&batch(records))
            .await;
        assert_eq!(report.failures(), 0);

        let versions = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| {
                let body: JsonValue = serde_json::from_slice(&request.body).unwrap();
                body["version"].as_f64().unwrap()
            })
            .collect::<Vec<_>>();
        assert_eq!(versions, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_outcomes_follow_input_order_under_concurrency() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-ms-documentdb-partitionkey", r#"["slow"]"#))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(100)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let report = replicator(&server)
            .with_concurrency(4)
            .replicate_batch(&batch(vec![
                event("INSERT", user("slow")),
                event("INSERT", user("fast1")),
                event("INSERT", user("fast2")),
            ]))
            .await;

        let ids = report
            .outcomes
            .iter()
            .map(|outcome| match outcome {
                ReplicationOutcome::Success { id } => id.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["slow", "fast1", "fast2"]);

        let mut posted = posted_ids(&server.received_requests().await.unwrap());
        posted.sort();
        assert_eq!(posted, vec!["fast1", "fast2", "slow"]);
    }

    #[tokio::test]
    async fn test_deadline_fails_remaining_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let report = replicator(&server)
            .with_concurrency(1)
            .with_deadline(Duration::from_millis(50))
            .replicate_batch(&batch(vec![event("INSERT", user("u1")), event("INSERT", user("u2"))]))
            .await;

        assert_eq!(report.failures(), 2);
        assert!(matches!(
            &report.outcomes[1],
            ReplicationOutcome::Failure { reason, .. } if reason == &ReplicationError::DeadlineExceeded.to_string()
        ));
    }
}
