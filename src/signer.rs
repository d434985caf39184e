//! Master-key authorization tokens for the Cosmos DB REST API.
//!
//! The token is an HMAC-SHA256 over a newline-joined canonical string of the
//! request's verb, resource type, resource path and date, keyed with the
//! decoded account master key. It is valid for exactly one request and has to
//! be recomputed for every attempt, retries included.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TYPE: &str = "master";
const TOKEN_VERSION: &str = "1.0";

/// Characters left as-is when percent-encoding tokens and path segments:
/// the RFC 3986 unreserved set plus `/`.
pub const QUOTE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Format a timestamp the way the `x-ms-date` header expects it,
/// e.g. `Tue, 01 Aug 2023 12:00:00 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the percent-encoded `Authorization` header value for one request.
///
/// # Errors
///
/// Returns `ReplicationError::Decode` if `master_key` is not valid base64.
pub fn authorization_token(
    verb: &str,
    resource_type: &str,
    resource_path: &str,
    date: &str,
    master_key: &str,
) -> Result<String> {
    let key = STANDARD.decode(master_key.trim())?;
    let signature = sign(&key, &string_to_sign(verb, resource_type, resource_path, date));
    let token = format!("type={TOKEN_TYPE}&ver={TOKEN_VERSION}&sig={signature}");

    Ok(utf8_percent_encode(&token, QUOTE_ENCODE_SET).to_string())
}

/// The resource path keeps its case, every other field is lower-cased. The
/// trailing empty field and newline are part of the format.
fn string_to_sign(verb: &str, resource_type: &str, resource_path: &str, date: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_path,
        date.to_lowercase(),
        ""
    )
}

fn sign(key: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}
