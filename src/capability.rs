//! Pre-authorized destination URLs for blob writes.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode};

use crate::error::{ReplicationError, Result};
use crate::signer::QUOTE_ENCODE_SET;

/// A container URL carrying a time-boxed access token in its query string.
/// The token grants write access by itself, so no request signing is needed.
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityUrl {
    base: String,
    token: String,
}

impl CapabilityUrl {
    /// Split `https://account/container?token` at the first `?`
    pub fn parse(url: &str) -> Result<Self> {
        let (base, token) = url
            .trim()
            .split_once('?')
            .ok_or_else(|| ReplicationError::InvalidCapabilityUrl("missing access token".into()))?;
        let base = base.trim_end_matches('/');

        if base.is_empty() || !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(ReplicationError::InvalidCapabilityUrl(
                "expected an http(s) base URL".into(),
            ));
        }
        if token.is_empty() {
            return Err(ReplicationError::InvalidCapabilityUrl(
                "missing access token".into(),
            ));
        }

        Ok(Self {
            base: base.to_string(),
            token: token.to_string(),
        })
    }

    /// The upload URL for one file, with its name percent-encoded as a path segment
    pub fn blob_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}?{}",
            self.base,
            utf8_percent_encode(file_name, QUOTE_ENCODE_SET),
            self.token
        )
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

impl fmt::Debug for CapabilityUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityUrl")
            .field("base", &self.base)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Decode an object key as delivered by bucket notifications: `+` stands for
/// a space and everything else is percent-encoded.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| ReplicationError::InvalidNotification(format!("object key {raw} is not UTF-8")))
}

/// The last path segment of an object key
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
