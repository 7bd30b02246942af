//! Release metadata lookups needed before cover-art origins can be built.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// The part of a release record the resolver cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub release_group_id: Option<String>,
}

impl ReleaseRecord {
    /// Extract the release group from an album payload.
    ///
    /// The backend returns `release_group` as a JSON-encoded string; a plain
    /// object is accepted as well. An unknown album is answered with `{}`,
    /// which yields a record without a group id.
    pub fn from_album_payload(payload: &Value) -> Result<Self, MetadataError> {
        let object = payload
            .as_object()
            .ok_or_else(|| MetadataError::malformed("album payload is not an object"))?;

        let group = match object.get("release_group") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded)
                .map_err(|err| MetadataError::malformed(format!("release_group: {err}")))?,
            Some(other) => other.clone(),
        };

        let release_group_id = group
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(Self { release_group_id })
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Transport(String),
    #[error("metadata provider answered with status {status}")]
    Status { status: u16 },
    #[error("metadata payload is malformed: {0}")]
    Malformed(String),
}

impl MetadataError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

#[async_trait]
pub trait ReleaseMetadataSource: Send + Sync {
    async fn release(&self, release_id: &str) -> Result<ReleaseRecord, MetadataError>;
}
