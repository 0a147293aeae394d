// functions/src/notification.rs

use serde::{Deserialize, Serialize};

/// Payload published when an object lands in the source store.
///
/// Storage notifications carry many more attributes; only the location is
/// read and everything else is ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub bucket: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed notification: {0}")]
pub struct ParseError(#[from] serde_json::Error);

impl Notification {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(data)?)
    }
}
