use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Value of `cleanMissionStatus.phase` while a cleaning mission is running.
pub const RUNNING_PHASE: &str = "run";

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Status payload is empty")]
    Empty,

    #[error("Status payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Status payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Locally merged view of everything the device has reported.
///
/// Each status message replaces the top-level keys it carries and leaves the
/// others untouched. A whole message is merged under one write lock, so
/// readers never observe half of it.
#[derive(Debug, Default)]
pub struct StatusSnapshot {
    document: RwLock<Map<String, Value>>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, update: Map<String, Value>) {
        let mut document = self
            .document
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for (key, value) in update {
            document.insert(key, value);
        }
    }

    /// Parses and merges one raw payload, returning the number of top-level
    /// keys it carried. On error the snapshot is left as it was.
    pub fn merge_payload(&self, payload: &[u8]) -> Result<usize, StatusError> {
        let update = parse_status(payload)?;
        let keys = update.len();
        self.merge(update);
        Ok(keys)
    }

    /// `state.reported.cleanMissionStatus.phase`, if present and a string.
    pub fn mission_phase(&self) -> Option<String> {
        let document = self
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        document
            .get("state")
            .and_then(|state| state.get("reported"))
            .and_then(|reported| reported.get("cleanMissionStatus"))
            .and_then(|status| status.get("phase"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn is_running(&self) -> bool {
        self.mission_phase().as_deref() == Some(RUNNING_PHASE)
    }

    pub fn document(&self) -> Map<String, Value> {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Merges a payload received on `topic`, logging instead of failing.
    pub fn apply_message(&self, device: &str, topic: &str, payload: &[u8]) {
        match self.merge_payload(payload) {
            Ok(keys) => debug!("{} update received on {} ({} keys)", device, topic, keys),
            Err(StatusError::Empty) => {
                debug!("{} ignoring empty message on {}", device, topic)
            }
            Err(e) => warn!("{} dropped status message on {}: {}", device, topic, e),
        }
    }
}

fn parse_status(payload: &[u8]) -> Result<Map<String, Value>, StatusError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(StatusError::Empty);
    }

    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(StatusError::NotAnObject("null")),
        Value::Bool(_) => Err(StatusError::NotAnObject("boolean")),
        Value::Number(_) => Err(StatusError::NotAnObject("number")),
        Value::String(_) => Err(StatusError::NotAnObject("string")),
        Value::Array(_) => Err(StatusError::NotAnObject("array")),
    }
}
