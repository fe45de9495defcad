use serde::{Deserialize, Serialize};
use std::fmt;

pub const COMMAND_TOPIC: &str = "cmd";
pub const STATUS_TOPIC: &str = "mission";
pub const INITIATOR: &str = "localApp";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
    Dock,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Dock => "dock",
        };
        f.write_str(keyword)
    }
}

/// Body published on [`COMMAND_TOPIC`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: Command,
    /// Unix seconds at the moment of sending.
    pub time: i64,
    pub initiator: String,
}

impl CommandMessage {
    pub fn now(command: Command) -> Self {
        Self {
            command,
            time: chrono::Utc::now().timestamp(),
            initiator: INITIATOR.to_string(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
