use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// A chat line as carried on the wire: a JSON object with the fields
/// `Message`, `SenderID` and `SenderNick`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "Message", alias = "message", default)]
    pub message: String,
    #[serde(rename = "SenderID", alias = "sender_id", default)]
    pub sender_id: String,
    #[serde(rename = "SenderNick", alias = "sender_nick", default)]
    pub sender_nick: String,
}

impl ChatMessage {
    pub fn new(
        message: impl Into<String>,
        sender_id: impl Into<String>,
        sender_nick: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            sender_id: sender_id.into(),
            sender_nick: sender_nick.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChatError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ChatError> {
        Ok(serde_json::from_slice(data)?)
    }
}
