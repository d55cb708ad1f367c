//! Chat rooms on top of the pub/sub transport.
//!
//! Each room maps to one topic, `chat-room:<room>`. A [`ChatRoom`] owns the
//! session loop that moves [`ChatMessage`]s between the caller and the topic.

mod message;
mod room;

pub use message::ChatMessage;
pub use room::{ChatRoom, SessionState};

pub const TOPIC_PREFIX: &str = "chat-room:";

pub fn topic_name(room: &str) -> String {
    format!("{TOPIC_PREFIX}{room}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_name() {
        assert_eq!(topic_name("general"), "chat-room:general");
        assert_eq!(topic_name(""), "chat-room:");
    }
}
