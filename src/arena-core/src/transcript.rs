//! The user-visible debate transcript.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::debater::Debater;

/// Who a transcript entry is attributed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Sender {
    System,
    Debater(Debater),
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::System => f.write_str("System"),
            Sender::Debater(debater) => write!(f, "{debater}"),
        }
    }
}

/// A message in the debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
}

/// Append-only list of emitted messages.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return a copy of it for broadcasting.
    pub fn push(&mut self, sender: Sender, text: impl Into<String>) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            sender,
            text: text.into(),
        };
        self.messages.push(message.clone());
        message
    }

    /// The last `count` messages, oldest first.
    pub fn recent(&self, count: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(count);
        self.messages[start..].to_vec()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut transcript = Transcript::new();
        for i in 0..5 {
            transcript.push(Sender::System, format!("m{i}"));
        }
        let tail: Vec<String> = transcript.recent(2).into_iter().map(|m| m.text).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(transcript.recent(10).len(), 5);
    }

    #[test]
    fn test_sender_display() {
        assert_eq!(Sender::System.to_string(), "System");
        assert_eq!(Sender::Debater(Debater::Tom).to_string(), "Tom");
    }
}
