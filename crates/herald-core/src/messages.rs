use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Who produced a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Bot,
    Error,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::Error => "error",
        })
    }
}

/// A cited source attached to a bot reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

impl Reference {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// One entry of the conversation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub body: String,
    /// Only ever non-empty on bot messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    /// Client-side emission instant.
    pub timestamp: DateTime<Utc>,
    /// Timestamp reported by the backend, kept verbatim for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_timestamp: Option<String>,
}

impl Message {
    fn new(role: Role, body: impl Into<String>, references: Vec<Reference>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            body: body.into(),
            references,
            timestamp: Utc::now(),
            remote_timestamp: None,
        }
    }

    pub fn user(body: impl Into<String>) -> Self {
        Self::new(Role::User, body, Vec::new())
    }

    pub fn bot(body: impl Into<String>, references: Vec<Reference>) -> Self {
        Self::new(Role::Bot, body, references)
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::new(Role::Error, body, Vec::new())
    }

    pub fn with_remote_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.remote_timestamp = timestamp;
        self
    }
}

/// Append-only, strictly time-ordered conversation log.
///
/// Entries are never edited or removed individually; [`ConversationLog::clear`]
/// drops everything at once and is only used by a session reset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationLog {
    entries: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Its timestamp is nudged forward when the clock has not
    /// advanced past the previous entry, so ordering stays strict.
    pub fn push(&mut self, mut message: Message) {
        if let Some(last) = self.entries.last() {
            if message.timestamp <= last.timestamp {
                message.timestamp = last.timestamp + chrono::Duration::microseconds(1);
            }
        }
        self.entries.push(message);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::bot("hello", vec![]).role, Role::Bot);
        assert_eq!(Message::error("boom").role, Role::Error);
    }

    #[test]
    fn bot_message_keeps_references() {
        let msg = Message::bot("Markets rose 2%", vec![Reference::new("X", "http://x")]);
        assert_eq!(msg.references.len(), 1);
        assert_eq!(msg.references[0].url, "http://x");
    }

    #[test]
    fn log_preserves_append_order() {
        let mut log = ConversationLog::new();
        log.push(Message::user("one"));
        log.push(Message::bot("two", vec![]));
        log.push(Message::error("three"));
        let bodies: Vec<&str> = log.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["one", "two", "three"]);
    }

    #[test]
    fn log_timestamps_strictly_increase() {
        let mut log = ConversationLog::new();
        let stamp = Utc::now();
        for i in 0..5 {
            let mut msg = Message::user(format!("m{i}"));
            msg.timestamp = stamp;
            log.push(msg);
        }
        for w in log.as_slice().windows(2) {
            assert!(w[0].timestamp < w[1].timestamp);
        }
    }

    #[test]
    fn clear_empties_log() {
        let mut log = ConversationLog::new();
        log.push(Message::user("one"));
        log.push(Message::user("two"));
        log.clear();
        assert!(log.is_empty());
        assert!(log.last().is_none());
    }

    #[test]
    fn message_serializes_without_empty_optionals() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("references").is_none());
        assert!(json.get("remote_timestamp").is_none());
    }

    #[test]
    fn reference_tolerates_missing_and_extra_fields() {
        let r: Reference =
            serde_json::from_str(r#"{"title":"X","source":"wire","publishedAt":"2024"}"#).unwrap();
        assert_eq!(r.title, "X");
        assert_eq!(r.url, "");
    }
}
