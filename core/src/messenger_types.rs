/// Shared types for the conversation layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a message relates to whoever is looking at the conversation.
/// Derived on load, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// Sent by the current viewer
    Viewer,
    /// Sent by the other participant
    #[default]
    Counterparty,
}

/// Aggregate count for one emoji on one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One message in a conversation.
///
/// The same shape is used for remote records and for entries of the local
/// store; `sender_role` is skipped on the wire and recomputed with
/// [`Message::for_viewer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(skip)]
    pub sender_role: SenderRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl Message {
    /// Recompute `sender_role` against the given viewer id
    pub fn for_viewer(mut self, viewer_id: Option<&str>) -> Self {
        self.sender_role = match viewer_id {
            Some(v) if v == self.sender_id => SenderRole::Viewer,
            _ => SenderRole::Counterparty,
        };
        self
    }

    pub fn is_owned_by(&self, viewer_id: &str) -> bool {
        self.sender_id == viewer_id
    }
}

/// The conversation a session is attached to, seen from the viewer's side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationScope {
    pub conversation_id: String,
    /// Participant on the other end; recipient of everything the viewer sends
    pub counterparty_id: String,
}

/// Fields supplied by the client when creating a message. Everything else
/// (id, created_at) is assigned by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
}

/// Partial update of a message. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_edited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
}

impl MessagePatch {
    /// Content change; always marks the message as edited at `at`
    pub fn edit(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            content: Some(content.into()),
            is_edited: Some(true),
            edited_at: Some(at),
            ..Default::default()
        }
    }

    pub fn pinned(is_pinned: bool) -> Self {
        Self {
            is_pinned: Some(is_pinned),
            ..Default::default()
        }
    }

    pub fn reactions(reactions: Vec<Reaction>) -> Self {
        Self {
            reactions: Some(reactions),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to `message`. `id`, `conversation_id` and
    /// `created_at` are not patchable.
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(is_edited) = self.is_edited {
            message.is_edited = is_edited;
        }
        if let Some(edited_at) = self.edited_at {
            message.edited_at = Some(edited_at);
        }
        if let Some(is_pinned) = self.is_pinned {
            message.is_pinned = is_pinned;
        }
        if let Some(reactions) = &self.reactions {
            message.reactions = reactions.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            sender_role: SenderRole::default(),
            content: "hi".to_string(),
            created_at: Utc::now(),
            edited_at: None,
            is_edited: false,
            is_pinned: false,
            deleted_at: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
            thread_id: None,
            reply_to: None,
        }
    }

    #[test]
    fn test_sender_role_derivation() {
        assert_eq!(sample().for_viewer(Some("alice")).sender_role, SenderRole::Viewer);
        assert_eq!(sample().for_viewer(Some("bob")).sender_role, SenderRole::Counterparty);
        assert_eq!(sample().for_viewer(None).sender_role, SenderRole::Counterparty);
    }

    #[test]
    fn test_sender_role_not_serialized() {
        let msg = sample().for_viewer(Some("alice"));
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("sender_role").is_none());

        let attachment = Attachment {
            name: "cv.pdf".to_string(),
            url: "https://files.example/cv.pdf".to_string(),
            kind: "application/pdf".to_string(),
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["type"], "application/pdf");
    }

    #[test]
    fn test_record_defaults_for_missing_fields() {
        let json = r#"{
            "id": "m9",
            "conversation_id": "c1",
            "sender_id": "alice",
            "recipient_id": "bob",
            "content": "hello",
            "created_at": "2026-01-05T10:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert!(!msg.is_edited);
        assert!(!msg.is_pinned);
        assert!(msg.reactions.is_empty());
        assert!(msg.edited_at.is_none());
    }

    #[test]
    fn test_patch_applies_only_set_fields() {
        let mut msg = sample();
        let created = msg.created_at;
        let at = Utc::now();

        MessagePatch::edit("fixed typo", at).apply_to(&mut msg);
        assert_eq!(msg.content, "fixed typo");
        assert!(msg.is_edited);
        assert_eq!(msg.edited_at, Some(at));
        assert!(!msg.is_pinned);
        assert_eq!(msg.created_at, created);

        MessagePatch::pinned(true).apply_to(&mut msg);
        assert!(msg.is_pinned);
        assert_eq!(msg.content, "fixed typo");
    }

    #[test]
    fn test_patch_serializes_sparse() {
        let json = serde_json::to_value(MessagePatch::pinned(false)).unwrap();
        assert_eq!(json, serde_json::json!({ "is_pinned": false }));
        assert!(MessagePatch::default().is_empty());
    }
}
