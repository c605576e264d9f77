/// Edit window: how long an owner may keep re-editing a message
use crate::messenger_types::Message;
use chrono::{DateTime, Duration, Utc};

/// Fixed grace period after the last edit
pub const EDIT_WINDOW_MS: i64 = 10_000;

/// Whether the viewer may edit `message` at `now`.
///
/// Owners can edit a never-edited message at any time, and an edited one
/// only while less than [`EDIT_WINDOW_MS`] has passed since `edited_at`.
/// Non-owners can never edit.
pub fn can_edit(message: &Message, viewer_is_owner: bool, now: DateTime<Utc>) -> bool {
    if !viewer_is_owner {
        return false;
    }
    match message.edited_at {
        None => true,
        Some(edited_at) => now.signed_duration_since(edited_at) < Duration::milliseconds(EDIT_WINDOW_MS),
    }
}
