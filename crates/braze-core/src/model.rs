//! Wire model for the inbound update stream and reply markup.
//!
//! These are plain serde mirrors of the subset of the remote service's
//! payloads that the normalizer and reply path actually consume. Unknown
//! fields are ignored on deserialization; the service's full surface is far
//! larger than what a dispatcher needs to see.

use serde::{Deserialize, Serialize};

/// One inbound event from the long-poll stream.
///
/// Exactly one of the payload fields is populated per update; the normalizer
/// classifies on whichever is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    /// Monotonically increasing event id; advancing past it acknowledges it.
    pub update_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_post: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_query: Option<InlineQuery>,
}

impl Update {
    /// The message-shaped payload, whether sent to a chat or a channel.
    pub fn message_payload(&self) -> Option<&Message> {
        self.message.as_ref().or(self.channel_post.as_ref())
    }
}

/// A message or channel post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<MessageEntity>,
    /// Set when the message was forwarded from another user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_from: Option<User>,
    /// Forward marker; present on every forwarded message, even when the
    /// original sender is hidden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_chat_members: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_message: Option<Box<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<PhotoSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticker: Option<Sticker>,
}

impl Message {
    /// True when this message was forwarded, regardless of whether the
    /// original sender is visible.
    pub fn is_forwarded(&self) -> bool {
        self.forward_date.is_some() || self.forward_from.is_some()
    }
}

/// A user or bot account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A conversation: private, group, supergroup, or channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// `private`, `group`, `supergroup`, or `channel`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Chat {
    /// True for one-to-one chats, where conversation state applies and
    /// replies go straight to the user.
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

/// A markup range within a message's text.
///
/// Only `text_link` entities matter to this library — they are the carrier
/// for invisible-metadata round-tripping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub length: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One resolution variant of an attached photo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

/// A generic file attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// A sticker attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sticker {
    pub file_id: String,
}

/// A button press on an inline keyboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    /// The message the keyboard was attached to; carries the entities the
    /// invisible-link decoder scans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A query typed after the bot's name in any chat's input field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
}

/// One button of an inline keyboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    /// A button that sends `callback_data` back when pressed.
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }
}

/// A 2-D grid of inline keyboard buttons.
pub type InlineKeyboard = Vec<Vec<InlineKeyboardButton>>;
