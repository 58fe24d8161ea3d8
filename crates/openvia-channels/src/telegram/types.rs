//! Wire types for the Telegram Bot API subset the channel uses.

use serde::{Deserialize, Serialize};

/// Generic Bot API response envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct TelegramResponse<T> {
    /// Whether the request succeeded.
    pub ok: bool,
    /// The payload when `ok` is true.
    #[serde(default)]
    pub result: Option<T>,
    /// Error description when `ok` is false.
    #[serde(default)]
    pub description: Option<String>,
}

/// One update from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update id; the next poll offset is `update_id + 1`.
    pub update_id: i64,
    /// A new inbound message, if this update carries one.
    #[serde(default)]
    pub message: Option<Message>,
    /// An inline-keyboard button press, if this update carries one.
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// A Telegram message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Message id within the chat.
    pub message_id: i64,
    /// Sender, absent for channel posts.
    #[serde(default)]
    pub from: Option<User>,
    /// The chat the message belongs to.
    pub chat: Chat,
    /// Text content, absent for media-only messages.
    #[serde(default)]
    pub text: Option<String>,
}

/// A Telegram chat.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Chat id (negative for groups).
    pub id: i64,
    /// "private", "group", "supergroup", or "channel".
    #[serde(rename = "type")]
    pub chat_type: String,
}

/// A Telegram user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// User id.
    pub id: i64,
    /// First name.
    pub first_name: String,
    /// Username, if set.
    #[serde(default)]
    pub username: Option<String>,
}

/// An inline-keyboard button press.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    /// Query id, required by `answerCallbackQuery`.
    pub id: String,
    /// Who pressed the button.
    pub from: User,
    /// The `callback_data` of the pressed button.
    #[serde(default)]
    pub data: Option<String>,
    /// The message the keyboard was attached to.
    #[serde(default)]
    pub message: Option<Message>,
}

/// Body for `sendMessage`.
#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    /// Target chat.
    pub chat_id: i64,
    /// Message text.
    pub text: String,
    /// Inline keyboard, when prompting for approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

/// An inline keyboard.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    /// Rows of buttons.
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// One inline-keyboard button.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    /// Button label.
    pub text: String,
    /// Data returned in the callback query when pressed.
    pub callback_data: String,
}
