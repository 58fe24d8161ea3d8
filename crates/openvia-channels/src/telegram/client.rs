//! HTTP client wrapper for the Telegram Bot API.
//!
//! Typed methods for the API subset the channel needs: `getMe`,
//! `getUpdates`, `sendMessage`, and `answerCallbackQuery`.

use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace};

use openvia_types::ChannelError;

use super::types::{
    InlineKeyboardMarkup, Message, SendMessageRequest, TelegramResponse, Update, User,
};

/// HTTP client for the Telegram Bot API.
pub struct TelegramClient {
    http: Client,
    /// `https://api.telegram.org/bot{token}` by default.
    base_url: String,
}

impl TelegramClient {
    /// Create a client for the given bot token.
    pub fn new(token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    /// Create a client pointing at a custom base URL (for testing).
    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// The base URL used for API requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Verify the bot token via `getMe`.
    pub async fn get_me(&self) -> Result<User, ChannelError> {
        let url = format!("{}/getMe", self.base_url);
        debug!("verifying bot token");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let body: TelegramResponse<User> = resp
            .json()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        if !body.ok {
            let desc = body.description.unwrap_or_else(|| "unauthorized".into());
            return Err(ChannelError::AuthFailed(desc));
        }
        body.result
            .ok_or_else(|| ChannelError::AuthFailed("missing result in response".into()))
    }

    /// Fetch new updates with long polling.
    pub async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, ChannelError> {
        let url = format!(
            "{}/getUpdates?timeout={timeout}&offset={offset}",
            self.base_url
        );
        trace!(url = %url, "polling for updates");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let body: TelegramResponse<Vec<Update>> = resp
            .json()
            .await
            .map_err(|e| ChannelError::ReceiveFailed(e.to_string()))?;

        if !body.ok {
            let desc = body.description.unwrap_or_else(|| "unknown error".into());
            return Err(ChannelError::ReceiveFailed(desc));
        }

        let updates = body.result.unwrap_or_default();
        if !updates.is_empty() {
            debug!(count = updates.len(), "received updates");
        }
        Ok(updates)
    }

    /// Send a text message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> Result<Message, ChannelError> {
        let url = format!("{}/sendMessage", self.base_url);
        let req = SendMessageRequest {
            chat_id,
            text: text.to_owned(),
            reply_markup,
        };

        debug!(chat_id, "sending message");

        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let body: TelegramResponse<Message> = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        if !body.ok {
            let desc = body.description.unwrap_or_else(|| "unknown error".into());
            return Err(ChannelError::SendFailed(desc));
        }
        body.result
            .ok_or_else(|| ChannelError::SendFailed("missing result in response".into()))
    }

    /// Acknowledge a callback query so the client stops its spinner.
    pub async fn answer_callback_query(&self, query_id: &str) -> Result<(), ChannelError> {
        let url = format!("{}/answerCallbackQuery", self.base_url);

        let resp = self
            .http
            .post(&url)
            .json(&json!({ "callback_query_id": query_id }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let body: TelegramResponse<bool> = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        if !body.ok {
            let desc = body.description.unwrap_or_else(|| "unknown error".into());
            return Err(ChannelError::SendFailed(desc));
        }
        Ok(())
    }
}
