//! [`Channel`] implementation for Telegram.
//!
//! Long-polls for updates and fans each inbound message out to its own
//! task. Permission prompts go out as a message with an inline
//! approve/deny keyboard; button presses come back as callback queries.
//! A bare "yes"/"no" text reply while a request is pending also resolves
//! it, for clients without keyboard support.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use openvia_types::{
    ChannelError, MessageContent, PermissionDecision, PermissionRequest,
};

use crate::traits::{parse_text_decision, ApprovalSink, Channel, MessageHandler, ReplyFn};

use super::client::TelegramClient;
use super::types::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Update};

/// Long-poll timeout for `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Delay before retrying after a poll error, in seconds.
const ERROR_RETRY_DELAY_SECS: u64 = 5;

/// Telegram caps messages at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram Bot channel.
pub struct TelegramChannel {
    client: Arc<TelegramClient>,
    allowed_users: Vec<String>,
    approvals: Arc<dyn ApprovalSink>,
    /// Offset for the next `getUpdates` call (last update_id + 1).
    offset: AtomicI64,
}

impl TelegramChannel {
    /// Create a channel for the given bot token and allow-list. An empty
    /// allow-list admits everyone.
    pub fn new(bot_token: &str, allowed_users: Vec<String>, approvals: Arc<dyn ApprovalSink>) -> Self {
        Self {
            client: Arc::new(TelegramClient::new(bot_token)),
            allowed_users,
            approvals,
            offset: AtomicI64::new(0),
        }
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|id| id == sender_id)
    }

    /// Build the reply closure for one chat.
    fn reply_fn(&self, chat_id: i64) -> ReplyFn {
        let client = self.client.clone();
        Arc::new(move |text: String| {
            let client = client.clone();
            Box::pin(async move {
                for chunk in split_message(&text, MAX_MESSAGE_CHARS) {
                    client.send_message(chat_id, &chunk, None).await?;
                }
                Ok(())
            })
        })
    }

    async fn process_update(&self, update: Update, handler: &Arc<dyn MessageHandler>) {
        if let Some(query) = update.callback_query {
            self.process_callback(query).await;
            return;
        }

        let Some(message) = update.message else {
            debug!(update_id = update.update_id, "skipping non-message update");
            return;
        };
        let Some(text) = message.text else {
            debug!(update_id = update.update_id, "skipping message without text");
            return;
        };

        let sender_id = message
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_default();

        if !self.is_allowed(&sender_id) {
            warn!(sender_id = %sender_id, "message from disallowed user, ignoring");
            return;
        }

        // Free-text approval for a pending request takes precedence over
        // starting a new turn.
        if let Some(decision) = parse_text_decision(&text) {
            if let Some((request_id, _)) = self.approvals.find_by_user(&sender_id).await {
                debug!(request_id = %request_id, ?decision, "free-text approval");
                self.approvals.resolve(&request_id, decision).await;
                return;
            }
        }

        let chat_id = message.chat.id;
        let reply = self.reply_fn(chat_id);
        let handler = handler.clone();
        let chat_id_str = chat_id.to_string();
        tokio::spawn(async move {
            handler
                .handle(MessageContent::Text(text), &sender_id, &chat_id_str, reply)
                .await;
        });
    }

    async fn process_callback(&self, query: CallbackQuery) {
        if let Err(e) = self.client.answer_callback_query(&query.id).await {
            warn!(error = %e, "failed to answer callback query");
        }

        let Some(data) = query.data else {
            return;
        };

        let decision = if let Some(id) = data.strip_prefix("approve:") {
            Some((id.to_string(), PermissionDecision::Allow))
        } else {
            data.strip_prefix("deny:")
                .map(|id| (id.to_string(), PermissionDecision::Deny))
        };

        match decision {
            Some((request_id, decision)) => {
                debug!(request_id = %request_id, ?decision, "inline keyboard approval");
                if !self.approvals.resolve(&request_id, decision).await {
                    debug!(request_id = %request_id, "approval arrived for a settled request");
                }
            }
            None => warn!(data = %data, "unrecognized callback data"),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn id(&self) -> &str {
        "telegram"
    }

    async fn start(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError> {
        let me = self.client.get_me().await?;
        info!(bot_id = me.id, bot_name = %me.first_name, "Telegram bot authenticated");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Telegram channel cancelled");
                    return Ok(());
                }
                result = self.client.get_updates(
                    self.offset.load(Ordering::SeqCst),
                    POLL_TIMEOUT_SECS,
                ) => {
                    match result {
                        Ok(updates) => {
                            for update in updates {
                                // Advance past this update whether or not
                                // processing succeeds.
                                self.offset.store(update.update_id + 1, Ordering::SeqCst);
                                self.process_update(update, &handler).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "getUpdates failed");
                            tokio::select! {
                                _ = cancel.cancelled() => return Ok(()),
                                _ = tokio::time::sleep(
                                    std::time::Duration::from_secs(ERROR_RETRY_DELAY_SECS)
                                ) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_permission_request(
        &self,
        request: &PermissionRequest,
    ) -> Result<(), ChannelError> {
        let chat_id: i64 = request
            .context
            .chat_id
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!(
                "invalid telegram chat id: {}",
                request.context.chat_id
            )))?;

        let keyboard = InlineKeyboardMarkup {
            inline_keyboard: vec![vec![
                InlineKeyboardButton {
                    text: "✅ Approve".into(),
                    callback_data: format!("approve:{}", request.id),
                },
                InlineKeyboardButton {
                    text: "❌ Deny".into(),
                    callback_data: format!("deny:{}", request.id),
                },
            ]],
        };

        self.client
            .send_message(chat_id, &request.prompt, Some(keyboard))
            .await?;
        Ok(())
    }
}

/// Split a message into chunks of at most `limit` characters, preferring
/// newline boundaries.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();
        if current_chars + line_chars > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if line_chars > limit {
            // A single line longer than the limit is hard-split.
            let mut buf = String::new();
            let mut count = 0;
            for ch in line.chars() {
                buf.push(ch);
                count += 1;
                if count == limit {
                    chunks.push(std::mem::take(&mut buf));
                    count = 0;
                }
            }
            current = buf;
            current_chars = count;
        } else {
            current.push_str(line);
            current_chars += line_chars;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
