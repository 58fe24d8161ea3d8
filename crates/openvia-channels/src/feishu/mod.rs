//! Feishu (Lark) channel.
//!
//! Receives events over a long-lived websocket subscription and replies
//! through the REST message API with a tenant access token. Permission
//! prompts are plain text with a free-text yes/no approval flow.

mod channel;
mod types;

pub use channel::FeishuChannel;
