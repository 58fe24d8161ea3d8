//! Telegram Bot channel.
//!
//! Long-polls `getUpdates` for inbound messages and callback queries,
//! replies via `sendMessage`, and delivers permission prompts as messages
//! with an inline approve/deny keyboard (with a free-text yes/no
//! fallback).

mod channel;
mod client;
mod types;

pub use channel::TelegramChannel;
pub use client::TelegramClient;
