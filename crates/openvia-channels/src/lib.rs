//! Chat channel adapters.
//!
//! A [`Channel`](traits::Channel) is the gateway's surface to one chat
//! platform: it receives user messages, hands them to the agent through a
//! [`MessageHandler`](traits::MessageHandler), sends replies back, and
//! (optionally) delivers permission prompts and routes the user's
//! decisions into an [`ApprovalSink`](traits::ApprovalSink).

pub mod feishu;
pub mod telegram;
pub mod traits;

pub use feishu::FeishuChannel;
pub use telegram::TelegramChannel;
pub use traits::{ApprovalSink, Channel, MessageHandler, ReplyFn, ReplyFuture};
