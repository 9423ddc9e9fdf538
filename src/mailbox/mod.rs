//! 持久化信箱：每个收件人一个 inbox 目录，至少一次投递 + 显式确认
//!
//! 目录结构：`{base}/{session}/inbox/`、`{base}/{session}/inbox/processed/`、`{base}/{session}/outbox/`

pub mod message;
pub mod store;

pub use message::{Message, MessagePriority, MessageType};
pub use store::{Mailbox, ReceiveOptions};
