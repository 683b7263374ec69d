//! 领域模型 / Domain model
//!
//! 身份、消息、保留策略与线上事件 / identities, messages, retention and wire events

pub mod event;
pub mod identity;
pub mod message;

pub use event::{CallType, ClientEvent, SenderTag, ServerEvent, WireMessage};
pub use identity::{Identity, Profile};
pub use message::{DeliveryStatus, MessageKind, RetentionMode, RetentionPolicy, StoredMessage};

/// 当前毫秒时间戳 / Current unix time in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
