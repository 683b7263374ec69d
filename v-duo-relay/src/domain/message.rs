use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::identity::Identity;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// 消息类型 / Message kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
}

/// 投递状态，只能前进 / Delivery status, forward-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// 前进到 `next`；不前进返回 None / Advance to `next`, None when it would not move forward
    pub fn advance(self, next: DeliveryStatus) -> Option<DeliveryStatus> {
        (next > self).then_some(next)
    }
}

/// 保留模式 / Retention mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RetentionMode {
    #[default]
    #[serde(rename = "forever")]
    Forever,
    #[serde(rename = "after-both-read")]
    AfterBothRead,
    #[serde(rename = "1-hour", alias = "1h")]
    OneHour,
    #[serde(rename = "24-hour", alias = "24h")]
    TwentyFourHours,
}

impl RetentionMode {
    /// 从服务端接收时间起算（仅固定时长模式）/ Expiry counted from server receipt time, fixed-duration modes only
    pub fn expires_at(self, received_at: i64) -> Option<i64> {
        match self {
            RetentionMode::OneHour => Some(received_at.saturating_add(HOUR_MS)),
            RetentionMode::TwentyFourHours => Some(received_at.saturating_add(24 * HOUR_MS)),
            RetentionMode::Forever | RetentionMode::AfterBothRead => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub room_id: String,
    pub mode: RetentionMode,
    pub set_at: i64,
}

impl RetentionPolicy {
    pub fn default_for(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            mode: RetentionMode::Forever,
            set_at: 0,
        }
    }
}

/// 持久化消息记录 / Persisted message record
///
/// 删除只打墓碑，id 保留用于去重 / deletion only tombstones, the id is kept for dedup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub sender: Identity,
    pub receiver: Identity,
    pub kind: MessageKind,
    pub text: String,
    pub media_ref: Option<String>,
    pub reply_to_id: Option<String>,
    pub created_at: i64,
    pub status: DeliveryStatus,
    pub expires_at: Option<i64>,
    pub deleted: bool,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<Identity>,
}

impl StoredMessage {
    /// 未知 id 的墓碑 / Tombstone for an id the store never saw
    pub fn tombstone(id: &str, room_id: &str, by: Option<Identity>, at: i64) -> Self {
        let sender = by.unwrap_or(Identity::Admin);
        Self {
            id: id.to_string(),
            room_id: room_id.to_string(),
            sender,
            receiver: sender.peer(),
            kind: MessageKind::Text,
            text: String::new(),
            media_ref: None,
            reply_to_id: None,
            created_at: at,
            status: DeliveryStatus::Sent,
            expires_at: None,
            deleted: true,
            deleted_at: Some(at),
            deleted_by: by,
        }
    }

    pub fn mark_deleted(&mut self, by: Option<Identity>, at: i64) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        self.deleted_at = Some(at);
        self.deleted_by = by;
        true
    }

    /// 过期判定 / Expiry check
    pub fn is_expired(&self, now: i64) -> bool {
        !self.deleted && self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn involves(&self, identity: Identity) -> bool {
        self.sender == identity || self.receiver == identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_moves_backward() {
        assert_eq!(DeliveryStatus::Sent.advance(DeliveryStatus::Delivered), Some(DeliveryStatus::Delivered));
        assert_eq!(DeliveryStatus::Read.advance(DeliveryStatus::Delivered), None);
        assert_eq!(DeliveryStatus::Delivered.advance(DeliveryStatus::Delivered), None);
    }

    #[test]
    fn fixed_modes_set_expiry_at_creation() {
        assert_eq!(RetentionMode::TwentyFourHours.expires_at(1_000), Some(1_000 + 86_400_000));
        assert_eq!(RetentionMode::OneHour.expires_at(0), Some(3_600_000));
        assert_eq!(RetentionMode::AfterBothRead.expires_at(0), None);
        assert_eq!(RetentionMode::Forever.expires_at(0), None);
        assert_eq!(RetentionMode::OneHour.expires_at(i64::MAX - 10), Some(i64::MAX));
    }

    #[test]
    fn retention_mode_wire_names() {
        let m: RetentionMode = serde_json::from_str("\"after-both-read\"").unwrap();
        assert_eq!(m, RetentionMode::AfterBothRead);
        let m: RetentionMode = serde_json::from_str("\"24h\"").unwrap();
        assert_eq!(m, RetentionMode::TwentyFourHours);
        assert_eq!(serde_json::to_string(&RetentionMode::OneHour).unwrap(), "\"1-hour\"");
    }

    #[test]
    fn deleted_message_is_not_expired_again() {
        let mut m = StoredMessage::tombstone("x", "main", None, 5);
        m.expires_at = Some(1);
        assert!(!m.is_expired(10));
        assert!(!m.mark_deleted(None, 11));
    }
}
