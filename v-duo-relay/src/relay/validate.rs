//! 边界校验与清洗 / Boundary validation and sanitizing
//!
//! id、身份、房间不合法直接拒绝；文本和媒体引用只截断清洗。
//! Bad ids, identities and rooms are rejected; text and media references are only truncated and cleaned.

use tracing::debug;

use crate::config::LimitsConfig;
use crate::domain::{DeliveryStatus, Identity, MessageKind, Profile, StoredMessage};
use crate::error::{RelayError, RelayResult};

const MAX_NAME_LEN: usize = 100;
const BLOCKED_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:text/html"];
/// 客户端时钟最多领先服务端 5 分钟 / Client clocks may run at most 5 minutes ahead
pub const MAX_FUTURE_SKEW_MS: i64 = 5 * 60 * 1000;

pub fn check_room(expected: &str, room_id: &str) -> RelayResult<()> {
    if room_id == expected {
        Ok(())
    } else {
        Err(RelayError::InvalidRoom(room_id.to_string()))
    }
}

pub fn parse_identity(raw: &str) -> RelayResult<Identity> {
    raw.parse::<Identity>().map_err(RelayError::InvalidIdentity)
}

/// 客户端 id：非空、限长、无空白和控制字符
/// Client id: non-empty, bounded, no whitespace or control characters
pub fn check_id(field: &str, id: &str, max_len: usize) -> RelayResult<()> {
    if id.is_empty() {
        return Err(RelayError::malformed(format!("{} is empty", field)));
    }
    if id.chars().count() > max_len {
        return Err(RelayError::malformed(format!(
            "{} longer than {} chars",
            field, max_len
        )));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RelayError::malformed(format!(
            "{} contains whitespace or control characters",
            field
        )));
    }
    Ok(())
}

/// 去掉控制字符（保留换行和制表）并截断 / Strip control characters except newline and tab, then truncate
pub fn sanitize_text(text: &str, max_len: usize) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(max_len)
        .collect()
}

/// 媒体引用清洗；超长或危险协议丢弃 / Clean a media reference, dropping overlong or unsafe-scheme values
pub fn sanitize_media(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() > max_len {
        debug!("media reference dropped: longer than {} chars", max_len);
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if BLOCKED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        debug!("media reference dropped: blocked scheme");
        return None;
    }
    if trimmed.chars().any(char::is_control) {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn sanitize_profile(profile: Profile, limits: &LimitsConfig) -> Profile {
    Profile {
        name: sanitize_text(profile.name.trim(), MAX_NAME_LEN).replace(['\n', '\t'], " "),
        avatar_ref: profile
            .avatar_ref
            .as_deref()
            .and_then(|a| sanitize_media(a, limits.max_media_len)),
    }
}

/// 入站聊天消息草稿 / Inbound chat message draft
#[derive(Debug, Clone, Default)]
pub struct ChatDraft {
    pub id: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub kind: MessageKind,
    pub reply_to_id: Option<String>,
    pub timestamp: Option<i64>,
}

/// 客户端时间戳：非正或超前过多时用服务端时间
/// Client timestamp, replaced by server time when non-positive or too far ahead
pub fn plausible_timestamp(client: Option<i64>, now: i64) -> i64 {
    match client {
        Some(ts) if ts > 0 && ts <= now.saturating_add(MAX_FUTURE_SKEW_MS) => ts,
        Some(ts) => {
            debug!("implausible client timestamp {} replaced by {}", ts, now);
            now
        }
        None => now,
    }
}

/// 校验并生成待存储消息 / Validate a draft into a storable message
pub fn build_message(
    limits: &LimitsConfig,
    room_id: &str,
    sender: Identity,
    draft: ChatDraft,
    now: i64,
) -> RelayResult<StoredMessage> {
    check_id("id", &draft.id, limits.max_id_len)?;
    let text = draft
        .text
        .as_deref()
        .map(|t| sanitize_text(t, limits.max_text_len))
        .unwrap_or_default();
    let media_ref = draft
        .media_url
        .as_deref()
        .and_then(|m| sanitize_media(m, limits.max_media_len));
    if draft.kind == MessageKind::Text && text.trim().is_empty() && media_ref.is_none() {
        return Err(RelayError::malformed("empty text message without media"));
    }
    let reply_to_id = draft
        .reply_to_id
        .filter(|r| check_id("replyToId", r, limits.max_id_len).is_ok());
    let created_at = plausible_timestamp(draft.timestamp, now);

    Ok(StoredMessage {
        id: draft.id,
        room_id: room_id.to_string(),
        sender,
        receiver: sender.peer(),
        kind: draft.kind,
        text,
        media_ref,
        reply_to_id,
        created_at,
        status: DeliveryStatus::Sent,
        expires_at: None,
        deleted: false,
        deleted_at: None,
        deleted_by: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn limits() -> LimitsConfig {
        RelayConfig::default().limits
    }

    #[test]
    fn room_and_identity_are_strict() {
        assert!(check_room("main", "main").is_ok());
        assert!(matches!(check_room("main", "lobby"), Err(RelayError::InvalidRoom(_))));
        assert!(matches!(parse_identity("eve"), Err(RelayError::InvalidIdentity(_))));
    }

    #[test]
    fn ids_reject_whitespace_and_length() {
        assert!(check_id("id", "m-1", 100).is_ok());
        assert!(check_id("id", "", 100).is_err());
        assert!(check_id("id", "a b", 100).is_err());
        assert!(check_id("id", &"x".repeat(101), 100).is_err());
    }

    #[test]
    fn text_is_truncated_not_rejected() {
        let draft = ChatDraft {
            id: "m1".into(),
            text: Some(format!("{}\u{0007}", "a".repeat(10_005))),
            ..ChatDraft::default()
        };
        let msg = build_message(&limits(), "main", Identity::Admin, draft, 42).unwrap();
        assert_eq!(msg.text.chars().count(), 10_000);
        assert_eq!(msg.receiver, Identity::Friend);
        assert_eq!(msg.created_at, 42);
    }

    #[test]
    fn empty_text_needs_media() {
        let draft = ChatDraft {
            id: "m2".into(),
            text: Some("   ".into()),
            ..ChatDraft::default()
        };
        assert!(build_message(&limits(), "main", Identity::Admin, draft, 1).is_err());

        let draft = ChatDraft {
            id: "m3".into(),
            media_url: Some("https://cdn.local/a.png".into()),
            kind: MessageKind::Image,
            ..ChatDraft::default()
        };
        let msg = build_message(&limits(), "main", Identity::Friend, draft, 1).unwrap();
        assert_eq!(msg.media_ref.as_deref(), Some("https://cdn.local/a.png"));
    }

    #[test]
    fn far_future_timestamps_fall_back_to_server_time() {
        let now = 1_700_000_000_000;
        assert_eq!(plausible_timestamp(Some(i64::MAX - 10), now), now);
        assert_eq!(plausible_timestamp(Some(now + MAX_FUTURE_SKEW_MS + 1), now), now);
        assert_eq!(plausible_timestamp(Some(-5), now), now);
        assert_eq!(plausible_timestamp(None, now), now);
        assert_eq!(plausible_timestamp(Some(now - 60_000), now), now - 60_000);
        assert_eq!(plausible_timestamp(Some(now + 1_000), now), now + 1_000);
    }

    #[test]
    fn unsafe_media_schemes_are_dropped() {
        assert_eq!(sanitize_media("JavaScript:alert(1)", 2048), None);
        assert_eq!(sanitize_media(&"h".repeat(3000), 2048), None);
        assert_eq!(sanitize_media(" /media/a.ogg ", 2048).as_deref(), Some("/media/a.ogg"));
    }
}
