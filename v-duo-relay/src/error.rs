use thiserror::Error;

use crate::domain::ServerEvent;
use crate::storage::StorageError;

/// 协议层错误 / Protocol-level errors
///
/// 任何一种都不会断开连接，只回复 `error` 帧 / none of these drop the connection, they answer with an `error` frame
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid room: {0}")]
    InvalidRoom(String),

    #[error("event requires a joined session")]
    NotJoined,

    #[error("no call in a state that accepts {0}")]
    CallState(&'static str),

    #[error("peer {0} is unreachable")]
    PeerUnreachable(crate::domain::Identity),

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StorageError),
}

impl RelayError {
    /// 错误代码 / Error code carried in the `error` frame
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::MalformedEvent(_) => "malformed_event",
            RelayError::UnknownEvent(_) => "unknown_event",
            RelayError::InvalidIdentity(_) => "invalid_identity",
            RelayError::InvalidRoom(_) => "invalid_room",
            RelayError::NotJoined => "not_joined",
            RelayError::CallState(_) => "call_state",
            RelayError::PeerUnreachable(_) => "peer_unreachable",
            RelayError::PersistenceUnavailable(_) => "persistence_unavailable",
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        RelayError::MalformedEvent(message.into())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_carries_code() {
        let ev = RelayError::InvalidRoom("lobby".into()).to_event();
        match ev {
            ServerEvent::Error { code, message } => {
                assert_eq!(code, "invalid_room");
                assert!(message.contains("lobby"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
