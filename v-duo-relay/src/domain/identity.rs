use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 房间内两个逻辑身份之一 / One of the two logical participants of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    Admin,
    Friend,
}

impl Identity {
    pub const ALL: [Identity; 2] = [Identity::Admin, Identity::Friend];

    /// 对端身份 / The other identity of the room
    pub fn peer(self) -> Identity {
        match self {
            Identity::Admin => Identity::Friend,
            Identity::Friend => Identity::Admin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Identity::Admin => "admin",
            Identity::Friend => "friend",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Identity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Identity::Admin),
            "friend" => Ok(Identity::Friend),
            other => Err(other.to_string()),
        }
    }
}

/// 展示资料 / Display profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    #[serde(default, alias = "avatar", skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_is_involution() {
        for id in Identity::ALL {
            assert_ne!(id, id.peer());
            assert_eq!(id, id.peer().peer());
        }
    }

    #[test]
    fn parse_rejects_third_identity() {
        assert_eq!("admin".parse::<Identity>(), Ok(Identity::Admin));
        assert!("mallory".parse::<Identity>().is_err());
    }

    #[test]
    fn profile_accepts_legacy_avatar_field() {
        let p: Profile = serde_json::from_str(r#"{"name":"A","avatar":"u"}"#).unwrap();
        assert_eq!(p.avatar_ref.as_deref(), Some("u"));
    }
}
