//! Wire protocol between clients and the session server
//!
//! Every frame is a JSON object with a `type` string and a `payload` object,
//! modeled as adjacently-tagged serde enums. Client→server types: `join`,
//! `leave`, `chat`, `ping`. Server→client types cover session bookkeeping
//! (`welcome`, `player_joined`, `player_left`, `chat`, `session_status`,
//! `pong`, `error`) and entity synchronization (`entity_snapshot`,
//! `entity_delta`, `entity_disappeared`, `entity_cached`, `explored_hexes`).

use serde::{Deserialize, Serialize};

use crate::hex::Axial;

/// Messages a client may send once the transport is framed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {},
    Leave {},
    Chat { message: String },
    Ping {},
}

/// Messages the server may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        player_id: String,
        username: String,
        session_id: String,
        session_status: SessionStatus,
    },
    PlayerJoined {
        player_id: String,
        username: String,
        email: String,
    },
    PlayerLeft {
        player_id: String,
        username: String,
    },
    Chat {
        player_id: String,
        username: String,
        message: String,
        timestamp: i64,
    },
    SessionStatus(SessionStatus),
    Pong {
        timestamp: i64,
    },
    Error {
        code: String,
        message: String,
    },
    EntitySnapshot {
        id: u64,
        #[serde(rename = "type")]
        class: String,
        owner: String,
        pos: Axial,
        is_stale: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<u64>,
        data: serde_json::Value,
    },
    EntityDelta {
        id: u64,
        kind: String,
        value: serde_json::Value,
    },
    EntityDisappeared {
        id: u64,
    },
    EntityCached {
        id: u64,
        cache_mode: String,
        expires_at: u64,
    },
    ExploredHexes {
        hexes: Vec<ExploredHex>,
    },
}

/// Session state snapshot carried by `welcome` and `session_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: String,
    pub player_count: u32,
    pub max_players: u32,
    pub server_tick: u64,
    pub uptime: i64,
}

/// One explored cell inside an `explored_hexes` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploredHex {
    pub hex: Axial,
    pub terrain: String,
}

/// Closed set of `error.code` values; `error.message` is diagnostic only.
pub mod error_codes {
    pub const INVALID_MESSAGE: &str = "invalid_message";
    pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown_message_type";
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    pub const JOIN_FAILED: &str = "join_failed";
    pub const SESSION_FULL: &str = "session_full";
    pub const INVALID_CHAT: &str = "invalid_chat";
    pub const CHAT_TOO_LONG: &str = "chat_too_long";
    pub const RATE_LIMITED: &str = "rate_limited";
}

impl ServerMessage {
    /// Shorthand for an `error` frame.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_parses_with_empty_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"join","payload":{}}"#).unwrap();
        assert_eq!(msg, ClientMessage::Join {});
    }

    #[test]
    fn test_chat_round_trip() {
        let msg = ClientMessage::Chat {
            message: "hi".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"chat","payload":{"message":"hi"}}"#);
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"launch_nukes","payload":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_welcome_shape() {
        let msg = ServerMessage::Welcome {
            player_id: "123".to_string(),
            username: "alice".to_string(),
            session_id: "main".to_string(),
            session_status: SessionStatus {
                state: "waiting".to_string(),
                player_count: 1,
                max_players: 100,
                server_tick: 0,
                uptime: 0,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["payload"]["player_id"], "123");
        assert_eq!(value["payload"]["session_status"]["state"], "waiting");
        assert_eq!(value["payload"]["session_status"]["max_players"], 100);
    }

    #[test]
    fn test_snapshot_omits_absent_cache_fields() {
        let msg = ServerMessage::EntitySnapshot {
            id: 42,
            class: "unit".to_string(),
            owner: "7".to_string(),
            pos: Axial::new(4, 3),
            is_stale: false,
            cache_mode: None,
            last_seen: None,
            data: serde_json::json!({"health": 10}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "entity_snapshot");
        assert_eq!(value["payload"]["type"], "unit");
        assert_eq!(value["payload"]["pos"], serde_json::json!([4, 3]));
        assert!(value["payload"].get("cache_mode").is_none());
        assert!(value["payload"].get("last_seen").is_none());
    }

    #[test]
    fn test_stale_snapshot_carries_cache_mode() {
        let msg = ServerMessage::EntitySnapshot {
            id: 7,
            class: "settlement".to_string(),
            owner: "9".to_string(),
            pos: Axial::new(20, 20),
            is_stale: true,
            cache_mode: Some("permanent".to_string()),
            last_seen: Some(151),
            data: serde_json::json!({}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["is_stale"], true);
        assert_eq!(value["payload"]["cache_mode"], "permanent");
        assert_eq!(value["payload"]["last_seen"], 151);
    }

    #[test]
    fn test_explored_hexes_round_trip() {
        let msg = ServerMessage::ExploredHexes {
            hexes: vec![ExploredHex {
                hex: Axial::new(1, -1),
                terrain: "forest".to_string(),
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_error_helper() {
        let msg = ServerMessage::error(error_codes::RATE_LIMITED, "slow down");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"]["code"], "rate_limited");
    }
}
