//! Authenticated player model
//!
//! A `Player` is built from verified credential claims at connection time
//! and becomes the owning subject for every entity that player controls.

use std::time::SystemTime;

/// Stable subject identifier (the credential's `user_id` claim). Entity
/// ownership and vision maps are keyed by this.
pub type SubjectId = i64;

/// Account activation sentinel: banned.
pub const ACTIVATION_BANNED: i64 = -1;
/// Account activation sentinel: registered but never activated.
pub const ACTIVATION_NONE: i64 = 0;

/// An authenticated subject admitted to (or about to join) the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// From the `user_id` claim.
    pub id: SubjectId,
    pub username: String,
    pub email: String,
    pub user_type: String,
    /// "password" or "oauth".
    pub auth_method: String,
    /// Bitwise permission flags.
    pub permissions: i64,
    /// Activation timestamp in nanoseconds, or a sentinel value.
    pub activated: i64,
    /// Set when the player is admitted to the session.
    pub connected_at: Option<SystemTime>,
}

impl Player {
    /// Whether the account is activated and not banned.
    pub fn is_active(&self) -> bool {
        self.activated > 0
    }

    pub fn is_banned(&self) -> bool {
        self.activated == ACTIVATION_BANNED
    }

    /// Identifier as carried on the wire.
    pub fn wire_id(&self) -> String {
        self.id.to_string()
    }

    pub fn has_permission(&self, flag: i64) -> bool {
        self.permissions & flag != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(activated: i64) -> Player {
        Player {
            id: 123,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            user_type: "player".to_string(),
            auth_method: "password".to_string(),
            permissions: 0b101,
            activated,
            connected_at: None,
        }
    }

    #[test]
    fn test_activation_states() {
        assert!(player(1_697_123_456_789_000_000).is_active());
        assert!(!player(ACTIVATION_NONE).is_active());
        assert!(!player(ACTIVATION_BANNED).is_active());
        assert!(player(ACTIVATION_BANNED).is_banned());
    }

    #[test]
    fn test_wire_id_is_decimal() {
        assert_eq!(player(1).wire_id(), "123");
    }

    #[test]
    fn test_permission_bits() {
        let p = player(1);
        assert!(p.has_permission(0b001));
        assert!(p.has_permission(0b100));
        assert!(!p.has_permission(0b010));
    }
}
