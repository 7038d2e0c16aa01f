//! Server configuration
//!
//! Loaded once at process start from a TOML file. Every section carries
//! defaults so a minimal file (or an empty one) yields a runnable
//! configuration; the sample under `config/server.toml` lists every
//! recognized option.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub revocation: RevocationConfig,
    pub session: SessionConfig,
    pub chat: ChatConfig,
    pub vision: VisionConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
}

/// Listener and tick-clock settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation tick rate in Hz.
    pub tick_rate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tick_rate: 20,
        }
    }
}

/// Credential validation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Expected `iss` claim of presented tokens.
    pub issuer: String,
    /// Endpoint serving the PEM-encoded ES256 verification key.
    pub public_key_url: String,
    pub public_key_refresh_hours: u64,
    /// When true, a revocation-store transport error rejects the token
    /// instead of admitting with a warning.
    pub fail_closed: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "login-server".to_string(),
            public_key_url: "http://localhost:9090/auth/public-key".to_string(),
            public_key_refresh_hours: 24,
            fail_closed: false,
        }
    }
}

/// Connection settings for the external revocation store. The in-process
/// implementation ignores these; they are handed to whichever store backend
/// the deployment wires in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    pub address: String,
    pub password: String,
    pub key_prefix: String,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: String::new(),
            key_prefix: "blacklist:".to_string(),
        }
    }
}

/// Game session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_id: String,
    pub max_players: u32,
    /// Radius of the generated map, in chunks from the origin.
    pub initial_map_radius: i32,
    /// Seed for deterministic terrain generation.
    pub map_seed: u64,
    /// Ticks between `session_status` broadcasts.
    pub status_interval: u64,
    /// Upper bound on commands drained from the inbound pipeline per tick;
    /// excess commands stay queued for the next tick.
    pub max_commands_per_tick: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: "main".to_string(),
            max_players: 100,
            initial_map_radius: 5,
            map_seed: 0,
            status_interval: 200,
            max_commands_per_tick: 256,
        }
    }
}

/// Chat limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_message_length: usize,
    /// Messages allowed per fixed one-minute window.
    pub rate_limit: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 500,
            rate_limit: 10,
        }
    }
}

/// Vision defaults and recompute cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub unit_range: i32,
    pub building_range: i32,
    /// Ticks between full cell recomputations for subjects whose observer
    /// set did not change.
    pub vision_interval: u64,
    /// Consumed by the social collaborator: share vision with group members
    /// automatically on membership events.
    pub auto_share_with_group: bool,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            unit_range: 7,
            building_range: 10,
            vision_interval: 1,
            auto_share_with_group: true,
        }
    }
}

/// Delta log and per-client emission settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub delta_log_capacity: usize,
    /// Ticks between forced full-snapshot reconciliations per client.
    pub reconcile_interval: u64,
    /// Per-client outbound budget in bytes per second.
    pub bandwidth_limit: usize,
    /// Distance thresholds for the priority tiers.
    pub priority_critical_radius: i32,
    pub priority_mid_radius: i32,
    pub priority_far_radius: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delta_log_capacity: 2000,
            reconcile_interval: 1200,
            bandwidth_limit: 50_000,
            priority_critical_radius: 5,
            priority_mid_radius: 15,
            priority_far_radius: 30,
        }
    }
}

/// Vision cache durations, caps and persistence cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a timed building snapshot, in ticks.
    pub building_duration_ticks: u64,
    /// Lifetime of a timed hero snapshot, in ticks.
    pub hero_duration_ticks: u64,
    /// Ticks between cache prune passes.
    pub prune_interval: u64,
    /// Per-subject cap on explored cells.
    pub max_explored_cells: usize,
    /// Per-subject cap on cached entity snapshots.
    pub max_cached_entities: usize,
    /// Seconds between background persistence flushes.
    pub save_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            building_duration_ticks: 12_000,
            hero_duration_ticks: 36_000,
            prune_interval: 200,
            max_explored_cells: 100_000,
            max_cached_entities: 2_000,
            save_interval_secs: 30,
        }
    }
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.tick_rate == 0 {
            return Err(ConfigError::Invalid("server.tick_rate must be > 0".into()));
        }
        if self.session.max_players == 0 {
            return Err(ConfigError::Invalid("session.max_players must be > 0".into()));
        }
        if self.session.initial_map_radius < 0 {
            return Err(ConfigError::Invalid(
                "session.initial_map_radius must be >= 0".into(),
            ));
        }
        if self.sync.delta_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sync.delta_log_capacity must be > 0".into(),
            ));
        }
        if self.vision.vision_interval == 0 {
            return Err(ConfigError::Invalid(
                "vision.vision_interval must be > 0".into(),
            ));
        }
        if self.cache.prune_interval == 0 {
            return Err(ConfigError::Invalid("cache.prune_interval must be > 0".into()));
        }
        Ok(())
    }

    /// Duration of one simulation tick.
    pub fn tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.server.tick_rate as f64)
    }

    /// Per-tick outbound byte budget for one client.
    pub fn tick_byte_budget(&self) -> usize {
        (self.sync.bandwidth_limit / self.server.tick_rate as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_temp("");
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.server.tick_rate, 20);
        assert_eq!(cfg.session.max_players, 100);
        assert_eq!(cfg.chat.max_message_length, 500);
        assert_eq!(cfg.sync.delta_log_capacity, 2000);
        assert_eq!(cfg.cache.building_duration_ticks, 12_000);
    }

    #[test]
    fn test_partial_file_overrides_some_fields() {
        let file = write_temp(
            r#"
            [server]
            port = 9000
            tick_rate = 30

            [chat]
            rate_limit = 3
            "#,
        );
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.tick_rate, 30);
        assert_eq!(cfg.chat.rate_limit, 3);
        assert_eq!(cfg.chat.max_message_length, 500);
    }

    #[test]
    fn test_zero_tick_rate_is_rejected() {
        let file = write_temp("[server]\ntick_rate = 0\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let file = write_temp("this is not toml ][");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/server.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_tick_byte_budget() {
        let cfg = Config::default();
        assert_eq!(cfg.tick_byte_budget(), 50_000 / 20);
    }
}
