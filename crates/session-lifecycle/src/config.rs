//! Session configuration
//!
//! Settings consumed by [`SessionBuilder`](crate::builder::SessionBuilder)
//! when it constructs an INVITE session. Can be loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{LifecycleError, Result};

/// Smallest Min-SE accepted by RFC 4028
pub const MIN_SESSION_EXPIRES: Duration = Duration::from_secs(90);

/// Largest accepted per-session transition history
pub const MAX_HISTORY_LIMIT: usize = 1024;

/// Which party refreshes the session when session timers are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Refresher {
    Uac,
    Uas,
}

/// Pool sizing for one of the two alternating arenas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Name reported in logs and errors
    pub name: String,

    /// Bytes reserved when the pool is created
    pub initial_size: usize,

    /// Upper bound on bytes the pool may hand out
    pub capacity: usize,
}

/// Configuration for INVITE session construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Active arena (holds the currently negotiated state)
    pub active_pool: PoolConfig,

    /// Provisional arena (holds state of an in-flight negotiation)
    pub provisional_pool: PoolConfig,

    /// Attach the reliable provisional response (100rel) extension
    pub enable_100rel: bool,

    /// Attach the session timer extension
    pub enable_session_timer: bool,

    /// Session-Expires interval
    #[serde(with = "duration_secs")]
    pub session_expires: Duration,

    /// Min-SE interval
    #[serde(with = "duration_secs")]
    pub min_se: Duration,

    /// Preferred refresher
    pub refresher: Refresher,

    /// Maximum number of state transitions kept per session
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_pool: PoolConfig {
                name: "inv-active".to_string(),
                initial_size: 1000,
                capacity: 64 * 1024,
            },
            provisional_pool: PoolConfig {
                name: "inv-prov".to_string(),
                initial_size: 1000,
                capacity: 64 * 1024,
            },
            enable_100rel: false,
            enable_session_timer: false,
            session_expires: Duration::from_secs(1800),
            min_se: MIN_SESSION_EXPIRES,
            refresher: Refresher::Uac,
            history_limit: 16,
        }
    }
}

impl SessionConfig {
    /// Parse configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Check the configuration for values a session cannot be built with
    pub fn validate(&self) -> Result<()> {
        for pool in [&self.active_pool, &self.provisional_pool] {
            if pool.initial_size == 0 {
                return Err(LifecycleError::Config(format!(
                    "Pool {} has zero initial size",
                    pool.name
                )));
            }
            if pool.initial_size > pool.capacity {
                return Err(LifecycleError::Config(format!(
                    "Pool {} initial size {} exceeds capacity {}",
                    pool.name, pool.initial_size, pool.capacity
                )));
            }
        }

        if self.enable_session_timer {
            if self.min_se < MIN_SESSION_EXPIRES {
                return Err(LifecycleError::Config(format!(
                    "Min-SE must be at least {}s, got {}s",
                    MIN_SESSION_EXPIRES.as_secs(),
                    self.min_se.as_secs()
                )));
            }
            if self.session_expires < self.min_se {
                return Err(LifecycleError::Config(format!(
                    "Session-Expires {}s is below Min-SE {}s",
                    self.session_expires.as_secs(),
                    self.min_se.as_secs()
                )));
            }
        }

        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            return Err(LifecycleError::Config(format!(
                "history_limit must be between 1 and {}, got {}",
                MAX_HISTORY_LIMIT, self.history_limit
            )));
        }

        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
