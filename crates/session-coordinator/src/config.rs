//! Session coordinator configuration.
//!
//! Configuration is loaded from environment variables. Nothing here is
//! secret today, but `Debug` is written out by hand so new fields are
//! reviewed before they can reach logs.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

use crate::transport::ClientRole;

/// Default coordinator mailbox size.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default user-notice broadcast buffer.
pub const DEFAULT_NOTICE_CAPACITY: usize = 16;

/// Default tracing filter for the binary.
pub const DEFAULT_LOG_FILTER: &str = "session_coordinator=info";

/// Session coordinator configuration.
#[derive(Clone)]
pub struct Config {
    /// Transport application id, trimmed.
    pub app_id: String,

    /// Role used when the caller does not choose one (default: audience).
    pub default_role: ClientRole,

    /// Coordinator actor mailbox size (default: 64).
    pub mailbox_capacity: usize,

    /// User-notice broadcast buffer (default: 16).
    pub notice_capacity: usize,

    /// Tracing filter directive used by the binary.
    pub log_filter: String,

    /// Emit JSON logs from the binary.
    pub json_logs: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("app_id", &self.app_id)
            .field("default_role", &self.default_role)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("notice_capacity", &self.notice_capacity)
            .field("log_filter", &self.log_filter)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_id = vars
            .get("SC_APP_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("SC_APP_ID".to_string()))?
            .trim()
            .to_string();

        if app_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SC_APP_ID must not be empty".to_string(),
            ));
        }

        let default_role = match vars.get("SC_DEFAULT_ROLE") {
            Some(raw) => raw
                .parse::<ClientRole>()
                .map_err(|e| ConfigError::InvalidValue(format!("SC_DEFAULT_ROLE: {e}")))?,
            None => ClientRole::Audience,
        };

        let mailbox_capacity =
            parse_capacity(vars, "SC_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        let notice_capacity = parse_capacity(vars, "SC_NOTICE_CAPACITY", DEFAULT_NOTICE_CAPACITY)?;

        let log_filter = vars
            .get("SC_LOG_FILTER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let json_logs = vars
            .get("SC_JSON_LOGS")
            .is_some_and(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"));

        Ok(Config {
            app_id,
            default_role,
            mailbox_capacity,
            notice_capacity,
            log_filter,
            json_logs,
        })
    }
}

/// Settings for the `session-sim` binary's simulated room.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Room to join (default: "lobby").
    pub room: String,

    /// Local uid (default: assigned by the transport).
    pub local_uid: Option<u64>,

    /// Simulated signaling latency (default: 150ms).
    pub latency_ms: u64,

    /// Whether a camera is present (default: true).
    pub camera: bool,

    /// Whether a microphone is present (default: true).
    pub microphone: bool,

    /// Remote peers already in the room, comma-separated uids.
    pub remote_peers: Vec<u64>,
}

/// Default simulated latency in milliseconds.
pub const DEFAULT_SIM_LATENCY_MS: u64 = 150;

impl SimulationConfig {
    /// Load simulation settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load simulation settings from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let room = vars
            .get("SC_SIM_ROOM")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "lobby".to_string());

        let local_uid = vars
            .get("SC_SIM_UID")
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue(format!("SC_SIM_UID: {e}")))
            })
            .transpose()?;

        let latency_ms = match vars.get("SC_SIM_LATENCY_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue(format!("SC_SIM_LATENCY_MS: {e}")))?,
            None => DEFAULT_SIM_LATENCY_MS,
        };

        let camera = parse_flag(vars, "SC_SIM_CAMERA", true)?;
        let microphone = parse_flag(vars, "SC_SIM_MICROPHONE", true)?;

        let remote_peers = match vars.get("SC_SIM_REMOTE_PEERS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.parse::<u64>().map_err(|e| {
                        ConfigError::InvalidValue(format!("SC_SIM_REMOTE_PEERS '{part}': {e}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(SimulationConfig {
            room,
            local_uid,
            latency_ms,
            camera,
            microphone,
            remote_peers,
        })
    }
}

fn parse_flag(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}

/// Parse a positive capacity, falling back to `default` when unset.
///
/// Channel constructors panic on zero capacity, so zero is rejected here.
fn parse_capacity(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than 0"
        ))),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(format!("{key}: {e}"))),
    }
}
