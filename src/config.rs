//! Viewer configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::collections::HashMap;
use std::env::VarError;
use std::str::FromStr;

use uuid::Uuid;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::damping::{DEFAULT_CURSOR_RATE, DEFAULT_OBJECT_RATE, DEFAULT_PEER_RATE, DampingRates};
use crate::error::ErrorCode;
use crate::interaction::{AnnotationPolicy, DEFAULT_MARKER_DISTANCE, DEFAULT_TRIGGER};
use crate::kernel::KernelEndpoint;
use crate::replication::RoomId;

pub const DEFAULT_ROOM: &str = "part-review";
pub const DEFAULT_KERNEL_URL: &str = "ws://localhost:9091/";
pub const DEFAULT_REMOTE_DRAG_TTL_MS: u64 = 250;

const VARS: &[&str] = &[
    "PARTROOM_ROOM",
    "PARTROOM_KERNEL_URL",
    "PARTROOM_KERNEL_SESSION",
    "PARTROOM_CURSOR_RATE",
    "PARTROOM_PEER_RATE",
    "PARTROOM_OBJECT_RATE",
    "PARTROOM_REMOTE_DRAG_TTL_MS",
    "PARTROOM_CACHE_CAPACITY",
    "PARTROOM_MARKER_DISTANCE",
    "PARTROOM_ANNOTATION_TRIGGER",
    "PARTROOM_ANNOTATION_POLICY",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub room: RoomId,
    pub kernel: KernelEndpoint,
    pub rates: DampingRates,
    pub remote_drag_ttl_ms: u64,
    pub cache_capacity: usize,
    pub marker_distance: f32,
    pub annotation_trigger: char,
    pub annotation_policy: AnnotationPolicy,
}

impl ViewerConfig {
    /// Build typed viewer config from environment variables.
    ///
    /// Optional:
    /// - `PARTROOM_ROOM`: default `part-review`
    /// - `PARTROOM_KERNEL_URL`: default `ws://localhost:9091/`
    /// - `PARTROOM_KERNEL_SESSION`: random uuid when absent
    /// - `PARTROOM_CURSOR_RATE` / `PARTROOM_PEER_RATE` / `PARTROOM_OBJECT_RATE`: 50 / 10 / 20
    /// - `PARTROOM_REMOTE_DRAG_TTL_MS`: default 250
    /// - `PARTROOM_CACHE_CAPACITY`: default 8
    /// - `PARTROOM_MARKER_DISTANCE`: default 17.32
    /// - `PARTROOM_ANNOTATION_TRIGGER`: a single character, default `/`
    /// - `PARTROOM_ANNOTATION_POLICY`: `anywhere` (default) or `hover-only`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for any value that does not parse,
    /// including one that is not valid Unicode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut vars = HashMap::new();
        for &var in VARS {
            if let Some(value) = env_value(var, std::env::var(var))? {
                vars.insert(var, value);
            }
        }
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for any value that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let room = RoomId(lookup("PARTROOM_ROOM").unwrap_or_else(|| DEFAULT_ROOM.to_owned()));
        let kernel = KernelEndpoint {
            url: lookup("PARTROOM_KERNEL_URL").unwrap_or_else(|| DEFAULT_KERNEL_URL.to_owned()),
            session: lookup("PARTROOM_KERNEL_SESSION").unwrap_or_else(|| Uuid::new_v4().to_string()),
        };
        let rates = DampingRates {
            cursor: parse_rate(&lookup, "PARTROOM_CURSOR_RATE", DEFAULT_CURSOR_RATE)?,
            peer: parse_rate(&lookup, "PARTROOM_PEER_RATE", DEFAULT_PEER_RATE)?,
            object: parse_rate(&lookup, "PARTROOM_OBJECT_RATE", DEFAULT_OBJECT_RATE)?,
        };
        let remote_drag_ttl_ms = parse_or(&lookup, "PARTROOM_REMOTE_DRAG_TTL_MS", DEFAULT_REMOTE_DRAG_TTL_MS)?;
        let cache_capacity = parse_or(&lookup, "PARTROOM_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?;
        let marker_distance = parse_rate(&lookup, "PARTROOM_MARKER_DISTANCE", DEFAULT_MARKER_DISTANCE)?;
        let annotation_trigger = parse_trigger(lookup("PARTROOM_ANNOTATION_TRIGGER"))?;
        let annotation_policy = parse_policy(lookup("PARTROOM_ANNOTATION_POLICY").as_deref())?;

        Ok(Self {
            room,
            kernel,
            rates,
            remote_drag_ttl_ms,
            cache_capacity,
            marker_distance,
            annotation_trigger,
            annotation_policy,
        })
    }

    /// Remote drag window in seconds, as the damper takes it.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn remote_drag_ttl_secs(&self) -> f32 {
        self.remote_drag_ttl_ms as f32 / 1000.0
    }
}

/// Unset is absent; set but not Unicode is an error, never a silent default.
fn env_value(var: &'static str, read: Result<String, VarError>) -> Result<Option<String>, ConfigError> {
    match read {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(raw)) => Err(ConfigError::Invalid { var, value: raw.to_string_lossy().into_owned() }),
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

/// Non-negative finite float.
fn parse_rate(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: f32) -> Result<f32, ConfigError> {
    let value = parse_or(lookup, var, default)?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid { var, value: value.to_string() })
    }
}

fn parse_trigger(raw: Option<String>) -> Result<char, ConfigError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_TRIGGER);
    };
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => Ok(c),
        _ => Err(ConfigError::Invalid { var: "PARTROOM_ANNOTATION_TRIGGER", value: raw }),
    }
}

fn parse_policy(raw: Option<&str>) -> Result<AnnotationPolicy, ConfigError> {
    match raw.unwrap_or("anywhere") {
        "anywhere" => Ok(AnnotationPolicy::Anywhere),
        "hover-only" => Ok(AnnotationPolicy::HoverOnly),
        other => Err(ConfigError::Invalid { var: "PARTROOM_ANNOTATION_POLICY", value: other.to_owned() }),
    }
}
