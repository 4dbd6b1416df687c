//! Session configuration
//!
//! Loaded from JSON through [`cad_schema::Validatable`]; every field has a
//! default so an empty object `{}` is a valid configuration.

use std::fmt;
use std::time::Duration;

use cad_schema::{SchemaError, Validatable};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Byte capacity written as a number or a string with a K/M suffix ("256K")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub usize);

impl ByteSize {
    const UNITS: [(char, usize); 2] = [('M', 1024 * 1024), ('K', 1024)];

    pub const fn kib(n: usize) -> Self {
        ByteSize(n * 1024)
    }

    /// Parse "4096", "8K" or "1M" (suffix is case insensitive)
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty byte size".to_string());
        }

        let upper = s.to_ascii_uppercase();
        let (digits, multiplier) = Self::UNITS
            .iter()
            .find_map(|(suffix, mult)| upper.strip_suffix(*suffix).map(|d| (d.to_string(), *mult)))
            .unwrap_or((upper.clone(), 1));

        let n: usize = digits
            .trim()
            .parse()
            .map_err(|e| format!("invalid byte size '{}': {}", s, e))?;
        n.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| format!("byte size '{}' overflows", s))
    }

    pub fn as_bytes(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (suffix, mult) in Self::UNITS {
            if self.0 >= mult && self.0 % mult == 0 {
                return write!(f, "{}{}", self.0 / mult, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => usize::try_from(n)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
            Raw::Text(s) => ByteSize::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

impl JsonSchema for ByteSize {
    fn schema_name() -> String {
        "ByteSize".to_string()
    }

    fn json_schema(_gen: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        use schemars::schema::{InstanceType, Schema, SchemaObject, SingleOrVec};

        let mut schema = SchemaObject::default();
        schema.instance_type = Some(SingleOrVec::Vec(vec![
            InstanceType::String,
            InstanceType::Integer,
        ]));
        schema.metadata().description =
            Some("Byte size as a number or a string with K/M suffix, e.g. 8192 or \"256K\"".to_string());
        Schema::Object(schema)
    }
}

/// Largest slot a shared region may be configured with
pub const MAX_SLOT_BYTES: ByteSize = ByteSize::kib(64 * 1024);

/// Which transport the channel factory should build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    /// Shared memory when it can be allocated, messages otherwise
    #[default]
    Auto,
    /// Shared memory only; still falls back if allocation fails
    Shared,
    /// Always use the message transport
    Message,
}

impl std::str::FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "shared" => Ok(Self::Shared),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown transport '{}' (expected auto, shared or message)", other)),
        }
    }
}

/// What the loop does after a recoverable per-frame script error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FrameErrorPolicy {
    /// Log it and keep running
    #[default]
    Continue,
    /// Stop the session
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(title = "Cadence Session Configuration")]
pub struct SessionConfig {
    #[serde(default = "default_target_fps")]
    #[schemars(description = "Frames per second driven by the render loop", range(min = 1, max = 240))]
    pub target_fps: u32,

    #[serde(default)]
    #[schemars(description = "Channel transport: auto, shared or message")]
    pub transport: TransportPreference,

    #[serde(default = "default_max_commands")]
    #[schemars(description = "Draw commands kept per frame; the rest are dropped", range(min = 1, max = 65536))]
    pub max_commands_per_frame: u32,

    #[serde(default = "default_draw_slot_bytes")]
    #[schemars(description = "Byte capacity of each draw slot in the shared region (default: 256K)")]
    pub draw_slot_bytes: ByteSize,

    #[serde(default = "default_input_slot_bytes")]
    #[schemars(description = "Byte capacity of each input slot in the shared region (default: 8K)")]
    pub input_slot_bytes: ByteSize,

    #[serde(default = "default_ready_timeout_ms")]
    #[schemars(description = "How long to wait for the worker to become ready", range(min = 1))]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    #[schemars(description = "How long to wait for the worker to acknowledge a stop before terminating it", range(min = 1))]
    pub stop_timeout_ms: u64,

    #[serde(default = "default_worker_idle_poll_us")]
    #[schemars(description = "Worker sleep between input polls while no new input is available", range(min = 1))]
    pub worker_idle_poll_us: u64,

    #[serde(default)]
    #[schemars(description = "continue or stop after a script error inside the frame callback")]
    pub on_frame_error: FrameErrorPolicy,

    #[serde(default = "default_log_level")]
    #[schemars(description = "Log level: trace, debug, info, warn, error")]
    #[schemars(regex(pattern = r"^(trace|debug|info|warn|error)$"))]
    pub log_level: String,
}

fn default_target_fps() -> u32 {
    60
}

fn default_max_commands() -> u32 {
    4096
}

fn default_draw_slot_bytes() -> ByteSize {
    ByteSize::kib(256)
}

fn default_input_slot_bytes() -> ByteSize {
    ByteSize::kib(8)
}

fn default_ready_timeout_ms() -> u64 {
    2000
}

fn default_stop_timeout_ms() -> u64 {
    500
}

fn default_worker_idle_poll_us() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            transport: TransportPreference::default(),
            max_commands_per_frame: default_max_commands(),
            draw_slot_bytes: default_draw_slot_bytes(),
            input_slot_bytes: default_input_slot_bytes(),
            ready_timeout_ms: default_ready_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            worker_idle_poll_us: default_worker_idle_poll_us(),
            on_frame_error: FrameErrorPolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl SessionConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.target_fps.max(1) as u64)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn worker_idle_poll(&self) -> Duration {
        Duration::from_micros(self.worker_idle_poll_us)
    }

    pub fn max_commands(&self) -> usize {
        self.max_commands_per_frame as usize
    }
}

impl Validatable for SessionConfig {
    fn check(&self) -> cad_schema::Result<()> {
        // Schemas cannot express ranges on string-typed sizes.
        for (field, size) in [
            ("draw_slot_bytes", self.draw_slot_bytes),
            ("input_slot_bytes", self.input_slot_bytes),
        ] {
            if size.as_bytes() == 0 || size > MAX_SLOT_BYTES {
                return Err(SchemaError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("must be between 1 and {}", MAX_SLOT_BYTES),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_parse() {
        assert_eq!(ByteSize::parse("1024").unwrap(), ByteSize(1024));
        assert_eq!(ByteSize::parse("8K").unwrap(), ByteSize(8 * 1024));
        assert_eq!(ByteSize::parse("8k").unwrap(), ByteSize(8 * 1024));
        assert_eq!(ByteSize::parse(" 2M ").unwrap(), ByteSize(2 * 1024 * 1024));
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("lots").is_err());
        assert!(ByteSize::parse("-1K").is_err());
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(ByteSize(512).to_string(), "512");
        assert_eq!(ByteSize::kib(256).to_string(), "256K");
        assert_eq!(ByteSize(3 * 1024 * 1024).to_string(), "3M");
        assert_eq!(ByteSize(1536).to_string(), "1536");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SessionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.target_fps, 60);
        assert_eq!(config.transport, TransportPreference::Auto);
        assert_eq!(config.draw_slot_bytes, ByteSize::kib(256));
        assert_eq!(config.on_frame_error, FrameErrorPolicy::Continue);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "target_fps": 30,
            "transport": "message",
            "max_commands_per_frame": 128,
            "draw_slot_bytes": "64K",
            "input_slot_bytes": 4096,
            "stop_timeout_ms": 100,
            "on_frame_error": "stop",
            "log_level": "debug"
        }"#;
        let config = SessionConfig::from_json_str(json).unwrap();
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.transport, TransportPreference::Message);
        assert_eq!(config.max_commands(), 128);
        assert_eq!(config.draw_slot_bytes, ByteSize::kib(64));
        assert_eq!(config.input_slot_bytes, ByteSize(4096));
        assert_eq!(config.stop_timeout(), Duration::from_millis(100));
        assert_eq!(config.on_frame_error, FrameErrorPolicy::Stop);
    }

    #[test]
    fn test_out_of_range_fps_rejected() {
        assert!(SessionConfig::from_json_str(r#"{"target_fps": 0}"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{"target_fps": 500}"#).is_err());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        assert!(SessionConfig::from_json_str(r#"{"transport": "pigeon"}"#).is_err());
        assert!("pigeon".parse::<TransportPreference>().is_err());
        assert_eq!("Shared".parse::<TransportPreference>().unwrap(), TransportPreference::Shared);
    }

    #[test]
    fn test_zero_slot_rejected() {
        let err = SessionConfig::from_json_str(r#"{"draw_slot_bytes": "0K"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { .. }));
    }

    #[test]
    fn test_huge_slot_rejected() {
        assert!(SessionConfig::from_json_str(r#"{"draw_slot_bytes": "65M"}"#).is_err());
        assert!(SessionConfig::from_json_str(r#"{"draw_slot_bytes": "64M"}"#).is_ok());
    }

    #[test]
    fn test_frame_period() {
        let config = SessionConfig { target_fps: 50, ..Default::default() };
        assert_eq!(config.frame_period(), Duration::from_millis(20));
    }
}
