//! Runtime configuration for the Babblefish server.
//!
//! Settings are read from an optional TOML file, then scalar limits can be
//! overridden through `BABBLEFISH_*` environment variables. A missing file
//! yields the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value}")]
    EnvOverride { var: String, value: String },
}

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub rooms: RoomSettings,
    pub pipeline: PipelineSettings,
    pub models: ModelSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Room and connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    /// Cap enforced when a participant joins.
    pub max_participants_per_room: usize,
    /// Cap enforced at room creation; idle rooms may be evicted first.
    pub max_rooms: usize,
    /// Grace period before an empty room is deleted.
    pub room_timeout_seconds: u64,
    /// A connection with no inbound frames for this long is closed.
    pub idle_connection_timeout_seconds: u64,
    /// Per-participant outbound queue depth.
    pub send_queue_capacity: usize,
    /// Depth of the per-room command inbox.
    pub room_inbox_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_participants_per_room: 10,
            max_rooms: 100,
            room_timeout_seconds: 3600,
            idle_connection_timeout_seconds: 60,
            send_queue_capacity: 64,
            room_inbox_capacity: 256,
        }
    }
}

/// Inference pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Concurrency of the shared pipeline stage. Raise above 1 only when the
    /// configured engines document concurrency safety.
    pub permits: usize,
    /// Per-utterance deadline for the whole ASR + translation call.
    /// 0 disables the deadline.
    pub utterance_deadline_ms: u64,
    /// Utterances longer than this are truncated (oldest audio discarded)
    /// before inference.
    pub utterance_hard_cap_seconds: u64,
    /// A run of this many consecutive Opus decode failures aborts the
    /// current utterance.
    pub max_consecutive_decode_errors: u32,
    /// Opaque device selector passed through to the model engines.
    pub device: String,
    /// Opaque quantization selector passed through to the model engines.
    pub compute_type: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            permits: 1,
            utterance_deadline_ms: 15_000,
            utterance_hard_cap_seconds: 30,
            max_consecutive_decode_errors: 5,
            device: "cpu".to_string(),
            compute_type: "int8".to_string(),
        }
    }
}

/// Settings consumed only by the feature-gated model engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Path to a GGML Whisper model file (local-whisper feature).
    pub whisper_model_path: Option<String>,
    pub whisper_beam_size: usize,
    /// Fixed source language hint; None enables auto-detection.
    pub language_hint: Option<String>,
    /// Base URL of the translation sidecar (remote-translate feature).
    pub translate_endpoint: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            whisper_model_path: None,
            whisper_beam_size: 5,
            language_hint: None,
            translate_endpoint: None,
        }
    }
}

impl Settings {
    /// Loads settings from `path` when given and present, otherwise returns
    /// defaults. Environment overrides are applied in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                let settings: Settings =
                    toml::from_str(&content).map_err(|source| ConfigError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                info!(path = %path.display(), "loaded config");
                settings
            }
            Some(path) => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Settings::default()
            }
            None => Settings::default(),
        };

        settings.apply_env_overrides()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_parsed("BABBLEFISH_PORT", &mut self.server.port)?;
        if let Ok(host) = std::env::var("BABBLEFISH_HOST") {
            self.server.host = host;
        }
        override_parsed(
            "BABBLEFISH_MAX_PARTICIPANTS_PER_ROOM",
            &mut self.rooms.max_participants_per_room,
        )?;
        override_parsed("BABBLEFISH_MAX_ROOMS", &mut self.rooms.max_rooms)?;
        override_parsed(
            "BABBLEFISH_ROOM_TIMEOUT_SECONDS",
            &mut self.rooms.room_timeout_seconds,
        )?;
        override_parsed(
            "BABBLEFISH_IDLE_CONNECTION_TIMEOUT_SECONDS",
            &mut self.rooms.idle_connection_timeout_seconds,
        )?;
        override_parsed("BABBLEFISH_PIPELINE_PERMITS", &mut self.pipeline.permits)?;
        override_parsed(
            "BABBLEFISH_UTTERANCE_DEADLINE_MS",
            &mut self.pipeline.utterance_deadline_ms,
        )?;
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(var) {
        *slot = value.parse().map_err(|_| ConfigError::EnvOverride {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let settings = Settings::default();
        assert_eq!(settings.rooms.max_participants_per_room, 10);
        assert_eq!(settings.rooms.max_rooms, 100);
        assert_eq!(settings.rooms.room_timeout_seconds, 3600);
        assert_eq!(settings.pipeline.permits, 1);
        assert_eq!(settings.pipeline.utterance_hard_cap_seconds, 30);
        assert_eq!(settings.pipeline.max_consecutive_decode_errors, 5);
    }

    #[test]
    fn parses_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            [server]
            port = 9001

            [rooms]
            max_participants_per_room = 2
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.rooms.max_participants_per_room, 2);
        // Unspecified sections keep their defaults.
        assert_eq!(settings.rooms.max_rooms, 100);
        assert_eq!(settings.pipeline.permits, 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/babblefish.toml"))).unwrap();
        assert_eq!(settings.server.port, 8000);
    }
}
