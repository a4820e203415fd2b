//! # Configuration Management
//!
//! Loads the service configuration from layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables prefixed with `APP` (nested keys use `__`)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_HISTORY__DEFAULT_LIMIT`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration, grouped by concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
    pub history: HistoryConfig,
    pub performance: PerformanceConfig,
}

/// HTTP listener settings.
///
/// ## Fields:
/// - `host` / `port`: bind address (the browser client talks to `localhost:8000`)
/// - `cors_origins`: allowed browser origins; an empty list allows any origin
/// - `static_dir`: directory holding the optional `index.html` served at `/`
///   and the assets mounted under `/static`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub static_dir: String,
}

/// Keep-alive settings for recording connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// How often the server pings the client
    pub heartbeat_interval_secs: u64,
    /// Silence longer than this is treated as a dropped transport
    pub client_timeout_secs: u64,
}

/// Audio assembly settings.
///
/// ## Fields:
/// - `max_session_bytes`: upper bound on one session's assembled artifact
/// - `artifact_dir`: when set, finalized recordings are written here
/// - `artifact_extension`: file extension for saved recordings (browsers
///   usually send WebM/Opus from `MediaRecorder`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub max_session_bytes: usize,
    pub artifact_dir: Option<String>,
    pub artifact_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Emit log lines for every chunk instead of only at finalize
    pub per_chunk_feedback: bool,
}

/// History store settings.
///
/// ## Fields:
/// - `default_limit`: entries returned by `GET /history` without `?limit=` ("Last 5")
/// - `max_entries`: retention cap, oldest entries are pruned (0 = unbounded)
/// - `directory`: when set, entries are persisted as JSON files and reloaded on start
/// - `newest_first`: wire order of `GET /history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub default_limit: usize,
    pub max_entries: usize,
    pub directory: Option<String>,
    pub newest_first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec!["http://localhost:3000".to_string()],
                static_dir: "static".to_string(),
            },
            websocket: WebSocketConfig {
                heartbeat_interval_secs: 15,
                client_timeout_secs: 45,
            },
            audio: AudioConfig {
                max_session_bytes: 64 * 1024 * 1024, // 64MB, roughly an hour of Opus
                artifact_dir: None,
                artifact_extension: "webm".to_string(),
            },
            pipeline: PipelineConfig {
                per_chunk_feedback: true,
            },
            history: HistoryConfig {
                default_limit: 5,
                max_entries: 100,
                directory: None,
                newest_first: true,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: override server port
    /// - `APP_HISTORY__DIRECTORY=/var/lib/voice-log/history`: persist history
    /// - `APP_AUDIO__ARTIFACT_DIR=audio`: keep finalized recordings
    /// - `HOST=0.0.0.0`, `PORT=3000`: deployment platform overrides
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values that would make the service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.audio.max_session_bytes == 0 {
            return Err(anyhow::anyhow!("Max session bytes must be greater than 0"));
        }

        if self.history.default_limit == 0 {
            return Err(anyhow::anyhow!("History default limit must be greater than 0"));
        }

        if self.websocket.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.websocket.client_timeout_secs <= self.websocket.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.websocket.client_timeout_secs,
                self.websocket.heartbeat_interval_secs
            ));
        }

        Ok(())
    }
}
