//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, GEMINI_API_KEY, API_KEY)
//! 2. Environment variables (APP_SERVER__HOST, APP_GEMINI__LIVE_MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::capture::DEFAULT_FRAME_SIZE;
use crate::audio::pcm::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - **server**: Where the HTTP server listens
/// - **gemini**: Hosted model endpoints, model names and voices
/// - **audio**: Capture/playback sample rates and capture frame size
/// - **live**: Timeouts and intervals for live voice sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub audio: AudioConfig,
    pub live: LiveConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Hosted model configuration.
///
/// ## Fields:
/// - `api_key`: Credential for the hosted model (never echoed by the config API)
/// - `api_base`: REST base URL used for analysis and speech synthesis
/// - `live_url`: WebSocket URL of the bidirectional live endpoint
/// - `analysis_model` / `tts_model` / `live_model`: Model identifiers per use
/// - `tts_voice` / `live_voice`: Prebuilt voice names
/// - `request_timeout_secs`: Timeout for REST calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub live_url: String,
    pub analysis_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub live_model: String,
    pub live_voice: String,
    pub request_timeout_secs: u64,
}

/// Audio format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub capture_frame_size: usize,
}

/// Live session timing.
///
/// ## Fields:
/// - `permission_timeout_secs`: How long to wait for the browser to answer a microphone request
/// - `connect_timeout_secs`: Budget for opening the live connection and receiving setup acknowledgement
/// - `heartbeat_interval_secs` / `client_timeout_secs`: WebSocket keep-alive
/// - `playback_reap_interval_ms`: How often finished playback sources are pruned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub permission_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub playback_reap_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            gemini: GeminiConfig {
                api_key: String::new(),
                api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                analysis_model: "gemini-3-pro-preview".to_string(),
                tts_model: "gemini-2.5-flash-preview-tts".to_string(),
                tts_voice: "Kore".to_string(),
                live_model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                live_voice: "Zephyr".to_string(),
                request_timeout_secs: 60,
            },
            audio: AudioConfig {
                capture_sample_rate: CAPTURE_SAMPLE_RATE,
                playback_sample_rate: PLAYBACK_SAMPLE_RATE,
                capture_frame_size: DEFAULT_FRAME_SIZE,
            },
            live: LiveConfig {
                permission_timeout_secs: 30,
                connect_timeout_secs: 15,
                heartbeat_interval_secs: 5,
                client_timeout_secs: 30,
                playback_reap_interval_ms: 250,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_GEMINI__LIVE_VOICE=Puck`: Override the live voice
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `GEMINI_API_KEY=...` or `API_KEY=...`: Model credential
    ///
    /// Nested keys use a double underscore because most field names contain a single one.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Handle special environment variables used by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(key) = env::var("GEMINI_API_KEY").ok().or_else(|| env::var("API_KEY").ok()) {
            settings = settings.set_override("gemini.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Sample rates and the capture frame size are positive
    /// - Every timeout and interval is positive
    ///
    /// A missing API key is not an error here: the server still starts, analysis
    /// falls back and live sessions fail with a connection error.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.capture_frame_size == 0 {
            return Err(anyhow::anyhow!("Capture frame size must be greater than 0"));
        }

        if self.gemini.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        let live = &self.live;
        if live.permission_timeout_secs == 0
            || live.connect_timeout_secs == 0
            || live.heartbeat_interval_secs == 0
            || live.client_timeout_secs == 0
            || live.playback_reap_interval_ms == 0
        {
            return Err(anyhow::anyhow!("Live session timeouts and intervals must be greater than 0"));
        }

        if live.client_timeout_secs <= live.heartbeat_interval_secs {
            return Err(anyhow::anyhow!("Client timeout must be longer than the heartbeat interval"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON change. `{"live": {"connect_timeout_secs": 20}}`
    /// touches nothing else. The API key cannot be changed at runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = narrow(port, "server.port")?;
            }
        }

        if let Some(gemini) = partial_config.get("gemini") {
            let text = |key: &str| gemini.get(key).and_then(|v| v.as_str()).map(str::to_string);
            if let Some(v) = text("api_base") { self.gemini.api_base = v; }
            if let Some(v) = text("live_url") { self.gemini.live_url = v; }
            if let Some(v) = text("analysis_model") { self.gemini.analysis_model = v; }
            if let Some(v) = text("tts_model") { self.gemini.tts_model = v; }
            if let Some(v) = text("tts_voice") { self.gemini.tts_voice = v; }
            if let Some(v) = text("live_model") { self.gemini.live_model = v; }
            if let Some(v) = text("live_voice") { self.gemini.live_voice = v; }
            if let Some(v) = gemini.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                self.gemini.request_timeout_secs = v;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(v) = audio.get("capture_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.capture_sample_rate = narrow(v, "audio.capture_sample_rate")?;
            }
            if let Some(v) = audio.get("playback_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.playback_sample_rate = narrow(v, "audio.playback_sample_rate")?;
            }
            if let Some(v) = audio.get("capture_frame_size").and_then(|v| v.as_u64()) {
                self.audio.capture_frame_size = narrow(v, "audio.capture_frame_size")?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            let number = |key: &str| live.get(key).and_then(|v| v.as_u64());
            if let Some(v) = number("permission_timeout_secs") { self.live.permission_timeout_secs = v; }
            if let Some(v) = number("connect_timeout_secs") { self.live.connect_timeout_secs = v; }
            if let Some(v) = number("heartbeat_interval_secs") { self.live.heartbeat_interval_secs = v; }
            if let Some(v) = number("client_timeout_secs") { self.live.client_timeout_secs = v; }
            if let Some(v) = number("playback_reap_interval_ms") { self.live.playback_reap_interval_ms = v; }
        }

        self.validate()?;
        Ok(())
    }

    /// Whether a model credential is configured.
    pub fn has_api_key(&self) -> bool {
        !self.gemini.api_key.trim().is_empty()
    }

    /// Configuration as JSON with the API key replaced by a presence flag.
    pub fn redacted_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(gemini) = value.get_mut("gemini").and_then(|g| g.as_object_mut()) {
            gemini.remove("api_key");
            gemini.insert("api_key_configured".to_string(), serde_json::Value::Bool(self.has_api_key()));
        }
        value
    }
}

/// Convert a JSON number to a narrower field type, rejecting values that do not fit.
fn narrow<T: TryFrom<u64>>(value: u64, field: &str) -> Result<T> {
    T::try_from(value).map_err(|_| anyhow::anyhow!("{} is out of range: {}", field, value))
}

impl GeminiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl LiveConfig {
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permission_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn playback_reap_interval(&self) -> Duration {
        Duration::from_millis(self.playback_reap_interval_ms)
    }
}
