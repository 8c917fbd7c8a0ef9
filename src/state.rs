//! # Application State Management
//!
//! Shared state accessed by many HTTP handlers and WebSocket actors at once.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets many handlers share ownership of the same data
//! - **Thread safety**: Safe to share between actix worker threads
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Why needed**: Requests read config constantly, updates are rare
//!
//! ### Poisoning
//! A lock is poisoned if a thread panicked while holding it. The data inside is
//! still consistent for everything stored here (counters, a config copy, a message
//! list), so the guards recover it instead of propagating the panic.

use crate::analysis::{GeminiClient, RiskAnalysis, TransactionInput};
use crate::config::AppConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Oldest chat messages are dropped beyond this many.
pub const MAX_HISTORY: usize = 500;

/// The application state shared across all handlers.
///
/// ## Thread Safety Pattern:
/// Every mutable field is an `Arc<RwLock<T>>`; cloning `AppState` clones the `Arc`s,
/// so every clone sees the same data.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and live-session metrics
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Analysis conversation shown in the chat panel
    pub history: Arc<RwLock<Vec<ChatMessage>>>,

    /// Hosted model REST client (internally reference counted)
    pub gemini: GeminiClient,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all requests and live sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed requests since server start
    pub error_count: u64,

    /// Live voice sessions currently active
    pub active_sessions: u32,

    /// Live voice sessions that reached `Active`
    pub sessions_started: u64,

    /// Live voice session starts that failed
    pub sessions_failed: u64,

    /// Per-route statistics, keyed by "METHOD /pattern"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for one route.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry of the analysis conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<RiskAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<TransactionInput>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// User message announcing a scan.
    pub fn scan_request(input: Option<TransactionInput>) -> Self {
        let content = match &input {
            Some(scan) => format!("Analyzing {} for {}...", scan.transaction_type, scan.asset),
            None => "Analyzing scanner input...".to_string(),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: ChatRole::User,
            content,
            analysis: None,
            raw_input: input,
            timestamp: Utc::now(),
        }
    }

    /// Assistant reply carrying the verdict.
    pub fn verdict(analysis: RiskAnalysis) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: ChatRole::Assistant,
            content: analysis.summary.clone(),
            analysis: Some(analysis),
            raw_input: None,
            timestamp: Utc::now(),
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            history: Arc::new(RwLock::new(Vec::new())),
            gemini: GeminiClient::new(),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *write(&self.config) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        write(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write(&self.metrics).error_count += 1;
    }

    /// Record one request against its route.
    ///
    /// ## Parameters:
    /// - **endpoint**: Route key (e.g., "GET /api/v1/health")
    /// - **duration_ms**: How long the request took
    /// - **is_error**: Whether the response was a 4xx/5xx
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A live session reached `Active`.
    pub fn record_session_started(&self) {
        let mut metrics = write(&self.metrics);
        metrics.active_sessions += 1;
        metrics.sessions_started += 1;
    }

    /// A live session that was `Active` returned to `Idle`.
    pub fn record_session_ended(&self) {
        let mut metrics = write(&self.metrics);
        // underflow guard
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_session_failed(&self) {
        write(&self.metrics).sessions_failed += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Append messages, trimming the oldest beyond `MAX_HISTORY`.
    pub fn append_messages(&self, messages: impl IntoIterator<Item = ChatMessage>) {
        let mut history = write(&self.history);
        history.extend(messages);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        read(&self.history).clone()
    }

    /// Empty the conversation, returning how many messages were removed.
    pub fn clear_messages(&self) -> usize {
        let mut history = write(&self.history);
        let removed = history.len();
        history.clear();
        removed
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_session_started();
        state.record_session_started();
        state.record_session_ended();
        state.record_session_ended();
        state.record_session_ended();
        state.record_session_failed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.sessions_started, 2);
        assert_eq!(metrics.sessions_failed, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_history_append_and_clear() {
        let state = AppState::new(AppConfig::default());
        let scan = TransactionInput {
            transaction_type: "ERC20_APPROVAL".to_string(),
            asset: "USDC".to_string(),
            ethos_score: 320,
            risk_score: 78,
            flags: vec!["unlimited_approval".to_string()],
        };
        state.append_messages([
            ChatMessage::scan_request(Some(scan)),
            ChatMessage::verdict(RiskAnalysis::protocol_error_fallback()),
        ]);

        let messages = state.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Analyzing ERC20_APPROVAL for USDC...");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "Protocol Error: Unable to parse telemetry.");

        assert_eq!(state.clear_messages(), 2);
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let state = AppState::new(AppConfig::default());
        state.append_messages((0..MAX_HISTORY + 5).map(|_| ChatMessage::scan_request(None)));
        assert_eq!(state.messages().len(), MAX_HISTORY);
    }
}
