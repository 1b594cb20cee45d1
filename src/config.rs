use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// State backend configuration
    pub state: StateConfig,

    /// Event bus configuration
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Semantic index configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// RCA synthesis configuration
    #[serde(default)]
    pub rca: RcaConfig,

    /// Alert deduplication and escalation
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Workflow orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/opsgraph.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: OPSGRAPH_)
            .add_source(
                config::Environment::with_prefix("OPSGRAPH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("orchestrator.allowed_hosts")
                    .with_list_parse_key("messaging.subjects")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse the embedded defaults only (no file, no environment)
    pub fn defaults() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,

    /// Redis connection string, used for the shared dedup window
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Consume events from the bus
    #[serde(default)]
    pub enabled: bool,

    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subjects carrying event envelopes
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,

    /// Envelopes processed concurrently
    #[serde(default = "default_ingestion_concurrency")]
    pub concurrency: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nats_url: default_nats_url(),
            subjects: default_subjects(),
            concurrency: default_ingestion_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Index backend
    #[serde(default)]
    pub backend: SearchBackend,

    /// Embedding dimensions for the in-process index
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Hits scoring below this are not returned
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Base URL of the remote vector-search service
    pub remote_url: Option<String>,

    /// Remote request timeout (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::default(),
            dimensions: default_dimensions(),
            min_similarity: default_min_similarity(),
            remote_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackend {
    #[default]
    InProcess,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaConfig {
    /// Semantic hits considered per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// DEPENDS_ON traversal depth for affected services
    #[serde(default = "default_dependency_depth")]
    pub dependency_depth: usize,

    /// Confidence multiplier when hits cannot be verified against the graph
    #[serde(default = "default_unverified_penalty")]
    pub unverified_penalty: f64,

    /// Maximum issues returned by the keyword fallback
    #[serde(default = "default_top_k")]
    pub fallback_limit: usize,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            dependency_depth: default_dependency_depth(),
            unverified_penalty: default_unverified_penalty(),
            fallback_limit: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Deduplication window (seconds)
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    /// Dedup window backend
    #[serde(default)]
    pub dedup_backend: DedupBackend,

    /// Max fingerprints held by the in-process window
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: u64,

    /// Age after which an active alert escalates (seconds)
    #[serde(default = "default_escalation_delay")]
    pub escalation_delay_secs: u64,

    /// Escalation evaluation tick (seconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Webhook receiving alert notifications; log-only when unset
    pub notification_url: Option<String>,

    /// Webhook timeout (seconds)
    #[serde(default = "default_timeout")]
    pub notification_timeout_secs: u64,

    /// Max notification delivery attempts
    #[serde(default = "default_max_attempts")]
    pub notification_max_attempts: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window(),
            dedup_backend: DedupBackend::default(),
            dedup_capacity: default_dedup_capacity(),
            escalation_delay_secs: default_escalation_delay(),
            check_interval_secs: default_check_interval(),
            notification_url: None,
            notification_timeout_secs: default_timeout(),
            notification_max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DedupBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hostnames workflow steps may call
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Lowest allowed destination port
    #[serde(default = "default_port_min")]
    pub allowed_port_min: u16,

    /// Highest allowed destination port
    #[serde(default = "default_port_max")]
    pub allowed_port_max: u16,

    /// Permit plain http (https is always permitted)
    #[serde(default = "default_true")]
    pub allow_http: bool,

    /// Upper bound on a step's timeout (seconds)
    #[serde(default = "default_max_step_timeout")]
    pub max_step_timeout_secs: u64,

    /// Upper bound on a step's attempts
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,

    /// Run cron-scheduled workflows
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allowed_port_min: default_port_min(),
            allowed_port_max: default_port_max(),
            allow_http: true,
            max_step_timeout_secs: default_max_step_timeout(),
            max_step_attempts: default_max_step_attempts(),
            scheduler_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_subjects() -> Vec<String> {
    vec!["opsgraph.events.>".to_string()]
}

fn default_ingestion_concurrency() -> usize {
    16
}

fn default_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "opsgraph".to_string()
}

fn default_true() -> bool {
    true
}

fn default_dimensions() -> usize {
    384
}

fn default_min_similarity() -> f32 {
    0.1
}

fn default_top_k() -> usize {
    5
}

fn default_dependency_depth() -> usize {
    2
}

fn default_unverified_penalty() -> f64 {
    0.5
}

fn default_dedup_window() -> u64 {
    300 // 5 minutes
}

fn default_dedup_capacity() -> u64 {
    100_000
}

fn default_escalation_delay() -> u64 {
    900 // 15 minutes
}

fn default_check_interval() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_port_min() -> u16 {
    8000
}

fn default_port_max() -> u16 {
    8015
}

fn default_max_step_timeout() -> u64 {
    600
}

fn default_max_step_attempts() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_http_port(), 8080);
        assert_eq!(default_dedup_window(), 300);
        assert_eq!(default_escalation_delay(), 900);
        assert_eq!(default_top_k(), 5);
        assert_eq!(default_log_level(), "info");
        assert!(default_true());
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config = Config::defaults().unwrap();
        assert_eq!(config.state.backend, StateBackend::Sled);
        assert_eq!(config.alerts.dedup_window_secs, 300);
        assert_eq!(config.rca.dependency_depth, 2);
        assert_eq!(config.orchestrator.allowed_port_min, 8000);
        assert_eq!(config.orchestrator.allowed_port_max, 8015);
        assert!(!config.orchestrator.allowed_hosts.is_empty());
        assert!(!config.messaging.enabled);
    }

    #[test]
    fn test_backend_defaults() {
        assert_eq!(StateBackend::default(), StateBackend::Sled);
        assert_eq!(DedupBackend::default(), DedupBackend::Memory);
        assert_eq!(SearchBackend::default(), SearchBackend::InProcess);
    }
}
