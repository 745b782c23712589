use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure for mcp-ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Event recording configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Stdio wrapper configuration
    #[serde(default)]
    pub stdio: StdioConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".mcp-ledger/ledger.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for rolling log files (optional)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Mirror logs to stderr. Stdout is never used: it carries protocol traffic.
    #[serde(default = "default_true")]
    pub enable_stderr: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
            enable_stderr: true,
        }
    }
}

/// Gateway operating mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Aggregate every provider in the registry behind namespaced tool names
    #[default]
    Hub,
    /// Forward everything to a single upstream, no namespacing
    Legacy,
}

/// HTTP gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mode: GatewayMode,

    /// Single upstream URL (legacy mode)
    #[serde(default)]
    pub upstream_url: Option<String>,

    /// Extra headers sent to the legacy upstream
    #[serde(default)]
    pub upstream_headers: BTreeMap<String, String>,

    /// Provider registry document (hub mode), re-read on every request
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Deadline for a forwarded call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for each provider during `tools/list` fan-out
    #[serde(default = "default_list_timeout_ms")]
    pub list_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    4750
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(".mcp-ledger/providers.json")
}

const fn default_request_timeout_ms() -> u64 {
    60_000
}

const fn default_list_timeout_ms() -> u64 {
    10_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: GatewayMode::default(),
            upstream_url: None,
            upstream_headers: BTreeMap::new(),
            registry_path: default_registry_path(),
            request_timeout_ms: default_request_timeout_ms(),
            list_timeout_ms: default_list_timeout_ms(),
        }
    }
}

/// Event recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordingConfig {
    /// Disable to run as a pure pass-through proxy
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Object keys whose values are replaced by the redaction marker (case-insensitive)
    #[serde(default = "default_redact_keys")]
    pub redact_keys: Vec<String>,

    /// Byte budget for each stored payload
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Agent role stamped on gateway-recorded events
    #[serde(default = "default_agent_role")]
    pub agent_role: String,

    /// Agent name stamped on gateway-recorded events
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
}

fn default_redact_keys() -> Vec<String> {
    [
        "password",
        "passwd",
        "secret",
        "client_secret",
        "token",
        "access_token",
        "refresh_token",
        "api_key",
        "apikey",
        "authorization",
        "cookie",
        "private_key",
        "credentials",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

const fn default_max_payload_bytes() -> usize {
    10 * 1024
}

fn default_agent_role() -> String {
    "main".to_string()
}

fn default_agent_name() -> String {
    "mcp-client".to_string()
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_keys: default_redact_keys(),
            max_payload_bytes: default_max_payload_bytes(),
            agent_role: default_agent_role(),
            agent_name: default_agent_name(),
        }
    }
}

/// Stdio wrapper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StdioConfig {
    /// Telemetry ingress of a running gateway, e.g. `http://127.0.0.1:4750/api/telemetry`
    #[serde(default)]
    pub telemetry_url: Option<String>,

    /// JSONL file that receives one telemetry record per line
    #[serde(default)]
    pub telemetry_file: Option<PathBuf>,

    /// Time the child gets to exit on its own after its stdin is closed
    #[serde(default = "default_stdin_close_grace_ms")]
    pub stdin_close_grace_ms: u64,

    /// Time the child gets after SIGTERM before it is killed
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

const fn default_stdin_close_grace_ms() -> u64 {
    2_000
}

const fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            telemetry_url: None,
            telemetry_file: None,
            stdin_close_grace_ms: default_stdin_close_grace_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}
