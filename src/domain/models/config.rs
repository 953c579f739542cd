use serde::{Deserialize, Serialize};

/// Main configuration structure for caseflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Maximum number of concurrent case workers (1-64)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Orchestrator cycle period in seconds
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-step retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Priority scheduling configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Remote host configuration
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Reconciliation timeouts
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// External conversion tool configuration
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Accelerator resources
    #[serde(default)]
    pub resources: ResourcesConfig,
}

const fn default_max_workers() -> usize {
    4
}

const fn default_scan_interval_seconds() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            scan_interval_seconds: default_scan_interval_seconds(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            remote: RemoteConfig::default(),
            reconcile: ReconcileConfig::default(),
            tools: ToolsConfig::default(),
            resources: ResourcesConfig::default(),
        }
    }
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
    ".caseflow/caseflow.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
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
    pub format: String,

    /// Directory for rolling log files; stderr-only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}

/// Per-step retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Attempts allowed per pipeline step before the case fails
    #[serde(default = "default_budget_per_step")]
    pub budget_per_step: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_budget_per_step() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    10_000
}

const fn default_max_backoff_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget_per_step: default_budget_per_step(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Priority scheduling configuration.
///
/// The dispatch score is `weight(priority) + aging_factor_per_hour * wait_hours`,
/// plus `starvation_boost` once a Low/Normal case has waited past the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Score added per hour of waiting
    #[serde(default = "default_aging_factor")]
    pub aging_factor_per_hour: f64,

    /// Hours after which Low/Normal cases receive the starvation boost
    #[serde(default = "default_starvation_threshold_hours")]
    pub starvation_threshold_hours: f64,

    /// Flat score boost applied past the starvation threshold
    #[serde(default = "default_starvation_boost")]
    pub starvation_boost: f64,

    /// Base score weights per priority level
    #[serde(default)]
    pub weights: PriorityWeights,
}

const fn default_aging_factor() -> f64 {
    0.1
}

const fn default_starvation_threshold_hours() -> f64 {
    24.0
}

const fn default_starvation_boost() -> f64 {
    2.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            aging_factor_per_hour: default_aging_factor(),
            starvation_threshold_hours: default_starvation_threshold_hours(),
            starvation_boost: default_starvation_boost(),
            weights: PriorityWeights::default(),
        }
    }
}

/// Base score weight per priority level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PriorityWeights {
    #[serde(default = "default_weight_low")]
    pub low: f64,
    #[serde(default = "default_weight_normal")]
    pub normal: f64,
    #[serde(default = "default_weight_high")]
    pub high: f64,
    #[serde(default = "default_weight_urgent")]
    pub urgent: f64,
    #[serde(default = "default_weight_critical")]
    pub critical: f64,
}

const fn default_weight_low() -> f64 {
    1.0
}
const fn default_weight_normal() -> f64 {
    2.0
}
const fn default_weight_high() -> f64 {
    4.0
}
const fn default_weight_urgent() -> f64 {
    8.0
}
const fn default_weight_critical() -> f64 {
    16.0
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            low: default_weight_low(),
            normal: default_weight_normal(),
            high: default_weight_high(),
            urgent: default_weight_urgent(),
            critical: default_weight_critical(),
        }
    }
}

/// Remote host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteConfig {
    /// Remote hostname
    #[serde(default = "default_remote_host")]
    pub host: String,

    /// SSH port
    #[serde(default = "default_remote_port")]
    pub port: u16,

    /// Remote user name
    #[serde(default = "default_remote_user")]
    pub user: String,

    /// Path to the private key used for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,

    /// Remote base directory for case work dirs
    #[serde(default = "default_remote_base_dir")]
    pub base_dir: String,

    /// Completion-marker poll period in seconds
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Give up polling after this many seconds and mark the case stuck
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

const fn default_remote_port() -> u16 {
    22
}

fn default_remote_user() -> String {
    "caseflow".to_string()
}

fn default_remote_base_dir() -> String {
    "/scratch/caseflow".to_string()
}

const fn default_poll_interval_seconds() -> u64 {
    30
}

const fn default_poll_timeout_seconds() -> u64 {
    7200
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            user: default_remote_user(),
            identity_file: None,
            base_dir: default_remote_base_dir(),
            poll_interval_seconds: default_poll_interval_seconds(),
            poll_timeout_seconds: default_poll_timeout_seconds(),
        }
    }
}

/// Reconciliation timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReconcileConfig {
    /// Seconds without progress before an active case is marked stuck
    #[serde(default = "default_stuck_case_timeout_seconds")]
    pub stuck_case_timeout_seconds: u64,

    /// Seconds a lock may be held by a non-active case before reclamation
    #[serde(default = "default_zombie_lock_timeout_seconds")]
    pub zombie_lock_timeout_seconds: u64,
}

const fn default_stuck_case_timeout_seconds() -> u64 {
    3600
}

const fn default_zombie_lock_timeout_seconds() -> u64 {
    7200
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stuck_case_timeout_seconds: default_stuck_case_timeout_seconds(),
            zombie_lock_timeout_seconds: default_zombie_lock_timeout_seconds(),
        }
    }
}

/// One external conversion tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Executable to run
    pub command: String,

    /// Arguments; `{case_dir}` expands to the case source path
    #[serde(default)]
    pub args: Vec<String>,
}

/// External conversion tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Preprocessing tool (input interpreter)
    #[serde(default = "default_preprocessor")]
    pub preprocessor: ToolConfig,

    /// Postprocessing tool (result converter)
    #[serde(default = "default_converter")]
    pub converter: ToolConfig,

    /// Remote simulation command, run in the case work dir
    #[serde(default = "default_simulation_command")]
    pub simulation_command: String,

    /// Remote glob patterns of result files to download
    #[serde(default = "default_result_patterns")]
    pub result_patterns: Vec<String>,
}

fn default_result_patterns() -> Vec<String> {
    vec!["*.raw".to_string()]
}

fn default_preprocessor() -> ToolConfig {
    ToolConfig {
        command: "case-interpreter".to_string(),
        args: vec!["--input".to_string(), "{case_dir}".to_string()],
    }
}

fn default_converter() -> ToolConfig {
    ToolConfig {
        command: "raw-converter".to_string(),
        args: vec!["--case".to_string(), "{case_dir}".to_string()],
    }
}

fn default_simulation_command() -> String {
    "simulate run.in".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            preprocessor: default_preprocessor(),
            converter: default_converter(),
            simulation_command: default_simulation_command(),
            result_patterns: default_result_patterns(),
        }
    }
}

/// Accelerator resource configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourcesConfig {
    /// Accelerator slot identifiers reported by the probe collaborator
    #[serde(default)]
    pub slots: Vec<String>,
}
