use chrono::NaiveTime;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `LEADFLOW__` and an optional TOML file named by
/// `LEADFLOW_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub opt_out: OptOutConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// How long a claimed audience row stays reserved for one worker.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the computed delay used as +/- random jitter (0 disables).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub quiet_hours: Option<QuietHoursConfig>,
    /// Outbound messages allowed per minute across the node (0 = unlimited).
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuietHoursConfig {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Offset of the business timezone from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_whatsapp_timeout_ms")]
    pub timeout_ms: u64,
    /// Log outbound messages instead of calling the bridge.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptOutConfig {
    #[serde(default = "default_opt_out_keywords")]
    pub keywords: Vec<String>,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_database_url() -> String {
    "sqlite://leadflow.db?mode=rwc".to_string()
}
fn default_max_connections() -> u32 {
    8
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_scheduler_enabled() -> bool {
    true
}
fn default_tick_interval_ms() -> u64 {
    5000
}
fn default_batch_size() -> u32 {
    100
}
fn default_lease_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_secs() -> u64 {
    60
}
fn default_max_delay_secs() -> u64 {
    3600
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.1
}
fn default_max_per_minute() -> u64 {
    30
}
fn default_bridge_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_whatsapp_timeout_ms() -> u64 {
    15_000
}
fn default_opt_out_keywords() -> Vec<String> {
    ["stop", "unsubscribe", "cancel", "optout", "opt-out", "quit", "end"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            quiet_hours: None,
            max_per_minute: default_max_per_minute(),
        }
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            api_token: None,
            timeout_ms: default_whatsapp_timeout_ms(),
            dry_run: false,
        }
    }
}

impl Default for OptOutConfig {
    fn default() -> Self {
        Self {
            keywords: default_opt_out_keywords(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            delivery: DeliveryConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            opt_out: OptOutConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("LEADFLOW_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("LEADFLOW")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("opt_out.keywords"),
            )
            .build()?;
        config.try_deserialize()
    }
}
