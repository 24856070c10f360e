//! Connector configuration loaded from a TOML file.
//!
//! The installer drops a `connector.toml` next to the executable; every
//! section has defaults so a partial file works. Secrets (carrier API key,
//! SMTP password) can be supplied via environment variables instead of the
//! file: `GARP_DHL_API_KEY` and `GARP_SMTP_PASSWORD` take precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level connector configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dhl: DhlConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub printers: PrinterConfig,
    /// SMTP section is optional — absent means no email is ever sent.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Directory layout the installer provisions.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Input directory GARP exports into.
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    /// Claim directory — files being worked on live here.
    #[serde(default = "default_processing_dir")]
    pub processing_dir: PathBuf,
    #[serde(default = "default_done_dir")]
    pub done_dir: PathBuf,
    #[serde(default = "default_error_dir")]
    pub error_dir: PathBuf,
    /// Label artifacts are stored here as `<order_no>.pdf`.
    #[serde(default = "default_label_cache_dir")]
    pub label_cache_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            processing_dir: default_processing_dir(),
            done_dir: default_done_dir(),
            error_dir: default_error_dir(),
            label_cache_dir: default_label_cache_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl PathsConfig {
    /// Create every configured directory that does not exist yet.
    pub fn ensure_all(&self) -> std::io::Result<()> {
        for dir in [
            &self.watch_dir,
            &self.processing_dir,
            &self.done_dir,
            &self.error_dir,
            &self.label_cache_dir,
            &self.log_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("Outgoing")
}
fn default_processing_dir() -> PathBuf {
    PathBuf::from("Processing")
}
fn default_done_dir() -> PathBuf {
    PathBuf::from("Done")
}
fn default_error_dir() -> PathBuf {
    PathBuf::from("Error")
}
fn default_label_cache_dir() -> PathBuf {
    PathBuf::from("Labels")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Directory watcher settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Seconds between directory scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// A file must be unchanged (size and mtime) for this long before it
    /// is emitted — GARP writes exports incrementally.
    #[serde(default = "default_quiet_period")]
    pub quiet_period_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            quiet_period_secs: default_quiet_period(),
        }
    }
}

impl WatcherConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }
}

fn default_scan_interval() -> u64 {
    2
}
fn default_quiet_period() -> u64 {
    2
}

/// Worker pool and retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bound of the watcher → worker queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Maximum submission attempts per shipment (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_depth() -> usize {
    32
}
fn default_max_attempts() -> u32 {
    4
}
fn default_backoff_base_secs() -> u64 {
    5
}

/// DHL Freight API Farm access.
#[derive(Debug, Clone, Deserialize)]
pub struct DhlConfig {
    /// `https://api.freight-logistics.dhl.com` in production,
    /// `https://test-api.freight-logistics.dhl.com` in sandbox.
    #[serde(default = "default_dhl_base_url")]
    pub base_url: String,
    /// GUID key sent as the `client-key` header.
    /// `GARP_DHL_API_KEY` overrides the file value.
    #[serde(default = "default_secret")]
    pub api_key: SecretString,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for DhlConfig {
    fn default() -> Self {
        Self {
            base_url: default_dhl_base_url(),
            api_key: default_secret(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl DhlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_dhl_base_url() -> String {
    "https://test-api.freight-logistics.dhl.com".to_string()
}
fn default_secret() -> SecretString {
    SecretString::from("")
}
fn default_api_timeout() -> u64 {
    30
}

/// Consignor identity used in every carrier payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address1: String,
    #[serde(default)]
    pub zipcode: String,
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    /// DHL customer number, used as the Consignor party id.
    #[serde(default)]
    pub customer_number_dhl: String,
}

fn default_country() -> String {
    "SE".to_string()
}

/// Printer queues. Empty names disable the respective printer.
#[derive(Debug, Clone, Deserialize)]
pub struct PrinterConfig {
    /// Label printer (Zebra queue) for shipping labels.
    #[serde(default)]
    pub label_printer_name: String,
    /// A4 printer for shipment lists.
    #[serde(default)]
    pub document_printer_name: String,
    /// Print command template; `{printer}` and `{file}` are substituted.
    #[serde(default = "default_print_command")]
    pub print_command: String,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            label_printer_name: String::new(),
            document_printer_name: String::new(),
            print_command: default_print_command(),
        }
    }
}

fn default_print_command() -> String {
    // SumatraPDF prints PDFs silently on Windows; `lp -d` works elsewhere.
    "SumatraPDF.exe -print-to {printer} -silent {file}".to_string()
}

/// SMTP settings for customer and operator notification email.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    /// `GARP_SMTP_PASSWORD` overrides the file value.
    #[serde(default = "default_secret")]
    pub password: SecretString,
    pub from_address: String,
    #[serde(default)]
    pub from_name: String,
    /// Operator address for failure notifications. Empty disables them.
    #[serde(default)]
    pub operator_address: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write a daily-rolling log file into `paths.log_dir`.
    #[serde(default = "default_true")]
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_true(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl ConnectorConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingRequired {
                key: path.display().to_string(),
                hint: "Create the configuration file or pass its path as the first argument"
                    .to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: ConnectorConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence for secrets so the file on
    /// disk never has to contain them.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("GARP_DHL_API_KEY") {
            if !key.is_empty() {
                self.dhl.api_key = SecretString::from(key);
            }
        }
        if let Ok(password) = std::env::var("GARP_SMTP_PASSWORD") {
            if !password.is_empty() {
                if let Some(smtp) = self.smtp.as_mut() {
                    smtp.password = SecretString::from(password);
                }
            }
        }
    }

    /// Validate the configuration. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.queue_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.queue_depth".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !self.dhl.base_url.starts_with("http") {
            return Err(ConfigError::InvalidValue {
                key: "dhl.base_url".to_string(),
                message: format!("'{}' is not an http(s) URL", self.dhl.base_url),
            });
        }
        if self.dhl.api_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "dhl.api_key".to_string(),
                hint: "Set it in the config file or export GARP_DHL_API_KEY".to_string(),
            });
        }
        if self.sender.customer_number_dhl.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "sender.customer_number_dhl".to_string(),
                hint: "The DHL customer number is required for the Consignor party".to_string(),
            });
        }
        if !self.printers.label_printer_name.is_empty()
            && !self.printers.print_command.contains("{file}")
        {
            return Err(ConfigError::InvalidValue {
                key: "printers.print_command".to_string(),
                message: "must contain a {file} placeholder".to_string(),
            });
        }
        if let Some(smtp) = &self.smtp {
            if smtp.host.is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: "smtp.host".to_string(),
                    hint: "Remove the [smtp] section to disable email".to_string(),
                });
            }
            if smtp.from_address.is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: "smtp.from_address".to_string(),
                    hint: "Notification email needs a From address".to_string(),
                });
            }
        }
        Ok(())
    }
}
