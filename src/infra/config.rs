//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Site credentials can be overridden with ATTENDANCE_URL, ATTENDANCE_USERNAME
//! and ATTENDANCE_PASSWORD so they never have to live in the file.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth address of the tracked device as it appears in the log stream
    pub target_id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { target_id: "60:06:E3:97:04:E5".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub work_start_hour: u32,
    pub work_start_end_hour: u32,
    pub work_start_end_minute: u32,
    pub work_end_hour: u32,
    pub forced_checkout_hour: u32,
    pub absence_check_interval_secs: u64,
    pub absence_threshold_mins: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            work_start_hour: 8,
            work_start_end_hour: 9,
            work_start_end_minute: 30,
            work_end_hour: 18,
            forced_checkout_hour: 21,
            absence_check_interval_secs: 15 * 60,
            absence_threshold_mins: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
    /// Forced restart period for the log source (0 to disable)
    pub restart_interval_secs: u64,
    /// Delay before re-opening the source after it terminates
    pub restart_delay_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "log".to_string(),
            args: vec![
                "stream".to_string(),
                "--predicate".to_string(),
                r#"process == "nearbyd""#.to_string(),
                "--info".to_string(),
            ],
            restart_interval_secs: 60 * 60,
            restart_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 3, delay_ms: 2000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            url: "https://example.dooray.com/work-schedule/user/register-month".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub headless: bool,
    pub args: Vec<String>,
    /// Per-step timeout for element waits and protocol requests
    pub timeout_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9515".to_string(),
            headless: true,
            args: vec!["--no-sandbox".to_string(), "--disable-setuid-sandbox".to_string()],
            timeout_ms: 8000,
        }
    }
}

/// Markup conventions of the attendance page and the login form
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormLayout {
    pub check_in_label: String,
    pub check_out_label: String,
    pub check_in_exact_label: String,
    pub check_out_exact_label: String,
    /// Class shared by both attendance buttons
    pub button_class: String,
    pub legacy_check_in_class: String,
    pub legacy_check_out_class: String,
    /// Class of the elements holding registered times
    pub time_class: String,
    /// Container classes used to anchor a time next to its label
    pub item_classes: Vec<String>,
    pub login_id_selector: String,
    pub login_password_selector: String,
    pub login_id_input: String,
    pub login_password_input: String,
    pub login_submit: String,
    pub page_settle_ms: u64,
    pub post_action_settle_ms: u64,
    pub hover_settle_ms: u64,
}

impl Default for FormLayout {
    fn default() -> Self {
        Self {
            check_in_label: "출근".to_string(),
            check_out_label: "퇴근".to_string(),
            check_in_exact_label: "출근하기".to_string(),
            check_out_exact_label: "퇴근하기".to_string(),
            button_class: "check-button".to_string(),
            legacy_check_in_class: "check-in-button".to_string(),
            legacy_check_out_class: "check-out-button".to_string(),
            time_class: "check-time".to_string(),
            item_classes: vec!["attendance-check__item".to_string(), "check-item".to_string()],
            login_id_selector: r#"input[title="아이디"]"#.to_string(),
            login_password_selector: r#"input[title="비밀번호"]"#.to_string(),
            login_id_input: r#".input-box input[type="text"]"#.to_string(),
            login_password_input: r#".input-box input[type="password"]"#.to_string(),
            login_submit: ".submit-button.blue".to_string(),
            page_settle_ms: 3000,
            post_action_settle_ms: 3000,
            hover_settle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: true, port: 3001 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub device: DeviceConfig,
    pub schedule: ScheduleConfig,
    pub presence: PresenceConfig,
    pub retry: RetryConfig,
    pub site: SiteConfig,
    pub webdriver: WebDriverConfig,
    pub form: FormLayout,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    target_id: String,
    work_start_hour: u32,
    work_start_end_hour: u32,
    work_start_end_minute: u32,
    work_end_hour: u32,
    forced_checkout_hour: u32,
    absence_check_interval_secs: u64,
    absence_threshold_mins: u64,
    presence_enabled: bool,
    presence_command: String,
    presence_args: Vec<String>,
    presence_restart_interval_secs: u64,
    presence_restart_delay_ms: u64,
    retry_attempts: u32,
    retry_delay_ms: u64,
    site_url: String,
    site_username: String,
    site_password: String,
    webdriver_endpoint: String,
    webdriver_headless: bool,
    webdriver_args: Vec<String>,
    webdriver_timeout_ms: u64,
    form: FormLayout,
    notify_enabled: bool,
    server_enabled: bool,
    server_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig {
            device,
            schedule,
            presence,
            retry,
            site,
            webdriver,
            form,
            notify,
            server,
            metrics,
        } = toml_config;

        Self {
            target_id: device.target_id,
            work_start_hour: schedule.work_start_hour,
            work_start_end_hour: schedule.work_start_end_hour,
            work_start_end_minute: schedule.work_start_end_minute,
            work_end_hour: schedule.work_end_hour,
            forced_checkout_hour: schedule.forced_checkout_hour,
            absence_check_interval_secs: schedule.absence_check_interval_secs,
            absence_threshold_mins: schedule.absence_threshold_mins,
            presence_enabled: presence.enabled,
            presence_command: presence.command,
            presence_args: presence.args,
            presence_restart_interval_secs: presence.restart_interval_secs,
            presence_restart_delay_ms: presence.restart_delay_ms,
            retry_attempts: retry.attempts,
            retry_delay_ms: retry.delay_ms,
            site_url: site.url,
            site_username: site.username,
            site_password: site.password,
            webdriver_endpoint: webdriver.endpoint,
            webdriver_headless: webdriver.headless,
            webdriver_args: webdriver.args,
            webdriver_timeout_ms: webdriver.timeout_ms,
            form,
            notify_enabled: notify.enabled,
            server_enabled: server.enabled,
            server_port: server.port,
            metrics_interval_secs: metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path: CLI value, then CONFIG_FILE, then the default
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a path.
    ///
    /// A missing file falls back to defaults; a file that exists but cannot be
    /// parsed or validated is an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Apply ATTENDANCE_* environment overrides for the site credentials
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var("ATTENDANCE_URL") {
            self.site_url = url;
        }
        if let Ok(username) = env::var("ATTENDANCE_USERNAME") {
            self.site_username = username;
        }
        if let Ok(password) = env::var("ATTENDANCE_PASSWORD") {
            self.site_password = password;
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, hour) in [
            ("work_start_hour", self.work_start_hour),
            ("work_start_end_hour", self.work_start_end_hour),
            ("work_end_hour", self.work_end_hour),
            ("forced_checkout_hour", self.forced_checkout_hour),
        ] {
            if hour > 23 {
                bail!("schedule.{name} must be within 0..=23, got {hour}");
            }
        }
        if self.work_start_end_minute > 59 {
            bail!("schedule.work_start_end_minute must be within 0..=59");
        }
        if self.work_start_hour > self.work_start_end_hour {
            bail!("schedule.work_start_hour must not be after schedule.work_start_end_hour");
        }
        if self.work_end_hour > self.forced_checkout_hour {
            bail!("schedule.work_end_hour must not be after schedule.forced_checkout_hour");
        }
        if self.absence_check_interval_secs == 0 {
            bail!("schedule.absence_check_interval_secs must be non-zero");
        }
        if self.presence_restart_delay_ms == 0 {
            bail!("presence.restart_delay_ms must be non-zero");
        }
        if self.retry_attempts == 0 {
            bail!("retry.attempts must be at least 1");
        }
        if self.target_id.trim().is_empty() {
            bail!("device.target_id must not be empty");
        }
        if self.presence_enabled && self.presence_command.trim().is_empty() {
            bail!("presence.command must not be empty when presence is enabled");
        }
        Ok(())
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn work_start_hour(&self) -> u32 {
        self.work_start_hour
    }

    pub fn work_start_end_hour(&self) -> u32 {
        self.work_start_end_hour
    }

    pub fn work_start_end_minute(&self) -> u32 {
        self.work_start_end_minute
    }

    pub fn work_end_hour(&self) -> u32 {
        self.work_end_hour
    }

    pub fn forced_checkout_hour(&self) -> u32 {
        self.forced_checkout_hour
    }

    pub fn absence_check_interval(&self) -> Duration {
        Duration::from_secs(self.absence_check_interval_secs)
    }

    pub fn absence_threshold_mins(&self) -> u64 {
        self.absence_threshold_mins
    }

    pub fn presence_enabled(&self) -> bool {
        self.presence_enabled
    }

    pub fn presence_command(&self) -> &str {
        &self.presence_command
    }

    pub fn presence_args(&self) -> &[String] {
        &self.presence_args
    }

    /// Forced source restart period, `None` when disabled
    pub fn presence_restart_interval(&self) -> Option<Duration> {
        (self.presence_restart_interval_secs > 0)
            .then(|| Duration::from_secs(self.presence_restart_interval_secs))
    }

    pub fn presence_restart_delay(&self) -> Duration {
        Duration::from_millis(self.presence_restart_delay_ms)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn site_username(&self) -> &str {
        &self.site_username
    }

    pub fn site_password(&self) -> &str {
        &self.site_password
    }

    pub fn webdriver_endpoint(&self) -> &str {
        &self.webdriver_endpoint
    }

    pub fn webdriver_headless(&self) -> bool {
        self.webdriver_headless
    }

    pub fn webdriver_args(&self) -> &[String] {
        &self.webdriver_args
    }

    pub fn webdriver_timeout(&self) -> Duration {
        Duration::from_millis(self.webdriver_timeout_ms)
    }

    pub fn form(&self) -> &FormLayout {
        &self.form
    }

    pub fn notify_enabled(&self) -> bool {
        self.notify_enabled
    }

    pub fn server_enabled(&self) -> bool {
        self.server_enabled
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set retry behaviour
    #[cfg(test)]
    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }
}
