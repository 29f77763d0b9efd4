//! Configuration types for the vendwatch service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BOT_TOKEN_ENV: &str = "VENDWATCH_BOT_TOKEN";
const LOGIN_ENV: &str = "VENDWATCH_LOGIN";
const PASSWORD_ENV: &str = "VENDWATCH_PASSWORD";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub messages: MessageTemplates,
}

/// Operator dashboard the snapshots are read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login: String::new(),
            password: String::new(),
            fetch_timeout_seconds: default_fetch_timeout(),
        }
    }
}

impl DashboardConfig {
    /// Link included in terminal notifications
    pub fn terminals_url(&self) -> String {
        format!("{}/terminals", self.base_url.trim_end_matches('/'))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// Telegram bot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
    /// Chat that receives operational alerts about repeated cycle failures
    #[serde(default)]
    pub operator_chat_id: Option<String>,
    #[serde(default = "default_true")]
    pub commands_enabled: bool,
    #[serde(default = "default_long_poll")]
    pub long_poll_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: default_telegram_api(),
            operator_chat_id: None,
            commands_enabled: true,
            long_poll_seconds: default_long_poll(),
        }
    }
}

/// Poll cadence and failure handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_backoff")]
    pub backoff_seconds: u64,
    #[serde(default = "default_alert_threshold")]
    pub failure_alert_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            backoff_seconds: default_backoff(),
            failure_alert_threshold: default_alert_threshold(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }
}

/// Per-recipient retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// Where durable state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_recipients_file")]
    pub recipients_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            recipients_file: default_recipients_file(),
        }
    }
}

/// Notification templates, one per event kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplates {
    #[serde(default = "default_new_sale_template")]
    pub new_sale: String,
    #[serde(default = "default_problem_template")]
    pub terminal_problem: String,
    #[serde(default = "default_resolved_template")]
    pub terminal_resolved: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            new_sale: default_new_sale_template(),
            terminal_problem: default_problem_template(),
            terminal_resolved: default_resolved_template(),
        }
    }
}

fn default_base_url() -> String {
    "https://my.alivewater.cloud".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_true() -> bool {
    true
}

fn default_long_poll() -> u64 {
    25
}

fn default_interval() -> u64 {
    60
}

fn default_backoff() -> u64 {
    60
}

fn default_alert_threshold() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_state_file() -> PathBuf {
    PathBuf::from("vendwatch-state.json")
}

fn default_recipients_file() -> PathBuf {
    PathBuf::from("vendwatch-recipients.json")
}

fn default_new_sale_template() -> String {
    "💰 Новая продажа #{id}\n🏠 Адрес: {address}\n⏰ Время: {time}\n⚖️ Объем: {volume}\n💵 Сумма: {amount}\n💳 Способ оплаты: {payment}".to_string()
}

fn default_problem_template() -> String {
    "⚠️ Проблема с терминалом: {terminal}\n🔴 Количество ошибок: {count}\n🔗 Ссылка: {link}"
        .to_string()
}

fn default_resolved_template() -> String {
    "✅ Терминал снова в работе: {terminal}\n🔗 Ссылка: {link}".to_string()
}

impl Config {
    /// Fill empty secrets from the environment and reject a config that
    /// cannot authenticate or deliver.
    pub fn resolve_secrets(&mut self) -> crate::Result<()> {
        self.resolve_secrets_with(|key| std::env::var(key).ok())
    }

    pub fn resolve_secrets_with<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fill_from(&mut self.telegram.bot_token, BOT_TOKEN_ENV, &lookup);
        fill_from(&mut self.dashboard.login, LOGIN_ENV, &lookup);
        fill_from(&mut self.dashboard.password, PASSWORD_ENV, &lookup);

        let missing: Vec<&str> = [
            (self.telegram.bot_token.is_empty(), BOT_TOKEN_ENV),
            (self.dashboard.login.is_empty(), LOGIN_ENV),
            (self.dashboard.password.is_empty(), PASSWORD_ENV),
        ]
        .into_iter()
        .filter_map(|(empty, name)| empty.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(crate::VendwatchError::Config(format!(
                "Missing required credentials: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

fn fill_from<F>(field: &mut String, key: &str, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if field.is_empty() {
        if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
            tracing::debug!("Using {} from environment", key);
            *field = value;
        }
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::VendwatchError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
