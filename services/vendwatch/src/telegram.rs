//! Telegram Bot API client: message delivery and command updates

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::TelegramConfig;
use crate::error::DeliveryError;
use crate::io::HttpClient;
use crate::transport::Transport;

/// Body fragments the Bot API uses when a chat can never be reached again
const UNREACHABLE_MARKERS: &[&str] = &[
    "chat not found",
    "user is deactivated",
    "bot was kicked",
    "bot was blocked",
];

/// An incoming text message from a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub chat_id: String,
    pub text: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<RawUpdate>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

impl RawChat {
    fn display_name(&self) -> Option<String> {
        self.title
            .clone()
            .or_else(|| self.username.as_ref().map(|u| format!("@{}", u)))
            .or_else(|| self.first_name.clone())
    }
}

/// Telegram bot client
pub struct TelegramBot {
    base_url: String,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig, http: Arc<dyn HttpClient>) -> Self {
        let base_url = format!(
            "{}/bot{}",
            config.api_url.trim_end_matches('/'),
            config.bot_token
        );
        tracing::debug!("Created TelegramBot against {}", config.api_url);
        Self { base_url, http }
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_seconds: u64) -> crate::Result<Vec<Update>> {
        let url = format!(
            "{}/getUpdates?offset={}&timeout={}&allowed_updates=%5B%22message%22%5D",
            self.base_url, offset, timeout_seconds
        );
        let response = self.http.get(&url).await?;
        let parsed: UpdatesResponse = serde_json::from_str(&response.body)?;

        if !response.is_success() || !parsed.ok {
            return Err(crate::VendwatchError::Http(format!(
                "getUpdates returned status {}: {}",
                response.status,
                parsed.description.unwrap_or_default()
            )));
        }

        Ok(parsed
            .result
            .into_iter()
            .map(|raw| match raw.message {
                Some(message) => Update {
                    update_id: raw.update_id,
                    chat_id: message.chat.id.to_string(),
                    display_name: message.chat.display_name(),
                    text: message.text.unwrap_or_default(),
                },
                None => Update {
                    update_id: raw.update_id,
                    chat_id: String::new(),
                    text: String::new(),
                    display_name: None,
                },
            })
            .collect())
    }
}

/// Map a sendMessage response to a delivery outcome
pub fn classify_response(status: u16, body: &str) -> Result<(), DeliveryError> {
    let lower = body.to_lowercase();
    match status {
        200..=299 => Ok(()),
        403 => Err(DeliveryError::Permanent(format!("status 403: {}", body))),
        400 if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) => {
            Err(DeliveryError::Permanent(format!("status 400: {}", body)))
        }
        _ => Err(DeliveryError::Transient(format!(
            "status {}: {}",
            status, body
        ))),
    }
}

#[async_trait]
impl Transport for TelegramBot {
    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/sendMessage", self.base_url);
        let params = [
            ("chat_id", recipient),
            ("text", text),
            ("disable_web_page_preview", "true"),
        ];

        tracing::debug!("Sending Telegram message to {}", recipient);

        let response = self
            .http
            .post_form(&url, &params)
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        classify_response(response.status, &response.body)?;
        tracing::debug!("Telegram message to {} sent", recipient);
        Ok(())
    }
}
