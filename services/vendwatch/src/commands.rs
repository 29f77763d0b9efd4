//! Subscription commands: the task that lets chats subscribe and unsubscribe

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::recipients::{Recipient, RecipientStore};
use crate::telegram::{TelegramBot, Update};
use crate::transport::Transport;

const FAILURE_TEXT: &str = "⚠️ Не удалось выполнить команду, попробуйте ещё раз";
const HELP_TEXT: &str = "Команды:\n/start — подписаться на уведомления\n/stop — отписаться\n/status — число подписчиков";

/// A parsed chat command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Subscribe,
    Unsubscribe,
    Status,
    Help,
}

impl Command {
    /// Parse the first word of a message, ignoring a `@botname` suffix
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        if !word.starts_with('/') {
            return None;
        }
        let name = word.split('@').next().unwrap_or(word);
        Some(match name {
            "/start" | "/subscribe" => Command::Subscribe,
            "/stop" | "/unsubscribe" => Command::Unsubscribe,
            "/status" => Command::Status,
            _ => Command::Help,
        })
    }
}

/// Apply a command to the recipient store and return the reply text
pub async fn handle_command(
    store: &dyn RecipientStore,
    recipient: Recipient,
    command: Command,
) -> crate::Result<String> {
    let reply = match command {
        Command::Subscribe => {
            let id = recipient.id.clone();
            if store.add(recipient).await? {
                tracing::info!("Recipient {} subscribed", id);
                "✅ Вы подписаны на уведомления".to_string()
            } else {
                "Вы уже подписаны".to_string()
            }
        }
        Command::Unsubscribe => {
            if store.remove(&recipient.id).await? {
                tracing::info!("Recipient {} unsubscribed", recipient.id);
                "Вы отписались от уведомлений".to_string()
            } else {
                "Вы не были подписаны".to_string()
            }
        }
        Command::Status => format!("Подписчиков: {}", store.count().await?),
        Command::Help => HELP_TEXT.to_string(),
    };
    Ok(reply)
}

/// Long-polls the bot for commands until cancelled
pub struct CommandLoop {
    bot: Arc<TelegramBot>,
    store: Arc<dyn RecipientStore>,
    long_poll_seconds: u64,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl CommandLoop {
    pub fn new(
        bot: Arc<TelegramBot>,
        store: Arc<dyn RecipientStore>,
        long_poll_seconds: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bot,
            store,
            long_poll_seconds,
            retry_delay: Duration::from_secs(5),
            cancel,
        }
    }

    pub async fn run(self) {
        let mut offset = 0;
        tracing::info!("Command handler started");

        loop {
            let updates = tokio::select! {
                result = self.bot.get_updates(offset, self.long_poll_seconds) => result,
                _ = self.cancel.cancelled() => break,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Fetching bot updates failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        tracing::debug!("Command handler stopped");
    }

    async fn handle_update(&self, update: Update) {
        if update.chat_id.is_empty() {
            return;
        }
        let Some(command) = Command::parse(&update.text) else {
            return;
        };

        let mut recipient = Recipient::new(update.chat_id.clone());
        recipient.display_name = update.display_name;

        let reply = match handle_command(self.store.as_ref(), recipient, command).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    "Command {:?} from {} failed: {}",
                    command,
                    update.chat_id,
                    e
                );
                FAILURE_TEXT.to_string()
            }
        };

        if let Err(e) = self.bot.deliver(&update.chat_id, &reply).await {
            tracing::warn!("Failed to reply to {}: {}", update.chat_id, e);
        }
    }
}
