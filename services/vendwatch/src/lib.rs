//! Vendwatch - vending dashboard monitoring and notification service
//!
//! Polls the operator dashboard for sales and terminal alerts, works out
//! what is new since the last committed poll, and notifies subscribed chats.

pub mod commands;
pub mod config;
pub mod cycle;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod io;
pub mod recipients;
pub mod sales;
pub mod snapshot;
pub mod state_store;
pub mod telegram;
pub mod terminals;
pub mod transport;

pub use config::{load_config, Config};
pub use error::{Result, VendwatchError};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::CommandLoop;
use crate::config::PollingConfig;
use crate::cycle::{OperatorAlerts, PollCycle};
use crate::dashboard::DashboardSource;
use crate::dispatcher::{Dispatcher, RetryPolicy};
use crate::events::Renderer;
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::recipients::{JsonFileRecipientStore, RecipientStore};
use crate::snapshot::SnapshotSource;
use crate::state_store::{JsonFileStateStore, StateStore};
use crate::telegram::TelegramBot;
use crate::transport::Transport;

/// Assembles the service from config, with optional injected collaborators
pub struct VendwatchBuilder {
    config: Config,
    once: bool,
    http: Option<Arc<dyn HttpClient>>,
    source: Option<Arc<dyn SnapshotSource>>,
    transport: Option<Arc<dyn Transport>>,
    state_store: Option<Arc<dyn StateStore>>,
    recipients: Option<Arc<dyn RecipientStore>>,
    cancel: Option<CancellationToken>,
}

impl VendwatchBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            once: false,
            http: None,
            source: None,
            transport: None,
            state_store: None,
            recipients: None,
            cancel: None,
        }
    }

    /// Run a single tick and exit instead of polling forever
    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_recipients(mut self, recipients: Arc<dyn RecipientStore>) -> Self {
        self.recipients = Some(recipients);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn build(self) -> Result<Vendwatch> {
        let config = self.config;

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => {
                let timeout = config
                    .dashboard
                    .fetch_timeout()
                    .max(Duration::from_secs(config.telegram.long_poll_seconds + 10));
                Arc::new(ReqwestHttpClient::new(timeout)?)
            }
        };
        let bot = Arc::new(TelegramBot::new(&config.telegram, Arc::clone(&http)));

        let source: Arc<dyn SnapshotSource> = match self.source {
            Some(source) => source,
            None => Arc::new(DashboardSource::new(&config.dashboard, Arc::clone(&http))?),
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::clone(&bot) as Arc<dyn Transport>);
        let state_store = self.state_store.unwrap_or_else(|| {
            Arc::new(JsonFileStateStore::new(&config.storage.state_file)) as Arc<dyn StateStore>
        });
        let recipients = self.recipients.unwrap_or_else(|| {
            Arc::new(JsonFileRecipientStore::new(&config.storage.recipients_file))
                as Arc<dyn RecipientStore>
        });
        let cancel = self.cancel.unwrap_or_default();

        let dispatcher = Dispatcher::new(
            transport,
            Arc::clone(&recipients),
            RetryPolicy::from(&config.delivery),
        );
        let renderer = Renderer::new(config.messages.clone(), config.dashboard.terminals_url())?;

        let mut cycle = PollCycle::new(
            source,
            state_store,
            Arc::clone(&recipients),
            dispatcher,
            renderer,
            config.dashboard.fetch_timeout(),
        )
        .await?;
        if let Some(chat_id) = &config.telegram.operator_chat_id {
            cycle = cycle.with_operator_alerts(OperatorAlerts {
                chat_id: chat_id.clone(),
                threshold: config.polling.failure_alert_threshold,
            });
        }

        let commands = (config.telegram.commands_enabled && !self.once).then(|| {
            CommandLoop::new(
                bot,
                recipients,
                config.telegram.long_poll_seconds,
                cancel.clone(),
            )
        });

        Ok(Vendwatch {
            cycle,
            commands,
            polling: config.polling,
            once: self.once,
            cancel,
        })
    }
}

/// A fully assembled service, ready to start
pub struct Vendwatch {
    cycle: PollCycle,
    commands: Option<CommandLoop>,
    polling: PollingConfig,
    once: bool,
    cancel: CancellationToken,
}

impl Vendwatch {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled (or for one tick in single-shot mode)
    pub async fn start(self) -> Result<()> {
        let Vendwatch {
            mut cycle,
            commands,
            polling,
            once,
            cancel,
        } = self;

        if once {
            return match cycle.tick().await {
                Ok(report) => {
                    tracing::info!(
                        "Single tick complete: {} events, {} deliveries",
                        report.events.len(),
                        report.delivery.delivered_count()
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("{}", e);
                    Err(e.source)
                }
            };
        }

        let cancel_for_signal = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl-c");
            tracing::info!("Shutdown signal received");
            cancel_for_signal.cancel();
        });

        let commands_handle = commands.map(|commands| tokio::spawn(commands.run()));

        tracing::info!(
            "Vendwatch started, polling every {:?}",
            polling.interval()
        );
        cycle
            .run(polling.interval(), polling.backoff(), cancel.clone())
            .await;

        if let Some(handle) = commands_handle {
            join_command_task(handle).await;
        }
        tracing::info!("Vendwatch stopped");

        Ok(())
    }
}

/// Wait for the command handler, logging a panic or abort instead of
/// dropping it. Returns whether the task finished cleanly.
async fn join_command_task(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Command handler task failed: {}", e);
            false
        }
    }
}
