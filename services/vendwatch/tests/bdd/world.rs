//! BDD test world for vendwatch

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cucumber::World;
use tokio::sync::Mutex;

use vendwatch::config::MessageTemplates;
use vendwatch::cycle::{PollCycle, TickReport};
use vendwatch::dispatcher::{Dispatcher, RetryPolicy};
use vendwatch::error::{DeliveryError, TickError};
use vendwatch::events::Renderer;
use vendwatch::recipients::MemoryRecipientStore;
use vendwatch::snapshot::{Snapshot, SnapshotSource};
use vendwatch::state_store::MemoryStateStore;
use vendwatch::transport::Transport;
use vendwatch::VendwatchError;

/// Dashboard double serving whatever snapshot the scenario set up
#[derive(Debug, Default)]
pub struct ScriptedSource {
    pub snapshot: Mutex<Snapshot>,
    pub login_rejected: Mutex<bool>,
}

#[async_trait::async_trait]
impl SnapshotSource for ScriptedSource {
    async fn ensure_session(&self) -> vendwatch::Result<()> {
        if *self.login_rejected.lock().await {
            return Err(VendwatchError::Session(
                "login page returned after submitting credentials".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_snapshot(&self) -> vendwatch::Result<Snapshot> {
        Ok(self.snapshot.lock().await.clone())
    }
}

/// Chat transport double with per-recipient failure scripts
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub delivered: Mutex<Vec<(String, String)>>,
    pub attempts: Mutex<HashMap<String, u32>>,
    pub blocked: Mutex<HashSet<String>>,
    pub transient_failures: Mutex<HashMap<String, u32>>,
}

impl ScriptedTransport {
    pub async fn texts_for(&self, recipient: &str) -> Vec<String> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == recipient)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        *self
            .attempts
            .lock()
            .await
            .entry(recipient.to_string())
            .or_default() += 1;

        if self.blocked.lock().await.contains(recipient) {
            return Err(DeliveryError::Permanent(
                "Forbidden: bot was blocked by the user".to_string(),
            ));
        }
        if let Some(remaining) = self.transient_failures.lock().await.get_mut(recipient) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeliveryError::Transient("502 Bad Gateway".to_string()));
            }
        }

        self.delivered
            .lock()
            .await
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default, World)]
pub struct VendwatchWorld {
    pub source: Arc<ScriptedSource>,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemoryStateStore>,
    pub recipients: Arc<MemoryRecipientStore>,
    pub cycle: Option<PollCycle>,
    pub outcome: Option<Result<TickReport, TickError>>,
    pub reply: Option<String>,
}

impl fmt::Debug for VendwatchWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendwatchWorld")
            .field("source", &self.source)
            .field("transport", &self.transport)
            .field("store", &self.store)
            .field("recipients", &self.recipients)
            .field("outcome", &self.outcome)
            .field("reply", &self.reply)
            .finish_non_exhaustive()
    }
}

impl VendwatchWorld {
    /// The poll cycle, started on first use from the durable state
    pub async fn cycle(&mut self) -> &mut PollCycle {
        if self.cycle.is_none() {
            let dispatcher = Dispatcher::new(
                self.transport.clone(),
                self.recipients.clone(),
                RetryPolicy {
                    max_attempts: 3,
                    backoff: Duration::from_millis(1),
                },
            );
            let renderer = Renderer::new(
                MessageTemplates {
                    new_sale: "sale #{id}".to_string(),
                    terminal_problem: "problem on {terminal}: {count}".to_string(),
                    terminal_resolved: "{terminal} resolved".to_string(),
                },
                "https://dash.example/terminals".to_string(),
            )
            .expect("placeholder pattern compiles");
            let cycle = PollCycle::new(
                self.source.clone(),
                self.store.clone(),
                self.recipients.clone(),
                dispatcher,
                renderer,
                Duration::from_secs(5),
            )
            .await
            .expect("cycle should load state");
            self.cycle = Some(cycle);
        }
        self.cycle.as_mut().expect("cycle was just started")
    }
}

/// Split a comma separated step argument, treating "" as empty
pub fn list(arg: &str) -> Vec<String> {
    arg.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
