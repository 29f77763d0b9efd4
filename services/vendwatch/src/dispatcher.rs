//! Notification dispatcher: fans rendered messages out to every recipient

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::events::RenderedMessage;
use crate::recipients::{Recipient, RecipientStore};
use crate::transport::Transport;

/// Bounded retry for transient delivery failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Per-event delivery outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDelivery {
    pub label: String,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// What happened to a tick's messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub events: Vec<EventDelivery>,
    /// Recipients removed after a permanent failure
    pub pruned: Vec<String>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.events.iter().map(|e| e.delivered.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.events.iter().map(|e| e.failed.len()).sum()
    }
}

/// Delivers messages with retry and prunes unreachable recipients
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    recipients: Arc<dyn RecipientStore>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        recipients: Arc<dyn RecipientStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            recipients,
            policy,
        }
    }

    /// Send every message, in order, to every recipient.
    ///
    /// A failure for one recipient never stops delivery to the others.
    /// Nothing is queued for a later tick.
    pub async fn dispatch(
        &self,
        messages: &[RenderedMessage],
        recipients: &[Recipient],
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut pruned: HashSet<String> = HashSet::new();

        for message in messages {
            let mut outcome = EventDelivery {
                label: message.event.label(),
                ..EventDelivery::default()
            };

            for recipient in recipients {
                if pruned.contains(&recipient.id) {
                    continue;
                }

                match self.deliver_with_retry(&recipient.id, &message.text).await {
                    Ok(()) => outcome.delivered.push(recipient.id.clone()),
                    Err(DeliveryError::Permanent(reason)) => {
                        tracing::info!(
                            "Recipient {} is unreachable ({}), unsubscribing",
                            recipient.id,
                            reason
                        );
                        if let Err(e) = self.recipients.remove(&recipient.id).await {
                            tracing::warn!("Failed to remove recipient {}: {}", recipient.id, e);
                        }
                        pruned.insert(recipient.id.clone());
                        report.pruned.push(recipient.id.clone());
                        outcome.failed.push(recipient.id.clone());
                    }
                    Err(DeliveryError::Transient(reason)) => {
                        tracing::warn!(
                            "Giving up on {} for {} after {} attempts: {}",
                            outcome.label,
                            recipient.id,
                            self.policy.max_attempts,
                            reason
                        );
                        outcome.failed.push(recipient.id.clone());
                    }
                }
            }

            tracing::info!(
                "Notified {} of {} recipients about {}",
                outcome.delivered.len(),
                recipients.len(),
                outcome.label
            );
            report.events.push(outcome);
        }

        report
    }

    /// Deliver one message, retrying transient failures up to the policy bound
    pub async fn deliver_with_retry(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
        let mut attempt = 1;
        loop {
            match self.transport.deliver(recipient, text).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) if attempt >= self.policy.max_attempts => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        "Attempt {}/{} to {} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        recipient,
                        e
                    );
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}
