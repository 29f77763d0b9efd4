//! Poll cycle: session, fetch, diff, dispatch and commit, once per tick

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DeliveryReport, Dispatcher};
use crate::error::{Stage, TickError, VendwatchError};
use crate::events::{collect_events, Event, Renderer};
use crate::recipients::RecipientStore;
use crate::sales::diff_sales;
use crate::snapshot::SnapshotSource;
use crate::state_store::{MonitorState, StateStore};
use crate::terminals::diff_terminals;

/// Where the cycle is in its tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Authenticating,
    Fetching,
    Diffing,
    Dispatching,
    Committing,
    Backoff,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Authenticating => "authenticating",
            Phase::Fetching => "fetching",
            Phase::Diffing => "diffing",
            Phase::Dispatching => "dispatching",
            Phase::Committing => "committing",
            Phase::Backoff => "backoff",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a committed tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub events: Vec<Event>,
    pub delivery: DeliveryReport,
    pub baseline: bool,
    pub state: MonitorState,
}

/// Alerts an operator chat after a streak of failed ticks
#[derive(Debug, Clone)]
pub struct OperatorAlerts {
    pub chat_id: String,
    pub threshold: u32,
}

/// Drives one tick at a time. Owns the monitor state exclusively; the
/// recipient store is the only thing shared with other tasks.
pub struct PollCycle {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn StateStore>,
    recipients: Arc<dyn RecipientStore>,
    dispatcher: Dispatcher,
    renderer: Renderer,
    operator: Option<OperatorAlerts>,
    fetch_timeout: Duration,
    state: MonitorState,
    pending_commit: bool,
    phase: Phase,
    consecutive_failures: u32,
}

impl PollCycle {
    /// Build a cycle, loading the last committed state from `store`
    pub async fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn StateStore>,
        recipients: Arc<dyn RecipientStore>,
        dispatcher: Dispatcher,
        renderer: Renderer,
        fetch_timeout: Duration,
    ) -> crate::Result<Self> {
        let state = store.load().await?;
        tracing::info!(
            "Loaded monitor state: cursor={:?}, {} active alerts",
            state.last_processed_sale_id,
            state.terminal_alert_counts.len()
        );
        Ok(Self {
            source,
            store,
            recipients,
            dispatcher,
            renderer,
            operator: None,
            fetch_timeout,
            state,
            pending_commit: false,
            phase: Phase::Idle,
            consecutive_failures: 0,
        })
    }

    pub fn with_operator_alerts(mut self, operator: OperatorAlerts) -> Self {
        self.operator = Some(operator);
        self
    }

    /// State the next tick diffs against. Ahead of the durable copy while
    /// a commit is pending.
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// True when the last processed state has not reached the store yet
    pub fn pending_commit(&self) -> bool {
        self.pending_commit
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("Poll cycle {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, stage: Stage, source: VendwatchError) -> TickError {
        self.enter(Phase::Backoff);
        TickError { stage, source }
    }

    async fn bounded<T, F>(&self, fut: F) -> crate::Result<T>
    where
        F: Future<Output = crate::Result<T>>,
    {
        tokio::time::timeout(self.fetch_timeout, fut)
            .await
            .map_err(|_| VendwatchError::Timeout(self.fetch_timeout))?
    }

    /// Run a single tick.
    ///
    /// Failures before dispatch leave the state untouched. A failed commit
    /// still advances the in-memory state so dispatched events are not
    /// derived again; the save is retried by the next tick that reaches
    /// Committing. Until then the durable copy only matters across a restart.
    pub async fn tick(&mut self) -> Result<TickReport, TickError> {
        self.enter(Phase::Authenticating);
        let source = Arc::clone(&self.source);
        let session = self.bounded(source.ensure_session()).await;
        if let Err(e) = session {
            return Err(self.fail(Stage::Authenticating, e));
        }

        self.enter(Phase::Fetching);
        let fetched = self.bounded(source.fetch_snapshot()).await;
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail(Stage::Fetching, e)),
        };

        self.enter(Phase::Diffing);
        let sales = diff_sales(
            &snapshot.sales,
            self.state.last_processed_sale_id.as_deref(),
        );
        let current_counts = snapshot.terminal_counts();
        let terminals = diff_terminals(&current_counts, &self.state.terminal_alert_counts);
        let events = collect_events(&sales, &terminals);

        self.enter(Phase::Dispatching);
        let delivery = if events.is_empty() {
            DeliveryReport::default()
        } else {
            let listed = self.recipients.list().await;
            let recipients = match listed {
                Ok(recipients) => recipients,
                Err(e) => return Err(self.fail(Stage::Dispatching, e)),
            };
            let messages = self.renderer.render_all(&events);
            self.dispatcher.dispatch(&messages, &recipients).await
        };

        self.enter(Phase::Committing);
        if self.pending_commit {
            tracing::info!("Retrying pending commit of monitor state");
        }
        let next = MonitorState {
            last_processed_sale_id: sales
                .new_cursor
                .clone()
                .or_else(|| self.state.last_processed_sale_id.clone()),
            terminal_alert_counts: current_counts,
            last_check_epoch_ms: Some(current_epoch_ms()),
        };
        let saved = self.store.save(&next).await;
        self.state = next;
        if let Err(e) = saved {
            tracing::error!("Failed to commit monitor state: {}", e);
            self.pending_commit = true;
            return Err(self.fail(Stage::Committing, e));
        }
        self.pending_commit = false;
        self.enter(Phase::Idle);

        Ok(TickReport {
            events,
            delivery,
            baseline: sales.baseline,
            state: self.state.clone(),
        })
    }

    fn record_success(&mut self, report: &TickReport) {
        if self.consecutive_failures > 0 {
            tracing::info!(
                "Poll cycle recovered after {} failed ticks",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;

        if report.baseline {
            tracing::info!(
                "Baseline established at sale {:?}",
                report.state.last_processed_sale_id
            );
        } else if !report.events.is_empty() {
            tracing::info!(
                "Tick complete: {} events, {} deliveries, {} failed, {} pruned",
                report.events.len(),
                report.delivery.delivered_count(),
                report.delivery.failed_count(),
                report.delivery.pruned.len()
            );
        } else {
            tracing::debug!("Tick complete: nothing new");
        }
    }

    /// Count a failed tick and alert the operator once per failure streak
    pub async fn record_failure(&mut self, error: &TickError) {
        self.consecutive_failures += 1;
        tracing::warn!(
            "Poll tick failed ({} in a row): {}",
            self.consecutive_failures,
            error
        );

        let Some(operator) = &self.operator else {
            return;
        };
        if self.consecutive_failures != operator.threshold {
            return;
        }

        let text = format!(
            "🔴 Мониторинг не работает: {} неудачных проверок подряд\nЭтап: {}\nОшибка: {}",
            self.consecutive_failures,
            error.stage,
            truncate(&error.source.to_string(), 200)
        );
        if let Err(e) = self
            .dispatcher
            .deliver_with_retry(&operator.chat_id, &text)
            .await
        {
            tracing::error!("Failed to alert operator {}: {}", operator.chat_id, e);
        }
    }

    /// Tick forever: `interval` after a committed tick, `backoff` after a
    /// failed one, until `cancel` fires.
    pub async fn run(mut self, interval: Duration, backoff: Duration, cancel: CancellationToken) {
        loop {
            let delay = match self.tick().await {
                Ok(report) => {
                    self.record_success(&report);
                    interval
                }
                Err(e) => {
                    self.record_failure(&e).await;
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!("Poll cycle cancelled");
                    break;
                }
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn current_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageTemplates;
    use crate::dispatcher::RetryPolicy;
    use crate::error::DeliveryError;
    use crate::recipients::{MemoryRecipientStore, Recipient};
    use crate::snapshot::{PaymentMethod, SaleRow, Snapshot, TerminalAlert};
    use crate::state_store::MemoryStateStore;
    use crate::transport::Transport;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Source that serves queued snapshots, repeating the last one
    #[derive(Default)]
    struct QueuedSource {
        session_error: Mutex<Option<String>>,
        snapshots: Mutex<VecDeque<Snapshot>>,
        stall: bool,
        sessions: AtomicUsize,
    }

    impl QueuedSource {
        async fn push(&self, snapshot: Snapshot) {
            self.snapshots.lock().await.push_back(snapshot);
        }
    }

    #[async_trait::async_trait]
    impl SnapshotSource for QueuedSource {
        async fn ensure_session(&self) -> crate::Result<()> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            match self.session_error.lock().await.clone() {
                Some(msg) => Err(VendwatchError::Session(msg)),
                None => Ok(()),
            }
        }

        async fn fetch_snapshot(&self) -> crate::Result<Snapshot> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            let mut queue = self.snapshots.lock().await;
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap_or_default())
            } else {
                Ok(queue.front().cloned().unwrap_or_default())
            }
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, recipient: &str, text: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .await
                .push((recipient.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct Harness {
        source: Arc<QueuedSource>,
        store: Arc<MemoryStateStore>,
        transport: Arc<RecordingTransport>,
        cycle: PollCycle,
    }

    async fn harness_with(source: QueuedSource, state: MonitorState) -> Harness {
        let source = Arc::new(source);
        let store = Arc::new(MemoryStateStore::new(state));
        let transport = Arc::new(RecordingTransport::default());
        let recipients = Arc::new(MemoryRecipientStore::new(vec![Recipient::new("chat")]));
        let dispatcher = Dispatcher::new(
            transport.clone(),
            recipients.clone(),
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
        );
        let renderer = Renderer::new(MessageTemplates::default(), "link".to_string()).unwrap();
        let cycle = PollCycle::new(
            source.clone(),
            store.clone(),
            recipients,
            dispatcher,
            renderer,
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        Harness {
            source,
            store,
            transport,
            cycle,
        }
    }

    async fn harness(state: MonitorState) -> Harness {
        harness_with(QueuedSource::default(), state).await
    }

    fn snapshot(ids: &[&str], terminals: &[(&str, u32)]) -> Snapshot {
        Snapshot {
            sales: ids
                .iter()
                .map(|id| SaleRow::new([*id, "addr", "10:00", "19 л", "95 ₽"], PaymentMethod::Coin))
                .collect(),
            terminals: terminals
                .iter()
                .map(|(name, count)| TerminalAlert {
                    terminal_name: name.to_string(),
                    error_count: *count,
                })
                .collect(),
        }
    }

    fn cursor(id: &str) -> MonitorState {
        MonitorState {
            last_processed_sale_id: Some(id.to_string()),
            ..MonitorState::default()
        }
    }

    #[tokio::test]
    async fn baseline_tick_commits_without_notifying() {
        let mut h = harness(MonitorState::default()).await;
        h.source.push(snapshot(&["105", "104"], &[])).await;

        let report = h.cycle.tick().await.unwrap();

        assert!(report.baseline);
        assert!(report.events.is_empty());
        assert!(h.transport.sent.lock().await.is_empty());
        assert_eq!(
            h.store.snapshot().await.last_processed_sale_id.as_deref(),
            Some("105")
        );
        assert_eq!(h.cycle.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn new_sales_and_alerts_are_dispatched_then_committed() {
        let mut h = harness(cursor("104")).await;
        h.source
            .push(snapshot(&["106", "105", "104"], &[("T1", 2)]))
            .await;

        let report = h.cycle.tick().await.unwrap();

        let labels: Vec<String> = report.events.iter().map(Event::label).collect();
        assert_eq!(labels, vec!["sale #105", "sale #106", "problem on T1"]);
        assert_eq!(h.transport.sent.lock().await.len(), 3);

        let committed = h.store.snapshot().await;
        assert_eq!(committed.last_processed_sale_id.as_deref(), Some("106"));
        assert_eq!(committed.terminal_alert_counts["T1"], 2);
        assert!(committed.last_check_epoch_ms.is_some());
    }

    #[tokio::test]
    async fn repeated_snapshot_sends_nothing_new() {
        let mut h = harness(cursor("104")).await;
        h.source.push(snapshot(&["105", "104"], &[("T1", 1)])).await;

        h.cycle.tick().await.unwrap();
        let second = h.cycle.tick().await.unwrap();

        assert!(second.events.is_empty());
        assert_eq!(h.transport.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn resolved_terminal_is_reported_and_dropped() {
        let mut state = cursor("1");
        state.terminal_alert_counts.insert("T1".to_string(), 2);
        let mut h = harness(state).await;
        h.source.push(snapshot(&["1"], &[])).await;

        let report = h.cycle.tick().await.unwrap();

        assert_eq!(
            report.events,
            vec![Event::TerminalResolved {
                name: "T1".to_string()
            }]
        );
        assert!(h.store.snapshot().await.terminal_alert_counts.is_empty());
    }

    #[tokio::test]
    async fn session_failure_backs_off_without_commit() {
        let mut h = harness(cursor("104")).await;
        *h.source.session_error.lock().await = Some("bad password".to_string());
        h.source.push(snapshot(&["105", "104"], &[])).await;

        let err = h.cycle.tick().await.unwrap_err();

        assert_eq!(err.stage, Stage::Authenticating);
        assert_eq!(h.cycle.phase(), Phase::Backoff);
        assert_eq!(h.store.snapshot().await, cursor("104"));
        assert!(h.transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn fetch_timeout_is_a_fetch_failure() {
        let source = QueuedSource {
            stall: true,
            ..QueuedSource::default()
        };
        let mut h = harness_with(source, cursor("104")).await;

        let err = h.cycle.tick().await.unwrap_err();

        assert_eq!(err.stage, Stage::Fetching);
        assert!(matches!(err.source, VendwatchError::Timeout(_)), "{err:?}");
        assert_eq!(h.store.snapshot().await, cursor("104"));
    }

    #[tokio::test]
    async fn failed_commit_is_retried_without_resending() {
        let mut h = harness(cursor("104")).await;
        h.source.push(snapshot(&["105", "104"], &[])).await;
        h.store.set_fail_saves(true);

        for _ in 0..3 {
            let err = h.cycle.tick().await.unwrap_err();
            assert_eq!(err.stage, Stage::Committing);
        }

        assert!(h.cycle.pending_commit());
        assert_eq!(
            h.cycle.state().last_processed_sale_id.as_deref(),
            Some("105")
        );
        assert_eq!(h.store.snapshot().await, cursor("104"));

        h.store.set_fail_saves(false);
        let retry = h.cycle.tick().await.unwrap();

        assert!(retry.events.is_empty());
        assert!(!h.cycle.pending_commit());
        assert_eq!(
            h.store.snapshot().await.last_processed_sale_id.as_deref(),
            Some("105")
        );
        let sent = h.transport.sent.lock().await.clone();
        assert_eq!(sent.len(), 1, "{sent:?}");
    }

    #[tokio::test]
    async fn pending_commit_survives_a_failed_fetch() {
        let mut h = harness(cursor("104")).await;
        h.source.push(snapshot(&["105", "104"], &[])).await;
        h.store.set_fail_saves(true);
        h.cycle.tick().await.unwrap_err();

        h.store.set_fail_saves(false);
        *h.source.session_error.lock().await = Some("down".to_string());
        let err = h.cycle.tick().await.unwrap_err();
        assert_eq!(err.stage, Stage::Authenticating);
        assert!(h.cycle.pending_commit());

        *h.source.session_error.lock().await = None;
        h.cycle.tick().await.unwrap();
        assert!(!h.cycle.pending_commit());
        assert_eq!(
            h.store.snapshot().await.last_processed_sale_id.as_deref(),
            Some("105")
        );
        assert_eq!(h.transport.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn operator_is_alerted_once_per_streak() {
        let mut h = harness(cursor("104")).await;
        h.cycle = h.cycle.with_operator_alerts(OperatorAlerts {
            chat_id: "ops".to_string(),
            threshold: 2,
        });
        *h.source.session_error.lock().await = Some("down".to_string());

        for _ in 0..4 {
            let err = h.cycle.tick().await.unwrap_err();
            h.cycle.record_failure(&err).await;
        }

        let sent = h.transport.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ops");
        assert!(sent[0].1.contains("authenticating"));
        assert_eq!(h.cycle.consecutive_failures(), 4);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let h = harness(MonitorState::default()).await;
        h.source.push(snapshot(&["1"], &[])).await;
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(h.cycle.run(
            Duration::from_millis(10),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        handle.await.unwrap();
        assert_eq!(
            h.store.snapshot().await.last_processed_sale_id.as_deref(),
            Some("1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_backoff_after_failure_and_interval_after_success() {
        let h = harness(cursor("104")).await;
        h.source.push(snapshot(&["104"], &[])).await;
        *h.source.session_error.lock().await = Some("down".to_string());
        let source = h.source.clone();
        let ticks = || source.sessions.load(Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(h.cycle.run(
            Duration::from_secs(60),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        // Failed ticks at 0s and 5s
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks(), 2);

        // Recovers at 10s, then waits the full interval
        *h.source.session_error.lock().await = None;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks(), 3);
        assert_eq!(
            h.store.snapshot().await.last_processed_sale_id.as_deref(),
            Some("104")
        );
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(ticks(), 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks(), 4);

        cancel.cancel();
        handle.await.unwrap();
    }
}
