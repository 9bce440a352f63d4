/// Polling loop that discovers new mints and dispatches alert evaluations

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::discovery::{find_new_mint, new_signatures_since};
use crate::alerts::{
    evaluate, AlertScope, AlertStore, AlertWithOwner, EvaluationResult, HistoryRecord, Notifier, StoreError,
};
use crate::market::{MarketDataSource, SnapshotBuilder, TokenSnapshot};
use crate::rpc::{ChainError, ConnectionManager, EndpointStatus, ExponentialBackoff};

pub const DISCOVERY_PRIORITY: u8 = 5;
pub const TRANSACTION_PRIORITY: u8 = 3;
pub const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub signature_limit: usize,
    pub token_program_id: String,
    /// Pause before each transaction fetch
    pub inter_transaction_delay: Duration,
    /// Pause after an empty poll or a cold start
    pub idle_delay: Duration,
    pub max_consecutive_errors: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub targeted_check_interval: Option<Duration>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(60_000),
            signature_limit: 10,
            token_program_id: SPL_TOKEN_PROGRAM_ID.to_string(),
            inter_transaction_delay: Duration::from_millis(100),
            idle_delay: Duration::from_millis(5_000),
            max_consecutive_errors: 5,
            base_retry_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_millis(60_000),
            targeted_check_interval: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Idle,
    Polling,
    Evaluating,
}

/// What a single polling cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was still running
    Skipped,
    /// The program had no recent signatures
    Empty,
    /// First poll; the watermark was set and nothing evaluated
    ColdStart,
    Processed { new_signatures: usize, tokens: usize },
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub running: bool,
    pub watermark: Option<String>,
    pub consecutive_errors: u32,
    pub cycles_completed: u64,
    pub tokens_evaluated: u64,
    pub alerts_triggered: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub endpoints: Vec<EndpointStatus>,
}

struct MonitorInner {
    state: MonitorState,
    watermark: Option<String>,
    consecutive_errors: u32,
    cycles_completed: u64,
    tokens_evaluated: u64,
    alerts_triggered: u64,
    last_cycle_at: Option<DateTime<Utc>>,
}

struct Lifecycle {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// Clears the busy flag when a cycle ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pause after a failed cycle. Rate-limit failures back off exponentially
/// with the error count; anything else waits the base delay.
pub fn cycle_error_delay(settings: &MonitorSettings, consecutive_errors: u32, error_text: &str) -> Duration {
    let text = error_text.to_lowercase();
    if text.contains("429") || text.contains("rate limit") {
        ExponentialBackoff::new(settings.base_retry_delay, settings.max_retry_delay, 0.0).base_delay(consecutive_errors)
    } else {
        settings.base_retry_delay
    }
}

pub struct MonitoringService {
    settings: MonitorSettings,
    connections: Arc<ConnectionManager>,
    snapshots: SnapshotBuilder,
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<MonitorInner>,
    busy: AtomicBool,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl MonitoringService {
    pub fn new(
        settings: MonitorSettings,
        connections: Arc<ConnectionManager>,
        market: Arc<dyn MarketDataSource>,
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        info!(
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            signature_limit = settings.signature_limit,
            program = %settings.token_program_id,
            "Initializing MonitoringService"
        );
        Arc::new(Self {
            snapshots: SnapshotBuilder::new(Arc::clone(&connections), market),
            settings,
            connections,
            store,
            notifier,
            inner: Mutex::new(MonitorInner {
                state: MonitorState::Idle,
                watermark: None,
                consecutive_errors: 0,
                cycles_completed: 0,
                tokens_evaluated: 0,
                alerts_triggered: 0,
                last_cycle_at: None,
            }),
            busy: AtomicBool::new(false),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Starts the poll timer and runs the first cycle immediately. Calling
    /// `start` on a running service does nothing.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.is_some() {
                debug!("MonitoringService already running");
                return;
            }

            let (shutdown_tx, _) = broadcast::channel(4);
            let mut tasks = vec![self.spawn_poll_timer(shutdown_tx.subscribe())];
            if let Some(period) = self.settings.targeted_check_interval {
                tasks.push(self.spawn_targeted_timer(period, shutdown_tx.subscribe()));
            }
            *lifecycle = Some(Lifecycle { shutdown_tx, tasks });
        }

        info!("🔍 Token monitoring started");
        self.run_cycle().await;
    }

    /// Stops the timers. Cycles already in flight run to completion.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(lifecycle) = self.lifecycle.lock().await.take() else {
            debug!("MonitoringService not running");
            return;
        };

        let _ = lifecycle.shutdown_tx.send(());
        for task in lifecycle.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Monitor timer task failed");
            }
        }
        info!("🛑 Token monitoring stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_some()
    }

    fn spawn_poll_timer(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = self.settings.poll_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            service.run_cycle().await;
                        });
                    }
                    _ = shutdown.recv() => {
                        debug!("Poll timer shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_targeted_timer(self: &Arc<Self>, period: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.check_targeted_alerts().await {
                            warn!(error = %e, "Targeted alert check failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Targeted alert timer shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Runs one polling cycle unless another is still in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("Already processing, skipping this tick");
            return CycleOutcome::Skipped;
        };

        let outcome = match self.poll().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let errors = self.bump_errors().await;
                let delay = cycle_error_delay(&self.settings, errors, &e.to_string());
                error!(
                    error = %e,
                    consecutive_errors = errors,
                    delay_ms = delay.as_millis() as u64,
                    "Error monitoring new tokens"
                );
                sleep(delay).await;
                CycleOutcome::Failed
            }
        };

        let mut inner = self.inner.lock().await;
        inner.state = MonitorState::Idle;
        inner.cycles_completed += 1;
        inner.last_cycle_at = Some(Utc::now());
        debug!(outcome = ?outcome, cycles = inner.cycles_completed, "Cycle finished");
        outcome
    }

    async fn poll(&self) -> Result<CycleOutcome, MonitorError> {
        self.set_state(MonitorState::Polling).await;

        let options = self
            .connections
            .retry_options(DISCOVERY_PRIORITY)
            .max_retries(3)
            .also_retry_on("network error");
        let signatures = self
            .connections
            .recent_signatures(&self.settings.token_program_id, self.settings.signature_limit, options)
            .await?;

        let Some(newest) = signatures.first().cloned() else {
            debug!("No recent signatures");
            sleep(self.settings.idle_delay).await;
            return Ok(CycleOutcome::Empty);
        };

        let previous = self.inner.lock().await.watermark.replace(newest.clone());
        let Some(previous) = previous else {
            info!(watermark = %newest, "Cold start, watermark set");
            sleep(self.settings.idle_delay).await;
            return Ok(CycleOutcome::ColdStart);
        };

        let fresh = new_signatures_since(&previous, &signatures);
        debug!(new_signatures = fresh.len(), watermark = %newest, "Polled token program");
        self.set_state(MonitorState::Evaluating).await;

        let mut tokens = 0;
        for signature in &fresh {
            sleep(self.settings.inter_transaction_delay).await;

            match self.process_signature(signature).await {
                Ok(found) => {
                    tokens += usize::from(found);
                    self.inner.lock().await.consecutive_errors = 0;
                }
                Err(e) => {
                    let errors = self.bump_errors().await;
                    warn!(signature = %signature, error = %e, consecutive_errors = errors, "Error processing transaction");
                    if errors >= self.settings.max_consecutive_errors {
                        warn!(
                            consecutive_errors = errors,
                            pause_ms = self.settings.max_retry_delay.as_millis() as u64,
                            "Too many consecutive errors, pausing monitoring"
                        );
                        sleep(self.settings.max_retry_delay).await;
                    }
                }
            }
        }

        Ok(CycleOutcome::Processed {
            new_signatures: fresh.len(),
            tokens,
        })
    }

    /// Returns whether the transaction created a mint.
    async fn process_signature(&self, signature: &str) -> Result<bool, MonitorError> {
        let options = self.connections.retry_options(TRANSACTION_PRIORITY).max_retries(2);
        let Some(tx) = self.connections.parsed_transaction(signature, options).await? else {
            return Ok(false);
        };
        if !tx.has_meta {
            return Ok(false);
        }
        let Some(mint) = find_new_mint(&tx, &self.settings.token_program_id) else {
            return Ok(false);
        };

        info!(mint = %mint, signature = %signature, "🆕 New token mint detected");
        self.check_new_token(&mint).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn check_new_token(&self, mint: &str) -> Result<(), MonitorError> {
        let Some(snapshot) = self.snapshots.build(mint).await else {
            info!(mint = %mint, "Invalid token data, skipping");
            return Ok(());
        };
        self.inner.lock().await.tokens_evaluated += 1;

        let alerts = self.store.find_active_alerts(AlertScope::Global).await?;
        self.dispatch(&alerts, &snapshot).await;
        Ok(())
    }

    /// Evaluates `alerts` against `snapshot` and delivers the triggered
    /// results. Returns the number triggered.
    async fn dispatch(&self, alerts: &[AlertWithOwner], snapshot: &TokenSnapshot) -> usize {
        let now = Utc::now();
        let mut triggered = 0;

        for entry in alerts {
            let result = evaluate(&entry.alert, snapshot, now);
            if !result.triggered {
                debug!(alert_id = %entry.alert.id, token = %snapshot.address, "Alert not triggered");
                continue;
            }
            triggered += 1;

            match &entry.owner_email {
                Some(email) => self.handle_triggered(&result, email).await,
                None => warn!(alert_id = %entry.alert.id, "Triggered alert has no owner email"),
            }
        }
        triggered
    }

    async fn handle_triggered(&self, result: &EvaluationResult, email: &str) {
        if let Err(e) = self.notifier.notify(email, result).await {
            warn!(alert_id = %result.alert.id, error = %e, "Failed to send alert notification");
        }

        match HistoryRecord::from_result(result) {
            Ok(record) => {
                if let Err(e) = self.store.create_history(record).await {
                    error!(alert_id = %result.alert.id, error = %e, "Failed to record alert history");
                }
            }
            Err(e) => error!(alert_id = %result.alert.id, error = %e, "Failed to serialize verdicts"),
        }

        self.inner.lock().await.alerts_triggered += 1;
        info!(
            alert_id = %result.alert.id,
            token = ?result.token_address,
            groups = ?result.verdicts.triggered_groups().iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "🚨 Alert triggered"
        );
    }

    /// Evaluates alerts pinned to specific tokens. One snapshot is built per
    /// distinct address; an address without a mint account is skipped.
    #[instrument(skip(self))]
    pub async fn check_targeted_alerts(&self) -> Result<usize, MonitorError> {
        let alerts = self.store.find_active_alerts(AlertScope::Targeted).await?;

        let mut by_token: BTreeMap<String, Vec<AlertWithOwner>> = BTreeMap::new();
        for entry in alerts {
            if let Some(address) = entry.alert.token_address.clone() {
                by_token.entry(address).or_default().push(entry);
            }
        }

        let mut triggered = 0;
        for (address, group) in &by_token {
            match self.snapshots.build(address).await {
                Some(snapshot) => {
                    self.inner.lock().await.tokens_evaluated += 1;
                    triggered += self.dispatch(group, &snapshot).await;
                }
                None => warn!(token = %address, "Targeted token has no mint account"),
            }
        }

        info!(tokens = by_token.len(), triggered, "Targeted alert check complete");
        Ok(triggered)
    }

    /// Evaluates a supplied snapshot against every active alert without
    /// notifying anyone or writing history.
    pub async fn dry_run(&self, snapshot: &TokenSnapshot) -> Result<Vec<EvaluationResult>, MonitorError> {
        let alerts = self.store.find_active_alerts(AlertScope::All).await?;
        let now = Utc::now();

        let results: Vec<EvaluationResult> = alerts
            .iter()
            .map(|entry| evaluate(&entry.alert, snapshot, now))
            .collect();
        for result in results.iter().filter(|result| result.triggered) {
            info!(alert_id = %result.alert.id, token = %snapshot.address, "Alert would be triggered");
        }
        Ok(results)
    }

    pub async fn status(&self) -> MonitorStatus {
        let running = self.is_running().await;
        let endpoints = self.connections.endpoint_status().await;
        let inner = self.inner.lock().await;
        MonitorStatus {
            state: inner.state,
            running,
            watermark: inner.watermark.clone(),
            consecutive_errors: inner.consecutive_errors,
            cycles_completed: inner.cycles_completed,
            tokens_evaluated: inner.tokens_evaluated,
            alerts_triggered: inner.alerts_triggered,
            last_cycle_at: inner.last_cycle_at,
            endpoints,
        }
    }

    async fn set_state(&self, state: MonitorState) {
        self.inner.lock().await.state = state;
    }

    async fn bump_errors(&self) -> u32 {
        let mut inner = self.inner.lock().await;
        inner.consecutive_errors += 1;
        inner.consecutive_errors
    }
}
