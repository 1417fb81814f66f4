// Scheduler engine
//
// A shared tick evaluates every loaded trigger against the clock. Due
// occurrences are dispatched on their own tasks so different triggers fire
// concurrently, while a per-trigger in-flight flag keeps firings of the same
// trigger strictly serialized: an occurrence that comes due while the previous
// dispatch is still running is skipped, never queued.

use crate::clock::Clock;
use crate::errors::SchedulerError;
use crate::models::{TriggerDefinition, TriggerKind, TriggerState};
use crate::schedule::TriggerSchedule;
use crate::scheduler::dispatcher::Dispatcher;
use crate::scheduler::store::TriggerStore;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// Configuration for the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often due triggers are evaluated (in milliseconds)
    pub tick_interval_ms: u64,
    /// Maximum number of occurrences dispatched per tick
    pub max_fires_per_tick: usize,
    /// JSON trigger file; inline triggers from configuration are used when absent
    pub triggers_file: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_fires_per_tick: 100,
            triggers_file: None,
        }
    }
}

/// Scheduler trait for trigger scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the tick loop until `stop` is called
    async fn start(&self) -> Result<(), SchedulerError>;

    /// Cancel pending occurrences and wait for in-flight firings
    async fn stop(&self) -> Result<(), SchedulerError>;

    /// Dispatch every occurrence that is due; returns how many were fired
    async fn process_due_triggers(&self) -> Result<usize, SchedulerError>;
}

/// A trigger rejected at load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRejection {
    pub trigger_id: String,
    pub reason: String,
}

/// Result of loading a batch of trigger definitions
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub scheduled: Vec<String>,
    pub rejected: Vec<TriggerRejection>,
}

/// Point-in-time view of one loaded trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    pub id: String,
    pub job_identity: String,
    pub kind: TriggerKind,
    pub state: TriggerState,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub skip_count: u64,
}

struct ScheduledTrigger {
    definition: TriggerDefinition,
    schedule: TriggerSchedule,
    state: TriggerState,
    next_fire: Option<DateTime<Utc>>,
    last_fired_at: Option<DateTime<Utc>>,
    in_flight: Arc<AtomicBool>,
    fire_count: u64,
    skip_count: u64,
}

impl ScheduledTrigger {
    fn info(&self) -> TriggerInfo {
        let state = if self.state == TriggerState::Scheduled && self.in_flight.load(Ordering::SeqCst)
        {
            TriggerState::Firing
        } else {
            self.state
        };

        TriggerInfo {
            id: self.definition.id.clone(),
            job_identity: self.definition.job_identity.clone(),
            kind: self.definition.kind,
            state,
            next_fire_time: self.next_fire,
            last_fired_at: self.last_fired_at,
            fire_count: self.fire_count,
            skip_count: self.skip_count,
        }
    }

    /// Claim the trigger for one firing, or record a skipped occurrence
    fn claim(&mut self, scheduled_for: DateTime<Utc>) -> Option<Firing> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.skip_count += 1;
            telemetry::record_occurrence_skipped(&self.definition.id);
            debug!(
                trigger_id = %self.definition.id,
                scheduled_for = %scheduled_for,
                "Previous firing still in flight, skipping occurrence"
            );
            return None;
        }

        self.fire_count += 1;
        self.last_fired_at = Some(scheduled_for);
        Some(Firing {
            trigger_id: self.definition.id.clone(),
            job_identity: self.definition.job_identity.clone(),
            scheduled_for,
            in_flight: self.in_flight.clone(),
        })
    }
}

struct Firing {
    trigger_id: String,
    job_identity: String,
    scheduled_for: DateTime<Utc>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag however the firing ends, panics included
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    triggers: RwLock<BTreeMap<String, ScheduledTrigger>>,
    in_flight: Mutex<JoinSet<()>>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl SchedulerEngine {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>, dispatcher: Dispatcher) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            clock,
            dispatcher,
            triggers: RwLock::new(BTreeMap::new()),
            in_flight: Mutex::new(JoinSet::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Validate and schedule a batch of definitions
    ///
    /// Each rejected definition produces exactly one warning naming its id.
    /// An id that is already loaded is rejected; the first definition wins.
    #[instrument(skip(self, definitions), fields(definition_count = definitions.len()))]
    pub async fn load_triggers(&self, definitions: Vec<TriggerDefinition>) -> LoadReport {
        let now = self.clock.now();
        let mut report = LoadReport::default();
        let mut triggers = self.triggers.write().await;

        for definition in definitions {
            let validated = if triggers.contains_key(&definition.id) {
                Err(format!("duplicate trigger id '{}'", definition.id))
            } else {
                TriggerSchedule::from_definition(&definition).map_err(|e| e.to_string())
            };

            let schedule = match validated {
                Ok(schedule) => schedule,
                Err(reason) => {
                    warn!(
                        trigger_id = %definition.id,
                        job_identity = %definition.job_identity,
                        reason = %reason,
                        "Rejected trigger definition"
                    );
                    telemetry::record_trigger_rejected();
                    report.rejected.push(TriggerRejection {
                        trigger_id: definition.id,
                        reason,
                    });
                    continue;
                }
            };

            let next_fire = schedule.first_fire_time(now);
            let state = if next_fire.is_some() {
                TriggerState::Scheduled
            } else {
                TriggerState::Completed
            };

            debug!(
                trigger_id = %definition.id,
                job_identity = %definition.job_identity,
                next_fire_time = ?next_fire,
                "Trigger scheduled"
            );

            report.scheduled.push(definition.id.clone());
            triggers.insert(
                definition.id.clone(),
                ScheduledTrigger {
                    definition,
                    schedule,
                    state,
                    next_fire,
                    last_fired_at: None,
                    in_flight: Arc::new(AtomicBool::new(false)),
                    fire_count: 0,
                    skip_count: 0,
                },
            );
        }

        info!(
            scheduled = report.scheduled.len(),
            rejected = report.rejected.len(),
            "Trigger definitions loaded"
        );

        report
    }

    /// Load every definition the store holds
    pub async fn load_from_store(
        &self,
        store: &dyn TriggerStore,
    ) -> Result<LoadReport, SchedulerError> {
        let definitions = store.load_all().await?;
        Ok(self.load_triggers(definitions).await)
    }

    /// Fire a scheduled trigger now, outside its schedule
    ///
    /// Returns false when the trigger is not in the Scheduled state or its
    /// previous firing is still in flight.
    #[instrument(skip(self))]
    pub async fn trigger_now(&self, trigger_id: &str) -> Result<bool, SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }

        let firing = {
            let mut triggers = self.triggers.write().await;
            let trigger = triggers
                .get_mut(trigger_id)
                .ok_or_else(|| SchedulerError::TriggerNotFound(trigger_id.to_string()))?;

            if trigger.state != TriggerState::Scheduled {
                debug!(state = %trigger.state, "Trigger is not scheduled, not firing");
                return Ok(false);
            }
            trigger.claim(self.clock.now())
        };

        match firing {
            Some(firing) => {
                self.spawn_firings(vec![firing]).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn list_triggers(&self) -> Vec<TriggerInfo> {
        self.triggers
            .read()
            .await
            .values()
            .map(ScheduledTrigger::info)
            .collect()
    }

    pub async fn trigger_info(&self, trigger_id: &str) -> Option<TriggerInfo> {
        self.triggers
            .read()
            .await
            .get(trigger_id)
            .map(ScheduledTrigger::info)
    }

    /// Wait until every firing spawned so far has finished
    pub async fn wait_for_in_flight(&self) {
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().await);

        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Trigger firing panicked");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Advance every due trigger and claim its occurrence
    ///
    /// Oldest due time first, so a capped tick cannot starve the same
    /// triggers every time.
    async fn collect_due_firings(&self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut triggers = self.triggers.write().await;

        let mut due: Vec<(DateTime<Utc>, &mut ScheduledTrigger)> = triggers
            .values_mut()
            .filter(|trigger| trigger.state == TriggerState::Scheduled)
            .filter_map(|trigger| {
                let due_at = trigger.next_fire.filter(|due_at| *due_at <= now)?;
                Some((due_at, trigger))
            })
            .collect();
        due.sort_by_key(|(due_at, _)| *due_at);

        let mut firings = Vec::new();
        for (due_at, trigger) in due {
            if firings.len() >= self.config.max_fires_per_tick {
                break;
            }

            trigger.next_fire = trigger.schedule.next_fire_time(due_at, now);
            if let Some(firing) = trigger.claim(due_at) {
                firings.push(firing);
            }
            if trigger.next_fire.is_none() {
                trigger.state = TriggerState::Completed;
            }
        }

        firings
    }

    async fn spawn_firings(&self, firings: Vec<Firing>) {
        let mut in_flight = self.in_flight.lock().await;

        // stop() flips the flag under this lock, so nothing is spawned after it drains
        if self.stopped.load(Ordering::SeqCst) {
            for firing in firings {
                firing.in_flight.store(false, Ordering::SeqCst);
                debug!(trigger_id = %firing.trigger_id, "Scheduler stopped, dropping occurrence");
            }
            return;
        }

        // Reap finished firings so the set does not grow without bound
        while in_flight.try_join_next().is_some() {}

        for firing in firings {
            let span = info_span!(
                "fire",
                trigger_id = %firing.trigger_id,
                job_identity = %firing.job_identity
            );
            in_flight.spawn(fire(self.dispatcher.clone(), firing).instrument(span));
        }
    }
}

/// Dispatch one occurrence. Failures stay with this occurrence.
async fn fire(dispatcher: Dispatcher, firing: Firing) {
    let _guard = InFlightGuard(firing.in_flight);
    telemetry::record_trigger_fired(&firing.trigger_id, &firing.job_identity);

    match dispatcher.publish(&firing.job_identity).await {
        Ok(_) => {
            info!(scheduled_for = %firing.scheduled_for, "Trigger fired");
        }
        Err(e) => {
            error!(
                scheduled_for = %firing.scheduled_for,
                error = %e,
                "Failed to dispatch trigger occurrence, trigger remains scheduled"
            );
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            "Starting scheduler engine"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    // stop() may have run before we subscribed
                    if self.stopped.load(Ordering::SeqCst) {
                        break;
                    }

                    match self.process_due_triggers().await {
                        Ok(0) => {}
                        Ok(count) => debug!(fired = count, "Processed due triggers"),
                        Err(e) => error!(error = %e, "Error processing due triggers"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), SchedulerError> {
        {
            let _in_flight = self.in_flight.lock().await;
            if self.stopped.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }

        info!("Stopping scheduler engine");

        {
            let mut triggers = self.triggers.write().await;
            for trigger in triggers.values_mut() {
                if trigger.state == TriggerState::Scheduled {
                    trigger.state = TriggerState::Cancelled;
                    trigger.next_fire = None;
                }
            }
        }

        let _ = self.shutdown_tx.send(());
        self.wait_for_in_flight().await;

        info!("Scheduler engine stopped gracefully");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn process_due_triggers(&self) -> Result<usize, SchedulerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let firings = self.collect_due_firings(self.clock.now()).await;

        let fired = firings.len();
        if fired > 0 {
            self.spawn_firings(firings).await;
        }

        Ok(fired)
    }
}
