//! MonitorActor - Detects status transitions and drives alert state
//!
//! The monitor is the single writer for entity `status` and owns every
//! entity's [`AlertState`]. On each tick it:
//!
//! ```text
//! list_entities → detect → update_status (CAS) → StatusChanged ─┐
//!                                                               ├─> step → effects
//! every tracked entity ─────────────────────────────── Tick ────┘
//! ```
//!
//! Effects are carried out inline: cooldown lookups read the store and feed
//! the result straight back into the machine, queued alerts are recorded with
//! `mark_alert_sent` before they are handed to the dispatcher.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerting::{
    AlertInput, AlertPolicy, AlertState, CooldownLookup, Effect, SuppressReason, step,
};
use crate::clock::Clock;
use crate::detector::{self, DEFAULT_ONLINE_THRESHOLD};
use crate::storage::{StatusStore, StorageResult, with_timeout};
use crate::{AlertEvent, EntityType, EventType};

use super::dispatcher::DispatcherHandle;
use super::messages::{MonitorCommand, SweepReport};

/// Monitor tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between detector sweeps
    pub check_interval: Duration,

    /// Seconds without a sample before an entity is offline
    pub online_threshold: i64,

    pub policy: AlertPolicy,

    /// Upper bound for one store call
    pub store_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            online_threshold: DEFAULT_ONLINE_THRESHOLD,
            policy: AlertPolicy::default(),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-entity alert bookkeeping
#[derive(Debug, Clone)]
struct Tracked {
    entity_type: EntityType,
    state: AlertState,

    /// Context attached to the next alert for this entity
    context: Value,
}

/// Actor running the detector and the alert state machines
pub struct MonitorActor {
    config: MonitorConfig,
    store: Arc<dyn StatusStore>,
    dispatcher: DispatcherHandle,
    clock: Arc<dyn Clock>,

    /// Command receiver
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Entities with a non-stable alert state
    tracked: HashMap<String, Tracked>,
}

impl MonitorActor {
    pub fn new(
        config: MonitorConfig,
        store: Arc<dyn StatusStore>,
        dispatcher: DispatcherHandle,
        clock: Arc<dyn Clock>,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
            clock,
            command_rx,
            tracked: HashMap::new(),
        }
    }

    /// Run the actor's main loop
    ///
    /// This is the entry point for the actor. It runs until:
    /// - A Shutdown command is received
    /// - The command channel is closed
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        // First sweep one full interval after start.
        let period = self.config.check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let respond_to = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("detector sweep failed: {e}");
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(MonitorCommand::NewEntity { entity_key, entity_type, at, metadata }) => {
                            self.on_new_entity(entity_key, entity_type, at, metadata).await;
                        }

                        Some(MonitorCommand::CheckNow { respond_to }) => {
                            debug!("received CheckNow command");
                            let result = self.sweep().await;
                            let _ = respond_to.send(result);
                        }

                        Some(MonitorCommand::GetAlertState { entity_key, respond_to }) => {
                            let state = self.tracked.get(&entity_key).map(|t| t.state);
                            let _ = respond_to.send(state);
                        }

                        Some(MonitorCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            break Some(respond_to);
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break None;
                        }
                    }
                }
            }
        };

        let pending = self
            .tracked
            .values()
            .filter(|t| matches!(t.state, AlertState::PendingGrace { .. }))
            .count();
        if pending > 0 {
            info!("{pending} status changes still inside their grace period at shutdown");
        }

        debug!("monitor actor stopped");

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(());
        }
    }

    /// One detector pass followed by a tick of every tracked state machine
    #[instrument(skip(self))]
    async fn sweep(&mut self) -> StorageResult<SweepReport> {
        let entities = with_timeout(self.config.store_timeout, self.store.list_entities()).await?;
        let now = self.clock.now();
        let transitions = detector::detect(&entities, now, self.config.online_threshold);

        let mut report = SweepReport {
            checked: entities.len(),
            ..Default::default()
        };

        for transition in transitions {
            let applied = with_timeout(
                self.config.store_timeout,
                self.store.update_status(
                    &transition.entity_key,
                    transition.from,
                    transition.to,
                    transition.at,
                    transition.last_seen,
                ),
            )
            .await;

            match applied {
                Ok(true) => {
                    info!(
                        "{} {} is now {}",
                        transition.entity_type, transition.entity_key, transition.to
                    );
                    report.transitions += 1;

                    let tracked = self
                        .tracked
                        .entry(transition.entity_key.clone())
                        .or_insert_with(|| Tracked {
                            entity_type: transition.entity_type,
                            state: AlertState::Stable,
                            context: Value::Null,
                        });
                    tracked.context = transition.context();

                    report.alerts_queued += self
                        .apply(
                            &transition.entity_key,
                            AlertInput::StatusChanged {
                                status: transition.to,
                                at: transition.at,
                            },
                        )
                        .await;
                }
                Ok(false) => {
                    debug!(
                        "{} was refreshed or flipped underneath the sweep, skipping",
                        transition.entity_key
                    );
                }
                Err(e) => {
                    error!(
                        "failed to update status of {}: {e}",
                        transition.entity_key
                    );
                }
            }
        }

        let keys: Vec<String> = self.tracked.keys().cloned().collect();
        for key in keys {
            report.alerts_queued += self.apply(&key, AlertInput::Tick).await;
        }
        self.tracked.retain(|_, tracked| !tracked.state.is_stable());

        trace!(
            "sweep checked {} entities, {} transitions, {} alerts",
            report.checked, report.transitions, report.alerts_queued
        );
        Ok(report)
    }

    #[instrument(skip(self, metadata))]
    async fn on_new_entity(
        &mut self,
        entity_key: String,
        entity_type: EntityType,
        at: i64,
        metadata: Value,
    ) {
        debug!("new {entity_type} {entity_key}");

        let state = self
            .tracked
            .get(&entity_key)
            .map_or(AlertState::Stable, |t| t.state);
        self.tracked.insert(
            entity_key.clone(),
            Tracked {
                entity_type,
                state,
                context: json!({ "last_seen": at, "metadata": metadata }),
            },
        );

        self.apply(&entity_key, AlertInput::NewEntity { at }).await;
        self.tracked.retain(|_, tracked| !tracked.state.is_stable());
    }

    /// Feed one input to an entity's machine and carry out the effects
    ///
    /// Returns the number of alerts handed to the dispatcher.
    async fn apply(&mut self, key: &str, input: AlertInput) -> usize {
        let now = self.clock.now();
        let mut inputs = VecDeque::from([input]);
        let mut queued = 0;

        while let Some(input) = inputs.pop_front() {
            let Some(tracked) = self.tracked.get_mut(key) else {
                return queued;
            };

            let (next, effects) = step(tracked.state, input, now, &self.config.policy);
            tracked.state = next;
            let entity_type = tracked.entity_type;
            let context = tracked.context.clone();

            for effect in effects {
                match effect {
                    Effect::LookupCooldown { event } => {
                        let lookup = self.lookup_cooldown(key, event).await;
                        inputs.push_back(AlertInput::CooldownResolved(lookup));
                    }

                    Effect::Queue { event, changed_at } => {
                        let alert = AlertEvent {
                            entity_type,
                            entity_key: key.to_string(),
                            event_type: event,
                            occurred_at: changed_at,
                            context: context.clone(),
                        };
                        if self.queue_alert(alert, now).await {
                            queued += 1;
                        }
                    }

                    Effect::Suppressed { event, reason } => match reason {
                        SuppressReason::LookupFailed => {
                            warn!("dropped {event} alert for {key}: cooldown lookup failed")
                        }
                        SuppressReason::Cooldown => {
                            debug!("dropped {event} alert for {key}: within cooldown")
                        }
                        SuppressReason::Flapped => {
                            debug!("dropped {event} alert for {key}: status flapped within grace")
                        }
                    },
                }
            }
        }

        queued
    }

    async fn lookup_cooldown(&self, key: &str, event: EventType) -> CooldownLookup {
        match with_timeout(
            self.config.store_timeout,
            self.store.get_last_alert_sent_at(key, event),
        )
        .await
        {
            Ok(last_sent) => last_sent.into(),
            Err(e) => {
                error!("cooldown lookup for {key}/{event} failed: {e}");
                CooldownLookup::Failed
            }
        }
    }

    /// Persist the cooldown, then hand the alert over
    ///
    /// An alert whose cooldown could not be persisted is not sent: a later
    /// lookup would miss it and send a duplicate.
    async fn queue_alert(&self, alert: AlertEvent, now: i64) -> bool {
        if let Err(e) = with_timeout(
            self.config.store_timeout,
            self.store
                .mark_alert_sent(&alert.entity_key, alert.event_type, now),
        )
        .await
        {
            error!(
                "dropped {} alert for {}: could not record cooldown: {e}",
                alert.event_type, alert.entity_key
            );
            return false;
        }

        debug!("queueing {} alert for {}", alert.event_type, alert.entity_key);
        match self.dispatcher.queue(alert).await {
            Ok(()) => true,
            Err(e) => {
                error!("dispatcher unavailable: {e:#}");
                false
            }
        }
    }
}

/// Handle for controlling the MonitorActor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn a new monitor actor
    pub fn spawn(
        config: MonitorConfig,
        store: Arc<dyn StatusStore>,
        dispatcher: DispatcherHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = MonitorActor::new(config, store, dispatcher, clock, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Report an entity created by the ingestion path
    pub async fn new_entity(
        &self,
        entity_key: String,
        entity_type: EntityType,
        at: i64,
        metadata: Value,
    ) -> Result<()> {
        self.sender
            .send(MonitorCommand::NewEntity {
                entity_key,
                entity_type,
                at,
                metadata,
            })
            .await
            .context("failed to send NewEntity command")?;
        Ok(())
    }

    /// Run a detector sweep immediately
    pub async fn check_now(&self) -> Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::CheckNow { respond_to: tx })
            .await
            .context("failed to send CheckNow command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub async fn get_alert_state(&self, entity_key: impl ToString) -> Option<AlertState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetAlertState {
                entity_key: entity_key.to_string(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok().flatten()
    }

    /// Stop the actor and wait for it to exit
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("monitor stopped without acknowledging")
    }
}
