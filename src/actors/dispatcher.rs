//! BatchDispatcher - Batches alerts and delivers them to sinks
//!
//! Alerts are collected for `batch_delay` after the first one arrives, then
//! fanned out to every matching sink in one go. This keeps a burst of
//! transitions (a switch going down takes twenty ping targets with it) from
//! turning into a burst of separate webhook calls spread over the burst.
//!
//! ## Message Flow
//!
//! ```text
//! MonitorActor ── Queue ──> pending batch ── timer fires ──> (alert × sink) tasks
//!                              │ arms one timer                   │ JoinSet + Semaphore
//!                              ▼                                  ▼
//!                          Sleep (single)                 record_delivery (audit)
//! ```
//!
//! ## Guarantees
//!
//! - At most one batch timer is armed; queueing while armed never re-arms
//! - Every (alert, sink) pair is attempted at most once, bounded by the
//!   delivery timeout, and every attempt is recorded in the store
//! - Shutdown flushes the pending batch and joins in-flight deliveries up to
//!   the shutdown grace; anything still running is aborted and recorded
//! - A delivery task that panics is recorded as a failed attempt

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::AlertEvent;
use crate::clock::Clock;
use crate::sinks::{DeliveryError, RegisteredSink};
use crate::storage::{SinkResult, StatusStore, with_timeout};

use super::messages::{DispatcherCommand, DispatcherStats};

/// Dispatcher tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Delay between the first queued alert and the flush
    pub batch_delay: Duration,

    /// Upper bound for one sink delivery
    pub delivery_timeout: Duration,

    /// Deliveries running at the same time
    pub max_concurrent_deliveries: usize,

    /// How long shutdown waits for in-flight deliveries
    pub shutdown_grace: Duration,

    /// Upper bound for one audit write
    pub store_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(5),
            max_concurrent_deliveries: 8,
            shutdown_grace: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Identity of one (alert, sink) delivery, kept until the task is joined
#[derive(Debug, Clone)]
struct InFlight {
    alert: AlertEvent,
    sink_name: String,
}

/// Actor owning the pending batch, the batch timer and the delivery tasks
pub struct BatchDispatcher {
    config: DispatcherConfig,
    sinks: Vec<RegisteredSink>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,

    /// Command receiver
    command_rx: mpsc::Receiver<DispatcherCommand>,

    /// Alerts waiting for the timer
    pending: Vec<AlertEvent>,

    /// The single batch timer, `None` while disarmed
    timer: Option<Pin<Box<Sleep>>>,

    /// Delivery tasks, each returning its success flag
    deliveries: JoinSet<bool>,

    /// What each running task delivers, keyed by task id
    in_flight: HashMap<Id, InFlight>,

    /// Bounds concurrently running deliveries
    permits: Arc<Semaphore>,

    stats: DispatcherStats,
}

/// Resolves when the timer fires; never resolves while disarmed
async fn timer_fired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl BatchDispatcher {
    pub fn new(
        config: DispatcherConfig,
        sinks: Vec<RegisteredSink>,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        command_rx: mpsc::Receiver<DispatcherCommand>,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1))),
            config,
            sinks,
            store,
            clock,
            command_rx,
            pending: Vec::new(),
            timer: None,
            deliveries: JoinSet::new(),
            in_flight: HashMap::new(),
            stats: DispatcherStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command arrives or every handle is dropped. Both
    /// paths flush and drain before returning.
    #[instrument(skip(self), fields(sinks = self.sinks.len()))]
    pub async fn run(mut self) {
        debug!("starting dispatcher");

        let respond_to = loop {
            tokio::select! {
                _ = timer_fired(&mut self.timer) => {
                    self.timer = None;
                    trace!("batch timer fired");
                    self.flush();
                }

                Some(joined) = self.deliveries.join_next_with_id(), if !self.deliveries.is_empty() => {
                    self.on_joined(joined).await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(DispatcherCommand::Queue { alert }) => self.queue(alert),

                        Some(DispatcherCommand::FlushNow { respond_to }) => {
                            debug!("manual flush requested");
                            self.timer = None;
                            let started = self.flush();
                            let _ = respond_to.send(started);
                        }

                        Some(DispatcherCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.snapshot());
                        }

                        Some(DispatcherCommand::Shutdown { respond_to }) => {
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

        self.timer = None;
        self.flush();
        self.drain().await;

        let stats = self.snapshot();
        info!(
            "dispatcher stopped ({} delivered, {} failed, {} aborted)",
            stats.delivered, stats.failed, stats.aborted
        );

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(stats);
        }
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            pending: self.pending.len(),
            in_flight: self.deliveries.len(),
            timer_armed: self.timer.is_some(),
            ..self.stats
        }
    }

    /// Append to the batch and arm the timer if it is not already armed
    fn queue(&mut self, alert: AlertEvent) {
        trace!(
            "queued {} alert for {}",
            alert.event_type, alert.entity_key
        );
        self.pending.push(alert);

        if self.timer.is_none() {
            let deadline = Instant::now() + self.config.batch_delay;
            self.timer = Some(Box::pin(tokio::time::sleep_until(deadline)));
        }
    }

    /// Start one delivery task per matching (alert, sink) pair
    fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let batch = std::mem::take(&mut self.pending);
        self.stats.flushes += 1;

        let mut started = 0;
        for alert in &batch {
            let matching: Vec<&RegisteredSink> = self
                .sinks
                .iter()
                .filter(|sink| sink.filter.matches(alert))
                .collect();

            if matching.is_empty() {
                debug!(
                    "no sink wants {} alert for {}",
                    alert.event_type, alert.entity_key
                );
                continue;
            }

            for sink in matching {
                let task = self.deliveries.spawn(deliver(
                    alert.clone(),
                    sink.clone(),
                    self.store.clone(),
                    self.clock.clone(),
                    self.permits.clone(),
                    self.config,
                ));
                self.in_flight.insert(
                    task.id(),
                    InFlight {
                        alert: alert.clone(),
                        sink_name: sink.name.clone(),
                    },
                );
                started += 1;
            }
        }

        debug!(
            "flushed {} alerts into {started} deliveries",
            batch.len()
        );
        started
    }

    async fn on_joined(&mut self, joined: std::result::Result<(Id, bool), JoinError>) {
        let e = match joined {
            Ok((id, success)) => {
                self.in_flight.remove(&id);
                if success {
                    self.stats.delivered += 1;
                } else {
                    self.stats.failed += 1;
                }
                return;
            }
            Err(e) => e,
        };

        let Some(unfinished) = self.in_flight.remove(&e.id()) else {
            error!("joined unknown delivery task {}", e.id());
            return;
        };

        let reason = if e.is_cancelled() {
            warn!(
                "aborted delivery of {} alert for {} to {}",
                unfinished.alert.event_type, unfinished.alert.entity_key, unfinished.sink_name
            );
            self.stats.aborted += 1;
            "aborted at shutdown"
        } else {
            error!(
                "delivery of {} alert for {} to {} panicked: {e}",
                unfinished.alert.event_type, unfinished.alert.entity_key, unfinished.sink_name
            );
            self.stats.failed += 1;
            "delivery task panicked"
        };

        let result = SinkResult {
            sink_name: unfinished.sink_name,
            success: false,
            error: Some(reason.to_string()),
            attempted_at: self.clock.now(),
        };
        if let Err(e) = with_timeout(
            self.config.store_timeout,
            self.store.record_delivery(&unfinished.alert, &result),
        )
        .await
        {
            error!("failed to record unfinished delivery: {e}");
        }
    }

    /// Join in-flight deliveries, aborting whatever outlives the grace period
    async fn drain(&mut self) {
        if self.deliveries.is_empty() {
            return;
        }

        debug!(
            "waiting up to {:?} for {} in-flight deliveries",
            self.config.shutdown_grace,
            self.deliveries.len()
        );

        let deadline = Instant::now() + self.config.shutdown_grace;
        while !self.deliveries.is_empty() {
            match tokio::time::timeout_at(deadline, self.deliveries.join_next_with_id()).await {
                Ok(Some(joined)) => self.on_joined(joined).await,
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if self.deliveries.is_empty() {
            return;
        }

        warn!(
            "aborting {} deliveries still running after shutdown grace",
            self.deliveries.len()
        );
        self.deliveries.abort_all();
        while let Some(joined) = self.deliveries.join_next_with_id().await {
            self.on_joined(joined).await;
        }
    }
}

/// One delivery attempt plus its audit record
async fn deliver(
    alert: AlertEvent,
    sink: RegisteredSink,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    config: DispatcherConfig,
) -> bool {
    // The semaphore is never closed.
    let _permit = permits.acquire_owned().await.ok();

    let attempted_at = clock.now();
    let outcome = match tokio::time::timeout(config.delivery_timeout, sink.sink.deliver(&alert)).await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(DeliveryError::Timeout(config.delivery_timeout)),
    };

    let result = match &outcome {
        Ok(()) => {
            debug!(
                "delivered {} alert for {} to {}",
                alert.event_type, alert.entity_key, sink.name
            );
            SinkResult {
                sink_name: sink.name.clone(),
                success: true,
                error: None,
                attempted_at,
            }
        }
        Err(e) => {
            warn!(
                "delivery of {} alert for {} to {} failed: {e}",
                alert.event_type, alert.entity_key, sink.name
            );
            SinkResult {
                sink_name: sink.name.clone(),
                success: false,
                error: Some(e.to_string()),
                attempted_at,
            }
        }
    };

    if let Err(e) = with_timeout(config.store_timeout, store.record_delivery(&alert, &result)).await
    {
        error!("failed to record delivery to {}: {e}", sink.name);
    }

    result.success
}

/// Handle for controlling the BatchDispatcher
///
/// Cloneable; every clone talks to the same actor.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    /// Spawn a new dispatcher actor
    pub fn spawn(
        config: DispatcherConfig,
        sinks: Vec<RegisteredSink>,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = BatchDispatcher::new(config, sinks, store, clock, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Add an alert to the pending batch
    pub async fn queue(&self, alert: AlertEvent) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Queue { alert })
            .await
            .context("failed to send Queue command")?;
        Ok(())
    }

    /// Deliver the pending batch now; returns the number of deliveries started
    pub async fn flush_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::FlushNow { respond_to: tx })
            .await
            .context("failed to send FlushNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn get_stats(&self) -> Option<DispatcherStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Flush, drain and stop the actor; returns the final counters
    pub async fn shutdown(&self) -> Result<DispatcherStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DispatcherCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("dispatcher stopped without acknowledging")
    }
}
