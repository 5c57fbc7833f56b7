//! UDP receiver - Turns datagrams into stored samples
//!
//! One receive loop per socket. Every datagram is handled on its own task
//! (bounded by a semaphore), so a slow store write never stalls the socket:
//!
//! ```text
//! recv_from → spawn ─> open (codec) → route (validator) → samples
//!                                                           │
//!                       touch_entity (max-CAS) <────────────┘
//!                           │ Created
//!                           └──> MonitorHandle::new_entity
//! ```
//!
//! Any per-packet error is logged and the datagram dropped. Senders report
//! on their own interval, so nothing is retried here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::clock::Clock;
use crate::codec::{self, SharedKey};
use crate::error::{IngestError, IngestResult};
use crate::message::{self, DEFAULT_MAX_MESSAGE_AGE, MessageKind};
use crate::storage::{StatusStore, TouchOutcome, with_timeout};

use super::messages::{ReceiverCommand, ReceiverStats};
use super::monitor::MonitorHandle;

/// Largest UDP payload
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Ingestion tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Freshness window for sender timestamps, in seconds
    pub max_message_age: i64,

    /// Upper bound for one store call
    pub store_timeout: Duration,

    /// Datagrams processed at the same time
    pub max_concurrent_packets: usize,

    /// How long shutdown waits for in-flight packets
    pub shutdown_grace: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_message_age: DEFAULT_MAX_MESSAGE_AGE,
            store_timeout: Duration::from_secs(5),
            max_concurrent_packets: 64,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// What a datagram amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub kind: MessageKind,

    /// Samples produced by the message
    pub samples: usize,

    /// Entities seen for the first time
    pub created: usize,
}

/// Datagram pipeline shared by all packet tasks
pub struct Ingestor {
    key: SharedKey,
    store: Arc<dyn StatusStore>,
    monitor: MonitorHandle,
    clock: Arc<dyn Clock>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        key: SharedKey,
        store: Arc<dyn StatusStore>,
        monitor: MonitorHandle,
        clock: Arc<dyn Clock>,
        config: IngestConfig,
    ) -> Self {
        Self {
            key,
            store,
            monitor,
            clock,
            config,
        }
    }

    /// Authenticate, validate and store one datagram
    pub async fn handle_datagram(&self, packet: &[u8]) -> IngestResult<IngestReport> {
        let now = self.clock.now();
        let plaintext = codec::open(packet, &self.key)?;
        let routed = message::route(&plaintext, now, self.config.max_message_age)?;
        let samples = routed.samples(now);

        let mut report = IngestReport {
            kind: routed.kind(),
            samples: samples.len(),
            created: 0,
        };

        for sample in samples {
            let outcome =
                with_timeout(self.config.store_timeout, self.store.touch_entity(&sample)).await?;

            trace!("{} {}: {outcome:?}", sample.entity_type, sample.entity_key);

            if outcome == TouchOutcome::Created {
                report.created += 1;
                info!("new {} {}", sample.entity_type, sample.entity_key);

                if let Err(e) = self
                    .monitor
                    .new_entity(
                        sample.entity_key,
                        sample.entity_type,
                        sample.device_timestamp,
                        sample.payload,
                    )
                    .await
                {
                    error!("could not notify monitor of new entity: {e:#}");
                }
            }
        }

        Ok(report)
    }
}

/// Actor owning the socket and the packet tasks
pub struct ReceiverActor {
    socket: UdpSocket,
    ingestor: Arc<Ingestor>,
    permits: Arc<Semaphore>,
    shutdown_grace: Duration,

    /// Command receiver
    command_rx: mpsc::Receiver<ReceiverCommand>,

    tasks: JoinSet<(SocketAddr, IngestResult<IngestReport>)>,
    stats: ReceiverStats,
}

impl ReceiverActor {
    pub fn new(
        socket: UdpSocket,
        ingestor: Ingestor,
        command_rx: mpsc::Receiver<ReceiverCommand>,
    ) -> Self {
        let config = ingestor.config;
        Self {
            socket,
            ingestor: Arc::new(ingestor),
            permits: Arc::new(Semaphore::new(config.max_concurrent_packets.max(1))),
            shutdown_grace: config.shutdown_grace,
            command_rx,
            tasks: JoinSet::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Run the receive loop
    #[instrument(skip(self), fields(addr = ?self.socket.local_addr().ok()))]
    pub async fn run(mut self) {
        debug!("starting receiver");

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        let respond_to = loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            let packet = buf[..len].to_vec();
                            self.spawn_packet(packet, peer).await;
                        }
                        Err(e) => {
                            // ICMP errors from earlier sends surface here on some platforms.
                            warn!("recv failed: {e}");
                        }
                    }
                }

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_joined(joined);
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ReceiverCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.snapshot());
                        }

                        Some(ReceiverCommand::Shutdown { respond_to }) => {
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

        self.drain().await;
        let stats = self.snapshot();
        info!(
            "receiver stopped ({} received, {} accepted, {} rejected)",
            stats.received, stats.accepted, stats.rejected
        );

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(stats);
        }
    }

    fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            in_flight: self.tasks.len(),
            ..self.stats
        }
    }

    /// Wait for a permit, then process the datagram on its own task
    ///
    /// Waiting here pushes back on the socket: excess datagrams queue in the
    /// kernel buffer instead of in memory.
    async fn spawn_packet(&mut self, packet: Vec<u8>, peer: SocketAddr) {
        self.stats.received += 1;

        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let ingestor = self.ingestor.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            (peer, ingestor.handle_datagram(&packet).await)
        });
    }

    fn on_joined(
        &mut self,
        joined: std::result::Result<(SocketAddr, IngestResult<IngestReport>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((peer, Ok(report))) => {
                self.stats.accepted += 1;
                trace!(
                    "{peer}: {} message, {} samples, {} new",
                    report.kind, report.samples, report.created
                );
            }
            Ok((peer, Err(e))) => {
                self.stats.rejected += 1;
                log_rejection(peer, &e);
            }
            Err(e) => {
                self.stats.rejected += 1;
                error!("packet task failed: {e}");
            }
        }
    }

    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        while !self.tasks.is_empty() {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(joined)) => self.on_joined(joined),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "aborting {} packets still in flight at shutdown",
                        self.tasks.len()
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }
    }
}

fn log_rejection(peer: SocketAddr, err: &IngestError) {
    match err {
        IngestError::PersistenceUnavailable(_) => {
            error!(kind = err.kind(), "{peer}: dropped packet: {err}")
        }
        IngestError::DecryptionFailed | IngestError::TransportTooShort { .. } => {
            debug!(kind = err.kind(), "{peer}: dropped packet: {err}")
        }
        _ => warn!(kind = err.kind(), "{peer}: dropped packet: {err}"),
    }
}

/// Handle for controlling the receiver
#[derive(Clone)]
pub struct ReceiverHandle {
    sender: mpsc::Sender<ReceiverCommand>,

    /// Address the socket is bound to
    pub local_addr: SocketAddr,
}

impl ReceiverHandle {
    /// Spawn a receiver on an already bound socket
    pub fn spawn(socket: UdpSocket, ingestor: Ingestor) -> Result<Self> {
        let local_addr = socket.local_addr().context("socket has no local address")?;
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ReceiverActor::new(socket, ingestor, cmd_rx);

        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            local_addr,
        })
    }

    /// Bind `addr` and spawn a receiver on it
    pub async fn bind(addr: SocketAddr, ingestor: Ingestor) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket on {addr}"))?;
        Self::spawn(socket, ingestor)
    }

    pub async fn get_stats(&self) -> Option<ReceiverStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReceiverCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Stop receiving and wait for in-flight packets
    pub async fn shutdown(&self) -> Result<ReceiverStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReceiverCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("receiver stopped without acknowledging")
    }
}
