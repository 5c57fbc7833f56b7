//! Message types for actor communication
//!
//! This module defines all message types used for communication between actors.
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Acknowledged shutdown**: `Shutdown` carries a oneshot so the caller can
//!    wait until the actor has drained, which is what makes the hub's shutdown
//!    order (receiver, monitor, dispatcher) meaningful

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::alerting::AlertState;
use crate::storage::StorageResult;
use crate::{AlertEvent, EntityType};

/// Commands that can be sent to the BatchDispatcher
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Append an alert to the pending batch, arming the batch timer if idle
    Queue { alert: AlertEvent },

    /// Deliver the pending batch immediately
    FlushNow {
        /// Number of deliveries started by this flush
        respond_to: oneshot::Sender<usize>,
    },

    GetStats {
        respond_to: oneshot::Sender<DispatcherStats>,
    },

    /// Flush, wait for in-flight deliveries (up to the shutdown grace), stop
    Shutdown {
        respond_to: oneshot::Sender<DispatcherStats>,
    },
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Alerts waiting for the batch timer
    pub pending: usize,

    /// Delivery tasks not yet joined
    pub in_flight: usize,

    /// Whether the batch timer is armed
    pub timer_armed: bool,

    /// Completed batch flushes (timer, manual and shutdown)
    pub flushes: u64,

    pub delivered: u64,
    pub failed: u64,

    /// Deliveries cut off at shutdown
    pub aborted: u64,
}

/// Commands that can be sent to the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// The ingestion path created an entity
    NewEntity {
        entity_key: String,
        entity_type: EntityType,
        at: i64,
        metadata: Value,
    },

    /// Run a detector sweep now, bypassing the interval timer
    CheckNow {
        respond_to: oneshot::Sender<StorageResult<SweepReport>>,
    },

    /// Current alert state of one entity (`None` if not tracked)
    GetAlertState {
        entity_key: String,
        respond_to: oneshot::Sender<Option<AlertState>>,
    },

    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Outcome of one detector sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entities inspected
    pub checked: usize,

    /// Status flips written to the store
    pub transitions: usize,

    /// Alerts handed to the dispatcher
    pub alerts_queued: usize,
}

/// Commands that can be sent to the UDP receiver
#[derive(Debug)]
pub enum ReceiverCommand {
    GetStats {
        respond_to: oneshot::Sender<ReceiverStats>,
    },

    /// Stop receiving and wait for in-flight packets
    Shutdown {
        respond_to: oneshot::Sender<ReceiverStats>,
    },
}

/// Receiver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,

    /// Packet tasks not yet joined
    pub in_flight: usize,
}
