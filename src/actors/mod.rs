//! Actor-based ingestion and alerting
//!
//! Each actor runs as an independent async task, owns its state, and is driven
//! through a cloneable handle wrapping an mpsc command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!            UDP datagrams
//!                 │
//!       ┌─────────▼─────────┐   touch_entity    ┌──────────────┐
//!       │  ReceiverActor    │ ────────────────> │              │
//!       │  (task per packet)│                   │ StatusStore  │
//!       └─────────┬─────────┘                   │              │
//!                 │ NewEntity                   │ (memory /    │
//!       ┌─────────▼─────────┐   list / CAS      │  sqlite)     │
//!       │  MonitorActor     │ <───────────────> │              │
//!       │  detector + FSM   │                   │              │
//!       └─────────┬─────────┘                   │              │
//!                 │ Queue                       │              │
//!       ┌─────────▼─────────┐   record_delivery │              │
//!       │  BatchDispatcher  │ ────────────────> │              │
//!       └─────────┬─────────┘                   └──────────────┘
//!                 │ (alert × sink) tasks
//!                 ▼
//!        Discord / webhook sinks
//! ```
//!
//! ## Actor Types
//!
//! - **ReceiverActor**: Reads the UDP socket, spawns one bounded task per packet
//! - **MonitorActor**: Single writer for entity status; runs the detector on a
//!   timer and owns every entity's alert state machine
//! - **BatchDispatcher**: Batches alerts and delivers them to matching sinks
//!
//! ## Shutdown
//!
//! Handles acknowledge `shutdown()` only after the actor has drained, so the
//! hub stops them in dependency order: receiver, monitor, dispatcher.

pub mod dispatcher;
pub mod messages;
pub mod monitor;
pub mod receiver;
