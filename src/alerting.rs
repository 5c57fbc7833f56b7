//! Alert debounce and cooldown state machine
//!
//! Each tracked entity carries one [`AlertState`]. The monitor actor feeds it
//! inputs (status flips, new-entity notices, periodic ticks, cooldown lookup
//! results) through [`step`] and carries out the returned [`Effect`]s. `step`
//! is pure: no I/O, no clock reads.
//!
//! ```text
//!             StatusChanged                 Tick (grace elapsed)
//!   Stable ─────────────────> PendingGrace ─────────────────────> Eligible
//!     ^                          │ StatusChanged back                 │
//!     ├──────────────────────────┘ (Flapped)                          │ CooldownResolved
//!     ├────────────────────────────────────────── blocked / failed ───┤
//!     │        Tick (cooldown elapsed)                                 │ clear
//!     └──────────────────────────── CoolingDown <──────────────────────┘
//! ```

use crate::{EntityStatus, EventType};

/// Default anti-flap grace period in seconds
pub const DEFAULT_GRACE_PERIOD: i64 = 120;

/// Default per-(entity, event) cooldown in seconds
pub const DEFAULT_COOLDOWN: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    /// How long a status change must hold before it may alert
    pub grace_period: i64,

    /// Minimum spacing between two alerts of the same event for one entity
    pub cooldown: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    /// Nothing pending
    #[default]
    Stable,

    /// Status changed at `changed_at`; waiting out the grace period
    PendingGrace { event: EventType, changed_at: i64 },

    /// Grace passed (or bypassed); waiting for the cooldown lookup
    Eligible { event: EventType, changed_at: i64 },

    /// Alert queued at `sent_at`
    CoolingDown { event: EventType, sent_at: i64 },
}

impl AlertState {
    /// True if the state carries no pending work and no recent alert
    pub fn is_stable(&self) -> bool {
        matches!(self, AlertState::Stable)
    }
}

/// Result of reading the persisted cooldown for an (entity, event) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownLookup {
    /// No alert of this event was ever sent
    Never,

    /// Last alert was sent at this time
    SentAt(i64),

    /// The store could not answer
    Failed,
}

impl From<Option<i64>> for CooldownLookup {
    fn from(last_sent: Option<i64>) -> Self {
        match last_sent {
            Some(at) => CooldownLookup::SentAt(at),
            None => CooldownLookup::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertInput {
    /// The detector flipped the stored status
    StatusChanged { status: EntityStatus, at: i64 },

    /// The first sample for this entity was stored
    NewEntity { at: i64 },

    /// Periodic evaluation
    Tick,

    CooldownResolved(CooldownLookup),
}

/// Why an alert was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Status changed back before the grace period elapsed
    Flapped,

    /// Same event was alerted within the cooldown window
    Cooldown,

    /// Cooldown could not be read; never risk a duplicate
    LookupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Read the last send time for `event` and answer with `CooldownResolved`
    LookupCooldown { event: EventType },

    /// Persist the cooldown and hand the alert to the dispatcher
    Queue { event: EventType, changed_at: i64 },

    /// Drop the pending alert
    Suppressed {
        event: EventType,
        reason: SuppressReason,
    },
}

/// Advance one entity's alert state
pub fn step(
    state: AlertState,
    input: AlertInput,
    now: i64,
    policy: &AlertPolicy,
) -> (AlertState, Vec<Effect>) {
    use AlertInput::*;
    use AlertState::*;

    match (state, input) {
        (_, NewEntity { at }) => (
            Eligible {
                event: EventType::NewEntity,
                changed_at: at,
            },
            vec![Effect::LookupCooldown {
                event: EventType::NewEntity,
            }],
        ),

        (PendingGrace { event, .. }, StatusChanged { status, .. })
            if EventType::from(status) == event =>
        {
            (state, vec![])
        }
        (PendingGrace { event, .. }, StatusChanged { .. }) => (
            Stable,
            vec![Effect::Suppressed {
                event,
                reason: SuppressReason::Flapped,
            }],
        ),

        // Unreachable from the actor, which resolves lookups synchronously;
        // the newer change wins.
        (Eligible { event, .. }, StatusChanged { status, at }) if EventType::from(status) != event => (
            PendingGrace {
                event: status.into(),
                changed_at: at,
            },
            vec![Effect::Suppressed {
                event,
                reason: SuppressReason::Flapped,
            }],
        ),
        (Eligible { .. }, StatusChanged { .. }) => (state, vec![]),

        (Stable | CoolingDown { .. }, StatusChanged { status, at }) => (
            PendingGrace {
                event: status.into(),
                changed_at: at,
            },
            vec![],
        ),

        (PendingGrace { event, changed_at }, Tick)
            if now.saturating_sub(changed_at) >= policy.grace_period =>
        {
            (
                Eligible { event, changed_at },
                vec![Effect::LookupCooldown { event }],
            )
        }
        (CoolingDown { sent_at, .. }, Tick) if now.saturating_sub(sent_at) >= policy.cooldown => {
            (Stable, vec![])
        }
        (_, Tick) => (state, vec![]),

        (Eligible { event, changed_at }, CooldownResolved(lookup)) => match lookup {
            CooldownLookup::SentAt(last) if now.saturating_sub(last) < policy.cooldown => (
                Stable,
                vec![Effect::Suppressed {
                    event,
                    reason: SuppressReason::Cooldown,
                }],
            ),
            CooldownLookup::Never | CooldownLookup::SentAt(_) => (
                CoolingDown {
                    event,
                    sent_at: now,
                },
                vec![Effect::Queue { event, changed_at }],
            ),
            CooldownLookup::Failed => (
                Stable,
                vec![Effect::Suppressed {
                    event,
                    reason: SuppressReason::LookupFailed,
                }],
            ),
        },
        (_, CooldownResolved(_)) => (state, vec![]),
    }
}
