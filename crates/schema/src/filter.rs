//! Per-watch notification filter.

use crate::transfer::TransferEvent;
use crate::watch::WatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Notify,
    Suppress(SuppressReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    BelowGlobalFloor,
    BelowMinAmount,
    AboveMaxAmount,
    DirectionMismatch,
}

impl FilterDecision {
    pub fn is_notify(self) -> bool {
        self == FilterDecision::Notify
    }
}

/// Decides whether `event` is worth a notification for `watch`.
///
/// Checks run in a fixed order and stop at the first failure. `global_floor` applies
/// even when the stored `min_amount` is lower, so stale records cannot bypass it.
pub fn evaluate(event: &TransferEvent, watch: &WatchConfig, global_floor: u64) -> FilterDecision {
    if event.amount < global_floor {
        return FilterDecision::Suppress(SuppressReason::BelowGlobalFloor);
    }
    if let Some(min) = watch.min_amount {
        if event.amount < min {
            return FilterDecision::Suppress(SuppressReason::BelowMinAmount);
        }
    }
    if let Some(max) = watch.max_amount {
        if event.amount > max {
            return FilterDecision::Suppress(SuppressReason::AboveMaxAmount);
        }
    }
    if !watch.direction.matches(event.direction) {
        return FilterDecision::Suppress(SuppressReason::DirectionMismatch);
    }
    FilterDecision::Notify
}
