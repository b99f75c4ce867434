//! Balance-delta transfer analysis.
//!
//! A transfer is read off the ledger snapshot alone: the watched account's native balance
//! before and after the transaction. This works for any instruction mix (plain transfers,
//! CPI transfers, multi-instruction transactions) without decoding instructions.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::tx_record::{SolBalanceDelta, TxRecord};
use crate::watch::TransferDirection;

/// Normalized observation of one native transfer touching a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub signature: String,

    pub slot: u64,

    /// Absolute lamports moved, always >= the dust floor
    pub amount: u64,

    pub direction: TransferDirection,

    /// Block time (Unix seconds)
    pub timestamp: i64,

    /// Other side of the transfer, when it can be identified
    pub counterparty: Option<String>,

    /// Transaction fee (lamports)
    pub fee: u64,
}

/// Thresholds used by [`analyze_transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerParams {
    /// Minimum absolute delta treated as a real transfer
    pub dust_floor: u64,

    /// Allowed gap between sender loss and receiver gain (network fees)
    pub fee_tolerance: u64,
}

/// Derives the transfer seen by `watched` in `record`, or `None` if the transaction
/// is not a relevant transfer for that address.
pub fn analyze_transfer(
    record: &TxRecord,
    watched: &str,
    params: &AnalyzerParams,
) -> Option<TransferEvent> {
    if !record.is_success {
        return None;
    }

    let deltas = record.sol_deltas();
    let idx = record.account_index(watched)?;
    let own = deltas.get(idx)?.delta;

    if own.unsigned_abs() < params.dust_floor as u128 {
        return None;
    }

    let direction = if own > 0 {
        TransferDirection::Incoming
    } else {
        TransferDirection::Outgoing
    };

    let amount = u64::try_from(own.unsigned_abs()).ok()?;
    let timestamp = record.block_time.unwrap_or_else(now_unix);

    Some(TransferEvent {
        signature: record.signature.clone(),
        slot: record.slot,
        amount,
        direction,
        timestamp,
        counterparty: find_counterparty(&deltas, idx, own, params.fee_tolerance),
        fee: record.fee,
    })
}

/// Picks the other party of a transfer by balance sign. First match in account order wins.
///
/// * watched account gained: the first other account whose balance dropped.
/// * watched account lost: the first other account that gained, where
///   `gain + watched_delta < fee_tolerance` (the sender also paid the fee, so its loss
///   exceeds the receiver's gain by a small amount).
///
/// Several accounts may satisfy the rule in composed transactions; no attempt is made to
/// rank them. Returns `None` rather than guessing when nothing matches.
pub fn find_counterparty(
    deltas: &[SolBalanceDelta],
    watched_index: usize,
    watched_delta: i128,
    fee_tolerance: u64,
) -> Option<String> {
    let others = deltas.iter().filter(|d| d.account_index != watched_index);

    if watched_delta > 0 {
        others
            .filter(|d| d.delta < 0)
            .map(|d| d.account.clone())
            .next()
    } else {
        others
            .filter(|d| d.delta > 0 && d.delta + watched_delta < fee_tolerance as i128)
            .map(|d| d.account.clone())
            .next()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
