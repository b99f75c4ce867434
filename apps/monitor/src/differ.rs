//! Incremental signature diffing against the per-watch cursor.

use anyhow::Result;
use log::{debug, warn};

use crate::rpc::ChainClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// The address has never transacted.
    NoActivity,

    /// First poll of this watch: cursor gets seeded, nothing is reported.
    ColdStart { latest: String },

    /// Latest signature equals the cursor.
    Unchanged,

    /// Signatures newer than the cursor, oldest first.
    New {
        latest: String,
        signatures: Vec<String>,
    },
}

impl DiffOutcome {
    /// Signature the cursor should advance to once the outcome has been handled.
    pub fn next_cursor(&self) -> Option<&str> {
        match self {
            DiffOutcome::ColdStart { latest } | DiffOutcome::New { latest, .. } => {
                Some(latest.as_str())
            }
            DiffOutcome::NoActivity | DiffOutcome::Unchanged => None,
        }
    }
}

/// Works out which signatures of `address` are new since `cursor`.
///
/// Only the `lookback` most recent signatures are examined; anything older than the
/// window is skipped without error.
pub async fn diff(
    chain: &dyn ChainClient,
    address: &str,
    cursor: Option<&str>,
    lookback: usize,
) -> Result<DiffOutcome> {
    let Some(latest) = chain.latest_signature(address).await? else {
        return Ok(DiffOutcome::NoActivity);
    };

    let Some(cursor) = cursor else {
        return Ok(DiffOutcome::ColdStart { latest });
    };

    if latest == cursor {
        return Ok(DiffOutcome::Unchanged);
    }

    let window = match chain.recent_signatures(address, lookback.max(1)).await {
        Ok(window) => window,
        Err(e) => {
            // cursor still moves to `latest`; the window is lost
            warn!("signature window fetch failed address={address} latest={latest}: {e:?}");
            return Ok(DiffOutcome::New {
                latest,
                signatures: Vec::new(),
            });
        }
    };

    if latest_is_unreliable(&window, &latest, cursor) {
        debug!(
            "latest signature disagrees with window address={address} latest={latest} cursor={cursor}, holding cursor"
        );
        return Ok(DiffOutcome::Unchanged);
    }

    let signatures = collect_since(&window, &latest, cursor);
    Ok(DiffOutcome::New { latest, signatures })
}

/// True when `latest` and `window` were answered by nodes that disagree: the window holds
/// `cursor` but either ranks it above `latest` or does not contain `latest` at all.
/// Moving the cursor in that state could rewind it or skip signatures, so the watch waits
/// for the next tick instead.
fn latest_is_unreliable(window: &[String], latest: &str, cursor: &str) -> bool {
    let position = |sig: &str| window.iter().position(|s| s == sig);
    match (position(cursor), position(latest)) {
        (Some(c), Some(l)) => c < l,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Scans a newest-first `window` from `latest` down to (excluding) `cursor` and returns
/// the result oldest first.
///
/// Signatures that landed after `latest` was read are left for the next poll. If `cursor`
/// is not in the window, everything from `latest` to the end of the window is returned.
pub fn collect_since(window: &[String], latest: &str, cursor: &str) -> Vec<String> {
    let start = window.iter().position(|s| s == latest).unwrap_or(0);

    let mut out: Vec<String> = window[start..]
        .iter()
        .take_while(|s| s.as_str() != cursor)
        .cloned()
        .collect();
    out.reverse();
    out
}
