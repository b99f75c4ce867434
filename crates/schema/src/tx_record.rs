//! TxRecord: the ledger-level facts of one transaction.
//!
//! Only what balance-delta analysis needs is extracted: the full account list and the
//! native balances before and after execution. Instruction data is never inspected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alt_resolver::resolve_full_account_keys;

/// Native balance change of a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolBalanceDelta {
    /// Index into the full account list
    pub account_index: usize,

    /// Account pubkey
    pub account: String,

    /// Post-transaction minus pre-transaction lamports
    pub delta: i128,
}

/// Resolved transaction as returned by `getTransaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    /// Transaction signature
    pub signature: String,

    /// Slot number
    pub slot: u64,

    /// Block timestamp (Unix seconds)
    pub block_time: Option<i64>,

    /// Whether the transaction succeeded (`meta.err` is null)
    pub is_success: bool,

    /// Fee paid by the fee payer (lamports)
    pub fee: u64,

    /// Full account keys (accountKeys + loadedAddresses for v0)
    pub account_keys: Vec<String>,

    /// Lamports per account before execution
    pub pre_balances: Vec<u64>,

    /// Lamports per account after execution
    pub post_balances: Vec<u64>,
}

impl TxRecord {
    /// Extracts a record from `getTransaction` JSON.
    ///
    /// Returns `None` when the transaction carries no `meta`, or when either balance array
    /// is missing or holds an entry that is not a lamport count.
    pub fn from_json(tx: &Value, signature: &str) -> Option<Self> {
        let meta = tx.get("meta").filter(|m| m.is_object())?;

        let balances = |field: &str| -> Option<Vec<u64>> {
            meta.get(field)?
                .as_array()?
                .iter()
                .map(|b| b.as_u64())
                .collect()
        };
        let pre_balances = balances("preBalances")?;
        let post_balances = balances("postBalances")?;

        Some(Self {
            signature: signature.to_string(),
            slot: tx.get("slot").and_then(|v| v.as_u64()).unwrap_or(0),
            block_time: tx.get("blockTime").and_then(|v| v.as_i64()),
            is_success: meta.get("err").map(|e| e.is_null()).unwrap_or(true),
            fee: meta.get("fee").and_then(|v| v.as_u64()).unwrap_or(0),
            account_keys: resolve_full_account_keys(tx),
            pre_balances,
            post_balances,
        })
    }

    /// Position of `address` in the full account list.
    pub fn account_index(&self, address: &str) -> Option<usize> {
        self.account_keys.iter().position(|k| k == address)
    }

    /// Balance change for every account that has both a pre and a post balance.
    ///
    /// Unchanged accounts are kept so indices stay aligned with `account_keys`.
    pub fn sol_deltas(&self) -> Vec<SolBalanceDelta> {
        let n = self
            .account_keys
            .len()
            .min(self.pre_balances.len())
            .min(self.post_balances.len());

        (0..n)
            .map(|i| SolBalanceDelta {
                account_index: i,
                account: self.account_keys[i].clone(),
                delta: self.post_balances[i] as i128 - self.pre_balances[i] as i128,
            })
            .collect()
    }
}
