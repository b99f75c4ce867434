//! Account key resolution for legacy and v0 transactions.
//!
//! Balance arrays in `meta.preBalances` / `meta.postBalances` are indexed against the
//! full account list, which for v0 transactions includes addresses loaded from lookup tables.

use serde_json::Value;

/// Resolves the full account key list for a transaction.
///
/// The ordering matches the balance arrays: `message.accountKeys`, then
/// `meta.loadedAddresses.writable`, then `meta.loadedAddresses.readonly`.
///
/// Both encodings of `accountKeys` are accepted: plain strings (`json`) and objects with a
/// `pubkey` field (`jsonParsed`).
pub fn resolve_full_account_keys(tx: &Value) -> Vec<String> {
    let mut account_keys: Vec<String> = tx
        .pointer("/transaction/message/accountKeys")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(account_key_str).collect())
        .unwrap_or_default();

    if let Some(loaded) = tx.pointer("/meta/loadedAddresses") {
        for section in ["writable", "readonly"] {
            if let Some(addrs) = loaded.get(section).and_then(|v| v.as_array()) {
                account_keys.extend(addrs.iter().filter_map(|a| a.as_str().map(str::to_string)));
            }
        }
    }

    account_keys
}

fn account_key_str(key: &Value) -> Option<String> {
    key.as_str()
        .or_else(|| key.get("pubkey").and_then(|p| p.as_str()))
        .map(str::to_string)
}
