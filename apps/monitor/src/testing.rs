//! In-memory collaborators for unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use schema::{TxRecord, WatchConfig, WatchDirection};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::delivery::DeliveryChannel;
use crate::rpc::ChainClient;
use crate::store::WatchStore;

#[derive(Default)]
struct ChainState {
    signatures: HashMap<String, Vec<String>>,
    transactions: HashMap<String, TxRecord>,
    failing: HashSet<String>,
    failing_window: HashSet<String>,
    panicking: HashSet<String>,
    signature_limits: Vec<usize>,
    polled: Vec<(String, Instant)>,
    fetched: Vec<String>,
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first, like `getSignaturesForAddress`.
    pub fn set_signatures(&self, address: &str, sigs: &[&str]) {
        self.state.lock().unwrap().signatures.insert(
            address.to_string(),
            sigs.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Registers a plain lamport transfer `from -> to` under `signature`.
    pub fn add_transfer(&self, signature: &str, from: &str, to: &str, lamports: u64) {
        let fee = 5_000;
        let record = TxRecord {
            signature: signature.to_string(),
            slot: 250_000_000,
            block_time: Some(1_703_001_100),
            is_success: true,
            fee,
            account_keys: vec![
                from.to_string(),
                to.to_string(),
                "11111111111111111111111111111111".to_string(),
            ],
            pre_balances: vec![50_000_000_000, 1_000_000_000, 1],
            post_balances: vec![50_000_000_000 - lamports - fee, 1_000_000_000 + lamports, 1],
        };
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(signature.to_string(), record);
    }

    pub fn fail_address(&self, address: &str) {
        self.state.lock().unwrap().failing.insert(address.to_string());
    }

    pub fn fail_window_for(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_window
            .insert(address.to_string());
    }

    pub fn panic_on(&self, address: &str) {
        self.state.lock().unwrap().panicking.insert(address.to_string());
    }

    pub fn signature_limits(&self) -> Vec<usize> {
        self.state.lock().unwrap().signature_limits.clone()
    }

    /// Every signature lookup as `(address, time)`, in call order.
    pub fn polled(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().polled.clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn recent_signatures(&self, address: &str, limit: usize) -> Result<Vec<String>> {
        // checked before taking the guard so a panic does not poison the mutex
        let panics = self.state.lock().unwrap().panicking.contains(address);
        if panics {
            panic!("fake chain panic for {address}");
        }

        let mut state = self.state.lock().unwrap();
        state.signature_limits.push(limit);
        state.polled.push((address.to_string(), Instant::now()));

        if state.failing.contains(address) || (limit > 1 && state.failing_window.contains(address))
        {
            return Err(anyhow!("RPC rate limited after 6 attempts"));
        }

        Ok(state
            .signatures
            .get(address)
            .map(|s| s.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Option<TxRecord>> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(signature.to_string());
        Ok(state.transactions.get(signature).cloned())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub watches: Mutex<Vec<WatchConfig>>,
    pub fail: Mutex<bool>,
}

impl MemoryStore {
    pub fn with(watches: Vec<WatchConfig>) -> Self {
        Self {
            watches: Mutex::new(watches),
            fail: Mutex::new(false),
        }
    }
}

#[async_trait]
impl WatchStore for MemoryStore {
    async fn list_active_watches(&self) -> Result<Vec<WatchConfig>> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("store unavailable"));
        }
        Ok(self
            .watches
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.active)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send(&self, recipient_id: &str, message: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(recipient_id) {
            return Err(anyhow!("telegram sendMessage failed: chat not found"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient_id.to_string(), message.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn watch(owner: &str, id: u64, address: &str) -> WatchConfig {
    WatchConfig {
        owner_id: owner.to_string(),
        watch_id: id,
        label: format!("watch {id}"),
        address: address.to_string(),
        min_amount: None,
        max_amount: None,
        direction: WatchDirection::Both,
        active: true,
        created_at: 1_703_000_000,
    }
}
