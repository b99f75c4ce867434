use schema::WatchKey;
use std::collections::{HashMap, HashSet};

/// Last processed signature per watch. Lives only as long as the process.
#[derive(Debug, Default)]
pub struct CursorStore {
    last_seen: HashMap<WatchKey, String>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &WatchKey) -> Option<&str> {
        self.last_seen.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: WatchKey, signature: String) {
        self.last_seen.insert(key, signature);
    }

    /// Drops cursors of watches that are no longer active.
    pub fn retain(&mut self, active: &HashSet<WatchKey>) {
        self.last_seen.retain(|k, _| active.contains(k));
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }
}
