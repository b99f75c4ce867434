use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use schema::{WatchConfig, WatchDirection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of watch subscriptions for the scheduler.
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Point-in-time snapshot of every active watch across all owners.
    async fn list_active_watches(&self) -> Result<Vec<WatchConfig>>;
}

/// Filter fields that can be changed after creation. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
    pub min_amount: Option<Option<u64>>,
    pub max_amount: Option<Option<u64>>,
    pub direction: Option<WatchDirection>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WatchFile {
    watches: Vec<WatchConfig>,
}

/// Flat JSON file holding all watches.
pub struct JsonWatchStore {
    path: PathBuf,
}

impl JsonWatchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Assigns a fresh watch id, validates against `floor` and persists.
    pub fn add(&self, mut watch: WatchConfig, floor: u64) -> Result<WatchConfig> {
        watch.validate(floor).map_err(|e| anyhow!("{e}"))?;

        let mut file = self.load()?;
        let highest = file
            .watches
            .iter()
            .filter(|w| w.owner_id == watch.owner_id)
            .map(|w| w.watch_id)
            .max();
        watch.watch_id = next_watch_id(now_millis(), highest);
        watch.created_at = (now_millis() / 1000) as i64;

        file.watches.push(watch.clone());
        self.save(&file)?;
        Ok(watch)
    }

    pub fn list_for_owner(&self, owner_id: &str) -> Result<Vec<WatchConfig>> {
        Ok(self
            .load()?
            .watches
            .into_iter()
            .filter(|w| w.owner_id == owner_id)
            .collect())
    }

    pub fn remove(&self, owner_id: &str, watch_id: u64) -> Result<WatchConfig> {
        let mut file = self.load()?;
        let pos = file
            .watches
            .iter()
            .position(|w| w.owner_id == owner_id && w.watch_id == watch_id)
            .ok_or_else(|| anyhow!("watch {watch_id} not found for owner {owner_id}"))?;

        let removed = file.watches.remove(pos);
        self.save(&file)?;
        Ok(removed)
    }

    pub fn update_filters(
        &self,
        owner_id: &str,
        watch_id: u64,
        update: &FilterUpdate,
        floor: u64,
    ) -> Result<WatchConfig> {
        self.modify(owner_id, watch_id, |w| {
            if let Some(min) = update.min_amount {
                w.min_amount = min;
            }
            if let Some(max) = update.max_amount {
                w.max_amount = max;
            }
            if let Some(direction) = update.direction {
                w.direction = direction;
            }
            w.validate(floor).map_err(|e| anyhow!("{e}"))
        })
    }

    pub fn set_active(&self, owner_id: &str, watch_id: u64, active: bool) -> Result<WatchConfig> {
        self.modify(owner_id, watch_id, |w| {
            w.active = active;
            Ok(())
        })
    }

    fn modify<F>(&self, owner_id: &str, watch_id: u64, change: F) -> Result<WatchConfig>
    where
        F: FnOnce(&mut WatchConfig) -> Result<()>,
    {
        let mut file = self.load()?;
        let watch = file
            .watches
            .iter_mut()
            .find(|w| w.owner_id == owner_id && w.watch_id == watch_id)
            .ok_or_else(|| anyhow!("watch {watch_id} not found for owner {owner_id}"))?;

        // nothing is written if the change is rejected
        change(watch)?;
        let updated = watch.clone();

        self.save(&file)?;
        Ok(updated)
    }

    fn load(&self) -> Result<WatchFile> {
        if !self.path.exists() {
            return Ok(WatchFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read watch store {}", self.path.display()))?;
        parse_watch_file(&content, &self.path)
    }

    fn save(&self, file: &WatchFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write watch store {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace watch store {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl WatchStore for JsonWatchStore {
    async fn list_active_watches(&self) -> Result<Vec<WatchConfig>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read watch store {}", self.path.display()));
            }
        };

        Ok(parse_watch_file(&content, &self.path)?
            .watches
            .into_iter()
            .filter(|w| w.active)
            .collect())
    }
}

fn parse_watch_file(content: &str, path: &Path) -> Result<WatchFile> {
    if content.trim().is_empty() {
        return Ok(WatchFile::default());
    }
    serde_json::from_str(content)
        .with_context(|| format!("Failed to parse watch store {}", path.display()))
}

/// Time-based id that never repeats one already handed out to the owner.
fn next_watch_id(now_ms: u64, highest: Option<u64>) -> u64 {
    match highest {
        Some(h) if h >= now_ms => h + 1,
        _ => now_ms,
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
