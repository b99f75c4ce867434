//! Polling loop: snapshot watches, run them in paced batches, advance cursors.

use anyhow::Result;
use log::{debug, error, info, warn};
use schema::WatchConfig;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};

use crate::cursor::CursorStore;
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;
use crate::store::WatchStore;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub stats_every_ticks: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub watches: usize,
    pub batches: usize,
    pub failed_watches: usize,
    pub notified: usize,
}

pub struct Scheduler {
    store: Arc<dyn WatchStore>,
    pipeline: Arc<Pipeline>,
    cursors: CursorStore,
    settings: SchedulerSettings,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn WatchStore>,
        pipeline: Arc<Pipeline>,
        settings: SchedulerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            pipeline,
            cursors: CursorStore::new(),
            settings,
            metrics,
        }
    }

    #[cfg(test)]
    pub fn cursor(&self, key: &schema::WatchKey) -> Option<&str> {
        self.cursors.get(key)
    }

    /// Ticks until `shutdown` resolves. A tick is always awaited before the next one
    /// starts; ticks missed while a slow pass runs are skipped, not queued.
    ///
    /// Logs a final stats line and returns the number of cursors held at shutdown.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> usize {
        let poll_interval = self.settings.poll_interval;
        let mut timer = interval(poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "scheduler started: poll_interval={:?} batch_size={} batch_delay={:?}",
            poll_interval, self.settings.batch_size, self.settings.batch_delay
        );

        let mut tick_no = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = timer.tick() => {}
            }
            tick_no += 1;

            let started = Instant::now();
            tokio::select! {
                _ = &mut shutdown => break,
                res = self.run_tick() => match res {
                    Ok(report) => debug!(
                        "tick {} done in {:?}: watches={} batches={} failed={} notified={}",
                        tick_no,
                        started.elapsed(),
                        report.watches,
                        report.batches,
                        report.failed_watches,
                        report.notified
                    ),
                    Err(e) => error!("tick {tick_no} failed: {e:?}"),
                },
            }

            let elapsed = started.elapsed();
            if elapsed > poll_interval {
                warn!(
                    "tick {tick_no} took {elapsed:?}, longer than the {poll_interval:?} poll interval"
                );
            }

            if self.settings.stats_every_ticks > 0
                && tick_no % self.settings.stats_every_ticks == 0
            {
                self.metrics.log_stats(self.cursors.len());
            }
        }

        info!("scheduler stopped after {tick_no} ticks");
        self.metrics.log_stats(self.cursors.len());
        self.cursors.len()
    }

    /// One pass over the active watch set.
    pub async fn run_tick(&mut self) -> Result<TickReport> {
        Metrics::inc(&self.metrics.ticks);

        let mut watches = self.store.list_active_watches().await?;

        // one processing unit per watch per tick
        let mut seen = HashSet::new();
        watches.retain(|w| {
            let fresh = seen.insert(w.key());
            if !fresh {
                warn!("duplicate watch {} in store snapshot, ignoring copy", w.key());
            }
            fresh
        });

        let mut report = TickReport {
            watches: watches.len(),
            ..Default::default()
        };

        if !watches.is_empty() {
            let batch_size = self.settings.batch_size.max(1);
            for (i, batch) in watches.chunks(batch_size).enumerate() {
                if i > 0 && !self.settings.batch_delay.is_zero() {
                    sleep(self.settings.batch_delay).await;
                }
                self.run_batch(batch, &mut report).await;
                report.batches += 1;
            }
        }

        self.cursors.retain(&seen);
        Ok(report)
    }

    /// Runs every watch of `batch` as its own task and waits for all of them.
    async fn run_batch(&mut self, batch: &[WatchConfig], report: &mut TickReport) {
        let mut tasks = Vec::with_capacity(batch.len());

        for watch in batch {
            let key = watch.key();
            let cursor = self.cursors.get(&key).map(str::to_string);
            let pipeline = self.pipeline.clone();
            let watch = watch.clone();

            Metrics::inc(&self.metrics.watches_polled);
            let task = tokio::spawn(async move { pipeline.process_watch(&watch, cursor).await });
            tasks.push((key, task));
        }

        for (key, task) in tasks {
            match task.await {
                Ok(Ok(watch_report)) => {
                    if watch_report.new_signatures > 0 {
                        debug!(
                            "watch {key} processed new={} notified={} failed={}",
                            watch_report.new_signatures, watch_report.notified, watch_report.failed
                        );
                    }
                    report.notified += watch_report.notified;
                    if let Some(sig) = watch_report.next_cursor {
                        self.cursors.set(key, sig);
                    }
                }
                Ok(Err(e)) => {
                    Metrics::inc(&self.metrics.watch_errors);
                    report.failed_watches += 1;
                    warn!("watch {key} poll failed, retrying next tick: {e:?}");
                }
                Err(e) => {
                    Metrics::inc(&self.metrics.watch_errors);
                    report.failed_watches += 1;
                    error!("watch {key} task aborted: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::testing::{FakeChain, MemoryStore, RecordingChannel, watch};
    use schema::{AnalyzerParams, LAMPORTS_PER_SOL, WatchDirection};

    const SENDER: &str = "SenderWa11et1111111111111111111111111111111";
    const ADDR_A: &str = "WatchedA111111111111111111111111111111111111";
    const ADDR_B: &str = "WatchedB111111111111111111111111111111111111";
    const ADDR_C: &str = "WatchedC111111111111111111111111111111111111";

    struct Harness {
        chain: Arc<FakeChain>,
        store: Arc<MemoryStore>,
        channel: Arc<RecordingChannel>,
        metrics: Arc<Metrics>,
        scheduler: Scheduler,
    }

    fn harness(watches: Vec<WatchConfig>, batch_size: usize) -> Harness {
        paced_harness(watches, batch_size, Duration::ZERO)
    }

    fn paced_harness(watches: Vec<WatchConfig>, batch_size: usize, batch_delay: Duration) -> Harness {
        let chain = Arc::new(FakeChain::new());
        let store = Arc::new(MemoryStore::with(watches));
        let channel = Arc::new(RecordingChannel::new());
        let metrics = Arc::new(Metrics::new());

        let pipeline = Arc::new(Pipeline {
            chain: chain.clone(),
            dispatcher: Dispatcher::new(channel.clone(), "https://solscan.io", metrics.clone()),
            analyzer: AnalyzerParams {
                dust_floor: 1_000,
                fee_tolerance: 10_000,
            },
            min_notify: 1_000_000,
            lookback: 5,
            metrics: metrics.clone(),
        });

        let settings = SchedulerSettings {
            poll_interval: Duration::from_millis(50),
            batch_size,
            batch_delay,
            stats_every_ticks: 0,
        };

        let scheduler = Scheduler::new(store.clone(), pipeline, settings, metrics.clone());
        Harness {
            chain,
            store,
            channel,
            metrics,
            scheduler,
        }
    }

    fn sol(n: u64) -> u64 {
        n * LAMPORTS_PER_SOL
    }

    #[tokio::test]
    async fn test_cold_start_never_notifies() {
        let mut h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s2", "s1"]);
        h.chain.add_transfer("s2", SENDER, ADDR_A, sol(5));
        h.chain.add_transfer("s1", SENDER, ADDR_A, sol(3));

        let report = h.scheduler.run_tick().await.unwrap();

        assert_eq!(report.notified, 0);
        assert!(h.channel.sent().is_empty());
        assert!(h.chain.fetched().is_empty());
        assert_eq!(h.scheduler.cursor(&watch("42", 1, ADDR_A).key()), Some("s2"));
        assert_eq!(h.metrics.snapshot().cold_starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_paced_without_trailing_delay() {
        let addrs: Vec<String> = (0..7)
            .map(|i| format!("Watched{i}1111111111111111111111111111111111111"))
            .collect();
        let watches = addrs
            .iter()
            .enumerate()
            .map(|(i, a)| watch("42", i as u64 + 1, a))
            .collect();
        let mut h = paced_harness(watches, 3, Duration::from_secs(1));
        for a in &addrs {
            h.chain.set_signatures(a, &["s1"]);
        }

        let started = Instant::now();
        let report = h.scheduler.run_tick().await.unwrap();

        // 3 batches, a pause before the second and third only
        assert_eq!(report.batches, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));

        let polled = h.chain.polled();
        assert_eq!(polled.len(), 7);
        let mut last_batch = 0;
        for (address, at) in &polled {
            let batch = addrs.iter().position(|a| a == address).unwrap() / 3;
            assert!(batch >= last_batch, "batch {batch} polled after batch {last_batch}");
            assert_eq!(*at - started, Duration::from_secs(batch as u64));
            last_batch = batch;
        }
    }

    #[tokio::test]
    async fn test_unchanged_latest_is_a_no_op() {
        let mut h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s1"]);
        h.chain.add_transfer("s1", SENDER, ADDR_A, sol(1));

        h.scheduler.run_tick().await.unwrap();
        h.scheduler.run_tick().await.unwrap();

        assert!(h.chain.fetched().is_empty());
        assert!(h.channel.sent().is_empty());
        // only the latest-signature probe on each tick
        assert_eq!(h.chain.signature_limits(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_new_transfers_delivered_oldest_first() {
        let mut h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s0"]);
        h.scheduler.run_tick().await.unwrap();

        h.chain.set_signatures(ADDR_A, &["s3", "s2", "s1", "s0"]);
        h.chain.add_transfer("s1", SENDER, ADDR_A, sol(1));
        h.chain.add_transfer("s2", SENDER, ADDR_A, sol(2));
        h.chain.add_transfer("s3", SENDER, ADDR_A, sol(3));

        let report = h.scheduler.run_tick().await.unwrap();

        assert_eq!(report.notified, 3);
        assert_eq!(h.chain.fetched(), vec!["s1", "s2", "s3"]);
        let sent = h.channel.sent();
        assert!(sent[0].1.contains("<b>1 SOL</b>"));
        assert!(sent[1].1.contains("<b>2 SOL</b>"));
        assert!(sent[2].1.contains("<b>3 SOL</b>"));
        assert_eq!(h.scheduler.cursor(&watch("42", 1, ADDR_A).key()), Some("s3"));
    }

    #[tokio::test]
    async fn test_gap_beyond_lookback_is_dropped() {
        let mut h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s1"]);
        h.scheduler.run_tick().await.unwrap();

        let sigs = ["s8", "s7", "s6", "s5", "s4", "s3", "s2", "s1"];
        h.chain.set_signatures(ADDR_A, &sigs);
        for s in &sigs[..7] {
            h.chain.add_transfer(s, SENDER, ADDR_A, sol(1));
        }

        let report = h.scheduler.run_tick().await.unwrap();

        assert_eq!(report.failed_watches, 0);
        assert_eq!(report.notified, 5);
        assert_eq!(h.chain.fetched(), vec!["s4", "s5", "s6", "s7", "s8"]);
        assert_eq!(h.scheduler.cursor(&watch("42", 1, ADDR_A).key()), Some("s8"));
    }

    #[tokio::test]
    async fn test_failing_watch_does_not_block_siblings() {
        let mut h = harness(
            vec![
                watch("1", 1, ADDR_A),
                watch("2", 1, ADDR_B),
                watch("3", 1, ADDR_C),
            ],
            3,
        );
        h.chain.fail_address(ADDR_A);
        h.chain.panic_on(ADDR_B);
        h.chain.set_signatures(ADDR_C, &["c0"]);

        let first = h.scheduler.run_tick().await.unwrap();
        assert_eq!(first.failed_watches, 2);

        h.chain.set_signatures(ADDR_C, &["c1", "c0"]);
        h.chain.add_transfer("c1", SENDER, ADDR_C, sol(2));

        let second = h.scheduler.run_tick().await.unwrap();

        assert_eq!(second.batches, 1);
        assert_eq!(second.failed_watches, 2);
        assert_eq!(second.notified, 1);
        assert_eq!(h.channel.sent().len(), 1);
        assert_eq!(h.channel.sent()[0].0, "3");
        assert_eq!(h.scheduler.cursor(&watch("1", 1, ADDR_A).key()), None);
        assert_eq!(h.metrics.snapshot().watch_errors, 4);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_advances_cursor() {
        let mut h = harness(vec![watch("13", 1, ADDR_A), watch("42", 2, ADDR_B)], 1);
        h.channel.fail_for("13");
        h.chain.set_signatures(ADDR_A, &["a0"]);
        h.chain.set_signatures(ADDR_B, &["b0"]);
        h.scheduler.run_tick().await.unwrap();

        h.chain.set_signatures(ADDR_A, &["a1", "a0"]);
        h.chain.set_signatures(ADDR_B, &["b1", "b0"]);
        h.chain.add_transfer("a1", SENDER, ADDR_A, sol(1));
        h.chain.add_transfer("b1", SENDER, ADDR_B, sol(1));

        let report = h.scheduler.run_tick().await.unwrap();

        assert_eq!(report.batches, 2);
        assert_eq!(report.notified, 1);
        assert_eq!(h.scheduler.cursor(&watch("13", 1, ADDR_A).key()), Some("a1"));
        assert_eq!(h.metrics.snapshot().delivery_failures, 1);

        // not retried on the next tick
        h.scheduler.run_tick().await.unwrap();
        assert_eq!(h.chain.fetched(), vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn test_filters_apply_per_watch() {
        let mut incoming_only = watch("42", 1, ADDR_A);
        incoming_only.direction = WatchDirection::Incoming;
        let mut h = harness(vec![incoming_only], 3);
        h.chain.set_signatures(ADDR_A, &["s0"]);
        h.scheduler.run_tick().await.unwrap();

        h.chain.set_signatures(ADDR_A, &["s2", "s1", "s0"]);
        h.chain.add_transfer("s1", ADDR_A, SENDER, sol(4));
        h.chain.add_transfer("s2", SENDER, ADDR_A, sol(4));

        let report = h.scheduler.run_tick().await.unwrap();

        assert_eq!(report.notified, 1);
        assert!(h.channel.sent()[0].1.contains("Incoming transfer"));
        assert_eq!(h.metrics.snapshot().suppressed, 1);
    }

    #[tokio::test]
    async fn test_store_failure_fails_tick_only() {
        let mut h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s1"]);
        h.scheduler.run_tick().await.unwrap();

        *h.store.fail.lock().unwrap() = true;
        assert!(h.scheduler.run_tick().await.is_err());
        assert_eq!(h.scheduler.cursor(&watch("42", 1, ADDR_A).key()), Some("s1"));

        *h.store.fail.lock().unwrap() = false;
        assert!(h.scheduler.run_tick().await.is_ok());
    }

    #[tokio::test]
    async fn test_paused_watch_reseeds_on_resume() {
        let mut h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s1"]);
        h.scheduler.run_tick().await.unwrap();

        h.store.watches.lock().unwrap()[0].active = false;
        let report = h.scheduler.run_tick().await.unwrap();
        assert_eq!(report.watches, 0);
        assert_eq!(h.scheduler.cursor(&watch("42", 1, ADDR_A).key()), None);

        h.chain.set_signatures(ADDR_A, &["s2", "s1"]);
        h.chain.add_transfer("s2", SENDER, ADDR_A, sol(1));
        h.store.watches.lock().unwrap()[0].active = true;
        h.scheduler.run_tick().await.unwrap();

        assert!(h.channel.sent().is_empty());
        assert_eq!(h.scheduler.cursor(&watch("42", 1, ADDR_A).key()), Some("s2"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(vec![watch("42", 1, ADDR_A)], 3);
        h.chain.set_signatures(ADDR_A, &["s1"]);
        let metrics = h.metrics.clone();

        let cursors = h
            .scheduler
            .run(tokio::time::sleep(Duration::from_millis(120)))
            .await;

        assert!(metrics.snapshot().ticks >= 1);
        // the cold-started watch keeps its cursor up to shutdown
        assert_eq!(cursors, 1);
    }
}
