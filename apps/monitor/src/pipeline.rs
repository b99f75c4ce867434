use anyhow::Result;
use log::{debug, info, warn};
use schema::{AnalyzerParams, FilterDecision, WatchConfig, analyze_transfer, evaluate};
use std::sync::Arc;

use crate::differ::{self, DiffOutcome};
use crate::dispatch::Dispatcher;
use crate::metrics::Metrics;
use crate::rpc::ChainClient;

/// Per-watch processing: diff -> analyze -> filter -> dispatch.
pub struct Pipeline {
    pub chain: Arc<dyn ChainClient>,
    pub dispatcher: Dispatcher,
    pub analyzer: AnalyzerParams,
    /// Global notification floor (lamports)
    pub min_notify: u64,
    pub lookback: usize,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchReport {
    pub next_cursor: Option<String>,
    pub new_signatures: usize,
    pub notified: usize,
    pub failed: usize,
}

impl Pipeline {
    /// Processes everything new for `watch` since `cursor`, oldest first.
    ///
    /// Individual transaction failures are logged and counted; they do not stop the
    /// remaining signatures nor the cursor advance reported in `next_cursor`.
    pub async fn process_watch(
        &self,
        watch: &WatchConfig,
        cursor: Option<String>,
    ) -> Result<WatchReport> {
        let outcome = differ::diff(
            self.chain.as_ref(),
            &watch.address,
            cursor.as_deref(),
            self.lookback,
        )
        .await?;

        let mut report = WatchReport {
            next_cursor: outcome.next_cursor().map(str::to_string),
            ..Default::default()
        };

        match outcome {
            DiffOutcome::NoActivity | DiffOutcome::Unchanged => {}
            DiffOutcome::ColdStart { latest } => {
                Metrics::inc(&self.metrics.cold_starts);
                info!(
                    "cold start owner={} watch={} address={} seeded_at={}",
                    watch.owner_id, watch.watch_id, watch.address, latest
                );
            }
            DiffOutcome::New { signatures, .. } => {
                report.new_signatures = signatures.len();
                for sig in &signatures {
                    match self.process_signature(watch, sig).await {
                        Ok(true) => report.notified += 1,
                        Ok(false) => {}
                        Err(e) => {
                            report.failed += 1;
                            warn!(
                                "transaction processing failed owner={} watch={} sig={}: {e:?}",
                                watch.owner_id, watch.watch_id, sig
                            );
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Returns whether a notification went out for `signature`.
    async fn process_signature(&self, watch: &WatchConfig, signature: &str) -> Result<bool> {
        let Some(record) = self.chain.fetch_transaction(signature).await? else {
            debug!("transaction not available sig={signature}, skipping");
            return Ok(false);
        };
        Metrics::inc(&self.metrics.tx_fetched);

        let Some(event) = analyze_transfer(&record, &watch.address, &self.analyzer) else {
            debug!(
                "no relevant transfer sig={} address={}",
                signature, watch.address
            );
            return Ok(false);
        };
        Metrics::inc(&self.metrics.transfers_detected);

        match evaluate(&event, watch, self.min_notify) {
            FilterDecision::Notify => Ok(self.dispatcher.dispatch(watch, &event).await),
            FilterDecision::Suppress(reason) => {
                Metrics::inc(&self.metrics.suppressed);
                debug!(
                    "suppressed sig={} owner={} watch={} amount={} reason={:?}",
                    signature, watch.owner_id, watch.watch_id, event.amount, reason
                );
                Ok(false)
            }
        }
    }
}
