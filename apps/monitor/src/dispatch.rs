use chrono::DateTime;
use log::{debug, warn};
use schema::{TransferDirection, TransferEvent, WatchConfig, format_sol};
use std::sync::Arc;

use crate::delivery::DeliveryChannel;
use crate::metrics::Metrics;

/// Formats transfer alerts and hands them to the delivery channel.
pub struct Dispatcher {
    channel: Arc<dyn DeliveryChannel>,
    explorer_url: String,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn DeliveryChannel>, explorer_url: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            channel,
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            metrics,
        }
    }

    /// Sends one alert to the watch owner. Failures are logged and counted, never retried.
    pub async fn dispatch(&self, watch: &WatchConfig, event: &TransferEvent) -> bool {
        let message = format_alert(watch, event, &self.explorer_url);

        match self.channel.send(&watch.owner_id, &message).await {
            Ok(()) => {
                Metrics::inc(&self.metrics.notified);
                debug!(
                    "alert sent via {} owner={} watch={} sig={}",
                    self.channel.name(),
                    watch.owner_id,
                    watch.watch_id,
                    event.signature
                );
                true
            }
            Err(e) => {
                Metrics::inc(&self.metrics.delivery_failures);
                warn!(
                    "alert delivery failed via {} owner={} watch={} sig={}: {e:?}",
                    self.channel.name(),
                    watch.owner_id,
                    watch.watch_id,
                    event.signature
                );
                false
            }
        }
    }
}

pub fn format_alert(watch: &WatchConfig, event: &TransferEvent, explorer_url: &str) -> String {
    let (icon, title, party_label) = match event.direction {
        TransferDirection::Incoming => ("🟢", "Incoming transfer", "From"),
        TransferDirection::Outgoing => ("🔴", "Outgoing transfer", "To"),
    };

    let name = if watch.label.is_empty() {
        short_address(&watch.address)
    } else {
        escape_html(&watch.label)
    };

    let party = match &event.counterparty {
        Some(cp) => account_link(explorer_url, cp),
        None => "unknown".to_string(),
    };

    let time = DateTime::from_timestamp(event.timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| event.timestamp.to_string());

    format!(
        "{icon} <b>{title}</b> · {name}\n\
         Amount: <b>{} SOL</b>\n\
         {party_label}: {party}\n\
         Wallet: {}\n\
         Time: {time}\n\
         <a href=\"{explorer_url}/tx/{}\">View transaction</a>",
        format_sol(event.amount),
        account_link(explorer_url, &watch.address),
        event.signature
    )
}

fn account_link(explorer_url: &str, address: &str) -> String {
    format!(
        "<a href=\"{explorer_url}/account/{address}\">{}</a>",
        short_address(address)
    )
}

fn short_address(address: &str) -> String {
    if address.len() <= 12 || !address.is_ascii() {
        return escape_html(address);
    }
    format!("{}…{}", &address[..4], &address[address.len() - 4..])
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
