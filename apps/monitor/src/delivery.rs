use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Outbound transport for formatted alerts.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, recipient_id: &str, message: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Telegram Bot API `sendMessage`; recipient ids are chat ids.
pub struct TelegramChannel {
    http: Client,
    endpoint: String,
}

impl TelegramChannel {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| anyhow!("failed to build http client: {e:?}"))?;

        Ok(Self {
            http,
            endpoint: format!("{TELEGRAM_API}/bot{bot_token}/sendMessage"),
        })
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send(&self, recipient_id: &str, message: &str) -> Result<()> {
        let body = json!({
            "chat_id": recipient_id,
            "text": message,
            "parse_mode": "HTML",
            "disable_web_page_preview": true
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("telegram request failed: {e:?}"))?;

        let status = resp.status();
        let v: Value = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram decode error: {e:?}"))?;

        if !status.is_success() || v.get("ok").and_then(|ok| ok.as_bool()) != Some(true) {
            let description = v
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("no description");
            return Err(anyhow!(
                "telegram sendMessage failed status={status}: {description}"
            ));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Writes alerts to the log. Used when no bot token is configured.
pub struct ConsoleChannel;

#[async_trait]
impl DeliveryChannel for ConsoleChannel {
    async fn send(&self, recipient_id: &str, message: &str) -> Result<()> {
        info!("alert for owner={recipient_id}:\n{message}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "console"
    }
}
