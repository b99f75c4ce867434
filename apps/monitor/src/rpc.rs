use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::warn;
use reqwest::{Client, StatusCode};
use schema::TxRecord;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};

const MAX_ATTEMPTS: usize = 6;
const COMMITMENT: &str = "confirmed";

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
// 429s get more room to cool down
const RATE_LIMIT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Outcome of a single HTTP round trip.
#[derive(Debug, PartialEq)]
enum Attempt {
    Done(Value),
    Retry { reason: String, max_backoff: Duration },
    Fatal(String),
}

impl Attempt {
    fn retry(reason: String) -> Self {
        Attempt::Retry {
            reason,
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// Decides what to do with one JSON-RPC response. `body` is the decoded JSON, or the
/// decode error.
fn classify(status: StatusCode, body: Result<Value, String>) -> Attempt {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::Retry {
            reason: "rate limited (429)".to_string(),
            max_backoff: RATE_LIMIT_MAX_BACKOFF,
        };
    }
    if status.is_server_error() {
        return Attempt::retry(format!("server error {status}"));
    }

    let v = match body {
        Ok(v) => v,
        Err(e) => return Attempt::Fatal(format!("decode error {e}")),
    };

    if let Some(error) = v.get("error") {
        return Attempt::retry(format!("error response {error}"));
    }
    if !status.is_success() {
        return Attempt::retry(format!("status {status} body {v}"));
    }

    match v.get("result") {
        Some(result) => Attempt::Done(result.clone()),
        None => Attempt::Fatal("missing result field".to_string()),
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Chain data needed by the monitor.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Most recent signatures for `address`, newest first.
    async fn recent_signatures(&self, address: &str, limit: usize) -> Result<Vec<String>>;

    /// Resolved transaction, or `None` if the node does not know it (yet).
    async fn fetch_transaction(&self, signature: &str) -> Result<Option<TxRecord>>;

    async fn latest_signature(&self, address: &str) -> Result<Option<String>> {
        Ok(self.recent_signatures(address, 1).await?.into_iter().next())
    }
}

#[derive(Clone)]
pub struct RpcClient {
    http: Client,
    primary_url: String,
    fallback_urls: Vec<String>,
    semaphore: Arc<Semaphore>,
    min_delay_ms: u64,
    last_request: Arc<tokio::sync::Mutex<Instant>>,
}

impl RpcClient {
    pub fn new(
        primary_url: String,
        fallback_urls: Vec<String>,
        concurrency: usize,
        min_delay_ms: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("failed to build http client: {e:?}"))?;

        Ok(Self {
            http,
            primary_url,
            fallback_urls,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            min_delay_ms,
            last_request: Arc::new(tokio::sync::Mutex::new(Instant::now())),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| anyhow!("rpc semaphore closed: {e:?}"))?;

        self.apply_rate_limit().await;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            // primary first, then fallbacks in turn
            let url = self.url_for_attempt(attempt);

            match self.attempt(url, &body).await {
                Attempt::Done(result) => return Ok(result),
                Attempt::Fatal(reason) => return Err(anyhow!("{method}: {reason}")),
                Attempt::Retry { reason, max_backoff } => {
                    if attempt < MAX_ATTEMPTS {
                        warn!(
                            "RPC {method} via {url}: {reason}, backing off {}ms (attempt {attempt}/{MAX_ATTEMPTS})",
                            backoff.as_millis()
                        );
                        sleep(backoff).await;
                        backoff = next_backoff(backoff, max_backoff);
                    }
                    last_error = reason;
                }
            }
        }

        Err(anyhow!(
            "RPC {method} failed after {MAX_ATTEMPTS} attempts: {last_error}"
        ))
    }

    fn url_for_attempt(&self, attempt: usize) -> &str {
        let idx = (attempt - 1) % (self.fallback_urls.len() + 1);
        if idx == 0 {
            &self.primary_url
        } else {
            &self.fallback_urls[idx - 1]
        }
    }

    async fn attempt(&self, url: &str, body: &Value) -> Attempt {
        let resp = match self.http.post(url).json(body).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::retry(format!("request error {e:?}")),
        };

        let status = resp.status();
        let decoded = resp.json::<Value>().await.map_err(|e| format!("{e:?}"));
        classify(status, decoded)
    }

    async fn apply_rate_limit(&self) {
        if self.min_delay_ms == 0 {
            return;
        }

        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        let min_delay = Duration::from_millis(self.min_delay_ms);

        if elapsed < min_delay {
            sleep(min_delay - elapsed).await;
        }

        *last = Instant::now();
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn recent_signatures(&self, address: &str, limit: usize) -> Result<Vec<String>> {
        let res = self
            .call(
                "getSignaturesForAddress",
                json!([address, { "limit": limit, "commitment": COMMITMENT }]),
            )
            .await?;

        parse_signatures(&res)
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Option<TxRecord>> {
        let tx = self
            .call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "json",
                        "maxSupportedTransactionVersion": 0,
                        "commitment": COMMITMENT
                    }
                ]),
            )
            .await?;

        if tx.is_null() {
            return Ok(None);
        }
        Ok(TxRecord::from_json(&tx, signature))
    }
}

fn parse_signatures(res: &Value) -> Result<Vec<String>> {
    let arr = res
        .as_array()
        .ok_or_else(|| anyhow!("unexpected signatures result: {res}"))?;

    Ok(arr
        .iter()
        .filter_map(|item| item.get("signature").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect())
}
