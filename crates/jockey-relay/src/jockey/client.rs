//! Jockey HTTP client.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::sync::OnceCell;
use tokio_stream::wrappers::SplitStream;
use tokio_util::io::StreamReader;

use super::error::{JockeyError, JockeyResult};
use super::types::{
    AssistantInfo, RunStatePatch, RunStreamBody, RunStreamQuery, RunTarget, RunUpdateBody,
};

/// Raw lines of a run stream, `\n` stripped and still undecoded.
///
/// Each line is decoded on its own so one bad line cannot poison the rest.
pub type LineStream = Pin<Box<dyn Stream<Item = JockeyResult<Vec<u8>>> + Send>>;

/// The subset of the Jockey API a streaming session depends on.
#[async_trait]
pub trait JockeyApi: Send + Sync {
    /// Assistant used when a request does not name one.
    async fn default_assistant_id(&self) -> JockeyResult<String>;

    /// Start a run and return its line stream.
    ///
    /// A non-200 answer is returned as [`JockeyError::Status`] with the body.
    async fn stream_run(&self, target: &RunTarget) -> JockeyResult<LineStream>;

    /// Post a state correction for a run.
    async fn update_run(&self, run_id: &str, values: &RunStatePatch) -> JockeyResult<()>;
}

/// Bounded exponential backoff for request initiation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Connection settings for [`JockeyClient`].
#[derive(Debug, Clone)]
pub struct JockeyClientConfig {
    /// Base URL of the Jockey API (e.g. "http://localhost:8123").
    pub api_url: String,
    /// Base URL serving rendered video assets.
    pub static_url: Option<String>,
    /// Overall request timeout, streaming body included.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl JockeyClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            static_url: None,
            request_timeout: Duration::from_secs(360),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for the Jockey run API.
///
/// Holds one pooled `reqwest::Client`; idle connections are reused across
/// sessions while an open run stream keeps its connection to itself.
#[derive(Debug)]
pub struct JockeyClient {
    client: Client,
    config: JockeyClientConfig,
    default_assistant: OnceCell<String>,
}

impl JockeyClient {
    /// Create a new Jockey client.
    pub fn new(config: JockeyClientConfig) -> JockeyResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!("Jockey client initialized with URL: {}", config.api_url);

        Ok(Self {
            client,
            config,
            default_assistant: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// List the assistants the server offers.
    pub async fn search_assistants(&self) -> JockeyResult<Vec<AssistantInfo>> {
        let url = self.url("/assistants/search");
        debug!("Fetching assistants from: {}", url);
        let response = self
            .send_with_retry("search assistants", || {
                self.client.post(&url).json(&serde_json::json!({}))
            })
            .await?;

        handle_json(response).await
    }

    /// Create a new conversation thread upstream.
    pub async fn create_thread(&self) -> JockeyResult<String> {
        let url = self.url("/threads/create");
        let response = self
            .send_with_retry("create thread", || self.client.post(&url))
            .await?;

        let body: Value = handle_json(response).await?;
        body.get("thread_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| JockeyError::ParseError("thread response has no thread_id".to_string()))
    }

    /// List all runs of a thread.
    pub async fn list_runs(&self, thread_id: &str) -> JockeyResult<Value> {
        let url = self.url("/runs/list");
        let response = self
            .send_with_retry("list runs", || {
                self.client.get(&url).query(&[("thread_id", thread_id)])
            })
            .await?;

        handle_json(response).await
    }

    /// Fetch a rendered video from the static asset origin.
    ///
    /// The response is returned unread so callers can relay the body.
    pub async fn fetch_video(&self, index_id: &str, filename: &str) -> JockeyResult<Response> {
        let base = self
            .config
            .static_url
            .as_deref()
            .ok_or(JockeyError::StaticUrlMissing)?;
        let url = format!("{}/{}/{}", base.trim_end_matches('/'), index_id, filename);
        info!("Fetching video from: {}", url);

        let response = self
            .send_with_retry("fetch video", || self.client.get(&url))
            .await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            error!("Video origin returned {} for {}", status, url);
            let body = response.text().await.unwrap_or_default();
            return Err(JockeyError::Status { status, body });
        }

        Ok(response)
    }

    /// Send a request, retrying connect and timeout failures with backoff.
    async fn send_with_retry<F>(&self, what: &str, build: F) -> JockeyResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let policy = self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let err = JockeyError::from(err);
                    if !err.is_transient() || attempt >= policy.max_attempts {
                        error!("Failed to {} after {} attempt(s): {}", what, attempt, err);
                        return Err(err);
                    }

                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Failed to {} (attempt {}): {}; retrying in {:?}",
                        what, attempt, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl JockeyApi for JockeyClient {
    async fn default_assistant_id(&self) -> JockeyResult<String> {
        self.default_assistant
            .get_or_try_init(|| async {
                let assistants = self.search_assistants().await?;
                let first = assistants
                    .into_iter()
                    .next()
                    .ok_or_else(|| JockeyError::NoAssistant("empty assistant list".to_string()))?;
                let id = first.assistant_id.filter(|id| !id.is_empty()).ok_or_else(|| {
                    JockeyError::NoAssistant("assistant descriptor has no assistant_id".to_string())
                })?;
                info!("Using default assistant ID: {}", id);
                Ok(id)
            })
            .await
            .cloned()
    }

    async fn stream_run(&self, target: &RunTarget) -> JockeyResult<LineStream> {
        let url = self.url("/runs/stream");
        let query = RunStreamQuery {
            stream_mode: target.stream_mode.as_str(),
            thread_id: &target.thread_id,
            index_id: &target.index_id,
        };
        let body = RunStreamBody {
            assistant_id: &target.assistant_id,
            index_id: &target.index_id,
            thread_id: &target.thread_id,
            input: &target.input,
        };

        let response = self
            .send_with_retry("start run stream", || {
                self.client.post(&url).query(&query).json(&body)
            })
            .await?;

        let status = response.status();
        debug!("Run stream for thread {} answered {}", target.thread_id, status);
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(JockeyError::Status { status, body });
        }

        Ok(into_lines(response))
    }

    async fn update_run(&self, run_id: &str, values: &RunStatePatch) -> JockeyResult<()> {
        let url = self.url("/runs");
        let body = RunUpdateBody { values };
        let response = self
            .send_with_retry("update run", || {
                self.client
                    .post(&url)
                    .query(&[("run_id", run_id)])
                    .json(&body)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JockeyError::Status { status, body });
        }
        Ok(())
    }
}

/// Split a chunked response body into raw lines.
fn into_lines(response: Response) -> LineStream {
    let bytes = response.bytes_stream().map_err(std::io::Error::other);
    let lines = SplitStream::new(StreamReader::new(bytes).split(b'\n'));

    Box::pin(lines.map_err(JockeyError::from))
}

/// Parse a JSON body or turn a failure status into an error.
async fn handle_json<T: serde::de::DeserializeOwned>(response: Response) -> JockeyResult<T> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| JockeyError::ParseError(format!("Failed to parse response: {}", e)))
    } else {
        let body = response.text().await.unwrap_or_default();
        error!("Jockey returned {}: {}", status, body);
        Err(JockeyError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = JockeyClientConfig::new("http://localhost:8123/");
        assert_eq!(config.request_timeout, Duration::from_secs(360));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, 3);

        let client = JockeyClient::new(config).unwrap();
        assert_eq!(client.url("/runs"), "http://localhost:8123/runs");
    }
}
