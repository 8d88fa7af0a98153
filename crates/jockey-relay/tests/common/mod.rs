//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use jockey_relay::api::{self, AppState, RouterOptions, StreamSettings};
use jockey_relay::jockey::{JockeyClient, JockeyClientConfig, RetryPolicy, StreamMode};
use jockey_relay::relay::{DisplayMessage, RunRequest};
use jockey_relay::ws::Subscription;

pub const TEST_INDEX_ID: &str = "idx-test";
pub const UPSTREAM_THREAD_ID: &str = "thread-upstream-1";
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42";

/// What the fake `/runs/stream` endpoint answers with.
#[derive(Debug, Clone)]
pub struct StreamScript {
    pub status: StatusCode,
    pub body: String,
    /// Raw lines, sent without any decoding.
    pub lines: Vec<Vec<u8>>,
}

impl StreamScript {
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            status: StatusCode::OK,
            body: String::new(),
            lines: lines.iter().map(|l| l.as_bytes().to_vec()).collect(),
        }
    }

    pub fn from_lines(lines: Vec<String>) -> Self {
        Self::raw(lines.into_iter().map(String::into_bytes).collect())
    }

    pub fn raw(lines: Vec<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::OK,
            body: String::new(),
            lines,
        }
    }

    pub fn status(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            lines: Vec::new(),
        }
    }
}

/// A run stream request as seen by the fake upstream.
#[derive(Debug, Clone)]
pub struct RecordedStream {
    pub query: HashMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub streams: Mutex<Vec<RecordedStream>>,
    /// (run_id, posted body)
    pub updates: Mutex<Vec<(String, Value)>>,
}

#[derive(Clone)]
struct FakeState {
    script: StreamScript,
    recorded: Arc<Recorded>,
}

/// In-process stand-in for the Jockey server.
pub struct FakeJockey {
    pub addr: SocketAddr,
    pub recorded: Arc<Recorded>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeJockey {
    pub async fn start(script: StreamScript) -> Self {
        let recorded = Arc::new(Recorded::default());
        let state = FakeState {
            script,
            recorded: recorded.clone(),
        };

        let app = Router::new()
            .route("/runs/stream", post(fake_stream))
            .route("/runs", post(fake_update))
            .route("/runs/list", get(fake_list_runs))
            .route("/assistants/search", post(fake_assistants))
            .route("/threads/create", post(fake_create_thread))
            .route("/static/{index_id}/{filename}", get(fake_video))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            recorded,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn updates(&self) -> Vec<(String, Value)> {
        self.recorded.updates.lock().unwrap().clone()
    }

    pub fn streams(&self) -> Vec<RecordedStream> {
        self.recorded.streams.lock().unwrap().clone()
    }
}

impl Drop for FakeJockey {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn fake_stream(
    State(state): State<FakeState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    state
        .recorded
        .streams
        .lock()
        .unwrap()
        .push(RecordedStream { query, body });

    let script = state.script;
    if script.status != StatusCode::OK {
        return (script.status, script.body).into_response();
    }

    // One chunk per line, as the real server flushes them.
    let chunks = script
        .lines
        .into_iter()
        .map(|mut line| {
            line.push(b'\n');
            Ok::<_, std::io::Error>(line)
        });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}

async fn fake_update(
    State(state): State<FakeState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let run_id = query.get("run_id").cloned().unwrap_or_default();
    state.recorded.updates.lock().unwrap().push((run_id, body));
    Json(json!({}))
}

async fn fake_list_runs(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let thread_id = query.get("thread_id").cloned().unwrap_or_default();
    Json(json!([
        {"run_id": "run-1", "thread_id": thread_id, "status": "success"}
    ]))
}

async fn fake_assistants() -> Json<Value> {
    Json(json!([
        {"assistant_id": "asst-1", "graph_id": "jockey", "name": "Jockey"},
        {"assistant_id": "asst-2", "graph_id": "jockey"}
    ]))
}

async fn fake_create_thread() -> Json<Value> {
    Json(json!({"thread_id": UPSTREAM_THREAD_ID, "metadata": {}}))
}

async fn fake_video(Path((_index_id, filename)): Path<(String, String)>) -> Response {
    if filename == "final.mp4" {
        ([(header::CONTENT_TYPE, "application/octet-stream")], VIDEO_BYTES).into_response()
    } else {
        (StatusCode::NOT_FOUND, "no such video").into_response()
    }
}

/// Delivery timing short enough for tests.
pub fn test_stream_settings() -> StreamSettings {
    StreamSettings {
        sse_idle_timeout: Duration::from_millis(100),
        ws_idle_timeout: Duration::from_millis(200),
        default_stream_mode: StreamMode::Messages,
    }
}

/// Client config pointing at `api_url` with quick retries.
pub fn client_config(api_url: &str) -> JockeyClientConfig {
    let mut config = JockeyClientConfig::new(api_url);
    config.static_url = Some(format!("{}/static", api_url));
    config.connect_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(10);
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
    };
    config
}

/// Application state wired to a fake upstream.
pub fn test_state(fake: &FakeJockey) -> AppState {
    state_for_url(&fake.url(), Some(TEST_INDEX_ID))
}

pub fn state_for_url(api_url: &str, default_index_id: Option<&str>) -> AppState {
    let jockey = Arc::new(JockeyClient::new(client_config(api_url)).unwrap());
    AppState::new(jockey)
        .with_default_index_id(default_index_id.map(str::to_string))
        .with_stream_settings(test_stream_settings())
}

pub fn test_router(state: AppState) -> Router {
    api::create_router(state, RouterOptions::default())
}

/// Router against an upstream that refuses connections.
pub fn test_app() -> Router {
    test_router(state_for_url("http://127.0.0.1:1", Some(TEST_INDEX_ID)))
}

pub fn run_request(thread_id: &str, text: &str) -> RunRequest {
    RunRequest {
        text: text.to_string(),
        thread_id: thread_id.to_string(),
        index_id: None,
        assistant_id: None,
        stream_mode: StreamMode::Messages,
    }
}

pub fn is_terminal(message: &DisplayMessage) -> bool {
    message.is_terminal()
}

/// Read whatever is queued until the thread stays quiet for a moment.
pub async fn drain(subscription: &mut Subscription) -> Vec<DisplayMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await
    {
        messages.push(message);
    }
    messages
}

/// Read messages up to and including the terminal one.
pub async fn collect_until_terminal(subscription: &mut Subscription) -> Vec<DisplayMessage> {
    let mut messages = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), subscription.recv())
            .await
            .expect("timed out waiting for a display message")
            .expect("thread was torn down");
        let done = is_terminal(&message);
        messages.push(message);
        if done {
            return messages;
        }
    }
}
