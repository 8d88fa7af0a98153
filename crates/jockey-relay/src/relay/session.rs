//! Streaming sessions: one upstream run relayed to a thread's subscribers.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::jockey::{JockeyApi, JockeyError, RunState, RunTarget, StreamMode};
use crate::ws::SessionRegistry;

use super::parser::{LineParser, StreamEvent};
use super::projector::{self, DisplayMessage};
use super::reducer::{Correction, Reducer};

pub const MISSING_INDEX_TEXT: &str = "Index ID must be provided for video processing.";
const SHUTDOWN_TEXT: &str = "Server is shutting down.";
const PANIC_TEXT: &str = "Unexpected error while processing the request.";

/// A user request to run against a thread.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub text: String,
    pub thread_id: String,
    pub index_id: Option<String>,
    pub assistant_id: Option<String>,
    pub stream_mode: StreamMode,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Connecting,
    Streaming,
    Completed,
    Error,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub operation_id: String,
    pub phase: SessionPhase,
    /// Display messages emitted, terminal message included.
    pub emitted: usize,
}

/// A session running on its own task.
#[derive(Debug)]
pub struct SpawnedSession {
    pub operation_id: String,
    pub handle: JoinHandle<SessionOutcome>,
}

/// Drives streaming sessions: upstream lines in, display messages out.
pub struct Orchestrator {
    api: Arc<dyn JockeyApi>,
    registry: Arc<SessionRegistry>,
    default_index_id: Option<String>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn JockeyApi>,
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            registry,
            default_index_id: None,
            shutdown,
        }
    }

    /// Index used when a request does not name one.
    pub fn with_default_index_id(mut self, index_id: Option<String>) -> Self {
        self.default_index_id = index_id.filter(|id| !id.is_empty());
        self
    }

    pub fn default_index_id(&self) -> Option<&str> {
        self.default_index_id.as_deref()
    }

    /// Resolve the index for a request, falling back to the default.
    pub fn resolve_index_id(&self, requested: Option<&str>) -> Option<String> {
        requested
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_index_id.clone())
    }

    /// Start a session on a background task.
    ///
    /// A panic inside the session is reported to the thread's subscribers
    /// as a generic error instead of vanishing with the task.
    pub fn spawn(self: &Arc<Self>, request: RunRequest) -> SpawnedSession {
        let operation_id = uuid::Uuid::new_v4().to_string();
        let this = Arc::clone(self);
        let op_id = operation_id.clone();

        let handle = tokio::spawn(async move {
            let thread_id = request.thread_id.clone();
            let inner = {
                let this = Arc::clone(&this);
                let op_id = op_id.clone();
                tokio::spawn(async move { this.run(op_id, request).await })
            };

            match inner.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if err.is_panic() {
                        error!("[{}] Session task panicked: {}", op_id, err);
                    } else {
                        error!("[{}] Session task was cancelled: {}", op_id, err);
                    }
                    this.registry
                        .broadcast(&thread_id, &DisplayMessage::error(PANIC_TEXT));
                    SessionOutcome {
                        operation_id: op_id,
                        phase: SessionPhase::Error,
                        emitted: 1,
                    }
                }
            }
        });

        SpawnedSession {
            operation_id,
            handle,
        }
    }

    /// Run one session to its end.
    ///
    /// Every session ends with exactly one terminal message: completion or
    /// error. Nothing is emitted after it.
    pub async fn run(&self, operation_id: String, request: RunRequest) -> SessionOutcome {
        info!(
            "[{}] Starting session for thread {}",
            operation_id, request.thread_id
        );
        let mut emitter = Emitter::new(&self.registry, &request.thread_id, &operation_id);

        let Some(index_id) = self.resolve_index_id(request.index_id.as_deref()) else {
            error!("[{}] {}", operation_id, MISSING_INDEX_TEXT);
            return emitter.fail(MISSING_INDEX_TEXT);
        };

        emitter.emit(DisplayMessage::connecting());

        let assistant_id = match request.assistant_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => match self.api.default_assistant_id().await {
                Ok(id) => id,
                Err(e) => {
                    error!("[{}] Could not resolve assistant: {}", operation_id, e);
                    return emitter.fail(e.to_string());
                }
            },
        };
        debug!("[{}] Using assistant_id: {}", operation_id, assistant_id);

        let target = RunTarget {
            input: RunState::initial(&index_id, &request.text),
            assistant_id,
            index_id,
            thread_id: request.thread_id.clone(),
            stream_mode: request.stream_mode,
        };

        let started = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                return emitter.fail(SHUTDOWN_TEXT);
            }
            result = self.api.stream_run(&target) => result,
        };

        let mut lines = match started {
            Ok(lines) => lines,
            Err(e) => {
                log_failure(&operation_id, &target, None, &e);
                return emitter.fail(e.to_string());
            }
        };

        emitter.phase = SessionPhase::Streaming;
        debug!("[{}] Reading run stream", operation_id);

        let mut parser = LineParser::new();
        let mut reducer = Reducer::new(target.input.clone());
        let mut corrections = JoinSet::new();

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    warn!("[{}] Shutdown requested, abandoning run stream", operation_id);
                    break emitter.fail(SHUTDOWN_TEXT);
                }
                line = lines.next() => line,
            };

            let raw = match next {
                None => break emitter.complete(),
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    log_failure(&operation_id, &target, Some(reducer.state()), &e);
                    break emitter.fail(e.to_string());
                }
            };
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    warn!("[{}] Skipping undecodable line: {}", operation_id, e);
                    continue;
                }
            };

            match parser.parse(&line) {
                Ok(None) => {}
                Ok(Some(StreamEvent::Error(raw))) => {
                    error!("[{}] Upstream reported an error: {}", operation_id, raw);
                    error!(
                        "[{}] Current state: {}",
                        operation_id,
                        serde_json::to_string(reducer.state()).unwrap_or_default()
                    );
                    emitter.emit(DisplayMessage::upstream_error(raw));
                }
                Ok(Some(StreamEvent::EventMarker(name))) => {
                    emitter.emit_projected(&Value::String(name));
                }
                Ok(Some(StreamEvent::Plain(text))) => {
                    emitter.emit_projected(&Value::String(text));
                }
                Ok(Some(StreamEvent::Data(update))) => {
                    let reduction = reducer.apply(&update);
                    if let Some(message) = reduction.display {
                        emitter.emit(message);
                    }
                    if let Some(correction) = reduction.correction {
                        self.post_correction(&mut corrections, &operation_id, correction);
                    }
                }
                Err(e) => warn!("[{}] Dropping data line: {}", operation_id, e),
            }
        };

        while let Some(result) = corrections.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err((run_id, e))) => {
                    warn!("[{}] Correction for run {} failed: {}", operation_id, run_id, e)
                }
                Err(e) => warn!("[{}] Correction task failed: {}", operation_id, e),
            }
        }

        info!(
            "[{}] Session finished as {:?} after {} message(s)",
            operation_id, outcome.phase, outcome.emitted
        );
        outcome
    }

    fn post_correction(
        &self,
        corrections: &mut JoinSet<Result<(), (String, JockeyError)>>,
        operation_id: &str,
        correction: Correction,
    ) {
        debug!(
            "[{}] Sending state update for run {}: {}",
            operation_id,
            correction.run_id,
            serde_json::to_string(&correction.values).unwrap_or_default()
        );
        let api = Arc::clone(&self.api);
        corrections.spawn(async move {
            api.update_run(&correction.run_id, &correction.values)
                .await
                .map_err(|e| (correction.run_id, e))
        });
    }
}

/// Full diagnostics for a failed run, logged only here.
fn log_failure(operation_id: &str, target: &RunTarget, state: Option<&RunState>, err: &JockeyError) {
    error!("[{}] Run failed: {}", operation_id, err);
    if let Some(status) = err.status() {
        error!("[{}] - Response status: {}", operation_id, status);
    }
    error!(
        "[{}] - Params: streamMode={} thread_id={} index_id={}",
        operation_id,
        target.stream_mode.as_str(),
        target.thread_id,
        target.index_id
    );
    error!(
        "[{}] - Input payload: {}",
        operation_id,
        serde_json::to_string(&target.input).unwrap_or_default()
    );
    if let Some(state) = state {
        error!(
            "[{}] - Current state: {}",
            operation_id,
            serde_json::to_string(state).unwrap_or_default()
        );
    }
}

/// Emits a session's messages and enforces the single terminal message.
struct Emitter<'a> {
    registry: &'a SessionRegistry,
    thread_id: &'a str,
    operation_id: &'a str,
    phase: SessionPhase,
    emitted: usize,
}

impl<'a> Emitter<'a> {
    fn new(registry: &'a SessionRegistry, thread_id: &'a str, operation_id: &'a str) -> Self {
        Self {
            registry,
            thread_id,
            operation_id,
            phase: SessionPhase::Connecting,
            emitted: 0,
        }
    }

    fn emit(&mut self, message: DisplayMessage) {
        let delivered = self.registry.broadcast(self.thread_id, &message);
        self.emitted += 1;
        debug!(
            "[{}] Emitted {:?} message to {} subscriber(s)",
            self.operation_id, message.kind, delivered
        );
    }

    fn emit_projected(&mut self, raw: &Value) {
        match projector::project(raw) {
            Some(message) => self.emit(message),
            None => debug!("[{}] Nothing to display for {}", self.operation_id, raw),
        }
    }

    fn complete(mut self) -> SessionOutcome {
        self.emit(DisplayMessage::complete());
        self.finish(SessionPhase::Completed)
    }

    fn fail(mut self, text: impl Into<String>) -> SessionOutcome {
        self.emit(DisplayMessage::error(text));
        self.finish(SessionPhase::Error)
    }

    fn finish(self, phase: SessionPhase) -> SessionOutcome {
        SessionOutcome {
            operation_id: self.operation_id.to_string(),
            phase,
            emitted: self.emitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jockey::{JockeyResult, LineStream, RunStatePatch};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    /// Upstream that replays a fixed script of lines.
    struct ScriptedApi {
        lines: Vec<&'static str>,
        status: Option<(StatusCode, &'static str)>,
        updates: Mutex<Vec<(String, RunStatePatch)>>,
        targets: Mutex<Vec<RunTarget>>,
    }

    impl ScriptedApi {
        fn lines(lines: Vec<&'static str>) -> Self {
            Self {
                lines,
                status: None,
                updates: Mutex::new(Vec::new()),
                targets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JockeyApi for ScriptedApi {
        async fn default_assistant_id(&self) -> JockeyResult<String> {
            Ok("asst-default".to_string())
        }

        async fn stream_run(&self, target: &RunTarget) -> JockeyResult<LineStream> {
            self.targets.lock().unwrap().push(target.clone());
            if let Some((status, body)) = self.status {
                return Err(JockeyError::Status {
                    status,
                    body: body.to_string(),
                });
            }
            let lines: Vec<JockeyResult<Vec<u8>>> =
                self.lines.iter().map(|l| Ok(l.as_bytes().to_vec())).collect();
            Ok(Box::pin(futures::stream::iter(lines)))
        }

        async fn update_run(&self, run_id: &str, values: &RunStatePatch) -> JockeyResult<()> {
            self.updates
                .lock()
                .unwrap()
                .push((run_id.to_string(), values.clone()));
            Ok(())
        }
    }

    fn request(index_id: Option<&str>) -> RunRequest {
        RunRequest {
            text: "make a trailer".to_string(),
            thread_id: "thread-1".to_string(),
            index_id: index_id.map(str::to_string),
            assistant_id: None,
            stream_mode: StreamMode::Messages,
        }
    }

    async fn run_script(api: Arc<ScriptedApi>) -> (SessionOutcome, Vec<DisplayMessage>) {
        let registry = Arc::new(SessionRegistry::new());
        let mut sub = registry.subscribe("thread-1");
        let orchestrator =
            Orchestrator::new(api, Arc::clone(&registry), CancellationToken::new());

        let outcome = orchestrator
            .run("op-1".to_string(), request(Some("idx-1")))
            .await;

        let mut messages = Vec::new();
        for _ in 0..outcome.emitted {
            messages.push(sub.recv().await.unwrap());
        }
        (outcome, messages)
    }

    #[tokio::test]
    async fn test_missing_index_fails_before_upstream() {
        let api = Arc::new(ScriptedApi::lines(vec![]));
        let registry = Arc::new(SessionRegistry::new());
        let mut sub = registry.subscribe("thread-1");
        let orchestrator = Orchestrator::new(
            api.clone(),
            Arc::clone(&registry),
            CancellationToken::new(),
        );

        let outcome = orchestrator.run("op".to_string(), request(None)).await;
        assert_eq!(outcome.phase, SessionPhase::Error);
        assert_eq!(outcome.emitted, 1);
        assert_eq!(sub.recv().await.unwrap(), DisplayMessage::error(MISSING_INDEX_TEXT));
        assert!(api.targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_index_and_assistant_are_used() {
        let api = Arc::new(ScriptedApi::lines(vec![]));
        let registry = Arc::new(SessionRegistry::new());
        let orchestrator = Orchestrator::new(api.clone(), registry, CancellationToken::new())
            .with_default_index_id(Some("idx-default".to_string()));

        let outcome = orchestrator.run("op".to_string(), request(None)).await;
        assert_eq!(outcome.phase, SessionPhase::Completed);

        let targets = api.targets.lock().unwrap();
        assert_eq!(targets[0].index_id, "idx-default");
        assert_eq!(targets[0].assistant_id, "asst-default");
        assert_eq!(
            targets[0].input.chat_history[0].content,
            serde_json::json!("idx-default make a trailer")
        );
    }

    #[tokio::test]
    async fn test_event_markers_emitted_once_per_name() {
        let api = Arc::new(ScriptedApi::lines(vec![
            "event: a",
            "event: a",
            "event: b",
            ": heartbeat",
        ]));
        let (outcome, messages) = run_script(api).await;

        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![projector::CONNECTING_TEXT, "a", "b", projector::COMPLETE_TEXT]
        );
        assert_eq!(outcome.phase, SessionPhase::Completed);
    }

    #[tokio::test]
    async fn test_planner_update_is_displayed_and_corrected() {
        let api = Arc::new(ScriptedApi::lines(vec![
            r#"data: {"chat_history":[{"type":"human","name":"planner","content":"Plan ready"}], "run_id":"r1"}"#,
        ]));
        let (_, messages) = run_script(api.clone()).await;

        assert_eq!(
            serde_json::to_value(&messages[1]).unwrap(),
            serde_json::json!({"text": "🎬\n\nPlan ready", "type": "human", "name": "planner"})
        );

        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "r1");
        let history = updates[0].1.chat_history.as_ref().unwrap();
        assert_eq!(history[0].content, serde_json::json!("Plan ready"));
    }

    #[tokio::test]
    async fn test_status_error_is_terminal() {
        let api = Arc::new(ScriptedApi {
            status: Some((StatusCode::SERVICE_UNAVAILABLE, "overloaded")),
            ..ScriptedApi::lines(vec!["event: never"])
        });
        let (outcome, messages) = run_script(api).await;

        assert_eq!(outcome.phase, SessionPhase::Error);
        let errors: Vec<_> = messages.iter().filter(|m| m.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.contains("overloaded"));
        assert!(messages.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn test_malformed_data_is_skipped() {
        let api = Arc::new(ScriptedApi::lines(vec![
            "data: {broken",
            r#"data: {"chat_history":[{"type":"ai","content":"raw output"}]}"#,
        ]));
        let (outcome, messages) = run_script(api).await;

        assert_eq!(outcome.phase, SessionPhase::Completed);
        assert_eq!(messages[1].text, projector::AI_MASK_TEXT);
        assert!(messages.iter().all(|m| !m.text.contains("raw output")));
    }

    #[tokio::test]
    async fn test_shutdown_ends_session_with_error() {
        let api = Arc::new(ScriptedApi::lines(vec!["event: a"]));
        let registry = Arc::new(SessionRegistry::new());
        let token = CancellationToken::new();
        token.cancel();
        let orchestrator = Orchestrator::new(api, registry, token);

        let outcome = orchestrator
            .run("op".to_string(), request(Some("idx")))
            .await;
        assert_eq!(outcome.phase, SessionPhase::Error);
        assert_eq!(outcome.emitted, 2);
    }

    #[tokio::test]
    async fn test_upstream_error_notice_is_not_terminal() {
        let api = Arc::new(ScriptedApi::lines(vec!["event: error", "event: a"]));
        let (outcome, messages) = run_script(api).await;

        assert_eq!(outcome.phase, SessionPhase::Completed);
        assert_eq!(
            messages[1],
            DisplayMessage::upstream_error("event: error")
        );
        assert_eq!(messages[2].text, "a");
        let terminal: Vec<_> = messages.iter().filter(|m| m.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].text, projector::COMPLETE_TEXT);
    }
}
