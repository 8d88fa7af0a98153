//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::jockey::{JockeyApi, JockeyClient, StreamMode};
use crate::relay::Orchestrator;
use crate::ws::SessionRegistry;

/// Delivery endpoint timing.
#[derive(Clone, Debug)]
pub struct StreamSettings {
    /// Idle time before an SSE client gets a ping event.
    pub sse_idle_timeout: Duration,
    /// Idle time before a WebSocket client gets a ping frame.
    pub ws_idle_timeout: Duration,
    /// Stream mode for runs that do not ask for one.
    pub default_stream_mode: StreamMode,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            sse_idle_timeout: Duration::from_secs(1),
            ws_idle_timeout: Duration::from_secs(30),
            default_stream_mode: StreamMode::Messages,
        }
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Delivery queues per thread.
    pub registry: Arc<SessionRegistry>,
    /// Runs streaming sessions.
    pub orchestrator: Arc<Orchestrator>,
    /// Jockey client for the thin proxy endpoints.
    pub jockey: Arc<JockeyClient>,
    pub stream: StreamSettings,
    /// Cancelled on process shutdown.
    pub shutdown: CancellationToken,
    /// Upstream used by sessions; the Jockey client unless replaced.
    api: Arc<dyn JockeyApi>,
    default_index_id: Option<String>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(jockey: Arc<JockeyClient>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let api: Arc<dyn JockeyApi> = jockey.clone();
        let orchestrator = Arc::new(Orchestrator::new(
            api.clone(),
            registry.clone(),
            shutdown.clone(),
        ));

        Self {
            registry,
            orchestrator,
            jockey,
            stream: StreamSettings::default(),
            shutdown,
            api,
            default_index_id: None,
        }
    }

    /// Index used when a process request does not name one.
    pub fn with_default_index_id(mut self, index_id: Option<String>) -> Self {
        self.default_index_id = index_id;
        self.rebuild_orchestrator()
    }

    /// Replace the upstream used by streaming sessions.
    pub fn with_api(mut self, api: Arc<dyn JockeyApi>) -> Self {
        self.api = api;
        self.rebuild_orchestrator()
    }

    pub fn with_stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }

    /// Configured default index, if any.
    pub fn default_index_id(&self) -> Option<&str> {
        self.orchestrator.default_index_id()
    }

    fn rebuild_orchestrator(mut self) -> Self {
        self.orchestrator = Arc::new(
            Orchestrator::new(
                self.api.clone(),
                self.registry.clone(),
                self.shutdown.clone(),
            )
            .with_default_index_id(self.default_index_id.clone()),
        );
        self
    }
}
