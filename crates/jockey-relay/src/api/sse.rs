//! SSE delivery endpoint.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use futures::Stream;
use log::{debug, info, warn};

use crate::ws::Subscription;

use super::error::{ApiError, ApiResult};
use super::handlers::ThreadQuery;
use super::state::AppState;

/// Stream a thread's display messages.
///
/// GET /api/stream?thread_id=..
///
/// Each message is an `event: message` frame carrying the JSON display
/// message; an `event: ping` frame with empty data is sent whenever the
/// queue stays idle for the configured timeout. The subscription lives as
/// long as the response body, so a client going away unsubscribes on the
/// next write.
pub async fn stream_updates(
    State(state): State<AppState>,
    Query(query): Query<ThreadQuery>,
) -> ApiResult<Response> {
    if query.thread_id.is_empty() {
        return Err(ApiError::bad_request("thread_id is required"));
    }

    let subscription = state.registry.subscribe(&query.thread_id);
    info!(
        "SSE client subscribed to thread {} as {}",
        query.thread_id,
        subscription.id()
    );

    let stream = message_events(subscription, state.stream.sse_idle_timeout);
    Ok(build_sse_response(Sse::new(stream)))
}

fn message_events(
    subscription: Subscription,
    idle_timeout: std::time::Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(subscription, move |mut subscription| async move {
        let event = match tokio::time::timeout(idle_timeout, subscription.recv()).await {
            Ok(Some(message)) => match Event::default().event("message").json_data(&message) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Failed to serialize display message: {}", e);
                    ping_event()
                }
            },
            Ok(None) => {
                debug!(
                    "Thread {} was torn down, ending SSE stream",
                    subscription.thread_id()
                );
                return None;
            }
            Err(_) => ping_event(),
        };
        Some((Ok(event), subscription))
    })
}

fn ping_event() -> Event {
    Event::default().event("ping").data("")
}

fn build_sse_response<S>(sse: Sse<S>) -> Response
where
    Sse<S>: IntoResponse,
{
    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    // Disable nginx buffering if present
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
