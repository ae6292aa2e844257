//! `/api/generate` — runs one reasoning chain and streams it as SSE.
//!
//! Each [`ChainEvent`] becomes one SSE frame whose data is the JSON payload.
//! Steps, the final answer and errors are unnamed frames (delivered to
//! `EventSource.onmessage`); the terminal summary is the named `close` event.

use axum::{
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::{
        Json,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use thinkchain_agent::{ChainEvent, ChainRequest};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::SharedState;

/// Top-level message of every rejected request.
const MISSING_PARAMETERS: &str = "Missing required parameters";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error: String,
}

type Rejection = (StatusCode, Json<ErrorResponse>);

fn bad_request(detail: impl Into<String>) -> Rejection {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            message: MISSING_PARAMETERS.into(),
            error: detail.into(),
        }),
    )
}

/// `GET /api/generate?query=..&apiKey=..&model=..&baseUrl=..`
pub async fn generate_get(
    State(state): State<SharedState>,
    query: Result<Query<ChainRequest>, QueryRejection>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, Rejection> {
    let Query(request) = query.map_err(|e| bad_request(e.body_text()))?;
    stream_chain(state, request)
}

/// `POST /api/generate` with a JSON body.
pub async fn generate_post(
    State(state): State<SharedState>,
    payload: Result<Json<ChainRequest>, JsonRejection>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, Rejection> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    stream_chain(state, request)
}

fn stream_chain(
    state: SharedState,
    request: ChainRequest,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, Rejection> {
    if let Err(e) = request.validate() {
        warn!(error = %e, "Rejected generate request");
        return Err(bad_request(e.to_string()));
    }

    info!(model = %request.model, mode = ?request.mode, "Generate SSE request");

    let rx = state.orchestrator.spawn(request);

    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ChainEvent) -> SseEvent {
    let data = event.data().unwrap_or_else(|e| {
        warn!(error = %e, kind = event.event_type(), "Failed to serialize chain event");
        serialization_failure(&e)
    });
    let frame = match event.sse_event_name() {
        Some(name) => SseEvent::default().event(name),
        None => SseEvent::default(),
    };
    frame.data(data)
}

/// Stand-in payload for an event that could not be serialized.
fn serialization_failure(error: &serde_json::Error) -> String {
    serde_json::json!({
        "error": "Failed to serialize event",
        "message": error.to_string(),
    })
    .to_string()
}
