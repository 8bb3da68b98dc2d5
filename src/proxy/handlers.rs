//! HTTP request handlers.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;

use super::server::AppState;
use super::types::{CompletionRequest, StreamEvent};
use crate::error::ProxyError;

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-chatrelay-request-id";
/// Response header: provider the request was routed to.
pub const PROVIDER_HEADER: &str = "x-chatrelay-provider";

/// Attach correlation headers to a response.
fn attach_headers(response: &mut Response, request_id: &str, provider: Option<&str>) {
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    if let Some(value) = provider.and_then(|p| HeaderValue::from_str(p).ok()) {
        headers.insert(HeaderName::from_static(PROVIDER_HEADER), value);
    }
}

/// Handle POST /chat-completion
///
/// The body is parsed here rather than through the `Json` extractor so that
/// malformed input gets the same error envelope as every other failure.
pub async fn chat_completion(State(state): State<AppState>, body: Bytes) -> Response {
    let start = std::time::Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let request: CompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Malformed request body");
            let mut response =
                ProxyError::invalid_request(format!("malformed request body: {}", e), None)
                    .into_response();
            attach_headers(&mut response, &request_id, None);
            return response;
        }
    };

    tracing::info!(
        request_id = %request_id,
        provider = ?request.provider,
        model = ?request.model,
        messages = request.messages.len(),
        stream = request.stream,
        caller_key = request.user_api_key.is_some(),
        "Received chat completion request"
    );

    let mut response = if request.stream {
        stream_completion(&state, &request).await
    } else {
        match state.router.route(&request).await {
            Ok(result) => Json(result).into_response(),
            Err(e) => e.into_response(),
        }
    };

    let provider = request
        .provider_id()
        .filter(|id| state.router.registry().contains(id));
    attach_headers(&mut response, &request_id, provider);

    tracing::info!(
        request_id = %request_id,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Chat completion finished"
    );

    response
}

/// Relay a streamed completion as Server-Sent Events.
///
/// Failures before the first event produce an ordinary JSON error response.
/// A failure mid-stream is sent as a final `error` event.
async fn stream_completion(state: &AppState, request: &CompletionRequest) -> Response {
    let events = match state.router.route_stream(request).await {
        Ok(events) => events,
        Err(e) => return e.into_response(),
    };

    let sse = events.map(|item| -> Result<Event, Infallible> {
        Ok(match item {
            Ok(event) => stream_event(&event),
            Err(err) => {
                let mut payload = err.envelope();
                payload["type"] = serde_json::Value::from("error");
                Event::default().data(payload.to_string())
            }
        })
    });

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

fn stream_event(event: &StreamEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize stream event");
        Event::default().comment("unserializable event")
    })
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatrelay"
    }))
}

/// Handle GET /providers - registered providers and whether a server key is present
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .router
        .registry()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.id,
                "endpoint": p.endpoint,
                "format": p.format.kind().as_str(),
                "credential_configured": state.router.has_credential(&p.id),
            })
        })
        .collect();

    Json(serde_json::json!({
        "providers": providers
    }))
}
