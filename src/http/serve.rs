//! Per-client HTTP serving
//!
//! The serve loop owns one client queue and one response body channel.
//! Frames accumulate in a write buffer that is pushed to the client when it
//! reaches the flush threshold or when the flush ticker fires, matching the
//! cadence set-top boxes and players expect from live TS-over-HTTP.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_TYPE, PRAGMA, TRANSFER_ENCODING, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::hub::client::{ClientQueue, HubClient};
use crate::hub::stream::StreamHub;

/// Liveness callback invoked on every activity tick while serving
pub type ActivityCallback = Arc<dyn Fn() + Send + Sync>;

const DLNA_CONTENT_FEATURES: &str =
    "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// Serve one HTTP client from `hub`.
///
/// Attaches a client under the request's `X-ConnID` (or a time-derived id),
/// streams broadcast frames as the response body and detaches on every exit
/// path: client disconnect, queue closed, hub closed. Replies 503 when the
/// hub is already closed.
pub async fn serve_stream(
    hub: Arc<StreamHub>,
    headers: &HeaderMap,
    content_type: &str,
    on_activity: Option<ActivityCallback>,
) -> Response {
    if hub.is_closed() {
        return status_response(StatusCode::SERVICE_UNAVAILABLE, "stream hub closed");
    }

    let conn_id = connection_id(headers);
    let client = HubClient::new(conn_id.clone(), hub.config().client_queue_capacity);
    let queue = Arc::clone(&client.queue);
    if hub.attach(client).await.is_err() {
        return status_response(StatusCode::SERVICE_UNAVAILABLE, "stream hub closed");
    }

    tracing::debug!(conn_id = %conn_id, addr = %hub.addresses()[0], "serving stream client");

    let (body_tx, body_rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(8);
    tokio::spawn(serve_loop(
        Arc::clone(&hub),
        queue,
        conn_id,
        body_tx,
        on_activity,
    ));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(body_rx)));
    let response_headers = response.headers_mut();
    response_headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response_headers.insert(
        HeaderName::from_static("contentfeatures.dlna.org"),
        HeaderValue::from_static(DLNA_CONTENT_FEATURES),
    );
    response_headers.insert(
        HeaderName::from_static("transfermode.dlna.org"),
        HeaderValue::from_static("Streaming"),
    );
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    // VLC mishandles an explicit Transfer-Encoding on live TS responses.
    if !is_vlc(headers) {
        response_headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));

    response
}

fn is_vlc(headers: &HeaderMap) -> bool {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.contains("VLC"))
        .unwrap_or(false)
}

/// `X-ConnID` header when present, otherwise a time-derived unique value
fn connection_id(headers: &HeaderMap) -> String {
    headers
        .get("x-connid")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
                .to_string()
        })
}

fn status_response(status: StatusCode, message: &'static str) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

async fn serve_loop(
    hub: Arc<StreamHub>,
    queue: Arc<ClientQueue>,
    conn_id: String,
    body_tx: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
    on_activity: Option<ActivityCallback>,
) {
    let config = hub.config().clone();

    // The request context: hyper drops the body receiver when the client
    // disconnects, so `body_tx.closed()` doubles as cancellation.
    let context = CancellationToken::new();
    let playing = tokio::select! {
        ok = hub.wait_for_playing(&context) => ok,
        _ = body_tx.closed() => false,
    };

    if playing {
        let mut buffered = BytesMut::new();
        let start = tokio::time::Instant::now();
        let mut flush =
            tokio::time::interval_at(start + config.flush_interval, config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut activity =
            tokio::time::interval_at(start + config.activity_interval, config.activity_interval);
        activity.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = queue.recv() => {
                    // None: the hub closed this queue (detach or shutdown).
                    let Some(frame) = frame else { break };
                    buffered.extend_from_slice(&frame);
                    if buffered.len() >= config.flush_threshold_bytes {
                        if body_tx.send(Ok(buffered.split().freeze())).await.is_err() {
                            break;
                        }
                    }
                }
                _ = flush.tick() => {
                    if !buffered.is_empty() {
                        if body_tx.send(Ok(buffered.split().freeze())).await.is_err() {
                            break;
                        }
                    }
                }
                _ = activity.tick() => {
                    if let Some(callback) = &on_activity {
                        callback();
                    }
                }
                _ = body_tx.closed() => break,
                _ = hub.wait_closed() => break,
            }
        }
    }

    hub.detach(conn_id).await;
}
