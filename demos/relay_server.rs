//! Minimal relay server wiring the hub registry into an HTTP route.
//!
//! Streams any UDP channel as live MPEG-TS over HTTP:
//!
//! ```text
//! cargo run --example relay_server [bind-addr]
//! curl http://127.0.0.1:7777/udp/239.0.0.1:1234 --output - | mpv -
//! curl 'http://127.0.0.1:7777/udp/239.0.0.1:1234?iface=eth0' --output -
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use tshub::ChannelRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tshub=debug,relay_server=info")),
        )
        .init();

    let registry = ChannelRegistry::new();

    // Periodic registry overview in the logs.
    let stats_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = stats_registry.stats().await;
            tracing::info!(hubs = stats.hub_count, "registry stats");
        }
    });

    let app = Router::new()
        .route("/udp/{addr}", get(stream_channel))
        .with_state(registry);

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:7777".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("bind HTTP listener");
    tracing::info!(addr = %bind_addr, "relay server listening");

    axum::serve(listener, app).await.expect("HTTP server");
}

async fn stream_channel(
    State(registry): State<Arc<ChannelRegistry>>,
    Path(addr): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let ifaces: Vec<String> = params
        .get("iface")
        .map(|value| {
            value
                .split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match registry.get_or_create(&addr, &ifaces).await {
        Ok(hub) => tshub::serve_stream(hub, &headers, "video/mp2t", None).await,
        Err(e) => {
            tracing::warn!(addr = %addr, error = %e, "failed to open channel");
            let mut response = Response::new(Body::from(e.to_string()));
            *response.status_mut() = StatusCode::BAD_GATEWAY;
            response
        }
    }
}
