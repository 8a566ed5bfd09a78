//! Prometheus metrics recorder and `/metrics` endpoint handler.

use freemial_hub::RouteOutcome;
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Record the result of routing one inbound payload.
pub fn record_route(outcome: RouteOutcome) {
    counter!(HUB_MESSAGES_ROUTED_TOTAL, "outcome" => outcome.as_str()).increment(1);
    match outcome {
        RouteOutcome::Delivered { evicted, .. } if evicted > 0 => {
            counter!(HUB_EVICTIONS_TOTAL).increment(u64::try_from(evicted).unwrap_or(u64::MAX));
        }
        RouteOutcome::Dropped(reason) => {
            counter!(HUB_MESSAGES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
        }
        _ => {}
    }
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshakes rejected before upgrade (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Inbound payloads routed (counter, labels: outcome).
pub const HUB_MESSAGES_ROUTED_TOTAL: &str = "hub_messages_routed_total";
/// Inbound payloads dropped without delivery (counter, labels: reason).
pub const HUB_MESSAGES_DROPPED_TOTAL: &str = "hub_messages_dropped_total";
/// Connections evicted for a full delivery queue (counter).
pub const HUB_EVICTIONS_TOTAL: &str = "hub_evictions_total";
