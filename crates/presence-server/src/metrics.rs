//! Metrics collection and export for the presence server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use presence_core::{HubStats, SessionOutcome};
use presence_transport::{Connection, ConnectionId, TransportError};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "presence_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "presence_connections_active";
    pub const SESSIONS_TOTAL: &str = "presence_sessions_total";
    pub const CLIENTS: &str = "presence_clients";
    pub const PENDING: &str = "presence_pending_admissions";
    pub const FREE_IDENTITIES: &str = "presence_free_identities";
    pub const ADMISSIONS_TOTAL: &str = "presence_admissions_total";
    pub const WITHDRAWALS_TOTAL: &str = "presence_withdrawals_total";
    pub const EVICTIONS_TOTAL: &str = "presence_evictions_total";
    pub const RELAYS_TOTAL: &str = "presence_relays_total";
    pub const FAILED_DELIVERIES_TOTAL: &str = "presence_failed_deliveries_total";
    pub const MESSAGES_TOTAL: &str = "presence_messages_total";
    pub const MESSAGES_BYTES: &str = "presence_messages_bytes";
    pub const ERRORS_TOTAL: &str = "presence_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_counter!(names::SESSIONS_TOTAL, "Finished sessions by outcome");
    metrics::describe_gauge!(names::CLIENTS, "Clients currently admitted to the hub");
    metrics::describe_gauge!(
        names::PENDING,
        "Admissions reserved but not yet announced"
    );
    metrics::describe_gauge!(
        names::FREE_IDENTITIES,
        "Released identities waiting for reuse"
    );
    metrics::describe_counter!(names::ADMISSIONS_TOTAL, "Announced admissions");
    metrics::describe_counter!(
        names::WITHDRAWALS_TOTAL,
        "Admissions dropped before they were announced"
    );
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Clients removed from the hub");
    metrics::describe_counter!(names::RELAYS_TOTAL, "Messages relayed by the hub");
    metrics::describe_counter!(
        names::FAILED_DELIVERIES_TOTAL,
        "Deliveries that failed and evicted their target"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames sent or received");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames sent or received");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record how a session ended.
pub fn record_session(outcome: &SessionOutcome) {
    let label = match outcome {
        SessionOutcome::Abandoned => "abandoned",
        SessionOutcome::Rejected => "rejected",
        SessionOutcome::Refused => "refused",
        SessionOutcome::Aborted => "aborted",
        SessionOutcome::Completed { .. } => "completed",
    };
    counter!(names::SESSIONS_TOTAL, "outcome" => label).increment(1);
}

/// Publish a hub snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::CLIENTS).set(stats.connections as f64);
    gauge!(names::PENDING).set(stats.pending as f64);
    gauge!(names::FREE_IDENTITIES).set(stats.free_identities as f64);
    counter!(names::ADMISSIONS_TOTAL).absolute(stats.admitted_total);
    counter!(names::WITHDRAWALS_TOTAL).absolute(stats.withdrawn_total);
    counter!(names::EVICTIONS_TOTAL).absolute(stats.evicted_total);
    counter!(names::RELAYS_TOTAL).absolute(stats.relayed_total);
    counter!(names::FAILED_DELIVERIES_TOTAL).absolute(stats.failed_deliveries);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// A connection that counts the frames passing through it.
pub struct MeteredConnection<C> {
    inner: C,
}

impl<C: Connection> MeteredConnection<C> {
    /// Wrap a connection.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: Connection> Connection for MeteredConnection<C> {
    fn id(&self) -> &ConnectionId {
        self.inner.id()
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        let result = self.inner.recv().await;
        match &result {
            Ok(Some(text)) => record_message(text.len(), "inbound"),
            Ok(None) => {}
            Err(TransportError::MessageTooLarge(_)) => record_error("message_too_large"),
            Err(_) => record_error("receive"),
        }
        result
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let result = self.inner.send(text).await;
        match result {
            Ok(()) => record_message(text.len(), "outbound"),
            Err(_) => record_error("send"),
        }
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_transport::memory;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_record_session_outcomes() {
        record_session(&SessionOutcome::Rejected);
        record_session(&SessionOutcome::Aborted);
        record_session(&SessionOutcome::Completed {
            id: presence_protocol::ClientId::new(1),
        });
        record_hub_stats(&HubStats::default());
    }

    #[tokio::test]
    async fn test_metered_connection_passes_through() {
        let (conn, mut peer) = memory::pair();
        let mut conn = MeteredConnection::new(conn);

        peer.send("ping").unwrap();
        assert_eq!(conn.recv().await.unwrap(), Some("ping".to_string()));

        conn.send("pong").await.unwrap();
        assert_eq!(peer.recv().await, Some("pong".to_string()));

        assert!(conn.is_open());
        conn.close().await.unwrap();
        assert!(!conn.is_open());
    }
}
