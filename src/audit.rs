//! Audit sinks.
//!
//! Audit recording is fire-and-forget: lifecycle code hands events to a
//! [`BackgroundAuditSink`], which feeds a channel consumed by a spawned
//! worker. A slow or failing sink delays nothing on the request path and its
//! failures are logged, never rejoined into a request result.

use crate::error::Result;
use crate::providers::AuditSink;
use crate::state::AuditEvent;
use tokio::sync::mpsc;

/// Channel-fed audit sink decoupling recording from the request path.
#[derive(Debug, Clone)]
pub struct BackgroundAuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl BackgroundAuditSink {
    /// Spawn a worker draining events into `inner`.
    ///
    /// The worker runs until every clone of this sink is dropped.
    #[must_use]
    pub fn spawn<A>(inner: A) -> Self
    where
        A: AuditSink + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = inner.record(event).await {
                    tracing::warn!(error = %e, "audit sink rejected event, dropping");
                }
            }
            tracing::debug!("audit worker shutting down");
        });
        Self { tx }
    }
}

impl AuditSink for BackgroundAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        // Send failure means the worker is gone; the event is dropped, not
        // the request.
        if self.tx.send(event).is_err() {
            tracing::warn!("audit worker unavailable, dropping event");
        }
        Ok(())
    }
}

/// Sink emitting audit events as structured `tracing` records.
///
/// The external audit table is out of scope; deployments without one still
/// get a queryable trail through their log pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "session_audit",
            event_type = event.event_type.as_str(),
            session_id = %event.session_id,
            user_id = %event.user_id,
            tenant_id = %event.tenant_id,
            ip_address = ?event.ip_address,
            details = %event.details,
            timestamp = %event.timestamp,
            "session audit event"
        );
        Ok(())
    }
}
