//! Audit sink trait.

use crate::error::Result;
use crate::state::AuditEvent;

/// Recorder of session lifecycle/security events.
///
/// Events are append-only and written once. Recording is decoupled from the
/// request path: callers go through [`crate::audit::BackgroundAuditSink`]
/// so a slow or failing sink never blocks a response.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying sink rejects the write. Callers on
    /// the request path must log and drop such errors, never propagate them.
    fn record(&self, event: AuditEvent) -> impl std::future::Future<Output = Result<()>> + Send;
}
