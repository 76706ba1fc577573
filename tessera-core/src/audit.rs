//! Audit event types for the API surface.
//!
//! Every API call emits exactly one audit event on exit. Events are
//! structured records handed to an [`AuditSink`]; the default sink renders
//! them through `tracing` at info level with the message `"API accessed"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of the audited call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
        }
    }
}

/// One audit record. `status_code` and `status_message` are set on error
/// only; `fields` carries the per-operation data (`spiffe_id`, `ttl`,
/// `csr`, ...). Using a BTreeMap keeps field rendering deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub status: AuditStatus,
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    pub fields: BTreeMap<&'static str, String>,
}

impl AuditEvent {
    pub fn success(fields: BTreeMap<&'static str, String>) -> Self {
        Self {
            status: AuditStatus::Success,
            status_code: None,
            status_message: None,
            fields,
        }
    }

    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        fields: BTreeMap<&'static str, String>,
    ) -> Self {
        Self {
            status: AuditStatus::Error,
            status_code: Some(code.into()),
            status_message: Some(message.into()),
            fields,
        }
    }
}

/// Destination for audit events. Process-wide and internally thread-safe.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Default sink: one info-level `tracing` line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let mut data = event.fields.clone();
        data.insert("type", "audit".to_string());
        match event.status {
            AuditStatus::Success => tracing::info!(
                status = "success",
                data = ?data,
                "API accessed"
            ),
            AuditStatus::Error => tracing::info!(
                status = "error",
                status_code = event.status_code.as_deref().unwrap_or(""),
                status_message = event.status_message.as_deref().unwrap_or(""),
                data = ?data,
                "API accessed"
            ),
        }
    }
}
