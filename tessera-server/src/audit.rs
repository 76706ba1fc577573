//! Per-request audit guard and the status-wrapping error helper.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tessera_core::audit::{AuditEvent, AuditSink};
use tonic::{Code, Status};

/// Collects audit fields over the life of one request and guarantees exactly
/// one audit event on every exit path. If the handler unwinds before
/// reporting an outcome, `Drop` emits an error event so the record is never
/// lost.
pub(crate) struct AuditLog {
    sink: Arc<dyn AuditSink>,
    fields: BTreeMap<&'static str, String>,
    emitted: bool,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            fields: BTreeMap::new(),
            emitted: false,
        }
    }

    pub fn field(&mut self, key: &'static str, value: impl Into<String>) {
        self.fields.insert(key, value.into());
    }

    pub fn success(&mut self) {
        self.emitted = true;
        self.sink.emit(AuditEvent::success(self.fields.clone()));
    }

    pub fn error(&mut self, status: &Status) {
        self.emitted = true;
        self.sink.emit(AuditEvent::error(
            code_name(status.code()),
            status.message(),
            self.fields.clone(),
        ));
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if !self.emitted {
            self.sink.emit(AuditEvent::error(
                code_name(Code::Internal),
                "request handler terminated unexpectedly",
                self.fields.clone(),
            ));
        }
    }
}

/// The canonical name of a status code, as recorded in audit events.
pub(crate) fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "Canceled",
        Code::Unknown => "Unknown",
        Code::InvalidArgument => "InvalidArgument",
        Code::DeadlineExceeded => "DeadlineExceeded",
        Code::NotFound => "NotFound",
        Code::AlreadyExists => "AlreadyExists",
        Code::PermissionDenied => "PermissionDenied",
        Code::ResourceExhausted => "ResourceExhausted",
        Code::FailedPrecondition => "FailedPrecondition",
        Code::Aborted => "Aborted",
        Code::OutOfRange => "OutOfRange",
        Code::Unimplemented => "Unimplemented",
        Code::Internal => "Internal",
        Code::Unavailable => "Unavailable",
        Code::DataLoss => "DataLoss",
        Code::Unauthenticated => "Unauthenticated",
    }
}

/// Build a status whose message is `<msg>: <err>` (or `<msg>` alone), and
/// log it at error level. Client faults log as `Invalid argument: <msg>`,
/// everything else as the capitalized message. Each stage wraps its cause
/// exactly once so clients can match on the prefix.
pub(crate) fn make_err(code: Code, msg: &str, err: Option<&dyn fmt::Display>) -> Status {
    let status_message = match err {
        Some(e) => format!("{msg}: {e}"),
        None => msg.to_string(),
    };

    let log_message = if code == Code::InvalidArgument {
        format!("Invalid argument: {msg}")
    } else {
        capitalize(msg)
    };
    match err {
        Some(e) => tracing::error!(error = %e, "{log_message}"),
        None => tracing::error!("{log_message}"),
    }

    Status::new(code, status_message)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Hash request bytes for audit fields; empty input stays empty.
pub(crate) fn hash_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    hex::encode(Sha256::digest(bytes))
}
