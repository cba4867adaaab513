//! Reporting channel for failures that never reach the caller as errors.
//!
//! Sends on a closed client, malformed inbound bodies, transport errors and
//! retry exhaustion are all swallowed by the connection manager. They are
//! reported here instead, so a host can surface them or check liveness.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::manager::ConnectionState;

/// Something the connection manager wants the outside world to know.
#[derive(Debug)]
pub enum Diagnostic {
    /// A failure that was handled internally.
    Failure(ClientError),
    /// A frame was dropped because no session is open.
    SendDropped { bytes: usize, state: ConnectionState },
    /// An automatic reconnect was scheduled.
    ReconnectScheduled { attempt: u32, delay: Duration },
}

/// Coarse classification of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Transport,
    Session,
    Decode,
    RetryExhausted,
    ListenerPanicked,
    SendDropped,
    ReconnectScheduled,
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::Failure(ClientError::Transport(_)) => DiagnosticKind::Transport,
            Diagnostic::Failure(ClientError::Session(_)) => DiagnosticKind::Session,
            Diagnostic::Failure(ClientError::Decode(_)) => DiagnosticKind::Decode,
            Diagnostic::Failure(ClientError::RetryExhausted { .. }) => {
                DiagnosticKind::RetryExhausted
            }
            Diagnostic::Failure(ClientError::ListenerPanicked { .. }) => {
                DiagnosticKind::ListenerPanicked
            }
            Diagnostic::SendDropped { .. } => DiagnosticKind::SendDropped,
            Diagnostic::ReconnectScheduled { .. } => DiagnosticKind::ReconnectScheduled,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Failure(err) => write!(f, "{err}"),
            Diagnostic::SendDropped { bytes, state } => {
                write!(f, "dropped {bytes}-byte frame while {state:?}")
            }
            Diagnostic::ReconnectScheduled { attempt, delay } => {
                write!(f, "reconnect attempt {attempt} in {delay:?}")
            }
        }
    }
}

/// Receives diagnostics from a connection manager.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn report(&self, diagnostic: &Diagnostic) {
        (**self).report(diagnostic);
    }
}

/// Default sink: writes every diagnostic to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::Failure(err) => warn!(kind = ?diagnostic.kind(), "{err}"),
            Diagnostic::SendDropped { .. } | Diagnostic::ReconnectScheduled { .. } => {
                debug!(kind = ?diagnostic.kind(), "{diagnostic}");
            }
        }
    }
}

/// One captured diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Record>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far, oldest first.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds reported so far, oldest first.
    pub fn kinds(&self) -> Vec<DiagnosticKind> {
        self.records().into_iter().map(|record| record.kind).collect()
    }

    /// How many diagnostics of `kind` were reported.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.records()
            .iter()
            .filter(|record| record.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Record {
                kind: diagnostic.kind(),
                message: diagnostic.to_string(),
            });
    }
}
