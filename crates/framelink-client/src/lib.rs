//! Self-healing connection management for framelink.
//!
//! This is the "just works" layer. Connect once; the manager keeps a single
//! session to the endpoint alive, reconnecting with a fixed delay and a
//! bounded number of attempts, frames outbound payloads and fans inbound
//! messages out to listeners. Failures are reported, never thrown.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod manager;
pub mod retry;

pub use config::ClientConfig;
pub use diagnostics::{
    Diagnostic, DiagnosticKind, DiagnosticSink, Record, RecordingSink, TracingSink,
};
pub use error::ClientError;
pub use manager::{ConnectionManager, ConnectionState};
pub use retry::RetryState;
