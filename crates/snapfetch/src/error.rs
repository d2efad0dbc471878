//! Error taxonomy for the job lifecycle.
//!
//! Expected failures (timeout, remote failure, unreachable result) travel as
//! values so batch callers can continue past one bad job. Only programmer or
//! configuration errors are rejected synchronously at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure classification carried inside result objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or protocol-level error while triggering or fetching.
    TransportFailure,
    /// The remote explicitly reported a failed/error status.
    RemoteJobFailure,
    /// Wall-clock budget exceeded without reaching a terminal state.
    Timeout,
    /// Job reported ready but the payload could not be retrieved.
    ResultUnavailable,
    /// Dispatcher-level permit/pool acquisition failure.
    AdmissionFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote job failed: {0}")]
    RemoteJob(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("result unavailable: {0}")]
    ResultUnavailable(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::TransportFailure,
            Self::RemoteJob(_) => ErrorKind::RemoteJobFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ResultUnavailable(_) => ErrorKind::ResultUnavailable,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
