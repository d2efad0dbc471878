//! Snapshot handle and status tracking.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Status classification reported by the remote progress endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Ready,
    Failed,
}

impl RemoteStatus {
    /// Classify a raw status string.
    ///
    /// Anything outside the known set is still pending, not a failure; only
    /// an explicit `failed`/`error` stops the poll loop.
    pub fn classify(raw: &str) -> Self {
        match raw {
            "ready" => Self::Ready,
            "failed" | "error" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Lifecycle state of a snapshot job handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Pending,
    Ready,
    Failed,
    TimedOut,
}

impl SnapshotState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Handle for a triggered snapshot job.
///
/// State moves strictly forward: `Pending`, then exactly one terminal state.
/// A handle is conceptually discarded after a terminal fetch or timeout.
#[derive(Debug)]
pub struct SnapshotHandle {
    id: String,
    created_at: Instant,
    state: SnapshotState,
}

impl SnapshotHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Instant::now(),
            state: SnapshotState::Pending,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time since the handle was created by a trigger.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Apply a state transition.
    ///
    /// Transitions out of a terminal state are ignored: a handle reaches
    /// exactly one terminal state and never reverts.
    pub fn set_state(&mut self, next: SnapshotState) {
        if self.state.is_terminal() {
            if next != self.state {
                tracing::warn!(
                    snapshot = %self.id,
                    current = self.state.as_str(),
                    attempted = next.as_str(),
                    "ignoring transition on terminal handle"
                );
            }
            return;
        }
        self.state = next;
    }
}
