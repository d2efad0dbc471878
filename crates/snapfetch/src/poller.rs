//! Fixed-interval status polling with a wall-clock budget.
//!
//! Fixed interval, no backoff: worst-case latency stays predictable at the
//! price of politeness to the remote service. Each poller only touches its
//! own handle; any number of polls over shared carrier threads may run
//! concurrently.

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::client::{SnapshotApi, SnapshotClient};
use crate::dispatch::{ConcurrencyConfig, DispatchError};
use crate::error::ErrorKind;
use crate::result::FetchResult;
use crate::snapshot::{RemoteStatus, SnapshotHandle, SnapshotState};
use crate::stats::cost_for_bytes;

/// Outcome of a poll loop: exactly one of Ready, Failed, or TimedOut,
/// reached within `timeout + interval` of wall-clock time.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub state: SnapshotState,
    /// Wall-clock time spent waiting.
    pub waited: Duration,
    /// Number of status queries issued.
    pub queries: u32,
    /// Detail for Failed/TimedOut outcomes.
    pub error: Option<String>,
}

impl PollResult {
    pub fn is_ready(&self) -> bool {
        self.state == SnapshotState::Ready
    }
}

/// Polls a snapshot's status until a terminal state or timeout.
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
    timeout: Duration,
}

impl StatusPoller {
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, DispatchError> {
        if interval.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(Self { interval, timeout })
    }

    pub fn from_config(config: &ConcurrencyConfig) -> Result<Self, DispatchError> {
        Self::new(config.poll_interval, config.poll_timeout)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll until the snapshot reaches a terminal state or the wall-clock
    /// budget runs out.
    ///
    /// The first remote failure is terminal and not retried; a failed status
    /// query counts the same as an explicit failure. The handle's state is
    /// updated with the terminal outcome.
    pub async fn poll_until_ready<A: SnapshotApi + ?Sized>(
        &self,
        api: &A,
        handle: &mut SnapshotHandle,
    ) -> PollResult {
        self.poll_inner(api, handle, None).await
    }

    /// Like [`StatusPoller::poll_until_ready`], but the interval sleep races
    /// the token: a cancelled wait returns immediately instead of sleeping
    /// out the interval. Cancellation reports `TimedOut` with a
    /// "cancelled" detail.
    pub async fn poll_until_ready_cancellable<A: SnapshotApi + ?Sized>(
        &self,
        api: &A,
        handle: &mut SnapshotHandle,
        cancel: &CancellationToken,
    ) -> PollResult {
        self.poll_inner(api, handle, Some(cancel)).await
    }

    async fn poll_inner<A: SnapshotApi + ?Sized>(
        &self,
        api: &A,
        handle: &mut SnapshotHandle,
        cancel: Option<&CancellationToken>,
    ) -> PollResult {
        let start = tokio::time::Instant::now();
        let mut queries = 0u32;

        while start.elapsed() < self.timeout {
            if let Some(token) = cancel
                && token.is_cancelled()
            {
                return self.give_up(handle, start.elapsed(), queries, "poll cancelled");
            }

            queries += 1;
            match api.status(handle.id()).await {
                Ok(RemoteStatus::Ready) => {
                    handle.set_state(SnapshotState::Ready);
                    tracing::debug!(snapshot = %handle.id(), queries, "snapshot ready");
                    return PollResult {
                        state: SnapshotState::Ready,
                        waited: start.elapsed(),
                        queries,
                        error: None,
                    };
                }
                Ok(RemoteStatus::Failed) => {
                    handle.set_state(SnapshotState::Failed);
                    tracing::warn!(snapshot = %handle.id(), queries, "remote reported failure");
                    return PollResult {
                        state: SnapshotState::Failed,
                        waited: start.elapsed(),
                        queries,
                        error: Some("remote job reported failed status".to_string()),
                    };
                }
                Ok(RemoteStatus::Pending) => {}
                Err(e) => {
                    handle.set_state(SnapshotState::Failed);
                    tracing::warn!(snapshot = %handle.id(), error = %e, "status query failed");
                    return PollResult {
                        state: SnapshotState::Failed,
                        waited: start.elapsed(),
                        queries,
                        error: Some(e.to_string()),
                    };
                }
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return self.give_up(
                                handle,
                                start.elapsed(),
                                queries,
                                "poll cancelled",
                            );
                        }
                        _ = tokio::time::sleep(self.interval) => {}
                    }
                }
                None => tokio::time::sleep(self.interval).await,
            }
        }

        let detail = format!("no terminal status within {:?}", self.timeout);
        self.give_up(handle, start.elapsed(), queries, &detail)
    }

    fn give_up(
        &self,
        handle: &mut SnapshotHandle,
        waited: Duration,
        queries: u32,
        detail: &str,
    ) -> PollResult {
        handle.set_state(SnapshotState::TimedOut);
        tracing::warn!(snapshot = %handle.id(), queries, detail, "poll gave up");
        PollResult {
            state: SnapshotState::TimedOut,
            waited,
            queries,
            error: Some(detail.to_string()),
        }
    }

    /// Drive a pending handle to completion: poll, and on `Ready` fetch the
    /// payload, stamping byte size and bandwidth cost into the result.
    pub async fn wait_and_fetch<A: SnapshotApi + ?Sized>(
        &self,
        api: &A,
        handle: &mut SnapshotHandle,
    ) -> FetchResult {
        let sent_at = chrono::Utc::now();
        let poll = self.poll_until_ready(api, handle).await;

        match poll.state {
            SnapshotState::Ready => match api.fetch(handle.id()).await {
                Ok(payload) => {
                    let bytes = payload.byte_size();
                    FetchResult::ok(payload, bytes, cost_for_bytes(bytes), sent_at)
                }
                Err(e) => FetchResult::err(e.kind(), e.to_string(), sent_at),
            },
            SnapshotState::Failed => FetchResult::err(
                ErrorKind::RemoteJobFailure,
                poll.error.unwrap_or_else(|| "remote job failed".to_string()),
                sent_at,
            ),
            SnapshotState::TimedOut | SnapshotState::Pending => FetchResult::err(
                ErrorKind::Timeout,
                poll.error
                    .unwrap_or_else(|| "poll ended without terminal state".to_string()),
                sent_at,
            ),
        }
    }

    /// Blocking poll loop for callers without an async runtime, using the
    /// client's blocking status path. Suspension occupies the calling
    /// thread for the sleep duration.
    pub fn poll_until_ready_blocking(
        &self,
        client: &SnapshotClient,
        handle: &mut SnapshotHandle,
    ) -> PollResult {
        let start = std::time::Instant::now();
        let mut queries = 0u32;

        while start.elapsed() < self.timeout {
            queries += 1;
            match client.status_blocking(handle.id()) {
                Ok(RemoteStatus::Ready) => {
                    handle.set_state(SnapshotState::Ready);
                    return PollResult {
                        state: SnapshotState::Ready,
                        waited: start.elapsed(),
                        queries,
                        error: None,
                    };
                }
                Ok(RemoteStatus::Failed) => {
                    handle.set_state(SnapshotState::Failed);
                    return PollResult {
                        state: SnapshotState::Failed,
                        waited: start.elapsed(),
                        queries,
                        error: Some("remote job reported failed status".to_string()),
                    };
                }
                Ok(RemoteStatus::Pending) => {}
                Err(e) => {
                    handle.set_state(SnapshotState::Failed);
                    return PollResult {
                        state: SnapshotState::Failed,
                        waited: start.elapsed(),
                        queries,
                        error: Some(e.to_string()),
                    };
                }
            }
            std::thread::sleep(self.interval);
        }

        let detail = format!("no terminal status within {:?}", self.timeout);
        self.give_up(handle, start.elapsed(), queries, &detail)
    }
}
