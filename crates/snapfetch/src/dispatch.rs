//! Concurrency-controlled dispatch of fetch operations.
//!
//! A dispatcher wraps caller-supplied fetch operations with one of three
//! strategies, fixed at construction:
//! - unbounded: run immediately, maximum parallelism
//! - bounded: admission gate with fixed capacity
//! - pooled: round-robin assignment from a lazily built session pool
//!
//! The dispatcher never reinterprets the wrapped operation's outcome; a
//! failed [`FetchResult`] passes through unchanged. Only dispatcher-level
//! concerns (closed pool, invalid configuration) surface as errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ErrorKind;
use crate::pool::{PoolError, SessionPool, SessionSlot};
use crate::result::FetchResult;
use crate::stats::{CostAccumulator, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Unbounded,
    Bounded,
    Pooled,
}

/// Dispatcher and poller knobs, immutable once a dispatcher is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub strategy: StrategyKind,
    /// Admission-gate capacity for the bounded strategy.
    pub max_concurrent: usize,
    /// Session count for the pooled strategy.
    pub pool_size: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Unbounded,
            max_concurrent: 4,
            pool_size: 3,
            poll_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(300),
        }
    }
}

impl ConcurrencyConfig {
    /// Reject invalid values at construction time, not at runtime.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.strategy == StrategyKind::Bounded && self.max_concurrent == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_concurrent must be at least 1 for the bounded strategy".to_string(),
            ));
        }
        if self.strategy == StrategyKind::Pooled && self.pool_size == 0 {
            return Err(DispatchError::InvalidConfig(
                "pool_size must be at least 1 for the pooled strategy".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dispatcher is closed")]
    Closed,

    #[error("session init failed: {0}")]
    SessionInit(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::AdmissionFailure
    }
}

impl From<PoolError> for DispatchError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::InvalidSize => Self::InvalidConfig(
                "pool_size must be at least 1 for the pooled strategy".to_string(),
            ),
            PoolError::Closed => Self::Closed,
            PoolError::Init(e) => Self::SessionInit(e.to_string()),
        }
    }
}

/// Closed set of gate variants, chosen once at construction.
enum Gate<S> {
    Unbounded,
    Bounded(Arc<Semaphore>),
    Pooled(SessionPool<S>),
}

/// Executes fetch operations under an immutable concurrency policy.
pub struct Dispatcher<S = ()> {
    gate: Gate<S>,
    stats: Arc<CostAccumulator>,
}

impl<S> Dispatcher<S> {
    /// No coordination: every operation runs immediately.
    pub fn unbounded() -> Self {
        Self::with_gate(Gate::Unbounded)
    }

    /// Admission gate with fixed capacity.
    pub fn bounded(max_concurrent: usize) -> Result<Self, DispatchError> {
        if max_concurrent == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_concurrent must be at least 1 for the bounded strategy".to_string(),
            ));
        }
        Ok(Self::with_gate(Gate::Bounded(Arc::new(Semaphore::new(
            max_concurrent,
        )))))
    }

    /// Round-robin session pool, built lazily on first use.
    pub fn pooled<F, Fut>(pool_size: usize, factory: F) -> Result<Self, DispatchError>
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
    {
        Ok(Self::with_gate(Gate::Pooled(SessionPool::new(
            pool_size, factory,
        )?)))
    }

    /// Build from a validated configuration. The factory is only consulted
    /// by the pooled strategy.
    pub fn from_config<F, Fut>(
        config: &ConcurrencyConfig,
        factory: F,
    ) -> Result<Self, DispatchError>
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
    {
        config.validate()?;
        let gate = match config.strategy {
            StrategyKind::Unbounded => Gate::Unbounded,
            StrategyKind::Bounded => {
                Gate::Bounded(Arc::new(Semaphore::new(config.max_concurrent)))
            }
            StrategyKind::Pooled => Gate::Pooled(SessionPool::new(config.pool_size, factory)?),
        };
        Ok(Self::with_gate(gate))
    }

    fn with_gate(gate: Gate<S>) -> Self {
        Self {
            gate,
            stats: Arc::new(CostAccumulator::new()),
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        match self.gate {
            Gate::Unbounded => StrategyKind::Unbounded,
            Gate::Bounded(_) => StrategyKind::Bounded,
            Gate::Pooled(_) => StrategyKind::Pooled,
        }
    }

    /// Execute a fetch operation under the configured strategy.
    ///
    /// The operation receives a pool slot under the pooled strategy, `None`
    /// otherwise. Its result passes through unchanged; on `success` the
    /// dispatcher records the transferred bytes and cost.
    pub async fn execute<F, Fut>(&self, op: F) -> Result<FetchResult, DispatchError>
    where
        F: FnOnce(Option<SessionSlot<S>>) -> Fut,
        Fut: Future<Output = FetchResult>,
    {
        let result = match &self.gate {
            Gate::Unbounded => op(None).await,
            Gate::Bounded(semaphore) => {
                // The permit is held for the duration of the operation and
                // released on drop - success, failure, and cancellation
                // alike, so capacity can never leak.
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| DispatchError::Closed)?;
                op(None).await
            }
            Gate::Pooled(pool) => {
                let slot = pool.acquire().await?;
                op(Some(slot)).await
            }
        };

        if result.success {
            self.stats.add(result.bytes, result.cost);
        }
        Ok(result)
    }

    /// Tear down the underlying gate. Idempotent; pending bounded callers
    /// and later `execute` calls fail with [`DispatchError::Closed`].
    pub async fn close(&self) {
        match &self.gate {
            Gate::Unbounded => {}
            Gate::Bounded(semaphore) => semaphore.close(),
            Gate::Pooled(pool) => pool.close().await,
        }
    }

    pub fn usage(&self) -> Usage {
        self.stats.snapshot()
    }

    pub fn stats(&self) -> Arc<CostAccumulator> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Instant, sleep};

    use crate::result::Payload;

    fn ok_result(bytes: u64, cost: f64) -> FetchResult {
        FetchResult::ok(
            Payload::Single(serde_json::json!("page")),
            bytes,
            cost,
            Utc::now(),
        )
    }

    #[test]
    fn config_default_is_valid() {
        assert!(ConcurrencyConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_capacity() {
        let config = ConcurrencyConfig {
            strategy: StrategyKind::Bounded,
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_rejects_zero_pool_size() {
        let config = ConcurrencyConfig {
            strategy: StrategyKind::Pooled,
            pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_rejects_zero_interval() {
        let config = ConcurrencyConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bounded_constructor_rejects_zero() {
        assert!(matches!(
            Dispatcher::<()>::bounded(0),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn pooled_constructor_rejects_zero() {
        assert!(matches!(
            Dispatcher::pooled(0, |i| async move { Ok(i) }),
            Err(DispatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn dispatch_error_classifies_as_admission_failure() {
        assert_eq!(
            DispatchError::Closed.kind(),
            ErrorKind::AdmissionFailure
        );
        assert_eq!(
            DispatchError::InvalidConfig("bad".into()).kind(),
            ErrorKind::AdmissionFailure
        );
    }

    #[tokio::test]
    async fn from_config_selects_strategy() {
        let config = ConcurrencyConfig {
            strategy: StrategyKind::Pooled,
            pool_size: 2,
            ..Default::default()
        };
        let dispatcher = Dispatcher::from_config(&config, |i| async move { Ok(i) }).unwrap();
        assert_eq!(dispatcher.strategy(), StrategyKind::Pooled);
    }

    #[tokio::test]
    async fn unbounded_passes_result_through() {
        let dispatcher = Dispatcher::<()>::unbounded();
        let result = dispatcher
            .execute(|slot| async move {
                assert!(slot.is_none());
                ok_result(100, 0.01)
            })
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(dispatcher.usage().total_bytes, 100);
    }

    #[tokio::test]
    async fn failed_result_passes_through_without_stats() {
        let dispatcher = Dispatcher::<()>::unbounded();
        let result = dispatcher
            .execute(|_| async {
                FetchResult::err(ErrorKind::TransportFailure, "connection reset", Utc::now())
            })
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::TransportFailure));
        assert_eq!(dispatcher.usage().total_bytes, 0);
        assert_eq!(dispatcher.usage().total_cost, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_never_exceeds_capacity() {
        let dispatcher = Arc::new(Dispatcher::<()>::bounded(2).unwrap());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .execute(|_| async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        ok_result(1, 0.0)
                    })
                    .await
                    .unwrap()
            }));
        }
        join_all(tasks).await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_queues_observable_wall_clock() {
        // 4 operations of duration d at capacity 2 take about 2d, not d.
        let d = Duration::from_millis(50);
        let dispatcher = Arc::new(Dispatcher::<()>::bounded(2).unwrap());

        let start = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let dispatcher = Arc::clone(&dispatcher);
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .execute(|_| async move {
                        sleep(d).await;
                        ok_result(1, 0.0)
                    })
                    .await
                    .unwrap()
            }));
        }
        join_all(tasks).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= 2 * d, "finished too fast: {:?}", elapsed);
        assert!(elapsed < 3 * d, "queueing took too long: {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_runs_fully_parallel() {
        let d = Duration::from_millis(50);
        let dispatcher = Arc::new(Dispatcher::<()>::unbounded());

        let start = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let dispatcher = Arc::clone(&dispatcher);
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .execute(|_| async move {
                        sleep(d).await;
                        ok_result(1, 0.0)
                    })
                    .await
                    .unwrap()
            }));
        }
        join_all(tasks).await;

        assert!(start.elapsed() < 2 * d);
    }

    #[tokio::test]
    async fn pooled_assigns_slots_round_robin() {
        let dispatcher = Dispatcher::pooled(2, |i| async move { Ok(i) }).unwrap();

        let mut indices = Vec::new();
        for _ in 0..4 {
            let result = dispatcher
                .execute(|slot| async move {
                    let slot = slot.expect("pooled dispatch must hand out a slot");
                    ok_result(slot.index as u64, 0.0)
                })
                .await
                .unwrap();
            indices.push(result.bytes);
        }
        assert_eq!(indices, vec![0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn pooled_stats_accumulate_across_operations() {
        let dispatcher = Dispatcher::pooled(1, |i| async move { Ok(i) }).unwrap();

        dispatcher
            .execute(|_| async { ok_result(500, 0.002) })
            .await
            .unwrap();
        dispatcher
            .execute(|_| async { ok_result(300, 0.001) })
            .await
            .unwrap();

        let usage = dispatcher.usage();
        assert_eq!(usage.total_bytes, 800);
        assert!((usage.total_cost - 0.003).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pooled_execute_after_close_fails() {
        let dispatcher = Dispatcher::pooled(1, |i| async move { Ok(i) }).unwrap();
        dispatcher
            .execute(|_| async { ok_result(1, 0.0) })
            .await
            .unwrap();

        dispatcher.close().await;
        let result = dispatcher.execute(|_| async { ok_result(1, 0.0) }).await;
        assert!(matches!(result, Err(DispatchError::Closed)));
    }

    #[tokio::test]
    async fn bounded_execute_after_close_fails() {
        let dispatcher = Dispatcher::<()>::bounded(1).unwrap();
        dispatcher.close().await;
        let result = dispatcher.execute(|_| async { ok_result(1, 0.0) }).await;
        assert!(matches!(result, Err(DispatchError::Closed)));
    }

    #[tokio::test]
    async fn cancelled_bounded_operation_releases_permit() {
        let dispatcher = Arc::new(Dispatcher::<()>::bounded(1).unwrap());

        let held = Arc::clone(&dispatcher);
        let task = tokio::spawn(async move {
            held.execute(|_| async {
                sleep(Duration::from_secs(3600)).await;
                ok_result(1, 0.0)
            })
            .await
        });
        // Let the task occupy the single permit, then cancel it mid-flight.
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        // The permit must have been returned: the next operation runs.
        let result = dispatcher
            .execute(|_| async { ok_result(1, 0.0) })
            .await
            .unwrap();
        assert!(result.success);
    }
}
