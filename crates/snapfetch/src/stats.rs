//! Running cost and transfer accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Bandwidth price, USD per GiB transferred.
pub const COST_PER_GIB: f64 = 8.40;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

/// Cost of transferring `bytes` at the per-GiB bandwidth price.
pub fn cost_for_bytes(bytes: u64) -> f64 {
    (bytes as f64 / GIB) * COST_PER_GIB
}

/// Read-only snapshot of accumulated totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Usage {
    pub total_bytes: u64,
    /// Total cost, USD.
    pub total_cost: f64,
}

/// Running totals of bytes transferred and cost incurred.
///
/// Safe under concurrent invocation from parallel fetch completions. Cost is
/// accumulated in integer micro-dollars so increments stay lock-free; totals
/// never decrease, and failed fetches contribute nothing.
#[derive(Debug, Default)]
pub struct CostAccumulator {
    total_bytes: AtomicU64,
    cost_micros: AtomicU64,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful fetch.
    pub fn add(&self, bytes: u64, cost: f64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        let micros = (cost * MICROS_PER_DOLLAR).round().max(0.0) as u64;
        self.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Merge a fetch outcome into the totals. Failed results are ignored.
    pub fn record(&self, result: &crate::result::FetchResult) {
        if result.success {
            self.add(result.bytes, result.cost);
        }
    }

    pub fn snapshot(&self) -> Usage {
        Usage {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_cost: self.cost_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_DOLLAR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_at_zero() {
        let acc = CostAccumulator::new();
        let usage = acc.snapshot();
        assert_eq!(usage.total_bytes, 0);
        assert_eq!(usage.total_cost, 0.0);
    }

    #[test]
    fn add_accumulates_exact_sums() {
        let acc = CostAccumulator::new();
        acc.add(1000, 0.25);
        acc.add(2000, 0.50);
        let usage = acc.snapshot();
        assert_eq!(usage.total_bytes, 3000);
        assert!((usage.total_cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn negative_cost_is_clamped() {
        let acc = CostAccumulator::new();
        acc.add(10, -1.0);
        assert_eq!(acc.snapshot().total_cost, 0.0);
    }

    #[test]
    fn record_ignores_failed_results() {
        use crate::error::ErrorKind;
        use crate::result::{FetchResult, Payload};

        let acc = CostAccumulator::new();
        acc.record(&FetchResult::ok(
            Payload::Single(serde_json::json!("html")),
            400,
            0.004,
            chrono::Utc::now(),
        ));
        acc.record(&FetchResult::err(
            ErrorKind::TransportFailure,
            "reset",
            chrono::Utc::now(),
        ));

        let usage = acc.snapshot();
        assert_eq!(usage.total_bytes, 400);
        assert!((usage.total_cost - 0.004).abs() < 1e-9);
    }

    #[test]
    fn cost_per_gib_arithmetic() {
        assert_eq!(cost_for_bytes(0), 0.0);
        let one_gib = 1024 * 1024 * 1024;
        assert!((cost_for_bytes(one_gib) - COST_PER_GIB).abs() < 1e-9);
        assert!((cost_for_bytes(one_gib / 2) - COST_PER_GIB / 2.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_sum_exactly() {
        let acc = Arc::new(CostAccumulator::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let acc = Arc::clone(&acc);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    acc.add(10, 0.001);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let usage = acc.snapshot();
        assert_eq!(usage.total_bytes, 8 * 100 * 10);
        assert!((usage.total_cost - 0.8).abs() < 1e-9);
    }
}
