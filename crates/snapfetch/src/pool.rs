//! Round-robin session pool.
//!
//! A fixed set of long-lived sessions, built lazily on first acquisition and
//! handed out in rotating order. The pool amortizes session setup cost
//! through reuse, it does not provide mutual exclusion: when concurrent
//! demand exceeds the pool size, several in-flight calls share a session.
//! A caller needing exclusion wraps the session type in its own lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;

type SessionFactory<S> =
    dyn Fn(usize) -> Pin<Box<dyn Future<Output = anyhow::Result<S>> + Send>> + Send + Sync;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool size must be at least 1")]
    InvalidSize,

    #[error("session pool is closed")]
    Closed,

    #[error("session init failed: {0}")]
    Init(#[from] anyhow::Error),
}

/// One round-robin assignment from the pool.
///
/// `epoch` is the absolute acquisition sequence number; `index` is
/// `epoch % pool_size`. The held session stays alive even if the pool is
/// closed while this slot is in flight.
#[derive(Debug, Clone)]
pub struct SessionSlot<S> {
    pub index: usize,
    pub epoch: u64,
    session: Arc<S>,
}

impl<S> SessionSlot<S> {
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_arc(&self) -> Arc<S> {
        Arc::clone(&self.session)
    }
}

/// Fixed-size pool of reusable sessions assigned in round-robin order.
pub struct SessionPool<S> {
    size: usize,
    factory: Box<SessionFactory<S>>,
    /// Built exactly once on first acquisition, dropped on close.
    sessions: Mutex<Option<Vec<Arc<S>>>>,
    rr_counter: AtomicU64,
    closed: AtomicBool,
}

impl<S> SessionPool<S> {
    /// Create an empty pool; sessions are built on first `acquire()`.
    ///
    /// The factory receives the slot index it is building. A zero `size` is
    /// rejected with [`PoolError::InvalidSize`].
    pub fn new<F, Fut>(size: usize, factory: F) -> Result<Self, PoolError>
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
    {
        if size == 0 {
            return Err(PoolError::InvalidSize);
        }
        Ok(Self {
            size,
            factory: Box::new(move |i| Box::pin(factory(i))),
            sessions: Mutex::new(None),
            rr_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Acquire the next session in round-robin order.
    ///
    /// Never waits for a session to free up - sessions are shared by
    /// reference. The first call builds the whole pool; concurrent first
    /// callers serialize on an internal lock so construction happens exactly
    /// once. Acquisition after `close()` fails with [`PoolError::Closed`].
    pub async fn acquire(&self) -> Result<SessionSlot<S>, PoolError> {
        // The round-robin counter advances exactly once per call, whatever
        // the outcome.
        let epoch = self.rr_counter.fetch_add(1, Ordering::Relaxed);

        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let mut guard = self.sessions.lock().await;
        // Recheck under the lock: close() may have won the race.
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let sessions = match guard.as_mut() {
            Some(sessions) => sessions,
            None => {
                let mut built = Vec::with_capacity(self.size);
                for i in 0..self.size {
                    built.push(Arc::new((self.factory)(i).await?));
                }
                tracing::debug!(size = self.size, "session pool initialized");
                guard.insert(built)
            }
        };

        let index = (epoch % self.size as u64) as usize;
        Ok(SessionSlot {
            index,
            epoch,
            session: Arc::clone(&sessions[index]),
        })
    }

    /// Close the pool and drop all sessions.
    ///
    /// Idempotent: calling it twice is a no-op. In-flight slots keep their
    /// session alive until dropped.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut guard = self.sessions.lock().await;
        if let Some(sessions) = guard.take() {
            tracing::debug!(size = sessions.len(), "session pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Total `acquire()` calls made so far, successful or not.
    pub fn acquisitions(&self) -> u64 {
        self.rr_counter.load(Ordering::Relaxed)
    }

    /// Whether the sessions have been built (and not yet closed).
    pub async fn is_initialized(&self) -> bool {
        self.sessions.lock().await.is_some()
    }
}
