use std::sync::atomic::{AtomicI64, Ordering};

/// Lifetime and currently-alive session counters.
#[derive(Debug, Default)]
pub struct SessionGauges {
    total: AtomicI64,
    alive: AtomicI64,
}

impl SessionGauges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session; returns the alive count including it.
    #[inline]
    pub fn incr(&self) -> i64 {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.alive.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn decr(&self) {
        self.alive.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alive(&self) -> i64 {
        self.alive.load(Ordering::Relaxed)
    }

    /// Rebase the lifetime count onto the sessions still alive; part of a
    /// stats reset.
    #[inline]
    pub fn rebase_total(&self) {
        self.total.store(self.alive.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}
