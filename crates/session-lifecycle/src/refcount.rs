//! Atomic reference counter
//!
//! Wait-free counter governing how long a session's resources stay valid.
//! All operations use sequentially-consistent ordering so that, among any set
//! of concurrent decrements, exactly one observes the transition to zero.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::error;

/// Atomic reference counter with explicit destruction
#[derive(Debug)]
pub struct RefCounter {
    count: AtomicUsize,
    destroyed: AtomicBool,
}

impl RefCounter {
    /// Create a counter starting at `initial`
    pub fn create(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Add one reference
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove one reference and return the value after the decrement
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero. That means some component
    /// released a reference it never acquired, and the session state can no
    /// longer be trusted.
    pub fn decrement_and_get(&self) -> usize {
        match self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => {
                error!("Reference count underflow: release without matching acquire");
                panic!("reference count decremented below zero");
            }
        }
    }

    /// Mark the counter storage as dead
    ///
    /// Only the release that observed zero may call this; nothing else can be
    /// racing with it at that point.
    ///
    /// # Panics
    ///
    /// Panics if the counter was already destroyed.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            error!("Reference counter destroyed twice");
            panic!("reference counter destroyed twice");
        }
    }

    /// Current value (a snapshot; may be stale immediately)
    pub fn value(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_increment_decrement() {
        let counter = RefCounter::create(0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.value(), 2);
        assert_eq!(counter.decrement_and_get(), 1);
        assert_eq!(counter.decrement_and_get(), 0);
        assert!(!counter.is_destroyed());
        counter.destroy();
        assert!(counter.is_destroyed());
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_underflow_is_fatal() {
        let counter = RefCounter::create(0);
        counter.decrement_and_get();
    }

    #[test]
    fn test_underflow_leaves_count_at_zero() {
        let counter = Arc::new(RefCounter::create(0));
        let failing = counter.clone();
        let result = thread::spawn(move || failing.decrement_and_get()).join();
        assert!(result.is_err());
        assert_eq!(counter.value(), 0);
    }

    #[test]
    #[should_panic(expected = "destroyed twice")]
    fn test_double_destroy_is_fatal() {
        let counter = RefCounter::create(0);
        counter.destroy();
        counter.destroy();
    }

    #[test]
    fn test_exactly_one_decrement_observes_zero() {
        const THREADS: usize = 16;

        for _ in 0..50 {
            let counter = Arc::new(RefCounter::create(THREADS));
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let counter = counter.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        counter.decrement_and_get() == 0
                    })
                })
                .collect();

            let zeros = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|hit_zero| *hit_zero)
                .count();
            assert_eq!(zeros, 1);
            assert_eq!(counter.value(), 0);
        }
    }
}
