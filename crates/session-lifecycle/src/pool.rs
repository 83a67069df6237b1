//! Memory pools backing INVITE sessions
//!
//! A session owns two pools that alternate between the "active" role (state of
//! the last completed offer/answer) and the "provisional" role (state of the
//! negotiation in flight). When a negotiation completes the roles swap and the
//! new provisional pool is reset. Both pools go back to their factory exactly
//! once, during teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::errors::{LifecycleError, Result};

/// Accounting arena handed out by a [`PoolFactory`]
#[derive(Debug)]
pub struct MemoryPool {
    name: String,
    initial_size: usize,
    capacity: usize,
    used: usize,
}

impl MemoryPool {
    fn new(config: &PoolConfig) -> Self {
        Self {
            name: config.name.clone(),
            initial_size: config.initial_size,
            capacity: config.capacity,
            used: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out since creation or the last reset
    pub fn used(&self) -> usize {
        self.used
    }

    /// Reserve `size` bytes from the pool
    pub fn alloc(&mut self, size: usize) -> Result<()> {
        let capacity = self.capacity;
        let Some(total) = self.used.checked_add(size).filter(|t| *t <= capacity) else {
            return Err(LifecycleError::PoolExhausted {
                pool: self.name.clone(),
                requested: size,
                capacity,
            });
        };
        self.used = total;
        Ok(())
    }

    /// Return every allocation to the pool without releasing it
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// Creates and reclaims memory pools
pub trait PoolFactory: Send + Sync {
    /// Create a pool sized per `config`
    fn create_pool(&self, config: &PoolConfig) -> Result<MemoryPool>;

    /// Give a pool back to the factory. Consumes the pool, so each pool can be
    /// released only once.
    fn release_pool(&self, pool: MemoryPool);
}

/// Pool factory that tracks outstanding reservations against a global budget
#[derive(Debug)]
pub struct CachingPoolFactory {
    max_bytes: usize,
    reserved: AtomicUsize,
    outstanding: AtomicUsize,
}

impl CachingPoolFactory {
    /// Create a factory without a practical budget
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Create a factory that refuses pools once `max_bytes` are reserved
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            reserved: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Number of pools created and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Bytes currently reserved by outstanding pools
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }
}

impl Default for CachingPoolFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolFactory for CachingPoolFactory {
    fn create_pool(&self, config: &PoolConfig) -> Result<MemoryPool> {
        let reserve = config.initial_size;
        let max_bytes = self.max_bytes;
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(reserve).filter(|total| *total <= max_bytes)
            })
            .map_err(|current| {
                warn!(
                    "Pool budget exhausted creating {} ({} of {} bytes reserved)",
                    config.name, current, max_bytes
                );
                LifecycleError::PoolExhausted {
                    pool: config.name.clone(),
                    requested: reserve,
                    capacity: max_bytes,
                }
            })?;

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        debug!("Created pool {} ({} bytes)", config.name, reserve);
        Ok(MemoryPool::new(config))
    }

    fn release_pool(&self, pool: MemoryPool) {
        self.reserved.fetch_sub(pool.initial_size, Ordering::SeqCst);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug!("Released pool {} ({} bytes used)", pool.name, pool.used);
    }
}

/// Role of a pool within a [`FlipFlopPools`] pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    Active,
    Provisional,
}

/// Pair of pools alternating between the active and provisional roles
#[derive(Debug)]
pub struct FlipFlopPools {
    pools: [MemoryPool; 2],
    /// Even generation: `pools[0]` is active. Odd: `pools[1]` is active.
    generation: u64,
}

impl FlipFlopPools {
    pub fn new(active: MemoryPool, provisional: MemoryPool) -> Self {
        Self {
            pools: [active, provisional],
            generation: 0,
        }
    }

    /// Number of completed swaps
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn index(&self, role: PoolRole) -> usize {
        let active = (self.generation % 2) as usize;
        match role {
            PoolRole::Active => active,
            PoolRole::Provisional => 1 - active,
        }
    }

    pub fn get(&self, role: PoolRole) -> &MemoryPool {
        &self.pools[self.index(role)]
    }

    pub fn get_mut(&mut self, role: PoolRole) -> &mut MemoryPool {
        let idx = self.index(role);
        &mut self.pools[idx]
    }

    /// Promote the provisional pool to active after a completed negotiation.
    /// The previously active pool becomes provisional and is reset.
    pub fn swap(&mut self) {
        self.generation += 1;
        self.get_mut(PoolRole::Provisional).reset();
        debug!(
            "Swapped session pools, generation {} active={}",
            self.generation,
            self.get(PoolRole::Active).name()
        );
    }

    /// Release both pools, provisional first
    pub fn release(self, factory: &dyn PoolFactory) {
        let generation = self.generation;
        let [first, second] = self.pools;
        let (active, provisional) = if generation % 2 == 0 {
            (first, second)
        } else {
            (second, first)
        };
        factory.release_pool(provisional);
        factory.release_pool(active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn pool_config(name: &str, initial_size: usize, capacity: usize) -> PoolConfig {
        PoolConfig {
            name: name.to_string(),
            initial_size,
            capacity,
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        released: Mutex<Vec<String>>,
    }

    impl PoolFactory for RecordingFactory {
        fn create_pool(&self, config: &PoolConfig) -> Result<MemoryPool> {
            Ok(MemoryPool::new(config))
        }

        fn release_pool(&self, pool: MemoryPool) {
            self.released.lock().unwrap().push(pool.name().to_string());
        }
    }

    #[test]
    fn test_alloc_within_capacity() {
        let mut pool = MemoryPool::new(&pool_config("p", 10, 100));
        pool.alloc(60).unwrap();
        assert_eq!(pool.used(), 60);
        assert!(pool.alloc(50).is_err());
        pool.reset();
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_oversized_alloc_is_exhaustion() {
        let mut pool = MemoryPool::new(&pool_config("p", 10, 100));
        pool.alloc(10).unwrap();
        let err = pool.alloc(usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::PoolExhausted { requested: usize::MAX, capacity: 100, .. }
        ));
        assert_eq!(pool.used(), 10);
    }

    #[test]
    fn test_factory_budget() {
        let factory = CachingPoolFactory::with_limit(1500);
        let a = factory.create_pool(&pool_config("a", 1000, 4000)).unwrap();
        let err = factory.create_pool(&pool_config("b", 1000, 4000)).unwrap_err();
        assert!(matches!(err, LifecycleError::PoolExhausted { .. }));
        assert_eq!(factory.outstanding(), 1);

        factory.release_pool(a);
        assert_eq!(factory.outstanding(), 0);
        assert_eq!(factory.reserved_bytes(), 0);
        assert!(factory.create_pool(&pool_config("b", 1000, 4000)).is_ok());
    }

    #[test]
    fn test_swap_resets_new_provisional() {
        let factory = RecordingFactory::default();
        let mut pools = FlipFlopPools::new(
            factory.create_pool(&pool_config("one", 10, 100)).unwrap(),
            factory.create_pool(&pool_config("two", 10, 100)).unwrap(),
        );
        assert_eq!(pools.get(PoolRole::Active).name(), "one");

        pools.get_mut(PoolRole::Active).alloc(10).unwrap();
        pools.get_mut(PoolRole::Provisional).alloc(20).unwrap();
        pools.swap();

        assert_eq!(pools.generation(), 1);
        assert_eq!(pools.get(PoolRole::Active).name(), "two");
        assert_eq!(pools.get(PoolRole::Active).used(), 20);
        assert_eq!(pools.get(PoolRole::Provisional).name(), "one");
        assert_eq!(pools.get(PoolRole::Provisional).used(), 0);
    }

    #[test]
    fn test_release_order_follows_roles() {
        let factory = RecordingFactory::default();
        let mut pools = FlipFlopPools::new(
            factory.create_pool(&pool_config("one", 10, 100)).unwrap(),
            factory.create_pool(&pool_config("two", 10, 100)).unwrap(),
        );
        pools.swap();
        pools.release(&factory);

        // After one swap "one" is provisional, so it goes back first
        assert_eq!(*factory.released.lock().unwrap(), vec!["one", "two"]);
    }
}
