//! Named work functions.
//!
//! Definitions crossing a process boundary carry only a name, so every
//! process that may execute a benchmark builds the same registry.

use std::collections::HashMap;
use std::future::Future;
use std::hint::black_box;
use std::pin::Pin;

use calibench_core::ManagedTimer;

/// Runs the work `count` times back to back.
pub type BatchFn = Box<dyn Fn(u64) + Send + Sync>;

/// Drives its own [`ManagedTimer`].
pub type ManagedFn = Box<dyn Fn(&mut ManagedTimer) + Send + Sync>;

/// Produces one future per call.
pub type AsyncFn = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A registered unit of work.
pub enum WorkFn {
    /// Timed by the engine around a whole batch.
    Unmanaged(BatchFn),
    /// Times itself, so setup and teardown stay out of the sample.
    Managed(ManagedFn),
    /// Awaited on a current-thread runtime owned by the engine.
    Async(AsyncFn),
}

impl WorkFn {
    /// Whether the work decides where measurement starts and ends.
    pub fn is_managed(&self) -> bool {
        matches!(self, WorkFn::Managed(_))
    }
}

impl std::fmt::Debug for WorkFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkFn::Unmanaged(_) => f.write_str("WorkFn::Unmanaged"),
            WorkFn::Managed(_) => f.write_str("WorkFn::Managed"),
            WorkFn::Async(_) => f.write_str("WorkFn::Async"),
        }
    }
}

/// Registry of benchmark work functions, in registration order.
#[derive(Debug, Default)]
pub struct BenchmarkRegistry {
    entries: Vec<(String, WorkFn)>,
    index: HashMap<String, usize>,
}

impl BenchmarkRegistry {
    /// Create a new empty benchmark registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: String, work: WorkFn) {
        match self.index.get(&name) {
            Some(&idx) => self.entries[idx].1 = work,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, work));
            }
        }
    }

    /// Register a plain function; its return value is kept alive with
    /// [`black_box`] so the call cannot be optimized out.
    ///
    /// The batch loop is generated here, per function, so the timed
    /// region makes a single indirect call per batch.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = BenchmarkRegistry::new();
    /// registry.register("sum", || (0..100u64).sum::<u64>());
    /// ```
    pub fn register<F, T>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let batch = move |count: u64| {
            for _ in 0..count {
                black_box(f());
            }
        };
        self.insert(name.into(), WorkFn::Unmanaged(Box::new(batch)));
    }

    /// Register a function that controls its own timer.
    ///
    /// It should run `timer.count()` iterations between `timer.start()`
    /// and `timer.end(iterations)`.
    pub fn register_managed<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut ManagedTimer) + Send + Sync + 'static,
    {
        self.insert(name.into(), WorkFn::Managed(Box::new(f)));
    }

    /// Register an async function. Each iteration awaits one fresh future.
    pub fn register_async<F, Fut, T>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let make = move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            let fut = f();
            Box::pin(async move {
                black_box(fut.await);
            })
        };
        self.insert(name.into(), WorkFn::Async(Box::new(make)));
    }

    /// List all registered benchmark names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Look up a work function by name.
    pub fn get(&self, name: &str) -> Option<&WorkFn> {
        self.index.get(name).map(|&idx| &self.entries[idx].1)
    }

    /// Iterate over `(name, work)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &WorkFn)> {
        self.entries.iter().map(|(name, work)| (name.as_str(), work))
    }

    /// Check if a benchmark with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get the number of registered benchmarks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_registry_new() {
        let registry = BenchmarkRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_preserves_order() {
        let mut registry = BenchmarkRegistry::new();
        registry.register("zeta", || 1);
        registry.register("alpha", || 2);
        registry.register_managed("mid", |timer| {
            timer.start();
            timer.end(1);
        });

        assert_eq!(registry.list(), vec!["zeta", "alpha", "mid"]);
        assert!(registry.contains("alpha"));
        assert!(!registry.contains("beta"));
        assert!(registry.get("mid").unwrap().is_managed());
        assert!(!registry.get("zeta").unwrap().is_managed());
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let mut registry = BenchmarkRegistry::new();
        registry.register("a", || 1);
        registry.register("b", || 2);
        registry.register_managed("a", |_| {});

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.list(), vec!["a", "b"]);
        assert!(registry.get("a").unwrap().is_managed());
    }

    #[test]
    fn test_batch_runs_count_times() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);

        let mut registry = BenchmarkRegistry::new();
        registry.register("count", move || counter.fetch_add(1, Ordering::Relaxed));

        match registry.get("count") {
            Some(WorkFn::Unmanaged(batch)) => batch(25),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::Relaxed), 25);
    }

    #[test]
    fn test_async_registration() {
        let mut registry = BenchmarkRegistry::new();
        registry.register_async("io", || async { 42 });

        assert!(matches!(registry.get("io"), Some(WorkFn::Async(_))));
    }
}
