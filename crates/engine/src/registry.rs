//! The worker registry: resolves worker names declared in a definition to
//! concrete [`Worker`] implementations.
//!
//! The registry is populated once at composition time and shared read-only
//! between runs; independent runs hold the same `Arc` and never mutate it.

use std::collections::HashMap;
use std::sync::Arc;

use workflow::{Worker, WorkerName};

/// Maps worker names to implementations.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerName, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker under `name`, replacing any previous registration.
    pub fn register(&mut self, name: WorkerName, worker: Arc<dyn Worker>) {
        self.workers.insert(name, worker);
    }

    /// Registers a worker, builder style.
    #[must_use]
    pub fn with_worker(mut self, name: WorkerName, worker: Arc<dyn Worker>) -> Self {
        self.register(name, worker);
        self
    }

    /// Resolves a worker name.
    pub fn get(&self, name: &WorkerName) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    /// Returns `true` if `name` resolves.
    pub fn contains(&self, name: &WorkerName) -> bool {
        self.workers.contains_key(name)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` if no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow::{FnWorker, WorkerOutput};

    #[test]
    fn register_and_resolve() {
        let name = WorkerName::new("classifier").unwrap();
        let registry = WorkerRegistry::new()
            .with_worker(name.clone(), Arc::new(FnWorker::new(|_| Ok(WorkerOutput::new()))));

        assert!(registry.contains(&name));
        assert!(registry.get(&name).is_some());
        assert!(!registry.contains(&WorkerName::new("other").unwrap()));
        assert_eq!(registry.len(), 1);
    }
}
