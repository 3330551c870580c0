// Per-namespace id allocation: the allocator contract plus an in-memory reference counter.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::error::{Error, ErrorKind};

/// Issues identifiers that strictly increase within each namespace.
///
/// Namespaces are compared exactly: `lab.Order` and `lab_order` are separate
/// counters. Shared across requests; implementations serialize their own increments.
pub trait IdAllocator: Send + Sync {
    fn next(&self, namespace: &str) -> Result<u64, Error>;
}

fn checked_namespace(namespace: &str) -> Result<&str, Error> {
    if namespace.trim().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("namespace is empty")
            .with_hint("Declare a non-empty namespace in the entity schema."));
    }
    Ok(namespace)
}

#[derive(Debug, Default)]
pub struct MemoryIdAllocator {
    counters: Mutex<HashMap<String, u64>>,
}

impl MemoryIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `namespace` after `last_issued`, e.g. the highest id already persisted.
    pub fn with_floor(mut self, namespace: &str, last_issued: u64) -> Self {
        let counters = self
            .counters
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = counters.entry(namespace.to_string()).or_insert(0);
        *entry = (*entry).max(last_issued);
        self
    }

    /// Last id issued for `namespace`, 0 if none.
    pub fn current(&self, namespace: &str) -> Result<u64, Error> {
        let namespace = checked_namespace(namespace)?;
        Ok(self.counters().get(namespace).copied().unwrap_or(0))
    }

    // Counter updates are single stores; a poisoned map is still consistent.
    fn counters(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdAllocator for MemoryIdAllocator {
    fn next(&self, namespace: &str) -> Result<u64, Error> {
        let namespace = checked_namespace(namespace)?;
        let mut counters = self.counters();
        let counter = counters.entry(namespace.to_string()).or_insert(0);
        let id = counter.checked_add(1).ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("id space exhausted")
                .with_namespace(namespace)
        })?;
        *counter = id;
        tracing::trace!(namespace, id, "issued id");
        Ok(id)
    }
}
