//! Harness registry -- a named collection of available harness adapters.
//!
//! The registry allows the orchestrator to look up harnesses by name at
//! runtime (e.g. when a task specifies `assigned_harness = "claude-code"`).

use std::collections::HashMap;
use std::sync::Arc;

use super::trait_def::Harness;

/// A collection of registered [`Harness`] implementations, keyed by name.
///
/// Harnesses are held behind an `Arc` rather than a `Box` so the work
/// orchestrator (C6) can clone one out and move it into a spawned
/// supervisor task without borrowing the registry for the task's lifetime.
///
/// # Example
///
/// ```ignore
/// let mut registry = HarnessRegistry::new();
/// registry.register(ClaudeCodeAdapter::new());
/// let harness = registry.get("claude-code").unwrap();
/// ```
#[derive(Default)]
pub struct HarnessRegistry {
    harnesses: HashMap<String, Arc<dyn Harness>>,
}

impl HarnessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a harness adapter.
    ///
    /// The harness is stored under the name returned by [`Harness::name`].
    /// If a harness with the same name is already registered, it is
    /// replaced and the old one is returned.
    pub fn register(&mut self, harness: impl Harness + 'static) -> Option<Arc<dyn Harness>> {
        let name = harness.name().to_string();
        self.harnesses.insert(name, Arc::new(harness))
    }

    /// Look up a harness by name, cloning out a shared handle.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Harness>> {
        self.harnesses.get(name).cloned()
    }

    /// List the names of all registered harnesses.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.harnesses.keys().map(|s| s.as_str()).collect()
    }

    /// Return the number of registered harnesses.
    pub fn len(&self) -> usize {
        self.harnesses.len()
    }

    /// Return `true` if no harnesses are registered.
    pub fn is_empty(&self) -> bool {
        self.harnesses.is_empty()
    }
}

impl std::fmt::Debug for HarnessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRegistry")
            .field("harnesses", &self.harnesses.keys().collect::<Vec<_>>())
            .finish()
    }
}
