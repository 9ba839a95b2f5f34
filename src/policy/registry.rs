//! Name-indexed registry of policies.
//!
//! Policies register once at startup; the dispatcher resolves configured names
//! against the registry when it is built, and policies that chain to other
//! policies look them up through the [`PolicyInvoker`](super::PolicyInvoker).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::Policy;

/// Registry of invocable policies keyed by name.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<dyn Policy>>>,
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.names())
            .finish()
    }
}

impl PolicyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy under its own name, returning any policy it replaced.
    pub fn register(&self, policy: Arc<dyn Policy>) -> Option<Arc<dyn Policy>> {
        let name = policy.name().to_owned();
        match self.policies.write() {
            Ok(mut map) => {
                debug!(policy = %name, "registering policy");
                map.insert(name, policy)
            }
            Err(e) => {
                warn!(error = %e, policy = %name, "policy registry lock poisoned in register");
                None
            }
        }
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Policy>> {
        match self.policies.read() {
            Ok(map) => map.get(name).cloned(),
            Err(e) => {
                warn!(error = %e, "policy registry lock poisoned in get");
                None
            }
        }
    }

    /// Whether a policy is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.policies.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(e) => {
                warn!(error = %e, "policy registry lock poisoned in names");
                Vec::new()
            }
        };
        names.sort();
        names
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        match self.policies.read() {
            Ok(map) => map.len(),
            Err(_) => 0,
        }
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
