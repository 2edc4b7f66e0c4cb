//! # Engine Registry
//!
//! Name → engine lookup, and resolution of configured bindings into ordered
//! engine chains. Every engine a binding names must be registered before the
//! dispatcher starts; an unknown name is a configuration error at startup
//! rather than a rejected message later.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::Engine;
use crate::config::EngineBinding;
use crate::error::{ConsolidationError, Result};

/// Engines bound to one routing-key pattern, in execution order
#[derive(Clone)]
pub struct EngineChain {
    binding: EngineBinding,
    engines: Vec<Arc<dyn Engine>>,
}

impl EngineChain {
    pub fn binding(&self) -> &EngineBinding {
        &self.binding
    }

    pub fn engines(&self) -> &[Arc<dyn Engine>] {
        &self.engines
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.iter().map(|engine| engine.name().to_string()).collect()
    }
}

impl std::fmt::Debug for EngineChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineChain")
            .field("routing_key", &self.binding.routing_key)
            .field("input_queue", &self.binding.input_queue)
            .field("engines", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn Engine>>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its own name; names are unique
    pub fn register(&mut self, engine: Arc<dyn Engine>) -> Result<()> {
        let name = engine.name().to_string();
        if self.engines.contains_key(&name) {
            return Err(ConsolidationError::configuration(format!(
                "engine {name} is already registered"
            )));
        }
        debug!(engine = %name, input_classes = ?engine.input_classes(), "Registered engine");
        self.engines.insert(name, engine);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(name).cloned()
    }

    /// Registered engine names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Engines for `names`, in the given order
    pub fn chain(&self, names: &[String]) -> Result<Vec<Arc<dyn Engine>>> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    ConsolidationError::configuration(format!("engine {name} is not registered"))
                })
            })
            .collect()
    }

    /// One chain per binding, failing on the first unknown engine name
    pub fn build_chains(&self, bindings: &[EngineBinding]) -> Result<Vec<EngineChain>> {
        let chains = bindings
            .iter()
            .map(|binding| {
                Ok(EngineChain {
                    binding: binding.clone(),
                    engines: self.chain(&binding.engines)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            bindings = chains.len(),
            engines = self.engines.len(),
            "Engine chains resolved"
        );
        Ok(chains)
    }
}
