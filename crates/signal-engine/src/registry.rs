//! Strategy registry.
//!
//! Executors are registered once at startup and resolved by `strategy_id`.
//! There is no global state: callers own the registry instance and pass it
//! to the engine explicitly.

use std::collections::HashMap;

use strategy_core::{EngineError, SignalGenerator, StrategySpec};

use crate::executor::{StableConservative, TrendMomentum};

pub struct StrategyRegistry {
    executors: HashMap<String, Box<dyn SignalGenerator>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in executors.
    pub fn with_builtins() -> Self {
        let mut executors: HashMap<String, Box<dyn SignalGenerator>> = HashMap::new();
        executors.insert(
            StableConservative::ID.to_string(),
            Box::new(StableConservative),
        );
        executors.insert(TrendMomentum::ID.to_string(), Box::new(TrendMomentum));
        Self { executors }
    }

    pub fn register(
        &mut self,
        strategy_id: impl Into<String>,
        executor: Box<dyn SignalGenerator>,
    ) -> Result<(), EngineError> {
        let strategy_id = strategy_id.into();
        if self.executors.contains_key(&strategy_id) {
            return Err(EngineError::invalid_input(format!(
                "strategy {strategy_id} is already registered"
            )));
        }
        self.executors.insert(strategy_id, executor);
        Ok(())
    }

    /// Resolve the executor for a spec. Unregistered ids are an input error.
    pub fn resolve(&self, spec: &StrategySpec) -> Result<&dyn SignalGenerator, EngineError> {
        self.executors
            .get(&spec.strategy_id)
            .map(|b| b.as_ref())
            .ok_or_else(|| {
                EngineError::invalid_input(format!(
                    "unknown strategy {:?}; registered: {:?}",
                    spec.strategy_id,
                    self.strategy_ids()
                ))
            })
    }

    pub fn strategy_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_registered(&self, strategy_id: &str) -> bool {
        self.executors.contains_key(strategy_id)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
