//! Step type registry.

use super::{ForkStep, SectionStep, Step, StrategyStep};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps step type names to implementations.
#[derive(Default)]
pub struct StepRegistry {
    steps: RwLock<HashMap<String, Arc<dyn Step>>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in structural steps.
    #[must_use]
    pub fn with_builtins(bare_strategy_fanout: usize) -> Self {
        let registry = Self::new();
        registry.register(StrategyStep::new(bare_strategy_fanout));
        registry.register(ForkStep);
        registry.register(SectionStep);
        registry
    }

    /// Registers `step` under its step type, replacing any previous one.
    pub fn register<S>(&self, step: S)
    where
        S: Step + 'static,
    {
        self.register_arc(Arc::new(step));
    }

    /// Registers a shared step.
    pub fn register_arc(&self, step: Arc<dyn Step>) {
        let step_type = step.step_type().to_string();
        if self.steps.write().insert(step_type.clone(), step).is_some() {
            tracing::debug!(step_type, "Replaced registered step");
        }
    }

    /// Looks up the implementation for `step_type`.
    #[must_use]
    pub fn get(&self, step_type: &str) -> Option<Arc<dyn Step>> {
        self.steps.read().get(step_type).cloned()
    }

    /// True if `step_type` has an implementation.
    #[must_use]
    pub fn contains(&self, step_type: &str) -> bool {
        self.steps.read().contains_key(step_type)
    }

    /// Registered step types, sorted.
    #[must_use]
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.steps.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}
