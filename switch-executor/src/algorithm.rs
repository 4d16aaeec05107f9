use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use switch_common::signal::ParameterChange;
use switch_common::state::StateObject;

use crate::error::AlgorithmError;

/// One input of the executor, numbered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    pub sequence: u64,
    pub payload: Value,
}

impl DataItem {
    pub fn new(sequence: u64, payload: Value) -> Self {
        Self { sequence, payload }
    }
}

/// An exchangeable algorithm implementation.
///
/// An instance is owned by exactly one track. Its transferable state is exposed as a
/// `StateObject` so that a successor can be primed with it.
pub trait Algorithm: Send + 'static {
    fn name(&self) -> &str;

    fn process(&mut self, item: &DataItem) -> Result<Vec<Value>, AlgorithmError>;

    /// Snapshot of the current state.
    fn state(&self) -> StateObject;

    /// Replace the current state with `state`, typically after a state transfer.
    fn restore(&mut self, state: StateObject);

    fn apply_change(&mut self, change: &ParameterChange) -> Result<(), AlgorithmError>;
}

type Factory = Box<dyn Fn() -> Box<dyn Algorithm> + Send + Sync>;

/// Algorithms an executor can switch between. Built once during setup, read only afterwards.
pub struct AlgorithmRegistry {
    factories: HashMap<String, Factory>,
}

impl AlgorithmRegistry {
    pub fn builder() -> AlgorithmRegistryBuilder {
        AlgorithmRegistryBuilder::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Algorithm>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Default)]
pub struct AlgorithmRegistryBuilder {
    factories: HashMap<String, Factory>,
}

impl AlgorithmRegistryBuilder {
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Algorithm> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
        self
    }

    pub fn build(self) -> Arc<AlgorithmRegistry> {
        Arc::new(AlgorithmRegistry {
            factories: self.factories,
        })
    }
}
