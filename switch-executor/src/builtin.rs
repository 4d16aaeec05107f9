//! Algorithms that ship with the executor.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use switch_common::signal::{ParameterChange, ParameterChangeValue};
use switch_common::state::{PartOfState, StateObject, StatePolicy, StateValue};

use crate::algorithm::{Algorithm, AlgorithmRegistry, AlgorithmRegistryBuilder, DataItem};
use crate::error::AlgorithmError;

pub const PASSTHROUGH: &str = "passthrough";
pub const RUNNING_SUM: &str = "running-sum";
pub const RUNNING_MEAN: &str = "running-mean";

const DEFAULT_KEY: &str = "default";
const DEFAULT_WINDOW: usize = 100;

/// Register the built-in algorithms with a registry under construction.
pub fn register(builder: AlgorithmRegistryBuilder) -> AlgorithmRegistryBuilder {
    builder
        .register(PASSTHROUGH, || Box::new(Passthrough::new(PASSTHROUGH)))
        .register(RUNNING_SUM, || {
            Box::new(Running::new(RUNNING_SUM, RunningMode::Sum))
        })
        .register(RUNNING_MEAN, || {
            Box::new(Running::new(RUNNING_MEAN, RunningMode::Mean))
        })
}

pub fn registry() -> Arc<AlgorithmRegistry> {
    register(AlgorithmRegistry::builder()).build()
}

/// Emits every item unchanged. Has no state.
#[derive(Debug)]
pub struct Passthrough {
    name: String,
}

impl Passthrough {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl Algorithm for Passthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, item: &DataItem) -> Result<Vec<Value>, AlgorithmError> {
        Ok(vec![item.payload.clone()])
    }

    fn state(&self) -> StateObject {
        StateObject::new("Passthrough")
    }

    fn restore(&mut self, _state: StateObject) {}

    fn apply_change(&mut self, change: &ParameterChange) -> Result<(), AlgorithmError> {
        Err(AlgorithmError::UnsupportedChange(change.name.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    Sum,
    Mean,
}

/// Aggregates numeric values per key.
///
/// Items are either a bare number or `{"key": <string>, "value": <number>}`. Keeps the
/// most recent values in a bounded `history`, running `totals` per key and a `count` of
/// all items seen.
#[derive(Debug)]
pub struct Running {
    name: String,
    mode: RunningMode,
    history: Vec<f64>,
    totals: BTreeMap<String, f64>,
    count: i64,
    window: usize,
}

impl Running {
    pub fn new(name: &str, mode: RunningMode) -> Self {
        Self {
            name: name.to_owned(),
            mode,
            history: Vec::new(),
            totals: BTreeMap::new(),
            count: 0,
            window: DEFAULT_WINDOW,
        }
    }

    fn parse(item: &DataItem) -> Result<(String, f64), AlgorithmError> {
        let invalid = |reason: &str| AlgorithmError::InvalidItem {
            sequence: item.sequence,
            reason: reason.to_owned(),
        };

        match &item.payload {
            Value::Number(n) => n
                .as_f64()
                .map(|v| (DEFAULT_KEY.to_owned(), v))
                .ok_or_else(|| invalid("number out of range")),
            Value::Object(fields) => {
                let value = fields
                    .get("value")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| invalid("missing numeric value"))?;
                let key = fields
                    .get("key")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_KEY);
                Ok((key.to_owned(), value))
            }
            _ => Err(invalid("expected a number or an object")),
        }
    }

    fn trim_history(&mut self) {
        let excess = self.history.len().saturating_sub(self.window);
        self.history.drain(..excess);
    }

    fn mean(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().sum::<f64>() / self.history.len() as f64
        }
    }
}

impl Algorithm for Running {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, item: &DataItem) -> Result<Vec<Value>, AlgorithmError> {
        let (key, value) = Self::parse(item)?;

        self.count += 1;
        self.history.push(value);
        self.trim_history();
        let total = self.totals.entry(key.clone()).or_insert(0.0);
        *total += value;
        let total = *total;

        let output = match self.mode {
            RunningMode::Sum => json!({"key": key, "total": total, "count": self.count}),
            RunningMode::Mean => json!({"key": key, "mean": self.mean(), "count": self.count}),
        };
        Ok(vec![output])
    }

    fn state(&self) -> StateObject {
        let totals = self
            .totals
            .iter()
            .map(|(k, v)| (k.clone(), StateValue::Float(*v)))
            .collect::<BTreeMap<_, _>>();

        StateObject::new("Running")
            .with_field(
                "history",
                PartOfState::new(StatePolicy::Merge),
                self.history.clone(),
            )
            .with_field(
                "totals",
                PartOfState::new(StatePolicy::MergeAndKeepOld),
                StateValue::Map(totals),
            )
            .with_field("count", PartOfState::default(), self.count)
            .with_plain_field("window", i64::try_from(self.window).unwrap_or(i64::MAX))
    }

    fn restore(&mut self, state: StateObject) {
        if let Some(history) = state.get("history").and_then(StateValue::as_list) {
            self.history = history.iter().filter_map(as_f64).collect();
        }
        if let Some(totals) = state.get("totals").and_then(StateValue::as_map) {
            self.totals = totals
                .iter()
                .filter_map(|(k, v)| as_f64(v).map(|v| (k.clone(), v)))
                .collect();
        }
        if let Some(count) = state.get("count").and_then(StateValue::as_int) {
            self.count = count;
        }
        self.trim_history();
    }

    fn apply_change(&mut self, change: &ParameterChange) -> Result<(), AlgorithmError> {
        match (change.name.as_str(), &change.value) {
            ("window", ParameterChangeValue::Int(window)) if *window > 0 => {
                self.window = usize::try_from(*window)
                    .map_err(|_| AlgorithmError::UnsupportedChange(change.name.clone()))?;
                self.trim_history();
                Ok(())
            }
            _ => Err(AlgorithmError::UnsupportedChange(change.name.clone())),
        }
    }
}

fn as_f64(value: &StateValue) -> Option<f64> {
    match value {
        StateValue::Float(v) => Some(*v),
        StateValue::Int(v) => Some(*v as f64),
        _ => None,
    }
}
