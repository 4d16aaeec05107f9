#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use switch_common::signal::{AlgorithmChangeSignal, ParameterChange};
use switch_common::state::{FieldFailure, PartOfState, StateObject, StatePolicy, StateValue};
use switch_executor::algorithm::{Algorithm, AlgorithmRegistry, DataItem};
use switch_executor::builtin;
use switch_executor::error::AlgorithmError;
use switch_executor::listener::SwitchListener;
use switch_executor::mechanism::{MechanismConfig, SwitchMechanism, SwitchState};
use switch_executor::strategy::StrategyKind;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub const PIPELINE: &str = "pipeline";
pub const EXECUTOR: &str = "executor";

pub const TAG_A: &str = "tag-a";
pub const TAG_B: &str = "tag-b";
pub const SLOW_A: &str = "slow-a";
pub const MAP_HISTORY: &str = "map-history";
pub const FRAGILE: &str = "fragile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    Started { from: String, to: String },
    Completed { to: String },
    TransferFailed { field: String },
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<SwitchEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<SwitchEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: SwitchEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl SwitchListener for RecordingListener {
    fn transition_started(&self, signal: &AlgorithmChangeSignal, from: &str) {
        self.push(SwitchEvent::Started {
            from: from.to_owned(),
            to: signal.algorithm.clone(),
        });
    }

    fn transition_completed(&self, signal: &AlgorithmChangeSignal, _duration: Duration) {
        self.push(SwitchEvent::Completed {
            to: signal.algorithm.clone(),
        });
    }

    fn state_transfer_failed(&self, _signal: &AlgorithmChangeSignal, failure: &FieldFailure) {
        self.push(SwitchEvent::TransferFailed {
            field: failure.field.clone(),
        });
    }
}

pub fn started_event(from: &str, to: &str) -> SwitchEvent {
    SwitchEvent::Started {
        from: from.to_owned(),
        to: to.to_owned(),
    }
}

pub fn completed(to: &str) -> SwitchEvent {
    SwitchEvent::Completed { to: to.to_owned() }
}

/// Tags every output with the algorithm that produced it.
pub struct Tagging {
    name: String,
    delay: Duration,
    seen: i64,
}

impl Tagging {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_owned(),
            delay,
            seen: 0,
        }
    }
}

impl Algorithm for Tagging {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, item: &DataItem) -> Result<Vec<Value>, AlgorithmError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.seen += 1;
        Ok(vec![json!({
            "alg": self.name,
            "seq": item.sequence,
            "seen": self.seen,
        })])
    }

    fn state(&self) -> StateObject {
        StateObject::new("Tagging").with_field("seen", PartOfState::default(), self.seen)
    }

    fn restore(&mut self, state: StateObject) {
        if let Some(seen) = state.get("seen").and_then(StateValue::as_int) {
            self.seen = seen;
        }
    }

    fn apply_change(&mut self, change: &ParameterChange) -> Result<(), AlgorithmError> {
        Err(AlgorithmError::UnsupportedChange(change.name.clone()))
    }
}

/// Counts items like the running aggregates but keeps its history as a map, so a
/// running aggregate's list history cannot be carried into it.
pub struct MapHistory {
    history: BTreeMap<String, StateValue>,
    count: i64,
}

impl Algorithm for MapHistory {
    fn name(&self) -> &str {
        MAP_HISTORY
    }

    fn process(&mut self, item: &DataItem) -> Result<Vec<Value>, AlgorithmError> {
        self.count += 1;
        self.history
            .insert(item.sequence.to_string(), StateValue::Int(self.count));
        Ok(vec![json!({"count": self.count})])
    }

    fn state(&self) -> StateObject {
        StateObject::new("MapHistory")
            .with_field(
                "history",
                PartOfState::new(StatePolicy::Merge),
                StateValue::Map(self.history.clone()),
            )
            .with_field("count", PartOfState::default(), self.count)
    }

    fn restore(&mut self, state: StateObject) {
        if let Some(history) = state.get("history").and_then(StateValue::as_map) {
            self.history = history.clone();
        }
        if let Some(count) = state.get("count").and_then(StateValue::as_int) {
            self.count = count;
        }
    }

    fn apply_change(&mut self, change: &ParameterChange) -> Result<(), AlgorithmError> {
        Err(AlgorithmError::UnsupportedChange(change.name.clone()))
    }
}

/// Echoes its input, except for `"boom"`, which makes it panic.
pub struct Fragile;

impl Algorithm for Fragile {
    fn name(&self) -> &str {
        FRAGILE
    }

    fn process(&mut self, item: &DataItem) -> Result<Vec<Value>, AlgorithmError> {
        if item.payload == json!("boom") {
            panic!("cannot handle item {}", item.sequence);
        }
        Ok(vec![item.payload.clone()])
    }

    fn state(&self) -> StateObject {
        StateObject::new("Fragile")
    }

    fn restore(&mut self, _state: StateObject) {}

    fn apply_change(&mut self, change: &ParameterChange) -> Result<(), AlgorithmError> {
        Err(AlgorithmError::UnsupportedChange(change.name.clone()))
    }
}

pub fn registry() -> Arc<AlgorithmRegistry> {
    builtin::register(AlgorithmRegistry::builder())
        .register(FRAGILE, || Box::new(Fragile))
        .register(TAG_A, || Box::new(Tagging::new(TAG_A, Duration::ZERO)))
        .register(TAG_B, || Box::new(Tagging::new(TAG_B, Duration::ZERO)))
        .register(SLOW_A, || {
            Box::new(Tagging::new(SLOW_A, Duration::from_millis(3)))
        })
        .register(MAP_HISTORY, || {
            Box::new(MapHistory {
                history: BTreeMap::new(),
                count: 0,
            })
        })
        .build()
}

pub fn start_mechanism(
    kind: StrategyKind,
    initial: &str,
    listener: Arc<RecordingListener>,
) -> SwitchMechanism {
    let config = MechanismConfig {
        pipeline: PIPELINE.to_owned(),
        executor: EXECUTOR.to_owned(),
        initial_algorithm: initial.to_owned(),
        ..Default::default()
    };
    SwitchMechanism::new(config, registry(), kind.build(), listener).unwrap()
}

pub fn signal(algorithm: &str) -> AlgorithmChangeSignal {
    AlgorithmChangeSignal::new(PIPELINE, EXECUTOR, algorithm, Some("cause-1"))
}

/// Pull outputs until the mechanism is stable again, then flush the rest.
pub async fn run_until_stable(mechanism: &mut SwitchMechanism) -> Vec<DataItem> {
    let mut outputs = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;

    while mechanism.state() == SwitchState::Transitioning {
        assert!(
            tokio::time::Instant::now() < deadline,
            "transition not completed within {WAIT_TIMEOUT:?}"
        );
        while let Some(output) = mechanism.get_next_tuple().await.unwrap() {
            outputs.push(output);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    outputs.extend(mechanism.flush().await.unwrap());
    outputs
}

/// Receive outputs until `count` have arrived or the channel closes.
pub async fn receive(
    outputs: &mut tokio::sync::mpsc::Receiver<DataItem>,
    count: usize,
) -> Vec<DataItem> {
    let mut received = Vec::new();
    while received.len() < count {
        match tokio::time::timeout(WAIT_TIMEOUT, outputs.recv()).await {
            Ok(Some(output)) => received.push(output),
            Ok(None) => break,
            Err(_) => panic!("only {} of {count} outputs within {WAIT_TIMEOUT:?}", received.len()),
        }
    }
    received
}
