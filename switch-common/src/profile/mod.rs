//! Per algorithm profiles: predictors for the observables of an algorithm, persisted
//! below a base folder and indexed by deterministic identifiers.

mod key;
mod predictor;
mod store;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, error, warn};

pub use key::ProfileKey;
pub use predictor::{Predictor, SmoothingPredictor};
pub use store::{MapFile, ProfileStore};

/// Returned by predictions when no predictor can answer.
pub const NO_PREDICTION: f64 = f64::MIN;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed profile data in {path}: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("no stored predictor for {0}")]
    NotFound(String),
}

impl ProfileError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Observable {
    Latency,
    ThroughputItems,
    Items,
    Executors,
    Tasks,
}

impl Observable {
    pub const ALL: [Observable; 5] = [
        Observable::Latency,
        Observable::ThroughputItems,
        Observable::Items,
        Observable::Executors,
        Observable::Tasks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Observable::Latency => "LATENCY",
            Observable::ThroughputItems => "THROUGHPUT_ITEMS",
            Observable::Items => "ITEMS",
            Observable::Executors => "EXECUTORS",
            Observable::Tasks => "TASKS",
        }
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Observable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Observable::ALL
            .into_iter()
            .find(|o| o.name() == s)
            .ok_or_else(|| format!("unknown observable {s}"))
    }
}

/// Something that observes an algorithm at runtime.
pub trait ObservationSource {
    fn observables(&self) -> Vec<Observable>;

    fn has_value(&self, observable: Observable) -> bool;

    /// Milliseconds since the epoch of the last observation.
    fn last_update(&self, observable: Observable) -> i64;

    fn observed_value(&self, observable: Observable) -> f64;
}

/// The predictors of one algorithm, one per predicted observable.
///
/// Predictors are created on first use and primed from disk when a stored one exists.
pub struct AlgorithmProfile<P: Predictor + Default = SmoothingPredictor> {
    store: ProfileStore,
    pipeline: String,
    element: String,
    algorithm: String,
    parameters: BTreeMap<String, String>,
    profiling: bool,
    predicted: HashSet<Observable>,
    predictors: HashMap<Observable, P>,
}

impl<P: Predictor + Default> AlgorithmProfile<P> {
    pub fn new(store: ProfileStore, pipeline: &str, element: &str, algorithm: &str) -> Self {
        Self {
            store,
            pipeline: pipeline.to_owned(),
            element: element.to_owned(),
            algorithm: algorithm.to_owned(),
            parameters: BTreeMap::new(),
            profiling: false,
            predicted: Observable::ALL.into_iter().collect(),
            predictors: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl ToString) -> Self {
        self.parameters.insert(name.to_owned(), value.to_string());
        self
    }

    pub fn profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    /// Restrict the observables that get a predictor.
    pub fn predicting(mut self, observables: impl IntoIterator<Item = Observable>) -> Self {
        self.predicted = observables.into_iter().collect();
        self
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn key(&self, observable: Observable) -> ProfileKey {
        ProfileKey::new(&self.pipeline, &self.element, &self.algorithm, observable)
            .with_parameters(&self.parameters)
            .profiling(self.profiling)
    }

    pub fn folder(&self, observable: Observable) -> PathBuf {
        self.store
            .folder(&self.key(observable).identifier(), P::default().kind())
    }

    fn obtain(&mut self, observable: Observable) -> Option<&mut P> {
        if !self.predicted.contains(&observable) {
            return None;
        }
        if !self.predictors.contains_key(&observable) {
            let identifier = self.key(observable).identifier();
            let mut predictor = P::default();
            match self.store.load(&mut predictor, &identifier) {
                Ok(()) => debug!(identifier = %identifier, "loaded predictor"),
                Err(ProfileError::NotFound(_)) => {
                    debug!(identifier = %identifier, "starting cold predictor")
                }
                Err(e) => {
                    error!(
                        identifier = %identifier,
                        error = %e,
                        "failed to read predictor, starting cold"
                    );
                    predictor = P::default();
                }
            }
            self.predictors.insert(observable, predictor);
        }
        self.predictors.get_mut(&observable)
    }

    /// Feed every observable the source has a value for.
    pub fn update(&mut self, source: &dyn ObservationSource) {
        for observable in source.observables() {
            if !source.has_value(observable) {
                continue;
            }
            let time_secs = source.last_update(observable) / 1000;
            let value = source.observed_value(observable);
            if let Some(predictor) = self.obtain(observable) {
                predictor.update(time_secs, value);
            }
        }
    }

    pub fn predict(&mut self, observable: Observable, steps: u32) -> f64 {
        match self.obtain(observable) {
            Some(predictor) => predictor.predict(steps),
            None => NO_PREDICTION,
        }
    }

    /// Write every predictor. Failures are logged and skipped; returns how many were written.
    pub fn store(&self) -> usize {
        let mut stored = 0;
        for (observable, predictor) in &self.predictors {
            let identifier = self.key(*observable).identifier();
            match self.store.store(predictor, &identifier) {
                Ok(_) => stored += 1,
                Err(e) => {
                    warn!(identifier = %identifier, error = %e, "failed to write predictor")
                }
            }
        }
        stored
    }
}
