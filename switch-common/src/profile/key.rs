use std::collections::BTreeMap;
use std::fmt;

use super::Observable;

/// Deterministic identifier of one stored predictor.
///
/// Renders as `pipeline=<p>:element=<e>:algorithm=<a>:predicted=<OBS>;parameters={k=v, ...}`.
/// Profiling runs are not tied to a pipeline, so in profiling mode the pipeline and
/// element segments are left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileKey {
    pipeline: String,
    element: String,
    algorithm: String,
    observable: Observable,
    parameters: BTreeMap<String, String>,
    profiling: bool,
}

impl ProfileKey {
    pub fn new(pipeline: &str, element: &str, algorithm: &str, observable: Observable) -> Self {
        Self {
            pipeline: pipeline.to_owned(),
            element: element.to_owned(),
            algorithm: algorithm.to_owned(),
            observable,
            parameters: BTreeMap::new(),
            profiling: false,
        }
    }

    pub fn with_parameter(mut self, name: &str, value: impl ToString) -> Self {
        self.parameters.insert(name.to_owned(), value.to_string());
        self
    }

    pub fn with_parameters<'a>(
        mut self,
        parameters: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        for (name, value) in parameters {
            self.parameters.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn observable(&self) -> Observable {
        self.observable
    }

    pub fn identifier(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.profiling {
            write!(f, "pipeline={}:element={}:", self.pipeline, self.element)?;
        }
        write!(
            f,
            "algorithm={}:predicted={};parameters={{",
            self.algorithm, self.observable
        )?;
        for (i, (name, value)) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}
