//! Algorithm change signals and their flat wire encoding.
//!
//! A signal travels as a single ASCII-safe payload:
//!
//! ```text
//! alg:<algorithm>:<causeId>:|<changes>|<KEY1>=<value1>;<KEY2>=<value2>
//! ```
//!
//! The routing keys (pipeline and executor) are never part of the payload, they are
//! supplied by the transport when decoding. Free-text content is percent-escaped so
//! that none of the reserved separators can appear inside a field.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const MARKER: &str = "alg";
const FIELD_SEPARATOR: char = ':';
const CHANGE_SEPARATOR: char = '|';
const PARAM_SEPARATOR: char = ';';
const VALUE_SEPARATOR: char = '=';
const ENTRY_SEPARATOR: char = ',';
const ESCAPE: char = '%';

/// Enumeration of errors for building, encoding and decoding an `AlgorithmChangeSignal`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("malformed algorithm change payload: {0}")]
    Malformed(String),
    #[error("{0} is not a valid AlgorithmChangeParameter")]
    UnknownParameter(String),
    #[error("parameter {param} expects {expected} values")]
    ParameterType {
        param: AlgorithmChangeParameter,
        expected: ParameterType,
    },
}

/// The value type an `AlgorithmChangeParameter` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Int,
    Str,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Int => write!(f, "integer"),
            ParameterType::Str => write!(f, "string"),
        }
    }
}

/// The fixed set of named parameters an algorithm change may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgorithmChangeParameter {
    InputPort,
    OutputPort,
    WarmupDelay,
    CoprocessorHost,
    ControlRequestPort,
    ResponsePort,
}

impl AlgorithmChangeParameter {
    pub const ALL: [AlgorithmChangeParameter; 6] = [
        AlgorithmChangeParameter::InputPort,
        AlgorithmChangeParameter::OutputPort,
        AlgorithmChangeParameter::WarmupDelay,
        AlgorithmChangeParameter::CoprocessorHost,
        AlgorithmChangeParameter::ControlRequestPort,
        AlgorithmChangeParameter::ResponsePort,
    ];

    /// The wire name of this parameter.
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmChangeParameter::InputPort => "INPUT_PORT",
            AlgorithmChangeParameter::OutputPort => "OUTPUT_PORT",
            AlgorithmChangeParameter::WarmupDelay => "WARMUP_DELAY",
            AlgorithmChangeParameter::CoprocessorHost => "COPROCESSOR_HOST",
            AlgorithmChangeParameter::ControlRequestPort => "CONTROL_REQUEST_PORT",
            AlgorithmChangeParameter::ResponsePort => "RESPONSE_PORT",
        }
    }

    pub fn value_type(&self) -> ParameterType {
        match self {
            AlgorithmChangeParameter::CoprocessorHost => ParameterType::Str,
            _ => ParameterType::Int,
        }
    }
}

impl fmt::Display for AlgorithmChangeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmChangeParameter {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlgorithmChangeParameter::ALL
            .into_iter()
            .find(|param| param.name() == s)
            .ok_or_else(|| SignalError::UnknownParameter(s.to_owned()))
    }
}

/// Value of a named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterValue {
    Int(i32),
    Str(String),
}

impl ParameterValue {
    fn value_type(&self) -> ParameterType {
        match self {
            ParameterValue::Int(_) => ParameterType::Int,
            ParameterValue::Str(_) => ParameterType::Str,
        }
    }

    fn encode(&self) -> String {
        match self {
            ParameterValue::Int(value) => value.to_string(),
            ParameterValue::Str(value) => escape(value),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(value) => write!(f, "{value}"),
            ParameterValue::Str(value) => f.write_str(value),
        }
    }
}

/// Value carried by an individual `ParameterChange`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterChangeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// A single algorithm parameter change. Changes are replayed in the order they were sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub name: String,
    pub value: ParameterChangeValue,
}

impl ParameterChange {
    pub fn new(name: &str, value: ParameterChangeValue) -> Self {
        Self {
            name: name.to_owned(),
            value,
        }
    }

    fn encode(&self) -> String {
        let (kind, value) = match &self.value {
            ParameterChangeValue::Int(value) => ('i', value.to_string()),
            ParameterChangeValue::Float(value) => ('f', value.to_string()),
            ParameterChangeValue::Bool(value) => ('b', value.to_string()),
            ParameterChangeValue::Str(value) => ('s', escape(value)),
        };
        format!(
            "{}{VALUE_SEPARATOR}{kind}{FIELD_SEPARATOR}{value}",
            escape(&self.name)
        )
    }

    fn decode(entry: &str) -> Result<Self, SignalError> {
        let malformed = || SignalError::Malformed(format!("invalid parameter change: {entry}"));
        let (name, typed) = entry.split_once(VALUE_SEPARATOR).ok_or_else(malformed)?;
        let (kind, raw) = typed.split_once(FIELD_SEPARATOR).ok_or_else(malformed)?;

        let value = match kind {
            "i" => ParameterChangeValue::Int(raw.parse().map_err(|_| malformed())?),
            "f" => ParameterChangeValue::Float(raw.parse().map_err(|_| malformed())?),
            "b" => ParameterChangeValue::Bool(raw.parse().map_err(|_| malformed())?),
            "s" => ParameterChangeValue::Str(unescape(raw)?),
            _ => return Err(malformed()),
        };

        Ok(Self {
            name: unescape(name)?,
            value,
        })
    }
}

/// Requests the executor hosting a pipeline element to switch to another algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmChangeSignal {
    pub pipeline: String,
    pub executor: String,
    pub algorithm: String,
    /// Id of the message that caused this change, empty if there is none.
    pub cause_message_id: String,
    changes: Vec<ParameterChange>,
    parameters: BTreeMap<AlgorithmChangeParameter, ParameterValue>,
}

impl AlgorithmChangeSignal {
    pub fn new(
        pipeline: &str,
        executor: &str,
        algorithm: &str,
        cause_message_id: Option<&str>,
    ) -> Self {
        Self {
            pipeline: pipeline.to_owned(),
            executor: executor.to_owned(),
            algorithm: algorithm.to_owned(),
            cause_message_id: cause_message_id.unwrap_or_default().to_owned(),
            changes: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_changes(mut self, changes: Vec<ParameterChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn changes(&self) -> &[ParameterChange] {
        &self.changes
    }

    pub fn parameters(&self) -> &BTreeMap<AlgorithmChangeParameter, ParameterValue> {
        &self.parameters
    }

    /// Set a named parameter, checking the value against the type the parameter declares.
    pub fn set_parameter(
        &mut self,
        param: AlgorithmChangeParameter,
        value: ParameterValue,
    ) -> Result<(), SignalError> {
        if value.value_type() != param.value_type() {
            return Err(SignalError::ParameterType {
                param,
                expected: param.value_type(),
            });
        }
        self.parameters.insert(param, value);
        Ok(())
    }

    pub fn set_parameters(
        &mut self,
        params: impl IntoIterator<Item = (AlgorithmChangeParameter, ParameterValue)>,
    ) -> Result<(), SignalError> {
        for (param, value) in params {
            self.set_parameter(param, value)?;
        }
        Ok(())
    }

    pub fn set_int_parameter(
        &mut self,
        param: AlgorithmChangeParameter,
        value: i32,
    ) -> Result<(), SignalError> {
        self.set_parameter(param, ParameterValue::Int(value))
    }

    pub fn set_string_parameter(
        &mut self,
        param: AlgorithmChangeParameter,
        value: &str,
    ) -> Result<(), SignalError> {
        self.set_parameter(param, ParameterValue::Str(value.to_owned()))
    }

    /// Return an integer parameter, or `default` if it was not sent.
    pub fn int_parameter(
        &self,
        param: AlgorithmChangeParameter,
        default: Option<i32>,
    ) -> Option<i32> {
        match self.parameters.get(&param) {
            Some(ParameterValue::Int(value)) => Some(*value),
            _ => default,
        }
    }

    /// Return a string parameter, or `default` if it was not sent.
    pub fn string_parameter<'a>(
        &'a self,
        param: AlgorithmChangeParameter,
        default: Option<&'a str>,
    ) -> Option<&'a str> {
        match self.parameters.get(&param) {
            Some(ParameterValue::Str(value)) => Some(value.as_str()),
            _ => default,
        }
    }

    /// Serialize this signal into its wire payload.
    pub fn encode(&self) -> Vec<u8> {
        let changes = self
            .changes
            .iter()
            .map(ParameterChange::encode)
            .collect::<Vec<_>>()
            .join(ENTRY_SEPARATOR.to_string().as_str());
        let parameters = self
            .parameters
            .iter()
            .map(|(param, value)| format!("{}{VALUE_SEPARATOR}{}", param.name(), value.encode()))
            .collect::<Vec<_>>()
            .join(PARAM_SEPARATOR.to_string().as_str());

        format!(
            "{MARKER}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{CHANGE_SEPARATOR}{changes}{CHANGE_SEPARATOR}{parameters}",
            escape(&self.algorithm),
            escape(&self.cause_message_id),
        )
        .into_bytes()
    }

    /// Parse a wire payload addressed to `pipeline` and `executor`.
    ///
    /// Accepts the legacy `alg:<algorithm>:` form without a cause id. A named parameter
    /// that cannot be parsed is logged and skipped, it never drops the whole signal.
    pub fn decode(payload: &[u8], pipeline: &str, executor: &str) -> Result<Self, SignalError> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| SignalError::Malformed(format!("payload is not valid UTF-8: {e}")))?;

        let (header, changes_block, params_block) =
            match (payload.find(CHANGE_SEPARATOR), payload.rfind(CHANGE_SEPARATOR)) {
                (Some(first), Some(last)) if first < last => (
                    &payload[..first],
                    &payload[first + 1..last],
                    &payload[last + 1..],
                ),
                (Some(first), _) => (&payload[..first], &payload[first + 1..], ""),
                _ => (payload, "", ""),
            };

        let mut fields: Vec<&str> = header.split(FIELD_SEPARATOR).collect();
        while fields.last().is_some_and(|field| field.is_empty()) {
            fields.pop();
        }

        let (algorithm, cause_message_id) = match fields.as_slice() {
            [MARKER, algorithm] if header.ends_with(FIELD_SEPARATOR) => (*algorithm, ""),
            [MARKER, algorithm, cause] => (*algorithm, *cause),
            _ => {
                return Err(SignalError::Malformed(format!(
                    "unrecognized header: {header}"
                )))
            }
        };

        let changes = if changes_block.is_empty() {
            Vec::new()
        } else {
            changes_block
                .split(ENTRY_SEPARATOR)
                .map(ParameterChange::decode)
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut signal = AlgorithmChangeSignal {
            pipeline: pipeline.to_owned(),
            executor: executor.to_owned(),
            algorithm: unescape(algorithm)?,
            cause_message_id: unescape(cause_message_id)?,
            changes,
            parameters: BTreeMap::new(),
        };

        for pair in params_block.split(PARAM_SEPARATOR).filter(|p| !p.is_empty()) {
            if let Err(e) = signal.read_parameter(pair) {
                warn!(
                    pipeline,
                    executor,
                    algorithm = %signal.algorithm,
                    cause_message_id = %signal.cause_message_id,
                    "cannot parse parameter {pair}: {e}"
                );
            }
        }

        Ok(signal)
    }

    fn read_parameter(&mut self, pair: &str) -> Result<(), SignalError> {
        let parts: Vec<&str> = pair.split(VALUE_SEPARATOR).collect();
        let [key, raw] = parts.as_slice() else {
            return Err(SignalError::Malformed(format!("not a key=value pair: {pair}")));
        };

        let param: AlgorithmChangeParameter = key.parse()?;
        let value = match param.value_type() {
            ParameterType::Int => ParameterValue::Int(raw.parse().map_err(|_| {
                SignalError::ParameterType {
                    param,
                    expected: ParameterType::Int,
                }
            })?),
            ParameterType::Str => ParameterValue::Str(unescape(raw)?),
        };

        self.set_parameter(param, value)
    }
}

impl fmt::Display for AlgorithmChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AlgorithmChangeSignal {}/{} {}",
            self.pipeline, self.executor, self.algorithm
        )?;
        if !self.cause_message_id.is_empty() {
            write!(f, " (cause {})", self.cause_message_id)?;
        }
        Ok(())
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '|' => escaped.push_str("%7C"),
            ';' => escaped.push_str("%3B"),
            '=' => escaped.push_str("%3D"),
            ',' => escaped.push_str("%2C"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape(value: &str) -> Result<String, SignalError> {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            unescaped.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        let decoded = match code.as_str() {
            "25" => '%',
            "3A" => ':',
            "7C" => '|',
            "3B" => ';',
            "3D" => '=',
            "2C" => ',',
            _ => {
                return Err(SignalError::Malformed(format!(
                    "invalid escape sequence %{code} in {value}"
                )))
            }
        };
        unescaped.push(decoded);
    }
    Ok(unescaped)
}
