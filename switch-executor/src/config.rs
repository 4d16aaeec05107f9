use std::path::PathBuf;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::strategy::StrategyKind;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(default = "pipeline")]
    pub pipeline_name: NonEmptyString,

    #[envconfig(default = "executor")]
    pub executor_name: NonEmptyString,

    #[envconfig(default = "passthrough")]
    pub initial_algorithm: NonEmptyString,

    #[envconfig(default = "parallel")]
    pub switch_strategy: StrategyKind,

    /// Base folder for algorithm profiles. Profiling is off when unset.
    pub profile_path: Option<PathBuf>,

    #[envconfig(default = "32")]
    pub max_state_depth: usize,

    #[envconfig(default = "64")]
    pub signal_queue_capacity: usize,

    #[envconfig(default = "1024")]
    pub item_queue_capacity: usize,

    #[envconfig(default = "50")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub profile_sample_interval: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("expected a duration in milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl std::fmt::Display for StringIsEmptyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("value must not be empty")
    }
}

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
