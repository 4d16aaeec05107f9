pub mod algorithm;
pub mod builtin;
pub mod config;
pub mod error;
pub mod executor;
pub mod listener;
pub mod mechanism;
pub mod metrics_consts;
pub mod profiling;
pub mod strategy;
pub mod track;
