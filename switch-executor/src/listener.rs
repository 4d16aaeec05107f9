use std::time::Duration;

use switch_common::signal::AlgorithmChangeSignal;
use switch_common::state::FieldFailure;
use tracing::{info, warn};

use crate::metrics_consts::{
    STATE_TRANSFER_FAILURES_COUNTER, TRANSITIONS_COMPLETED_COUNTER, TRANSITIONS_STARTED_COUNTER,
    TRANSITION_DURATION_HISTOGRAM,
};

/// Observer of transitions, typically the monitoring layer.
pub trait SwitchListener: Send + Sync {
    fn transition_started(&self, signal: &AlgorithmChangeSignal, from: &str);

    fn transition_completed(&self, signal: &AlgorithmChangeSignal, duration: Duration);

    /// Called once per field that could not be carried into the incoming algorithm.
    fn state_transfer_failed(&self, signal: &AlgorithmChangeSignal, failure: &FieldFailure);
}

/// Reports transitions through `tracing` and the process metrics recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl SwitchListener for TracingListener {
    fn transition_started(&self, signal: &AlgorithmChangeSignal, from: &str) {
        metrics::counter!(TRANSITIONS_STARTED_COUNTER).increment(1);
        info!(
            pipeline = %signal.pipeline,
            executor = %signal.executor,
            from,
            to = %signal.algorithm,
            cause = %signal.cause_message_id,
            "algorithm transition started"
        );
    }

    fn transition_completed(&self, signal: &AlgorithmChangeSignal, duration: Duration) {
        metrics::counter!(TRANSITIONS_COMPLETED_COUNTER).increment(1);
        metrics::histogram!(TRANSITION_DURATION_HISTOGRAM).record(duration.as_secs_f64());
        info!(
            pipeline = %signal.pipeline,
            executor = %signal.executor,
            algorithm = %signal.algorithm,
            cause = %signal.cause_message_id,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "algorithm transition completed"
        );
    }

    fn state_transfer_failed(&self, signal: &AlgorithmChangeSignal, failure: &FieldFailure) {
        metrics::counter!(STATE_TRANSFER_FAILURES_COUNTER).increment(1);
        warn!(
            pipeline = %signal.pipeline,
            executor = %signal.executor,
            algorithm = %signal.algorithm,
            cause = %signal.cause_message_id,
            field = %failure.field,
            error = %failure.error,
            "state transfer failed for field, keeping its initial value"
        );
    }
}
