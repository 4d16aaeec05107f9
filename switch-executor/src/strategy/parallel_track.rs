use std::time::Duration;

use serde_json::Value;
use switch_common::signal::{AlgorithmChangeParameter, AlgorithmChangeSignal};
use tokio::time::Instant;

use super::{
    ReorderBuffer, Routed, StrategyKind, SwitchPlan, SwitchStrategy, TrackStatus, TransferPoint,
};
use crate::algorithm::DataItem;

/// Runs the incoming algorithm next to the outgoing one.
///
/// State is transferred on entry and all parameter changes go to the incoming track right
/// away. New items are routed to the incoming track while the outgoing track works off
/// what it already accepted. Cutover happens once the outgoing track is idle, the incoming
/// track has produced a result and the optional `WARMUP_DELAY` (ms) has passed.
#[derive(Debug, Default)]
pub struct ParallelTrackStrategy {
    buffer: ReorderBuffer,
    warmup_until: Option<Instant>,
}

impl SwitchStrategy for ParallelTrackStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ParallelTrack
    }

    fn on_control_message(&mut self, signal: &AlgorithmChangeSignal) -> SwitchPlan {
        self.warmup_until = signal
            .int_parameter(AlgorithmChangeParameter::WarmupDelay, None)
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        SwitchPlan {
            algorithm: signal.algorithm.clone(),
            started: signal.changes().to_vec(),
            pending: Vec::new(),
            transfer: TransferPoint::Entry,
        }
    }

    fn route(&mut self, tracks: &TrackStatus, item: DataItem) -> Routed {
        if tracks.is_transitioning() {
            Routed::Incoming(item)
        } else {
            Routed::Current(item)
        }
    }

    fn collect(&mut self, sequence: u64, outputs: Vec<Value>) {
        self.buffer.insert(sequence, outputs);
    }

    fn produce_next(&mut self) -> Option<DataItem> {
        self.buffer.pop()
    }

    fn release_point(&self) -> u64 {
        self.buffer.release_point()
    }

    fn is_cutover_ready(&self, tracks: &TrackStatus) -> bool {
        let warmed_up = self.warmup_until.map_or(true, |until| Instant::now() >= until);
        tracks.is_transitioning()
            && tracks.current_in_flight == 0
            && tracks.incoming_produced > 0
            && warmed_up
    }

    fn on_cutover(&mut self) -> Vec<DataItem> {
        self.warmup_until = None;
        Vec::new()
    }
}
