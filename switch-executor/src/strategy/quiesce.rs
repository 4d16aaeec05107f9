use serde_json::Value;
use switch_common::signal::AlgorithmChangeSignal;

use super::{
    ReorderBuffer, Routed, StrategyKind, SwitchPlan, SwitchStrategy, TrackStatus, TransferPoint,
};
use crate::algorithm::DataItem;

/// Holds new items back until the outgoing track has drained, then hands the executor
/// over in one step: state is transferred from the drained track, parameter changes are
/// applied, and the held items are replayed on the new track.
#[derive(Debug, Default)]
pub struct QuiesceStrategy {
    buffer: ReorderBuffer,
    held: Vec<DataItem>,
}

impl SwitchStrategy for QuiesceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Quiesce
    }

    fn on_control_message(&mut self, signal: &AlgorithmChangeSignal) -> SwitchPlan {
        SwitchPlan {
            algorithm: signal.algorithm.clone(),
            started: Vec::new(),
            pending: signal.changes().to_vec(),
            transfer: TransferPoint::Cutover,
        }
    }

    fn route(&mut self, tracks: &TrackStatus, item: DataItem) -> Routed {
        if tracks.is_transitioning() {
            self.held.push(item);
            Routed::Held
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
        tracks.is_transitioning() && tracks.current_in_flight == 0
    }

    fn on_cutover(&mut self) -> Vec<DataItem> {
        std::mem::take(&mut self.held)
    }
}
