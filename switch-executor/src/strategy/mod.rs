mod parallel_track;
mod quiesce;
mod reorder;

pub use parallel_track::ParallelTrackStrategy;
pub use quiesce::QuiesceStrategy;
pub use reorder::ReorderBuffer;

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use switch_common::signal::{AlgorithmChangeSignal, ParameterChange};

use crate::algorithm::DataItem;

/// When the outgoing state is carried into the incoming track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPoint {
    /// As soon as the transition is entered.
    Entry,
    /// At cutover, once the outgoing track has drained.
    Cutover,
}

/// What a strategy makes of an algorithm change signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchPlan {
    pub algorithm: String,
    /// Changes applied to the incoming track when the transition is entered.
    pub started: Vec<ParameterChange>,
    /// Changes applied to the new sole track at cutover.
    pub pending: Vec<ParameterChange>,
    pub transfer: TransferPoint,
}

/// Where an item goes.
#[derive(Debug, PartialEq)]
pub enum Routed {
    Current(DataItem),
    Incoming(DataItem),
    /// Kept by the strategy and handed back by `on_cutover`.
    Held,
}

/// Load of the tracks, as far as the strategy needs to know it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStatus {
    pub current_in_flight: usize,
    /// `None` while the executor is stable.
    pub incoming_in_flight: Option<usize>,
    pub incoming_produced: usize,
}

impl TrackStatus {
    pub fn is_transitioning(&self) -> bool {
        self.incoming_in_flight.is_some()
    }
}

/// Trait for the ways an executor can move from one algorithm track to another.
///
/// The mechanism asks the strategy for a plan when a signal arrives, routes every item
/// through it, feeds it every track result, and polls it for in-order output. Once
/// `is_cutover_ready` holds, the outgoing track is dropped and `on_cutover` hands back
/// whatever the strategy held on to.
pub trait SwitchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn on_control_message(&mut self, signal: &AlgorithmChangeSignal) -> SwitchPlan;

    fn route(&mut self, tracks: &TrackStatus, item: DataItem) -> Routed;

    /// Accept the results one track produced for the input with `sequence`.
    fn collect(&mut self, sequence: u64, outputs: Vec<Value>);

    /// Next output in input order, if it is ready. Never blocks.
    fn produce_next(&mut self) -> Option<DataItem>;

    /// Every input below this sequence has had its outputs released.
    fn release_point(&self) -> u64;

    fn is_cutover_ready(&self, tracks: &TrackStatus) -> bool;

    /// Items to replay on the new sole track, in input order.
    fn on_cutover(&mut self) -> Vec<DataItem>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    ParallelTrack,
    Quiesce,
}

impl StrategyKind {
    pub fn build(&self) -> Box<dyn SwitchStrategy> {
        match self {
            StrategyKind::ParallelTrack => Box::new(ParallelTrackStrategy::default()),
            StrategyKind::Quiesce => Box::new(QuiesceStrategy::default()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::ParallelTrack => f.write_str("parallel"),
            StrategyKind::Quiesce => f.write_str("quiesce"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStrategyKindError(pub String);

impl fmt::Display for ParseStrategyKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a switch strategy", self.0)
    }
}

impl FromStr for StrategyKind {
    type Err = ParseStrategyKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" | "parallel-track" => Ok(StrategyKind::ParallelTrack),
            "quiesce" => Ok(StrategyKind::Quiesce),
            _ => Err(ParseStrategyKindError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("parallel".parse(), Ok(StrategyKind::ParallelTrack));
        assert_eq!("Parallel-Track".parse(), Ok(StrategyKind::ParallelTrack));
        assert_eq!("quiesce".parse(), Ok(StrategyKind::Quiesce));
        assert_eq!(
            "eager".parse::<StrategyKind>(),
            Err(ParseStrategyKindError("eager".to_owned()))
        );
    }

    #[test]
    fn test_build_matches_kind() {
        for kind in [StrategyKind::ParallelTrack, StrategyKind::Quiesce] {
            assert_eq!(kind.build().kind(), kind);
            assert_eq!(kind.to_string().parse(), Ok(kind));
        }
    }
}
