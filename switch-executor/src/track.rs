//! A track runs one algorithm instance on its own task.
//!
//! The mechanism only ever talks to a track through its command channel. Results of all
//! tracks flow back over one shared unbounded channel, tagged with the track id.
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde_json::Value;
use switch_common::signal::ParameterChange;
use switch_common::state::{StateObject, StateTransfer, TransferReport};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::algorithm::{Algorithm, DataItem};
use crate::error::{AlgorithmError, Result, SwitchError};
use crate::metrics_consts::ITEMS_PROCESSED_COUNTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRole {
    /// The sole track while the executor is stable.
    Active,
    /// Being replaced, drains the items it already accepted.
    Outgoing,
    /// Replacing the outgoing track.
    Incoming,
}

#[derive(Debug)]
pub struct TrackOutput {
    pub track: u64,
    pub sequence: u64,
    pub result: std::result::Result<Vec<Value>, AlgorithmError>,
}

enum TrackCommand {
    Process(DataItem),
    Snapshot(oneshot::Sender<StateObject>),
    Transfer {
        source: StateObject,
        engine: Arc<StateTransfer>,
        reply: oneshot::Sender<TransferReport>,
    },
    Apply(ParameterChange),
    Shutdown,
}

pub struct SwitchTrack {
    id: u64,
    algorithm: String,
    role: TrackRole,
    active: bool,
    /// Sequences sent to the track whose result has not been collected yet.
    pending: BTreeSet<u64>,
    produced: usize,
    commands: mpsc::Sender<TrackCommand>,
    handle: JoinHandle<()>,
}

impl SwitchTrack {
    /// Spawn a task owning `algorithm`. Must be called from within a tokio runtime.
    pub fn spawn(
        id: u64,
        algorithm: Box<dyn Algorithm>,
        role: TrackRole,
        results: mpsc::UnboundedSender<TrackOutput>,
        capacity: usize,
    ) -> Self {
        let name = algorithm.name().to_owned();
        let (commands, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(id, algorithm, receiver, results));

        debug!(track = id, algorithm = %name, ?role, "spawned track");
        Self {
            id,
            algorithm: name,
            role,
            active: true,
            pending: BTreeSet::new(),
            produced: 0,
            commands,
            handle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn role(&self) -> TrackRole {
        self.role
    }

    /// Outgoing tracks stop accepting new items.
    pub fn set_role(&mut self, role: TrackRole) {
        self.role = role;
        self.active = role != TrackRole::Outgoing;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Items sent to the track whose result has not been collected yet.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Results collected from the track so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    pub(crate) fn record_output(&mut self, sequence: u64) {
        if self.pending.remove(&sequence) {
            self.produced += 1;
        }
    }

    /// Whether the task has stopped, e.g. because the algorithm panicked outside `process`.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Give up on every item still outstanding. Returns their sequences in order.
    pub(crate) fn abandon(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    async fn command(&self, command: TrackCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SwitchError::TrackClosed(self.algorithm.clone()))
    }

    pub async fn send(&mut self, item: DataItem) -> Result<()> {
        let sequence = item.sequence;
        self.command(TrackCommand::Process(item)).await?;
        self.pending.insert(sequence);
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<StateObject> {
        let (reply, response) = oneshot::channel();
        self.command(TrackCommand::Snapshot(reply)).await?;
        response
            .await
            .map_err(|_| SwitchError::TrackClosed(self.algorithm.clone()))
    }

    /// Carry `source` into the track's algorithm state. Runs on the track's task, ahead of
    /// any item sent after this call.
    pub async fn transfer_state(
        &self,
        source: StateObject,
        engine: Arc<StateTransfer>,
    ) -> Result<TransferReport> {
        let (reply, response) = oneshot::channel();
        self.command(TrackCommand::Transfer {
            source,
            engine,
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| SwitchError::TrackClosed(self.algorithm.clone()))
    }

    pub async fn apply(&self, change: ParameterChange) -> Result<()> {
        self.command(TrackCommand::Apply(change)).await
    }

    /// Stop the task after it has worked off the commands already queued.
    pub async fn shutdown(self) {
        if self.commands.send(TrackCommand::Shutdown).await.is_err() {
            debug!(track = self.id, "track already stopped");
        }
        if let Err(e) = self.handle.await {
            warn!(track = self.id, algorithm = %self.algorithm, error = %e, "track task failed");
        }
    }
}

async fn run(
    id: u64,
    mut algorithm: Box<dyn Algorithm>,
    mut commands: mpsc::Receiver<TrackCommand>,
    results: mpsc::UnboundedSender<TrackOutput>,
) {
    let name = algorithm.name().to_owned();

    while let Some(command) = commands.recv().await {
        match command {
            TrackCommand::Process(item) => {
                let guarded = AssertUnwindSafe(|| algorithm.process(&item));
                let result = std::panic::catch_unwind(guarded).unwrap_or_else(|_| {
                    error!(
                        track = id,
                        algorithm = %name,
                        sequence = item.sequence,
                        "algorithm panicked, dropping item"
                    );
                    Err(AlgorithmError::Panicked {
                        sequence: item.sequence,
                    })
                });
                metrics::counter!(ITEMS_PROCESSED_COUNTER, "algorithm" => name.clone())
                    .increment(1);
                let output = TrackOutput {
                    track: id,
                    sequence: item.sequence,
                    result,
                };
                if results.send(output).is_err() {
                    debug!(track = id, "result receiver dropped, stopping track");
                    break;
                }
            }
            TrackCommand::Snapshot(reply) => {
                if reply.send(algorithm.state()).is_err() {
                    debug!(track = id, "snapshot requester went away");
                }
            }
            TrackCommand::Transfer {
                source,
                engine,
                reply,
            } => {
                let mut target = algorithm.state();
                let report = engine.transfer(&mut target, &source);
                algorithm.restore(target);
                if reply.send(report).is_err() {
                    debug!(track = id, "transfer requester went away");
                }
            }
            TrackCommand::Apply(change) => {
                if let Err(e) = algorithm.apply_change(&change) {
                    warn!(
                        track = id,
                        algorithm = %name,
                        change = %change.name,
                        error = %e,
                        "parameter change not applied"
                    );
                }
            }
            TrackCommand::Shutdown => break,
        }
    }

    debug!(track = id, algorithm = %name, "track stopped");
}
