use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switch_common::signal::{AlgorithmChangeSignal, ParameterChange};
use switch_common::state::{HandlerRegistry, StateTransfer, TransferReport, DEFAULT_MAX_DEPTH};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::algorithm::{AlgorithmRegistry, DataItem};
use crate::error::{Result, SwitchError};
use crate::listener::SwitchListener;
use crate::metrics_consts::{SIGNALS_RECEIVED_COUNTER, SIGNALS_REJECTED_COUNTER};
use crate::strategy::{Routed, StrategyKind, SwitchStrategy, TrackStatus, TransferPoint};
use crate::track::{SwitchTrack, TrackOutput, TrackRole};

/// How long `flush` waits for a result before checking that the tracks are still alive.
const TRACK_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Stable,
    Transitioning,
}

#[derive(Debug, Clone)]
pub struct MechanismConfig {
    pub pipeline: String,
    pub executor: String,
    pub initial_algorithm: String,
    /// Command queue length of each track.
    pub track_capacity: usize,
    pub max_state_depth: usize,
}

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            pipeline: "pipeline".to_string(),
            executor: "executor".to_string(),
            initial_algorithm: "passthrough".to_string(),
            track_capacity: 1024,
            max_state_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Outcome of a signal that started a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionStarted {
    pub from: String,
    pub to: String,
    /// Present when the state was carried over on entry.
    pub report: Option<TransferReport>,
}

struct Transition {
    signal: AlgorithmChangeSignal,
    pending: Vec<ParameterChange>,
    transfer: TransferPoint,
    started_at: Instant,
}

/// Switches the algorithm of one executor while it keeps processing items.
///
/// While stable there is one active track. A signal for another algorithm spawns an
/// incoming track next to it; the strategy decides where items go until cutover, after
/// which the outgoing track is shut down and the incoming one becomes the sole track.
/// Only one transition can be in progress at a time.
pub struct SwitchMechanism {
    config: MechanismConfig,
    registry: Arc<AlgorithmRegistry>,
    strategy: Box<dyn SwitchStrategy>,
    listener: Arc<dyn SwitchListener>,
    engine: Arc<StateTransfer>,
    current: SwitchTrack,
    incoming: Option<SwitchTrack>,
    transition: Option<Transition>,
    results_tx: mpsc::UnboundedSender<TrackOutput>,
    results_rx: mpsc::UnboundedReceiver<TrackOutput>,
    next_sequence: u64,
    next_track: u64,
}

impl SwitchMechanism {
    /// Start the executor on `config.initial_algorithm`. Must be called from within a tokio
    /// runtime.
    pub fn new(
        config: MechanismConfig,
        registry: Arc<AlgorithmRegistry>,
        strategy: Box<dyn SwitchStrategy>,
        listener: Arc<dyn SwitchListener>,
    ) -> Result<Self> {
        let algorithm = registry
            .create(&config.initial_algorithm)
            .ok_or_else(|| SwitchError::UnknownAlgorithm(config.initial_algorithm.clone()))?;
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let current = SwitchTrack::spawn(
            0,
            algorithm,
            TrackRole::Active,
            results_tx.clone(),
            config.track_capacity,
        );
        let engine = Arc::new(StateTransfer::new(
            HandlerRegistry::default(),
            config.max_state_depth,
        ));

        info!(
            pipeline = %config.pipeline,
            executor = %config.executor,
            algorithm = %config.initial_algorithm,
            strategy = %strategy.kind(),
            "switch mechanism started"
        );
        Ok(Self {
            config,
            registry,
            strategy,
            listener,
            engine,
            current,
            incoming: None,
            transition: None,
            results_tx,
            results_rx,
            next_sequence: 0,
            next_track: 1,
        })
    }

    /// Use a state transfer engine with custom handlers.
    pub fn with_state_transfer(mut self, engine: StateTransfer) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn state(&self) -> SwitchState {
        if self.transition.is_some() {
            SwitchState::Transitioning
        } else {
            SwitchState::Stable
        }
    }

    pub fn current_algorithm(&self) -> &str {
        self.current.algorithm()
    }

    pub fn incoming_algorithm(&self) -> Option<&str> {
        self.incoming.as_ref().map(SwitchTrack::algorithm)
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Every item below this sequence has been answered, with or without output.
    pub fn release_point(&self) -> u64 {
        self.strategy.release_point()
    }

    /// Items handed to tracks whose results have not come back yet.
    pub fn in_flight(&self) -> usize {
        self.current.in_flight() + self.incoming.as_ref().map_or(0, SwitchTrack::in_flight)
    }

    fn status(&self) -> TrackStatus {
        TrackStatus {
            current_in_flight: self.current.in_flight(),
            incoming_in_flight: self.incoming.as_ref().map(SwitchTrack::in_flight),
            incoming_produced: self.incoming.as_ref().map_or(0, SwitchTrack::produced),
        }
    }

    fn admit(&self, signal: &AlgorithmChangeSignal) -> Result<()> {
        if let Some(incoming) = &self.incoming {
            return Err(SwitchError::TransitionBusy {
                from: self.current.algorithm().to_owned(),
                to: incoming.algorithm().to_owned(),
            });
        }
        if signal.algorithm != self.current.algorithm() && !self.registry.contains(&signal.algorithm)
        {
            return Err(SwitchError::UnknownAlgorithm(signal.algorithm.clone()));
        }
        Ok(())
    }

    /// Start a transition to the algorithm named by `signal`.
    ///
    /// Returns `Ok(None)` when the signal names the algorithm that is already running.
    /// Signals arriving during a transition or naming an unregistered algorithm are
    /// rejected and leave the executor untouched.
    pub async fn handle_signal(
        &mut self,
        signal: AlgorithmChangeSignal,
    ) -> Result<Option<TransitionStarted>> {
        metrics::counter!(SIGNALS_RECEIVED_COUNTER).increment(1);

        if let Err(e) = self.admit(&signal) {
            metrics::counter!(SIGNALS_REJECTED_COUNTER, "reason" => e.reason()).increment(1);
            warn!(
                pipeline = %self.config.pipeline,
                executor = %self.config.executor,
                algorithm = %signal.algorithm,
                cause = %signal.cause_message_id,
                error = %e,
                "dropping algorithm change signal"
            );
            return Err(e);
        }
        if signal.algorithm == self.current.algorithm() {
            info!(
                executor = %self.config.executor,
                algorithm = %signal.algorithm,
                cause = %signal.cause_message_id,
                "requested algorithm is already running, ignoring signal"
            );
            return Ok(None);
        }

        let algorithm = self
            .registry
            .create(&signal.algorithm)
            .ok_or_else(|| SwitchError::UnknownAlgorithm(signal.algorithm.clone()))?;
        let plan = self.strategy.on_control_message(&signal);
        let incoming = SwitchTrack::spawn(
            self.next_track,
            algorithm,
            TrackRole::Incoming,
            self.results_tx.clone(),
            self.config.track_capacity,
        );
        self.next_track += 1;

        let prepared = self.prepare(&incoming, plan.transfer, plan.started).await;
        let report = match prepared {
            Ok(report) => report,
            Err(e) => {
                incoming.shutdown().await;
                return Err(e);
            }
        };

        let from = self.current.algorithm().to_owned();
        self.current.set_role(TrackRole::Outgoing);
        self.listener.transition_started(&signal, &from);
        if let Some(report) = &report {
            self.report_failures(&signal, report);
        }
        self.incoming = Some(incoming);
        self.transition = Some(Transition {
            signal,
            pending: plan.pending,
            transfer: plan.transfer,
            started_at: Instant::now(),
        });

        Ok(Some(TransitionStarted {
            from,
            to: plan.algorithm,
            report,
        }))
    }

    async fn prepare(
        &self,
        incoming: &SwitchTrack,
        transfer: TransferPoint,
        started: Vec<ParameterChange>,
    ) -> Result<Option<TransferReport>> {
        let report = match transfer {
            TransferPoint::Entry => Some(self.transfer_state(incoming).await?),
            TransferPoint::Cutover => None,
        };
        for change in started {
            incoming.apply(change).await?;
        }
        Ok(report)
    }

    /// Carry the current track's state into `incoming`.
    async fn transfer_state(&self, incoming: &SwitchTrack) -> Result<TransferReport> {
        let snapshot = self.current.snapshot().await?;
        let report = incoming
            .transfer_state(snapshot, self.engine.clone())
            .await?;
        debug!(
            from = %self.current.algorithm(),
            to = %incoming.algorithm(),
            transferred = report.transferred.len(),
            failed = report.failures.len(),
            "state transferred"
        );
        Ok(report)
    }

    fn report_failures(&self, signal: &AlgorithmChangeSignal, report: &TransferReport) {
        for failure in &report.failures {
            self.listener.state_transfer_failed(signal, failure);
        }
    }

    /// Number the item and hand it to the track the strategy picks. Returns its sequence.
    pub async fn execute(&mut self, payload: Value) -> Result<u64> {
        self.poll_results()?;
        self.try_cutover().await?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let status = self.status();
        let sent = match self.strategy.route(&status, DataItem::new(sequence, payload)) {
            Routed::Current(item) => self.current.send(item).await,
            Routed::Incoming(item) => match self.incoming.as_mut() {
                Some(incoming) => incoming.send(item).await,
                None => self.current.send(item).await,
            },
            Routed::Held => {
                debug!(sequence, "holding item until cutover");
                Ok(())
            }
        };
        if let Err(e) = sent {
            // Never answered, so release it instead of blocking later outputs.
            self.strategy.collect(sequence, Vec::new());
            return Err(e);
        }
        Ok(sequence)
    }

    /// Next output in input order, without waiting for tracks that are still busy.
    pub async fn get_next_tuple(&mut self) -> Result<Option<DataItem>> {
        self.poll_results()?;
        self.try_cutover().await?;
        Ok(self.strategy.produce_next())
    }

    /// Wait for every item handed out so far and return all outputs that are ready.
    ///
    /// Fails with `TrackClosed` if a track stops while items are still outstanding.
    pub async fn flush(&mut self) -> Result<Vec<DataItem>> {
        loop {
            self.poll_results()?;
            self.try_cutover().await?;
            if self.in_flight() == 0 {
                break;
            }
            match tokio::time::timeout(TRACK_CHECK_INTERVAL, self.results_rx.recv()).await {
                Ok(Some(output)) => self.accept(output),
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        Ok(std::iter::from_fn(|| self.strategy.produce_next()).collect())
    }

    pub async fn shutdown(self) {
        if let Some(incoming) = self.incoming {
            incoming.shutdown().await;
        }
        self.current.shutdown().await;
        info!(executor = %self.config.executor, "switch mechanism stopped");
    }

    fn poll_results(&mut self) -> Result<()> {
        while let Ok(output) = self.results_rx.try_recv() {
            self.accept(output);
        }
        self.check_tracks()
    }

    /// A track that stopped with items outstanding will never answer for them. Their
    /// sequences are released without output so later results are not held back.
    fn check_tracks(&mut self) -> Result<()> {
        let dead = [Some(&mut self.current), self.incoming.as_mut()]
            .into_iter()
            .flatten()
            .find(|track| track.is_finished() && track.in_flight() > 0);
        let Some(track) = dead else {
            return Ok(());
        };

        let algorithm = track.algorithm().to_owned();
        let abandoned = track.abandon();
        error!(
            pipeline = %self.config.pipeline,
            executor = %self.config.executor,
            algorithm = %algorithm,
            abandoned = abandoned.len(),
            "track stopped with items outstanding"
        );
        for sequence in abandoned {
            self.strategy.collect(sequence, Vec::new());
        }
        Err(SwitchError::TrackClosed(algorithm))
    }

    fn accept(&mut self, output: TrackOutput) {
        let track = if self.current.id() == output.track {
            Some(&mut self.current)
        } else {
            self.incoming.as_mut().filter(|t| t.id() == output.track)
        };
        match track {
            Some(track) => track.record_output(output.sequence),
            None => warn!(track = output.track, "result from a retired track"),
        }

        match output.result {
            Ok(outputs) => self.strategy.collect(output.sequence, outputs),
            Err(e) => {
                warn!(sequence = output.sequence, error = %e, "algorithm failed to process item");
                self.strategy.collect(output.sequence, Vec::new());
            }
        }
    }

    async fn try_cutover(&mut self) -> Result<bool> {
        let Some(transition) = &self.transition else {
            return Ok(false);
        };
        if !self.strategy.is_cutover_ready(&self.status()) {
            return Ok(false);
        }
        if transition.transfer == TransferPoint::Cutover {
            if let Some(incoming) = &self.incoming {
                let report = self.transfer_state(incoming).await?;
                self.report_failures(&transition.signal, &report);
            }
        }

        let (Some(transition), Some(mut incoming)) = (self.transition.take(), self.incoming.take())
        else {
            return Ok(false);
        };
        incoming.set_role(TrackRole::Active);
        let outgoing = std::mem::replace(&mut self.current, incoming);
        outgoing.shutdown().await;

        for change in transition.pending {
            self.current.apply(change).await?;
        }
        for item in self.strategy.on_cutover() {
            self.current.send(item).await?;
        }

        self.listener
            .transition_completed(&transition.signal, transition.started_at.elapsed());
        Ok(true)
    }
}
