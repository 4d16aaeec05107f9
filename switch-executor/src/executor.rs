use std::time::Duration;

use serde_json::Value;
use switch_common::signal::AlgorithmChangeSignal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::algorithm::DataItem;
use crate::error::{ExecutorError, SwitchError};
use crate::mechanism::{SwitchMechanism, SwitchState};
use crate::metrics_consts::SIGNALS_REJECTED_COUNTER;
use crate::profiling::Profiler;

/// Drives one `SwitchMechanism` from an item channel and a control channel.
///
/// Control payloads queued before an item are applied before that item is executed.
/// Outputs are forwarded in input order as they become ready.
pub struct Executor {
    pipeline: String,
    name: String,
    mechanism: SwitchMechanism,
    signals: mpsc::Receiver<Vec<u8>>,
    items: mpsc::Receiver<Value>,
    outputs: mpsc::Sender<DataItem>,
    poll_interval: Duration,
    profiler: Option<Profiler>,
}

impl Executor {
    pub fn new(
        pipeline: &str,
        name: &str,
        mechanism: SwitchMechanism,
        signals: mpsc::Receiver<Vec<u8>>,
        items: mpsc::Receiver<Value>,
        outputs: mpsc::Sender<DataItem>,
    ) -> Self {
        Self {
            pipeline: pipeline.to_owned(),
            name: name.to_owned(),
            mechanism,
            signals,
            items,
            outputs,
            poll_interval: Duration::from_millis(50),
            profiler: None,
        }
    }

    /// How often ready outputs are forwarded while no items arrive.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Run until the item channel closes or `cancel` fires, then flush and stop the tracks.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ExecutorError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = self.run_loop(&cancel, &mut interval).await;
        let flushed = match result {
            Ok(()) => self.finish().await,
            Err(e) => Err(e),
        };

        if let Some(profiler) = self.profiler.take() {
            match tokio::task::spawn_blocking(move || profiler.store()).await {
                Ok(stored) => info!(stored, "algorithm profiles written"),
                Err(e) => warn!(error = %e, "writing algorithm profiles failed"),
            }
        }
        self.mechanism.shutdown().await;
        info!(executor = %self.name, "executor stopped");
        flushed
    }

    async fn run_loop(
        &mut self,
        cancel: &CancellationToken,
        interval: &mut tokio::time::Interval,
    ) -> Result<(), ExecutorError> {
        let mut signals_open = true;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(executor = %self.name, "cancellation requested");
                    return Ok(());
                }
                signal = self.signals.recv(), if signals_open => match signal {
                    Some(payload) => self.apply_signal(&payload).await?,
                    None => signals_open = false,
                },
                item = self.items.recv() => match item {
                    Some(payload) => {
                        self.drain_signals().await?;
                        let sequence = self.mechanism.execute(payload).await?;
                        if let Some(profiler) = self.profiler.as_mut() {
                            profiler.item_sent(sequence);
                        }
                        self.forward_ready().await?;
                    }
                    None => {
                        info!(executor = %self.name, "item channel closed");
                        return Ok(());
                    }
                },
                _ = interval.tick() => {
                    self.forward_ready().await?;
                    self.sample_profile();
                }
            }
        }
    }

    async fn drain_signals(&mut self) -> Result<(), ExecutorError> {
        while let Ok(payload) = self.signals.try_recv() {
            self.apply_signal(&payload).await?;
        }
        Ok(())
    }

    /// Malformed, busy or unknown signals are dropped; only a dead track stops the executor.
    async fn apply_signal(&mut self, payload: &[u8]) -> Result<(), ExecutorError> {
        let signal = match AlgorithmChangeSignal::decode(payload, &self.pipeline, &self.name) {
            Ok(signal) => signal,
            Err(e) => {
                metrics::counter!(SIGNALS_REJECTED_COUNTER, "reason" => "malformed").increment(1);
                warn!(executor = %self.name, error = %e, "dropping malformed control payload");
                return Ok(());
            }
        };

        match self.mechanism.handle_signal(signal).await {
            Ok(_) => Ok(()),
            Err(e @ SwitchError::TrackClosed(_)) => Err(e.into()),
            Err(_) => Ok(()),
        }
    }

    async fn forward_ready(&mut self) -> Result<(), ExecutorError> {
        while let Some(output) = self.mechanism.get_next_tuple().await? {
            self.emit(output).await?;
        }
        self.release_profiled();
        Ok(())
    }

    /// Inputs that were released without output never reach `emit`.
    fn release_profiled(&mut self) {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.release(self.mechanism.release_point());
        }
    }

    async fn emit(&mut self, output: DataItem) -> Result<(), ExecutorError> {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.output_emitted(&output);
        }
        self.outputs
            .send(output)
            .await
            .map_err(|_| ExecutorError::OutputClosed)
    }

    fn sample_profile(&mut self) {
        let Some(profiler) = self.profiler.as_mut() else {
            return;
        };
        // Observations during a transition belong to neither algorithm alone.
        if self.mechanism.state() == SwitchState::Transitioning {
            profiler.discard_window();
            return;
        }
        profiler.maybe_sample(self.mechanism.current_algorithm());
    }

    async fn finish(&mut self) -> Result<(), ExecutorError> {
        self.drain_signals().await?;
        for output in self.mechanism.flush().await? {
            self.emit(output).await?;
        }
        self.release_profiled();
        self.sample_profile();
        Ok(())
    }
}
