//! Feeds runtime observations of the executor into per algorithm profiles.
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use switch_common::profile::{AlgorithmProfile, ObservationSource, Observable, ProfileStore};
use tokio::time::Instant;
use tracing::debug;

use crate::algorithm::DataItem;

/// Observations collected since the last sample.
#[derive(Debug)]
struct Window {
    started: Instant,
    items: u64,
    latency_total: Duration,
    timestamp_ms: i64,
}

impl Window {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            items: 0,
            latency_total: Duration::ZERO,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

impl ObservationSource for Window {
    fn observables(&self) -> Vec<Observable> {
        vec![
            Observable::Latency,
            Observable::ThroughputItems,
            Observable::Items,
        ]
    }

    fn has_value(&self, observable: Observable) -> bool {
        match observable {
            Observable::Latency | Observable::ThroughputItems => self.items > 0,
            Observable::Items => true,
            _ => false,
        }
    }

    fn last_update(&self, _observable: Observable) -> i64 {
        self.timestamp_ms
    }

    fn observed_value(&self, observable: Observable) -> f64 {
        let items = self.items as f64;
        match observable {
            Observable::Latency if self.items > 0 => {
                self.latency_total.as_micros() as f64 / 1000.0 / items
            }
            Observable::ThroughputItems => {
                let elapsed = self.started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    items / elapsed
                } else {
                    0.0
                }
            }
            Observable::Items => items,
            _ => 0.0,
        }
    }
}

/// Tracks item latency and throughput and keeps one profile per algorithm that ran.
pub struct Profiler {
    store: ProfileStore,
    pipeline: String,
    element: String,
    sample_interval: Duration,
    profiles: HashMap<String, AlgorithmProfile>,
    sent: BTreeMap<u64, Instant>,
    window: Window,
}

impl Profiler {
    pub fn new(base: PathBuf, pipeline: &str, element: &str, sample_interval: Duration) -> Self {
        Self {
            store: ProfileStore::new(base),
            pipeline: pipeline.to_owned(),
            element: element.to_owned(),
            sample_interval,
            profiles: HashMap::new(),
            sent: BTreeMap::new(),
            window: Window::new(),
        }
    }

    pub fn item_sent(&mut self, sequence: u64) {
        self.sent.insert(sequence, Instant::now());
    }

    /// Only the first output of an input counts towards latency and item counts.
    pub fn output_emitted(&mut self, item: &DataItem) {
        if let Some(sent) = self.sent.remove(&item.sequence) {
            self.window.items += 1;
            self.window.latency_total += sent.elapsed();
        }
    }

    /// Forget inputs below `release_point` that were answered without any output.
    pub fn release(&mut self, release_point: u64) {
        self.sent = self.sent.split_off(&release_point);
    }

    /// Inputs sent whose first output has not been seen yet.
    pub fn pending(&self) -> usize {
        self.sent.len()
    }

    /// Start a fresh window without feeding the current one anywhere.
    pub fn discard_window(&mut self) {
        self.window = Window::new();
    }

    /// Feed the current window into the profile of `algorithm` once the sample interval
    /// has passed. Returns whether a sample was taken.
    pub fn maybe_sample(&mut self, algorithm: &str) -> bool {
        if self.window.started.elapsed() < self.sample_interval {
            return false;
        }
        self.window.timestamp_ms = now_ms();
        let window = std::mem::replace(&mut self.window, Window::new());

        let profile = self
            .profiles
            .entry(algorithm.to_owned())
            .or_insert_with(|| {
                AlgorithmProfile::new(
                    self.store.clone(),
                    &self.pipeline,
                    &self.element,
                    algorithm,
                )
            });
        profile.update(&window);
        debug!(algorithm, items = window.items, "sampled algorithm profile");
        true
    }

    pub fn predict(&mut self, algorithm: &str, observable: Observable) -> Option<f64> {
        self.profiles
            .get_mut(algorithm)
            .map(|profile| profile.predict(observable, 0))
    }

    /// Write every profile to disk. Returns how many predictors were written.
    pub fn store(&self) -> usize {
        self.profiles.values().map(|profile| profile.store()).sum()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use switch_common::profile::NO_PREDICTION;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_samples_latency_and_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = Profiler::new(
            dir.path().to_path_buf(),
            "pipeline",
            "executor",
            Duration::from_secs(1),
        );

        profiler.item_sent(0);
        profiler.item_sent(1);
        tokio::time::advance(Duration::from_millis(20)).await;
        profiler.output_emitted(&DataItem::new(0, json!(1)));
        profiler.output_emitted(&DataItem::new(0, json!(2)));
        profiler.output_emitted(&DataItem::new(1, json!(3)));

        assert!(!profiler.maybe_sample("running-sum"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(profiler.maybe_sample("running-sum"));

        assert_eq!(
            profiler.predict("running-sum", Observable::Items),
            Some(2.0)
        );
        assert_eq!(
            profiler.predict("running-sum", Observable::Latency),
            Some(20.0)
        );
        assert_eq!(
            profiler.predict("running-sum", Observable::Tasks),
            Some(NO_PREDICTION)
        );
        assert_eq!(profiler.predict("passthrough", Observable::Items), None);
        assert_eq!(profiler.store(), 4);
    }

    #[tokio::test]
    async fn test_release_forgets_inputs_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = Profiler::new(
            dir.path().to_path_buf(),
            "pipeline",
            "executor",
            Duration::from_secs(1),
        );

        for sequence in 0..10_000 {
            profiler.item_sent(sequence);
        }
        profiler.release(9_998);
        assert_eq!(profiler.pending(), 2);

        profiler.output_emitted(&DataItem::new(9_998, json!(1)));
        profiler.release(10_000);
        assert_eq!(profiler.pending(), 0);
    }
}
