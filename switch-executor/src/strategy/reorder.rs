use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::algorithm::DataItem;

/// Releases track results in input sequence order, whichever track produced them.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next: u64,
    pending: BTreeMap<u64, Vec<Value>>,
    ready: VecDeque<DataItem>,
}

impl ReorderBuffer {
    /// Results for a sequence below the release point were already emitted and are dropped.
    pub fn insert(&mut self, sequence: u64, outputs: Vec<Value>) {
        if sequence < self.next || self.pending.contains_key(&sequence) {
            tracing::warn!(sequence, "dropping duplicate result");
            return;
        }
        self.pending.insert(sequence, outputs);

        while let Some(outputs) = self.pending.remove(&self.next) {
            let sequence = self.next;
            self.ready.extend(
                outputs
                    .into_iter()
                    .map(|payload| DataItem::new(sequence, payload)),
            );
            self.next += 1;
        }
    }

    /// Every sequence below this one has been released.
    pub fn release_point(&self) -> u64 {
        self.next
    }

    pub fn pop(&mut self) -> Option<DataItem> {
        self.ready.pop_front()
    }

    /// Results waiting for an earlier sequence.
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }
}
