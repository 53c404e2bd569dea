//! Per-thread frequency tables over captured call stacks
//!
//! A captured stack of length L is counted under L keys: for every K in
//! `1..=L`, the K frames nearest the program's entry point (the tail of the
//! innermost-first frame list). Each key's count is therefore the number of
//! samples that passed through that call path, which is exactly what a node
//! of the merged call tree reports.

use crate::stack_unwind::CallStack;
use std::collections::{BTreeMap, HashMap};

/// Identity of a stack suffix: its addresses, innermost first
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackKey(Vec<u64>);

impl StackKey {
    pub fn new(frames: &[u64]) -> Self {
        Self(frames.to_vec())
    }

    pub fn frames(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A stack suffix and the number of samples that contained it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    /// Addresses, innermost first; `frames[0]` is the node's own frame
    pub frames: Vec<u64>,
    pub sample_count: u64,
}

impl SampleRecord {
    pub fn new(frames: Vec<u64>, sample_count: u64) -> Self {
        Self {
            frames,
            sample_count,
        }
    }

    /// The address this record's tree node stands for
    pub fn address(&self) -> u64 {
        self.frames[0]
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Every suffix of `frames`, shortest first
pub fn suffixes(frames: &[u64]) -> impl Iterator<Item = &[u64]> + '_ {
    (1..=frames.len()).map(move |k| &frames[frames.len() - k..])
}

/// Frequency table for a single thread
#[derive(Debug, Default, Clone)]
pub struct ThreadSamples {
    counts: HashMap<StackKey, u64>,
    stacks_seen: u64,
}

impl ThreadSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one captured stack under each of its suffixes
    pub fn record(&mut self, stack: &CallStack) {
        if stack.is_empty() {
            return;
        }

        for suffix in suffixes(stack.frames()) {
            *self.counts.entry(StackKey::new(suffix)).or_insert(0) += 1;
        }
        self.stacks_seen += 1;
    }

    pub fn count(&self, frames: &[u64]) -> Option<u64> {
        self.counts.get(&StackKey::new(frames)).copied()
    }

    /// Number of distinct suffixes
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of stacks recorded for this thread
    pub fn stacks_seen(&self) -> u64 {
        self.stacks_seen
    }

    /// Snapshot of every record, in no particular order
    pub fn records(&self) -> Vec<SampleRecord> {
        self.counts
            .iter()
            .map(|(key, &count)| SampleRecord::new(key.frames().to_vec(), count))
            .collect()
    }
}

/// Frequency tables for every thread of the target, keyed by thread id
#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    threads: BTreeMap<i32, ThreadSamples>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tid: i32, stack: &CallStack) {
        self.threads.entry(tid).or_default().record(stack);
    }

    pub fn thread(&self, tid: i32) -> Option<&ThreadSamples> {
        self.threads.get(&tid)
    }

    /// Threads in ascending id order
    pub fn threads(&self) -> impl Iterator<Item = (i32, &ThreadSamples)> {
        self.threads.iter().map(|(&tid, samples)| (tid, samples))
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
