use tracing::warn;
use uuid::Uuid;

use crate::{
    error::SegmentFailure,
    types::{PipelineReport, Segment, SegmentResult},
};

/// Collects segment outcomes in completion order and releases them in index order.
pub struct ResultAggregator {
    segments: Vec<Segment>,
    slots: Vec<Option<SegmentResult>>,
    completed: usize,
}

impl ResultAggregator {
    /// `segments` must be indexed `0..segments.len()` in order.
    pub fn new(segments: &[Segment]) -> Self {
        Self {
            segments: segments.to_vec(),
            slots: vec![None; segments.len()],
            completed: 0,
        }
    }

    /// Store `result` in its slot. Unknown and already filled indices are rejected.
    pub fn record(&mut self, result: SegmentResult) -> bool {
        let index = result.index;
        let total = self.slots.len();
        let Some(slot) = self.slots.get_mut(index) else {
            warn!(segment = index, total, "segment result out of range ignored");
            return false;
        };
        if slot.is_some() {
            warn!(segment = index, "duplicate segment result ignored");
            return false;
        }

        *slot = Some(result);
        self.completed += 1;
        true
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.slots.len()
    }

    /// Build the report, marking every segment without a result as failed with `missing`.
    pub fn finish(self, run_id: Uuid, missing: SegmentFailure) -> PipelineReport {
        let results = self
            .segments
            .iter()
            .zip(self.slots)
            .map(|(segment, slot)| {
                slot.unwrap_or_else(|| SegmentResult::failed(segment, 0, missing.clone()))
            })
            .collect();

        PipelineReport::new(run_id, results)
    }
}
