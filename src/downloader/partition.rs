use crate::store::TrackRecord;
use tracing::warn;

/// Contiguous run of records owned by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    /// Position of the first record in the full sequence
    pub offset: usize,
    pub records: Vec<TrackRecord>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Number of records each of `worker_count` segments receives.
///
/// With 5 records and 4 workers this is `[2, 1, 1, 1]`: the remainder goes to
/// the earliest segments.
pub fn segment_sizes(total: usize, worker_count: usize) -> Vec<usize> {
    let worker_count = worker_count.max(1);
    let base = total / worker_count;
    let remainder = total - base * worker_count;

    (0..worker_count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Split `records` into `worker_count` ordered segments.
///
/// Always returns exactly `worker_count` segments (at least one); trailing
/// segments are empty when there are fewer records than workers.
pub fn partition(records: Vec<TrackRecord>, worker_count: usize) -> Vec<Segment> {
    if worker_count == 0 {
        warn!("Worker count of 0 requested, using 1");
    }

    let sizes = segment_sizes(records.len(), worker_count);
    let mut remaining = records.into_iter();
    let mut offset = 0;

    sizes
        .into_iter()
        .enumerate()
        .map(|(index, size)| {
            let segment = Segment {
                index,
                offset,
                records: remaining.by_ref().take(size).collect(),
            };
            offset += size;
            segment
        })
        .collect()
}
