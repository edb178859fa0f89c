use crate::app::{ProgressEvent, ProgressSink};
use crate::arcgis::{ChunkResult, FeatureSet};
use crate::error::HarvestError;
use crate::partition::FileBatch;

/// Records of one file batch, concatenated in chunk order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBatch {
    pub file_index: usize,
    pub chunk_count: usize,
    /// Global indices of chunks that contributed nothing.
    pub failed_chunks: Vec<usize>,
    pub features: FeatureSet,
}

impl AggregatedBatch {
    pub fn record_count(&self) -> usize {
        self.features.features.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

/// Per-chunk result slots of one file batch, indexed by batch-local chunk
/// position. Results may arrive in any order.
#[derive(Debug)]
pub struct BatchSlots {
    file_index: usize,
    first_chunk: usize,
    slots: Vec<Option<ChunkResult>>,
}

impl BatchSlots {
    pub fn new(batch: &FileBatch<'_>) -> Self {
        Self::with_layout(batch.file_index(), batch.global_chunk_index(0), batch.chunk_count())
    }

    pub fn with_layout(file_index: usize, first_chunk: usize, chunk_count: usize) -> Self {
        Self {
            file_index,
            first_chunk,
            slots: (0..chunk_count).map(|_| None).collect(),
        }
    }

    /// Stores the result of a chunk. A slot is filled at most once; returns
    /// `false` when the index is out of range or already settled.
    pub fn fill(&mut self, local_index: usize, result: ChunkResult) -> bool {
        match self.slots.get_mut(local_index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(result);
                true
            }
            _ => false,
        }
    }

    pub fn settled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_settled(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether at least one request of the batch got an answer from the
    /// service, successful or not.
    pub fn reached_service(&self) -> bool {
        self.slots.iter().flatten().any(|result| {
            !matches!(result, Err(HarvestError::ServiceUnreachable(_)))
        })
    }

    /// The connection error shared by every chunk, when the batch holds more
    /// than one chunk and not a single request reached the service. A lone
    /// refused chunk is an ordinary chunk failure.
    pub fn unreachable_reason(&self) -> Option<String> {
        if self.slots.len() < 2 {
            return None;
        }
        let mut reason = None;
        for slot in &self.slots {
            match slot {
                Some(Err(HarvestError::ServiceUnreachable(message))) => {
                    reason.get_or_insert_with(|| message.clone());
                }
                _ => return None,
            }
        }
        reason
    }

    /// Flattens the slots. Slots that never settled count as failed chunks.
    pub fn into_aggregate(self, service: &str, sink: &dyn ProgressSink) -> AggregatedBatch {
        let results = self.slots.into_iter().map(|slot| {
            slot.unwrap_or_else(|| {
                Err(HarvestError::ServiceHttp(
                    "chunk request never settled".to_string(),
                ))
            })
        });
        aggregate(service, self.file_index, self.first_chunk, results, sink)
    }
}

/// Concatenates successful chunk fragments in the order given. Failed
/// chunks are reported to `sink` and skipped.
///
/// The envelope (geometry type, spatial reference, fields) comes from the
/// first successful fragment.
pub fn aggregate<I>(
    service: &str,
    file_index: usize,
    first_chunk: usize,
    results: I,
    sink: &dyn ProgressSink,
) -> AggregatedBatch
where
    I: IntoIterator<Item = ChunkResult>,
{
    let mut features = FeatureSet::default();
    let mut seeded = false;
    let mut failed_chunks = Vec::new();
    let mut chunk_count = 0;

    for (local_index, result) in results.into_iter().enumerate() {
        chunk_count += 1;
        let chunk_index = first_chunk + local_index;
        match result {
            Ok(fragment) => {
                if !seeded {
                    features.envelope = fragment.envelope;
                    seeded = true;
                }
                features.features.extend(fragment.features);
            }
            Err(err) => {
                sink.event(ProgressEvent::ChunkFailed {
                    service: service.to_string(),
                    file_index,
                    chunk_index,
                    reason: err.to_string(),
                });
                failed_chunks.push(chunk_index);
            }
        }
    }

    AggregatedBatch {
        file_index,
        chunk_count,
        failed_chunks,
        features,
    }
}
