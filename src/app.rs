use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::aggregate::BatchSlots;
use crate::arcgis::FeatureServiceClient;
use crate::config::{HarvestSettings, ResolvedConfig, ServiceJob};
use crate::domain::{IdentifierSet, ServiceUrl};
use crate::emit::{BatchEmitter, EmittedFiles};
use crate::error::HarvestError;
use crate::geojson::FeatureConverter;
use crate::partition::{FileBatch, Partition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    Idle,
    Running { file_index: usize },
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    ServiceStarted {
        service: String,
        records: usize,
        chunks: usize,
        files: usize,
    },
    StateChanged {
        service: String,
        state: RunState,
    },
    ChunkFailed {
        service: String,
        file_index: usize,
        chunk_index: usize,
        reason: String,
    },
    ConversionFailed {
        service: String,
        file_index: usize,
        reason: String,
        /// A secondary file left by an earlier run was deleted.
        removed_stale: bool,
    },
    FileWritten {
        path: String,
        records: usize,
    },
    BatchCompleted {
        service: String,
        file_index: usize,
        records: usize,
        failed_chunks: usize,
        elapsed: Duration,
    },
}

/// Observer for everything a harvest run wants to report.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Shared flag polled between chunk requests and between file batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: String,
    pub url: String,
    pub records: usize,
    pub records_written: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub files: Vec<EmittedFiles>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub services: Vec<ServiceReport>,
    pub skipped_lines: usize,
}

pub struct App<C: FeatureServiceClient, V: FeatureConverter> {
    client: C,
    emitter: BatchEmitter<V>,
    settings: HarvestSettings,
    cancel: CancelToken,
}

impl<C: FeatureServiceClient, V: FeatureConverter> App<C, V> {
    pub fn new(
        client: C,
        emitter: BatchEmitter<V>,
        settings: HarvestSettings,
    ) -> Result<Self, HarvestError> {
        settings.validate()?;
        Ok(Self {
            client,
            emitter,
            settings,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Harvests every service of the services file, in file order. The first
    /// fatal error ends the whole run.
    pub fn harvest(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        let mut services = Vec::with_capacity(config.services.len());
        for job in &config.services {
            services.push(self.harvest_service(job, sink)?);
        }
        Ok(HarvestResult {
            services,
            skipped_lines: config.skipped.len(),
        })
    }

    pub fn harvest_service(
        &self,
        job: &ServiceJob,
        sink: &dyn ProgressSink,
    ) -> Result<ServiceReport, HarvestError> {
        if self.cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }
        let ids = self.client.discover_ids(&job.url)?;
        self.run(job, &ids, sink)
    }

    /// Fetches, aggregates and writes the file batches of one service, one
    /// batch at a time. Batch `n + 1` is not requested before batch `n` is
    /// on disk.
    pub fn run(
        &self,
        job: &ServiceJob,
        ids: &IdentifierSet,
        sink: &dyn ProgressSink,
    ) -> Result<ServiceReport, HarvestError> {
        let partition = Partition::new(
            ids,
            self.settings.chunk_size,
            self.settings.chunks_per_file,
        )?;
        let total_files = partition.total_files();

        sink.event(ProgressEvent::ServiceStarted {
            service: job.name.clone(),
            records: partition.record_count(),
            chunks: partition.total_chunks(),
            files: total_files,
        });
        sink.event(ProgressEvent::StateChanged {
            service: job.name.clone(),
            state: RunState::Idle,
        });

        let mut report = ServiceReport {
            service: job.name.clone(),
            url: job.url.to_string(),
            records: partition.record_count(),
            records_written: 0,
            chunks: partition.total_chunks(),
            failed_chunks: 0,
            files: Vec::with_capacity(total_files),
        };

        // Once any request got an answer the service is up, and later
        // connection failures are per-chunk failures.
        let mut reached = false;
        for batch in partition.file_batches() {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            let file_index = batch.file_index();
            sink.event(ProgressEvent::StateChanged {
                service: job.name.clone(),
                state: RunState::Running { file_index },
            });

            let started = Instant::now();
            let slots = self.fetch_batch(&job.url, &batch);

            // Never emit a batch cut short by cancellation.
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            if !reached && let Some(reason) = slots.unreachable_reason() {
                return Err(HarvestError::ServiceUnreachable(reason));
            }
            reached |= slots.reached_service();

            let aggregated = slots.into_aggregate(&job.name, sink);
            let files = self.emitter.emit(&aggregated, &job.name, total_files, sink)?;

            report.records_written += aggregated.record_count();
            report.failed_chunks += aggregated.failed_chunks.len();
            report.files.push(files);
            sink.event(ProgressEvent::BatchCompleted {
                service: job.name.clone(),
                file_index,
                records: aggregated.record_count(),
                failed_chunks: aggregated.failed_chunks.len(),
                elapsed: started.elapsed(),
            });
        }

        sink.event(ProgressEvent::StateChanged {
            service: job.name.clone(),
            state: RunState::Done,
        });
        Ok(report)
    }

    /// Requests every chunk of `batch` concurrently and returns once all of
    /// them have settled. At most `max_in_flight` requests run at a time.
    pub fn fetch_batch(&self, service: &ServiceUrl, batch: &FileBatch<'_>) -> BatchSlots {
        let chunk_count = batch.chunk_count();
        let workers = self.settings.workers_for(chunk_count);
        let next = AtomicUsize::new(0);
        let mut slots = BatchSlots::new(batch);

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let local_index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(chunk) = batch.chunk(local_index) else {
                            break;
                        };
                        tracing::debug!(
                            file_index = batch.file_index(),
                            chunk_index = batch.global_chunk_index(local_index),
                            size = chunk.len(),
                            "requesting chunk"
                        );
                        let result = self.client.fetch_chunk(service, chunk);
                        if tx.send((local_index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (local_index, result) in rx {
                slots.fill(local_index, result);
            }
        });

        slots
    }
}
