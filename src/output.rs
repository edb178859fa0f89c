use std::io::{self, Write};

use serde::Serialize;

use crate::app::{HarvestResult, ProgressEvent, ProgressSink, RunState};

/// How the run summary is reported. Progress always goes to the log.
#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Log,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_harvest(result: &HarvestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress to `tracing`.
pub struct LogOutput;

impl ProgressSink for LogOutput {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ServiceStarted {
                service,
                records,
                chunks,
                files,
            } => {
                tracing::info!(%service, records, chunks, files, "harvesting service");
            }
            ProgressEvent::StateChanged { service, state } => match state {
                RunState::Running { file_index } => {
                    tracing::debug!(%service, file_index, "fetching file batch");
                }
                RunState::Idle | RunState::Done => {
                    tracing::debug!(%service, ?state, "sequencer state");
                }
            },
            ProgressEvent::ChunkFailed {
                service,
                file_index,
                chunk_index,
                reason,
            } => {
                tracing::warn!(%service, file_index, chunk_index, %reason, "chunk request failed");
            }
            ProgressEvent::ConversionFailed {
                service,
                file_index,
                reason,
                removed_stale,
            } => {
                tracing::warn!(
                    %service,
                    file_index,
                    %reason,
                    removed_stale,
                    "geojson conversion failed"
                );
            }
            ProgressEvent::FileWritten { path, records } => {
                tracing::info!(%path, records, "wrote file");
            }
            ProgressEvent::BatchCompleted {
                service,
                file_index,
                records,
                failed_chunks,
                elapsed,
            } => {
                tracing::info!(
                    %service,
                    file_index,
                    records,
                    failed_chunks,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "file batch complete"
                );
            }
        }
    }
}
