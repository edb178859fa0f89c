use std::fs;
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::aggregate::AggregatedBatch;
use crate::app::{ProgressEvent, ProgressSink};
use crate::error::HarvestError;
use crate::geojson::FeatureConverter;

pub const PRIMARY_EXT: &str = "json";
pub const SECONDARY_EXT: &str = "geojson";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmittedFiles {
    pub primary: Utf8PathBuf,
    pub secondary: Option<Utf8PathBuf>,
}

/// Writes aggregated batches as Esri JSON plus a converted second format.
pub struct BatchEmitter<V: FeatureConverter> {
    out_dir: Utf8PathBuf,
    converter: V,
}

impl<V: FeatureConverter> BatchEmitter<V> {
    /// Creates the output directory if needed.
    pub fn new(out_dir: Utf8PathBuf, converter: V) -> Result<Self, HarvestError> {
        fs::create_dir_all(out_dir.as_std_path()).map_err(|err| {
            HarvestError::Filesystem(format!("create output dir {out_dir}: {err}"))
        })?;
        Ok(Self { out_dir, converter })
    }

    pub fn out_dir(&self) -> &Utf8Path {
        &self.out_dir
    }

    pub fn output_path(
        &self,
        service_name: &str,
        file_index: usize,
        total_files: usize,
        ext: &str,
    ) -> Utf8PathBuf {
        let name = base_name(service_name, file_index, total_files);
        self.out_dir.join(format!("{name}.{ext}"))
    }

    /// The primary file is written before conversion is attempted, so a
    /// failing converter only costs the secondary file.
    pub fn emit(
        &self,
        batch: &AggregatedBatch,
        service_name: &str,
        total_files: usize,
        sink: &dyn ProgressSink,
    ) -> Result<EmittedFiles, HarvestError> {
        let primary =
            self.output_path(service_name, batch.file_index, total_files, PRIMARY_EXT);
        write_json_atomic(&primary, &batch.features)?;
        sink.event(ProgressEvent::FileWritten {
            path: primary.to_string(),
            records: batch.record_count(),
        });

        let path = self.output_path(service_name, batch.file_index, total_files, SECONDARY_EXT);
        let secondary = match self.converter.convert(&batch.features) {
            Ok(collection) => {
                write_json_atomic(&path, &collection)?;
                sink.event(ProgressEvent::FileWritten {
                    path: path.to_string(),
                    records: collection.features.len(),
                });
                Some(path)
            }
            Err(err) => {
                // A secondary file from a previous run must not sit next to
                // the new primary file.
                let removed_stale = remove_if_present(&path)?;
                sink.event(ProgressEvent::ConversionFailed {
                    service: service_name.to_string(),
                    file_index: batch.file_index,
                    reason: err.to_string(),
                    removed_stale,
                });
                None
            }
        };

        Ok(EmittedFiles { primary, secondary })
    }
}

/// `name` for a single-file service, `name_0003` style otherwise.
pub fn base_name(service_name: &str, file_index: usize, total_files: usize) -> String {
    if total_files > 1 {
        format!("{service_name}_{file_index:04}")
    } else {
        service_name.to_string()
    }
}

/// Returns whether a file was actually removed.
fn remove_if_present(path: &Utf8Path) -> Result<bool, HarvestError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(HarvestError::Filesystem(format!("remove {path}: {err}"))),
    }
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), HarvestError> {
    let parent = path
        .parent()
        .ok_or_else(|| HarvestError::Filesystem(format!("invalid output path {path}")))?;
    let temp = NamedTempFile::new_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, value)
            .map_err(|err| HarvestError::Filesystem(format!("serialize {path}: {err}")))?;
        writer
            .flush()
            .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_keeps_service_name() {
        assert_eq!(base_name("parcels", 0, 1), "parcels");
        assert_eq!(base_name("parcels", 0, 0), "parcels");
    }

    #[test]
    fn multi_file_names_are_zero_padded() {
        assert_eq!(base_name("parcels", 0, 3), "parcels_0000");
        assert_eq!(base_name("parcels", 12, 13), "parcels_0012");
        assert_eq!(base_name("parcels", 12345, 20000), "parcels_12345");
    }
}
