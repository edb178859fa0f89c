use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::ServiceUrl;
use crate::error::HarvestError;

pub const DEFAULT_SERVICES_FILE: &str = "services.txt";
pub const DEFAULT_OUT_DIR: &str = "./output/";

/// One line of the services file: a layer url and the output base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceJob {
    pub url: ServiceUrl,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub services: Vec<ServiceJob>,
    pub skipped: Vec<SkippedLine>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = PathBuf::from(path.unwrap_or(DEFAULT_SERVICES_FILE));
        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        Ok(Self::parse_services(&content))
    }

    /// Parses `url|name` lines. Blank lines and `#` comments are ignored,
    /// malformed lines are recorded in `skipped` and otherwise ignored.
    pub fn parse_services(content: &str) -> ResolvedConfig {
        let mut resolved = ResolvedConfig::default();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_service_line(line) {
                Ok(job) => resolved.services.push(job),
                Err(reason) => {
                    tracing::warn!(line = index + 1, %reason, "skipping services file line");
                    resolved.skipped.push(SkippedLine {
                        line: index + 1,
                        reason,
                    });
                }
            }
        }
        resolved
    }
}

fn parse_service_line(line: &str) -> Result<ServiceJob, String> {
    let (url, name) = line
        .split_once('|')
        .ok_or_else(|| "expected `serviceUrl|outputName`".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("missing output name".to_string());
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(format!("output name is not a plain file name: {name}"));
    }
    let url = url.trim().parse::<ServiceUrl>().map_err(|err| err.to_string())?;
    Ok(ServiceJob {
        url,
        name: name.to_string(),
    })
}

/// Chunking and admission-control knobs of a harvest run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestSettings {
    /// Object ids per query request.
    pub chunk_size: usize,
    /// Chunks aggregated into one output file.
    pub chunks_per_file: usize,
    /// Upper bound on simultaneous requests; unset fetches a whole file
    /// batch at once.
    pub max_in_flight: Option<usize>,
    pub request_timeout_secs: u64,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            chunks_per_file: 50,
            max_in_flight: None,
            request_timeout_secs: 60,
        }
    }
}

impl HarvestSettings {
    pub fn load(path: &str) -> Result<Self, HarvestError> {
        let path = PathBuf::from(path);
        let content =
            fs::read_to_string(&path).map_err(|_| HarvestError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.chunk_size == 0 {
            return Err(HarvestError::InvalidSettings(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.chunks_per_file == 0 {
            return Err(HarvestError::InvalidSettings(
                "chunks_per_file must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(HarvestError::InvalidSettings(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(HarvestError::InvalidSettings(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn records_per_file(&self) -> usize {
        self.chunk_size.saturating_mul(self.chunks_per_file)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Worker count for a batch of `chunk_count` chunks.
    pub fn workers_for(&self, chunk_count: usize) -> usize {
        let cap = self.max_in_flight.unwrap_or(chunk_count);
        cap.min(chunk_count).max(1)
    }
}

/// Drops trailing separators; an empty path means the current directory.
pub fn normalize_out_dir(raw: &str) -> Utf8PathBuf {
    let trimmed = raw.trim();
    let stripped = trimmed.trim_end_matches(['/', '\\']);
    if stripped.is_empty() {
        if trimmed.is_empty() {
            Utf8PathBuf::from(".")
        } else {
            Utf8PathBuf::from("/")
        }
    } else {
        Utf8PathBuf::from(stripped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_services_skips_noise() {
        let content = "\
# parcels first
https://gis.example.org/arcgis/rest/services/Parcels/MapServer/0|parcels

not a service line
https://gis.example.org/arcgis/rest/services/Roads/MapServer/1|
ftp://gis.example.org/layer|ftp
https://gis.example.org/arcgis/rest/services/Roads/MapServer/1?where=1%3D1 | roads
";
        let resolved = ConfigLoader::parse_services(content);
        assert_eq!(resolved.services.len(), 2);
        assert_eq!(resolved.services[0].name, "parcels");
        assert_eq!(resolved.services[1].name, "roads");
        assert_eq!(resolved.services[1].url.user_params().get("where"), Some("1=1"));
        let skipped = resolved.skipped.iter().map(|s| s.line).collect::<Vec<_>>();
        assert_eq!(skipped, vec![4, 5, 6]);
    }

    #[test]
    fn normalize_out_dir_strips_trailing_slash() {
        assert_eq!(normalize_out_dir("./output/"), Utf8PathBuf::from("./output"));
        assert_eq!(normalize_out_dir(""), Utf8PathBuf::from("."));
        assert_eq!(normalize_out_dir("/"), Utf8PathBuf::from("/"));
    }

    #[test]
    fn workers_respect_admission_cap() {
        let mut settings = HarvestSettings::default();
        assert_eq!(settings.workers_for(50), 50);
        assert_eq!(settings.workers_for(3), 3);
        settings.max_in_flight = Some(8);
        assert_eq!(settings.workers_for(50), 8);
        assert_eq!(settings.workers_for(3), 3);
        assert_eq!(settings.workers_for(0), 1);
    }
}
