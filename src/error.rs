use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid service url: {0}")]
    InvalidServiceUrl(String),

    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("invalid harvest settings: {0}")]
    InvalidSettings(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse settings: {0}")]
    ConfigParse(String),

    #[error("feature service request failed: {0}")]
    ServiceHttp(String),

    #[error("feature service unreachable: {0}")]
    #[diagnostic(help("check the service url and your network connection"))]
    ServiceUnreachable(String),

    #[error("feature service returned status {status}: {message}")]
    ServiceStatus { status: u16, message: String },

    #[error("feature service error {code}: {message}")]
    ServiceError { code: i64, message: String },

    #[error("unexpected feature service response: {0}")]
    InvalidResponse(String),

    #[error("geojson conversion failed: {0}")]
    Conversion(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("harvest cancelled")]
    Cancelled,
}

impl HarvestError {
    /// Errors raised by the remote service or the network between us and it.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            HarvestError::ServiceHttp(_)
                | HarvestError::ServiceUnreachable(_)
                | HarvestError::ServiceStatus { .. }
                | HarvestError::ServiceError { .. }
                | HarvestError::InvalidResponse(_)
        )
    }
}
