use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{IdentifierSet, ObjectId, QueryParameters, ServiceUrl};
use crate::error::HarvestError;

/// Esri JSON feature as returned by a layer `query` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

/// Esri JSON feature set. Everything besides `features` (geometryType,
/// spatialReference, fields, ...) is kept verbatim in `envelope`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    #[serde(flatten)]
    pub envelope: Map<String, Value>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn object_id_field(&self) -> Option<&str> {
        self.envelope
            .get("objectIdFieldName")
            .and_then(|value| value.as_str())
    }

    pub fn geometry_type(&self) -> Option<&str> {
        self.envelope.get("geometryType").and_then(|value| value.as_str())
    }
}

/// Outcome of one chunk request.
pub type ChunkResult = Result<FeatureSet, HarvestError>;

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectIdsPayload {
    #[serde(default, rename = "objectIds")]
    object_ids: Option<Vec<u64>>,
}

pub trait FeatureServiceClient: Send + Sync {
    /// All object ids matching the user's query.
    fn discover_ids(&self, service: &ServiceUrl) -> Result<IdentifierSet, HarvestError>;

    fn fetch_chunk(&self, service: &ServiceUrl, chunk: &[ObjectId]) -> ChunkResult;
}

#[derive(Clone)]
pub struct ArcGisHttpClient {
    client: Client,
}

impl ArcGisHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ags-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::ServiceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::ServiceHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn get_json(&self, url: &Url) -> Result<Value, HarvestError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "feature service request failed".to_string());
            return Err(HarvestError::ServiceStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| HarvestError::InvalidResponse(err.to_string()))?;
        check_error_payload(&body)?;
        Ok(body)
    }
}

impl FeatureServiceClient for ArcGisHttpClient {
    fn discover_ids(&self, service: &ServiceUrl) -> Result<IdentifierSet, HarvestError> {
        let url = id_query_url(service)?;
        let body = self.get_json(&url)?;
        parse_object_ids(body)
    }

    fn fetch_chunk(&self, service: &ServiceUrl, chunk: &[ObjectId]) -> ChunkResult {
        let url = chunk_query_url(service, chunk)?;
        let body = self.get_json(&url)?;
        serde_json::from_value(body).map_err(|err| HarvestError::InvalidResponse(err.to_string()))
    }
}

/// Parameters every chunk request must carry, whatever the user asked for.
pub fn chunk_params(chunk: &[ObjectId]) -> QueryParameters {
    let object_ids = chunk
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    [
        ("objectIds", object_ids.as_str()),
        ("geometryType", "esriGeometryEnvelope"),
        ("returnGeometry", "true"),
        ("returnIdsOnly", "false"),
        ("outFields", "*"),
        ("outSR", "4326"),
        ("f", "json"),
    ]
    .into_iter()
    .collect()
}

pub fn chunk_query_url(service: &ServiceUrl, chunk: &[ObjectId]) -> Result<Url, HarvestError> {
    let params = service.user_params().merged_with(&chunk_params(chunk));
    query_url(service, &params)
}

pub fn id_query_url(service: &ServiceUrl) -> Result<Url, HarvestError> {
    let required: QueryParameters = [("returnIdsOnly", "true"), ("f", "json")]
        .into_iter()
        .collect();
    let mut params = service.user_params().merged_with(&required);
    params.insert_if_absent("where", "1=1");
    query_url(service, &params)
}

fn query_url(service: &ServiceUrl, params: &QueryParameters) -> Result<Url, HarvestError> {
    let mut url = Url::parse(&service.query_endpoint())
        .map_err(|err| HarvestError::InvalidServiceUrl(err.to_string()))?;
    url.query_pairs_mut().extend_pairs(params.iter());
    Ok(url)
}

fn parse_object_ids(body: Value) -> Result<IdentifierSet, HarvestError> {
    let payload: ObjectIdsPayload = serde_json::from_value(body)
        .map_err(|err| HarvestError::InvalidResponse(err.to_string()))?;
    // A layer with no matching rows answers `"objectIds": null`.
    Ok(payload.object_ids.unwrap_or_default().into_iter().collect())
}

fn check_error_payload(body: &Value) -> Result<(), HarvestError> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let payload: ErrorPayload =
        serde_json::from_value(error.clone()).unwrap_or_else(|_| ErrorPayload {
            code: 0,
            message: error.to_string(),
            details: Vec::new(),
        });
    let mut message = payload.message;
    if !payload.details.is_empty() {
        message = format!("{message} ({})", payload.details.join("; "));
    }
    Err(HarvestError::ServiceError {
        code: payload.code,
        message,
    })
}

/// Only a refused or failed connection counts as unreachable. A request
/// that timed out is an ordinary chunk failure.
fn map_transport_error(err: reqwest::Error) -> HarvestError {
    if err.is_timeout() {
        HarvestError::ServiceHttp(format!("request timed out: {err}"))
    } else if err.is_connect() {
        HarvestError::ServiceUnreachable(err.to_string())
    } else {
        HarvestError::ServiceHttp(err.to_string())
    }
}
