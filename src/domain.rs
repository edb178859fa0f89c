use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Record identifier assigned by the feature service (`OBJECTID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| HarvestError::InvalidObjectId(value.to_string()))
    }
}

/// Identifiers of one service in ascending numeric order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierSet(Vec<ObjectId>);

impl IdentifierSet {
    pub fn new(mut ids: Vec<ObjectId>) -> Self {
        ids.sort_unstable();
        Self(ids)
    }

    pub fn as_slice(&self) -> &[ObjectId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u64> for IdentifierSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(ObjectId).collect())
    }
}

/// Query string parameters in insertion order.
///
/// Keys are unique; inserting an existing key replaces its value in place so
/// the user's original ordering survives a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameters(Vec<(String, String)>);

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if self.get(&key).is_none() {
            self.0.push((key, value.into()));
        }
    }

    /// User parameters overlaid with `required`; required keys always win.
    pub fn merged_with(&self, required: &QueryParameters) -> QueryParameters {
        let mut merged = self.clone();
        for (key, value) in required.iter() {
            merged.insert(key, value);
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParameters::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// A feature layer endpoint split into its base url and the user's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrl {
    base: String,
    user_params: QueryParameters,
}

impl ServiceUrl {
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn user_params(&self) -> &QueryParameters {
        &self.user_params
    }

    pub fn query_endpoint(&self) -> String {
        format!("{}/query/", self.base)
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

impl FromStr for ServiceUrl {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let mut url =
            Url::parse(trimmed).map_err(|_| HarvestError::InvalidServiceUrl(value.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HarvestError::InvalidServiceUrl(value.to_string()));
        }

        let user_params = url
            .query_pairs()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect::<QueryParameters>();
        url.set_query(None);
        url.set_fragment(None);

        let mut base = url.as_str().trim_end_matches('/').to_string();
        if let Some(stripped) = base.strip_suffix("/query") {
            base = stripped.to_string();
        }

        Ok(Self { base, user_params })
    }
}
