//! Process configuration assembled once at startup and validated eagerly.

use std::fmt;
use std::time::Duration;

use url::Url;

/// Distance metric declared when a collection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Cosine similarity (default).
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean distance.
    Euclid,
}

impl DistanceMetric {
    /// Wire name understood by the index backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            "euclid" => Ok(Self::Euclid),
            _ => Err(ConfigError::InvalidValue("distance metric")),
        }
    }
}

/// Preferred compute device for the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    /// Accelerated inference, when the service exposes it.
    Accelerated,
    /// The service's default compute mode.
    Default,
}

impl std::str::FromStr for ComputeDevice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accelerated" => Ok(Self::Accelerated),
            "default" => Ok(Self::Default),
            _ => Err(ConfigError::InvalidValue("compute device")),
        }
    }
}

impl ComputeDevice {
    /// Wire name sent with probe requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Default => "default",
        }
    }
}

/// Immutable configuration shared by every pipeline component.
///
/// Constructed once at process start (from CLI/env) and passed by reference
/// into component constructors. `validate` must pass before any I/O happens.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the vector index service.
    pub index_url: String,
    /// API key for the vector index service (empty = unauthenticated).
    pub index_api_key: String,
    /// Collection holding the record points.
    pub collection_name: String,
    /// Base URL of the embedding service.
    pub embed_url: String,
    /// API key for the embedding service.
    pub embed_api_key: String,
    /// Embedding model identifier.
    pub embed_model: String,
    /// Fixed output dimension for the whole index lifetime.
    pub vector_size: usize,
    /// Preferred compute device, probed once at startup.
    pub device: ComputeDevice,
    /// Distance metric used when creating the collection.
    pub distance: DistanceMetric,
    /// Records per embedding request.
    pub embed_batch_size: usize,
    /// Points per upsert request.
    pub upsert_batch_size: usize,
    /// Timeout applied to every external call.
    pub request_timeout: Duration,
    /// Bounded retry count for transient failures.
    pub max_retries: usize,
}

impl AppConfig {
    /// Checks every invariant the pipelines rely on, before any I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_http_url("index url", &self.index_url)?;
        require_http_url("embedding url", &self.embed_url)?;
        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::MissingField("collection name"));
        }
        if self.embed_model.trim().is_empty() {
            return Err(ConfigError::MissingField("embedding model"));
        }
        if self.vector_size == 0 {
            return Err(ConfigError::ZeroSize("vector size"));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::ZeroSize("embed batch size"));
        }
        if self.upsert_batch_size == 0 {
            return Err(ConfigError::ZeroSize("upsert batch size"));
        }
        Ok(())
    }
}

fn require_http_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    let parsed = Url::parse(value).map_err(|_| ConfigError::InvalidUrl(field))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ConfigError::InvalidUrl(field)),
    }
}

/// Fatal configuration problems detected before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is missing or empty.
    MissingField(&'static str),
    /// A URL setting did not parse as http(s).
    InvalidUrl(&'static str),
    /// An enumerated setting has an unrecognized value.
    InvalidValue(&'static str),
    /// A size/batch setting was zero.
    ZeroSize(&'static str),
    /// The embedding service reported a dimension different from the configured one.
    DimensionMismatch {
        /// Configured vector size.
        configured: usize,
        /// Dimension actually observed.
        observed: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "{field} is not set"),
            Self::InvalidUrl(field) => write!(f, "{field} must be an http(s) URL"),
            Self::InvalidValue(field) => write!(f, "unrecognized value for {field}"),
            Self::ZeroSize(field) => write!(f, "{field} must be at least 1"),
            Self::DimensionMismatch {
                configured,
                observed,
            } => write!(
                f,
                "configured vector size {configured} does not match observed dimension {observed}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
