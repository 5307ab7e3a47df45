//! Error handling.

use std::error::Error;
use std::path::PathBuf;

use strum_macros::Display;
use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;
use tracing::{event, Level};

/// Coarse classification of a failure, used in batch reports and log fields.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Auth,
    Transfer,
    Parse,
    Resource,
    Subset,
    Serialization,
    InvalidUrl,
    Worker,
}

/// Error accessing a hierarchical granule container
#[derive(Debug, Error)]
pub enum GranuleError {
    /// Requested beam group is not present in the granule
    #[error("beam {beam} not found in granule")]
    MissingBeam { beam: String },

    /// Requested layer is not present in the beam group
    #[error("layer {layer} not found in beam {beam}")]
    MissingLayer { beam: String, layer: String },

    /// Layer exists but cannot be represented as a column of values
    #[error("layer {layer} in beam {beam} is not supported: {reason}")]
    UnsupportedLayer {
        beam: String,
        layer: String,
        reason: String,
    },

    /// Error deserialising a JSON granule
    #[error("failed to parse JSON granule")]
    Json(#[from] serde_json::Error),

    /// Error reading a netCDF / HDF5 granule
    #[cfg(feature = "netcdf")]
    #[error("failed to read netCDF granule")]
    Netcdf(#[from] netcdf::error::Error),
}

/// Error while fetching and parsing a remote granule
///
/// None of these are raised past [crate::fetcher::Fetcher::fetch_and_apply]; they are returned as
/// values so that the orchestrator can record the failure and continue with the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Missing, rejected or unexpected credentials
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// Network failure while sending the request or receiving the body
    #[error("error receiving granule")]
    Transfer(#[from] reqwest::Error),

    /// Server responded with a non-success status
    #[error("HTTP request failed with status: {status}")]
    HttpStatus { status: u16 },

    /// Malformed granule container
    #[error("failed to parse granule")]
    Parse(#[from] GranuleError),

    /// Granule is larger than the configured memory limit
    #[error("Insufficient memory to process granule ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// The granule buffer could not grow to hold the body
    #[error("failed to allocate {requested} bytes for granule")]
    Allocation { requested: usize },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquire(#[from] AcquireError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// The blocking parse task panicked or was cancelled
    #[error("granule processing task failed")]
    Worker(#[from] JoinError),
}

impl FetchError {
    /// Returns the [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { reason: _ } => ErrorKind::Auth,
            Self::Transfer(_) | Self::HttpStatus { status: _ } => ErrorKind::Transfer,
            Self::Parse(_) => ErrorKind::Parse,
            Self::InsufficientMemory {
                requested: _,
                total: _,
            }
            | Self::Allocation { requested: _ }
            | Self::SemaphoreAcquire(_)
            | Self::TryFromInt(_) => ErrorKind::Resource,
            Self::Worker(_) => ErrorKind::Worker,
        }
    }
}

/// Error evaluating a row predicate
///
/// A predicate failing with this error is treated as returning false for that row.
#[derive(Debug, Error, PartialEq)]
pub enum PredicateError {
    /// Field required by the predicate is absent from the row
    #[error("row has no field {0}")]
    MissingField(String),

    /// Field required by the predicate is not numeric
    #[error("field {0} is not numeric")]
    NotNumeric(String),
}

/// Error reducing a granule to a table
#[derive(Debug, Error)]
pub enum SubsetError {
    /// Error reading a beam or layer from the container
    #[error("failed to read granule data")]
    Granule(#[from] GranuleError),

    /// Layers within a beam do not share the same number of shots
    #[error("layer {layer} in beam {beam} has {actual} shots, expected {expected}")]
    LengthMismatch {
        beam: String,
        layer: String,
        expected: usize,
        actual: usize,
    },

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

/// Error writing an output table
#[derive(Debug, Error)]
pub enum OutputError {
    /// I/O error creating, syncing or renaming the output file
    #[error("I/O error writing table")]
    Io(#[from] std::io::Error),

    /// Error encoding the table as CSV
    #[error("failed to encode table as CSV")]
    Csv(#[from] csv::Error),

    /// Refusing to overwrite an existing output
    #[error("output file {} already exists", .0.display())]
    AlreadyExists(PathBuf),
}

/// Error processing a single job
#[derive(Debug, Error)]
pub enum JobError {
    /// URL cannot be mapped to a granule ID
    #[error("invalid granule URL: {reason}")]
    InvalidUrl { reason: String },

    /// Fetch or parse failure
    #[error("failed to fetch granule")]
    Fetch(#[from] FetchError),

    /// Reduction failure
    #[error("failed to subset granule")]
    Subset(#[from] SubsetError),

    /// Table could not be persisted
    #[error("failed to write {}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: OutputError,
    },

    /// Worker task panicked or was cancelled before reporting this job
    #[error("worker task failed before reporting the job")]
    Worker,
}

impl JobError {
    /// Returns the [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { reason: _ } => ErrorKind::InvalidUrl,
            Self::Fetch(error) => error.kind(),
            Self::Subset(_) => ErrorKind::Subset,
            Self::Serialization { path: _, source: _ } => ErrorKind::Serialization,
            Self::Worker => ErrorKind::Worker,
        }
    }
}

/// Error setting up a batch run
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading an input file
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error deserialising the subset configuration
    #[error("subset configuration is not valid JSON")]
    Json(#[from] serde_json::Error),

    /// Error validating the subset configuration
    #[error("subset configuration is not valid")]
    Validation(#[from] validator::ValidationErrors),

    /// Error reading the boundary GeoJSON
    #[error("boundary is not valid GeoJSON")]
    GeoJson(#[from] geojson::Error),

    /// Boundary contains no polygons
    #[error("boundary must contain at least one polygon")]
    EmptyBoundary,

    /// Error parsing a byte size such as a memory limit
    #[error("invalid byte size {0}")]
    ByteSize(String),

    /// Path could not be expanded
    #[error("failed to expand path {0}")]
    Path(String),

    /// Container format not compiled in
    #[error("container format {0} is not supported by this build")]
    UnsupportedFormat(String),

    /// Error building the HTTP client
    #[error("failed to build HTTP client")]
    HttpClient(#[from] reqwest::Error),

    /// Error creating the output directory or writing metrics
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error encoding metrics
    #[error("failed to encode metrics")]
    Metrics(#[from] prometheus::Error),
}

/// Returns the message of an error followed by the messages of its sources.
///
/// Consecutive duplicate messages are removed.
///
/// # Arguments
///
/// * `error`: The error that occurred
pub fn error_chain<E>(error: &E) -> Vec<String>
where
    E: Error + ?Sized,
{
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        messages.push(source.to_string());
        current = source.source();
    }
    // Remove duplicate entries.
    messages.dedup();
    messages
}

/// Log an error and each of its causes at ERROR level.
pub fn log_error_chain<E>(error: &E)
where
    E: Error + ?Sized,
{
    let mut messages = error_chain(error).into_iter();
    if let Some(message) = messages.next() {
        event!(Level::ERROR, "{}", message);
    }
    for cause in messages {
        event!(Level::ERROR, "Caused by: {}", cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_chain<E: Error>(error: E, expected: &[&str]) {
        assert_eq!(expected.to_vec(), error_chain(&error));
    }

    #[test]
    fn missing_layer_error() {
        let error = GranuleError::MissingLayer {
            beam: "BEAM0000".to_string(),
            layer: "rh".to_string(),
        };
        assert_chain(error, &["layer rh not found in beam BEAM0000"]);
    }

    #[test]
    fn fetch_parse_error() {
        let json_error = serde_json::from_str::<u32>("x").unwrap_err();
        let error = FetchError::Parse(GranuleError::Json(json_error));
        assert_eq!(ErrorKind::Parse, error.kind());
        assert_chain(
            error,
            &[
                "failed to parse granule",
                "failed to parse JSON granule",
                "expected value at line 1 column 1",
            ],
        );
    }

    #[test]
    fn fetch_http_status_error() {
        let error = FetchError::HttpStatus { status: 404 };
        assert_eq!(ErrorKind::Transfer, error.kind());
        assert_chain(error, &["HTTP request failed with status: 404"]);
    }

    #[test]
    fn fetch_auth_error() {
        let error = FetchError::Auth {
            reason: "credentials rejected".to_string(),
        };
        assert_eq!(ErrorKind::Auth, error.kind());
        assert_chain(error, &["authentication failed: credentials rejected"]);
    }

    #[test]
    fn insufficient_memory() {
        let error = FetchError::InsufficientMemory {
            requested: 2,
            total: 1,
        };
        assert_eq!(ErrorKind::Resource, error.kind());
        assert_chain(error, &["Insufficient memory to process granule (2 > 1)"]);
    }

    #[test]
    fn allocation_error() {
        let error = FetchError::Allocation { requested: 1024 };
        assert_eq!(ErrorKind::Resource, error.kind());
        assert_chain(error, &["failed to allocate 1024 bytes for granule"]);
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = FetchError::SemaphoreAcquire(sem.acquire().await.unwrap_err());
        assert_chain(error, &["error acquiring resources", "semaphore closed"]);
    }

    #[test]
    fn length_mismatch() {
        let error = JobError::from(SubsetError::LengthMismatch {
            beam: "BEAM0101".to_string(),
            layer: "quality_flag".to_string(),
            expected: 20,
            actual: 19,
        });
        assert_eq!(ErrorKind::Subset, error.kind());
        assert_chain(
            error,
            &[
                "failed to subset granule",
                "layer quality_flag in beam BEAM0101 has 19 shots, expected 20",
            ],
        );
    }

    #[test]
    fn serialization_error() {
        let path = PathBuf::from("data/GEDI02_A.csv");
        let error = JobError::Serialization {
            path: path.clone(),
            source: OutputError::AlreadyExists(path),
        };
        assert_eq!(ErrorKind::Serialization, error.kind());
        assert_chain(
            error,
            &[
                "failed to write data/GEDI02_A.csv",
                "output file data/GEDI02_A.csv already exists",
            ],
        );
    }

    #[test]
    fn duplicate_messages_removed() {
        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error = ConfigError::Io(io_error);
        assert_chain(error, &["disk full"]);
    }

    #[test]
    fn error_kind_display() {
        assert_eq!("Transfer", ErrorKind::Transfer.to_string());
        assert_eq!("InvalidUrl", ErrorKind::InvalidUrl.to_string());
    }
}
