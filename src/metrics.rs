//! Prometheus metrics for batch runs.

use lazy_static::lazy_static;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

use crate::error::ConfigError;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Job counter by outcome
    pub static ref JOBS: IntCounterVec = IntCounterVec::new(
        Opts::new("granule_jobs", "The number of granule jobs completed"),
        &["outcome"]
    ).unwrap();
    // Bytes downloaded into memory
    pub static ref BYTES_FETCHED: IntCounter = IntCounter::new(
        "granule_bytes_fetched", "The number of granule bytes downloaded"
    ).unwrap();
    // Rows written to output tables
    pub static ref ROWS_WRITTEN: IntCounter = IntCounter::new(
        "granule_rows_written", "The number of rows written to output tables"
    ).unwrap();
    // Download time histogram
    pub static ref FETCH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("granule_fetch_duration", "The time taken to download each granule")
            .buckets(prometheus::exponential_buckets(0.5, 2.0, 12).unwrap())
    ).unwrap();
}

/// Register all metrics with [REGISTRY]. Should be called once at startup.
pub fn register_metrics() -> Result<(), ConfigError> {
    REGISTRY.register(Box::new(JOBS.clone()))?;
    REGISTRY.register(Box::new(BYTES_FETCHED.clone()))?;
    REGISTRY.register(Box::new(ROWS_WRITTEN.clone()))?;
    REGISTRY.register(Box::new(FETCH_DURATION.clone()))?;
    Ok(())
}

/// Increment the job counter, labelled by outcome.
pub fn record_job(outcome: &str) {
    JOBS.with_label_values(&[outcome]).inc();
}

/// Returns all registered metrics in the text exposition format.
pub fn gather_metrics() -> Result<String, ConfigError> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|err| ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))
}
