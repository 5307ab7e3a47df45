//! Command Line Interface (CLI) arguments.

use clap::{Parser, ValueEnum};
use strum_macros::Display;

/// Container format of the granules being fetched.
#[derive(Clone, Copy, Debug, Display, PartialEq, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum ContainerFormat {
    /// HDF5 / netCDF-4 granules
    Netcdf,
    /// JSON granules, as produced by serialising an in-memory granule
    Json,
}

/// Container format used when none is given: HDF5 if this build can read it, otherwise JSON.
#[cfg(feature = "netcdf")]
pub const DEFAULT_FORMAT: ContainerFormat = ContainerFormat::Netcdf;
#[cfg(not(feature = "netcdf"))]
pub const DEFAULT_FORMAT: ContainerFormat = ContainerFormat::Json;

/// Granule subset command line interface
///
/// Downloads each granule in a URL list into memory, reduces it to the requested layers,
/// quality-filtered, downsampled and optionally restricted to a boundary region, and writes one
/// CSV table per granule.
#[derive(Clone, Debug, Parser)]
#[command(version)]
pub struct CommandLineArgs {
    /// Number of chunks of granules processed concurrently. Defaults to the number of CPUs
    #[arg(env = "GRANULE_SUBSET_WORKERS")]
    pub workers: Option<usize>,
    /// Path to a newline-delimited list of granule URLs
    #[arg(long, default_value = "urls.txt", env = "GRANULE_SUBSET_URL_LIST")]
    pub url_list: String,
    /// Directory to which output tables are written
    #[arg(long, default_value = "data", env = "GRANULE_SUBSET_OUTPUT_DIR")]
    pub output_dir: String,
    /// Path to a GeoJSON file with the boundary region. Shots outside it are dropped
    #[arg(long, env = "GRANULE_SUBSET_BOUNDARY")]
    pub boundary: Option<String>,
    /// Layer holding the longitude tested against the boundary
    #[arg(long, default_value = "lon_lowestmode", env = "GRANULE_SUBSET_LON_FIELD")]
    pub lon_field: String,
    /// Layer holding the latitude tested against the boundary
    #[arg(long, default_value = "lat_lowestmode", env = "GRANULE_SUBSET_LAT_FIELD")]
    pub lat_field: String,
    /// Path to a JSON subset configuration. Defaults to the GEDI L2A layers and quality flags
    #[arg(long, env = "GRANULE_SUBSET_CONFIG")]
    pub subset_config: Option<String>,
    /// Keep every Nth shot. Overrides the subset configuration
    #[arg(long, env = "GRANULE_SUBSET_STRIDE")]
    pub stride: Option<usize>,
    /// Comma-separated beams to subset. Overrides the subset configuration
    #[arg(long, value_delimiter = ',', env = "GRANULE_SUBSET_BEAMS")]
    pub beams: Option<Vec<String>>,
    /// Number of granules per chunk
    #[arg(long, default_value_t = 5, env = "GRANULE_SUBSET_CHUNK_SIZE")]
    pub chunk_size: usize,
    /// Number of URLs to skip at the start of the list
    #[arg(long, default_value_t = 0, env = "GRANULE_SUBSET_SKIP")]
    pub skip: usize,
    /// Container format of the granules. Defaults to netcdf in builds with the netcdf feature,
    /// json otherwise
    #[arg(long, value_enum, default_value_t = DEFAULT_FORMAT, env = "GRANULE_SUBSET_FORMAT")]
    pub format: ContainerFormat,
    /// Host whose authentication challenges are answered with credentials
    #[arg(long, default_value = "urs.earthdata.nasa.gov", env = "GRANULE_SUBSET_AUTH_HOST")]
    pub auth_host: String,
    /// Username for the authentication host
    #[arg(long, env = "EARTHDATA_USERNAME")]
    pub username: Option<String>,
    /// Password for the authentication host
    #[arg(long, env = "EARTHDATA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Maximum number of concurrent downloads
    #[arg(long, env = "GRANULE_SUBSET_CONNECTION_LIMIT")]
    pub connection_limit: Option<usize>,
    /// Maximum memory used to hold downloaded granules, e.g. 8GiB
    #[arg(long, env = "GRANULE_SUBSET_MEMORY_LIMIT")]
    pub memory_limit: Option<String>,
    /// Timeout in seconds for each download
    #[arg(long, env = "GRANULE_SUBSET_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "GRANULE_SUBSET_USE_RAYON")]
    pub use_rayon: bool,
    /// Disable the progress bar
    #[arg(long, default_value_t = false, env = "GRANULE_SUBSET_NO_PROGRESS")]
    pub no_progress: bool,
    /// Path to which metrics are written in Prometheus text format after the batch
    #[arg(long, env = "GRANULE_SUBSET_METRICS_FILE")]
    pub metrics_file: Option<String>,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
