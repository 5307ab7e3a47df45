//! Batch set-up from command line arguments.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use byte_unit::Byte;
use expanduser::expanduser;
use tracing::{info, warn};

use crate::cli::{CommandLineArgs, ContainerFormat};
use crate::error::{ConfigError, JobError};
use crate::fetcher::{Credentials, HttpFetcher};
use crate::granule::{GranuleParser, JsonGranuleParser};
use crate::metrics::gather_metrics;
use crate::models::{BeamSelection, SubsetConfig, SubsetSpec};
use crate::orchestrator::{BatchOrchestrator, BatchReport};
use crate::predicate::{load_boundary, InBounds, RowPredicate};
use crate::resource_manager::ResourceManager;

/// Expand a leading `~` in a path.
fn expand(path: &str) -> Result<PathBuf, ConfigError> {
    expanduser(path).map_err(|_| ConfigError::Path(path.to_string()))
}

/// Returns the URLs in a URL list, ignoring blank lines and `#` comments.
///
/// # Arguments
///
/// * `text`: Newline-delimited URL list
/// * `skip`: Number of URLs to drop from the start of the list
pub fn parse_url_list(text: &str, skip: usize) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .skip(skip)
        .map(String::from)
        .collect()
}

/// Read a URL list from a file. See [parse_url_list].
pub fn read_url_list(path: &Path, skip: usize) -> Result<Vec<String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_url_list(&text, skip))
}

/// Read a subset configuration from a JSON file, or return the default configuration.
pub fn load_subset_config(path: Option<&Path>) -> Result<SubsetConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(SubsetConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Parse a human readable byte size such as `8GiB`.
pub fn parse_byte_size(size: &str) -> Result<usize, ConfigError> {
    let bytes = Byte::parse_str(size, /* ignore case */ true)
        .map_err(|_| ConfigError::ByteSize(size.to_string()))?
        .as_u64();
    usize::try_from(bytes).map_err(|_| ConfigError::ByteSize(size.to_string()))
}

/// Returns the parser for a container format.
pub fn granule_parser(format: ContainerFormat) -> Result<Arc<dyn GranuleParser>, ConfigError> {
    match format {
        ContainerFormat::Json => Ok(Arc::new(JsonGranuleParser)),
        #[cfg(feature = "netcdf")]
        ContainerFormat::Netcdf => Ok(Arc::new(crate::netcdf_granule::NetcdfGranuleParser)),
        #[cfg(not(feature = "netcdf"))]
        ContainerFormat::Netcdf => Err(ConfigError::UnsupportedFormat(format.to_string())),
    }
}

/// Build the subset specification and beam selection from the arguments.
///
/// `--stride` and `--beams` override the subset configuration file.
pub fn build_spec(args: &CommandLineArgs) -> Result<(SubsetSpec, BeamSelection), ConfigError> {
    let config_path = args.subset_config.as_deref().map(expand).transpose()?;
    let mut config = load_subset_config(config_path.as_deref())?;
    if let Some(stride) = args.stride {
        config.stride = stride;
    }
    if let Some(beams) = &args.beams {
        config.beams = Some(beams.clone());
    }
    let predicate = match &args.boundary {
        Some(boundary) => {
            let boundary = load_boundary(&expand(boundary)?)?;
            let predicate = InBounds::with_fields(boundary, &args.lon_field, &args.lat_field);
            for field in predicate.fields() {
                if !config.layers.iter().any(|layer| layer == field) {
                    warn!(
                        field,
                        "Boundary field is not an output layer; every shot will be dropped"
                    );
                }
            }
            Some(Arc::new(predicate) as Arc<dyn RowPredicate>)
        }
        None => None,
    };
    SubsetSpec::from_config(config, predicate)
}

/// Set up and run a batch.
///
/// Returns a report of the batch, or an error if the batch could not be set up.
pub async fn run(args: &CommandLineArgs) -> Result<BatchReport, ConfigError> {
    let workers = args.workers.unwrap_or_else(num_cpus::get).max(1);
    let urls = read_url_list(&expand(&args.url_list)?, args.skip)?;
    let output_dir = expand(&args.output_dir)?;
    let (spec, beams) = build_spec(args)?;

    if args.use_rayon {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()
        {
            warn!(error = %err, "Failed to configure the rayon thread pool");
        }
    }
    let memory_limit = args
        .memory_limit
        .as_deref()
        .map(parse_byte_size)
        .transpose()?;
    let resource_manager = Arc::new(ResourceManager::new(args.connection_limit, memory_limit));
    let fetcher = HttpFetcher::new(
        granule_parser(args.format)?,
        resource_manager,
        args.request_timeout.map(Duration::from_secs),
    )?
    .with_auth_host(&args.auth_host)
    .with_credentials(Credentials::from_parts(
        args.username.clone(),
        args.password.clone(),
    ))
    .with_rayon(args.use_rayon);

    info!(
        urls = urls.len(),
        workers,
        output_dir = %output_dir.display(),
        ?spec,
        "Subsetting granules"
    );
    let orchestrator =
        BatchOrchestrator::new(Arc::new(fetcher), Arc::new(spec), beams, output_dir)
            .with_progress(!args.no_progress);
    let report = orchestrator.run(&urls, workers, args.chunk_size).await?;

    if let Some(metrics_file) = &args.metrics_file {
        std::fs::write(expand(metrics_file)?, gather_metrics()?)?;
    }
    Ok(report)
}

/// Returns the lines printed at the end of a batch: one per failed job, then a summary.
pub fn report_lines(report: &BatchReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .failures()
        .map(|(url, err)| format!("FAILED {} [{}]: {}", url, err.kind(), describe(err)))
        .collect();
    lines.push(report.to_string());
    lines
}

/// Render an error with its causes on one line.
fn describe(err: &JobError) -> String {
    crate::error::error_chain(err).join(": ")
}
