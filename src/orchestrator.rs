//! Batch orchestration of granule jobs.
//!
//! URLs are planned into jobs, jobs whose output already exists are skipped, and the rest are
//! split into chunks processed concurrently. Each job produces exactly one [JobOutcome]; a
//! failing job never affects the others.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

use crate::error::{error_chain, ConfigError, JobError};
use crate::fetcher::Fetcher;
use crate::granule::Granule;
use crate::metrics::{record_job, ROWS_WRITTEN};
use crate::models::{BeamSelection, SubsetSpec};
use crate::output::{remove_stale_temp_files, write_table, OUTPUT_EXTENSION};
use crate::reducer::reduce_granule;

/// A unit of work: one granule URL and where its table goes.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub url: Url,
    pub granule_id: String,
    pub output_path: PathBuf,
}

impl Job {
    /// Returns a new Job for a granule URL.
    ///
    /// The granule ID is the last path segment of the URL without its extension.
    ///
    /// # Arguments
    ///
    /// * `url`: Granule URL
    /// * `output_dir`: Directory holding output tables
    pub fn new(url: &str, output_dir: &Path) -> Result<Self, JobError> {
        let url = Url::parse(url.trim()).map_err(|err| JobError::InvalidUrl {
            reason: format!("{}: {}", url.trim(), err),
        })?;
        let segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .ok_or_else(|| JobError::InvalidUrl {
                reason: format!("{} has no path", url),
            })?;
        let granule_id = match segment.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => segment,
        }
        .to_string();
        let output_path = output_dir.join(format!("{}.{}", granule_id, OUTPUT_EXTENSION));
        Ok(Self {
            url,
            granule_id,
            output_path,
        })
    }
}

/// Why a job was not run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SkipReason {
    /// The output table exists from a previous run
    AlreadyComplete,
    /// An earlier URL in the batch maps to the same output
    Duplicate,
}

/// Final status of one job.
#[derive(Debug)]
pub enum JobStatus {
    Succeeded { rows: usize },
    Failed(JobError),
    Skipped(SkipReason),
}

impl JobStatus {
    /// Label used for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Succeeded { rows: _ } => "succeeded",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// The status of the job for one input URL.
#[derive(Debug)]
pub struct JobOutcome {
    pub url: String,
    pub status: JobStatus,
}

/// Outcomes of a batch run, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<JobOutcome>,
}

impl BatchReport {
    pub fn outcomes(&self) -> &[JobOutcome] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> usize {
        self.count(|status| matches!(status, JobStatus::Succeeded { rows: _ }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, JobStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, JobStatus::Skipped(_)))
    }

    /// Returns the URL and error of each failed job.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &JobError)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.status {
            JobStatus::Failed(err) => Some((outcome.url.as_str(), err)),
            _ => None,
        })
    }

    fn count(&self, predicate: impl Fn(&JobStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}

/// Runs a batch of granule jobs against a [Fetcher].
///
/// Completion is marked only by the existence of an output table, so a batch can be re-run
/// after interruption and will only process granules without output.
pub struct BatchOrchestrator<F> {
    fetcher: Arc<F>,
    spec: Arc<SubsetSpec>,
    beams: Arc<BeamSelection>,
    output_dir: PathBuf,
    show_progress: bool,
}

impl<F> Clone for BatchOrchestrator<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            spec: self.spec.clone(),
            beams: self.beams.clone(),
            output_dir: self.output_dir.clone(),
            show_progress: self.show_progress,
        }
    }
}

impl<F: Fetcher + 'static> BatchOrchestrator<F> {
    /// Returns a new BatchOrchestrator with progress reporting disabled.
    ///
    /// # Arguments
    ///
    /// * `fetcher`: Fetcher used for every job
    /// * `spec`: Reduction applied to every granule
    /// * `beams`: Beams to include from every granule
    /// * `output_dir`: Directory holding output tables
    pub fn new(
        fetcher: Arc<F>,
        spec: Arc<SubsetSpec>,
        beams: BeamSelection,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            spec,
            beams: Arc::new(beams),
            output_dir,
            show_progress: false,
        }
    }

    /// Enable or disable the progress bar.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Process a list of granule URLs.
    ///
    /// Jobs are split into chunks of `chunk_size` and at most `concurrency` chunks run at once.
    /// Jobs within a chunk run sequentially.
    ///
    /// Temporary files left by an interrupted run are removed first.
    ///
    /// Returns a report with one outcome per URL. Only failing to prepare the output directory
    /// is an error.
    ///
    /// # Arguments
    ///
    /// * `urls`: Granule URLs
    /// * `concurrency`: Maximum number of chunks processed at once
    /// * `chunk_size`: Number of jobs per chunk
    pub async fn run(
        &self,
        urls: &[String],
        concurrency: usize,
        chunk_size: usize,
    ) -> Result<BatchReport, ConfigError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let removed = remove_stale_temp_files(&self.output_dir)?;
        if removed > 0 {
            info!(removed, "Removed temporary files from an interrupted run");
        }

        let (mut statuses, pending) = self.plan(urls);
        info!(
            urls = urls.len(),
            pending = pending.len(),
            concurrency,
            chunk_size,
            "Starting batch"
        );

        let progress = if self.show_progress {
            let progress = ProgressBar::new(pending.len() as u64);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} granules")
                    .expect("progress bar template is valid")
                    .progress_chars("=> "),
            );
            progress
        } else {
            ProgressBar::hidden()
        };

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut pending = pending.into_iter();
        loop {
            let chunk: Vec<(usize, Job)> = pending.by_ref().take(chunk_size.max(1)).collect();
            if chunk.is_empty() {
                break;
            }
            let this = self.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let progress = progress.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                for (index, job) in chunk {
                    // A panic while processing one granule must not take the rest of the chunk.
                    let url = job.url.clone();
                    let worker = this.clone();
                    let status = match tokio::spawn(async move { worker.process(&job).await }).await
                    {
                        Ok(status) => status,
                        Err(err) => {
                            error!(url = %url, error = %err, "Granule task failed");
                            JobStatus::Failed(JobError::Worker)
                        }
                    };
                    progress.inc(1);
                    if tx.send((index, status)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "Worker task failed");
            }
        }
        while let Some((index, status)) = rx.recv().await {
            statuses[index] = Some(status);
        }
        progress.finish();

        let outcomes = urls
            .iter()
            .zip(statuses)
            .map(|(url, status)| {
                let status = status.unwrap_or(JobStatus::Failed(JobError::Worker));
                record_job(status.outcome());
                JobOutcome {
                    url: url.clone(),
                    status,
                }
            })
            .collect();
        let report = BatchReport { outcomes };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Finished batch"
        );
        Ok(report)
    }

    /// Map URLs to jobs. Returns the statuses decided without fetching, indexed like `urls`,
    /// and the jobs still to run with their index.
    fn plan(&self, urls: &[String]) -> (Vec<Option<JobStatus>>, Vec<(usize, Job)>) {
        let mut statuses = Vec::with_capacity(urls.len());
        let mut pending = Vec::new();
        let mut outputs = HashSet::new();
        for (index, url) in urls.iter().enumerate() {
            let status = match Job::new(url, &self.output_dir) {
                Err(err) => {
                    warn!(url = %url, error = %err, "Skipping invalid URL");
                    Some(JobStatus::Failed(err))
                }
                Ok(job) if !outputs.insert(job.output_path.clone()) => {
                    warn!(url = %url, granule_id = %job.granule_id, "Skipping duplicate granule");
                    Some(JobStatus::Skipped(SkipReason::Duplicate))
                }
                Ok(job) if job.output_path.exists() => {
                    info!(
                        path = %job.output_path.display(),
                        "Output exists, skipping granule"
                    );
                    Some(JobStatus::Skipped(SkipReason::AlreadyComplete))
                }
                Ok(job) => {
                    pending.push((index, job));
                    None
                }
            };
            statuses.push(status);
        }
        (statuses, pending)
    }

    /// Fetch, reduce and write one granule.
    #[tracing::instrument(level = "DEBUG", skip(self, job), fields(granule_id = %job.granule_id))]
    async fn process(&self, job: &Job) -> JobStatus {
        let spec = self.spec.clone();
        let beams = self.beams.clone();
        let result = self
            .fetcher
            .fetch_and_apply(&job.url, move |granule: &dyn Granule| {
                reduce_granule(granule, &spec, &beams)
            })
            .await;
        let table = match result {
            Ok(Ok(table)) => table,
            Ok(Err(err)) => return self.failed(job, err.into()),
            Err(err) => return self.failed(job, err.into()),
        };

        let rows = table.num_rows();
        let path = job.output_path.clone();
        match tokio::task::spawn_blocking(move || write_table(&table, &path)).await {
            Ok(Ok(())) => {
                ROWS_WRITTEN.inc_by(rows as u64);
                info!(url = %job.url, rows, "Subset granule");
                JobStatus::Succeeded { rows }
            }
            Ok(Err(source)) => self.failed(
                job,
                JobError::Serialization {
                    path: job.output_path.clone(),
                    source,
                },
            ),
            Err(err) => {
                error!(url = %job.url, error = %err, "Output task failed");
                self.failed(job, JobError::Worker)
            }
        }
    }

    fn failed(&self, job: &Job, err: JobError) -> JobStatus {
        warn!(
            url = %job.url,
            kind = %err.kind(),
            caused_by = ?error_chain(&err),
            "Granule failed"
        );
        JobStatus::Failed(err)
    }
}
