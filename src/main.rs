//! This file defines the granule-subset binary entry point.

use std::process::ExitCode;

use granule_subset::app;
use granule_subset::cli;
use granule_subset::error::log_error_chain;
use granule_subset::metrics;
use granule_subset::tracing;

/// Application entry point
///
/// Exits with a failure status if the batch could not be set up or any granule failed.
#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(err) = metrics::register_metrics() {
        log_error_chain(&err);
    }
    match app::run(&args).await {
        Ok(report) => {
            for line in app::report_lines(&report) {
                println!("{}", line);
            }
            if report.failed() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            log_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
