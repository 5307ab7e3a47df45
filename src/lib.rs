//! This crate subsets large batches of remote lidar granules. Each granule is downloaded into
//! memory, reduced to a small table of the requested layers and written to disk, so that
//! thousands of multi-gigabyte granules can be processed without ever storing one.
//!
//! A reduction keeps every Nth shot of each beam, drops shots whose quality flags do not match,
//! and optionally drops shots outside a boundary region. The defaults target
//! [GEDI L2A](https://lpdaac.usgs.gov/products/gedi02_av002/) granules.
//!
//! Batches are resumable: a granule whose output table exists is never fetched again, and a
//! table only appears under its final name once it has been completely written.
//!
//! The crate is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [reqwest] performs HTTP downloads, including cookie-based authentication sessions.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used for layer
//!   columns, downsampling and selection.
//! * [geo] and [geojson] provide boundary regions and point-in-polygon tests.
//! * [Serde](serde) performs (de)serialisation of subset configurations and JSON granules.
//! * The optional `netcdf` feature reads HDF5 / netCDF-4 granules from memory with the
//!   netCDF-C library.

pub mod app;
pub mod cli;
pub mod error;
pub mod fetcher;
pub mod granule;
pub mod metrics;
pub mod models;
#[cfg(feature = "netcdf")]
pub mod netcdf_granule;
pub mod orchestrator;
pub mod output;
pub mod predicate;
pub mod reducer;
pub mod resource_manager;
pub mod table;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
