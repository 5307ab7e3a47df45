//! Atomic, no-clobber table output.
//!
//! A table is written to a hidden temporary file in the destination directory, synced, then
//! linked into place. A reader never observes a partial file under the final name, and an
//! interrupted write leaves at most a temporary file behind.

use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;
use tracing::debug;

use crate::error::OutputError;
use crate::table::ResultTable;

/// File extension of output tables.
pub const OUTPUT_EXTENSION: &str = "csv";

/// Suffix of temporary files holding tables being written.
const TEMP_SUFFIX: &str = ".tmp";

/// Write a table as CSV with a header row, refusing to overwrite an existing file.
///
/// An empty table produces a file containing only the header.
///
/// # Arguments
///
/// * `table`: Table to write
/// * `path`: Final path of the output file
pub fn write_table(table: &ResultTable, path: &Path) -> Result<(), OutputError> {
    if path.exists() {
        return Err(OutputError::AlreadyExists(path.to_path_buf()));
    }
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = Builder::new()
        .prefix(&format!(".{}.", stem))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;

    {
        let mut writer = csv::Writer::from_writer(temp.as_file_mut());
        writer.write_record(table.names())?;
        for index in 0..table.num_rows() {
            writer.write_record(table.row(index).map(|value| value.to_string()))?;
        }
        writer.flush()?;
    }
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;

    // Dropping the error drops its temporary file too.
    temp.persist_noclobber(path).map_err(|err| {
        if err.error.kind() == io::ErrorKind::AlreadyExists {
            OutputError::AlreadyExists(path.to_path_buf())
        } else {
            OutputError::Io(err.error)
        }
    })?;
    debug!(path = %path.display(), rows = table.num_rows(), "Wrote table");
    Ok(())
}

/// Remove temporary files left in an output directory by interrupted writes.
///
/// Must not run while another writer is using the directory. Returns the number of files
/// removed.
pub fn remove_stale_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with('.') && name.ends_with(TEMP_SUFFIX)) || !entry.file_type()?.is_file()
        {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        debug!(path = %entry.path().display(), "Removed stale temporary file");
        removed += 1;
    }
    Ok(removed)
}
