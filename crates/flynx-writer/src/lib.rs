//! Materialize a parsed structure into an HDF5/NeXus file.
//!
//! The writer runs in three stages over one output file:
//!
//! 1. [`FileWriter::create`] builds the group hierarchy and writes the
//!    static fields. Any failure here is fatal.
//! 2. [`FileWriter::write_preliminary`] records every before-scan data
//!    source. A failing source degrades to a sentinel dataset; it never
//!    aborts the save.
//! 3. [`FileWriter::write_final`] records the after-scan sources, the
//!    completion timestamp and the link aliases, then closes the file
//!    whether or not the pass succeeded.

mod writer;

use std::time::Duration;

use thiserror::Error;

pub use writer::FileWriter;

/// Dataset text stored when a data source has no live connection.
pub const NOT_CONNECTED_TEXT: &str = "not connected";

/// Dataset text stored when a connected source returned no value.
pub const NO_DATA_TEXT: &str = "no data";

#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Hdf5(#[from] hdf5::Error),
    #[error("text not storable in output file: {0}")]
    Text(#[from] hdf5::types::StringError),
    #[error("failed to write static field '{path}'")]
    StaticField {
        path: String,
        #[source]
        source: Box<WriterError>,
    },
    #[error("no materialized group at '{0}'")]
    MissingParent(String),
    #[error("output file already closed")]
    Closed,
}

/// How a pass reads its data sources.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    pub timeout: Duration,
    /// Force a fresh fetch instead of serving the last monitored value.
    pub fresh: bool,
}

impl ReadPolicy {
    /// Before-scan reads: fresh fetches, generous timeout, so stale
    /// monitor caches never leak into the file.
    pub fn preliminary() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            fresh: true,
        }
    }

    /// After-scan reads: monitored values are current by now.
    pub fn final_pass() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            fresh: false,
        }
    }
}
