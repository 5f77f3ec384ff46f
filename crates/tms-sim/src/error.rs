//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Simulation engine error types."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
use std::path::PathBuf;

/// Result alias used throughout the simulation crate.
pub type Result<T> = std::result::Result<T, SimError>;

/// Error type for dataset playback and the simulation tick.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A measurement record did not match `id,"value"`.
    #[error("measurement record {line} in {} is malformed: {record:?}", .path.display())]
    DataFormat {
        path: PathBuf,
        line: usize,
        record: String,
    },
    /// A dataset resource could not be opened or read.
    #[error("unable to load dataset {}: {source}", .path.display())]
    ResourceLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A dataset produced no usable values.
    #[error("dataset {0} contains no values")]
    EmptyDataset(String),
    /// A dataset cannot be normalised against its maximum.
    #[error("dataset {name} has a non-positive maximum ({max})")]
    DegenerateDataset { name: String, max: f64 },
    /// IO failure while reading an already open stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// True for errors raised by a single malformed record.
    pub fn is_data_format(&self) -> bool {
        matches!(self, SimError::DataFormat { .. })
    }
}
