//! # calratio-core
//!
//! Event selection, ABCD region classification and ntuple slimming for searches for pairs of
//! long-lived neutral particles decaying in the hadronic calorimeter (the "CalRatio" signature).
//!
//! The central piece is the [`Selector`](crate::selection::Selector), which walks one
//! [`EventRecord`](crate::data::EventRecord) through a fixed cutflow, tallies the stages it
//! passes into a [`CutflowCounters`](crate::selection::CutflowCounters) accumulator, and
//! produces a flat [`SlimRecord`](crate::slim::SlimRecord) for the downstream extrapolation and
//! limit-setting tools.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// YAML-backed configuration of every threshold used by the selection and the ABCD plane.
pub mod config;
/// Methods for loading [`EventRecord`](crate::data::EventRecord)s from ntuples.
pub mod data;
/// Lxy-binned analysis efficiencies and per-event extrapolation weights.
pub mod efficiency;
/// ABCD plane classification and per-region yields.
pub mod regions;
/// The selection cutflow.
pub mod selection;
/// Slimmed output records and their persistence.
pub mod slim;
/// Signal systematic uncertainty budgets.
pub mod systematics;
/// Utility functions for binning and histogramming.
pub mod utils;

pub use crate::config::AnalysisConfig;
pub use crate::data::{
    read_events, EventReadOptions, EventRecord, EventSample, Jet, LlpCandidate,
};
pub use crate::efficiency::{LxyBinning, LxyEfficiency, LxyEfficiency2D, MapCell, PlotPoint};
pub use crate::regions::{
    AbcdEstimate, AbcdPlane, Region, RegionClassifier, RegionFlags, RegionYields,
};
pub use crate::selection::{
    CutflowCounters, CutflowReport, SelectionConfig, SelectionOutcome, SelectionVariant,
    Selector, Stage,
};
pub use crate::slim::{read_slim, write_slim, SlimRecord, SlimWriteOptions};
pub use crate::systematics::{SystematicBudget, SystematicsOptions};

pub type CalRatioResult<T> = Result<T, CalRatioError>;

/// The error type used by all `calratio` internal methods
#[derive(Error, Debug)]
pub enum CalRatioError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An alias for [`serde_yaml::Error`].
    #[error("YAML Error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// An alias for [`serde_json::Error`].
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// A column (or ROOT branch) required to build a record is absent from the input.
    #[error("Required column \"{name}\" was not found")]
    MissingColumn {
        /// Name of the missing column
        name: String,
    },
    /// A column exists but holds a type which cannot be converted to the expected one.
    #[error("Column \"{name}\" has unsupported type {datatype}")]
    InvalidColumnType {
        /// Name of the offending column
        name: String,
        /// The type found in the file
        datatype: String,
    },
    /// Two columns which should describe the same events have different lengths.
    #[error("{context}: expected {expected} entries, found {actual}")]
    LengthMismatch {
        /// What was being read
        context: String,
        /// Expected number of entries
        expected: usize,
        /// Number of entries actually found
        actual: usize,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// No signal systematic uncertainties are tabulated for the requested mass point.
    #[error("No systematic uncertainties are known for mass point {mass} GeV")]
    UnknownMassPoint {
        /// The mass point which was requested
        mass: u32,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}
