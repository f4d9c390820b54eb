use std::fmt;
use std::io;
use std::path::PathBuf;

use polars::prelude::PolarsError;
use serde::Serialize;

/// Required columns of an uploaded reactivity table.
pub const PEP_ID_COL: &str = "pep_id";
pub const PEP_AA_COL: &str = "pep_aa";
pub const SAMPLE_ID_COL: &str = "sample_id";
pub const ABUNDANCE_COL: &str = "abundance";
pub const CONDITION_COL: &str = "Condition";

/// The two sample conditions being contrasted. Always supplied by the input
/// table, never derived from the statistic being computed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Case,
    Control,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Case => "Case",
            Condition::Control => "Control",
        }
    }
}

/// One local alignment between a query peptide and the reference protein,
/// on reference coordinates. `start <= end` is enforced at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentHit {
    pub pep_id: String,
    pub reference: String,
    pub start: i64,
    pub end: i64,
    pub pident: f64,
    pub length: i64,
    pub evalue: f64,
    pub bitscore: f64,
}

/// An alignment hit joined with its per-peptide differential reactivity.
/// Direct input to the sliding-window aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct HitDiff {
    pub pep_id: String,
    pub start: i64,
    pub end: i64,
    pub mean_rpk_difference: f64,
}

/// A named region of the reference polyprotein.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainAnnotation {
    pub label: String,
    pub start: i64,
    pub end: i64,
    pub sequence: String,
}

/// One window position of the antigen map. `window_end` is always
/// `window_start + win_size - 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowPoint {
    pub window_start: i64,
    pub window_end: i64,
    pub moving_sum: f64,
}

/// Error taxonomy of the pipeline. Empty results are values, never errors:
/// an upload with no reactive peptides yields empty tables downstream.
#[derive(Debug)]
pub enum PipelineError {
    /// Missing required columns or invalid window/step parameters.
    InputValidation(String),
    /// Alignment index or reference metadata missing on disk. Raised before
    /// any subprocess is spawned.
    ReferenceNotFound(PathBuf),
    /// External aligner failed: missing executable, non-zero exit, or
    /// unparseable output. Deterministic, so never retried.
    AlignmentTool(String),
    Polars(PolarsError),
    Io(io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InputValidation(msg) => write!(f, "invalid input: {}", msg),
            PipelineError::ReferenceNotFound(path) => {
                write!(f, "reference file not found: {}", path.display())
            }
            PipelineError::AlignmentTool(msg) => write!(f, "alignment tool error: {}", msg),
            PipelineError::Polars(e) => write!(f, "dataframe error: {}", e),
            PipelineError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Polars(e) => Some(e),
            PipelineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PolarsError> for PipelineError {
    fn from(e: PolarsError) -> Self {
        PipelineError::Polars(e)
    }
}

impl From<io::Error> for PipelineError {
    fn from(e: io::Error) -> Self {
        PipelineError::Io(e)
    }
}
