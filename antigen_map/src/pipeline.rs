use std::path::PathBuf;

use polars::df;
use polars::prelude::*;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::aligner::{parse_hits, Aligner, AlignerKind, BlastpAligner, DiamondAligner};
use crate::assemble::assemble_hits;
use crate::cache::ArtifactCache;
use crate::domains::load_domains;
use crate::models::{
    Condition, DomainAnnotation, PipelineError, WindowPoint, ABUNDANCE_COL, CONDITION_COL,
    PEP_AA_COL, PEP_ID_COL, SAMPLE_ID_COL,
};
use crate::normalize::{compute_rpk, mean_rpk_difference};
use crate::window::{moving_sum, validate_window_params};

const REQUIRED_COLUMNS: [&str; 5] = [
    PEP_ID_COL,
    PEP_AA_COL,
    SAMPLE_ID_COL,
    ABUNDANCE_COL,
    CONDITION_COL,
];

/// Explicit pipeline configuration. Reference locations are always passed in
/// by the caller; nothing is looked up relative to an install directory.
#[derive(Debug, Clone)]
pub struct AntigenMapConfig {
    /// Alignment index: a `.dmnd` file for DIAMOND, a db prefix for blastp.
    pub reference_db: PathBuf,
    /// UniProt-style feature export describing the reference polyprotein.
    pub reference_metadata: PathBuf,
    /// Root directory for per-upload alignment artifacts.
    pub cache_dir: PathBuf,
    pub aligner: AlignerKind,
}

/// The antigen-map output pair handed to rendering/serialisation: the
/// windowed signal and the domain overlay track.
#[derive(Debug, Clone, Serialize)]
pub struct AntigenMapResult {
    pub signal: Vec<WindowPoint>,
    pub domains: Vec<DomainAnnotation>,
}

impl AntigenMapResult {
    fn empty() -> Self {
        AntigenMapResult {
            signal: Vec::new(),
            domains: Vec::new(),
        }
    }

    /// Signal as a frame, one row per window position.
    pub fn signal_frame(&self) -> PolarsResult<DataFrame> {
        df![
            "window_start" => self.signal.iter().map(|p| p.window_start).collect::<Vec<_>>(),
            "window_end" => self.signal.iter().map(|p| p.window_end).collect::<Vec<_>>(),
            "moving_sum" => self.signal.iter().map(|p| p.moving_sum).collect::<Vec<_>>(),
        ]
    }

    /// Domain overlay as a frame, ordered by start.
    pub fn domains_frame(&self) -> PolarsResult<DataFrame> {
        df![
            "start" => self.domains.iter().map(|d| d.start).collect::<Vec<_>>(),
            "end" => self.domains.iter().map(|d| d.end).collect::<Vec<_>>(),
            "label" => self.domains.iter().map(|d| d.label.clone()).collect::<Vec<_>>(),
        ]
    }

    /// The JSON shape the web layer serves: equal-length coordinate/value
    /// arrays plus a record list for the overlay.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "window_start": self.signal.iter().map(|p| p.window_start).collect::<Vec<_>>(),
            "window_end": self.signal.iter().map(|p| p.window_end).collect::<Vec<_>>(),
            "moving_sum": self.signal.iter().map(|p| p.moving_sum).collect::<Vec<_>>(),
            "domains": self.domains.iter().map(|d| json!({
                "start": d.start,
                "end": d.end,
                "label": d.label,
            })).collect::<Vec<_>>(),
        })
    }
}

/// The antigen-map pipeline: normalise → align (cached) → assemble →
/// window → annotate. One synchronous run per request; the only shared
/// state is the artifact cache.
pub struct AntigenMap {
    config: AntigenMapConfig,
    cache: ArtifactCache,
}

impl AntigenMap {
    pub fn new(config: AntigenMapConfig) -> Self {
        let cache = ArtifactCache::new(&config.cache_dir);
        AntigenMap { config, cache }
    }

    /// Runs the full pipeline with the configured aligner strategy.
    pub fn prepare(
        &self,
        upload_id: &str,
        table: &DataFrame,
        win_size: i64,
        step_size: i64,
    ) -> Result<AntigenMapResult, PipelineError> {
        let aligner = self.make_aligner();
        self.prepare_with_aligner(upload_id, table, win_size, step_size, aligner.as_ref())
    }

    /// Same pipeline with a caller-supplied aligner. This is the seam the
    /// integration tests drive with a scripted tool.
    pub fn prepare_with_aligner(
        &self,
        upload_id: &str,
        table: &DataFrame,
        win_size: i64,
        step_size: i64,
        aligner: &dyn Aligner,
    ) -> Result<AntigenMapResult, PipelineError> {
        validate_window_params(win_size, step_size)?;
        validate_table(table)?;

        // Fail fast on both reference files before any work happens.
        aligner.check_reference()?;
        if !self.config.reference_metadata.exists() {
            return Err(PipelineError::ReferenceNotFound(
                self.config.reference_metadata.clone(),
            ));
        }

        info!(
            "antigen map for upload {} ({} rows, win={}, step={})",
            upload_id,
            table.height(),
            win_size,
            step_size
        );

        let rpk = compute_rpk(table)?;
        let stats = mean_rpk_difference(&rpk)?;
        if stats.height() == 0 {
            warn!("upload {} has no reactive peptides", upload_id);
            return Ok(AntigenMapResult::empty());
        }

        let peptides = peptide_pairs(table)?;
        let hits_path = self.cache.get_or_align(upload_id, &peptides, aligner)?;
        let hits = parse_hits(&hits_path)?;
        let rows = assemble_hits(&hits, &stats)?;
        let signal = moving_sum(&rows, win_size, step_size)?;
        let domains = load_domains(&self.config.reference_metadata)?;

        info!(
            "upload {}: {} hits, {} windows, {} domains",
            upload_id,
            hits.len(),
            signal.len(),
            domains.len()
        );
        Ok(AntigenMapResult { signal, domains })
    }

    fn make_aligner(&self) -> Box<dyn Aligner> {
        match self.config.aligner {
            AlignerKind::Diamond => Box::new(DiamondAligner {
                db_path: self.config.reference_db.clone(),
            }),
            AlignerKind::Blastp => Box::new(BlastpAligner {
                db_prefix: self.config.reference_db.clone(),
            }),
        }
    }
}

/// Checks the upload carries every required column and that `Condition`
/// stays within the Case/Control vocabulary.
pub fn validate_table(df: &DataFrame) -> Result<(), PipelineError> {
    let names = df.get_column_names();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !names.iter().any(|c| c.as_str() == **required))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::InputValidation(format!(
            "upload table is missing required columns: {}",
            missing.join(", ")
        )));
    }

    let conditions = df.column(CONDITION_COL)?.str()?;
    for i in 0..conditions.len() {
        if let Some(value) = conditions.get(i) {
            if value != Condition::Case.as_str() && value != Condition::Control.as_str() {
                return Err(PipelineError::InputValidation(format!(
                    "Condition value '{}' is not one of Case/Control",
                    value
                )));
            }
        }
    }
    Ok(())
}

fn peptide_pairs(df: &DataFrame) -> Result<Vec<(String, String)>, PipelineError> {
    let ids = df.column(PEP_ID_COL)?.str()?;
    let seqs = df.column(PEP_AA_COL)?.str()?;
    let mut pairs = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        if let (Some(id), Some(seq)) = (ids.get(i), seqs.get(i)) {
            pairs.push((id.to_string(), seq.to_string()));
        }
    }
    Ok(pairs)
}
