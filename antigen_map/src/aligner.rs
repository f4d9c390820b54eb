use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error, info};

use crate::models::{AlignmentHit, PipelineError};

/// Tabular column order requested from both tools (BLAST outfmt 6 fields).
const OUTFMT_FIELDS: [&str; 12] = [
    "qseqid", "sseqid", "pident", "length", "mismatch", "gapopen", "qstart", "qend", "sstart",
    "send", "evalue", "bitscore",
];

/// Boundary to the external protein aligner. One batch invocation: a query
/// FASTA in, a tab-separated hit table out. Strategies are selected by
/// configuration, never hardcoded into the pipeline.
pub trait Aligner {
    /// Verifies the reference database files exist. Called before any
    /// subprocess is spawned so a bad path fails fast.
    fn check_reference(&self) -> Result<(), PipelineError>;

    /// Runs the tool, writing hits for `query_fasta` to `out_tsv`.
    fn align(&self, query_fasta: &Path, out_tsv: &Path) -> Result<(), PipelineError>;
}

/// Which aligner backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignerKind {
    Diamond,
    Blastp,
}

impl AlignerKind {
    pub fn from_name(name: &str) -> Result<Self, PipelineError> {
        match name {
            "diamond" => Ok(AlignerKind::Diamond),
            "blastp" => Ok(AlignerKind::Blastp),
            other => Err(PipelineError::InputValidation(format!(
                "unknown aligner '{}', expected 'diamond' or 'blastp'",
                other
            ))),
        }
    }
}

/// DIAMOND `blastp` against a prebuilt `.dmnd` index, tool defaults.
pub struct DiamondAligner {
    pub db_path: PathBuf,
}

impl Aligner for DiamondAligner {
    fn check_reference(&self) -> Result<(), PipelineError> {
        if !self.db_path.exists() {
            return Err(PipelineError::ReferenceNotFound(self.db_path.clone()));
        }
        Ok(())
    }

    fn align(&self, query_fasta: &Path, out_tsv: &Path) -> Result<(), PipelineError> {
        self.check_reference()?;
        let exe = resolve_executable("diamond")?;

        let mut cmd = Command::new(exe);
        cmd.arg("blastp")
            .arg("--query")
            .arg(query_fasta)
            .arg("--db")
            .arg(&self.db_path)
            .arg("--out")
            .arg(out_tsv)
            .arg("--outfmt")
            .arg("6");
        for field in OUTFMT_FIELDS {
            cmd.arg(field);
        }
        run_aligner_command(cmd, "diamond")
    }
}

/// NCBI `blastp` with parameters tuned for short peptide queries against a
/// larger reference: `-task blastp-short`, e-value 0.01, word size 2.
pub struct BlastpAligner {
    /// BLAST database prefix; `.pin/.psq/.phr` must sit next to it.
    pub db_prefix: PathBuf,
}

impl Aligner for BlastpAligner {
    fn check_reference(&self) -> Result<(), PipelineError> {
        for ext in ["pin", "psq", "phr"] {
            let part = self.db_prefix.with_extension(ext);
            if !part.exists() {
                return Err(PipelineError::ReferenceNotFound(part));
            }
        }
        Ok(())
    }

    fn align(&self, query_fasta: &Path, out_tsv: &Path) -> Result<(), PipelineError> {
        self.check_reference()?;
        let exe = resolve_executable("blastp")?;

        let outfmt = format!("6 {}", OUTFMT_FIELDS.join(" "));
        let mut cmd = Command::new(exe);
        cmd.arg("-task")
            .arg("blastp-short")
            .arg("-evalue")
            .arg("0.01")
            .arg("-word_size")
            .arg("2")
            .arg("-query")
            .arg(query_fasta)
            .arg("-db")
            .arg(&self.db_prefix)
            .arg("-out")
            .arg(out_tsv)
            .arg("-outfmt")
            .arg(outfmt);
        run_aligner_command(cmd, "blastp")
    }
}

fn resolve_executable(name: &str) -> Result<PathBuf, PipelineError> {
    which::which(name).map_err(|_| {
        PipelineError::AlignmentTool(format!("'{}' executable not found on PATH", name))
    })
}

fn run_aligner_command(mut cmd: Command, tool: &str) -> Result<(), PipelineError> {
    debug!("spawning {}: {:?}", tool, cmd);
    let output = cmd
        .output()
        .map_err(|e| PipelineError::AlignmentTool(format!("failed to spawn {}: {}", tool, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("{} failed: {}", tool, stderr);
        return Err(PipelineError::AlignmentTool(format!(
            "{} exited with status {}: {}",
            tool,
            output.status,
            stderr.trim()
        )));
    }
    info!("{} alignment completed", tool);
    Ok(())
}

/// Writes the query FASTA, one record per unique peptide id. Later rows with
/// an already-seen id are skipped, matching the upload's many-rows-per-
/// peptide layout.
pub fn write_query_fasta(
    peptides: &[(String, String)],
    path: &Path,
) -> Result<usize, PipelineError> {
    let mut file = File::create(path)?;
    let mut seen = std::collections::HashSet::new();
    let mut written = 0usize;
    for (id, sequence) in peptides {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if sequence.is_empty() {
            return Err(PipelineError::InputValidation(format!(
                "peptide '{}' has an empty sequence",
                id
            )));
        }
        writeln!(file, ">{}", id)?;
        writeln!(file, "{}", sequence)?;
        written += 1;
    }
    debug!("wrote {} unique peptides to {}", written, path.display());
    Ok(written)
}

/// Parses the tool's tabular output into typed hits. Subject coordinates
/// become (start, end); reverse-oriented hits report them descending, so
/// they are swapped into ascending order here.
pub fn parse_hits(tsv_path: &Path) -> Result<Vec<AlignmentHit>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(tsv_path)
        .map_err(|e| PipelineError::AlignmentTool(format!("cannot read hit table: {}", e)))?;

    let mut hits = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| PipelineError::AlignmentTool(format!("bad hit row {}: {}", line, e)))?;
        if record.len() < 12 {
            return Err(PipelineError::AlignmentTool(format!(
                "hit row {} has {} columns, expected 12",
                line,
                record.len()
            )));
        }

        let sstart = parse_field::<i64>(&record, 8, line)?;
        let send = parse_field::<i64>(&record, 9, line)?;
        hits.push(AlignmentHit {
            pep_id: record[0].to_string(),
            reference: record[1].to_string(),
            start: sstart.min(send),
            end: sstart.max(send),
            pident: parse_field(&record, 2, line)?,
            length: parse_field(&record, 3, line)?,
            evalue: parse_field(&record, 10, line)?,
            bitscore: parse_field(&record, 11, line)?,
        });
    }
    debug!("parsed {} alignment hits", hits.len());
    Ok(hits)
}

fn parse_field<T: std::str::FromStr>(
    record: &csv::StringRecord,
    idx: usize,
    line: usize,
) -> Result<T, PipelineError> {
    record[idx].parse::<T>().map_err(|_| {
        PipelineError::AlignmentTool(format!(
            "hit row {}: cannot parse column {} value '{}'",
            line, idx, &record[idx]
        ))
    })
}
