use std::collections::HashMap;
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fnv::FnvHasher;
use tracing::{debug, info};

use crate::aligner::{write_query_fasta, Aligner};
use crate::models::PipelineError;

const HITS_FILE: &str = "hits.tsv";
const FASTA_FILE: &str = "query.fasta";
const FINGERPRINT_FILE: &str = "peptides.fingerprint";

/// Per-upload alignment artifacts on disk. Alignment output is reused across
/// requests for the same upload because it is independent of the window
/// parameters; the windowed aggregation itself is always recomputed.
///
/// Entries are keyed by upload id, but each directory carries a fingerprint
/// of the peptide set that produced it: if the upload content changed since
/// the artifacts were built, the fingerprint mismatches and the alignment is
/// rebuilt in place instead of served stale. A per-key mutex keeps
/// concurrent requests for the same upload from racing to build the same
/// artifact.
pub struct ArtifactCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactCache {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the path of a hit table for this upload, aligning only when
    /// no fresh artifact exists.
    pub fn get_or_align(
        &self,
        upload_id: &str,
        peptides: &[(String, String)],
        aligner: &dyn Aligner,
    ) -> Result<PathBuf, PipelineError> {
        let key_lock = self.lock_for(upload_id);
        let _guard = key_lock.lock().unwrap_or_else(|e| e.into_inner());

        let dir = self.root.join(upload_id);
        fs::create_dir_all(&dir)?;

        let hits_path = dir.join(HITS_FILE);
        let fingerprint = peptide_fingerprint(peptides);

        if hits_path.exists() && stored_fingerprint(&dir).as_deref() == Some(&fingerprint) {
            info!("reusing cached alignment for upload {}", upload_id);
            return Ok(hits_path);
        }

        debug!("building alignment artifacts for upload {}", upload_id);
        let fasta_path = dir.join(FASTA_FILE);
        write_query_fasta(peptides, &fasta_path)?;

        // Align into a scratch file first so an aborted run never leaves a
        // half-written hit table behind a valid fingerprint.
        let scratch = tempfile::NamedTempFile::new_in(&dir)?;
        aligner.align(&fasta_path, scratch.path())?;
        scratch
            .persist(&hits_path)
            .map_err(|e| PipelineError::Io(e.error))?;
        fs::write(dir.join(FINGERPRINT_FILE), &fingerprint)?;

        Ok(hits_path)
    }

    fn lock_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn stored_fingerprint(dir: &Path) -> Option<String> {
    fs::read_to_string(dir.join(FINGERPRINT_FILE)).ok()
}

/// Order-independent fingerprint of the unique (id, sequence) pairs.
fn peptide_fingerprint(peptides: &[(String, String)]) -> String {
    let mut pairs: Vec<&(String, String)> = peptides.iter().collect();
    pairs.sort();
    pairs.dedup();

    let mut hasher = FnvHasher::default();
    for (id, seq) in pairs {
        hasher.write(id.as_bytes());
        hasher.write(&[0]);
        hasher.write(seq.as_bytes());
        hasher.write(&[0xff]);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAligner {
        calls: AtomicUsize,
    }

    impl Aligner for CountingAligner {
        fn check_reference(&self) -> Result<(), PipelineError> {
            Ok(())
        }

        fn align(&self, _query_fasta: &Path, out_tsv: &Path) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut f = fs::File::create(out_tsv)?;
            writeln!(f, "p1\tCVB1\t100.0\t20\t0\t0\t1\t20\t30\t11\t1e-9\t44.0")?;
            Ok(())
        }
    }

    fn peptides() -> Vec<(String, String)> {
        vec![
            ("p1".to_string(), "MKTAYIAK".to_string()),
            ("p2".to_string(), "QRSTVWYA".to_string()),
        ]
    }

    #[test]
    fn second_request_for_same_upload_reuses_the_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let aligner = CountingAligner {
            calls: AtomicUsize::new(0),
        };

        let first = cache.get_or_align("u1", &peptides(), &aligner).unwrap();
        let second = cache.get_or_align("u1", &peptides(), &aligner).unwrap();
        assert_eq!(first, second);
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_peptide_set_invalidates_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let aligner = CountingAligner {
            calls: AtomicUsize::new(0),
        };

        cache.get_or_align("u1", &peptides(), &aligner).unwrap();
        let mut changed = peptides();
        changed.push(("p3".to_string(), "LLNPQRSA".to_string()));
        cache.get_or_align("u1", &changed, &aligner).unwrap();
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprint_ignores_row_order_and_duplicates() {
        let a = peptide_fingerprint(&[
            ("p1".into(), "AAA".into()),
            ("p2".into(), "CCC".into()),
            ("p1".into(), "AAA".into()),
        ]);
        let b = peptide_fingerprint(&[("p2".into(), "CCC".into()), ("p1".into(), "AAA".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_uploads_get_separate_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let aligner = CountingAligner {
            calls: AtomicUsize::new(0),
        };
        let a = cache.get_or_align("u1", &peptides(), &aligner).unwrap();
        let b = cache.get_or_align("u2", &peptides(), &aligner).unwrap();
        assert_ne!(a, b);
        assert_eq!(aligner.calls.load(Ordering::SeqCst), 2);
    }
}
