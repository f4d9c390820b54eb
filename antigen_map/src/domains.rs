use std::path::Path;

use polars::prelude::*;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::models::{DomainAnnotation, PipelineError};

/// Parent features in the UniProt chain export that span several mature
/// proteins. They would double-count reactivity on the overlay, so they are
/// dropped outright.
const PARENT_FEATURES: [&str; 8] = [
    "P1",
    "Genome polyprotein",
    "Capsid protein VP0",
    "P2",
    "P3",
    "Protein 3A",
    "Viral protein genome-linked",
    "Protein 3CD",
];

/// The closed vocabulary of enterovirus polyprotein domains, in match
/// precedence order. 3A and 3B are intermediates: when both survive parsing
/// they are collapsed into the composite 3AB, so the output vocabulary is
/// VP4 VP2 VP3 VP1 2A 2B 2C 3AB 3C 3D. Anything unmatched falls back to the
/// final cleavage product, 3D.
const DOMAIN_LABELS: [&str; 12] = [
    "VP4", "VP2", "VP3", "VP1", "2A", "2B", "2C", "3AB", "3A", "3B", "3C", "3D",
];
const FALLBACK_LABEL: &str = "3D";

/// Loads the domain annotation track from a UniProt-style feature export
/// (tab-separated, with `Chain` and `Sequence` columns). Output is ordered
/// by start coordinate with the 3A/3B pair merged into 3AB.
pub fn load_domains(metadata_path: &Path) -> Result<Vec<DomainAnnotation>, PipelineError> {
    if !metadata_path.exists() {
        return Err(PipelineError::ReferenceNotFound(metadata_path.to_path_buf()));
    }
    info!("loading reference domains from {}", metadata_path.display());

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(b'\t'))
        .try_into_reader_with_file_path(Some(metadata_path.to_path_buf()))?
        .finish()?;

    domains_from_frame(&df)
}

/// Parsing core, split out so tests can feed frames directly.
pub fn domains_from_frame(df: &DataFrame) -> Result<Vec<DomainAnnotation>, PipelineError> {
    let chains = df
        .column("Chain")
        .map_err(|_| PipelineError::InputValidation("metadata lacks a 'Chain' column".into()))?
        .str()?;
    let sequences = df
        .column("Sequence")
        .map_err(|_| PipelineError::InputValidation("metadata lacks a 'Sequence' column".into()))?
        .str()?;

    let re_range = Regex::new(r"(\d+)\.\.(\d+)").expect("static regex");
    let re_note = Regex::new(r#"/note="([^"]+)""#).expect("static regex");

    let mut domains: Vec<DomainAnnotation> = Vec::new();
    for i in 0..df.height() {
        let (chain_cell, sequence) = match (chains.get(i), sequences.get(i)) {
            (Some(c), Some(s)) => (c, s),
            _ => continue,
        };

        for fragment in chain_cell.split("; CHAIN") {
            let (start, end) = match re_range.captures(fragment) {
                Some(caps) => {
                    let start: i64 = caps[1].parse().unwrap_or(0);
                    let end: i64 = caps[2].parse().unwrap_or(0);
                    (start, end)
                }
                None => continue,
            };
            let note = match re_note.captures(fragment) {
                Some(caps) => caps[1].to_string(),
                None => continue,
            };
            if PARENT_FEATURES.contains(&note.as_str()) {
                debug!("dropping parent feature '{}'", note);
                continue;
            }

            // The reference export starts the first mature chain at 2 even
            // though the processed polyprotein coordinate system begins at 1.
            let start = if start == 2 { 1 } else { start };

            let label = match_domain_label(&note);
            let sequence = slice_reference(sequence, start, end);
            if sequence.is_empty() {
                warn!("chain '{}' has coordinates outside the sequence", note);
                continue;
            }

            domains.push(DomainAnnotation {
                label: label.to_string(),
                start,
                end,
                sequence,
            });
        }
    }

    domains.sort_by_key(|d| d.start);
    merge_3a_3b(&mut domains);

    debug!("loaded {} domains", domains.len());
    Ok(domains)
}

/// Earliest substring match against the domain vocabulary, list order
/// breaking ties at the same position (so "3AB" wins over "3C"/"3D" but a
/// note mentioning "VP2" before "2A" maps to VP2).
fn match_domain_label(note: &str) -> &'static str {
    for (pos, _) in note.char_indices() {
        for label in DOMAIN_LABELS {
            if note[pos..].starts_with(label) {
                return label;
            }
        }
    }
    FALLBACK_LABEL
}

/// 1-based inclusive slice of the reference sequence, clamped to its length.
fn slice_reference(sequence: &str, start: i64, end: i64) -> String {
    if start < 1 || end < start {
        return String::new();
    }
    let lo = (start - 1) as usize;
    let hi = (end as usize).min(sequence.len());
    if lo >= sequence.len() {
        return String::new();
    }
    sequence.get(lo..hi).unwrap_or_default().to_string()
}

/// The 3A and 3B chains are rendered as one functional unit, 3AB: combined
/// span, concatenated sequences, inserted where 3A stood. Applies only when
/// both halves are present.
fn merge_3a_3b(domains: &mut Vec<DomainAnnotation>) {
    let pos_a = domains.iter().position(|d| d.label == "3A");
    let pos_b = domains.iter().position(|d| d.label == "3B");
    let (pos_a, pos_b) = match (pos_a, pos_b) {
        (Some(a), Some(b)) => (a, b),
        _ => return,
    };

    let (first, second) = if pos_a < pos_b {
        (pos_a, pos_b)
    } else {
        (pos_b, pos_a)
    };
    let later = domains.remove(second);
    let earlier = domains.remove(first);

    let (a, b) = if earlier.label == "3A" {
        (earlier, later)
    } else {
        (later, earlier)
    };
    let merged = DomainAnnotation {
        label: "3AB".to_string(),
        start: a.start.min(b.start),
        end: a.end.max(b.end),
        sequence: format!("{}{}", a.sequence, b.sequence),
    };
    domains.insert(first, merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn seq(len: usize) -> String {
        // Deterministic fake polyprotein long enough for the coordinates
        // used in the tests.
        "ACDEFGHIKLMNPQRSTVWY".chars().cycle().take(len).collect()
    }

    #[test]
    fn merges_3a_and_3b_into_a_single_3ab_domain() {
        let s = seq(200);
        let chain = "CHAIN 100..110; /note=\"3A\"; CHAIN 111..130; /note=\"3B\"";
        let df = df![
            "Chain" => &[chain],
            "Sequence" => &[s.as_str()],
        ]
        .unwrap();
        let domains = domains_from_frame(&df).unwrap();
        assert_eq!(domains.len(), 1);
        let d = &domains[0];
        assert_eq!(d.label, "3AB");
        assert_eq!((d.start, d.end), (100, 130));
        let expected = format!("{}{}", &s[99..110], &s[110..130]);
        assert_eq!(d.sequence, expected);
        assert!(domains.iter().all(|d| d.label != "3A" && d.label != "3B"));
    }

    #[test]
    fn drops_parent_features_and_keeps_mature_chains() {
        let s = seq(400);
        let chain = "CHAIN 2..69; /note=\"Capsid protein VP4\"; \
                     CHAIN 70..330; /note=\"Capsid protein VP2\"; \
                     CHAIN 2..330; /note=\"P1\"";
        let df = df![
            "Chain" => &[chain],
            "Sequence" => &[s.as_str()],
        ]
        .unwrap();
        let domains = domains_from_frame(&df).unwrap();
        let labels: Vec<&str> = domains.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["VP4", "VP2"]);
    }

    #[test]
    fn start_two_is_normalised_to_one() {
        let s = seq(100);
        let df = df![
            "Chain" => &["CHAIN 2..69; /note=\"Capsid protein VP4\""],
            "Sequence" => &[s.as_str()],
        ]
        .unwrap();
        let domains = domains_from_frame(&df).unwrap();
        assert_eq!(domains[0].start, 1);
        assert_eq!(domains[0].sequence, &s[0..69]);
    }

    #[test]
    fn unknown_notes_fall_back_to_3d() {
        let s = seq(100);
        let df = df![
            "Chain" => &["CHAIN 10..50; /note=\"RNA-directed RNA polymerase\""],
            "Sequence" => &[s.as_str()],
        ]
        .unwrap();
        let domains = domains_from_frame(&df).unwrap();
        assert_eq!(domains[0].label, "3D");
    }

    #[test]
    fn output_is_ordered_by_start() {
        let s = seq(300);
        let chain = "CHAIN 150..200; /note=\"2C\"; CHAIN 10..100; /note=\"Capsid protein VP1\"";
        let df = df![
            "Chain" => &[chain],
            "Sequence" => &[s.as_str()],
        ]
        .unwrap();
        let domains = domains_from_frame(&df).unwrap();
        assert_eq!(domains[0].label, "VP1");
        assert_eq!(domains[1].label, "2C");
    }

    #[test]
    fn missing_metadata_file_is_reference_not_found() {
        let err = load_domains(Path::new("/nonexistent/metadata.tsv")).unwrap_err();
        assert!(matches!(err, PipelineError::ReferenceNotFound(_)));
    }
}
