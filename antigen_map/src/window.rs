use std::collections::BTreeSet;

use tracing::debug;

use crate::models::{HitDiff, PipelineError, WindowPoint};

pub const DEFAULT_WIN_SIZE: i64 = 32;
pub const DEFAULT_STEP_SIZE: i64 = 4;

/// The antigen-map signal: a containment moving sum of per-peptide
/// differential reactivity along reference coordinates.
///
/// Every hit spanning at least `win_size` residues proposes window start
/// positions `start, start+step, ..` up to `end - win_size + 1`. Each window
/// position is evaluated once (positions proposed by several hits are
/// deduplicated), and its value is the sum of `mean_rpk_difference` over
/// *all* hits that fully contain the window, so overlapping peptide
/// alignments stack additively. Hits shorter than a window propose no
/// positions and can never satisfy containment.
///
/// No qualifying hit is not an error: the result is simply empty.
pub fn moving_sum(
    rows: &[HitDiff],
    win_size: i64,
    step_size: i64,
) -> Result<Vec<WindowPoint>, PipelineError> {
    validate_window_params(win_size, step_size)?;

    let mut starts: BTreeSet<i64> = BTreeSet::new();
    for row in rows {
        if row.end - row.start + 1 >= win_size {
            let last = row.end - win_size + 1;
            let mut w = row.start;
            while w <= last {
                starts.insert(w);
                w += step_size;
            }
        }
    }

    let points: Vec<WindowPoint> = starts
        .into_iter()
        .map(|window_start| {
            let window_end = window_start + win_size - 1;
            let sum: f64 = rows
                .iter()
                .filter(|r| r.start <= window_start && r.end >= window_end)
                .map(|r| r.mean_rpk_difference)
                .sum();
            WindowPoint {
                window_start,
                window_end,
                moving_sum: sum,
            }
        })
        .collect();

    debug!(
        "moving sum over {} hits produced {} windows (win={}, step={})",
        rows.len(),
        points.len(),
        win_size,
        step_size
    );
    Ok(points)
}

pub fn validate_window_params(win_size: i64, step_size: i64) -> Result<(), PipelineError> {
    if win_size < 1 {
        return Err(PipelineError::InputValidation(format!(
            "win_size must be a positive integer, got {}",
            win_size
        )));
    }
    if step_size < 1 {
        return Err(PipelineError::InputValidation(format!(
            "step_size must be a positive integer, got {}",
            step_size
        )));
    }
    Ok(())
}
