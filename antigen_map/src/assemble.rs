use polars::prelude::*;
use tracing::debug;

use crate::models::{AlignmentHit, HitDiff, PipelineError, PEP_ID_COL};

/// Joins aligner hits onto the per-peptide differential stats. Hits are
/// authoritative: peptides without a hit are dropped by construction, and
/// hits whose peptide carries no differential (null after the left join)
/// are dropped too. Coordinates pass through the ascending-order
/// normalisation once more so downstream code can rely on start <= end
/// whatever the hit source was.
pub fn assemble_hits(
    hits: &[AlignmentHit],
    diff_stats: &DataFrame,
) -> Result<Vec<HitDiff>, PipelineError> {
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = hits.iter().map(|h| h.pep_id.clone()).collect();
    let starts: Vec<i64> = hits.iter().map(|h| h.start).collect();
    let ends: Vec<i64> = hits.iter().map(|h| h.end).collect();

    let hits_df = DataFrame::new(vec![
        Column::from(Series::new(PEP_ID_COL.into(), ids)),
        Column::from(Series::new("start".into(), starts)),
        Column::from(Series::new("end".into(), ends)),
    ])?;

    let joined = hits_df
        .lazy()
        .join(
            diff_stats.clone().lazy().select([
                col(PEP_ID_COL),
                col("mean_rpk_difference"),
            ]),
            [col(PEP_ID_COL)],
            [col(PEP_ID_COL)],
            JoinArgs::new(JoinType::Left),
        )
        .filter(col("mean_rpk_difference").is_not_null())
        .with_columns([
            when(col("start").lt_eq(col("end")))
                .then(col("start"))
                .otherwise(col("end"))
                .alias("start"),
            when(col("start").lt_eq(col("end")))
                .then(col("end"))
                .otherwise(col("start"))
                .alias("end"),
        ])
        .collect()?;

    let id_col = joined.column(PEP_ID_COL)?.str()?;
    let start_col = joined.column("start")?.i64()?;
    let end_col = joined.column("end")?.i64()?;
    let diff_col = joined.column("mean_rpk_difference")?.f64()?;

    let mut rows = Vec::with_capacity(joined.height());
    for i in 0..joined.height() {
        let (id, start, end, diff) = match (
            id_col.get(i),
            start_col.get(i),
            end_col.get(i),
            diff_col.get(i),
        ) {
            (Some(id), Some(s), Some(e), Some(d)) => (id, s, e, d),
            _ => continue,
        };
        rows.push(HitDiff {
            pep_id: id.to_string(),
            start,
            end,
            mean_rpk_difference: diff,
        });
    }

    debug!(
        "{} of {} hits carry reactivity data after the join",
        rows.len(),
        hits.len()
    );
    Ok(rows)
}
