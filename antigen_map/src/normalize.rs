use polars::prelude::*;
use tracing::debug;

use crate::models::{
    Condition, PipelineError, ABUNDANCE_COL, CONDITION_COL, PEP_ID_COL, SAMPLE_ID_COL,
};

/// Adds an `rpk` column: abundance normalised to reads-per-hundred-thousand
/// within each sample. Samples whose abundances sum to zero get `rpk = 0.0`
/// for every peptide rather than NaN.
pub fn compute_rpk(df: &DataFrame) -> Result<DataFrame, PipelineError> {
    let totals = df
        .clone()
        .lazy()
        .group_by([col(SAMPLE_ID_COL)])
        .agg([col(ABUNDANCE_COL)
            .cast(DataType::Float64)
            .sum()
            .alias("__sample_total")]);

    let out = df
        .clone()
        .lazy()
        .join(
            totals,
            [col(SAMPLE_ID_COL)],
            [col(SAMPLE_ID_COL)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col("__sample_total").gt(lit(0.0)))
                .then(
                    col(ABUNDANCE_COL).cast(DataType::Float64) / col("__sample_total")
                        * lit(100_000.0),
                )
                .otherwise(lit(0.0))
                .alias("rpk"),
        )
        .collect()?
        .drop("__sample_total")?;

    debug!("computed rpk for {} rows", out.height());
    Ok(out)
}

/// Collapses an rpk table into one row per peptide with the condition means
/// and their difference:
///
///   pep_id | mean_rpk_case | mean_rpk_control | mean_rpk_difference
///
/// A condition absent for a peptide contributes 0.0; peptides where both
/// means are exactly zero are dropped.
pub fn mean_rpk_difference(df: &DataFrame) -> Result<DataFrame, PipelineError> {
    let per_condition = df
        .clone()
        .lazy()
        .group_by([col(CONDITION_COL), col(PEP_ID_COL)])
        .agg([col("rpk").mean().alias("mean_rpk")]);

    let case = per_condition
        .clone()
        .filter(col(CONDITION_COL).eq(lit(Condition::Case.as_str())))
        .select([col(PEP_ID_COL), col("mean_rpk").alias("mean_rpk_case")]);
    let control = per_condition
        .filter(col(CONDITION_COL).eq(lit(Condition::Control.as_str())))
        .select([col(PEP_ID_COL), col("mean_rpk").alias("mean_rpk_control")]);

    let stats = case
        .join(
            control,
            [col(PEP_ID_COL)],
            [col(PEP_ID_COL)],
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .with_columns([
            col("mean_rpk_case").fill_null(lit(0.0)),
            col("mean_rpk_control").fill_null(lit(0.0)),
        ])
        .filter(
            col("mean_rpk_case")
                .neq(lit(0.0))
                .or(col("mean_rpk_control").neq(lit(0.0))),
        )
        .with_column(
            (col("mean_rpk_case") - col("mean_rpk_control")).alias("mean_rpk_difference"),
        )
        .sort([PEP_ID_COL], SortMultipleOptions::default())
        .collect()?;

    debug!("{} peptides carry a non-zero condition mean", stats.height());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn rpk_values(df: &DataFrame) -> Vec<f64> {
        df.column("rpk")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn rpk_sums_to_1e5_per_sample() {
        let df = df![
            "pep_id" => &["p1", "p2", "p3", "p1", "p2"],
            "sample_id" => &["s1", "s1", "s1", "s2", "s2"],
            "abundance" => &[10.0, 30.0, 60.0, 5.0, 5.0],
        ]
        .unwrap();
        let out = compute_rpk(&df).unwrap();
        let samples: Vec<&str> = out
            .column("sample_id")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let rpk = rpk_values(&out);
        let mut sums = std::collections::HashMap::new();
        for (sample, value) in samples.iter().zip(rpk.iter()) {
            *sums.entry(*sample).or_insert(0.0) += value;
        }
        assert!((sums["s1"] - 1e5).abs() < 1e-6);
        assert!((sums["s2"] - 1e5).abs() < 1e-6);
    }

    #[test]
    fn rpk_is_scale_invariant_within_a_sample() {
        let df = df![
            "pep_id" => &["p1", "p2", "p3"],
            "sample_id" => &["s1", "s1", "s1"],
            "abundance" => &[2.0, 3.0, 5.0],
        ]
        .unwrap();
        let scaled = df![
            "pep_id" => &["p1", "p2", "p3"],
            "sample_id" => &["s1", "s1", "s1"],
            "abundance" => &[200.0, 300.0, 500.0],
        ]
        .unwrap();
        let by_pep = |df: &DataFrame| -> std::collections::HashMap<String, f64> {
            let ids: Vec<&str> = df
                .column("pep_id")
                .unwrap()
                .str()
                .unwrap()
                .into_no_null_iter()
                .collect();
            ids.iter()
                .map(|s| s.to_string())
                .zip(rpk_values(df))
                .collect()
        };
        let a = by_pep(&compute_rpk(&df).unwrap());
        let b = by_pep(&compute_rpk(&scaled).unwrap());
        for (pep, x) in &a {
            assert!((x - b[pep]).abs() < 1e-9);
        }
    }

    #[test]
    fn all_zero_sample_yields_zero_rpk_not_nan() {
        let df = df![
            "pep_id" => &["p1", "p2"],
            "sample_id" => &["s1", "s1"],
            "abundance" => &[0.0, 0.0],
        ]
        .unwrap();
        let rpk = rpk_values(&compute_rpk(&df).unwrap());
        assert_eq!(rpk, vec![0.0, 0.0]);
    }

    #[test]
    fn differential_pivots_conditions_and_defaults_missing_side_to_zero() {
        let df = df![
            "pep_id" => &["p1", "p1", "p2"],
            "sample_id" => &["s1", "s2", "s1"],
            "abundance" => &[10.0, 10.0, 90.0],
            "Condition" => &["Case", "Control", "Case"],
        ]
        .unwrap();
        let rpk = compute_rpk(&df).unwrap();
        let stats = mean_rpk_difference(&rpk).unwrap();

        // p2 is Case-only: control mean defaults to 0.0.
        let ids: Vec<&str> = stats
            .column("pep_id")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let idx = ids.iter().position(|id| *id == "p2").unwrap();
        let ctrl = stats
            .column("mean_rpk_control")
            .unwrap()
            .f64()
            .unwrap()
            .get(idx)
            .unwrap();
        let diff = stats
            .column("mean_rpk_difference")
            .unwrap()
            .f64()
            .unwrap()
            .get(idx)
            .unwrap();
        assert_eq!(ctrl, 0.0);
        assert!(diff > 0.0);
    }

    #[test]
    fn differential_drops_peptides_with_both_means_zero() {
        // s1 is an all-zero sample, so every rpk in it is 0; p3 only occurs
        // there and must vanish from the stats.
        let df = df![
            "pep_id" => &["p3", "p1", "p1"],
            "sample_id" => &["s1", "s2", "s3"],
            "abundance" => &[0.0, 10.0, 20.0],
            "Condition" => &["Case", "Case", "Control"],
        ]
        .unwrap();
        let rpk = compute_rpk(&df).unwrap();
        let stats = mean_rpk_difference(&rpk).unwrap();
        let ids: Vec<&str> = stats
            .column("pep_id")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert!(ids.contains(&"p1"));
        assert!(!ids.contains(&"p3"));
    }
}
