use std::collections::HashMap;

use polars::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::models::{PipelineError, SAMPLE_ID_COL};

pub const SPECIES_COL: &str = "taxon_species";

/// Dense species × sample matrix of mean RPK, the data behind the species
/// heatmap and stacked barplot. `values[i][j]` is species `i` in sample `j`;
/// absent combinations are 0.0. Serialises directly into the JSON shape the
/// rendering layer consumes.
#[derive(Debug, Clone, Serialize)]
pub struct SpeciesMatrix {
    pub species: Vec<String>,
    pub samples: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

/// Builds the matrix from an rpk table: mean RPK per (species, sample),
/// species limited to the `top_n` with the largest total RPK (descending),
/// samples in lexicographic order.
pub fn species_matrix(df: &DataFrame, top_n: usize) -> Result<SpeciesMatrix, PipelineError> {
    if top_n == 0 {
        return Err(PipelineError::InputValidation(
            "top_n must be a positive integer".into(),
        ));
    }
    if !df.get_column_names().iter().any(|c| c.as_str() == SPECIES_COL) {
        return Err(PipelineError::InputValidation(format!(
            "species summaries need a '{}' column",
            SPECIES_COL
        )));
    }

    let grouped = df
        .clone()
        .lazy()
        .group_by([col(SPECIES_COL), col(SAMPLE_ID_COL)])
        .agg([col("rpk").mean().alias("mean_rpk")])
        .collect()?;

    let species_col = grouped.column(SPECIES_COL)?.str()?;
    let sample_col = grouped.column(SAMPLE_ID_COL)?.str()?;
    let rpk_col = grouped.column("mean_rpk")?.f64()?;

    let mut cells: HashMap<(String, String), f64> = HashMap::new();
    let mut totals: HashMap<String, f64> = HashMap::new();
    let mut samples: Vec<String> = Vec::new();
    for i in 0..grouped.height() {
        let (sp, sm, v) = match (species_col.get(i), sample_col.get(i), rpk_col.get(i)) {
            (Some(sp), Some(sm), Some(v)) => (sp, sm, v),
            _ => continue,
        };
        cells.insert((sp.to_string(), sm.to_string()), v);
        *totals.entry(sp.to_string()).or_insert(0.0) += v;
        if !samples.iter().any(|s| s == sm) {
            samples.push(sm.to_string());
        }
    }
    samples.sort();

    let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_n);
    let species: Vec<String> = ranked.into_iter().map(|(sp, _)| sp).collect();

    let values: Vec<Vec<f64>> = species
        .iter()
        .map(|sp| {
            samples
                .iter()
                .map(|sm| {
                    cells
                        .get(&(sp.clone(), sm.clone()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    debug!(
        "species matrix: {} species x {} samples",
        species.len(),
        samples.len()
    );
    Ok(SpeciesMatrix {
        species,
        samples,
        values,
    })
}
