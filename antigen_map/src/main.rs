use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{value_parser, Arg, Command, ValueHint};
use polars::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use antigen_map::pipeline::{AntigenMap, AntigenMapConfig};
use antigen_map::species::species_matrix;
use antigen_map::AlignerKind;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("antigen_map")
        .version(clap::crate_version!())
        .about("PhIP-seq antigen map: RPK differential reactivity windowed onto a reference polyprotein")
        .arg(
            Arg::new("table")
                .required(true)
                .help("Uploaded reactivity table (pep_id, pep_aa, sample_id, abundance, Condition)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("reference-db")
                .long("reference-db")
                .required(true)
                .help("Alignment index: .dmnd file for diamond, db prefix for blastp")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("reference-metadata")
                .long("reference-metadata")
                .required(true)
                .help("UniProt-style feature export (TSV) for the reference polyprotein")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("upload-id")
                .long("upload-id")
                .help("Cache key for this upload (default: table file stem)"),
        )
        .arg(
            Arg::new("aligner")
                .long("aligner")
                .default_value("diamond")
                .help("Alignment strategy: diamond or blastp"),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .default_value("./cache")
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .default_value(".")
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("win-size")
                .long("win-size")
                .default_value("32")
                .value_parser(value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("step-size")
                .long("step-size")
                .default_value("4")
                .value_parser(value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("tab")
                .long("tab")
                .action(clap::ArgAction::SetTrue)
                .help("Input table is tab-separated instead of comma-separated"),
        )
        .arg(
            Arg::new("species-top-n")
                .long("species-top-n")
                .value_parser(value_parser!(usize))
                .help("Also write the top-N species RPK matrix (needs a taxon_species column)"),
        )
        .get_matches();

    let table_path = PathBuf::from(matches.get_one::<String>("table").expect("required"));
    let upload_id = matches
        .get_one::<String>("upload-id")
        .cloned()
        .unwrap_or_else(|| {
            table_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string())
        });
    let output_dir = PathBuf::from(matches.get_one::<String>("output-dir").expect("default"));
    let win_size = *matches.get_one::<i64>("win-size").expect("default");
    let step_size = *matches.get_one::<i64>("step-size").expect("default");
    let separator = if matches.get_flag("tab") { b'\t' } else { b',' };

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(table_path.clone()))
        .with_context(|| format!("opening {}", table_path.display()))?
        .finish()
        .with_context(|| format!("parsing {}", table_path.display()))?;
    info!("loaded {} rows from {}", df.height(), table_path.display());

    let config = AntigenMapConfig {
        reference_db: PathBuf::from(
            matches.get_one::<String>("reference-db").expect("required"),
        ),
        reference_metadata: PathBuf::from(
            matches
                .get_one::<String>("reference-metadata")
                .expect("required"),
        ),
        cache_dir: PathBuf::from(matches.get_one::<String>("cache-dir").expect("default")),
        aligner: AlignerKind::from_name(
            matches.get_one::<String>("aligner").expect("default"),
        )?,
    };

    let map = AntigenMap::new(config);
    let result = map
        .prepare(&upload_id, &df, win_size, step_size)
        .context("antigen map pipeline failed")?;

    std::fs::create_dir_all(&output_dir)?;
    write_csv(result.signal_frame()?, &output_dir.join("moving_sum.csv"))?;
    write_csv(result.domains_frame()?, &output_dir.join("domains.csv"))?;
    let json_path = output_dir.join("antigen_map.json");
    serde_json::to_writer_pretty(File::create(&json_path)?, &result.to_json())?;
    info!("antigen map written to {}", json_path.display());

    if let Some(&top_n) = matches.get_one::<usize>("species-top-n") {
        let rpk = antigen_map::normalize::compute_rpk(&df)?;
        let matrix = species_matrix(&rpk, top_n)?;
        let species_path = output_dir.join("species.json");
        serde_json::to_writer_pretty(File::create(&species_path)?, &matrix)?;
        info!("species matrix written to {}", species_path.display());
    }

    Ok(())
}

fn write_csv(mut df: DataFrame, path: &Path) -> anyhow::Result<()> {
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;
    info!("wrote {} rows to {}", df.height(), path.display());
    Ok(())
}
