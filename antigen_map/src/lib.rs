//! Statistical core of a PhIP-seq reactivity service.
//!
//! Takes a parsed per-sample peptide abundance table plus reference database
//! paths, and produces the antigen map: RPK-normalised case-vs-control
//! differential reactivity, projected onto reference-protein coordinates via
//! an external aligner and a sliding-window containment sum, annotated with
//! polyprotein domain boundaries. Species-level RPK matrices for the
//! heatmap/barplot views are included; HTTP, storage and rendering are the
//! caller's business.

pub mod aligner;
pub mod assemble;
pub mod cache;
pub mod domains;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod species;
pub mod window;

pub use aligner::{Aligner, AlignerKind, BlastpAligner, DiamondAligner};
pub use models::{AlignmentHit, DomainAnnotation, HitDiff, PipelineError, WindowPoint};
pub use pipeline::{AntigenMap, AntigenMapConfig, AntigenMapResult};
pub use species::{species_matrix, SpeciesMatrix};
pub use window::{DEFAULT_STEP_SIZE, DEFAULT_WIN_SIZE};
