// src/lib.rs
pub mod types;
pub mod error;
pub mod config;
pub mod raw;
pub mod processors;
pub mod sections;
pub mod composer;
pub mod pipeline;
pub mod render;

use serde_json::Value as Json;

pub use crate::composer::{Composer, ReportArtifact, Supplementary};
pub use crate::config::{resolve, ResolvedConfig};
pub use crate::error::{GenerationFailure, ReportError};
pub use crate::pipeline::{ReportInputs, ReportPipeline};
pub use crate::raw::{collect_coverage_images, CoverageImage, RawSource};
pub use crate::render::{SectionRenderer, TextRenderer};
pub use crate::sections::{ReportSection, SectionKey, SectionKind};
pub use crate::types::{CanonicalRecordTable, FilterSpec, Remainder, SourceKind};

/// Build a report for one sample in a single call.
///
///  1) resolve `overrides` over the default configuration
///  2) run every source processor, strict and sequential
///  3) compose the sections in report order
///
/// Same sections and rows as `ReportPipeline::run` with the same
/// configuration; only `generated_at` differs between calls.
pub fn create_report(
    sample_name: &str,
    inputs: &ReportInputs,
    overrides: Option<&Json>,
) -> Result<ReportArtifact, GenerationFailure> {
    let config = resolve(overrides)?;
    ReportPipeline::new(config).run(sample_name, inputs)
}
