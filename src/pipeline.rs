//src/pipeline.rs

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::composer::{Composer, ReportArtifact, Supplementary};
use crate::config::ResolvedConfig;
use crate::error::{GenerationFailure, ReportError};
use crate::processors::processor_for;
use crate::raw::{CoverageImage, RawSource};
use crate::sections::{build_with, ReportSection, SectionKey, SectionSpec, SourceOutcome};
use crate::types::{FilterSpec, SourceKind};

/// Alignment statistics against a reference other than the primary host.
#[derive(Debug, Clone)]
pub struct SecondaryHost {
    pub host: String,
    pub source: RawSource,
}

/// Everything supplied for one sample. Every input is optional; a missing
/// one becomes an absent section.
#[derive(Debug, Clone, Default)]
pub struct ReportInputs {
    pub alignment_statistics: Option<RawSource>,
    pub secondary_host: Option<SecondaryHost>,
    pub quality_control: Option<RawSource>,
    pub classifier_a: Option<RawSource>,
    pub classifier_b: Option<RawSource>,
    pub alignment_results: Option<RawSource>,
    pub coverage_images: Option<Vec<CoverageImage>>,
    pub metadata: BTreeMap<String, String>,
}

impl ReportInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `source` by its declared kind.
    pub fn with_source(mut self, source: RawSource) -> Self {
        match source.kind() {
            SourceKind::AlignmentStatistics => self.alignment_statistics = Some(source),
            SourceKind::QualityControl => self.quality_control = Some(source),
            SourceKind::ClassifierA => self.classifier_a = Some(source),
            SourceKind::ClassifierB => self.classifier_b = Some(source),
            SourceKind::AlignmentResults => self.alignment_results = Some(source),
            SourceKind::CoverageImages => {
                log::warn!("Coverage images are supplied as a list of plots, not as a raw source")
            }
        }
        self
    }

    pub fn with_secondary_host(mut self, host: &str, source: RawSource) -> Self {
        self.secondary_host = Some(SecondaryHost {
            host: host.to_string(),
            source,
        });
        self
    }

    pub fn with_coverage_images(mut self, images: Vec<CoverageImage>) -> Self {
        self.coverage_images = Some(images);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// One processor run. The source is read and parsed once; each view
/// filters the same table into its own section.
struct Job<'a> {
    kind: SourceKind,
    raw: Option<&'a RawSource>,
    views: Vec<(SectionSpec, FilterSpec)>,
}

impl<'a> Job<'a> {
    fn single(section: SectionSpec, raw: Option<&'a RawSource>, filter: FilterSpec) -> Self {
        Self {
            kind: section.key.source,
            raw,
            views: vec![(section, filter)],
        }
    }

    /// Key of the first view; orders the job's results and errors.
    fn key(&self) -> Option<SectionKey> {
        self.views.first().map(|(section, _)| section.key)
    }
}

/// Runs every source processor for a sample and composes the report.
///
/// Strict by default: the first call to fail aborts generation. With
/// `partial_failure(true)` format and parse errors turn the affected
/// section absent instead; validation, I/O and configuration errors still
/// abort. Every fatal error is returned together in a `GenerationFailure`.
#[derive(Debug, Clone)]
pub struct ReportPipeline {
    config: ResolvedConfig,
    partial_failure: bool,
    parallel: bool,
}

impl ReportPipeline {
    pub fn new(config: ResolvedConfig) -> Self {
        Self {
            config,
            partial_failure: false,
            parallel: false,
        }
    }

    pub fn partial_failure(mut self, enabled: bool) -> Self {
        self.partial_failure = enabled;
        self
    }

    /// Run processors on the rayon pool. The output does not change.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn run(&self, sample_name: &str, inputs: &ReportInputs) -> Result<ReportArtifact, GenerationFailure> {
        self.run_at(sample_name, inputs, Utc::now())
    }

    /// `run` with a fixed generation timestamp.
    pub fn run_at(
        &self,
        sample_name: &str,
        inputs: &ReportInputs,
        generated_at: DateTime<Utc>,
    ) -> Result<ReportArtifact, GenerationFailure> {
        log::info!(
            "Generating report for {} ({} mode{})",
            sample_name,
            if self.partial_failure { "partial-failure" } else { "strict" },
            if self.parallel { ", parallel" } else { "" }
        );

        let jobs = self.jobs(inputs);
        let run = |job: &Job<'_>| (job.key(), self.run_job(job));
        let results: Vec<(Option<SectionKey>, Result<Vec<ReportSection>, ReportError>)> = if self.parallel {
            jobs.par_iter().map(run).collect()
        } else {
            jobs.iter().map(run).collect()
        };

        // Completion order never leaks into the report.
        let buffered: BTreeMap<Option<SectionKey>, Result<Vec<ReportSection>, ReportError>> =
            results.into_iter().collect();

        let mut sections = Vec::with_capacity(buffered.len());
        let mut errors = Vec::new();
        for (_, result) in buffered {
            match result {
                Ok(views) => sections.extend(views),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            for e in &errors {
                log::error!("{}", e);
            }
            return Err(GenerationFailure::new(errors));
        }

        let supplementary = Supplementary {
            coverage_images: inputs.coverage_images.clone(),
            metadata: inputs.metadata.clone(),
        };
        Composer::new(self.config.report_settings().clone())
            .with_plotting(self.config.plotting_defaults().clone())
            .compose_at(sample_name, sections, supplementary, generated_at)
            .map_err(GenerationFailure::from)
    }

    fn jobs<'a>(&self, inputs: &'a ReportInputs) -> Vec<Job<'a>> {
        let spec = |kind| self.config.filter_spec_for(kind);
        let kraken = spec(SourceKind::ClassifierA);

        let mut jobs = vec![Job::single(
            SectionSpec::primary(SourceKind::AlignmentStatistics),
            inputs.alignment_statistics.as_ref(),
            spec(SourceKind::AlignmentStatistics),
        )];
        if let Some(secondary) = &inputs.secondary_host {
            jobs.push(Job::single(
                SectionSpec::secondary_host(&secondary.host),
                Some(&secondary.source),
                spec(SourceKind::AlignmentStatistics),
            ));
        }
        jobs.push(Job::single(
            SectionSpec::primary(SourceKind::QualityControl),
            inputs.quality_control.as_ref(),
            spec(SourceKind::QualityControl),
        ));
        // the chosen view plus a domain overview of the same report
        jobs.push(Job {
            kind: SourceKind::ClassifierA,
            raw: inputs.classifier_a.as_ref(),
            views: vec![
                (SectionSpec::classifier_a(kraken.domain.as_deref()), kraken.clone()),
                (
                    SectionSpec::classifier_a_domains(),
                    FilterSpec {
                        level: Some(String::from("D")),
                        domain: None,
                        ..kraken
                    },
                ),
            ],
        });
        jobs.push(Job::single(
            SectionSpec::primary(SourceKind::ClassifierB),
            inputs.classifier_b.as_ref(),
            spec(SourceKind::ClassifierB),
        ));
        jobs.push(Job::single(
            SectionSpec::primary(SourceKind::AlignmentResults),
            inputs.alignment_results.as_ref(),
            spec(SourceKind::AlignmentResults),
        ));
        jobs
    }

    fn run_job(&self, job: &Job<'_>) -> Result<Vec<ReportSection>, ReportError> {
        let processor = processor_for(job.kind)
            .ok_or_else(|| ReportError::Composition(format!("no processor for {}", job.kind)))?;

        let built = processor.process(job.raw).and_then(|table| {
            job.views
                .iter()
                .map(|(section, filter)| {
                    let output = processor.view(&table, filter)?;
                    Ok(build_with(section.clone(), SourceOutcome::Data(output)))
                })
                .collect::<Result<Vec<_>, ReportError>>()
        });

        match built {
            Ok(sections) => Ok(sections),
            Err(e) if self.partial_failure && e.is_recoverable() => {
                log::warn!("{} input left out of the report: {}", job.kind, e);
                Ok(job
                    .views
                    .iter()
                    .map(|(section, _)| {
                        build_with(
                            section.clone(),
                            SourceOutcome::Absent {
                                diagnostic: Some(e.to_string()),
                            },
                        )
                    })
                    .collect())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::sections::SectionKind;

    fn pipeline() -> ReportPipeline {
        ReportPipeline::new(config::resolve(None).unwrap())
    }

    fn bad_qc() -> ReportInputs {
        ReportInputs::new()
            .with_source(RawSource::from_bytes(SourceKind::QualityControl, "{not json"))
            .with_source(RawSource::from_bytes(
                SourceKind::ClassifierB,
                "reads\ttaxon_name\n5\tPhage\n5\tunclassified\n",
            ))
    }

    #[test]
    fn test_no_inputs_gives_all_absent() {
        let artifact = pipeline().run("empty", &ReportInputs::new()).unwrap();
        assert_eq!(artifact.sections().len(), 6);
        assert!(artifact.sections().iter().all(|s| s.is_absent()));
    }

    #[test]
    fn test_strict_mode_aborts_on_format_error() {
        let failure = pipeline().run("S1", &bad_qc()).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(matches!(
            failure.errors[0],
            ReportError::Format {
                kind: SourceKind::QualityControl,
                ..
            }
        ));
    }

    #[test]
    fn test_partial_mode_downgrades_format_error() {
        let artifact = pipeline().partial_failure(true).run("S1", &bad_qc()).unwrap();
        let qc = artifact
            .section(SectionKey::primary(SourceKind::QualityControl))
            .unwrap();
        assert_eq!(qc.kind, SectionKind::Absent);
        assert!(qc.diagnostic.as_deref().unwrap_or_default().contains("malformed"));

        let kaiju = artifact
            .section(SectionKey::primary(SourceKind::ClassifierB))
            .unwrap();
        assert_eq!(kaiju.kind, SectionKind::Chart);
    }

    #[test]
    fn test_partial_mode_still_aborts_on_validation_error() {
        let inputs = ReportInputs::new()
            .with_source(RawSource::from_bytes(SourceKind::QualityControl, "{not json"))
            .with_source(RawSource::from_bytes(
                SourceKind::ClassifierB,
                "percent\treads\ttaxon_name\n90\t9\tA\n90\t1\tB\n",
            ));
        let failure = pipeline().partial_failure(true).run("S1", &inputs).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(matches!(failure.errors[0], ReportError::Validation { .. }));
    }

    #[test]
    fn test_every_fatal_error_is_reported() {
        let inputs = ReportInputs::new()
            .with_source(RawSource::from_path(SourceKind::ClassifierB, "/nonexistent/kaiju.tsv"))
            .with_source(RawSource::from_bytes(SourceKind::QualityControl, "{not json"));
        let failure = pipeline().run("S1", &inputs).unwrap_err();
        assert_eq!(failure.errors.len(), 2);
        // reported in section order
        assert_eq!(failure.errors[0].source_kind(), Some(SourceKind::QualityControl));
        assert_eq!(failure.errors[1].source_kind(), Some(SourceKind::ClassifierB));
    }

    #[test]
    fn test_kraken_input_is_parsed_once() {
        let inputs = ReportInputs::new().with_source(RawSource::from_bytes(
            SourceKind::ClassifierA,
            " 10.00\tmany\t1\tS\t1\tX\n",
        ));
        let failure = pipeline().run("S1", &inputs).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(matches!(
            failure.errors[0],
            ReportError::Format {
                kind: SourceKind::ClassifierA,
                ..
            }
        ));

        let artifact = pipeline().partial_failure(true).run("S1", &inputs).unwrap();
        let kraken: Vec<&ReportSection> = artifact.sections_for(SourceKind::ClassifierA).collect();
        assert_eq!(kraken.len(), 2);
        assert!(kraken.iter().all(|s| s.is_absent() && s.diagnostic.is_some()));
    }

    #[test]
    fn test_nested_unranked_kraken_nodes_do_not_abort() {
        let report = "\
 10.00\t10\t10\tU\t0\tunclassified
 90.00\t90\t0\tR\t1\troot
 85.00\t85\t0\t-\t131567\t  cellular organisms
 85.00\t85\t5\tD\t2\t    Bacteria
 80.00\t80\t0\t-\t1783272\t      Terrabacteria group
 80.00\t80\t80\tS\t1423\t        Bacillus subtilis
  5.00\t5\t0\tD\t10239\t  Viruses
  5.00\t5\t5\tS\t10665\t    Escherichia phage T4
";
        let inputs = ReportInputs::new().with_source(RawSource::from_bytes(SourceKind::ClassifierA, report));
        let artifact = pipeline().run("S1", &inputs).unwrap();
        let viruses = artifact
            .section(SectionKey::primary(SourceKind::ClassifierA))
            .unwrap();
        assert_eq!(viruses.kind, SectionKind::Chart);
        assert_eq!(viruses.records().map(|t| t.len()), Some(1));
    }

    #[test]
    fn test_secondary_host_adds_a_section() {
        let flagstat = "100 + 0 paired in sequencing\n40 + 0 with itself and mate mapped\n";
        let inputs = ReportInputs::new()
            .with_source(RawSource::from_bytes(SourceKind::AlignmentStatistics, flagstat))
            .with_secondary_host("Mouse", RawSource::from_bytes(SourceKind::AlignmentStatistics, flagstat));
        let artifact = pipeline().run("S1", &inputs).unwrap();
        let titles: Vec<&str> = artifact
            .sections_for(SourceKind::AlignmentStatistics)
            .map(|s| s.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Human Alignment Stats", "Mouse Alignment Stats"]);
    }
}
