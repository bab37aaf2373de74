//src/composer.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{PlotSettings, ReportSettings};
use crate::error::ReportError;
use crate::raw::CoverageImage;
use crate::sections::{self, Payload, ReportSection, SectionKey, SectionKind};
use crate::types::SourceKind;

/// Material that is not the output of a source processor.
#[derive(Debug, Clone, Default)]
pub struct Supplementary {
    /// `None` leaves the coverage section out entirely; `Some(vec![])`
    /// yields an absent coverage section.
    pub coverage_images: Option<Vec<CoverageImage>>,
    pub metadata: BTreeMap<String, String>,
}

/// The composed report. Immutable: regenerating produces a new artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ReportArtifact {
    sample_name: String,
    generated_at: DateTime<Utc>,
    title: String,
    settings: ReportSettings,
    /// Size and style hints for the rendering backend.
    plotting: Option<PlotSettings>,
    metadata: BTreeMap<String, String>,
    sections: Vec<ReportSection>,
}

impl ReportArtifact {
    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// "Report of <sample>" unless the configuration overrides the title.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    pub fn plotting(&self) -> Option<&PlotSettings> {
        self.plotting.as_ref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    pub fn section(&self, key: SectionKey) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.key == key)
    }

    pub fn sections_for(&self, source: SourceKind) -> impl Iterator<Item = &ReportSection> {
        self.sections.iter().filter(move |s| s.source() == source)
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        serde_json::to_string_pretty(self).map_err(|e| ReportError::Composition(e.to_string()))
    }
}

/// Default report title in the settings; replaced per sample.
const DEFAULT_TITLE: &str = "ReportHanter Report";

pub struct Composer {
    settings: ReportSettings,
    plotting: Option<PlotSettings>,
}

impl Composer {
    pub fn new(settings: ReportSettings) -> Self {
        Self {
            settings,
            plotting: None,
        }
    }

    pub fn with_plotting(mut self, plotting: PlotSettings) -> Self {
        self.plotting = Some(plotting);
        self
    }

    pub fn compose(
        &self,
        sample_name: &str,
        sections: Vec<ReportSection>,
        supplementary: Supplementary,
    ) -> Result<ReportArtifact, ReportError> {
        self.compose_at(sample_name, sections, supplementary, Utc::now())
    }

    /// Order `sections` by source then view, add the coverage section and
    /// stamp the artifact with `generated_at`.
    pub fn compose_at(
        &self,
        sample_name: &str,
        sections: Vec<ReportSection>,
        supplementary: Supplementary,
        generated_at: DateTime<Utc>,
    ) -> Result<ReportArtifact, ReportError> {
        let mut ordered: BTreeMap<SectionKey, ReportSection> = BTreeMap::new();
        let coverage = supplementary.coverage_images.as_deref().map(sections::coverage);

        for section in sections.into_iter().chain(coverage) {
            check_section(&section)?;
            let key = section.key;
            if ordered.insert(key, section).is_some() {
                return Err(ReportError::Composition(format!(
                    "duplicate {} section in slot {}",
                    key.source, key.slot
                )));
            }
        }

        let title = if self.settings.title == DEFAULT_TITLE {
            format!("Report of {}", sample_name)
        } else {
            self.settings.title.clone()
        };

        log::info!(
            "Composed report for {} with {} section(s), {} absent",
            sample_name,
            ordered.len(),
            ordered.values().filter(|s| s.is_absent()).count()
        );

        Ok(ReportArtifact {
            sample_name: sample_name.to_string(),
            generated_at,
            title,
            settings: self.settings.clone(),
            plotting: self.plotting.clone(),
            metadata: supplementary.metadata,
            sections: ordered.into_values().collect(),
        })
    }
}

/// A section's kind must be its source's intent (or absent) and its
/// payload must fit that kind.
fn check_section(section: &ReportSection) -> Result<(), ReportError> {
    let source = section.source();
    let expected = SectionKind::intent(source);
    if section.kind != expected && section.kind != SectionKind::Absent {
        return Err(ReportError::Composition(format!(
            "{} section '{}' is tagged {:?}, expected {:?}",
            source, section.title, section.kind, expected
        )));
    }

    let payload_fits = match (&section.kind, &section.payload) {
        (SectionKind::Absent, Payload::Empty) => true,
        (SectionKind::Text, Payload::Scalars(_)) => true,
        (SectionKind::Table | SectionKind::Chart, Payload::Records { table, .. }) => table.kind() == source,
        _ => false,
    };
    if !payload_fits {
        return Err(ReportError::Composition(format!(
            "{} section '{}' carries a payload that does not fit kind {:?}",
            source, section.title, section.kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::processors::{KaijuProcessor, SourceProcessor};
    use crate::raw::RawSource;
    use crate::sections::{build, SourceOutcome};
    use crate::types::FilterSpec;
    use chrono::TimeZone;

    fn composer() -> Composer {
        Composer::new(config::resolve(None).unwrap().report_settings().clone())
    }

    fn absent(source: SourceKind) -> ReportSection {
        build(source, SourceOutcome::Absent { diagnostic: None })
    }

    fn kaiju_section() -> ReportSection {
        let raw = RawSource::from_bytes(SourceKind::ClassifierB, "reads\ttaxon_name\n5\tA\n");
        let output = KaijuProcessor.run(Some(&raw), &FilterSpec::passthrough()).unwrap();
        build(SourceKind::ClassifierB, SourceOutcome::Data(output))
    }

    #[test]
    fn test_sections_are_reordered() {
        let sections = vec![
            absent(SourceKind::AlignmentResults),
            kaiju_section(),
            absent(SourceKind::QualityControl),
            absent(SourceKind::AlignmentStatistics),
            absent(SourceKind::ClassifierA),
        ];
        let supplementary = Supplementary {
            coverage_images: Some(vec![]),
            ..Default::default()
        };
        let artifact = composer().compose("S1", sections, supplementary).unwrap();
        let order: Vec<SourceKind> = artifact.sections().iter().map(|s| s.source()).collect();
        assert_eq!(order, SourceKind::ALL.to_vec());
        assert_eq!(artifact.title(), "Report of S1");
        assert_eq!(artifact.sample_name(), "S1");
    }

    #[test]
    fn test_wrong_kind_is_composition_error() {
        let mut section = kaiju_section();
        section.kind = SectionKind::Text;
        let err = composer()
            .compose("S1", vec![section], Supplementary::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::Composition(_)));
    }

    #[test]
    fn test_mismatched_payload_is_composition_error() {
        let mut section = kaiju_section();
        section.key = SectionKey::primary(SourceKind::AlignmentResults);
        assert!(composer()
            .compose("S1", vec![section], Supplementary::default())
            .is_err());

        let mut section = absent(SourceKind::ClassifierB);
        section.kind = SectionKind::Chart;
        assert!(composer()
            .compose("S1", vec![section], Supplementary::default())
            .is_err());
    }

    #[test]
    fn test_duplicate_section_is_rejected() {
        let err = composer()
            .compose("S1", vec![kaiju_section(), kaiju_section()], Supplementary::default())
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_fixed_timestamp_gives_identical_json() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let make = || {
            composer()
                .compose_at(
                    "S1",
                    vec![kaiju_section(), absent(SourceKind::QualityControl)],
                    Supplementary::default(),
                    at,
                )
                .unwrap()
                .to_json()
                .unwrap()
        };
        let json = make();
        assert_eq!(json, make());
        assert!(json.contains("\"generated_at\": \"2024-05-01T12:00:00Z\""));
        assert!(json.contains("\"kind\": \"absent\""));
    }

    #[test]
    fn test_custom_title_and_metadata_are_kept() {
        let mut settings = config::resolve(None).unwrap().report_settings().clone();
        settings.title = String::from("Outbreak panel");
        let mut metadata = BTreeMap::new();
        metadata.insert(String::from("run"), String::from("R42"));
        let artifact = Composer::new(settings)
            .compose(
                "S1",
                vec![],
                Supplementary {
                    coverage_images: None,
                    metadata,
                },
            )
            .unwrap();
        assert_eq!(artifact.title(), "Outbreak panel");
        assert_eq!(artifact.metadata().get("run").map(String::as_str), Some("R42"));
        assert!(artifact.sections().is_empty());
    }
}
