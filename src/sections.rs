//src/sections.rs

use serde::Serialize;

use crate::processors::flagstat::ALIGNED;
use crate::raw::CoverageImage;
use crate::types::{CanonicalRecordTable, Field, ProcessorOutput, Remainder, Schema, SourceKind, Value};

/// Host reported by the primary alignment-statistics section.
pub const PRIMARY_HOST: &str = "Human";

static COVERAGE_FIELDS: [Field; 2] = [Field::str("name"), Field::str("path")];

/// Coverage plots as records. No count column: nothing to filter.
pub static COVERAGE_SCHEMA: Schema = Schema {
    kind: SourceKind::CoverageImages,
    fields: &COVERAGE_FIELDS,
    id_field: "name",
    count_field: None,
    proportion_field: None,
    level_field: None,
    domain_field: None,
    unassigned_prefixes: &[],
};

/// How a section should be presented. The builder only classifies; the
/// rendering backend decides what a chart or table looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Table,
    Chart,
    Text,
    Absent,
}

impl SectionKind {
    /// Presentation intent of a source that has data.
    pub fn intent(source: SourceKind) -> SectionKind {
        match source {
            SourceKind::AlignmentStatistics => SectionKind::Text,
            SourceKind::QualityControl => SectionKind::Table,
            SourceKind::ClassifierA
            | SourceKind::ClassifierB
            | SourceKind::AlignmentResults
            | SourceKind::CoverageImages => SectionKind::Chart,
        }
    }
}

/// Position of a section in the report: the source first, then the view
/// of that source (0 = primary, 1 = secondary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SectionKey {
    pub source: SourceKind,
    pub slot: u8,
}

impl SectionKey {
    pub fn primary(source: SourceKind) -> Self {
        Self { source, slot: 0 }
    }

    pub fn secondary(source: SourceKind) -> Self {
        Self { source, slot: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scalar {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Records {
        table: CanonicalRecordTable,
        remainder: Remainder,
        unclassified: u64,
    },
    Scalars(Vec<Scalar>),
    Empty,
}

/// One titled unit of a report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub key: SectionKey,
    pub title: String,
    pub kind: SectionKind,
    pub payload: Payload,
    /// Why a section is absent, when there is more to say than "no input".
    pub diagnostic: Option<String>,
}

impl ReportSection {
    pub fn source(&self) -> SourceKind {
        self.key.source
    }

    pub fn is_absent(&self) -> bool {
        self.kind == SectionKind::Absent
    }

    pub fn records(&self) -> Option<&CanonicalRecordTable> {
        match &self.payload {
            Payload::Records { table, .. } => Some(table),
            _ => None,
        }
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match &self.payload {
            Payload::Scalars(scalars) => scalars.iter().find(|s| s.name == name).map(|s| &s.value),
            _ => None,
        }
    }
}

/// What a processor handed over for one section.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    Data(ProcessorOutput),
    Absent { diagnostic: Option<String> },
}

/// Where a section goes and what it is called.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionSpec {
    pub key: SectionKey,
    pub title: String,
    /// Alignment statistics only: the reference the reads were aligned to.
    pub host: Option<String>,
}

impl SectionSpec {
    /// The primary view of `source` with its default title.
    pub fn primary(source: SourceKind) -> Self {
        let host = match source {
            SourceKind::AlignmentStatistics => Some(PRIMARY_HOST.to_string()),
            _ => None,
        };
        let title = match source {
            SourceKind::AlignmentStatistics => alignment_title(PRIMARY_HOST),
            SourceKind::QualityControl => String::from("FASTP Report Summary"),
            SourceKind::ClassifierA => classifier_a_title(None),
            SourceKind::ClassifierB => String::from("Kaiju Classification"),
            SourceKind::AlignmentResults => String::from("BLASTN of Contigs"),
            SourceKind::CoverageImages => String::from("Coverage"),
        };
        Self {
            key: SectionKey::primary(source),
            title,
            host,
        }
    }

    /// Alignment statistics against an additional host.
    pub fn secondary_host(host: &str) -> Self {
        Self {
            key: SectionKey::secondary(SourceKind::AlignmentStatistics),
            title: alignment_title(host),
            host: Some(host.to_string()),
        }
    }

    /// Primary classifier-A view, titled after its domain restriction.
    pub fn classifier_a(domain: Option<&str>) -> Self {
        Self {
            title: classifier_a_title(domain),
            ..Self::primary(SourceKind::ClassifierA)
        }
    }

    /// Domain-level overview of classifier A.
    pub fn classifier_a_domains() -> Self {
        Self {
            key: SectionKey::secondary(SourceKind::ClassifierA),
            title: String::from("Kraken Domain Classification"),
            host: None,
        }
    }
}

fn alignment_title(host: &str) -> String {
    format!("{} Alignment Stats", host)
}

fn classifier_a_title(domain: Option<&str>) -> String {
    match domain {
        Some("Viruses") => String::from("Kraken Virus Classification"),
        Some(domain) => format!("Kraken {} Classification", domain),
        None => String::from("Kraken Classification"),
    }
}

/// Section for the primary view of `source`.
pub fn build(source: SourceKind, outcome: SourceOutcome) -> ReportSection {
    build_with(SectionSpec::primary(source), outcome)
}

/// Classify a processor outcome into a section. A no-data table becomes an
/// absent section just like a missing input.
pub fn build_with(spec: SectionSpec, outcome: SourceOutcome) -> ReportSection {
    let source = spec.key.source;
    let output = match outcome {
        SourceOutcome::Data(output) if !output.table.is_no_data() => output,
        SourceOutcome::Data(_) => return absent(spec, None),
        SourceOutcome::Absent { diagnostic } => return absent(spec, diagnostic),
    };

    let kind = SectionKind::intent(source);
    let payload = match kind {
        SectionKind::Text => Payload::Scalars(alignment_scalars(spec.host.as_deref(), &output.table)),
        _ => Payload::Records {
            table: output.table,
            remainder: output.remainder,
            unclassified: output.unclassified,
        },
    };
    ReportSection {
        key: spec.key,
        title: spec.title,
        kind,
        payload,
        diagnostic: None,
    }
}

/// Coverage section from the collected plot images.
pub fn coverage(images: &[CoverageImage]) -> ReportSection {
    let spec = SectionSpec::primary(SourceKind::CoverageImages);
    if images.is_empty() {
        return absent(spec, Some(String::from("No Coverage Plots Available")));
    }

    let mut table = CanonicalRecordTable::new(&COVERAGE_SCHEMA);
    for image in images {
        let row = vec![
            Value::from(image.name.as_str()),
            Value::from(image.path.to_string_lossy().into_owned()),
        ];
        // Both fields are strings, so the row always fits the schema.
        if table.push_row(row).is_err() {
            log::warn!("Skipping coverage plot {}", image.path.display());
        }
    }
    let total = table.len() as u64;
    ReportSection {
        key: spec.key,
        title: spec.title,
        kind: SectionKind::Chart,
        payload: Payload::Records {
            table: table.with_total_count(total),
            remainder: Remainder::default(),
            unclassified: 0,
        },
        diagnostic: None,
    }
}

fn absent(spec: SectionSpec, diagnostic: Option<String>) -> ReportSection {
    ReportSection {
        key: spec.key,
        title: spec.title,
        kind: SectionKind::Absent,
        payload: Payload::Empty,
        diagnostic,
    }
}

/// host, total_reads, mapped, unmapped, percent_mapped
fn alignment_scalars(host: Option<&str>, table: &CanonicalRecordTable) -> Vec<Scalar> {
    let total = table.total_count();
    let mapped = table
        .rows_where("type", ALIGNED)
        .filter_map(|row| table.count_of(row))
        .map(|c| c.max(0) as u64)
        .sum::<u64>();
    let unmapped = total.saturating_sub(mapped);
    let percent = if total == 0 {
        0.0
    } else {
        mapped as f64 / total as f64 * 100.0
    };

    let scalar = |name: &str, value: Value| Scalar {
        name: name.to_string(),
        value,
    };
    vec![
        scalar("host", Value::from(host.unwrap_or(PRIMARY_HOST))),
        scalar("total_reads", Value::Int(total as i64)),
        scalar("mapped", Value::Int(mapped as i64)),
        scalar("unmapped", Value::Int(unmapped as i64)),
        scalar("percent_mapped", Value::Float(percent)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{FlagstatProcessor, KaijuProcessor, SourceProcessor};
    use crate::raw::RawSource;
    use crate::types::FilterSpec;

    fn flagstat_output() -> ProcessorOutput {
        let text = "1000 + 0 paired in sequencing\n250 + 0 with itself and mate mapped\n";
        FlagstatProcessor
            .run(
                Some(&RawSource::from_bytes(SourceKind::AlignmentStatistics, text)),
                &FilterSpec::passthrough(),
            )
            .unwrap()
    }

    #[test]
    fn test_alignment_statistics_become_text() {
        let section = build(SourceKind::AlignmentStatistics, SourceOutcome::Data(flagstat_output()));
        assert_eq!(section.kind, SectionKind::Text);
        assert_eq!(section.title, "Human Alignment Stats");
        assert_eq!(section.scalar("host"), Some(&Value::from("Human")));
        assert_eq!(section.scalar("total_reads"), Some(&Value::Int(1000)));
        assert_eq!(section.scalar("mapped"), Some(&Value::Int(250)));
        assert_eq!(section.scalar("unmapped"), Some(&Value::Int(750)));
        assert_eq!(section.scalar("percent_mapped"), Some(&Value::Float(25.0)));
    }

    #[test]
    fn test_secondary_host_section() {
        let section = build_with(SectionSpec::secondary_host("Mouse"), SourceOutcome::Data(flagstat_output()));
        assert_eq!(section.key, SectionKey::secondary(SourceKind::AlignmentStatistics));
        assert_eq!(section.title, "Mouse Alignment Stats");
        assert_eq!(section.scalar("host"), Some(&Value::from("Mouse")));
    }

    #[test]
    fn test_classifier_output_becomes_chart() {
        let raw = RawSource::from_bytes(SourceKind::ClassifierB, "reads\ttaxon_name\n9\tA\n1\tunclassified\n");
        let output = KaijuProcessor.run(Some(&raw), &FilterSpec::passthrough()).unwrap();
        let section = build(SourceKind::ClassifierB, SourceOutcome::Data(output));
        assert_eq!(section.kind, SectionKind::Chart);
        assert_eq!(section.records().map(|t| t.len()), Some(1));
        match &section.payload {
            Payload::Records { remainder, unclassified, .. } => {
                assert_eq!(remainder.count, 1);
                assert_eq!(*unclassified, 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_no_data_and_absent_outcomes() {
        let no_data = KaijuProcessor.run(None, &FilterSpec::passthrough()).unwrap();
        let section = build(SourceKind::ClassifierB, SourceOutcome::Data(no_data));
        assert!(section.is_absent());
        assert!(matches!(section.payload, Payload::Empty));
        assert_eq!(section.diagnostic, None);

        let section = build(
            SourceKind::QualityControl,
            SourceOutcome::Absent {
                diagnostic: Some("bad JSON".into()),
            },
        );
        assert!(section.is_absent());
        assert_eq!(section.title, "FASTP Report Summary");
        assert_eq!(section.diagnostic.as_deref(), Some("bad JSON"));
    }

    #[test]
    fn test_classifier_a_titles() {
        assert_eq!(SectionSpec::classifier_a(Some("Viruses")).title, "Kraken Virus Classification");
        assert_eq!(SectionSpec::classifier_a(Some("Bacteria")).title, "Kraken Bacteria Classification");
        assert_eq!(SectionSpec::classifier_a(None).title, "Kraken Classification");
        assert_eq!(SectionSpec::classifier_a_domains().key.slot, 1);
    }

    #[test]
    fn test_coverage_section() {
        let section = coverage(&[CoverageImage::new("/plots/segment_a.svg")]);
        assert_eq!(section.kind, SectionKind::Chart);
        let table = section.records().unwrap();
        assert_eq!(table.str_value(&table.rows()[0], "name"), Some("segment_a"));

        let empty = coverage(&[]);
        assert!(empty.is_absent());
        assert_eq!(empty.diagnostic.as_deref(), Some("No Coverage Plots Available"));
    }

    #[test]
    fn test_section_keys_order_by_source_then_slot() {
        let mut keys = vec![
            SectionKey::primary(SourceKind::CoverageImages),
            SectionKey::secondary(SourceKind::ClassifierA),
            SectionKey::primary(SourceKind::ClassifierA),
            SectionKey::primary(SourceKind::AlignmentStatistics),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SectionKey::primary(SourceKind::AlignmentStatistics),
                SectionKey::primary(SourceKind::ClassifierA),
                SectionKey::secondary(SourceKind::ClassifierA),
                SectionKey::primary(SourceKind::CoverageImages),
            ]
        );
    }
}
