//src/processors/fastp.rs

use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::ReportError;
use crate::processors::SourceProcessor;
use crate::types::{CanonicalRecordTable, Field, Schema, SourceKind, Value};

static FIELDS: [Field; 2] = [Field::str("metric"), Field::str("value")];

/// Read-QC summary as a two-column table. There is no count column, so
/// filtering leaves it untouched.
pub static FASTP_SCHEMA: Schema = Schema {
    kind: SourceKind::QualityControl,
    fields: &FIELDS,
    id_field: "metric",
    count_field: None,
    proportion_field: None,
    level_field: None,
    domain_field: None,
    unassigned_prefixes: &[],
};

#[derive(Debug, Deserialize)]
struct FastpReport {
    summary: Summary,
    #[serde(default)]
    duplication: Duplication,
    #[serde(default)]
    insert_size: InsertSize,
    #[serde(default)]
    filtering_result: FilteringResult,
}

#[derive(Debug, Deserialize)]
struct Summary {
    fastp_version: Option<String>,
    sequencing: Option<String>,
    #[serde(default)]
    before_filtering: ReadStats,
    #[serde(default)]
    after_filtering: ReadStats,
}

#[derive(Debug, Default, Deserialize)]
struct ReadStats {
    total_reads: Option<u64>,
    total_bases: Option<u64>,
    q20_bases: Option<u64>,
    q30_bases: Option<u64>,
    q20_rate: Option<f64>,
    q30_rate: Option<f64>,
    read1_mean_length: Option<u64>,
    read2_mean_length: Option<u64>,
    gc_content: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct Duplication {
    rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct InsertSize {
    peak: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[allow(non_snake_case)]
struct FilteringResult {
    passed_filter_reads: Option<u64>,
    low_quality_reads: Option<u64>,
    too_many_N_reads: Option<u64>,
    too_short_reads: Option<u64>,
}

pub struct FastpProcessor;

impl SourceProcessor for FastpProcessor {
    fn schema(&self) -> &'static Schema {
        &FASTP_SCHEMA
    }

    fn parse(&self, text: &str) -> Result<CanonicalRecordTable, ReportError> {
        let kind = SourceKind::QualityControl;
        let doc: Json = serde_json::from_str(text)
            .map_err(|e| ReportError::format(kind, format!("invalid JSON: {}", e)))?;
        if doc.get("summary").is_none() {
            return Err(ReportError::parse(kind, "missing 'summary' section"));
        }
        let report: FastpReport = serde_json::from_value(doc)
            .map_err(|e| ReportError::format(kind, e.to_string()))?;

        let mut table = CanonicalRecordTable::new(&FASTP_SCHEMA);
        for (metric, value) in summary_metrics(&report) {
            table.push_row(vec![Value::from(metric), Value::Str(value)])?;
        }
        Ok(table)
    }
}

fn or_na<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| String::from("N/A"))
}

fn pct(part: u64, whole: u64) -> f64 {
    part as f64 / whole.max(1) as f64 * 100.0
}

/// The fifteen headline metrics, in display order.
fn summary_metrics(report: &FastpReport) -> Vec<(&'static str, String)> {
    let before = &report.summary.before_filtering;
    let after = &report.summary.after_filtering;
    let filtering = &report.filtering_result;

    let reads_before = before.total_reads.unwrap_or(1);
    let passed = filtering.passed_filter_reads.unwrap_or(0);
    let low_quality = filtering.low_quality_reads.unwrap_or(0);
    let too_many_n = filtering.too_many_N_reads.unwrap_or(0);
    let too_short = filtering.too_short_reads.unwrap_or(0);

    let mean_length = |stats: &ReadStats| {
        format!(
            "{}bp, {}bp",
            or_na(stats.read1_mean_length),
            or_na(stats.read2_mean_length)
        )
    };
    let megabases = |bases: Option<u64>| bases.unwrap_or(0) as f64 / 1e6;
    let kilo_reads = |reads: u64| reads as f64 / 1000.0;

    vec![
        (
            "fastp version",
            format!("{} (https://github.com/OpenGene/fastp)", or_na(report.summary.fastp_version.as_deref())),
        ),
        ("sequencing", or_na(report.summary.sequencing.as_deref())),
        ("mean length before filtering", mean_length(before)),
        ("mean length after filtering", mean_length(after)),
        (
            "duplication rate",
            format!("{:.2}%", report.duplication.rate.unwrap_or(0.0) * 100.0),
        ),
        ("Insert size peak", or_na(report.insert_size.peak)),
        ("total reads", format!("{:.1} K", kilo_reads(after.total_reads.unwrap_or(0)))),
        ("total bases", format!("{:.1} M", megabases(after.total_bases))),
        (
            "Q20 bases",
            format!(
                "{:.1} M ({:.1}%)",
                megabases(after.q20_bases),
                after.q20_rate.unwrap_or(0.0) * 100.0
            ),
        ),
        (
            "Q30 bases",
            format!(
                "{:.1} M ({:.1}%)",
                megabases(after.q30_bases),
                after.q30_rate.unwrap_or(0.0) * 100.0
            ),
        ),
        ("GC content", format!("{:.1}%", after.gc_content.unwrap_or(0.0) * 100.0)),
        (
            "reads passed filters",
            format!("{:.1} K ({:.1}%)", kilo_reads(passed), pct(passed, reads_before)),
        ),
        (
            "reads with low quality",
            format!("{:.1} K ({:.1}%)", kilo_reads(low_quality), pct(low_quality, reads_before)),
        ),
        (
            "reads with too many N",
            format!("{} ({:.2}%)", too_many_n, pct(too_many_n, reads_before)),
        ),
        (
            "reads too short",
            format!("{} ({:.2}%)", too_short, pct(too_short, reads_before)),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilterSpec;
    use serde_json::json;

    fn sample() -> Json {
        json!({
            "summary": {
                "fastp_version": "0.23.4",
                "sequencing": "paired end (151 cycles + 151 cycles)",
                "before_filtering": {"total_reads": 200000, "read1_mean_length": 151, "read2_mean_length": 151},
                "after_filtering": {
                    "total_reads": 180000, "total_bases": 25000000,
                    "q20_bases": 24000000, "q30_bases": 22000000,
                    "q20_rate": 0.96, "q30_rate": 0.88,
                    "read1_mean_length": 140, "read2_mean_length": 139,
                    "gc_content": 0.415
                }
            },
            "duplication": {"rate": 0.0123},
            "insert_size": {"peak": 270},
            "filtering_result": {
                "passed_filter_reads": 180000, "low_quality_reads": 15000,
                "too_many_N_reads": 100, "too_short_reads": 4900
            }
        })
    }

    fn metric<'a>(t: &'a CanonicalRecordTable, name: &str) -> &'a str {
        t.rows()
            .iter()
            .find(|r| t.str_value(r, "metric") == Some(name))
            .and_then(|r| t.str_value(r, "value"))
            .unwrap()
    }

    #[test]
    fn test_summary_metrics() {
        let t = FastpProcessor.parse(&sample().to_string()).unwrap();
        assert_eq!(t.len(), 15);
        assert_eq!(metric(&t, "fastp version"), "0.23.4 (https://github.com/OpenGene/fastp)");
        assert_eq!(metric(&t, "mean length after filtering"), "140bp, 139bp");
        assert_eq!(metric(&t, "duplication rate"), "1.23%");
        assert_eq!(metric(&t, "Insert size peak"), "270");
        assert_eq!(metric(&t, "total reads"), "180.0 K");
        assert_eq!(metric(&t, "Q30 bases"), "22.0 M (88.0%)");
        assert_eq!(metric(&t, "reads passed filters"), "180.0 K (90.0%)");
        assert_eq!(metric(&t, "reads with too many N"), "100 (0.05%)");
    }

    #[test]
    fn test_single_end_lengths_show_na() {
        let doc = json!({"summary": {"before_filtering": {"read1_mean_length": 75}}});
        let t = FastpProcessor.parse(&doc.to_string()).unwrap();
        assert_eq!(metric(&t, "mean length before filtering"), "75bp, N/Abp");
        assert_eq!(metric(&t, "sequencing"), "N/A");
    }

    #[test]
    fn test_missing_summary_is_parse_error() {
        let err = FastpProcessor.parse(r#"{"duplication": {"rate": 0.1}}"#).unwrap_err();
        assert!(matches!(err, ReportError::Parse { .. }));
    }

    #[test]
    fn test_bad_json_and_bad_types_are_format_errors() {
        assert!(matches!(
            FastpProcessor.parse("{not json"),
            Err(ReportError::Format { .. })
        ));
        let doc = json!({"summary": {"after_filtering": {"total_reads": "many"}}});
        assert!(matches!(
            FastpProcessor.parse(&doc.to_string()),
            Err(ReportError::Format { .. })
        ));
    }

    #[test]
    fn test_filter_passes_table_through() {
        let t = FastpProcessor.parse(&sample().to_string()).unwrap();
        let (kept, remainder) = FastpProcessor.filter(&t, &FilterSpec::passthrough()).unwrap();
        assert_eq!(kept.rows(), t.rows());
        assert_eq!(remainder.count, 0);
    }
}
