//src/render.rs

use std::fmt::Write as _;

use crate::composer::ReportArtifact;
use crate::sections::{Payload, ReportSection, SectionKind};
use crate::types::{CanonicalRecordTable, Remainder, Value};

/// A rendering backend. It sees only a section's kind and payload, so
/// backends can be swapped without touching the pipeline.
pub trait SectionRenderer {
    fn render_section(&self, section: &ReportSection, out: &mut String);

    fn render(&self, artifact: &ReportArtifact) -> String {
        let mut out = String::new();
        for section in artifact.sections() {
            self.render_section(section, &mut out);
        }
        out
    }
}

/// Plain-text report: tab-separated records, one block per section.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRenderer;

impl TextRenderer {
    /// Whole report including the title block.
    pub fn render_report(&self, artifact: &ReportArtifact) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", artifact.title());
        let _ = writeln!(out, "sample\t{}", artifact.sample_name());
        let _ = writeln!(out, "generated\t{}", artifact.generated_at().to_rfc3339());
        for (key, value) in artifact.metadata() {
            let _ = writeln!(out, "{}\t{}", key, value);
        }
        out.push('\n');
        out.push_str(&self.render(artifact));
        out
    }
}

impl SectionRenderer for TextRenderer {
    fn render_section(&self, section: &ReportSection, out: &mut String) {
        let _ = writeln!(out, "== {} ==", section.title);
        match (&section.kind, &section.payload) {
            (SectionKind::Absent, _) | (_, Payload::Empty) => {
                let _ = writeln!(out, "No data available");
                if let Some(diagnostic) = &section.diagnostic {
                    let _ = writeln!(out, "({})", diagnostic);
                }
            }
            (_, Payload::Scalars(_)) => alignment_text(section, out),
            (
                _,
                Payload::Records {
                    table,
                    remainder,
                    unclassified,
                },
            ) => {
                records_text(table, out);
                if table.schema().count_field.is_some() {
                    remainder_text(table, remainder, *unclassified, out);
                }
            }
        }
        out.push('\n');
    }
}

fn alignment_text(section: &ReportSection, out: &mut String) {
    let int = |name| section.scalar(name).and_then(Value::as_int).unwrap_or(0);
    let host = section.scalar("host").and_then(Value::as_str).unwrap_or_default();
    let percent = section
        .scalar("percent_mapped")
        .and_then(Value::as_float)
        .unwrap_or(0.0);

    let _ = writeln!(out, "Total Number of Reads: {}", thousands(int("total_reads")));
    let _ = writeln!(
        out,
        "Reads aligned to {} Genome: {} ({:.2}%)",
        host,
        thousands(int("mapped")),
        percent
    );
    let _ = writeln!(
        out,
        "Reads NOT aligned to {} Genome: {} ({:.2}%)",
        host,
        thousands(int("unmapped")),
        100.0 - percent
    );
}

fn records_text(table: &CanonicalRecordTable, out: &mut String) {
    let _ = writeln!(out, "{}", table.schema().field_names().join("\t"));
    for row in table.rows() {
        let cells: Vec<String> = row.values().iter().map(|v| v.to_string()).collect();
        let _ = writeln!(out, "{}", cells.join("\t"));
    }
}

fn remainder_text(table: &CanonicalRecordTable, remainder: &Remainder, unclassified: u64, out: &mut String) {
    let total = table.total_count();
    let not_classified = if total == 0 {
        0.0
    } else {
        unclassified as f64 / total as f64 * 100.0
    };
    let _ = writeln!(
        out,
        "other\t{}\t{:.2}%",
        remainder.count,
        remainder.proportion * 100.0
    );
    let _ = writeln!(out, "total\t{}\t({:.1}% not classified)", total, not_classified);
}

/// 1234567 -> "1,234,567"
fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        grouped.insert(0, '-');
    }
    grouped
}
