//src/processors/kaiju.rs

use crate::error::ReportError;
use crate::processors::{parse_float, parse_int, Header, SourceProcessor};
use crate::types::{CanonicalRecordTable, Field, Schema, SourceKind, Value, UNCLASSIFIED};

static FIELDS: [Field; 4] = [
    Field::str("taxon_name"),
    Field::str("taxon_id"),
    Field::int("reads"),
    Field::float("percent"),
];

/// A `kaiju2table` summary. Besides real taxa it carries pseudo-taxa for
/// unclassified reads and reads summarized below the reporting threshold.
pub static KAIJU_SCHEMA: Schema = Schema {
    kind: SourceKind::ClassifierB,
    fields: &FIELDS,
    id_field: "taxon_name",
    count_field: Some("reads"),
    proportion_field: Some("percent"),
    level_field: None,
    domain_field: None,
    unassigned_prefixes: &[UNCLASSIFIED, "cannot be assigned", "belong to a"],
};

pub struct KaijuProcessor;

impl SourceProcessor for KaijuProcessor {
    fn schema(&self) -> &'static Schema {
        &KAIJU_SCHEMA
    }

    fn parse(&self, text: &str) -> Result<CanonicalRecordTable, ReportError> {
        let kind = SourceKind::ClassifierB;
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let header = match lines.next() {
            Some((_, line)) => Header::new(kind, line.split('\t').map(str::to_string).collect()),
            None => return Err(ReportError::parse(kind, "missing header line")),
        };
        let required = header.require(&["reads", "taxon_name"])?;
        let (reads_idx, name_idx) = (required[0], required[1]);
        let percent_idx = header.position("percent");
        let taxid_idx = header.position("taxon_id");

        // (name, taxon id, reads, percent as given)
        let mut parsed: Vec<(String, String, i64, Option<f64>)> = Vec::new();
        for (i, line) in lines {
            let line_no = i + 1;
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() != header.len() {
                return Err(ReportError::parse(
                    kind,
                    format!("line {}: expected {} columns, found {}", line_no, header.len(), cols.len()),
                ));
            }
            let reads = parse_int(kind, "reads", cols[reads_idx], line_no)?;
            let percent = match percent_idx {
                Some(idx) => Some(parse_float(kind, "percent", cols[idx], line_no)? / 100.0),
                None => None,
            };
            let taxon_id = taxid_idx.map(|idx| cols[idx].trim().to_string()).unwrap_or_default();
            parsed.push((cols[name_idx].trim().to_string(), taxon_id, reads, percent));
        }

        let total: u64 = parsed.iter().map(|(_, _, reads, _)| (*reads).max(0) as u64).sum();
        let mut table = CanonicalRecordTable::new(&KAIJU_SCHEMA);
        for (name, taxon_id, reads, percent) in parsed {
            let percent = percent.unwrap_or_else(|| {
                if total == 0 {
                    0.0
                } else {
                    reads.max(0) as f64 / total as f64
                }
            });
            table.push_row(vec![
                Value::Str(name),
                Value::Str(taxon_id),
                Value::Int(reads),
                Value::Float(percent),
            ])?;
        }
        Ok(table.with_total_count(total))
    }
}
