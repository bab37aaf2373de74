//src/processors/flagstat.rs

use crate::error::ReportError;
use crate::processors::SourceProcessor;
use crate::types::{CanonicalRecordTable, Field, Schema, SourceKind, Value};

static FIELDS: [Field; 3] = [Field::str("type"), Field::int("reads"), Field::float("proportion")];

/// Host alignment summary: one `aligned` and one `unaligned` row.
pub static FLAGSTAT_SCHEMA: Schema = Schema {
    kind: SourceKind::AlignmentStatistics,
    fields: &FIELDS,
    id_field: "type",
    count_field: Some("reads"),
    proportion_field: Some("proportion"),
    level_field: None,
    domain_field: None,
    unassigned_prefixes: &[],
};

pub const ALIGNED: &str = "aligned";
pub const UNALIGNED: &str = "unaligned";

const PAIRED: &str = "paired in sequencing";
const PAIRED_MAPPED: &str = "with itself and mate mapped";
const IN_TOTAL: &str = "in total";
const MAPPED: &str = "mapped (";

pub struct FlagstatProcessor;

impl SourceProcessor for FlagstatProcessor {
    fn schema(&self) -> &'static Schema {
        &FLAGSTAT_SCHEMA
    }

    fn parse(&self, text: &str) -> Result<CanonicalRecordTable, ReportError> {
        let kind = SourceKind::AlignmentStatistics;
        let required = |label: &str| {
            find_count(text, label)?.ok_or_else(|| {
                ReportError::parse(kind, format!("no '{}' line in flagstat output", label))
            })
        };

        let mut total = required(PAIRED)?;
        let mut mapped = required(PAIRED_MAPPED)?;
        if total == 0 {
            // single-end data
            log::debug!("No paired reads in flagstat output; using '{}' and '{}'", IN_TOTAL, MAPPED);
            total = required(IN_TOTAL)?;
            mapped = required(MAPPED)?;
        }
        if mapped > total {
            return Err(ReportError::validation(
                kind,
                format!("{} mapped reads out of {} total", mapped, total),
            ));
        }

        let share = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };
        let unmapped = total - mapped;
        let mut table = CanonicalRecordTable::new(&FLAGSTAT_SCHEMA);
        table.push_row(vec![Value::from(ALIGNED), Value::Int(mapped as i64), Value::Float(share(mapped))])?;
        table.push_row(vec![
            Value::from(UNALIGNED),
            Value::Int(unmapped as i64),
            Value::Float(share(unmapped)),
        ])?;
        Ok(table.with_total_count(total))
    }
}

/// QC-passed count of the first `N + M <label>` line.
fn find_count(text: &str, label: &str) -> Result<Option<u64>, ReportError> {
    for (i, line) in text.lines().enumerate() {
        let Some((passed, rest)) = line.split_once(" + ") else {
            continue;
        };
        let Some((_, description)) = rest.trim_start().split_once(' ') else {
            continue;
        };
        if description.starts_with(label) {
            let n = passed.trim().parse::<u64>().map_err(|_| {
                ReportError::format(
                    SourceKind::AlignmentStatistics,
                    format!("line {}: '{}' is not a read count", i + 1, passed.trim()),
                )
            })?;
            return Ok(Some(n));
        }
    }
    Ok(None)
}
