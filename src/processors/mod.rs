//src/processors/mod.rs

pub mod blast;
pub mod fastp;
pub mod filter;
pub mod flagstat;
pub mod kaiju;
pub mod kraken;

use ahash::AHashMap;

use crate::error::ReportError;
use crate::raw::RawSource;
use crate::types::{CanonicalRecordTable, FilterSpec, ProcessorOutput, Remainder, Schema, SourceKind, Value, UNRANKED};

pub use blast::BlastProcessor;
pub use fastp::FastpProcessor;
pub use flagstat::FlagstatProcessor;
pub use kaiju::KaijuProcessor;
pub use kraken::KrakenProcessor;

/// Proportions of one level may exceed 1.0 by this much before the table
/// is rejected; tools print percentages rounded to two decimals.
const PROPORTION_SUM_TOLERANCE: f64 = 0.01;

/// Parse, validate and filter one tool family's output.
///
/// Implementations only supply `schema` and `parse`; the shared
/// validation and the filter algorithm are the same for every source.
pub trait SourceProcessor: Send + Sync {
    fn schema(&self) -> &'static Schema;

    /// Turn decoded tool output into a canonical table.
    fn parse(&self, text: &str) -> Result<CanonicalRecordTable, ReportError>;

    fn kind(&self) -> SourceKind {
        self.schema().kind
    }

    fn validate(&self, table: &CanonicalRecordTable) -> Result<(), ReportError> {
        validate_table(table)
    }

    fn filter(
        &self,
        table: &CanonicalRecordTable,
        spec: &FilterSpec,
    ) -> Result<(CanonicalRecordTable, Remainder), ReportError> {
        filter::apply(table, spec)
    }

    /// Read, parse and validate. A missing or empty source is not an
    /// error: it yields the no-data table.
    fn process(&self, raw: Option<&RawSource>) -> Result<CanonicalRecordTable, ReportError> {
        let Some(raw) = raw else {
            log::info!("No {} input supplied", self.kind());
            return Ok(CanonicalRecordTable::no_data(self.schema()));
        };
        if raw.kind() != self.kind() {
            return Err(ReportError::parse(
                self.kind(),
                format!("input declared as {} given to the {} processor", raw.kind(), self.kind()),
            ));
        }

        let text = raw.read_text()?;
        if text.trim().is_empty() {
            log::info!("{} input is empty", self.kind());
            return Ok(CanonicalRecordTable::no_data(self.schema()));
        }

        let table = self.parse(&text)?;
        self.validate(&table)?;
        log::info!(
            "Parsed {} {} rows (total count {})",
            table.len(),
            self.kind(),
            table.total_count()
        );
        Ok(table)
    }

    /// Filter an already processed table into one view of it. One table
    /// may feed several views.
    fn view(&self, table: &CanonicalRecordTable, spec: &FilterSpec) -> Result<ProcessorOutput, ReportError> {
        let (filtered, remainder) = self.filter(table, spec)?;
        Ok(ProcessorOutput {
            unclassified: table.unclassified_count(),
            table: filtered,
            remainder,
        })
    }

    /// `process` then `view`, bundled for the section builder.
    fn run(&self, raw: Option<&RawSource>, spec: &FilterSpec) -> Result<ProcessorOutput, ReportError> {
        let table = self.process(raw)?;
        self.view(&table, spec)
    }
}

/// The processor for `kind`. Coverage images are supplementary material
/// and have no processor.
pub fn processor_for(kind: SourceKind) -> Option<Box<dyn SourceProcessor>> {
    match kind {
        SourceKind::AlignmentStatistics => Some(Box::new(FlagstatProcessor)),
        SourceKind::QualityControl => Some(Box::new(FastpProcessor)),
        SourceKind::ClassifierA => Some(Box::new(KrakenProcessor)),
        SourceKind::ClassifierB => Some(Box::new(KaijuProcessor)),
        SourceKind::AlignmentResults => Some(Box::new(BlastProcessor)),
        SourceKind::CoverageImages => None,
    }
}

/// Semantic checks shared by every source:
///  - counts are non-negative
///  - proportions are finite and within [0, 1]
///  - per level, proportions sum to at most 1 and counts to at most the total
///
/// Unranked rows nest inside each other and are left out of the per-level
/// sums.
pub fn validate_table(table: &CanonicalRecordTable) -> Result<(), ReportError> {
    let schema = table.schema();
    let kind = schema.kind;
    let level_idx = schema.level_field.and_then(|f| schema.index_of(f));
    let proportion_idx = schema.proportion_field.and_then(|f| schema.index_of(f));

    // level -> (count sum, proportion sum)
    let mut per_level: AHashMap<String, (u64, f64)> = AHashMap::new();

    for row in table.rows() {
        let level = level_idx
            .and_then(|i| row.get(i))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let count = table.count_of(row);
        let proportion = proportion_idx.and_then(|i| row.get(i)).and_then(Value::as_float);

        if let Some(count) = count.filter(|c| *c < 0) {
            return Err(ReportError::validation(
                kind,
                format!("negative count {} for '{}'", count, row_id(table, row)),
            ));
        }
        if let Some(p) = proportion {
            if !p.is_finite() || !(0.0..=1.0 + PROPORTION_SUM_TOLERANCE).contains(&p) {
                return Err(ReportError::validation(
                    kind,
                    format!("proportion {} out of range for '{}'", p, row_id(table, row)),
                ));
            }
        }

        if level == UNRANKED {
            continue;
        }
        let entry = per_level.entry(level.to_string()).or_insert((0, 0.0));
        entry.0 += count.unwrap_or(0) as u64;
        entry.1 += proportion.unwrap_or(0.0);
    }

    let mut levels: Vec<_> = per_level.into_iter().collect();
    levels.sort_by(|a, b| a.0.cmp(&b.0));
    for (level, (count_sum, proportion_sum)) in levels {
        let scope = if level.is_empty() {
            String::from("all rows")
        } else {
            format!("level '{}'", level)
        };
        if proportion_sum > 1.0 + PROPORTION_SUM_TOLERANCE {
            return Err(ReportError::validation(
                kind,
                format!("proportions of {} sum to {:.2}%", scope, proportion_sum * 100.0),
            ));
        }
        if schema.count_field.is_some() && count_sum > table.total_count() {
            return Err(ReportError::validation(
                kind,
                format!(
                    "counts of {} sum to {} but the total is {}",
                    scope,
                    count_sum,
                    table.total_count()
                ),
            ));
        }
    }
    Ok(())
}

fn row_id(table: &CanonicalRecordTable, row: &crate::types::Row) -> String {
    table
        .value(row, table.schema().id_field)
        .map(|v| v.to_string())
        .unwrap_or_default()
}

// -----------------------------------------------------------------------
//  Delimited text helpers
// -----------------------------------------------------------------------

/// Split delimited text into records. Fields may be wrapped in double
/// quotes, in which case they can hold the delimiter or line breaks and
/// `""` escapes a quote. Blank lines are skipped.
pub(crate) fn split_records(text: &str, delim: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    cur.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                cur.push(c);
            }
            continue;
        }
        match c {
            '"' if cur.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                fields.push(std::mem::take(&mut cur));
                push_record(&mut records, std::mem::take(&mut fields));
            }
            c if c == delim => fields.push(std::mem::take(&mut cur)),
            c => cur.push(c),
        }
    }
    fields.push(cur);
    push_record(&mut records, fields);
    records
}

fn push_record(records: &mut Vec<Vec<String>>, fields: Vec<String>) {
    let blank = fields.len() == 1 && fields[0].trim().is_empty();
    if !blank {
        records.push(fields);
    }
}

/// Column lookup over a header record.
pub(crate) struct Header {
    kind: SourceKind,
    columns: Vec<String>,
}

impl Header {
    pub(crate) fn new(kind: SourceKind, columns: Vec<String>) -> Self {
        let columns = columns.into_iter().map(|c| c.trim().to_string()).collect();
        Self { kind, columns }
    }

    pub(crate) fn len(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Positions of `names`, or a parse error listing every missing column.
    pub(crate) fn require(&self, names: &[&str]) -> Result<Vec<usize>, ReportError> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| self.position(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ReportError::parse(
                self.kind,
                format!("missing required column(s): {}", missing.join(", ")),
            ));
        }
        Ok(names.iter().filter_map(|name| self.position(name)).collect())
    }
}

pub(crate) fn parse_int(kind: SourceKind, field: &str, raw: &str, line_no: usize) -> Result<i64, ReportError> {
    raw.trim().parse::<i64>().map_err(|_| {
        ReportError::format(
            kind,
            format!("line {}: '{}' is not an integer {}", line_no, raw.trim(), field),
        )
    })
}

pub(crate) fn parse_float(kind: SourceKind, field: &str, raw: &str, line_no: usize) -> Result<f64, ReportError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ReportError::format(
            kind,
            format!("line {}: '{}' is not a number for {}", line_no, raw.trim(), field),
        )),
    }
}
