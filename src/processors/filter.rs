//src/processors/filter.rs

use ahash::AHashMap;
use std::cmp::Ordering;

use crate::error::ReportError;
use crate::types::{CanonicalRecordTable, FilterSpec, Remainder, Row, Schema, Value};

/// Slack when comparing a computed proportion against the cutoff, so a row
/// sitting exactly on the cutoff is never lost to rounding.
const CUTOFF_EPSILON: f64 = 1e-12;

/// A row being carried through the filter together with its resolved
/// identifier and count.
struct Candidate {
    id: String,
    count: u64,
    row: Row,
}

/// Apply `spec` to `table`:
///
///  1) rows outside the domain restriction (and pseudo-rows such as
///     "unclassified") move to the remainder
///  2) keep the requested level and merge rows sharing an identifier
///  3) proportion = count / total_count
///  4) drop rows below the inclusive cutoff
///  5) sort by proportion desc, identifier asc
///  6) truncate to `max_entries`
///
/// The remainder is always `total_count - sum(kept counts)`, so every row
/// that is not kept is accounted for exactly once.
pub fn apply(
    table: &CanonicalRecordTable,
    spec: &FilterSpec,
) -> Result<(CanonicalRecordTable, Remainder), ReportError> {
    let schema = table.schema();
    let total = table.total_count();

    let count_idx = match schema.count_field.and_then(|f| schema.index_of(f)) {
        Some(idx) => idx,
        None => {
            // Nothing to rank by: the table passes through unchanged.
            return Ok((table.clone(), Remainder::default()));
        }
    };
    let id_idx = index(schema, schema.id_field)?;

    let mut candidates = Vec::with_capacity(table.len());
    for row in table.rows() {
        let count = row.get(count_idx).and_then(Value::as_int).unwrap_or(0);
        if count < 0 {
            return Err(ReportError::validation(
                schema.kind,
                format!("negative count {} in filter input", count),
            ));
        }
        let id = row.get(id_idx).map(|v| v.to_string()).unwrap_or_default();
        candidates.push(Candidate {
            id,
            count: count as u64,
            row: row.clone(),
        });
    }

    // 1) restriction
    candidates.retain(|c| !schema.is_unassigned(&c.id));
    if let Some(domain) = &spec.domain {
        match schema.domain_field.and_then(|f| schema.index_of(f)) {
            Some(domain_idx) => {
                candidates.retain(|c| {
                    c.row.get(domain_idx).and_then(Value::as_str) == Some(domain.as_str())
                });
            }
            None => log::warn!(
                "{} has no domain column; ignoring domain restriction '{}'",
                schema.kind,
                domain
            ),
        }
    }

    // 2) level selection + aggregation
    if let Some(level) = &spec.level {
        match schema.level_field.and_then(|f| schema.index_of(f)) {
            Some(level_idx) => {
                let level_present = table
                    .rows()
                    .iter()
                    .any(|row| row.get(level_idx).and_then(Value::as_str) == Some(level.as_str()));
                if !table.is_empty() && !level_present {
                    return Err(ReportError::validation(
                        schema.kind,
                        format!("filter level '{}' does not occur in any row", level),
                    ));
                }
                candidates.retain(|c| {
                    c.row.get(level_idx).and_then(Value::as_str) == Some(level.as_str())
                });
            }
            None => log::warn!(
                "{} has no level column; ignoring level '{}'",
                schema.kind,
                level
            ),
        }
    }
    let mut candidates = aggregate(candidates, count_idx);

    let kept_sum: u64 = candidates.iter().map(|c| c.count).sum();
    if kept_sum > total {
        return Err(ReportError::validation(
            schema.kind,
            format!("selected rows count {} reads but the table total is {}", kept_sum, total),
        ));
    }

    // 3) + 4) proportion and inclusive cutoff
    candidates.retain(|c| proportion(c.count, total) + CUTOFF_EPSILON >= spec.cutoff);

    // 5) deterministic order. Counts share one denominator, so ordering by
    //    count is ordering by proportion without float comparisons.
    candidates.sort_by(|a, b| match b.count.cmp(&a.count) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });

    // 6) cap
    if let Some(max) = spec.max_entries {
        candidates.truncate(max);
    }

    let proportion_idx = schema.proportion_field.and_then(|f| schema.index_of(f));
    let mut kept_total = 0u64;
    let rows: Vec<Row> = candidates
        .into_iter()
        .map(|mut c| {
            kept_total += c.count;
            if let Some(idx) = proportion_idx {
                c.row.set(idx, Value::Float(proportion(c.count, total)));
            }
            c.row
        })
        .collect();

    let remainder_count = total - kept_total;
    let remainder = Remainder {
        count: remainder_count,
        proportion: proportion(remainder_count, total),
    };

    log::debug!(
        "{}: kept {} of {} rows, remainder {} of {}",
        schema.kind,
        rows.len(),
        table.len(),
        remainder.count,
        total
    );

    Ok((CanonicalRecordTable::from_parts(schema, rows, total), remainder))
}

fn proportion(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn index(schema: &Schema, field: &str) -> Result<usize, ReportError> {
    schema.index_of(field).ok_or_else(|| {
        ReportError::validation(schema.kind, format!("schema has no '{}' column", field))
    })
}

/// Merge candidates sharing an identifier, keeping the first row's other
/// fields and summing counts. First-seen order is preserved.
fn aggregate(candidates: Vec<Candidate>, count_idx: usize) -> Vec<Candidate> {
    let mut slots: AHashMap<String, usize> = AHashMap::with_capacity(candidates.len());
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());

    for c in candidates {
        match slots.get(&c.id) {
            Some(&slot) => merged[slot].count += c.count,
            None => {
                slots.insert(c.id.clone(), merged.len());
                merged.push(c);
            }
        }
    }

    for c in &mut merged {
        c.row.set(count_idx, Value::Int(c.count as i64));
    }
    merged
}
