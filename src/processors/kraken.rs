//src/processors/kraken.rs

use crate::config::rank_code;
use crate::error::ReportError;
use crate::processors::{filter, parse_float, parse_int, SourceProcessor};
use crate::types::{CanonicalRecordTable, Field, FilterSpec, Remainder, Schema, SourceKind, Value, UNCLASSIFIED, UNRANKED};

static FIELDS: [Field; 8] = [
    Field::str("name"),
    Field::str("rank"),
    Field::str("domain"),
    Field::int("depth"),
    Field::int("taxonomy_id"),
    Field::int("clade_reads"),
    Field::int("direct_reads"),
    Field::float("percent"),
];

/// A Kraken taxonomy report. One row per taxon; `clade_reads` counts the
/// taxon and everything below it, `percent` is a fraction of all reads.
pub static KRAKEN_SCHEMA: Schema = Schema {
    kind: SourceKind::ClassifierA,
    fields: &FIELDS,
    id_field: "name",
    count_field: Some("clade_reads"),
    proportion_field: Some("percent"),
    level_field: Some("rank"),
    domain_field: Some("domain"),
    unassigned_prefixes: &[UNCLASSIFIED],
};

/// Ranks that start a new domain block when forward-filling `domain`.
const DOMAIN_RANKS: [&str; 3] = ["U", "R", "D"];

/// Column positions of the accepted report layouts.
struct Layout {
    percent: usize,
    clade: usize,
    direct: usize,
    rank: usize,
    taxid: usize,
    name: usize,
}

/// Kraken 1/2 report: `%  clade  direct  rank  taxid  name`.
const KRAKEN: Layout = Layout {
    percent: 0,
    clade: 1,
    direct: 2,
    rank: 3,
    taxid: 4,
    name: 5,
};

/// Kraken 2 with `--report-minimizer-data`: two minimizer columns after `direct`.
const KRAKEN_MINIMIZERS: Layout = Layout {
    percent: 0,
    clade: 1,
    direct: 2,
    rank: 5,
    taxid: 6,
    name: 7,
};

/// KrakenUniq: `%  reads  taxReads  kmers  dup  cov  taxID  rank  taxName`,
/// preceded by a header line and with rank words instead of codes.
const KRAKENUNIQ: Layout = Layout {
    percent: 0,
    clade: 1,
    direct: 2,
    rank: 7,
    taxid: 6,
    name: 8,
};

pub struct KrakenProcessor;

impl SourceProcessor for KrakenProcessor {
    fn schema(&self) -> &'static Schema {
        &KRAKEN_SCHEMA
    }

    fn parse(&self, text: &str) -> Result<CanonicalRecordTable, ReportError> {
        let kind = SourceKind::ClassifierA;
        let mut table = CanonicalRecordTable::new(&KRAKEN_SCHEMA);
        let mut layout: Option<&Layout> = None;
        let mut domain = String::new();
        let mut total: u64 = 0;

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('%') {
                // KrakenUniq column header
                layout = Some(&KRAKENUNIQ);
                continue;
            }

            let cols: Vec<&str> = line.split('\t').collect();
            let layout = match layout {
                Some(l) => l,
                None => {
                    let detected = match cols.len() {
                        6 => &KRAKEN,
                        8 => &KRAKEN_MINIMIZERS,
                        n => {
                            return Err(ReportError::parse(
                                kind,
                                format!("line {}: expected 6 or 8 tab-separated columns, found {}", line_no, n),
                            ))
                        }
                    };
                    layout = Some(detected);
                    detected
                }
            };
            if cols.len() <= layout.name {
                return Err(ReportError::parse(
                    kind,
                    format!("line {}: expected {} columns, found {}", line_no, layout.name + 1, cols.len()),
                ));
            }

            let percent = parse_float(kind, "percent", cols[layout.percent], line_no)? / 100.0;
            let clade = parse_int(kind, "clade reads", cols[layout.clade], line_no)?;
            let direct = parse_int(kind, "direct reads", cols[layout.direct], line_no)?;
            let taxid = parse_int(kind, "taxonomy id", cols[layout.taxid], line_no)?;

            // Indented names may contain further tabs (KrakenUniq nests with them).
            let raw_name = cols[layout.name..].join("\t");
            let depth = indentation_depth(&raw_name);
            let name = raw_name.trim().to_string();

            let rank = normalize_rank(cols[layout.rank].trim(), taxid);
            if DOMAIN_RANKS.contains(&rank.as_str()) {
                domain = name.clone();
            }

            if direct < 0 {
                return Err(ReportError::validation(
                    kind,
                    format!("line {}: negative direct read count {}", line_no, direct),
                ));
            }
            total += direct as u64;

            table.push_row(vec![
                Value::Str(name),
                Value::Str(rank),
                Value::Str(domain.clone()),
                Value::Int(depth as i64),
                Value::Int(taxid),
                Value::Int(clade),
                Value::Int(direct),
                Value::Float(percent),
            ])?;
        }

        if layout.is_none() {
            return Err(ReportError::parse(kind, "report contains no taxon rows"));
        }
        Ok(table.with_total_count(total))
    }

    /// Clade counts nest across ranks, so a view without a level would
    /// count the same reads several times.
    fn filter(
        &self,
        table: &CanonicalRecordTable,
        spec: &FilterSpec,
    ) -> Result<(CanonicalRecordTable, Remainder), ReportError> {
        if spec.level.is_none() {
            return Err(ReportError::Config(String::from(
                "a Kraken report can only be filtered at a single taxonomy level",
            )));
        }
        filter::apply(table, spec)
    }
}

/// Kraken indents names by two spaces per level; KrakenUniq output may use
/// tabs. Either way the count of leading whitespace units is the depth.
fn indentation_depth(name: &str) -> usize {
    let mut spaces = 0;
    let mut tabs = 0;
    for c in name.chars() {
        match c {
            ' ' => spaces += 1,
            '\t' => tabs += 1,
            _ => break,
        }
    }
    spaces / 2 + tabs
}

/// Rank codes pass through; KrakenUniq rank words are mapped onto them.
fn normalize_rank(rank: &str, taxid: i64) -> String {
    if rank.len() <= 3 && rank.chars().next().map_or(false, |c| c.is_ascii_uppercase()) {
        return rank.to_string();
    }
    match rank {
        "superkingdom" => String::from("D"),
        "no rank" if taxid == 0 => String::from("U"),
        "no rank" if taxid == 1 => String::from("R"),
        other => rank_code(other).map(str::to_string).unwrap_or_else(|| String::from(UNRANKED)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawSource;
    use crate::types::FilterSpec;

    const REPORT: &str = "\
 40.00\t40\t40\tU\t0\tunclassified
 60.00\t60\t0\tR\t1\troot
 30.00\t30\t0\tD\t2\t  Bacteria
 30.00\t30\t30\tS\t562\t    Escherichia coli
 30.00\t30\t0\tD\t10239\t  Viruses
 20.00\t20\t20\tS\t10665\t    Escherichia phage T4
 10.00\t10\t10\tS\t10710\t    Escherichia phage lambda
";

    fn parsed() -> CanonicalRecordTable {
        KrakenProcessor
            .process(Some(&RawSource::from_bytes(SourceKind::ClassifierA, REPORT)))
            .unwrap()
    }

    #[test]
    fn test_parse_six_column_report() {
        let t = parsed();
        assert_eq!(t.len(), 7);
        assert_eq!(t.total_count(), 100);

        let ecoli = &t.rows()[3];
        assert_eq!(t.str_value(ecoli, "name"), Some("Escherichia coli"));
        assert_eq!(t.str_value(ecoli, "domain"), Some("Bacteria"));
        assert_eq!(t.value(ecoli, "depth"), Some(&Value::Int(2)));
        assert_eq!(t.value(ecoli, "percent"), Some(&Value::Float(0.30)));

        let lambda = &t.rows()[6];
        assert_eq!(t.str_value(lambda, "domain"), Some("Viruses"));
        assert_eq!(t.unclassified_count(), 40);
    }

    #[test]
    fn test_virus_species_view() {
        let spec = FilterSpec {
            level: Some("S".into()),
            cutoff: 0.01,
            max_entries: Some(10),
            domain: Some("Viruses".into()),
        };
        let output = KrakenProcessor
            .run(Some(&RawSource::from_bytes(SourceKind::ClassifierA, REPORT)), &spec)
            .unwrap();
        let names: Vec<&str> = output
            .table
            .rows()
            .iter()
            .filter_map(|r| output.table.str_value(r, "name"))
            .collect();
        assert_eq!(names, vec!["Escherichia phage T4", "Escherichia phage lambda"]);
        assert_eq!(output.remainder.count, 70);
        assert_eq!(output.unclassified, 40);
    }

    #[test]
    fn test_minimizer_columns_accepted() {
        let text = " 50.00\t5\t5\t100\t80\tU\t0\tunclassified\n 50.00\t5\t0\t90\t70\tR\t1\troot\n 50.00\t5\t5\t90\t70\tS\t9\t  Some virus\n";
        let t = KrakenProcessor.parse(text).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.total_count(), 10);
        assert_eq!(t.str_value(&t.rows()[2], "rank"), Some("S"));
    }

    #[test]
    fn test_krakenuniq_layout() {
        let text = "\
# KrakenUniq report
%\treads\ttaxReads\tkmers\tdup\tcov\ttaxID\trank\ttaxName
25.0000\t1\t1\t0\t0.0000\t0.00000\t0\tno rank\tunclassified
75.0000\t3\t0\t12\t1.0000\t0.00000\t1\tno rank\troot
75.0000\t3\t0\t12\t1.0000\t0.00000\t10239\tsuperkingdom\t\tViruses
75.0000\t3\t3\t12\t1.0000\t0.00000\t10665\tspecies\t\t\tEscherichia phage T4
";
        let t = KrakenProcessor.parse(text).unwrap();
        assert_eq!(t.total_count(), 4);
        let ranks: Vec<&str> = t.rows().iter().filter_map(|r| t.str_value(r, "rank")).collect();
        assert_eq!(ranks, vec!["U", "R", "D", "S"]);
        let phage = &t.rows()[3];
        assert_eq!(t.str_value(phage, "name"), Some("Escherichia phage T4"));
        assert_eq!(t.str_value(phage, "domain"), Some("Viruses"));
        assert_eq!(t.value(phage, "depth"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_wrong_column_count_is_parse_error() {
        let err = KrakenProcessor.parse("1.0\t1\t1\tS\n").unwrap_err();
        assert!(matches!(err, ReportError::Parse { .. }));
    }

    #[test]
    fn test_non_numeric_count_is_format_error() {
        let err = KrakenProcessor
            .parse(" 10.00\tmany\t1\tS\t1\tX\n")
            .unwrap_err();
        assert!(matches!(err, ReportError::Format { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_nested_unranked_nodes_pass_validation() {
        let text = "\
%\treads\ttaxReads\tkmers\tdup\tcov\ttaxID\trank\ttaxName
10.0000\t10\t10\t0\t0.0000\t0.00000\t0\tno rank\tunclassified
90.0000\t90\t0\t50\t1.0000\t0.00000\t1\tno rank\troot
85.0000\t85\t0\t45\t1.0000\t0.00000\t131567\tno rank\t\tcellular organisms
85.0000\t85\t5\t45\t1.0000\t0.00000\t2\tsuperkingdom\t\t\tBacteria
80.0000\t80\t0\t40\t1.0000\t0.00000\t1783272\tno rank\t\t\t\tTerrabacteria group
80.0000\t80\t80\t40\t1.0000\t0.00000\t1423\tspecies\t\t\t\t\tBacillus subtilis
5.0000\t5\t0\t5\t1.0000\t0.00000\t10239\tsuperkingdom\t\tViruses
5.0000\t5\t5\t5\t1.0000\t0.00000\t10665\tspecies\t\t\tEscherichia phage T4
";
        let raw = RawSource::from_bytes(SourceKind::ClassifierA, text);
        let t = KrakenProcessor.process(Some(&raw)).unwrap();
        assert_eq!(t.total_count(), 100);
        let unranked = t.rows_where("rank", UNRANKED).count();
        assert_eq!(unranked, 2);

        let domains = FilterSpec {
            level: Some("D".into()),
            cutoff: 0.0,
            max_entries: None,
            domain: None,
        };
        let output = KrakenProcessor.run(Some(&raw), &domains).unwrap();
        let names: Vec<&str> = output
            .table
            .rows()
            .iter()
            .filter_map(|r| output.table.str_value(r, "name"))
            .collect();
        assert_eq!(names, vec!["Bacteria", "Viruses"]);
        assert_eq!(output.remainder.count, 10);
    }

    #[test]
    fn test_view_without_level_is_rejected() {
        let raw = RawSource::from_bytes(SourceKind::ClassifierA, REPORT);
        let spec = FilterSpec {
            domain: Some("Viruses".into()),
            ..FilterSpec::passthrough()
        };
        let err = KrakenProcessor.run(Some(&raw), &spec).unwrap_err();
        assert!(matches!(err, ReportError::Config(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_clade_count_above_total_fails_validation() {
        let text = " 50.00\t5\t5\tU\t0\tunclassified\n 50.00\t50\t5\tS\t9\tVirus\n";
        let raw = RawSource::from_bytes(SourceKind::ClassifierA, text);
        let err = KrakenProcessor.process(Some(&raw)).unwrap_err();
        assert!(matches!(err, ReportError::Validation { .. }));
        assert!(!err.is_recoverable());
    }
}
