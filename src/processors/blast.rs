//src/processors/blast.rs

use crate::error::ReportError;
use crate::processors::{parse_float, parse_int, split_records, Header, SourceProcessor};
use crate::types::{CanonicalRecordTable, Field, Schema, SourceKind, Value, UNCLASSIFIED};

static FIELDS: [Field; 7] = [
    Field::str("match_name"),
    Field::str("accession"),
    Field::float("percent_identity"),
    Field::int("sequence_len"),
    Field::str("contig"),
    Field::int("contigs"),
    Field::float("proportion"),
];

/// Best BLASTN hit per assembled contig. Every contig counts once;
/// filtering merges contigs that hit the same subject.
pub static BLAST_SCHEMA: Schema = Schema {
    kind: SourceKind::AlignmentResults,
    fields: &FIELDS,
    id_field: "match_name",
    count_field: Some("contigs"),
    proportion_field: Some("proportion"),
    level_field: None,
    domain_field: None,
    unassigned_prefixes: &[UNCLASSIFIED],
};

const REQUIRED: [&str; 4] = ["match_name", "accession", "percent_identity", "sequence_len"];

pub struct BlastProcessor;

impl SourceProcessor for BlastProcessor {
    fn schema(&self) -> &'static Schema {
        &BLAST_SCHEMA
    }

    fn parse(&self, text: &str) -> Result<CanonicalRecordTable, ReportError> {
        let kind = SourceKind::AlignmentResults;
        let mut records = split_records(text, ',').into_iter();

        let header = match records.next() {
            Some(fields) => Header::new(kind, fields),
            None => return Err(ReportError::parse(kind, "missing header line")),
        };
        let idx = header.require(&REQUIRED)?;
        let (match_idx, acc_idx, pid_idx, len_idx) = (idx[0], idx[1], idx[2], idx[3]);
        let contig_idx = header.position("name");
        let sequence_idx = header.position("sequence");

        let mut table = CanonicalRecordTable::new(&BLAST_SCHEMA);
        for (i, fields) in records.enumerate() {
            let record_no = i + 2;
            if fields.len() != header.len() {
                return Err(ReportError::parse(
                    kind,
                    format!("record {}: expected {} fields, found {}", record_no, header.len(), fields.len()),
                ));
            }
            let contig = contig_idx.map(|c| fields[c].trim().to_string()).unwrap_or_default();
            let match_name = fields[match_idx].trim();

            let row = if match_name.is_empty() {
                // contig without a hit
                let sequence_len = sequence_idx.map(|s| fields[s].trim().len()).unwrap_or(0);
                vec![
                    Value::from(UNCLASSIFIED),
                    Value::from(""),
                    Value::Float(0.0),
                    Value::Int(sequence_len as i64),
                    Value::Str(contig),
                    Value::Int(1),
                    Value::Float(0.0),
                ]
            } else {
                // blastn output occasionally leaks extra hit lines into this cell
                let len_cell = fields[len_idx].lines().next().unwrap_or_default();
                vec![
                    Value::from(match_name),
                    Value::from(fields[acc_idx].trim()),
                    Value::Float(parse_float(kind, "percent_identity", &fields[pid_idx], record_no)?),
                    Value::Int(parse_int(kind, "sequence_len", len_cell, record_no)?),
                    Value::Str(contig),
                    Value::Int(1),
                    Value::Float(0.0),
                ]
            };
            table.push_row(row)?;
        }

        let total = table.len() as u64;
        Ok(table.with_total_count(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawSource;
    use crate::types::FilterSpec;

    const CSV: &str = "\
name,sequence,matches,match_name,accession,percent_identity,sequence_len
contig_1,ACGT,x,\"Escherichia phage T4, complete genome\",NC_000866,99.1,168903
contig_2,ACGTAC,x,\"Escherichia phage T4, complete genome\",NC_000866,98.7,168903
contig_3,ACG,x,Phage MS2,NC_001417,97.0,\"3569
3569\"
contig_4,ACGTACGT,,,,,
";

    fn names_and_counts(t: &CanonicalRecordTable) -> Vec<(String, i64)> {
        t.rows()
            .iter()
            .map(|r| {
                (
                    t.str_value(r, "match_name").unwrap_or_default().to_string(),
                    t.count_of(r).unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_blast_csv() {
        let t = BlastProcessor.parse(CSV).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.total_count(), 4);
        assert_eq!(t.value(&t.rows()[2], "sequence_len"), Some(&Value::Int(3569)));
        assert_eq!(t.str_value(&t.rows()[3], "match_name"), Some(UNCLASSIFIED));
        assert_eq!(t.value(&t.rows()[3], "sequence_len"), Some(&Value::Int(8)));
        assert_eq!(t.unclassified_count(), 1);
    }

    #[test]
    fn test_contigs_aggregate_by_match() {
        let raw = RawSource::from_bytes(SourceKind::AlignmentResults, CSV);
        let output = BlastProcessor.run(Some(&raw), &FilterSpec::passthrough()).unwrap();
        assert_eq!(
            names_and_counts(&output.table),
            vec![
                ("Escherichia phage T4, complete genome".to_string(), 2),
                ("Phage MS2".to_string(), 1)
            ]
        );
        assert_eq!(output.remainder.count, 1);
    }

    #[test]
    fn test_header_only_is_empty_table() {
        let t = BlastProcessor
            .parse("match_name,accession,percent_identity,sequence_len\n")
            .unwrap();
        assert!(t.is_no_data());
    }

    #[test]
    fn test_missing_columns_and_bad_numbers() {
        let err = BlastProcessor.parse("name,sequence\nc1,ACGT\n").unwrap_err();
        assert!(matches!(err, ReportError::Parse { .. }));

        let err = BlastProcessor
            .parse("match_name,accession,percent_identity,sequence_len\nhit,A1,high,100\n")
            .unwrap_err();
        assert!(matches!(err, ReportError::Format { .. }));
    }
}
