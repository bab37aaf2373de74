//src/types.rs

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::ReportError;

/// Identifier every tool uses for reads it could not place.
pub const UNCLASSIFIED: &str = "unclassified";

/// Level of a taxon without a rank ("no rank" nodes). Such nodes nest
/// inside each other, so their counts overlap.
pub const UNRANKED: &str = "-";

/// Which upstream tool produced a raw input.
///
/// The declaration order is the fixed section order of a composed report:
/// alignment statistics, quality control, classifier A, classifier B,
/// alignment results, coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    AlignmentStatistics,
    QualityControl,
    ClassifierA,
    ClassifierB,
    AlignmentResults,
    CoverageImages,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::AlignmentStatistics,
        SourceKind::QualityControl,
        SourceKind::ClassifierA,
        SourceKind::ClassifierB,
        SourceKind::AlignmentResults,
        SourceKind::CoverageImages,
    ];

    /// Key of this source under the `filtering` configuration section.
    /// Coverage images are never filtered.
    pub fn config_key(self) -> Option<&'static str> {
        match self {
            SourceKind::AlignmentStatistics => Some("flagstat"),
            SourceKind::QualityControl => Some("fastp"),
            SourceKind::ClassifierA => Some("kraken"),
            SourceKind::ClassifierB => Some("kaiju"),
            SourceKind::AlignmentResults => Some("blast"),
            SourceKind::CoverageImages => None,
        }
    }

    pub fn from_config_key(key: &str) -> Option<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.config_key() == Some(key))
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::AlignmentStatistics => "alignment-statistics",
            SourceKind::QualityControl => "quality-control",
            SourceKind::ClassifierA => "classifier-A",
            SourceKind::ClassifierB => "classifier-B",
            SourceKind::AlignmentResults => "alignment-results",
            SourceKind::CoverageImages => "coverage-images",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A scalar cell of a canonical table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Str(_) => FieldType::Str,
            Value::Int(_) => FieldType::Int,
            Value::Float(_) => FieldType::Float,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Str(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:.4}", v),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Str,
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl Field {
    pub const fn str(name: &'static str) -> Self {
        Field { name, ty: FieldType::Str }
    }

    pub const fn int(name: &'static str) -> Self {
        Field { name, ty: FieldType::Int }
    }

    pub const fn float(name: &'static str) -> Self {
        Field { name, ty: FieldType::Float }
    }
}

/// The fixed, source-specific shape of a canonical table, plus the roles
/// the shared filter needs to know about.
#[derive(Debug)]
pub struct Schema {
    pub kind: SourceKind,
    pub fields: &'static [Field],
    /// Row identifier, used for grouping and the deterministic tie-break.
    pub id_field: &'static str,
    /// Integer count column. Tables without one pass through `filter`.
    pub count_field: Option<&'static str>,
    /// Float column that receives `count / total_count` after filtering.
    pub proportion_field: Option<&'static str>,
    /// Taxonomic/classification level column matched against `FilterSpec::level`.
    pub level_field: Option<&'static str>,
    /// Column matched against `FilterSpec::domain`.
    pub domain_field: Option<&'static str>,
    /// Identifier prefixes of pseudo-rows (e.g. "unclassified") that always
    /// fall into the remainder.
    pub unassigned_prefixes: &'static [&'static str],
}

impl Schema {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    pub fn is_unassigned(&self, id: &str) -> bool {
        self.unassigned_prefixes
            .iter()
            .any(|prefix| id.starts_with(prefix))
    }
}

/// One row of a canonical table; values are positional per the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    pub(crate) fn set(&mut self, idx: usize, value: Value) {
        if let Some(slot) = self.0.get_mut(idx) {
            *slot = value;
        }
    }
}

/// Normalized output of a source processor.
///
/// Every row has exactly the schema's fields with the schema's types;
/// `push_row` is the only way in and it enforces that. `total_count` is
/// fixed by the processor at parse time and is the denominator for every
/// proportion computed later.
#[derive(Debug, Clone)]
pub struct CanonicalRecordTable {
    schema: &'static Schema,
    rows: Vec<Row>,
    total_count: u64,
}

impl CanonicalRecordTable {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            total_count: 0,
        }
    }

    /// Sentinel for a source that received no input: zero rows, zero total.
    pub fn no_data(schema: &'static Schema) -> Self {
        Self::new(schema)
    }

    pub fn push_row(&mut self, values: Vec<Value>) -> Result<(), ReportError> {
        if values.len() != self.schema.fields.len() {
            return Err(ReportError::Format {
                kind: self.schema.kind,
                message: format!(
                    "row has {} values, table has {} fields",
                    values.len(),
                    self.schema.fields.len()
                ),
            });
        }
        for (field, value) in self.schema.fields.iter().zip(&values) {
            if field.ty != value.field_type() {
                return Err(ReportError::Format {
                    kind: self.schema.kind,
                    message: format!(
                        "field '{}' expects {:?}, got {:?}",
                        field.name,
                        field.ty,
                        value.field_type()
                    ),
                });
            }
        }
        self.rows.push(Row(values));
        Ok(())
    }

    pub fn with_total_count(mut self, total_count: u64) -> Self {
        self.total_count = total_count;
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.schema.kind
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn is_no_data(&self) -> bool {
        self.rows.is_empty() && self.total_count == 0
    }

    pub fn value<'a>(&self, row: &'a Row, field: &str) -> Option<&'a Value> {
        self.schema.index_of(field).and_then(|idx| row.get(idx))
    }

    pub fn str_value<'a>(&self, row: &'a Row, field: &str) -> Option<&'a str> {
        self.value(row, field).and_then(Value::as_str)
    }

    /// Value of the designated count column, if the schema has one.
    pub fn count_of(&self, row: &Row) -> Option<i64> {
        self.schema
            .count_field
            .and_then(|field| self.value(row, field))
            .and_then(Value::as_int)
    }

    /// Sum of the count column over all rows (negative counts ignored).
    pub fn counted_sum(&self) -> u64 {
        self.rows
            .iter()
            .filter_map(|row| self.count_of(row))
            .map(|c| c.max(0) as u64)
            .sum()
    }

    /// Count carried by the "unclassified" pseudo-row(s), if any.
    pub fn unclassified_count(&self) -> u64 {
        let Some(idx) = self.schema.index_of(self.schema.id_field) else {
            return 0;
        };
        self.rows
            .iter()
            .filter(|row| row.get(idx).and_then(Value::as_str) == Some(UNCLASSIFIED))
            .filter_map(|row| self.count_of(row))
            .map(|c| c.max(0) as u64)
            .sum()
    }

    /// Rows whose `field` equals `value`, in table order.
    pub fn rows_where<'a>(&'a self, field: &str, value: &'a str) -> impl Iterator<Item = &'a Row> + 'a {
        let idx = self.schema.index_of(field);
        self.rows.iter().filter(move |row| {
            idx.and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .map(|v| v == value)
                .unwrap_or(false)
        })
    }

    pub(crate) fn from_parts(schema: &'static Schema, rows: Vec<Row>, total_count: u64) -> Self {
        Self {
            schema,
            rows,
            total_count,
        }
    }
}

struct RowView<'a> {
    schema: &'static Schema,
    row: &'a Row,
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.schema.fields.len()))?;
        for (field, value) in self.schema.fields.iter().zip(self.row.values()) {
            map.serialize_entry(field.name, value)?;
        }
        map.end()
    }
}

impl Serialize for CanonicalRecordTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<RowView<'_>> = self
            .rows
            .iter()
            .map(|row| RowView {
                schema: self.schema,
                row,
            })
            .collect();
        let mut st = serializer.serialize_struct("CanonicalRecordTable", 3)?;
        st.serialize_field("fields", self.schema.fields)?;
        st.serialize_field("rows", &rows)?;
        st.serialize_field("total_count", &self.total_count)?;
        st.end()
    }
}

/// Filtering policy for one source, derived from configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    /// Level code to keep (e.g. "S"); `None` keeps every level.
    pub level: Option<String>,
    /// Inclusive minimum proportion.
    pub cutoff: f64,
    /// Row cap; `None` means uncapped.
    pub max_entries: Option<usize>,
    /// Keep only rows of this domain (e.g. "Viruses").
    pub domain: Option<String>,
}

impl FilterSpec {
    /// Keeps every row.
    pub fn passthrough() -> Self {
        FilterSpec {
            level: None,
            cutoff: 0.0,
            max_entries: None,
            domain: None,
        }
    }
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// Everything a filter pass excluded, summed so totals reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Remainder {
    pub count: u64,
    pub proportion: f64,
}

/// Filtered table plus its remainder: what a processor hands to the
/// section builder.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorOutput {
    pub table: CanonicalRecordTable,
    pub remainder: Remainder,
    /// Reads the tool itself reported as unclassified (part of the remainder).
    pub unclassified: u64,
}
