//! Typed record sets materialized from untyped SPARQL bindings.
//!
//! SPARQL results carry no schema, so column types are inferred from a sample of rows and then
//! applied to every row. This is an approximation: a later row whose value does not fit the
//! inferred type degrades to [`CellValue::Missing`] (or demotes the column to text, depending on
//! the [`CoercionFallback`]). Materialization never fails.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::sparql::{BindingKind, BindingRow, RawBinding};

const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

const XSD_INTEGER_TYPES: &[&str] = &[
    "integer",
    "int",
    "long",
    "short",
    "byte",
    "nonNegativeInteger",
    "nonPositiveInteger",
    "negativeInteger",
    "positiveInteger",
    "unsignedLong",
    "unsignedInt",
    "unsignedShort",
    "unsignedByte",
];

// xsd:decimal stays text: an f64 would drop its scale ("0.10") and precision.
const XSD_FLOAT_TYPES: &[&str] = &["double", "float"];

static MISSING: CellValue = CellValue::Missing;

/// The type shared by all values of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Free text, or a column we could not infer anything about.
    Text,
    /// An enumerated value such as a URI or an `xsd:string` code.
    Categorical,
    Integer,
    Float,
}

impl ColumnType {
    fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

/// A single coerced cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Categorical(String),
    Integer(i64),
    Float(f64),
    Missing,
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    /// The string payload of text and categorical cells.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) | CellValue::Categorical(s) => Some(s),
            _ => None,
        }
    }
}

/// Renders the value as it is sent to the destination. Missing values render as an empty string.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CellValue::Text(s) | CellValue::Categorical(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(x) => write!(f, "{x}"),
            CellValue::Missing => Ok(()),
        }
    }
}

/// What to do with a value that does not parse as its column's numeric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionFallback {
    /// The offending cell becomes [`CellValue::Missing`].
    #[default]
    Missing,
    /// The whole column falls back to [`ColumnType::Text`] and keeps the raw strings.
    DemoteToText,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCoercionFallbackError(String);

impl fmt::Display for ParseCoercionFallbackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a valid coercion fallback", self.0)
    }
}

impl std::error::Error for ParseCoercionFallbackError {}

impl FromStr for CoercionFallback {
    type Err = ParseCoercionFallbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "missing" => Ok(CoercionFallback::Missing),
            "text" => Ok(CoercionFallback::DemoteToText),
            invalid => Err(ParseCoercionFallbackError(invalid.to_owned())),
        }
    }
}

/// Controls how column types are inferred and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferencePolicy {
    /// Number of leading rows inspected. For each column the first sampled row that binds it
    /// decides the type.
    pub sample_size: usize,
    pub fallback: CoercionFallback,
}

impl Default for InferencePolicy {
    fn default() -> Self {
        Self {
            sample_size: 1,
            fallback: CoercionFallback::Missing,
        }
    }
}

/// One materialized row. Columns without a value read as [`CellValue::Missing`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub(crate) values: HashMap<String, CellValue>,
}

impl Record {
    pub fn get(&self, column: &str) -> &CellValue {
        self.values.get(column).unwrap_or(&MISSING)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.values.insert(column.into(), value);
    }
}

/// An ordered, typed view over a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecordSet {
    pub(crate) columns: Vec<String>,
    pub(crate) types: Vec<ColumnType>,
    pub(crate) rows: Vec<Record>,
}

impl TypedRecordSet {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.types[i])
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Infer a column type from a single binding.
pub fn infer_column_type(binding: Option<&RawBinding>) -> ColumnType {
    let Some(binding) = binding else {
        return ColumnType::Text;
    };

    match binding.kind {
        BindingKind::Uri => ColumnType::Categorical,
        BindingKind::Literal | BindingKind::TypedLiteral => {
            let local_name = binding
                .datatype
                .as_deref()
                .and_then(|datatype| datatype.strip_prefix(XSD));

            match local_name {
                Some(name) if XSD_INTEGER_TYPES.contains(&name) => ColumnType::Integer,
                Some(name) if XSD_FLOAT_TYPES.contains(&name) => ColumnType::Float,
                Some("string") => ColumnType::Categorical,
                _ => ColumnType::Text,
            }
        }
        BindingKind::Bnode | BindingKind::Unknown => ColumnType::Text,
    }
}

/// Coerce a raw string into `column_type`, returning `None` when it does not fit.
fn parse_cell(column_type: ColumnType, raw: &str) -> Option<CellValue> {
    match column_type {
        ColumnType::Text => Some(CellValue::Text(raw.to_owned())),
        ColumnType::Categorical => Some(CellValue::Categorical(raw.to_owned())),
        ColumnType::Integer => raw.trim().parse::<i64>().ok().map(CellValue::Integer),
        ColumnType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .map(CellValue::Float),
    }
}

fn raw_value<'a>(row: &'a BindingRow, column: &str) -> Option<&'a str> {
    row.get(column).and_then(|binding| binding.value.as_deref())
}

/// Build a [`TypedRecordSet`] out of raw result rows.
pub fn materialize(
    columns: &[String],
    rows: &[BindingRow],
    policy: &InferencePolicy,
) -> TypedRecordSet {
    if rows.is_empty() {
        return TypedRecordSet {
            columns: columns.to_vec(),
            types: vec![ColumnType::Text; columns.len()],
            rows: Vec::new(),
        };
    }

    let sample = &rows[..policy.sample_size.clamp(1, rows.len())];

    let mut types: Vec<ColumnType> = columns
        .iter()
        .map(|column| infer_column_type(sample.iter().find_map(|row| row.get(column))))
        .collect();

    if policy.fallback == CoercionFallback::DemoteToText {
        for (column, column_type) in columns.iter().zip(types.iter_mut()) {
            if !column_type.is_numeric() {
                continue;
            }

            let fits = rows.iter().all(|row| match raw_value(row, column) {
                Some(raw) => parse_cell(*column_type, raw).is_some(),
                None => true,
            });

            if !fits {
                debug!(column = %column, "demoting column to text");
                *column_type = ColumnType::Text;
            }
        }
    }

    debug!(columns = ?columns, types = ?types, "inferred column types");

    let records = rows
        .iter()
        .map(|row| {
            let mut record = Record::default();
            for (column, column_type) in columns.iter().zip(types.iter()) {
                let value = raw_value(row, column)
                    .and_then(|raw| parse_cell(*column_type, raw))
                    .unwrap_or(CellValue::Missing);
                record.insert(column.as_str(), value);
            }
            record
        })
        .collect();

    TypedRecordSet {
        columns: columns.to_vec(),
        types,
        rows: records,
    }
}
