//! Columnar result batches and the decoder that builds them from wire row sets.
//!
//! A [`Batch`] holds one [`Column`] per schema column, in schema order. Each
//! column stores its values in a native-width vector plus a parallel null
//! flag per row. Slots for null rows hold a placeholder that must not be read
//! as data; [`Column::get`] returns `None` for them.
//!
//! Decoding validates the wire tag of every column against the declared
//! [`ColumnType`] before touching its values, so a column whose position
//! lines up but whose type does not is reported as a type mismatch.
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    protocol::{ColumnData, RowSet, response::null_bit},
    schema::{ColumnDescriptor, Schema},
    types::{ColumnType, Decimal, PrimitiveType, Timestamp},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Boolean(Vec<bool>),
    TinyInt(Vec<i8>),
    SmallInt(Vec<i16>),
    Int(Vec<i32>),
    BigInt(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    /// STRING, CHAR and VARCHAR values, as the bytes the server sent.
    String(Vec<Vec<u8>>),
    Decimal(Vec<Decimal>),
    Timestamp(Vec<Timestamp>),
}

impl ColumnValues {
    fn empty(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Primitive(p) => match p {
                PrimitiveType::Boolean => ColumnValues::Boolean(Vec::new()),
                PrimitiveType::TinyInt => ColumnValues::TinyInt(Vec::new()),
                PrimitiveType::SmallInt => ColumnValues::SmallInt(Vec::new()),
                PrimitiveType::Int => ColumnValues::Int(Vec::new()),
                PrimitiveType::BigInt => ColumnValues::BigInt(Vec::new()),
                PrimitiveType::Float => ColumnValues::Float(Vec::new()),
                PrimitiveType::Double => ColumnValues::Double(Vec::new()),
                PrimitiveType::String => ColumnValues::String(Vec::new()),
                PrimitiveType::Timestamp => ColumnValues::Timestamp(Vec::new()),
            },
            ColumnType::Char { .. } | ColumnType::Varchar { .. } => {
                ColumnValues::String(Vec::new())
            }
            ColumnType::Decimal { .. } => ColumnValues::Decimal(Vec::new()),
        }
    }
}

/// A single non-null cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    String(&'a [u8]),
    Decimal(Decimal),
    Timestamp(Timestamp),
}

impl<'a> Value<'a> {
    /// String cells as UTF-8, when they are valid UTF-8.
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Value::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Integer cells widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::TinyInt(v) => Some(v.into()),
            Value::SmallInt(v) => Some(v.into()),
            Value::Int(v) => Some(v.into()),
            Value::BigInt(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    column_type: ColumnType,
    values: ColumnValues,
    nulls: Vec<bool>,
}

impl Column {
    pub fn empty(column_type: ColumnType) -> Self {
        Self {
            values: ColumnValues::empty(&column_type),
            column_type,
            nulls: Vec::new(),
        }
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    /// One flag per row, `true` where the row is null.
    pub fn nulls(&self) -> &[bool] {
        &self.nulls
    }

    pub fn len(&self) -> usize {
        self.nulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nulls.is_empty()
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.nulls.get(row).copied().unwrap_or(false)
    }

    pub fn null_count(&self) -> usize {
        self.nulls.iter().filter(|null| **null).count()
    }

    /// The cell at `row`, or `None` when it is null or out of range.
    pub fn get(&self, row: usize) -> Option<Value<'_>> {
        if self.nulls.get(row).copied().unwrap_or(true) {
            return None;
        }
        let value = match &self.values {
            ColumnValues::Boolean(v) => Value::Boolean(v[row]),
            ColumnValues::TinyInt(v) => Value::TinyInt(v[row]),
            ColumnValues::SmallInt(v) => Value::SmallInt(v[row]),
            ColumnValues::Int(v) => Value::Int(v[row]),
            ColumnValues::BigInt(v) => Value::BigInt(v[row]),
            ColumnValues::Float(v) => Value::Float(v[row]),
            ColumnValues::Double(v) => Value::Double(v[row]),
            ColumnValues::String(v) => Value::String(&v[row]),
            ColumnValues::Decimal(v) => Value::Decimal(v[row]),
            ColumnValues::Timestamp(v) => Value::Timestamp(v[row]),
        };
        Some(value)
    }
}

/// One decoded chunk of result rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    schema: Arc<Schema>,
    columns: Vec<Column>,
    num_rows: usize,
}

impl Batch {
    /// A zero-row batch shaped like `schema`.
    pub fn empty(schema: Arc<Schema>) -> Self {
        let columns = schema
            .iter()
            .map(|c| Column::empty(*c.column_type()))
            .collect();
        Self {
            schema,
            columns,
            num_rows: 0,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn value(&self, row: usize, column: usize) -> Option<Value<'_>> {
        self.columns.get(column)?.get(row)
    }

    /// All cells of `row` in schema order.
    pub fn row(&self, row: usize) -> Vec<Option<Value<'_>>> {
        self.columns.iter().map(|c| c.get(row)).collect()
    }
}

/// Decodes a fetched row set against `schema`.
///
/// Fails when the column count, row counts or wire tags disagree with the
/// schema, when more than `max_rows` rows arrive, or when a DECIMAL or
/// TIMESTAMP cell cannot be represented exactly.
pub(crate) fn decode_row_set(schema: &Arc<Schema>, row_set: RowSet, max_rows: usize) -> Result<Batch> {
    if row_set.columns.len() != schema.len() {
        return Err(Error::Decode(format!(
            "row set has {} columns, schema has {}",
            row_set.columns.len(),
            schema.len()
        )));
    }

    let num_rows = row_set.columns.first().map_or(0, ColumnData::len);
    if num_rows > max_rows {
        return Err(Error::Decode(format!(
            "server returned {num_rows} rows, {max_rows} were requested"
        )));
    }

    let columns = row_set
        .columns
        .into_iter()
        .zip(schema.iter())
        .enumerate()
        .map(|(index, (data, descriptor))| {
            if data.len() != num_rows {
                return Err(Error::Decode(format!(
                    "column {index} has {} rows, expected {num_rows}",
                    data.len()
                )));
            }
            decode_column(index, descriptor, data)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Batch {
        schema: Arc::clone(schema),
        columns,
        num_rows,
    })
}

fn decode_column(index: usize, descriptor: &ColumnDescriptor, data: ColumnData) -> Result<Column> {
    let column_type = descriptor.column_type();
    let expected = column_type.wire_tag();
    let found = data.tag();
    if expected != found {
        return Err(Error::TypeMismatch {
            column: index,
            declared: column_type.to_string(),
            expected,
            found,
        });
    }

    let nulls: Vec<bool> = (0..data.len())
        .map(|row| null_bit(data.nulls(), row))
        .collect();

    let values = match (column_type, data) {
        (ColumnType::Primitive(PrimitiveType::Boolean), ColumnData::Bool { values, .. }) => {
            ColumnValues::Boolean(values)
        }
        (ColumnType::Primitive(PrimitiveType::TinyInt), ColumnData::Byte { values, .. }) => {
            ColumnValues::TinyInt(values)
        }
        (ColumnType::Primitive(PrimitiveType::SmallInt), ColumnData::I16 { values, .. }) => {
            ColumnValues::SmallInt(values)
        }
        (ColumnType::Primitive(PrimitiveType::Int), ColumnData::I32 { values, .. }) => {
            ColumnValues::Int(values)
        }
        (ColumnType::Primitive(PrimitiveType::BigInt), ColumnData::I64 { values, .. }) => {
            ColumnValues::BigInt(values)
        }
        (ColumnType::Primitive(PrimitiveType::Float), ColumnData::Double { values, .. }) => {
            ColumnValues::Float(values.into_iter().map(|v| v as f32).collect())
        }
        (ColumnType::Primitive(PrimitiveType::Double), ColumnData::Double { values, .. }) => {
            ColumnValues::Double(values)
        }
        (
            ColumnType::Primitive(PrimitiveType::String)
            | ColumnType::Char { .. }
            | ColumnType::Varchar { .. },
            ColumnData::String { values, .. },
        ) => ColumnValues::String(values),
        (ColumnType::Decimal { precision, scale }, ColumnData::String { values, .. }) => {
            let natural_scale = descriptor.has_default_qualifiers();
            let decimals = decode_text(index, &values, &nulls, Decimal::new(0, *scale), |text| {
                if natural_scale {
                    Decimal::parse_natural(text)
                } else {
                    Decimal::parse(text, *precision, *scale)
                }
                .map_err(|e| e.to_string())
            })?;
            ColumnValues::Decimal(decimals)
        }
        (ColumnType::Primitive(PrimitiveType::Timestamp), ColumnData::String { values, .. }) => {
            let timestamps = decode_text(index, &values, &nulls, Timestamp::from_micros(0), |text| {
                Timestamp::parse(text).map_err(|e| e.to_string())
            })?;
            ColumnValues::Timestamp(timestamps)
        }
        (_, data) => {
            return Err(Error::TypeMismatch {
                column: index,
                declared: column_type.to_string(),
                expected,
                found: data.tag(),
            });
        }
    };

    Ok(Column {
        column_type: *column_type,
        values,
        nulls,
    })
}

/// Parses text-encoded cells, storing `placeholder` in null slots.
fn decode_text<T, F>(
    index: usize,
    values: &[Vec<u8>],
    nulls: &[bool],
    placeholder: T,
    parse: F,
) -> Result<Vec<T>>
where
    T: Copy,
    F: Fn(&str) -> Result<T, String>,
{
    values
        .iter()
        .zip(nulls)
        .enumerate()
        .map(|(row, (bytes, null))| {
            if *null {
                return Ok(placeholder);
            }
            let text = std::str::from_utf8(bytes).map_err(|_| {
                Error::Decode(format!("column {index} row {row}: value is not UTF-8"))
            })?;
            parse(text).map_err(|e| Error::Decode(format!("column {index} row {row}: {e}")))
        })
        .collect()
}
