use std::{collections::BTreeMap, fmt};

use bincode::{Decode, Encode};

use super::{OperationHandle, OperationState, SessionHandle};

/// Qualifier key for decimal precision.
pub const PRECISION: &str = "precision";
/// Qualifier key for decimal scale.
pub const SCALE: &str = "scale";
/// Qualifier key for char/varchar maximum length.
pub const CHARACTER_MAXIMUM_LENGTH: &str = "characterMaximumLength";

#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Response {
    Handshake {
        protocol_version: u8,
    },
    OpenSession {
        session: SessionHandle,
        protocol_version: u8,
    },
    Operation {
        operation: OperationHandle,
    },
    OperationStatus {
        state: OperationState,
        error_message: Option<String>,
    },
    ResultSetMetadata {
        columns: Vec<ColumnDesc>,
    },
    Results {
        rows: RowSet,
        has_more_rows: bool,
    },
    Log {
        log: String,
    },
    Ok,
    Pong,
    Err {
        code: ResponseError,
        description: String,
    },
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub enum ResponseError {
    /// Version negotiation failed or a message arrived out of sequence.
    Protocol,
    /// The server refused to open a session.
    Session,
    /// The session or operation handle is unknown, closed or expired.
    InvalidHandle,
    /// The statement was rejected.
    Query,
    /// The operation has not progressed far enough to answer.
    StillExecuting,
    /// The operation has no result set.
    NoResultSet,
}

/// Wire type identifiers for result columns.
#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub enum TypeId {
    Boolean,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    String,
    Timestamp,
    Decimal,
    Char,
    Varchar,
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct TypeDesc {
    pub type_id: TypeId,
    /// Absent below the version that introduced qualifiers.
    pub qualifiers: Option<BTreeMap<String, u32>>,
}

impl TypeDesc {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            qualifiers: None,
        }
    }

    pub fn qualifier(&self, key: &str) -> Option<u32> {
        self.qualifiers.as_ref()?.get(key).copied()
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    pub type_desc: TypeDesc,
    pub position: u32,
    pub comment: Option<String>,
}

/// One column of a columnar row set.
///
/// `nulls` is a bitmap with bit `i % 8` of byte `i / 8` set when row `i` is
/// null. Bytes missing from the end of the bitmap mean "not null".
#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum ColumnData {
    Bool { values: Vec<bool>, nulls: Vec<u8> },
    Byte { values: Vec<i8>, nulls: Vec<u8> },
    I16 { values: Vec<i16>, nulls: Vec<u8> },
    I32 { values: Vec<i32>, nulls: Vec<u8> },
    I64 { values: Vec<i64>, nulls: Vec<u8> },
    Double { values: Vec<f64>, nulls: Vec<u8> },
    String { values: Vec<Vec<u8>>, nulls: Vec<u8> },
}

/// The wire tag of a [`ColumnData`], used to validate it against the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireTag {
    Bool,
    Byte,
    I16,
    I32,
    I64,
    Double,
    String,
}

impl fmt::Display for WireTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ColumnData {
    pub fn tag(&self) -> WireTag {
        match self {
            ColumnData::Bool { .. } => WireTag::Bool,
            ColumnData::Byte { .. } => WireTag::Byte,
            ColumnData::I16 { .. } => WireTag::I16,
            ColumnData::I32 { .. } => WireTag::I32,
            ColumnData::I64 { .. } => WireTag::I64,
            ColumnData::Double { .. } => WireTag::Double,
            ColumnData::String { .. } => WireTag::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool { values, .. } => values.len(),
            ColumnData::Byte { values, .. } => values.len(),
            ColumnData::I16 { values, .. } => values.len(),
            ColumnData::I32 { values, .. } => values.len(),
            ColumnData::I64 { values, .. } => values.len(),
            ColumnData::Double { values, .. } => values.len(),
            ColumnData::String { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nulls(&self) -> &[u8] {
        match self {
            ColumnData::Bool { nulls, .. }
            | ColumnData::Byte { nulls, .. }
            | ColumnData::I16 { nulls, .. }
            | ColumnData::I32 { nulls, .. }
            | ColumnData::I64 { nulls, .. }
            | ColumnData::Double { nulls, .. }
            | ColumnData::String { nulls, .. } => nulls,
        }
    }
}

/// Returns whether `row` is marked null in `bitmap`.
pub(crate) fn null_bit(bitmap: &[u8], row: usize) -> bool {
    bitmap
        .get(row / 8)
        .is_some_and(|byte| byte & (1 << (row % 8)) != 0)
}

/// Packs per-row null flags into a wire bitmap.
pub(crate) fn pack_nulls<I>(is_null: I) -> Vec<u8>
where
    I: IntoIterator<Item = bool>,
{
    let mut bitmap = Vec::new();
    for (row, null) in is_null.into_iter().enumerate() {
        if row % 8 == 0 {
            bitmap.push(0);
        }
        if null {
            if let Some(byte) = bitmap.last_mut() {
                *byte |= 1 << (row % 8);
            }
        }
    }
    bitmap
}

#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub struct RowSet {
    /// Server-side offset of the first row in this set.
    pub start_row_offset: u64,
    pub columns: Vec<ColumnData>,
}
