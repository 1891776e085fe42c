//! Client-server communication protocol.
//!
//! This module defines the wire protocol spoken between an HS2 client and a
//! HiveServer2-compatible query service: the message set, the handle types
//! that identify server-side sessions and operations, and the transport that
//! moves encoded messages over a byte stream.
//!
//! # Overview
//!
//! The message set mirrors the HiveServer2 `TCLIService` calls that a
//! columnar client needs:
//!
//! - session open/close and a connection-level handshake
//! - statement execution and the catalog calls (schemas, tables, columns)
//! - operation status, cancellation, close and log retrieval
//! - result-set metadata and columnar result fetch
//!
//! # Binary Format
//!
//! Messages are serialized with `bincode` using big-endian, fixed-width
//! integers. Enum discriminants are stable, so every message starts with its
//! variant tag followed by the fields in declaration order. A message is
//! encoded into one buffer and written with a single write.
//!
//! # Versioning
//!
//! Every session runs at a negotiated [`ProtocolVersion`]. Fields added in
//! later versions (type qualifiers, operation error details) are optional on
//! the wire and are only populated when the session's version carries them.
//!
//! # Key Components
//!
//! - [`Request`] / [`Response`]: the message enums.
//! - [`ProtocolTransport`]: encodes and decodes messages over any `Read + Write` stream.
mod request;
pub(crate) mod response;
mod transport;

use std::fmt;

use bincode::{Decode, Encode};

pub use request::Request;
pub use response::{
    CHARACTER_MAXIMUM_LENGTH, ColumnData, ColumnDesc, PRECISION, Response, ResponseError, RowSet,
    SCALE, TypeDesc, TypeId, WireTag,
};
pub use transport::{ProtocolTransport, TransportError};

/// HiveServer2 protocol revisions understood by this crate.
///
/// Variants are ordered, so `a < b` means `a` is the older revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
}

impl ProtocolVersion {
    pub const MIN: ProtocolVersion = ProtocolVersion::V1;
    pub const LATEST: ProtocolVersion = ProtocolVersion::V7;

    /// Type qualifiers (decimal precision/scale, char length) are sent from V4 on.
    pub fn has_type_qualifiers(self) -> bool {
        self >= ProtocolVersion::V4
    }

    /// Operation status carries the server error message from V5 on.
    pub fn has_error_details(self) -> bool {
        self >= ProtocolVersion::V5
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
            ProtocolVersion::V3 => 3,
            ProtocolVersion::V4 => 4,
            ProtocolVersion::V5 => 5,
            ProtocolVersion::V6 => 6,
            ProtocolVersion::V7 => 7,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            3 => Ok(ProtocolVersion::V3),
            4 => Ok(ProtocolVersion::V4),
            5 => Ok(ProtocolVersion::V5),
            6 => Ok(ProtocolVersion::V6),
            7 => Ok(ProtocolVersion::V7),
            v => Err(v),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Server-assigned identifier shared by session and operation handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct HandleId {
    pub guid: u64,
    pub secret: u64,
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.guid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct SessionHandle {
    pub id: HandleId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum OperationKind {
    ExecuteStatement,
    GetSchemas,
    GetTables,
    GetColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct OperationHandle {
    pub id: HandleId,
    pub kind: OperationKind,
    pub has_result_set: bool,
}

/// Server-reported lifecycle state of an operation.
///
/// `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum OperationState {
    Running,
    Finished,
    Error,
    Canceled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationState::Running)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationState::Running => "RUNNING",
            OperationState::Finished => "FINISHED",
            OperationState::Error => "ERROR",
            OperationState::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}
