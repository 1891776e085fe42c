use bincode::{Decode, Encode};

use super::{OperationHandle, SessionHandle};

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum Request {
    /// First message on a connection; negotiates the connection-level version.
    Handshake {
        protocol_version: u8,
    },
    OpenSession {
        user: String,
        protocol_version: u8,
        configuration: Vec<(String, String)>,
    },
    CloseSession {
        session: SessionHandle,
    },
    ExecuteStatement {
        session: SessionHandle,
        statement: String,
    },
    GetSchemas {
        session: SessionHandle,
        schema_pattern: String,
    },
    GetTables {
        session: SessionHandle,
        schema_pattern: String,
        table_pattern: String,
    },
    GetColumns {
        session: SessionHandle,
        schema_pattern: String,
        table_name: String,
    },
    GetOperationStatus {
        operation: OperationHandle,
    },
    CancelOperation {
        operation: OperationHandle,
    },
    CloseOperation {
        operation: OperationHandle,
    },
    GetResultSetMetadata {
        operation: OperationHandle,
    },
    FetchResults {
        operation: OperationHandle,
        max_rows: u64,
    },
    GetLog {
        operation: OperationHandle,
    },
    /// Connection liveness check; validates the session handle when one is given.
    Ping {
        session: Option<SessionHandle>,
    },
    CloseConnection,
}

impl Request {
    /// RPC name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Handshake { .. } => "Handshake",
            Request::OpenSession { .. } => "OpenSession",
            Request::CloseSession { .. } => "CloseSession",
            Request::ExecuteStatement { .. } => "ExecuteStatement",
            Request::GetSchemas { .. } => "GetSchemas",
            Request::GetTables { .. } => "GetTables",
            Request::GetColumns { .. } => "GetColumns",
            Request::GetOperationStatus { .. } => "GetOperationStatus",
            Request::CancelOperation { .. } => "CancelOperation",
            Request::CloseOperation { .. } => "CloseOperation",
            Request::GetResultSetMetadata { .. } => "GetResultSetMetadata",
            Request::FetchResults { .. } => "FetchResults",
            Request::GetLog { .. } => "GetLog",
            Request::Ping { .. } => "Ping",
            Request::CloseConnection => "CloseConnection",
        }
    }
}
