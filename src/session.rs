//! Sessions: statement execution and catalog lookups.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, warn};

use crate::{
    config::{PollBackoff, SessionConfig},
    error::{Error, Result},
    operation::Operation,
    protocol::{ProtocolVersion, Request, Response, SessionHandle},
    service::{Connection, negotiated_version},
};

/// Rows per fetch used by the `*_exists` helpers.
const LOOKUP_BATCH_SIZE: usize = 1024;

/// Server-side session state shared by a [`Session`] and its operations.
///
/// The server session is closed when the last holder is dropped, unless
/// [`Session::close`] already did it.
pub(crate) struct SessionInner {
    conn: Arc<Connection>,
    handle: SessionHandle,
    protocol_version: ProtocolVersion,
    open: AtomicBool,
}

impl SessionInner {
    pub(crate) fn call(&self, request: Request) -> Result<Response> {
        self.conn.call(request)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub(crate) fn poll_backoff(&self) -> PollBackoff {
        self.conn.config().poll_backoff
    }

    fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let request = Request::CloseSession {
            session: self.handle,
        };
        let name = request.name();
        match self.call(request)? {
            Response::Ok => {
                debug!("closed session {}", self.handle.id);
                Ok(())
            }
            other => Err(Error::unexpected(name, &other)),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        match self.close() {
            Ok(()) => {}
            Err(Error::InvalidHandle(_)) => debug!("session {} already expired", self.handle.id),
            Err(err) => warn!("failed to close session {}: {err}", self.handle.id),
        }
    }
}

/// A protocol session bound to a [`crate::Service`]'s connection.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn open(conn: Arc<Connection>, user: &str, config: &SessionConfig) -> Result<Self> {
        let requested = conn.protocol_version();
        let request = Request::OpenSession {
            user: user.to_string(),
            protocol_version: requested.as_u8(),
            configuration: config.to_wire(),
        };
        let name = request.name();
        let (handle, protocol_version) = match conn.call(request)? {
            Response::OpenSession {
                session,
                protocol_version,
            } => (session, negotiated_version(requested, protocol_version)?),
            other => return Err(Error::unexpected(name, &other)),
        };

        debug!("opened session {} for '{user}' at {protocol_version}", handle.id);
        Ok(Self {
            inner: Arc::new(SessionInner {
                conn,
                handle,
                protocol_version,
                open: AtomicBool::new(true),
            }),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.inner.handle
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.protocol_version
    }

    /// False once [`Session::close`] has run. Server-side expiry is only
    /// detected by the next call.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Submits `sql` and returns without waiting for it to finish.
    pub fn execute(&self, sql: &str) -> Result<Operation> {
        self.submit(Request::ExecuteStatement {
            session: self.inner.handle,
            statement: sql.to_string(),
        })
    }

    /// Submits `sql` and polls until it finishes, bounded by the client's
    /// default query timeout.
    pub fn execute_sync(&self, sql: &str) -> Result<Operation> {
        let timeout = self.inner.conn.config().query_timeout;
        self.execute_sync_timeout(sql, timeout)
    }

    /// Like [`Session::execute_sync`] with an explicit deadline.
    ///
    /// On timeout the operation is canceled before [`Error::Timeout`] is
    /// returned.
    pub fn execute_sync_timeout(&self, sql: &str, timeout: Option<Duration>) -> Result<Operation> {
        let mut operation = self.execute(sql)?;
        operation.wait_finished(timeout)?;
        Ok(operation)
    }

    /// Databases whose names match the LIKE `pattern`.
    ///
    /// Result columns: `TABLE_SCHEM`, `TABLE_CATALOG`.
    pub fn get_databases(&self, pattern: &str) -> Result<Operation> {
        self.submit(Request::GetSchemas {
            session: self.inner.handle,
            schema_pattern: pattern.to_string(),
        })
    }

    /// Tables of `database` whose names match the LIKE `table_like`.
    ///
    /// Result columns: `TABLE_CAT`, `TABLE_SCHEM`, `TABLE_NAME`,
    /// `TABLE_TYPE`, `REMARKS`.
    pub fn get_tables(&self, database: &str, table_like: &str) -> Result<Operation> {
        self.submit(Request::GetTables {
            session: self.inner.handle,
            schema_pattern: database.to_string(),
            table_pattern: table_like.to_string(),
        })
    }

    /// Column listing of one table.
    ///
    /// Result columns: `TABLE_SCHEM`, `TABLE_NAME`, `COLUMN_NAME`,
    /// `TYPE_NAME`, `ORDINAL_POSITION`, `REMARKS`.
    pub fn get_table_schema(&self, table: &str, database: &str) -> Result<Operation> {
        self.submit(Request::GetColumns {
            session: self.inner.handle,
            schema_pattern: database.to_string(),
            table_name: table.to_string(),
        })
    }

    pub fn database_exists(&self, database: &str) -> Result<bool> {
        let mut operation = self.get_databases(database)?;
        first_column_contains(&mut operation, "TABLE_SCHEM", database)
    }

    pub fn table_exists(&self, table: &str, database: &str) -> Result<bool> {
        let mut operation = self.get_tables(database, table)?;
        first_column_contains(&mut operation, "TABLE_NAME", table)
    }

    /// Checks that the server still knows this session.
    pub fn ping(&self) -> Result<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        let request = Request::Ping {
            session: Some(self.inner.handle),
        };
        let name = request.name();
        match self.inner.call(request) {
            Ok(Response::Pong) => Ok(true),
            Ok(other) => Err(Error::unexpected(name, &other)),
            Err(Error::InvalidHandle(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Ends the session on the server.
    ///
    /// Operations created from it fail with [`Error::InvalidHandle`] from
    /// then on. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn submit(&self, request: Request) -> Result<Operation> {
        if !self.is_open() {
            return Err(Error::InvalidHandle(format!(
                "session {} is closed",
                self.inner.handle.id
            )));
        }
        let name = request.name();
        match self.inner.call(request)? {
            Response::Operation { operation } => {
                debug!("{name} started operation {}", operation.id);
                Ok(Operation::new(Arc::clone(&self.inner), operation))
            }
            other => Err(Error::unexpected(name, &other)),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.inner.handle.id)
            .field("protocol_version", &self.inner.protocol_version)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Waits for a catalog operation and looks for `name` in its `column`.
fn first_column_contains(operation: &mut Operation, column: &str, name: &str) -> Result<bool> {
    operation.wait_finished(None)?;
    let schema = operation.schema()?;
    let index = schema.index_of(column).ok_or_else(|| {
        Error::Protocol(format!("catalog result has no {column} column"))
    })?;

    for batch in operation.fetch_all(LOOKUP_BATCH_SIZE)? {
        let found = (0..batch.num_rows()).any(|row| {
            batch
                .value(row, index)
                .and_then(|value| value.as_str())
                .is_some_and(|value| value.eq_ignore_ascii_case(name))
        });
        if found {
            return Ok(true);
        }
    }
    Ok(false)
}
