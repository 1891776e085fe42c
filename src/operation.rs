//! Submitted statements and their result cursors.
//!
//! An [`Operation`] mirrors the server's state machine:
//!
//! ```text
//! RUNNING ──┬──> FINISHED
//!           ├──> ERROR
//!           └──> CANCELED
//! ```
//!
//! The local state only moves when [`Operation::poll_status`] (or one of the
//! calls built on it) hears from the server, and never leaves a terminal
//! state. Rows are fetched forward only; each batch starts where the
//! previous one ended.
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    batch::{Batch, decode_row_set},
    error::{Error, Result},
    protocol::{OperationHandle, OperationKind, OperationState, ProtocolVersion, Request, Response},
    schema::Schema,
    session::SessionInner,
};

pub struct Operation {
    session: Arc<SessionInner>,
    handle: OperationHandle,
    state: OperationState,
    error_message: Option<String>,
    schema: Option<Arc<Schema>>,
    cursor: u64,
    exhausted: bool,
    poisoned: bool,
    closed: bool,
}

impl Operation {
    pub(crate) fn new(session: Arc<SessionInner>, handle: OperationHandle) -> Self {
        Self {
            session,
            handle,
            state: OperationState::Running,
            error_message: None,
            schema: None,
            cursor: 0,
            exhausted: false,
            poisoned: false,
            closed: false,
        }
    }

    pub fn handle(&self) -> OperationHandle {
        self.handle
    }

    pub fn kind(&self) -> OperationKind {
        self.handle.kind
    }

    /// Last state reported by the server.
    pub fn state(&self) -> OperationState {
        self.state
    }

    /// False for statements such as DDL that produce no rows.
    pub fn has_result_set(&self) -> bool {
        self.handle.has_result_set
    }

    /// Server message for an operation in the ERROR state.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// True once a fetch has reached the end of the result set.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.state == OperationState::Finished
    }

    /// Rows returned by [`Operation::fetch_batch`] so far.
    pub fn rows_fetched(&self) -> u64 {
        self.cursor
    }

    /// Asks the server for the current state. No round trip once terminal.
    pub fn poll_status(&mut self) -> Result<OperationState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let request = Request::GetOperationStatus {
            operation: self.handle,
        };
        let name = request.name();
        let (state, error_message) = match self.call(request)? {
            Response::OperationStatus {
                state,
                error_message,
            } => (state, error_message),
            other => return Err(Error::unexpected(name, &other)),
        };

        if state != self.state {
            debug!("operation {} is {state}", self.handle.id);
        }
        self.state = state;
        match state {
            OperationState::Error => {
                self.error_message = Some(status_message(
                    self.session.protocol_version(),
                    error_message,
                ));
            }
            OperationState::Canceled => self.exhausted = true,
            OperationState::Running | OperationState::Finished => {}
        }
        Ok(state)
    }

    /// Requests cancellation and records the state the server settles on.
    ///
    /// A no-op once terminal. The result is CANCELED, or FINISHED when the
    /// statement completed first.
    pub fn cancel(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }

        let request = Request::CancelOperation {
            operation: self.handle,
        };
        let name = request.name();
        match self.call(request)? {
            Response::Ok => {}
            other => return Err(Error::unexpected(name, &other)),
        }
        let state = self.poll_status()?;
        debug!("cancel of operation {} settled at {state}", self.handle.id);
        Ok(())
    }

    /// Polls with backoff until the operation is terminal.
    ///
    /// When `timeout` elapses first the operation is canceled and
    /// [`Error::Timeout`] is returned.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<OperationState> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut delays = self.session.poll_backoff().delays();

        loop {
            let state = self.poll_status()?;
            if state.is_terminal() {
                return Ok(state);
            }

            let mut delay = delays.next().unwrap_or(Duration::from_millis(1));
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                let now = Instant::now();
                if now >= deadline {
                    if let Err(err) = self.cancel() {
                        warn!("failed to cancel timed out operation {}: {err}", self.handle.id);
                    }
                    return Err(Error::Timeout(timeout));
                }
                delay = delay.min(deadline - now);
            }
            thread::sleep(delay);
        }
    }

    /// [`Operation::wait`], then turns ERROR and CANCELED into errors.
    pub(crate) fn wait_finished(&mut self, timeout: Option<Duration>) -> Result<()> {
        match self.wait(timeout)? {
            OperationState::Finished => Ok(()),
            OperationState::Error => Err(self.query_error()),
            OperationState::Canceled => Err(Error::Canceled),
            OperationState::Running => Err(Error::NotReady(format!(
                "operation {} is still running",
                self.handle.id
            ))),
        }
    }

    /// Result-set metadata, once the server has produced it.
    ///
    /// Fails with [`Error::NotReady`] while the server is still computing it;
    /// poll and call again.
    pub fn schema(&mut self) -> Result<Arc<Schema>> {
        if let Some(schema) = &self.schema {
            return Ok(Arc::clone(schema));
        }
        if !self.has_result_set() {
            return Err(Error::NoResultSet);
        }
        self.check_outcome()?;

        let request = Request::GetResultSetMetadata {
            operation: self.handle,
        };
        let name = request.name();
        let columns = match self.call(request)? {
            Response::ResultSetMetadata { columns } => columns,
            other => return Err(Error::unexpected(name, &other)),
        };
        let schema = Arc::new(Schema::from_wire(columns, self.session.protocol_version())?);
        self.schema = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Fetches and decodes at most `max_rows` of the next unread rows.
    ///
    /// A zero-row batch means the result set is exhausted; asking again keeps
    /// returning zero rows, even after the session is closed. Only valid once
    /// the operation is FINISHED. After a decode failure the operation must be
    /// re-executed.
    ///
    /// `max_rows == 0` also yields a zero-row batch without contacting the
    /// server, whether or not rows remain. Check [`Operation::is_exhausted`]
    /// rather than the batch size when draining with such a limit.
    pub fn fetch_batch(&mut self, max_rows: usize) -> Result<Batch> {
        if self.exhausted && self.state == OperationState::Finished {
            if let Some(schema) = &self.schema {
                return Ok(Batch::empty(Arc::clone(schema)));
            }
        }
        if self.poisoned {
            return Err(Error::Decode(format!(
                "operation {} is unusable after a failed decode",
                self.handle.id
            )));
        }
        if !self.has_result_set() {
            return Err(Error::NoResultSet);
        }
        if self.state == OperationState::Running {
            return Err(Error::NotReady(format!(
                "operation {} is still running",
                self.handle.id
            )));
        }
        self.check_outcome()?;

        let schema = self.schema()?;
        if max_rows == 0 || self.exhausted {
            self.ensure_usable()?;
            return Ok(Batch::empty(schema));
        }

        let request = Request::FetchResults {
            operation: self.handle,
            max_rows: max_rows as u64,
        };
        let name = request.name();
        let (rows, has_more_rows) = match self.call(request)? {
            Response::Results {
                rows,
                has_more_rows,
            } => (rows, has_more_rows),
            other => return Err(Error::unexpected(name, &other)),
        };

        if rows.start_row_offset != self.cursor {
            self.poisoned = true;
            return Err(Error::Decode(format!(
                "row set starts at offset {}, expected {}",
                rows.start_row_offset, self.cursor
            )));
        }
        let batch = decode_row_set(&schema, rows, max_rows).inspect_err(|_| self.poisoned = true)?;

        self.cursor += batch.num_rows() as u64;
        if !has_more_rows || batch.is_empty() {
            self.exhausted = true;
        }
        Ok(batch)
    }

    /// Fetches every remaining row in batches of `batch_size`.
    pub fn fetch_all(&mut self, batch_size: usize) -> Result<Vec<Batch>> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::new();
        loop {
            let batch = self.fetch_batch(batch_size)?;
            if batch.is_empty() {
                return Ok(batches);
            }
            batches.push(batch);
        }
    }

    /// Server-side execution log.
    pub fn log(&mut self) -> Result<String> {
        let request = Request::GetLog {
            operation: self.handle,
        };
        let name = request.name();
        match self.call(request)? {
            Response::Log { log } => Ok(log),
            other => Err(Error::unexpected(name, &other)),
        }
    }

    /// Releases the operation on the server. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let request = Request::CloseOperation {
            operation: self.handle,
        };
        let name = request.name();
        let response = self.call(request);
        self.closed = true;
        match response? {
            Response::Ok => {
                debug!("closed operation {}", self.handle.id);
                Ok(())
            }
            other => Err(Error::unexpected(name, &other)),
        }
    }

    fn call(&self, request: Request) -> Result<Response> {
        self.ensure_usable()?;
        self.session.call(request)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidHandle(format!(
                "operation {} is closed",
                self.handle.id
            )));
        }
        if !self.session.is_open() {
            return Err(Error::InvalidHandle(format!(
                "session {} of operation {} is closed",
                self.session.handle().id,
                self.handle.id
            )));
        }
        Ok(())
    }

    fn check_outcome(&self) -> Result<()> {
        match self.state {
            OperationState::Error => Err(self.query_error()),
            OperationState::Canceled => Err(Error::Canceled),
            OperationState::Running | OperationState::Finished => Ok(()),
        }
    }

    fn query_error(&self) -> Error {
        Error::Query {
            message: self
                .error_message
                .clone()
                .unwrap_or_else(|| "operation failed".to_string()),
        }
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        if self.closed || !self.session.is_open() {
            return;
        }
        match self.close() {
            Ok(()) => {}
            Err(Error::InvalidHandle(_)) => debug!("operation {} already released", self.handle.id),
            Err(err) => warn!("failed to close operation {}: {err}", self.handle.id),
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("handle", &self.handle.id)
            .field("kind", &self.handle.kind)
            .field("state", &self.state)
            .field("rows_fetched", &self.cursor)
            .finish()
    }
}

/// Error text for the ERROR state; sessions older than V5 carry none.
fn status_message(version: ProtocolVersion, message: Option<String>) -> String {
    match message {
        Some(message) if version.has_error_details() => message,
        _ => format!("operation failed (no error details at protocol {version})"),
    }
}
