//! Reference HiveServer2-style server.
//!
//! The server speaks the same wire protocol as the client and keeps its
//! databases in memory. It exists to exercise the client end to end: the
//! integration tests and the `hs2_server` binary both run it.
//!
//! Statements are accepted in the RUNNING state and only executed once
//! [`ServerConfig::execution_delay`] has passed and the client touches the
//! operation again (status poll, metadata, fetch or cancel). Syntax errors
//! are rejected by ExecuteStatement itself; failures during execution put the
//! operation in the ERROR state.
mod catalog;
mod sql;
mod thread;

use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use log::{debug, info, trace, warn};

pub use catalog::DEFAULT_DATABASE;

use crate::{
    config::USE_DATABASE,
    protocol::{
        ColumnDesc, HandleId, OperationHandle, OperationKind, OperationState, ProtocolTransport,
        ProtocolVersion, Request, Response, ResponseError, SessionHandle, TransportError,
    },
};
use catalog::{Catalog, CatalogError, Outcome, ResultSet};
use sql::Statement;
use thread::ThreadPool;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub min_protocol_version: ProtocolVersion,
    pub max_protocol_version: ProtocolVersion,
    /// How long a statement stays RUNNING before it is executed.
    pub execution_delay: Duration,
    /// Serve result-set metadata while a statement is still RUNNING.
    pub metadata_before_finish: bool,
    /// Sessions untouched for this long are dropped with their operations.
    pub session_idle_timeout: Option<Duration>,
    pub workers: usize,
    /// Users refused by OpenSession. The empty user is always refused.
    pub rejected_users: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            min_protocol_version: ProtocolVersion::MIN,
            max_protocol_version: ProtocolVersion::LATEST,
            execution_delay: Duration::ZERO,
            metadata_before_finish: false,
            session_idle_timeout: None,
            workers: 8,
            rejected_users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn with_protocol_range(mut self, min: ProtocolVersion, max: ProtocolVersion) -> Self {
        self.min_protocol_version = min;
        self.max_protocol_version = max;
        self
    }

    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    pub fn with_metadata_before_finish(mut self, enabled: bool) -> Self {
        self.metadata_before_finish = enabled;
        self
    }

    pub fn with_session_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_rejected_user(mut self, user: impl Into<String>) -> Self {
        self.rejected_users.push(user.into());
        self
    }
}

/// Error reply built while handling a request.
#[derive(Debug)]
struct Failure {
    code: ResponseError,
    description: String,
}

impl Failure {
    fn new(code: ResponseError, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    fn invalid_handle(id: HandleId) -> Self {
        Self::new(ResponseError::InvalidHandle, format!("unknown handle {id}"))
    }
}

impl From<Failure> for Response {
    fn from(failure: Failure) -> Self {
        Response::Err {
            code: failure.code,
            description: failure.description,
        }
    }
}

type Reply = Result<Response, Failure>;

#[derive(Debug)]
struct SessionEntry {
    secret: u64,
    user: String,
    version: ProtocolVersion,
    database: String,
    last_seen: Instant,
}

#[derive(Debug)]
struct OperationEntry {
    secret: u64,
    session: u64,
    version: ProtocolVersion,
    has_result_set: bool,
    submitted: Instant,
    state: OperationState,
    pending: Option<Statement>,
    result: Option<ResultSet>,
    error: Option<String>,
    cursor: usize,
    log: Vec<String>,
}

impl OperationEntry {
    fn outcome_failure(&self) -> Option<Failure> {
        match self.state {
            OperationState::Error => Some(Failure::new(
                ResponseError::Query,
                self.error.clone().unwrap_or_default(),
            )),
            OperationState::Canceled => {
                Some(Failure::new(ResponseError::Query, "operation was canceled"))
            }
            OperationState::Running | OperationState::Finished => None,
        }
    }
}

/// Catalog plus every live session and operation.
#[derive(Debug)]
struct ServerState {
    config: ServerConfig,
    catalog: Catalog,
    sessions: HashMap<u64, SessionEntry>,
    operations: HashMap<u64, OperationEntry>,
    next_guid: u64,
    seed: u64,
}

impl ServerState {
    fn new(config: ServerConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0x5eed, |d| d.as_nanos() as u64);
        Self {
            config,
            catalog: Catalog::new(),
            sessions: HashMap::new(),
            operations: HashMap::new(),
            next_guid: 0,
            seed,
        }
    }

    fn new_handle(&mut self) -> HandleId {
        self.next_guid += 1;
        let guid = self.next_guid;
        HandleId {
            guid,
            secret: guid.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ self.seed,
        }
    }

    fn negotiate(&self, requested: u8) -> Result<ProtocolVersion, Failure> {
        let min = self.config.min_protocol_version;
        if requested < min.as_u8() {
            return Err(Failure::new(
                ResponseError::Protocol,
                format!("protocol v{requested} is older than the supported minimum {min}"),
            ));
        }
        let offered = requested.min(self.config.max_protocol_version.as_u8());
        ProtocolVersion::try_from(offered).map_err(|v| {
            Failure::new(ResponseError::Protocol, format!("unknown protocol v{v}"))
        })
    }

    fn handle(&mut self, request: Request) -> Response {
        self.expire_idle_sessions();
        let reply = match request {
            Request::OpenSession {
                user,
                protocol_version,
                configuration,
            } => self.open_session(user, protocol_version, configuration),
            Request::CloseSession { session } => self.close_session(&session),
            Request::ExecuteStatement { session, statement } => {
                self.execute_statement(&session, statement)
            }
            Request::GetSchemas {
                session,
                schema_pattern,
            } => {
                let result = Ok(self.catalog.schemas(&schema_pattern));
                self.catalog_operation(&session, OperationKind::GetSchemas, result)
            }
            Request::GetTables {
                session,
                schema_pattern,
                table_pattern,
            } => {
                let result = Ok(self.catalog.tables(&schema_pattern, &table_pattern));
                self.catalog_operation(&session, OperationKind::GetTables, result)
            }
            Request::GetColumns {
                session,
                schema_pattern,
                table_name,
            } => self.get_columns(&session, &schema_pattern, &table_name),
            Request::GetOperationStatus { operation } => self.operation_status(&operation),
            Request::CancelOperation { operation } => self.cancel_operation(&operation),
            Request::CloseOperation { operation } => self.close_operation(&operation),
            Request::GetResultSetMetadata { operation } => self.result_set_metadata(&operation),
            Request::FetchResults {
                operation,
                max_rows,
            } => self.fetch_results(&operation, max_rows),
            Request::GetLog { operation } => self.get_log(&operation),
            Request::Ping { session } => match session {
                Some(session) => self.session_mut(&session).map(|_| Response::Pong),
                None => Ok(Response::Pong),
            },
            Request::Handshake { .. } | Request::CloseConnection => Err(Failure::new(
                ResponseError::Protocol,
                "connection-level request routed to session handler",
            )),
        };
        reply.unwrap_or_else(Response::from)
    }

    fn open_session(
        &mut self,
        user: String,
        protocol_version: u8,
        configuration: Vec<(String, String)>,
    ) -> Reply {
        if user.is_empty() || self.config.rejected_users.contains(&user) {
            return Err(Failure::new(
                ResponseError::Session,
                format!("user '{user}' is not allowed to open a session"),
            ));
        }
        let version = self.negotiate(protocol_version)?;

        let mut database = DEFAULT_DATABASE.to_string();
        for (key, value) in configuration {
            if key == USE_DATABASE {
                if !self.catalog.has_database(&value) {
                    return Err(Failure::new(
                        ResponseError::Session,
                        format!("database '{value}' does not exist"),
                    ));
                }
                database = value.to_ascii_lowercase();
            } else {
                debug!("ignoring session option {key}={value}");
            }
        }

        let id = self.new_handle();
        info!("session {id} opened for '{user}' at {version}");
        self.sessions.insert(
            id.guid,
            SessionEntry {
                secret: id.secret,
                user,
                version,
                database,
                last_seen: Instant::now(),
            },
        );
        Ok(Response::OpenSession {
            session: SessionHandle { id },
            protocol_version: version.as_u8(),
        })
    }

    fn close_session(&mut self, handle: &SessionHandle) -> Reply {
        self.session_mut(handle)?;
        self.remove_session(handle.id.guid);
        info!("session {} closed", handle.id);
        Ok(Response::Ok)
    }

    fn remove_session(&mut self, guid: u64) {
        self.sessions.remove(&guid);
        self.operations.retain(|_, op| op.session != guid);
    }

    fn expire_idle_sessions(&mut self) {
        let Some(timeout) = self.config.session_idle_timeout else {
            return;
        };
        let expired: Vec<u64> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_seen.elapsed() >= timeout)
            .map(|(guid, _)| *guid)
            .collect();
        for guid in expired {
            if let Some(session) = self.sessions.get(&guid) {
                info!("session of '{}' expired after {timeout:?} idle", session.user);
            }
            self.remove_session(guid);
        }
    }

    fn invalidate_all(&mut self) {
        info!(
            "invalidating {} sessions and {} operations",
            self.sessions.len(),
            self.operations.len()
        );
        self.sessions.clear();
        self.operations.clear();
    }

    /// Looks up a live session and marks it as used.
    fn session_mut(&mut self, handle: &SessionHandle) -> Result<&mut SessionEntry, Failure> {
        let session = self
            .sessions
            .get_mut(&handle.id.guid)
            .filter(|s| s.secret == handle.id.secret)
            .ok_or_else(|| Failure::invalid_handle(handle.id))?;
        session.last_seen = Instant::now();
        Ok(session)
    }

    /// Looks up a live operation, runs it if it is due and marks its session
    /// as used.
    fn operation_mut(&mut self, handle: &OperationHandle) -> Result<&mut OperationEntry, Failure> {
        let guid = handle.id.guid;
        let session = self
            .operations
            .get(&guid)
            .filter(|op| op.secret == handle.id.secret)
            .map(|op| op.session)
            .ok_or_else(|| Failure::invalid_handle(handle.id))?;
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| Failure::invalid_handle(handle.id))?
            .last_seen = Instant::now();

        self.advance(guid);
        self.operations
            .get_mut(&guid)
            .ok_or_else(|| Failure::invalid_handle(handle.id))
    }

    /// Executes a pending statement once its delay has passed.
    fn advance(&mut self, guid: u64) {
        let Some(op) = self.operations.get_mut(&guid) else {
            return;
        };
        if op.state != OperationState::Running
            || op.submitted.elapsed() < self.config.execution_delay
        {
            return;
        }
        let Some(statement) = op.pending.take() else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&op.session) else {
            return;
        };

        match self.catalog.execute(&statement, &mut session.database) {
            Ok(Outcome::Rows(result)) => {
                op.log.push(format!("returned {} rows", result.len()));
                op.result = Some(result);
                op.state = OperationState::Finished;
            }
            Ok(Outcome::Done(message)) => {
                op.log.push(message);
                op.state = OperationState::Finished;
            }
            Err(err) => {
                debug!("operation {guid} failed: {err}");
                op.log.push(format!("failed: {err}"));
                op.error = Some(err.to_string());
                op.state = OperationState::Error;
            }
        }
    }

    fn execute_statement(&mut self, handle: &SessionHandle, statement: String) -> Reply {
        let version = self.session_mut(handle)?.version;
        let parsed = sql::parse(&statement)
            .map_err(|e| Failure::new(ResponseError::Query, e.to_string()))?;

        let id = self.new_handle();
        let has_result_set = parsed.has_result_set();
        debug!("operation {id} accepted: {statement}");
        self.operations.insert(
            id.guid,
            OperationEntry {
                secret: id.secret,
                session: handle.id.guid,
                version,
                has_result_set,
                submitted: Instant::now(),
                state: OperationState::Running,
                pending: Some(parsed),
                result: None,
                error: None,
                cursor: 0,
                log: vec![format!("compiled: {statement}")],
            },
        );
        Ok(Response::Operation {
            operation: OperationHandle {
                id,
                kind: OperationKind::ExecuteStatement,
                has_result_set,
            },
        })
    }

    fn get_columns(&mut self, handle: &SessionHandle, database: &str, table: &str) -> Reply {
        let database = if database.is_empty() {
            self.session_mut(handle)?.database.clone()
        } else {
            database.to_string()
        };
        let result = self.catalog.columns(&database, table);
        self.catalog_operation(handle, OperationKind::GetColumns, result)
    }

    /// Registers a metadata call, already finished with `result`.
    fn catalog_operation(
        &mut self,
        handle: &SessionHandle,
        kind: OperationKind,
        result: Result<ResultSet, CatalogError>,
    ) -> Reply {
        let version = self.session_mut(handle)?.version;
        let id = self.new_handle();

        let (state, result, error, log) = match result {
            Ok(result) => {
                let log = format!("{kind:?} returned {} rows", result.len());
                (OperationState::Finished, Some(result), None, log)
            }
            Err(err) => {
                let log = format!("{kind:?} failed: {err}");
                (OperationState::Error, None, Some(err.to_string()), log)
            }
        };
        self.operations.insert(
            id.guid,
            OperationEntry {
                secret: id.secret,
                session: handle.id.guid,
                version,
                has_result_set: true,
                submitted: Instant::now(),
                state,
                pending: None,
                result,
                error,
                cursor: 0,
                log: vec![log],
            },
        );
        Ok(Response::Operation {
            operation: OperationHandle {
                id,
                kind,
                has_result_set: true,
            },
        })
    }

    fn operation_status(&mut self, handle: &OperationHandle) -> Reply {
        let op = self.operation_mut(handle)?;
        let error_message = if op.version.has_error_details() {
            op.error.clone()
        } else {
            None
        };
        Ok(Response::OperationStatus {
            state: op.state,
            error_message,
        })
    }

    fn cancel_operation(&mut self, handle: &OperationHandle) -> Reply {
        let op = self.operation_mut(handle)?;
        if op.state == OperationState::Running {
            op.state = OperationState::Canceled;
            op.pending = None;
            op.log.push("canceled".to_string());
            debug!("operation {} canceled", handle.id);
        }
        Ok(Response::Ok)
    }

    fn close_operation(&mut self, handle: &OperationHandle) -> Reply {
        self.operation_mut(handle)?;
        self.operations.remove(&handle.id.guid);
        debug!("operation {} closed", handle.id);
        Ok(Response::Ok)
    }

    fn result_set_metadata(&mut self, handle: &OperationHandle) -> Reply {
        let metadata_before_finish = self.config.metadata_before_finish;
        let op = self.operation_mut(handle)?;
        if !op.has_result_set {
            return Err(Failure::new(ResponseError::NoResultSet, "statement has no result set"));
        }
        if let Some(failure) = op.outcome_failure() {
            return Err(failure);
        }

        let version = op.version;
        let session = op.session;
        let pending = match (&op.result, &op.pending) {
            (Some(result), _) => Ok(result.columns.clone()),
            (None, Some(statement)) if metadata_before_finish => Err(Some(statement.clone())),
            _ => Err(None),
        };
        let columns = match pending {
            Ok(columns) => columns,
            Err(Some(statement)) => {
                let database = self
                    .sessions
                    .get(&session)
                    .map_or(DEFAULT_DATABASE, |s| s.database.as_str());
                self.catalog.plan(&statement, database).ok_or_else(|| {
                    Failure::new(ResponseError::StillExecuting, "result metadata not ready")
                })?
            }
            Err(None) => {
                return Err(Failure::new(
                    ResponseError::StillExecuting,
                    "result metadata is available once the statement finishes",
                ));
            }
        };

        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| ColumnDesc {
                name: c.name,
                type_desc: c.column_type.to_type_desc(version),
                position: i as u32 + 1,
                comment: c.comment,
            })
            .collect();
        Ok(Response::ResultSetMetadata { columns })
    }

    fn fetch_results(&mut self, handle: &OperationHandle, max_rows: u64) -> Reply {
        let op = self.operation_mut(handle)?;
        if !op.has_result_set {
            return Err(Failure::new(ResponseError::NoResultSet, "statement has no result set"));
        }
        if let Some(failure) = op.outcome_failure() {
            return Err(failure);
        }
        let Some(result) = &op.result else {
            return Err(Failure::new(ResponseError::StillExecuting, "statement is still running"));
        };

        let max_rows = usize::try_from(max_rows).unwrap_or(usize::MAX);
        let rows = result.row_set(op.cursor, max_rows);
        let fetched = rows.columns.first().map_or(0, |c| c.len());
        op.cursor += fetched;
        let has_more_rows = op.cursor < result.len();
        trace!("operation {} fetched {fetched} rows", handle.id);
        Ok(Response::Results {
            rows,
            has_more_rows,
        })
    }

    fn get_log(&mut self, handle: &OperationHandle) -> Reply {
        let op = self.operation_mut(handle)?;
        Ok(Response::Log {
            log: op.log.join("\n"),
        })
    }
}

fn lock(state: &Mutex<ServerState>) -> MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serves one client until it closes the connection.
fn handle_connection(stream: TcpStream, state: Arc<Mutex<ServerState>>) -> Result<(), TransportError> {
    let peer = stream.peer_addr()?;
    let mut transport = ProtocolTransport::new(stream);
    let mut negotiated = None;

    loop {
        let request = match transport.read_request() {
            Ok(request) => request,
            Err(err) if err.is_io() => {
                debug!("client {peer} went away");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        trace!("received {} from {peer}", request.name());

        let response = match request {
            Request::Handshake { protocol_version } => {
                match lock(&state).negotiate(protocol_version) {
                    Ok(version) => {
                        debug!("client {peer} speaks {version}");
                        negotiated = Some(version);
                        Response::Handshake {
                            protocol_version: version.as_u8(),
                        }
                    }
                    Err(failure) => failure.into(),
                }
            }
            Request::CloseConnection => {
                transport.write_response(&Response::ConnectionClosed)?;
                debug!("client {peer} closed the connection");
                return Ok(());
            }
            request if negotiated.is_none() => Failure::new(
                ResponseError::Protocol,
                format!("{} sent before handshake", request.name()),
            )
            .into(),
            request => lock(&state).handle(request),
        };
        transport.write_response(&response)?;
    }
}

/// Listening socket plus the shared server state.
pub struct ReferenceServer {
    listener: TcpListener,
    state: Arc<Mutex<ServerState>>,
    pool: ThreadPool,
    stop: Arc<AtomicBool>,
}

impl ReferenceServer {
    pub fn bind(address: impl ToSocketAddrs, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        let pool = ThreadPool::new(config.workers);
        Ok(Self {
            listener,
            state: Arc::new(Mutex::new(ServerState::new(config))),
            pool,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the server is shut down through a
    /// [`ServerHandle`].
    pub fn listen(self) {
        let address = self.listener.local_addr().ok();
        info!("listening at {address:?} with {} workers", self.pool.size());

        for stream in self.listener.incoming() {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let state = Arc::clone(&self.state);
                    self.pool.execute(move || {
                        if let Err(err) = handle_connection(stream, state) {
                            warn!("connection failed: {err}");
                        }
                    });
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        info!("server at {address:?} stopped accepting connections");
    }

    /// Runs [`ReferenceServer::listen`] on a background thread.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let address = self.local_addr()?;
        let handle = ServerHandle {
            address,
            state: Arc::clone(&self.state),
            stop: Arc::clone(&self.stop),
        };
        std::thread::Builder::new()
            .name(format!("hs2-server-{}", address.port()))
            .spawn(move || self.listen())?;
        Ok(handle)
    }
}

/// Control handle for a spawned server. Dropping it stops the listener.
pub struct ServerHandle {
    address: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    stop: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.address
    }

    pub fn host(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Forgets every session and operation, as an idle sweep or restart would.
    pub fn invalidate_sessions(&self) {
        lock(&self.state).invalidate_all();
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    pub fn operation_count(&self) -> usize {
        lock(&self.state).operations.len()
    }

    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut wake = self.address;
        if wake.ip().is_unspecified() {
            wake.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        // unblocks accept()
        if let Err(err) = TcpStream::connect(wake) {
            debug!("could not wake listener at {wake}: {err}");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
