//! Connection setup and the [`Service`] entry point.
//!
//! A [`Service`] owns one TCP connection to the query service. Sessions and
//! operations derived from it share that connection through an [`Arc`], so
//! the socket stays open until the last of them is dropped, whichever order
//! the caller releases them in.
use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, info, trace, warn};

use crate::{
    config::{ClientConfig, SessionConfig},
    error::{Error, Result},
    protocol::{ProtocolTransport, ProtocolVersion, Request, Response},
    session::Session,
};

/// Shared RPC channel. One request/response round trip at a time.
pub(crate) struct Connection {
    transport: Mutex<ProtocolTransport<TcpStream>>,
    peer: SocketAddr,
    protocol_version: ProtocolVersion,
    config: ClientConfig,
    broken: AtomicBool,
    closed: AtomicBool,
}

impl Connection {
    fn open(
        host: &str,
        port: u16,
        requested: ProtocolVersion,
        config: ClientConfig,
    ) -> Result<Self> {
        let stream = connect_stream(host, port, &config)?;
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.rpc_timeout)?;
        stream.set_write_timeout(config.rpc_timeout)?;

        let mut transport = ProtocolTransport::new(stream);
        let request = Request::Handshake {
            protocol_version: requested.as_u8(),
        };
        transport.write_request(&request)?;
        let protocol_version = match transport.read_response()? {
            Response::Handshake { protocol_version } => {
                negotiated_version(requested, protocol_version)?
            }
            Response::Err { code, description } => {
                return Err(Error::from_response(code, description));
            }
            other => return Err(Error::unexpected(request.name(), &other)),
        };

        info!("connected to {peer} using protocol {protocol_version}");
        Ok(Self {
            transport: Mutex::new(transport),
            peer,
            protocol_version,
            config,
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Sends `request` and waits for its response.
    ///
    /// `Response::Err` is turned into the matching [`Error`]. A transport
    /// failure leaves the stream mid-frame, so the connection refuses any
    /// further calls afterwards.
    pub(crate) fn call(&self, request: Request) -> Result<Response> {
        if self.broken.load(Ordering::Acquire) {
            return Err(Error::Connection(format!(
                "connection to {} is broken",
                self.peer
            )));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Connection(format!(
                "connection to {} is closed",
                self.peer
            )));
        }

        trace!("rpc {} -> {}", request.name(), self.peer);
        let mut transport = self
            .transport
            .lock()
            .map_err(|_| Error::Connection("connection lock poisoned".into()))?;

        let response = transport
            .write_request(&request)
            .and_then(|()| transport.read_response());
        match response {
            Ok(Response::Err { code, description }) => {
                trace!("rpc {} failed: {code:?} {description}", request.name());
                Err(Error::from_response(code, description))
            }
            Ok(response) => Ok(response),
            Err(err) => {
                self.broken.store(true, Ordering::Release);
                Err(err.into())
            }
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) || self.broken.load(Ordering::Acquire) {
            return Ok(());
        }
        let request = Request::CloseConnection;
        let name = request.name();
        let response = self.call(request);
        self.closed.store(true, Ordering::Release);
        match response? {
            Response::ConnectionClosed => {
                debug!("connection to {} closed", self.peer);
                Ok(())
            }
            other => Err(Error::unexpected(name, &other)),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("failed to close connection to {}: {err}", self.peer);
        }
    }
}

fn connect_stream(host: &str, port: u16, config: &ClientConfig) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("cannot resolve {host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!("connect to {addr} failed: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(match last_err {
        Some(err) => Error::Connection(format!("cannot connect to {host}:{port}: {err}")),
        None => Error::Connection(format!("{host}:{port} resolved to no addresses")),
    })
}

/// Checks a version offered by the server against the one requested.
pub(crate) fn negotiated_version(requested: ProtocolVersion, offered: u8) -> Result<ProtocolVersion> {
    let offered = ProtocolVersion::try_from(offered)
        .map_err(|v| Error::Protocol(format!("server offered unknown protocol version {v}")))?;
    if offered > requested {
        return Err(Error::Protocol(format!(
            "server upgraded protocol from {requested} to {offered}"
        )));
    }
    Ok(offered)
}

/// Top-level handle to a HiveServer2-compatible query service.
pub struct Service {
    conn: Arc<Connection>,
    user: String,
}

impl Service {
    /// Connects with the default [`ClientConfig`].
    pub fn connect(host: &str, port: u16, user: &str, version: ProtocolVersion) -> Result<Self> {
        Self::connect_with_config(host, port, user, version, ClientConfig::default())
    }

    /// Opens the connection and negotiates the protocol version.
    ///
    /// The server may answer with an older version than `version`; every
    /// later call uses the negotiated one.
    pub fn connect_with_config(
        host: &str,
        port: u16,
        user: &str,
        version: ProtocolVersion,
        config: ClientConfig,
    ) -> Result<Self> {
        let conn = Connection::open(host, port, version, config)?;
        Ok(Self {
            conn: Arc::new(conn),
            user: user.to_string(),
        })
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.conn.protocol_version()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer
    }

    pub fn config(&self) -> &ClientConfig {
        self.conn.config()
    }

    pub fn open_session(&self) -> Result<Session> {
        self.open_session_with(&SessionConfig::default())
    }

    /// Opens a session, sending `config`'s options to the server.
    pub fn open_session_with(&self, config: &SessionConfig) -> Result<Session> {
        Session::open(Arc::clone(&self.conn), &self.user, config)
    }

    /// Round trip that touches no session.
    pub fn ping(&self) -> Result<()> {
        let request = Request::Ping { session: None };
        let name = request.name();
        match self.conn.call(request)? {
            Response::Pong => Ok(()),
            other => Err(Error::unexpected(name, &other)),
        }
    }

    /// Releases this handle's share of the connection.
    ///
    /// The connection closes now when nothing else holds it. Otherwise it
    /// closes when the last live session or operation is dropped.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(conn) => conn.shutdown(),
            Err(shared) => {
                debug!(
                    "deferring close of {}: {} sessions or operations still hold it",
                    shared.peer,
                    Arc::strong_count(&shared) - 1
                );
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("peer", &self.conn.peer)
            .field("user", &self.user)
            .field("protocol_version", &self.conn.protocol_version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_may_downgrade() {
        let version = negotiated_version(ProtocolVersion::V7, 5).unwrap();
        assert_eq!(version, ProtocolVersion::V5);
    }

    #[test]
    fn server_may_not_upgrade() {
        let err = negotiated_version(ProtocolVersion::V3, 6).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn unknown_version_is_protocol_error() {
        let err = negotiated_version(ProtocolVersion::V7, 42).unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("42")));
    }

    #[test]
    fn unreachable_host_is_connection_error() {
        let config = ClientConfig::default().with_connect_timeout(std::time::Duration::from_millis(200));
        let err = Service::connect_with_config("127.0.0.1", 1, "u", ProtocolVersion::LATEST, config)
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "{err:?}");
    }
}
