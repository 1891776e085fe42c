//! Synchronous client for HiveServer2-compatible SQL services.
//!
//! ```no_run
//! use hs2client::ProtocolVersion;
//!
//! # fn main() -> hs2client::Result<()> {
//! let service = hs2client::connect("localhost", 21050, "analyst", ProtocolVersion::LATEST)?;
//! let session = service.open_session()?;
//!
//! let mut operation = session.execute_sync("SELECT * FROM sales")?;
//! let schema = operation.schema()?;
//! println!("{} columns", schema.ncolumns());
//!
//! loop {
//!     let batch = operation.fetch_batch(1024)?;
//!     if batch.is_empty() {
//!         break;
//!     }
//!     println!("{} rows", batch.num_rows());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Results arrive as columnar [`Batch`]es typed by the operation's
//! [`Schema`]. Sessions and operations keep the connection alive on their
//! own, so a [`Service`] may be dropped while they are still in use.
pub mod batch;
pub mod config;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod service;
pub mod session;
pub mod types;

pub use batch::{Batch, Column, ColumnValues, Value};
pub use config::{ClientConfig, PollBackoff, SessionConfig};
pub use error::{Error, Result};
pub use operation::Operation;
pub use protocol::{OperationState, ProtocolVersion};
pub use schema::{ColumnDescriptor, Schema};
pub use service::Service;
pub use session::Session;
pub use types::{ColumnType, Decimal, PrimitiveType, Timestamp};

/// Connects to `host:port` as `user`, negotiating down from `version`.
pub fn connect(host: &str, port: u16, user: &str, version: ProtocolVersion) -> Result<Service> {
    Service::connect(host, port, user, version)
}
