//! Shared helpers for the integration tests.
//!
//! Every test starts its own in-process reference server on an ephemeral
//! loopback port, so tests are independent and can run in parallel.
#![allow(dead_code)]

use hs2client::{
    Batch, ProtocolVersion, Service, Session, Value,
    server::{ReferenceServer, ServerConfig, ServerHandle},
};

pub const TEST_USER: &str = "hs2test";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn start_server(config: ServerConfig) -> ServerHandle {
    init_logging();
    ReferenceServer::bind("127.0.0.1:0", config)
        .expect("bind reference server")
        .spawn()
        .expect("spawn reference server")
}

pub fn start_default_server() -> ServerHandle {
    start_server(ServerConfig::default())
}

pub fn connect(server: &ServerHandle) -> Service {
    connect_at(server, ProtocolVersion::LATEST)
}

pub fn connect_at(server: &ServerHandle, version: ProtocolVersion) -> Service {
    hs2client::connect("127.0.0.1", server.port(), TEST_USER, version).expect("connect")
}

pub fn open_session(server: &ServerHandle) -> Session {
    connect(server).open_session().expect("open session")
}

/// Runs `sql` to completion, panicking on failure.
pub fn run(session: &Session, sql: &str) {
    session
        .execute_sync(sql)
        .unwrap_or_else(|e| panic!("{sql}: {e}"));
}

/// Column `index` of every batch as text, in fetch order.
pub fn strings(batches: &[Batch], index: usize) -> Vec<Option<String>> {
    batches
        .iter()
        .flat_map(|batch| {
            (0..batch.num_rows()).map(move |row| {
                batch
                    .value(row, index)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
        })
        .collect()
}

/// Column `index` of every batch as integers, in fetch order.
pub fn ints(batches: &[Batch], index: usize) -> Vec<Option<i64>> {
    batches
        .iter()
        .flat_map(|batch| {
            (0..batch.num_rows()).map(move |row| batch.value(row, index).and_then(|v| v.as_i64()))
        })
        .collect()
}

pub fn values<'a>(batch: &'a Batch, index: usize) -> Vec<Option<Value<'a>>> {
    (0..batch.num_rows())
        .map(|row| batch.value(row, index))
        .collect()
}
