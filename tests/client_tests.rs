mod common;

use std::{thread, time::Duration};

use common::{
    TEST_USER, connect, connect_at, ints, open_session, run, start_default_server, start_server,
    strings, values,
};
use hs2client::{
    ColumnType, Decimal, Error, OperationState, PrimitiveType, ProtocolVersion, Service,
    SessionConfig, Timestamp, Value, server::ServerConfig,
};

const ALL_TYPES: &str = "CREATE TABLE all_types (
    f0 tinyint COMMENT 'f0', f1 smallint COMMENT 'f1', f2 int COMMENT 'f2',
    f3 bigint COMMENT 'f3', f4 float COMMENT 'f4', f5 double COMMENT 'f5',
    f6 char(10) COMMENT 'f6', f7 varchar(20) COMMENT 'f7', f8 string COMMENT 'f8',
    f9 decimal(12, 2) COMMENT 'f9', f10 timestamp COMMENT 'f10', f11 boolean COMMENT 'f11')";

#[test]
fn result_metadata_matches_declared_types() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, ALL_TYPES);

    let mut operation = session.execute_sync("SELECT * FROM all_types").unwrap();
    let schema = operation.schema().unwrap();

    assert_eq!(schema.ncolumns(), 12);
    let names: Vec<_> = schema.iter().map(|c| c.column_type().name()).collect();
    assert_eq!(
        names,
        vec![
            "TINYINT", "SMALLINT", "INT", "BIGINT", "FLOAT", "DOUBLE", "CHAR", "VARCHAR",
            "STRING", "DECIMAL", "TIMESTAMP", "BOOLEAN"
        ]
    );
    for (i, column) in schema.iter().enumerate() {
        assert_eq!(column.name(), format!("f{i}"));
        assert_eq!(column.comment(), Some(format!("f{i}").as_str()));
    }

    assert_eq!(schema[9].column_type().precision(), Some(12));
    assert_eq!(schema[9].column_type().scale(), Some(2));
    assert_eq!(schema[6].column_type().max_length(), Some(10));
    assert_eq!(schema[7].column_type().max_length(), Some(20));
    assert_eq!(schema[2].column_type().precision(), None);
}

#[test]
fn null_indicators_match_inserted_rows() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, ALL_TYPES);
    run(
        &session,
        "INSERT INTO all_types VALUES
            (1, 2, 3, 4, 5.0, 5.0, 'a', 'b', 'c', 1.5, '2000-01-01 12:34:56.123456', true),
            (NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL, NULL)",
    );

    let mut operation = session.execute_sync("SELECT * FROM all_types").unwrap();
    let batch = operation.fetch_batch(16).unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.num_columns(), 12);

    for column in batch.columns() {
        assert_eq!(column.nulls(), &[false, true]);
        assert_eq!(column.null_count(), 1);
    }

    assert_eq!(
        batch.row(0),
        vec![
            Some(Value::TinyInt(1)),
            Some(Value::SmallInt(2)),
            Some(Value::Int(3)),
            Some(Value::BigInt(4)),
            Some(Value::Float(5.0)),
            Some(Value::Double(5.0)),
            Some(Value::String(b"a")),
            Some(Value::String(b"b")),
            Some(Value::String(b"c")),
            Some(Value::Decimal(Decimal::new(150, 2))),
            Some(Value::Timestamp(Timestamp::from_micros(946_730_096_123_456))),
            Some(Value::Boolean(true)),
        ]
    );
    assert!(batch.row(1).iter().all(Option::is_none));
}

#[test]
fn batches_preserve_row_order_and_nulls() {
    const ROWS: usize = 10;
    const BATCH: usize = 4;

    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE numbers (id int, label string, ratio double)");

    let rows: Vec<String> = (0..ROWS)
        .map(|i| {
            let label = if i % 3 == 0 {
                "NULL".to_string()
            } else {
                format!("'row {i}'")
            };
            format!("({i}, {label}, {i}.5)")
        })
        .collect();
    run(&session, &format!("INSERT INTO numbers VALUES {}", rows.join(", ")));

    let mut operation = session.execute_sync("SELECT id, label FROM numbers").unwrap();
    let mut batches = Vec::new();
    loop {
        let batch = operation.fetch_batch(BATCH).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.num_rows() <= BATCH);
        batches.push(batch);
    }

    let sizes: Vec<_> = batches.iter().map(|b| b.num_rows()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(operation.rows_fetched(), ROWS as u64);

    let ids = ints(&batches, 0);
    assert_eq!(ids, (0..ROWS as i64).map(Some).collect::<Vec<_>>());

    let labels = strings(&batches, 1);
    for (i, label) in labels.iter().enumerate() {
        if i % 3 == 0 {
            assert_eq!(*label, None, "row {i}");
        } else {
            assert_eq!(label.as_deref(), Some(format!("row {i}").as_str()));
        }
    }
}

#[test]
fn fetch_after_exhaustion_keeps_returning_empty_batches() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE t (a int)");
    run(&session, "INSERT INTO t VALUES (1), (2)");

    let mut operation = session.execute_sync("SELECT * FROM t").unwrap();
    assert_eq!(operation.fetch_all(16).unwrap().len(), 1);
    for _ in 0..3 {
        let batch = operation.fetch_batch(16).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 1);
    }
    assert_eq!(operation.rows_fetched(), 2);
}

#[test]
fn exhausted_operation_survives_session_close() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE t (a int)");
    run(&session, "INSERT INTO t VALUES (1), (2)");

    let mut operation = session.execute_sync("SELECT * FROM t").unwrap();
    operation.fetch_all(8).unwrap();
    assert!(operation.is_exhausted());
    assert!(operation.fetch_batch(8).unwrap().is_empty());

    session.close().unwrap();
    let batch = operation.fetch_batch(8).unwrap();
    assert_eq!(batch.num_rows(), 0);
    assert_eq!(batch.num_columns(), 1);
}

#[test]
fn zero_row_limit_does_not_consume_rows() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE t (a int)");
    run(&session, "INSERT INTO t VALUES (1), (2)");

    let mut operation = session.execute_sync("SELECT * FROM t").unwrap();
    assert!(operation.fetch_batch(0).unwrap().is_empty());
    assert!(!operation.is_exhausted());
    assert_eq!(operation.rows_fetched(), 0);

    assert_eq!(operation.fetch_batch(8).unwrap().num_rows(), 2);
    assert_eq!(operation.rows_fetched(), 2);
}

#[test]
fn empty_table_yields_shaped_empty_batch() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE empty (a int, b string)");

    let mut operation = session.execute_sync("SELECT * FROM empty").unwrap();
    let batch = operation.fetch_batch(8).unwrap();
    assert!(batch.is_empty());
    assert_eq!(batch.num_columns(), 2);
    assert_eq!(batch.schema().ncolumns(), 2);
}

#[test]
fn decimal_and_timestamp_values() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE exact (d decimal(12, 2), ts timestamp)");
    run(
        &session,
        "INSERT INTO exact VALUES
            (-1.5, '2000-01-01 12:34:56.123456'),
            (NULL, '2001-01-01'),
            (0, NULL),
            (1.5, '2001-01-01 00:00:01.5')",
    );

    let mut operation = session.execute_sync("SELECT * FROM exact").unwrap();
    let batch = operation.fetch_batch(16).unwrap();

    assert_eq!(
        values(&batch, 0),
        vec![
            Some(Value::Decimal(Decimal::new(-150, 2))),
            None,
            Some(Value::Decimal(Decimal::new(0, 2))),
            Some(Value::Decimal(Decimal::new(150, 2))),
        ]
    );
    assert_eq!(
        values(&batch, 1),
        vec![
            Some(Value::Timestamp(Timestamp::from_micros(946_730_096_123_456))),
            Some(Value::Timestamp(Timestamp::from_micros(978_307_200_000_000))),
            None,
            Some(Value::Timestamp(Timestamp::from_micros(978_307_201_500_000))),
        ]
    );
}

#[test]
fn execute_returns_running_and_fetch_waits_for_finish() {
    let server = start_server(
        ServerConfig::default().with_execution_delay(Duration::from_millis(500)),
    );
    let session = open_session(&server);
    run(&session, "CREATE TABLE t (a int)");

    let mut operation = session.execute("SELECT * FROM t").unwrap();
    assert_eq!(operation.state(), OperationState::Running);
    assert!(operation.has_result_set());
    assert!(matches!(operation.fetch_batch(10), Err(Error::NotReady(_))));
    let err = operation.schema().unwrap_err();
    assert!(matches!(err, Error::NotReady(_)), "{err:?}");
    assert!(err.is_retryable());

    assert_eq!(operation.wait(None).unwrap(), OperationState::Finished);
    assert_eq!(operation.schema().unwrap().ncolumns(), 1);
    assert!(operation.fetch_batch(10).unwrap().is_empty());
}

#[test]
fn metadata_can_arrive_before_finish() {
    let server = start_server(
        ServerConfig::default()
            .with_execution_delay(Duration::from_secs(1))
            .with_metadata_before_finish(true),
    );
    let session = open_session(&server);
    run(&session, "CREATE TABLE t (a int, b decimal(5, 1))");

    let mut operation = session.execute("SELECT b FROM t").unwrap();
    let schema = operation.schema().unwrap();
    assert_eq!(operation.state(), OperationState::Running);
    assert_eq!(schema.ncolumns(), 1);
    assert_eq!(
        *schema[0].column_type(),
        ColumnType::Decimal {
            precision: 5,
            scale: 1
        }
    );
    operation.cancel().unwrap();
}

#[test]
fn cancel_stops_pending_statement() {
    let server = start_server(
        ServerConfig::default().with_execution_delay(Duration::from_secs(5)),
    );
    let session = open_session(&server);

    let mut operation = session.execute("CREATE DATABASE never").unwrap();
    operation.cancel().unwrap();
    assert_eq!(operation.state(), OperationState::Canceled);
    assert_eq!(operation.poll_status().unwrap(), OperationState::Canceled);
    operation.cancel().unwrap();
    assert!(!session.database_exists("never").unwrap());

    let mut query = session.execute("SELECT * FROM missing").unwrap();
    query.cancel().unwrap();
    assert!(matches!(query.fetch_batch(10), Err(Error::Canceled)));
    assert!(query.log().unwrap().contains("canceled"));
}

#[test]
fn cancel_after_finish_is_a_no_op() {
    let server = start_default_server();
    let session = open_session(&server);

    let mut operation = session.execute_sync("SHOW DATABASES").unwrap();
    operation.cancel().unwrap();
    assert_eq!(operation.state(), OperationState::Finished);
    assert_eq!(strings(&operation.fetch_all(8).unwrap(), 0), vec![Some("default".to_string())]);
}

#[test]
fn execute_sync_timeout_cancels_operation() {
    let server = start_server(
        ServerConfig::default().with_execution_delay(Duration::from_secs(5)),
    );
    let session = open_session(&server);

    let err = session
        .execute_sync_timeout("CREATE DATABASE slow", Some(Duration::from_millis(200)))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(200)));

    assert!(!session.database_exists("slow").unwrap());
    assert_eq!(server.operation_count(), 0);
}

#[test]
fn operations_outlive_dropped_service() {
    let server = start_default_server();
    let service = connect(&server);
    let session = service.open_session().unwrap();
    run(&session, "CREATE TABLE t (a int)");
    run(&session, "INSERT INTO t VALUES (7)");

    let mut operation = session.execute("SELECT a FROM t").unwrap();
    drop(service);
    drop(session);

    assert_eq!(operation.wait(None).unwrap(), OperationState::Finished);
    let batches = operation.fetch_all(4).unwrap();
    assert_eq!(ints(&batches, 0), vec![Some(7)]);

    drop(operation);
    assert_eq!(server.session_count(), 0);
}

#[test]
fn service_close_defers_while_sessions_live() {
    let server = start_default_server();
    let service = connect(&server);
    let session = service.open_session().unwrap();

    service.close().unwrap();
    assert!(session.ping().unwrap());
    run(&session, "CREATE DATABASE still_here");
    assert!(session.database_exists("still_here").unwrap());

    let idle = connect(&server);
    idle.close().unwrap();
}

#[test]
fn session_close_invalidates_operations() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE TABLE t (a int)");
    run(&session, "INSERT INTO t VALUES (1), (2), (3)");

    let mut operation = session.execute_sync("SELECT * FROM t").unwrap();
    assert_eq!(operation.fetch_batch(1).unwrap().num_rows(), 1);

    session.close().unwrap();
    assert!(!session.is_open());
    assert!(matches!(operation.fetch_batch(1), Err(Error::InvalidHandle(_))));
    assert!(matches!(session.execute("SHOW TABLES"), Err(Error::InvalidHandle(_))));
    assert!(!session.ping().unwrap());
    session.close().unwrap();
    assert_eq!(server.session_count(), 0);
}

#[test]
fn idle_sessions_expire() {
    let server = start_server(
        ServerConfig::default().with_session_idle_timeout(Some(Duration::from_millis(200))),
    );
    let session = open_session(&server);
    assert!(session.ping().unwrap());

    thread::sleep(Duration::from_millis(400));
    assert!(!session.ping().unwrap());
    assert!(matches!(session.execute("SHOW TABLES"), Err(Error::InvalidHandle(_))));
}

#[test]
fn server_side_invalidation_is_reported() {
    let server = start_default_server();
    let session = open_session(&server);
    let mut operation = session.execute("SHOW DATABASES").unwrap();

    server.invalidate_sessions();
    let err = operation.poll_status().unwrap_err();
    assert!(matches!(err, Error::InvalidHandle(_)), "{err:?}");
    assert!(!err.is_retryable());
}

#[test]
fn server_may_downgrade_protocol() {
    let server = start_server(
        ServerConfig::default().with_protocol_range(ProtocolVersion::V1, ProtocolVersion::V5),
    );
    let service = connect(&server);
    assert_eq!(service.protocol_version(), ProtocolVersion::V5);

    let session = service.open_session().unwrap();
    assert_eq!(session.protocol_version(), ProtocolVersion::V5);

    let older = connect_at(&server, ProtocolVersion::V2);
    assert_eq!(older.protocol_version(), ProtocolVersion::V2);
}

#[test]
fn too_old_protocol_is_rejected() {
    let server = start_server(
        ServerConfig::default().with_protocol_range(ProtocolVersion::V4, ProtocolVersion::V7),
    );
    let err = hs2client::connect("127.0.0.1", server.port(), TEST_USER, ProtocolVersion::V3)
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err:?}");
}

#[test]
fn old_protocol_uses_default_qualifiers() {
    let server = start_server(
        ServerConfig::default().with_protocol_range(ProtocolVersion::V1, ProtocolVersion::V3),
    );
    let session = open_session(&server);
    run(&session, "CREATE TABLE q (d decimal(12, 2), c char(10), v varchar(20))");
    run(&session, "INSERT INTO q VALUES (1.5, 'x', 'y')");

    let mut operation = session.execute_sync("SELECT * FROM q").unwrap();
    let schema = operation.schema().unwrap();
    assert_eq!(schema[0].column_type().precision(), Some(10));
    assert_eq!(schema[0].column_type().scale(), Some(0));
    assert_eq!(schema[1].column_type().max_length(), Some(255));
    assert_eq!(schema[2].column_type().max_length(), Some(65535));

    assert!(schema[0].has_default_qualifiers());

    let batch = operation.fetch_batch(4).unwrap();
    assert_eq!(
        batch.row(0),
        vec![
            Some(Value::Decimal(Decimal::new(150, 2))),
            Some(Value::String(b"x")),
            Some(Value::String(b"y")),
        ]
    );
}

#[test]
fn decimals_round_trip_without_qualifiers() {
    let server = start_server(
        ServerConfig::default().with_protocol_range(ProtocolVersion::V1, ProtocolVersion::V3),
    );
    let session = open_session(&server);
    run(&session, "CREATE TABLE q (d decimal(12, 2))");
    run(&session, "INSERT INTO q VALUES (1.5), (NULL), (-20), (0.05)");

    let mut operation = session.execute_sync("SELECT d FROM q").unwrap();
    let batches = operation.fetch_all(4).unwrap();
    assert_eq!(
        values(&batches[0], 0),
        vec![
            Some(Value::Decimal(Decimal::new(150, 2))),
            None,
            Some(Value::Decimal(Decimal::new(-2000, 2))),
            Some(Value::Decimal(Decimal::new(5, 2))),
        ]
    );
}

#[test]
fn error_details_depend_on_protocol() {
    let server = start_server(
        ServerConfig::default().with_protocol_range(ProtocolVersion::V1, ProtocolVersion::V4),
    );
    let session = open_session(&server);
    match session.execute_sync("SELECT * FROM missing") {
        Err(Error::Query { message }) => {
            assert!(message.contains("no error details"), "{message}")
        }
        other => panic!("unexpected {other:?}"),
    }

    let server = start_default_server();
    let session = open_session(&server);
    let mut operation = session.execute("SELECT * FROM missing").unwrap();
    assert_eq!(operation.wait(None).unwrap(), OperationState::Error);
    assert!(operation.error_message().is_some_and(|m| m.contains("missing")));
    assert!(matches!(operation.fetch_batch(1), Err(Error::Query { .. })));
}

#[test]
fn statements_without_results() {
    let server = start_default_server();
    let session = open_session(&server);

    let mut operation = session.execute_sync("CREATE TABLE ddl (a int)").unwrap();
    assert!(!operation.has_result_set());
    assert!(matches!(operation.fetch_batch(10), Err(Error::NoResultSet)));
    assert!(matches!(operation.schema(), Err(Error::NoResultSet)));
    assert!(operation.log().unwrap().contains("created table ddl"));
}

#[test]
fn syntax_errors_fail_at_submit() {
    let server = start_default_server();
    let session = open_session(&server);
    let err = session.execute("SELEC * FROM t").unwrap_err();
    assert!(matches!(err, Error::Query { .. }), "{err:?}");
}

#[test]
fn catalog_lookups() {
    let server = start_default_server();
    let session = open_session(&server);
    run(&session, "CREATE DATABASE sales");
    run(&session, "CREATE TABLE sales.orders (id bigint COMMENT 'order id', total decimal(10, 2))");
    run(&session, "CREATE TABLE sales.customers (id bigint)");

    let mut databases = session.get_databases("%").unwrap();
    databases.wait(None).unwrap();
    let batches = databases.fetch_all(16).unwrap();
    assert_eq!(
        strings(&batches, 0),
        vec![Some("default".to_string()), Some("sales".to_string())]
    );

    assert!(session.database_exists("sales").unwrap());
    assert!(session.database_exists("SALES").unwrap());
    assert!(!session.database_exists("sale").unwrap());
    assert!(session.table_exists("orders", "sales").unwrap());
    assert!(!session.table_exists("orders", "default").unwrap());

    let mut tables = session.get_tables("sales", "c%").unwrap();
    tables.wait(None).unwrap();
    let schema = tables.schema().unwrap();
    let name = schema.index_of("TABLE_NAME").unwrap();
    assert_eq!(
        strings(&tables.fetch_all(16).unwrap(), name),
        vec![Some("customers".to_string())]
    );

    let mut columns = session.get_table_schema("orders", "sales").unwrap();
    columns.wait(None).unwrap();
    let schema = columns.schema().unwrap();
    let batches = columns.fetch_all(16).unwrap();
    assert_eq!(
        strings(&batches, schema.index_of("COLUMN_NAME").unwrap()),
        vec![Some("id".to_string()), Some("total".to_string())]
    );
    assert_eq!(
        strings(&batches, schema.index_of("TYPE_NAME").unwrap()),
        vec![Some("BIGINT".to_string()), Some("DECIMAL(10,2)".to_string())]
    );
    assert_eq!(
        strings(&batches, schema.index_of("REMARKS").unwrap()),
        vec![Some("order id".to_string()), None]
    );
    assert_eq!(
        *schema[schema.index_of("ORDINAL_POSITION").unwrap()].column_type(),
        ColumnType::Primitive(PrimitiveType::Int)
    );

    let mut missing = session.get_table_schema("nope", "sales").unwrap();
    assert_eq!(missing.wait(None).unwrap(), OperationState::Error);
}

#[test]
fn session_options_select_database() {
    let server = start_default_server();
    let service = connect(&server);
    let session = service.open_session().unwrap();
    run(&session, "CREATE DATABASE sales");
    run(&session, "CREATE TABLE sales.orders (id int)");
    run(&session, "INSERT INTO sales.orders VALUES (42)");

    let scoped = service
        .open_session_with(&SessionConfig::new().use_database("sales"))
        .unwrap();
    let mut operation = scoped.execute_sync("SELECT id FROM orders").unwrap();
    assert_eq!(ints(&operation.fetch_all(8).unwrap(), 0), vec![Some(42)]);

    run(&session, "USE sales");
    let mut operation = session.execute_sync("SHOW TABLES").unwrap();
    assert_eq!(
        strings(&operation.fetch_all(8).unwrap(), 0),
        vec![Some("orders".to_string())]
    );

    let err = service
        .open_session_with(&SessionConfig::new().use_database("nowhere"))
        .unwrap_err();
    assert!(matches!(err, Error::Session(_)), "{err:?}");
}

#[test]
fn rejected_users_cannot_open_sessions() {
    let server = start_server(ServerConfig::default().with_rejected_user("mallory"));

    let service =
        Service::connect("127.0.0.1", server.port(), "mallory", ProtocolVersion::LATEST).unwrap();
    assert!(matches!(service.open_session(), Err(Error::Session(_))));
    service.ping().unwrap();

    let anonymous =
        Service::connect("127.0.0.1", server.port(), "", ProtocolVersion::LATEST).unwrap();
    assert!(matches!(anonymous.open_session(), Err(Error::Session(_))));
}

#[test]
fn dropped_handles_release_server_state() {
    let server = start_default_server();
    let session = open_session(&server);
    let operation = session.execute_sync("SHOW DATABASES").unwrap();
    assert_eq!(server.session_count(), 1);
    assert_eq!(server.operation_count(), 1);

    drop(operation);
    assert_eq!(server.operation_count(), 0);
    drop(session);
    assert_eq!(server.session_count(), 0);
}

#[test]
fn sessions_on_separate_threads() {
    let server = start_default_server();
    run(&open_session(&server), "CREATE TABLE shared (worker int)");

    let port = server.port();
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            thread::spawn(move || {
                let service =
                    hs2client::connect("127.0.0.1", port, TEST_USER, ProtocolVersion::LATEST)
                        .unwrap();
                let session = service.open_session().unwrap();
                session
                    .execute_sync(&format!("INSERT INTO shared VALUES ({worker})"))
                    .unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let session = open_session(&server);
    let mut operation = session.execute_sync("SELECT worker FROM shared").unwrap();
    let mut seen = ints(&operation.fetch_all(2).unwrap(), 0);
    seen.sort();
    assert_eq!(seen, vec![Some(0), Some(1), Some(2), Some(3)]);
}
