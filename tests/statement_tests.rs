//! Statement, batch and lifecycle tests over a scripted transport.

mod common;

use std::sync::Barrier;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Reply, fake_connection, init_logging};
use taos_driver::statement::{GeneratedKeys, Holdability, ResultSetConcurrency, ResultSetType};
use taos_driver::{BatchOutcome, ColumnDescriptor, FetchDirection, ResultDisposition, TaosType, TransportKind, Value};

fn weather_reply() -> Reply {
    Reply::Rows(
        vec![
            ColumnDescriptor::new("ts", TaosType::Timestamp),
            ColumnDescriptor::new("v", TaosType::Float),
            ColumnDescriptor::new("loc", TaosType::NChar).with_length(64),
        ],
        vec![vec![
            Value::Timestamp(taos_driver::Timestamp::from_millis(1_700_000_000_000)),
            Value::Float(1.5),
            Value::NChar("x".to_string()),
        ]],
    )
}

const CREATE_DB: &str = "create database if not exists d1";
const CREATE_STABLE: &str = "create table if not exists d1.w(ts timestamp, v float) tags(loc nchar(64))";
const INSERT: &str = "insert into d1.t1 using d1.w tags('x') values(now, 1.5)";
const SELECT: &str = "select * from d1.w";
const DROP_DB: &str = "drop database if exists d1";

fn codes(outcomes: &[BatchOutcome]) -> Vec<i64> {
    outcomes.iter().map(BatchOutcome::code).collect()
}

#[test]
fn test_create_insert_select_drop() {
    init_logging();
    let (conn, state) = fake_connection();
    state.reply(INSERT, Reply::Affected(1));
    state.reply(SELECT, weather_reply());

    let stmt = conn.create_statement().unwrap();
    assert_eq!(stmt.execute_update(CREATE_DB).unwrap(), 0);
    assert_eq!(stmt.execute_update(CREATE_STABLE).unwrap(), 0);
    assert_eq!(stmt.execute_update(INSERT).unwrap(), 1);

    let rs = stmt.execute_query(SELECT).unwrap();
    let names: Vec<&str> = rs.metadata().columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["ts", "v", "loc"]);
    let mut rows = 0;
    while rs.next().unwrap() {
        rows += 1;
        let v = rs.get_f32("v").unwrap().unwrap();
        assert!((v - 1.5).abs() < f32::EPSILON);
        assert_eq!(rs.get_string(2).unwrap().as_deref(), Some("x"));
    }
    assert_eq!(rows, 1);

    assert_eq!(stmt.execute_update(DROP_DB).unwrap(), 0);
    assert!(rs.is_closed());
    assert_eq!(state.executed().len(), 5);
}

#[test]
fn test_rows_and_count_are_exclusive() {
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());
    state.reply("insert into t values(now, 2.5)", Reply::Affected(1));
    let stmt = conn.create_statement().unwrap();

    assert!(stmt.execute("select * from t").unwrap());
    assert_eq!(stmt.update_count().unwrap(), -1);
    let rs = stmt.result_set().unwrap().expect("rows result");

    assert!(!stmt.execute("insert into t values(now, 2.5)").unwrap());
    assert!(stmt.result_set().unwrap().is_none());
    assert_eq!(stmt.update_count().unwrap(), 1);
    // The previous result set was closed by the new execute.
    assert!(rs.is_closed());
    assert!(rs.next().unwrap_err().is_result_set_closed());
    assert_eq!(state.released(), 1);
}

#[test]
fn test_execute_query_rejects_counts() {
    let (conn, _state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    let err = stmt.execute_query("create table t (ts timestamp, v int)").unwrap_err();
    assert!(err.is_invalid_state());
}

#[test]
fn test_execute_update_rejects_rows_and_releases_them() {
    let (conn, state) = fake_connection();
    state.reply("show databases", weather_reply());
    let stmt = conn.create_statement().unwrap();
    let err = stmt.execute_update("show databases").unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(state.released(), 1);
    assert!(stmt.result_set().unwrap().is_none());
}

#[test]
fn test_execution_error_leaves_no_result() {
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());
    state.reply("select * from missing", Reply::Fail(0x2662, "Table does not exist".into()));
    let stmt = conn.create_statement().unwrap();

    stmt.execute("select * from t").unwrap();
    let err = stmt.execute("select * from missing").unwrap_err();
    assert!(err.is_execution());
    assert_eq!(err.code(), Some(0x2662));
    assert!(stmt.result_set().unwrap().is_none());
    assert_eq!(stmt.update_count().unwrap(), -1);
    assert_eq!(state.released(), 1);
}

#[test]
fn test_batch_outcomes() {
    init_logging();
    let (conn, state) = fake_connection();
    state.reply(INSERT, Reply::Affected(1));
    state.reply(SELECT, weather_reply());
    let stmt = conn.create_statement().unwrap();

    for sql in [CREATE_DB, CREATE_STABLE, INSERT, SELECT, DROP_DB] {
        stmt.add_batch(sql).unwrap();
    }

    let outcomes = stmt.execute_batch().unwrap();
    assert_eq!(codes(&outcomes), vec![0, 0, 1, BatchOutcome::SUCCESS_NO_INFO, 0]);
    assert!(matches!(outcomes[3], BatchOutcome::SuccessNoInfo));
    assert_eq!(state.released(), 1);

    // The queue is drained and no result is left behind.
    assert_eq!(stmt.batch_len().unwrap(), 0);
    assert!(stmt.result_set().unwrap().is_none());
    assert_eq!(stmt.update_count().unwrap(), -1);
    assert!(stmt.execute_batch().unwrap().is_empty());
}

#[test]
fn test_batch_preserves_order() {
    let (conn, state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    for i in 0..10 {
        stmt.add_batch(&format!("insert into t values(now, {})", i)).unwrap();
    }
    stmt.execute_batch().unwrap();
    let expected: Vec<String> = (0..10).map(|i| format!("insert into t values(now, {})", i)).collect();
    assert_eq!(state.executed(), expected);
}

#[test]
fn test_clear_batch() {
    let (conn, state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    stmt.add_batch(CREATE_DB).unwrap();
    stmt.add_batch(DROP_DB).unwrap();
    stmt.clear_batch().unwrap();
    assert!(stmt.execute_batch().unwrap().is_empty());
    assert!(state.executed().is_empty());
}

#[test]
fn test_batch_continues_after_failure() {
    let (conn, state) = fake_connection();
    state.reply("insert into missing values(now, 1)", Reply::Fail(0x2662, "Table does not exist".into()));
    state.reply("insert into t values(now, 1)", Reply::Affected(1));
    let stmt = conn.create_statement().unwrap();

    stmt.add_batch("create table t (ts timestamp, v int)").unwrap();
    stmt.add_batch("insert into missing values(now, 1)").unwrap();
    stmt.add_batch("insert into t values(now, 1)").unwrap();

    let outcomes = stmt.execute_batch().unwrap();
    assert_eq!(codes(&outcomes), vec![0, BatchOutcome::EXECUTE_FAILED, 1]);
    assert_eq!(outcomes[1].error().and_then(|e| e.code()), Some(0x2662));
    assert_eq!(state.executed().len(), 3);
    assert_eq!(stmt.batch_len().unwrap(), 0);
}

#[test]
fn test_add_batch_rejects_blank_sql() {
    let (conn, _state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    assert!(stmt.add_batch("").unwrap_err().is_invalid_argument());
    assert!(stmt.add_batch("   \n").unwrap_err().is_invalid_argument());
    assert_eq!(stmt.batch_len().unwrap(), 0);
}

#[test]
fn test_closed_statement_rejects_everything() {
    let (conn, _state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    stmt.close();
    stmt.close();
    assert!(stmt.is_closed());
    assert!(stmt.execute("select 1").unwrap_err().is_statement_closed());
    assert!(stmt.execute_query("select 1").unwrap_err().is_statement_closed());
    assert!(stmt.execute_update("select 1").unwrap_err().is_statement_closed());
    assert!(stmt.add_batch("select 1").unwrap_err().is_statement_closed());
    assert!(stmt.clear_batch().unwrap_err().is_statement_closed());
    assert!(stmt.execute_batch().unwrap_err().is_statement_closed());
    assert!(stmt.result_set().unwrap_err().is_statement_closed());
    assert!(stmt.update_count().unwrap_err().is_statement_closed());
    assert!(stmt.set_max_rows(0).unwrap_err().is_statement_closed());
    assert!(stmt.connection().unwrap_err().is_statement_closed());
}

#[test]
fn test_statement_close_releases_result_and_deregisters() {
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());
    let first = conn.create_statement().unwrap();
    let second = conn.create_statement().unwrap();
    assert_eq!(conn.statement_count(), 2);

    let rs = first.execute_query("select * from t").unwrap();
    first.close();
    assert!(rs.is_closed());
    assert_eq!(state.released(), 1);
    assert_eq!(conn.statement_count(), 1);

    drop(second);
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn test_connection_close_cascades() {
    init_logging();
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());
    let idle = conn.create_statement().unwrap();
    let busy = conn.create_statement().unwrap();
    let rs = busy.execute_query("select * from t").unwrap();

    conn.close().unwrap();
    assert!(conn.is_closed());
    assert!(idle.is_closed());
    assert!(busy.is_closed());
    assert!(rs.is_closed());
    assert_eq!(conn.statement_count(), 0);
    assert!(state.closed.load(Ordering::SeqCst));

    assert!(conn.create_statement().unwrap_err().is_connection_closed());
    assert!(conn.prepare_statement("select ?").unwrap_err().is_connection_closed());
    assert!(conn.metadata().unwrap_err().is_connection_closed());
    assert!(busy.execute("select * from t").unwrap_err().is_statement_closed());
    conn.close().unwrap();
}

#[test]
fn test_transport_reported_closed() {
    let (conn, state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    state.closed.store(true, Ordering::SeqCst);
    assert!(conn.is_closed());
    assert!(stmt.execute("select 1").unwrap_err().is_connection_closed());
}

#[test]
fn test_concurrent_statements() {
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let conn = conn.clone();
            scope.spawn(move || {
                for _ in 0..25 {
                    let stmt = conn.create_statement().unwrap();
                    let rs = stmt.execute_query("select * from t").unwrap();
                    assert!(rs.next().unwrap());
                    stmt.close();
                }
            });
        }
    });

    assert_eq!(conn.statement_count(), 0);
    assert_eq!(state.executed().len(), 200);
    assert_eq!(state.released(), 200);
}

#[test]
fn test_close_while_statements_execute() {
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());
    let started = Barrier::new(5);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let conn = conn.clone();
            let started = &started;
            scope.spawn(move || {
                started.wait();
                loop {
                    let round = conn.create_statement().and_then(|stmt| {
                        let rs = stmt.execute_query("select * from t")?;
                        rs.next()?;
                        stmt.close();
                        Ok(())
                    });
                    if let Err(err) = round {
                        assert!(err.is_closed(), "unexpected error: {}", err);
                        break;
                    }
                }
            });
        }

        started.wait();
        std::thread::sleep(Duration::from_millis(5));
        conn.close().unwrap();
    });

    assert!(conn.is_closed());
    assert_eq!(conn.statement_count(), 0);
    assert!(state.closed.load(Ordering::SeqCst));
}

#[test]
fn test_option_boundaries() {
    let (conn, _state) = fake_connection();
    let stmt = conn.create_statement().unwrap();

    assert_eq!(stmt.max_field_size().unwrap(), 16 * 1024);
    stmt.set_max_field_size(0).unwrap();
    assert!(stmt.set_max_field_size(-1).unwrap_err().is_invalid_argument());

    assert_eq!(stmt.max_rows().unwrap(), 0);
    stmt.set_max_rows(100).unwrap();
    assert!(stmt.set_max_rows(-1).unwrap_err().is_invalid_argument());
    assert_eq!(stmt.max_rows().unwrap(), 0);

    assert_eq!(stmt.query_timeout().unwrap(), 0);
    stmt.set_query_timeout(10).unwrap();
    assert!(stmt.set_query_timeout(-1).unwrap_err().is_invalid_argument());

    assert_eq!(stmt.fetch_direction().unwrap(), FetchDirection::Forward);
    stmt.set_fetch_direction(1000).unwrap();
    stmt.set_fetch_direction(1001).unwrap();
    stmt.set_fetch_direction(1002).unwrap();
    assert!(stmt.set_fetch_direction(0).unwrap_err().is_invalid_argument());
    assert_eq!(stmt.fetch_direction().unwrap(), FetchDirection::Forward);

    assert_eq!(stmt.fetch_size().unwrap(), 0);
    stmt.set_fetch_size(1000).unwrap();
    assert!(stmt.set_fetch_size(-1).unwrap_err().is_invalid_argument());

    stmt.set_escape_processing(true).unwrap();
    stmt.set_poolable(true).unwrap();
    assert!(!stmt.is_poolable().unwrap());
    stmt.close_on_completion().unwrap();
    assert!(!stmt.is_close_on_completion().unwrap());
    assert!(stmt.warnings().unwrap().is_none());
    stmt.clear_warnings().unwrap();

    assert_eq!(stmt.result_set_concurrency().unwrap(), ResultSetConcurrency::ReadOnly);
    assert_eq!(stmt.result_set_type().unwrap(), ResultSetType::ForwardOnly);
    assert_eq!(stmt.result_set_holdability().unwrap(), Holdability::HoldCursorsOverCommit);
}

#[test]
fn test_more_results() {
    let (conn, state) = fake_connection();
    state.reply("select * from t", weather_reply());
    let stmt = conn.create_statement().unwrap();

    let rs = stmt.execute_query("select * from t").unwrap();
    assert!(!stmt.more_results().unwrap());
    assert!(rs.is_closed());
    assert!(stmt.result_set().unwrap().is_none());

    let rs = stmt.execute_query("select * from t").unwrap();
    assert!(!stmt.more_results_with(ResultDisposition::CloseCurrent).unwrap());
    assert!(rs.is_closed());
    assert!(stmt.more_results_with(ResultDisposition::KeepCurrent).unwrap_err().is_unsupported());
    assert!(stmt.more_results_with(ResultDisposition::CloseAll).unwrap_err().is_unsupported());
}

#[test]
fn test_unsupported_operations() {
    let (conn, _state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    assert!(stmt.cancel().unwrap_err().is_unsupported());
    assert!(stmt.set_cursor_name("c1").unwrap_err().is_unsupported());
    assert!(stmt.generated_keys().unwrap_err().is_unsupported());

    let sql = "insert into t values(now, 1)";
    assert!(stmt.execute_with_keys(sql, GeneratedKeys::Flag(1)).unwrap_err().is_unsupported());
    assert!(
        stmt.execute_with_keys(sql, GeneratedKeys::ColumnIndexes(&[1]))
            .unwrap_err()
            .is_unsupported()
    );
    assert!(
        stmt.execute_update_with_keys(sql, GeneratedKeys::ColumnNames(&["ts"]))
            .unwrap_err()
            .is_unsupported()
    );
    assert!(
        stmt.execute_update_with_keys(sql, GeneratedKeys::Flag(2))
            .unwrap_err()
            .is_unsupported()
    );
}

#[test]
fn test_connection_accessors() {
    let (conn, state) = fake_connection();
    let stmt = conn.create_statement().unwrap();
    let owner = stmt.connection().unwrap();
    assert_eq!(owner.statement_count(), 1);

    assert_eq!(conn.server_version(), "3.3.0.0-fake");
    assert_eq!(conn.transport_kind(), TransportKind::Native);
    let meta = conn.metadata().unwrap();
    assert_eq!(meta.product_name, "TDengine");
    assert_eq!(meta.product_version, "3.3.0.0-fake");
    assert_eq!(meta.driver_name, "taos-driver");
    assert_eq!(meta.url, "taos://127.0.0.1:6030");
    assert_eq!(meta.user, "root");

    assert_eq!(conn.catalog().unwrap(), None);
    conn.set_catalog("power").unwrap();
    assert_eq!(conn.catalog().unwrap().as_deref(), Some("power"));
    assert_eq!(state.database.lock().as_deref(), Some("power"));
}
