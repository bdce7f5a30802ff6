//! Prepared statement binding tests over a scripted transport.

mod common;

use common::{Reply, fake_connection};
use taos_driver::{BatchOutcome, Precision, Timestamp, Value};

#[test]
fn test_binds_and_renders_literals() {
    let (conn, state) = fake_connection();
    let sql = "insert into t values(?, ?, ?, ?, ?)";
    state.reply(
        "insert into t values('2023-11-14T22:13:20.000Z', 7, 2.5, 'it\\'s', NULL)",
        Reply::Affected(1),
    );

    let ps = conn.prepare_statement(sql).unwrap();
    assert_eq!(ps.parameter_count(), 5);
    assert_eq!(state.prepared.lock().as_slice(), &[sql.to_string()]);

    ps.set_timestamp(0, Timestamp::from_millis(1_700_000_000_000)).unwrap();
    ps.set_i32(1, 7).unwrap();
    ps.set_f64(2, 2.5).unwrap();
    ps.set_string(3, "it's").unwrap();
    ps.set_null(4).unwrap();
    assert_eq!(ps.execute_update().unwrap(), 1);
    assert_eq!(
        state.executed(),
        vec!["insert into t values('2023-11-14T22:13:20.000Z', 7, 2.5, 'it\\'s', NULL)".to_string()]
    );
}

#[test]
fn test_quoted_marks_are_not_placeholders() {
    let (conn, state) = fake_connection();
    let ps = conn
        .prepare_statement("select * from t where name = '?' and v > ?")
        .unwrap();
    assert_eq!(ps.parameter_count(), 1);
    ps.set_i64(0, 10).unwrap();
    ps.execute().unwrap();
    assert_eq!(
        state.executed(),
        vec!["select * from t where name = '?' and v > 10".to_string()]
    );
}

#[test]
fn test_nanosecond_timestamp_keeps_its_instant() {
    let (conn, state) = fake_connection();
    let ps = conn.prepare_statement("insert into t values(?, 1)").unwrap();
    let ts = Timestamp::new(1_700_000_000_123_000_000, Precision::Nanosecond);
    assert_eq!(ts.as_millis(), 1_700_000_000_123);

    ps.set_timestamp(0, ts).unwrap();
    ps.execute().unwrap();
    assert_eq!(
        state.executed(),
        vec!["insert into t values('2023-11-14T22:13:20.123000000Z', 1)".to_string()]
    );
}

#[test]
fn test_decimal_parameter_must_be_numeric() {
    let (conn, state) = fake_connection();
    let ps = conn.prepare_statement("select * from t where v = ?").unwrap();

    ps.set_value(0, Value::Decimal("1; drop database power".to_string())).unwrap();
    assert!(ps.execute().unwrap_err().is_invalid_argument());
    assert!(state.executed().is_empty());

    ps.set_value(0, Value::Decimal("123.45".to_string())).unwrap();
    ps.execute().unwrap();
    assert_eq!(state.executed(), vec!["select * from t where v = 123.45".to_string()]);
}

#[test]
fn test_unbound_parameter_is_rejected() {
    let (conn, state) = fake_connection();
    let ps = conn.prepare_statement("insert into t values(?, ?)").unwrap();
    ps.set_bool(0, true).unwrap();
    assert!(ps.execute().unwrap_err().is_invalid_argument());

    ps.set_bool(1, false).unwrap();
    ps.clear_parameters().unwrap();
    assert!(ps.render().unwrap_err().is_invalid_argument());
    assert!(state.executed().is_empty());
}

#[test]
fn test_parameter_index_out_of_range() {
    let (conn, _state) = fake_connection();
    let ps = conn.prepare_statement("select ?").unwrap();
    assert!(ps.set_i32(1, 1).unwrap_err().is_invalid_argument());
}

#[test]
fn test_batch_renders_each_entry() {
    let (conn, state) = fake_connection();
    state.reply("insert into t values(1, 'a')", Reply::Affected(1));
    state.reply("insert into t values(2, 'b')", Reply::Affected(1));
    let ps = conn.prepare_statement("insert into t values(?, ?)").unwrap();

    for (i, name) in [(1, "a"), (2, "b")] {
        ps.set_i32(0, i).unwrap();
        ps.set_string(1, name).unwrap();
        ps.add_batch().unwrap();
    }
    let outcomes = ps.execute_batch().unwrap();
    assert_eq!(outcomes.iter().map(BatchOutcome::code).collect::<Vec<_>>(), vec![1, 1]);
    assert_eq!(state.executed().len(), 2);
}

#[test]
fn test_prepare_error_surfaces() {
    let (conn, state) = fake_connection();
    *state.reject_prepare.lock() = Some("insert into t values(?".to_string());
    let err = conn.prepare_statement("insert into t values(?").unwrap_err();
    assert!(err.is_execution());
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn test_closed_prepared_statement() {
    let (conn, _state) = fake_connection();
    let ps = conn.prepare_statement("select ?").unwrap();
    assert_eq!(conn.statement_count(), 1);
    ps.close();
    assert!(ps.is_closed());
    assert_eq!(conn.statement_count(), 0);
    assert!(ps.set_i32(0, 1).unwrap_err().is_statement_closed());
    assert!(ps.clear_parameters().unwrap_err().is_statement_closed());
}
