//! Common utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use taos_driver::database::ConnectParams;
use taos_driver::transport::{BufferedRows, Outcome, RowSource, Transport, TransportKind};
use taos_driver::{ColumnDescriptor, Precision, TaosConnection, TaosDatabase, TaosError, Value};

/// Test configuration loaded from environment.
pub struct TestConfig {
    pub host: String,
    pub native_port: u16,
    pub rest_port: u16,
    pub user: String,
    pub password: String,
}

impl TestConfig {
    /// Loads test configuration from environment variables.
    ///
    /// Falls back to defaults if variables are not set.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            host: std::env::var("TAOS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            native_port: std::env::var("TAOS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6030),
            rest_port: std::env::var("TAOS_REST_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6041),
            user: std::env::var("TAOS_USER").unwrap_or_else(|_| "root".to_string()),
            password: std::env::var("TAOS_PASSWORD").unwrap_or_else(|_| "taosdata".to_string()),
        }
    }

    /// Live tests run only when `TAOS_LIVE_TESTS` is set.
    pub fn live_enabled() -> bool {
        let _ = dotenvy::dotenv();
        std::env::var("TAOS_LIVE_TESTS").is_ok()
    }

    pub fn native_uri(&self) -> String {
        format!(
            "taos://{}:{}@{}:{}",
            self.user, self.password, self.host, self.native_port
        )
    }

    pub fn rest_uri(&self) -> String {
        format!(
            "http://{}:{}@{}:{}",
            self.user, self.password, self.host, self.rest_port
        )
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Unique database name for a live test.
pub fn unique_db_name(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}_{}_{}", prefix, std::process::id(), nanos)
}

/// Scripted reply of the fake transport.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<ColumnDescriptor>, Vec<Vec<Value>>),
    Affected(i64),
    Fail(i32, String),
}

/// State shared between a [`FakeTransport`] and the test that scripted it.
#[derive(Default)]
pub struct FakeState {
    replies: Mutex<HashMap<String, Reply>>,
    pub executed: Mutex<Vec<String>>,
    pub prepared: Mutex<Vec<String>>,
    pub database: Mutex<Option<String>>,
    pub closed: AtomicBool,
    /// Row sources released by their consumer.
    pub released_sources: AtomicUsize,
    /// SQL the fake rejects in `prepare`.
    pub reject_prepare: Mutex<Option<String>>,
}

impl FakeState {
    pub fn reply(&self, sql: &str, reply: Reply) {
        self.replies.lock().insert(sql.to_string(), reply);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn released(&self) -> usize {
        self.released_sources.load(Ordering::SeqCst)
    }
}

/// Transport answering from a script. Unscripted SQL affects 0 rows.
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new(state: Arc<FakeState>) -> Self {
        Self { state }
    }
}

impl Transport for FakeTransport {
    fn connect(_params: &ConnectParams) -> taos_driver::Result<Self> {
        Ok(Self::new(Arc::new(FakeState::default())))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn execute(&self, sql: &str) -> taos_driver::Result<Outcome> {
        if self.is_closed() {
            return Err(TaosError::connection_closed());
        }
        self.state.executed.lock().push(sql.to_string());
        let reply = self.state.replies.lock().get(sql).cloned();
        match reply {
            None | Some(Reply::Affected(0)) => Ok(Outcome::Affected(0)),
            Some(Reply::Affected(n)) => Ok(Outcome::Affected(n)),
            Some(Reply::Rows(columns, rows)) => Ok(Outcome::Rows(Box::new(TrackedRows {
                rows: BufferedRows::new(columns, rows),
                state: Arc::clone(&self.state),
                released: false,
            }))),
            Some(Reply::Fail(code, message)) => Err(TaosError::execution(Some(code), message)),
        }
    }

    fn prepare(&self, sql: &str) -> taos_driver::Result<()> {
        self.state.prepared.lock().push(sql.to_string());
        match self.state.reject_prepare.lock().as_deref() {
            Some(rejected) if rejected == sql => {
                Err(TaosError::execution(Some(0x2600), "syntax error near '?'"))
            }
            _ => Ok(()),
        }
    }

    fn use_database(&self, database: &str) -> taos_driver::Result<()> {
        *self.state.database.lock() = Some(database.to_string());
        Ok(())
    }

    fn server_version(&self) -> taos_driver::Result<String> {
        Ok("3.3.0.0-fake".to_string())
    }

    fn close(&self) -> taos_driver::Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

/// Row source that counts its release in the shared state.
struct TrackedRows {
    rows: BufferedRows,
    state: Arc<FakeState>,
    released: bool,
}

impl RowSource for TrackedRows {
    fn columns(&self) -> &[ColumnDescriptor] {
        self.rows.columns()
    }

    fn precision(&self) -> Precision {
        self.rows.precision()
    }

    fn fetch_next(&mut self) -> taos_driver::Result<Option<Vec<Value>>> {
        self.rows.fetch_next()
    }

    fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.rows.close();
            self.state.released_sources.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Opens a connection over a fresh fake transport.
pub fn fake_connection() -> (TaosConnection, Arc<FakeState>) {
    let state = Arc::new(FakeState::default());
    let params = TaosDatabase::default()
        .connect_params()
        .expect("default parameters resolve");
    let conn = TaosConnection::new(Box::new(FakeTransport::new(Arc::clone(&state))), &params);
    (conn, state)
}
