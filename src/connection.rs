//! Connection implementation for the TDengine driver.
//!
//! The `TaosConnection` owns one transport session, creates statements and
//! keeps a registry of the statements still open so that closing the
//! connection closes them too.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::database::ConnectParams;
use crate::error::{Result, TaosError};
use crate::prepared::TaosPreparedStatement;
use crate::statement::{StatementInner, TaosStatement};
use crate::transport::{Outcome, Transport, TransportKind};

const PRODUCT_NAME: &str = "TDengine";
const DRIVER_NAME: &str = env!("CARGO_PKG_NAME");
const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Descriptive information about an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMetadata {
    pub product_name: &'static str,
    pub product_version: String,
    pub driver_name: &'static str,
    pub driver_version: &'static str,
    /// Endpoint URI without credentials.
    pub url: String,
    pub user: String,
    pub transport: TransportKind,
}

struct ConnectionInner {
    transport: Box<dyn Transport>,
    url: String,
    user: String,
    server_version: String,
    catalog: RwLock<Option<String>>,
    closed: AtomicBool,
    /// Serializes `close` against itself and against statement creation.
    close_lock: Mutex<()>,
    statements: Mutex<BTreeMap<u64, Weak<StatementInner>>>,
    next_statement_id: AtomicU64,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(e) = self.transport.close() {
                log::warn!("failed to release transport for {}: {}", self.url, e);
            }
        }
    }
}

/// Connection handle for TDengine.
///
/// Cheap to clone; every clone refers to the same session. The session is
/// released by [`close`](Self::close), or when the last handle and the last
/// statement created from it are dropped.
#[derive(Clone)]
pub struct TaosConnection {
    inner: Arc<ConnectionInner>,
}

impl TaosConnection {
    /// Wraps an open transport.
    ///
    /// The server version is read once here; `"unknown"` is recorded when the
    /// transport cannot report it.
    pub fn new(transport: Box<dyn Transport>, params: &ConnectParams) -> Self {
        let server_version = transport.server_version().unwrap_or_else(|e| {
            log::debug!("server version unavailable: {}", e);
            "unknown".to_string()
        });

        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                url: params.display_uri(),
                user: params.user.clone(),
                server_version,
                catalog: RwLock::new(params.database.clone()),
                closed: AtomicBool::new(false),
                close_lock: Mutex::new(()),
                statements: Mutex::new(BTreeMap::new()),
                next_statement_id: AtomicU64::new(1),
            }),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TaosError::connection_closed())
        } else {
            Ok(())
        }
    }

    /// Creates a statement registered with this connection.
    pub fn create_statement(&self) -> Result<TaosStatement> {
        let _guard = self.inner.close_lock.lock();
        self.ensure_open()?;
        let id = self.inner.next_statement_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(StatementInner::new(id, self.clone()));
        self.inner.statements.lock().insert(id, Arc::downgrade(&inner));
        Ok(TaosStatement::new(inner))
    }

    /// Creates a statement for SQL with `?` placeholders.
    ///
    /// The transport validates the SQL where it can; otherwise errors surface
    /// on execution.
    pub fn prepare_statement(&self, sql: &str) -> Result<TaosPreparedStatement> {
        self.ensure_open()?;
        self.inner.transport.prepare(sql)?;
        let statement = self.create_statement()?;
        Ok(TaosPreparedStatement::new(statement, sql))
    }

    /// Closes every open statement, then releases the transport.
    ///
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let _guard = self.inner.close_lock.lock();
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Statements deregister themselves while closing, so walk a snapshot.
        let snapshot: Vec<Weak<StatementInner>> =
            self.inner.statements.lock().values().cloned().collect();
        for statement in snapshot.iter().filter_map(Weak::upgrade) {
            statement.close();
        }
        self.inner.statements.lock().clear();

        log::info!("closing connection to {}", self.inner.url);
        self.inner.transport.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.transport.is_closed()
    }

    /// The default database of the session.
    pub fn catalog(&self) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.inner.catalog.read().clone())
    }

    /// Switches the default database of the session.
    pub fn set_catalog(&self, database: &str) -> Result<()> {
        self.ensure_open()?;
        self.inner.transport.use_database(database)?;
        *self.inner.catalog.write() = Some(database.to_string());
        Ok(())
    }

    pub fn metadata(&self) -> Result<DatabaseMetadata> {
        self.ensure_open()?;
        Ok(DatabaseMetadata {
            product_name: PRODUCT_NAME,
            product_version: self.inner.server_version.clone(),
            driver_name: DRIVER_NAME,
            driver_version: DRIVER_VERSION,
            url: self.inner.url.clone(),
            user: self.inner.user.clone(),
            transport: self.inner.transport.kind(),
        })
    }

    /// Server version captured when the connection was opened.
    pub fn server_version(&self) -> &str {
        &self.inner.server_version
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Number of statements created from this connection and still open.
    pub fn statement_count(&self) -> usize {
        self.inner.statements.lock().len()
    }

    /// Sends SQL to the transport on behalf of a statement.
    pub(crate) fn dispatch(&self, sql: &str) -> Result<Outcome> {
        self.ensure_open()?;
        log::debug!("executing: {}", sql);
        self.inner.transport.execute(sql)
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.inner.statements.lock().remove(&id);
    }
}

impl fmt::Debug for TaosConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaosConnection")
            .field("url", &self.inner.url)
            .field("transport", &self.inner.transport.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}
