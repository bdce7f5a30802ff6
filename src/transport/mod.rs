//! Transport abstraction over the engine session.
//!
//! A [`Transport`] is one open session: the connection owns exactly one and
//! routes every statement through it. Two implementations ship with the
//! crate, [`NativeTransport`] over the `taos` client library and
//! [`RestTransport`] over the HTTP API; tests substitute their own.

use std::collections::VecDeque;

use crate::database::ConnectParams;
use crate::error::Result;
use crate::types::{ColumnDescriptor, Precision, Row};

pub mod native;
pub mod rest;

pub use native::NativeTransport;
pub use rest::RestTransport;

/// Which transport a connection talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Native,
    Rest,
}

impl TransportKind {
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Native => 6030,
            TransportKind::Rest => 6041,
        }
    }
}

/// Raw outcome of executing one SQL text.
pub enum Outcome {
    /// The statement produced rows.
    Rows(Box<dyn RowSource>),
    /// The statement produced an affected-row count.
    Affected(i64),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Rows(source) => f
                .debug_tuple("Rows")
                .field(&source.columns().len())
                .finish(),
            Outcome::Affected(n) => f.debug_tuple("Affected").field(n).finish(),
        }
    }
}

/// Transport-side handle of a row-returning result.
pub trait RowSource: Send {
    /// Column descriptors, fixed for the life of the source.
    fn columns(&self) -> &[ColumnDescriptor];

    /// Timestamp precision of the rows.
    fn precision(&self) -> Precision {
        Precision::Millisecond
    }

    /// Returns the next row, or `None` once the rows are exhausted.
    fn fetch_next(&mut self) -> Result<Option<Row>>;

    /// Releases transport-side buffers. Must be idempotent.
    fn close(&mut self);
}

/// Capability interface of an engine session.
///
/// All methods take `&self`: implementations synchronize internally so a
/// single session can serve several statements at once.
pub trait Transport: Send + Sync {
    /// Opens a session.
    fn connect(params: &ConnectParams) -> Result<Self>
    where
        Self: Sized;

    fn kind(&self) -> TransportKind;

    /// Executes one SQL text.
    fn execute(&self, sql: &str) -> Result<Outcome>;

    /// Validates SQL ahead of execution where the transport can.
    ///
    /// The default defers all checking to execution time.
    fn prepare(&self, _sql: &str) -> Result<()> {
        Ok(())
    }

    /// Switches the default database of the session.
    fn use_database(&self, database: &str) -> Result<()>;

    fn server_version(&self) -> Result<String>;

    /// Releases the session. Calling it again is a no-op.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Fully received rows served from memory.
///
/// REST responses and materialized native results both end up here.
#[derive(Debug, Default)]
pub struct BufferedRows {
    columns: Vec<ColumnDescriptor>,
    precision: Precision,
    rows: VecDeque<Row>,
}

impl BufferedRows {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            precision: Precision::default(),
            rows: rows.into(),
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Drains another source into memory.
    pub fn drain(mut source: Box<dyn RowSource>) -> Result<Self> {
        let columns = source.columns().to_vec();
        let precision = source.precision();
        let mut rows = VecDeque::new();
        let drained = loop {
            match source.fetch_next() {
                Ok(Some(row)) => rows.push_back(row),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        source.close();
        drained.map(|_| Self {
            columns,
            precision,
            rows,
        })
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowSource for BufferedRows {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn fetch_next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}
