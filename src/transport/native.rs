//! Native transport over the `taos` client library.
//!
//! Calls go through the async client and are bridged to the blocking driver
//! surface with [`Runtime`]. Row-returning results stream one raw block at a
//! time unless the connection asked for [`FetchMode::Materialize`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use taos_client::sync::{Bindable, Fetchable};
use taos_client::{AsyncQueryable, AsyncTBuilder, BorrowedValue, RawBlock, Stmt, Taos, TaosBuilder};

use super::{BufferedRows, Outcome, RowSource, Transport, TransportKind};
use crate::database::{ConnectParams, FetchMode};
use crate::error::{Result, TaosError};
use crate::types::{ColumnDescriptor, Precision, Row, TaosType, Timestamp, Value};
use crate::utils::{Runtime, split_placeholders};

/// Session held through the native client.
pub struct NativeTransport {
    rt: Arc<Runtime>,
    conn: RwLock<Option<Arc<Taos>>>,
    fetch_mode: FetchMode,
}

impl NativeTransport {
    fn session(&self) -> Result<Arc<Taos>> {
        self.conn
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(TaosError::connection_closed)
    }
}

impl Transport for NativeTransport {
    fn connect(params: &ConnectParams) -> Result<Self> {
        let dsn = build_dsn(params);
        let rt = Arc::new(
            Runtime::new()
                .map_err(|e| TaosError::connection(format!("Failed to create runtime: {}", e)))?,
        );

        let conn = rt
            .block_on(async {
                let builder = TaosBuilder::from_dsn(&dsn)?;
                builder.build().await
            })
            .map_err(|e| TaosError::connection(format!("Failed to connect: {}", e)))?;

        Ok(Self {
            rt,
            conn: RwLock::new(Some(Arc::new(conn))),
            fetch_mode: params.fetch_mode,
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn execute(&self, sql: &str) -> Result<Outcome> {
        let conn = self.session()?;
        let result_set = self.rt.block_on(async { conn.query(sql).await })?;

        if result_set.fields().is_empty() {
            let affected = result_set.affected_rows() as i64;
            return Ok(Outcome::Affected(affected));
        }

        let source = NativeRows::new(result_set);
        match self.fetch_mode {
            FetchMode::Stream => Ok(Outcome::Rows(Box::new(source))),
            FetchMode::Materialize => {
                Ok(Outcome::Rows(Box::new(BufferedRows::drain(Box::new(source))?)))
            }
        }
    }

    /// Validates placeholder SQL through the client's stmt API.
    ///
    /// SQL without placeholders is bound client-side, so there is nothing to
    /// validate ahead of execution.
    fn prepare(&self, sql: &str) -> Result<()> {
        if split_placeholders(sql).len() < 2 {
            return Ok(());
        }
        let conn = self.session()?;
        let mut stmt = Stmt::init(&conn)?;
        stmt.prepare(sql)?;
        Ok(())
    }

    fn use_database(&self, database: &str) -> Result<()> {
        let conn = self.session()?;
        self.rt.block_on(async { conn.use_database(database).await })?;
        Ok(())
    }

    fn server_version(&self) -> Result<String> {
        let conn = self.session()?;
        let version = self.rt.block_on(async { conn.server_version().await })?;
        Ok(version.into_owned())
    }

    fn close(&self) -> Result<()> {
        // Dropping the last handle frees the client-side connection.
        self.conn.write().take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.read().is_none()
    }
}

/// Builds a native DSN. Credentials are URL-encoded so characters such as
/// `#`, `@` and `:` survive.
fn build_dsn(params: &ConnectParams) -> String {
    let mut dsn = format!(
        "taos://{}:{}@{}:{}",
        urlencoding::encode(&params.user),
        urlencoding::encode(&params.password),
        params.host,
        params.port
    );
    if let Some(db) = &params.database {
        dsn.push('/');
        dsn.push_str(&urlencoding::encode(db));
    }
    let settings = params.settings.pairs();
    for (i, (key, value)) in settings.iter().enumerate() {
        dsn.push(if i == 0 { '?' } else { '&' });
        dsn.push_str(key);
        dsn.push('=');
        dsn.push_str(&urlencoding::encode(value));
    }
    dsn
}

/// Streams rows out of a native result set block by block.
struct NativeRows {
    result_set: Option<taos_client::ResultSet>,
    columns: Vec<ColumnDescriptor>,
    precision: Precision,
    pending: VecDeque<Row>,
}

impl NativeRows {
    fn new(result_set: taos_client::ResultSet) -> Self {
        let precision = match result_set.precision() {
            taos_client::Precision::Millisecond => Precision::Millisecond,
            taos_client::Precision::Microsecond => Precision::Microsecond,
            taos_client::Precision::Nanosecond => Precision::Nanosecond,
        };
        let columns = result_set
            .fields()
            .iter()
            .map(|f: &taos_client::Field| ColumnDescriptor::new(f.name(), map_ty(f.ty())))
            .collect();

        Self {
            result_set: Some(result_set),
            columns,
            precision,
            pending: VecDeque::new(),
        }
    }

    /// Pulls the next block into `pending`. Returns false at end of data.
    fn fill(&mut self) -> Result<bool> {
        let Some(mut result_set) = self.result_set.take() else {
            return Ok(false);
        };
        let block = match result_set.blocks().next() {
            Some(block) => block?,
            None => return Ok(false),
        };
        if block.nrows() == 0 {
            return Ok(false);
        }
        self.result_set = Some(result_set);
        log::debug!("fetched native block of {} rows", block.nrows());
        self.pending.extend(block_rows(&block, self.columns.len(), self.precision));
        Ok(true)
    }
}

impl RowSource for NativeRows {
    fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn fetch_next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    fn close(&mut self) {
        self.pending.clear();
        self.result_set = None;
    }
}

/// Transposes a columnar block into rows.
fn block_rows(block: &RawBlock, num_columns: usize, precision: Precision) -> Vec<Row> {
    let num_rows = block.nrows();
    let mut rows: Vec<Row> = (0..num_rows).map(|_| Vec::with_capacity(num_columns)).collect();
    for view in block.column_views().iter().take(num_columns) {
        for (row, value) in rows.iter_mut().zip(view.iter()) {
            row.push(convert_value(value, precision));
        }
    }
    rows
}

fn convert_value(value: BorrowedValue, precision: Precision) -> Value {
    match value {
        BorrowedValue::Null(_) => Value::Null,
        BorrowedValue::Bool(v) => Value::Bool(v),
        BorrowedValue::TinyInt(v) => Value::TinyInt(v),
        BorrowedValue::SmallInt(v) => Value::SmallInt(v),
        BorrowedValue::Int(v) => Value::Int(v),
        BorrowedValue::BigInt(v) => Value::BigInt(v),
        BorrowedValue::UTinyInt(v) => Value::UTinyInt(v),
        BorrowedValue::USmallInt(v) => Value::USmallInt(v),
        BorrowedValue::UInt(v) => Value::UInt(v),
        BorrowedValue::UBigInt(v) => Value::UBigInt(v),
        BorrowedValue::Float(v) => Value::Float(v),
        BorrowedValue::Double(v) => Value::Double(v),
        BorrowedValue::Timestamp(ts) => Value::Timestamp(Timestamp::new(ts.as_raw_i64(), precision)),
        BorrowedValue::VarChar(s) => Value::VarChar(s.to_string()),
        BorrowedValue::NChar(s) => Value::NChar(s.to_string()),
        BorrowedValue::Json(j) => Value::Json(String::from_utf8_lossy(&j).into_owned()),
        BorrowedValue::VarBinary(b) => Value::VarBinary(b.to_vec()),
        BorrowedValue::Geometry(b) => Value::Geometry(b.to_vec()),
        BorrowedValue::Decimal(dec) => {
            Value::Decimal(format_decimal(i128::from(dec.mantissa()), dec.scale() as u32))
        }
        _ => Value::Null,
    }
}

/// Formats `mantissa * 10^-scale` without going through floating point.
fn format_decimal(mantissa: i128, scale: u32) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let digits = mantissa.unsigned_abs().to_string();
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let sign = if mantissa < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, int_part, frac_part)
}

fn map_ty(ty: taos_client::Ty) -> TaosType {
    use taos_client::Ty;

    match ty {
        Ty::Null => TaosType::Null,
        Ty::Bool => TaosType::Bool,
        Ty::TinyInt => TaosType::TinyInt,
        Ty::SmallInt => TaosType::SmallInt,
        Ty::Int => TaosType::Int,
        Ty::BigInt => TaosType::BigInt,
        Ty::UTinyInt => TaosType::UTinyInt,
        Ty::USmallInt => TaosType::USmallInt,
        Ty::UInt => TaosType::UInt,
        Ty::UBigInt => TaosType::UBigInt,
        Ty::Float => TaosType::Float,
        Ty::Double => TaosType::Double,
        Ty::Timestamp => TaosType::Timestamp,
        Ty::VarChar => TaosType::VarChar,
        Ty::NChar => TaosType::NChar,
        Ty::Json => TaosType::Json,
        Ty::VarBinary => TaosType::VarBinary,
        Ty::Geometry => TaosType::Geometry,
        Ty::Decimal => TaosType::Decimal,
        _ => TaosType::VarChar,
    }
}
