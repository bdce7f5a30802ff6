//! Forward-only result sets.
//!
//! `TaosResultSet` walks a transport row source one row at a time and exposes
//! typed getters over the current row. Column metadata is captured once, when
//! the result set is created, and never changes afterwards.

use std::fmt;
use std::sync::Arc;

use arrow_schema::{Field, Schema};
use parking_lot::Mutex;

use crate::error::{Result, TaosError};
use crate::transport::RowSource;
use crate::types::{ColumnDescriptor, Precision, Row, TaosType, Timestamp, Value};

/// Immutable column metadata of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetMetaData {
    columns: Vec<ColumnDescriptor>,
    precision: Precision,
}

impl ResultSetMetaData {
    pub fn new(columns: Vec<ColumnDescriptor>, precision: Precision) -> Self {
        Self { columns, precision }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Descriptor of the column at a 0-based index.
    pub fn column(&self, index: usize) -> Result<&ColumnDescriptor> {
        self.columns.get(index).ok_or_else(|| {
            TaosError::invalid_column(format!(
                "index {} out of range for {} columns",
                index,
                self.columns.len()
            ))
        })
    }

    pub fn column_name(&self, index: usize) -> Result<&str> {
        self.column(index).map(|c| c.name.as_str())
    }

    pub fn column_type(&self, index: usize) -> Result<TaosType> {
        self.column(index).map(|c| c.ty)
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Finds a column by label, ignoring ASCII case. The first match wins.
    pub fn find(&self, label: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(label))
    }

    /// Describes the columns as an Arrow schema.
    pub fn to_arrow_schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name.as_str(), c.ty.to_arrow(self.precision), c.nullable))
                .collect::<Vec<_>>(),
        )
    }
}

/// Addresses a column, either by 0-based position or by label.
pub trait ColumnIndex {
    fn resolve(&self, metadata: &ResultSetMetaData) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, metadata: &ResultSetMetaData) -> Result<usize> {
        metadata.column(*self).map(|_| *self)
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, metadata: &ResultSetMetaData) -> Result<usize> {
        metadata
            .find(self)
            .ok_or_else(|| TaosError::invalid_column(format!("no column labelled '{}'", self)))
    }
}

impl ColumnIndex for &String {
    fn resolve(&self, metadata: &ResultSetMetaData) -> Result<usize> {
        self.as_str().resolve(metadata)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    OnRow,
    AfterLast,
}

struct Cursor {
    /// `None` once the rows are exhausted or the result set is closed.
    source: Option<Box<dyn RowSource>>,
    position: Position,
    row: Option<Row>,
    row_number: u64,
    closed: bool,
}

impl Cursor {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(TaosError::result_set_closed())
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.row = None;
    }
}

/// Forward-only cursor over the rows of one execution.
///
/// Cloning yields another handle to the same cursor; closing either closes
/// both.
#[derive(Clone)]
pub struct TaosResultSet {
    cursor: Arc<Mutex<Cursor>>,
    metadata: Arc<ResultSetMetaData>,
}

impl TaosResultSet {
    pub(crate) fn new(source: Box<dyn RowSource>) -> Self {
        let metadata = ResultSetMetaData::new(source.columns().to_vec(), source.precision());
        Self {
            cursor: Arc::new(Mutex::new(Cursor {
                source: Some(source),
                position: Position::BeforeFirst,
                row: None,
                row_number: 0,
                closed: false,
            })),
            metadata: Arc::new(metadata),
        }
    }

    /// Advances to the next row. Returns false, leaving the cursor after the
    /// last row, once the rows are exhausted.
    pub fn next(&self) -> Result<bool> {
        let mut cursor = self.cursor.lock();
        cursor.ensure_open()?;
        if cursor.position == Position::AfterLast {
            return Ok(false);
        }
        let fetched = match cursor.source.as_mut() {
            Some(source) => source.fetch_next()?,
            None => None,
        };
        match fetched {
            Some(row) => {
                cursor.row = Some(row);
                cursor.position = Position::OnRow;
                cursor.row_number += 1;
                Ok(true)
            }
            None => {
                cursor.release();
                cursor.position = Position::AfterLast;
                Ok(false)
            }
        }
    }

    pub fn previous(&self) -> Result<bool> {
        Err(TaosError::unsupported("previous"))
    }

    pub fn absolute(&self, _row: i64) -> Result<bool> {
        Err(TaosError::unsupported("absolute"))
    }

    pub fn relative(&self, _rows: i64) -> Result<bool> {
        Err(TaosError::unsupported("relative"))
    }

    pub fn first(&self) -> Result<bool> {
        Err(TaosError::unsupported("first"))
    }

    pub fn last(&self) -> Result<bool> {
        Err(TaosError::unsupported("last"))
    }

    pub fn before_first(&self) -> Result<()> {
        Err(TaosError::unsupported("before_first"))
    }

    pub fn after_last(&self) -> Result<()> {
        Err(TaosError::unsupported("after_last"))
    }

    pub fn is_before_first(&self) -> Result<bool> {
        let cursor = self.cursor.lock();
        cursor.ensure_open()?;
        Ok(cursor.position == Position::BeforeFirst)
    }

    pub fn is_after_last(&self) -> Result<bool> {
        let cursor = self.cursor.lock();
        cursor.ensure_open()?;
        Ok(cursor.position == Position::AfterLast)
    }

    /// 1-based number of the current row, 0 when not on a row.
    pub fn row(&self) -> Result<u64> {
        let cursor = self.cursor.lock();
        cursor.ensure_open()?;
        Ok(match cursor.position {
            Position::OnRow => cursor.row_number,
            _ => 0,
        })
    }

    pub fn metadata(&self) -> &ResultSetMetaData {
        &self.metadata
    }

    pub fn find_column(&self, label: &str) -> Result<usize> {
        label.resolve(&self.metadata)
    }

    /// Releases the row source. Calling it again is a no-op.
    pub fn close(&self) {
        let mut cursor = self.cursor.lock();
        if !cursor.closed {
            cursor.release();
            cursor.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.lock().closed
    }

    fn with_cell<I, T>(&self, index: I, convert: impl FnOnce(&Value) -> Result<Option<T>>) -> Result<Option<T>>
    where
        I: ColumnIndex,
    {
        let cursor = self.cursor.lock();
        cursor.ensure_open()?;
        let index = index.resolve(&self.metadata)?;
        let row = match (cursor.position, cursor.row.as_ref()) {
            (Position::OnRow, Some(row)) => row,
            _ => return Err(TaosError::invalid_state("cursor is not positioned on a row")),
        };
        let value = row
            .get(index)
            .ok_or_else(|| TaosError::invalid_column(format!("row has no value at index {}", index)))?;
        convert(value)
    }

    pub fn get_value<I: ColumnIndex>(&self, index: I) -> Result<Option<Value>> {
        self.with_cell(index, |v| Ok((!v.is_null()).then(|| v.clone())))
    }

    pub fn get_string<I: ColumnIndex>(&self, index: I) -> Result<Option<String>> {
        self.with_cell(index, |v| Ok(v.to_text()))
    }

    pub fn get_bool<I: ColumnIndex>(&self, index: I) -> Result<Option<bool>> {
        self.with_cell(index, Value::to_bool)
    }

    pub fn get_i8<I: ColumnIndex>(&self, index: I) -> Result<Option<i8>> {
        self.with_cell(index, narrow::<i8>)
    }

    pub fn get_i16<I: ColumnIndex>(&self, index: I) -> Result<Option<i16>> {
        self.with_cell(index, narrow::<i16>)
    }

    pub fn get_i32<I: ColumnIndex>(&self, index: I) -> Result<Option<i32>> {
        self.with_cell(index, narrow::<i32>)
    }

    pub fn get_i64<I: ColumnIndex>(&self, index: I) -> Result<Option<i64>> {
        self.with_cell(index, Value::to_i64)
    }

    pub fn get_f32<I: ColumnIndex>(&self, index: I) -> Result<Option<f32>> {
        self.with_cell(index, |v| Ok(v.to_f64()?.map(|f| f as f32)))
    }

    pub fn get_f64<I: ColumnIndex>(&self, index: I) -> Result<Option<f64>> {
        self.with_cell(index, Value::to_f64)
    }

    pub fn get_timestamp<I: ColumnIndex>(&self, index: I) -> Result<Option<Timestamp>> {
        self.with_cell(index, Value::to_timestamp)
    }

    pub fn get_bytes<I: ColumnIndex>(&self, index: I) -> Result<Option<Vec<u8>>> {
        self.with_cell(index, Value::to_bytes)
    }
}

impl fmt::Debug for TaosResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cursor = self.cursor.lock();
        f.debug_struct("TaosResultSet")
            .field("columns", &self.metadata.column_count())
            .field("position", &cursor.position)
            .field("closed", &cursor.closed)
            .finish()
    }
}

fn narrow<T>(value: &Value) -> Result<Option<T>>
where
    T: TryFrom<i64>,
{
    match value.to_i64()? {
        Some(wide) => T::try_from(wide).map(Some).map_err(|_| {
            TaosError::conversion(format!(
                "value {} out of range for {}",
                wide,
                std::any::type_name::<T>()
            ))
        }),
        None => Ok(None),
    }
}
