//! Prepared statements with client-side parameter binding.
//!
//! Parameters are rendered into the SQL text as literals when the statement
//! executes. `?` marks inside quoted literals and backquoted identifiers are
//! left alone.

use std::fmt;

use parking_lot::Mutex;

use crate::error::{Result, TaosError};
use crate::reader::TaosResultSet;
use crate::statement::{BatchOutcome, TaosStatement};
use crate::types::{Timestamp, Value};
use crate::utils::split_placeholders;

/// Statement over SQL text with `?` placeholders, bound by 0-based index.
pub struct TaosPreparedStatement {
    statement: TaosStatement,
    sql: String,
    fragments: Vec<String>,
    params: Mutex<Vec<Option<Value>>>,
}

impl TaosPreparedStatement {
    pub(crate) fn new(statement: TaosStatement, sql: &str) -> Self {
        let fragments: Vec<String> = split_placeholders(sql).into_iter().map(str::to_string).collect();
        let count = fragments.len() - 1;
        Self {
            statement,
            sql: sql.to_string(),
            fragments,
            params: Mutex::new(vec![None; count]),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.fragments.len() - 1
    }

    /// The underlying statement, for options and result access.
    pub fn statement(&self) -> &TaosStatement {
        &self.statement
    }

    pub fn set_value(&self, index: usize, value: Value) -> Result<()> {
        if self.statement.is_closed() {
            return Err(TaosError::statement_closed());
        }
        let mut params = self.params.lock();
        let count = params.len();
        let slot = params.get_mut(index).ok_or_else(|| {
            TaosError::invalid_argument(format!(
                "parameter index {} out of range for {} parameters",
                index, count
            ))
        })?;
        *slot = Some(value);
        Ok(())
    }

    pub fn set_null(&self, index: usize) -> Result<()> {
        self.set_value(index, Value::Null)
    }

    pub fn set_bool(&self, index: usize, value: bool) -> Result<()> {
        self.set_value(index, Value::Bool(value))
    }

    pub fn set_i32(&self, index: usize, value: i32) -> Result<()> {
        self.set_value(index, Value::Int(value))
    }

    pub fn set_i64(&self, index: usize, value: i64) -> Result<()> {
        self.set_value(index, Value::BigInt(value))
    }

    pub fn set_f32(&self, index: usize, value: f32) -> Result<()> {
        self.set_value(index, Value::Float(value))
    }

    pub fn set_f64(&self, index: usize, value: f64) -> Result<()> {
        self.set_value(index, Value::Double(value))
    }

    pub fn set_string(&self, index: usize, value: impl Into<String>) -> Result<()> {
        self.set_value(index, Value::VarChar(value.into()))
    }

    pub fn set_timestamp(&self, index: usize, value: Timestamp) -> Result<()> {
        self.set_value(index, Value::Timestamp(value))
    }

    pub fn set_bytes(&self, index: usize, value: &[u8]) -> Result<()> {
        self.set_value(index, Value::VarBinary(value.to_vec()))
    }

    /// Unbinds every parameter.
    pub fn clear_parameters(&self) -> Result<()> {
        if self.statement.is_closed() {
            return Err(TaosError::statement_closed());
        }
        self.params.lock().iter_mut().for_each(|p| *p = None);
        Ok(())
    }

    /// Renders the SQL with the bound parameters substituted.
    pub fn render(&self) -> Result<String> {
        let params = self.params.lock();
        let mut sql = String::with_capacity(self.sql.len());
        for (i, fragment) in self.fragments.iter().enumerate() {
            sql.push_str(fragment);
            if i < params.len() {
                let value = params[i]
                    .as_ref()
                    .ok_or_else(|| TaosError::invalid_argument(format!("parameter {} is not bound", i)))?;
                sql.push_str(&value.to_sql_literal()?);
            }
        }
        Ok(sql)
    }

    pub fn execute(&self) -> Result<bool> {
        self.statement.execute(&self.render()?)
    }

    pub fn execute_query(&self) -> Result<TaosResultSet> {
        self.statement.execute_query(&self.render()?)
    }

    pub fn execute_update(&self) -> Result<i64> {
        self.statement.execute_update(&self.render()?)
    }

    /// Queues the SQL rendered with the current parameters.
    pub fn add_batch(&self) -> Result<()> {
        self.statement.add_batch(&self.render()?)
    }

    pub fn clear_batch(&self) -> Result<()> {
        self.statement.clear_batch()
    }

    pub fn execute_batch(&self) -> Result<Vec<BatchOutcome>> {
        self.statement.execute_batch()
    }

    pub fn close(&self) {
        self.statement.close();
    }

    pub fn is_closed(&self) -> bool {
        self.statement.is_closed()
    }
}

impl fmt::Debug for TaosPreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaosPreparedStatement")
            .field("sql", &self.sql)
            .field("parameters", &self.parameter_count())
            .field("statement", &self.statement)
            .finish()
    }
}
