//! Statement implementation for the TDengine driver.
//!
//! A `TaosStatement` executes SQL text through its connection's transport and
//! holds at most one current result: either a [`TaosResultSet`] or an update
//! count. It also keeps a queue of SQL texts for batch execution.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::connection::TaosConnection;
use crate::error::{Result, TaosError};
use crate::reader::TaosResultSet;
use crate::transport::Outcome;

/// Per-entry result of [`TaosStatement::execute_batch`].
#[derive(Debug)]
pub enum BatchOutcome {
    /// The entry reported an affected-row count.
    Count(i64),
    /// The entry succeeded without a count, e.g. it returned rows.
    SuccessNoInfo,
    /// The entry failed; later entries still ran.
    Failed(TaosError),
}

impl BatchOutcome {
    pub const SUCCESS_NO_INFO: i64 = -2;
    pub const EXECUTE_FAILED: i64 = -3;

    /// Numeric form: the count, [`Self::SUCCESS_NO_INFO`] or
    /// [`Self::EXECUTE_FAILED`].
    pub fn code(&self) -> i64 {
        match self {
            BatchOutcome::Count(n) => *n,
            BatchOutcome::SuccessNoInfo => Self::SUCCESS_NO_INFO,
            BatchOutcome::Failed(_) => Self::EXECUTE_FAILED,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&TaosError> {
        match self {
            BatchOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Fetch direction hint. Only forward fetching is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Forward = 1000,
    Reverse = 1001,
    Unknown = 1002,
}

impl TryFrom<i32> for FetchDirection {
    type Error = TaosError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1000 => Ok(FetchDirection::Forward),
            1001 => Ok(FetchDirection::Reverse),
            1002 => Ok(FetchDirection::Unknown),
            other => Err(TaosError::invalid_argument(format!(
                "invalid fetch direction {}",
                other
            ))),
        }
    }
}

/// What [`TaosStatement::more_results_with`] does with the current result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultDisposition {
    CloseCurrent,
    KeepCurrent,
    CloseAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSetConcurrency {
    ReadOnly,
    Updatable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSetType {
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holdability {
    HoldCursorsOverCommit,
    CloseCursorsAtCommit,
}

/// How generated keys would be requested from an execute call.
#[derive(Debug, Clone, Copy)]
pub enum GeneratedKeys<'a> {
    Flag(i32),
    ColumnIndexes(&'a [i32]),
    ColumnNames(&'a [&'a str]),
}

const MAX_FIELD_SIZE: i32 = 16 * 1024;

/// Result left behind by the last execution.
#[derive(Debug, Default)]
enum CurrentResult {
    #[default]
    None,
    Rows(TaosResultSet),
    UpdateCount(i64),
}

impl CurrentResult {
    /// Closes an open result set and forgets the current result.
    fn release(&mut self) {
        if let CurrentResult::Rows(rs) = std::mem::take(self) {
            rs.close();
        }
    }
}

#[derive(Debug, Default)]
struct StatementState {
    current: CurrentResult,
    batch: Vec<String>,
}

pub(crate) struct StatementInner {
    id: u64,
    conn: TaosConnection,
    state: Mutex<StatementState>,
    closed: AtomicBool,
}

impl StatementInner {
    pub(crate) fn new(id: u64, conn: TaosConnection) -> Self {
        Self {
            id,
            conn,
            state: Mutex::new(StatementState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Locks the statement state, failing if the statement is closed.
    ///
    /// The flag is checked under the lock so a concurrent `close` is observed.
    fn lock_open(&self) -> Result<MutexGuard<'_, StatementState>> {
        let state = self.state.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(TaosError::statement_closed());
        }
        Ok(state)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TaosError::statement_closed())
        } else {
            Ok(())
        }
    }

    /// Closes the statement without deregistering it.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        state.current.release();
        state.batch.clear();
        log::debug!("statement {} closed", self.id);
    }
}

impl Drop for StatementInner {
    fn drop(&mut self) {
        self.state.get_mut().current.release();
        self.conn.deregister(self.id);
    }
}

/// SQL statement bound to a connection.
pub struct TaosStatement {
    inner: Arc<StatementInner>,
}

impl TaosStatement {
    pub(crate) fn new(inner: Arc<StatementInner>) -> Self {
        Self { inner }
    }

    /// Executes one SQL text. Returns true when it produced rows.
    ///
    /// The previous result set is closed before the new SQL is dispatched.
    /// On failure the statement is left without a current result.
    pub fn execute(&self, sql: &str) -> Result<bool> {
        let mut state = self.inner.lock_open()?;
        state.current.release();
        let outcome = self.inner.conn.dispatch(sql)?;
        let has_rows = matches!(outcome, Outcome::Rows(_));
        state.current = match outcome {
            Outcome::Rows(source) => CurrentResult::Rows(TaosResultSet::new(source)),
            Outcome::Affected(n) => CurrentResult::UpdateCount(n),
        };
        Ok(has_rows)
    }

    /// Executes SQL that must produce rows.
    pub fn execute_query(&self, sql: &str) -> Result<TaosResultSet> {
        self.execute(sql)?;
        let state = self.inner.lock_open()?;
        match &state.current {
            CurrentResult::Rows(rs) => Ok(rs.clone()),
            _ => Err(TaosError::invalid_state(
                "statement produced an update count, not rows",
            )),
        }
    }

    /// Executes SQL that must produce an affected-row count.
    ///
    /// If the SQL returns rows they are released and the call fails.
    pub fn execute_update(&self, sql: &str) -> Result<i64> {
        self.execute(sql)?;
        let mut state = self.inner.lock_open()?;
        if let CurrentResult::UpdateCount(n) = state.current {
            return Ok(n);
        }
        state.current.release();
        Err(TaosError::invalid_state(
            "statement produced rows, not an update count",
        ))
    }

    /// The current result set, if the last execution produced rows.
    pub fn result_set(&self) -> Result<Option<TaosResultSet>> {
        let state = self.inner.lock_open()?;
        Ok(match &state.current {
            CurrentResult::Rows(rs) => Some(rs.clone()),
            _ => None,
        })
    }

    /// The current update count, or -1 when there is none.
    pub fn update_count(&self) -> Result<i64> {
        let state = self.inner.lock_open()?;
        Ok(match state.current {
            CurrentResult::UpdateCount(n) => n,
            _ => -1,
        })
    }

    /// Appends SQL to the batch queue.
    pub fn add_batch(&self, sql: &str) -> Result<()> {
        let mut state = self.inner.lock_open()?;
        if sql.trim().is_empty() {
            return Err(TaosError::invalid_argument("batch SQL must not be empty"));
        }
        state.batch.push(sql.to_string());
        Ok(())
    }

    pub fn clear_batch(&self) -> Result<()> {
        self.inner.lock_open()?.batch.clear();
        Ok(())
    }

    /// Number of queued batch entries.
    pub fn batch_len(&self) -> Result<usize> {
        Ok(self.inner.lock_open()?.batch.len())
    }

    /// Runs the queued SQL texts in order, one outcome per entry.
    ///
    /// Failures are recorded and execution continues with the next entry. The
    /// queue is emptied whether or not anything failed, and the statement is
    /// left without a current result.
    pub fn execute_batch(&self) -> Result<Vec<BatchOutcome>> {
        let mut state = self.inner.lock_open()?;
        state.current.release();
        let queue = std::mem::take(&mut state.batch);
        let mut outcomes = Vec::with_capacity(queue.len());
        for (i, sql) in queue.iter().enumerate() {
            let outcome = match self.inner.conn.dispatch(sql) {
                Ok(Outcome::Affected(n)) => BatchOutcome::Count(n),
                Ok(Outcome::Rows(mut source)) => {
                    source.close();
                    BatchOutcome::SuccessNoInfo
                }
                Err(err) => {
                    log::warn!("batch entry {} failed: {}", i, err);
                    BatchOutcome::Failed(err)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Closes the current result set and reports that no further results exist.
    pub fn more_results(&self) -> Result<bool> {
        self.more_results_with(ResultDisposition::CloseCurrent)
    }

    pub fn more_results_with(&self, disposition: ResultDisposition) -> Result<bool> {
        let mut state = self.inner.lock_open()?;
        match disposition {
            ResultDisposition::CloseCurrent => {
                state.current.release();
                Ok(false)
            }
            ResultDisposition::KeepCurrent => Err(TaosError::unsupported("more_results(KeepCurrent)")),
            ResultDisposition::CloseAll => Err(TaosError::unsupported("more_results(CloseAll)")),
        }
    }

    /// Closes the statement and its current result set, and deregisters it
    /// from the connection. Calling it again is a no-op.
    pub fn close(&self) {
        self.inner.close();
        self.inner.conn.deregister(self.inner.id);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The connection that created this statement.
    pub fn connection(&self) -> Result<TaosConnection> {
        self.inner.ensure_open()?;
        Ok(self.inner.conn.clone())
    }

    pub fn max_field_size(&self) -> Result<i32> {
        self.inner.ensure_open()?;
        Ok(MAX_FIELD_SIZE)
    }

    /// Accepted for compatibility; field sizes are not truncated.
    pub fn set_max_field_size(&self, max: i32) -> Result<()> {
        self.inner.ensure_open()?;
        non_negative(max, "max field size")
    }

    pub fn max_rows(&self) -> Result<i32> {
        self.inner.ensure_open()?;
        Ok(0)
    }

    /// Accepted for compatibility; row counts are not limited.
    pub fn set_max_rows(&self, max: i32) -> Result<()> {
        self.inner.ensure_open()?;
        non_negative(max, "max rows")
    }

    pub fn query_timeout(&self) -> Result<i32> {
        self.inner.ensure_open()?;
        Ok(0)
    }

    pub fn set_query_timeout(&self, seconds: i32) -> Result<()> {
        self.inner.ensure_open()?;
        non_negative(seconds, "query timeout")
    }

    pub fn fetch_direction(&self) -> Result<FetchDirection> {
        self.inner.ensure_open()?;
        Ok(FetchDirection::Forward)
    }

    pub fn set_fetch_direction(&self, direction: i32) -> Result<()> {
        self.inner.ensure_open()?;
        FetchDirection::try_from(direction).map(|_| ())
    }

    pub fn fetch_size(&self) -> Result<i32> {
        self.inner.ensure_open()?;
        Ok(0)
    }

    pub fn set_fetch_size(&self, rows: i32) -> Result<()> {
        self.inner.ensure_open()?;
        non_negative(rows, "fetch size")
    }

    pub fn set_escape_processing(&self, _enable: bool) -> Result<()> {
        self.inner.ensure_open()
    }

    pub fn set_poolable(&self, _poolable: bool) -> Result<()> {
        self.inner.ensure_open()
    }

    pub fn is_poolable(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(false)
    }

    pub fn close_on_completion(&self) -> Result<()> {
        self.inner.ensure_open()
    }

    pub fn is_close_on_completion(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(false)
    }

    pub fn warnings(&self) -> Result<Option<String>> {
        self.inner.ensure_open()?;
        Ok(None)
    }

    pub fn clear_warnings(&self) -> Result<()> {
        self.inner.ensure_open()
    }

    pub fn result_set_concurrency(&self) -> Result<ResultSetConcurrency> {
        self.inner.ensure_open()?;
        Ok(ResultSetConcurrency::ReadOnly)
    }

    pub fn result_set_type(&self) -> Result<ResultSetType> {
        self.inner.ensure_open()?;
        Ok(ResultSetType::ForwardOnly)
    }

    pub fn result_set_holdability(&self) -> Result<Holdability> {
        self.inner.ensure_open()?;
        Ok(Holdability::HoldCursorsOverCommit)
    }

    pub fn cancel(&self) -> Result<()> {
        Err(TaosError::unsupported("cancel"))
    }

    pub fn set_cursor_name(&self, _name: &str) -> Result<()> {
        Err(TaosError::unsupported("set_cursor_name"))
    }

    pub fn generated_keys(&self) -> Result<TaosResultSet> {
        Err(TaosError::unsupported("generated_keys"))
    }

    /// TDengine does not generate keys; always `Unsupported`.
    pub fn execute_with_keys(&self, _sql: &str, _keys: GeneratedKeys<'_>) -> Result<bool> {
        Err(TaosError::unsupported("execute_with_keys"))
    }

    pub fn execute_update_with_keys(&self, _sql: &str, _keys: GeneratedKeys<'_>) -> Result<i64> {
        Err(TaosError::unsupported("execute_update_with_keys"))
    }
}

impl fmt::Debug for TaosStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaosStatement")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn non_negative(value: i32, what: &str) -> Result<()> {
    if value < 0 {
        Err(TaosError::invalid_argument(format!(
            "{} must not be negative, got {}",
            what, value
        )))
    } else {
        Ok(())
    }
}
