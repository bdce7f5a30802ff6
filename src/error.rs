//! Error types for the TDengine driver.
//!
//! Every fallible operation returns [`TaosError`]. The kind is private; callers
//! classify errors through the `is_*` predicates and read engine codes with
//! [`TaosError::code`].

use std::backtrace::Backtrace;
use std::fmt::{Display, Formatter};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TaosError>;

/// Error type for driver operations.
///
/// Carries the backtrace captured at construction so failures raised deep
/// inside a transport can still be located.
#[derive(Debug)]
pub struct TaosError {
    kind: ErrorKind,
    backtrace: Backtrace,
}

impl TaosError {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// The transport session could not be established or was lost.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection(msg.into()))
    }

    /// The session was closed before the call.
    pub fn connection_closed() -> Self {
        Self::new(ErrorKind::ConnectionClosed)
    }

    pub(crate) fn statement_closed() -> Self {
        Self::new(ErrorKind::StatementClosed)
    }

    pub(crate) fn result_set_closed() -> Self {
        Self::new(ErrorKind::ResultSetClosed)
    }

    /// The engine rejected or failed a statement.
    pub fn execution(code: Option<i32>, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution {
            code,
            message: msg.into(),
        })
    }

    pub(crate) fn conversion(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeConversion(msg.into()))
    }

    pub(crate) fn invalid_column(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidColumn(msg.into()))
    }

    pub(crate) fn unsupported(operation: &'static str) -> Self {
        Self::new(ErrorKind::Unsupported(operation))
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument(msg.into()))
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState(msg.into()))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the engine-reported error code, if the engine supplied one.
    pub fn code(&self) -> Option<i32> {
        match &self.kind {
            ErrorKind::Execution { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self.kind, ErrorKind::Connection(_))
    }

    /// True for any "used after close" error: connection, statement or result set.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionClosed | ErrorKind::StatementClosed | ErrorKind::ResultSetClosed
        )
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ConnectionClosed)
    }

    pub fn is_statement_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::StatementClosed)
    }

    pub fn is_result_set_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ResultSetClosed)
    }

    pub fn is_execution(&self) -> bool {
        matches!(self.kind, ErrorKind::Execution { .. })
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self.kind, ErrorKind::TypeConversion(_))
    }

    pub fn is_invalid_column(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidColumn(_))
    }

    /// True when the operation is part of the tabular-access surface but not
    /// implemented by this driver.
    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind, ErrorKind::Unsupported(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidArgument(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidState(_))
    }
}

impl Display for TaosError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ErrorKind::Connection(msg) => write!(f, "Connection error: {}", msg),
            ErrorKind::ConnectionClosed => f.write_str("Connection is closed"),
            ErrorKind::StatementClosed => f.write_str("Statement is closed"),
            ErrorKind::ResultSetClosed => f.write_str("Result set is closed"),
            ErrorKind::Execution {
                code: Some(code),
                message,
            } => write!(f, "Execution error [0x{:04x}]: {}", code, message),
            ErrorKind::Execution { code: None, message } => {
                write!(f, "Execution error: {}", message)
            }
            ErrorKind::TypeConversion(msg) => write!(f, "Type conversion error: {}", msg),
            ErrorKind::InvalidColumn(msg) => write!(f, "Invalid column: {}", msg),
            ErrorKind::Unsupported(op) => write!(f, "Operation not supported: {}", op),
            ErrorKind::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            ErrorKind::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for TaosError {}

#[derive(Debug)]
enum ErrorKind {
    Connection(String),
    ConnectionClosed,
    StatementClosed,
    ResultSetClosed,
    Execution { code: Option<i32>, message: String },
    TypeConversion(String),
    InvalidColumn(String),
    Unsupported(&'static str),
    InvalidArgument(String),
    InvalidState(String),
}

/// Errors coming back from the native client are statement failures unless
/// they are raised while connecting; connect paths wrap them explicitly.
impl From<taos_client::Error> for TaosError {
    fn from(err: taos_client::Error) -> Self {
        Self::execution(None, err.to_string())
    }
}

impl From<ureq::Error> for TaosError {
    fn from(err: ureq::Error) -> Self {
        Self::connection(err.to_string())
    }
}

impl From<serde_json::Error> for TaosError {
    fn from(err: serde_json::Error) -> Self {
        Self::connection(format!("malformed REST response: {}", err))
    }
}
