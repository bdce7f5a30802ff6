//! TDengine value model shared by both transports.
//!
//! Transports decode their wire representation into [`Value`]s tagged with a
//! [`TaosType`]; the result-set getters convert from here to Rust types.

use std::fmt;

use arrow_schema::{DataType, TimeUnit};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{Result, TaosError};

/// Declared TDengine column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaosType {
    Null,
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    UTinyInt,
    USmallInt,
    UInt,
    UBigInt,
    Float,
    Double,
    Timestamp,
    VarChar,
    NChar,
    Json,
    VarBinary,
    Geometry,
    Decimal,
}

impl TaosType {
    /// Parses a type name as reported by `DESCRIBE` or the REST `column_meta`.
    ///
    /// Parameterized names such as `DECIMAL(10,2)` or `NCHAR(64)` are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        let ty = match base {
            "NULL" => TaosType::Null,
            "BOOL" => TaosType::Bool,
            "TINYINT" => TaosType::TinyInt,
            "SMALLINT" => TaosType::SmallInt,
            "INT" => TaosType::Int,
            "BIGINT" => TaosType::BigInt,
            "TINYINT UNSIGNED" => TaosType::UTinyInt,
            "SMALLINT UNSIGNED" => TaosType::USmallInt,
            "INT UNSIGNED" => TaosType::UInt,
            "BIGINT UNSIGNED" => TaosType::UBigInt,
            "FLOAT" => TaosType::Float,
            "DOUBLE" => TaosType::Double,
            "TIMESTAMP" => TaosType::Timestamp,
            "VARCHAR" | "BINARY" => TaosType::VarChar,
            "NCHAR" => TaosType::NChar,
            "JSON" => TaosType::Json,
            "VARBINARY" => TaosType::VarBinary,
            "GEOMETRY" => TaosType::Geometry,
            "DECIMAL" => TaosType::Decimal,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns the SQL name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            TaosType::Null => "NULL",
            TaosType::Bool => "BOOL",
            TaosType::TinyInt => "TINYINT",
            TaosType::SmallInt => "SMALLINT",
            TaosType::Int => "INT",
            TaosType::BigInt => "BIGINT",
            TaosType::UTinyInt => "TINYINT UNSIGNED",
            TaosType::USmallInt => "SMALLINT UNSIGNED",
            TaosType::UInt => "INT UNSIGNED",
            TaosType::UBigInt => "BIGINT UNSIGNED",
            TaosType::Float => "FLOAT",
            TaosType::Double => "DOUBLE",
            TaosType::Timestamp => "TIMESTAMP",
            TaosType::VarChar => "VARCHAR",
            TaosType::NChar => "NCHAR",
            TaosType::Json => "JSON",
            TaosType::VarBinary => "VARBINARY",
            TaosType::Geometry => "GEOMETRY",
            TaosType::Decimal => "DECIMAL",
        }
    }

    /// Maps this type to the Arrow type used when exporting result metadata.
    pub fn to_arrow(&self, precision: Precision) -> DataType {
        match self {
            TaosType::Null => DataType::Null,
            TaosType::Bool => DataType::Boolean,
            TaosType::TinyInt => DataType::Int8,
            TaosType::SmallInt => DataType::Int16,
            TaosType::Int => DataType::Int32,
            TaosType::BigInt => DataType::Int64,
            TaosType::UTinyInt => DataType::UInt8,
            TaosType::USmallInt => DataType::UInt16,
            TaosType::UInt => DataType::UInt32,
            TaosType::UBigInt => DataType::UInt64,
            TaosType::Float => DataType::Float32,
            TaosType::Double => DataType::Float64,
            TaosType::Timestamp => DataType::Timestamp(precision.time_unit(), None),
            TaosType::VarChar | TaosType::VarBinary | TaosType::Geometry => DataType::Binary,
            TaosType::NChar | TaosType::Json => DataType::Utf8,
            // TDengine DECIMAL(38, 0) is the widest declaration
            TaosType::Decimal => DataType::Decimal128(38, 0),
        }
    }
}

impl fmt::Display for TaosType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timestamp precision of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    #[default]
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl Precision {
    fn time_unit(self) -> TimeUnit {
        match self {
            Precision::Millisecond => TimeUnit::Millisecond,
            Precision::Microsecond => TimeUnit::Microsecond,
            Precision::Nanosecond => TimeUnit::Nanosecond,
        }
    }

    fn units_per_second(self) -> i64 {
        match self {
            Precision::Millisecond => 1_000,
            Precision::Microsecond => 1_000_000,
            Precision::Nanosecond => 1_000_000_000,
        }
    }
}

impl TryFrom<i32> for Precision {
    type Error = TaosError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Precision::Millisecond),
            1 => Ok(Precision::Microsecond),
            2 => Ok(Precision::Nanosecond),
            _ => Err(TaosError::conversion(format!(
                "Invalid timestamp precision: {}",
                value
            ))),
        }
    }
}

/// Raw TDengine timestamp: an epoch offset in the database's precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    raw: i64,
    precision: Precision,
}

impl Timestamp {
    pub fn new(raw: i64, precision: Precision) -> Self {
        Self { raw, precision }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self::new(millis, Precision::Millisecond)
    }

    /// Builds a nanosecond timestamp from a chrono instant.
    ///
    /// Returns `None` outside the range representable in `i64` nanoseconds.
    pub fn from_datetime<Tz: chrono::TimeZone>(dt: &DateTime<Tz>) -> Option<Self> {
        dt.timestamp_nanos_opt()
            .map(|nanos| Self::new(nanos, Precision::Nanosecond))
    }

    pub fn raw(&self) -> i64 {
        self.raw
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Milliseconds since the epoch, truncating finer precision.
    pub fn as_millis(&self) -> i64 {
        match self.precision {
            Precision::Millisecond => self.raw,
            Precision::Microsecond => self.raw.div_euclid(1_000),
            Precision::Nanosecond => self.raw.div_euclid(1_000_000),
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let per_second = self.precision.units_per_second();
        let secs = self.raw.div_euclid(per_second);
        let nanos = self.raw.rem_euclid(per_second) * (1_000_000_000 / per_second);
        DateTime::from_timestamp(secs, nanos as u32)
    }

    pub fn to_naive_utc(&self) -> Option<NaiveDateTime> {
        self.to_datetime().map(|dt| dt.naive_utc())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self.precision {
            Precision::Millisecond => SecondsFormat::Millis,
            Precision::Microsecond => SecondsFormat::Micros,
            Precision::Nanosecond => SecondsFormat::Nanos,
        };
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(format, true)),
            None => write!(f, "{}", self.raw),
        }
    }
}

/// Column descriptor captured when a row set is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: TaosType,
    /// Declared byte length for variable-width types, 0 when unknown.
    pub length: u32,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, ty: TaosType) -> Self {
        Self {
            name: name.into(),
            ty,
            length: 0,
            nullable: true,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }
}

/// One decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    UTinyInt(u8),
    USmallInt(u16),
    UInt(u32),
    UBigInt(u64),
    Float(f32),
    Double(f64),
    Timestamp(Timestamp),
    VarChar(String),
    NChar(String),
    Json(String),
    VarBinary(Vec<u8>),
    Geometry(Vec<u8>),
    /// Decimal kept in its canonical text form to avoid lossy rounding.
    Decimal(String),
}

/// One fetched row, in column order.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn taos_type(&self) -> TaosType {
        match self {
            Value::Null => TaosType::Null,
            Value::Bool(_) => TaosType::Bool,
            Value::TinyInt(_) => TaosType::TinyInt,
            Value::SmallInt(_) => TaosType::SmallInt,
            Value::Int(_) => TaosType::Int,
            Value::BigInt(_) => TaosType::BigInt,
            Value::UTinyInt(_) => TaosType::UTinyInt,
            Value::USmallInt(_) => TaosType::USmallInt,
            Value::UInt(_) => TaosType::UInt,
            Value::UBigInt(_) => TaosType::UBigInt,
            Value::Float(_) => TaosType::Float,
            Value::Double(_) => TaosType::Double,
            Value::Timestamp(_) => TaosType::Timestamp,
            Value::VarChar(_) => TaosType::VarChar,
            Value::NChar(_) => TaosType::NChar,
            Value::Json(_) => TaosType::Json,
            Value::VarBinary(_) => TaosType::VarBinary,
            Value::Geometry(_) => TaosType::Geometry,
            Value::Decimal(_) => TaosType::Decimal,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Value::VarChar(s) | Value::NChar(s) | Value::Json(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    fn mismatch(&self, target: &str) -> TaosError {
        TaosError::conversion(format!(
            "cannot convert {} value to {}",
            self.taos_type(),
            target
        ))
    }

    /// Renders any non-null value as text.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::VarBinary(b) | Value::Geometry(b) => Some(String::from_utf8_lossy(b).into_owned()),
            other => Some(other.to_string()),
        }
    }

    pub fn to_bool(&self) -> Result<Option<bool>> {
        let value = match self {
            Value::Null => return Ok(None),
            Value::Bool(v) => *v,
            Value::Float(v) => *v != 0.0,
            Value::Double(v) => *v != 0.0,
            Value::VarChar(_) | Value::NChar(_) => {
                let text = self.text().unwrap_or_default().trim();
                if text.eq_ignore_ascii_case("true") || text == "1" {
                    true
                } else if text.eq_ignore_ascii_case("false") || text == "0" {
                    false
                } else {
                    return Err(self.mismatch("bool"));
                }
            }
            other => match other.integral() {
                Some(v) => v != 0,
                None => return Err(other.mismatch("bool")),
            },
        };
        Ok(Some(value))
    }

    fn integral(&self) -> Option<i128> {
        match self {
            Value::Bool(v) => Some(i128::from(*v)),
            Value::TinyInt(v) => Some(i128::from(*v)),
            Value::SmallInt(v) => Some(i128::from(*v)),
            Value::Int(v) => Some(i128::from(*v)),
            Value::BigInt(v) => Some(i128::from(*v)),
            Value::UTinyInt(v) => Some(i128::from(*v)),
            Value::USmallInt(v) => Some(i128::from(*v)),
            Value::UInt(v) => Some(i128::from(*v)),
            Value::UBigInt(v) => Some(i128::from(*v)),
            Value::Timestamp(ts) => Some(i128::from(ts.raw())),
            _ => None,
        }
    }

    /// Converts to a signed 64-bit integer; fractional values truncate.
    pub fn to_i64(&self) -> Result<Option<i64>> {
        let wide = match self {
            Value::Null => return Ok(None),
            Value::Float(v) => float_to_integral(f64::from(*v)).ok_or_else(|| self.mismatch("i64"))?,
            Value::Double(v) => float_to_integral(*v).ok_or_else(|| self.mismatch("i64"))?,
            Value::VarChar(_) | Value::NChar(_) | Value::Decimal(_) => {
                let text = self.text().unwrap_or_default().trim();
                match text.parse::<i64>() {
                    Ok(v) => i128::from(v),
                    Err(_) => text
                        .parse::<f64>()
                        .ok()
                        .and_then(float_to_integral)
                        .ok_or_else(|| self.mismatch("i64"))?,
                }
            }
            other => other.integral().ok_or_else(|| other.mismatch("i64"))?,
        };
        i64::try_from(wide)
            .map(Some)
            .map_err(|_| TaosError::conversion(format!("value {} out of range for i64", wide)))
    }

    pub fn to_f64(&self) -> Result<Option<f64>> {
        let value = match self {
            Value::Null => return Ok(None),
            Value::Float(v) => f64::from(*v),
            Value::Double(v) => *v,
            Value::VarChar(_) | Value::NChar(_) | Value::Decimal(_) => self
                .text()
                .unwrap_or_default()
                .trim()
                .parse::<f64>()
                .map_err(|_| self.mismatch("f64"))?,
            Value::Timestamp(_) => return Err(self.mismatch("f64")),
            other => other.integral().ok_or_else(|| other.mismatch("f64"))? as f64,
        };
        Ok(Some(value))
    }

    /// Converts to a timestamp. Integers are read as epoch milliseconds and
    /// text must be RFC 3339.
    pub fn to_timestamp(&self) -> Result<Option<Timestamp>> {
        let ts = match self {
            Value::Null => return Ok(None),
            Value::Timestamp(ts) => *ts,
            Value::BigInt(v) => Timestamp::from_millis(*v),
            Value::VarChar(_) | Value::NChar(_) => {
                parse_timestamp_text(self.text().unwrap_or_default()).ok_or_else(|| self.mismatch("timestamp"))?
            }
            other => return Err(other.mismatch("timestamp")),
        };
        Ok(Some(ts))
    }

    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>> {
        match self {
            Value::Null => Ok(None),
            Value::VarBinary(b) | Value::Geometry(b) => Ok(Some(b.clone())),
            Value::VarChar(s) | Value::NChar(s) | Value::Json(s) => Ok(Some(s.as_bytes().to_vec())),
            other => Err(other.mismatch("bytes")),
        }
    }

    /// Renders this value as a SQL literal for client-side parameter binding.
    ///
    /// Timestamps are written as quoted RFC 3339 text so the engine reads
    /// them correctly at any database precision.
    pub fn to_sql_literal(&self) -> Result<String> {
        let literal = match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Timestamp(ts) => match ts.to_datetime() {
                Some(_) => quote_literal(&ts.to_string()),
                None => ts.raw().to_string(),
            },
            Value::VarChar(s) | Value::NChar(s) | Value::Json(s) => quote_literal(s),
            Value::VarBinary(b) | Value::Geometry(b) => quote_literal(&String::from_utf8_lossy(b)),
            Value::Decimal(s) if is_decimal_numeral(s) => s.clone(),
            Value::Decimal(s) => {
                return Err(TaosError::invalid_argument(format!("'{}' is not a decimal number", s)));
            }
            other => other.to_string(),
        };
        Ok(literal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::UTinyInt(v) => write!(f, "{}", v),
            Value::USmallInt(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::UBigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::VarChar(s) | Value::NChar(s) | Value::Json(s) | Value::Decimal(s) => f.write_str(s),
            Value::VarBinary(b) | Value::Geometry(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

fn float_to_integral(v: f64) -> Option<i128> {
    if v.is_finite() && v.abs() < 1.8e19 {
        Some(v.trunc() as i128)
    } else {
        None
    }
}

/// Parses RFC 3339 text, or `YYYY-MM-DD HH:MM:SS[.fff]` read as UTC.
pub(crate) fn parse_timestamp_text(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Timestamp::from_datetime(&dt);
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .and_then(|naive| Timestamp::from_datetime(&naive.and_utc()))
}

/// Digits with an optional sign, fraction and exponent.
fn is_decimal_numeral(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && s.parse::<f64>().is_ok()
}

fn quote_literal(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}
