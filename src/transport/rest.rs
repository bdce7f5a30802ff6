//! REST transport over the taosAdapter HTTP API.
//!
//! Every statement is one `POST /rest/sql` round trip; the whole response is
//! decoded before the statement returns, so rows are always served from a
//! [`BufferedRows`].

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use ureq::{Agent, AgentBuilder};

use super::{BufferedRows, Outcome, Transport, TransportKind};
use crate::database::ConnectParams;
use crate::error::{Result, TaosError};
use crate::types::{ColumnDescriptor, Precision, Row, TaosType, Timestamp, Value, parse_timestamp_text};

const USER_AGENT: &str = concat!("taos-driver/", env!("CARGO_PKG_VERSION"));

/// Column name the adapter uses for affected-row results.
const AFFECTED_ROWS: &str = "affected_rows";

/// Session held through the REST API.
pub struct RestTransport {
    agent: Agent,
    base_url: String,
    /// `None` once the transport is closed.
    token: RwLock<Option<String>>,
    database: RwLock<Option<String>>,
    timezone: Option<String>,
}

impl RestTransport {
    fn authorization(&self) -> Result<String> {
        self.token
            .read()
            .as_ref()
            .map(|token| format!("Taosd {}", token))
            .ok_or_else(TaosError::connection_closed)
    }

    fn sql_url(&self) -> String {
        let mut url = format!("{}/rest/sql", self.base_url);
        if let Some(db) = self.database.read().as_deref() {
            url.push('/');
            url.push_str(&urlencoding::encode(db));
        }
        if let Some(tz) = &self.timezone {
            url.push_str("?tz=");
            url.push_str(&urlencoding::encode(tz));
        }
        url
    }

    fn post_sql(&self, sql: &str) -> Result<RestResponse> {
        let authorization = self.authorization()?;
        let url = self.sql_url();
        log::debug!("POST {} ({} bytes)", url, sql.len());
        let body = match self
            .agent
            .post(&url)
            .set("Authorization", &authorization)
            .send_string(sql)
        {
            Ok(response) => response.into_string().map_err(|e| {
                TaosError::connection(format!("failed to read REST response: {}", e))
            })?,
            Err(ureq::Error::Status(status, response)) => {
                // The adapter reports engine errors in the JSON body of non-2xx replies too.
                let body = response.into_string().unwrap_or_default();
                return Err(match serde_json::from_str::<RestResponse>(&body) {
                    Ok(parsed) if parsed.code != 0 => parsed.into_error(),
                    _ => TaosError::connection(format!("HTTP status {}: {}", status, body)),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let response: RestResponse = serde_json::from_str(&body)?;
        if response.code != 0 {
            return Err(response.into_error());
        }
        Ok(response)
    }
}

impl Transport for RestTransport {
    fn connect(params: &ConnectParams) -> Result<Self> {
        let scheme = if params.tls { "https" } else { "http" };
        let base_url = format!("{}://{}:{}", scheme, params.host, params.port);
        let agent = AgentBuilder::new()
            .timeout(params.timeout)
            .user_agent(USER_AGENT)
            .build();

        let login_url = format!(
            "{}/rest/login/{}/{}",
            base_url,
            urlencoding::encode(&params.user),
            urlencoding::encode(&params.password)
        );
        let body = agent
            .get(&login_url)
            .call()
            .map_err(|e| TaosError::connection(format!("REST login failed: {}", e)))?
            .into_string()
            .map_err(|e| TaosError::connection(format!("failed to read login response: {}", e)))?;
        let login: RestResponse = serde_json::from_str(&body)?;
        if login.code != 0 {
            return Err(TaosError::connection(format!(
                "REST login rejected [0x{:04x}]: {}",
                login.code,
                login.desc.unwrap_or_default()
            )));
        }
        let token = login
            .desc
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TaosError::connection("REST login returned no token"))?;

        log::debug!("REST session opened at {}", base_url);
        Ok(Self {
            agent,
            base_url,
            token: RwLock::new(Some(token)),
            database: RwLock::new(params.database.clone()),
            timezone: params.settings.timezone.clone(),
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Rest
    }

    fn execute(&self, sql: &str) -> Result<Outcome> {
        self.post_sql(sql)?.into_outcome()
    }

    /// The adapter is stateless; the database only changes the request path,
    /// so an unknown name surfaces on the next statement.
    fn use_database(&self, database: &str) -> Result<()> {
        self.authorization()?;
        *self.database.write() = Some(database.to_string());
        Ok(())
    }

    fn server_version(&self) -> Result<String> {
        let response = self.post_sql("select server_version()")?;
        response
            .data
            .first()
            .and_then(|row| row.first())
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaosError::connection("server_version() returned no value"))
    }

    fn close(&self) -> Result<()> {
        self.token.write().take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.token.read().is_none()
    }
}

/// Body of every adapter reply.
#[derive(Debug, Deserialize)]
struct RestResponse {
    code: i32,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    column_meta: Vec<(String, JsonValue, u32)>,
    #[serde(default)]
    data: Vec<Vec<JsonValue>>,
}

impl RestResponse {
    fn into_error(self) -> TaosError {
        TaosError::execution(Some(self.code), self.desc.unwrap_or_default())
    }

    fn is_affected_rows(&self) -> bool {
        matches!(self.column_meta.as_slice(), [(name, _, _)] if name == AFFECTED_ROWS)
    }

    fn into_outcome(self) -> Result<Outcome> {
        if self.is_affected_rows() {
            let count = self
                .data
                .first()
                .and_then(|row| row.first())
                .and_then(JsonValue::as_i64)
                .unwrap_or(0);
            return Ok(Outcome::Affected(count));
        }

        let columns = self
            .column_meta
            .iter()
            .map(|(name, ty, length)| -> Result<ColumnDescriptor> {
                Ok(ColumnDescriptor::new(name, column_type(ty)?).with_length(*length))
            })
            .collect::<Result<Vec<_>>>()?;
        let rows = self
            .data
            .into_iter()
            .map(|row| decode_row(&columns, row))
            .collect::<Result<Vec<Row>>>()?;
        // Text timestamps are parsed at nanosecond precision.
        let rows = BufferedRows::new(columns, rows).with_precision(Precision::Nanosecond);
        Ok(Outcome::Rows(Box::new(rows)))
    }
}

/// Reads a `column_meta` type, given either by name or by numeric type code.
fn column_type(ty: &JsonValue) -> Result<TaosType> {
    let parsed = match ty {
        JsonValue::String(name) => TaosType::from_name(name),
        JsonValue::Number(code) => code.as_u64().and_then(type_from_code),
        _ => None,
    };
    parsed.ok_or_else(|| TaosError::conversion(format!("unknown column type {}", ty)))
}

fn type_from_code(code: u64) -> Option<TaosType> {
    let ty = match code {
        0 => TaosType::Null,
        1 => TaosType::Bool,
        2 => TaosType::TinyInt,
        3 => TaosType::SmallInt,
        4 => TaosType::Int,
        5 => TaosType::BigInt,
        6 => TaosType::Float,
        7 => TaosType::Double,
        8 => TaosType::VarChar,
        9 => TaosType::Timestamp,
        10 => TaosType::NChar,
        11 => TaosType::UTinyInt,
        12 => TaosType::USmallInt,
        13 => TaosType::UInt,
        14 => TaosType::UBigInt,
        15 => TaosType::Json,
        16 => TaosType::VarBinary,
        17 => TaosType::Decimal,
        20 => TaosType::Geometry,
        _ => return None,
    };
    Some(ty)
}

fn decode_row(columns: &[ColumnDescriptor], row: Vec<JsonValue>) -> Result<Row> {
    if row.len() != columns.len() {
        return Err(TaosError::conversion(format!(
            "row has {} values for {} columns",
            row.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .zip(row)
        .map(|(column, value)| decode_value(column.ty, value))
        .collect()
}

fn decode_value(ty: TaosType, value: JsonValue) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || TaosError::conversion(format!("cannot decode {} as {}", value, ty));
    let decoded = match ty {
        TaosType::Null => Value::Null,
        TaosType::Bool => match &value {
            JsonValue::Bool(v) => Value::Bool(*v),
            JsonValue::Number(n) => Value::Bool(n.as_i64().ok_or_else(mismatch)? != 0),
            _ => return Err(mismatch()),
        },
        TaosType::TinyInt => Value::TinyInt(signed(&value).ok_or_else(mismatch)?),
        TaosType::SmallInt => Value::SmallInt(signed(&value).ok_or_else(mismatch)?),
        TaosType::Int => Value::Int(signed(&value).ok_or_else(mismatch)?),
        TaosType::BigInt => Value::BigInt(value.as_i64().ok_or_else(mismatch)?),
        TaosType::UTinyInt => Value::UTinyInt(unsigned(&value).ok_or_else(mismatch)?),
        TaosType::USmallInt => Value::USmallInt(unsigned(&value).ok_or_else(mismatch)?),
        TaosType::UInt => Value::UInt(unsigned(&value).ok_or_else(mismatch)?),
        TaosType::UBigInt => Value::UBigInt(value.as_u64().ok_or_else(mismatch)?),
        TaosType::Float => Value::Float(value.as_f64().ok_or_else(mismatch)? as f32),
        TaosType::Double => Value::Double(value.as_f64().ok_or_else(mismatch)?),
        TaosType::Timestamp => match &value {
            JsonValue::String(text) => Value::Timestamp(parse_timestamp_text(text).ok_or_else(mismatch)?),
            // Numeric timestamps are epoch milliseconds.
            JsonValue::Number(n) => {
                let nanos = n.as_i64().and_then(|ms| ms.checked_mul(1_000_000)).ok_or_else(mismatch)?;
                Value::Timestamp(Timestamp::new(nanos, Precision::Nanosecond))
            }
            _ => return Err(mismatch()),
        },
        TaosType::VarChar => Value::VarChar(text(value)),
        TaosType::NChar => Value::NChar(text(value)),
        TaosType::Json => Value::Json(text(value)),
        TaosType::Decimal => Value::Decimal(text(value)),
        TaosType::VarBinary => Value::VarBinary(binary(value)),
        TaosType::Geometry => Value::Geometry(binary(value)),
    };
    Ok(decoded)
}

fn signed<T: TryFrom<i64>>(value: &JsonValue) -> Option<T> {
    value.as_i64().and_then(|v| T::try_from(v).ok())
}

fn unsigned<T: TryFrom<u64>>(value: &JsonValue) -> Option<T> {
    value.as_u64().and_then(|v| T::try_from(v).ok())
}

fn text(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

/// Binary columns arrive hex-encoded; anything else is taken as raw text.
fn binary(value: JsonValue) -> Vec<u8> {
    let text = text(value);
    decode_hex(&text).unwrap_or_else(|| text.into_bytes())
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}
