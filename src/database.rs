//! Connection configuration for the TDengine driver.
//!
//! [`TaosDatabase`] holds the connection parameters (URI, credentials,
//! database, session settings) and opens [`TaosConnection`]s over the
//! transport the URI scheme selects.

use std::str::FromStr;
use std::time::Duration;

use crate::connection::TaosConnection;
use crate::error::{Result, TaosError};
use crate::transport::{NativeTransport, RestTransport, Transport, TransportKind};

/// How native-transport result sets are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Pull one block at a time while the cursor advances.
    #[default]
    Stream,
    /// Receive every row when the statement executes.
    Materialize,
}

impl FromStr for FetchMode {
    type Err = TaosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(FetchMode::Stream),
            "materialize" | "all" => Ok(FetchMode::Materialize),
            other => Err(TaosError::invalid_argument(format!(
                "unknown fetch mode '{}', expected 'stream' or 'materialize'",
                other
            ))),
        }
    }
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Stream => "stream",
            FetchMode::Materialize => "materialize",
        }
    }
}

/// Per-connection session settings.
///
/// Threaded into each transport at connect time rather than applied
/// process-wide, so connections with different settings can coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSettings {
    pub charset: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
}

impl SessionSettings {
    /// Non-empty settings as `(key, value)` pairs.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("charset", self.charset.as_deref()),
            ("locale", self.locale.as_deref()),
            ("timezone", self.timezone.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k, v)))
        .collect()
    }
}

/// Resolved parameters handed to [`Transport::connect`].
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub kind: TransportKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    /// REST over HTTPS.
    pub tls: bool,
    pub settings: SessionSettings,
    pub fetch_mode: FetchMode,
    pub timeout: Duration,
}

impl ConnectParams {
    /// The endpoint URI without credentials, for metadata and logs.
    pub fn display_uri(&self) -> String {
        let scheme = match (self.kind, self.tls) {
            (TransportKind::Native, _) => "taos",
            (TransportKind::Rest, false) => "http",
            (TransportKind::Rest, true) => "https",
        };
        match &self.database {
            Some(db) => format!("{}://{}:{}/{}", scheme, self.host, self.port, db),
            None => format!("{}://{}:{}", scheme, self.host, self.port),
        }
    }
}

/// Configuration keys accepted by [`TaosDatabase::set_option`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseOption {
    Uri,
    Username,
    Password,
    Database,
    Charset,
    Locale,
    TimeZone,
    FetchMode,
    /// Request timeout in seconds.
    Timeout,
}

impl FromStr for DatabaseOption {
    type Err = TaosError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uri" | "url" => Ok(DatabaseOption::Uri),
            "user" | "username" => Ok(DatabaseOption::Username),
            "password" => Ok(DatabaseOption::Password),
            "dbname" | "database" => Ok(DatabaseOption::Database),
            "charset" => Ok(DatabaseOption::Charset),
            "locale" => Ok(DatabaseOption::Locale),
            "timezone" | "tz" => Ok(DatabaseOption::TimeZone),
            "fetch_mode" => Ok(DatabaseOption::FetchMode),
            "timeout" => Ok(DatabaseOption::Timeout),
            other => Err(TaosError::invalid_argument(format!(
                "Unsupported database option: {}",
                other
            ))),
        }
    }
}

/// Database configuration holder.
///
/// Stores connection parameters and opens connections.
#[derive(Debug, Clone)]
pub struct TaosDatabase {
    /// `taos://` selects the native client, `http://`/`https://` the REST API.
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Default database; a path segment in the URI takes precedence.
    pub database: Option<String>,
    pub settings: SessionSettings,
    pub fetch_mode: FetchMode,
    pub timeout: Duration,
}

impl Default for TaosDatabase {
    fn default() -> Self {
        Self {
            uri: "taos://127.0.0.1:6030".to_string(),
            user: "root".to_string(),
            password: "taosdata".to_string(),
            database: None,
            settings: SessionSettings::default(),
            fetch_mode: FetchMode::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl TaosDatabase {
    pub fn set_option(&mut self, key: DatabaseOption, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        match key {
            DatabaseOption::Uri => self.uri = value,
            DatabaseOption::Username => self.user = value,
            DatabaseOption::Password => self.password = value,
            DatabaseOption::Database => self.database = non_empty(value),
            DatabaseOption::Charset => self.settings.charset = non_empty(value),
            DatabaseOption::Locale => self.settings.locale = non_empty(value),
            DatabaseOption::TimeZone => self.settings.timezone = non_empty(value),
            DatabaseOption::FetchMode => self.fetch_mode = value.parse()?,
            DatabaseOption::Timeout => {
                let secs: u64 = value.trim().parse().map_err(|_| {
                    TaosError::invalid_argument(format!("invalid timeout '{}'", value))
                })?;
                self.timeout = Duration::from_secs(secs);
            }
        }
        Ok(())
    }

    /// Sets an option by its string key, e.g. `"timezone"`.
    pub fn set_property(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.set_option(key.parse()?, value)
    }

    pub fn get_option(&self, key: DatabaseOption) -> Option<String> {
        match key {
            DatabaseOption::Uri => Some(self.uri.clone()),
            DatabaseOption::Username => Some(self.user.clone()),
            DatabaseOption::Password => Some(self.password.clone()),
            DatabaseOption::Database => self.database.clone(),
            DatabaseOption::Charset => self.settings.charset.clone(),
            DatabaseOption::Locale => self.settings.locale.clone(),
            DatabaseOption::TimeZone => self.settings.timezone.clone(),
            DatabaseOption::FetchMode => Some(self.fetch_mode.as_str().to_string()),
            DatabaseOption::Timeout => Some(self.timeout.as_secs().to_string()),
        }
    }

    /// Resolves the URI and the option fields into transport parameters.
    ///
    /// URI credentials override `user`/`password`, the URI path overrides
    /// `database`, and query parameters are applied as options.
    pub fn connect_params(&self) -> Result<ConnectParams> {
        let (scheme, rest) = self
            .uri
            .split_once("://")
            .ok_or_else(|| TaosError::invalid_argument("Invalid URI format"))?;

        let (kind, tls) = match scheme.to_ascii_lowercase().as_str() {
            "taos" => (TransportKind::Native, false),
            "http" => (TransportKind::Rest, false),
            "https" => (TransportKind::Rest, true),
            other => {
                return Err(TaosError::invalid_argument(format!(
                    "Unsupported URI scheme: {}",
                    other
                )));
            }
        };

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));

        let mut config = self.clone();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                config.set_property(&decode(key)?, decode(value)?)?;
            }
        }

        let host_port = match authority.rsplit_once('@') {
            Some((credentials, host_port)) => {
                match credentials.split_once(':') {
                    Some((user, password)) => {
                        config.user = decode(user)?;
                        config.password = decode(password)?;
                    }
                    None => config.user = decode(credentials)?,
                }
                host_port
            }
            None => authority,
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    TaosError::invalid_argument(format!("Invalid port in URI: {}", port))
                })?;
                (host, port)
            }
            None => (host_port, kind.default_port()),
        };
        let host = if host.is_empty() { "localhost" } else { host };

        let path = path.trim_matches('/');
        if !path.is_empty() {
            config.database = Some(decode(path)?);
        }

        Ok(ConnectParams {
            kind,
            host: host.to_string(),
            port,
            user: config.user,
            password: config.password,
            database: config.database,
            tls,
            settings: config.settings,
            fetch_mode: config.fetch_mode,
            timeout: config.timeout,
        })
    }

    /// Opens a connection over the transport selected by the URI.
    pub fn connect(&self) -> Result<TaosConnection> {
        let params = self.connect_params()?;
        log::info!("connecting to {}", params.display_uri());
        let transport: Box<dyn Transport> = match params.kind {
            TransportKind::Native => Box::new(NativeTransport::connect(&params)?),
            TransportKind::Rest => Box::new(RestTransport::connect(&params)?),
        };
        Ok(TaosConnection::new(transport, &params))
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}

fn decode(s: &str) -> Result<String> {
    urlencoding::decode(s)
        .map(|s| s.into_owned())
        .map_err(|e| TaosError::invalid_argument(format!("invalid URI encoding: {}", e)))
}
