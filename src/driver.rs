use crate::connection::TaosConnection;
use crate::database::{DatabaseOption, TaosDatabase};
use crate::error::Result;

/// URI schemes this driver opens connections for.
const SCHEMES: [&str; 3] = ["taos://", "http://", "https://"];

/// Entry point: builds database configurations and opens connections.
#[derive(Debug, Default)]
pub struct TaosDriver {}

impl TaosDriver {
    pub fn new_database(&self) -> Result<TaosDatabase> {
        Ok(TaosDatabase::default())
    }

    pub fn new_database_with_opts<V: Into<String>>(
        &self,
        opts: impl IntoIterator<Item = (DatabaseOption, V)>,
    ) -> Result<TaosDatabase> {
        let mut database = TaosDatabase::default();
        for (key, value) in opts {
            database.set_option(key, value)?;
        }
        Ok(database)
    }

    /// Opens a connection straight from a URI, using default credentials
    /// unless the URI carries its own.
    pub fn connect(&self, uri: &str) -> Result<TaosConnection> {
        let database = self.new_database_with_opts([(DatabaseOption::Uri, uri)])?;
        database.connect()
    }

    pub fn accepts_uri(&self, uri: &str) -> bool {
        let uri = uri.trim().to_ascii_lowercase();
        SCHEMES.iter().any(|scheme| uri.starts_with(scheme))
    }
}
