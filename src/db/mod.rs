//! Database seam: connection parameters, the [`Connector`]/[`Connection`]
//! traits the scanner and rebuild executor are written against, and the
//! structured [`DbError`] they report.

pub mod sqlserver;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use sqlserver::SqlServerConnector;

pub const DEFAULT_PORT: u16 = 1433;

/// Server error numbers that mean "this index can only be rebuilt offline".
///
/// 1712: online index operations need Enterprise edition.
/// 2725: the index holds LOB/FILESTREAM columns; the operation must be offline.
pub const DEFAULT_OFFLINE_ERROR_CODES: &[u32] = &[1712, 2725];

/// Everything needed to open one connection. Built once per job.
#[derive(Clone)]
pub struct ConnectionParams {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"********")
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// One row of the fragmentation statistics query.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentationRecord {
    pub schema_name: String,
    pub table_name: String,
    pub index_name: String,
    pub fragmentation_percent: f64,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("could not connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("statement timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("server error {code}: {message}")]
    Server { code: u32, message: String },

    #[error("{0}")]
    Protocol(String),
}

impl DbError {
    pub fn server_code(&self) -> Option<u32> {
        match self {
            DbError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the server rejected an online operation with one of
    /// `offline_codes`.
    pub fn requires_offline(&self, offline_codes: &[u32]) -> bool {
        self.server_code()
            .is_some_and(|code| offline_codes.contains(&code))
    }
}

/// Opens connections. One connection serves exactly one query or statement.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Conn: Connection;

    async fn connect(&self) -> Result<Self::Conn, DbError>;
}

#[allow(async_fn_in_trait)]
pub trait Connection {
    /// Runs the fragmentation statistics `query` with `database` bound as its
    /// only parameter and returns rows in the order the server produced them.
    async fn query_fragmentation(
        &mut self,
        query: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Vec<FragmentationRecord>, DbError>;

    async fn execute(&mut self, statement: &str, timeout: Duration) -> Result<(), DbError>;

    async fn close(self) -> Result<(), DbError>;
}
