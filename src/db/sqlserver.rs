use std::future::Future;
use std::time::Duration;

use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use super::{Connection, ConnectionParams, Connector, DbError, FragmentationRecord};

const APPLICATION_NAME: &str = "index-rebuilder";

/// Opens encrypted, SQL-authenticated TDS connections with `tiberius`.
pub struct SqlServerConnector {
    params: ConnectionParams,
}

pub struct SqlServerConnection {
    client: Client<Compat<TcpStream>>,
}

impl SqlServerConnector {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn config(&self, host: &str, port: u16) -> Config {
        let mut config = Config::new();
        config.host(host);
        config.port(port);
        config.database(&self.params.database);
        config.authentication(AuthMethod::sql_server(
            &self.params.username,
            &self.params.password,
        ));
        config.encryption(EncryptionLevel::Required);
        config.application_name(APPLICATION_NAME);
        if self.params.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    async fn connect_routed(&self) -> Result<Client<Compat<TcpStream>>, tiberius::error::Error> {
        match connect_once(self.config(&self.params.server, self.params.port)).await {
            // Azure SQL gateways answer the first login with a redirect.
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!("Server redirected connection to {}:{}", host, port);
                connect_once(self.config(&host, port)).await
            }
            other => other,
        }
    }
}

async fn connect_once(config: Config) -> Result<Client<Compat<TcpStream>>, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

impl Connector for SqlServerConnector {
    type Conn = SqlServerConnection;

    async fn connect(&self) -> Result<SqlServerConnection, DbError> {
        let target = format!(
            "{}:{}/{}",
            self.params.server, self.params.port, self.params.database
        );
        let timeout = self.params.connect_timeout;

        match tokio::time::timeout(timeout, self.connect_routed()).await {
            Ok(Ok(client)) => {
                debug!("Connected to {}", target);
                Ok(SqlServerConnection { client })
            }
            Ok(Err(err)) => Err(DbError::Connect {
                target,
                message: err.to_string(),
            }),
            Err(_) => Err(DbError::Connect {
                target,
                message: format!("timed out after {}s", timeout.as_secs()),
            }),
        }
    }
}

impl Connection for SqlServerConnection {
    async fn query_fragmentation(
        &mut self,
        query: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Vec<FragmentationRecord>, DbError> {
        let client = &mut self.client;
        let rows = with_timeout(timeout, async move {
            let stream = client.query(query, &[&database]).await?;
            stream.into_first_result().await
        })
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn execute(&mut self, statement: &str, timeout: Duration) -> Result<(), DbError> {
        let client = &mut self.client;
        let result = with_timeout(timeout, async move { client.execute(statement, &[]).await })
            .await?;
        debug!("Statement completed, rows affected: {:?}", result.rows_affected());
        Ok(())
    }

    async fn close(self) -> Result<(), DbError> {
        self.client.close().await.map_err(map_error)
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, tiberius::error::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(map_error),
        Err(_) => {
            warn!("Statement exceeded {}s timeout", timeout.as_secs());
            Err(DbError::Timeout(timeout))
        }
    }
}

fn map_error(err: tiberius::error::Error) -> DbError {
    match err {
        tiberius::error::Error::Server(token) => DbError::Server {
            code: token.code(),
            message: token.message().to_string(),
        },
        other => DbError::Protocol(other.to_string()),
    }
}

fn record_from_row(row: &Row) -> Result<FragmentationRecord, DbError> {
    let text = |idx: usize| -> Result<String, DbError> {
        row.try_get::<&str, _>(idx)
            .map_err(map_error)?
            .map(str::to_owned)
            .ok_or_else(|| DbError::Protocol(format!("column {} was NULL", idx)))
    };

    Ok(FragmentationRecord {
        schema_name: text(0)?,
        table_name: text(1)?,
        index_name: text(2)?,
        fragmentation_percent: fragmentation_value(row.try_get::<f64, _>(3).map_err(map_error)?),
    })
}

/// An index with no statistics reads as NaN, which is never selected.
fn fragmentation_value(raw: Option<f64>) -> f64 {
    raw.unwrap_or(f64::NAN)
}
