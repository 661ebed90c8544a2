use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{Connection, Connector, DbError, DEFAULT_OFFLINE_ERROR_CODES};
use crate::identifier::{self, IdentifierError};
use crate::scanner::RebuildCandidate;

/// Stays under the scheduler's 30 minute re-queue boundary.
pub const REBUILD_TIMEOUT: Duration = Duration::from_secs(1500);

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub allow_offline_fallback: bool,
    pub timeout: Duration,
    pub offline_error_codes: Vec<u32>,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            allow_offline_fallback: false,
            timeout: REBUILD_TIMEOUT,
            offline_error_codes: DEFAULT_OFFLINE_ERROR_CODES.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildStatus {
    Succeeded,
    SucceededOffline,
    Failed,
}

impl RebuildStatus {
    pub fn is_success(self) -> bool {
        !matches!(self, RebuildStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildOutcome {
    pub candidate: RebuildCandidate,
    pub status: RebuildStatus,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub finished_at: DateTime<Utc>,
}

/// Why a single rebuild attempt failed. Never escapes [`rebuild_index`].
#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("connection failed: {0}")]
    Connection(#[source] DbError),

    #[error("online rebuild not supported: {0}")]
    OfflineRequired(#[source] DbError),

    #[error("rebuild failed: {0}")]
    Failed(#[source] DbError),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
}

pub fn rebuild_statement(
    candidate: &RebuildCandidate,
    online: bool,
) -> Result<String, IdentifierError> {
    let index = identifier::quote(&candidate.index_name)?;
    let table = identifier::quote_qualified(&candidate.schema_name, &candidate.table_name)?;
    Ok(if online {
        format!("ALTER INDEX {} ON {} REBUILD WITH (ONLINE = ON)", index, table)
    } else {
        format!("ALTER INDEX {} ON {} REBUILD", index, table)
    })
}

/// Rebuilds one index online, falling back to an offline rebuild when the
/// server reports the online form is unsupported and `allow_offline_fallback`
/// is set. Each attempt runs on its own fresh connection. Failures are
/// returned as a `Failed` outcome, never as an error.
pub async fn rebuild_index<C: Connector>(
    connector: &C,
    candidate: &RebuildCandidate,
    options: &RebuildOptions,
) -> RebuildOutcome {
    let start = Instant::now();
    let (status, error) = match try_rebuild(connector, candidate, options).await {
        Ok(status) => (status, None),
        Err(err) => {
            debug!(index = %candidate, "Rebuild attempt failed: {}", err);
            (RebuildStatus::Failed, Some(err.to_string()))
        }
    };

    RebuildOutcome {
        candidate: candidate.clone(),
        status,
        error,
        duration_secs: start.elapsed().as_secs_f64(),
        finished_at: Utc::now(),
    }
}

async fn try_rebuild<C: Connector>(
    connector: &C,
    candidate: &RebuildCandidate,
    options: &RebuildOptions,
) -> Result<RebuildStatus, RebuildError> {
    let online = rebuild_statement(candidate, true)?;
    info!(index = %candidate, "Rebuilding online");

    match run_statement(connector, &online, options).await {
        Ok(()) => Ok(RebuildStatus::Succeeded),
        Err(RebuildError::OfflineRequired(err)) if options.allow_offline_fallback => {
            warn!(
                index = %candidate,
                "Online rebuild not supported ({}), retrying offline",
                err
            );
            let offline = rebuild_statement(candidate, false)?;
            run_statement(connector, &offline, options)
                .await
                .map(|()| RebuildStatus::SucceededOffline)
        }
        Err(err) => Err(err),
    }
}

async fn run_statement<C: Connector>(
    connector: &C,
    statement: &str,
    options: &RebuildOptions,
) -> Result<(), RebuildError> {
    let mut conn = connector
        .connect()
        .await
        .map_err(RebuildError::Connection)?;

    let result = conn.execute(statement, options.timeout).await;
    if let Err(err) = conn.close().await {
        warn!("Error closing rebuild connection: {}", err);
    }

    result.map_err(|err| {
        if err.requires_offline(&options.offline_error_codes) {
            RebuildError::OfflineRequired(err)
        } else {
            RebuildError::Failed(err)
        }
    })
}
