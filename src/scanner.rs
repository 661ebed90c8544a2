use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{Connection, Connector, FragmentationRecord};
use crate::error::{Error, Result};

pub const SCAN_TIMEOUT: Duration = Duration::from_secs(120);

/// Average fragmentation per index across partitions, heaps excluded.
/// `@P1` is the database name.
pub const FRAGMENTATION_QUERY: &str = "\
SELECT s.name AS schema_name,
       t.name AS table_name,
       i.name AS index_name,
       AVG(ps.avg_fragmentation_in_percent) AS fragmentation_percent
FROM sys.dm_db_index_physical_stats(DB_ID(@P1), NULL, NULL, NULL, 'LIMITED') AS ps
INNER JOIN sys.indexes AS i
    ON i.object_id = ps.object_id AND i.index_id = ps.index_id
INNER JOIN sys.tables AS t
    ON t.object_id = i.object_id
INNER JOIN sys.schemas AS s
    ON s.schema_id = t.schema_id
WHERE i.name IS NOT NULL
GROUP BY s.name, t.name, i.name
ORDER BY s.name, t.name, i.name";

/// An index selected for rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RebuildCandidate {
    pub schema_name: String,
    pub table_name: String,
    pub index_name: String,
}

impl RebuildCandidate {
    pub fn new(schema: &str, table: &str, index: &str) -> Self {
        Self {
            schema_name: schema.to_string(),
            table_name: table.to_string(),
            index_name: index.to_string(),
        }
    }
}

impl std::fmt::Display for RebuildCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.schema_name, self.table_name, self.index_name
        )
    }
}

impl From<&FragmentationRecord> for RebuildCandidate {
    fn from(record: &FragmentationRecord) -> Self {
        Self::new(
            &record.schema_name,
            &record.table_name,
            &record.index_name,
        )
    }
}

/// Keeps records with fragmentation at or above `threshold_percent` whose
/// table matches `table_filter` (when given). Input order is preserved.
pub fn select_candidates(
    records: &[FragmentationRecord],
    threshold_percent: f64,
    table_filter: Option<&str>,
) -> Vec<RebuildCandidate> {
    records
        .iter()
        .filter(|r| r.fragmentation_percent >= threshold_percent)
        .filter(|r| table_filter.map_or(true, |table| r.table_name == table))
        .map(RebuildCandidate::from)
        .collect()
}

/// Reads fragmentation statistics for `database` over one short-lived
/// connection and returns the qualifying candidates. Read-only.
pub async fn scan<C: Connector>(
    connector: &C,
    database: &str,
    threshold_percent: f64,
    table_filter: Option<&str>,
    timeout: Duration,
) -> Result<Vec<RebuildCandidate>> {
    let start = Instant::now();
    let mut conn = connector.connect().await.map_err(Error::Connection)?;

    let result = conn
        .query_fragmentation(FRAGMENTATION_QUERY, database, timeout)
        .await;
    if let Err(err) = conn.close().await {
        warn!("Error closing scan connection: {}", err);
    }
    let records = result.map_err(Error::Scan)?;

    let candidates = select_candidates(&records, threshold_percent, table_filter);
    debug!(
        "Scan returned {} indexes in {:.2}s",
        records.len(),
        start.elapsed().as_secs_f64()
    );
    info!(
        "{} of {} indexes at or above {}% fragmentation{}",
        candidates.len(),
        records.len(),
        threshold_percent,
        table_filter
            .map(|t| format!(" on table '{}'", t))
            .unwrap_or_default(),
    );

    Ok(candidates)
}
