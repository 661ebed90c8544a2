#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use index_rebuilder::checkpoint::{Checkpoint, CheckpointStore, JobKey};
use index_rebuilder::db::{Connection, Connector, DbError, FragmentationRecord};
use index_rebuilder::error::{Error, Result};
use index_rebuilder::JobPlan;

pub fn record(table: &str, index: &str, fragmentation: f64) -> FragmentationRecord {
    FragmentationRecord {
        schema_name: "dbo".to_string(),
        table_name: table.to_string(),
        index_name: index.to_string(),
        fragmentation_percent: fragmentation,
    }
}

/// (T1,I1,25%), (T2,I2,15%), (T3,I3,30%)
pub fn sample_records() -> Vec<FragmentationRecord> {
    vec![
        record("T1", "I1", 25.0),
        record("T2", "I2", 15.0),
        record("T3", "I3", 30.0),
    ]
}

pub fn job_key(threshold: u8, table: Option<&str>) -> JobKey {
    JobKey {
        server: "sql01".to_string(),
        port: 1433,
        database: "sales".to_string(),
        threshold_percent: threshold,
        table_filter: table.map(str::to_string),
    }
}

pub fn plan(threshold: u8, allow_offline_fallback: bool) -> JobPlan {
    let mut plan = JobPlan::new(job_key(threshold, None));
    plan.rebuild.allow_offline_fallback = allow_offline_fallback;
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Online,
    Offline,
    Any,
}

struct FailureRule {
    index: String,
    mode: Mode,
    code: u32,
}

#[derive(Default)]
struct ServerState {
    records: Vec<FragmentationRecord>,
    scan_error: Option<u32>,
    rules: Vec<FailureRule>,
    max_connections: Option<usize>,
    connections_opened: usize,
    connections_closed: usize,
    scans: usize,
    executed: Vec<String>,
}

/// In-process stand-in for SQL Server: serves canned fragmentation rows,
/// records executed statements, and fails statements by rule.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new(records: Vec<FragmentationRecord>) -> Self {
        let server = Self::default();
        server.state.lock().unwrap().records = records;
        server
    }

    /// Fail rebuilds of `index` in `mode` with server error `code`.
    pub fn fail(&self, index: &str, mode: Mode, code: u32) -> &Self {
        self.state.lock().unwrap().rules.push(FailureRule {
            index: index.to_string(),
            mode,
            code,
        });
        self
    }

    pub fn fail_scan(&self, code: u32) {
        self.state.lock().unwrap().scan_error = Some(code);
    }

    /// Refuse every connection after the first `count`.
    pub fn limit_connections(&self, count: usize) {
        self.state.lock().unwrap().max_connections = Some(count);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn scans(&self) -> usize {
        self.state.lock().unwrap().scans
    }

    pub fn connections(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.connections_opened, state.connections_closed)
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<ServerState>>,
}

impl Connector for FakeServer {
    type Conn = FakeConnection;

    async fn connect(&self) -> std::result::Result<FakeConnection, DbError> {
        let mut state = self.state.lock().unwrap();
        if state
            .max_connections
            .is_some_and(|max| state.connections_opened >= max)
        {
            return Err(DbError::Connect {
                target: "fake:1433/sales".to_string(),
                message: "connection refused".to_string(),
            });
        }
        state.connections_opened += 1;
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
        })
    }
}

impl Connection for FakeConnection {
    async fn query_fragmentation(
        &mut self,
        _query: &str,
        _database: &str,
        _timeout: Duration,
    ) -> std::result::Result<Vec<FragmentationRecord>, DbError> {
        let mut state = self.state.lock().unwrap();
        state.scans += 1;
        match state.scan_error {
            Some(code) => Err(DbError::Server {
                code,
                message: "scan failed".to_string(),
            }),
            None => Ok(state.records.clone()),
        }
    }

    async fn execute(
        &mut self,
        statement: &str,
        _timeout: Duration,
    ) -> std::result::Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(statement.to_string());

        let online = statement.contains("ONLINE = ON");
        let failure = state.rules.iter().find(|rule| {
            statement.starts_with(&format!("ALTER INDEX [{}]", rule.index))
                && match rule.mode {
                    Mode::Online => online,
                    Mode::Offline => !online,
                    Mode::Any => true,
                }
        });
        match failure {
            Some(rule) => Err(DbError::Server {
                code: rule.code,
                message: format!("error {} rebuilding {}", rule.code, rule.index),
            }),
            None => Ok(()),
        }
    }

    async fn close(self) -> std::result::Result<(), DbError> {
        self.state.lock().unwrap().connections_closed += 1;
        Ok(())
    }
}

/// Keeps the checkpoint in memory and records `next_index` at every save.
#[derive(Default)]
pub struct MemoryStore {
    checkpoint: RefCell<Option<Checkpoint>>,
    saves: RefCell<Vec<usize>>,
    /// Fail every save after this many have succeeded.
    save_limit: Cell<Option<usize>>,
}

impl MemoryStore {
    pub fn with(checkpoint: Checkpoint) -> Self {
        let store = Self::default();
        *store.checkpoint.borrow_mut() = Some(checkpoint);
        store
    }

    pub fn fail_after_saves(&self, count: usize) {
        self.save_limit.set(Some(count));
    }

    pub fn allow_saves(&self) {
        self.save_limit.set(None);
    }

    pub fn saves(&self) -> Vec<usize> {
        self.saves.borrow().clone()
    }

    pub fn current(&self) -> Option<Checkpoint> {
        self.checkpoint.borrow().clone()
    }
}

impl CheckpointStore for MemoryStore {
    fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoint.borrow().clone())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self
            .save_limit
            .get()
            .is_some_and(|limit| self.saves.borrow().len() >= limit)
        {
            return Err(Error::Checkpoint {
                path: PathBuf::from("memory"),
                source: io::Error::new(io::ErrorKind::Other, "no space left on device"),
            });
        }
        self.saves.borrow_mut().push(checkpoint.next_index);
        *self.checkpoint.borrow_mut() = Some(checkpoint.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.checkpoint.borrow_mut() = None;
        Ok(())
    }
}
