use tempfile::TempDir;

use curvesim_core::{CurveKey, EngineConfig, RawRow};
use curvesim_engine::{EngineError, PullResult, RowSet, Session};
use curvesim_storage::SqliteCurveStore;

/// A session over a SQLite store, in memory or in a temporary directory.
pub struct TestSession {
    pub session: Session<SqliteCurveStore>,
    dir: Option<TempDir>,
}

impl TestSession {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            session: Session::new(SqliteCurveStore::open_in_memory()?, config),
            dir: None,
        })
    }

    pub fn with_rows(rows: Vec<RawRow>) -> Result<Self, EngineError> {
        let mut ts = Self::new()?;
        ts.session.load_rows(RowSet::new(rows))?;
        Ok(ts)
    }

    /// Session backed by a database file that outlives the session; see
    /// [`reopen`](Self::reopen).
    pub fn on_disk(rows: Vec<RawRow>) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = db_path(&dir)?;
        let mut session = Session::new(SqliteCurveStore::open(&path)?, EngineConfig::default());
        session.load_rows(RowSet::new(rows))?;
        Ok(Self {
            session,
            dir: Some(dir),
        })
    }

    /// Drops the session and opens a new one on the same database with a
    /// fresh copy of `rows`.
    pub fn reopen(self, rows: Vec<RawRow>) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = self.dir.ok_or("in-memory sessions cannot be reopened")?;
        drop(self.session);
        let path = db_path(&dir)?;
        let mut session = Session::new(SqliteCurveStore::open(&path)?, EngineConfig::default());
        session.load_rows(RowSet::new(rows))?;
        Ok(Self {
            session,
            dir: Some(dir),
        })
    }

    /// Opens `key` if needed, then runs one begin/request/pull round.
    pub fn edit(&mut self, key: &CurveKey, values: &[f64]) -> Result<PullResult, EngineError> {
        if self.session.sync().active_key() != Some(key) {
            self.session.open(key)?;
        }
        self.session.begin_edit()?;
        let version = self.session.request_sync()?;
        self.session.pull_edit(key, values, version)
    }
}

fn db_path(dir: &TempDir) -> Result<String, Box<dyn std::error::Error>> {
    let path = dir.path().join("curves.db");
    Ok(path.to_str().ok_or("non-utf8 temp path")?.to_string())
}
