//! Shared test fixtures: a tempdir-backed engine, value builders, and
//! result assertions used by the scenario suites.

use common::Config;
use database::{Engine, QueryResult};
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;
use types::Value;

/// Installs a log subscriber once, so a failing test can be rerun with
/// `RUST_LOG` set to watch recovery, lock, and eviction events.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if std::env::var_os("RUST_LOG").is_some() {
            let _ = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .with_test_writer()
                .try_init();
        }
    });
}

/// A throwaway database. `restart` simulates a crash (no clean close);
/// `restart_clean` flushes first.
pub struct TestDb {
    pub engine: Option<Engine>,
    path: PathBuf,
    config: Config,
    _dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("db.lat");
        let engine = Engine::open(&path, config.clone()).expect("open engine");
        Self {
            engine: Some(engine),
            path,
            config,
            _dir: dir,
        }
    }

    pub fn engine(&self) -> &Engine {
        self.engine.as_ref().expect("engine is open")
    }

    /// Runs statements in autocommit mode and asserts success.
    pub fn run(&self, sql: &str) -> QueryResult {
        let result = self.engine().execute(sql, None);
        assert!(result.ok, "`{sql}` failed: {}", result.message);
        result
    }

    /// Runs statements expecting a failure; returns the message.
    pub fn run_err(&self, sql: &str) -> String {
        let result = self.engine().execute(sql, None);
        assert!(!result.ok, "`{sql}` unexpectedly succeeded");
        result.message
    }

    /// SELECT helper returning just the rows.
    pub fn query(&self, sql: &str) -> Vec<Vec<Value>> {
        self.run(sql).rows
    }

    /// Drops the engine without flushing, as a crash would.
    pub fn crash(&mut self) {
        self.engine.take();
    }

    /// Crash followed by reopen (recovery runs).
    pub fn restart(&mut self) {
        self.crash();
        self.engine = Some(Engine::open(&self.path, self.config.clone()).expect("reopen engine"));
    }

    /// Clean shutdown followed by reopen.
    pub fn restart_clean(&mut self) {
        if let Some(engine) = &self.engine {
            engine.close().expect("close engine");
        }
        self.restart();
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}

pub fn int(v: i32) -> Value {
    Value::Integer(v)
}

pub fn big(v: i64) -> Value {
    Value::BigInt(v)
}

pub fn text(s: &str) -> Value {
    Value::Varchar(s.to_string())
}

pub fn dbl(v: f64) -> Value {
    Value::Double(v)
}

/// Asserts a result set equals the expected rows, in order.
pub fn assert_rows(result: &QueryResult, expected: &[Vec<Value>]) {
    assert!(result.ok, "query failed: {}", result.message);
    assert_eq!(
        result.rows, expected,
        "rows differ (columns: {:?})",
        result.column_names
    );
}

/// Convenient re-exports for test files.
pub mod prelude {
    pub use crate::{assert_rows, big, dbl, int, text, TestDb};
}
