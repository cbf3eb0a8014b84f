//! Engine facade: wires the storage, logging, locking, and query stacks
//! together and exposes `open`/`execute` plus the transaction API.
//!
//! Startup order: open the data and WAL files, replay the log, run
//! recovery, load the catalog, start the lock manager, then rebuild the
//! secondary indexes from the recovered heaps. Only after that does the
//! engine accept statements.

mod recovery;
mod txn_manager;

pub use recovery::{recover, RecoveryReport};
pub use txn_manager::TransactionManager;

use btree::{BPlusTree, KeyCodec};
use buffer::BufferPool;
use catalog::{Catalog, IndexKind, IndexMeta, TableMeta};
use common::{
    CancelToken, Column, Config, DbError, DbResult, Lsn, Schema, Tuple, TxnId,
};
use executor::{execute_dml, execute_query, ExecutionContext, Runtime};
use heap::TableHeap;
use parser::{parse_sql, ColumnDef, Statement};
use planner::{PhysicalPlan, Planner, PlanningContext};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::DiskManager;
use txn::{IsolationLevel, LockManager, Transaction};
use types::Value;
use wal::{LogManager, LogPayload};

/// Result of one statement, as handed to clients.
#[derive(Clone, Debug)]
pub struct QueryResult {
    pub ok: bool,
    pub message: String,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
}

impl QueryResult {
    fn ok_rows(column_names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            ok: true,
            message: String::new(),
            column_names,
            rows,
            rows_affected: 0,
        }
    }

    fn ok_count(rows_affected: u64) -> Self {
        Self {
            ok: true,
            message: String::new(),
            column_names: vec!["rows_affected".into()],
            rows: Vec::new(),
            rows_affected,
        }
    }

    fn ok_message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            column_names: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
        }
    }

    fn error(err: &DbError) -> Self {
        Self {
            ok: false,
            message: err.to_string(),
            column_names: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
        }
    }
}

/// The assembled database engine.
pub struct Engine {
    runtime: Arc<Runtime>,
    txn_mgr: TransactionManager,
    config: Config,
    /// Set after a `Corruption` error; mutations are refused until restart.
    writes_poisoned: AtomicBool,
}

impl Engine {
    /// Opens (creating if needed) a database at `path`. Recovery runs to
    /// completion before this returns.
    pub fn open(path: impl AsRef<Path>, config: Config) -> DbResult<Engine> {
        let disk = Arc::new(DiskManager::open(path)?);
        let pool = BufferPool::new(Arc::clone(&disk), config.pool_size);

        let records = if config.wal_enabled {
            LogManager::replay(disk.wal_path())?
        } else {
            Vec::new()
        };
        let next_lsn = records.last().map_or(Lsn(1), |r| Lsn(r.lsn.0 + 1));
        let max_txn_id = records.iter().map(|r| r.txn_id.0).max().unwrap_or(0);
        let log = Arc::new(LogManager::new(
            disk.wal_file()?,
            next_lsn,
            config.wal_enabled,
        ));
        pool.set_wal(Arc::clone(&log) as Arc<dyn common::WalSync>);

        if config.wal_enabled && !records.is_empty() {
            recovery::recover(&pool, &log, &records)?;
        }

        let catalog = Arc::new(Catalog::open(pool.clone())?);
        let locks = LockManager::start(config.lock_timeout, config.deadlock_interval);
        let runtime = Arc::new(Runtime::new(catalog, pool, log, locks));
        let txn_mgr = TransactionManager::new(Arc::clone(&runtime), max_txn_id + 1);

        let engine = Engine {
            runtime,
            txn_mgr,
            config,
            writes_poisoned: AtomicBool::new(false),
        };
        engine.rebuild_indexes()?;
        Ok(engine)
    }

    /// Flushes everything; the reopened database needs no recovery work.
    pub fn close(&self) -> DbResult<()> {
        self.runtime.log.flush_all()?;
        self.runtime.pool.flush_all()?;
        self.runtime.pool.disk().flush()?;
        Ok(())
    }

    pub fn begin(&self, isolation: IsolationLevel) -> DbResult<Transaction> {
        self.txn_mgr.begin(isolation)
    }

    pub fn commit(&self, txn: &mut Transaction) -> DbResult<()> {
        self.txn_mgr.commit(txn)
    }

    pub fn abort(&self, txn: &mut Transaction) -> DbResult<()> {
        self.txn_mgr.abort(txn)
    }

    /// Flushes all pages, then logs a checkpoint; recovery redoes only
    /// what follows it.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.runtime.log.flush_all()?;
        self.runtime.pool.flush_all()?;
        self.runtime.pool.disk().flush()?;
        let active_txns = self
            .txn_mgr
            .active_txns()
            .into_iter()
            .map(|id| (id, Lsn::ZERO))
            .collect();
        let lsn = self.runtime.log.append(
            TxnId(0),
            Lsn::ZERO,
            LogPayload::Checkpoint {
                active_txns,
                dirty_pages: Vec::new(),
            },
        )?;
        self.runtime.log.flush_to(lsn)?;
        Ok(())
    }

    /// Lists the tables known to the catalog.
    pub fn list_tables(&self) -> Vec<String> {
        self.runtime.catalog.list_tables()
    }

    /// Sum of buffer-pool pin counts; zero whenever no statement is
    /// executing.
    pub fn buffer_pins(&self) -> u32 {
        self.runtime.pool.total_pins()
    }

    /// Executes SQL. With `txn` the statements run inside that
    /// transaction; without, each statement autocommits. Transaction
    /// control statements need a [`Session`].
    pub fn execute(&self, sql: &str, mut txn: Option<&mut Transaction>) -> QueryResult {
        self.execute_with_cancel(sql, txn.as_deref_mut(), CancelToken::new())
    }

    pub fn execute_with_cancel(
        &self,
        sql: &str,
        mut txn: Option<&mut Transaction>,
        cancel: CancelToken,
    ) -> QueryResult {
        let statements = match parse_sql(sql) {
            Ok(statements) => statements,
            Err(err) => return QueryResult::error(&err),
        };
        let mut last = QueryResult::ok_message("");
        for stmt in statements {
            last = self.execute_statement(stmt, txn.as_deref_mut(), cancel.clone());
            if !last.ok {
                break;
            }
        }
        last
    }

    pub fn session(&self) -> Session<'_> {
        Session {
            engine: self,
            txn: None,
        }
    }

    // ---- statement dispatch ----

    fn execute_statement(
        &self,
        stmt: Statement,
        txn: Option<&mut Transaction>,
        cancel: CancelToken,
    ) -> QueryResult {
        match stmt {
            Statement::Begin | Statement::Commit | Statement::Rollback => {
                QueryResult::error(&DbError::Semantic(
                    "transaction control statements require a session".into(),
                ))
            }
            Statement::CreateTable { .. }
            | Statement::DropTable { .. }
            | Statement::CreateIndex { .. }
            | Statement::DropIndex { .. } => match self.run_ddl(stmt) {
                Ok(result) => result,
                Err(err) => self.note_error(&err),
            },
            other => self.run_planned(other, txn, cancel),
        }
    }

    fn run_planned(
        &self,
        stmt: Statement,
        txn: Option<&mut Transaction>,
        cancel: CancelToken,
    ) -> QueryResult {
        match txn {
            Some(txn) => {
                if !txn.is_active() {
                    return QueryResult::error(&DbError::Semantic(
                        "transaction is no longer active".into(),
                    ));
                }
                match self.run_in_txn(stmt, txn, cancel) {
                    Ok(result) => result,
                    Err(err) => {
                        if err.aborts_txn() && txn.is_active() {
                            if let Err(abort_err) = self.txn_mgr.abort(txn) {
                                tracing::error!(?abort_err, "abort after error failed");
                            }
                        }
                        self.note_error(&err)
                    }
                }
            }
            None => {
                let mut txn = match self.txn_mgr.begin(IsolationLevel::RepeatableRead) {
                    Ok(txn) => txn,
                    Err(err) => return self.note_error(&err),
                };
                match self.run_in_txn(stmt, &mut txn, cancel) {
                    Ok(result) => match self.txn_mgr.commit(&mut txn) {
                        Ok(()) => result,
                        Err(err) => self.note_error(&err),
                    },
                    Err(err) => {
                        if txn.is_active() {
                            if let Err(abort_err) = self.txn_mgr.abort(&mut txn) {
                                tracing::error!(?abort_err, "autocommit abort failed");
                            }
                        }
                        self.note_error(&err)
                    }
                }
            }
        }
    }

    fn run_in_txn(
        &self,
        stmt: Statement,
        txn: &mut Transaction,
        cancel: CancelToken,
    ) -> DbResult<QueryResult> {
        let is_mutation = matches!(
            stmt,
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. }
        );
        if is_mutation && self.writes_poisoned.load(Ordering::SeqCst) {
            return Err(DbError::Corruption(
                "writes are disabled after a corruption error; restart the engine".into(),
            ));
        }

        let plan = {
            let ctx = PlanningContext::new(&self.runtime.catalog);
            Planner::plan(stmt, &ctx)?
        };
        let mut ctx = ExecutionContext::new(&self.runtime, txn)
            .with_cancel(cancel)
            .with_noise(self.config.noise.clone());

        match plan {
            PhysicalPlan::Insert { .. } | PhysicalPlan::Update { .. } | PhysicalPlan::Delete { .. } => {
                let affected = execute_dml(plan, &mut ctx)?;
                Ok(QueryResult::ok_count(affected))
            }
            query => {
                let (schema, tuples) = execute_query(query, &mut ctx)?;
                let rows = tuples.into_iter().map(Tuple::into_values).collect();
                Ok(QueryResult::ok_rows(schema, rows))
            }
        }
    }

    /// Remembers corruption so further writes are refused until restart,
    /// and renders the error.
    fn note_error(&self, err: &DbError) -> QueryResult {
        if matches!(err, DbError::Corruption(_)) {
            self.writes_poisoned.store(true, Ordering::SeqCst);
        }
        QueryResult::error(err)
    }

    // ---- DDL ----

    fn run_ddl(&self, stmt: Statement) -> DbResult<QueryResult> {
        if self.writes_poisoned.load(Ordering::SeqCst) {
            return Err(DbError::Corruption(
                "writes are disabled after a corruption error; restart the engine".into(),
            ));
        }
        match stmt {
            Statement::CreateTable { name, columns } => self.create_table(&name, columns),
            Statement::DropTable { name } => {
                let meta = self.runtime.catalog.get_table(&name)?;
                let index_oids: Vec<_> = self
                    .runtime
                    .catalog
                    .indexes_for(meta.oid)
                    .into_iter()
                    .map(|i| i.oid)
                    .collect();
                self.runtime.catalog.drop_table(&name)?;
                self.runtime.evict_table(meta.oid, &index_oids);
                Ok(QueryResult::ok_message(format!("table '{name}' dropped")))
            }
            Statement::CreateIndex {
                name,
                table,
                columns,
            } => self.create_index(&name, &table, &columns),
            Statement::DropIndex { name } => {
                let meta = self.runtime.catalog.drop_index(&name)?;
                self.runtime.evict_index(meta.oid);
                Ok(QueryResult::ok_message(format!("index '{name}' dropped")))
            }
            other => Err(DbError::Internal(format!("not a DDL statement: {other:?}"))),
        }
    }

    fn create_table(&self, name: &str, defs: Vec<ColumnDef>) -> DbResult<QueryResult> {
        let columns: Vec<Column> = defs
            .into_iter()
            .map(|def| Column {
                name: def.name,
                ty: def.ty,
                declared_len: def.declared_len,
                nullable: def.nullable,
                primary_key: def.primary_key,
                unique: def.unique,
            })
            .collect();
        let schema = Schema::try_new(columns)?;
        let meta = self.runtime.catalog.create_table(name, schema)?;

        let mut txn = self.txn_mgr.begin(IsolationLevel::RepeatableRead)?;
        let result = self.create_table_storage(&meta, &mut txn);
        match result {
            Ok(()) => {
                self.txn_mgr.commit(&mut txn)?;
                Ok(QueryResult::ok_message(format!("table '{name}' created")))
            }
            Err(err) => {
                let _ = self.txn_mgr.abort(&mut txn);
                let _ = self.runtime.catalog.drop_table(name);
                Err(err)
            }
        }
    }

    fn create_table_storage(&self, meta: &TableMeta, txn: &mut Transaction) -> DbResult<()> {
        let heap = TableHeap::create(
            txn,
            meta.oid,
            self.runtime.pool.clone(),
            Arc::clone(&self.runtime.log),
            Arc::clone(&self.runtime.locks),
        )?;
        self.runtime
            .catalog
            .set_table_first_page(meta.oid, heap.first_page())?;
        self.runtime.install_heap(meta.oid, Arc::new(heap));

        let pk = meta.schema.primary_key();
        if !pk.is_empty() {
            let index_meta = self.runtime.catalog.create_index(
                &format!("{}_pkey", meta.name),
                &meta.name,
                pk,
                IndexKind::BTree,
            )?;
            self.build_index(txn, &index_meta)?;
        }
        Ok(())
    }

    fn create_index(&self, name: &str, table: &str, columns: &[String]) -> DbResult<QueryResult> {
        let table_meta = self.runtime.catalog.get_table(table)?;
        let key_attrs = columns
            .iter()
            .map(|c| table_meta.schema.column_index(c))
            .collect::<DbResult<Vec<_>>>()?;
        let index_meta =
            self.runtime
                .catalog
                .create_index(name, table, key_attrs, IndexKind::BTree)?;

        let mut txn = self.txn_mgr.begin(IsolationLevel::RepeatableRead)?;
        let result = self.build_index(&mut txn, &index_meta);
        match result {
            Ok(()) => {
                self.txn_mgr.commit(&mut txn)?;
                Ok(QueryResult::ok_message(format!("index '{name}' created")))
            }
            Err(err) => {
                let _ = self.txn_mgr.abort(&mut txn);
                let _ = self.runtime.catalog.drop_index(name);
                Err(err)
            }
        }
    }

    /// Creates the tree for an index and loads every visible row.
    fn build_index(&self, txn: &mut Transaction, index_meta: &IndexMeta) -> DbResult<()> {
        let table_meta = self.runtime.catalog.get_table_by_oid(index_meta.table)?;
        let codec = KeyCodec::new(&index_meta.key_columns(&table_meta.schema)?);
        let tree = BPlusTree::create(self.runtime.pool.clone(), index_meta.oid, codec)?;
        self.runtime
            .catalog
            .set_index_root(index_meta.oid, tree.meta_page())?;

        let heap = self.runtime.heap(index_meta.table)?;
        let mut cursor = heap.begin_scan(txn)?;
        while let Some((rid, bytes)) = heap.scan_next(txn, &mut cursor)? {
            let tuple = Tuple::deserialize(&bytes, &table_meta.schema)?;
            let key: Vec<Value> = index_meta
                .key_attrs
                .iter()
                .map(|&i| tuple.values[i].clone())
                .collect();
            tree.insert(&key, rid)?;
        }
        self.runtime.install_index(index_meta.oid, Arc::new(tree));
        Ok(())
    }

    /// Indexes are not WAL-logged; after restart every index is rebuilt
    /// from its recovered heap.
    fn rebuild_indexes(&self) -> DbResult<()> {
        let index_names = self.runtime.catalog.list_indexes();
        if index_names.is_empty() {
            return Ok(());
        }
        let mut txn = self.txn_mgr.begin(IsolationLevel::RepeatableRead)?;
        for name in index_names {
            let index_meta = self.runtime.catalog.get_index(&name)?;
            self.build_index(&mut txn, &index_meta)?;
        }
        self.txn_mgr.commit(&mut txn)
    }
}

/// One client connection: owns at most one open transaction and accepts
/// the full SQL surface including BEGIN/COMMIT/ROLLBACK.
pub struct Session<'a> {
    engine: &'a Engine,
    txn: Option<Transaction>,
}

impl<'a> Session<'a> {
    pub fn execute(&mut self, sql: &str) -> QueryResult {
        let statements = match parse_sql(sql) {
            Ok(statements) => statements,
            Err(err) => return QueryResult::error(&err),
        };
        let mut last = QueryResult::ok_message("");
        for stmt in statements {
            last = self.execute_statement(stmt);
            if !last.ok {
                break;
            }
        }
        last
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn execute_statement(&mut self, stmt: Statement) -> QueryResult {
        match stmt {
            Statement::Begin => {
                if self.txn.is_some() {
                    return QueryResult::error(&DbError::Semantic(
                        "a transaction is already open".into(),
                    ));
                }
                match self.engine.begin(IsolationLevel::RepeatableRead) {
                    Ok(txn) => {
                        self.txn = Some(txn);
                        QueryResult::ok_message("BEGIN")
                    }
                    Err(err) => QueryResult::error(&err),
                }
            }
            Statement::Commit => match self.txn.take() {
                Some(mut txn) => match self.engine.commit(&mut txn) {
                    Ok(()) => QueryResult::ok_message("COMMIT"),
                    Err(err) => QueryResult::error(&err),
                },
                None => QueryResult::error(&DbError::Semantic("no open transaction".into())),
            },
            Statement::Rollback => match self.txn.take() {
                Some(mut txn) => match self.engine.abort(&mut txn) {
                    Ok(()) => QueryResult::ok_message("ROLLBACK"),
                    Err(err) => QueryResult::error(&err),
                },
                None => QueryResult::error(&DbError::Semantic("no open transaction".into())),
            },
            other => {
                let result =
                    self.engine
                        .execute_statement(other, self.txn.as_mut(), CancelToken::new());
                if let Some(txn) = &self.txn {
                    // A transaction-scoped error aborted it under us.
                    if !txn.is_active() {
                        self.txn = None;
                    }
                }
                result
            }
        }
    }
}
