//! Per-connection audit session state and the process-wide registry
//! admin commands operate through.

use crate::ast::SqlKind;
use crate::config::RuleLevel;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/* ================================================================
 *  Statement records
 * ================================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrLevel {
    Ok = 0,
    Warning = 1,
    Error = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    None,
    Checked,
    Executed,
    Skipped,
}

/// One cached statement and everything the audit/execute passes learn
/// about it. Diagnostics accumulate; `errlevel` only ever rises.
#[derive(Debug, Clone)]
pub struct StatementRecord {
    pub id: u32,
    pub sql_text: String,
    pub kind: SqlKind,
    pub sub_type: String,
    pub db_name: String,
    pub table_name: String,
    pub stage: Stage,
    pub errlevel: ErrLevel,
    pub errmsg: String,
    pub stage_status: String,
    pub affected_rows: i64,
    pub sequence: String,
    pub backup_dbname: String,
    pub execute_time: String,
    pub sqlsha1: String,
    pub ddl_algorithm: String,
}

impl StatementRecord {
    pub fn new(id: u32, sql_text: String, kind: SqlKind) -> Self {
        StatementRecord {
            id,
            sql_text,
            kind,
            sub_type: String::new(),
            db_name: String::new(),
            table_name: String::new(),
            stage: Stage::None,
            errlevel: ErrLevel::Ok,
            errmsg: String::new(),
            stage_status: String::new(),
            affected_rows: 0,
            sequence: String::new(),
            backup_dbname: String::new(),
            execute_time: String::new(),
            sqlsha1: String::new(),
            ddl_algorithm: String::new(),
        }
    }

    fn push_line(&mut self, msg: &str) {
        if !self.errmsg.is_empty() {
            self.errmsg.push('\n');
        }
        self.errmsg.push_str(msg);
    }

    pub fn append_error(&mut self, msg: impl AsRef<str>) {
        self.push_line(msg.as_ref());
        if self.errlevel < ErrLevel::Error {
            self.errlevel = ErrLevel::Error;
        }
    }

    pub fn append_warning(&mut self, msg: impl AsRef<str>) {
        self.push_line(msg.as_ref());
        if self.errlevel < ErrLevel::Warning {
            self.errlevel = ErrLevel::Warning;
        }
    }

    /// Report a finding at a configured rule level. OFF skips the
    /// report entirely.
    pub fn report(&mut self, level: RuleLevel, msg: impl AsRef<str>) {
        match level {
            RuleLevel::Off => {}
            RuleLevel::Warning => self.append_warning(msg),
            RuleLevel::Error => self.append_error(msg),
        }
    }
}

/// One merged group of statements in split mode.
#[derive(Debug, Clone)]
pub struct SplitGroup {
    pub sql_text: String,
    pub db_name: String,
    pub table_name: String,
    pub ddlflag: i64,
    pub is_ddl: bool,
}

/// One statement plus its extracted query tree.
#[derive(Debug, Clone)]
pub struct TreeRecord {
    pub id: u32,
    pub sql_text: String,
    pub tree_json: String,
}

/* ================================================================
 *  Modes and remote profile
 * ================================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Check,
    Execute,
    Split,
    QueryTree,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Check => "CHECK",
            Mode::Execute => "EXECUTE",
            Mode::Split => "SPLIT",
            Mode::QueryTree => "QUERY_TREE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    MySql,
    Tidb,
}

impl DbType {
    pub fn name(self) -> &'static str {
        match self {
            DbType::MySql => "MySQL",
            DbType::Tidb => "TiDB",
        }
    }
}

/// Detected remote flavor and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteProfile {
    pub db_type: DbType,
    pub major: u32,
    pub minor: u32,
}

impl Default for RemoteProfile {
    fn default() -> Self {
        RemoteProfile {
            db_type: DbType::MySql,
            major: 8,
            minor: 0,
        }
    }
}

/* ================================================================
 *  Session context
 * ================================================================ */

/// Everything one batch accumulates between magic_start and
/// magic_commit. Owned by the connection's backend task; cross-session
/// mutation goes through the [`SessionControl`] block instead.
pub struct SessionContext {
    pub active: bool,

    /* target connection info */
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub slave_hosts: Vec<(String, u16)>,

    pub mode: Mode,
    pub force: bool,
    pub backup: bool,
    pub ignore_warnings: bool,

    pub profile: RemoteProfile,
    pub started: Instant,

    pub statements: Vec<StatementRecord>,
    next_id: u32,

    pub splits: Vec<SplitGroup>,
    pub trees: Vec<TreeRecord>,
    pub current_db: Option<String>,

    /// Tables created earlier in this batch: "db.table" -> lowercased
    /// column names.
    pub batch_tables: HashMap<String, HashSet<String>>,
    /// Databases created earlier in this batch.
    pub batch_databases: HashSet<String>,
    /// "db.table" seen in a prior ALTER TABLE of this batch.
    pub altered_tables: HashSet<String>,

    pub control: Arc<SessionControl>,
}

pub fn batch_key(db: &str, table: &str) -> String {
    format!("{db}.{table}")
}

impl SessionContext {
    pub fn new(control: Arc<SessionControl>) -> Self {
        SessionContext {
            active: false,
            host: String::new(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            slave_hosts: Vec::new(),
            mode: Mode::Check,
            force: false,
            backup: true,
            ignore_warnings: false,
            profile: RemoteProfile::default(),
            started: Instant::now(),
            statements: Vec::new(),
            next_id: 1,
            splits: Vec::new(),
            trees: Vec::new(),
            current_db: None,
            batch_tables: HashMap::new(),
            batch_databases: HashSet::new(),
            altered_tables: HashSet::new(),
            control,
        }
    }

    pub fn next_statement_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn push_statement(&mut self, record: StatementRecord) {
        self.statements.push(record);
        self.control
            .total_sql
            .store(self.statements.len(), Ordering::Relaxed);
    }

    pub fn batch_has_table(&self, db: &str, table: &str) -> bool {
        self.batch_tables.contains_key(&batch_key(db, table))
    }

    pub fn batch_column_exists(&self, db: &str, table: &str, column: &str) -> bool {
        self.batch_tables
            .get(&batch_key(db, table))
            .map(|cols| cols.contains(&column.to_lowercase()))
            .unwrap_or(false)
    }

    /// Clear all per-batch state; keeps the control block registered.
    pub fn reset(&mut self) {
        self.active = false;
        self.host.clear();
        self.port = 3306;
        self.user.clear();
        self.password.clear();
        self.slave_hosts.clear();
        self.mode = Mode::Check;
        self.force = false;
        self.backup = true;
        self.ignore_warnings = false;
        self.profile = RemoteProfile::default();
        self.statements.clear();
        self.next_id = 1;
        self.splits.clear();
        self.trees.clear();
        self.batch_tables.clear();
        self.batch_databases.clear();
        self.altered_tables.clear();
        self.control.reset();
    }
}

/* ================================================================
 *  Cross-session control block + registry
 * ================================================================ */

/// Descriptive fields for `inception show sessions`, refreshed at
/// magic_start.
#[derive(Debug, Clone, Default)]
pub struct SessionDesc {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mode: &'static str,
    pub db_type: &'static str,
}

/// The shared slice of a session another connection may touch: kill
/// flag, sleep override, and the load snapshot the session publishes.
pub struct SessionControl {
    pub conn_id: u32,
    pub active: AtomicBool,
    pub killed: AtomicBool,
    pub remote_thread_id: AtomicU64,
    pub sleep_ms: AtomicU64,
    pub threads_running: AtomicU64,
    /// -1 = never sampled.
    pub repl_delay: AtomicI64,
    pub total_sql: AtomicUsize,
    pub executed_sql: AtomicUsize,
    pub started: Mutex<Instant>,
    pub desc: Mutex<SessionDesc>,
}

impl SessionControl {
    pub fn new(conn_id: u32) -> Arc<Self> {
        Arc::new(SessionControl {
            conn_id,
            active: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            remote_thread_id: AtomicU64::new(0),
            sleep_ms: AtomicU64::new(0),
            threads_running: AtomicU64::new(0),
            repl_delay: AtomicI64::new(-1),
            total_sql: AtomicUsize::new(0),
            executed_sql: AtomicUsize::new(0),
            started: Mutex::new(Instant::now()),
            desc: Mutex::new(SessionDesc::default()),
        })
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.killed.store(false, Ordering::SeqCst);
        self.remote_thread_id.store(0, Ordering::SeqCst);
        self.sleep_ms.store(0, Ordering::Relaxed);
        self.threads_running.store(0, Ordering::Relaxed);
        self.repl_delay.store(-1, Ordering::Relaxed);
        self.total_sql.store(0, Ordering::Relaxed);
        self.executed_sql.store(0, Ordering::Relaxed);
        *self.desc.lock() = SessionDesc::default();
    }
}

/// Row shape for `inception show sessions`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub thread_id: u32,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub mode: String,
    pub db_type: String,
    pub sleep_ms: u64,
    pub total_sql: usize,
    pub executed_sql: usize,
    pub elapsed_sec: f64,
    pub threads_running: u64,
    pub repl_delay: i64,
}

/// Target info handed back by a force kill so the caller can issue the
/// remote KILL outside the registry lock.
#[derive(Debug, Clone)]
pub struct KillTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_thread_id: u64,
}

/// `connection id -> control block`, one entry per open connection.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<u32, Arc<SessionControl>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry::default())
    }

    pub fn register(&self, control: Arc<SessionControl>) {
        self.inner.lock().insert(control.conn_id, control);
    }

    pub fn unregister(&self, conn_id: u32) {
        self.inner.lock().remove(&conn_id);
    }

    /// `inception set sleep <tid> <ms>`; true when the session exists
    /// and is active.
    pub fn set_sleep(&self, thread_id: u32, ms: u64) -> bool {
        let map = self.inner.lock();
        match map.get(&thread_id) {
            Some(ctl) if ctl.active.load(Ordering::SeqCst) => {
                ctl.sleep_ms.store(ms, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// `inception kill <tid> [force]`. Sets the kill flag; with
    /// `force` also returns the remote target so the caller can abort
    /// the in-flight statement.
    pub fn kill(&self, thread_id: u32, force: bool) -> Option<Option<KillTarget>> {
        let map = self.inner.lock();
        let ctl = map.get(&thread_id)?;
        if !ctl.active.load(Ordering::SeqCst) {
            return None;
        }
        ctl.killed.store(true, Ordering::SeqCst);
        if !force {
            return Some(None);
        }
        let desc = ctl.desc.lock();
        let remote_tid = ctl.remote_thread_id.load(Ordering::SeqCst);
        Some(Some(KillTarget {
            host: desc.host.clone(),
            port: desc.port,
            user: desc.user.clone(),
            password: desc.password.clone(),
            remote_thread_id: remote_tid,
        }))
    }

    /// Snapshot of all active sessions for `inception show sessions`.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let map = self.inner.lock();
        let mut out: Vec<SessionInfo> = map
            .values()
            .filter(|ctl| ctl.active.load(Ordering::SeqCst))
            .map(|ctl| {
                let desc = ctl.desc.lock();
                SessionInfo {
                    thread_id: ctl.conn_id,
                    host: desc.host.clone(),
                    port: desc.port,
                    user: desc.user.clone(),
                    mode: desc.mode.to_string(),
                    db_type: desc.db_type.to_string(),
                    sleep_ms: ctl.sleep_ms.load(Ordering::Relaxed),
                    total_sql: ctl.total_sql.load(Ordering::Relaxed),
                    executed_sql: ctl.executed_sql.load(Ordering::Relaxed),
                    elapsed_sec: ctl.started.lock().elapsed().as_secs_f64(),
                    threads_running: ctl.threads_running.load(Ordering::Relaxed),
                    repl_delay: ctl.repl_delay.load(Ordering::Relaxed),
                }
            })
            .collect();
        out.sort_by_key(|s| s.thread_id);
        out
    }
}
