//! Remote target access: lazy audit-phase connection, the schema
//! prober the rule engine consults, execution-phase connectors, and
//! the fixed SQL templates sent to the target.

use crate::error::GateError;
use crate::session::{DbType, RemoteProfile};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Row};
use std::time::Duration;

/* ================================================================
 *  SQL templates (profile-aware)
 * ================================================================ */

pub mod templates {
    pub const SHOW_WARNINGS: &str = "SHOW WARNINGS";
    pub const SHOW_THREADS_RUNNING: &str = "SHOW GLOBAL STATUS LIKE 'Threads_running'";
    pub const SHOW_SLAVE_STATUS: &str = "SHOW SLAVE STATUS";
    pub const SHOW_GLOBAL_READ_ONLY: &str = "SELECT @@GLOBAL.read_only";

    fn q(s: &str) -> String {
        s.replace('\'', "''")
    }

    pub fn show_databases_like(db: &str) -> String {
        format!("SHOW DATABASES LIKE '{}'", q(db))
    }

    pub fn use_database(db: &str) -> String {
        format!("USE `{}`", db.replace('`', "``"))
    }

    pub fn show_tables_like(table: &str) -> String {
        format!("SHOW TABLES LIKE '{}'", q(table))
    }

    pub fn check_column_exists(db: &str, table: &str, column: &str) -> String {
        format!(
            "SELECT 1 FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA='{}' AND TABLE_NAME='{}' AND COLUMN_NAME='{}'",
            q(db),
            q(table),
            q(column)
        )
    }

    pub fn check_index_exists(db: &str, table: &str, index: &str) -> String {
        format!(
            "SELECT 1 FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA='{}' AND TABLE_NAME='{}' AND INDEX_NAME='{}' LIMIT 1",
            q(db),
            q(table),
            q(index)
        )
    }

    pub fn get_table_rows(db: &str, table: &str) -> String {
        format!(
            "SELECT TABLE_ROWS FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA='{}' AND TABLE_NAME='{}'",
            q(db),
            q(table)
        )
    }

    pub fn get_column_info(db: &str, table: &str, column: &str) -> String {
        format!(
            "SELECT DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA='{}' AND TABLE_NAME='{}' AND COLUMN_NAME='{}'",
            q(db),
            q(table),
            q(column)
        )
    }

    pub fn get_table_columns(db: &str, table: &str) -> String {
        format!(
            "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA='{}' AND TABLE_NAME='{}' ORDER BY ORDINAL_POSITION",
            q(db),
            q(table)
        )
    }

    pub fn kill_thread(thread_id: u64) -> String {
        format!("KILL {thread_id}")
    }
}

/* ================================================================
 *  Connection parameters and timeouts
 * ================================================================ */

const AUDIT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const AUDIT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const EXEC_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const EXEC_QUERY_TIMEOUT: Duration = Duration::from_secs(600);
pub const REPLICA_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct ConnParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ConnParams {
    fn opts(&self) -> Opts {
        let host = if self.host.is_empty() { "127.0.0.1" } else { &self.host };
        let user = if self.user.is_empty() { "root" } else { &self.user };
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(self.port)
            .user(Some(user))
            .prefer_socket(false)
            .init(vec!["SET NAMES utf8mb4".to_string()]);
        if !self.password.is_empty() {
            builder = builder.pass(Some(self.password.clone()));
        }
        builder.into()
    }

    pub fn display_host(&self) -> &str {
        if self.host.is_empty() {
            "127.0.0.1"
        } else {
            &self.host
        }
    }
}

async fn connect(params: &ConnParams, timeout: Duration) -> Result<Conn, String> {
    match tokio::time::timeout(timeout, Conn::new(params.opts())).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(format!(
            "Cannot connect to remote {}:{}: {}",
            params.display_host(),
            params.port,
            e
        )),
        Err(_) => Err(format!(
            "Cannot connect to remote {}:{}: connect timeout",
            params.display_host(),
            params.port
        )),
    }
}

/// Open the execution-phase connection (longer timeouts).
pub async fn connect_exec(params: &ConnParams) -> Result<Conn, String> {
    connect(params, EXEC_CONNECT_TIMEOUT).await
}

/// Open a replica connection for SHOW SLAVE STATUS polling.
pub async fn connect_replica(params: &ConnParams) -> Result<Conn, String> {
    connect(params, EXEC_CONNECT_TIMEOUT).await
}

/// Run one query with a wall-clock bound; timeout maps into a driver
/// error so callers handle a single error shape.
pub async fn query_rows(
    conn: &mut Conn,
    sql: &str,
    timeout: Duration,
) -> Result<Vec<Row>, GateError> {
    match tokio::time::timeout(timeout, conn.query::<Row, _>(sql)).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(GateError::Remote(format!("query timeout: {sql}"))),
    }
}

pub async fn query_drop(
    conn: &mut Conn,
    sql: &str,
    timeout: Duration,
) -> Result<(), GateError> {
    match tokio::time::timeout(timeout, conn.query_drop(sql)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(GateError::Remote(format!("query timeout: {sql}"))),
    }
}

/// Best-effort remote KILL for force cancellation.
pub async fn kill_remote_thread(params: &ConnParams, thread_id: u64) -> Result<(), GateError> {
    let mut conn = connect(params, AUDIT_CONNECT_TIMEOUT)
        .await
        .map_err(GateError::Remote)?;
    query_drop(&mut conn, &templates::kill_thread(thread_id), AUDIT_QUERY_TIMEOUT).await?;
    let _ = conn.disconnect().await;
    Ok(())
}

/* ================================================================
 *  Version / profile detection
 * ================================================================ */

/// First `M.N` number pair anywhere in the text.
fn parse_first_version(text: &str) -> Option<(u32, u32)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j >= bytes.len() || bytes[j] != b'.' {
            i = j;
            continue;
        }
        let mut k = j + 1;
        while k < bytes.len() && bytes[k].is_ascii_digit() {
            k += 1;
        }
        if k == j + 1 {
            i = k;
            continue;
        }
        let major = text[i..j].parse().ok()?;
        let minor = text[j + 1..k].parse().ok()?;
        return Some((major, minor));
    }
    None
}

fn parse_tidb_version(server_info: &str) -> Option<(u32, u32)> {
    for marker in ["TiDB-v", "tidb-v", "TiDB-", "tidb-"] {
        if let Some(pos) = server_info.find(marker) {
            if let Some(v) = parse_first_version(&server_info[pos + marker.len()..]) {
                return Some(v);
            }
        }
    }
    None
}

/// Classify a raw `SELECT VERSION()` string.
pub fn profile_from_version(server_info: &str) -> RemoteProfile {
    let lowered = server_info.to_ascii_lowercase();
    let is_tidb = lowered.contains("tidb");
    let mut profile = RemoteProfile::default();
    profile.db_type = if is_tidb { DbType::Tidb } else { DbType::MySql };

    let parsed = if is_tidb {
        parse_tidb_version(server_info).or_else(|| parse_first_version(server_info))
    } else {
        parse_first_version(server_info)
    };
    if let Some((major, minor)) = parsed {
        profile.major = major;
        profile.minor = minor;
    }
    profile
}

/* ================================================================
 *  Schema prober
 * ================================================================ */

/// Column shape from information_schema.
#[derive(Debug, Clone, Default)]
pub struct RemoteColumnInfo {
    pub data_type: String,
    pub char_max_length: i64,
    pub numeric_precision: i64,
    pub numeric_scale: i64,
}

/// What the audit engine may ask the remote. `None` means the lookup
/// could not be answered (connectivity), never "does not exist".
#[async_trait]
pub trait SchemaProber: Send {
    async fn db_exists(&mut self, db: &str) -> Option<bool>;
    async fn table_exists(&mut self, db: &str, table: &str) -> Option<bool>;
    async fn column_exists(&mut self, db: &str, table: &str, column: &str) -> Option<bool>;
    async fn index_exists(&mut self, db: &str, table: &str, index: &str) -> Option<bool>;
    async fn table_rows(&mut self, db: &str, table: &str) -> Option<i64>;
    async fn column_info(&mut self, db: &str, table: &str, column: &str)
        -> Option<RemoteColumnInfo>;
    async fn column_list(&mut self, db: &str, table: &str) -> Option<Vec<String>>;
    /// EXPLAIN-based row estimate for a DML statement.
    async fn explain_rows(&mut self, db: &str, sql: &str, tidb: bool) -> Option<i64>;
    /// Is the handle usable? A poisoned handle answers every probe
    /// with `None` without touching the network again.
    fn available(&self) -> bool;
}

/// Lazy audit-phase remote handle. The first failed connect poisons
/// the handle for the rest of the session.
pub struct RemoteAudit {
    params: ConnParams,
    conn: Option<Conn>,
    pub failed: bool,
    pub error: String,
}

impl RemoteAudit {
    pub fn new(params: ConnParams) -> Self {
        RemoteAudit {
            params,
            conn: None,
            failed: false,
            error: String::new(),
        }
    }

    pub fn unconfigured() -> Self {
        RemoteAudit::new(ConnParams::default())
    }

    pub async fn get(&mut self) -> Option<&mut Conn> {
        if self.failed {
            return None;
        }
        if self.conn.is_none() {
            match connect(&self.params, AUDIT_CONNECT_TIMEOUT).await {
                Ok(conn) => self.conn = Some(conn),
                Err(e) => {
                    self.failed = true;
                    self.error = e;
                    return None;
                }
            }
        }
        self.conn.as_mut()
    }

    /// Detect the remote flavor/version on the audit connection.
    pub async fn detect_profile(&mut self) -> Option<RemoteProfile> {
        let conn = self.get().await?;
        let rows = query_rows(conn, "SELECT VERSION()", AUDIT_QUERY_TIMEOUT).await.ok()?;
        let version: String = rows.first()?.get(0)?;
        Some(profile_from_version(&version))
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.disconnect().await;
        }
    }

    async fn exists_query(&mut self, sql: String) -> Option<bool> {
        let conn = self.get().await?;
        match query_rows(conn, &sql, AUDIT_QUERY_TIMEOUT).await {
            Ok(rows) => Some(!rows.is_empty()),
            Err(_) => None,
        }
    }
}

#[async_trait]
impl SchemaProber for RemoteAudit {
    async fn db_exists(&mut self, db: &str) -> Option<bool> {
        self.exists_query(templates::show_databases_like(db)).await
    }

    async fn table_exists(&mut self, db: &str, table: &str) -> Option<bool> {
        {
            let conn = self.get().await?;
            query_rows(conn, &templates::use_database(db), AUDIT_QUERY_TIMEOUT)
                .await
                .ok()?;
        }
        self.exists_query(templates::show_tables_like(table)).await
    }

    async fn column_exists(&mut self, db: &str, table: &str, column: &str) -> Option<bool> {
        self.exists_query(templates::check_column_exists(db, table, column))
            .await
    }

    async fn index_exists(&mut self, db: &str, table: &str, index: &str) -> Option<bool> {
        self.exists_query(templates::check_index_exists(db, table, index))
            .await
    }

    async fn table_rows(&mut self, db: &str, table: &str) -> Option<i64> {
        let conn = self.get().await?;
        let rows = query_rows(conn, &templates::get_table_rows(db, table), AUDIT_QUERY_TIMEOUT)
            .await
            .ok()?;
        rows.first()?.get::<Option<i64>, usize>(0)?
    }

    async fn column_info(
        &mut self,
        db: &str,
        table: &str,
        column: &str,
    ) -> Option<RemoteColumnInfo> {
        let conn = self.get().await?;
        let rows = query_rows(
            conn,
            &templates::get_column_info(db, table, column),
            AUDIT_QUERY_TIMEOUT,
        )
        .await
        .ok()?;
        let row = rows.first()?;
        Some(RemoteColumnInfo {
            data_type: row.get::<Option<String>, usize>(0)??,
            char_max_length: row.get::<Option<i64>, usize>(1)?.unwrap_or(-1),
            numeric_precision: row.get::<Option<i64>, usize>(2)?.unwrap_or(-1),
            numeric_scale: row.get::<Option<i64>, usize>(3)?.unwrap_or(-1),
        })
    }

    async fn column_list(&mut self, db: &str, table: &str) -> Option<Vec<String>> {
        let conn = self.get().await?;
        let rows = query_rows(
            conn,
            &templates::get_table_columns(db, table),
            AUDIT_QUERY_TIMEOUT,
        )
        .await
        .ok()?;
        let cols: Vec<String> = rows
            .iter()
            .filter_map(|r| r.get::<Option<String>, usize>(0).flatten())
            .collect();
        if cols.is_empty() {
            None
        } else {
            Some(cols)
        }
    }

    async fn explain_rows(&mut self, db: &str, sql: &str, tidb: bool) -> Option<i64> {
        let conn = self.get().await?;
        query_rows(conn, &templates::use_database(db), AUDIT_QUERY_TIMEOUT)
            .await
            .ok()?;
        let rows = query_rows(conn, &format!("EXPLAIN {sql}"), AUDIT_QUERY_TIMEOUT)
            .await
            .ok()?;

        // MySQL EXPLAIN: rows at column 9; TiDB: estRows at column 1.
        let idx = if tidb { 1 } else { 9 };
        let first = rows.first()?;
        if idx >= first.columns_ref().len() {
            return None;
        }

        let mut total: i64 = 0;
        for (n, row) in rows.iter().enumerate() {
            let val: Option<String> = row.get(idx).flatten();
            let Some(val) = val else { continue };
            let parsed = val.parse::<f64>().unwrap_or(0.0) as i64;
            if n == 0 {
                total = parsed;
            } else if !tidb {
                // MySQL: sum the remaining rows (derived-table plans).
                total += parsed;
            }
        }
        Some(total)
    }

    fn available(&self) -> bool {
        !self.failed
    }
}
