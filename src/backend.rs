//! The wire-protocol backend: one instance per client connection.
//!
//! Routes each incoming query through the session state machine —
//! marker comments open/close a batch, `inception` commands hit the
//! admin dispatcher, in-batch statements are parsed and intercepted,
//! and a small set of client-compatibility queries is answered
//! directly so stock MySQL clients connect cleanly.

use crate::ast::{self, SqlKind};
use crate::audit;
use crate::auditlog::{AuditLog, ClientInfo};
use crate::auth::verify_mysql_native_password;
use crate::backup;
use crate::command::{self, AdminOutcome};
use crate::config::SharedConfig;
use crate::error::GateError;
use crate::exec;
use crate::marker;
use crate::remote::{ConnParams, RemoteAudit};
use crate::result::{self, Cell, QueryOutput, ResultSet};
use crate::session::{
    Mode, SessionContext, SessionControl, SessionRegistry, StatementRecord,
};
use crate::split;
use crate::sqltext;
use crate::tree;
use async_trait::async_trait;
use opensrv_mysql::{
    AsyncMysqlShim, Column, ColumnFlags, ColumnType, ErrorKind, InitWriter, OkResponse,
    ParamParser, QueryResultWriter, StatementMetaWriter, ValueInner,
};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::iter;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

pub const SERVER_VERSION: &str = "8.0.0-sqlwarden";

pub struct Backend {
    registry: Arc<SessionRegistry>,
    cfg: SharedConfig,
    audit_log: Arc<AuditLog>,
    auth_password: String,
    salt: [u8; 20],
    conn_id: u32,
    control: Arc<SessionControl>,
    ctx: SessionContext,
    remote: RemoteAudit,
    client: Mutex<ClientInfo>,
    next_stmt_id: u32,
    stmts: HashMap<u32, String>,
}

impl Backend {
    pub fn new(
        registry: Arc<SessionRegistry>,
        cfg: SharedConfig,
        audit_log: Arc<AuditLog>,
        auth_password: String,
        conn_id: u32,
        peer: String,
    ) -> Self {
        let mut salt = [0u8; 20];
        OsRng.fill_bytes(&mut salt);
        let control = SessionControl::new(conn_id);
        registry.register(control.clone());
        Backend {
            registry,
            cfg,
            audit_log,
            auth_password,
            salt,
            conn_id,
            control: control.clone(),
            ctx: SessionContext::new(control),
            remote: RemoteAudit::unconfigured(),
            client: Mutex::new(ClientInfo {
                user: String::new(),
                host: peer,
            }),
            next_stmt_id: 1,
            stmts: HashMap::new(),
        }
    }

    /* ------------------------------------------------------------
     *  Batch lifecycle
     * ------------------------------------------------------------ */

    async fn open_batch(&mut self, query: &str) -> Result<(), GateError> {
        if self.ctx.active {
            return Err(GateError::Invalid(
                "magic_start while a batch is already active".into(),
            ));
        }

        let cfg = self.cfg.snapshot();
        let opts = marker::parse_magic_start(query, &cfg)?;

        self.ctx.reset();
        self.ctx.active = true;
        self.ctx.host = opts.host;
        self.ctx.port = opts.port;
        self.ctx.user = opts.user;
        self.ctx.password = opts.password;
        self.ctx.mode = opts.mode;
        self.ctx.force = opts.force;
        self.ctx.backup = opts.backup;
        self.ctx.ignore_warnings = opts.ignore_warnings;
        self.ctx.slave_hosts = opts.slave_hosts;
        self.ctx.started = Instant::now();

        self.control.active.store(true, Ordering::SeqCst);
        self.control.sleep_ms.store(opts.sleep_ms, Ordering::Relaxed);
        *self.control.started.lock() = self.ctx.started;

        self.remote = RemoteAudit::new(ConnParams {
            host: self.ctx.host.clone(),
            port: self.ctx.port,
            user: self.ctx.user.clone(),
            password: self.ctx.password.clone(),
        });

        // Detect the remote flavor up front; a failure here poisons
        // the probe handle and surfaces on the first statement.
        if let Some(profile) = self.remote.detect_profile().await {
            self.ctx.profile = profile;
        }

        {
            let mut desc = self.control.desc.lock();
            desc.host = self.ctx.host.clone();
            desc.port = self.ctx.port;
            desc.user = self.ctx.user.clone();
            desc.password = self.ctx.password.clone();
            desc.mode = self.ctx.mode.name();
            desc.db_type = self.ctx.profile.db_type.name();
        }

        // Statements may follow the marker comment in the same query.
        let rest = sqltext::strip_marker_comment(query);
        if !rest.trim().is_empty() {
            let rest = rest.to_string();
            self.process_batch_text(&rest).await;
        }
        Ok(())
    }

    async fn close_batch(&mut self) -> Result<ResultSet, GateError> {
        if !self.ctx.active {
            return Err(GateError::Invalid("magic_commit without magic_start".into()));
        }

        let rows = match self.ctx.mode {
            Mode::Split => result::split_result(&self.ctx),
            Mode::QueryTree => result::query_tree_result(&self.ctx),
            Mode::Check => result::audit_result(&self.ctx, self.remote.failed),
            Mode::Execute => {
                let client = self.client.lock().clone();
                exec::execute_statements(&mut self.ctx, &self.cfg, &self.audit_log, &client)
                    .await;
                if self.ctx.backup && self.ctx.statements.iter().any(|s| s.affected_rows > 0) {
                    backup::generate_rollback(&mut self.ctx)?;
                }
                result::audit_result(&self.ctx, self.remote.failed)
            }
        };

        // Session summary line.
        {
            let client = self.client.lock().clone();
            let cfg = self.cfg.snapshot();
            let errors = self
                .ctx
                .statements
                .iter()
                .filter(|s| s.errlevel >= crate::session::ErrLevel::Error)
                .count();
            self.audit_log.log_session(
                &cfg.audit_log,
                &client,
                &self.ctx,
                self.ctx.statements.len(),
                errors,
                self.ctx.started.elapsed().as_millis() as u64,
            );
        }

        self.remote.close().await;
        self.remote = RemoteAudit::unconfigured();
        self.ctx.reset();
        Ok(rows)
    }

    /* ------------------------------------------------------------
     *  Interception
     * ------------------------------------------------------------ */

    async fn process_batch_text(&mut self, text: &str) {
        let pieces: Vec<String> = sqltext::split_statements(text)
            .into_iter()
            .map(str::to_string)
            .collect();
        for piece in pieces {
            self.intercept_statement(&piece).await;
        }
    }

    async fn intercept_statement(&mut self, piece: &str) {
        let sql = sqltext::strip_marker_comment(piece).trim().to_string();
        if sql.is_empty() {
            return;
        }

        let stmt = match Parser::parse_sql(&MySqlDialect {}, &sql) {
            Ok(stmts) => match stmts.into_iter().next() {
                Some(stmt) => stmt,
                None => return,
            },
            Err(e) => {
                // Record the failed piece (up to its first `;`) and
                // keep going with the rest of the batch.
                let id = self.ctx.next_statement_id();
                let mut record = StatementRecord::new(
                    id,
                    sqltext::first_statement(&sql).trim().to_string(),
                    SqlKind::Unknown,
                );
                record.stage = crate::session::Stage::Checked;
                record.stage_status = "Audit completed".into();
                record.append_error(format!("SQL parse error: {e}"));
                self.ctx.push_statement(record);
                return;
            }
        };

        let kind = SqlKind::of(&stmt);

        match self.ctx.mode {
            Mode::Split => {
                split::fold_statement(&mut self.ctx, &stmt, &sql);
            }
            Mode::QueryTree => match &stmt {
                Statement::Use(u) => {
                    if let Some(db) = ast::use_db_name(u) {
                        self.ctx.current_db = Some(db);
                    }
                }
                Statement::Set(_) => {}
                _ => {
                    let id = self.ctx.next_statement_id();
                    let json = tree::extract_query_tree(
                        &stmt,
                        self.ctx.current_db.as_deref(),
                        &mut self.remote,
                    )
                    .await;
                    self.ctx.trees.push(crate::session::TreeRecord {
                        id,
                        sql_text: sql.clone(),
                        tree_json: json,
                    });
                }
            },
            Mode::Check | Mode::Execute => {
                let id = self.ctx.next_statement_id();
                let mut record = StatementRecord::new(id, sql.clone(), kind);

                // First remote touch decides the session's
                // connectivity verdict.
                let _ = self.remote.get().await;
                let connect_error = if self.remote.failed {
                    Some(format!(
                        "Cannot connect to remote server {}:{} ({}).",
                        if self.ctx.host.is_empty() {
                            "127.0.0.1"
                        } else {
                            &self.ctx.host
                        },
                        self.ctx.port,
                        self.remote.error
                    ))
                } else {
                    None
                };

                let cfg = self.cfg.snapshot();
                audit::audit_statement(
                    &stmt,
                    &mut record,
                    &mut self.ctx,
                    &mut self.remote,
                    connect_error.as_deref(),
                    &cfg,
                )
                .await;
                self.ctx.push_statement(record);

                if let Statement::Use(u) = &stmt {
                    if let Some(db) = ast::use_db_name(u) {
                        self.ctx.current_db = Some(db);
                    }
                }
            }
        }
    }

    /* ------------------------------------------------------------
     *  Idle-mode client compatibility
     * ------------------------------------------------------------ */

    fn handle_idle_query(&mut self, query: &str) -> Result<QueryOutput, GateError> {
        let q = query.trim().trim_end_matches(';').trim();
        if q.is_empty() {
            return Ok(QueryOutput::ok());
        }
        let upper = q.to_ascii_uppercase();

        if upper == "SELECT DATABASE()" {
            return Ok(QueryOutput::Rows(self.database_row()));
        }
        if upper == "SELECT VERSION()" {
            return Ok(QueryOutput::Rows(single_text_row("VERSION()", SERVER_VERSION)));
        }

        if let Some(out) = self.try_select_sysvars(q) {
            return Ok(QueryOutput::Rows(out));
        }

        if upper.starts_with("SHOW VARIABLES") {
            return Ok(QueryOutput::Rows(self.show_variables(q)));
        }

        if let Some(rest) = strip_keyword(q, "USE") {
            let db = rest.trim().trim_matches('`').to_string();
            if db.is_empty() {
                return Err(GateError::Parse("USE requires a database name".into()));
            }
            self.ctx.current_db = Some(db);
            return Ok(QueryOutput::ok());
        }

        if upper.starts_with("SET ") {
            static SET_GLOBAL: OnceLock<Regex> = OnceLock::new();
            let re = SET_GLOBAL.get_or_init(|| {
                Regex::new(r"(?i)^SET\s+GLOBAL\s+([A-Za-z0-9_]+)\s*=\s*(.+)$").unwrap()
            });
            if let Some(caps) = re.captures(q) {
                self.cfg.set_global(&caps[1], &caps[2])?;
                return Ok(QueryOutput::ok());
            }
            // Session-level SETs from client libraries are harmless.
            return Ok(QueryOutput::ok());
        }

        Err(GateError::NotSupported(
            "statement outside an audit batch; open one with a magic_start comment".into(),
        ))
    }

    fn database_row(&self) -> ResultSet {
        let columns = vec![text_column("DATABASE()")];
        let cell = match &self.ctx.current_db {
            Some(db) => Cell::Text(db.clone()),
            None => Cell::Null,
        };
        ResultSet {
            columns,
            rows: vec![vec![cell]],
        }
    }

    fn sysvar_value(&self, name: &str) -> Option<String> {
        let cfg = self.cfg.snapshot();
        let v = match name.trim_start_matches("@@").to_ascii_lowercase().as_str() {
            "version" => SERVER_VERSION.to_string(),
            "version_comment" => "sqlwarden audit gateway".to_string(),
            "autocommit" => "1".to_string(),
            "sql_mode" => String::new(),
            "max_allowed_packet" => (64 * 1024 * 1024).to_string(),
            "character_set_client" | "character_set_connection" | "character_set_results"
            | "character_set_server" => "utf8mb4".to_string(),
            "collation_connection" | "collation_server" => "utf8mb4_general_ci".to_string(),
            "transaction_isolation" | "tx_isolation" => "REPEATABLE-READ".to_string(),
            "lower_case_table_names" => "0".to_string(),
            "wait_timeout" => "28800".to_string(),
            "audit_support_charset" => cfg.support_charset,
            "audit_log" => cfg.audit_log,
            _ => return None,
        };
        Some(v)
    }

    /// `SELECT @@a [, @@b ...]` — the handshake queries clients fire.
    fn try_select_sysvars(&self, q: &str) -> Option<ResultSet> {
        let upper = q.to_ascii_uppercase();
        if !upper.starts_with("SELECT") || !q.contains("@@") {
            return None;
        }
        static VARS: OnceLock<Regex> = OnceLock::new();
        let re = VARS.get_or_init(|| Regex::new(r"@@[A-Za-z0-9_.]+").unwrap());

        let mut columns = Vec::new();
        let mut row = Vec::new();
        for m in re.find_iter(q) {
            let name = m.as_str();
            columns.push(text_column(name));
            match self.sysvar_value(name) {
                Some(v) => row.push(Cell::Text(v)),
                None => row.push(Cell::Null),
            }
        }
        if columns.is_empty() {
            return None;
        }
        Some(ResultSet {
            columns,
            rows: vec![row],
        })
    }

    fn show_variables(&self, q: &str) -> ResultSet {
        const NAMES: &[&str] = &[
            "autocommit",
            "character_set_client",
            "character_set_connection",
            "character_set_results",
            "character_set_server",
            "collation_connection",
            "collation_server",
            "lower_case_table_names",
            "max_allowed_packet",
            "sql_mode",
            "transaction_isolation",
            "version",
            "version_comment",
            "wait_timeout",
        ];
        static LIKE: OnceLock<Regex> = OnceLock::new();
        let pattern = LIKE
            .get_or_init(|| Regex::new(r"(?i)LIKE\s+'([^']*)'").unwrap())
            .captures(q)
            .map(|c| c[1].to_string());

        let columns = vec![text_column("Variable_name"), text_column("Value")];
        let rows = NAMES
            .iter()
            .filter(|name| match &pattern {
                Some(p) => like_matches(p, name),
                None => true,
            })
            .filter_map(|name| {
                self.sysvar_value(name)
                    .map(|v| vec![Cell::Text(name.to_string()), Cell::Text(v)])
            })
            .collect();
        ResultSet { columns, rows }
    }

    fn err_to_kind(err: &GateError) -> ErrorKind {
        match err {
            GateError::Parse(_) => ErrorKind::ER_PARSE_ERROR,
            GateError::AccessDenied(_) => ErrorKind::ER_ACCESS_DENIED_ERROR,
            GateError::NotSupported(_) => ErrorKind::ER_NOT_SUPPORTED_YET,
            GateError::UnknownSystemVariable(_) => ErrorKind::ER_UNKNOWN_SYSTEM_VARIABLE,
            _ => ErrorKind::ER_UNKNOWN_ERROR,
        }
    }
}

fn text_column(name: &str) -> Column {
    Column {
        table: String::new(),
        column: name.to_string(),
        coltype: ColumnType::MYSQL_TYPE_VAR_STRING,
        colflags: ColumnFlags::empty(),
    }
}

async fn write_result<'a, W>(
    results: QueryResultWriter<'a, W>,
    rs: &ResultSet,
) -> Result<(), std::io::Error>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let mut rw = results.start(&rs.columns).await?;
    for row in &rs.rows {
        for cell in row {
            match cell {
                Cell::Null => rw.write_col(None::<u8>)?,
                Cell::Int(n) => rw.write_col(*n)?,
                Cell::UInt(n) => rw.write_col(*n)?,
                Cell::Text(s) => rw.write_col(s.as_str())?,
            }
        }
        rw.end_row().await?;
    }
    rw.finish().await
}

#[async_trait]
impl<W> AsyncMysqlShim<W> for Backend
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    type Error = GateError;

    fn version(&self) -> String {
        SERVER_VERSION.to_string()
    }

    fn connect_id(&self) -> u32 {
        self.conn_id
    }

    fn salt(&self) -> [u8; 20] {
        self.salt
    }

    async fn authenticate(
        &self,
        auth_plugin: &str,
        username: &[u8],
        salt: &[u8],
        auth_data: &[u8],
    ) -> bool {
        if auth_plugin != "mysql_native_password" {
            return false;
        }
        let Ok(username) = std::str::from_utf8(username) else {
            return false;
        };
        let ok = verify_mysql_native_password(salt, auth_data, &self.auth_password);
        if ok {
            self.client.lock().user = username.to_string();
        }
        ok
    }

    async fn on_prepare<'a>(
        &'a mut self,
        query: &'a str,
        info: StatementMetaWriter<'a, W>,
    ) -> Result<(), GateError> {
        let id = self.next_stmt_id;
        self.next_stmt_id = self.next_stmt_id.wrapping_add(1);

        let parts = split_query_template(query);
        let param_count = parts.len().saturating_sub(1);
        self.stmts.insert(id, query.to_string());

        let params: Vec<Column> = (0..param_count).map(|_| text_column("")).collect();

        info.reply(id, params.iter(), iter::empty::<&Column>()).await?;
        Ok(())
    }

    async fn on_execute<'a>(
        &'a mut self,
        id: u32,
        params: ParamParser<'a>,
        results: QueryResultWriter<'a, W>,
    ) -> Result<(), GateError> {
        let query_tpl = self
            .stmts
            .get(&id)
            .ok_or_else(|| GateError::Invalid(format!("unknown statement id {id}")))?;

        let parts = split_query_template(query_tpl);
        let mut final_query = String::new();
        let mut param_iter = params.into_iter();

        for (i, part) in parts.iter().enumerate() {
            final_query.push_str(part);
            if i < parts.len() - 1 {
                let p = param_iter
                    .next()
                    .ok_or_else(|| GateError::Parse("missing parameters".into()))?;
                let opensrv_mysql::ParamValue { value, .. } = p;
                final_query.push_str(&mysql_value_to_sql(value)?);
            }
        }
        if param_iter.next().is_some() {
            return Err(GateError::Parse("too many parameters".into()));
        }

        self.on_query(&final_query, results).await
    }

    async fn on_close<'a>(&'a mut self, stmt: u32)
    where
        W: 'async_trait,
    {
        self.stmts.remove(&stmt);
    }

    async fn on_init<'a>(
        &'a mut self,
        db: &'a str,
        writer: InitWriter<'a, W>,
    ) -> Result<(), GateError> {
        // COM_INIT_DB — equivalent to USE <db>.
        self.ctx.current_db = Some(db.to_string());
        writer.ok().await?;
        Ok(())
    }

    async fn on_query<'a>(
        &'a mut self,
        query: &'a str,
        results: QueryResultWriter<'a, W>,
    ) -> Result<(), GateError> {
        // Commit sentinel: finalize and return the batch report.
        if marker::is_magic_commit(query) {
            match self.close_batch().await {
                Ok(rs) => write_result(results, &rs).await?,
                Err(e) => {
                    results
                        .error(Self::err_to_kind(&e), e.to_string().as_bytes())
                        .await?
                }
            }
            return Ok(());
        }

        // Batch opener.
        if marker::is_magic_start(query) {
            match self.open_batch(query).await {
                Ok(()) => results.completed(OkResponse::default()).await?,
                Err(e) => {
                    results
                        .error(Self::err_to_kind(&e), e.to_string().as_bytes())
                        .await?
                }
            }
            return Ok(());
        }

        // Admin side channel, usable with or without a batch.
        {
            let registry = self.registry.clone();
            let cfg = self.cfg.clone();
            if let Some(outcome) = command::handle_admin_command(query, &registry, &cfg).await {
                match outcome {
                    AdminOutcome::Ok => results.completed(OkResponse::default()).await?,
                    AdminOutcome::Rows(rs) => write_result(results, &rs).await?,
                    AdminOutcome::Error(msg) => {
                        results
                            .error(ErrorKind::ER_UNKNOWN_ERROR, msg.as_bytes())
                            .await?
                    }
                }
                return Ok(());
            }
        }

        if self.ctx.active {
            // The client's own USE handling depends on this returning
            // a real row even mid-batch.
            if query
                .trim()
                .trim_end_matches(';')
                .eq_ignore_ascii_case("SELECT DATABASE()")
            {
                let rs = self.database_row();
                write_result(results, &rs).await?;
                return Ok(());
            }
            self.process_batch_text(query).await;
            results.completed(OkResponse::default()).await?;
            return Ok(());
        }

        match self.handle_idle_query(query) {
            Ok(QueryOutput::Ok { affected_rows, info }) => {
                let ok = OkResponse {
                    affected_rows,
                    info,
                    ..Default::default()
                };
                results.completed(ok).await?;
            }
            Ok(QueryOutput::Rows(rs)) => write_result(results, &rs).await?,
            Err(e) => {
                results
                    .error(Self::err_to_kind(&e), e.to_string().as_bytes())
                    .await?;
            }
        }
        Ok(())
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.registry.unregister(self.conn_id);
    }
}

/* ================================================================
 *  Small text utilities
 * ================================================================ */

fn strip_keyword<'a>(q: &'a str, kw: &str) -> Option<&'a str> {
    let upper = q.to_ascii_uppercase();
    let rest = upper.strip_prefix(&kw.to_ascii_uppercase())?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(&q[kw.len()..])
}

/// SQL LIKE with `%` and `_`, case-insensitive, for SHOW ... LIKE.
fn like_matches(pattern: &str, value: &str) -> bool {
    fn rec(p: &[u8], v: &[u8]) -> bool {
        match (p.first(), v.first()) {
            (None, None) => true,
            (Some(b'%'), _) => rec(&p[1..], v) || (!v.is_empty() && rec(p, &v[1..])),
            (Some(b'_'), Some(_)) => rec(&p[1..], &v[1..]),
            (Some(pc), Some(vc)) => pc.eq_ignore_ascii_case(vc) && rec(&p[1..], &v[1..]),
            _ => false,
        }
    }
    rec(pattern.as_bytes(), value.as_bytes())
}

/// Split a prepared-statement template on `?` placeholders, honoring
/// quoted strings and backtick identifiers.
fn split_query_template(query: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    let mut in_sq = false;
    let mut in_bq = false;
    let mut chars = query.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '\'' if !in_bq => {
                if in_sq {
                    if let Some((_, '\'')) = chars.peek() {
                        chars.next();
                    } else {
                        in_sq = false;
                    }
                } else {
                    in_sq = true;
                }
            }
            '`' if !in_sq => {
                in_bq = !in_bq;
            }
            '?' if !in_sq && !in_bq => {
                out.push(&query[last..i]);
                last = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&query[last..]);
    out
}

fn mysql_value_to_sql(value: opensrv_mysql::Value<'_>) -> Result<String, GateError> {
    match value.into_inner() {
        ValueInner::NULL => Ok("NULL".to_string()),
        ValueInner::Int(n) => Ok(n.to_string()),
        ValueInner::UInt(n) => Ok(n.to_string()),
        ValueInner::Bytes(bytes) => {
            let s = std::str::from_utf8(bytes).map_err(|_| {
                GateError::Invalid("non-utf8 string parameter in prepared statement".into())
            })?;
            Ok(format!("'{}'", s.replace('\'', "''")))
        }
        ValueInner::Double(f) => Ok(f.to_string()),
        ValueInner::Date(_) | ValueInner::Time(_) | ValueInner::Datetime(_) => Err(
            GateError::NotSupported("date/time parameters are not supported".into()),
        ),
    }
}

fn single_text_row(name: &str, value: &str) -> ResultSet {
    ResultSet {
        columns: vec![text_column(name)],
        rows: vec![vec![Cell::Text(value.to_string())]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::session::{ErrLevel, Stage};

    fn backend() -> Backend {
        Backend::new(
            SessionRegistry::new(),
            SharedConfig::new(AuditConfig::default()),
            Arc::new(AuditLog::new()),
            String::new(),
            1,
            "test".into(),
        )
    }

    #[tokio::test]
    async fn split_mode_batch_end_to_end() {
        let mut b = backend();
        b.open_batch("/*--host=127.0.0.1;--port=3306;--enable-split=1;magic_start;*/")
            .await
            .unwrap();
        b.process_batch_text(
            "USE shop; INSERT INTO o VALUES (1); INSERT INTO o VALUES (2); \
             ALTER TABLE o ADD COLUMN y INT",
        )
        .await;

        let rs = b.close_batch().await.unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(
            rs.rows[0][1],
            Cell::Text("USE shop;\nINSERT INTO o VALUES (1);\nINSERT INTO o VALUES (2);\n".into())
        );
        assert_eq!(rs.rows[1][2], Cell::Int(1));
        assert!(!b.ctx.active, "context cleared after commit");
    }

    #[tokio::test]
    async fn parse_error_rows_keep_the_batch_going() {
        let mut b = backend();
        // Port 1 on localhost refuses instantly, so the audit probe
        // degrades to a connectivity error instead of hanging.
        b.open_batch("/*--host=127.0.0.1;--port=1;magic_start;*/")
            .await
            .unwrap();
        b.process_batch_text("THIS IS NOT SQL; SELECT 1").await;

        assert_eq!(b.ctx.statements.len(), 2);
        assert_eq!(b.ctx.statements[0].errlevel, ErrLevel::Error);
        assert!(b.ctx.statements[0].errmsg.contains("SQL parse error"));
        assert_eq!(b.ctx.statements[0].stage, Stage::Checked);
        // The second statement was still parsed and audited.
        assert_eq!(b.ctx.statements[1].kind, SqlKind::Select);
    }

    #[tokio::test]
    async fn second_magic_start_is_an_error() {
        let mut b = backend();
        b.open_batch("/*--host=127.0.0.1;--port=1;magic_start;*/")
            .await
            .unwrap();
        let err = b
            .open_batch("/*--host=127.0.0.1;--port=1;magic_start;*/")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already active"));
    }

    #[tokio::test]
    async fn commit_without_start_is_an_error() {
        let mut b = backend();
        assert!(b.close_batch().await.is_err());
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_result() {
        let mut b = backend();
        b.open_batch("/*--host=127.0.0.1;--port=1;magic_start;*/")
            .await
            .unwrap();
        let rs = b.close_batch().await.unwrap();
        assert_eq!(rs.columns.len(), 15);
        assert!(rs.rows.is_empty());
    }

    #[tokio::test]
    async fn idle_compat_queries() {
        let mut b = backend();
        match b.handle_idle_query("SELECT @@version_comment LIMIT 1").unwrap() {
            QueryOutput::Rows(rs) => {
                assert_eq!(rs.columns[0].column, "@@version_comment");
                assert_eq!(rs.rows.len(), 1);
            }
            _ => panic!("rows expected"),
        }

        b.handle_idle_query("USE shop").unwrap();
        match b.handle_idle_query("SELECT DATABASE()").unwrap() {
            QueryOutput::Rows(rs) => assert_eq!(rs.rows[0][0], Cell::Text("shop".into())),
            _ => panic!("rows expected"),
        }

        b.handle_idle_query("SET GLOBAL audit_check_select_star = ERROR")
            .unwrap();
        assert_eq!(
            b.cfg.snapshot().check_select_star,
            crate::config::RuleLevel::Error
        );

        assert!(b.handle_idle_query("CREATE TABLE t (id INT)").is_err());
    }

    #[test]
    fn like_matching() {
        assert!(like_matches("version%", "version_comment"));
        assert!(like_matches("%mode%", "sql_mode"));
        assert!(like_matches("autocommit", "AUTOCOMMIT"));
        assert!(!like_matches("version", "version_comment"));
    }

    #[test]
    fn template_split_respects_quotes() {
        let parts = split_query_template("SELECT ? FROM t WHERE a = '?' AND b = ?");
        assert_eq!(parts.len(), 3, "placeholder inside quotes is literal");
    }
}
