//! Append-only JSON-lines audit log.
//!
//! One `session` line per finished batch, one `statement` line per
//! remotely executed statement. The file follows the configured path
//! lazily: a path change closes the old handle and opens the new one
//! on the next write.

use crate::session::{ErrLevel, Mode, SessionContext, StatementRecord};
use chrono::Local;
use parking_lot::Mutex;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;

const MAX_LOGGED_SQL: usize = 4096;

/// Client identity attached to every line.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user: String,
    pub host: String,
}

#[derive(Default)]
struct LogFile {
    path: String,
    file: Option<File>,
}

/// The process-wide writer. The mutex spans a single formatted write.
#[derive(Default)]
pub struct AuditLog {
    inner: Mutex<LogFile>,
}

fn truncate_sql(sql: &str) -> String {
    if sql.chars().count() <= MAX_LOGGED_SQL {
        return sql.to_string();
    }
    let mut out: String = sql.chars().take(MAX_LOGGED_SQL).collect();
    out.push_str("...");
    out
}

fn now_iso8601() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl AuditLog {
    pub fn new() -> Self {
        AuditLog::default()
    }

    /// Write one line, (re)opening the sink as needed. Empty path
    /// disables logging. Failures are reported once per reopen via
    /// tracing, never to the client.
    fn write_line(&self, path: &str, line: &str) {
        let mut lf = self.inner.lock();
        if path.is_empty() {
            lf.file = None;
            lf.path.clear();
            return;
        }
        if lf.path != path {
            lf.file = None;
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => {
                    lf.file = Some(f);
                    lf.path = path.to_string();
                }
                Err(e) => {
                    lf.path.clear();
                    tracing::warn!(path, error = %e, "cannot open audit log");
                    return;
                }
            }
        }
        if let Some(f) = lf.file.as_mut() {
            let _ = writeln!(f, "{line}");
            let _ = f.flush();
        }
    }

    /// Session summary line, written at magic_commit.
    pub fn log_session(
        &self,
        path: &str,
        client: &ClientInfo,
        ctx: &SessionContext,
        statements: usize,
        errors: usize,
        duration_ms: u64,
    ) {
        let target = format!(
            "{}:{}",
            if ctx.host.is_empty() { "127.0.0.1" } else { &ctx.host },
            ctx.port
        );
        let line = json!({
            "time": now_iso8601(),
            "type": "session",
            "user": client.user,
            "client_host": client.host,
            "target": target,
            "target_user": ctx.user,
            "mode": ctx.mode.name(),
            "statements": statements,
            "errors": errors,
            "duration_ms": duration_ms,
        });
        self.write_line(path, &line.to_string());
    }

    /// Per-statement line, written during execute mode only.
    pub fn log_statement(
        &self,
        path: &str,
        client: &ClientInfo,
        ctx: &SessionContext,
        record: &StatementRecord,
    ) {
        if ctx.mode != Mode::Execute {
            return;
        }
        let target = format!(
            "{}:{}",
            if ctx.host.is_empty() { "127.0.0.1" } else { &ctx.host },
            ctx.port
        );
        let result = if record.errlevel >= ErrLevel::Error {
            "ERROR"
        } else {
            "OK"
        };
        let line = json!({
            "time": now_iso8601(),
            "type": "statement",
            "user": client.user,
            "client_host": client.host,
            "target": target,
            "id": record.id,
            "sql": truncate_sql(&record.sql_text),
            "result": result,
            "affected_rows": record.affected_rows,
            "execute_time": record.execute_time,
        });
        self.write_line(path, &line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SqlKind;
    use crate::session::{SessionControl, SessionContext};
    use std::io::Read;

    fn read_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
        let mut buf = String::new();
        File::open(path).unwrap().read_to_string(&mut buf).unwrap();
        buf.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[test]
    fn session_line_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new();

        let ctl = SessionControl::new(1);
        let mut ctx = SessionContext::new(ctl);
        ctx.host = "10.1.1.1".into();
        ctx.port = 3306;
        ctx.user = "root".into();

        let client = ClientInfo {
            user: "dba".into(),
            host: "192.168.0.7".into(),
        };
        log.log_session(path.to_str().unwrap(), &client, &ctx, 0, 0, 12);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "session");
        assert_eq!(lines[0]["target"], "10.1.1.1:3306");
        assert_eq!(lines[0]["statements"], 0);
        assert_eq!(lines[0]["errors"], 0);
    }

    #[test]
    fn statement_lines_only_in_execute_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new();
        let client = ClientInfo::default();

        let ctl = SessionControl::new(1);
        let mut ctx = SessionContext::new(ctl);
        let rec = StatementRecord::new(1, "SELECT 1".into(), SqlKind::Select);

        log.log_statement(path.to_str().unwrap(), &client, &ctx, &rec);
        assert!(!path.exists(), "check mode writes nothing");

        ctx.mode = Mode::Execute;
        log.log_statement(path.to_str().unwrap(), &client, &ctx, &rec);
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "statement");
        assert_eq!(lines[0]["result"], "OK");
    }

    #[test]
    fn sql_is_escaped_and_truncated() {
        let long = format!("SELECT '{}\n\"quoted\"'", "x".repeat(5000));
        let t = truncate_sql(&long);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), MAX_LOGGED_SQL + 3);
        // serde_json handles the escaping on write.
        let v = json!({ "sql": t });
        let s = v.to_string();
        assert!(s.contains("\\n") || !t.contains('\n'));
    }

    #[test]
    fn reopens_on_path_change() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.log");
        let p2 = dir.path().join("b.log");
        let log = AuditLog::new();
        let client = ClientInfo::default();
        let ctl = SessionControl::new(1);
        let ctx = SessionContext::new(ctl);

        log.log_session(p1.to_str().unwrap(), &client, &ctx, 1, 0, 1);
        log.log_session(p2.to_str().unwrap(), &client, &ctx, 2, 0, 1);
        log.log_session(p1.to_str().unwrap(), &client, &ctx, 3, 0, 1);

        assert_eq!(read_lines(&p1).len(), 2);
        assert_eq!(read_lines(&p2).len(), 1);
    }
}
