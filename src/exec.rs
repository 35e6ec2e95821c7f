//! Remote execution engine: replays the audited batch against the
//! target, with read-only preflight, load/replication throttling,
//! warning capture, inter-statement sleep and kill checkpoints.

use crate::auditlog::{AuditLog, ClientInfo};
use crate::config::SharedConfig;
use crate::remote::{
    self, templates, ConnParams, EXEC_QUERY_TIMEOUT, REPLICA_QUERY_TIMEOUT,
};
use crate::session::{ErrLevel, SessionContext, Stage, StatementRecord};
use crate::sqltext;
use mysql_async::Conn;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

fn parse_onoff(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("on") || v.eq_ignore_ascii_case("true")
}

/// Collect remote warnings after a statement via SHOW WARNINGS.
async fn collect_remote_warnings(conn: &mut Conn, record: &mut StatementRecord) {
    let Ok(rows) = remote::query_rows(conn, templates::SHOW_WARNINGS, REPLICA_QUERY_TIMEOUT).await
    else {
        return;
    };
    for row in rows {
        let level: String = row.get::<Option<String>, usize>(0).flatten().unwrap_or_default();
        let code: String = row.get::<Option<String>, usize>(1).flatten().unwrap_or_default();
        let msg: String = row.get::<Option<String>, usize>(2).flatten().unwrap_or_default();
        if level.eq_ignore_ascii_case("error") {
            record.append_error(format!("Remote {level} (code {code}): {msg}"));
        } else {
            record.append_warning(format!("Remote {level} (code {code}): {msg}"));
        }
    }
}

/// Execute one statement; returns true on error (recorded in the
/// statement).
async fn execute_one(conn: &mut Conn, record: &mut StatementRecord) -> bool {
    let exec_sql = sqltext::strip_marker_comment(&record.sql_text).to_string();
    if exec_sql.is_empty() {
        record.stage = Stage::Executed;
        record.stage_status = "Execute completed".into();
        return false;
    }

    let start = Instant::now();
    if let Err(e) = remote::query_drop(conn, &exec_sql, EXEC_QUERY_TIMEOUT).await {
        record.append_error(format!("Execute failed: {e}"));
        record.stage = Stage::Executed;
        record.stage_status = "Execute failed".into();
        return true;
    }
    let elapsed = start.elapsed().as_secs_f64();

    let raw_rows = conn.affected_rows();
    record.affected_rows = if raw_rows == u64::MAX {
        0
    } else {
        raw_rows as i64
    };
    record.execute_time = format!("{elapsed:.3}");
    record.stage = Stage::Executed;
    record.stage_status = "Execute completed".into();

    collect_remote_warnings(conn, record).await;
    false
}

/// Block until the target load and replica lag fall under the
/// configured caps. Samples feed the session's published snapshot; the
/// kill flag is honored once per poll.
async fn wait_for_remote_ready(
    conn: &mut Conn,
    replicas: &mut [Conn],
    ctx: &SessionContext,
    cfg: &SharedConfig,
) {
    loop {
        let snapshot = cfg.snapshot();
        let mut need_wait = false;

        if snapshot.exec_max_threads_running > 0 {
            if let Ok(rows) =
                remote::query_rows(conn, templates::SHOW_THREADS_RUNNING, REPLICA_QUERY_TIMEOUT)
                    .await
            {
                if let Some(row) = rows.first() {
                    let running: u64 = row
                        .get::<Option<String>, usize>(1)
                        .flatten()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    ctx.control.threads_running.store(running, Ordering::Relaxed);
                    if running > snapshot.exec_max_threads_running {
                        tracing::info!(
                            threads_running = running,
                            cap = snapshot.exec_max_threads_running,
                            "waiting for remote load to drop"
                        );
                        need_wait = true;
                    }
                }
            }
        }

        if !need_wait && snapshot.exec_max_replication_delay > 0 {
            let mut max_delay: i64 = -1;
            for replica in replicas.iter_mut() {
                let Ok(rows) =
                    remote::query_rows(replica, templates::SHOW_SLAVE_STATUS, REPLICA_QUERY_TIMEOUT)
                        .await
                else {
                    continue;
                };
                let Some(row) = rows.first() else { continue };
                if row.columns_ref().len() <= 32 {
                    continue;
                }
                // Seconds_Behind_Master; NULL means replication is
                // stopped or broken.
                match row.get::<Option<u64>, usize>(32).flatten() {
                    Some(delay) => {
                        max_delay = max_delay.max(delay as i64);
                        if delay > snapshot.exec_max_replication_delay {
                            tracing::info!(delay, "waiting for replica to catch up");
                            need_wait = true;
                        }
                    }
                    None => {
                        tracing::info!("replica Seconds_Behind_Master is NULL, waiting");
                        need_wait = true;
                    }
                }
                if need_wait {
                    break;
                }
            }
            if max_delay >= 0 {
                ctx.control.repl_delay.store(max_delay, Ordering::Relaxed);
            }
        }

        if !need_wait || ctx.control.is_killed() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Read-only gate + throttle wait. Returns true when the batch must
/// stop (gate failed).
async fn pre_execute_checks(
    conn: &mut Conn,
    replicas: &mut [Conn],
    ctx: &SessionContext,
    cfg: &SharedConfig,
    record: &mut StatementRecord,
) -> bool {
    let snapshot = cfg.snapshot();

    if snapshot.exec_check_read_only {
        match remote::query_rows(conn, templates::SHOW_GLOBAL_READ_ONLY, REPLICA_QUERY_TIMEOUT)
            .await
        {
            Ok(rows) => {
                let read_only = rows
                    .first()
                    .and_then(|r| r.get::<Option<String>, usize>(0).flatten())
                    .map(|v| parse_onoff(&v))
                    .unwrap_or(false);
                if read_only {
                    record.append_error(
                        "Remote is read-only (read_only=ON), execution blocked by pre-check.",
                    );
                    record.stage = Stage::Checked;
                    record.stage_status = "Pre-check failed".into();
                    return true;
                }
            }
            Err(e) => {
                record.append_error(format!("Failed to query remote read_only status: {e}"));
                record.stage = Stage::Checked;
                record.stage_status = "Pre-check failed".into();
                return true;
            }
        }
    }

    if snapshot.exec_max_threads_running > 0
        || (!replicas.is_empty() && snapshot.exec_max_replication_delay > 0)
    {
        wait_for_remote_ready(conn, replicas, ctx, cfg).await;
    }
    false
}

/// Decide whether audit findings block the whole batch.
fn batch_blocked(statements: &[StatementRecord], force: bool, ignore_warnings: bool) -> bool {
    statements.iter().any(|s| {
        (s.errlevel >= ErrLevel::Error && !force)
            || (s.errlevel >= ErrLevel::Warning && !ignore_warnings)
    })
}

/// Replay the audited batch on the remote target. Returns true when
/// any statement failed or the batch was blocked.
pub async fn execute_statements(
    ctx: &mut SessionContext,
    cfg: &SharedConfig,
    audit_log: &AuditLog,
    client: &ClientInfo,
) -> bool {
    if ctx.statements.is_empty() {
        return false;
    }

    let control = ctx.control.clone();

    // Killed before anything started.
    if control.is_killed() {
        for record in &mut ctx.statements {
            record.stage = Stage::Executed;
            record.stage_status = "Killed by user".into();
        }
        return true;
    }

    let params = ConnParams {
        host: ctx.host.clone(),
        port: ctx.port,
        user: ctx.user.clone(),
        password: ctx.password.clone(),
    };

    let mut conn = match remote::connect_exec(&params).await {
        Ok(conn) => conn,
        Err(e) => {
            for record in &mut ctx.statements {
                record.append_error(&e);
                record.stage = Stage::Executed;
                record.stage_status = "Execute failed".into();
            }
            return true;
        }
    };

    control
        .remote_thread_id
        .store(conn.id() as u64, Ordering::SeqCst);

    // Audit findings gate the entire batch.
    if batch_blocked(&ctx.statements, ctx.force, ctx.ignore_warnings) {
        tracing::info!(
            statements = ctx.statements.len(),
            "audit findings detected, skipping entire batch"
        );
        control.remote_thread_id.store(0, Ordering::SeqCst);
        let _ = conn.disconnect().await;
        return true;
    }

    // Replica connections for replication-delay polling.
    let mut replicas: Vec<Conn> = Vec::new();
    if cfg.snapshot().exec_max_replication_delay > 0 {
        for (host, port) in &ctx.slave_hosts {
            let replica_params = ConnParams {
                host: host.clone(),
                port: *port,
                user: ctx.user.clone(),
                password: ctx.password.clone(),
            };
            match remote::connect_replica(&replica_params).await {
                Ok(c) => replicas.push(c),
                Err(e) => tracing::warn!(host = %host, port, error = %e, "replica connect failed"),
            }
        }
    }

    let mut statements = std::mem::take(&mut ctx.statements);
    let total = statements.len();
    let mut has_error = false;
    let mut stop_exec = false;

    for (idx, record) in statements.iter_mut().enumerate() {
        if control.is_killed() {
            record.stage = Stage::Skipped;
            record.stage_status = "Killed by user".into();
            tracing::info!(n = idx + 1, total, "statement killed by user");
            continue;
        }

        if stop_exec {
            record.stage = Stage::Skipped;
            record.stage_status = "Skipped due to prior error".into();
            record.append_error("Skipped: previous statement had errors.");
            continue;
        }

        if pre_execute_checks(&mut conn, &mut replicas, ctx, cfg, record).await {
            has_error = true;
            stop_exec = true;
            tracing::warn!(n = idx + 1, total, "pre-execute check failed");
            continue;
        }

        tracing::info!(n = idx + 1, total, sql = %record.sql_text.chars().take(200).collect::<String>(), "executing");

        if execute_one(&mut conn, record).await {
            has_error = true;
            tracing::warn!(n = idx + 1, total, error = %record.errmsg, "execute failed");
            if !ctx.force {
                stop_exec = true;
            } else {
                // The connection may have dropped mid-statement; the
                // driver does not reconnect on its own, and force mode
                // keeps going. Reopen before the next statement.
                if remote::query_drop(&mut conn, "SELECT 1", REPLICA_QUERY_TIMEOUT)
                    .await
                    .is_err()
                {
                    match remote::connect_exec(&params).await {
                        Ok(new_conn) => {
                            conn = new_conn;
                            control
                                .remote_thread_id
                                .store(conn.id() as u64, Ordering::SeqCst);
                            tracing::info!("remote connection reopened");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "remote reconnect failed");
                            stop_exec = true;
                        }
                    }
                }
            }
        } else {
            control.executed_sql.fetch_add(1, Ordering::Relaxed);
        }

        audit_log.log_statement(&cfg.snapshot().audit_log, client, ctx, record);

        if record.stage == Stage::Executed {
            record.sequence = format!(
                "'{}_{}_{}'",
                chrono::Utc::now().timestamp(),
                control.conn_id,
                record.id
            );
        }

        // Re-read each pass so `inception set sleep` applies mid-batch.
        let sleep_ms = control.sleep_ms.load(Ordering::Relaxed);
        if sleep_ms > 0 && !stop_exec {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }

    ctx.statements = statements;

    for replica in replicas {
        let _ = replica.disconnect().await;
    }
    control.remote_thread_id.store(0, Ordering::SeqCst);
    let _ = conn.disconnect().await;

    has_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SqlKind;
    use crate::session::SessionControl;

    fn record(id: u32, errlevel: ErrLevel) -> StatementRecord {
        let mut r = StatementRecord::new(id, format!("SELECT {id}"), SqlKind::Select);
        r.errlevel = errlevel;
        r
    }

    #[test]
    fn gating_matrix() {
        let ok = vec![record(1, ErrLevel::Ok)];
        assert!(!batch_blocked(&ok, false, false));

        let warn = vec![record(1, ErrLevel::Ok), record(2, ErrLevel::Warning)];
        assert!(batch_blocked(&warn, false, false));
        assert!(!batch_blocked(&warn, false, true));

        let err = vec![record(1, ErrLevel::Error)];
        assert!(batch_blocked(&err, false, true), "force gates errors, not ignore_warnings");
        assert!(batch_blocked(&err, true, false), "errors pass but warnings still gate");
        assert!(!batch_blocked(&err, true, true));
    }

    #[tokio::test]
    async fn killed_batch_never_connects() {
        let ctl = SessionControl::new(9);
        let mut ctx = SessionContext::new(ctl.clone());
        ctx.push_statement(record(1, ErrLevel::Ok));
        ctx.push_statement(record(2, ErrLevel::Ok));
        ctl.killed.store(true, std::sync::atomic::Ordering::SeqCst);

        let cfg = SharedConfig::new(Default::default());
        let log = AuditLog::new();
        let client = ClientInfo::default();
        let has_error = execute_statements(&mut ctx, &cfg, &log, &client).await;

        assert!(has_error);
        for s in &ctx.statements {
            assert_eq!(s.stage, Stage::Executed);
            assert_eq!(s.stage_status, "Killed by user");
        }
    }

    #[test]
    fn onoff_parsing() {
        assert!(parse_onoff("1"));
        assert!(parse_onoff("ON"));
        assert!(!parse_onoff("0"));
        assert!(!parse_onoff("OFF"));
    }
}
