//! Side-channel admin commands: `inception <verb> <args>`. These run
//! outside the marker bracket and operate on other sessions through
//! the registry.

use crate::config::SharedConfig;
use crate::crypto;
use crate::remote::{self, ConnParams};
use crate::result::{self, ResultSet};
use crate::session::SessionRegistry;

/// Outcome of an admin command.
#[derive(Debug)]
pub enum AdminOutcome {
    Ok,
    Rows(ResultSet),
    Error(String),
}

fn strip_outer_quotes(s: &str) -> &str {
    let t = s.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        if (bytes[0] == b'\'' && bytes[t.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[t.len() - 1] == b'"')
        {
            return &t[1..t.len() - 1];
        }
    }
    t
}

/// Handle an `inception ...` command; `None` when the query is not
/// one.
pub async fn handle_admin_command(
    query: &str,
    registry: &SessionRegistry,
    cfg: &SharedConfig,
) -> Option<AdminOutcome> {
    let trimmed = query.trim().trim_end_matches(';').trim_end();
    let lowered = trimmed.to_ascii_lowercase();
    let rest = lowered.strip_prefix("inception")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    // tokens[0] == "inception"
    let verb = tokens.get(1).map(|t| t.to_ascii_lowercase());

    match verb.as_deref() {
        Some("show") => match tokens.get(2).map(|t| t.to_ascii_lowercase()).as_deref() {
            Some("sessions") => Some(AdminOutcome::Rows(result::sessions_result(
                &registry.snapshot(),
            ))),
            _ => Some(AdminOutcome::Error(
                "Unknown inception show command. Supported: sessions".into(),
            )),
        },

        Some("set") => match tokens.get(2).map(|t| t.to_ascii_lowercase()).as_deref() {
            Some("sleep") => {
                let usage = "Usage: inception set sleep <thread_id> <milliseconds>";
                let (Some(tid), Some(ms)) = (
                    tokens.get(3).and_then(|t| t.parse::<u32>().ok()),
                    tokens.get(4).and_then(|t| t.parse::<u64>().ok()),
                ) else {
                    return Some(AdminOutcome::Error(usage.into()));
                };
                if registry.set_sleep(tid, ms) {
                    Some(AdminOutcome::Ok)
                } else {
                    Some(AdminOutcome::Error(format!(
                        "Thread {tid} not found or not in active audit session."
                    )))
                }
            }
            _ => Some(AdminOutcome::Error(
                "Unknown inception set command. Supported: sleep".into(),
            )),
        },

        Some("get") => match tokens.get(2).map(|t| t.to_ascii_lowercase()).as_deref() {
            Some("sqltypes") => Some(AdminOutcome::Rows(result::sqltypes_result())),
            Some("encrypt_password") => {
                // Re-split on the original text so quoted payloads keep
                // their spacing.
                let arg_start = trimmed.to_ascii_lowercase().find("encrypt_password")? + 16;
                let plain = strip_outer_quotes(&trimmed[arg_start..]);
                if plain.is_empty() {
                    return Some(AdminOutcome::Error(
                        "Usage: inception get encrypt_password '<plain_text>'".into(),
                    ));
                }
                let key = cfg.snapshot().password_encrypt_key;
                match crypto::encrypt_password(plain, &key) {
                    Ok(wrapped) => {
                        Some(AdminOutcome::Rows(result::encrypt_password_result(wrapped)))
                    }
                    Err(e) => Some(AdminOutcome::Error(e.to_string())),
                }
            }
            _ => Some(AdminOutcome::Error(
                "Unknown inception get command. Supported: sqltypes, encrypt_password".into(),
            )),
        },

        Some("kill") => {
            let usage = "Usage: inception kill <thread_id> [force]";
            let Some(tid) = tokens.get(2).and_then(|t| t.parse::<u32>().ok()) else {
                return Some(AdminOutcome::Error(usage.into()));
            };
            let force = tokens
                .get(3)
                .map(|t| t.eq_ignore_ascii_case("force"))
                .unwrap_or(false);

            match registry.kill(tid, force) {
                None => Some(AdminOutcome::Error(format!(
                    "Thread {tid} not found or not in active audit session."
                ))),
                Some(None) => Some(AdminOutcome::Ok),
                Some(Some(target)) => {
                    // Force: abort the in-flight statement on the
                    // remote with the session's own credentials.
                    if target.remote_thread_id > 0 && !target.host.is_empty() {
                        let params = ConnParams {
                            host: target.host.clone(),
                            port: target.port,
                            user: target.user.clone(),
                            password: target.password.clone(),
                        };
                        match remote::kill_remote_thread(&params, target.remote_thread_id).await {
                            Ok(()) => tracing::info!(
                                remote_thread = target.remote_thread_id,
                                host = %target.host,
                                "force killed remote thread"
                            ),
                            Err(e) => tracing::warn!(
                                remote_thread = target.remote_thread_id,
                                error = %e,
                                "remote kill failed"
                            ),
                        }
                    }
                    Some(AdminOutcome::Ok)
                }
            }
        }

        _ => Some(AdminOutcome::Error(
            "Unknown inception command. Supported: show, set, get, kill".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::result::Cell;
    use crate::session::SessionControl;
    use std::sync::atomic::Ordering;

    fn setup() -> (std::sync::Arc<SessionRegistry>, SharedConfig) {
        (SessionRegistry::new(), SharedConfig::new(AuditConfig::default()))
    }

    #[tokio::test]
    async fn non_admin_queries_pass_through() {
        let (reg, cfg) = setup();
        assert!(handle_admin_command("SELECT 1", &reg, &cfg).await.is_none());
        assert!(handle_admin_command("inceptionish", &reg, &cfg).await.is_none());
    }

    #[tokio::test]
    async fn show_sessions_lists_active_only() {
        let (reg, cfg) = setup();
        let ctl = SessionControl::new(5);
        reg.register(ctl.clone());

        let out = handle_admin_command("inception show sessions", &reg, &cfg)
            .await
            .unwrap();
        let AdminOutcome::Rows(rs) = out else { panic!("rows expected") };
        assert_eq!(rs.rows.len(), 0, "inactive session hidden");

        ctl.active.store(true, Ordering::SeqCst);
        let out = handle_admin_command("INCEPTION SHOW SESSIONS;", &reg, &cfg)
            .await
            .unwrap();
        let AdminOutcome::Rows(rs) = out else { panic!("rows expected") };
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.columns.len(), 12);
    }

    #[tokio::test]
    async fn set_sleep_updates_target_session() {
        let (reg, cfg) = setup();
        let ctl = SessionControl::new(7);
        ctl.active.store(true, Ordering::SeqCst);
        reg.register(ctl.clone());

        let out = handle_admin_command("inception set sleep 7 150", &reg, &cfg)
            .await
            .unwrap();
        assert!(matches!(out, AdminOutcome::Ok));
        assert_eq!(ctl.sleep_ms.load(Ordering::Relaxed), 150);

        let out = handle_admin_command("inception set sleep 99 150", &reg, &cfg)
            .await
            .unwrap();
        assert!(matches!(out, AdminOutcome::Error(_)));
    }

    #[tokio::test]
    async fn kill_sets_flag() {
        let (reg, cfg) = setup();
        let ctl = SessionControl::new(3);
        ctl.active.store(true, Ordering::SeqCst);
        reg.register(ctl.clone());

        let out = handle_admin_command("inception kill 3", &reg, &cfg).await.unwrap();
        assert!(matches!(out, AdminOutcome::Ok));
        assert!(ctl.is_killed());
    }

    #[tokio::test]
    async fn encrypt_password_round_trips() {
        let (reg, cfg) = setup();
        cfg.set_global("audit_password_encrypt_key", "k1").unwrap();

        let out = handle_admin_command("inception get encrypt_password 'pw'", &reg, &cfg)
            .await
            .unwrap();
        let AdminOutcome::Rows(rs) = out else { panic!("rows expected") };
        let Cell::Text(wrapped) = &rs.rows[0][0] else { panic!("text expected") };
        assert!(wrapped.starts_with("AES:"));
        assert_eq!(crate::crypto::decrypt_password(wrapped, "k1"), "pw");
    }

    #[tokio::test]
    async fn encrypt_password_requires_key() {
        let (reg, cfg) = setup();
        let out = handle_admin_command("inception get encrypt_password 'pw'", &reg, &cfg)
            .await
            .unwrap();
        assert!(matches!(out, AdminOutcome::Error(_)));
    }

    #[tokio::test]
    async fn sqltypes_catalogue() {
        let (reg, cfg) = setup();
        let out = handle_admin_command("inception get sqltypes", &reg, &cfg)
            .await
            .unwrap();
        let AdminOutcome::Rows(rs) = out else { panic!("rows expected") };
        assert_eq!(rs.columns.len(), 3);
        assert!(rs.rows.len() > 30);
    }
}
