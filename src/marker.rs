//! Marker comment recognition and option parsing.
//!
//! A batch opens with a leading C-style comment carrying the
//! `magic_start` sentinel and a `;`-separated `--key=value` option
//! list, and closes with a `magic_commit` comment:
//!
//! ```text
//! /*--user=root;--password=x;--host=10.0.0.1;--port=3306;
//!   --enable-execute=1;magic_start;*/ CREATE TABLE ...;
//! /* magic_commit; */
//! ```

use crate::config::AuditConfig;
use crate::crypto;
use crate::error::GateError;
use crate::session::Mode;
use crate::sqltext;

pub const MAGIC_START: &str = "magic_start";
pub const MAGIC_COMMIT: &str = "magic_commit";

/// Options decoded from a magic_start comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mode: Mode,
    pub force: bool,
    pub backup: bool,
    pub ignore_warnings: bool,
    pub sleep_ms: u64,
    pub slave_hosts: Vec<(String, u16)>,
}

impl Default for StartOptions {
    fn default() -> Self {
        StartOptions {
            host: String::new(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            mode: Mode::Check,
            force: false,
            backup: true,
            ignore_warnings: false,
            sleep_ms: 0,
            slave_hosts: Vec::new(),
        }
    }
}

/// Does the query open a batch? Only the first comment counts.
pub fn is_magic_start(query: &str) -> bool {
    sqltext::first_comment_contains(query, MAGIC_START)
}

/// Does the query close a batch?
pub fn is_magic_commit(query: &str) -> bool {
    sqltext::first_comment_contains(query, MAGIC_COMMIT)
}

fn flag_on(val: &str) -> bool {
    val.starts_with('1')
}

fn parse_slave_hosts(val: &str) -> Vec<(String, u16)> {
    let mut out = Vec::new();
    for entry in val.split(',') {
        let entry = entry.trim();
        let Some(colon) = entry.rfind(':') else { continue };
        let host = &entry[..colon];
        let Ok(port) = entry[colon + 1..].parse::<u16>() else {
            continue;
        };
        if !host.is_empty() && port > 0 {
            out.push((host.to_string(), port));
        }
    }
    out
}

fn apply_option(opts: &mut StartOptions, key: &str, val: &str) {
    let key = key.to_ascii_lowercase();
    match key.as_str() {
        "host" => opts.host = val.to_string(),
        "user" => opts.user = val.to_string(),
        "password" => opts.password = val.to_string(),
        "port" => {
            if let Ok(p) = val.parse::<u16>() {
                opts.port = p;
            }
        }
        "enable-execute" => {
            if flag_on(val) {
                opts.mode = Mode::Execute;
            }
        }
        "enable-check" => {
            if flag_on(val) {
                opts.mode = Mode::Check;
            }
        }
        "enable-split" => {
            if flag_on(val) {
                opts.mode = Mode::Split;
            }
        }
        "enable-query-tree" => {
            if flag_on(val) {
                opts.mode = Mode::QueryTree;
            }
        }
        "enable-force" => opts.force = flag_on(val),
        "enable-remote-backup" => opts.backup = flag_on(val),
        "enable-ignore-warnings" => opts.ignore_warnings = flag_on(val),
        "sleep" => opts.sleep_ms = val.parse().unwrap_or(0),
        "slave-hosts" | "slave_hosts" => opts.slave_hosts = parse_slave_hosts(val),
        _ => {}
    }
}

/// Parse a magic_start comment into session options.
///
/// Unknown keys are ignored. Missing user/password fall back to the
/// configured defaults, and an `AES:`-wrapped password is unwrapped
/// with the configured key (left untouched on any failure).
pub fn parse_magic_start(query: &str, cfg: &AuditConfig) -> Result<StartOptions, GateError> {
    let comment = sqltext::leading_comment(query)
        .ok_or_else(|| GateError::Parse("magic_start marker comment not found".into()))?;
    let body = comment
        .trim_start_matches("/*")
        .trim_end_matches("*/");

    let mut opts = StartOptions::default();
    for raw_token in body.split(';') {
        let token = raw_token.trim();
        if token.is_empty() {
            continue;
        }
        let token = token.strip_prefix("--").unwrap_or(token);
        match token.find('=') {
            Some(eq) => apply_option(&mut opts, &token[..eq], token[eq + 1..].trim()),
            // The bare sentinel token itself; other bare tokens are
            // ignored.
            None => continue,
        }
    }

    if opts.user.is_empty() {
        opts.user = cfg.remote_user.clone();
    }
    if opts.password.is_empty() {
        opts.password = cfg.remote_password.clone();
    }
    if !opts.password.is_empty() {
        opts.password = crypto::decrypt_password(&opts.password, &cfg.password_encrypt_key);
    }
    if opts.port == 0 {
        return Err(GateError::Parse("magic_start: port must be non-zero".into()));
    }
    Ok(opts)
}
