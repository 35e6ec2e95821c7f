mod ast;
mod audit;
mod auditlog;
mod auth;
mod backend;
mod backup;
mod command;
mod config;
mod crypto;
mod error;
mod exec;
mod fingerprint;
mod marker;
mod remote;
mod result;
mod session;
mod split;
mod sqltext;
mod tree;

use crate::auditlog::AuditLog;
use crate::backend::Backend;
use crate::config::{AuditConfig, SharedConfig};
use crate::session::SessionRegistry;
use opensrv_mysql::{AsyncMysqlIntermediary, IntermediaryOptions};
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

struct Args {
    listen: String,
    auth_password: String,
    cfg: AuditConfig,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        listen: "0.0.0.0:4000".to_string(),
        auth_password: String::new(),
        cfg: AuditConfig::default(),
    };

    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        let mut value = |name: &str| {
            it.next()
                .ok_or_else(|| format!("missing value for {name}"))
        };
        match flag.as_str() {
            "--listen" => args.listen = value("--listen")?,
            "--auth-password" => args.auth_password = value("--auth-password")?,
            "--audit-log" => args.cfg.audit_log = value("--audit-log")?,
            "--remote-user" => args.cfg.remote_user = value("--remote-user")?,
            "--remote-password" => args.cfg.remote_password = value("--remote-password")?,
            "--encrypt-key" => args.cfg.password_encrypt_key = value("--encrypt-key")?,
            other => return Err(format!("unknown flag: {other}")),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("sqlwarden: {e}");
            std::process::exit(2);
        }
    };

    let cfg = SharedConfig::new(args.cfg);
    let registry = SessionRegistry::new();
    let audit_log = Arc::new(AuditLog::new());

    let listener = TcpListener::bind(&args.listen).await?;
    let local_addr = listener.local_addr()?;
    let conn_id = Arc::new(AtomicU32::new(1));
    // Parsed by wrappers; keep the format stable.
    eprintln!("sqlwarden listening on {local_addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        let id = conn_id.fetch_add(1, Ordering::Relaxed);
        let backend = Backend::new(
            registry.clone(),
            cfg.clone(),
            audit_log.clone(),
            args.auth_password.clone(),
            id,
            peer.to_string(),
        );
        info!(conn = id, peer = %peer, "client connected");
        tokio::spawn(async move {
            let (r, w) = tokio::io::split(stream);
            let opts = IntermediaryOptions {
                process_use_statement_on_query: false,
                reject_connection_on_dbname_absence: false,
            };
            if let Err(e) = AsyncMysqlIntermediary::run_with_options(backend, r, w, &opts).await {
                info!(conn = id, error = %e, "connection closed with error");
            }
        });
    }
}
