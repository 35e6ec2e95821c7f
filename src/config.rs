//! Audit rule knobs and runtime limits.
//!
//! Every rule in the audit engine is gated by a severity knob
//! (OFF / WARNING / ERROR). Knobs are process-wide and mutable at
//! runtime through `SET GLOBAL <name> = <value>` issued outside a
//! marker bracket; the engine reads them fresh for every statement.

use crate::error::GateError;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Severity of a single audit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RuleLevel {
    Off = 0,
    Warning = 1,
    Error = 2,
}

impl RuleLevel {
    pub fn is_on(self) -> bool {
        self != RuleLevel::Off
    }

    pub fn parse(v: &str) -> Result<Self, GateError> {
        match v.trim().trim_matches('\'').trim_matches('"') {
            "0" => Ok(RuleLevel::Off),
            "1" => Ok(RuleLevel::Warning),
            "2" => Ok(RuleLevel::Error),
            s if s.eq_ignore_ascii_case("off") => Ok(RuleLevel::Off),
            s if s.eq_ignore_ascii_case("warning") => Ok(RuleLevel::Warning),
            s if s.eq_ignore_ascii_case("error") => Ok(RuleLevel::Error),
            s => Err(GateError::Invalid(format!("bad rule level: {s}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RuleLevel::Off => "OFF",
            RuleLevel::Warning => "WARNING",
            RuleLevel::Error => "ERROR",
        }
    }
}

use RuleLevel::{Error as E, Off as O, Warning as W};

/// The full knob set. Field names double as the `SET GLOBAL` names
/// with an `audit_` prefix (e.g. `audit_check_primary_key`).
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /* ---- rule severities ---- */
    pub check_primary_key: RuleLevel,
    pub check_table_comment: RuleLevel,
    pub check_column_comment: RuleLevel,
    pub check_engine_innodb: RuleLevel,
    pub check_dml_where: RuleLevel,
    pub check_dml_limit: RuleLevel,
    pub check_insert_column: RuleLevel,
    pub check_select_star: RuleLevel,
    pub check_nullable: RuleLevel,
    pub check_foreign_key: RuleLevel,
    pub check_blob_type: RuleLevel,
    pub check_index_prefix: RuleLevel,
    pub check_enum_type: RuleLevel,
    pub check_set_type: RuleLevel,
    pub check_bit_type: RuleLevel,
    pub check_json_type: RuleLevel,
    pub check_json_blob_text_default: RuleLevel,
    pub check_create_select: RuleLevel,
    pub check_identifier: RuleLevel,
    pub check_identifier_keyword: RuleLevel,
    pub check_not_null_default: RuleLevel,
    pub check_column_default_value: RuleLevel,
    pub check_duplicate_index: RuleLevel,
    pub check_drop_database: RuleLevel,
    pub check_drop_table: RuleLevel,
    pub check_truncate_table: RuleLevel,
    pub check_delete: RuleLevel,
    pub check_autoincrement: RuleLevel,
    pub check_autoincrement_init_value: RuleLevel,
    pub check_autoincrement_name: RuleLevel,
    pub check_partition: RuleLevel,
    pub check_orderby_in_dml: RuleLevel,
    pub check_orderby_rand: RuleLevel,
    pub check_timestamp_default: RuleLevel,
    pub check_column_charset: RuleLevel,
    pub check_merge_alter_table: RuleLevel,
    pub check_varchar_shrink: RuleLevel,
    pub check_lossy_type_change: RuleLevel,
    pub check_decimal_change: RuleLevel,
    pub check_index_length: RuleLevel,
    pub check_insert_values_match: RuleLevel,
    pub check_insert_duplicate_column: RuleLevel,
    pub check_column_exists: RuleLevel,
    pub check_must_have_columns: RuleLevel,

    /* ---- TiDB-only rules (applied when the remote is TiDB) ---- */
    pub check_tidb_merge_alter: RuleLevel,
    pub check_tidb_varchar_shrink: RuleLevel,
    pub check_tidb_decimal_change: RuleLevel,
    pub check_tidb_lossy_type_change: RuleLevel,
    pub check_tidb_foreign_key: RuleLevel,

    /* ---- numeric limits (0 = unlimited where noted) ---- */
    pub max_indexes: u64,
    pub max_index_parts: u64,
    pub max_primary_key_parts: u64,
    pub max_update_rows: u64,
    pub max_char_length: u64,
    pub max_table_name_length: u64,
    pub max_column_name_length: u64,
    pub max_columns: u64,
    pub index_column_max_bytes: u64,
    pub index_total_max_bytes: u64,
    pub in_count: u64,

    /* ---- execution throttle ---- */
    pub exec_max_threads_running: u64,
    pub exec_max_replication_delay: u64,
    pub exec_check_read_only: bool,

    /* ---- string knobs ---- */
    /// Comma-separated charset whitelist; empty = no check.
    pub support_charset: String,
    /// `name TYPE [UNSIGNED] [NOT NULL] [AUTO_INCREMENT] [COMMENT]; ...`
    pub must_have_columns: String,
    /// Audit log path; empty = disabled.
    pub audit_log: String,
    /// Default remote credentials when the marker omits them.
    pub remote_user: String,
    pub remote_password: String,
    /// AES key for `AES:` password wrapping.
    pub password_encrypt_key: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            check_primary_key: E,
            check_table_comment: E,
            check_column_comment: E,
            check_engine_innodb: E,
            check_dml_where: E,
            check_dml_limit: O,
            check_insert_column: E,
            check_select_star: O,
            check_nullable: W,
            check_foreign_key: O,
            check_blob_type: O,
            check_index_prefix: W,
            check_enum_type: O,
            check_set_type: O,
            check_bit_type: O,
            check_json_type: O,
            check_json_blob_text_default: E,
            check_create_select: O,
            check_identifier: O,
            check_identifier_keyword: O,
            check_not_null_default: O,
            check_column_default_value: O,
            check_duplicate_index: W,
            check_drop_database: E,
            check_drop_table: W,
            check_truncate_table: W,
            check_delete: O,
            check_autoincrement: W,
            check_autoincrement_init_value: W,
            check_autoincrement_name: O,
            check_partition: W,
            check_orderby_in_dml: W,
            check_orderby_rand: W,
            check_timestamp_default: W,
            check_column_charset: O,
            check_merge_alter_table: W,
            check_varchar_shrink: W,
            check_lossy_type_change: W,
            check_decimal_change: O,
            check_index_length: W,
            check_insert_values_match: E,
            check_insert_duplicate_column: E,
            check_column_exists: E,
            check_must_have_columns: E,

            check_tidb_merge_alter: E,
            check_tidb_varchar_shrink: E,
            check_tidb_decimal_change: E,
            check_tidb_lossy_type_change: E,
            check_tidb_foreign_key: E,

            max_indexes: 16,
            max_index_parts: 5,
            max_primary_key_parts: 5,
            max_update_rows: 10000,
            max_char_length: 64,
            max_table_name_length: 64,
            max_column_name_length: 64,
            max_columns: 0,
            index_column_max_bytes: 767,
            index_total_max_bytes: 3072,
            in_count: 0,

            exec_max_threads_running: 0,
            exec_max_replication_delay: 0,
            exec_check_read_only: true,

            support_charset: String::new(),
            must_have_columns: String::new(),
            audit_log: String::new(),
            remote_user: String::new(),
            remote_password: String::new(),
            password_encrypt_key: String::new(),
        }
    }
}

impl AuditConfig {
    /// Is `cs` in the charset whitelist? Trivially true when the
    /// whitelist is empty.
    pub fn charset_allowed(&self, cs: &str) -> bool {
        if self.support_charset.is_empty() {
            return true;
        }
        self.support_charset
            .split(',')
            .any(|c| c.trim().eq_ignore_ascii_case(cs))
    }
}

/// Shared, runtime-mutable view of the knob set.
#[derive(Clone)]
pub struct SharedConfig(Arc<RwLock<AuditConfig>>);

impl SharedConfig {
    pub fn new(cfg: AuditConfig) -> Self {
        SharedConfig(Arc::new(RwLock::new(cfg)))
    }

    /// Snapshot for one statement's worth of checks.
    pub fn snapshot(&self) -> AuditConfig {
        self.0.read().clone()
    }

    pub fn update<F: FnOnce(&mut AuditConfig)>(&self, f: F) {
        f(&mut self.0.write());
    }

    /// Apply `SET GLOBAL <name> = <value>`. Names use the `audit_`
    /// prefix; the prefix itself is also accepted bare for the string
    /// and exec knobs (e.g. `audit_log`).
    pub fn set_global(&self, name: &str, value: &str) -> Result<(), GateError> {
        let key = name.trim().to_ascii_lowercase();
        let key = key.strip_prefix("audit_").unwrap_or(&key);
        let val = value.trim().trim_matches('\'').trim_matches('"').to_string();

        let parse_num = |v: &str| -> Result<u64, GateError> {
            v.parse::<u64>()
                .map_err(|_| GateError::Invalid(format!("bad numeric value: {v}")))
        };
        let parse_bool = |v: &str| -> Result<bool, GateError> {
            match v {
                "1" => Ok(true),
                "0" => Ok(false),
                s if s.eq_ignore_ascii_case("on") || s.eq_ignore_ascii_case("true") => Ok(true),
                s if s.eq_ignore_ascii_case("off") || s.eq_ignore_ascii_case("false") => Ok(false),
                s => Err(GateError::Invalid(format!("bad boolean value: {s}"))),
            }
        };

        let mut cfg = self.0.write();
        macro_rules! level {
            ($field:ident) => {{
                cfg.$field = RuleLevel::parse(&val)?;
                Ok(())
            }};
        }
        macro_rules! num {
            ($field:ident) => {{
                cfg.$field = parse_num(&val)?;
                Ok(())
            }};
        }
        macro_rules! text {
            ($field:ident) => {{
                cfg.$field = val;
                Ok(())
            }};
        }

        match key {
            "check_primary_key" => level!(check_primary_key),
            "check_table_comment" => level!(check_table_comment),
            "check_column_comment" => level!(check_column_comment),
            "check_engine_innodb" => level!(check_engine_innodb),
            "check_dml_where" => level!(check_dml_where),
            "check_dml_limit" => level!(check_dml_limit),
            "check_insert_column" => level!(check_insert_column),
            "check_select_star" => level!(check_select_star),
            "check_nullable" => level!(check_nullable),
            "check_foreign_key" => level!(check_foreign_key),
            "check_blob_type" => level!(check_blob_type),
            "check_index_prefix" => level!(check_index_prefix),
            "check_enum_type" => level!(check_enum_type),
            "check_set_type" => level!(check_set_type),
            "check_bit_type" => level!(check_bit_type),
            "check_json_type" => level!(check_json_type),
            "check_json_blob_text_default" => level!(check_json_blob_text_default),
            "check_create_select" => level!(check_create_select),
            "check_identifier" => level!(check_identifier),
            "check_identifier_keyword" => level!(check_identifier_keyword),
            "check_not_null_default" => level!(check_not_null_default),
            "check_column_default_value" => level!(check_column_default_value),
            "check_duplicate_index" => level!(check_duplicate_index),
            "check_drop_database" => level!(check_drop_database),
            "check_drop_table" => level!(check_drop_table),
            "check_truncate_table" => level!(check_truncate_table),
            "check_delete" => level!(check_delete),
            "check_autoincrement" => level!(check_autoincrement),
            "check_autoincrement_init_value" => level!(check_autoincrement_init_value),
            "check_autoincrement_name" => level!(check_autoincrement_name),
            "check_partition" => level!(check_partition),
            "check_orderby_in_dml" => level!(check_orderby_in_dml),
            "check_orderby_rand" => level!(check_orderby_rand),
            "check_timestamp_default" => level!(check_timestamp_default),
            "check_column_charset" => level!(check_column_charset),
            "check_merge_alter_table" => level!(check_merge_alter_table),
            "check_varchar_shrink" => level!(check_varchar_shrink),
            "check_lossy_type_change" => level!(check_lossy_type_change),
            "check_decimal_change" => level!(check_decimal_change),
            "check_index_length" => level!(check_index_length),
            "check_insert_values_match" => level!(check_insert_values_match),
            "check_insert_duplicate_column" => level!(check_insert_duplicate_column),
            "check_column_exists" => level!(check_column_exists),
            "check_must_have_columns" => level!(check_must_have_columns),
            "check_tidb_merge_alter" => level!(check_tidb_merge_alter),
            "check_tidb_varchar_shrink" => level!(check_tidb_varchar_shrink),
            "check_tidb_decimal_change" => level!(check_tidb_decimal_change),
            "check_tidb_lossy_type_change" => level!(check_tidb_lossy_type_change),
            "check_tidb_foreign_key" => level!(check_tidb_foreign_key),

            "max_indexes" => num!(max_indexes),
            "max_index_parts" => num!(max_index_parts),
            "max_primary_key_parts" => num!(max_primary_key_parts),
            "max_update_rows" => num!(max_update_rows),
            "max_char_length" => num!(max_char_length),
            "max_table_name_length" => num!(max_table_name_length),
            "max_column_name_length" => num!(max_column_name_length),
            "max_columns" => num!(max_columns),
            "index_column_max_bytes" => num!(index_column_max_bytes),
            "index_total_max_bytes" => num!(index_total_max_bytes),
            "in_count" => num!(in_count),
            "exec_max_threads_running" => num!(exec_max_threads_running),
            "exec_max_replication_delay" => num!(exec_max_replication_delay),

            "exec_check_read_only" => {
                cfg.exec_check_read_only = parse_bool(&val)?;
                Ok(())
            }

            "support_charset" => text!(support_charset),
            "must_have_columns" => text!(must_have_columns),
            "log" | "audit_log" => text!(audit_log),
            "remote_user" => text!(remote_user),
            "remote_password" => text!(remote_password),
            "password_encrypt_key" => text!(password_encrypt_key),

            other => Err(GateError::UnknownSystemVariable(other.to_string())),
        }
    }
}
