//! The audit rule engine.
//!
//! Dispatches on the resolved statement kind, annotates the statement
//! record with findings, and maintains the batch-level virtual schema
//! so later statements in the same batch resolve against tables the
//! batch itself created.

use crate::ast::{self, AlterOp, ColumnSpec, IndexKind, IndexSpec, TypeClass};
use crate::config::AuditConfig;
use crate::fingerprint;
use crate::remote::{RemoteColumnInfo, SchemaProber};
use crate::session::{batch_key, DbType, SessionContext, Stage, StatementRecord};
use regex::Regex;
use sqlparser::ast::{self as past, Statement};
use sqlparser::keywords::ALL_KEYWORDS;
use std::collections::HashSet;
use std::sync::OnceLock;

/* ================================================================
 *  Entry point
 * ================================================================ */

/// Audit one parsed statement. `connect_error` carries the session's
/// remote connect failure, attached to every statement so the verdict
/// is visible in the report rather than silently degraded.
pub async fn audit_statement(
    stmt: &Statement,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    connect_error: Option<&str>,
    cfg: &AuditConfig,
) {
    record.stage = Stage::Checked;
    record.stage_status = "Audit completed".into();

    if let Some(err) = connect_error {
        record.append_error(err);
    }

    // Best-effort db/table metadata for the report.
    if let Some((db, table)) = ast::primary_table(stmt) {
        record.db_name = db
            .or_else(|| ctx.current_db.clone())
            .unwrap_or_default();
        record.table_name = table;
    } else if let Some(db) = ast::statement_db_name(stmt) {
        record.db_name = db;
    }

    match stmt {
        Statement::CreateDatabase { db_name, .. } => {
            audit_create_db(db_name, record, ctx, prober, cfg).await;
        }
        Statement::Drop {
            object_type: past::ObjectType::Schema | past::ObjectType::Database,
            names,
            ..
        } => {
            audit_drop_db(names, record, ctx, prober, cfg).await;
        }
        Statement::CreateTable(create) => {
            audit_create_table(create, record, ctx, prober, cfg).await;
        }
        Statement::AlterTable(alter) => {
            audit_alter_table(alter, record, ctx, prober, cfg).await;
        }
        Statement::Insert(insert) => {
            audit_insert(insert, record, ctx, prober, cfg).await;
        }
        Statement::Update(update) => {
            audit_update(update, record, ctx, prober, cfg).await;
        }
        Statement::Delete(delete) => {
            audit_delete(delete, record, ctx, prober, cfg).await;
        }
        Statement::Query(query) => {
            audit_select(query, record, cfg);
        }
        Statement::Drop {
            object_type: past::ObjectType::Table,
            names,
            ..
        } => {
            audit_drop_table(names, record, ctx, cfg);
        }
        Statement::Truncate { table_names, .. } => {
            audit_truncate(table_names, record, ctx, prober, cfg).await;
        }
        _ => {}
    }

    record.sqlsha1 = fingerprint::sqlsha1(&record.sql_text);
}

/* ================================================================
 *  Shared helpers
 * ================================================================ */

fn resolve_db(explicit: Option<String>, ctx: &SessionContext) -> Option<String> {
    explicit.or_else(|| ctx.current_db.clone())
}

fn valid_identifier(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap())
        .is_match(name)
}

fn is_reserved_keyword(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    ALL_KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

fn charset_in_text(sql: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:CHARACTER\s+SET|CHARSET)\s*=?\s*([A-Za-z0-9_]+)").unwrap()
    })
    .captures(sql)
    .map(|c| c[1].to_string())
}

/// Per-column rules shared by CREATE TABLE and ALTER TABLE ADD/MODIFY.
fn check_column(
    spec: &ColumnSpec,
    record: &mut StatementRecord,
    ctx: &SessionContext,
    cfg: &AuditConfig,
) {
    let name = &spec.name;
    let blobby = spec.type_class.is_blob_or_text() || spec.type_class == TypeClass::Json;

    if cfg.max_column_name_length > 0 && name.len() as u64 > cfg.max_column_name_length {
        record.append_warning(format!(
            "Column '{name}' name length {} exceeds max {}.",
            name.len(),
            cfg.max_column_name_length
        ));
    }

    if cfg.check_identifier.is_on() && !valid_identifier(name) {
        record.report(
            cfg.check_identifier,
            format!("Column '{name}' name should be lowercase letters, digits and underscores."),
        );
    }

    if cfg.check_identifier_keyword.is_on() && is_reserved_keyword(name) {
        record.report(
            cfg.check_identifier_keyword,
            format!("Column name '{name}' is a MySQL reserved keyword."),
        );
    }

    if cfg.check_column_comment.is_on() && !spec.has_comment {
        record.report(
            cfg.check_column_comment,
            format!("Column '{name}' must have a comment."),
        );
    }

    if cfg.check_nullable.is_on() && spec.nullable && !blobby {
        record.report(
            cfg.check_nullable,
            format!("Column '{name}' is nullable; consider NOT NULL with a default."),
        );
    }

    if cfg.check_not_null_default.is_on()
        && !spec.nullable
        && !spec.auto_increment
        && !spec.has_default
        && !blobby
    {
        record.report(
            cfg.check_not_null_default,
            format!("Column '{name}' is NOT NULL but has no DEFAULT value."),
        );
    }

    if cfg.check_json_blob_text_default.is_on() && blobby && spec.has_default {
        record.report(
            cfg.check_json_blob_text_default,
            format!("Column '{name}': explicit DEFAULT on JSON/BLOB/TEXT is not allowed."),
        );
    }

    if cfg.check_blob_type.is_on() && spec.type_class.is_blob_or_text() {
        record.report(
            cfg.check_blob_type,
            format!("Column '{name}' uses BLOB/TEXT type."),
        );
    }

    if cfg.check_enum_type.is_on() && spec.type_class == TypeClass::Enum {
        record.report(
            cfg.check_enum_type,
            format!("Column '{name}' uses ENUM type, not recommended."),
        );
    }

    if cfg.check_set_type.is_on() && spec.type_class == TypeClass::Set {
        record.report(
            cfg.check_set_type,
            format!("Column '{name}' uses SET type, not recommended."),
        );
    }

    if cfg.check_bit_type.is_on() && spec.type_class == TypeClass::Bit {
        record.report(
            cfg.check_bit_type,
            format!("Column '{name}' uses BIT type, not recommended."),
        );
    }

    if spec.type_class == TypeClass::Json {
        if ctx.profile.db_type == DbType::MySql
            && ctx.profile.major == 5
            && ctx.profile.minor < 7
        {
            record.append_error(format!(
                "Column '{name}': JSON type is not supported in MySQL {}.{}.",
                ctx.profile.major, ctx.profile.minor
            ));
        } else if cfg.check_json_type.is_on() {
            record.report(cfg.check_json_type, format!("Column '{name}' uses JSON type."));
        }
    }

    if cfg.max_char_length > 0 && spec.type_class == TypeClass::Char {
        if let Some(width) = spec.display_width {
            if width > cfg.max_char_length {
                record.append_warning(format!(
                    "Column '{name}' CHAR({width}) exceeds max {}; consider VARCHAR.",
                    cfg.max_char_length
                ));
            }
        }
    }

    if spec.auto_increment {
        if cfg.check_autoincrement.is_on() {
            if !spec.unsigned {
                record.report(
                    cfg.check_autoincrement,
                    format!("Auto-increment column '{name}' should be UNSIGNED."),
                );
            }
            if !matches!(spec.type_class, TypeClass::Int | TypeClass::BigInt) {
                record.report(
                    cfg.check_autoincrement,
                    format!("Auto-increment column '{name}' should be INT or BIGINT."),
                );
            }
        }
        if cfg.check_autoincrement_name.is_on() && !name.eq_ignore_ascii_case("id") {
            record.report(
                cfg.check_autoincrement_name,
                format!("Auto-increment column '{name}' should be named 'id'."),
            );
        }
    }

    if cfg.check_timestamp_default.is_on()
        && spec.type_class == TypeClass::Timestamp
        && !spec.has_default
    {
        record.report(
            cfg.check_timestamp_default,
            format!("TIMESTAMP column '{name}' must have a DEFAULT value."),
        );
    }

    if cfg.check_column_charset.is_on()
        && spec.explicit_charset
        && !spec.type_class.is_blob_or_text()
    {
        record.report(
            cfg.check_column_charset,
            format!("Column '{name}' specifies a character set; use table default instead."),
        );
    }

    if cfg.check_column_default_value.is_on()
        && !spec.auto_increment
        && !spec.has_default
        && !blobby
    {
        record.report(
            cfg.check_column_default_value,
            format!("Column '{name}' must have a DEFAULT value."),
        );
    }
}

/// Key byte size of one index part, from the local column list when
/// possible, else from the remote column shape.
async fn index_part_bytes(
    part: &ast::IndexPart,
    local_cols: &[ColumnSpec],
    remote: Option<(&mut dyn SchemaProber, &str, &str)>,
) -> u64 {
    const MBMAXLEN: u64 = 4; // utf8mb4 worst case

    if let Some(col) = local_cols
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(&part.column))
    {
        if let Some(prefix) = part.prefix_len {
            return prefix * MBMAXLEN;
        }
        if col.type_class.is_string() {
            return col.display_width.unwrap_or(1) * MBMAXLEN;
        }
        if col.type_class.is_blob_or_text() {
            // No prefix on a BLOB/TEXT part; the prefix rule reports
            // it separately. Count nothing here.
            return 0;
        }
        return col.type_class.fixed_key_bytes();
    }

    if let Some((prober, db, table)) = remote {
        if let Some(info) = prober.column_info(db, table, &part.column).await {
            if let Some(prefix) = part.prefix_len {
                return prefix * MBMAXLEN;
            }
            if info.char_max_length > 0 {
                return info.char_max_length as u64 * MBMAXLEN;
            }
        }
    }
    0
}

/// Index rules shared by CREATE TABLE and ALTER TABLE ADD INDEX.
/// `remote` enables lookups for columns not defined locally
/// (ALTER ADD INDEX on existing columns).
async fn check_index(
    index: &IndexSpec,
    record: &mut StatementRecord,
    local_cols: &[ColumnSpec],
    mut remote: Option<(&mut dyn SchemaProber, &str, &str)>,
    tidb: bool,
    cfg: &AuditConfig,
) {
    let display_name = index.name.clone().unwrap_or_else(|| "(unnamed)".into());

    if cfg.max_index_parts > 0 && index.parts.len() as u64 > cfg.max_index_parts {
        record.append_warning(format!(
            "Index '{display_name}' has {} columns, exceeds max {}.",
            index.parts.len(),
            cfg.max_index_parts
        ));
    }

    if cfg.check_index_prefix.is_on() {
        if let Some(name) = &index.name {
            match index.kind {
                IndexKind::Unique if !name.to_ascii_lowercase().starts_with("uniq_") => {
                    record.report(
                        cfg.check_index_prefix,
                        format!("Unique index '{name}' should have 'uniq_' prefix."),
                    );
                }
                IndexKind::Multiple if !name.to_ascii_lowercase().starts_with("idx_") => {
                    record.report(
                        cfg.check_index_prefix,
                        format!("Index '{name}' should have 'idx_' prefix."),
                    );
                }
                _ => {}
            }
        }
    }

    if index.kind == IndexKind::Foreign {
        if cfg.check_foreign_key.is_on() {
            record.report(cfg.check_foreign_key, "Foreign keys are not allowed.");
        }
        if tidb && cfg.check_tidb_foreign_key.is_on() {
            record.report(
                cfg.check_tidb_foreign_key,
                "TiDB does not support FOREIGN KEY constraints.",
            );
        }
    }

    // BLOB/TEXT parts need an explicit prefix length.
    for part in &index.parts {
        if part.prefix_len.is_some() {
            continue;
        }
        let mut is_blob = local_cols
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(&part.column))
            .map(|c| c.type_class.is_blob_or_text());
        if is_blob.is_none() {
            if let Some((prober, db, table)) = remote.as_mut() {
                is_blob = prober
                    .column_info(db, table, &part.column)
                    .await
                    .map(|info| TypeClass::is_blob_or_text_name(&info.data_type));
            }
        }
        if is_blob == Some(true) {
            record.append_error(format!(
                "Index '{display_name}' on BLOB/TEXT column '{}' must specify a prefix length.",
                part.column
            ));
        }
    }

    // Key length caps.
    if cfg.check_index_length.is_on() {
        let mut total: u64 = 0;
        for part in &index.parts {
            let bytes = index_part_bytes(
                part,
                local_cols,
                remote.as_mut().map(|(p, db, t)| (&mut **p, *db, *t)),
            )
            .await;
            if cfg.index_column_max_bytes > 0 && bytes > cfg.index_column_max_bytes {
                record.report(
                    cfg.check_index_length,
                    format!(
                        "Index '{display_name}' column '{}' key length {bytes} bytes exceeds max {}.",
                        part.column, cfg.index_column_max_bytes
                    ),
                );
            }
            total += bytes;
        }
        if cfg.index_total_max_bytes > 0 && total > cfg.index_total_max_bytes {
            record.report(
                cfg.check_index_length,
                format!(
                    "Index '{display_name}' total key length {total} bytes exceeds max {}.",
                    cfg.index_total_max_bytes
                ),
            );
        }
    }
}

/* ================================================================
 *  Must-have columns
 * ================================================================ */

#[derive(Debug, Default)]
struct RequiredColumn {
    name: String,
    type_class: Option<TypeClass>,
    need_unsigned: bool,
    need_not_null: bool,
    need_auto_increment: bool,
    need_comment: bool,
}

impl RequiredColumn {
    fn describe(&self) -> String {
        let mut out = self.name.clone();
        if let Some(t) = self.type_class {
            out.push(' ');
            out.push_str(t.display_name());
        }
        if self.need_unsigned {
            out.push_str(" UNSIGNED");
        }
        if self.need_not_null {
            out.push_str(" NOT NULL");
        }
        if self.need_auto_increment {
            out.push_str(" AUTO_INCREMENT");
        }
        if self.need_comment {
            out.push_str(" COMMENT");
        }
        out
    }
}

fn parse_required_columns(spec: &str) -> Vec<RequiredColumn> {
    let mut out = Vec::new();
    for chunk in spec.split(';') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let mut tokens = chunk.split_whitespace();
        let Some(name) = tokens.next() else { continue };
        let upper = chunk.to_ascii_uppercase();
        let has_kw = |kw: &str| {
            upper
                .split_whitespace()
                .collect::<Vec<_>>()
                .windows(kw.split_whitespace().count())
                .any(|w| w.join(" ") == kw)
        };
        out.push(RequiredColumn {
            name: name.to_string(),
            type_class: tokens.next().and_then(TypeClass::parse_name),
            need_unsigned: has_kw("UNSIGNED"),
            need_not_null: has_kw("NOT NULL"),
            need_auto_increment: has_kw("AUTO_INCREMENT"),
            need_comment: has_kw("COMMENT"),
        });
    }
    out
}

fn check_must_have_columns(cols: &[ColumnSpec], record: &mut StatementRecord, cfg: &AuditConfig) {
    for req in parse_required_columns(&cfg.must_have_columns) {
        let Some(col) = cols.iter().find(|c| c.name.eq_ignore_ascii_case(&req.name)) else {
            record.report(
                cfg.check_must_have_columns,
                format!("Required column is missing: {}.", req.describe()),
            );
            continue;
        };

        if let Some(want) = req.type_class {
            if !col.type_class.compatible(want) {
                record.report(
                    cfg.check_must_have_columns,
                    format!(
                        "Required column '{}' must be {}, but found {}.",
                        req.name,
                        want.display_name(),
                        col.type_class.display_name()
                    ),
                );
            }
        }
        if req.need_unsigned && !col.unsigned {
            record.report(
                cfg.check_must_have_columns,
                format!("Required column '{}' must be UNSIGNED.", req.name),
            );
        }
        if req.need_not_null && col.nullable {
            record.report(
                cfg.check_must_have_columns,
                format!("Required column '{}' must be NOT NULL.", req.name),
            );
        }
        if req.need_auto_increment && !col.auto_increment {
            record.report(
                cfg.check_must_have_columns,
                format!("Required column '{}' must be AUTO_INCREMENT.", req.name),
            );
        }
        if req.need_comment && !col.has_comment {
            record.report(
                cfg.check_must_have_columns,
                format!("Required column '{}' must have a COMMENT.", req.name),
            );
        }
    }
}

/* ================================================================
 *  CREATE / DROP DATABASE
 * ================================================================ */

async fn audit_create_db(
    db_name: &past::ObjectName,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    let name = ast::object_name_parts(db_name).1;
    record.db_name = name.clone();

    if ctx.batch_databases.contains(&name) {
        record.append_error(format!(
            "Database '{name}' already exists (created earlier in this batch)."
        ));
    } else if prober.db_exists(&name).await == Some(true) {
        record.append_error(format!("Database '{name}' already exists on remote server."));
    }

    if cfg.check_identifier.is_on() && !valid_identifier(&name) {
        record.report(
            cfg.check_identifier,
            format!("Database name '{name}' should be lowercase letters, digits and underscores."),
        );
    }

    if cfg.max_table_name_length > 0 && name.len() as u64 > cfg.max_table_name_length {
        record.append_warning(format!(
            "Database name '{name}' length {} exceeds max {}.",
            name.len(),
            cfg.max_table_name_length
        ));
    }

    if let Some(cs) = charset_in_text(&record.sql_text) {
        if !cfg.charset_allowed(&cs) {
            record.append_error(format!(
                "Database charset '{cs}' is not in allowed list '{}'.",
                cfg.support_charset
            ));
        }
    }

    ctx.batch_databases.insert(name);
}

async fn audit_drop_db(
    names: &[past::ObjectName],
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    let Some(name) = names.first().map(|n| ast::object_name_parts(n).1) else {
        return;
    };
    record.db_name = name.clone();

    if cfg.check_drop_database.is_on() {
        record.report(
            cfg.check_drop_database,
            format!("DROP DATABASE will permanently remove database '{name}'."),
        );
    }

    if !ctx.batch_databases.contains(&name) && prober.db_exists(&name).await == Some(false) {
        record.append_warning(format!("Database '{name}' does not exist on remote server."));
    }

    ctx.batch_databases.remove(&name);
}

/* ================================================================
 *  CREATE TABLE
 * ================================================================ */

async fn audit_create_table(
    create: &past::CreateTable,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    let (explicit_db, table) = ast::object_name_parts(&create.name);
    let db = resolve_db(explicit_db, ctx);

    // Existence: earlier in the batch, or on the remote.
    if let Some(db) = &db {
        if ctx.batch_has_table(db, &table) {
            record.append_error(format!(
                "Table '{db}.{table}' already exists (created earlier in this batch)."
            ));
        } else if prober.table_exists(db, &table).await == Some(true) {
            record.append_error(format!("Table '{db}.{table}' already exists on remote server."));
        }
    }

    let cols: Vec<ColumnSpec> = create.columns.iter().map(ColumnSpec::from_ast).collect();
    let indexes: Vec<IndexSpec> = create
        .constraints
        .iter()
        .filter_map(IndexSpec::from_constraint)
        .collect();
    let options = ast::table_options_summary(create);

    // Primary key required.
    if cfg.check_primary_key.is_on() {
        let has_pk = cols.iter().any(|c| c.is_primary)
            || indexes.iter().any(|i| i.kind == IndexKind::Primary);
        if !has_pk {
            record.report(cfg.check_primary_key, "Table must have a PRIMARY KEY.");
        }
    }

    if cfg.check_table_comment.is_on() && !options.has_comment {
        record.report(cfg.check_table_comment, "Table must have a comment.");
    }

    if cfg.check_engine_innodb.is_on() {
        if let Some(engine) = &options.engine {
            if !engine.eq_ignore_ascii_case("innodb") {
                record.report(
                    cfg.check_engine_innodb,
                    format!("Table engine must be InnoDB (found '{engine}')."),
                );
            }
        }
    }

    if let Some(cs) = &options.charset {
        if !cfg.charset_allowed(cs) {
            record.append_error(format!(
                "Table charset '{cs}' is not in allowed list '{}'.",
                cfg.support_charset
            ));
        }
    }

    if cfg.check_create_select.is_on() && create.query.is_some() {
        record.report(cfg.check_create_select, "CREATE TABLE ... SELECT is not allowed.");
    }

    if cfg.max_table_name_length > 0 && table.len() as u64 > cfg.max_table_name_length {
        record.append_warning(format!(
            "Table name '{table}' length {} exceeds max {}.",
            table.len(),
            cfg.max_table_name_length
        ));
    }
    if cfg.check_identifier.is_on() && !valid_identifier(&table) {
        record.report(
            cfg.check_identifier,
            format!("Table name '{table}' should be lowercase letters, digits and underscores."),
        );
    }
    if cfg.check_identifier_keyword.is_on() && is_reserved_keyword(&table) {
        record.report(
            cfg.check_identifier_keyword,
            format!("Table name '{table}' is a MySQL reserved keyword."),
        );
    }

    if cfg.max_columns > 0 && cols.len() as u64 > cfg.max_columns {
        record.append_warning(format!(
            "Table has {} columns, exceeds max {}.",
            cols.len(),
            cfg.max_columns
        ));
    }

    for col in &cols {
        check_column(col, record, ctx, cfg);
    }

    if cfg.max_indexes > 0 && indexes.len() as u64 > cfg.max_indexes {
        record.append_warning(format!(
            "Table has {} indexes, exceeds max {}.",
            indexes.len(),
            cfg.max_indexes
        ));
    }

    let tidb = ctx.profile.db_type == DbType::Tidb;
    for index in &indexes {
        check_index(index, record, &cols, None, tidb, cfg).await;
    }

    if cfg.max_primary_key_parts > 0 {
        for index in &indexes {
            if index.kind == IndexKind::Primary
                && index.parts.len() as u64 > cfg.max_primary_key_parts
            {
                record.append_warning(format!(
                    "PRIMARY KEY has {} columns, exceeds max {}.",
                    index.parts.len(),
                    cfg.max_primary_key_parts
                ));
            }
        }
    }

    // Redundant index detection: one key a prefix of another.
    if cfg.check_duplicate_index.is_on() {
        let keyed: Vec<&IndexSpec> = indexes
            .iter()
            .filter(|i| matches!(i.kind, IndexKind::Unique | IndexKind::Multiple))
            .collect();
        for i in 0..keyed.len() {
            for j in i + 1..keyed.len() {
                let (a, b) = (keyed[i], keyed[j]);
                let min_len = a.parts.len().min(b.parts.len());
                if min_len == 0 {
                    continue;
                }
                let prefix_match = (0..min_len).all(|k| {
                    a.parts[k].column.eq_ignore_ascii_case(&b.parts[k].column)
                });
                if prefix_match {
                    let (shorter, longer) = if a.parts.len() <= b.parts.len() {
                        (a, b)
                    } else {
                        (b, a)
                    };
                    record.report(
                        cfg.check_duplicate_index,
                        format!(
                            "Index '{}' is a prefix of '{}' and may be redundant.",
                            shorter.name.clone().unwrap_or_else(|| "(unnamed)".into()),
                            longer.name.clone().unwrap_or_else(|| "(unnamed)".into()),
                        ),
                    );
                }
            }
        }
    }

    if cfg.check_partition.is_on()
        && record.sql_text.to_ascii_uppercase().contains("PARTITION BY")
    {
        record.report(cfg.check_partition, "Partitioned tables are not recommended.");
    }

    if cfg.check_must_have_columns.is_on() && !cfg.must_have_columns.is_empty() {
        check_must_have_columns(&cols, record, cfg);
    }

    if cfg.check_autoincrement_init_value.is_on() {
        if let Some(init) = options.auto_increment {
            if init > 1 {
                record.report(
                    cfg.check_autoincrement_init_value,
                    format!("AUTO_INCREMENT initial value is {init}, should be 1."),
                );
            }
        }
    }

    // Track the new table in the batch schema.
    if let Some(db) = &db {
        let col_set: HashSet<String> = cols.iter().map(|c| c.name.to_lowercase()).collect();
        ctx.batch_tables.insert(batch_key(db, &table), col_set);
    }
}

/* ================================================================
 *  ALTER TABLE
 * ================================================================ */

struct AlterColumnChange<'a> {
    spec: ColumnSpec,
    kind: AlterChangeKind,
    old_name: Option<&'a str>,
}

#[derive(PartialEq)]
enum AlterChangeKind {
    Add,
    Modify,
}

fn collect_alter_columns<'a>(ops: &'a [past::AlterTableOperation]) -> Vec<AlterColumnChange<'a>> {
    use past::AlterTableOperation as Op;
    let mut out = Vec::new();
    for op in ops {
        match op {
            Op::AddColumn { column_def, .. } => out.push(AlterColumnChange {
                spec: ColumnSpec::from_ast(column_def),
                kind: AlterChangeKind::Add,
                old_name: None,
            }),
            Op::ModifyColumn {
                col_name,
                data_type,
                options,
                ..
            } => out.push(AlterColumnChange {
                spec: ColumnSpec::from_parts(
                    &col_name.value,
                    data_type,
                    &options.iter().collect::<Vec<_>>(),
                ),
                kind: AlterChangeKind::Modify,
                old_name: Some(col_name.value.as_str()),
            }),
            Op::ChangeColumn {
                old_name,
                new_name,
                data_type,
                options,
                ..
            } => out.push(AlterColumnChange {
                spec: ColumnSpec::from_parts(
                    &new_name.value,
                    data_type,
                    &options.iter().collect::<Vec<_>>(),
                ),
                kind: AlterChangeKind::Modify,
                old_name: Some(old_name.value.as_str()),
            }),
            _ => {}
        }
    }
    out
}

async fn check_modify_narrowing(
    change: &ColumnSpec,
    old: &RemoteColumnInfo,
    record: &mut StatementRecord,
    tidb: bool,
    cfg: &AuditConfig,
) {
    // Integer narrowing.
    let old_rank = TypeClass::int_rank_of_name(&old.data_type);
    let new_rank = change.type_class.int_rank();
    if old_rank > 0 && new_rank > 0 && new_rank < old_rank {
        record.report(
            cfg.check_lossy_type_change,
            format!(
                "Column '{}' type narrowing: {} -> {}, may truncate data.",
                change.name,
                old.data_type,
                change.type_class.display_name()
            ),
        );
        if tidb && cfg.check_tidb_lossy_type_change.is_on() {
            record.report(
                cfg.check_tidb_lossy_type_change,
                format!(
                    "TiDB does not support lossy type change: '{}' {} -> {}.",
                    change.name,
                    old.data_type,
                    change.type_class.display_name()
                ),
            );
        }
    }

    // String shrink.
    if old.char_max_length > 0 && change.type_class.is_string() {
        if let Some(new_len) = change.display_width {
            if (new_len as i64) < old.char_max_length {
                record.report(
                    cfg.check_varchar_shrink,
                    format!(
                        "Column '{}' length reduced: {} -> {new_len}, may truncate data.",
                        change.name, old.char_max_length
                    ),
                );
                if tidb
                    && cfg.check_tidb_varchar_shrink.is_on()
                    && change.type_class == TypeClass::Varchar
                {
                    record.report(
                        cfg.check_tidb_varchar_shrink,
                        format!(
                            "TiDB does not support shrinking VARCHAR length: '{}' {} -> {new_len}.",
                            change.name, old.char_max_length
                        ),
                    );
                }
            }
        }
    }

    // DECIMAL precision/scale change.
    if old.data_type.eq_ignore_ascii_case("decimal")
        && change.type_class == TypeClass::Decimal
        && (old.numeric_precision >= 0 || old.numeric_scale >= 0)
    {
        record.report(
            cfg.check_decimal_change,
            format!("Column '{}' DECIMAL precision/scale changed.", change.name),
        );
        if tidb && cfg.check_tidb_decimal_change.is_on() {
            record.report(
                cfg.check_tidb_decimal_change,
                format!(
                    "TiDB does not support changing DECIMAL precision/scale for column '{}'.",
                    change.name
                ),
            );
        }
    }
}

async fn audit_alter_table(
    alter: &past::AlterTable,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    use past::AlterTableOperation as Op;

    let (explicit_db, table) = ast::object_name_parts(&alter.name);
    let Some(db) = resolve_db(explicit_db, ctx) else {
        record.append_error("No database selected for ALTER TABLE.");
        return;
    };

    let flags = AlterOp::from_operations(&alter.operations);
    record.sub_type = flags.sub_type();

    let in_batch = ctx.batch_has_table(&db, &table);
    let tidb = ctx.profile.db_type == DbType::Tidb;

    if !in_batch {
        if prober.table_exists(&db, &table).await == Some(false) {
            record.append_error(format!("Table '{db}.{table}' does not exist on remote server."));
        }
        if let Some(rows) = prober.table_rows(&db, &table).await {
            record.affected_rows = rows;
        }
    }

    // Column-level operations.
    for change in collect_alter_columns(&alter.operations) {
        check_column(&change.spec, record, ctx, cfg);
        match change.kind {
            AlterChangeKind::Add => {
                if in_batch {
                    if ctx.batch_column_exists(&db, &table, &change.spec.name) {
                        record.append_error(format!(
                            "Column '{}' already exists in '{db}.{table}'.",
                            change.spec.name
                        ));
                    }
                    ctx.batch_tables
                        .entry(batch_key(&db, &table))
                        .or_default()
                        .insert(change.spec.name.to_lowercase());
                } else if prober
                    .column_exists(&db, &table, &change.spec.name)
                    .await
                    == Some(true)
                {
                    record.append_error(format!(
                        "Column '{}' already exists in '{db}.{table}' on remote server.",
                        change.spec.name
                    ));
                }
            }
            AlterChangeKind::Modify => {
                let probe_name = change.old_name.unwrap_or(&change.spec.name);
                if in_batch {
                    if !ctx.batch_column_exists(&db, &table, probe_name) {
                        record.append_error(format!(
                            "Column '{probe_name}' does not exist in '{db}.{table}'.",
                        ));
                    }
                    // No pre-ALTER shape for batch-created tables;
                    // narrowing checks need the remote.
                } else {
                    if prober.column_exists(&db, &table, probe_name).await == Some(false) {
                        record.append_error(format!(
                            "Column '{probe_name}' does not exist in '{db}.{table}' on remote server.",
                        ));
                    }
                    if let Some(old) = prober.column_info(&db, &table, probe_name).await {
                        check_modify_narrowing(&change.spec, &old, record, tidb, cfg).await;
                    }
                }
            }
        }
    }

    // Drops and index operations.
    let local_cols: Vec<ColumnSpec> = collect_alter_columns(&alter.operations)
        .into_iter()
        .map(|c| c.spec)
        .collect();
    for op in &alter.operations {
        match op {
            Op::DropColumn { column_names, .. } => {
                for col in column_names {
                    let name = &col.value;
                    record.append_warning(format!(
                        "Dropping column '{name}' is a high-risk operation."
                    ));
                    if in_batch {
                        if !ctx.batch_column_exists(&db, &table, name) {
                            record.append_error(format!(
                                "Column '{name}' does not exist in '{db}.{table}'.",
                            ));
                        } else if let Some(cols) = ctx.batch_tables.get_mut(&batch_key(&db, &table))
                        {
                            cols.remove(&name.to_lowercase());
                        }
                    } else if prober.column_exists(&db, &table, name).await == Some(false) {
                        record.append_error(format!(
                            "Column '{name}' does not exist in '{db}.{table}' on remote server.",
                        ));
                    }
                }
            }
            Op::AddConstraint { constraint, .. } => {
                if let Some(index) = IndexSpec::from_constraint(constraint) {
                    let remote = if in_batch {
                        None
                    } else {
                        Some((&mut *prober, db.as_str(), table.as_str()))
                    };
                    check_index(&index, record, &local_cols, remote, tidb, cfg).await;
                }
            }
            Op::DropConstraint { name, .. } => {
                if !in_batch
                    && prober.index_exists(&db, &table, &name.value).await == Some(false)
                {
                    record.append_error(format!(
                        "Index '{}' does not exist in '{db}.{table}' on remote server.",
                        name.value
                    ));
                }
            }
            Op::RenameTable { .. } => {
                record.append_warning(format!(
                    "Renaming table '{db}.{table}' is a high-risk operation."
                ));
            }
            other => {
                // ALTER ... DROP INDEX renders as "DROP INDEX `name`".
                let text = other.to_string();
                let upper = text.to_ascii_uppercase();
                if upper.starts_with("DROP INDEX") || upper.starts_with("DROP KEY") {
                    let name = text
                        .split_whitespace()
                        .nth(2)
                        .unwrap_or("")
                        .trim_matches('`')
                        .to_string();
                    if !name.is_empty()
                        && !in_batch
                        && prober.index_exists(&db, &table, &name).await == Some(false)
                    {
                        record.append_error(format!(
                            "Index '{name}' does not exist in '{db}.{table}' on remote server.",
                        ));
                    }
                }
            }
        }
    }

    // ENGINE change through table options.
    if flags.contains(AlterOp::OPTIONS_ENGINE) && cfg.check_engine_innodb.is_on() {
        let rendered = alter
            .operations
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        if let Some(engine) = engine_in_text(&rendered) {
            if !engine.eq_ignore_ascii_case("innodb") {
                record.report(
                    cfg.check_engine_innodb,
                    format!("Changing engine to '{engine}' is not allowed; must use InnoDB."),
                );
            }
        }
    }

    // Repeated ALTERs against one table should be merged.
    if cfg.check_merge_alter_table.is_on() {
        let key = batch_key(&db, &table);
        if ctx.altered_tables.contains(&key) {
            record.report(
                cfg.check_merge_alter_table,
                format!(
                    "Table '{db}.{table}' has been altered before in this session; \
                     consider merging into a single ALTER TABLE statement."
                ),
            );
        }
        ctx.altered_tables.insert(key);
    }

    // TiDB: one operation per ALTER.
    if tidb && cfg.check_tidb_merge_alter.is_on() {
        let categories = [
            AlterOp::ADD_COLUMN,
            AlterOp::DROP_COLUMN,
            AlterOp::CHANGE_COLUMN,
            AlterOp::ADD_INDEX,
            AlterOp::DROP_INDEX,
            AlterOp::RENAME,
            AlterOp::OPTIONS,
        ]
        .iter()
        .filter(|f| flags.contains(**f))
        .count();
        let add_columns = alter
            .operations
            .iter()
            .filter(|op| matches!(op, Op::AddColumn { .. }))
            .count();
        if categories > 1 || add_columns > 1 {
            record.report(
                cfg.check_tidb_merge_alter,
                "TiDB does not support multiple operations in a single ALTER TABLE; \
                 split into separate statements.",
            );
        }
    }

    record.ddl_algorithm = flags.predict_algorithm(ctx.profile.major).to_string();
}

fn engine_in_text(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)ENGINE\s*=?\s*([A-Za-z0-9_]+)").unwrap())
        .captures(text)
        .map(|c| c[1].to_string())
}

/* ================================================================
 *  DML
 * ================================================================ */

/// Warn when an IN (...) list exceeds the configured cap; recurses
/// through boolean structure and nesting.
fn check_in_clause(expr: &past::Expr, record: &mut StatementRecord, cfg: &AuditConfig) {
    if cfg.in_count == 0 {
        return;
    }
    use past::Expr as E;
    match expr {
        E::InList { list, .. } => {
            if list.len() as u64 > cfg.in_count {
                record.append_warning(format!(
                    "IN clause has {} items, exceeds max {}.",
                    list.len(),
                    cfg.in_count
                ));
            }
            for item in list {
                check_in_clause(item, record, cfg);
            }
        }
        E::BinaryOp { left, right, .. } => {
            check_in_clause(left, record, cfg);
            check_in_clause(right, record, cfg);
        }
        E::UnaryOp { expr, .. } | E::Nested(expr) | E::IsNull(expr) | E::IsNotNull(expr) => {
            check_in_clause(expr, record, cfg);
        }
        E::Between {
            expr, low, high, ..
        } => {
            check_in_clause(expr, record, cfg);
            check_in_clause(low, record, cfg);
            check_in_clause(high, record, cfg);
        }
        _ => {}
    }
}

async fn table_exists_check(
    db: &Option<String>,
    table: &str,
    record: &mut StatementRecord,
    ctx: &SessionContext,
    prober: &mut dyn SchemaProber,
) -> bool {
    let Some(db) = db else { return false };
    if ctx.batch_has_table(db, table) {
        return true;
    }
    if prober.table_exists(db, table).await == Some(false) {
        record.append_error(format!("Table '{db}.{table}' does not exist on remote server."));
    }
    false
}

async fn estimate_dml_rows(
    db: &Option<String>,
    table: &str,
    record: &mut StatementRecord,
    ctx: &SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
    verb: &str,
) {
    let Some(db) = db else { return };
    let tidb = ctx.profile.db_type == DbType::Tidb;
    let mut rows = prober.explain_rows(db, &record.sql_text, tidb).await;
    if rows.is_none() {
        rows = prober.table_rows(db, table).await;
    }
    let Some(rows) = rows else { return };
    if rows < 0 {
        return;
    }
    record.affected_rows = rows;
    if cfg.max_update_rows > 0 && rows as u64 > cfg.max_update_rows {
        record.append_warning(format!(
            "Table '{db}.{table}' has approximately {rows} rows, exceeds max {}. \
             Consider batching the {verb}.",
            cfg.max_update_rows
        ));
    }
}

async fn check_dml_columns_exist(
    db: &Option<String>,
    table: &str,
    columns: &[String],
    record: &mut StatementRecord,
    ctx: &SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    if !cfg.check_column_exists.is_on() || columns.is_empty() {
        return;
    }
    let Some(db) = db else { return };
    let in_batch = ctx.batch_has_table(db, table);
    for col in columns {
        let exists = if in_batch {
            Some(ctx.batch_column_exists(db, table, col))
        } else {
            prober.column_exists(db, table, col).await
        };
        if exists == Some(false) {
            record.report(
                cfg.check_column_exists,
                format!("Column '{col}' does not exist in '{db}.{table}'."),
            );
        }
    }
}

async fn audit_insert(
    insert: &past::Insert,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    let target = match &insert.table {
        past::TableObject::TableName(name) => Some(ast::object_name_parts(name)),
        _ => None,
    };
    let (explicit_db, table) = target.unwrap_or((None, String::new()));
    let db = resolve_db(explicit_db, ctx);

    if !table.is_empty() {
        table_exists_check(&db, &table, record, ctx, prober).await;
    }

    if cfg.check_insert_column.is_on() && insert.columns.is_empty() {
        record.report(
            cfg.check_insert_column,
            "INSERT/REPLACE should specify an explicit column list.",
        );
    }

    let value_rows: Option<&past::Values> = insert.source.as_deref().and_then(|q| match &*q.body {
        past::SetExpr::Values(v) => Some(v),
        _ => None,
    });

    if cfg.check_insert_values_match.is_on() && !insert.columns.is_empty() {
        if let Some(values) = value_rows {
            let expected = insert.columns.len();
            for row in &values.rows {
                if row.len() != expected {
                    record.report(
                        cfg.check_insert_values_match,
                        format!(
                            "INSERT column count {expected} does not match value count {}.",
                            row.len()
                        ),
                    );
                    break;
                }
            }
        }
    }

    if cfg.check_insert_duplicate_column.is_on() {
        let mut seen = HashSet::new();
        for col in &insert.columns {
            if !seen.insert(col.value.to_lowercase()) {
                record.report(
                    cfg.check_insert_duplicate_column,
                    format!("Duplicate column '{}' in INSERT column list.", col.value),
                );
            }
        }
    }

    // INSERT ... SELECT needs a WHERE on the SELECT side.
    if cfg.check_dml_where.is_on() {
        if let Some(query) = insert.source.as_deref() {
            if !matches!(&*query.body, past::SetExpr::Values(_)) {
                if let Some(select) = ast::first_select(query) {
                    if select.selection.is_none() {
                        record.report(
                            cfg.check_dml_where,
                            "INSERT ... SELECT without a WHERE clause on the SELECT.",
                        );
                    }
                }
            }
        }
    }

    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.clone()).collect();
    check_dml_columns_exist(&db, &table, &columns, record, ctx, prober, cfg).await;
}

async fn audit_update(
    update: &past::Update,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    let target = match &update.table.relation {
        past::TableFactor::Table { name, .. } => Some(ast::object_name_parts(name)),
        _ => None,
    };
    let (explicit_db, table) = target.unwrap_or((None, String::new()));
    let db = resolve_db(explicit_db, ctx);

    if !table.is_empty() {
        table_exists_check(&db, &table, record, ctx, prober).await;
    }

    if cfg.check_dml_where.is_on() && update.selection.is_none() {
        record.report(cfg.check_dml_where, "UPDATE without a WHERE clause is not allowed.");
    }

    if let Some(cond) = &update.selection {
        check_in_clause(cond, record, cfg);
    }

    if !table.is_empty() {
        estimate_dml_rows(&db, &table, record, ctx, prober, cfg, "UPDATE").await;
    }

    let set_columns: Vec<String> = update
        .assignments
        .iter()
        .filter_map(|a| match &a.target {
            past::AssignmentTarget::ColumnName(name) => Some(ast::object_name_parts(name).1),
            _ => None,
        })
        .collect();
    check_dml_columns_exist(&db, &table, &set_columns, record, ctx, prober, cfg).await;
}

async fn audit_delete(
    delete: &past::Delete,
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    if cfg.check_delete.is_on() {
        record.report(cfg.check_delete, "DELETE statement is restricted by audit policy.");
    }

    let tables = match &delete.from {
        past::FromTable::WithFromKeyword(t) | past::FromTable::WithoutKeyword(t) => t,
    };
    let target = tables.first().and_then(|t| match &t.relation {
        past::TableFactor::Table { name, .. } => Some(ast::object_name_parts(name)),
        _ => None,
    });
    let (explicit_db, table) = target.unwrap_or((None, String::new()));
    let db = resolve_db(explicit_db, ctx);

    if !table.is_empty() {
        table_exists_check(&db, &table, record, ctx, prober).await;
    }

    if cfg.check_dml_where.is_on() && delete.selection.is_none() {
        record.report(cfg.check_dml_where, "DELETE without a WHERE clause is not allowed.");
    }

    if cfg.check_dml_limit.is_on() && delete.limit.is_some() {
        record.report(cfg.check_dml_limit, "DELETE with LIMIT is not recommended.");
    }

    if cfg.check_orderby_in_dml.is_on() && !delete.order_by.is_empty() {
        record.report(cfg.check_orderby_in_dml, "DELETE with ORDER BY is not recommended.");
    }

    if let Some(cond) = &delete.selection {
        check_in_clause(cond, record, cfg);
    }

    if !table.is_empty() {
        estimate_dml_rows(&db, &table, record, ctx, prober, cfg, "DELETE").await;
    }
}

fn audit_select(query: &past::Query, record: &mut StatementRecord, cfg: &AuditConfig) {
    if cfg.check_select_star.is_on() {
        if let Some(select) = ast::first_select(query) {
            let has_wild = select.projection.iter().any(|p| {
                matches!(
                    p,
                    past::SelectItem::Wildcard(_) | past::SelectItem::QualifiedWildcard(_, _)
                )
            });
            if has_wild {
                record.report(
                    cfg.check_select_star,
                    "SELECT * is not recommended; specify columns.",
                );
            }
        }
    }

    if cfg.check_orderby_rand.is_on() {
        for ord in ast::order_exprs(query) {
            if let past::Expr::Function(f) = &ord.expr {
                if f.name.to_string().eq_ignore_ascii_case("rand") {
                    record.report(
                        cfg.check_orderby_rand,
                        "ORDER BY RAND() is not recommended; causes full table scan.",
                    );
                    break;
                }
            }
        }
    }

    if let Some(select) = ast::first_select(query) {
        if let Some(cond) = &select.selection {
            check_in_clause(cond, record, cfg);
        }
    }
}

fn audit_drop_table(
    names: &[past::ObjectName],
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    cfg: &AuditConfig,
) {
    if cfg.check_drop_table.is_on() {
        record.report(cfg.check_drop_table, "DROP TABLE will permanently remove the table.");
    }
    // Keep the batch schema in lockstep.
    for name in names {
        let (explicit_db, table) = ast::object_name_parts(name);
        if let Some(db) = resolve_db(explicit_db, ctx) {
            ctx.batch_tables.remove(&batch_key(&db, &table));
        }
    }
}

async fn audit_truncate(
    table_names: &[past::TruncateTableTarget],
    record: &mut StatementRecord,
    ctx: &mut SessionContext,
    prober: &mut dyn SchemaProber,
    cfg: &AuditConfig,
) {
    let Some(target) = table_names.first() else { return };
    let (explicit_db, table) = ast::object_name_parts(&target.name);
    let db = resolve_db(explicit_db, ctx);

    if cfg.check_truncate_table.is_on() {
        record.report(
            cfg.check_truncate_table,
            format!(
                "TRUNCATE TABLE will remove all data from '{}.{table}'.",
                db.as_deref().unwrap_or("")
            ),
        );
    }

    if let Some(db) = &db {
        if !ctx.batch_has_table(db, &table) {
            match prober.table_exists(db, &table).await {
                Some(false) => {
                    record.append_error(format!(
                        "Table '{db}.{table}' does not exist on remote server."
                    ));
                }
                Some(true) => {
                    if let Some(rows) = prober.table_rows(db, &table).await {
                        record.affected_rows = rows;
                    }
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SqlKind;
    use crate::remote::testing::StubProber;
    use crate::remote::RemoteColumnInfo;
    use crate::session::{ErrLevel, SessionControl};
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;

    fn parse_one(sql: &str) -> Statement {
        Parser::parse_sql(&MySqlDialect {}, sql)
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    fn ctx() -> SessionContext {
        let mut ctx = SessionContext::new(SessionControl::new(1));
        ctx.current_db = Some("shop".into());
        ctx
    }

    async fn run(
        sql: &str,
        ctx: &mut SessionContext,
        stub: &mut StubProber,
        cfg: &AuditConfig,
    ) -> StatementRecord {
        let stmt = parse_one(sql);
        let id = ctx.next_statement_id();
        let mut record = StatementRecord::new(id, sql.to_string(), SqlKind::of(&stmt));
        audit_statement(&stmt, &mut record, ctx, stub, None, cfg).await;
        record
    }

    const GOOD_CREATE: &str = "CREATE TABLE t (\
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY COMMENT 'pk', \
        name VARCHAR(32) NOT NULL DEFAULT '' COMMENT 'n'\
        ) ENGINE=InnoDB COMMENT='t'";

    #[tokio::test]
    async fn clean_create_table_passes() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        stub.databases.insert("shop".into());
        let cfg = AuditConfig::default();

        let rec = run(GOOD_CREATE, &mut ctx, &mut stub, &cfg).await;
        assert_eq!(rec.errlevel, ErrLevel::Ok, "unexpected findings: {}", rec.errmsg);
        assert_eq!(rec.stage, Stage::Checked);
        assert_eq!(rec.kind, SqlKind::CreateTable);
        assert_eq!(rec.sqlsha1.len(), 40);
        assert!(ctx.batch_has_table("shop", "t"));
        assert!(ctx.batch_column_exists("shop", "t", "name"));
    }

    #[tokio::test]
    async fn missing_primary_key_is_an_error() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        let cfg = AuditConfig::default();

        let rec = run(
            "CREATE TABLE t (id BIGINT UNSIGNED NOT NULL COMMENT 'x') ENGINE=InnoDB COMMENT='t'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert_eq!(rec.errlevel, ErrLevel::Error);
        assert!(rec.errmsg.contains("must have a PRIMARY KEY"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn create_table_existence_checks() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id"]);
        let cfg = AuditConfig::default();

        let rec = run(GOOD_CREATE, &mut ctx, &mut stub, &cfg).await;
        assert!(rec.errmsg.contains("already exists on remote server"), "{}", rec.errmsg);

        // Same table created again in the batch.
        let mut ctx2 = ctx;
        ctx2.batch_tables.clear();
        let mut empty = StubProber::default();
        run(GOOD_CREATE, &mut ctx2, &mut empty, &cfg).await;
        let rec2 = run(GOOD_CREATE, &mut ctx2, &mut empty, &cfg).await;
        assert!(rec2.errmsg.contains("created earlier in this batch"), "{}", rec2.errmsg);
    }

    #[tokio::test]
    async fn engine_and_comment_rules() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        let cfg = AuditConfig::default();
        let rec = run(
            "CREATE TABLE t (id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY COMMENT 'pk') \
             ENGINE=MyISAM",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("engine must be InnoDB"), "{}", rec.errmsg);
        assert!(rec.errmsg.contains("Table must have a comment"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn alter_add_column_predicts_instant_on_80() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id"]);
        let cfg = AuditConfig::default();

        let rec = run(
            "ALTER TABLE t ADD COLUMN x INT NOT NULL DEFAULT 0 COMMENT 'x'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert_eq!(rec.sub_type, "ADD_COLUMN");
        assert_eq!(rec.ddl_algorithm, "INSTANT");
        assert_eq!(rec.errlevel, ErrLevel::Ok, "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn alter_on_missing_table_is_an_error() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        let cfg = AuditConfig::default();
        let rec = run(
            "ALTER TABLE nope ADD COLUMN x INT NOT NULL DEFAULT 0 COMMENT 'x'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("does not exist on remote server"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn alter_add_existing_column_in_batch() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        let cfg = AuditConfig::default();

        run(GOOD_CREATE, &mut ctx, &mut stub, &cfg).await;
        let rec = run(
            "ALTER TABLE t ADD COLUMN name VARCHAR(16) NOT NULL DEFAULT '' COMMENT 'dup'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("already exists in 'shop.t'"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn tidb_rejects_multi_operation_alter() {
        let mut ctx = ctx();
        ctx.profile.db_type = DbType::Tidb;
        ctx.profile.major = 6;
        ctx.profile.minor = 5;
        let mut stub = StubProber::with_table("shop", "t", &["id"]);
        let cfg = AuditConfig::default();

        let rec = run(
            "ALTER TABLE t ADD COLUMN a INT NOT NULL DEFAULT 0 COMMENT 'a', \
             ADD COLUMN b INT NOT NULL DEFAULT 0 COMMENT 'b'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert_eq!(rec.errlevel, ErrLevel::Error);
        assert!(
            rec.errmsg.contains("TiDB does not support multiple operations"),
            "{}",
            rec.errmsg
        );
    }

    #[tokio::test]
    async fn varchar_shrink_detected_from_remote_shape() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id", "name"]);
        stub.set_column_type(
            "shop",
            "t",
            "name",
            RemoteColumnInfo {
                data_type: "varchar".into(),
                char_max_length: 200,
                numeric_precision: -1,
                numeric_scale: -1,
            },
        );
        let cfg = AuditConfig::default();

        let rec = run(
            "ALTER TABLE t MODIFY COLUMN name VARCHAR(50) NOT NULL DEFAULT '' COMMENT 'n'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("length reduced: 200 -> 50"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn update_without_where_and_row_estimate() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id", "x"]);
        stub.explain_estimate = Some(50_000);
        let cfg = AuditConfig::default();

        let rec = run("UPDATE t SET x = 1", &mut ctx, &mut stub, &cfg).await;
        assert_eq!(rec.errlevel, ErrLevel::Error);
        assert!(rec.errmsg.contains("UPDATE without a WHERE clause"), "{}", rec.errmsg);
        assert_eq!(rec.affected_rows, 50_000);
        assert!(rec.errmsg.contains("exceeds max 10000"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn in_clause_cap() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id", "x"]);
        let mut cfg = AuditConfig::default();
        cfg.in_count = 100;

        let items: Vec<String> = (0..1001).map(|i| (1000 + i).to_string()).collect();
        let sql = format!("UPDATE t SET x = 1 WHERE id IN ({})", items.join(","));
        let record = run(&sql, &mut ctx, &mut stub, &cfg).await;
        assert!(record.errmsg.contains("IN clause has 1001 items"), "{}", record.errmsg);
        // WHERE is present, so the finding stays at warning level.
        assert_eq!(record.errlevel, ErrLevel::Warning);
    }

    #[tokio::test]
    async fn insert_rules() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id", "x"]);
        let cfg = AuditConfig::default();

        let rec = run("INSERT INTO t VALUES (1, 2)", &mut ctx, &mut stub, &cfg).await;
        assert!(rec.errmsg.contains("explicit column list"), "{}", rec.errmsg);

        let rec = run(
            "INSERT INTO t (id, x) VALUES (1, 2, 3)",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("does not match value count 3"), "{}", rec.errmsg);

        let rec = run(
            "INSERT INTO t (id, id) VALUES (1, 2)",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("Duplicate column 'id'"), "{}", rec.errmsg);

        let rec = run(
            "INSERT INTO t (id, missing) VALUES (1, 2)",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("Column 'missing' does not exist"), "{}", rec.errmsg);

        let rec = run(
            "INSERT INTO t (id) SELECT id FROM t",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(
            rec.errmsg.contains("INSERT ... SELECT without a WHERE"),
            "{}",
            rec.errmsg
        );
    }

    #[tokio::test]
    async fn connectivity_failure_degrades_to_session_error() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        stub.down = true;
        let cfg = AuditConfig::default();

        let stmt = parse_one(GOOD_CREATE);
        let mut record = StatementRecord::new(1, GOOD_CREATE.to_string(), SqlKind::of(&stmt));
        audit_statement(
            &stmt,
            &mut record,
            &mut ctx,
            &mut stub,
            Some("Cannot connect to remote server 10.0.0.1:3306 (refused)."),
            &cfg,
        )
        .await;
        assert!(record.errmsg.contains("Cannot connect to remote server"));
        // Probes answered None: no false "already exists" findings.
        assert!(!record.errmsg.contains("already exists"), "{}", record.errmsg);
    }

    #[tokio::test]
    async fn must_have_columns_spec() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        let mut cfg = AuditConfig::default();
        cfg.must_have_columns =
            "id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT COMMENT; create_time DATETIME NOT NULL COMMENT"
                .into();

        let rec = run(GOOD_CREATE, &mut ctx, &mut stub, &cfg).await;
        assert!(
            rec.errmsg.contains("Required column is missing: create_time DATETIME NOT NULL COMMENT"),
            "{}",
            rec.errmsg
        );
        assert!(!rec.errmsg.contains("Required column 'id'"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn index_rules() {
        let mut ctx = ctx();
        let mut stub = StubProber::default();
        let cfg = AuditConfig::default();

        let rec = run(
            "CREATE TABLE t (\
             id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY COMMENT 'pk', \
             a INT NOT NULL DEFAULT 0 COMMENT 'a', \
             b TEXT, \
             KEY badname (a), \
             KEY idx_a_b (a, b)\
             ) ENGINE=InnoDB COMMENT='t'",
            &mut ctx,
            &mut stub,
            &cfg,
        )
        .await;
        assert!(rec.errmsg.contains("'badname' should have 'idx_' prefix"), "{}", rec.errmsg);
        assert!(
            rec.errmsg.contains("BLOB/TEXT column 'b' must specify a prefix length"),
            "{}",
            rec.errmsg
        );
        assert!(rec.errmsg.contains("is a prefix of"), "{}", rec.errmsg);
    }

    #[tokio::test]
    async fn drop_and_truncate_warnings() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id"]);
        stub.table_row_counts.insert("shop.t".into(), 1234);
        let cfg = AuditConfig::default();

        let rec = run("DROP TABLE t", &mut ctx, &mut stub, &cfg).await;
        assert_eq!(rec.errlevel, ErrLevel::Warning);
        assert!(rec.errmsg.contains("permanently remove"), "{}", rec.errmsg);

        let rec = run("TRUNCATE TABLE t", &mut ctx, &mut stub, &cfg).await;
        assert_eq!(rec.errlevel, ErrLevel::Warning);
        assert_eq!(rec.affected_rows, 1234);
    }

    #[tokio::test]
    async fn fingerprint_is_stable_across_literals() {
        let mut ctx = ctx();
        let mut stub = StubProber::with_table("shop", "t", &["id", "x"]);
        let cfg = AuditConfig::default();

        let a = run("UPDATE t SET x = 1 WHERE id = 5", &mut ctx, &mut stub, &cfg).await;
        let b = run("UPDATE t SET x = 9 WHERE id = 12345", &mut ctx, &mut stub, &cfg).await;
        assert_eq!(a.sqlsha1, b.sqlsha1);
    }
}
