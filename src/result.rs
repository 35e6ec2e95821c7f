//! Result-set assembly: the 15-column audit report plus the
//! mode-specific shapes (split, query-tree, sessions, encrypt,
//! sqltypes).

use crate::ast::SqlKind;
use crate::session::{SessionContext, SessionInfo, Stage, StatementRecord};
use opensrv_mysql::{Column, ColumnFlags, ColumnType};

/// One cell of an outgoing result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    UInt(u64),
    Text(String),
    Null,
}

/// Columns + rows, ready for the wire writer.
#[derive(Debug)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

/// What one intercepted query produces.
#[derive(Debug)]
pub enum QueryOutput {
    Ok { affected_rows: u64, info: String },
    Rows(ResultSet),
}

impl QueryOutput {
    pub fn ok() -> Self {
        QueryOutput::Ok {
            affected_rows: 0,
            info: String::new(),
        }
    }
}

fn col(name: &str, coltype: ColumnType) -> Column {
    Column {
        table: String::new(),
        column: name.to_string(),
        coltype,
        colflags: ColumnFlags::empty(),
    }
}

fn text_col(name: &str) -> Column {
    col(name, ColumnType::MYSQL_TYPE_VAR_STRING)
}

fn int_col(name: &str) -> Column {
    col(name, ColumnType::MYSQL_TYPE_LONGLONG)
}

/* ================================================================
 *  Check / execute report (15 columns)
 * ================================================================ */

fn stage_name(record: &StatementRecord) -> &'static str {
    match record.stage {
        Stage::Checked => "CHECKED",
        Stage::Executed => match record.kind {
            SqlKind::Set | SqlKind::Use => "RERUN",
            _ => "EXECUTED",
        },
        Stage::Skipped => "SKIPPED",
        Stage::None => "NONE",
    }
}

fn sql_type_name(record: &StatementRecord) -> String {
    let base = record.kind.name();
    if record.sub_type.is_empty() {
        base.to_string()
    } else {
        format!("{base}.{}", record.sub_type)
    }
}

/// The commit-time report for check and execute modes.
pub fn audit_result(ctx: &SessionContext, profile_unknown: bool) -> ResultSet {
    let columns = vec![
        int_col("id"),
        text_col("stage"),
        int_col("err_level"),
        text_col("stage_status"),
        text_col("err_message"),
        text_col("sql_text"),
        int_col("affected_rows"),
        text_col("sequence"),
        text_col("backup_dbname"),
        text_col("execute_time"),
        text_col("sql_sha1"),
        text_col("sql_type"),
        text_col("ddl_algorithm"),
        text_col("db_type"),
        text_col("db_version"),
    ];

    let (db_type, db_version) = if profile_unknown {
        ("Unknown".to_string(), String::new())
    } else {
        (
            ctx.profile.db_type.name().to_string(),
            format!("{}.{}", ctx.profile.major, ctx.profile.minor),
        )
    };

    let rows = ctx
        .statements
        .iter()
        .map(|record| {
            vec![
                Cell::Int(record.id as i64),
                Cell::Text(stage_name(record).to_string()),
                Cell::Int(record.errlevel as i64),
                Cell::Text(record.stage_status.clone()),
                Cell::Text(if record.errmsg.is_empty() {
                    "None".to_string()
                } else {
                    record.errmsg.clone()
                }),
                Cell::Text(record.sql_text.clone()),
                Cell::Int(record.affected_rows),
                Cell::Text(record.sequence.clone()),
                Cell::Text(record.backup_dbname.clone()),
                Cell::Text(record.execute_time.clone()),
                Cell::Text(record.sqlsha1.clone()),
                Cell::Text(sql_type_name(record)),
                Cell::Text(record.ddl_algorithm.clone()),
                Cell::Text(db_type.clone()),
                Cell::Text(db_version.clone()),
            ]
        })
        .collect();

    ResultSet { columns, rows }
}

/* ================================================================
 *  Split / query-tree results
 * ================================================================ */

pub fn split_result(ctx: &SessionContext) -> ResultSet {
    let columns = vec![int_col("id"), text_col("sql_statement"), int_col("ddlflag")];
    let rows = ctx
        .splits
        .iter()
        .enumerate()
        .map(|(i, group)| {
            vec![
                Cell::Int(i as i64 + 1),
                Cell::Text(group.sql_text.clone()),
                Cell::Int(group.ddlflag),
            ]
        })
        .collect();
    ResultSet { columns, rows }
}

pub fn query_tree_result(ctx: &SessionContext) -> ResultSet {
    let columns = vec![int_col("id"), text_col("sql_text"), text_col("query_tree")];
    let rows = ctx
        .trees
        .iter()
        .map(|t| {
            vec![
                Cell::Int(t.id as i64),
                Cell::Text(t.sql_text.clone()),
                Cell::Text(t.tree_json.clone()),
            ]
        })
        .collect();
    ResultSet { columns, rows }
}

/* ================================================================
 *  Admin results
 * ================================================================ */

pub fn sessions_result(sessions: &[SessionInfo]) -> ResultSet {
    let columns = vec![
        int_col("thread_id"),
        text_col("host"),
        int_col("port"),
        text_col("user"),
        text_col("mode"),
        text_col("db_type"),
        int_col("sleep_ms"),
        int_col("total_sql"),
        int_col("executed_sql"),
        text_col("elapsed"),
        int_col("threads_running"),
        text_col("repl_delay"),
    ];
    let rows = sessions
        .iter()
        .map(|s| {
            vec![
                Cell::Int(s.thread_id as i64),
                Cell::Text(s.host.clone()),
                Cell::Int(s.port as i64),
                Cell::Text(s.user.clone()),
                Cell::Text(s.mode.clone()),
                Cell::Text(s.db_type.clone()),
                Cell::UInt(s.sleep_ms),
                Cell::Int(s.total_sql as i64),
                Cell::Int(s.executed_sql as i64),
                Cell::Text(format!("{:.1}s", s.elapsed_sec)),
                Cell::Int(s.threads_running as i64),
                Cell::Text(if s.repl_delay < 0 {
                    "-".to_string()
                } else {
                    format!("{}s", s.repl_delay)
                }),
            ]
        })
        .collect();
    ResultSet { columns, rows }
}

pub fn encrypt_password_result(encrypted: String) -> ResultSet {
    ResultSet {
        columns: vec![text_col("encrypted_password")],
        rows: vec![vec![Cell::Text(encrypted)]],
    }
}

/* ================================================================
 *  `inception get sqltypes` catalogue
 * ================================================================ */

struct SqlTypeEntry {
    name: &'static str,
    description: &'static str,
    audited: bool,
}

const SQL_TYPES: &[SqlTypeEntry] = &[
    SqlTypeEntry { name: "CREATE_TABLE", description: "Create a new table", audited: true },
    SqlTypeEntry { name: "ALTER_TABLE", description: "Alter table structure", audited: true },
    SqlTypeEntry { name: "DROP_TABLE", description: "Drop a table", audited: true },
    SqlTypeEntry { name: "RENAME_TABLE", description: "Rename a table", audited: false },
    SqlTypeEntry { name: "TRUNCATE", description: "Truncate a table", audited: true },
    SqlTypeEntry { name: "CREATE_INDEX", description: "Create an index", audited: false },
    SqlTypeEntry { name: "DROP_INDEX", description: "Drop an index", audited: false },
    SqlTypeEntry { name: "CREATE_DATABASE", description: "Create a new database", audited: true },
    SqlTypeEntry { name: "DROP_DATABASE", description: "Drop a database", audited: true },
    SqlTypeEntry { name: "ALTER_DATABASE", description: "Alter database attributes", audited: false },
    SqlTypeEntry { name: "USE_DATABASE", description: "Switch current database (USE)", audited: true },
    SqlTypeEntry { name: "INSERT", description: "Insert rows", audited: true },
    SqlTypeEntry { name: "INSERT_SELECT", description: "Insert rows from SELECT", audited: true },
    SqlTypeEntry { name: "REPLACE", description: "Replace rows", audited: true },
    SqlTypeEntry { name: "REPLACE_SELECT", description: "Replace rows from SELECT", audited: true },
    SqlTypeEntry { name: "UPDATE", description: "Update rows", audited: true },
    SqlTypeEntry { name: "DELETE", description: "Delete rows", audited: true },
    SqlTypeEntry { name: "SELECT", description: "Select query", audited: true },
    SqlTypeEntry { name: "SET", description: "Set session/global variable", audited: false },
    SqlTypeEntry { name: "CREATE_VIEW", description: "Create a view", audited: false },
    SqlTypeEntry { name: "DROP_VIEW", description: "Drop a view", audited: false },
    SqlTypeEntry { name: "CREATE_TRIGGER", description: "Create a trigger", audited: false },
    SqlTypeEntry { name: "DROP_TRIGGER", description: "Drop a trigger", audited: false },
    SqlTypeEntry { name: "CREATE_USER", description: "Create a user account", audited: false },
    SqlTypeEntry { name: "DROP_USER", description: "Drop a user account", audited: false },
    SqlTypeEntry { name: "GRANT", description: "Grant privileges", audited: false },
    SqlTypeEntry { name: "REVOKE", description: "Revoke privileges", audited: false },
    SqlTypeEntry { name: "LOCK_TABLES", description: "Lock tables", audited: false },
    SqlTypeEntry { name: "UNLOCK_TABLES", description: "Unlock tables", audited: false },
];

const ALTER_SUB_TYPES: &[SqlTypeEntry] = &[
    SqlTypeEntry { name: "ADD_COLUMN", description: "Add new column(s)", audited: true },
    SqlTypeEntry { name: "DROP_COLUMN", description: "Drop column(s)", audited: true },
    SqlTypeEntry { name: "MODIFY_COLUMN", description: "Modify/change column definition", audited: true },
    SqlTypeEntry { name: "CHANGE_DEFAULT", description: "Change column default value", audited: false },
    SqlTypeEntry { name: "COLUMN_ORDER", description: "Reorder columns (FIRST/AFTER)", audited: false },
    SqlTypeEntry { name: "ADD_INDEX", description: "Add new index", audited: true },
    SqlTypeEntry { name: "DROP_INDEX", description: "Drop index", audited: true },
    SqlTypeEntry { name: "RENAME_INDEX", description: "Rename index", audited: false },
    SqlTypeEntry { name: "INDEX_VISIBILITY", description: "Change index visibility", audited: false },
    SqlTypeEntry { name: "RENAME", description: "Rename table", audited: true },
    SqlTypeEntry { name: "RENAME_COLUMN", description: "Rename column", audited: true },
    SqlTypeEntry { name: "ORDER", description: "ORDER BY clause", audited: false },
    SqlTypeEntry { name: "OPTIONS", description: "Change table options (ENGINE, COMMENT, etc.)", audited: true },
    SqlTypeEntry { name: "KEYS_ONOFF", description: "Enable/disable keys", audited: false },
    SqlTypeEntry { name: "FORCE", description: "Force table rebuild", audited: false },
    SqlTypeEntry { name: "PARTITION", description: "Partition maintenance", audited: false },
    SqlTypeEntry { name: "TABLESPACE", description: "Discard/import tablespace", audited: false },
    SqlTypeEntry { name: "COLUMN_VISIBILITY", description: "Change column visibility", audited: false },
];

pub fn sqltypes_result() -> ResultSet {
    let columns = vec![text_col("sqltype"), text_col("description"), text_col("audited")];
    let mut rows = Vec::new();
    for entry in SQL_TYPES {
        rows.push(vec![
            Cell::Text(entry.name.to_string()),
            Cell::Text(entry.description.to_string()),
            Cell::Text(if entry.audited { "YES" } else { "NO" }.to_string()),
        ]);
        if entry.name == "ALTER_TABLE" {
            for sub in ALTER_SUB_TYPES {
                rows.push(vec![
                    Cell::Text(format!("ALTER_TABLE.{}", sub.name)),
                    Cell::Text(sub.description.to_string()),
                    Cell::Text(if sub.audited { "YES" } else { "NO" }.to_string()),
                ]);
            }
        }
    }
    ResultSet { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionControl, SplitGroup, StatementRecord, TreeRecord};

    fn ctx() -> SessionContext {
        SessionContext::new(SessionControl::new(1))
    }

    #[test]
    fn audit_result_shapes_fifteen_columns() {
        let mut ctx = ctx();
        let mut rec = StatementRecord::new(1, "CREATE TABLE t (id INT)".into(), SqlKind::CreateTable);
        rec.stage = Stage::Checked;
        rec.stage_status = "Audit completed".into();
        ctx.push_statement(rec);

        let rs = audit_result(&ctx, false);
        assert_eq!(rs.columns.len(), 15);
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0][1], Cell::Text("CHECKED".into()));
        assert_eq!(rs.rows[0][4], Cell::Text("None".into()), "empty message shows None");
        assert_eq!(rs.rows[0][13], Cell::Text("MySQL".into()));
        assert_eq!(rs.rows[0][14], Cell::Text("8.0".into()));
    }

    #[test]
    fn unknown_profile_when_remote_unreachable() {
        let mut ctx = ctx();
        ctx.push_statement(StatementRecord::new(1, "SELECT 1".into(), SqlKind::Select));
        let rs = audit_result(&ctx, true);
        assert_eq!(rs.rows[0][13], Cell::Text("Unknown".into()));
        assert_eq!(rs.rows[0][14], Cell::Text(String::new()));
    }

    #[test]
    fn rerun_stage_for_use_and_set() {
        let mut ctx = ctx();
        let mut rec = StatementRecord::new(1, "USE shop".into(), SqlKind::Use);
        rec.stage = Stage::Executed;
        ctx.push_statement(rec);
        let rs = audit_result(&ctx, false);
        assert_eq!(rs.rows[0][1], Cell::Text("RERUN".into()));
    }

    #[test]
    fn sub_type_extends_sql_type() {
        let mut ctx = ctx();
        let mut rec = StatementRecord::new(1, "ALTER TABLE t ADD COLUMN x INT".into(), SqlKind::AlterTable);
        rec.sub_type = "ADD_COLUMN,ADD_INDEX".into();
        ctx.push_statement(rec);
        let rs = audit_result(&ctx, false);
        assert_eq!(
            rs.rows[0][11],
            Cell::Text("ALTER_TABLE.ADD_COLUMN,ADD_INDEX".into())
        );
    }

    #[test]
    fn split_rows_number_from_one() {
        let mut ctx = ctx();
        ctx.splits.push(SplitGroup {
            sql_text: "USE shop;\nINSERT INTO o VALUES (1);\n".into(),
            db_name: "shop".into(),
            table_name: "o".into(),
            ddlflag: 0,
            is_ddl: false,
        });
        ctx.splits.push(SplitGroup {
            sql_text: "USE shop;\nALTER TABLE o ADD COLUMN y INT;\n".into(),
            db_name: "shop".into(),
            table_name: "o".into(),
            ddlflag: 1,
            is_ddl: true,
        });
        let rs = split_result(&ctx);
        assert_eq!(rs.rows[0][0], Cell::Int(1));
        assert_eq!(rs.rows[1][0], Cell::Int(2));
        assert_eq!(rs.rows[1][2], Cell::Int(1));
    }

    #[test]
    fn tree_rows_carry_json() {
        let mut ctx = ctx();
        ctx.trees.push(TreeRecord {
            id: 1,
            sql_text: "SELECT 1".into(),
            tree_json: "{\"sql_type\":\"SELECT\"}".into(),
        });
        let rs = query_tree_result(&ctx);
        assert_eq!(rs.columns.len(), 3);
        assert_eq!(rs.rows[0][2], Cell::Text("{\"sql_type\":\"SELECT\"}".into()));
    }

    #[test]
    fn sqltypes_catalogue_includes_alter_subtypes() {
        let rs = sqltypes_result();
        let names: Vec<String> = rs
            .rows
            .iter()
            .map(|r| match &r[0] {
                Cell::Text(s) => s.clone(),
                _ => String::new(),
            })
            .collect();
        assert!(names.contains(&"CREATE_TABLE".to_string()));
        assert!(names.contains(&"ALTER_TABLE.ADD_COLUMN".to_string()));
        let alter_pos = names.iter().position(|n| n == "ALTER_TABLE").unwrap();
        assert_eq!(names[alter_pos + 1], "ALTER_TABLE.ADD_COLUMN");
    }
}
