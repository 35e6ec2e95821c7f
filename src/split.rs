//! Split mode: fold the statement stream into groups of consecutive
//! statements that target the same (db, table) and share a DDL/DML
//! class. Each group replays independently, prefixed with the USE that
//! restores its database context.

use crate::ast::{self, SqlKind};
use crate::session::{SessionContext, SplitGroup};
use sqlparser::ast::Statement;

/// Fold one statement into the split cache. `USE` only moves the
/// database context; `SET` is dropped entirely.
pub fn fold_statement(ctx: &mut SessionContext, stmt: &Statement, sql_text: &str) {
    let kind = SqlKind::of(stmt);

    if kind == SqlKind::Use {
        if let Statement::Use(u) = stmt {
            if let Some(db) = ast::use_db_name(u) {
                ctx.current_db = Some(db);
            }
        }
        return;
    }
    if kind == SqlKind::Set {
        return;
    }

    let (db_name, table_name) = match ast::primary_table(stmt) {
        Some((db, table)) => (
            db.or_else(|| ctx.current_db.clone()).unwrap_or_default(),
            table,
        ),
        // Database-level DDL carries its name in the statement itself.
        None => (ast::statement_db_name(stmt).unwrap_or_default(), String::new()),
    };

    let is_ddl = kind.is_ddl();
    let ddlflag = i64::from(matches!(kind, SqlKind::AlterTable | SqlKind::DropTable));

    if let Some(last) = ctx.splits.last_mut() {
        if last.table_name == table_name && last.db_name == db_name && last.is_ddl == is_ddl {
            last.sql_text.push_str(sql_text);
            last.sql_text.push_str(";\n");
            if ddlflag == 1 {
                last.ddlflag = 1;
            }
            return;
        }
    }

    let mut text = String::new();
    if let Some(current) = &ctx.current_db {
        text.push_str(&format!("USE {current};\n"));
    } else if !db_name.is_empty() {
        text.push_str(&format!("USE {db_name};\n"));
    }
    text.push_str(sql_text);
    text.push_str(";\n");

    ctx.splits.push(SplitGroup {
        sql_text: text,
        db_name,
        table_name,
        ddlflag,
        is_ddl,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionControl;
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;

    fn ctx() -> SessionContext {
        SessionContext::new(SessionControl::new(1))
    }

    fn fold(ctx: &mut SessionContext, sql: &str) {
        let stmt = Parser::parse_sql(&MySqlDialect {}, sql)
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        fold_statement(ctx, &stmt, sql);
    }

    #[test]
    fn groups_by_table_and_class() {
        let mut ctx = ctx();
        fold(&mut ctx, "USE shop");
        fold(&mut ctx, "INSERT INTO o VALUES (1)");
        fold(&mut ctx, "INSERT INTO o VALUES (2)");
        fold(&mut ctx, "ALTER TABLE o ADD COLUMN y INT");

        assert_eq!(ctx.splits.len(), 2);
        assert_eq!(
            ctx.splits[0].sql_text,
            "USE shop;\nINSERT INTO o VALUES (1);\nINSERT INTO o VALUES (2);\n"
        );
        assert_eq!(ctx.splits[0].ddlflag, 0);
        assert_eq!(
            ctx.splits[1].sql_text,
            "USE shop;\nALTER TABLE o ADD COLUMN y INT;\n"
        );
        assert_eq!(ctx.splits[1].ddlflag, 1);
    }

    #[test]
    fn different_tables_do_not_merge() {
        let mut ctx = ctx();
        fold(&mut ctx, "USE shop");
        fold(&mut ctx, "INSERT INTO a VALUES (1)");
        fold(&mut ctx, "INSERT INTO b VALUES (1)");
        fold(&mut ctx, "INSERT INTO a VALUES (2)");
        assert_eq!(ctx.splits.len(), 3, "non-consecutive groups stay separate");
    }

    #[test]
    fn set_is_dropped_and_use_produces_no_row() {
        let mut ctx = ctx();
        fold(&mut ctx, "SET NAMES utf8mb4");
        fold(&mut ctx, "USE shop");
        assert!(ctx.splits.is_empty());
        assert_eq!(ctx.current_db.as_deref(), Some("shop"));
    }

    #[test]
    fn ddlflag_escalates_for_drop_table() {
        let mut ctx = ctx();
        fold(&mut ctx, "USE shop");
        fold(&mut ctx, "CREATE TABLE t (id INT)");
        // CREATE is DDL class but flag 0; a DROP of the same table
        // merges and escalates.
        fold(&mut ctx, "DROP TABLE t");
        assert_eq!(ctx.splits.len(), 1);
        assert_eq!(ctx.splits[0].ddlflag, 1);
    }

    #[test]
    fn grouping_is_idempotent_over_grouped_text() {
        // Re-feeding a grouped DML body yields one group again.
        let mut ctx1 = ctx();
        fold(&mut ctx1, "USE shop");
        fold(&mut ctx1, "INSERT INTO o VALUES (1)");
        fold(&mut ctx1, "INSERT INTO o VALUES (2)");
        let text = ctx1.splits[0].sql_text.clone();

        let mut ctx2 = ctx();
        for piece in crate::sqltext::split_statements(&text) {
            fold(&mut ctx2, piece.trim());
        }
        assert_eq!(ctx2.splits.len(), 1);
        assert_eq!(ctx2.splits[0].sql_text, text);
    }
}
