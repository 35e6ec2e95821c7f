//! Query-tree extraction: walk a DML AST into a JSON document of
//! tables and columns organized by usage. Star projections expand
//! against the remote schema when it is reachable; otherwise the
//! `expanded` field is omitted.

use crate::ast::{self, SqlKind};
use crate::remote::SchemaProber;
use serde::Serialize;
use serde_json::json;
use sqlparser::ast::{self as past, Statement};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct TableRef {
    pub db: String,
    pub table: String,
    pub alias: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnRef {
    pub db: String,
    pub table: String,
    pub column: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expanded: Vec<String>,
}

#[derive(Debug, Default)]
struct TreeBuild {
    sql_type: String,
    tables: Vec<TableRef>,
    columns: BTreeMap<String, Vec<ColumnRef>>,
}

impl TreeBuild {
    fn bucket(&mut self, name: &str) -> &mut Vec<ColumnRef> {
        self.columns.entry(name.to_string()).or_default()
    }
}

/* ================================================================
 *  Block-local table list
 * ================================================================ */

#[derive(Debug, Clone)]
struct BlockTable {
    db: String,
    table: String,
    alias: String,
    derived: bool,
}

#[derive(Debug, Default, Clone)]
struct BlockTables {
    entries: Vec<BlockTable>,
}

impl BlockTables {
    /// Match a qualifier against aliases first, then real names.
    fn resolve(&self, qualifier: &str) -> Option<(&str, &str)> {
        for t in &self.entries {
            if !t.alias.is_empty() && t.alias.eq_ignore_ascii_case(qualifier) {
                return Some((&t.db, &t.table));
            }
        }
        for t in &self.entries {
            if t.table.eq_ignore_ascii_case(qualifier) {
                return Some((&t.db, &t.table));
            }
        }
        None
    }

    /// The single non-derived table of the block, if unambiguous.
    fn single(&self) -> Option<&BlockTable> {
        let mut found = None;
        for t in &self.entries {
            if t.derived {
                continue;
            }
            if found.is_some() {
                return None;
            }
            found = Some(t);
        }
        found
    }
}

fn join_condition(join: &past::Join) -> Option<&past::Expr> {
    use past::JoinOperator as J;
    let constraint = match &join.join_operator {
        J::Join(c) | J::Inner(c) | J::LeftOuter(c) | J::RightOuter(c) | J::FullOuter(c) => c,
        _ => return None,
    };
    match constraint {
        past::JoinConstraint::On(expr) => Some(expr),
        _ => None,
    }
}

/* ================================================================
 *  Walker
 * ================================================================ */

struct Walker<'a> {
    default_db: Option<&'a str>,
}

impl<'a> Walker<'a> {
    fn table_name_parts(&self, name: &past::ObjectName) -> (String, String) {
        let (db, table) = ast::object_name_parts(name);
        (
            db.or_else(|| self.default_db.map(str::to_string))
                .unwrap_or_default(),
            table,
        )
    }

    /// Register the FROM list of one block: fills the outer table list
    /// and the block-local resolution table, and walks derived
    /// subqueries in depth.
    fn collect_tables(
        &self,
        from: &[past::TableWithJoins],
        write_table: Option<&str>,
        build: &mut TreeBuild,
        block: &mut BlockTables,
    ) {
        let mut factors: Vec<&past::TableFactor> = Vec::new();
        for twj in from {
            factors.push(&twj.relation);
            for join in &twj.joins {
                factors.push(&join.relation);
            }
        }

        for factor in factors {
            match factor {
                past::TableFactor::Table { name, alias, .. } => {
                    let (db, table) = self.table_name_parts(name);
                    let alias_name = alias
                        .as_ref()
                        .map(|a| a.name.value.clone())
                        .unwrap_or_default();
                    let alias_name = if alias_name.eq_ignore_ascii_case(&table) {
                        String::new()
                    } else {
                        alias_name
                    };
                    let kind = if write_table
                        .map(|w| table.eq_ignore_ascii_case(w))
                        .unwrap_or(false)
                    {
                        "write"
                    } else {
                        "read"
                    };
                    block.entries.push(BlockTable {
                        db: db.clone(),
                        table: table.clone(),
                        alias: alias_name.clone(),
                        derived: false,
                    });
                    build.tables.push(TableRef {
                        db,
                        table,
                        alias: alias_name,
                        kind: kind.into(),
                    });
                }
                past::TableFactor::Derived { subquery, alias, .. } => {
                    block.entries.push(BlockTable {
                        db: String::new(),
                        table: String::new(),
                        alias: alias
                            .as_ref()
                            .map(|a| a.name.value.clone())
                            .unwrap_or_default(),
                        derived: true,
                    });
                    // Inner blocks contribute to the outer lists.
                    self.walk_query(subquery, build);
                }
                past::TableFactor::NestedJoin {
                    table_with_joins, ..
                } => {
                    self.collect_tables(
                        std::slice::from_ref(table_with_joins),
                        write_table,
                        build,
                        block,
                    );
                }
                _ => {}
            }
        }
    }

    fn push_field(
        &self,
        qualifier: Option<&str>,
        explicit_db: Option<&str>,
        column: &str,
        block: &BlockTables,
        out: &mut Vec<ColumnRef>,
    ) {
        let mut db = explicit_db.unwrap_or_default().to_string();
        let mut table = String::new();

        if let Some(q) = qualifier {
            if let Some((rdb, rtable)) = block.resolve(q) {
                if db.is_empty() {
                    db = rdb.to_string();
                }
                table = rtable.to_string();
            } else {
                table = q.to_string();
            }
        } else if let Some(single) = block.single() {
            db = single.db.clone();
            table = single.table.clone();
        }

        if db.is_empty() {
            if let Some(d) = self.default_db {
                if !table.is_empty() {
                    db = d.to_string();
                }
            }
        }

        out.push(ColumnRef {
            db,
            table,
            column: column.to_string(),
            expanded: Vec::new(),
        });
    }

    /// Recursive expression walk collecting field references;
    /// subqueries are processed in depth, their tables appended to the
    /// outer list and their columns merged into the current bucket.
    fn walk_expr(
        &self,
        expr: &past::Expr,
        block: &BlockTables,
        build: &mut TreeBuild,
        out: &mut Vec<ColumnRef>,
    ) {
        use past::Expr as E;
        match expr {
            E::Identifier(ident) => {
                self.push_field(None, None, &ident.value, block, out);
            }
            E::CompoundIdentifier(parts) => match parts.len() {
                2 => self.push_field(Some(&parts[0].value), None, &parts[1].value, block, out),
                3 => self.push_field(
                    Some(&parts[1].value),
                    Some(&parts[0].value),
                    &parts[2].value,
                    block,
                    out,
                ),
                _ => {}
            },
            E::BinaryOp { left, right, .. } => {
                self.walk_expr(left, block, build, out);
                self.walk_expr(right, block, build, out);
            }
            E::UnaryOp { expr, .. }
            | E::Nested(expr)
            | E::IsNull(expr)
            | E::IsNotNull(expr)
            | E::IsTrue(expr)
            | E::IsFalse(expr) => {
                self.walk_expr(expr, block, build, out);
            }
            E::Cast { expr, .. } => self.walk_expr(expr, block, build, out),
            E::Between {
                expr, low, high, ..
            } => {
                self.walk_expr(expr, block, build, out);
                self.walk_expr(low, block, build, out);
                self.walk_expr(high, block, build, out);
            }
            E::Like { expr, pattern, .. } | E::ILike { expr, pattern, .. } => {
                self.walk_expr(expr, block, build, out);
                self.walk_expr(pattern, block, build, out);
            }
            E::InList { expr, list, .. } => {
                self.walk_expr(expr, block, build, out);
                for item in list {
                    self.walk_expr(item, block, build, out);
                }
            }
            E::InSubquery { expr, subquery, .. } => {
                self.walk_expr(expr, block, build, out);
                self.walk_subquery_into(subquery, build, out);
            }
            E::Exists { subquery, .. } | E::Subquery(subquery) => {
                self.walk_subquery_into(subquery, build, out);
            }
            E::Function(f) => {
                if let past::FunctionArguments::List(list) = &f.args {
                    for arg in &list.args {
                        match arg {
                            past::FunctionArg::Unnamed(past::FunctionArgExpr::Expr(e)) => {
                                self.walk_expr(e, block, build, out)
                            }
                            past::FunctionArg::Named {
                                arg: past::FunctionArgExpr::Expr(e),
                                ..
                            } => self.walk_expr(e, block, build, out),
                            _ => {}
                        }
                    }
                }
            }
            E::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                if let Some(op) = operand {
                    self.walk_expr(op, block, build, out);
                }
                for when in conditions {
                    self.walk_expr(&when.condition, block, build, out);
                    self.walk_expr(&when.result, block, build, out);
                }
                if let Some(e) = else_result {
                    self.walk_expr(e, block, build, out);
                }
            }
            E::Tuple(items) => {
                for item in items {
                    self.walk_expr(item, block, build, out);
                }
            }
            _ => {}
        }
    }

    /// An expression-position subquery: its blocks' tables land in the
    /// outer table list, its referenced columns in the current bucket.
    fn walk_subquery_into(
        &self,
        query: &past::Query,
        build: &mut TreeBuild,
        out: &mut Vec<ColumnRef>,
    ) {
        for select in selects_of(query) {
            let mut block = BlockTables::default();
            self.collect_tables(&select.from, None, build, &mut block);

            for item in &select.projection {
                if let Some(expr) = projection_expr(item) {
                    self.walk_expr(expr, &block, build, out);
                }
            }
            if let Some(cond) = &select.selection {
                self.walk_expr(cond, &block, build, out);
            }
            for twj in &select.from {
                for join in &twj.joins {
                    if let Some(cond) = join_condition(join) {
                        self.walk_expr(cond, &block, build, out);
                    }
                }
            }
            for expr in ast::group_exprs(select) {
                self.walk_expr(expr, &block, build, out);
            }
            if let Some(having) = &select.having {
                self.walk_expr(having, &block, build, out);
            }
        }
    }

    /// A full SELECT query: per-branch blocks with the SELECT buckets.
    fn walk_query(&self, query: &past::Query, build: &mut TreeBuild) {
        for select in selects_of(query) {
            let mut block = BlockTables::default();
            self.collect_tables(&select.from, None, build, &mut block);

            // SELECT list, with star handling.
            let mut select_cols = Vec::new();
            for item in &select.projection {
                match item {
                    past::SelectItem::Wildcard(_) => {
                        for t in block.entries.iter().filter(|t| !t.derived) {
                            select_cols.push(ColumnRef {
                                db: t.db.clone(),
                                table: t.table.clone(),
                                column: "*".into(),
                                expanded: Vec::new(),
                            });
                        }
                    }
                    past::SelectItem::QualifiedWildcard(kind, _) => {
                        let qualifier = qualified_wildcard_name(kind);
                        let mut col = ColumnRef {
                            db: String::new(),
                            table: String::new(),
                            column: "*".into(),
                            expanded: Vec::new(),
                        };
                        if let Some((db, table)) = block.resolve(&qualifier) {
                            col.db = db.to_string();
                            col.table = table.to_string();
                        } else {
                            col.table = qualifier;
                        }
                        if col.db.is_empty() {
                            if let Some(d) = self.default_db {
                                col.db = d.to_string();
                            }
                        }
                        select_cols.push(col);
                    }
                    _ => {
                        if let Some(expr) = projection_expr(item) {
                            self.walk_expr(expr, &block, build, &mut select_cols);
                        }
                    }
                }
            }
            build.bucket("select").append(&mut select_cols);

            if let Some(cond) = &select.selection {
                let mut cols = Vec::new();
                self.walk_expr(cond, &block, build, &mut cols);
                build.bucket("where").append(&mut cols);
            }

            let mut join_cols = Vec::new();
            for twj in &select.from {
                for join in &twj.joins {
                    if let Some(cond) = join_condition(join) {
                        self.walk_expr(cond, &block, build, &mut join_cols);
                    }
                }
            }
            if !join_cols.is_empty() {
                build.bucket("join").append(&mut join_cols);
            }

            let groups = ast::group_exprs(select);
            if !groups.is_empty() {
                let mut cols = Vec::new();
                for expr in groups {
                    self.walk_expr(expr, &block, build, &mut cols);
                }
                build.bucket("group_by").append(&mut cols);
            }

            if let Some(having) = &select.having {
                let mut cols = Vec::new();
                self.walk_expr(having, &block, build, &mut cols);
                build.bucket("having").append(&mut cols);
            }

            // ORDER BY sits on the query; resolve it against this
            // branch's tables.
            let orders = ast::order_exprs(query);
            if !orders.is_empty() {
                let mut cols = Vec::new();
                for ord in orders {
                    self.walk_expr(&ord.expr, &block, build, &mut cols);
                }
                build.bucket("order_by").append(&mut cols);
            }
        }
    }
}

fn selects_of(query: &past::Query) -> Vec<&past::Select> {
    fn collect<'q>(body: &'q past::SetExpr, out: &mut Vec<&'q past::Select>) {
        match body {
            past::SetExpr::Select(s) => out.push(s),
            past::SetExpr::Query(q) => collect(&q.body, out),
            past::SetExpr::SetOperation { left, right, .. } => {
                collect(left, out);
                collect(right, out);
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    collect(&query.body, &mut out);
    out
}

fn projection_expr(item: &past::SelectItem) -> Option<&past::Expr> {
    match item {
        past::SelectItem::UnnamedExpr(e) => Some(e),
        past::SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        _ => None,
    }
}

fn qualified_wildcard_name(kind: &past::SelectItemQualifiedWildcardKind) -> String {
    match kind {
        past::SelectItemQualifiedWildcardKind::ObjectName(name) => {
            ast::object_name_parts(name).1
        }
        past::SelectItemQualifiedWildcardKind::Expr(e) => e.to_string(),
    }
}

/* ================================================================
 *  Per-statement shapes
 * ================================================================ */

fn build_tree(stmt: &Statement, default_db: Option<&str>) -> TreeBuild {
    let walker = Walker { default_db };
    let mut build = TreeBuild::default();
    let kind = SqlKind::of(stmt);

    match stmt {
        Statement::Query(query) => {
            build.sql_type = "SELECT".into();
            walker.walk_query(query, &mut build);
        }

        Statement::Insert(insert) => {
            build.sql_type = match kind {
                SqlKind::Replace | SqlKind::ReplaceSelect => "REPLACE".into(),
                _ => "INSERT".into(),
            };

            let target = match &insert.table {
                past::TableObject::TableName(name) => Some(walker.table_name_parts(name)),
                _ => None,
            };
            let mut target_block = BlockTables::default();
            if let Some((db, table)) = &target {
                build.tables.push(TableRef {
                    db: db.clone(),
                    table: table.clone(),
                    alias: String::new(),
                    kind: "write".into(),
                });
                target_block.entries.push(BlockTable {
                    db: db.clone(),
                    table: table.clone(),
                    alias: String::new(),
                    derived: false,
                });
            }

            let mut insert_cols = Vec::new();
            for col in &insert.columns {
                walker.push_field(None, None, &col.value, &target_block, &mut insert_cols);
            }
            if !insert_cols.is_empty() {
                build.bucket("insert_columns").append(&mut insert_cols);
            }

            // INSERT ... SELECT: the read side contributes the SELECT
            // buckets. The write-side target is already listed; the
            // read list keeps every source occurrence.
            if let Some(query) = insert.source.as_deref() {
                if !matches!(&*query.body, past::SetExpr::Values(_)) {
                    walker.walk_query(query, &mut build);
                }
            }
        }

        Statement::Update { table, assignments, from, selection, .. } => {
            build.sql_type = "UPDATE".into();
            let write_table = match &table.relation {
                past::TableFactor::Table { name, .. } => Some(ast::object_name_parts(name).1),
                _ => None,
            };

            let mut block = BlockTables::default();
            walker.collect_tables(
                std::slice::from_ref(table),
                write_table.as_deref(),
                &mut build,
                &mut block,
            );
            if let Some(from_clause) = from {
                let tables = match from_clause {
                    past::UpdateTableFromKind::BeforeSet(t)
                    | past::UpdateTableFromKind::AfterSet(t) => t,
                };
                walker.collect_tables(tables, None, &mut build, &mut block);
            }

            let mut set_cols = Vec::new();
            let mut value_cols = Vec::new();
            for assignment in assignments {
                if let past::AssignmentTarget::ColumnName(name) = &assignment.target {
                    let (qualifier, column) = match name.0.len() {
                        0 => (None, String::new()),
                        1 => (None, ast::ident_name(&name.0[0])),
                        // t.c or db.t.c — the part before the column
                        // resolves like any field qualifier.
                        _ => (
                            Some(ast::ident_name(&name.0[name.0.len() - 2])),
                            ast::ident_name(&name.0[name.0.len() - 1]),
                        ),
                    };
                    walker.push_field(qualifier.as_deref(), None, &column, &block, &mut set_cols);
                }
                walker.walk_expr(&assignment.value, &block, &mut build, &mut value_cols);
            }
            build.bucket("set").append(&mut set_cols);
            if !value_cols.is_empty() {
                build.bucket("set_values").append(&mut value_cols);
            }

            if let Some(cond) = selection {
                let mut cols = Vec::new();
                walker.walk_expr(cond, &block, &mut build, &mut cols);
                build.bucket("where").append(&mut cols);
            }

            let mut join_cols = Vec::new();
            for join in &table.joins {
                if let Some(cond) = join_condition(join) {
                    walker.walk_expr(cond, &block, &mut build, &mut join_cols);
                }
            }
            if !join_cols.is_empty() {
                build.bucket("join").append(&mut join_cols);
            }
        }

        Statement::Delete(delete) => {
            build.sql_type = "DELETE".into();
            let tables = match &delete.from {
                past::FromTable::WithFromKeyword(t) | past::FromTable::WithoutKeyword(t) => t,
            };
            let write_table = tables.first().and_then(|t| match &t.relation {
                past::TableFactor::Table { name, .. } => Some(ast::object_name_parts(name).1),
                _ => None,
            });

            let mut block = BlockTables::default();
            walker.collect_tables(tables, write_table.as_deref(), &mut build, &mut block);

            if let Some(cond) = &delete.selection {
                let mut cols = Vec::new();
                walker.walk_expr(cond, &block, &mut build, &mut cols);
                build.bucket("where").append(&mut cols);
            }

            let mut join_cols = Vec::new();
            for twj in tables {
                for join in &twj.joins {
                    if let Some(cond) = join_condition(join) {
                        walker.walk_expr(cond, &block, &mut build, &mut join_cols);
                    }
                }
            }
            if !join_cols.is_empty() {
                build.bucket("join").append(&mut join_cols);
            }
        }

        // DDL and the rest: the target table with write intent.
        other => {
            build.sql_type = kind.name().to_string();
            if let Some((db, table)) = ast::primary_table(other) {
                build.tables.push(TableRef {
                    db: db
                        .or_else(|| default_db.map(str::to_string))
                        .unwrap_or_default(),
                    table,
                    alias: String::new(),
                    kind: "write".into(),
                });
            }
        }
    }

    build
}

/* ================================================================
 *  Public entry
 * ================================================================ */

/// Extract the query tree of one statement as a JSON string. The only
/// remote access is `information_schema.COLUMNS` for star expansion.
pub async fn extract_query_tree(
    stmt: &Statement,
    default_db: Option<&str>,
    prober: &mut dyn SchemaProber,
) -> String {
    let mut build = build_tree(stmt, default_db);

    for cols in build.columns.values_mut() {
        for col in cols.iter_mut() {
            if col.column == "*" && !col.table.is_empty() && !col.db.is_empty() {
                if let Some(expanded) = prober.column_list(&col.db, &col.table).await {
                    col.expanded = expanded;
                }
            }
        }
    }

    json!({
        "sql_type": build.sql_type,
        "tables": build.tables,
        "columns": build.columns,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::StubProber;
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;

    fn parse_one(sql: &str) -> Statement {
        Parser::parse_sql(&MySqlDialect {}, sql)
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    async fn tree(sql: &str, db: Option<&str>, prober: &mut StubProber) -> serde_json::Value {
        let stmt = parse_one(sql);
        let json = extract_query_tree(&stmt, db, prober).await;
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn select_with_where_and_alias() {
        let mut stub = StubProber::default();
        let v = tree(
            "SELECT o.amount FROM orders o WHERE o.status = 'paid' AND qty > 3",
            Some("shop"),
            &mut stub,
        )
        .await;

        assert_eq!(v["sql_type"], "SELECT");
        assert_eq!(v["tables"][0]["table"], "orders");
        assert_eq!(v["tables"][0]["alias"], "o");
        assert_eq!(v["tables"][0]["type"], "read");
        assert_eq!(v["columns"]["select"][0]["column"], "amount");
        assert_eq!(v["columns"]["select"][0]["table"], "orders");
        assert_eq!(v["columns"]["select"][0]["db"], "shop");
        // Unqualified qty attributes to the single table.
        let where_cols = v["columns"]["where"].as_array().unwrap();
        assert!(where_cols.iter().any(|c| c["column"] == "qty" && c["table"] == "orders"));
    }

    #[tokio::test]
    async fn star_expansion_uses_remote_schema() {
        let mut stub = StubProber::with_table("shop", "orders", &["id", "status", "amount"]);
        let v = tree("SELECT * FROM orders", Some("shop"), &mut stub).await;
        let col = &v["columns"]["select"][0];
        assert_eq!(col["column"], "*");
        assert_eq!(
            col["expanded"],
            serde_json::json!(["id", "status", "amount"])
        );
    }

    #[tokio::test]
    async fn star_expansion_omitted_when_remote_down() {
        let mut stub = StubProber::default();
        stub.down = true;
        let v = tree("SELECT * FROM orders", Some("shop"), &mut stub).await;
        let col = &v["columns"]["select"][0];
        assert_eq!(col["column"], "*");
        assert!(col.get("expanded").is_none(), "expanded omitted on failure");
    }

    #[tokio::test]
    async fn update_buckets() {
        let mut stub = StubProber::default();
        let v = tree(
            "UPDATE orders SET amount = price * qty WHERE id = 7",
            Some("shop"),
            &mut stub,
        )
        .await;
        assert_eq!(v["sql_type"], "UPDATE");
        assert_eq!(v["tables"][0]["type"], "write");
        assert_eq!(v["columns"]["set"][0]["column"], "amount");
        let values: Vec<_> = v["columns"]["set_values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["column"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["price", "qty"]);
        assert_eq!(v["columns"]["where"][0]["column"], "id");
    }

    #[tokio::test]
    async fn insert_select_lists_both_sides() {
        let mut stub = StubProber::default();
        let v = tree(
            "INSERT INTO archive (id, total) SELECT id, amount FROM orders WHERE done = 1",
            Some("shop"),
            &mut stub,
        )
        .await;
        assert_eq!(v["sql_type"], "INSERT");
        let tables = v["tables"].as_array().unwrap();
        assert_eq!(tables[0]["table"], "archive");
        assert_eq!(tables[0]["type"], "write");
        assert!(tables.iter().any(|t| t["table"] == "orders" && t["type"] == "read"));
        let ins = v["columns"]["insert_columns"].as_array().unwrap();
        assert_eq!(ins.len(), 2);
        assert_eq!(ins[0]["table"], "archive");
        assert_eq!(v["columns"]["where"][0]["column"], "done");
    }

    #[tokio::test]
    async fn subquery_tables_append_to_outer() {
        let mut stub = StubProber::default();
        let v = tree(
            "SELECT id FROM orders WHERE user_id IN (SELECT id FROM users WHERE vip = 1)",
            Some("shop"),
            &mut stub,
        )
        .await;
        let tables = v["tables"].as_array().unwrap();
        assert!(tables.iter().any(|t| t["table"] == "users"));
        let where_cols = v["columns"]["where"].as_array().unwrap();
        assert!(where_cols.iter().any(|c| c["column"] == "vip" && c["table"] == "users"));
    }

    #[tokio::test]
    async fn union_branches_are_processed() {
        let mut stub = StubProber::default();
        let v = tree(
            "SELECT id FROM a WHERE x = 1 UNION SELECT id FROM b WHERE y = 2",
            Some("shop"),
            &mut stub,
        )
        .await;
        let tables = v["tables"].as_array().unwrap();
        assert_eq!(tables.len(), 2);
        let where_cols = v["columns"]["where"].as_array().unwrap();
        assert!(where_cols.iter().any(|c| c["column"] == "x"));
        assert!(where_cols.iter().any(|c| c["column"] == "y"));
    }

    #[tokio::test]
    async fn ddl_reports_write_table_only() {
        let mut stub = StubProber::default();
        let v = tree("ALTER TABLE orders ADD COLUMN note TEXT", Some("shop"), &mut stub).await;
        assert_eq!(v["sql_type"], "ALTER_TABLE");
        assert_eq!(v["tables"][0]["type"], "write");
        assert_eq!(v["columns"], serde_json::json!({}));
    }
}
