//! Shims over the sqlparser AST: everything the audit engine and the
//! query-tree extractor need, extracted into plain structs so the rule
//! code dispatches on tags instead of digging through parser nodes.

use bitflags::bitflags;
use sqlparser::ast::{self, ObjectName, ObjectNamePart, Statement};

/* ================================================================
 *  Statement kind
 * ================================================================ */

/// Resolved command of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    CreateDatabase,
    DropDatabase,
    AlterDatabase,
    Use,
    CreateTable,
    AlterTable,
    DropTable,
    RenameTable,
    Truncate,
    CreateIndex,
    DropIndex,
    CreateView,
    DropView,
    CreateTrigger,
    DropTrigger,
    Insert,
    InsertSelect,
    Replace,
    ReplaceSelect,
    Update,
    Delete,
    Select,
    Set,
    CreateUser,
    DropUser,
    Grant,
    Revoke,
    LockTables,
    UnlockTables,
    Other,
    /// Parse failures and anything we never classified.
    Unknown,
}

impl SqlKind {
    pub fn name(self) -> &'static str {
        use SqlKind::*;
        match self {
            CreateDatabase => "CREATE_DATABASE",
            DropDatabase => "DROP_DATABASE",
            AlterDatabase => "ALTER_DATABASE",
            Use => "USE_DATABASE",
            CreateTable => "CREATE_TABLE",
            AlterTable => "ALTER_TABLE",
            DropTable => "DROP_TABLE",
            RenameTable => "RENAME_TABLE",
            Truncate => "TRUNCATE",
            CreateIndex => "CREATE_INDEX",
            DropIndex => "DROP_INDEX",
            CreateView => "CREATE_VIEW",
            DropView => "DROP_VIEW",
            CreateTrigger => "CREATE_TRIGGER",
            DropTrigger => "DROP_TRIGGER",
            Insert => "INSERT",
            InsertSelect => "INSERT_SELECT",
            Replace => "REPLACE",
            ReplaceSelect => "REPLACE_SELECT",
            Update => "UPDATE",
            Delete => "DELETE",
            Select => "SELECT",
            Set => "SET",
            CreateUser => "CREATE_USER",
            DropUser => "DROP_USER",
            Grant => "GRANT",
            Revoke => "REVOKE",
            LockTables => "LOCK_TABLES",
            UnlockTables => "UNLOCK_TABLES",
            Other => "OTHER",
            Unknown => "UNKNOWN",
        }
    }

    /// DDL for split-mode classification (table/index/view/trigger and
    /// database DDL).
    pub fn is_ddl(self) -> bool {
        use SqlKind::*;
        matches!(
            self,
            CreateTable
                | AlterTable
                | DropTable
                | RenameTable
                | Truncate
                | CreateIndex
                | DropIndex
                | CreateDatabase
                | DropDatabase
                | AlterDatabase
                | CreateView
                | DropView
                | CreateTrigger
                | DropTrigger
        )
    }

    /// Resolve the kind of a parsed statement.
    pub fn of(stmt: &Statement) -> SqlKind {
        match stmt {
            Statement::CreateDatabase { .. } => SqlKind::CreateDatabase,
            Statement::Drop { object_type, .. } => match object_type {
                ast::ObjectType::Schema | ast::ObjectType::Database => SqlKind::DropDatabase,
                ast::ObjectType::Table => SqlKind::DropTable,
                ast::ObjectType::Index => SqlKind::DropIndex,
                ast::ObjectType::View => SqlKind::DropView,
                _ => SqlKind::Other,
            },
            Statement::Use(_) => SqlKind::Use,
            Statement::CreateTable(_) => SqlKind::CreateTable,
            Statement::AlterTable(_) => SqlKind::AlterTable,
            Statement::Truncate { .. } => SqlKind::Truncate,
            Statement::RenameTable(_) => SqlKind::RenameTable,
            Statement::CreateIndex(_) => SqlKind::CreateIndex,
            Statement::CreateView { .. } => SqlKind::CreateView,
            Statement::CreateTrigger { .. } => SqlKind::CreateTrigger,
            Statement::DropTrigger { .. } => SqlKind::DropTrigger,
            Statement::Insert(insert) => {
                let has_select = insert
                    .source
                    .as_deref()
                    .map(|q| !matches!(*q.body, ast::SetExpr::Values(_)))
                    .unwrap_or(false);
                match (insert.replace_into, has_select) {
                    (true, true) => SqlKind::ReplaceSelect,
                    (true, false) => SqlKind::Replace,
                    (false, true) => SqlKind::InsertSelect,
                    (false, false) => SqlKind::Insert,
                }
            }
            Statement::Update { .. } => SqlKind::Update,
            Statement::Delete(_) => SqlKind::Delete,
            Statement::Query(_) => SqlKind::Select,
            Statement::Set(_) => SqlKind::Set,
            Statement::CreateUser(_) => SqlKind::CreateUser,
            Statement::Grant { .. } => SqlKind::Grant,
            Statement::Revoke { .. } => SqlKind::Revoke,
            Statement::LockTables { .. } => SqlKind::LockTables,
            Statement::UnlockTables => SqlKind::UnlockTables,
            _ => SqlKind::Other,
        }
    }
}

/* ================================================================
 *  Names
 * ================================================================ */

pub fn ident_name(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(ident) => ident.value.clone(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

/// Split a possibly-qualified object name into (db, table).
pub fn object_name_parts(name: &ObjectName) -> (Option<String>, String) {
    match name.0.len() {
        0 => (None, String::new()),
        1 => (None, ident_name(&name.0[0])),
        _ => (
            Some(ident_name(&name.0[0])),
            ident_name(&name.0[name.0.len() - 1]),
        ),
    }
}

/// Resolve (db, table) against the session's current database.
pub fn resolve_table(name: &ObjectName, current_db: Option<&str>) -> (String, String) {
    let (db, table) = object_name_parts(name);
    (
        db.or_else(|| current_db.map(str::to_string)).unwrap_or_default(),
        table,
    )
}

/// Database name of a USE statement.
pub fn use_db_name(u: &ast::Use) -> Option<String> {
    match u {
        ast::Use::Object(name) | ast::Use::Database(name) | ast::Use::Schema(name) => {
            Some(object_name_parts(name).1)
        }
        _ => None,
    }
}

fn table_factor_name(factor: &ast::TableFactor) -> Option<&ObjectName> {
    match factor {
        ast::TableFactor::Table { name, .. } => Some(name),
        _ => None,
    }
}

/// The statement's first (target) table, unresolved: `(db?, table)`.
/// Database-level DDL reports `(None, db)` through the name field of
/// the statement instead and returns None here.
pub fn primary_table(stmt: &Statement) -> Option<(Option<String>, String)> {
    let name: &ObjectName = match stmt {
        Statement::CreateTable(c) => &c.name,
        Statement::AlterTable { name, .. } => name,
        Statement::Drop { names, .. } => names.first()?,
        Statement::Truncate { table_names, .. } => &table_names.first()?.name,
        Statement::Insert(insert) => match &insert.table {
            ast::TableObject::TableName(name) => name,
            _ => return None,
        },
        Statement::Update { table, .. } => table_factor_name(&table.relation)?,
        Statement::Delete(delete) => {
            let tables = match &delete.from {
                ast::FromTable::WithFromKeyword(t) | ast::FromTable::WithoutKeyword(t) => t,
            };
            table_factor_name(&tables.first()?.relation)?
        }
        Statement::Query(query) => {
            let select = first_select(query)?;
            table_factor_name(&select.from.first()?.relation)?
        }
        Statement::CreateIndex(ci) => &ci.table_name,
        _ => return None,
    };
    Some(object_name_parts(name))
}

/// Name field of database-level DDL.
pub fn statement_db_name(stmt: &Statement) -> Option<String> {
    match stmt {
        Statement::CreateDatabase { db_name, .. } => Some(object_name_parts(db_name).1),
        Statement::Drop {
            object_type: ast::ObjectType::Schema | ast::ObjectType::Database,
            names,
            ..
        } => names.first().map(|n| object_name_parts(n).1),
        _ => None,
    }
}

/* ================================================================
 *  Column shape
 * ================================================================ */

/// Coarse column type classification — everything the rules care
/// about, detached from sqlparser's `DataType` zoo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Char,
    Varchar,
    TinyText,
    Text,
    MediumText,
    LongText,
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
    Date,
    Time,
    Datetime,
    Timestamp,
    Json,
    Enum,
    Set,
    Bit,
    Other,
}

impl TypeClass {
    pub fn display_name(self) -> &'static str {
        use TypeClass::*;
        match self {
            TinyInt => "TINYINT",
            SmallInt => "SMALLINT",
            MediumInt => "MEDIUMINT",
            Int => "INT",
            BigInt => "BIGINT",
            Float => "FLOAT",
            Double => "DOUBLE",
            Decimal => "DECIMAL",
            Char => "CHAR",
            Varchar => "VARCHAR",
            TinyText => "TINYTEXT",
            Text => "TEXT",
            MediumText => "MEDIUMTEXT",
            LongText => "LONGTEXT",
            TinyBlob => "TINYBLOB",
            Blob => "BLOB",
            MediumBlob => "MEDIUMBLOB",
            LongBlob => "LONGBLOB",
            Date => "DATE",
            Time => "TIME",
            Datetime => "DATETIME",
            Timestamp => "TIMESTAMP",
            Json => "JSON",
            Enum => "ENUM",
            Set => "SET",
            Bit => "BIT",
            Other => "UNKNOWN",
        }
    }

    /// BLOB and TEXT families share most exemptions (nullable /
    /// default rules) and the index prefix-length requirement.
    pub fn is_blob_or_text(self) -> bool {
        use TypeClass::*;
        matches!(
            self,
            TinyText | Text | MediumText | LongText | TinyBlob | Blob | MediumBlob | LongBlob
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, TypeClass::Char | TypeClass::Varchar)
    }

    /// Integer width rank for narrowing detection; 0 = not an integer.
    pub fn int_rank(self) -> u8 {
        use TypeClass::*;
        match self {
            TinyInt => 1,
            SmallInt => 2,
            MediumInt => 3,
            Int => 4,
            BigInt => 5,
            _ => 0,
        }
    }

    /// Rank from a remote `DATA_TYPE` string.
    pub fn int_rank_of_name(name: &str) -> u8 {
        match name.to_ascii_lowercase().as_str() {
            "tinyint" => 1,
            "smallint" => 2,
            "mediumint" => 3,
            "int" => 4,
            "bigint" => 5,
            _ => 0,
        }
    }

    pub fn is_blob_or_text_name(name: &str) -> bool {
        matches!(
            name.to_ascii_lowercase().as_str(),
            "tinyblob"
                | "blob"
                | "mediumblob"
                | "longblob"
                | "tinytext"
                | "text"
                | "mediumtext"
                | "longtext"
        )
    }

    /// Fixed key size in bytes for non-string types (index length
    /// accounting). Strings are width * charset bytes and handled by
    /// the caller.
    pub fn fixed_key_bytes(self) -> u64 {
        use TypeClass::*;
        match self {
            TinyInt => 1,
            SmallInt => 2,
            MediumInt => 3,
            Int => 4,
            BigInt => 8,
            Float => 4,
            Double => 8,
            Date => 3,
            Time => 3,
            Datetime => 8,
            Timestamp => 4,
            Bit => 8,
            _ => 8,
        }
    }

    /// Parse a type name from the must-have-columns config string.
    pub fn parse_name(s: &str) -> Option<TypeClass> {
        use TypeClass::*;
        Some(match s.to_ascii_lowercase().as_str() {
            "tinyint" => TinyInt,
            "smallint" => SmallInt,
            "mediumint" => MediumInt,
            "int" | "integer" => Int,
            "bigint" => BigInt,
            "float" => Float,
            "double" => Double,
            "decimal" => Decimal,
            "char" => Char,
            "varchar" => Varchar,
            "tinytext" => TinyText,
            "text" => Text,
            "mediumtext" => MediumText,
            "longtext" => LongText,
            "blob" => Blob,
            "date" => Date,
            "time" => Time,
            "datetime" => Datetime,
            "timestamp" => Timestamp,
            "json" => Json,
            _ => return None,
        })
    }

    /// Datetime-ish types compare equal regardless of fraction width.
    pub fn compatible(self, other: TypeClass) -> bool {
        self == other
    }
}

fn char_len(l: &Option<ast::CharacterLength>) -> Option<u64> {
    match l {
        Some(ast::CharacterLength::IntegerLength { length, .. }) => Some(*length),
        Some(ast::CharacterLength::Max) => None,
        None => None,
    }
}

fn classify_data_type(dt: &ast::DataType) -> (TypeClass, Option<u64>, bool) {
    use ast::DataType as D;
    use TypeClass::*;
    // (class, display width in characters, unsigned)
    match dt {
        D::TinyInt(n) => (TinyInt, *n, false),
        D::TinyIntUnsigned(n) => (TinyInt, *n, true),
        D::SmallInt(n) => (SmallInt, *n, false),
        D::SmallIntUnsigned(n) => (SmallInt, *n, true),
        D::MediumInt(n) => (MediumInt, *n, false),
        D::MediumIntUnsigned(n) => (MediumInt, *n, true),
        D::Int(n) | D::Integer(n) => (Int, *n, false),
        D::IntUnsigned(n) | D::IntegerUnsigned(n) => (Int, *n, true),
        D::BigInt(n) => (BigInt, *n, false),
        D::BigIntUnsigned(n) => (BigInt, *n, true),
        D::Float(_) | D::Real => (Float, None, false),
        D::Double(_) | D::DoublePrecision => (Double, None, false),
        D::Decimal(_) | D::Numeric(_) | D::Dec(_) => (Decimal, None, false),
        D::Char(l) | D::Character(l) => (Char, char_len(l), false),
        D::Varchar(l) | D::CharacterVarying(l) | D::CharVarying(l) => (Varchar, char_len(l), false),
        D::TinyText => (TinyText, None, false),
        D::Text => (Text, None, false),
        D::MediumText => (MediumText, None, false),
        D::LongText => (LongText, None, false),
        D::TinyBlob => (TinyBlob, None, false),
        D::Blob(_) => (Blob, None, false),
        D::MediumBlob => (MediumBlob, None, false),
        D::LongBlob => (LongBlob, None, false),
        D::Date => (Date, None, false),
        D::Time(_, _) => (Time, None, false),
        D::Datetime(_) => (Datetime, None, false),
        D::Timestamp(_, _) => (Timestamp, None, false),
        D::JSON => (Json, None, false),
        D::Enum(_, _) => (Enum, None, false),
        D::Set(_) => (Set, None, false),
        D::Bit(_) | D::BitVarying(_) => (Bit, None, false),
        _ => (Other, None, false),
    }
}

/// Everything the column rules need from one column definition.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub type_class: TypeClass,
    /// Display width in characters for CHAR/VARCHAR/int display.
    pub display_width: Option<u64>,
    pub unsigned: bool,
    pub nullable: bool,
    pub has_comment: bool,
    pub explicit_charset: bool,
    /// Any DEFAULT clause, literal or expression.
    pub has_default: bool,
    /// DEFAULT CURRENT_TIMESTAMP / NOW().
    pub default_now: bool,
    pub auto_increment: bool,
    /// Column-level PRIMARY KEY clause.
    pub is_primary: bool,
}

impl ColumnSpec {
    pub fn from_ast(col: &ast::ColumnDef) -> ColumnSpec {
        let options: Vec<&ast::ColumnOption> = col.options.iter().map(|o| &o.option).collect();
        ColumnSpec::from_parts(&col.name.value, &col.data_type, &options)
    }

    /// Build a spec from the loose pieces ALTER operations carry.
    pub fn from_parts(
        name: &str,
        data_type: &ast::DataType,
        options: &[&ast::ColumnOption],
    ) -> ColumnSpec {
        let (type_class, display_width, unsigned) = classify_data_type(data_type);

        let mut spec = ColumnSpec {
            name: name.to_string(),
            type_class,
            display_width,
            unsigned,
            nullable: true,
            has_comment: false,
            explicit_charset: false,
            has_default: false,
            default_now: false,
            auto_increment: false,
            is_primary: false,
        };

        for opt in options {
            match opt {
                ast::ColumnOption::NotNull => spec.nullable = false,
                ast::ColumnOption::Null => spec.nullable = true,
                ast::ColumnOption::Comment(_) => spec.has_comment = true,
                ast::ColumnOption::CharacterSet(_) | ast::ColumnOption::Collation(_) => {
                    spec.explicit_charset = true
                }
                ast::ColumnOption::Default(expr) => {
                    spec.has_default = true;
                    if is_now_expr(expr) {
                        spec.default_now = true;
                    }
                }
                ast::ColumnOption::Unique { is_primary: true, .. } => {
                    spec.is_primary = true;
                    spec.nullable = false;
                }
                ast::ColumnOption::DialectSpecific(tokens) => {
                    let text = tokens
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                        .to_ascii_lowercase();
                    if text.contains("auto_increment") {
                        spec.auto_increment = true;
                    }
                }
                _ => {}
            }
        }
        spec
    }
}

fn is_now_expr(expr: &ast::Expr) -> bool {
    let name = match expr {
        ast::Expr::Function(f) => f.name.to_string(),
        ast::Expr::Identifier(id) => id.value.clone(),
        _ => return false,
    };
    matches!(
        name.to_ascii_lowercase().as_str(),
        "current_timestamp" | "now" | "localtime" | "localtimestamp"
    )
}

/* ================================================================
 *  Table options (CREATE TABLE tail clauses)
 * ================================================================ */

/// ENGINE / COMMENT / AUTO_INCREMENT / charset distilled from the
/// CREATE TABLE options tail.
#[derive(Debug, Clone, Default)]
pub struct TableOptionsSummary {
    pub engine: Option<String>,
    pub has_comment: bool,
    pub auto_increment: Option<u64>,
    pub charset: Option<String>,
}

fn unquote_option_value(v: &str) -> String {
    v.trim()
        .trim_matches('\'')
        .trim_matches('"')
        .trim_matches('`')
        .to_string()
}

pub fn table_options_summary(create: &ast::CreateTable) -> TableOptionsSummary {
    let mut out = TableOptionsSummary::default();
    let list: &[ast::SqlOption] = match &create.table_options {
        ast::CreateTableOptions::None => &[],
        ast::CreateTableOptions::With(v)
        | ast::CreateTableOptions::Options(v)
        | ast::CreateTableOptions::Plain(v)
        | ast::CreateTableOptions::TableProperties(v) => v,
    };

    for opt in list {
        match opt {
            ast::SqlOption::Comment(_) => out.has_comment = true,
            ast::SqlOption::KeyValue { key, value } => {
                let k = key.value.to_ascii_uppercase();
                let v = unquote_option_value(&value.to_string());
                if k == "ENGINE" {
                    out.engine = Some(v);
                } else if k == "COMMENT" {
                    out.has_comment = true;
                } else if k == "AUTO_INCREMENT" {
                    out.auto_increment = v.parse().ok();
                } else if k.contains("CHARSET") || k.contains("CHARACTER") {
                    out.charset = Some(v);
                } else if k.contains("COLLATE") && out.charset.is_none() {
                    // utf8mb4_general_ci implies utf8mb4.
                    out.charset = v.split('_').next().map(str::to_string);
                }
            }
            ast::SqlOption::NamedParenthesizedList(named) => {
                let k = named.key.value.to_ascii_uppercase();
                if k == "ENGINE" {
                    out.engine = named.name.as_ref().map(|i| i.value.clone());
                }
            }
            _ => {
                let text = opt.to_string().to_ascii_uppercase();
                if text.starts_with("COMMENT") {
                    out.has_comment = true;
                }
            }
        }
    }
    out
}

/* ================================================================
 *  Query helpers
 * ================================================================ */

/// First SELECT block of a query (through nested parens, left branch
/// of set operations).
pub fn first_select(query: &ast::Query) -> Option<&ast::Select> {
    fn of_body(body: &ast::SetExpr) -> Option<&ast::Select> {
        match body {
            ast::SetExpr::Select(s) => Some(s),
            ast::SetExpr::Query(q) => of_body(&q.body),
            ast::SetExpr::SetOperation { left, .. } => of_body(left),
            _ => None,
        }
    }
    of_body(&query.body)
}

/// ORDER BY expressions, when the query has explicit ones.
pub fn order_exprs(query: &ast::Query) -> &[ast::OrderByExpr] {
    match &query.order_by {
        Some(ob) => match &ob.kind {
            ast::OrderByKind::Expressions(v) => v,
            _ => &[],
        },
        None => &[],
    }
}

/// GROUP BY expressions of one SELECT block.
pub fn group_exprs(select: &ast::Select) -> &[ast::Expr] {
    match &select.group_by {
        ast::GroupByExpr::Expressions(v, _) => v,
        _ => &[],
    }
}

/* ================================================================
 *  Index shape
 * ================================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    Multiple,
    Foreign,
    Fulltext,
}

#[derive(Debug, Clone)]
pub struct IndexPart {
    pub column: String,
    pub prefix_len: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub kind: IndexKind,
    pub parts: Vec<IndexPart>,
}

fn index_part(col: &ast::IndexColumn) -> Option<IndexPart> {
    match &col.column.expr {
        ast::Expr::Identifier(ident) => Some(IndexPart {
            column: ident.value.clone(),
            prefix_len: None,
        }),
        // `KEY idx_t (t(10))` parses the part as a call.
        ast::Expr::Function(f) => {
            let column = f.name.to_string().trim_matches('`').to_string();
            let prefix_len = first_numeric_arg(f);
            Some(IndexPart { column, prefix_len })
        }
        _ => None,
    }
}

fn first_numeric_arg(f: &ast::Function) -> Option<u64> {
    if let ast::FunctionArguments::List(list) = &f.args {
        for arg in &list.args {
            if let ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(ast::Expr::Value(v))) = arg
            {
                if let ast::Value::Number(n, _) = &v.value {
                    return n.parse().ok();
                }
            }
        }
    }
    None
}

impl IndexSpec {
    /// Extract an index from a table constraint (CREATE TABLE body or
    /// ALTER TABLE ADD). Returns None for CHECK and other
    /// non-index constraints.
    pub fn from_constraint(c: &ast::TableConstraint) -> Option<IndexSpec> {
        match c {
            ast::TableConstraint::PrimaryKey { name, columns, .. } => Some(IndexSpec {
                name: name.as_ref().map(|i| i.value.clone()),
                kind: IndexKind::Primary,
                parts: columns.iter().filter_map(index_part).collect(),
            }),
            ast::TableConstraint::Unique {
                name,
                index_name,
                columns,
                ..
            } => Some(IndexSpec {
                name: name
                    .as_ref()
                    .or(index_name.as_ref())
                    .map(|i| i.value.clone()),
                kind: IndexKind::Unique,
                parts: columns.iter().filter_map(index_part).collect(),
            }),
            ast::TableConstraint::Index { name, columns, .. } => Some(IndexSpec {
                name: name.as_ref().map(|i| i.value.clone()),
                kind: IndexKind::Multiple,
                parts: columns.iter().filter_map(index_part).collect(),
            }),
            ast::TableConstraint::ForeignKey { name, columns, .. } => Some(IndexSpec {
                name: name.as_ref().map(|i| i.value.clone()),
                kind: IndexKind::Foreign,
                parts: columns
                    .iter()
                    .map(|c| IndexPart {
                        column: c.value.clone(),
                        prefix_len: None,
                    })
                    .collect(),
            }),
            ast::TableConstraint::FulltextOrSpatial {
                opt_index_name,
                columns,
                ..
            } => Some(IndexSpec {
                name: opt_index_name.as_ref().map(|i| i.value.clone()),
                kind: IndexKind::Fulltext,
                parts: columns.iter().filter_map(index_part).collect(),
            }),
            _ => None,
        }
    }
}

/* ================================================================
 *  ALTER TABLE operation flags
 * ================================================================ */

bitflags! {
    /// Operation categories present in one ALTER TABLE statement.
    /// Drives both the `sub_type` column and the DDL algorithm
    /// prediction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlterOp: u32 {
        const ADD_COLUMN        = 1 << 0;
        const DROP_COLUMN       = 1 << 1;
        const CHANGE_COLUMN     = 1 << 2;
        const CHANGE_DEFAULT    = 1 << 3;
        const COLUMN_ORDER      = 1 << 4;
        const ADD_INDEX         = 1 << 5;
        const DROP_INDEX        = 1 << 6;
        const RENAME_INDEX      = 1 << 7;
        const INDEX_VISIBILITY  = 1 << 8;
        const RENAME            = 1 << 9;
        const RENAME_COLUMN     = 1 << 10;
        const ORDER             = 1 << 11;
        const OPTIONS           = 1 << 12;
        const OPTIONS_ENGINE    = 1 << 13;
        const KEYS_ONOFF        = 1 << 14;
        const FORCE             = 1 << 15;
        const PARTITION         = 1 << 16;
        const TABLESPACE        = 1 << 17;
        const COLUMN_VISIBILITY = 1 << 18;
    }
}

impl AlterOp {
    /// Names in the order the sub_type string lists them.
    pub fn sub_type(self) -> String {
        const NAMES: &[(AlterOp, &str)] = &[
            (AlterOp::ADD_COLUMN, "ADD_COLUMN"),
            (AlterOp::DROP_COLUMN, "DROP_COLUMN"),
            (AlterOp::CHANGE_COLUMN, "MODIFY_COLUMN"),
            (AlterOp::CHANGE_DEFAULT, "CHANGE_DEFAULT"),
            (AlterOp::COLUMN_ORDER, "COLUMN_ORDER"),
            (AlterOp::ADD_INDEX, "ADD_INDEX"),
            (AlterOp::DROP_INDEX, "DROP_INDEX"),
            (AlterOp::RENAME_INDEX, "RENAME_INDEX"),
            (AlterOp::INDEX_VISIBILITY, "INDEX_VISIBILITY"),
            (AlterOp::RENAME, "RENAME"),
            (AlterOp::RENAME_COLUMN, "RENAME_COLUMN"),
            (AlterOp::ORDER, "ORDER"),
            (AlterOp::OPTIONS, "OPTIONS"),
            (AlterOp::KEYS_ONOFF, "KEYS_ONOFF"),
            (AlterOp::FORCE, "FORCE"),
            (AlterOp::PARTITION, "PARTITION"),
            (AlterOp::TABLESPACE, "TABLESPACE"),
            (AlterOp::COLUMN_VISIBILITY, "COLUMN_VISIBILITY"),
        ];
        let mut out = String::new();
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                if !out.is_empty() {
                    out.push(',');
                }
                out.push_str(name);
            }
        }
        if out.is_empty() {
            out.push_str("OTHER");
        }
        out
    }

    /// Predict the worst-case DDL algorithm for the combined
    /// operations: INSTANT (0), INPLACE (1), COPY (2).
    pub fn predict_algorithm(self, major_version: u32) -> &'static str {
        let is_80 = major_version >= 8;
        let mut worst = 0u8;
        let mut raise = |level: u8, on: bool| {
            if on && level > worst {
                worst = level;
            }
        };

        raise(if is_80 { 0 } else { 1 }, self.contains(AlterOp::ADD_COLUMN));
        raise(1, self.contains(AlterOp::DROP_COLUMN));
        raise(2, self.contains(AlterOp::CHANGE_COLUMN));
        raise(0, self.contains(AlterOp::CHANGE_DEFAULT));
        raise(1, self.contains(AlterOp::COLUMN_ORDER));
        raise(1, self.contains(AlterOp::ADD_INDEX));
        raise(1, self.contains(AlterOp::DROP_INDEX));
        raise(1, self.contains(AlterOp::RENAME_INDEX));
        raise(1, self.contains(AlterOp::INDEX_VISIBILITY));
        raise(0, self.contains(AlterOp::RENAME));
        raise(if is_80 { 0 } else { 1 }, self.contains(AlterOp::RENAME_COLUMN));
        raise(2, self.contains(AlterOp::ORDER));
        if self.contains(AlterOp::OPTIONS) {
            raise(2, self.contains(AlterOp::OPTIONS_ENGINE));
            raise(0, !self.contains(AlterOp::OPTIONS_ENGINE));
        }
        raise(1, self.contains(AlterOp::KEYS_ONOFF));
        raise(2, self.contains(AlterOp::FORCE));
        raise(2, self.contains(AlterOp::PARTITION));
        raise(1, self.contains(AlterOp::TABLESPACE));
        raise(0, self.contains(AlterOp::COLUMN_VISIBILITY));

        match worst {
            0 => "INSTANT",
            1 => "INPLACE",
            _ => "COPY",
        }
    }

    /// Collect flags from the parsed operation list.
    pub fn from_operations(ops: &[ast::AlterTableOperation]) -> AlterOp {
        use ast::AlterTableOperation as Op;
        let mut flags = AlterOp::empty();
        for op in ops {
            match op {
                Op::AddColumn { column_position, .. } => {
                    flags |= AlterOp::ADD_COLUMN;
                    if column_position.is_some() {
                        flags |= AlterOp::COLUMN_ORDER;
                    }
                }
                Op::DropColumn { .. } => flags |= AlterOp::DROP_COLUMN,
                Op::ModifyColumn { column_position, .. } => {
                    flags |= AlterOp::CHANGE_COLUMN;
                    if column_position.is_some() {
                        flags |= AlterOp::COLUMN_ORDER;
                    }
                }
                Op::ChangeColumn { column_position, .. } => {
                    flags |= AlterOp::CHANGE_COLUMN;
                    if column_position.is_some() {
                        flags |= AlterOp::COLUMN_ORDER;
                    }
                }
                Op::RenameColumn { .. } => flags |= AlterOp::RENAME_COLUMN,
                Op::RenameTable { .. } => flags |= AlterOp::RENAME,
                Op::AddConstraint { .. } => flags |= AlterOp::ADD_INDEX,
                Op::DropConstraint { .. } | Op::DropPrimaryKey { .. } => flags |= AlterOp::DROP_INDEX,
                Op::AlterColumn { op, .. } => match op {
                    ast::AlterColumnOperation::SetDefault { .. }
                    | ast::AlterColumnOperation::DropDefault => flags |= AlterOp::CHANGE_DEFAULT,
                    _ => flags |= AlterOp::CHANGE_COLUMN,
                },
                Op::SetTblProperties { table_properties } => {
                    flags |= AlterOp::OPTIONS;
                    for prop in table_properties {
                        if prop.to_string().to_ascii_lowercase().contains("engine") {
                            flags |= AlterOp::OPTIONS_ENGINE;
                        }
                    }
                }
                Op::AddPartitions { .. } | Op::DropPartitions { .. } => {
                    flags |= AlterOp::PARTITION
                }
                // The long tail of operations is classified by its
                // rendered form; parser versions disagree on which of
                // these get dedicated variants.
                other => {
                    let text = other.to_string().to_ascii_uppercase();
                    if text.starts_with("DROP INDEX") || text.starts_with("DROP KEY") {
                        flags |= AlterOp::DROP_INDEX;
                    } else if text.starts_with("RENAME INDEX") || text.starts_with("RENAME KEY") {
                        flags |= AlterOp::RENAME_INDEX;
                    } else if text.starts_with("ALTER INDEX") {
                        flags |= AlterOp::INDEX_VISIBILITY;
                    } else if text.starts_with("ORDER BY") {
                        flags |= AlterOp::ORDER;
                    } else if text.starts_with("AUTO_INCREMENT")
                        || text.starts_with("ENGINE")
                        || text.starts_with("COMMENT")
                    {
                        flags |= AlterOp::OPTIONS;
                        if text.starts_with("ENGINE") {
                            flags |= AlterOp::OPTIONS_ENGINE;
                        }
                    } else if text.starts_with("ALGORITHM") || text.starts_with("LOCK") {
                        // Advisory clauses, not operations.
                    }
                }
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;

    fn parse_one(sql: &str) -> Statement {
        Parser::parse_sql(&MySqlDialect {}, sql)
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn kind_resolution() {
        assert_eq!(SqlKind::of(&parse_one("SELECT 1")), SqlKind::Select);
        assert_eq!(
            SqlKind::of(&parse_one("INSERT INTO t (a) VALUES (1)")),
            SqlKind::Insert
        );
        assert_eq!(
            SqlKind::of(&parse_one("INSERT INTO t (a) SELECT a FROM s WHERE a > 0")),
            SqlKind::InsertSelect
        );
        assert_eq!(
            SqlKind::of(&parse_one("CREATE TABLE t (id INT)")),
            SqlKind::CreateTable
        );
        assert_eq!(SqlKind::of(&parse_one("DROP TABLE t")), SqlKind::DropTable);
        assert_eq!(
            SqlKind::of(&parse_one("CREATE DATABASE d")),
            SqlKind::CreateDatabase
        );
        assert!(SqlKind::of(&parse_one("ALTER TABLE t ADD COLUMN x INT")).is_ddl());
    }

    #[test]
    fn column_spec_extraction() {
        let stmt = parse_one(
            "CREATE TABLE t (\
             id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT COMMENT 'pk', \
             name VARCHAR(32) NOT NULL DEFAULT '' COMMENT 'n', \
             ts TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
             payload JSON)",
        );
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CREATE TABLE")
        };
        let cols: Vec<ColumnSpec> = create.columns.iter().map(ColumnSpec::from_ast).collect();

        assert_eq!(cols[0].type_class, TypeClass::BigInt);
        assert!(cols[0].unsigned);
        assert!(cols[0].auto_increment);
        assert!(!cols[0].nullable);
        assert!(cols[0].has_comment);

        assert_eq!(cols[1].type_class, TypeClass::Varchar);
        assert_eq!(cols[1].display_width, Some(32));
        assert!(cols[1].has_default);

        assert_eq!(cols[2].type_class, TypeClass::Timestamp);
        assert!(cols[2].default_now);

        assert_eq!(cols[3].type_class, TypeClass::Json);
        assert!(cols[3].nullable);
    }

    #[test]
    fn index_spec_extraction() {
        let stmt = parse_one(
            "CREATE TABLE t (id INT, b TEXT, \
             PRIMARY KEY (id), \
             UNIQUE KEY uniq_b (b(16)), \
             KEY idx_id_b (id, b(8)))",
        );
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CREATE TABLE")
        };
        let specs: Vec<IndexSpec> = create
            .constraints
            .iter()
            .filter_map(IndexSpec::from_constraint)
            .collect();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].kind, IndexKind::Primary);
        assert_eq!(specs[1].kind, IndexKind::Unique);
        assert_eq!(specs[1].parts[0].prefix_len, Some(16));
        assert_eq!(specs[2].kind, IndexKind::Multiple);
        assert_eq!(specs[2].parts[1].column, "b");
        assert_eq!(specs[2].parts[1].prefix_len, Some(8));
    }

    #[test]
    fn alter_flags_and_sub_type() {
        let stmt = parse_one("ALTER TABLE t ADD COLUMN x INT, ADD KEY idx_x (x)");
        let Statement::AlterTable(alter) = stmt else {
            panic!("expected ALTER TABLE")
        };
        let flags = AlterOp::from_operations(&alter.operations);
        assert!(flags.contains(AlterOp::ADD_COLUMN));
        assert!(flags.contains(AlterOp::ADD_INDEX));
        assert_eq!(flags.sub_type(), "ADD_COLUMN,ADD_INDEX");
    }

    #[test]
    fn algorithm_prediction_table() {
        let add = AlterOp::ADD_COLUMN;
        assert_eq!(add.predict_algorithm(8), "INSTANT");
        assert_eq!(add.predict_algorithm(5), "INPLACE");

        let add_and_index = AlterOp::ADD_COLUMN | AlterOp::ADD_INDEX;
        assert_eq!(add_and_index.predict_algorithm(8), "INPLACE");

        assert_eq!(
            (add_and_index | AlterOp::FORCE).predict_algorithm(8),
            "COPY"
        );
        assert_eq!(
            (add_and_index | AlterOp::OPTIONS | AlterOp::OPTIONS_ENGINE).predict_algorithm(8),
            "COPY"
        );
        assert_eq!(AlterOp::RENAME.predict_algorithm(8), "INSTANT");
        assert_eq!(
            (AlterOp::OPTIONS).predict_algorithm(8),
            "INSTANT",
            "comment-only options stay INSTANT"
        );
        assert_eq!(AlterOp::CHANGE_COLUMN.predict_algorithm(8), "COPY");
        assert_eq!(AlterOp::PARTITION.predict_algorithm(8), "COPY");
    }
}
