mod common;

use mysql::prelude::*;
use mysql::Row;

const CREATE_OK: &str = "CREATE TABLE t (\
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY COMMENT 'pk', \
    name VARCHAR(32) NOT NULL DEFAULT '' COMMENT 'n'\
    ) ENGINE=InnoDB COMMENT='t'";

#[test]
fn check_mode_reports_one_row_per_statement() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start(""))?;
    conn.query_drop("USE shop")?;
    conn.query_drop(CREATE_OK)?;

    let rows: Vec<Row> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 2);

    // Row 2 is the CREATE TABLE.
    let row = &rows[1];
    let id: i64 = row.get(0).unwrap();
    let stage: String = row.get(1).unwrap();
    let err_level: i64 = row.get(2).unwrap();
    let err_message: String = row.get(4).unwrap();
    let sql_type: String = row.get(11).unwrap();
    let sha1: String = row.get(10).unwrap();
    let db_type: String = row.get(13).unwrap();

    assert_eq!(id, 2);
    assert_eq!(stage, "CHECKED");
    // The remote is unreachable, so the connectivity finding raises
    // the statement to error.
    assert_eq!(err_level, 2);
    assert!(err_message.contains("Cannot connect to remote server"));
    assert_eq!(sql_type, "CREATE_TABLE");
    assert_eq!(sha1.len(), 40);
    assert_eq!(db_type, "Unknown", "profile unknown without a remote");
    Ok(())
}

#[test]
fn parse_errors_consume_to_the_next_semicolon() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start(""))?;
    conn.query_drop("THIS IS NOT SQL; SELECT 1")?;

    let rows: Vec<Row> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 2);

    let msg: String = rows[0].get(4).unwrap();
    assert!(msg.contains("SQL parse error"));
    let sql_type: String = rows[1].get(11).unwrap();
    assert_eq!(sql_type, "SELECT", "batch continues after the bad piece");
    Ok(())
}

#[test]
fn alter_sub_type_and_algorithm_columns() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start(""))?;
    conn.query_drop("USE shop")?;
    conn.query_drop("ALTER TABLE t ADD COLUMN x INT NOT NULL DEFAULT 0 COMMENT 'x'")?;

    let rows: Vec<Row> = conn.query(common::MAGIC_COMMIT)?;
    let row = &rows[1];
    let sql_type: String = row.get(11).unwrap();
    let algorithm: String = row.get(12).unwrap();
    assert_eq!(sql_type, "ALTER_TABLE.ADD_COLUMN");
    assert_eq!(algorithm, "INSTANT");
    Ok(())
}

#[test]
fn batch_schema_suppresses_remote_probes() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start(""))?;
    conn.query_drop("USE shop")?;
    conn.query_drop(CREATE_OK)?;
    conn.query_drop("ALTER TABLE t ADD COLUMN x INT NOT NULL DEFAULT 0 COMMENT 'x'")?;
    conn.query_drop("INSERT INTO t (id, name, x) VALUES (1, 'a', 2)")?;

    let rows: Vec<Row> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 4);

    // The ALTER and INSERT resolve against the batch-created table;
    // apart from the connectivity finding there is no "does not
    // exist" noise.
    for row in &rows[2..] {
        let msg: String = row.get(4).unwrap();
        assert!(!msg.contains("does not exist"), "{msg}");
    }
    Ok(())
}

#[test]
fn second_magic_start_is_rejected() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start(""))?;
    let res = conn.query_drop(common::magic_start(""));
    assert!(res.is_err());
    // The original batch is still usable.
    conn.query_drop("SELECT 1")?;
    let rows: Vec<Row> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 1);
    Ok(())
}
