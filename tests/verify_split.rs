mod common;

use mysql::prelude::*;

#[test]
fn split_mode_groups_by_table_and_kind() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start("--enable-split=1;"))?;
    conn.query_drop("USE shop")?;
    conn.query_drop("INSERT INTO o VALUES (1)")?;
    conn.query_drop("INSERT INTO o VALUES (2)")?;
    conn.query_drop("ALTER TABLE o ADD COLUMN y INT")?;

    let rows: Vec<(i64, String, i64)> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 2);

    let (id1, sql1, ddl1) = &rows[0];
    assert_eq!(*id1, 1);
    assert_eq!(
        sql1,
        "USE shop;\nINSERT INTO o VALUES (1);\nINSERT INTO o VALUES (2);\n"
    );
    assert_eq!(*ddl1, 0);

    let (id2, sql2, ddl2) = &rows[1];
    assert_eq!(*id2, 2);
    assert_eq!(sql2, "USE shop;\nALTER TABLE o ADD COLUMN y INT;\n");
    assert_eq!(*ddl2, 1);

    Ok(())
}

#[test]
fn split_mode_accepts_multi_statement_batches() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    // The whole batch arrives as one query text; SET is dropped.
    let batch = format!(
        "{} USE shop; SET NAMES utf8mb4; INSERT INTO a VALUES (1); INSERT INTO b VALUES (1)",
        common::magic_start("--enable-split=1;")
    );
    conn.query_drop(batch)?;

    let rows: Vec<(i64, String, i64)> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 2, "a and b do not merge");
    assert!(rows[0].1.contains("INSERT INTO a"));
    assert!(rows[1].1.contains("INSERT INTO b"));
    Ok(())
}

#[test]
fn commit_clears_the_session_for_reuse() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    conn.query_drop(common::magic_start("--enable-split=1;"))?;
    conn.query_drop("USE shop")?;
    conn.query_drop("INSERT INTO o VALUES (1)")?;
    let rows: Vec<(i64, String, i64)> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 1);

    // A fresh batch starts clean on the same connection.
    conn.query_drop(common::magic_start("--enable-split=1;"))?;
    conn.query_drop("USE other")?;
    conn.query_drop("INSERT INTO p VALUES (1)")?;
    let rows: Vec<(i64, String, i64)> = conn.query(common::MAGIC_COMMIT)?;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].1.starts_with("USE other;\n"));
    Ok(())
}
