mod common;

use mysql::prelude::*;

fn tree_rows(conn: &mut mysql::PooledConn, statements: &[&str]) -> anyhow::Result<Vec<(i64, String, String)>> {
    conn.query_drop(common::magic_start("--enable-query-tree=1;"))?;
    for stmt in statements {
        conn.query_drop(*stmt)?;
    }
    Ok(conn.query(common::MAGIC_COMMIT)?)
}

#[test]
fn select_tree_shape() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    let rows = tree_rows(
        &mut conn,
        &[
            "USE shop",
            "SELECT o.amount FROM orders o WHERE o.status = 'paid'",
        ],
    )?;
    assert_eq!(rows.len(), 1);
    let (id, sql, tree) = &rows[0];
    assert_eq!(*id, 1);
    assert!(sql.starts_with("SELECT"));

    let v: serde_json::Value = serde_json::from_str(tree)?;
    assert_eq!(v["sql_type"], "SELECT");
    assert_eq!(v["tables"][0]["db"], "shop");
    assert_eq!(v["tables"][0]["table"], "orders");
    assert_eq!(v["tables"][0]["alias"], "o");
    assert_eq!(v["tables"][0]["type"], "read");
    assert_eq!(v["columns"]["select"][0]["column"], "amount");
    assert_eq!(v["columns"]["where"][0]["column"], "status");
    // Remote unreachable: star expansion never ran, nothing else
    // breaks.
    assert!(v["columns"]["select"][0].get("expanded").is_none());
    Ok(())
}

#[test]
fn update_and_delete_trees() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    let rows = tree_rows(
        &mut conn,
        &[
            "USE shop",
            "UPDATE orders SET amount = price * qty WHERE id = 1",
            "DELETE FROM orders WHERE id = 2",
        ],
    )?;
    assert_eq!(rows.len(), 2);

    let update: serde_json::Value = serde_json::from_str(&rows[0].2)?;
    assert_eq!(update["sql_type"], "UPDATE");
    assert_eq!(update["tables"][0]["type"], "write");
    assert_eq!(update["columns"]["set"][0]["column"], "amount");
    assert_eq!(update["columns"]["set_values"][0]["column"], "price");

    let delete: serde_json::Value = serde_json::from_str(&rows[1].2)?;
    assert_eq!(delete["sql_type"], "DELETE");
    assert_eq!(delete["columns"]["where"][0]["column"], "id");
    Ok(())
}

#[test]
fn star_without_remote_omits_expansion() -> anyhow::Result<()> {
    let (_server, addr) = common::spawn_server(&[])?;
    let (_pool, mut conn) = common::connect(&addr)?;

    let rows = tree_rows(&mut conn, &["USE shop", "SELECT * FROM orders"])?;
    let v: serde_json::Value = serde_json::from_str(&rows[0].2)?;
    let col = &v["columns"]["select"][0];
    assert_eq!(col["column"], "*");
    assert_eq!(col["table"], "orders");
    assert!(col.get("expanded").is_none());
    Ok(())
}
