mod helpers;
use helpers::Fixture;
use odbc_async_engine::protocol::sql_type;
use odbc_async_engine::{ColumnsRequest, TablesRequest, Value};
use std::sync::mpsc;

fn seed(fx: &Fixture) {
    fx.driver.add_table(
        "shop",
        "dbo",
        "orders",
        "TABLE",
        &[("id", sql_type::INTEGER), ("total", sql_type::DOUBLE)],
    );
    fx.driver
        .add_table("shop", "dbo", "customers", "TABLE", &[("id", sql_type::INTEGER)]);
    fx.driver
        .add_table("shop", "report", "order_totals", "VIEW", &[("total", sql_type::DOUBLE)]);
}

fn table_names(rows: &[odbc_async_engine::Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| match row.get_by_name("TABLE_NAME") {
            Some(Value::Text(name)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_null_sentinels_list_every_table() {
    let mut fx = Fixture::new();
    seed(&fx);
    let conn = fx.connection();

    let (tx, rx) = mpsc::channel();
    conn.tables(TablesRequest::new("null", "null", "null", "null"), move |r| {
        tx.send(r.expect("tables")).unwrap()
    })
    .expect("queue tables");
    fx.event_loop.run();

    let result = rx.recv().unwrap();
    let rows = result.fetch_all_sync().expect("rows");
    assert_eq!(table_names(&rows), vec!["orders", "customers", "order_totals"]);
    assert_eq!(TablesRequest::new("null", "null", "null", "null"), TablesRequest::all());
}

#[test]
fn test_table_type_and_pattern_filters() {
    let fx = Fixture::new();
    seed(&fx);
    let conn = fx.connection();

    let views = conn
        .tables_sync(TablesRequest::new("null", "null", "null", "'VIEW'"))
        .expect("tables");
    assert_eq!(table_names(&views.fetch_all_sync().unwrap()), vec!["order_totals"]);

    let like = conn
        .tables_sync(TablesRequest::new("shop", "dbo", "%o%s", "null"))
        .expect("tables");
    assert_eq!(
        table_names(&like.fetch_all_sync().unwrap()),
        vec!["orders", "customers"]
    );
}

#[test]
fn test_empty_string_is_a_real_filter() {
    let fx = Fixture::new();
    seed(&fx);
    let conn = fx.connection();
    let result = conn
        .tables_sync(TablesRequest::new("", "null", "null", "null"))
        .expect("tables");
    assert!(result.fetch_all_sync().unwrap().is_empty());
}

#[test]
fn test_columns_for_one_table() {
    let mut fx = Fixture::new();
    seed(&fx);
    let conn = fx.connection();

    let (tx, rx) = mpsc::channel();
    conn.columns(ColumnsRequest::new("null", "dbo", "orders", "null"), move |r| {
        tx.send(r.expect("columns")).unwrap()
    })
    .expect("queue columns");
    fx.event_loop.run();

    let result = rx.recv().unwrap();
    let rows = result.fetch_all_sync().expect("rows");
    let names: Vec<_> = rows
        .iter()
        .map(|row| row.get_by_name("COLUMN_NAME").cloned())
        .collect();
    assert_eq!(
        names,
        vec![Some(Value::from("id")), Some(Value::from("total"))]
    );
    assert_eq!(
        rows[1].get_by_name("ORDINAL_POSITION"),
        Some(&Value::Integer(2))
    );
    result.close_sync().expect("close");
    assert_eq!(fx.driver.live_statements(), 0);
}
