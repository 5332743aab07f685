mod helpers;
use helpers::Fixture;
use odbc_async_engine::driver::CompletionType;
use odbc_async_engine::{DiagnosticRecord, IsolationLevel, QueryRequest, Transaction};
use std::sync::mpsc;

#[test]
fn test_async_begin_commit_toggles_autocommit() {
    let mut fx = Fixture::new();
    let conn = fx.connection();
    let dbc = conn.handle().expect("open handle");

    let (tx, rx) = mpsc::channel();
    let begun = tx.clone();
    conn.begin_transaction(move |r| begun.send(("begin", r.is_ok())).unwrap())
        .expect("queue begin");
    conn.query(QueryRequest::new("INSERT INTO t VALUES (1)").no_results(), |r| {
        assert!(r.is_ok())
    })
    .expect("queue insert");
    conn.end_transaction(false, move |r| tx.send(("commit", r.is_ok())).unwrap())
        .expect("queue commit");
    fx.event_loop.run();

    assert_eq!(
        rx.try_iter().collect::<Vec<_>>(),
        vec![("begin", true), ("commit", true)]
    );
    assert_eq!(fx.driver.autocommit(dbc), Some(true));
    assert_eq!(fx.driver.end_tran_log(), vec![(dbc, CompletionType::Commit)]);
}

#[test]
fn test_failed_rollback_still_restores_autocommit() {
    let mut fx = Fixture::new();
    let conn = fx.connection();
    let dbc = conn.handle().expect("open handle");
    conn.begin_transaction_with_sync(IsolationLevel::ReadCommitted)
        .expect("begin");

    fx.driver
        .fail_end_tran(vec![DiagnosticRecord::new("08S01", 0, "Communication link failure")]);
    let (tx, rx) = mpsc::channel();
    conn.end_transaction(true, move |r| tx.send(r).unwrap())
        .expect("queue rollback");
    fx.event_loop.run();

    let err = rx.recv().unwrap().unwrap_err();
    assert_eq!(err.sqlstate(), "08S01");
    assert_eq!(fx.driver.autocommit(dbc), Some(true));
    assert_eq!(fx.driver.isolation(dbc), Some(IsolationLevel::ReadCommitted));
}

#[test]
fn test_transaction_guard_commit_and_drop() {
    let fx = Fixture::new();
    let conn = fx.connection();
    let dbc = conn.handle().expect("open handle");

    let txn = Transaction::begin(&conn, None).expect("begin");
    txn.commit().expect("commit");
    {
        let _abandoned = Transaction::begin(&conn, Some(IsolationLevel::Serializable))
            .expect("begin");
    }

    assert_eq!(
        fx.driver.end_tran_log(),
        vec![(dbc, CompletionType::Commit), (dbc, CompletionType::Rollback)]
    );
    assert_eq!(fx.driver.autocommit(dbc), Some(true));
}

#[test]
fn test_begin_on_closed_connection_fails() {
    let fx = Fixture::new();
    let conn = fx.connection();
    conn.close_sync().expect("close");
    assert!(conn.begin_transaction_sync().is_err());
}
