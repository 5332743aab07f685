//! Connection open/close through the event loop: keepalive accounting,
//! idempotent close and serialized handle mutation.
mod helpers;
use helpers::Fixture;
use odbc_async_engine::{OdbcError, QueryRequest};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_async_open_close_keepalive_balanced() {
    let mut fx = Fixture::new();
    let conn = fx.env.create_connection_sync().expect("allocate");

    let (tx, rx) = mpsc::channel();
    let opened = tx.clone();
    conn.open("DSN=memory", move |r| opened.send(("open", r.is_ok())).unwrap())
        .expect("queue open");
    fx.event_loop.run();
    assert_eq!(fx.event_loop.active_handles(), 1);

    conn.close(move |r| tx.send(("close", r.is_ok())).unwrap())
        .expect("queue close");
    fx.event_loop.run();

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events, vec![("open", true), ("close", true)]);
    assert_eq!(fx.event_loop.active_handles(), 0);
    assert_eq!(fx.driver.live_connections(), 0);
}

#[test]
fn test_close_twice_reports_success_and_frees_once() {
    let mut fx = Fixture::new();
    let conn = fx.connection();

    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let tx = tx.clone();
        conn.close(move |r| tx.send(r.is_ok()).unwrap()).expect("queue close");
    }
    assert_eq!(fx.event_loop.run(), 2);
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![true, true]);
    assert_eq!(fx.driver.invalid_handle_calls(), 0);
    assert_eq!(fx.event_loop.active_handles(), 0);
}

#[test]
fn test_failed_open_keeps_loop_idle() {
    let mut fx = Fixture::new();
    fx.driver.fail_connect(vec![odbc_async_engine::DiagnosticRecord::new(
        "08001",
        53,
        "Server does not exist",
    )]);
    let conn = fx.env.create_connection_sync().expect("allocate");

    let (tx, rx) = mpsc::channel();
    conn.open("DSN=missing", move |r| tx.send(r).unwrap())
        .expect("queue open");
    fx.event_loop.run();

    let err = rx.recv().unwrap().unwrap_err();
    assert_eq!(err.sqlstate(), "08001");
    assert!(err.is_connection_error());
    assert_eq!(fx.event_loop.active_handles(), 0);
    assert!(!conn.connected());
}

#[test]
fn test_empty_connection_string_rejected_on_caller_thread() {
    let fx = Fixture::new();
    let conn = fx.env.create_connection_sync().expect("allocate");
    let err = conn.open("", |_| unreachable!()).unwrap_err();
    assert!(matches!(err, OdbcError::EmptyConnectionString));
    assert_eq!(fx.event_loop.pending_tasks(), 0);
}

#[test]
fn test_parallel_opens_never_overlap_handle_mutation() {
    let mut fx = Fixture::new();
    fx.driver.set_handle_delay(Duration::from_millis(2));

    let conns: Vec<_> = (0..8)
        .map(|_| fx.env.create_connection_sync().expect("allocate"))
        .collect();
    for conn in &conns {
        conn.open("DSN=memory", |r| r.expect("open")).expect("queue open");
    }
    assert_eq!(fx.event_loop.run(), conns.len());
    assert_eq!(fx.event_loop.active_handles(), conns.len());

    for conn in &conns {
        conn.query(QueryRequest::new("SELECT 1").no_results(), |r| {
            assert!(r.is_ok());
        })
        .expect("queue query");
        conn.close(|r| r.expect("close")).expect("queue close");
    }
    fx.event_loop.run();

    assert_eq!(fx.driver.mutation_violations(), 0);
    assert_eq!(fx.driver.live_connections(), 0);
    assert_eq!(fx.driver.live_statements(), 0);
    assert_eq!(fx.event_loop.active_handles(), 0);
}

#[test]
fn test_connection_dropped_while_task_pending_completes_task() {
    let mut fx = Fixture::new();
    fx.driver.set_exec_delay(Duration::from_millis(5));
    let conn = fx.connection();
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&done);
    conn.query(QueryRequest::new("SELECT 1").no_results(), move |r| {
        assert!(r.is_ok());
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .expect("queue query");
    drop(conn);

    assert_eq!(fx.event_loop.run(), 1);
    assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(fx.driver.live_connections(), 0);
    assert_eq!(fx.event_loop.active_handles(), 0);
}
