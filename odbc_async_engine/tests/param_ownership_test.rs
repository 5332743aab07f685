//! Parameter buffers are owned by exactly one place at a time and are all
//! released once every execution has completed, whatever path it took.
mod helpers;
use helpers::Fixture;
use odbc_async_engine::observability::{handle_gauges, Gauge};
use odbc_async_engine::{DiagnosticRecord, ParamValue, QueryRequest, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serial_test::serial;

const EXECUTIONS: usize = 10_000;
const FAILING_SQL: &str = "SELECT ?, ? FROM missing_table";

fn random_param(rng: &mut StdRng) -> ParamValue {
    match rng.gen_range(0..6) {
        0 => ParamValue::Null,
        1 => ParamValue::Bool(rng.gen()),
        2 => ParamValue::Integer(rng.gen_range(-1_000_000..1_000_000)),
        3 => ParamValue::Double(f64::from(rng.gen_range(-1000..1000)) / 8.0),
        4 => ParamValue::Text("x".repeat(rng.gen_range(0..64))),
        _ => ParamValue::WideText("ü".repeat(rng.gen_range(0..16))),
    }
}

fn expected(param: &ParamValue) -> Value {
    match param {
        ParamValue::Null => Value::Null,
        ParamValue::Bool(b) => Value::Bool(*b),
        ParamValue::Integer(n) => Value::Integer(*n),
        ParamValue::Double(f) => Value::Double(*f),
        ParamValue::Text(s) | ParamValue::WideText(s) => Value::Text(s.clone()),
    }
}

fn select_for(count: usize) -> String {
    let markers = vec!["?"; count].join(", ");
    format!("SELECT {}", markers)
}

#[test]
#[serial]
fn test_randomized_executions_release_every_buffer() {
    let mut fx = Fixture::new();
    fx.driver.fail_sql(
        FAILING_SQL,
        vec![DiagnosticRecord::new("42S02", 208, "Invalid object name 'missing_table'")],
    );
    let conn = fx.connection();
    let baseline = handle_gauges().get(Gauge::ParamBuffers);
    let mut rng = StdRng::seed_from_u64(0x0dbc_a5c);

    for i in 0..EXECUTIONS {
        let count = rng.gen_range(1..=4);
        let params: Vec<ParamValue> = (0..count).map(|_| random_param(&mut rng)).collect();
        let want: Vec<Value> = params.iter().map(expected).collect();

        match rng.gen_range(0..5) {
            0 => {
                let request = QueryRequest::new(select_for(count)).with_params(params);
                let outcome = conn.query_sync(request).expect("query");
                let row = outcome
                    .into_result()
                    .expect("result")
                    .fetch_sync()
                    .expect("fetch")
                    .expect("row");
                assert_eq!(row.values(), want.as_slice(), "execution {}", i);
            }
            1 => {
                let request = QueryRequest::new(select_for(count))
                    .with_params(params)
                    .no_results();
                conn.query(request, |r| assert!(r.is_ok())).expect("queue query");
            }
            2 => {
                let params = params.into_iter().take(2).collect::<Vec<_>>();
                let request = QueryRequest::new(FAILING_SQL).with_params(params);
                conn.query(request, |r| {
                    let failure = r.unwrap_err();
                    assert_eq!(failure.error.sqlstate(), "42S02");
                    if let Some(result) = failure.result {
                        result.close_sync().expect("close");
                    }
                })
                .expect("queue query");
            }
            3 => {
                let stmt = conn.create_statement_sync().expect("statement");
                stmt.prepare_sync(&select_for(count)).expect("prepare");
                stmt.bind_sync(&params).expect("bind");
                let result = stmt.execute_sync().expect("execute");
                let row = result.fetch_sync().expect("fetch").expect("row");
                assert_eq!(row.values(), want.as_slice(), "execution {}", i);
                if rng.gen() {
                    stmt.close_sync().expect("close statement");
                }
            }
            _ => {
                let stmt = conn.create_statement_sync().expect("statement");
                stmt.bind_sync(&params).expect("bind");
                // Marker count mismatch on purpose: the driver rejects it.
                let failed = stmt.execute_direct_sync(&select_for(count + 1));
                assert!(failed.is_err());
            }
        }

        if i % 256 == 0 {
            fx.event_loop.run();
        }
    }
    fx.event_loop.run();

    assert_eq!(fx.event_loop.pending_tasks(), 0);
    assert_eq!(handle_gauges().get(Gauge::ParamBuffers), baseline);
    assert_eq!(fx.driver.live_statements(), 0);
    assert_eq!(fx.driver.invalid_handle_calls(), 0);
}
