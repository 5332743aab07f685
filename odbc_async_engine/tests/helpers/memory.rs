//! In-memory fixtures: a scripted driver, its event loop and an environment.

use odbc_async_engine::{Connection, Environment, EventLoop, MemoryDriver};
use std::sync::Arc;

pub struct Fixture {
    pub driver: Arc<MemoryDriver>,
    pub event_loop: EventLoop,
    pub env: Environment,
}

impl Fixture {
    pub fn new() -> Self {
        super::env::init_logger();
        let driver = Arc::new(MemoryDriver::new());
        let event_loop = EventLoop::new();
        let env = Environment::new(driver.clone(), event_loop.dispatcher()).expect("environment");
        Self {
            driver,
            event_loop,
            env,
        }
    }

    pub fn connection(&self) -> Connection {
        open_connection(&self.env)
    }
}

pub fn open_connection(env: &Environment) -> Connection {
    let conn = env.create_connection_sync().expect("allocate connection");
    conn.open_sync("DSN=memory;UID=test;PWD=test").expect("open");
    conn
}
