use super::connection::Connection;
use crate::config::EngineConfig;
use crate::dispatch::{self, Dispatcher, SerialQueue};
use crate::driver::{Driver, EnvHandle, HandleRef};
use crate::error::{OdbcError, Result};
use crate::handles::{DriverManager, SharedDriverManager};
use std::sync::Arc;

/// The driver-manager session every connection is created from.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

pub(crate) struct EnvironmentInner {
    manager: SharedDriverManager,
    henv: EnvHandle,
    dispatcher: Dispatcher,
    queue: SerialQueue,
    config: EngineConfig,
}

impl Environment {
    pub fn new(driver: Arc<dyn Driver>, dispatcher: Dispatcher) -> Result<Self> {
        Self::with_config(driver, dispatcher, EngineConfig::default())
    }

    pub fn with_config(
        driver: Arc<dyn Driver>,
        dispatcher: Dispatcher,
        config: EngineConfig,
    ) -> Result<Self> {
        crate::async_bridge::init_runtime(config.max_workers)?;
        let manager = Arc::new(DriverManager::new(driver));
        let henv = manager
            .lock()?
            .alloc_env()
            .map_err(|_| OdbcError::OutOfMemory)?;
        log::debug!("Allocated environment {:?}", henv);
        Ok(Self {
            inner: Arc::new(EnvironmentInner {
                manager,
                henv,
                dispatcher,
                queue: SerialQueue::new(),
                config,
            }),
        })
    }

    /// An environment on the system ODBC driver manager.
    pub fn odbc(dispatcher: Dispatcher) -> Result<Self> {
        let config = EngineConfig::from_env()?;
        Self::with_config(crate::driver::odbc::OdbcDriver::shared(), dispatcher, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn manager(&self) -> &SharedDriverManager {
        &self.inner.manager
    }

    pub fn handle(&self) -> EnvHandle {
        self.inner.henv
    }

    /// Allocates a connection handle. The connection is not open yet.
    pub fn create_connection_sync(&self) -> Result<Connection> {
        self.inner.allocate_connection(self)
    }

    pub fn create_connection<C>(&self, callback: C) -> Result<()>
    where
        C: FnOnce(Result<Connection>) + Send + 'static,
    {
        let env = self.clone();
        dispatch::submit(
            &self.inner.dispatcher,
            &self.inner.queue,
            Arc::clone(&self.inner),
            (),
            move |inner, _| inner.allocate_connection(&env),
            |_, outcome| outcome,
            callback,
        )
    }
}

impl EnvironmentInner {
    fn allocate_connection(&self, env: &Environment) -> Result<Connection> {
        let allocated = self.manager.lock()?.alloc_connection(self.henv);
        let dbc = allocated.map_err(|_| {
            self.manager
                .translate(HandleRef::Env(self.henv), "[odbc_async_engine] SQLAllocHandle failed")
        })?;
        Ok(Connection::from_handles(env.clone(), dbc))
    }
}

impl Drop for EnvironmentInner {
    fn drop(&mut self) {
        let released = self.manager.lock().map(|guard| guard.free_env(self.henv));
        match released {
            Ok(Ok(())) => log::debug!("Freed environment {:?}", self.henv),
            Ok(Err(_)) => log::warn!(
                "Failed to free environment {:?}: {}",
                self.henv,
                self.manager.translate(HandleRef::Env(self.henv), "SQLFreeHandle failed")
            ),
            Err(e) => log::warn!("Failed to free environment {:?}: {}", self.henv, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventLoop;
    use crate::driver::memory::MemoryDriver;

    #[test]
    fn test_create_connection_allocates_handle() {
        let driver = Arc::new(MemoryDriver::new());
        let event_loop = EventLoop::new();
        let env = Environment::new(driver.clone(), event_loop.dispatcher()).unwrap();

        let conn = env.create_connection_sync().unwrap();
        assert_eq!(driver.live_connections(), 1);
        assert!(!conn.connected());
        drop(conn);
        assert_eq!(driver.live_connections(), 0);
    }

    #[test]
    fn test_create_connection_async_completes_on_loop() {
        let driver = Arc::new(MemoryDriver::new());
        let mut event_loop = EventLoop::new();
        let env = Environment::new(driver.clone(), event_loop.dispatcher()).unwrap();

        let slot = Arc::new(std::sync::Mutex::new(None));
        let out = Arc::clone(&slot);
        env.create_connection(move |conn| *out.lock().unwrap() = Some(conn))
            .unwrap();
        assert_eq!(event_loop.run(), 1);

        let conn = slot.lock().unwrap().take().unwrap().unwrap();
        assert!(!conn.connected());
        assert_eq!(driver.live_connections(), 1);
    }

    #[test]
    fn test_environment_freed_after_last_connection() {
        let driver = Arc::new(MemoryDriver::new());
        let event_loop = EventLoop::new();
        let env = Environment::new(driver.clone(), event_loop.dispatcher()).unwrap();
        let conn = env.create_connection_sync().unwrap();
        drop(env);
        drop(conn);
        assert_eq!(driver.invalid_handle_calls(), 0);
        assert_eq!(driver.live_connections(), 0);
    }
}
