use super::connection::Connection;
use crate::error::{OdbcError, Result};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::ReadUncommitted),
            1 => Some(Self::ReadCommitted),
            2 => Some(Self::RepeatableRead),
            3 => Some(Self::Serializable),
            _ => None,
        }
    }

    /// `SQL_TXN_*` bitmask value for `SQL_ATTR_TXN_ISOLATION`.
    pub fn attr_value(self) -> u32 {
        match self {
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// A transaction on a [`Connection`], running its calls synchronously.
/// Dropping an active transaction rolls it back.
pub struct Transaction<'c> {
    conn: &'c Connection,
    state: Mutex<TransactionState>,
    isolation_level: Option<IsolationLevel>,
}

impl<'c> Transaction<'c> {
    pub fn begin(conn: &'c Connection, isolation_level: Option<IsolationLevel>) -> Result<Self> {
        match isolation_level {
            Some(level) => conn.begin_transaction_with_sync(level)?,
            None => conn.begin_transaction_sync()?,
        }
        Ok(Self {
            conn,
            state: Mutex::new(TransactionState::Active),
            isolation_level,
        })
    }

    fn finish(&self, rollback: bool) -> Result<()> {
        let mut s = self.state.lock().map_err(|_| {
            OdbcError::InternalError("Failed to lock transaction state".to_string())
        })?;
        if *s != TransactionState::Active {
            return Err(OdbcError::ValidationError(format!(
                "Cannot {}: transaction state is {:?}",
                if rollback { "rollback" } else { "commit" },
                *s
            )));
        }
        // Autocommit is back on even when the completion fails, so the
        // transaction is over either way.
        *s = if rollback {
            TransactionState::RolledBack
        } else {
            TransactionState::Committed
        };
        drop(s);
        self.conn.end_transaction_sync(rollback)
    }

    pub fn commit(self) -> Result<()> {
        self.finish(false)
    }

    pub fn rollback(self) -> Result<()> {
        self.finish(true)
    }

    /// Runs `f` inside a transaction: commit on `Ok`, rollback on `Err`.
    pub fn execute<F, T>(conn: &'c Connection, isolation: Option<IsolationLevel>, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'c>) -> Result<T>,
    {
        let txn = Self::begin(conn, isolation)?;
        match f(&txn) {
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback() {
                    log::warn!("Rollback after failed transaction body also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|s| *s == TransactionState::Active)
            .unwrap_or(false)
    }

    pub fn state(&self) -> Option<TransactionState> {
        self.state.lock().ok().map(|s| *s)
    }

    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            log::warn!("Transaction dropped without commit - auto-rollback");
            if let Err(e) = self.finish(true) {
                log::error!("Auto-rollback failed: {}", e);
            }
        }
    }
}
