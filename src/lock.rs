//! Per-table locking.
//!
//! Queries hold shared access on every table they read for their whole
//! duration. [`TableLockGuard`] ties that to a scope so the locks are
//! released exactly once on every exit path.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{trace, warn};

/// Identifies the session (connection or transaction) holding a lock.
pub type SessionId = u64;

pub trait TableLocks {
    /// Takes shared access. Reentrant: a session may acquire the same table
    /// several times and must release it as often.
    fn acquire_shared(&self, session: SessionId, table: &str) -> Result<()>;

    fn release_shared(&self, session: SessionId, table: &str) -> Result<()>;

    /// Fails if `session` still holds any lock.
    fn assert_no_locks(&self, session: SessionId) -> Result<()>;
}

#[derive(Debug, Default)]
struct LockState {
    readers: HashMap<SessionId, usize>,
    writer: Option<SessionId>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers.is_empty() && self.writer.is_none()
    }
}

/// In-process lock table keyed by lowercase table name.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, LockState>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, HashMap<String, LockState>>> {
        self.locks
            .lock()
            .map_err(|_| Error::internal("lock manager poisoned"))
    }

    /// Takes exclusive access. Fails while another session reads or writes
    /// the table.
    pub fn acquire_exclusive(&self, session: SessionId, table: &str) -> Result<()> {
        let mut locks = self.state()?;
        let state = locks.entry(table.to_lowercase()).or_default();
        if let Some(writer) = state.writer {
            if writer != session {
                return Err(Error::Locked(table.to_string()));
            }
        }
        let other_readers = state
            .readers
            .iter()
            .any(|(id, count)| *id != session && *count > 0);
        if other_readers {
            return Err(Error::Locked(table.to_string()));
        }
        state.writer = Some(session);
        trace!(session, table, "exclusive lock acquired");
        Ok(())
    }

    pub fn release_exclusive(&self, session: SessionId, table: &str) -> Result<()> {
        let mut locks = self.state()?;
        let key = table.to_lowercase();
        let state = locks
            .get_mut(&key)
            .filter(|state| state.writer == Some(session))
            .ok_or_else(|| {
                Error::internal(format!(
                    "session {} does not hold an exclusive lock on {}",
                    session, table
                ))
            })?;
        state.writer = None;
        if state.is_free() {
            locks.remove(&key);
        }
        trace!(session, table, "exclusive lock released");
        Ok(())
    }

    /// Drops everything `session` holds.
    pub fn release_all(&self, session: SessionId) {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(_) => return,
        };
        for state in locks.values_mut() {
            state.readers.remove(&session);
            if state.writer == Some(session) {
                state.writer = None;
            }
        }
        locks.retain(|_, state| !state.is_free());
    }
}

impl TableLocks for LockManager {
    fn acquire_shared(&self, session: SessionId, table: &str) -> Result<()> {
        let mut locks = self.state()?;
        let state = locks.entry(table.to_lowercase()).or_default();
        if let Some(writer) = state.writer {
            if writer != session {
                return Err(Error::Locked(table.to_string()));
            }
        }
        *state.readers.entry(session).or_insert(0) += 1;
        trace!(session, table, "shared lock acquired");
        Ok(())
    }

    fn release_shared(&self, session: SessionId, table: &str) -> Result<()> {
        let mut locks = self.state()?;
        let key = table.to_lowercase();
        let state = locks.get_mut(&key).ok_or_else(|| {
            Error::internal(format!("no lock held on {} by session {}", table, session))
        })?;
        match state.readers.get_mut(&session) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                state.readers.remove(&session);
            }
            None => {
                return Err(Error::internal(format!(
                    "no shared lock held on {} by session {}",
                    table, session
                )))
            }
        }
        if state.is_free() {
            locks.remove(&key);
        }
        trace!(session, table, "shared lock released");
        Ok(())
    }

    fn assert_no_locks(&self, session: SessionId) -> Result<()> {
        let locks = self.state()?;
        let held: Vec<&str> = locks
            .iter()
            .filter(|(_, state)| {
                state.readers.contains_key(&session) || state.writer == Some(session)
            })
            .map(|(table, _)| table.as_str())
            .collect();
        if held.is_empty() {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "session {} still holds locks on {}",
                session,
                held.join(", ")
            )))
        }
    }
}

/// Shared access on a set of tables, released on drop.
pub struct TableLockGuard<'a> {
    locks: &'a dyn TableLocks,
    session: SessionId,
    tables: Vec<String>,
}

impl<'a> TableLockGuard<'a> {
    /// Locks every table in order. If one fails, the ones already taken are
    /// released before the error is returned.
    pub fn acquire<I, S>(locks: &'a dyn TableLocks, session: SessionId, tables: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = Self {
            locks,
            session,
            tables: Vec::new(),
        };
        for table in tables {
            let table = table.into();
            locks.acquire_shared(session, &table)?;
            guard.tables.push(table);
        }
        Ok(guard)
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

impl Drop for TableLockGuard<'_> {
    fn drop(&mut self) {
        for table in self.tables.drain(..).rev() {
            if let Err(err) = self.locks.release_shared(self.session, &table) {
                warn!(session = self.session, table = %table, error = %err, "failed to release shared lock");
            }
        }
    }
}
