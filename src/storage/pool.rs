//! Keyed connection pool.
//!
//! Native handles are not shared between threads. Each thread checks out the
//! handle it last used, or a freshly opened one, and checks it back in when
//! the [`PooledConnection`] guard drops.
//!
//! # Invalidation
//!
//! A handle that hit a lock or driver error is marked invalid and closed on
//! check-in instead of being reused. [`ConnectionManager::close_all`] bumps a
//! generation counter, so handles checked out at that moment are closed when
//! they come back rather than rejoining the pool. This is what lets a reset
//! rename the database file without a stale handle reopening the old one.

use super::driver::{Backend, Connection, DriverError, DriverResult};
use super::value::{Row, Value};
use crate::{Error, Result};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

struct IdleHandle {
    conn: Box<dyn Connection>,
    last_used: Instant,
}

/// Hands out one native handle per calling thread.
pub struct ConnectionManager {
    backend: Arc<dyn Backend>,
    idle: Mutex<HashMap<ThreadId, IdleHandle>>,
    generation: AtomicU64,
    opened: AtomicU64,
    idle_timeout: Duration,
}

impl ConnectionManager {
    /// Creates a pool over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, idle_timeout: Duration) -> Self {
        Self {
            backend,
            idle: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            opened: AtomicU64::new(0),
            idle_timeout,
        }
    }

    /// Returns the backend this pool opens handles on.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Checks out the calling thread's handle, opening one if needed.
    ///
    /// Idle handles unused for longer than the idle timeout are closed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Driver`] if a new handle cannot be opened.
    pub fn checkout(&self) -> Result<PooledConnection<'_>> {
        let thread = thread::current().id();
        let generation = self.generation.load(Ordering::SeqCst);

        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            let timeout = self.idle_timeout;
            let before = idle.len();
            idle.retain(|_, handle| handle.last_used.elapsed() <= timeout);
            let evicted = before - idle.len();
            if evicted > 0 {
                tracing::debug!(evicted, "Closed idle connections");
            }
            idle.remove(&thread).map(|handle| handle.conn)
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = self.backend.open().map_err(|e| Error::Driver {
                    operation: "open_connection".to_string(),
                    cause: e.message,
                })?;
                self.opened.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(backend = %self.backend.describe(), ?thread, "Opened connection");
                conn
            },
        };

        Ok(PooledConnection {
            manager: self,
            conn,
            thread,
            generation,
            invalid: false,
        })
    }

    /// Closes every idle handle and invalidates handles currently checked out.
    ///
    /// Returns the number of idle handles closed.
    pub fn close_all(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let drained: Vec<IdleHandle> = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.drain().map(|(_, handle)| handle).collect()
        };
        let closed = drained.len();
        drop(drained);
        tracing::debug!(closed, "Closed all pooled connections");
        closed
    }

    /// Number of handles currently idle in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of handles opened since the pool was created.
    #[must_use]
    pub fn opened_total(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    fn checkin(&self, thread: ThreadId, conn: Box<dyn Connection>, generation: u64, invalid: bool) {
        if invalid || generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.insert(
            thread,
            IdleHandle {
                conn,
                last_used: Instant::now(),
            },
        );
    }
}

/// Placeholder left behind once a guard has handed its handle back.
struct Released;

impl Connection for Released {
    fn query(&mut self, _sql: &str, _params: &[Value]) -> DriverResult<Vec<Row>> {
        Err(DriverError::other("connection already released"))
    }

    fn execute(&mut self, _sql: &str, _params: &[Value]) -> DriverResult<u64> {
        Err(DriverError::other("connection already released"))
    }

    fn begin(&mut self) -> DriverResult<()> {
        Err(DriverError::other("connection already released"))
    }

    fn commit(&mut self) -> DriverResult<()> {
        Err(DriverError::other("connection already released"))
    }

    fn rollback(&mut self) -> DriverResult<()> {
        Err(DriverError::other("connection already released"))
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

/// A checked-out handle; returned to the pool on drop.
pub struct PooledConnection<'a> {
    manager: &'a ConnectionManager,
    conn: Box<dyn Connection>,
    thread: ThreadId,
    generation: u64,
    invalid: bool,
}

impl PooledConnection<'_> {
    /// Marks the handle as unusable; it is closed instead of checked in.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    /// Returns `true` once [`invalidate`](Self::invalidate) was called.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        self.invalid
    }
}

impl Deref for PooledConnection<'_> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        let conn = std::mem::replace(&mut self.conn, Box::new(Released));
        self.manager
            .checkin(self.thread, conn, self.generation, self.invalid);
    }
}
