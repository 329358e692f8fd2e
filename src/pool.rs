//! A bounded, concurrency-safe connection pool.
//!
//! Two FIFO queues (`free` and owned-out `acquired` ids) live behind one
//! mutex; a counting semaphore of capacity `maxsize` admits borrowers. At
//! all times `|free| + |acquired| <= maxsize`, and while the pool is open
//! the release path tops the total back up to `minsize`.
//!
//! Borrowed connections come back through [`PooledConnection`]: either via
//! its explicit [`release`](PooledConnection::release), or from `Drop`,
//! which hands the connection to a background task so cancellation cannot
//! leak a permit.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionStatus};
use crate::error::{Error, Result};
use crate::options::ConnectionOptions;

/// Pool lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, never started.
    Created,
    /// Started; serving connections.
    Opened,
    /// Shut down; terminal.
    Closed,
}

/// An open connection plus its pool identity.
struct PoolEntry {
    id: u64,
    conn: Connection,
}

struct PoolState {
    free: VecDeque<PoolEntry>,
    acquired: VecDeque<u64>,
    next_id: u64,
    opened: Option<bool>,
    closed: Option<bool>,
}

impl PoolState {
    fn total(&self) -> usize {
        self.free.len() + self.acquired.len()
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct PoolInner {
    options: ConnectionOptions,
    minsize: usize,
    maxsize: usize,
    sem: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

/// A bounded pool of [`Connection`]s.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool holding between `minsize` and `maxsize` connections
    /// configured by `options`. Nothing is dialed until
    /// [`startup`](Pool::startup) or the first borrow.
    pub fn new(options: ConnectionOptions, minsize: usize, maxsize: usize) -> Result<Pool> {
        if maxsize < 1 {
            return Err(Error::Pool("maxsize is expected to be greater than zero".into()));
        }
        if minsize > maxsize {
            return Err(Error::Pool("minsize is greater than maxsize".into()));
        }
        Ok(Pool {
            inner: Arc::new(PoolInner {
                options,
                minsize,
                maxsize,
                sem: Arc::new(Semaphore::new(maxsize)),
                state: Mutex::new(PoolState {
                    free: VecDeque::new(),
                    acquired: VecDeque::new(),
                    next_id: 0,
                    opened: None,
                    closed: None,
                }),
            }),
        })
    }

    /// Lower bound on pooled connections while open.
    pub fn minsize(&self) -> usize {
        self.inner.minsize
    }

    /// Upper bound on pooled connections.
    pub fn maxsize(&self) -> usize {
        self.inner.maxsize
    }

    /// The pool lifecycle state.
    pub async fn status(&self) -> Result<PoolStatus> {
        let state = self.inner.state.lock().await;
        match (state.opened, state.closed) {
            (None, None) => Ok(PoolStatus::Created),
            (Some(true), _) => Ok(PoolStatus::Opened),
            (_, Some(true)) => Ok(PoolStatus::Closed),
            (opened, closed) => Err(Error::Pool(format!(
                "unresolved pool state: opened={opened:?}, closed={closed:?}"
            ))),
        }
    }

    /// `(free, acquired)` connection counts.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.inner.state.lock().await;
        (state.free.len(), state.acquired.len())
    }

    /// Fill the pool up to `minsize`, dialing concurrently. If any
    /// connection fails, the ones already created are closed and the first
    /// error is returned.
    pub async fn startup(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.opened == Some(true) {
            return Ok(());
        }

        let to_create = self.inner.minsize.saturating_sub(state.total());
        match create_connections(&self.inner.options, to_create).await {
            Ok(connections) => {
                for conn in connections {
                    let id = state.alloc_id();
                    state.free.push_back(PoolEntry { id, conn });
                }
            }
            Err(e) => return Err(e),
        }

        state.opened = Some(true);
        if state.closed == Some(true) {
            state.closed = Some(false);
        }
        debug!(minsize = self.inner.minsize, maxsize = self.inner.maxsize, "pool started");
        Ok(())
    }

    /// Close every free connection, orphan the borrowed ones (they are
    /// closed on return) and mark the pool CLOSED. Waiting borrowers fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.sem.close();
        let mut state = self.inner.state.lock().await;
        while let Some(mut entry) = state.free.pop_front() {
            if let Err(e) = entry.conn.disconnect().await {
                warn!(error = %e, "error closing pooled connection");
            }
        }
        // Borrowed connections are owned by their guards; marking the pool
        // closed makes the release path close them instead of re-pooling.
        state.acquired.clear();
        state.opened = Some(false);
        state.closed = Some(true);
        debug!("pool shut down");
        Ok(())
    }

    /// Borrow a connection. Blocks while all `maxsize` slots are taken;
    /// the borrow ends when the returned guard is released or dropped.
    pub async fn connection(&self) -> Result<PooledConnection> {
        let permit = self
            .inner
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Pool("the pool is closed".into()))?;

        let mut state = self.inner.state.lock().await;
        loop {
            match state.free.pop_front() {
                Some(mut entry) => match refresh(&mut entry.conn).await {
                    Ok(()) => {
                        state.acquired.push_back(entry.id);
                        return Ok(PooledConnection {
                            inner: self.inner.clone(),
                            entry: Some(entry),
                            permit: Some(permit),
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "discarding dead pooled connection");
                        let _ = entry.conn.disconnect().await;
                    }
                },
                None => {
                    if state.total() >= self.inner.maxsize {
                        return Err(Error::Pool(format!(
                            "the pool is already full ({} connections)",
                            self.inner.maxsize
                        )));
                    }
                    let mut conn = Connection::new(self.inner.options.clone());
                    conn.connect().await?;
                    let id = state.alloc_id();
                    state.acquired.push_back(id);
                    return Ok(PooledConnection {
                        inner: self.inner.clone(),
                        entry: Some(PoolEntry { id, conn }),
                        permit: Some(permit),
                    });
                }
            }
        }
    }
}

impl PoolInner {
    /// Return a borrowed connection: refresh it back into `free` or close
    /// it, then top the pool back up to `minsize`. Errors here are logged
    /// and swallowed so the next borrow can still succeed.
    async fn release(&self, mut entry: PoolEntry) {
        let mut state = self.state.lock().await;

        if state.closed == Some(true) {
            let _ = entry.conn.disconnect().await;
            return;
        }

        match state.acquired.iter().position(|&id| id == entry.id) {
            Some(index) => {
                state.acquired.remove(index);
            }
            None => {
                warn!("released connection does not belong to the pool; closing it");
                let _ = entry.conn.disconnect().await;
                return;
            }
        }

        match refresh(&mut entry.conn).await {
            Ok(()) => state.free.push_back(entry),
            Err(e) => {
                warn!(error = %e, "closing connection that failed refresh on release");
                let _ = entry.conn.disconnect().await;
            }
        }

        // Keep |free| + |acquired| >= minsize while the pool is open.
        while state.opened == Some(true)
            && state.total() < self.minsize
            && state.total() < self.maxsize
        {
            let mut conn = Connection::new(self.options.clone());
            match conn.connect().await {
                Ok(()) => {
                    let id = state.alloc_id();
                    state.free.push_back(PoolEntry { id, conn });
                }
                Err(e) => {
                    warn!(error = %e, "could not top the pool back up to minsize");
                    break;
                }
            }
        }
    }
}

/// The pool's refresh procedure: a returned or about-to-be-lent connection
/// must be OPENED, idle, and answer a ping; one reconnect is attempted
/// before giving up.
async fn refresh(conn: &mut Connection) -> Result<()> {
    if conn.is_query_executing() {
        return Err(Error::Connection(
            "connection has an unconsumed query and cannot be pooled".into(),
        ));
    }
    if conn.status()? != ConnectionStatus::Opened {
        return conn.connect().await;
    }
    if conn.ping().await? {
        return Ok(());
    }
    conn.disconnect().await?;
    conn.connect().await
}

async fn create_connections(options: &ConnectionOptions, count: usize) -> Result<Vec<Connection>> {
    let mut join = JoinSet::new();
    for _ in 0..count {
        let options = options.clone();
        join.spawn(async move {
            let mut conn = Connection::new(options);
            conn.connect().await.map(|()| conn)
        });
    }

    let mut connections = Vec::with_capacity(count);
    let mut first_error = None;
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok(Ok(conn)) => connections.push(conn),
            Ok(Err(e)) => first_error = first_error.or(Some(e)),
            Err(e) => {
                first_error =
                    first_error.or_else(|| Some(Error::Pool(format!("connect task failed: {e}"))));
            }
        }
    }

    match first_error {
        None => Ok(connections),
        Some(e) => {
            for mut conn in connections {
                let _ = conn.disconnect().await;
            }
            Err(e)
        }
    }
}

/// A scoped borrow of one pooled connection.
///
/// Dereferences to [`Connection`]. Prefer awaiting
/// [`release`](PooledConnection::release); `Drop` falls back to returning
/// the connection on a background task.
pub struct PooledConnection {
    inner: Arc<PoolInner>,
    entry: Option<PoolEntry>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    /// Return the connection to the pool now.
    pub async fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            self.inner.release(entry).await;
        }
        // The permit drops here, after the queues are consistent.
        self.permit.take();
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.entry.as_ref().expect("connection already released").conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.entry.as_mut().expect("connection already released").conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            let inner = self.inner.clone();
            let permit = self.permit.take();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        inner.release(entry).await;
                        drop(permit);
                    });
                }
                // Dropped outside a runtime: the connection closes with its
                // socket, and the permit drop frees the slot.
                Err(_) => drop(permit),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_validates_sizes() {
        let options = ConnectionOptions::default();
        assert!(matches!(Pool::new(options.clone(), 0, 0), Err(Error::Pool(_))));
        assert!(matches!(Pool::new(options.clone(), 5, 2), Err(Error::Pool(_))));
        assert!(Pool::new(options, 0, 1).is_ok());
    }

    #[tokio::test]
    async fn status_transitions_without_dialing() {
        let pool = Pool::new(ConnectionOptions::default(), 0, 4).unwrap();
        assert_eq!(pool.status().await.unwrap(), PoolStatus::Created);

        // minsize = 0: startup creates nothing and cannot fail on I/O.
        pool.startup().await.unwrap();
        assert_eq!(pool.status().await.unwrap(), PoolStatus::Opened);
        assert_eq!(pool.counts().await, (0, 0));

        pool.shutdown().await.unwrap();
        assert_eq!(pool.status().await.unwrap(), PoolStatus::Closed);
    }

    #[tokio::test]
    async fn borrowing_from_a_closed_pool_fails() {
        let pool = Pool::new(ConnectionOptions::default(), 0, 2).unwrap();
        pool.startup().await.unwrap();
        pool.shutdown().await.unwrap();
        assert!(matches!(pool.connection().await, Err(Error::Pool(_))));
    }

    #[tokio::test]
    async fn startup_failure_surfaces_the_connect_error() {
        // Nothing listens on port 1; strict startup must fail and leave no
        // connections behind.
        let options = ConnectionOptions {
            host: "127.0.0.1".into(),
            port: Some(1),
            connect_timeout: std::time::Duration::from_millis(200),
            ..Default::default()
        };
        let pool = Pool::new(options, 2, 4).unwrap();
        assert!(pool.startup().await.is_err());
        assert_eq!(pool.counts().await, (0, 0));
        assert_eq!(pool.status().await.unwrap(), PoolStatus::Created);
    }
}
