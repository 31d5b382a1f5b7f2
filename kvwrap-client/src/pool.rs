//! # Connection Pool
//!
//! Purpose: Hand out short-lived connections to many concurrent callers while
//! bounding how many connections are open at once.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep idle connections for reuse, newest first.
//! 2. **Minimal Locking**: The mutex guards only bookkeeping; dialing and
//!    command IO happen outside it.
//! 3. **RAII Release**: `PooledConnection` returns itself on `Drop`, so every
//!    exit path (including unwinding) gives the slot back.
//! 4. **Bounded Waiting**: Exhaustion fails fast unless a wait timeout is set.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnectionPool<D>
//!   └── inner: Arc<PoolInner<D>>
//!         ├── dialer: D
//!         ├── config: PoolConfig
//!         ├── available: Condvar
//!         └── state: Mutex<PoolState>
//!               ├── idle: VecDeque<IdleConn>   (oldest at front)
//!               ├── active: usize              (idle + in use)
//!               └── closed: bool
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::conn::{Connection, Dialer, TcpDialer};
use crate::error::{WrapperError, WrapperResult};
use crate::resp::{Command, Reply};

/// A source of pooled connections.
///
/// The guard returned by `acquire` must give its connection back when dropped.
pub trait Pool: Send + Sync {
    /// Guard type handed to callers for the duration of one command.
    type Conn: Connection;

    /// Borrows a connection, dialing a new one if needed.
    fn acquire(&self) -> WrapperResult<Self::Conn>;

    /// Closes the pool. Later `acquire` calls fail with `PoolClosed`.
    fn close(&self) -> WrapperResult<()>;
}

/// Sizing and wait policy for [`ConnectionPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,
    /// Maximum open connections (idle + in use); 0 means unbounded.
    pub max_active: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// How long `acquire` waits for a free slot; `None` fails immediately.
    pub wait_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: 8,
            max_active: 16,
            idle_timeout: None,
            wait_timeout: None,
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Open connections, idle or in use.
    pub active: usize,
    /// Connections parked for reuse.
    pub idle: usize,
    /// Connections currently lent out.
    pub in_use: usize,
}

struct IdleConn<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConn<C>>,
    active: usize,
    closed: bool,
}

struct PoolInner<D: Dialer> {
    dialer: D,
    config: PoolConfig,
    state: Mutex<PoolState<D::Conn>>,
    available: Condvar,
}

/// Bounded pool of connections produced by a [`Dialer`].
pub struct ConnectionPool<D: Dialer = TcpDialer> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Dialer> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Dialer> ConnectionPool<D> {
    /// Creates a pool. Nothing is dialed until the first `acquire`.
    pub fn new(dialer: D, config: PoolConfig) -> Self {
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            active: 0,
            closed: false,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                dialer,
                config,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            in_use: state.active - state.idle.len(),
        }
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Borrows a connection.
    ///
    /// **Logic**:
    /// 1. Fail with `PoolClosed` if the pool was closed.
    /// 2. Drop idle connections past `idle_timeout`.
    /// 3. Reuse the most recently returned idle connection if any.
    /// 4. Otherwise reserve a slot and dial outside the lock.
    /// 5. At capacity, fail fast or wait on the condvar until `wait_timeout`.
    pub fn get(&self) -> WrapperResult<PooledConnection<D>> {
        let deadline = self.inner.config.wait_timeout.map(|wait| Instant::now() + wait);
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(WrapperError::PoolClosed);
            }

            let stale = self.take_stale(&mut state);
            if !stale.is_empty() {
                tracing::debug!(evicted = stale.len(), "closing stale idle connections");
            }

            if let Some(idle) = state.idle.pop_back() {
                return Ok(PooledConnection::new(self.inner.clone(), idle.conn));
            }

            let max_active = self.inner.config.max_active;
            if max_active == 0 || state.active < max_active {
                state.active += 1;
                drop(state);
                drop(stale);
                return self.dial_reserved();
            }

            let Some(deadline) = deadline else {
                return Err(WrapperError::PoolExhausted);
            };
            drop(stale);
            if self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Err(WrapperError::PoolTimeout);
            }
        }
    }

    /// Closes the pool: idle connections are dropped now, lent ones when
    /// their guards drop.
    pub fn shutdown(&self) {
        let drained: Vec<IdleConn<D::Conn>> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.active -= drained.len();
            drained
        };
        self.inner.available.notify_all();
        tracing::debug!(closed_idle = drained.len(), "connection pool closed");
    }

    fn take_stale(&self, state: &mut PoolState<D::Conn>) -> Vec<IdleConn<D::Conn>> {
        let Some(timeout) = self.inner.config.idle_timeout else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut stale = Vec::new();
        while let Some(front) = state.idle.front() {
            if now.duration_since(front.since) < timeout {
                break;
            }
            if let Some(idle) = state.idle.pop_front() {
                stale.push(idle);
            }
        }
        state.active -= stale.len();
        stale
    }

    fn dial_reserved(&self) -> WrapperResult<PooledConnection<D>> {
        match self.inner.dialer.dial() {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.inner.release_slot();
                Err(err)
            }
        }
    }
}

impl<D: Dialer> PoolInner<D> {
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn return_connection(&self, conn: D::Conn) {
        let mut state = self.state.lock();
        let discarded = if !state.closed && state.idle.len() < self.config.max_idle {
            state.idle.push_back(IdleConn {
                conn,
                since: Instant::now(),
            });
            None
        } else {
            state.active = state.active.saturating_sub(1);
            Some(conn)
        };
        drop(state);
        self.available.notify_one();
        drop(discarded);
    }
}

impl<D: Dialer> Pool for ConnectionPool<D> {
    type Conn = PooledConnection<D>;

    fn acquire(&self) -> WrapperResult<PooledConnection<D>> {
        self.get()
    }

    fn close(&self) -> WrapperResult<()> {
        self.shutdown();
        Ok(())
    }
}

/// RAII guard returning a connection to the pool on drop.
pub struct PooledConnection<D: Dialer> {
    pool: Arc<PoolInner<D>>,
    conn: Option<D::Conn>,
    valid: bool,
}

impl<D: Dialer> PooledConnection<D> {
    fn new(pool: Arc<PoolInner<D>>, conn: D::Conn) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }
}

impl<D: Dialer> Connection for PooledConnection<D> {
    fn issue(&mut self, command: &Command) -> WrapperResult<Reply> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(WrapperError::PoolClosed);
        };
        tracing::trace!(command = %command.name(), "issuing command");
        let reply = conn.issue(command);
        if reply.is_err() {
            // A failed exchange may leave unread bytes behind; never reuse it.
            self.valid = false;
        }
        reply
    }
}

impl<D: Dialer> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.valid && !std::thread::panicking() {
            self.pool.return_connection(conn);
        } else {
            drop(conn);
            self.pool.release_slot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct FakeConn {
        id: usize,
        fail_next: bool,
    }

    impl Connection for FakeConn {
        fn issue(&mut self, _command: &Command) -> WrapperResult<Reply> {
            if self.fail_next {
                return Err(WrapperError::Io(std::io::ErrorKind::ConnectionReset.into()));
            }
            Ok(Reply::Integer(self.id as i64))
        }
    }

    fn counting_pool(
        config: PoolConfig,
    ) -> (ConnectionPool<impl Dialer<Conn = FakeConn>>, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let counter = dials.clone();
        let dialer = move || -> WrapperResult<FakeConn> {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                id,
                fail_next: false,
            })
        };
        (ConnectionPool::new(dialer, config), dials)
    }

    fn conn_id<D: Dialer>(conn: &mut PooledConnection<D>) -> i64 {
        match conn.issue(&Command::new("PING")).unwrap() {
            Reply::Integer(id) => id,
            other => panic!("unexpected reply {other}"),
        }
    }

    #[test]
    fn dials_lazily_and_reuses_idle() {
        let (pool, dials) = counting_pool(PoolConfig::default());
        assert_eq!(dials.load(Ordering::SeqCst), 0);

        let first = {
            let mut conn = pool.get().unwrap();
            conn_id(&mut conn)
        };
        let second = {
            let mut conn = pool.get().unwrap();
            conn_id(&mut conn)
        };

        assert_eq!(first, second);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                active: 1,
                idle: 1,
                in_use: 0
            }
        );
    }

    #[test]
    fn exhausted_without_wait_fails_fast() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 1,
            ..PoolConfig::default()
        });
        let held = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(WrapperError::PoolExhausted)));
        drop(held);
        assert!(pool.get().is_ok());
    }

    #[test]
    fn zero_max_active_is_unbounded() {
        let (pool, dials) = counting_pool(PoolConfig {
            max_idle: 0,
            max_active: 0,
            ..PoolConfig::default()
        });
        let held: Vec<_> = (0..32).map(|_| pool.get().unwrap()).collect();
        assert_eq!(pool.stats().in_use, 32);
        drop(held);
        assert_eq!(dials.load(Ordering::SeqCst), 32);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn wait_times_out_at_capacity() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 1,
            wait_timeout: Some(Duration::from_millis(20)),
            ..PoolConfig::default()
        });
        let _held = pool.get().unwrap();
        let start = Instant::now();
        assert!(matches!(pool.get(), Err(WrapperError::PoolTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn waiter_wakes_when_connection_returns() {
        let (pool, dials) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 1,
            wait_timeout: Some(Duration::from_secs(5)),
            ..PoolConfig::default()
        });
        let held = pool.get().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let mut conn = pool.get().unwrap();
                conn_id(&mut conn)
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(waiter.join().unwrap(), 0);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broken_connection_is_discarded() {
        let (pool, dials) = counting_pool(PoolConfig::default());
        {
            let mut conn = pool.get().unwrap();
            if let Some(inner) = conn.conn.as_mut() {
                inner.fail_next = true;
            }
            assert!(conn.issue(&Command::new("GET").arg("k")).is_err());
        }
        assert_eq!(pool.stats(), PoolStats::default());

        let mut conn = pool.get().unwrap();
        assert_eq!(conn_id(&mut conn), 1);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panic_while_borrowed_discards_connection() {
        let (pool, dials) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 1,
            ..PoolConfig::default()
        });
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut conn = pool.get().unwrap();
            assert_eq!(conn_id(&mut conn), 0);
            panic!("operation failed mid-command");
        }));
        assert!(result.is_err());
        assert_eq!(pool.stats(), PoolStats::default());

        let mut conn = pool.get().unwrap();
        assert_eq!(conn_id(&mut conn), 1);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn idle_beyond_max_idle_is_closed() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 4,
            ..PoolConfig::default()
        });
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        drop(a);
        drop(b);
        assert_eq!(
            pool.stats(),
            PoolStats {
                active: 1,
                idle: 1,
                in_use: 0
            }
        );
    }

    #[test]
    fn stale_idle_connections_are_evicted() {
        let (pool, dials) = counting_pool(PoolConfig {
            idle_timeout: Some(Duration::from_millis(10)),
            ..PoolConfig::default()
        });
        drop(pool.get().unwrap());
        thread::sleep(Duration::from_millis(25));

        let mut conn = pool.get().unwrap();
        assert_eq!(conn_id(&mut conn), 1);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().active, 1);
    }

    #[test]
    fn dial_failure_frees_the_slot() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let dialer = move || -> WrapperResult<FakeConn> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(WrapperError::Dial {
                addr: "127.0.0.1:1".into(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            })
        };
        let pool = ConnectionPool::new(
            dialer,
            PoolConfig {
                max_idle: 1,
                max_active: 1,
                ..PoolConfig::default()
            },
        );

        assert!(matches!(pool.get(), Err(WrapperError::Dial { .. })));
        assert!(matches!(pool.get(), Err(WrapperError::Dial { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().active, 0);
    }

    #[test]
    fn close_rejects_new_borrowers_and_drains_idle() {
        let (pool, _) = counting_pool(PoolConfig::default());
        drop(pool.get().unwrap());
        let lent = pool.get().unwrap();
        let extra = pool.get().unwrap();
        drop(extra);
        assert_eq!(pool.stats().idle, 1);

        pool.close().unwrap();
        pool.close().unwrap();
        assert!(pool.is_closed());
        assert!(matches!(pool.get(), Err(WrapperError::PoolClosed)));
        assert_eq!(pool.stats().idle, 0);

        drop(lent);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn close_wakes_waiters() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 1,
            wait_timeout: Some(Duration::from_secs(5)),
            ..PoolConfig::default()
        });
        let _held = pool.get().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.get().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        pool.shutdown();
        assert!(matches!(waiter.join().unwrap(), Err(WrapperError::PoolClosed)));
    }

    #[test]
    fn concurrent_borrowers_respect_max_active() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 2,
            max_active: 3,
            wait_timeout: Some(Duration::from_secs(5)),
            ..PoolConfig::default()
        });
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut conn = pool.get().unwrap();
                        peak.fetch_max(pool.stats().active, Ordering::SeqCst);
                        conn_id(&mut conn);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().in_use, 0);
    }
}
