//! # Client Wrapper
//!
//! Purpose: Expose a small, typed, blocking API over a pool of connections to
//! a RESP key-value server.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvWrapper` hides pooling and protocol details.
//! 2. **One Command per Borrow**: Every operation takes one connection, issues
//!    one command, and lets the guard return it on every exit path.
//! 3. **Stateless Handle**: The wrapper holds only the pool, so it can be
//!    shared across threads without extra locking.
//! 4. **Fail Fast**: Nothing is retried; errors reach the caller as-is.

use std::time::Duration;

use crate::config::WrapperConfig;
use crate::conn::{Connection, Dialer, TcpDialer};
use crate::error::{WrapperError, WrapperResult};
use crate::pool::{ConnectionPool, Pool, PoolConfig, PoolStats};
use crate::reply::FromReply;
use crate::resp::{Command, Reply, ToArg};

/// Reply expected from a healthy server for PING.
pub const LIVENESS_TOKEN: &str = "PONG";

/// Typed client over a connection pool.
pub struct KvWrapper<P: Pool = ConnectionPool> {
    pool: P,
}

impl KvWrapper<ConnectionPool<TcpDialer>> {
    /// Builds a wrapper whose pool dials `addr` on demand.
    ///
    /// No connection is opened here; dial failures surface from the first
    /// operation that needs a new connection.
    ///
    /// The pool has no wait timeout: once `max_active` connections are
    /// borrowed, further callers fail at once with
    /// [`WrapperError::PoolExhausted`]. Use [`KvWrapper::connect`] with
    /// [`WrapperConfig::wait_timeout`] to make them wait for a free slot.
    pub fn from_tcp(
        addr: impl Into<String>,
        max_idle: usize,
        max_active: usize,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let pool = ConnectionPool::new(
            TcpDialer::new(addr),
            PoolConfig {
                max_idle,
                max_active,
                idle_timeout,
                wait_timeout: None,
            },
        );
        KvWrapper::from_pool(pool)
    }

    /// Builds a wrapper from a validated configuration.
    pub fn connect(config: WrapperConfig) -> WrapperResult<Self> {
        config.validate()?;
        tracing::debug!(
            addr = %config.addr,
            max_idle = config.max_idle,
            max_active = config.max_active,
            "creating pooled wrapper"
        );
        Ok(KvWrapper::from_pool(ConnectionPool::new(
            config.dialer(),
            config.pool_config(),
        )))
    }
}

impl<D: Dialer> KvWrapper<ConnectionPool<D>> {
    /// Current pool occupancy.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl<P: Pool> KvWrapper<P> {
    /// Adopts an existing pool as-is.
    pub fn from_pool(pool: P) -> Self {
        KvWrapper { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Stores `value` under `key`.
    ///
    /// `None` or a zero expiry stores the value without expiration. Whole
    /// seconds use SETEX; anything finer uses PSETEX.
    pub fn set_value<V: ToArg + ?Sized>(
        &self,
        key: &str,
        value: &V,
        expiry: Option<Duration>,
    ) -> WrapperResult<()> {
        let command = match expiry.filter(|ttl| !ttl.is_zero()) {
            None => Command::new("SET").arg(key).arg(value),
            Some(ttl) if ttl.subsec_nanos() == 0 => {
                Command::new("SETEX").arg(key).arg(&ttl.as_secs()).arg(value)
            }
            Some(ttl) => Command::new("PSETEX")
                .arg(key)
                .arg(&expiry_millis(ttl))
                .arg(value),
        };

        match self.execute(&command)? {
            Reply::Status(ref text) if &text[..] == b"OK" => Ok(()),
            other => Err(WrapperError::UnexpectedReply(other.to_string())),
        }
    }

    /// Returns the raw GET reply; `Reply::Nil` when the key is absent.
    pub fn get_value(&self, key: &str) -> WrapperResult<Reply> {
        self.execute(&Command::new("GET").arg(key))
    }

    /// GET converted to any [`FromReply`] type. Use `Option<T>` to map an
    /// absent key to `None`.
    pub fn get<T: FromReply>(&self, key: &str) -> WrapperResult<T> {
        self.query(&Command::new("GET").arg(key))
    }

    /// GET as a string.
    pub fn get_string_value(&self, key: &str) -> WrapperResult<String> {
        self.get(key)
    }

    /// GET as a 32-bit integer.
    pub fn get_int_value(&self, key: &str) -> WrapperResult<i32> {
        self.get(key)
    }

    /// GET as a 64-bit integer.
    pub fn get_int64_value(&self, key: &str) -> WrapperResult<i64> {
        self.get(key)
    }

    /// Deletes `key`. Deleting an absent key is not an error.
    pub fn remove_value(&self, key: &str) -> WrapperResult<()> {
        self.execute(&Command::new("DEL").arg(key)).map(|_| ())
    }

    /// Flushes every key on the server, not just the ones this wrapper wrote.
    pub fn clear(&self) -> WrapperResult<()> {
        self.execute(&Command::new("FLUSHALL")).map(|_| ())
    }

    /// Checks liveness: the server must answer PING with `PONG`.
    pub fn ping(&self) -> WrapperResult<()> {
        let reply = self.execute(&Command::new("PING"))?;
        match &reply {
            Reply::Status(text) | Reply::Bulk(text)
                if &text[..] == LIVENESS_TOKEN.as_bytes() =>
            {
                Ok(())
            }
            other => Err(WrapperError::LivenessMismatch(other.to_string())),
        }
    }

    /// Issues `command` verbatim and returns the raw reply.
    ///
    /// Server error replies become [`WrapperError::Server`].
    pub fn execute(&self, command: &Command) -> WrapperResult<Reply> {
        let mut conn = self.pool.acquire()?;
        conn.issue(command)?.into_result()
    }

    /// Issues `command` and converts the reply.
    pub fn query<T: FromReply>(&self, command: &Command) -> WrapperResult<T> {
        T::from_reply(self.execute(command)?)
    }

    /// Closes the pool and consumes the wrapper.
    ///
    /// Other handles sharing the same pool get `PoolClosed` afterwards.
    pub fn destroy(self) -> WrapperResult<()> {
        self.pool.close()
    }
}

/// PSETEX argument for `ttl`: rounded up so a sub-millisecond TTL never
/// turns into "no expiry", saturating at `u64::MAX`.
fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}
