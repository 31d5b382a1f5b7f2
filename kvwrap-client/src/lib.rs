//! # kvwrap Client
//!
//! Purpose: Provide a thin, typed, synchronous client over a pool of
//! connections to a Redis-compatible key-value server.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections, bounded by `max_active`.
//! 2. **Injected Collaborators**: The wrapper talks to a `Pool`; the pool
//!    talks to a `Dialer`. Either can be replaced without touching the other.
//! 3. **Scoped Borrowing**: One operation, one borrowed connection, released
//!    by `Drop` on every exit path.
//! 4. **Typed Replies**: `FromReply` converts raw replies into strings and
//!    integers with distinct nil and conversion errors.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use kvwrap_client::{KvWrapper, WrapperConfig};
//!
//! # fn main() -> kvwrap_client::WrapperResult<()> {
//! let wrapper = KvWrapper::connect(WrapperConfig::with_addr("127.0.0.1:6379"))?;
//! wrapper.ping()?;
//! wrapper.set_value("visits", &1i64, Some(Duration::from_secs(60)))?;
//! let visits = wrapper.get_int64_value("visits")?;
//! assert_eq!(visits, 1);
//! wrapper.destroy()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod conn;
mod error;
mod pool;
mod reply;
mod resp;
mod wrapper;

pub use config::WrapperConfig;
pub use conn::{Connection, Dialer, RespConnection, TcpDialer};
pub use error::{ErrorKind, WrapperError, WrapperResult};
pub use pool::{ConnectionPool, Pool, PoolConfig, PoolStats, PooledConnection};
pub use reply::FromReply;
pub use resp::{encode_command, read_reply, Command, Reply, ToArg};
pub use wrapper::{KvWrapper, LIVENESS_TOKEN};

pub use bytes::Bytes;
