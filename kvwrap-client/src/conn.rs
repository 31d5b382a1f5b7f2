//! # Connections and Dialing
//!
//! Purpose: Define the single-command connection contract and the factory
//! the pool uses to open new connections on demand.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Dialer` is swappable; any closure returning a
//!    connection works, which keeps the pool transport-agnostic.
//! 2. **Recoverable Dial Failures**: A failed dial is an ordinary error
//!    returned to whoever asked the pool for a connection.
//! 3. **Buffer Reuse**: Each TCP connection keeps its own encode and line buffers.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{WrapperError, WrapperResult};
use crate::resp::{encode_command, read_reply, Command, Reply};

/// A live connection able to issue one command and read its reply.
pub trait Connection {
    /// Sends `command` and returns the server's reply.
    ///
    /// Error replies from the server are returned as `Ok(Reply::Error(..))`;
    /// `Err` is reserved for transport and framing failures.
    fn issue(&mut self, command: &Command) -> WrapperResult<Reply>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn issue(&mut self, command: &Command) -> WrapperResult<Reply> {
        (**self).issue(command)
    }
}

/// Factory for new connections, invoked lazily by the pool.
pub trait Dialer: Send + Sync + 'static {
    /// Connection type produced by this dialer.
    type Conn: Connection + Send + 'static;

    /// Opens a new connection.
    fn dial(&self) -> WrapperResult<Self::Conn>;
}

impl<F, C> Dialer for F
where
    F: Fn() -> WrapperResult<C> + Send + Sync + 'static,
    C: Connection + Send + 'static,
{
    type Conn = C;

    fn dial(&self) -> WrapperResult<C> {
        self()
    }
}

/// Dials a RESP server over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TcpDialer {
    /// Creates a dialer for `addr` ("host:port") with no timeouts.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpDialer {
            addr: addr.into(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Bounds how long establishing the TCP connection may take.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds each socket read.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bounds each socket write.
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Address this dialer connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connect_stream(&self) -> WrapperResult<TcpStream> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|_| WrapperError::InvalidAddress(self.addr.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(WrapperError::InvalidAddress(self.addr.clone()));
        }

        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(WrapperError::Dial {
            addr: self.addr.clone(),
            source: last_err.unwrap_or_else(|| std::io::ErrorKind::NotConnected.into()),
        })
    }
}

impl Dialer for TcpDialer {
    type Conn = RespConnection;

    fn dial(&self) -> WrapperResult<RespConnection> {
        tracing::debug!(addr = %self.addr, "dialing");
        let stream = self.connect_stream().map_err(|err| {
            tracing::warn!(addr = %self.addr, error = %err, "dial failed");
            err
        })?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;
        // Small request/reply payloads; Nagle only adds latency here.
        stream.set_nodelay(true)?;
        Ok(RespConnection::new(stream))
    }
}

/// Single TCP connection speaking RESP2.
///
/// The buffers live on the connection so repeated commands do not allocate.
pub struct RespConnection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl RespConnection {
    /// Wraps an already-connected stream.
    pub fn new(stream: TcpStream) -> Self {
        RespConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        }
    }
}

impl Connection for RespConnection {
    fn issue(&mut self, command: &Command) -> WrapperResult<Reply> {
        self.write_buf.clear();
        encode_command(command, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_reply(&mut self.reader, &mut self.line_buf)
    }
}
