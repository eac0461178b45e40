//! Socket boundary.
//!
//! The wire protocol, the framing buffer, and the connection state machine
//! are the novel design in this crate; the socket itself is a thin wrapper
//! over `std::net::TcpStream` so the state machine can be driven against an
//! in-memory double in tests instead of binding real ports.
#![allow(
    clippy::expect_used,
    reason = "PipeSocket's lock().expect() is poisoned only if a peer already panicked while \
              holding it, which this double treats as fatal just like a real socket error"
)]

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Address family selected at connect or bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// `AF_INET`.
    Ipv4,
    /// `AF_INET6`.
    Ipv6,
}

/// Minimal socket contract the connection state machine and listener depend
/// on. `std::net::TcpStream` implements it directly; tests use
/// [`PipeSocket`] instead.
pub trait Socket: Read + Write + Send {
    /// Switch between blocking and non-blocking mode.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Configure (or clear) the blocking read timeout.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut down both halves of the connection.
    fn shutdown(&self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

/// Resolve `host:port` and connect, honoring the requested address family.
///
/// `AddressFamily` filters the resolver's candidate addresses; if none match,
/// this fails the way the reference design's `InvalidPeerName` does.
pub fn connect(host: &str, port: u16, family: AddressFamily) -> io::Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let candidates = (host, port).to_socket_addrs()?;
    let chosen = candidates
        .filter(|addr| match family {
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        })
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address of the requested family"))?;

    TcpStream::connect(chosen)
}

/// An in-memory duplex pipe implementing [`Socket`], for driving the
/// connection state machine in tests without a real bound port.
///
/// Each direction is backed by a shared byte queue; reads return
/// [`io::ErrorKind::WouldBlock`] when empty rather than actually blocking,
/// which matches how the connection's non-blocking steady-state loop treats
/// the real socket.
pub struct PipeSocket {
    inbound: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<u8>>>,
    outbound: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<u8>>>,
}

impl PipeSocket {
    /// Create a connected pair: writes on one end become reads on the other.
    #[must_use]
    pub fn pair() -> (PipeSocket, PipeSocket) {
        let a_to_b = std::sync::Arc::new(std::sync::Mutex::new(std::collections::VecDeque::new()));
        let b_to_a = std::sync::Arc::new(std::sync::Mutex::new(std::collections::VecDeque::new()));
        (
            PipeSocket { inbound: b_to_a.clone(), outbound: a_to_b.clone() },
            PipeSocket { inbound: a_to_b, outbound: b_to_a },
        )
    }
}

impl Read for PipeSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().expect("pipe mutex poisoned");
        if inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data available"));
        }
        let n = inbound.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbound.pop_front().expect("checked non-empty above");
        }
        Ok(n)
    }
}

impl Write for PipeSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut outbound = self.outbound.lock().expect("pipe mutex poisoned");
        outbound.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for PipeSocket {
    fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

/// No-op process-wide socket library bootstrap, bracketing the library's
/// use the way the reference design's platform socket layer does on
/// WinSock-style targets. Reference-counted and idempotent; a no-op on
/// POSIX/Rust where no global initialization is required, kept so callers
/// that expect the bracketing contract have something to call.
pub struct SocketRuntime;

static RUNTIME_REFCOUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

impl SocketRuntime {
    /// Increment the process-wide reference count.
    pub fn init() {
        RUNTIME_REFCOUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Decrement the process-wide reference count.
    pub fn quit() {
        RUNTIME_REFCOUNT.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Resolve a `SocketAddr` from a bind host/port pair for the listener.
pub fn resolve_bind_addr(host: &str, port: u16) -> io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "could not resolve bind address"))
}
