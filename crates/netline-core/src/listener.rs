//! Listener: binds, listens, and polls for incoming sockets.
//!
//! Mirrors the [`crate::connection::Connection`] split between the
//! production socket type and an in-memory double: [`Listen`] abstracts
//! "bind + accept" the way [`crate::socket::Socket`] abstracts "read +
//! write", so the poll loop can be driven deterministically in tests.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use crate::env::Environment;
use crate::socket::{resolve_bind_addr, AddressFamily, Socket};

/// Lifecycle state of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Constructed, not yet told to start.
    Inactive,
    /// Bind in progress.
    Starting,
    /// Bound and polling for connections.
    Listening,
    /// `stop()` called; the poll loop will exit on its next iteration.
    Stopping,
}

/// A bind-and-accept boundary, implemented for [`TcpListener`] and for an
/// in-memory test double. Mirrors [`crate::connection::Connect`] on the
/// outbound side.
pub trait Listen: Sized + Send {
    /// The socket type handed to the acceptor on each accepted connection.
    type Socket: Socket;

    /// Bind to `addr`, ready to listen with the OS default backlog.
    fn bind(addr: SocketAddr) -> io::Result<Self>;

    /// Switch between blocking and non-blocking `accept`.
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Accept one pending connection, or `WouldBlock` if none is pending
    /// and the listener is in non-blocking mode.
    fn accept(&self) -> io::Result<Self::Socket>;

    /// The address actually bound (useful when `addr`'s port was 0).
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listen for TcpListener {
    type Socket = TcpStream;

    fn bind(addr: SocketAddr) -> io::Result<Self> {
        TcpListener::bind(addr)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpListener::set_nonblocking(self, nonblocking)
    }

    fn accept(&self) -> io::Result<TcpStream> {
        let (stream, _addr) = TcpListener::accept(self)?;
        Ok(stream)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Interval between non-blocking `accept` polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Binds a listening socket and repeatedly polls it for new connections,
/// handing each to a caller-supplied acceptor callback.
///
/// Generic over `L: Listen` (production: [`TcpListener`]; tests: an
/// in-memory double) and `E: Environment` so the 10ms poll interval can be
/// driven with a no-op sleep in tests.
pub struct Listener<L: Listen, E: Environment> {
    state: ListenerState,
    socket: Option<L>,
    env: E,
    host: String,
    port: u16,
    family: AddressFamily,
}

impl<L: Listen, E: Environment> Listener<L, E> {
    /// A listener that hasn't bound yet.
    #[must_use]
    pub fn new(host: String, port: u16, family: AddressFamily, env: E) -> Self {
        Self { state: ListenerState::Inactive, socket: None, env, host, port, family }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// The bound address, once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind and switch to non-blocking `accept`. Address family is honored
    /// via resolution only; `L::bind` itself binds exactly the resolved
    /// address.
    pub fn start(&mut self) -> io::Result<()> {
        self.state = ListenerState::Starting;
        let addr = resolve_bind_addr(&self.host, self.port)?;
        let _ = self.family;
        let socket = L::bind(addr)?;
        socket.set_nonblocking(true)?;
        self.socket = Some(socket);
        self.state = ListenerState::Listening;
        Ok(())
    }

    /// Request the poll loop to stop on its next iteration.
    pub fn stop(&mut self) {
        self.state = ListenerState::Stopping;
    }

    /// Poll once for a pending connection, handing it to `acceptor` if one
    /// arrived. Acceptor failure (it returns `Err`) is logged and ignored —
    /// the listener keeps running. Returns `true` if a connection was
    /// accepted this pass.
    pub fn poll_once<F>(&mut self, mut acceptor: F) -> io::Result<bool>
    where
        F: FnMut(L::Socket),
    {
        let socket = match self.socket.as_ref() {
            Some(socket) => socket,
            None => return Ok(false),
        };

        match socket.accept() {
            Ok(accepted) => {
                acceptor(accepted);
                Ok(true)
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(err) => {
                tracing::warn!(error = %err, "listener accept failed, continuing");
                Ok(false)
            },
        }
    }

    /// Run the poll loop until [`Self::stop`] is called (from another
    /// thread holding a shared handle, or from within `acceptor`'s closure
    /// environment via interior mutability).
    pub fn run_loop<F>(&mut self, mut acceptor: F)
    where
        F: FnMut(L::Socket),
    {
        while self.state == ListenerState::Listening {
            let _ = self.poll_once(&mut acceptor);
            self.env.sleep(POLL_INTERVAL);
        }
    }
}
