//! Connection state machine.
//!
//! Identical on the client and on an accepted server session: a one-shot
//! connect/greet transition negotiating byte order, then a steady-state
//! non-blocking I/O loop, then drain-on-shutdown. The same type drives both
//! sides; only [`Role`] differs.
//!
//! # State machine
//!
//! ```text
//! Idle -> Connecting -> Running -> Disconnecting -> (shut down)
//! ```
//!
//! `Idle` only applies to a client that hasn't called [`Connection::connect`]
//! yet; a session starts directly in `Connecting` since its socket already
//! exists.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netline_proto::{
    build_from_buffer, ByteOrder, EnvelopeAdapter, FrameBuffer, Message, MessageFactory, ReadWriteAdapter,
};

use crate::error::ConnectionError;
use crate::queue::SpscQueue;
use crate::socket::{AddressFamily, Socket};

/// Default per-direction framing buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// Default read timeout, in microseconds, for the steady-state socket.
pub const DEFAULT_READ_TIMEOUT_US: u64 = 10_000;

/// Deadline for the connect-time byte-order handshake.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(2);

/// Which side of the symmetric state machine this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dials out; reads the byte-order header during the handshake.
    Client,
    /// Wraps an accepted socket; writes the byte-order header during the
    /// handshake.
    Session,
}

/// Connection lifecycle state. Numeric values match the reference design's
/// state codes for readability when cross-checking traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed but not yet told to connect (client only).
    Idle = -1,
    /// One-shot connect + handshake transition in progress.
    Connecting = 1,
    /// User- or server-requested teardown in progress.
    Disconnecting = 2,
    /// Steady-state non-blocking I/O loop.
    Running = 3,
}

/// Why a connection shut down. A superset of the reference design's
/// session-side cause enum, extended with the causes the client-side
/// handshake and explicit disconnect can also produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// No shutdown has occurred.
    None,
    /// Cause not categorized further.
    Unknown,
    /// The peer closed the socket (`recv` returned 0).
    SocketClosed,
    /// The socket was explicitly shut down locally or reported a hangup.
    SocketShutdown,
    /// The codec detected an inconsistent framing state.
    InternalError,
    /// Connect or handshake failed.
    ConnectionDenied,
    /// `Connection::shutdown` was called by the owning application.
    Requested,
}

/// A one-shot, edge-triggered notification of a connection lifecycle event.
/// Cleared on the first [`Connection::take_signal`] call after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// The byte-order handshake completed; the connection entered
    /// [`ConnectionState::Running`].
    Connected,
    /// The connection shut down mid-stream (socket or codec failure).
    Disconnected,
    /// Connect or handshake failed before reaching `Running`.
    ConnectionDenied,
}

/// Configuration knobs for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host to dial. Unused for a session (the socket already exists).
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Address family to dial with.
    pub family: AddressFamily,
    /// Steady-state read timeout, in microseconds.
    pub read_timeout_us: u64,
    /// Per-direction framing buffer capacity.
    pub buffer_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            family: AddressFamily::Ipv4,
            read_timeout_us: DEFAULT_READ_TIMEOUT_US,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// A socket type that can dial out, used by client-role connections that
/// perform their own connect instead of wrapping an already-accepted socket.
pub trait Connect: Socket + Sized {
    /// Resolve and connect to `host:port` using `family`.
    fn connect(host: &str, port: u16, family: AddressFamily) -> io::Result<Self>;
}

impl Connect for std::net::TcpStream {
    fn connect(host: &str, port: u16, family: AddressFamily) -> io::Result<Self> {
        crate::socket::connect(host, port, family)
    }
}

/// Boxed dial callback, stored so the socket-generic I/O loop
/// (`run_connecting_transition`, `poll_once`) never needs a `Connect` bound
/// of its own — only constructors that actually dial require `S: Connect`.
type Dialer<S> = Box<dyn FnMut() -> io::Result<S> + Send>;

/// Owns one socket, its read/write framing buffers, the pending-message
/// slots, and the two cross-thread queues. Runs the connect/handshake/I-O
/// state machine described in the module docs.
pub struct Connection<S: Socket> {
    role: Role,
    socket: Option<S>,
    dialer: Option<Dialer<S>>,
    config: ConnectionConfig,
    factory: Arc<MessageFactory>,
    adapter: Arc<dyn ReadWriteAdapter>,

    read_buf: FrameBuffer,
    write_buf: FrameBuffer,
    read_pending: Option<Box<dyn Message>>,
    write_pending: Option<Arc<dyn Message>>,

    incoming: SpscQueue<Box<dyn Message>>,
    outgoing: SpscQueue<Arc<dyn Message>>,

    current: ConnectionState,
    next: ConnectionState,
    shutdown: AtomicBool,
    cause: ShutdownCause,
    pending_signal: Option<ConnectionSignal>,
}

impl<S: Socket> Connection<S> {
    fn new_internal(
        role: Role,
        socket: Option<S>,
        dialer: Option<Dialer<S>>,
        config: ConnectionConfig,
        factory: Arc<MessageFactory>,
        adapter: Option<Arc<dyn ReadWriteAdapter>>,
    ) -> Self {
        let buffer_capacity = config.buffer_capacity;
        let starts_connecting = socket.is_some();
        Self {
            role,
            socket,
            dialer,
            config,
            factory,
            adapter: adapter.unwrap_or_else(|| Arc::new(EnvelopeAdapter)),
            read_buf: FrameBuffer::new(buffer_capacity),
            write_buf: FrameBuffer::new(buffer_capacity),
            read_pending: None,
            write_pending: None,
            incoming: SpscQueue::new(),
            outgoing: SpscQueue::new(),
            current: ConnectionState::Idle,
            next: if starts_connecting { ConnectionState::Connecting } else { ConnectionState::Idle },
            shutdown: AtomicBool::new(false),
            cause: ShutdownCause::None,
            pending_signal: None,
        }
    }

    /// A client connection that hasn't dialed yet. Call [`Self::connect`] to
    /// begin. `S` must implement [`Connect`] so the transition can dial.
    #[must_use]
    pub fn new_client(config: ConnectionConfig, factory: Arc<MessageFactory>, adapter: Option<Arc<dyn ReadWriteAdapter>>) -> Self
    where
        S: Connect + 'static,
    {
        let host = config.host.clone();
        let port = config.port;
        let family = config.family;
        let dialer: Dialer<S> = Box::new(move || S::connect(&host, port, family));
        Self::new_internal(Role::Client, None, Some(dialer), config, factory, adapter)
    }

    /// A client connection wrapping an already-connected socket, for tests
    /// that drive both ends of a [`crate::socket::PipeSocket`] pair without
    /// a real dial.
    #[must_use]
    pub fn new_client_with_socket(
        socket: S,
        config: ConnectionConfig,
        factory: Arc<MessageFactory>,
        adapter: Option<Arc<dyn ReadWriteAdapter>>,
    ) -> Self {
        Self::new_internal(Role::Client, Some(socket), None, config, factory, adapter)
    }

    /// A server-side session wrapping a freshly accepted socket. Begins the
    /// handshake immediately.
    #[must_use]
    pub fn new_session(
        socket: S,
        config: ConnectionConfig,
        factory: Arc<MessageFactory>,
        adapter: Option<Arc<dyn ReadWriteAdapter>>,
    ) -> Self {
        Self::new_internal(Role::Session, Some(socket), None, config, factory, adapter)
    }

    /// Request the connect transition. Only valid for a client in
    /// [`ConnectionState::Idle`].
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.role != Role::Client || self.current != ConnectionState::Idle {
            return Err(ConnectionError::InvalidState { state: "not idle client", operation: "connect" });
        }
        self.next = ConnectionState::Connecting;
        Ok(())
    }

    /// Request a graceful shutdown. Asynchronous: observed on the next
    /// [`Self::poll_once`].
    pub fn shutdown(&mut self) {
        self.next = ConnectionState::Disconnecting;
    }

    /// Whether the connection is shutting down or has shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Why the connection shut down, or [`ShutdownCause::None`] if it
    /// hasn't.
    #[must_use]
    pub fn shutdown_cause(&self) -> ShutdownCause {
        self.cause
    }

    /// True iff the connection is in [`ConnectionState::Running`] and not
    /// shutting down — the single queryable steady-state indicator.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current == ConnectionState::Running && !self.is_shutdown()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.current
    }

    /// Take the pending lifecycle signal, if any, clearing it.
    pub fn take_signal(&mut self) -> Option<ConnectionSignal> {
        self.pending_signal.take()
    }

    /// Enqueue a message for the I/O loop to frame and send. Returns `false`
    /// if the outgoing queue was full and the message was dropped.
    pub fn push(&self, msg: Arc<dyn Message>) -> bool {
        self.outgoing.push(msg)
    }

    /// Pop the oldest fully-received message, or `None`.
    pub fn pop(&self) -> Option<Box<dyn Message>> {
        self.incoming.pop()
    }

    /// Whether [`Self::push`] has anything still waiting to be framed and
    /// sent by [`Self::poll_once`].
    #[must_use]
    pub fn has_pending_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Local loopback: push directly to the incoming queue without a wire
    /// round trip.
    pub fn execute(&self, msg: Box<dyn Message>) -> bool {
        self.incoming.push(msg)
    }

    fn fail(&mut self, cause: ShutdownCause) {
        self.shutdown.store(true, Ordering::Release);
        self.cause = cause;
        self.pending_signal = Some(match cause {
            ShutdownCause::ConnectionDenied => ConnectionSignal::ConnectionDenied,
            ShutdownCause::Requested => return,
            _ => ConnectionSignal::Disconnected,
        });
    }

    /// Run one pass of the state machine: the one-shot transition (if
    /// pending), then, if running, one `handle_read` + `handle_write` pass.
    /// Does not sleep — callers driving a dedicated I/O thread should sleep
    /// ~10ms between calls; callers ticking sessions from a worker pool
    /// should call this once per tick with no extra sleep.
    pub fn poll_once(&mut self) -> Result<(), ConnectionError> {
        if self.next != self.current {
            self.current = self.next;
            match self.current {
                ConnectionState::Connecting => self.run_connecting_transition(),
                ConnectionState::Disconnecting => {
                    self.fail(ShutdownCause::Requested);
                    Ok(())
                },
                _ => Ok(()),
            }?;
        }

        if self.current == ConnectionState::Running && !self.is_shutdown() {
            if let Err(err) = self.handle_read() {
                self.fail(shutdown_cause_for(&err));
                return Ok(());
            }
            if !self.is_shutdown() {
                if let Err(err) = self.handle_write() {
                    self.fail(shutdown_cause_for(&err));
                }
            }
        }

        Ok(())
    }

    fn run_connecting_transition(&mut self) -> Result<(), ConnectionError> {
        if self.socket.is_none() {
            let dial_result = match self.dialer.as_mut() {
                Some(dialer) => dialer(),
                None => Err(io::Error::other("connection has no socket and no dialer configured")),
            };
            match dial_result {
                Ok(socket) => self.socket = Some(socket),
                Err(_) => {
                    self.fail(ShutdownCause::ConnectionDenied);
                    return Ok(());
                },
            }
        }

        let handshake_result = match self.role {
            Role::Client => self.handshake_as_reader(),
            Role::Session => self.handshake_as_writer(),
        };

        if let Err(_err) = handshake_result {
            self.fail(ShutdownCause::ConnectionDenied);
            return Ok(());
        }

        if let Some(socket) = self.socket.as_ref() {
            socket.set_nonblocking(true)?;
        }

        self.next = ConnectionState::Running;
        self.current = ConnectionState::Running;
        self.pending_signal = Some(ConnectionSignal::Connected);
        Ok(())
    }

    fn handshake_as_writer(&mut self) -> Result<(), ConnectionError> {
        // INVARIANT: a session is only ever constructed with a socket already
        // present, and the writer side never runs before Connecting.
        #[allow(clippy::expect_used)]
        let socket = self.socket.as_mut().expect("socket present before handshake");
        let native = 1i32.to_ne_bytes();
        socket.write_all(&native)?;
        Ok(())
    }

    fn handshake_as_reader(&mut self) -> Result<(), ConnectionError> {
        // INVARIANT: reached only from run_connecting_transition, which requires
        // self.socket.is_some() to have entered Connecting in the first place.
        #[allow(clippy::expect_used)]
        let socket = self.socket.as_mut().expect("socket present before handshake");
        let mut buf = [0u8; 4];
        read_exact_with_deadline(socket, &mut buf, HANDSHAKE_DEADLINE)?;

        let as_native = i32::from_ne_bytes(buf);
        if as_native != 1 {
            let flipped = ByteOrder::native().flipped();
            self.read_buf.set_byte_order(flipped);
            self.write_buf.set_byte_order(flipped);
        }
        Ok(())
    }

    fn handle_read(&mut self) -> Result<(), ConnectionError> {
        let n = {
            let socket = self.socket.as_mut().ok_or(ConnectionError::InvalidState {
                state: "no socket",
                operation: "handle_read",
            })?;
            match socket.read(self.read_buf.writable_slice()) {
                Ok(0) => return Err(ConnectionError::Socket("peer closed".to_string())),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
                Err(err) => return Err(err.into()),
            }
        };
        self.read_buf.advance_limit(n)?;

        if let Some(mut msg) = self.read_pending.take() {
            let needs_more = self.adapter.read_from(&mut self.read_buf, msg.as_mut())?;
            if needs_more {
                self.read_pending = Some(msg);
            } else {
                self.incoming.push(msg);
            }
        }

        while self.read_pending.is_none() && self.read_buf.available() > 0 {
            match build_from_buffer(&mut self.read_buf, &self.factory)? {
                None => break,
                Some(mut msg) => {
                    let needs_more = self.adapter.read_from(&mut self.read_buf, msg.as_mut())?;
                    if needs_more {
                        self.read_pending = Some(msg);
                        break;
                    }
                    self.incoming.push(msg);
                },
            }
        }

        self.read_buf.compact();
        Ok(())
    }

    fn handle_write(&mut self) -> Result<(), ConnectionError> {
        while self.write_buf.free() > 2 {
            let msg = match self.write_pending.take() {
                Some(msg) => msg,
                None => match self.outgoing.pop() {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let needed = msg.declared_size().unwrap_or(0) as usize + 6;
            if self.write_buf.free() < needed {
                self.write_pending = Some(msg);
                break;
            }

            self.adapter.write_to(&mut self.write_buf, msg.as_ref())?;
            let _released = msg.consume();
        }

        if self.write_buf.available() > 0 {
            let sent = {
                let socket = self.socket.as_mut().ok_or(ConnectionError::InvalidState {
                    state: "no socket",
                    operation: "handle_write",
                })?;
                match socket.write(self.write_buf.readable_slice()) {
                    Ok(n) => n,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
                    Err(err) => return Err(err.into()),
                }
            };
            self.write_buf.advance_position(sent)?;
        }

        self.write_buf.compact();
        Ok(())
    }
}

fn shutdown_cause_for(err: &ConnectionError) -> ShutdownCause {
    match err {
        ConnectionError::Socket(_) => ShutdownCause::SocketClosed,
        ConnectionError::Factory(_) => ShutdownCause::InternalError,
        _ => ShutdownCause::Unknown,
    }
}

fn read_exact_with_deadline<S: Socket>(socket: &mut S, buf: &mut [u8], deadline: Duration) -> Result<(), ConnectionError> {
    let start = Instant::now();
    let mut filled = 0;
    socket.set_read_timeout(Some(deadline))?;

    loop {
        match socket.read(&mut buf[filled..]) {
            Ok(0) => return Err(ConnectionError::Socket("peer closed during handshake".to_string())),
            Ok(n) => {
                filled += n;
                if filled == buf.len() {
                    return Ok(());
                }
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut => {},
            Err(err) => return Err(err.into()),
        }

        if start.elapsed() >= deadline {
            return Err(ConnectionError::HandshakeTimeout { elapsed_ms: start.elapsed().as_millis() as u64 });
        }
    }
}
