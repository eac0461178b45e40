//! Proxy client: a [`Connection`] plus the dedicated I/O and consumer
//! threads that drive it.
//!
//! Mirrors `netline_server`'s session/worker-pool split, but a client owns
//! exactly one connection and no scheduler: one thread calls `poll_once` on
//! a fixed cadence, another drains received messages and runs each one
//! against `self` as the [`Message::run`] context.
#![allow(
    clippy::expect_used,
    reason = "lock().expect() on our own mutexes, poisoned only if another thread already panicked \
              while holding the lock, which this client treats as fatal"
)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netline_core::{Connect, Connection, ConnectionConfig, Socket};
use netline_proto::{Message, MessageFactory};

use crate::error::ClientError;
use crate::messages::ChallengeIn;

/// Interval between `poll_once` calls on the dedicated I/O thread.
const IO_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Interval the consumer thread sleeps when it finds nothing to pop.
const CONSUME_IDLE_INTERVAL: Duration = Duration::from_millis(5);

struct ClientThreads {
    io: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// A connection to a `netline_server::ProxyServer`, plus the consumer loop
/// that runs each received message with the client itself as context.
///
/// `S` is the socket type, generic for the same reason `netline_core`'s
/// `Connection` is: production code dials real `TcpStream`s, tests drive
/// both ends of an in-memory `PipeSocket` pair instead.
pub struct ProxyClient<S: Socket> {
    connection: Mutex<Connection<S>>,
    version: u32,
    certificate: Arc<[u8]>,
    shutdown: AtomicBool,
    threads: Mutex<Option<ClientThreads>>,
}

impl<S: Socket + 'static> ProxyClient<S> {
    fn build_factory() -> Arc<MessageFactory> {
        let mut factory = MessageFactory::new();
        factory
            .register(Box::new(ChallengeIn::new()))
            .expect("CHALLENGE_CODE registered exactly once per factory");
        Arc::new(factory)
    }

    /// A client wrapping an already-connected socket, for tests driving
    /// both ends of a `netline_core::socket::PipeSocket` pair without a
    /// real dial.
    #[must_use]
    pub fn with_socket(socket: S, config: ConnectionConfig, version: u32, certificate: Vec<u8>) -> Arc<Self> {
        let factory = Self::build_factory();
        let connection = Connection::new_client_with_socket(socket, config, factory, None);
        Arc::new(Self {
            connection: Mutex::new(connection),
            version,
            certificate: Arc::from(certificate),
            shutdown: AtomicBool::new(false),
            threads: Mutex::new(None),
        })
    }

    /// This client's configured protocol version, compared against the
    /// server's `ChallengeIn` advertisement.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The certificate bytes echoed back in `CertificateOut`.
    #[must_use]
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Enqueue a message for the I/O thread to frame and send. Returns
    /// `false` if the outgoing queue was full and the message was dropped.
    pub fn push(&self, msg: Arc<dyn Message>) -> bool {
        self.connection.lock().expect("client connection mutex poisoned").push(msg)
    }

    /// Whether anything pushed is still waiting to be framed and sent.
    #[must_use]
    pub fn has_pending_outgoing(&self) -> bool {
        self.connection.lock().expect("client connection mutex poisoned").has_pending_outgoing()
    }

    /// Whether the handshake has completed and the connection is exchanging
    /// messages.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.connection.lock().expect("client connection mutex poisoned").is_ready()
    }

    /// Ask the connection to shut down, then join the I/O and consumer
    /// threads. Idempotent: a second call is a no-op.
    pub fn disconnect(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connection.lock().expect("client connection mutex poisoned").shutdown();
        if let Some(threads) = self.threads.lock().expect("client threads mutex poisoned").take() {
            let _ = threads.io.join();
            let _ = threads.consumer.join();
        }
    }

    fn spawn_threads(self: &Arc<Self>) {
        let io_client = Arc::clone(self);
        let io = thread::spawn(move || {
            while !io_client.shutdown.load(Ordering::Acquire) {
                let failed = io_client
                    .connection
                    .lock()
                    .expect("client connection mutex poisoned")
                    .poll_once()
                    .is_err();
                if failed {
                    break;
                }
                thread::sleep(IO_POLL_INTERVAL);
            }
        });

        let consumer_client = Arc::clone(self);
        let consumer = thread::spawn(move || consumer_loop(&consumer_client));

        *self.threads.lock().expect("client threads mutex poisoned") = Some(ClientThreads { io, consumer });
    }
}

impl<S: Connect + Socket + 'static> ProxyClient<S> {
    /// A client that dials `config.host:config.port` when [`Self::connect`]
    /// is called.
    #[must_use]
    pub fn new(config: ConnectionConfig, version: u32, certificate: Vec<u8>) -> Arc<Self> {
        let factory = Self::build_factory();
        let connection = Connection::new_client(config, factory, None);
        Arc::new(Self {
            connection: Mutex::new(connection),
            version,
            certificate: Arc::from(certificate),
            shutdown: AtomicBool::new(false),
            threads: Mutex::new(None),
        })
    }

    /// Request the connect transition, then spawn the dedicated I/O and
    /// consumer threads.
    pub fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        self.connection.lock().expect("client connection mutex poisoned").connect()?;
        self.spawn_threads();
        Ok(())
    }
}

/// Drains received messages and runs each one with `client` as the
/// `Message::run` context. A `RunMessageError` (e.g. a rejected handshake
/// version) is logged and discarded — the connection keeps running; only
/// `disconnect` or a socket failure ends the loop.
fn consumer_loop<S: Socket + 'static>(client: &Arc<ProxyClient<S>>) {
    while !client.shutdown.load(Ordering::Acquire) {
        let popped = client.connection.lock().expect("client connection mutex poisoned").pop();
        match popped {
            Some(msg) => {
                if let Err(err) = msg.run(client.as_ref()) {
                    tracing::warn!(error = %err, "message handler rejected, discarding and continuing");
                }
                msg.consume();
            },
            None => thread::sleep(CONSUME_IDLE_INTERVAL),
        }
    }
}
