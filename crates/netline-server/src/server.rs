//! `ProxyServer`: session registry, worker pool, and listener wired
//! together behind the public operations a caller drives.
#![allow(
    clippy::expect_used,
    reason = "lock().expect() on our own mutexes, poisoned only if another thread already panicked \
              while holding the lock, which this server treats as fatal"
)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netline_core::listener::{Listen, Listener, ListenerState, POLL_INTERVAL};
use netline_core::{AddressFamily, ConnectionConfig, Environment, Socket};
use netline_proto::{Message, MessageFactory, CERTIFICATE_CODE};

use crate::driver::WorkerPool;
use crate::error::ServerError;
use crate::messages::{CertificateIn, ChallengeOut};
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Authenticated multi-session proxy server.
///
/// Owns a [`SessionRegistry`] (id allocation plus the `id -> Session` map),
/// a [`WorkerPool`] ticking every registered session at the configured
/// cadence, and a [`Listener`] accepting new sockets on a dedicated thread.
/// All public operations take `&self`: the registry, the pool, and the
/// listener's lifecycle state are each guarded by their own lock so the
/// server can be shared as `Arc<ProxyServer<L, E>>` across the listener
/// thread and every session's scheduled tick closure.
pub struct ProxyServer<L: Listen + 'static, E: Environment + Clone> {
    host: String,
    port: u16,
    pool_size: usize,
    tick_delay: Duration,
    env: E,
    version: AtomicU32,
    certificate: Mutex<Arc<[u8]>>,
    factory: Arc<MessageFactory>,
    registry: Arc<Mutex<SessionRegistry<L::Socket>>>,
    pool: Mutex<Option<WorkerPool<E>>>,
    listener: Mutex<Option<RunningListenerHandle<L, E>>>,
}

struct RunningListenerHandle<L: Listen + 'static, E: Environment> {
    shared: Arc<Mutex<Listener<L, E>>>,
    thread: JoinHandle<()>,
}

impl<L: Listen + 'static, E: Environment + Clone + 'static> ProxyServer<L, E> {
    /// A server configured but not yet listening. `version`/`certificate`
    /// are the handshake parameters every session checks a client against.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        pool_size: usize,
        tick_delay: Duration,
        version: u32,
        certificate: Vec<u8>,
        env: E,
    ) -> Arc<Self> {
        let mut factory = MessageFactory::new();
        factory
            .register(Box::new(CertificateIn::new()))
            .expect("certificate code registered exactly once at construction");
        debug_assert_eq!(factory.len(), 1, "only CertificateIn is registered under {CERTIFICATE_CODE}");

        Arc::new(Self {
            host: host.into(),
            port,
            pool_size,
            tick_delay,
            env,
            version: AtomicU32::new(version),
            certificate: Mutex::new(Arc::from(certificate)),
            factory: Arc::new(factory),
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            pool: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    /// Lazily construct the worker pool and the listener, then start
    /// listening on `family`. Accepted sockets are scheduled automatically.
    pub fn start(self: &Arc<Self>, family: AddressFamily) -> Result<(), ServerError> {
        {
            let mut pool_guard = self.pool.lock().expect("worker pool mutex poisoned");
            if pool_guard.is_none() {
                let mut pool = WorkerPool::new(self.pool_size, Arc::new(self.env.clone()));
                pool.start();
                *pool_guard = Some(pool);
            }
        }

        let mut listener: Listener<L, E> = Listener::new(self.host.clone(), self.port, family, self.env.clone());
        listener.start()?;
        let shared = Arc::new(Mutex::new(listener));

        let server = Arc::clone(self);
        let shared_for_thread = Arc::clone(&shared);
        let env_for_thread = self.env.clone();
        let thread = thread::spawn(move || loop {
            let mut guard = shared_for_thread.lock().expect("listener mutex poisoned");
            if guard.state() != ListenerState::Listening {
                break;
            }
            let _ = guard.poll_once(|socket| {
                server.schedule(socket);
            });
            drop(guard);
            env_for_thread.sleep(POLL_INTERVAL);
        });

        *self.listener.lock().expect("listener handle mutex poisoned") =
            Some(RunningListenerHandle { shared, thread });
        Ok(())
    }

    /// The bound listener address, once `start` has been called. `None`
    /// before starting or if the bind somehow left no socket behind.
    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener
            .lock()
            .expect("listener handle mutex poisoned")
            .as_ref()
            .and_then(|handle| handle.shared.lock().expect("listener mutex poisoned").local_addr())
    }

    /// Stop the listener, then terminate the worker pool, draining
    /// whatever tick each worker thread is currently mid-invocation on.
    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().expect("listener handle mutex poisoned").take() {
            handle.shared.lock().expect("listener mutex poisoned").stop();
            let _ = handle.thread.join();
        }
        if let Some(mut pool) = self.pool.lock().expect("worker pool mutex poisoned").take() {
            pool.stop();
        }
    }

    /// Push `msg` onto `session_id`'s outgoing queue. The registry lock is
    /// released before the push so a slow or full queue never blocks
    /// lookups for other sessions.
    pub fn send(&self, session_id: u64, msg: Arc<dyn Message>) -> Result<(), ServerError> {
        let handle = {
            let registry = self.registry.lock().expect("session registry mutex poisoned");
            registry.get(session_id)
        };
        let handle = handle.ok_or_else(|| ServerError::InvalidParameter(format!("no session with id {session_id}")))?;
        handle.lock().expect("session mutex poisoned").connection().push(msg);
        Ok(())
    }

    /// Push the same message to every registered session. `msg`'s consume
    /// counter must already be set to the session count by the caller, so
    /// it releases exactly once after the last recipient consumes it.
    pub fn multicast(&self, msg: Arc<dyn Message>) {
        let handles: Vec<_> = {
            let registry = self.registry.lock().expect("session registry mutex poisoned");
            registry.sessions().collect()
        };
        msg.consume_counter().set(handles.len() as i32);
        for handle in handles {
            handle.lock().expect("session mutex poisoned").connection().push(Arc::clone(&msg));
        }
    }

    /// Number of currently registered sessions.
    #[must_use]
    pub fn get_num_sessions(&self) -> usize {
        self.registry.lock().expect("session registry mutex poisoned").len()
    }

    /// Allocate and return a fresh id without registering a session under
    /// it yet.
    pub fn get_next_id(&self) -> u64 {
        self.registry.lock().expect("session registry mutex poisoned").allocate_id()
    }

    /// Return `id` to the free pool.
    pub fn release_id(&self, id: u64) {
        self.registry.lock().expect("session registry mutex poisoned").release_id(id);
    }

    /// Set the protocol version new handshakes advertise.
    pub fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::Release);
    }

    /// The currently configured protocol version.
    #[must_use]
    pub fn get_version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Set the certificate bytes new handshakes expect clients to echo.
    pub fn set_certificate(&self, certificate: Vec<u8>) {
        *self.certificate.lock().expect("certificate mutex poisoned") = Arc::from(certificate);
    }

    /// The currently configured certificate bytes.
    #[must_use]
    pub fn get_certificate(&self) -> Arc<[u8]> {
        Arc::clone(&self.certificate.lock().expect("certificate mutex poisoned"))
    }

    /// Mark a session for removal; the scheduler observes the flag on its
    /// next tick and removes it.
    pub fn terminate_session(&self, id: u64) -> Result<(), ServerError> {
        let handle = self.registry.lock().expect("session registry mutex poisoned").get(id);
        match handle {
            Some(handle) => {
                handle.lock().expect("session mutex poisoned").cancel();
                Ok(())
            },
            None => Err(ServerError::InvalidParameter(format!("no session with id {id}"))),
        }
    }

    /// Wrap `socket` in a session, send its handshake challenge, register it
    /// in the scheduler, and return its id. Called by the listener's
    /// acceptor callback, but exposed so embedding code can hand off an
    /// already-accepted socket directly.
    pub fn schedule(&self, socket: L::Socket) -> u64 {
        let certificate = self.get_certificate();
        let factory = Arc::clone(&self.factory);
        let config = ConnectionConfig::default();
        let env = self.env.clone();

        let id = {
            let mut registry = self.registry.lock().expect("session registry mutex poisoned");
            registry.insert(|id| Session::new(id, socket, config, factory, certificate, |buf| env.random_bytes(buf)))
        };

        self.send_challenge(id);
        self.schedule_tick(id);
        id
    }

    fn send_challenge(&self, id: u64) {
        let handle = self.registry.lock().expect("session registry mutex poisoned").get(id);
        let Some(handle) = handle else { return };
        let session = handle.lock().expect("session mutex poisoned");
        let challenge = ChallengeOut::new(self.get_version(), session.challenge());
        session.connection().push(Arc::new(challenge));
    }

    fn schedule_tick(&self, id: u64) {
        let registry = Arc::clone(&self.registry);
        let delay = self.tick_delay;
        let pool_guard = self.pool.lock().expect("worker pool mutex poisoned");
        let Some(pool) = pool_guard.as_ref() else { return };
        pool.schedule(delay, delay, move || tick_session(&registry, id));
    }

    /// Remove `id` from the registry, releasing its id back to the
    /// allocator. A no-op if `id` isn't registered.
    pub fn remove_session(&self, id: u64) {
        self.registry.lock().expect("session registry mutex poisoned").remove(id);
    }
}

/// One worker-pool tick for session `id`: lock just this session (not the
/// whole registry) to run it, then take the registry lock again only if it
/// needs removing. Returns the status the scheduler expects: `-1` to stop
/// scheduling, `0` to keep going.
fn tick_session<S: Socket + 'static>(registry: &Arc<Mutex<SessionRegistry<S>>>, id: u64) -> i32 {
    let handle = { registry.lock().expect("session registry mutex poisoned").get(id) };
    let Some(handle) = handle else { return -1 };

    let status = handle.lock().expect("session mutex poisoned").tick();
    if status == -1 {
        registry.lock().expect("session registry mutex poisoned").remove(id);
    }
    status
}
