//! # tgwire-client
//!
//! Async MTProto 2.0 client engine on top of `tgwire-mtproto`.
//!
//! ## Features
//! - Abridged, Intermediate, Full and Obfuscated2 transports over TCP or SOCKS5
//! - Diffie-Hellman key exchange, run automatically when a DC has no key
//! - Request batching into containers, acks, salt and clock corrections
//! - Transparent reconnect that re-sends everything unanswered
//! - `FLOOD_WAIT` auto-retry with a configurable policy
//! - DC migration and per-DC exported senders
//! - Memory, string and file session stores
//!
//! ```rust,no_run
//! use tgwire_client::{Client, Config, StringSession};
//!
//! # async fn run() -> Result<(), tgwire_client::InvocationError> {
//! let client = Client::connect(Config {
//!     session: Box::new(StringSession::new()),
//!     ..Config::default()
//! })
//! .await?;
//! println!("session: {}", client.export_string_session());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod authenticator;
pub mod connection;
pub mod errors;
mod plain_sender;
mod pool;
mod request;
mod retry;
pub mod sender;
pub mod session;
pub mod session_backend;
pub mod socket;
pub mod socks5;

pub use connection::{Connection, TransportKind};
pub use errors::{ConnectionError, InvocationError, RpcError, RpcErrorKind};
pub use retry::{AutoSleep, MAX_FLOOD_SLEEP, NoRetries, RetryContext, RetryPolicy};
pub use sender::{AuthKeyCell, ConnectionState, MtpSender, SenderConfig, SenderHooks, Update};
pub use session::{DEFAULT_DC, Session};
pub use session_backend::{FileSession, MemorySession, StringSession};
pub use socket::{Connector, TcpConnector};
pub use socks5::Socks5Config;

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tgwire_crypto::{AuthKey, rsa};
use tgwire_tl_types::RemoteCall;
use tgwire_tl_types::mtproto::PingDelayDisconnect;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use pool::ExportedPool;
use session::default_dc_address;

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const PING_ATTEMPTS: usize = 3;
const PING_RETRY_DELAY: Duration = Duration::from_millis(100);
const PING_DISCONNECT_DELAY: i32 = 60;
const KEY_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Client::connect`].
pub struct Config {
    /// Where the home DC and auth keys live (default: [`MemorySession`]).
    pub session: Box<dyn Session>,
    /// Which MTProto transport framing to use (default: Abridged).
    pub transport: TransportKind,
    /// Optional SOCKS5 proxy. Ignored when `connector` is set.
    pub socks5: Option<Socks5Config>,
    /// How sockets are opened (default: [`TcpConnector`]).
    pub connector: Option<Arc<dyn Connector>>,
    /// Use the test DCs and test-server handshake numbering.
    pub test_servers: bool,
    /// Connection attempts before `connect` gives up; `None` keeps trying.
    pub connection_retries: Option<usize>,
    pub retry_delay: Duration,
    /// Attempts per [`Client::invoke`], migrations included.
    pub request_retries: usize,
    /// Flood waits up to this long are slept through; capped at
    /// [`MAX_FLOOD_SLEEP`]. Ignored when `retry_policy` is set.
    pub flood_sleep_threshold: Duration,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub security_checks: bool,
    pub auto_reconnect: bool,
    pub ping_interval: Duration,
    /// Idle time before a sender to a non-home DC is closed.
    pub exported_release_after: Duration,
    /// RSA keys accepted during key exchange; `None` uses Telegram's.
    pub server_keys: Option<Vec<rsa::Key>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: Box::new(MemorySession::new()),
            transport: TransportKind::Abridged,
            socks5: None,
            connector: None,
            test_servers: false,
            connection_retries: Some(5),
            retry_delay: Duration::from_secs(1),
            request_retries: 5,
            flood_sleep_threshold: Duration::from_secs(60),
            retry_policy: None,
            security_checks: true,
            auto_reconnect: true,
            ping_interval: Duration::from_secs(9),
            exported_release_after: Duration::from_secs(30),
            server_keys: None,
        }
    }
}

// ─── ClientInner ─────────────────────────────────────────────────────────────

struct ClientInner {
    session: std::sync::Mutex<Box<dyn Session>>,
    sender: MtpSender,
    pool: ExportedPool,
    connector: Arc<dyn Connector>,
    transport: TransportKind,
    retry_policy: Arc<dyn RetryPolicy>,
    test_servers: bool,
    connection_retries: Option<usize>,
    retry_delay: Duration,
    request_retries: usize,
    security_checks: bool,
    auto_reconnect: bool,
    ping_interval: Duration,
    server_keys: Option<Vec<rsa::Key>>,
    authorized: AtomicBool,
    closed: AtomicBool,
    updates_tx: mpsc::UnboundedSender<Update>,
    updates_rx: Mutex<mpsc::UnboundedReceiver<Update>>,
    keepalive: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// The client. Cheap to clone, internally Arc-wrapped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    // ── Connect ────────────────────────────────────────────────────────────

    /// Load the session, connect the home DC (exchanging a key if the
    /// session has none) and start the keep-alive.
    pub async fn connect(config: Config) -> Result<Self, InvocationError> {
        let mut session = config.session;
        session.load().map_err(ConnectionError::Session)?;
        if session.server_address().is_empty() {
            let (addr, port) = default_dc_address(DEFAULT_DC, config.test_servers)
                .ok_or(ConnectionError::UnknownDc(DEFAULT_DC))?;
            tracing::info!("[client] fresh session, starting on DC{DEFAULT_DC}");
            session.set_dc(DEFAULT_DC, addr, port);
        }
        let home_dc = session.dc_id();
        let home_key = session.auth_key(home_dc);

        let connector = config
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new(config.socks5.clone())));
        let retry_policy = config
            .retry_policy
            .unwrap_or_else(|| Arc::new(AutoSleep::new(config.flood_sleep_threshold)));
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let sender_config = SenderConfig {
                dc_id: home_dc,
                retries: config.connection_retries,
                delay: config.retry_delay,
                auto_reconnect: config.auto_reconnect,
                security_checks: config.security_checks,
                is_main: true,
                test_servers: config.test_servers,
                server_keys: config.server_keys.clone(),
            };
            let hooks = main_hooks(weak.clone(), updates_tx.clone());
            ClientInner {
                session: std::sync::Mutex::new(session),
                sender: MtpSender::new(home_key, sender_config, hooks),
                pool: ExportedPool::new(config.exported_release_after),
                connector,
                transport: config.transport,
                retry_policy,
                test_servers: config.test_servers,
                connection_retries: config.connection_retries,
                retry_delay: config.retry_delay,
                request_retries: config.request_retries.max(1),
                security_checks: config.security_checks,
                auto_reconnect: config.auto_reconnect,
                ping_interval: config.ping_interval,
                server_keys: config.server_keys,
                authorized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                updates_tx,
                updates_rx: Mutex::new(updates_rx),
                keepalive: std::sync::Mutex::new(None),
            }
        });

        let client = Self { inner };
        let connection = client.home_connection();
        client.inner.sender.connect(connection).await?;
        client.save_session()?;
        client.start_keepalive();
        Ok(client)
    }

    fn session(&self) -> MutexGuard<'_, Box<dyn Session>> {
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection_to(&self, dc_id: i32, address: &str, port: u16) -> Connection {
        let addr = if address.contains(':') { format!("[{address}]:{port}") } else { format!("{address}:{port}") };
        Connection::new(addr, dc_id, self.inner.transport.clone(), Arc::clone(&self.inner.connector))
    }

    fn home_connection(&self) -> Connection {
        let (dc_id, address, port) = {
            let session = self.session();
            (session.dc_id(), session.server_address().to_string(), session.port())
        };
        self.connection_to(dc_id, &address, port)
    }

    pub fn home_dc(&self) -> i32 {
        self.session().dc_id()
    }

    /// The sender talking to the home DC.
    pub fn sender(&self) -> &MtpSender {
        &self.inner.sender
    }

    // ── Session ────────────────────────────────────────────────────────────

    pub fn save_session(&self) -> Result<(), InvocationError> {
        self.session().save().map_err(ConnectionError::Session)?;
        tracing::debug!("[client] session saved");
        Ok(())
    }

    /// The home DC and its key as a [`StringSession`] string, or an empty
    /// string while there is no key.
    pub fn export_string_session(&self) -> String {
        let session = self.session();
        let dc_id = session.dc_id();
        let mut out = StringSession::new();
        out.set_dc(dc_id, session.server_address(), session.port());
        out.set_auth_key(dc_id, session.auth_key(dc_id));
        out.encode()
    }

    /// Tell the client whether the account is logged in. Logged-in accounts
    /// do not follow `PHONE_MIGRATE` and `NETWORK_MIGRATE`.
    pub fn mark_authorized(&self, authorized: bool) {
        self.inner.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::SeqCst)
    }

    // ── Updates ────────────────────────────────────────────────────────────

    /// Wait for the next connection-state change or raw `Updates` object.
    pub async fn next_update(&self) -> Option<Update> {
        self.inner.updates_rx.lock().await.recv().await
    }

    // ── Raw invoke ─────────────────────────────────────────────────────────

    /// Invoke any TL function on the home DC, following migrations and
    /// retrying as the retry policy allows.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let attempts = self.inner.request_retries;
        let mut fail_count = NonZeroU32::MIN;
        let mut slept_so_far = Duration::default();
        let mut last_error = None;

        for _ in 0..attempts {
            let error = match self.inner.sender.invoke(request).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if self.waits_for_new_key(&error) {
                tracing::info!("[client] waiting for a new key on DC{}", self.home_dc());
                let cell = self.inner.sender.auth_key_cell();
                match tokio::time::timeout(KEY_RECOVERY_TIMEOUT, cell.wait()).await {
                    Ok(Some(_)) => {
                        last_error = Some(error);
                        continue;
                    }
                    _ => return Err(error),
                }
            }

            if let InvocationError::Rpc(rpc) = &error {
                let login_migration = matches!(rpc.name.as_str(), "PHONE_MIGRATE" | "NETWORK_MIGRATE");
                let follow = login_migration || rpc.name == "USER_MIGRATE";
                if let Some(dc_id) = rpc.migrate_dc().filter(|_| follow) {
                    if login_migration && self.is_authorized() {
                        return Err(error);
                    }
                    tracing::info!("[client] {} asks us to move to DC{dc_id}", rpc.name);
                    self.switch_dc(dc_id).await?;
                    last_error = Some(error);
                    continue;
                }
            }

            let ctx = RetryContext { fail_count, slept_so_far, error };
            match self.inner.retry_policy.should_retry(&ctx) {
                ControlFlow::Continue(delay) => {
                    sleep(delay).await;
                    slept_so_far += delay;
                    fail_count = fail_count.saturating_add(1);
                    last_error = Some(ctx.error);
                }
                ControlFlow::Break(()) => return Err(ctx.error),
            }
        }

        let last = last_error.unwrap_or(InvocationError::Dropped);
        tracing::warn!("[client] giving up after {attempts} attempt(s): {last}");
        Err(InvocationError::RetriesExhausted { attempts, last: Box::new(last) })
    }

    /// The home DC dropped our key and recovery is under way.
    fn waits_for_new_key(&self, error: &InvocationError) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        match error {
            InvocationError::Connection(ConnectionError::AuthKeyLost) => true,
            InvocationError::NotConnected => self.inner.sender.auth_key_cell().get().is_none(),
            _ => false,
        }
    }

    // ── DC switching ───────────────────────────────────────────────────────

    /// Make `dc_id` the home DC and reconnect the main sender there with a
    /// new key.
    pub async fn switch_dc(&self, dc_id: i32) -> Result<(), InvocationError> {
        let (address, port) =
            default_dc_address(dc_id, self.inner.test_servers).ok_or(ConnectionError::UnknownDc(dc_id))?;
        tracing::info!("[client] switching home DC to DC{dc_id}");
        {
            let mut session = self.session();
            session.set_dc(dc_id, address, port);
            session.set_auth_key(dc_id, None);
        }
        self.inner.sender.invalidate_auth_key().await;
        self.inner.sender.reconnect_to(self.connection_to(dc_id, address, port)).await?;
        self.save_session()
    }

    // ── Exported senders ───────────────────────────────────────────────────

    /// Invoke `request` on `dc_id` through a dedicated sender. The home DC
    /// goes through [`Client::invoke`].
    ///
    /// The sender is keyed on its own; the account's authorization is not
    /// carried over to it.
    pub async fn invoke_on_dc<R: RemoteCall>(&self, dc_id: i32, request: &R) -> Result<R::Return, InvocationError> {
        if dc_id == self.home_dc() {
            return self.invoke(request).await;
        }
        let sender = self.inner.pool.borrow(dc_id, || self.connect_exported(dc_id)).await?;
        let result = sender.invoke(request).await;
        self.inner.pool.touch(dc_id).await;
        result
    }

    async fn connect_exported(&self, dc_id: i32) -> Result<MtpSender, ConnectionError> {
        let (address, port) =
            default_dc_address(dc_id, self.inner.test_servers).ok_or(ConnectionError::UnknownDc(dc_id))?;
        let key = self.session().auth_key(dc_id);
        let config = SenderConfig {
            dc_id,
            retries: self.inner.connection_retries,
            delay: self.inner.retry_delay,
            auto_reconnect: self.inner.auto_reconnect,
            security_checks: self.inner.security_checks,
            is_main: false,
            test_servers: self.inner.test_servers,
            server_keys: self.inner.server_keys.clone(),
        };
        let sender = MtpSender::new(key, config, exported_hooks(Arc::downgrade(&self.inner)));
        sender.connect(self.connection_to(dc_id, address, port)).await?;
        Ok(sender)
    }

    // ── Keep-alive ─────────────────────────────────────────────────────────

    fn start_keepalive(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.ping_interval;
        let handle = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                let client = Client { inner };
                if !client.inner.sender.is_connected() {
                    continue;
                }
                client.keepalive_tick().await;
            }
        });
        let mut slot = self.inner.keepalive.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    async fn keepalive_tick(&self) {
        for attempt in 1..=PING_ATTEMPTS {
            let ping = PingDelayDisconnect {
                ping_id: tgwire_crypto::random::long(),
                disconnect_delay: PING_DISCONNECT_DELAY,
            };
            match tokio::time::timeout(PING_TIMEOUT, self.inner.sender.invoke(&ping)).await {
                Ok(Ok(_)) => return,
                Ok(Err(e)) => tracing::debug!("[client] ping attempt {attempt} failed: {e}"),
                Err(_) => tracing::debug!("[client] ping attempt {attempt} timed out"),
            }
            sleep(PING_RETRY_DELAY).await;
        }
        if !self.inner.sender.is_connected() {
            return;
        }
        tracing::warn!("[client] no pong from DC{}, reconnecting", self.home_dc());
        if let Err(e) = self.inner.sender.reconnect_to(self.home_connection()).await {
            tracing::error!("[client] reconnect after failed pings: {e}");
        }
    }

    // ── Recovery ───────────────────────────────────────────────────────────

    async fn recover_broken(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        tracing::info!("[client] home DC dropped our key, negotiating a new one");
        if let Err(e) = self.inner.sender.reconnect_to(self.home_connection()).await {
            tracing::error!("[client] could not recover DC{}: {e}", self.home_dc());
        }
    }

    fn persist_key(&self, key: Option<AuthKey>, dc_id: i32) {
        let mut session = self.session();
        session.set_auth_key(dc_id, key);
        if let Err(e) = session.save() {
            tracing::warn!("[client] saving key for DC{dc_id}: {e}");
        }
    }

    async fn on_exported_break(&self, dc_id: i32) {
        if dc_id != self.home_dc() {
            self.persist_key(None, dc_id);
        }
        self.inner.pool.drop_sender(dc_id).await;
    }

    // ── Shutdown ───────────────────────────────────────────────────────────

    /// Stop the keep-alive, close every sender and persist the session.
    pub async fn disconnect(&self) -> Result<(), InvocationError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let keepalive = self.inner.keepalive.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = keepalive {
            handle.abort();
        }
        self.inner.sender.disconnect().await;
        self.inner.pool.clear().await;
        self.save_session()
    }
}

// ─── Hooks ────────────────────────────────────────────────────────────────────

fn main_hooks(weak: Weak<ClientInner>, updates: mpsc::UnboundedSender<Update>) -> SenderHooks {
    let broken = weak.clone();
    let on_update = move |update: Update| {
        if update == Update::ConnectionState(ConnectionState::Broken) {
            if let Some(inner) = broken.upgrade() {
                tokio::spawn(async move { Client { inner }.recover_broken().await });
            }
        }
        let _ = updates.send(update);
    };
    let on_key = move |key: Option<AuthKey>, dc_id: i32| {
        if let Some(inner) = weak.upgrade() {
            Client { inner }.persist_key(key, dc_id);
        }
    };
    SenderHooks {
        updates: Some(Arc::new(on_update)),
        auth_key: Some(Arc::new(on_key)),
        connection_break: None,
        auto_reconnect: Some(Arc::new(|| tracing::info!("[client] home DC reconnected"))),
    }
}

fn exported_hooks(weak: Weak<ClientInner>) -> SenderHooks {
    let raw_updates = weak.clone();
    let on_update = move |update: Update| {
        if let Update::Raw(_) = update {
            if let Some(inner) = raw_updates.upgrade() {
                let _ = inner.updates_tx.send(update);
            }
        }
    };
    let key_weak = weak.clone();
    let on_key = move |key: Option<AuthKey>, dc_id: i32| {
        if let Some(inner) = key_weak.upgrade() {
            Client { inner }.persist_key(key, dc_id);
        }
    };
    let on_break = move |dc_id: i32| {
        if let Some(inner) = weak.upgrade() {
            tokio::spawn(async move { Client { inner }.on_exported_break(dc_id).await });
        }
    };
    SenderHooks {
        updates: Some(Arc::new(on_update)),
        auth_key: Some(Arc::new(on_key)),
        connection_break: Some(Arc::new(on_break)),
        auto_reconnect: None,
    }
}
