//! The encrypted MTProto sender.
//!
//! An [`MtpSender`] owns one [`MtpState`] and one [`Connection`] and runs two
//! tasks over them:
//!
//! * the **send loop** packs queued requests (and pending acks) into
//!   containers, encrypts them and hands them to the connection;
//! * the **receive loop** decrypts incoming packets and dispatches every
//!   service message: results resolve their request, salt and clock
//!   corrections resend it, updates go to the update hook.
//!
//! Transport failures reconnect transparently and re-send everything still
//! unanswered. A server that has forgotten our key (transport status 404)
//! stops the sender instead, since only a new key exchange can recover.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use tgwire_crypto::{AuthKey, rsa};
use tgwire_mtproto::authentication::builtin_keys;
use tgwire_mtproto::compression::gunzip;
use tgwire_mtproto::state::DecryptError;
use tgwire_mtproto::{MessagePacker, MtpState, TlMessage};
use tgwire_tl_types::deserialize::Error as DeserializeError;
use tgwire_tl_types::envelope::GzipPacked;
use tgwire_tl_types::mtproto::{self, DestroySession, MsgsStateInfo, Object};
use tgwire_tl_types::{Deserializable, Identifiable, RemoteCall, Serializable, is_updates};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::authenticator::do_authentication;
use crate::connection::Connection;
use crate::errors::{ConnectionError, InvocationError, RpcError};
use crate::plain_sender::PlainSender;
use crate::request::Request;

const LAST_ACKS: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// ─── Config & hooks ───────────────────────────────────────────────────────────

/// Tuning for one [`MtpSender`].
#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Data center this sender talks to.
    pub dc_id: i32,
    /// Connection attempts per connect; `None` keeps trying forever.
    pub retries: Option<usize>,
    /// Pause between connection attempts.
    pub delay: Duration,
    /// Reconnect by itself after the transport drops.
    pub auto_reconnect: bool,
    /// Reject replayed message IDs.
    pub security_checks: bool,
    /// The home sender reports key loss as [`ConnectionState::Broken`];
    /// exported senders call [`SenderHooks::connection_break`] instead.
    pub is_main: bool,
    /// Handshake as `10000 + dc_id`, the test-server numbering.
    pub test_servers: bool,
    /// RSA keys the servers may present during key exchange; `None` uses
    /// Telegram's.
    pub server_keys: Option<Vec<rsa::Key>>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            dc_id: 2,
            retries: None,
            delay: Duration::from_secs(2),
            auto_reconnect: true,
            security_checks: true,
            is_main: true,
            test_servers: false,
            server_keys: None,
        }
    }
}

/// Connection lifecycle as seen by the update hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// The server forgot our auth key. The sender is stopped and needs
    /// a fresh key before it can be used again.
    Broken,
}

/// What the update hook receives.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    ConnectionState(ConnectionState),
    /// A boxed `Updates` object, constructor ID included.
    Raw(Vec<u8>),
}

pub type UpdateHook = Arc<dyn Fn(Update) + Send + Sync>;
pub type AuthKeyHook = Arc<dyn Fn(Option<AuthKey>, i32) + Send + Sync>;
pub type ConnectionBreakHook = Arc<dyn Fn(i32) + Send + Sync>;
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Callbacks from the sender's tasks. They run on those tasks, so they must
/// not block; spawn anything that awaits the sender.
#[derive(Clone, Default)]
pub struct SenderHooks {
    pub updates: Option<UpdateHook>,
    /// A key was generated (`Some`) or dropped (`None`) for this DC.
    pub auth_key: Option<AuthKeyHook>,
    pub connection_break: Option<ConnectionBreakHook>,
    /// The sender reconnected by itself.
    pub auto_reconnect: Option<ReconnectHook>,
}

impl fmt::Debug for SenderHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderHooks")
            .field("updates", &self.updates.is_some())
            .field("auth_key", &self.auth_key.is_some())
            .field("connection_break", &self.connection_break.is_some())
            .field("auto_reconnect", &self.auto_reconnect.is_some())
            .finish()
    }
}

// ─── AuthKeyCell ──────────────────────────────────────────────────────────────

/// The sender's current auth key, shareable with whoever needs to wait for it.
#[derive(Clone, Debug)]
pub struct AuthKeyCell(Arc<watch::Sender<Option<AuthKey>>>);

impl AuthKeyCell {
    pub fn new(key: Option<AuthKey>) -> Self {
        Self(Arc::new(watch::Sender::new(key)))
    }

    pub fn get(&self) -> Option<AuthKey> {
        self.0.borrow().clone()
    }

    pub fn set(&self, key: Option<AuthKey>) {
        self.0.send_replace(key);
    }

    /// Resolve once a key is present (immediately if it already is).
    pub async fn wait(&self) -> Option<AuthKey> {
        let mut rx = self.0.subscribe();
        rx.wait_for(Option::is_some).await.ok().and_then(|key| (*key).clone())
    }
}

// ─── MtpSender ────────────────────────────────────────────────────────────────

struct RecentAck {
    msg_id: i64,
    body: Vec<u8>,
}

struct Loops {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: SenderConfig,
    hooks: SenderHooks,
    // Lock order: packer, then state. pending, then last_acks.
    state: Mutex<MtpState>,
    packer: Mutex<MessagePacker<Request>>,
    pending: Mutex<HashMap<i64, Request>>,
    pending_ack: Mutex<Vec<i64>>,
    last_acks: Mutex<VecDeque<RecentAck>>,
    wake: Notify,
    connection: Mutex<Option<Arc<Connection>>>,
    loops: Mutex<Option<Loops>>,
    // Held for a whole reconnect, so only one runs at a time.
    reconnect_lock: Mutex<()>,
    // Held while the live connection and loops are swapped or torn down.
    lifecycle: Mutex<()>,
    user_connected: AtomicBool,
    reconnecting: AtomicBool,
    dc_id: AtomicI32,
    auth_key: AuthKeyCell,
}

/// Encrypted request/response engine for one data center. Cheap to clone.
#[derive(Clone)]
pub struct MtpSender {
    inner: Arc<Inner>,
}

impl fmt::Debug for MtpSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtpSender")
            .field("dc_id", &self.dc_id())
            .field("user_connected", &self.inner.user_connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MtpSender {
    pub fn new(auth_key: Option<AuthKey>, config: SenderConfig, hooks: SenderHooks) -> Self {
        let state = MtpState::new(auth_key.clone(), config.security_checks);
        Self {
            inner: Arc::new(Inner {
                dc_id: AtomicI32::new(config.dc_id),
                config,
                hooks,
                state: Mutex::new(state),
                packer: Mutex::new(MessagePacker::new()),
                pending: Mutex::new(HashMap::new()),
                pending_ack: Mutex::new(Vec::new()),
                last_acks: Mutex::new(VecDeque::with_capacity(LAST_ACKS)),
                wake: Notify::new(),
                connection: Mutex::new(None),
                loops: Mutex::new(None),
                reconnect_lock: Mutex::new(()),
                lifecycle: Mutex::new(()),
                user_connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                auth_key: AuthKeyCell::new(auth_key),
            }),
        }
    }

    pub fn dc_id(&self) -> i32 {
        self.inner.dc_id.load(Ordering::SeqCst)
    }

    pub fn auth_key_cell(&self) -> AuthKeyCell {
        self.inner.auth_key.clone()
    }

    /// Connected by the user and not since disconnected by them.
    pub fn is_connected(&self) -> bool {
        self.inner.user_connected.load(Ordering::SeqCst)
    }

    /// Open `connection`, exchange a key if there is none, start the loops.
    ///
    /// Does nothing if already connected.
    pub async fn connect(&self, connection: Connection) -> Result<(), ConnectionError> {
        if self.inner.user_connected.swap(true, Ordering::SeqCst) {
            tracing::info!("[sender] DC{} is already connected", self.dc_id());
            return Ok(());
        }
        let result = self.inner.connect_with_retries(Arc::new(connection)).await;
        if result.is_err() {
            self.inner.user_connected.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Queue a pre-serialized request and wait for the raw answer.
    pub async fn send_raw(&self, body: Vec<u8>, name: &'static str) -> Result<Vec<u8>, InvocationError> {
        let (request, rx) = Request::raw(body, name);
        self.enqueue(request, rx).await
    }

    /// Queue `request` and wait for the raw answer bytes.
    pub async fn send<R: RemoteCall>(&self, request: &R) -> Result<Vec<u8>, InvocationError> {
        let (request, rx) = Request::new(request);
        self.enqueue(request, rx).await
    }

    /// [`Self::send`], then decode the declared return type.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.send(request).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    async fn enqueue(
        &self,
        request: Request,
        rx: crate::request::ResponseRx,
    ) -> Result<Vec<u8>, InvocationError> {
        if !self.is_connected() {
            return Err(InvocationError::NotConnected);
        }
        self.inner.packer.lock().await.push(request);
        if !self.is_connected() {
            // Stopped while this request was being queued.
            self.inner.fail_queued(|| InvocationError::Dropped).await;
        }
        self.inner.wake.notify_one();
        rx.await.map_err(|_| InvocationError::Dropped)?
    }

    /// Stop for good: close the connection and fail everything in flight.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Forget the current key; the next connect runs a key exchange.
    pub async fn invalidate_auth_key(&self) {
        self.inner.state.lock().await.set_auth_key(None);
        self.inner.auth_key.set(None);
    }

    /// Move onto `connection` (possibly another DC) and re-send whatever is
    /// still unanswered. Concurrent calls run one after another.
    ///
    /// If the new connection cannot be opened the sender stops, as if
    /// [`Self::disconnect`] had been called.
    pub async fn reconnect_to(&self, connection: Connection) -> Result<(), ConnectionError> {
        self.inner.user_connected.store(true, Ordering::SeqCst);
        self.inner.reconnect_to(connection).await
    }

    /// Install a key obtained elsewhere, e.g. loaded after a session switch.
    pub async fn set_auth_key(&self, key: Option<AuthKey>) {
        self.inner.state.lock().await.set_auth_key(key.clone());
        self.inner.auth_key.set(key);
    }
}

impl Inner {
    fn dc_id(&self) -> i32 {
        self.dc_id.load(Ordering::SeqCst)
    }

    fn emit(&self, update: Update) {
        if let Some(hook) = &self.hooks.updates {
            hook(update);
        }
    }

    fn emit_state(&self, state: ConnectionState) {
        self.emit(Update::ConnectionState(state));
    }

    // ── Connecting ─────────────────────────────────────────────────────────

    async fn connect_with_retries(self: &Arc<Self>, connection: Arc<Connection>) -> Result<(), ConnectionError> {
        let attempts = self.config.retries.map(|r| r.max(1));
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_connect(&connection).await {
                Ok(()) => break,
                Err(e) => {
                    connection.disconnect().await;
                    if attempt == 1 {
                        self.emit_state(ConnectionState::Disconnected);
                    }
                    tracing::warn!("[sender] attempt {attempt} to connect to DC{} failed: {e}", connection.dc_id());
                    if attempts.is_some_and(|max| attempt >= max) || !self.user_connected.load(Ordering::SeqCst) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.delay).await;
                }
            }
        }

        self.install(connection).await
    }

    /// Make `connection` the live one and start its loops, unless the user
    /// disconnected while it was being opened.
    async fn install(self: &Arc<Self>, connection: Arc<Connection>) -> Result<(), ConnectionError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_loops().await;
        if !self.user_connected.load(Ordering::SeqCst) {
            connection.disconnect().await;
            return Err(ConnectionError::NotConnected);
        }

        let old = self.connection.lock().await.replace(Arc::clone(&connection));
        if let Some(old) = old.filter(|old| !Arc::ptr_eq(old, &connection)) {
            old.disconnect().await;
        }
        self.start_loops(Arc::clone(&connection)).await;

        self.dc_id.store(connection.dc_id(), Ordering::SeqCst);
        self.emit_state(ConnectionState::Connected);
        tracing::info!("[sender] connected to DC{}", self.dc_id());
        Ok(())
    }

    async fn try_connect(&self, connection: &Connection) -> Result<(), ConnectionError> {
        connection.connect().await?;

        if self.state.lock().await.auth_key().is_some() {
            return Ok(());
        }

        let dc_id = connection.dc_id();
        let handshake_dc = if self.config.test_servers { 10_000 + dc_id } else { dc_id };
        tracing::info!("[sender] no auth key for DC{dc_id}, starting key exchange");
        let keys = self.config.server_keys.clone().unwrap_or_else(builtin_keys);
        let mut plain = PlainSender::new(connection);
        let finished = do_authentication(&mut plain, handshake_dc, &keys).await?;

        let key = AuthKey::from_bytes(finished.auth_key);
        {
            let mut state = self.state.lock().await;
            state.set_auth_key(Some(key.clone()));
            state.time_offset = finished.time_offset;
            state.salt = finished.first_salt;
        }
        self.auth_key.set(Some(key.clone()));
        if let Some(hook) = &self.hooks.auth_key {
            hook(Some(key), dc_id);
        }
        Ok(())
    }

    /// Replaces (and waits out) any loops already running.
    async fn start_loops(self: &Arc<Self>, connection: Arc<Connection>) {
        self.stop_loops().await;
        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(Arc::clone(self).send_loop(Arc::clone(&connection), cancel.clone())),
            tokio::spawn(Arc::clone(self).recv_loop(connection, cancel.clone())),
        ];
        *self.loops.lock().await = Some(Loops { cancel, tasks });
    }

    /// Never call from one of the loops: it waits for them to finish.
    async fn stop_loops(&self) {
        let Some(loops) = self.loops.lock().await.take() else {
            return;
        };
        loops.cancel.cancel();
        for task in loops.tasks {
            if let Err(e) = task.await {
                tracing::error!("[sender] loop task panicked: {e}");
            }
        }
    }

    async fn disconnect(&self) {
        self.user_connected.store(false, Ordering::SeqCst);
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.stop_loops().await;
            self.close_connection().await;
        }
        self.fail_all(|| InvocationError::Dropped).await;
        self.emit_state(ConnectionState::Disconnected);
    }

    /// [`Self::disconnect`] for the receive loop, which cannot wait for
    /// itself to finish.
    async fn stop_from_loop(&self, error: fn() -> InvocationError) {
        self.user_connected.store(false, Ordering::SeqCst);
        if let Some(loops) = self.loops.lock().await.take() {
            loops.cancel.cancel();
        }
        self.close_connection().await;
        self.fail_all(error).await;
    }

    async fn close_connection(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
    }

    async fn fail_queued(&self, error: fn() -> InvocationError) {
        for request in self.packer.lock().await.drain() {
            request.reject(error());
        }
    }

    /// Reject everything queued or awaiting an answer.
    async fn fail_all(&self, error: fn() -> InvocationError) {
        let queued = self.packer.lock().await.drain();
        let pending: Vec<Request> = self.pending.lock().await.drain().map(|(_, r)| r).collect();
        let failed = queued.len() + pending.len();
        for request in queued.into_iter().chain(pending) {
            request.reject(error());
        }
        if failed > 0 {
            tracing::info!("[sender] failed {failed} unanswered request(s) on DC{}", self.dc_id());
        }
    }

    fn start_reconnect(self: &Arc<Self>) {
        if !self.user_connected.load(Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(self);
        if !self.config.auto_reconnect {
            tracing::info!("[sender] connection to DC{} lost, auto-reconnect is off", self.dc_id());
            tokio::spawn(async move { inner.disconnect().await });
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            let fresh = inner.connection.lock().await.as_ref().map(|c| c.fresh());
            let result = match fresh {
                Some(connection) => inner.reconnect_to(connection).await,
                None => Err(ConnectionError::NotConnected),
            };
            inner.reconnecting.store(false, Ordering::SeqCst);
            match result {
                Ok(()) => {
                    if let Some(hook) = &inner.hooks.auto_reconnect {
                        hook();
                    }
                }
                Err(e) => tracing::error!("[sender] reconnect to DC{} failed: {e}", inner.dc_id()),
            }
        });
    }

    async fn reconnect_to(self: &Arc<Self>, connection: Connection) -> Result<(), ConnectionError> {
        let _serial = self.reconnect_lock.lock().await;
        tracing::info!("[sender] reconnecting to DC{} at {}", connection.dc_id(), connection.addr());
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.stop_loops().await;
            self.close_connection().await;
        }
        self.state.lock().await.reset();

        if let Err(e) = self.connect_with_retries(Arc::new(connection)).await {
            tracing::warn!("[sender] could not reconnect to DC{}, stopping: {e}", self.dc_id());
            self.disconnect().await;
            return Err(e);
        }

        let mut resend: Vec<Request> = self.pending.lock().await.drain().map(|(_, r)| r).collect();
        resend.sort_by_key(|r| r.msg_id);
        if !resend.is_empty() {
            tracing::info!("[sender] re-sending {} request(s)", resend.len());
            self.packer.lock().await.extend(resend);
            self.wake.notify_one();
        }
        Ok(())
    }

    // ── Send loop ──────────────────────────────────────────────────────────

    async fn send_loop(self: Arc<Self>, connection: Arc<Connection>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let acks = std::mem::take(&mut *self.pending_ack.lock().await);

            let batch = {
                let mut packer = self.packer.lock().await;
                if !acks.is_empty() {
                    packer.push(Request::ack(acks));
                }
                let mut state = self.state.lock().await;
                packer.pack(&mut state).map(|packed| {
                    let encrypted = packed.data.map(|data| state.encrypt_message_data(&data));
                    (packed.items, packed.oversized, encrypted)
                })
            };

            let Some((items, oversized, encrypted)) = batch else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.wake.notified() => continue,
                }
            };

            for request in oversized {
                let len = request.body.len();
                request.reject(InvocationError::TooLarge { len });
            }

            let data = match encrypted {
                None => continue,
                Some(Ok(data)) => data,
                Some(Err(e)) => {
                    tracing::error!("[sender] cannot encrypt for DC{}: {e}", self.dc_id());
                    for request in items {
                        request.reject(InvocationError::Connection(ConnectionError::Decrypt(e.clone())));
                    }
                    continue;
                }
            };

            tracing::debug!("[sender] sending {} message(s) to DC{}", items.len(), self.dc_id());
            self.register(items).await;

            if let Err(e) = connection.send(data).await {
                // The receive loop sees the same failure and reconnects.
                tracing::warn!("[sender] send to DC{} failed: {e}", self.dc_id());
                break;
            }
        }
    }

    async fn register(&self, items: Vec<Request>) {
        let mut pending = self.pending.lock().await;
        let mut last_acks = self.last_acks.lock().await;
        for request in items {
            let Some(msg_id) = request.msg_id else {
                continue;
            };
            if request.is_ack() {
                if last_acks.len() == LAST_ACKS {
                    last_acks.pop_front();
                }
                last_acks.push_back(RecentAck { msg_id, body: request.body });
            } else if request.expects_reply() {
                pending.insert(msg_id, request);
            }
        }
    }

    // ── Receive loop ───────────────────────────────────────────────────────

    async fn recv_loop(self: Arc<Self>, connection: Arc<Connection>, cancel: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return,
                received = connection.recv() => received,
            };
            let mut packet = match received {
                Ok(packet) => packet,
                Err(e) => {
                    if !cancel.is_cancelled() {
                        tracing::warn!("[sender] connection to DC{} lost: {e}", self.dc_id());
                        self.start_reconnect();
                    }
                    return;
                }
            };

            let decrypted = self.state.lock().await.decrypt_message_data(&mut packet);
            let message = match decrypted {
                Ok(message) => message,
                Err(DecryptError::Security(e)) => {
                    tracing::warn!("[sender] dropping packet from DC{}: {e}", self.dc_id());
                    continue;
                }
                Err(e) if e.is_auth_key_lost() => {
                    cancel.cancel();
                    self.on_auth_key_lost().await;
                    return;
                }
                Err(e) => {
                    tracing::warn!("[sender] unusable packet from DC{}: {e}", self.dc_id());
                    self.start_reconnect();
                    return;
                }
            };

            self.process_message(message).await;
            if !self.pending_ack.lock().await.is_empty() {
                self.wake.notify_one();
            }
        }
    }

    async fn on_auth_key_lost(&self) {
        let dc_id = self.dc_id();
        tracing::warn!("[sender] DC{dc_id} no longer knows our auth key");
        self.state.lock().await.set_auth_key(None);
        self.auth_key.set(None);
        if let Some(hook) = &self.hooks.auth_key {
            hook(None, dc_id);
        }
        self.stop_from_loop(|| InvocationError::Connection(ConnectionError::AuthKeyLost)).await;
        if self.config.is_main {
            self.emit_state(ConnectionState::Broken);
        } else if let Some(hook) = &self.hooks.connection_break {
            hook(dc_id);
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────────────

    async fn process_message(&self, message: TlMessage) {
        let mut queue = VecDeque::from([message]);
        while let Some(message) = queue.pop_front() {
            {
                let mut acks = self.pending_ack.lock().await;
                if !acks.contains(&message.msg_id) {
                    acks.push(message.msg_id);
                }
            }

            let object = match Object::from_bytes(&message.body) {
                Ok(object) => object,
                Err(DeserializeError::TypeNotFound { id, .. }) if is_updates(id) => {
                    self.emit(Update::Raw(message.body));
                    continue;
                }
                Err(DeserializeError::TypeNotFound { id, .. }) => {
                    tracing::debug!("[sender] no handler for constructor {id:#010x}");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("[sender] undecodable message {}: {e}", message.msg_id);
                    continue;
                }
            };

            match object {
                Object::MessageContainer(container) => {
                    tracing::debug!("[sender] container with {} message(s)", container.messages.len());
                    for inner in container.messages.into_iter().rev() {
                        queue.push_front(TlMessage { msg_id: inner.msg_id, seq_no: inner.seq_no, body: inner.body });
                    }
                }
                Object::GzipPacked(packed) => match gunzip(&packed.packed_data) {
                    Ok(body) => queue.push_front(TlMessage { body, ..message }),
                    Err(e) => tracing::warn!("[sender] bad gzip_packed: {e}"),
                },
                Object::RpcResult(result) => self.handle_rpc_result(result).await,
                Object::Pong(pong) => {
                    tracing::debug!("[sender] pong for {}", pong.msg_id);
                    self.resolve(pong.msg_id, message.body).await;
                }
                Object::FutureSalts(salts) => {
                    tracing::debug!("[sender] {} future salt(s)", salts.salts.0.len());
                    self.resolve(salts.req_msg_id, message.body).await;
                }
                Object::BadServerSalt(bad) => {
                    tracing::debug!("[sender] bad server salt for {}, adopting the new one", bad.bad_msg_id);
                    self.state.lock().await.salt = bad.new_server_salt;
                    let states = self.pop_states(bad.bad_msg_id).await;
                    self.resend(states).await;
                }
                Object::BadMsgNotification(bad) => self.handle_bad_notification(bad, message.msg_id).await,
                Object::MsgDetailedInfo(info) => self.queue_ack(info.answer_msg_id).await,
                Object::MsgNewDetailedInfo(info) => self.queue_ack(info.answer_msg_id).await,
                Object::NewSessionCreated(created) => {
                    tracing::debug!("[sender] new session created (first msg {})", created.first_msg_id);
                    self.state.lock().await.salt = created.server_salt;
                }
                Object::MsgsAck(ack) => self.handle_ack(&ack.msg_ids).await,
                Object::MsgsStateReq(req) => self.answer_state_request(message.msg_id, req.msg_ids.len()).await,
                Object::MsgResendReq(req) => self.answer_state_request(message.msg_id, req.msg_ids.len()).await,
                Object::MsgsAllInfo(_) => {}
                Object::DestroySessionOk(res) => self.handle_destroy_session(res.session_id, message.body).await,
                Object::DestroySessionNone(res) => self.handle_destroy_session(res.session_id, message.body).await,
                Object::RpcError(e) => {
                    tracing::warn!("[sender] stray rpc_error {}: {}", e.error_code, e.error_message);
                }
            }
        }
    }

    async fn handle_rpc_result(&self, result: tgwire_tl_types::envelope::RpcResult) {
        let Some(request) = self.pending.lock().await.remove(&result.req_msg_id) else {
            tracing::info!("[sender] result for {} has no waiting request", result.req_msg_id);
            return;
        };

        match result.inner_constructor() {
            Some(mtproto::RpcError::CONSTRUCTOR_ID) => match mtproto::RpcError::from_bytes(&result.result) {
                Ok(error) => {
                    self.packer.lock().await.push(Request::ack(vec![result.req_msg_id]));
                    self.wake.notify_one();
                    let error =
                        RpcError::from_telegram(error.error_code, &error.error_message).with_caused_by(request.name);
                    tracing::debug!("[sender] {} failed: {error}", request.name);
                    request.reject(InvocationError::Rpc(error));
                }
                Err(e) => request.reject(InvocationError::Deserialize(e)),
            },
            Some(GzipPacked::CONSTRUCTOR_ID) => {
                match GzipPacked::from_bytes(&result.result).map(|p| gunzip(&p.packed_data)) {
                    Ok(Ok(body)) => request.resolve(body),
                    Ok(Err(e)) => request.reject(e.into()),
                    Err(e) => request.reject(InvocationError::Deserialize(e)),
                }
            }
            _ => request.resolve(result.result),
        }
    }

    async fn handle_bad_notification(&self, bad: mtproto::BadMsgNotification, notification_id: i64) {
        let states = self.pop_states(bad.bad_msg_id).await;
        match bad.error_code {
            16 | 17 => {
                let offset = self.state.lock().await.update_time_offset(notification_id);
                tracing::info!("[sender] clock skew corrected, server time offset is now {offset}s");
            }
            32 => self.state.lock().await.adjust_sequence(64),
            33 => self.state.lock().await.adjust_sequence(-16),
            code => {
                tracing::warn!("[sender] message {} refused with code {code}", bad.bad_msg_id);
                for request in states {
                    let name = request.name.to_string();
                    request.reject(InvocationError::BadMessage { code, request: name });
                }
                return;
            }
        }
        tracing::debug!("[sender] bad_msg {} for {}, re-sending", bad.error_code, bad.bad_msg_id);
        self.resend(states).await;
    }

    async fn handle_ack(&self, msg_ids: &[i64]) {
        let mut pending = self.pending.lock().await;
        for msg_id in msg_ids {
            if pending.get(msg_id).is_some_and(Request::resolves_on_ack) {
                if let Some(request) = pending.remove(msg_id) {
                    request.resolve_true();
                }
            }
        }
    }

    async fn handle_destroy_session(&self, session_id: i64, body: Vec<u8>) {
        let mut expected = DestroySession::CONSTRUCTOR_ID.to_le_bytes().to_vec();
        expected.extend_from_slice(&session_id.to_le_bytes());

        let mut pending = self.pending.lock().await;
        let found = pending.iter().find(|(_, r)| r.body == expected).map(|(id, _)| *id);
        if let Some(request) = found.and_then(|id| pending.remove(&id)) {
            request.resolve(body);
        }
    }

    async fn answer_state_request(&self, req_msg_id: i64, count: usize) {
        // 1: nothing is known about the message.
        let info = MsgsStateInfo { req_msg_id, info: vec![1; count] };
        self.packer.lock().await.push(Request::service(info.to_bytes(), "MsgsStateInfo"));
        self.wake.notify_one();
    }

    async fn queue_ack(&self, msg_id: i64) {
        let mut acks = self.pending_ack.lock().await;
        if !acks.contains(&msg_id) {
            acks.push(msg_id);
        }
    }

    async fn resolve(&self, msg_id: i64, body: Vec<u8>) {
        let request = self.pending.lock().await.remove(&msg_id);
        match request {
            Some(request) => request.resolve(body),
            None => tracing::debug!("[sender] answer for {msg_id} has no waiting request"),
        }
    }

    /// Requests a bad message ID refers to: the message itself, everything
    /// that travelled in it as a container, or a recently sent ack.
    async fn pop_states(&self, msg_id: i64) -> Vec<Request> {
        let mut pending = self.pending.lock().await;
        if let Some(request) = pending.remove(&msg_id) {
            return vec![request];
        }

        let mut in_container: Vec<i64> =
            pending.iter().filter(|(_, r)| r.container_id == Some(msg_id)).map(|(id, _)| *id).collect();
        if !in_container.is_empty() {
            in_container.sort_unstable();
            return in_container.into_iter().filter_map(|id| pending.remove(&id)).collect();
        }

        let last_acks = self.last_acks.lock().await;
        last_acks
            .iter()
            .find(|ack| ack.msg_id == msg_id)
            .map(|ack| vec![Request::service(ack.body.clone(), "MsgsAck")])
            .unwrap_or_default()
    }

    async fn resend(&self, states: Vec<Request>) {
        if states.is_empty() {
            return;
        }
        self.packer.lock().await.extend(states);
        self.wake.notify_one();
    }
}
