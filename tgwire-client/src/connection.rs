//! One socket to one data center, driven by a send task and a receive task.
//!
//! Payloads handed to [`Connection::send`] are framed (and obfuscated, when
//! asked) by the send task; the receive task deframes whatever arrives and
//! queues whole packets for [`Connection::recv`].

use std::fmt;
use std::sync::Arc;

use tgwire_crypto::CtrStream;
use tgwire_mtproto::transport::{self, Abridged, Full, Intermediate, Transport, obfuscated};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::ConnectionError;
use crate::socket::{BoxSocket, Connector};

const READ_CHUNK: usize = 16 * 1024;

// ─── TransportKind ────────────────────────────────────────────────────────────

/// Which MTProto transport framing to use.
///
/// | Variant | Init bytes | Notes |
/// |---------|-----------|-------|
/// | `Abridged` | `0xef` | Smallest overhead |
/// | `Intermediate` | `0xeeeeeeee` | Better compat with some proxies |
/// | `Full` | none | CRC32 on every packet |
/// | `Obfuscated` | random 64 B | Abridged inside Obfuscated2, bypasses DPI |
/// | `ObfuscatedIntermediate` | random 64 B | Intermediate inside Obfuscated2 |
#[derive(Clone, Debug, Default, PartialEq)]
pub enum TransportKind {
    #[default]
    Abridged,
    Intermediate,
    Full,
    /// `secret` is the 16-byte MTProxy secret, or `None` for keyless
    /// obfuscation.
    Obfuscated { secret: Option<[u8; 16]> },
    ObfuscatedIntermediate { secret: Option<[u8; 16]> },
}

impl TransportKind {
    fn framing(&self) -> Box<dyn Transport> {
        match self {
            Self::Abridged | Self::Obfuscated { .. } => Box::new(Abridged::new()),
            Self::Intermediate | Self::ObfuscatedIntermediate { .. } => Box::new(Intermediate::new()),
            Self::Full => Box::new(Full::new()),
        }
    }

    /// `Some(secret)` when the stream is wrapped in Obfuscated2.
    fn obfuscation(&self) -> Option<Option<[u8; 16]>> {
        match self {
            Self::Obfuscated { secret } | Self::ObfuscatedIntermediate { secret } => Some(*secret),
            _ => None,
        }
    }
}

// ─── Connection ───────────────────────────────────────────────────────────────

struct Live {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A framed connection to one data center endpoint.
pub struct Connection {
    addr: String,
    dc_id: i32,
    kind: TransportKind,
    connector: Arc<dyn Connector>,
    live: Mutex<Option<Live>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("dc_id", &self.dc_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(addr: impl Into<String>, dc_id: i32, kind: TransportKind, connector: Arc<dyn Connector>) -> Self {
        Self { addr: addr.into(), dc_id, kind, connector, live: Mutex::new(None) }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn dc_id(&self) -> i32 {
        self.dc_id
    }

    /// A disconnected copy pointing at the same endpoint.
    pub fn fresh(&self) -> Self {
        Self::new(self.addr.clone(), self.dc_id, self.kind.clone(), Arc::clone(&self.connector))
    }

    pub async fn is_connected(&self) -> bool {
        self.live.lock().await.as_ref().is_some_and(|l| !l.cancel.is_cancelled())
    }

    /// Open the socket, send the transport handshake and start both loops.
    ///
    /// Connecting an already connected instance does nothing.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut live = self.live.lock().await;
        if live.as_ref().is_some_and(|l| !l.cancel.is_cancelled()) {
            return Ok(());
        }

        tracing::info!("[conn] connecting to DC{} at {} ({:?})", self.dc_id, self.addr, self.kind);
        let mut socket = self.connector.connect(&self.addr).await?;

        let out_framing = self.kind.framing();
        let (out_cipher, in_cipher) = match self.kind.obfuscation() {
            Some(secret) => {
                let tag = out_framing.obfuscation_tag().ok_or(ConnectionError::NotObfuscatable)?;
                let (header, cipher) = obfuscated::generate_header(tag, secret.as_ref().map(|s| &s[..]));
                socket.write_all(&header).await?;
                let (out, inc) = cipher.split();
                (Some(out), Some(inc))
            }
            None => {
                socket.write_all(out_framing.init_bytes()).await?;
                (None, None)
            }
        };

        let (reader, writer) = tokio::io::split(socket);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(send_loop(writer, out_framing, out_cipher, out_rx, cancel.clone())),
            tokio::spawn(recv_loop(reader, self.kind.framing(), in_cipher, in_tx, cancel.clone())),
        ];

        *live = Some(Live { outbound: out_tx, inbound: Arc::new(Mutex::new(in_rx)), cancel, tasks });
        tracing::debug!("[conn] DC{} connected", self.dc_id);
        Ok(())
    }

    /// Queue one payload for the send loop.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        let live = self.live.lock().await;
        let live = live.as_ref().ok_or(ConnectionError::NotConnected)?;
        if live.cancel.is_cancelled() {
            return Err(ConnectionError::NotConnected);
        }
        live.outbound.send(payload).map_err(|_| ConnectionError::NotConnected)
    }

    /// Wait for the next whole packet.
    ///
    /// Fails once the connection is closed, by either side.
    pub async fn recv(&self) -> Result<Vec<u8>, ConnectionError> {
        let (inbound, cancel) = {
            let live = self.live.lock().await;
            let live = live.as_ref().ok_or(ConnectionError::NotConnected)?;
            (Arc::clone(&live.inbound), live.cancel.clone())
        };

        let mut inbound = inbound.lock().await;
        tokio::select! {
            biased;
            packet = inbound.recv() => packet.ok_or(ConnectionError::NotConnected),
            _ = cancel.cancelled() => Err(ConnectionError::NotConnected),
        }
    }

    /// Stop both loops and close the socket. Safe to call more than once.
    pub async fn disconnect(&self) {
        let Some(live) = self.live.lock().await.take() else {
            return;
        };
        live.cancel.cancel();
        for task in live.tasks {
            if let Err(e) = task.await {
                tracing::warn!("[conn] loop task for DC{} ended abnormally: {e}", self.dc_id);
            }
        }
        tracing::info!("[conn] disconnected from DC{}", self.dc_id);
    }
}

async fn send_loop(
    mut writer: WriteHalf<BoxSocket>,
    mut framing: Box<dyn Transport>,
    mut cipher: Option<CtrStream>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut buffer = Vec::new();
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            payload = outbound.recv() => match payload {
                Some(p) => p,
                None => break,
            },
        };

        buffer.clear();
        framing.pack(&payload, &mut buffer);
        if let Some(cipher) = cipher.as_mut() {
            cipher.apply(&mut buffer);
        }

        if let Err(e) = writer.write_all(&buffer).await {
            tracing::error!("[conn] write failed: {e}");
            cancel.cancel();
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("[conn] shutdown: {e}");
    }
}

async fn recv_loop(
    mut reader: ReadHalf<BoxSocket>,
    mut framing: Box<dyn Transport>,
    mut cipher: Option<CtrStream>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut chunk) => read,
        };
        let n = match read {
            Ok(0) => {
                tracing::info!("[conn] server closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("[conn] read failed: {e}");
                break;
            }
        };

        let fresh = &mut chunk[..n];
        if let Some(cipher) = cipher.as_mut() {
            cipher.apply(fresh);
        }
        buffer.extend_from_slice(fresh);

        if let Err(e) = drain_packets(&mut buffer, framing.as_mut(), &inbound) {
            tracing::error!("[conn] {e}; dropping connection");
            break;
        }
    }
    cancel.cancel();
}

/// Queue every whole packet in `buffer` and drop its bytes.
///
/// Checksum failures skip the packet; any other framing error is fatal.
fn drain_packets(
    buffer: &mut Vec<u8>,
    framing: &mut dyn Transport,
    inbound: &mpsc::UnboundedSender<Vec<u8>>,
) -> Result<(), ConnectionError> {
    loop {
        match framing.unpack(buffer) {
            Ok(offset) => {
                let packet = buffer[offset.data_start..offset.data_end].to_vec();
                buffer.drain(..offset.next_offset);
                if inbound.send(packet).is_err() {
                    return Err(ConnectionError::NotConnected);
                }
            }
            Err(transport::Error::MissingBytes) => return Ok(()),
            Err(transport::Error::BadCrc { expected, got, skip }) => {
                tracing::warn!("[conn] dropping packet with bad crc32 (expected {expected:#010x}, got {got:#010x})");
                buffer.drain(..skip);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_packet_is_skipped_and_the_next_one_kept() {
        let mut sender = Full::new();
        let mut wire = Vec::new();
        sender.pack(&[1, 2, 3, 4], &mut wire);
        sender.pack(&[5, 6, 7, 8], &mut wire);
        wire[9] ^= 0xff;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut framing = Full::new();
        drain_packets(&mut wire, &mut framing, &tx).unwrap();

        assert_eq!(rx.try_recv().unwrap(), vec![5, 6, 7, 8]);
        assert!(rx.try_recv().is_err());
        assert!(wire.is_empty());
    }

    #[test]
    fn partial_packet_waits_for_more_bytes() {
        let mut wire = Vec::new();
        Abridged::new().pack(&[9; 16], &mut wire);
        let tail = wire.split_off(5);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut framing = Abridged::new();
        drain_packets(&mut wire, &mut framing, &tx).unwrap();
        assert!(rx.try_recv().is_err());

        wire.extend_from_slice(&tail);
        drain_packets(&mut wire, &mut framing, &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![9; 16]);
    }

    #[test]
    fn impossible_length_is_fatal() {
        let mut wire = 3i32.to_le_bytes().to_vec();
        wire.extend_from_slice(&[0; 8]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = drain_packets(&mut wire, &mut Full::new(), &tx).unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(transport::Error::BadLen { got: 3 })));
    }

    #[test]
    fn only_abridged_and_intermediate_are_obfuscated() {
        assert_eq!(TransportKind::Obfuscated { secret: None }.obfuscation(), Some(None));
        assert_eq!(TransportKind::Full.obfuscation(), None);
        assert_eq!(TransportKind::ObfuscatedIntermediate { secret: None }.framing().init_bytes(), &[0xee; 4]);
    }
}
