//! Built-in [`Session`] stores.
//!
//! * [`MemorySession`]: in-process only, gone when the process exits.
//! * [`StringSession`]: the home DC and its key packed into one printable
//!   string, for environment variables and config files.
//! * [`FileSession`]: the binary [`PersistedSession`] format, keeping every
//!   DC's address and key.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tgwire_crypto::AuthKey;

use crate::session::{DcEntry, PersistedSession, Session};

// ─── MemorySession ────────────────────────────────────────────────────────────

/// Keeps everything in memory; `load`, `save` and `delete` do nothing.
#[derive(Clone, Debug, Default)]
pub struct MemorySession {
    dc_id: i32,
    address: String,
    port: u16,
    keys: HashMap<i32, AuthKey>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Session for MemorySession {
    fn dc_id(&self) -> i32 {
        self.dc_id
    }

    fn server_address(&self) -> &str {
        &self.address
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn set_dc(&mut self, dc_id: i32, address: &str, port: u16) {
        self.dc_id = dc_id;
        self.address = address.to_string();
        self.port = port;
    }

    fn auth_key(&self, dc_id: i32) -> Option<AuthKey> {
        self.keys.get(&dc_id).cloned()
    }

    fn set_auth_key(&mut self, dc_id: i32, key: Option<AuthKey>) {
        match key {
            Some(key) => self.keys.insert(dc_id, key),
            None => self.keys.remove(&dc_id),
        };
    }

    fn load(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn save(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.keys.clear();
        Ok(())
    }
}

// ─── StringSession ────────────────────────────────────────────────────────────

const STRING_SESSION_VERSION: char = '1';

/// A session that round-trips through one string:
///
/// ```text
/// "1" + base64(dc_id:u8 ‖ addr_len:u16 BE ‖ addr ‖ port:u16 BE ‖ auth_key:256)
/// ```
///
/// Only the home DC's key survives encoding.
#[derive(Clone, Debug, Default)]
pub struct StringSession {
    inner: MemorySession,
}

impl StringSession {
    /// An empty session, to be encoded once connected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a string produced by [`StringSession::encode`].
    pub fn decode(encoded: &str) -> io::Result<Self> {
        let mut inner = MemorySession::new();
        if encoded.is_empty() {
            return Ok(Self { inner });
        }

        let Some(body) = encoded.strip_prefix(STRING_SESSION_VERSION) else {
            return Err(invalid("unsupported string session version"));
        };
        let raw = STANDARD.decode(body.trim()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let short = || invalid("string session is truncated");
        let (&dc_id, rest) = raw.split_first().ok_or_else(short)?;
        let (len, rest) = rest.split_first_chunk::<2>().ok_or_else(short)?;
        let len = usize::from(u16::from_be_bytes(*len));
        if rest.len() < len {
            return Err(short());
        }
        let (address, rest) = rest.split_at(len);
        let address = std::str::from_utf8(address).map_err(|_| invalid("address is not UTF-8"))?;
        let (port, key) = rest.split_first_chunk::<2>().ok_or_else(short)?;
        let key = AuthKey::from_slice(key).ok_or_else(|| invalid("auth key must be 256 bytes"))?;

        let dc_id = i32::from(dc_id);
        inner.set_dc(dc_id, address, u16::from_be_bytes(*port));
        inner.set_auth_key(dc_id, Some(key));
        Ok(Self { inner })
    }

    /// Encode the home DC and its key. Empty if either is missing.
    pub fn encode(&self) -> String {
        let dc_id = self.inner.dc_id();
        let (Some(key), Ok(dc_byte), Ok(len)) = (
            self.inner.auth_key(dc_id),
            u8::try_from(dc_id),
            u16::try_from(self.inner.server_address().len()),
        ) else {
            return String::new();
        };
        if len == 0 {
            return String::new();
        }

        let mut raw = Vec::with_capacity(1 + 2 + usize::from(len) + 2 + 256);
        raw.push(dc_byte);
        raw.extend_from_slice(&len.to_be_bytes());
        raw.extend_from_slice(self.inner.server_address().as_bytes());
        raw.extend_from_slice(&self.inner.port().to_be_bytes());
        raw.extend_from_slice(key.as_bytes());

        let mut out = String::from(STRING_SESSION_VERSION);
        out.push_str(&STANDARD.encode(raw));
        out
    }
}

impl Session for StringSession {
    fn dc_id(&self) -> i32 {
        self.inner.dc_id()
    }

    fn server_address(&self) -> &str {
        self.inner.server_address()
    }

    fn port(&self) -> u16 {
        self.inner.port()
    }

    fn set_dc(&mut self, dc_id: i32, address: &str, port: u16) {
        self.inner.set_dc(dc_id, address, port);
    }

    fn auth_key(&self, dc_id: i32) -> Option<AuthKey> {
        self.inner.auth_key(dc_id)
    }

    fn set_auth_key(&mut self, dc_id: i32, key: Option<AuthKey>) {
        self.inner.set_auth_key(dc_id, key);
    }

    fn load(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn save(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.inner.delete()
    }
}

// ─── FileSession ──────────────────────────────────────────────────────────────

/// Keeps the session in a binary file.
#[derive(Debug)]
pub struct FileSession {
    path: PathBuf,
    dcs: HashMap<i32, DcEntry>,
    home_dc_id: i32,
}

impl FileSession {
    /// Does not touch the file until [`Session::load`] or [`Session::save`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), dcs: HashMap::new(), home_dc_id: 0 }
    }

    fn home(&self) -> Option<&DcEntry> {
        self.dcs.get(&self.home_dc_id)
    }
}

impl Session for FileSession {
    fn dc_id(&self) -> i32 {
        self.home_dc_id
    }

    fn server_address(&self) -> &str {
        self.home().map_or("", |d| d.addr.as_str())
    }

    fn port(&self) -> u16 {
        self.home().map_or(0, |d| d.port)
    }

    fn set_dc(&mut self, dc_id: i32, address: &str, port: u16) {
        self.home_dc_id = dc_id;
        let entry = self
            .dcs
            .entry(dc_id)
            .or_insert_with(|| DcEntry { dc_id, addr: String::new(), port, auth_key: None });
        entry.addr = address.to_string();
        entry.port = port;
    }

    fn auth_key(&self, dc_id: i32) -> Option<AuthKey> {
        self.dcs.get(&dc_id).and_then(|d| d.auth_key).map(AuthKey::from_bytes)
    }

    fn set_auth_key(&mut self, dc_id: i32, key: Option<AuthKey>) {
        let entry = self
            .dcs
            .entry(dc_id)
            .or_insert_with(|| DcEntry { dc_id, addr: String::new(), port: 0, auth_key: None });
        entry.auth_key = key.map(|k| k.to_bytes());
    }

    fn load(&mut self) -> io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let persisted = PersistedSession::load(&self.path)?;
        self.home_dc_id = persisted.home_dc_id;
        self.dcs = persisted.dcs.into_iter().map(|d| (d.dc_id, d)).collect();
        tracing::debug!("[client] loaded session from {} (home DC{})", self.path.display(), self.home_dc_id);
        Ok(())
    }

    fn save(&mut self) -> io::Result<()> {
        let mut dcs: Vec<DcEntry> = self.dcs.values().cloned().collect();
        dcs.sort_by_key(|d| d.dc_id);
        PersistedSession { home_dc_id: self.home_dc_id, dcs }.save(&self.path)
    }

    fn delete(&mut self) -> io::Result<()> {
        self.dcs.clear();
        self.home_dc_id = 0;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> AuthKey {
        AuthKey::from_bytes([fill; 256])
    }

    #[test]
    fn string_session_layout() {
        let mut session = StringSession::new();
        session.set_dc(2, "149.154.167.51", 443);
        session.set_auth_key(2, Some(key(9)));

        let encoded = session.encode();
        assert!(encoded.starts_with('1'));
        let raw = STANDARD.decode(&encoded[1..]).unwrap();
        assert_eq!(raw[0], 2);
        assert_eq!(&raw[1..3], &14u16.to_be_bytes());
        assert_eq!(&raw[3..17], b"149.154.167.51");
        assert_eq!(&raw[17..19], &443u16.to_be_bytes());
        assert_eq!(raw.len(), 19 + 256);

        let decoded = StringSession::decode(&encoded).unwrap();
        assert_eq!(decoded.dc_id(), 2);
        assert_eq!(decoded.port(), 443);
        assert_eq!(decoded.auth_key(2), Some(key(9)));
    }

    #[test]
    fn string_session_without_key_is_empty() {
        let mut session = StringSession::new();
        session.set_dc(2, "149.154.167.51", 443);
        assert_eq!(session.encode(), "");
        assert_eq!(StringSession::decode("").unwrap().server_address(), "");
    }

    #[test]
    fn bad_string_sessions_are_rejected() {
        assert!(StringSession::decode("2AAAA").is_err());
        assert!(StringSession::decode("1AgAO").is_err());
    }

    #[test]
    fn memory_session_tracks_keys_per_dc() {
        let mut session = MemorySession::new();
        session.set_auth_key(1, Some(key(1)));
        session.set_auth_key(4, Some(key(4)));
        session.set_auth_key(1, None);
        assert_eq!(session.auth_key(1), None);
        assert_eq!(session.auth_key(4), Some(key(4)));
    }

    #[test]
    fn file_session_reloads_every_dc() {
        let path = std::env::temp_dir().join(format!("tgwire-file-session-{}", std::process::id()));
        let mut session = FileSession::new(&path);
        session.set_dc(4, "149.154.167.91", 443);
        session.set_auth_key(4, Some(key(4)));
        session.set_auth_key(2, Some(key(2)));
        session.save().unwrap();

        let mut reloaded = FileSession::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.dc_id(), 4);
        assert_eq!(reloaded.server_address(), "149.154.167.91");
        assert_eq!(reloaded.auth_key(2), Some(key(2)));

        reloaded.delete().unwrap();
        assert!(!path.exists());
    }
}
