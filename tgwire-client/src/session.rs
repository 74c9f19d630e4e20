//! Session persistence: which DC is home, where each DC lives, and the auth
//! key negotiated with it.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use tgwire_crypto::AuthKey;

/// DC a fresh session starts on.
pub const DEFAULT_DC: i32 = 2;

const DC_PORT: u16 = 443;

const PRODUCTION_DCS: [(i32, &str); 5] = [
    (1, "149.154.175.53"),
    (2, "149.154.167.51"),
    (3, "149.154.175.100"),
    (4, "149.154.167.91"),
    (5, "91.108.56.130"),
];

const TEST_DCS: [(i32, &str); 3] = [(1, "149.154.175.10"), (2, "149.154.167.40"), (3, "149.154.175.117")];

/// Bootstrap address of `dc_id`, until the DC table is refreshed from the
/// server.
pub fn default_dc_address(dc_id: i32, test_servers: bool) -> Option<(&'static str, u16)> {
    let table: &[(i32, &str)] = if test_servers { &TEST_DCS } else { &PRODUCTION_DCS };
    table.iter().find(|(id, _)| *id == dc_id).map(|(_, addr)| (*addr, DC_PORT))
}

/// Every bootstrap DC as `"ip:port"`.
pub fn default_dc_addresses(test_servers: bool) -> HashMap<i32, String> {
    let table: &[(i32, &str)] = if test_servers { &TEST_DCS } else { &PRODUCTION_DCS };
    table.iter().map(|(id, addr)| (*id, format!("{addr}:{DC_PORT}"))).collect()
}

// ─── Session trait ────────────────────────────────────────────────────────────

/// Where the client keeps its home DC and per-DC auth keys.
///
/// An empty [`Session::server_address`] means no DC was chosen yet.
pub trait Session: Send {
    fn dc_id(&self) -> i32;
    fn server_address(&self) -> &str;
    fn port(&self) -> u16;
    /// Make `dc_id` the home DC.
    fn set_dc(&mut self, dc_id: i32, address: &str, port: u16);
    fn auth_key(&self, dc_id: i32) -> Option<AuthKey>;
    fn set_auth_key(&mut self, dc_id: i32, key: Option<AuthKey>);
    fn load(&mut self) -> io::Result<()>;
    fn save(&mut self) -> io::Result<()>;
    fn delete(&mut self) -> io::Result<()>;
}

// ─── Binary format ────────────────────────────────────────────────────────────

/// One DC as stored on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct DcEntry {
    pub dc_id: i32,
    pub addr: String,
    pub port: u16,
    pub auth_key: Option<[u8; 256]>,
}

/// Binary session file: the home DC and every DC we hold a key or an
/// address for.
///
/// ```text
/// home_dc_id:i32 count:u8 { dc_id:i32 has_key:u8 [key:256] port:u16 addr_len:u8 addr }*
/// ```
/// Integers are little-endian.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistedSession {
    pub home_dc_id: i32,
    pub dcs: Vec<DcEntry>,
}

impl PersistedSession {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let count = u8::try_from(self.dcs.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many DCs in session"))?;

        let mut b = Vec::new();
        b.extend_from_slice(&self.home_dc_id.to_le_bytes());
        b.push(count);
        for d in &self.dcs {
            b.extend_from_slice(&d.dc_id.to_le_bytes());
            match &d.auth_key {
                Some(k) => {
                    b.push(1);
                    b.extend_from_slice(k);
                }
                None => b.push(0),
            }
            b.extend_from_slice(&d.port.to_le_bytes());
            let ab = d.addr.as_bytes();
            let len = u8::try_from(ab.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "DC address too long"))?;
            b.push(len);
            b.extend_from_slice(ab);
        }
        Ok(b)
    }

    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        let mut reader = Reader { buf, pos: 0 };
        let home_dc_id = i32::from_le_bytes(reader.array()?);
        let [count] = reader.array::<1>()?;
        let mut dcs = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let dc_id = i32::from_le_bytes(reader.array()?);
            let auth_key = match reader.array::<1>()? {
                [0] => None,
                [1] => Some(reader.array::<256>()?),
                [flag] => return Err(invalid(format!("bad key flag {flag}"))),
            };
            let port = u16::from_le_bytes(reader.array()?);
            let [len] = reader.array::<1>()?;
            let addr = String::from_utf8(reader.take(usize::from(len))?.to_vec())
                .map_err(|_| invalid("DC address is not UTF-8".into()))?;
            dcs.push(DcEntry { dc_id, addr, port, auth_key });
        }
        Ok(Self { home_dc_id, dcs })
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_bytes()?)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| invalid("truncated session".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
