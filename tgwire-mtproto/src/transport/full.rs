use crc32fast::Hasher;

use super::{Error, MAX_PACKET_LEN, Transport, UnpackedOffset};

/// The [full] framing, the only one with its own integrity check.
///
/// * Overhead: 12 bytes.
///
/// ```text
/// +----+----+----...----+----+
/// | len| seq|  payload  | crc|
/// +----+----+----...----+----+
///  ^^^^ 4 bytes
/// ```
///
/// `len` counts the whole packet and `crc` is CRC32 (IEEE) over everything
/// before it.
///
/// [full]: https://core.telegram.org/mtproto/mtproto-transports#full
#[derive(Debug, Default)]
pub struct Full {
    send_seq: i32,
}

impl Full {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for Full {
    fn init_bytes(&self) -> &'static [u8] {
        &[]
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> {
        None
    }

    fn pack(&mut self, input: &[u8], output: &mut Vec<u8>) {
        let start = output.len();
        let len = (input.len() + 12) as i32;
        output.extend_from_slice(&len.to_le_bytes());
        output.extend_from_slice(&self.send_seq.to_le_bytes());
        output.extend_from_slice(input);

        let mut hasher = Hasher::new();
        hasher.update(&output[start..]);
        output.extend_from_slice(&hasher.finalize().to_le_bytes());

        self.send_seq = self.send_seq.wrapping_add(1);
    }

    fn unpack(&mut self, input: &[u8]) -> Result<UnpackedOffset, Error> {
        if input.len() < 4 {
            return Err(Error::MissingBytes);
        }

        let len = i32::from_le_bytes([input[0], input[1], input[2], input[3]]);
        if len < 12 || len as usize > MAX_PACKET_LEN {
            return Err(Error::BadLen { got: len });
        }
        let len = len as usize;
        if input.len() < len {
            return Err(Error::MissingBytes);
        }

        let got = u32::from_le_bytes([input[len - 4], input[len - 3], input[len - 2], input[len - 1]]);
        let mut hasher = Hasher::new();
        hasher.update(&input[..len - 4]);
        let expected = hasher.finalize();
        if got != expected {
            return Err(Error::BadCrc { expected, got, skip: len });
        }

        Ok(UnpackedOffset { data_start: 8, data_end: len - 4, next_offset: len })
    }

    fn reset(&mut self) {
        self.send_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|x| (x & 0xff) as u8).collect()
    }

    #[test]
    fn pack_empty() {
        let mut out = Vec::new();
        Full::new().pack(&[], &mut out);
        assert_eq!(out, [12, 0, 0, 0, 0, 0, 0, 0, 38, 202, 141, 50]);
    }

    #[test]
    fn counter_advances() {
        let mut transport = Full::new();
        let data = payload(128);

        let mut first = Vec::new();
        transport.pack(&data, &mut first);
        assert_eq!(&first[..4], &[140, 0, 0, 0]);
        assert_eq!(&first[4..8], &[0, 0, 0, 0]);
        assert_eq!(&first[136..], &[134, 115, 149, 55]);

        let mut second = Vec::new();
        transport.pack(&data, &mut second);
        assert_eq!(&second[4..8], &[1, 0, 0, 0]);
        assert_eq!(&second[136..], &[150, 9, 240, 74]);

        transport.reset();
        let mut third = Vec::new();
        transport.pack(&data, &mut third);
        assert_eq!(third, first);
    }

    #[test]
    fn round_trip_sizes() {
        let mut transport = Full::new();
        for len in [0, 1, 4095, 4096, 1_000_000] {
            let data = payload(len);
            let mut out = Vec::new();
            transport.pack(&data, &mut out);
            let offset = transport.unpack(&out).unwrap();
            assert_eq!(&out[offset.data_start..offset.data_end], &data[..], "len={len}");
            assert_eq!(offset.next_offset, out.len());
        }
    }

    #[test]
    fn any_flipped_byte_fails_crc() {
        let mut transport = Full::new();
        let mut packet = Vec::new();
        transport.pack(&payload(32), &mut packet);

        for i in 4..packet.len() {
            let mut corrupted = packet.clone();
            corrupted[i] ^= 0x01;
            match transport.unpack(&corrupted) {
                Err(Error::BadCrc { skip, .. }) => assert_eq!(skip, packet.len()),
                other => panic!("byte {i}: {other:?}"),
            }
        }
    }

    #[test]
    fn short_or_bogus_length() {
        let mut transport = Full::new();
        assert_eq!(transport.unpack(&[0, 1, 3]), Err(Error::MissingBytes));
        assert_eq!(transport.unpack(&[8, 0, 0, 0]), Err(Error::BadLen { got: 8 }));
        assert_eq!(transport.unpack(&[64, 0, 0, 0, 0, 0, 0, 0]), Err(Error::MissingBytes));
    }

    #[test]
    fn huge_length_is_refused_before_buffering() {
        let mut transport = Full::new();
        let header = 0x7fff_fff0i32.to_le_bytes();
        assert_eq!(transport.unpack(&header), Err(Error::BadLen { got: 0x7fff_fff0 }));

        let limit = (MAX_PACKET_LEN as i32).to_le_bytes();
        assert_eq!(transport.unpack(&limit), Err(Error::MissingBytes));
    }
}
