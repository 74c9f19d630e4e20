use super::{Error, MAX_PACKET_LEN, Transport, UnpackedOffset};

/// [Abridged] framing: a length in 4-byte words, then the payload.
///
/// * Overhead: 1 byte, or 4 for packets of 508 bytes and more.
///
/// ```text
/// +--+----...----+       +--+--+--+--+----...----+
/// |len|  payload |  or   |7f|  len   |  payload  |
/// +--+----...----+       +--+--+--+--+----...----+
/// ```
///
/// [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
#[derive(Debug, Default)]
pub struct Abridged;

impl Abridged {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for Abridged {
    fn init_bytes(&self) -> &'static [u8] {
        &[0xef]
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> {
        Some([0xef; 4])
    }

    fn pack(&mut self, input: &[u8], output: &mut Vec<u8>) {
        debug_assert_eq!(input.len() % 4, 0);
        let words = input.len() / 4;
        if words < 127 {
            output.push(words as u8);
        } else {
            output.push(0x7f);
            output.extend_from_slice(&(words as u32).to_le_bytes()[..3]);
        }
        output.extend_from_slice(input);
    }

    fn unpack(&mut self, input: &[u8]) -> Result<UnpackedOffset, Error> {
        let Some(&first) = input.first() else {
            return Err(Error::MissingBytes);
        };

        let (header_len, words) = if first < 0x7f {
            (1, usize::from(first))
        } else {
            if input.len() < 4 {
                return Err(Error::MissingBytes);
            }
            (4, usize::from(input[1]) | usize::from(input[2]) << 8 | usize::from(input[3]) << 16)
        };

        if words * 4 > MAX_PACKET_LEN {
            return Err(Error::BadLen { got: (words * 4) as i32 });
        }
        let data_end = header_len + words * 4;
        if input.len() < data_end {
            return Err(Error::MissingBytes);
        }

        Ok(UnpackedOffset { data_start: header_len, data_end, next_offset: data_end })
    }

    fn reset(&mut self) {}
}
