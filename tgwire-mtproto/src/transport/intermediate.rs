use super::{Error, MAX_PACKET_LEN, Transport, UnpackedOffset};

/// [Intermediate] framing: a 4-byte little-endian length, then the payload.
///
/// [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
#[derive(Debug, Default)]
pub struct Intermediate;

impl Intermediate {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for Intermediate {
    fn init_bytes(&self) -> &'static [u8] {
        &[0xee; 4]
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> {
        Some([0xee; 4])
    }

    fn pack(&mut self, input: &[u8], output: &mut Vec<u8>) {
        output.extend_from_slice(&(input.len() as u32).to_le_bytes());
        output.extend_from_slice(input);
    }

    fn unpack(&mut self, input: &[u8]) -> Result<UnpackedOffset, Error> {
        if input.len() < 4 {
            return Err(Error::MissingBytes);
        }
        let len = i32::from_le_bytes([input[0], input[1], input[2], input[3]]);
        if len < 0 || len as usize > MAX_PACKET_LEN {
            return Err(Error::BadLen { got: len });
        }
        let data_end = 4 + len as usize;
        if input.len() < data_end {
            return Err(Error::MissingBytes);
        }
        Ok(UnpackedOffset { data_start: 4, data_end, next_offset: data_end })
    }

    fn reset(&mut self) {}
}
