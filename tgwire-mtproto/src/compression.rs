//! `gzip_packed` bodies.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tgwire_tl_types::Serializable;
use tgwire_tl_types::envelope::GzipPacked;

/// Bodies at or below this size are never worth compressing.
pub const MIN_COMPRESS_LEN: usize = 512;

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Wrap a content-related body larger than [`MIN_COMPRESS_LEN`] in
/// `gzip_packed` if that makes it smaller; otherwise return it unchanged.
pub fn gzip_if_smaller(content_related: bool, data: &[u8]) -> Vec<u8> {
    if content_related && data.len() > MIN_COMPRESS_LEN {
        if let Ok(packed_data) = gzip(data) {
            let packed = GzipPacked { packed_data }.to_bytes();
            if packed.len() < data.len() {
                return packed;
            }
        }
    }
    data.to_vec()
}
