//! Content-encoding decoders.
//!
//! A decoder is fed every body chunk in order and once more with an empty
//! final chunk to flush whatever tail state it holds. Inputs are borrowed
//! slices of the inbound buffer, so there is no input chunk to hand back.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};

pub trait Decompressor: Send {
    /// Decode `input`. With `is_final`, also flush and verify the stream end.
    fn decompress(&mut self, input: &[u8], is_final: bool) -> io::Result<Bytes>;
}

/// Decoder for a `Content-Encoding` value, or `None` to pass content through.
pub fn for_encoding(encoding: &str) -> Option<Box<dyn Decompressor>> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => Some(Box::new(Gzip(GzDecoder::new(Vec::new())))),
        "deflate" => Some(Box::new(Deflate(ZlibDecoder::new(Vec::new())))),
        _ => None,
    }
}

/// Encodings this crate can decode, for the `Accept-Encoding` request header.
pub const ACCEPT_ENCODING: &str = "gzip, deflate";

struct Gzip(GzDecoder<Vec<u8>>);

impl Decompressor for Gzip {
    fn decompress(&mut self, input: &[u8], is_final: bool) -> io::Result<Bytes> {
        self.0.write_all(input)?;
        if is_final {
            self.0.try_finish()?;
        }
        Ok(Bytes::from(std::mem::take(self.0.get_mut())))
    }
}

struct Deflate(ZlibDecoder<Vec<u8>>);

impl Decompressor for Deflate {
    fn decompress(&mut self, input: &[u8], is_final: bool) -> io::Result<Bytes> {
        self.0.write_all(input)?;
        if is_final {
            self.0.try_finish()?;
        }
        Ok(Bytes::from(std::mem::take(self.0.get_mut())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_gzip_split_input() {
        let compressed = gzip(b"hello hello hello world");
        let mut dec = for_encoding("GZIP").unwrap();
        let mut out = Vec::new();
        for piece in compressed.chunks(3) {
            out.extend_from_slice(&dec.decompress(piece, false).unwrap());
        }
        out.extend_from_slice(&dec.decompress(&[], true).unwrap());
        assert_eq!(out, b"hello hello hello world");
    }

    #[test]
    fn test_deflate() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"payload").unwrap();
        let compressed = enc.finish().unwrap();

        let mut dec = for_encoding("deflate").unwrap();
        let mut out = dec.decompress(&compressed, false).unwrap().to_vec();
        out.extend_from_slice(&dec.decompress(&[], true).unwrap());
        assert_eq!(out, b"payload");
    }

    #[test]
    fn test_unknown_encoding_passes_through() {
        assert!(for_encoding("identity").is_none());
        assert!(for_encoding("br").is_none());
    }
}
