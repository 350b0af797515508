//! Compressed-payload helper for the self-extracting packaging path.
//!
//! Deflate via flate2; the only contract is the bit-for-bit round trip.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compress a payload.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}

/// Decompress a payload produced by [`compress`].
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_identity() {
        let inputs: [&[u8]; 4] = [
            b"",
            b"a",
            b"the quick brown fox jumps over the lazy dog",
            &[0u8; 4096],
        ];
        for input in inputs {
            let packed = compress(input);
            let unpacked = decompress(&packed).unwrap();
            assert_eq!(unpacked, input);
        }
    }

    #[test]
    fn test_round_trip_binary_noise() {
        // Pseudo-random but deterministic byte soup
        let mut data = Vec::with_capacity(65536);
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        for _ in 0..65536 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            data.push(state as u8);
        }
        let packed = compress(&data);
        assert_eq!(decompress(&packed).unwrap(), data);
    }
}
