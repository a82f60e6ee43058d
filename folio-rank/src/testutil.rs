//! Minimal image fixtures for unit tests
//!
//! Valid headers (magic bytes + dimension fields) with a seed byte in
//! the tail so each seed yields a distinct digest. Nothing decodes
//! these; the engine only sniffs and hashes.

/// 8x8 PNG header followed by a seed byte.
pub fn tiny_png(seed: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&8u32.to_be_bytes());
    bytes.extend_from_slice(&8u32.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.push(seed);
    bytes
}

/// 4x4 GIF header followed by a seed byte.
pub fn tiny_gif(seed: u8) -> Vec<u8> {
    let mut bytes = b"GIF89a".to_vec();
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&[0x00, 0x00, 0x00]);
    bytes.push(seed);
    bytes
}
