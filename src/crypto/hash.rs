//! Blake2b wrappers shared by every PacketCrypt component.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};

type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 of `input`.
pub fn hash_compress32(input: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2b256::digest(input));
    out
}

/// Blake2b-512 of `input`.
pub fn hash_compress64(input: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Blake2b512::digest(input));
    out
}

/// Fill `out` with a deterministic stream of Blake2b-512 blocks keyed by
/// `(seed, counter, counter + 1, ...)`.
///
/// The stream is restartable: expanding at `counter + n` yields the same
/// bytes as the tail of a longer expansion started at `counter`.
pub fn hash_expand(out: &mut [u8], seed: &[u8; 32], counter: u32) {
    let mut keyed = [0u8; 36];
    keyed[..32].copy_from_slice(seed);
    let mut num = counter;
    for chunk in out.chunks_mut(64) {
        keyed[32..].copy_from_slice(&num.to_le_bytes());
        let block = hash_compress64(&keyed);
        chunk.copy_from_slice(&block[..chunk.len()]);
        num = num.wrapping_add(1);
    }
}
