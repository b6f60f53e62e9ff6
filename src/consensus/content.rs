//! Content-proof verification: 32-byte leaves, Blake2b-256 interior nodes,
//! and promotion without combination where a sibling falls past the end of
//! the content.

use crate::crypto::hash::hash_compress32;
use crate::error::ContentProofError;

/// Which content block a block commits to revealing:
/// `le32(Blake2b256(header)[0..4]) ^ nonce`.
pub fn proof_index(block_header: &[u8], nonce: u32) -> u32 {
    let hash = hash_compress32(block_header);
    u32::from_le_bytes(hash[..4].try_into().expect("4-byte slice")) ^ nonce
}

/// Verify that `proof` (leaf block followed by siblings) places its leaf at
/// `proof_idx` inside content of `content_length` bytes hashing to
/// `content_hash`.
pub fn verify(
    content_hash: &[u8],
    content_length: u32,
    proof_idx: u32,
    proof: &[u8],
) -> Result<(), ContentProofError> {
    let leaves = (content_length as u64).div_ceil(32);
    if proof.len() < 32 {
        return Err(ContentProofError::Truncated);
    }
    let mut node = hash_compress32(&proof[..32]);
    let mut offset = 32;
    let mut index = proof_idx as u64 % leaves;
    let mut width = leaves;
    while width > 1 {
        let sibling = index ^ 1;
        if sibling < width {
            if proof.len() < offset + 32 {
                return Err(ContentProofError::Truncated);
            }
            let mut pair = [0u8; 64];
            if index & 1 == 1 {
                pair[..32].copy_from_slice(&proof[offset..offset + 32]);
                pair[32..].copy_from_slice(&node);
            } else {
                pair[..32].copy_from_slice(&node);
                pair[32..].copy_from_slice(&proof[offset..offset + 32]);
            }
            node = hash_compress32(&pair);
            offset += 32;
        }
        // Sibling past the content end: the node is promoted untouched.
        index >>= 1;
        width = width.div_ceil(2);
    }
    if offset != proof.len() {
        return Err(ContentProofError::TrailingBytes);
    }
    if node[..] != *content_hash {
        return Err(ContentProofError::HashMismatch);
    }
    Ok(())
}

/// Bytes of proof a given announcement's content needs: the revealed leaf
/// plus one sibling per combining level.
pub fn proof_len(content_length: u32, proof_idx: u32) -> usize {
    let leaves = (content_length as u64).div_ceil(32);
    let mut index = proof_idx as u64 % leaves;
    let mut width = leaves;
    let mut len = 32;
    while width > 1 {
        if index ^ 1 < width {
            len += 32;
        }
        index >>= 1;
        width = width.div_ceil(2);
    }
    len
}

/// Split a v1 block-level content-proof blob into per-announcement chunks,
/// sized from each announcement's declared content length. Announcements
/// with inline content (32 bytes or less) consume nothing.
pub fn split_content_proof<'a>(
    blob: &'a [u8],
    content_lengths: &[u32; 4],
    proof_idx: u32,
) -> Result<[Option<&'a [u8]>; 4], ContentProofError> {
    let mut out = [None, None, None, None];
    let mut offset = 0;
    for (i, &len) in content_lengths.iter().enumerate() {
        if len <= 32 {
            continue;
        }
        let need = proof_len(len, proof_idx);
        if blob.len() < offset + need {
            return Err(ContentProofError::Truncated);
        }
        out[i] = Some(&blob[offset..offset + need]);
        offset += need;
    }
    if offset != blob.len() {
        return Err(ContentProofError::TrailingBytes);
    }
    Ok(out)
}
