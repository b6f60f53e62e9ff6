//! Block-level PacketCrypt proof verification: the four-announcement
//! CryptoCycle chain, effective-target decision, announcement commitment,
//! signatures, and content proofs.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::consensus::announce::{check_announcement, Announcement};
use crate::consensus::coinbase::{CoinbaseCommit, COMMIT_MAGIC};
use crate::consensus::content;
use crate::consensus::difficulty::{
    get_aged_ann_target, get_effective_target, is_ann_min_diff_ok, is_ok, CompactTarget,
};
use crate::crypto::hash::hash_compress32;
use crate::crypto::State;
use crate::error::BlockError;
use crate::params::ConsensusParams;

/// Outcome of a successful proof check: enough work for a whole block, or
/// only for the weaker share target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerdict {
    Share,
    Block,
}

/// The PacketCrypt proof attached to a block.
#[derive(Clone)]
pub struct PacketCryptProof {
    pub version: u8,
    pub nonce: u32,
    pub announcements: [Announcement; 4],
    /// One entry per announcement; required iff the announcement carries a
    /// signing key.
    pub signatures: [Option<[u8; 64]>; 4],
    /// Merkle branches binding the four announcements into the coinbase
    /// commitment.
    pub ann_proof: Vec<u8>,
    /// v1 only: concatenated per-announcement content proofs.
    pub content_proof: Option<Vec<u8>>,
}

/// Everything the block verifier needs from the surrounding node.
pub struct BlockPowRequest<'a> {
    pub pcp: &'a PacketCryptProof,
    pub block_height: i32,
    /// Serialized block header; hashed, never parsed.
    pub block_header: &'a [u8],
    /// The header's nBits, supplied by the caller's deserializer.
    pub block_target: CompactTarget,
    pub coinbase_commit: &'a CoinbaseCommit,
    /// Zero disables share acceptance.
    pub share_target: u32,
    pub parent_hashes: &'a [[u8; 32]; 4],
    pub content_proofs: Option<[Option<&'a [u8]>; 4]>,
    pub pc_version: u8,
}

/// Validate a block's PacketCrypt proof end to end.
pub fn validate_block_pow(
    req: &BlockPowRequest<'_>,
    params: &ConsensusParams,
) -> Result<BlockVerdict, BlockError> {
    let cb = req.coinbase_commit;
    if cb.magic() != COMMIT_MAGIC || !is_ann_min_diff_ok(cb.ann_min_diff(), req.pc_version) {
        return Err(BlockError::BadCoinbase);
    }
    // The proof version must sit inside its switch window: v2 is rejected
    // before its activation height and v1 once v2 becomes mandatory.
    let height = req.block_height.max(0) as u32;
    if (req.pc_version >= 2 && !params.pc2_allowed_at(height))
        || (req.pc_version < 2 && params.pc_version_for_height(height) >= 2)
    {
        return Err(BlockError::VersionNotInForce {
            version: req.pc_version,
            height: req.block_height,
        });
    }
    // v2 moved content commitments out of the block proof entirely.
    if req.pc_version >= 2 && req.pcp.content_proof.is_some() {
        return Err(BlockError::PcpInvalid);
    }

    // Content blocks feed the state chain, so they are resolved up front.
    let mut content_blocks: [Option<[u8; 32]>; 4] = [None; 4];
    if let Some(proofs) = &req.content_proofs {
        for (i, proof) in proofs.iter().enumerate() {
            if let Some(proof) = proof {
                if proof.len() < 32 {
                    return Err(BlockError::PcpInvalid);
                }
                content_blocks[i] =
                    Some(proof[..32].try_into().expect("32-byte content block"));
            }
        }
    }

    // Chain the four announcements through the header-seeded state.
    let hdr_hash = hash_compress32(req.block_header);
    let mut state = State::init(&hdr_hash, req.pcp.nonce as u64);
    let mut indexes = [0u64; 4];
    for i in 0..4 {
        indexes[i] = state.item_no();
        state
            .update(
                &req.pcp.announcements[i].0,
                content_blocks[i].as_ref(),
                0,
                params,
            )
            .map_err(|e| BlockError::Announcement { index: i, source: e.into() })?;
    }
    state.smul();
    let work_hash = state.finalize();

    let effective = get_effective_target(
        req.block_target,
        cb.ann_min_diff(),
        cb.ann_count(),
        req.pc_version,
    );
    let verdict = if is_ok(&work_hash, effective) {
        BlockVerdict::Block
    } else if req.share_target != 0 && is_ok(&work_hash, CompactTarget(req.share_target)) {
        BlockVerdict::Share
    } else {
        log::debug!(
            "block work hash {} misses effective target {:08x}",
            hex::encode(&work_hash[..8]),
            effective.0
        );
        return Err(BlockError::InsufficientPow { work_hash });
    };

    // Each announcement stands alone against its declared parent.
    let mut ann_hashes = [[0u8; 32]; 4];
    for (i, ann) in req.pcp.announcements.iter().enumerate() {
        check_announcement(ann, &req.parent_hashes[i], req.pc_version, params)
            .map_err(|source| BlockError::Announcement { index: i, source })?;

        let age = req.block_height.saturating_sub(ann.parent_block_height() as i32).max(0) as u32;
        let effective_ann = if (req.block_height as u32) < params.ann_wait_period {
            ann.work_target()
        } else {
            get_aged_ann_target(ann.work_target(), age, req.pc_version, params)
        };
        if effective_ann.to_big() > cb.ann_min_diff().to_big() {
            return Err(BlockError::AnnInsufficientPow { index: i });
        }
        ann_hashes[i] = hash_compress32(&ann.0);
    }

    let commitment_root = pcp_hash(&ann_hashes, cb.ann_count(), &indexes, &req.pcp.ann_proof)?;
    if commitment_root != cb.merkle_root() {
        return Err(BlockError::PcpMismatch);
    }

    for (i, ann) in req.pcp.announcements.iter().enumerate() {
        if ann.has_signing_key() {
            let sig = req.pcp.signatures[i].ok_or(BlockError::SignatureMissing { index: i })?;
            let key_bytes: [u8; 32] =
                ann.signing_key().try_into().expect("32-byte signing key");
            let key = VerifyingKey::from_bytes(&key_bytes)
                .map_err(|_| BlockError::SignatureInvalid { index: i })?;
            key.verify(&ann.0, &Signature::from_bytes(&sig))
                .map_err(|_| BlockError::SignatureInvalid { index: i })?;
        } else if req.pcp.signatures[i].is_some() {
            return Err(BlockError::PcpInvalid);
        }
    }

    if req.pc_version < 2 {
        if let Some(proofs) = &req.content_proofs {
            let proof_idx = content::proof_index(req.block_header, req.pcp.nonce);
            for (i, ann) in req.pcp.announcements.iter().enumerate() {
                if ann.content_length() <= 32 {
                    continue;
                }
                let proof = proofs[i].ok_or(BlockError::ContentProofMissing { index: i })?;
                content::verify(ann.content_hash(), ann.content_length(), proof_idx, proof)
                    .map_err(|source| BlockError::ContentProof { index: i, source })?;
            }
        }
    }

    Ok(verdict)
}

/// Resolve the announcement commitment: every picked announcement's branch
/// must fold to one root over a tree of `ann_count` leaves.
pub fn pcp_hash(
    ann_hashes: &[[u8; 32]; 4],
    ann_count: u64,
    indexes: &[u64; 4],
    ann_proof: &[u8],
) -> Result<[u8; 32], BlockError> {
    if ann_count == 0 {
        return Err(BlockError::PcpInvalid);
    }
    let depth = tree_depth(ann_count);
    if ann_proof.len() != 4 * depth * 32 {
        return Err(BlockError::PcpInvalid);
    }

    let mut root: Option<[u8; 32]> = None;
    for i in 0..4 {
        let branch = &ann_proof[i * depth * 32..(i + 1) * depth * 32];
        let mut node = ann_hashes[i];
        let mut index = indexes[i] % ann_count;
        for level in 0..depth {
            let sibling = &branch[level * 32..(level + 1) * 32];
            let mut pair = [0u8; 64];
            if index & 1 == 1 {
                pair[..32].copy_from_slice(sibling);
                pair[32..].copy_from_slice(&node);
            } else {
                pair[..32].copy_from_slice(&node);
                pair[32..].copy_from_slice(sibling);
            }
            node = hash_compress32(&pair);
            index >>= 1;
        }
        match root {
            None => root = Some(node),
            Some(r) if r != node => return Err(BlockError::PcpInvalid),
            Some(_) => {}
        }
    }
    Ok(root.expect("four branches folded"))
}

fn tree_depth(ann_count: u64) -> usize {
    if ann_count <= 1 {
        0
    } else {
        (64 - (ann_count - 1).leading_zeros()) as usize
    }
}
