//! Announcement verification: item synthesis, the four-item CryptoCycle
//! chain, the item merkle proof, and the work check.

use rayon::prelude::*;

use crate::consensus::difficulty::{self, CompactTarget};
use crate::crypto::hash::{hash_compress64, hash_expand};
use crate::crypto::State;
use crate::error::AnnError;
use crate::params::{ConsensusParams, ANN_HEADER_LEN, ANN_MERKLE_DEPTH, ANN_TABLE_SIZE};
use crate::randhash::{interpret, Program};

/// Announcement wire size.
pub const ANN_SIZE: usize = 1024;

const SIGNING_KEY_OFF: usize = ANN_HEADER_LEN;
const ITEM4_PREFIX_OFF: usize = 88;
const MERKLE_PROOF_OFF: usize = 128;
const MERKLE_ROOT_OFF: usize = 960;
const ITEM_LEN: usize = 1024;
const ITEM_BLOCKS: usize = 16;

/// A 1024-byte PacketCrypt announcement.
///
/// Layout: 56-byte header (version, soft nonce, work target, parent height,
/// content type, content length, content hash), 32-byte signing key, 4-byte
/// item-4 prefix, reserved bytes to 128, thirteen 64-byte merkle siblings,
/// and the 64-byte merkle root.
#[derive(Clone)]
pub struct Announcement(pub [u8; ANN_SIZE]);

impl TryFrom<&[u8]> for Announcement {
    type Error = AnnError;

    fn try_from(bytes: &[u8]) -> Result<Announcement, AnnError> {
        let bytes: [u8; ANN_SIZE] = bytes.try_into().map_err(|_| AnnError::Invalid)?;
        Ok(Announcement(bytes))
    }
}

impl Announcement {
    pub fn from_bytes(bytes: [u8; ANN_SIZE]) -> Announcement {
        Announcement(bytes)
    }

    pub fn version(&self) -> u8 {
        self.0[0]
    }

    pub fn soft_nonce(&self) -> u32 {
        u32::from_le_bytes(self.0[4..8].try_into().expect("4-byte slice"))
    }

    pub fn work_target(&self) -> CompactTarget {
        CompactTarget(u32::from_le_bytes(self.0[8..12].try_into().expect("4-byte slice")))
    }

    pub fn parent_block_height(&self) -> u32 {
        u32::from_le_bytes(self.0[12..16].try_into().expect("4-byte slice"))
    }

    pub fn content_type(&self) -> u32 {
        u32::from_le_bytes(self.0[16..20].try_into().expect("4-byte slice"))
    }

    pub fn content_length(&self) -> u32 {
        u32::from_le_bytes(self.0[20..24].try_into().expect("4-byte slice"))
    }

    pub fn content_hash(&self) -> &[u8] {
        &self.0[24..56]
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.0[SIGNING_KEY_OFF..SIGNING_KEY_OFF + 32]
    }

    /// All-zero signing key means unsigned.
    pub fn has_signing_key(&self) -> bool {
        self.signing_key().iter().any(|&b| b != 0)
    }

    pub fn item4_prefix(&self) -> &[u8] {
        &self.0[ITEM4_PREFIX_OFF..ITEM4_PREFIX_OFF + 4]
    }

    /// Sibling `level` of the item merkle proof (64 bytes).
    pub fn merkle_sibling(&self, level: usize) -> &[u8] {
        let off = MERKLE_PROOF_OFF + level * 64;
        &self.0[off..off + 64]
    }

    /// Terminal 64-byte node of the proof.
    pub fn merkle_root(&self) -> &[u8] {
        &self.0[MERKLE_ROOT_OFF..]
    }
}

/// Verify one announcement against the parent block it declares, returning
/// its work hash.
pub fn check_announcement(
    ann: &Announcement,
    parent_block_hash: &[u8; 32],
    pc_version: u8,
    params: &ConsensusParams,
) -> Result<[u8; 32], AnnError> {
    let version = ann.version();
    if version > 0 && ann.parent_block_height() < params.v2_min_parent_height {
        return Err(AnnError::VersionNotAllowed);
    }
    if pc_version > 1 && version == 0 {
        return Err(AnnError::VersionMismatch);
    }

    // Hash the header twice against a 64-byte slot holding first the parent
    // hash, then the proof's terminal node; the soft nonce stays zeroed.
    let mut hdr = [0u8; ANN_HEADER_LEN + 64];
    hdr[..ANN_HEADER_LEN].copy_from_slice(&ann.0[..ANN_HEADER_LEN]);
    hdr[4..8].fill(0);
    hdr[ANN_HEADER_LEN..ANN_HEADER_LEN + 32].copy_from_slice(parent_block_hash);
    let ann_hash0 = hash_compress64(&hdr);
    hdr[ANN_HEADER_LEN..].copy_from_slice(ann.merkle_root());
    let ann_hash1 = hash_compress64(&hdr);

    let soft_nonce = ann.soft_nonce();
    if version > 0 && soft_nonce > difficulty::pc2_soft_nonce_max(ann.work_target()) {
        return Err(AnnError::SoftNonceHigh);
    }

    // Item seed from annHash0 alone: the miner must be able to derive the
    // table before the tree that commits it exists.
    let mk_item_seed = hash_compress64(&ann_hash0);
    let item_seed: [u8; 32] = mk_item_seed[..32].try_into().expect("32-byte seed");
    let state_seed: [u8; 32] = mk_item_seed[32..].try_into().expect("32-byte seed");

    let program = if version > 0 {
        Some(Program::generate(&item_seed, params)?)
    } else {
        None
    };

    let chain_seed: [u8; 32] = ann_hash1[..32].try_into().expect("32-byte seed");
    let mut state = State::init(&chain_seed, soft_nonce as u64);
    let mut item = [0u8; ITEM_LEN];
    let mut item_no = 0u64;
    for _ in 0..4 {
        item_no = state.item_no() % ANN_TABLE_SIZE;
        match &program {
            None => mk_item(item_no, &mut item, &item_seed, params),
            Some(prog) => mk_item2(item_no, &mut item, &state_seed, prog, params)?,
        }
        let cycles = if version == 0 { params.randhash_cycles } else { 0 };
        state.update(&item, None, cycles, params)?;
    }

    let work_hash = state.finalize();

    if version == 0 {
        if ann.item4_prefix() != &item[..4] {
            return Err(AnnError::InvalidItem4);
        }
    } else if ann.item4_prefix().iter().any(|&b| b != 0) {
        // v2 never transmits the prefix; it is re-derived above.
        return Err(AnnError::InvalidItem4);
    }

    if !item_merkle_resolves(ann, &item, item_no) {
        return Err(AnnError::InvalidMerkle);
    }

    if !difficulty::is_ok(&work_hash, ann.work_target()) {
        log::debug!(
            "announcement work hash {} misses target {:08x}",
            hex::encode(&work_hash[..8]),
            ann.work_target().0
        );
        return Err(AnnError::InsufficientPow { work_hash });
    }
    Ok(work_hash)
}

/// Check a batch of independent announcements on the rayon pool.
pub fn check_announcements_parallel(
    anns: &[Announcement],
    parent_hashes: &[[u8; 32]],
    pc_version: u8,
    params: &ConsensusParams,
) -> Vec<Result<[u8; 32], AnnError>> {
    anns.par_iter()
        .zip(parent_hashes.par_iter())
        .map(|(ann, parent)| check_announcement(ann, parent, pc_version, params))
        .collect()
}

/// Ascend the 13-level item tree from the synthesized last item; the walk
/// must land on the proof's terminal node.
fn item_merkle_resolves(ann: &Announcement, item: &[u8; ITEM_LEN], item_no: u64) -> bool {
    let mut node = hash_compress64(item);
    let mut index = item_no;
    for level in 0..ANN_MERKLE_DEPTH {
        let sibling = ann.merkle_sibling(level);
        let mut pair = [0u8; 128];
        if index & 1 == 1 {
            pair[..64].copy_from_slice(sibling);
            pair[64..].copy_from_slice(&node);
        } else {
            pair[..64].copy_from_slice(&node);
            pair[64..].copy_from_slice(sibling);
        }
        node = hash_compress64(&pair);
        index >>= 1;
    }
    node[..] == *ann.merkle_root()
}

/// v1 item synthesis: expand the seed into a first block, chain the
/// remaining fifteen, then memohash the lot.
pub(crate) fn mk_item(
    item_no: u64,
    out: &mut [u8; ITEM_LEN],
    seed: &[u8; 32],
    params: &ConsensusParams,
) {
    hash_expand(&mut out[..64], seed, item_no as u32);
    for i in 1..ITEM_BLOCKS {
        let block = hash_compress64(&out[(i - 1) * 64..i * 64]);
        out[i * 64..(i + 1) * 64].copy_from_slice(&block);
    }
    memocycle(out, params.memohash_cycles);
}

/// Replace each 64-byte block with the compression of its predecessor and a
/// predecessor-selected partner, `cycles` times over.
fn memocycle(item: &mut [u8; ITEM_LEN], cycles: u32) {
    let mut pair = [0u8; 128];
    for _ in 0..cycles {
        for i in 0..ITEM_BLOCKS {
            let p = (i + ITEM_BLOCKS - 1) % ITEM_BLOCKS;
            let tap =
                u32::from_le_bytes(item[p * 64..p * 64 + 4].try_into().expect("4-byte slice"));
            let j = (i + (tap as usize % (ITEM_BLOCKS - 1))) % ITEM_BLOCKS;
            pair[..64].copy_from_slice(&item[p * 64..(p + 1) * 64]);
            pair[64..].copy_from_slice(&item[j * 64..(j + 1) * 64]);
            let block = hash_compress64(&pair);
            item[i * 64..(i + 1) * 64].copy_from_slice(&block);
        }
    }
}

/// v2 item synthesis: run the announcement's program over a fresh state
/// seeded per item, against a 2 KiB window of the program scratch.
fn mk_item2(
    item_no: u64,
    out: &mut [u8; ITEM_LEN],
    state_seed: &[u8; 32],
    program: &Program,
    params: &ConsensusParams,
) -> Result<(), AnnError> {
    let mut state = State::init(state_seed, item_no);
    let window = (item_no as usize % 4) * 512;
    interpret(
        program,
        &mut state,
        &program.memory()[window..window + 512],
        params.v2_item_cycles,
        params,
    )?;
    state.make_fuzzable();
    state.crypto_cycle();
    assert!(!state.failed(), "CryptoCycle failed on a sanitized state");
    out.copy_from_slice(&state.bytes()[..ITEM_LEN]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::hash_compress32;

    fn params() -> ConsensusParams {
        ConsensusParams::default()
    }

    fn blank_ann(version: u8) -> Announcement {
        let mut bytes = [0u8; ANN_SIZE];
        bytes[0] = version;
        // Easiest target so work checks are not the failing step.
        bytes[8..12].copy_from_slice(&0x207f_ffffu32.to_le_bytes());
        Announcement(bytes)
    }

    fn fold_level(level: &[[u8; 64]]) -> Vec<[u8; 64]> {
        level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 128];
                buf[..64].copy_from_slice(&pair[0]);
                buf[64..].copy_from_slice(&pair[1]);
                hash_compress64(&buf)
            })
            .collect()
    }

    #[test]
    fn test_field_accessors_match_layout() {
        let mut bytes = [0u8; ANN_SIZE];
        bytes[0] = 1;
        bytes[4..8].copy_from_slice(&0xaabbccddu32.to_le_bytes());
        bytes[8..12].copy_from_slice(&0x1d00_ffffu32.to_le_bytes());
        bytes[12..16].copy_from_slice(&104_000u32.to_le_bytes());
        bytes[16..20].copy_from_slice(&7u32.to_le_bytes());
        bytes[20..24].copy_from_slice(&4096u32.to_le_bytes());
        bytes[24..56].fill(0x11);
        bytes[56..88].fill(0x22);
        let ann = Announcement(bytes);

        assert_eq!(ann.version(), 1);
        assert_eq!(ann.soft_nonce(), 0xaabbccdd);
        assert_eq!(ann.work_target(), CompactTarget(0x1d00_ffff));
        assert_eq!(ann.parent_block_height(), 104_000);
        assert_eq!(ann.content_type(), 7);
        assert_eq!(ann.content_length(), 4096);
        assert_eq!(ann.content_hash(), &[0x11u8; 32][..]);
        assert!(ann.has_signing_key());
        assert_eq!(ann.merkle_root().len(), 64);
    }

    #[test]
    fn test_unsigned_when_key_is_zero() {
        assert!(!blank_ann(0).has_signing_key());
    }

    #[test]
    fn test_wire_length_is_enforced() {
        assert!(Announcement::try_from(&[0u8; ANN_SIZE][..]).is_ok());
        assert_eq!(
            Announcement::try_from(&[0u8; 100][..]).err(),
            Some(AnnError::Invalid)
        );
    }

    #[test]
    fn test_versioned_ann_needs_high_parent() {
        let p = params();
        let mut ann = blank_ann(1);
        ann.0[12..16].copy_from_slice(&100u32.to_le_bytes());
        assert_eq!(
            check_announcement(&ann, &[0u8; 32], 1, &p),
            Err(AnnError::VersionNotAllowed)
        );
    }

    #[test]
    fn test_version_zero_rejected_under_pc2() {
        let p = params();
        let ann = blank_ann(0);
        assert_eq!(
            check_announcement(&ann, &[0u8; 32], 2, &p),
            Err(AnnError::VersionMismatch)
        );
    }

    #[test]
    fn test_soft_nonce_bound_enforced_for_v2() {
        let p = params();
        let mut ann = blank_ann(1);
        ann.0[12..16].copy_from_slice(&p.v2_min_parent_height.to_le_bytes());
        // The easiest target allows only a small nonce window.
        ann.0[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            check_announcement(&ann, &[0u8; 32], 2, &p),
            Err(AnnError::SoftNonceHigh)
        );
    }

    #[test]
    fn test_v2_nonzero_prefix_rejected() {
        let p = params();
        let mut ann = blank_ann(1);
        ann.0[12..16].copy_from_slice(&p.v2_min_parent_height.to_le_bytes());
        ann.0[ITEM4_PREFIX_OFF] = 1;
        assert_eq!(
            check_announcement(&ann, &[0u8; 32], 2, &p),
            Err(AnnError::InvalidItem4)
        );
    }

    #[test]
    fn test_garbage_v1_fails_at_prefix_or_merkle() {
        let p = params();
        let ann = blank_ann(0);
        let err = check_announcement(&ann, &[7u8; 32], 1, &p).unwrap_err();
        assert!(matches!(err, AnnError::InvalidItem4 | AnnError::InvalidMerkle));
    }

    #[test]
    fn test_mk_item_is_deterministic_and_seed_sensitive() {
        let p = params();
        let mut a = [0u8; ITEM_LEN];
        let mut b = [0u8; ITEM_LEN];
        mk_item(5, &mut a, &[1u8; 32], &p);
        mk_item(5, &mut b, &[1u8; 32], &p);
        assert_eq!(a[..], b[..]);
        mk_item(5, &mut b, &[2u8; 32], &p);
        assert_ne!(a[..], b[..]);
        mk_item(6, &mut b, &[1u8; 32], &p);
        assert_ne!(a[..], b[..]);
    }

    #[test]
    fn test_memocycle_differs_from_plain_chain() {
        let p = params();
        let mut cycled = [0u8; ITEM_LEN];
        mk_item(0, &mut cycled, &[9u8; 32], &p);

        let mut plain = [0u8; ITEM_LEN];
        hash_expand(&mut plain[..64], &[9u8; 32], 0);
        for i in 1..ITEM_BLOCKS {
            let block = hash_compress64(&plain[(i - 1) * 64..i * 64]);
            plain[i * 64..(i + 1) * 64].copy_from_slice(&block);
        }
        assert_ne!(cycled[..], plain[..]);
    }

    /// Build a full-depth tree over cheap stand-in leaves and check the
    /// proof walk accepts the honest proof and rejects tampered ones.
    #[test]
    fn test_item_merkle_proof_round_trip() {
        let seed = [8u8; 32];
        let mut level: Vec<[u8; 64]> = (0..ANN_TABLE_SIZE)
            .map(|i| {
                let mut item = [0u8; ITEM_LEN];
                hash_expand(&mut item, &seed, (i * 16) as u32);
                hash_compress64(&item)
            })
            .collect();

        let leaf_no = 4242u64;
        let mut item = [0u8; ITEM_LEN];
        hash_expand(&mut item, &seed, (leaf_no * 16) as u32);

        let mut ann = blank_ann(0);
        let mut index = leaf_no as usize;
        for depth in 0..ANN_MERKLE_DEPTH {
            ann.0[MERKLE_PROOF_OFF + depth * 64..MERKLE_PROOF_OFF + (depth + 1) * 64]
                .copy_from_slice(&level[index ^ 1]);
            level = fold_level(&level);
            index >>= 1;
        }
        assert_eq!(level.len(), 1);
        ann.0[MERKLE_ROOT_OFF..].copy_from_slice(&level[0]);

        assert!(item_merkle_resolves(&ann, &item, leaf_no));

        // Any flipped proof bit must break the walk.
        let mut tampered = ann.clone();
        tampered.0[MERKLE_PROOF_OFF + 100] ^= 0x40;
        assert!(!item_merkle_resolves(&tampered, &item, leaf_no));

        // The right proof for the wrong leaf index must break too.
        assert!(!item_merkle_resolves(&ann, &item, leaf_no + 1));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let p = params();
        let anns = vec![blank_ann(0), blank_ann(0)];
        let parents = vec![[1u8; 32], [2u8; 32]];
        let par = check_announcements_parallel(&anns, &parents, 1, &p);
        for (ann, (parent, got)) in anns.iter().zip(parents.iter().zip(par)) {
            assert_eq!(check_announcement(ann, parent, 1, &p), got);
        }
    }

    /// Full positive-path v1 announcement: synthesize the whole 8192-item
    /// table, commit it, and soft-nonce-search until the chain verifies.
    /// Heavy; run with `cargo test --release -- --ignored`.
    #[test]
    #[ignore]
    fn test_v1_announcement_end_to_end() {
        let p = params();
        let parent = hash_compress32(b"parent block");
        let mut ann = blank_ann(0);

        // Seeds depend only on the nonce-zeroed header and the parent hash,
        // so the table can be built once up front.
        let mut hdr = [0u8; ANN_HEADER_LEN + 64];
        hdr[..ANN_HEADER_LEN].copy_from_slice(&ann.0[..ANN_HEADER_LEN]);
        hdr[ANN_HEADER_LEN..ANN_HEADER_LEN + 32].copy_from_slice(&parent);
        let ann_hash0 = hash_compress64(&hdr);
        let mk_item_seed = hash_compress64(&ann_hash0);
        let item_seed: [u8; 32] = mk_item_seed[..32].try_into().unwrap();

        let mut table: Vec<[u8; ITEM_LEN]> = Vec::with_capacity(ANN_TABLE_SIZE as usize);
        for i in 0..ANN_TABLE_SIZE {
            let mut item = [0u8; ITEM_LEN];
            mk_item(i, &mut item, &item_seed, &p);
            table.push(item);
        }
        let mut levels = vec![table.iter().map(|i| hash_compress64(i)).collect::<Vec<_>>()];
        while levels.last().unwrap().len() > 1 {
            let next = fold_level(levels.last().unwrap());
            levels.push(next);
        }
        let root = levels.last().unwrap()[0];
        ann.0[MERKLE_ROOT_OFF..].copy_from_slice(&root);

        hdr[ANN_HEADER_LEN..].copy_from_slice(&root);
        let ann_hash1 = hash_compress64(&hdr);
        let chain_seed: [u8; 32] = ann_hash1[..32].try_into().unwrap();

        for soft_nonce in 0u32..64 {
            let mut state = State::init(&chain_seed, soft_nonce as u64);
            let mut last_no = 0u64;
            for _ in 0..4 {
                last_no = state.item_no() % ANN_TABLE_SIZE;
                state
                    .update(&table[last_no as usize], None, p.randhash_cycles, &p)
                    .unwrap();
            }
            let work_hash = state.finalize();
            if !difficulty::is_ok(&work_hash, ann.work_target()) {
                continue;
            }

            ann.0[4..8].copy_from_slice(&soft_nonce.to_le_bytes());
            ann.0[ITEM4_PREFIX_OFF..ITEM4_PREFIX_OFF + 4]
                .copy_from_slice(&table[last_no as usize][..4]);
            let mut index = last_no as usize;
            for (depth, level) in levels.iter().take(ANN_MERKLE_DEPTH).enumerate() {
                ann.0[MERKLE_PROOF_OFF + depth * 64..MERKLE_PROOF_OFF + (depth + 1) * 64]
                    .copy_from_slice(&level[index ^ 1]);
                index >>= 1;
            }

            let got = check_announcement(&ann, &parent, 1, &p).expect("mined ann verifies");
            assert_eq!(got, work_hash);
            return;
        }
        panic!("no soft nonce satisfied the easiest target in 64 tries");
    }
}
