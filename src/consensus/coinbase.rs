//! The 48-byte PacketCrypt coinbase commitment and its OP_RETURN carrier.

use crate::consensus::difficulty::CompactTarget;

/// Script prefix identifying the commitment output: OP_RETURN, a 48-byte
/// push, and the commitment magic.
pub const COINBASE_MAGIC: [u8; 6] = [0x6a, 0x30, 0x09, 0xf9, 0x11, 0x02];

/// First four bytes of the commitment itself.
pub const COMMIT_MAGIC: u32 = 0x09f9_1102;

/// Commitment size.
pub const COMMIT_LEN: usize = 48;

/// The coinbase commitment: magic, minimum announcement difficulty,
/// announcement count, and the announcement merkle root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinbaseCommit(pub [u8; COMMIT_LEN]);

impl CoinbaseCommit {
    pub fn new(ann_min_diff: CompactTarget, ann_count: u64, merkle_root: [u8; 32]) -> Self {
        let mut bytes = [0u8; COMMIT_LEN];
        bytes[..4].copy_from_slice(&COMMIT_MAGIC.to_be_bytes());
        bytes[4..8].copy_from_slice(&ann_min_diff.0.to_le_bytes());
        bytes[8..16].copy_from_slice(&ann_count.to_le_bytes());
        bytes[16..].copy_from_slice(&merkle_root);
        CoinbaseCommit(bytes)
    }

    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.0[..4].try_into().expect("4-byte slice"))
    }

    pub fn ann_min_diff(&self) -> CompactTarget {
        CompactTarget(u32::from_le_bytes(self.0[4..8].try_into().expect("4-byte slice")))
    }

    pub fn ann_count(&self) -> u64 {
        u64::from_le_bytes(self.0[8..16].try_into().expect("8-byte slice"))
    }

    pub fn merkle_root(&self) -> [u8; 32] {
        self.0[16..].try_into().expect("32-byte slice")
    }
}

/// Scan coinbase output scripts for the first commitment carrier and return
/// its 48-byte payload.
pub fn extract_coinbase_commit<'a, I>(pk_scripts: I) -> Option<CoinbaseCommit>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    for script in pk_scripts {
        if script.len() >= 2 + COMMIT_LEN && script[..COINBASE_MAGIC.len()] == COINBASE_MAGIC {
            let mut commit = [0u8; COMMIT_LEN];
            commit.copy_from_slice(&script[2..2 + COMMIT_LEN]);
            return Some(CoinbaseCommit(commit));
        }
    }
    None
}

/// Append the OP_RETURN output script carrying `commit`.
pub fn insert_coinbase_commit(pk_scripts: &mut Vec<Vec<u8>>, commit: &CoinbaseCommit) {
    let mut script = Vec::with_capacity(2 + COMMIT_LEN);
    script.extend_from_slice(&COINBASE_MAGIC[..2]);
    script.extend_from_slice(&commit.0);
    pk_scripts.push(script);
}
