use serde::{Deserialize, Serialize};

/// Depth of the per-announcement item merkle tree.
pub const ANN_MERKLE_DEPTH: usize = 13;

/// Number of addressable items (`1 << ANN_MERKLE_DEPTH`).
pub const ANN_TABLE_SIZE: u64 = 1 << ANN_MERKLE_DEPTH as u64;

/// Bytes of the announce header hashed into `ann_hash0`/`ann_hash1`.
pub const ANN_HEADER_LEN: usize = 56;

/// Consensus-critical PacketCrypt parameters.
///
/// These are chain constants, not tuning knobs: changing any of them splits
/// the chain. They live in one immutable struct (rather than scattered
/// consts) so a future chain-parameter change stays tractable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Block height below which announcement aging is skipped.
    pub ann_wait_period: u32,
    /// Inner cycles of the v1 item memohash.
    pub memohash_cycles: u32,
    /// Interpreter cycles applied by a v1 state update.
    pub randhash_cycles: u32,
    /// Interpreter cycles applied while synthesizing a v2 item.
    pub v2_item_cycles: u32,
    /// Operation budget handed to the program emitter.
    pub randgen_initial_budget: u32,
    /// Shortest program the emitter may produce.
    pub randgen_min_insns: usize,
    /// Longest program the emitter may produce.
    pub randgen_max_insns: usize,
    /// Minimum executed operations per interpreter cycle.
    pub interp_min_ops: u32,
    /// Maximum executed operations per interpreter cycle.
    pub interp_max_ops: u32,
    /// One-in-N chance an operand is drawn from an enclosing scope.
    pub higher_scope_likelihood: u32,
    /// One-in-N chance operand B is an immediate.
    pub immediate_likelihood: u32,
    /// One-in-N chance a branch tests the random tap instead of the likely one.
    pub random_branch_likelihood: u32,
    /// Fewest iterations of an emitted loop.
    pub loop_min_cycles: u32,
    /// Most iterations of an emitted loop.
    pub loop_max_cycles: u32,
    /// Lowest parent height a v2 announcement may declare.
    pub v2_min_parent_height: u32,
    /// Height from which PacketCrypt version 2 proofs are accepted.
    pub v2_allowed_height: u32,
    /// Height from which PacketCrypt version 2 proofs are required.
    pub v2_required_height: u32,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            ann_wait_period: 3,
            memohash_cycles: 8,
            randhash_cycles: 4,
            v2_item_cycles: 2,
            randgen_initial_budget: 1024,
            randgen_min_insns: 0,
            randgen_max_insns: 2048,
            interp_min_ops: 0,
            interp_max_ops: 100_000,
            higher_scope_likelihood: 4,
            immediate_likelihood: 4,
            random_branch_likelihood: 2,
            loop_min_cycles: 2,
            loop_max_cycles: 8,
            v2_min_parent_height: 103_869,
            v2_allowed_height: 113_949,
            v2_required_height: 122_621,
        }
    }
}

impl ConsensusParams {
    /// PacketCrypt proof version in force at a given block height.
    pub fn pc_version_for_height(&self, height: u32) -> u8 {
        if height >= self.v2_required_height {
            2
        } else {
            1
        }
    }

    /// Whether a version-2 proof may be attached at the given height.
    pub fn pc2_allowed_at(&self, height: u32) -> bool {
        height >= self.v2_allowed_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size_matches_depth() {
        assert_eq!(ANN_TABLE_SIZE, 8192);
        assert_eq!(1u64 << ANN_MERKLE_DEPTH, ANN_TABLE_SIZE);
    }

    #[test]
    fn test_version_windows() {
        let params = ConsensusParams::default();
        assert_eq!(params.pc_version_for_height(0), 1);
        assert!(!params.pc2_allowed_at(113_948));
        assert!(params.pc2_allowed_at(113_949));
        assert_eq!(params.pc_version_for_height(122_621), 2);
    }
}
