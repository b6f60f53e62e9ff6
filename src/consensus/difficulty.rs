//! Compact-target and 256-bit work arithmetic.
//!
//! The compact encoding follows Bitcoin's nBits convention: an 8-bit byte
//! length in the high byte and a big-endian mantissa in the low 24 bits,
//! with the mantissa sign bit kept clear.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::params::ConsensusParams;

/// Easiest (numerically largest) target the chain accepts.
pub const MAX_COMPACT: u32 = 0x207f_ffff;

/// Bitcoin-style compact encoding of a 256-bit threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactTarget(pub u32);

impl CompactTarget {
    /// Decode to the full 256-bit threshold.
    pub fn to_big(self) -> BigUint {
        let size = self.0 >> 24;
        let mantissa = self.0 & 0x007f_ffff;
        if size <= 3 {
            BigUint::from(mantissa >> (8 * (3 - size)))
        } else {
            BigUint::from(mantissa) << (8 * (size - 3) as usize)
        }
    }

    /// Encode a 256-bit threshold, rounding the mantissa down and keeping
    /// the sign bit clear.
    pub fn from_big(value: &BigUint) -> CompactTarget {
        if value.is_zero() {
            return CompactTarget(0);
        }
        let bytes = value.to_bytes_be();
        let mut size = bytes.len() as u32;
        let mut mantissa = 0u32;
        for &b in bytes.iter().take(3) {
            mantissa = (mantissa << 8) | b as u32;
        }
        if bytes.len() < 3 {
            mantissa <<= 8 * (3 - bytes.len());
        }
        // A set 0x00800000 bit would read as a negative target.
        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            size += 1;
        }
        CompactTarget(mantissa | (size << 24))
    }

    /// Whether the encoding is canonical and in-range for this chain.
    pub fn is_valid(self) -> bool {
        if self.0 & 0x0080_0000 != 0 {
            return false;
        }
        let value = self.to_big();
        !value.is_zero() && value <= CompactTarget(MAX_COMPACT).to_big()
    }
}

/// Whether a 32-byte hash, read as a big-endian integer, meets the target.
pub fn is_ok(hash: &[u8; 32], target: CompactTarget) -> bool {
    BigUint::from_bytes_be(hash) <= target.to_big()
}

/// Expected hash count to find a target-meeting hash: `2^256 / (target + 1)`.
pub fn work_for_target(target: CompactTarget) -> BigUint {
    (BigUint::one() << 256usize) / (target.to_big() + 1u32)
}

/// Inverse of [`work_for_target`], saturating at the extremes.
pub fn target_for_work(work: &BigUint) -> CompactTarget {
    if work.is_zero() {
        return CompactTarget(MAX_COMPACT);
    }
    let quotient = (BigUint::one() << 256usize) / work;
    if quotient.is_zero() {
        return CompactTarget(0);
    }
    clamp(CompactTarget::from_big(&(quotient - 1u32)))
}

fn clamp(target: CompactTarget) -> CompactTarget {
    if target.to_big() > CompactTarget(MAX_COMPACT).to_big() {
        CompactTarget(MAX_COMPACT)
    } else {
        target
    }
}

/// Threshold the block work hash must meet, given the committed minimum
/// announcement difficulty and announcement count:
/// `effective_work = block_work^3 / (ann_work * ann_count^2)`.
pub fn get_effective_target(
    block_target: CompactTarget,
    ann_min_diff: CompactTarget,
    ann_count: u64,
    _pc_version: u8,
) -> CompactTarget {
    let block_work = work_for_target(block_target);
    let ann_work = work_for_target(ann_min_diff);
    let count = BigUint::from(ann_count.max(1));
    let denominator = ann_work * &count * &count;
    let mut effective = &block_work * &block_work * &block_work / denominator;
    if effective.is_zero() {
        effective = BigUint::one();
    }
    target_for_work(&effective)
}

/// Weaken an announcement's target as it ages beyond the grace window.
/// Version 1 divides the announcement work by the excess age; version 2
/// halves it per block.
pub fn get_aged_ann_target(
    ann_target: CompactTarget,
    age_blocks: u32,
    pc_version: u8,
    params: &ConsensusParams,
) -> CompactTarget {
    if age_blocks <= params.ann_wait_period {
        return ann_target;
    }
    let excess = age_blocks - params.ann_wait_period;
    let work = work_for_target(ann_target);
    let aged = if pc_version >= 2 {
        work >> excess.min(256) as usize
    } else {
        work / excess
    };
    if aged.is_zero() {
        // Fully decayed: worth no more than the easiest possible target.
        return CompactTarget(MAX_COMPACT);
    }
    target_for_work(&aged)
}

/// Largest soft nonce a v2 announcement may carry: harder targets warrant
/// exponentially more search space, saturating at the full 32-bit range.
pub fn pc2_soft_nonce_max(target: CompactTarget) -> u32 {
    let target_bits = target.to_big().bits() as u32;
    let work_bits = 256u32.saturating_sub(target_bits);
    if work_bits >= 22 {
        u32::MAX
    } else {
        (1u32 << (work_bits + 10)) - 1
    }
}

/// Validity bounds on the coinbase-committed minimum announcement difficulty.
pub fn is_ann_min_diff_ok(diff: CompactTarget, pc_version: u8) -> bool {
    if !diff.is_valid() {
        return false;
    }
    if pc_version >= 2 && diff.0 > MAX_COMPACT {
        return false;
    }
    !work_for_target(diff).is_zero()
}
