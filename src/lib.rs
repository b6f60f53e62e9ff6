//! PacketCrypt proof-of-work verification.
//!
//! The consensus-critical core that decides whether a candidate block
//! carries sufficient bandwidth-hard proof of work: the CryptoCycle mixing
//! state, the RandHash program generator and interpreter, announcement and
//! block verification, and the coinbase commitment codec. Verification is
//! pure CPU work over owned byte slices; distinct blocks and announcements
//! can be checked in parallel with no shared mutable state.

pub mod consensus;
pub mod crypto;
pub mod error;
pub mod params;
pub mod randhash;

pub use consensus::announce::{check_announcement, check_announcements_parallel, Announcement};
pub use consensus::block::{validate_block_pow, BlockPowRequest, BlockVerdict, PacketCryptProof};
pub use consensus::coinbase::{extract_coinbase_commit, insert_coinbase_commit, CoinbaseCommit};
pub use consensus::difficulty::CompactTarget;
pub use error::{AnnError, BlockError};
pub use params::ConsensusParams;
