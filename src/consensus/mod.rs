pub mod announce;
pub mod block;
pub mod coinbase;
pub mod content;
pub mod difficulty;

pub use announce::{check_announcement, check_announcements_parallel, Announcement, ANN_SIZE};
pub use block::{pcp_hash, validate_block_pow, BlockPowRequest, BlockVerdict, PacketCryptProof};
pub use coinbase::{
    extract_coinbase_commit, insert_coinbase_commit, CoinbaseCommit, COINBASE_MAGIC, COMMIT_LEN,
    COMMIT_MAGIC,
};
pub use difficulty::{
    get_aged_ann_target, get_effective_target, is_ok, work_for_target, CompactTarget, MAX_COMPACT,
};
