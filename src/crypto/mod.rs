pub mod cryptocycle;
pub mod hash;

pub use cryptocycle::{State, STATE_LEN, STATE_WORDS};
pub use hash::{hash_compress32, hash_compress64, hash_expand};
