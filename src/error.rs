use thiserror::Error;

/// Failures while emitting a RandHash program from a seed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramError {
    #[error("generated program length {0} outside the allowed instruction window")]
    LengthOutOfBounds(usize),

    #[error("branch body too large to encode a jump offset")]
    OffsetOverflow,
}

/// Failures while interpreting a RandHash program.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    #[error("variable stack overflow")]
    TooBig,

    #[error("operand references a missing variable")]
    TooSmall,

    #[error("operation budget exhausted")]
    TooLong,

    #[error("program finished under the minimum operation count")]
    TooShort,

    #[error("program counter ran past the end of the program")]
    OutOfProgram,
}

/// Either side of the RandHash pipeline failing during a state update.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandHashError {
    #[error(transparent)]
    Generate(#[from] ProgramError),

    #[error(transparent)]
    Execute(#[from] ExecError),
}

/// Announcement verification failures. Every variant is fatal for the
/// announcement; there is no local recovery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnError {
    #[error("announcement version not allowed at its parent height")]
    VersionNotAllowed,

    #[error("announcement version incompatible with the PacketCrypt version")]
    VersionMismatch,

    #[error("soft nonce exceeds the bound implied by the work target")]
    SoftNonceHigh,

    #[error("announcement structurally invalid")]
    Invalid,

    #[error("item-4 prefix does not match the synthesized item")]
    InvalidItem4,

    #[error("item merkle proof does not resolve to the announced root")]
    InvalidMerkle,

    #[error("announcement work hash misses its target (hash {})", hex::encode(work_hash))]
    InsufficientPow { work_hash: [u8; 32] },

    #[error("random program generation failed: {0}")]
    BadProgram(#[from] ProgramError),

    #[error("random program execution failed: {0}")]
    BadProgramExec(#[from] ExecError),
}

impl From<RandHashError> for AnnError {
    fn from(e: RandHashError) -> Self {
        match e {
            RandHashError::Generate(g) => AnnError::BadProgram(g),
            RandHashError::Execute(x) => AnnError::BadProgramExec(x),
        }
    }
}

/// Content-proof verification failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentProofError {
    #[error("content proof shorter than the tree walk requires")]
    Truncated,

    #[error("content proof carries unused trailing bytes")]
    TrailingBytes,

    #[error("content merkle walk does not resolve to the declared content hash")]
    HashMismatch,
}

/// Block-level proof verification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("coinbase commitment missing, malformed, or carrying an invalid minimum difficulty")]
    BadCoinbase,

    #[error("packetcrypt version {version} not in force at height {height}")]
    VersionNotInForce { version: u8, height: i32 },

    #[error("block work hash misses both the effective and the share target (hash {})", hex::encode(work_hash))]
    InsufficientPow { work_hash: [u8; 32] },

    #[error("announcement {index} failed verification: {source}")]
    Announcement { index: usize, source: AnnError },

    #[error("announcement {index} has aged below the committed minimum difficulty")]
    AnnInsufficientPow { index: usize },

    #[error("packetcrypt proof structurally invalid")]
    PcpInvalid,

    #[error("announcement commitment does not match the coinbase merkle root")]
    PcpMismatch,

    #[error("announcement {index} requires a signature but none was supplied")]
    SignatureMissing { index: usize },

    #[error("announcement {index} signature rejected")]
    SignatureInvalid { index: usize },

    #[error("announcement {index} content proof missing")]
    ContentProofMissing { index: usize },

    #[error("announcement {index} content proof rejected: {source}")]
    ContentProof { index: usize, source: ContentProofError },
}
