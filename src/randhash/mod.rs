pub mod interpret;
pub mod opcodes;
pub mod randgen;

pub use interpret::interpret;
pub use opcodes::OpCode;
pub use randgen::{Program, MEMORY_WORDS};
