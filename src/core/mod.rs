//! Core data types decoded from engine responses.
//!
//! Every record here is decoded from the engine's JSON output with explicit
//! defaults for absent fields, so a sparse or older engine never fails a
//! decode just because it omitted something.

pub mod binary;
pub mod function;
pub mod instruction;
pub mod section;

pub use binary::BinaryInfo;
pub use function::FunctionInfo;
pub use instruction::{Instruction, InstructionKind};
pub use section::{Section, SectionListing, SectionPerms};
