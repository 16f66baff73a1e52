//! Decoded instructions as reported by the engine.
//!
//! The engine's JSON disassembly records omit fields freely depending on
//! the architecture and the instruction, so every field has a named default
//! and decoding never fails on absence.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse instruction classification from the engine's `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstructionKind {
    Call,
    Jump,
    ConditionalJump,
    Return,
    Nop,
    Move,
    Push,
    Pop,
    Invalid,
    /// Anything else, kept verbatim
    Other(String),
}

impl From<String> for InstructionKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "call" | "ucall" | "rcall" | "icall" | "ircall" => InstructionKind::Call,
            "jmp" | "ujmp" | "rjmp" | "ijmp" | "irjmp" | "mjmp" => InstructionKind::Jump,
            "cjmp" | "ucjmp" => InstructionKind::ConditionalJump,
            "ret" | "cret" => InstructionKind::Return,
            "nop" => InstructionKind::Nop,
            "mov" | "lea" => InstructionKind::Move,
            "push" | "upush" | "rpush" => InstructionKind::Push,
            "pop" => InstructionKind::Pop,
            "invalid" | "ill" => InstructionKind::Invalid,
            _ => InstructionKind::Other(value),
        }
    }
}

impl From<InstructionKind> for String {
    fn from(kind: InstructionKind) -> Self {
        kind.to_string()
    }
}

impl Default for InstructionKind {
    fn default() -> Self {
        default_kind()
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionKind::Call => write!(f, "call"),
            InstructionKind::Jump => write!(f, "jmp"),
            InstructionKind::ConditionalJump => write!(f, "cjmp"),
            InstructionKind::Return => write!(f, "ret"),
            InstructionKind::Nop => write!(f, "nop"),
            InstructionKind::Move => write!(f, "mov"),
            InstructionKind::Push => write!(f, "push"),
            InstructionKind::Pop => write!(f, "pop"),
            InstructionKind::Invalid => write!(f, "invalid"),
            InstructionKind::Other(s) => write!(f, "{}", s),
        }
    }
}

fn default_kind() -> InstructionKind {
    InstructionKind::Other("unknown".to_string())
}

fn default_size() -> u64 {
    1
}

fn default_text() -> String {
    "invalid".to_string()
}

/// One decoded instruction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Virtual address of the first byte
    #[serde(rename = "offset", alias = "addr", default)]
    pub address: u64,
    /// Encoded length in bytes
    #[serde(default = "default_size")]
    pub size: u64,
    /// Plain opcode text (`mov eax, 1`)
    #[serde(default = "default_text")]
    pub opcode: String,
    /// Pseudo/annotated disassembly text
    #[serde(default = "default_text")]
    pub disasm: String,
    /// Encoded bytes as hex
    #[serde(default)]
    pub bytes: String,
    /// Instruction class
    #[serde(rename = "type", default = "default_kind")]
    pub kind: InstructionKind,
    /// Branch target, if any
    #[serde(default)]
    pub jump: Option<u64>,
    /// Fall-through target of a conditional branch
    #[serde(default)]
    pub fail: Option<u64>,
    /// Start of the enclosing function
    #[serde(default)]
    pub fcn_addr: Option<u64>,
    /// Flags (labels) attached to the address
    #[serde(default)]
    pub flags: Vec<String>,
    /// User or engine comment
    #[serde(default)]
    pub comment: Option<String>,
}

impl Instruction {
    /// A placeholder for bytes the engine could not decode.
    pub fn invalid(address: u64) -> Self {
        Self {
            address,
            size: default_size(),
            opcode: default_text(),
            disasm: default_text(),
            bytes: String::new(),
            kind: InstructionKind::Invalid,
            jump: None,
            fail: None,
            fcn_addr: None,
            flags: Vec::new(),
            comment: None,
        }
    }

    /// Address one past the last byte; sizes of zero count as one.
    pub fn end_address(&self) -> u64 {
        self.address.saturating_add(self.size.max(1))
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end_address()
    }

    /// Decoded instruction bytes; empty if the engine sent none or garbage.
    pub fn raw_bytes(&self) -> Vec<u8> {
        hex::decode(&self.bytes).unwrap_or_default()
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::Call | InstructionKind::Jump | InstructionKind::ConditionalJump
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.opcode)
    }
}
