//! Translates the decoded p-code of a single machine instruction into a
//! Cranelift IR function modelling the instruction's effect on the guest
//! state.
//!
//! The emitted function has the fixed signature
//! `(state_ptr, memory_ptr, branch_taken_ref, next_pc_ref) -> memory_ptr`:
//! it reads and writes guest registers through `state_ptr`, threads the
//! memory pointer through the external memory intrinsics, and records
//! control flow decisions in the next-PC and branch-taken cells. A driver
//! chains these functions to lift whole programs.

pub mod arch;
pub mod decoder;
pub mod intrinsics;
pub mod translate;

use pcode::VarNode;

pub use crate::translate::{instruction_signature, SleighLifter};

/// Name prefix for emitted per-instruction functions. The instruction's
/// address is appended in hex.
pub const INSTRUCTION_FUNCTION_PREFIX: &str = "sleigh_remill_instruction_function";

/// Name of the user-op an architecture specification emits to assert that a
/// constant operand is equal to some other computed value.
pub const CLAIM_EQ_USER_OP: &str = "claim_eq";

/// A single machine instruction to lift.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub pc: u64,
    pub bytes: Vec<u8>,
}

impl Instruction {
    pub fn new(pc: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self { pc, bytes: bytes.into() }
    }
}

/// Identifies the p-code index at which the branch-taken flag synthesized by
/// the architecture specification must be written to the branch-taken cell.
#[derive(Debug, Clone, Copy)]
pub struct BranchTakenVar {
    /// The p-code sequence index before which the write is emitted.
    pub index: usize,
    /// The varnode holding the flag value.
    pub varnode: VarNode,
}

/// Outcome of lifting one instruction.
///
/// The status is sticky within a lift: the first non-[`LiftStatus::Lifted`]
/// value is retained, while later operations continue to emit IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftStatus {
    Lifted,
    Invalid,
    Unsupported,
    LifterError,
}

impl LiftStatus {
    #[inline]
    pub fn is_lifted(&self) -> bool {
        matches!(self, Self::Lifted)
    }

    /// Records `new`, keeping the first non-`Lifted` status.
    pub fn update(&mut self, new: LiftStatus) {
        if self.is_lifted() {
            *self = new;
        }
    }
}

impl std::fmt::Display for LiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Lifted => "lifted",
            Self::Invalid => "invalid instruction",
            Self::Unsupported => "unsupported instruction",
            Self::LifterError => "lifter error",
        };
        f.write_str(name)
    }
}

/// Errors raised while lowering p-code operations.
#[derive(Debug, thiserror::Error)]
pub enum LiftError {
    #[error("p-code operation has no supported lowering")]
    Unsupported,

    #[error("lifter invariant violated: {0}")]
    Invariant(&'static str),

    #[error(transparent)]
    Module(#[from] cranelift_module::ModuleError),
}

impl LiftError {
    /// The status recorded when this error reaches an op boundary.
    pub fn status(&self) -> LiftStatus {
        match self {
            Self::Unsupported => LiftStatus::Unsupported,
            Self::Invariant(_) | Self::Module(_) => LiftStatus::LifterError,
        }
    }
}
