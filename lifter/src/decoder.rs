//! Interface to the external SLEIGH-style disassembler.

use pcode::{PcodeOp, VarNode};

/// The instruction bytes could not be decoded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("instruction at {pc:#x} could not be decoded")]
pub struct DecodeError {
    pub pc: u64,
}

/// Decodes instruction bytes into p-code and resolves register names.
///
/// The decoder carries mutable context across decodes and must be `reset`
/// before each instruction; it is not safe to share between threads without
/// external synchronization.
pub trait InstructionDecoder {
    /// Resets any decode context accumulated by previous instructions.
    fn reset(&mut self);

    /// Decodes the instruction at `pc` into an ordered p-code sequence.
    fn decode(&mut self, pc: u64, bytes: &[u8]) -> Result<Vec<PcodeOp>, DecodeError>;

    /// The canonical register name backing a register-space varnode, if any.
    fn register_name(&self, varnode: &VarNode) -> Option<String>;

    /// Names of user-defined operations, indexed by the first input of a
    /// CALLOTHER op.
    fn user_op_names(&self) -> &[String];
}
