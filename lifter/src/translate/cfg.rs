//! Control-flow emission: the exit block, the branch-taken and next-PC
//! cells, and block-continuation splits.
//!
//! The insertion block is tracked explicitly on the emitter: after any
//! split, all remaining ops of the instruction emit into the freshly created
//! continuation block. Cranelift blocks cannot be appended past a
//! terminator, so an unconditional redirect also opens a (sealed,
//! unreachable) continuation so that later ops of the same instruction can
//! still emit IR.

use cranelift::prelude::*;

use crate::arch::LifterArch;
use crate::decoder::InstructionDecoder;
use crate::{BranchTakenVar, LiftError, LiftStatus};

use super::PcodeEmitter;

impl<'a, D: InstructionDecoder, A: LifterArch> PcodeEmitter<'a, D, A> {
    pub(super) fn store_next_pc(&mut self, value: Value) {
        self.builder.ins().store(MemFlags::trusted(), value, self.next_pc_ref, 0);
    }

    fn store_branch_taken(&mut self, value: Value) {
        self.builder.ins().store(MemFlags::trusted(), value, self.btaken_ref, 0);
    }

    /// Stores `target` into the next-PC cell and routes the current block to
    /// the exit block.
    pub(super) fn redirect_control_flow(&mut self, target: Value) {
        let target = self.resize_int(target, self.word_ty);
        self.store_next_pc(target);
        self.builder.ins().jump(self.exit_block, &[]);

        let continuation = self.builder.create_block();
        self.builder.switch_to_block(continuation);
        self.builder.seal_block(continuation);
    }

    /// Branches to the exit block when `cond` is non-zero, falling through
    /// to a new continuation block which becomes the insertion point.
    pub(super) fn terminate_with_condition(&mut self, cond: Value) {
        let continuation = self.builder.create_block();
        self.builder.ins().brif(cond, self.exit_block, &[], continuation, &[]);
        self.builder.switch_to_block(continuation);
        self.builder.seal_block(continuation);
    }

    /// Writes the branch-taken flag for this instruction, truncating or
    /// extending the flag varnode to a byte.
    fn lift_branch_taken(&mut self, btaken: &BranchTakenVar) -> Result<(), LiftError> {
        let value = self.read_int(&btaken.varnode)?;
        let value = self.resize_int(value, types::I8);
        self.store_branch_taken(value);
        Ok(())
    }

    pub(super) fn emit_branch_taken(&mut self, btaken: &BranchTakenVar) {
        if let Err(err) = self.lift_branch_taken(btaken) {
            tracing::error!("failed to lift branch-taken flag: {err}");
            self.status.update(LiftStatus::LifterError);
        }
    }

    /// Routes the open insertion block to the exit block and fills the exit
    /// block with the function's only return: the current memory pointer.
    pub(super) fn finalize(mut self) -> LiftStatus {
        self.builder.ins().jump(self.exit_block, &[]);

        self.builder.switch_to_block(self.exit_block);
        self.builder.seal_block(self.exit_block);
        let memory = self.builder.ins().stack_load(self.memory_ty, self.memory_slot, 0);
        self.builder.ins().return_(&[memory]);

        self.builder.finalize();
        self.status
    }
}
