//! Abstract read/write sites backing varnodes.

use cranelift::codegen::ir::StackSlot;
use cranelift::prelude::*;

use pcode::VarSize;

use crate::arch::LifterArch;
use crate::decoder::InstructionDecoder;
use crate::LiftError;

use super::PcodeEmitter;

/// Where a varnode's value lives for the current instruction.
///
/// Locations are produced on demand by varnode resolution and hold only
/// non-owning references into the function under construction; they never
/// outlive a single instruction lift.
#[derive(Clone, Copy)]
pub(crate) enum ValueLocation {
    /// A stable pointer into the host state (a register cell).
    RegisterCell { ptr: Value },
    /// A guest memory cell, addressed through the memory intrinsics.
    MemoryCell { index: Value },
    /// An already-materialized constant with its declared type. Claim
    /// substitutions surface here as well, so the value may be any IR value.
    Constant { value: Value, ty: Type },
    /// A scratch cell allocated from a `UniqueArena`.
    ScratchCell { slot: StackSlot, size: VarSize },
}

impl ValueLocation {
    /// Reads this location as a value of type `ty`.
    pub fn read<D, A>(self, em: &mut PcodeEmitter<D, A>, ty: Type) -> Result<Value, LiftError>
    where
        D: InstructionDecoder,
        A: LifterArch,
    {
        match self {
            Self::RegisterCell { ptr } => {
                Ok(em.builder.ins().load(ty, MemFlags::trusted(), ptr, 0))
            }
            Self::MemoryCell { index } => em.read_memory(ty, index),
            Self::Constant { value, ty: declared } => {
                if declared != ty {
                    tracing::debug!("constant declared as {declared} read as {ty}");
                    return Err(LiftError::Unsupported);
                }
                Ok(value)
            }
            Self::ScratchCell { slot, size } => {
                if ty.bytes() > u32::from(size).next_power_of_two() {
                    tracing::debug!("scratch cell of {size} bytes read as {ty}");
                    return Err(LiftError::Unsupported);
                }
                Ok(em.builder.ins().stack_load(ty, slot, 0))
            }
        }
    }

    /// Writes `value` through this location. Constant locations are never
    /// writable.
    pub fn write<D, A>(self, em: &mut PcodeEmitter<D, A>, value: Value) -> Result<(), LiftError>
    where
        D: InstructionDecoder,
        A: LifterArch,
    {
        match self {
            Self::RegisterCell { ptr } => {
                em.builder.ins().store(MemFlags::trusted(), value, ptr, 0);
                Ok(())
            }
            Self::MemoryCell { index } => em.write_memory(value, index),
            Self::Constant { .. } => Err(LiftError::Unsupported),
            Self::ScratchCell { slot, size } => {
                let ty = em.builder.func.dfg.value_type(value);
                if ty.bytes() > u32::from(size).next_power_of_two() {
                    tracing::debug!("scratch cell of {size} bytes written as {ty}");
                    return Err(LiftError::Unsupported);
                }
                em.builder.ins().stack_store(value, slot, 0);
                Ok(())
            }
        }
    }
}
