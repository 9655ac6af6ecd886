//! Per-instruction scratch storage for the SLEIGH `unique` space.

use std::collections::HashMap;

use cranelift::codegen::ir::StackSlot;
use cranelift::prelude::*;

use pcode::VarSize;

/// Lazily allocated scratch cells keyed by varnode offset.
///
/// Each offset is backed by exactly one stack slot for the duration of one
/// instruction lift; the arena is dropped between instructions. The cell's
/// width is fixed by the first reference. Also used as the fallback home for
/// register-space varnodes the host architecture does not recognize.
pub(crate) struct UniqueArena {
    label: &'static str,
    cells: HashMap<u64, (StackSlot, VarSize)>,
}

impl UniqueArena {
    pub fn new(label: &'static str) -> Self {
        Self { label, cells: HashMap::new() }
    }

    /// Returns the cell backing `offset`, allocating it on first reference.
    pub fn cell(
        &mut self,
        builder: &mut FunctionBuilder,
        offset: u64,
        size: VarSize,
    ) -> (StackSlot, VarSize) {
        if let Some(&cell) = self.cells.get(&offset) {
            return cell;
        }

        let bytes = u32::from(size).next_power_of_two();
        let slot = builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, bytes, 4));
        tracing::trace!("allocated {}_{offset:x}:{size}", self.label);

        self.cells.insert(offset, (slot, size));
        (slot, size)
    }
}
