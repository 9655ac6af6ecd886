//! Host architecture description consumed by the lifter.

use std::collections::HashMap;

use cranelift::prelude::*;

/// Describes the host state layout the emitted IR operates on.
///
/// Register cells live at fixed offsets from the state pointer; the lifter
/// never allocates or names registers itself.
pub trait LifterArch {
    /// The architecture's natural pointer-sized integer type.
    fn word_type(&self) -> Type;

    fn state_pointer_type(&self) -> Type {
        types::I64
    }

    fn memory_pointer_type(&self) -> Type {
        types::I64
    }

    /// Whether the host state has a register cell with this (canonical,
    /// upper-case) name.
    fn has_register(&self, name: &str) -> bool;

    /// Emits the address of the named register cell relative to `state_ptr`,
    /// returning the pointer value and the register's declared type.
    fn load_register_address(
        &self,
        builder: &mut FunctionBuilder,
        state_ptr: Value,
        name: &str,
    ) -> Option<(Value, Type)>;

    /// Renames SLEIGH register names to the host state's canonical names
    /// (e.g. aliasing a banked name to its canonical cell).
    fn state_register_remappings(&self) -> &HashMap<String, String>;
}
