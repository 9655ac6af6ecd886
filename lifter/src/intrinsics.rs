//! The external memory intrinsic table.
//!
//! Guest memory is only ever touched through these functions: loads return
//! the value read, stores return the (possibly updated) memory pointer which
//! the lifter threads back into the emitted function's memory slot.

use cranelift::codegen::ir::{FuncRef, Function};
use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module, ModuleResult};

/// Per-width handles to the memory read/write intrinsics.
pub struct MemIntrinsics<T> {
    pub load8: T,
    pub load16: T,
    pub load32: T,
    pub load64: T,
    pub load128: T,

    pub store8: T,
    pub store16: T,
    pub store32: T,
    pub store64: T,
    pub store128: T,
}

impl MemIntrinsics<FuncId> {
    /// Declares the memory intrinsics as imported functions in `module`.
    ///
    /// There is no standardized C calling convention for 128-bit integers,
    /// so the 16-byte load takes an out-pointer and the 16-byte store takes
    /// the value as two 64-bit halves.
    pub fn declare(module: &mut impl Module) -> ModuleResult<Self> {
        use types::{I16, I32, I64, I8};

        let call_conv = module.isa().default_call_conv();

        macro_rules! import_fn {
            ($name:expr, ($($arg_ty:expr),*) -> ($($ret_ty:expr),*)) => {{
                let mut sig = Signature::new(call_conv);
                for arg in &[$($arg_ty),*] {
                    sig.params.push(AbiParam::new(*arg));
                }
                for ret in &[$($ret_ty),*] {
                    sig.returns.push(AbiParam::new(*ret));
                }
                module.declare_function($name, Linkage::Import, &sig)?
            }};
        }

        Ok(Self {
            load8: import_fn!("__remill_read_memory_8", (I64, I64) -> (I8)),
            load16: import_fn!("__remill_read_memory_16", (I64, I64) -> (I16)),
            load32: import_fn!("__remill_read_memory_32", (I64, I64) -> (I32)),
            load64: import_fn!("__remill_read_memory_64", (I64, I64) -> (I64)),
            load128: import_fn!("__remill_read_memory_128", (I64, I64, I64) -> ()),

            store8: import_fn!("__remill_write_memory_8", (I64, I64, I8) -> (I64)),
            store16: import_fn!("__remill_write_memory_16", (I64, I64, I16) -> (I64)),
            store32: import_fn!("__remill_write_memory_32", (I64, I64, I32) -> (I64)),
            store64: import_fn!("__remill_write_memory_64", (I64, I64, I64) -> (I64)),
            store128: import_fn!("__remill_write_memory_128", (I64, I64, I64, I64) -> (I64)),
        })
    }
}

impl MemIntrinsics<FuncRef> {
    /// Makes the declared intrinsics referenceable from `func`.
    pub fn import(
        module: &mut impl Module,
        func: &mut Function,
        ids: &MemIntrinsics<FuncId>,
    ) -> Self {
        Self {
            load8: module.declare_func_in_func(ids.load8, func),
            load16: module.declare_func_in_func(ids.load16, func),
            load32: module.declare_func_in_func(ids.load32, func),
            load64: module.declare_func_in_func(ids.load64, func),
            load128: module.declare_func_in_func(ids.load128, func),
            store8: module.declare_func_in_func(ids.store8, func),
            store16: module.declare_func_in_func(ids.store16, func),
            store32: module.declare_func_in_func(ids.store32, func),
            store64: module.declare_func_in_func(ids.store64, func),
            store128: module.declare_func_in_func(ids.store128, func),
        }
    }

    pub(crate) fn load(&self, size: u8) -> FuncRef {
        match size {
            1 => self.load8,
            2 => self.load16,
            4 => self.load32,
            8 => self.load64,
            16 => self.load128,
            _ => panic!("invalid memory access size {size}"),
        }
    }

    pub(crate) fn store(&self, size: u8) -> FuncRef {
        match size {
            1 => self.store8,
            2 => self.store16,
            4 => self.store32,
            8 => self.store64,
            16 => self.store128,
            _ => panic!("invalid memory access size {size}"),
        }
    }
}
