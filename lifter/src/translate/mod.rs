//! Translation of decoded p-code into a Cranelift IR instruction function.

mod cfg;
mod claims;
mod loc;
mod ops;
mod unique;

use cranelift::codegen::ir::{FuncRef, StackSlot};
use cranelift::codegen::{self, isa::CallConv};
use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module};

use pcode::{PcodeDisplay, PcodeOp, Space, VarNode, VarSize};

use crate::arch::LifterArch;
use crate::decoder::InstructionDecoder;
use crate::intrinsics::MemIntrinsics;
use crate::{
    BranchTakenVar, Instruction, LiftError, LiftStatus, INSTRUCTION_FUNCTION_PREFIX,
};

use self::claims::ClaimContext;
use self::loc::ValueLocation;
use self::unique::UniqueArena;

/// The Cranelift integer type backing a varnode of `size` bytes. Sizes that
/// are not a natural width are widened to the next natural type.
pub(crate) fn sized_int(size: VarSize) -> Type {
    match size {
        1 => types::I8,
        2 => types::I16,
        3 | 4 => types::I32,
        5..=8 => types::I64,
        9..=16 => types::I128,
        _ => {
            tracing::error!("invalid int size: {size}");
            types::INVALID
        }
    }
}

/// Resizes an integer value to `ty`, zero-extending or truncating.
pub(crate) fn resize_int(builder: &mut FunctionBuilder, value: Value, ty: Type) -> Value {
    let from = builder.func.dfg.value_type(value);
    match from.bits().cmp(&ty.bits()) {
        std::cmp::Ordering::Less => builder.ins().uextend(ty, value),
        std::cmp::Ordering::Equal => value,
        std::cmp::Ordering::Greater => builder.ins().ireduce(ty, value),
    }
}

/// Resizes an integer value to `ty`, sign-extending or truncating.
pub(crate) fn resize_sint(builder: &mut FunctionBuilder, value: Value, ty: Type) -> Value {
    let from = builder.func.dfg.value_type(value);
    match from.bits().cmp(&ty.bits()) {
        std::cmp::Ordering::Less => builder.ins().sextend(ty, value),
        std::cmp::Ordering::Equal => value,
        std::cmp::Ordering::Greater => builder.ins().ireduce(ty, value),
    }
}

/// The signature of every emitted instruction function:
/// `(state_ptr, memory_ptr, branch_taken_ref, next_pc_ref) -> memory_ptr`.
pub fn instruction_signature(call_conv: CallConv, arch: &impl LifterArch) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(arch.state_pointer_type()));
    sig.params.push(AbiParam::new(arch.memory_pointer_type()));
    sig.params.push(AbiParam::new(types::I64)); // branch_taken_ref
    sig.params.push(AbiParam::new(types::I64)); // next_pc_ref
    sig.returns.push(AbiParam::new(arch.memory_pointer_type()));
    sig
}

/// Lifts single instructions into per-instruction IR functions.
///
/// Holds the decoder context and reusable Cranelift build state; the module
/// that owns the emitted functions is borrowed per call. Concurrent lifts
/// require independent `SleighLifter` instances.
pub struct SleighLifter<D, A> {
    decoder: D,
    arch: A,
    mem: MemIntrinsics<FuncId>,
    builder_ctx: FunctionBuilderContext,
    code_ctx: codegen::Context,

    /// When set, receives the textual IR of the most recently lifted
    /// function.
    pub il_dump: Option<String>,
}

impl<D: InstructionDecoder, A: LifterArch> SleighLifter<D, A> {
    pub fn new(decoder: D, arch: A, mem: MemIntrinsics<FuncId>) -> Self {
        Self {
            decoder,
            arch,
            mem,
            builder_ctx: FunctionBuilderContext::new(),
            code_ctx: codegen::Context::new(),
            il_dump: None,
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    /// Lifts `inst` into a new function in `module`.
    ///
    /// The returned status is sticky across the instruction's p-code ops; a
    /// non-lifted status still comes with the partially constructed function
    /// so callers may keep it for instrumentation or discard it.
    pub fn lift(
        &mut self,
        module: &mut impl Module,
        inst: &Instruction,
        btaken: Option<&BranchTakenVar>,
    ) -> Result<(LiftStatus, Option<FuncId>), LiftError> {
        self.decoder.reset();
        let ops = match self.decoder.decode(inst.pc, &inst.bytes) {
            Ok(ops) => ops,
            Err(err) => {
                tracing::debug!("{err}");
                return Ok((LiftStatus::Invalid, None));
            }
        };

        for op in &ops {
            tracing::trace!("pcodeop: {}", op.display(&()));
        }
        // Instructions with floating point semantics are rejected up front.
        if ops.iter().any(|op| op.op.is_float()) {
            return Ok((LiftStatus::Unsupported, None));
        }

        module.clear_context(&mut self.code_ctx);
        let sig = instruction_signature(module.isa().default_call_conv(), &self.arch);
        self.code_ctx.func.signature = sig.clone();

        let name = format!("{INSTRUCTION_FUNCTION_PREFIX}_{:x}", inst.pc);
        let func_id = module.declare_function(&name, Linkage::Local, &sig)?;

        let mem = MemIntrinsics::import(module, &mut self.code_ctx.func, &self.mem);
        let builder = FunctionBuilder::new(&mut self.code_ctx.func, &mut self.builder_ctx);
        let mut emitter = PcodeEmitter::new(builder, &self.decoder, &self.arch, mem);

        for (index, op) in ops.iter().enumerate() {
            if let Some(btaken) = btaken.filter(|b| b.index == index) {
                emitter.emit_branch_taken(btaken);
            }
            tracing::trace!("lowering [{index:02}] {}", op.display(&()));
            emitter.lower(op);
        }

        let status = emitter.finalize();

        if let Some(dump) = self.il_dump.as_mut() {
            *dump = self.code_ctx.func.display().to_string();
        }

        module.define_function(func_id, &mut self.code_ctx)?;
        Ok((status, Some(func_id)))
    }
}

/// Emits the body of one instruction function.
///
/// All per-instruction scratch state (unique arenas, pending claims, the
/// current insertion block) lives here and is dropped when the lift ends.
pub(crate) struct PcodeEmitter<'a, D, A> {
    pub(crate) builder: FunctionBuilder<'a>,
    decoder: &'a D,
    arch: &'a A,
    mem: MemIntrinsics<FuncRef>,

    word_ty: Type,
    memory_ty: Type,

    state_ptr: Value,
    btaken_ref: Value,
    next_pc_ref: Value,

    /// Slot holding the current memory pointer ("MEMORY"); stores thread
    /// their returned pointer back through it.
    memory_slot: StackSlot,
    /// Spill slot for 16-byte memory loads, allocated on first use.
    wide_spill: Option<StackSlot>,

    exit_block: Block,

    uniques: UniqueArena,
    unknown_regs: UniqueArena,
    claims: ClaimContext,

    status: LiftStatus,
}

impl<'a, D: InstructionDecoder, A: LifterArch> PcodeEmitter<'a, D, A> {
    fn new(
        mut builder: FunctionBuilder<'a>,
        decoder: &'a D,
        arch: &'a A,
        mem: MemIntrinsics<FuncRef>,
    ) -> Self {
        let word_ty = arch.word_type();
        let memory_ty = arch.memory_pointer_type();

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let (state_ptr, memory_ptr, btaken_ref, next_pc_ref) = match builder.block_params(entry) {
            &[x0, x1, x2, x3] => (x0, x1, x2, x3),
            params => unreachable!("expected 4 params for entry block (got {})", params.len()),
        };

        let memory_slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            memory_ty.bytes(),
            4,
        ));
        builder.ins().stack_store(memory_ptr, memory_slot, 0);

        let exit_block = builder.create_block();

        Self {
            builder,
            decoder,
            arch,
            mem,
            word_ty,
            memory_ty,
            state_ptr,
            btaken_ref,
            next_pc_ref,
            memory_slot,
            wide_spill: None,
            exit_block,
            uniques: UniqueArena::new("unique"),
            unknown_regs: UniqueArena::new("unknown_reg"),
            claims: ClaimContext::new(),
            status: LiftStatus::Lifted,
        }
    }

    /// Lowers one p-code op, recording the sticky status on failure. Pending
    /// claims only survive until the next op that is not itself a claim.
    pub(crate) fn lower(&mut self, op: &PcodeOp) {
        let is_claim = self.is_claim(op);
        if let Err(err) = self.lower_op(op) {
            tracing::error!("failed to lift {}: {err}", op.display(&()));
            self.status.update(err.status());
        }
        if !is_claim {
            self.claims.clear();
        }
    }

    pub(crate) fn resize_int(&mut self, value: Value, ty: Type) -> Value {
        resize_int(&mut self.builder, value, ty)
    }

    pub(crate) fn resize_sint(&mut self, value: Value, ty: Type) -> Value {
        resize_sint(&mut self.builder, value, ty)
    }

    /// Materializes a constant of the requested type.
    fn load_const(&mut self, ty: Type, value: u64) -> Value {
        match ty {
            types::F32 => self.builder.ins().f32const(f32::from_bits(value as u32)),
            types::F64 => self.builder.ins().f64const(f64::from_bits(value)),
            _ if ty.bits() > 64 => {
                let tmp = self.builder.ins().iconst(types::I64, value as i64);
                self.builder.ins().uextend(ty, tmp)
            }
            _ => {
                let masked = value & pcode::mask(u64::from(ty.bits()));
                self.builder.ins().iconst(ty, masked as i64)
            }
        }
    }

    /// Resolves a varnode to the location backing it, dispatching on its
    /// address space.
    pub(crate) fn resolve_varnode(&mut self, vn: &VarNode) -> Result<ValueLocation, LiftError> {
        match vn.space {
            Space::Ram => {
                let index = self.resolve_constant_offset(vn, self.word_ty)?;
                Ok(ValueLocation::MemoryCell { index })
            }
            Space::Register => {
                let name = self.decoder.register_name(vn).unwrap_or_default();
                Ok(self.register_or_scratch(&name, vn))
            }
            Space::Const => {
                let ty = sized_int(vn.size);
                let value = self.resolve_constant_offset(vn, ty)?;
                Ok(ValueLocation::Constant { value, ty })
            }
            Space::Unique => {
                let (slot, size) = self.uniques.cell(&mut self.builder, vn.offset, vn.size);
                Ok(ValueLocation::ScratchCell { slot, size })
            }
            Space::Other(id) => {
                panic!("unhandled address space {id} for {}", vn.display(&()))
            }
        }
    }

    /// Emits the value of a constant offset, honoring any pending claim
    /// substitution for it.
    pub(crate) fn resolve_constant_offset(
        &mut self,
        vn: &VarNode,
        ty: Type,
    ) -> Result<Value, LiftError> {
        if let Some(location) = self.claims.lookup(vn.offset) {
            return location.read(self, ty);
        }
        Ok(self.load_const(ty, vn.offset))
    }

    /// The register cell with the given canonical name, after remapping.
    pub(crate) fn register_location(&mut self, name: &str) -> Option<ValueLocation> {
        let mut name = name.to_uppercase();
        if let Some(mapped) = self.arch.state_register_remappings().get(&name) {
            tracing::debug!("remapping register {name} to {mapped}");
            name = mapped.clone();
        }

        if !self.arch.has_register(&name) {
            return None;
        }
        let (ptr, _ty) =
            self.arch.load_register_address(&mut self.builder, self.state_ptr, &name)?;
        Some(ValueLocation::RegisterCell { ptr })
    }

    /// Registers the host does not know fall back to scratch cells so the
    /// rest of the instruction still lifts.
    fn register_or_scratch(&mut self, name: &str, vn: &VarNode) -> ValueLocation {
        if let Some(location) = self.register_location(name) {
            return location;
        }
        tracing::warn!("creating scratch cell for unknown register: {}", vn.display(&()));
        let (slot, size) = self.unknown_regs.cell(&mut self.builder, vn.offset, vn.size);
        ValueLocation::ScratchCell { slot, size }
    }

    /// Reads a varnode as a value of type `ty`.
    pub(crate) fn read_varnode(&mut self, vn: &VarNode, ty: Type) -> Result<Value, LiftError> {
        let location = self.resolve_varnode(vn)?;
        location.read(self, ty)
    }

    /// Reads a varnode as an integer of its natural width.
    pub(crate) fn read_int(&mut self, vn: &VarNode) -> Result<Value, LiftError> {
        self.read_varnode(vn, sized_int(vn.size))
    }

    /// Writes a value through a varnode's location, normalizing integers to
    /// the varnode's declared width first.
    pub(crate) fn write_varnode(&mut self, vn: &VarNode, value: Value) -> Result<(), LiftError> {
        let location = self.resolve_varnode(vn)?;
        let ty = self.builder.func.dfg.value_type(value);
        let value = if ty.is_int() { self.resize_int(value, sized_int(vn.size)) } else { value };
        location.write(self, value)
    }

    /// Writes the result of an op that requires an output varnode.
    pub(crate) fn write_output(
        &mut self,
        out: Option<&VarNode>,
        value: Value,
    ) -> Result<(), LiftError> {
        let vn = out.ok_or(LiftError::Unsupported)?;
        self.write_varnode(vn, value)
    }

    fn load_memory_ptr(&mut self) -> Value {
        self.builder.ins().stack_load(self.memory_ty, self.memory_slot, 0)
    }

    fn wide_spill_slot(&mut self) -> StackSlot {
        if let Some(slot) = self.wide_spill {
            return slot;
        }
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 16, 4));
        self.wide_spill = Some(slot);
        slot
    }

    /// Reads guest memory at `index` through the memory intrinsics.
    pub(crate) fn read_memory(&mut self, ty: Type, index: Value) -> Result<Value, LiftError> {
        let memory = self.load_memory_ptr();

        if ty.bytes() == 16 {
            let slot = self.wide_spill_slot();
            let out_ptr = self.builder.ins().stack_addr(types::I64, slot, 0);
            let func = self.mem.load(16);
            self.builder.ins().call(func, &[memory, index, out_ptr]);
            return Ok(self.builder.ins().stack_load(types::I128, slot, 0));
        }

        let func = self.mem.load(ty.bytes() as u8);
        let call = self.builder.ins().call(func, &[memory, index]);
        let raw = match self.builder.inst_results(call) {
            &[result] => result,
            _ => return Err(LiftError::Invariant("memory read intrinsic returned no value")),
        };
        Ok(match ty.is_float() {
            true => self.builder.ins().bitcast(ty, MemFlags::new(), raw),
            false => raw,
        })
    }

    /// Writes `value` to guest memory at `index`, threading the returned
    /// memory pointer back into the memory slot.
    pub(crate) fn write_memory(&mut self, value: Value, index: Value) -> Result<(), LiftError> {
        let memory = self.load_memory_ptr();

        let ty = self.builder.func.dfg.value_type(value);
        let value = match ty.is_float() {
            true => {
                let int_ty = Type::int_with_byte_size(ty.bytes() as u16)
                    .ok_or(LiftError::Invariant("float width has no integer type"))?;
                self.builder.ins().bitcast(int_ty, MemFlags::new(), value)
            }
            false => value,
        };

        let bytes = self.builder.func.dfg.value_type(value).bytes() as u8;
        let func = self.mem.store(bytes);
        let call = if bytes == 16 {
            // The value is split into two 64-bit halves; see the intrinsic
            // table declaration.
            let low = self.builder.ins().ireduce(types::I64, value);
            let high = {
                let tmp = self.builder.ins().ushr_imm(value, 64);
                self.builder.ins().ireduce(types::I64, tmp)
            };
            self.builder.ins().call(func, &[memory, index, low, high])
        } else {
            self.builder.ins().call(func, &[memory, index, value])
        };

        let new_memory = match self.builder.inst_results(call) {
            &[result] => result,
            _ => return Err(LiftError::Invariant("memory write intrinsic returned no value")),
        };
        self.builder.ins().stack_store(new_memory, self.memory_slot, 0);
        Ok(())
    }

    /// The user-op name selected by the first input of a CALLOTHER.
    pub(crate) fn user_op_name(&self, inputs: &[VarNode]) -> Option<&str> {
        let index = inputs.first()?.offset as usize;
        self.decoder.user_op_names().get(index).map(|name| name.as_str())
    }

    fn is_claim(&self, op: &PcodeOp) -> bool {
        op.op == pcode::Op::CallOther
            && op.inputs.len() == ops::CLAIM_EQ_ARITY
            && self.user_op_name(&op.inputs) == Some(crate::CLAIM_EQ_USER_OP)
    }
}
