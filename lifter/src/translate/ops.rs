//! Opcode-by-opcode lowering into the current insertion point.
//!
//! Dispatch is by operand count, then opcode. Integer results are normalized
//! to the output varnode's width when written; comparisons produce `i8`.
//! Unsupported opcodes report failure without mutating the function.

use cranelift::prelude::*;

use pcode::{Op, PcodeOp, VarNode};

use crate::arch::LifterArch;
use crate::decoder::InstructionDecoder;
use crate::{LiftError, CLAIM_EQ_USER_OP};

use super::loc::ValueLocation;
use super::{sized_int, PcodeEmitter};

pub(super) const CLAIM_EQ_ARITY: usize = 3;

type UnaryEmit = fn(&mut FunctionBuilder, Value) -> Value;
type BinaryEmit = fn(&mut FunctionBuilder, Value, Value) -> Value;

impl<'a, D: InstructionDecoder, A: LifterArch> PcodeEmitter<'a, D, A> {
    pub(super) fn lower_op(&mut self, op: &PcodeOp) -> Result<(), LiftError> {
        let out = op.output.as_ref();
        match op.op {
            Op::MultiEqual => self.lower_multiequal(out, &op.inputs),
            Op::CallOther => self.lower_callother(&op.inputs),
            _ => match op.inputs.as_slice() {
                [a] => self.lower_unary(op.op, out, a),
                [a, b] => self.lower_binary(op.op, out, a, b),
                [a, b, c] => self.lower_ternary(op.op, out, a, b, c),
                _ => Err(LiftError::Unsupported),
            },
        }
    }

    fn lower_unary(
        &mut self,
        opc: Op,
        out: Option<&VarNode>,
        input: &VarNode,
    ) -> Result<(), LiftError> {
        match opc {
            Op::Copy | Op::Cast => {
                let value = self.read_int(input)?;
                self.write_output(out, value)
            }
            Op::BoolNegate => {
                let value = self.read_varnode(input, types::I8)?;
                let result = self.builder.ins().icmp_imm(IntCC::Equal, value, 0);
                self.write_output(out, result)
            }
            Op::IntZext => {
                let outvn = *out.ok_or(LiftError::Unsupported)?;
                let value = self.read_int(input)?;
                let result = self.resize_int(value, sized_int(outvn.size));
                self.write_varnode(&outvn, result)
            }
            Op::IntSext => {
                let outvn = *out.ok_or(LiftError::Unsupported)?;
                let value = self.read_int(input)?;
                let result = self.resize_sint(value, sized_int(outvn.size));
                self.write_varnode(&outvn, result)
            }
            Op::Int2Comp => {
                let value = self.read_int(input)?;
                let result = self.builder.ins().ineg(value);
                self.write_output(out, result)
            }
            Op::IntNegate => {
                let value = self.read_int(input)?;
                let result = self.builder.ins().bnot(value);
                self.write_output(out, result)
            }
            Op::Popcount => {
                let value = self.read_int(input)?;
                let result = self.builder.ins().popcnt(value);
                self.write_output(out, result)
            }
            Op::Lzcount => {
                let value = self.read_int(input)?;
                let result = self.builder.ins().clz(value);
                self.write_output(out, result)
            }

            Op::FloatNeg => self.float_unary(out, input, float_neg),
            Op::FloatAbs => self.float_unary(out, input, float_abs),
            Op::FloatSqrt => self.float_unary(out, input, float_sqrt),
            Op::FloatCeil => self.float_unary(out, input, float_ceil),
            Op::FloatFloor => self.float_unary(out, input, float_floor),
            Op::FloatRound => self.float_unary(out, input, float_round),
            Op::FloatNan => {
                let value = self.read_varnode(input, types::F32)?;
                let zero = self.builder.ins().f32const(0.0);
                let result = self.builder.ins().fcmp(FloatCC::Unordered, value, zero);
                self.write_output(out, result)
            }
            Op::FloatInt2Float => {
                let value = self.read_int(input)?;
                let result = self.builder.ins().fcvt_from_sint(types::F32, value);
                self.write_output(out, result)
            }
            Op::FloatFloat2Float => {
                // 32-bit floats only; wider formats need per-size float
                // type selection.
                let value = self.read_varnode(input, types::F32)?;
                self.write_output(out, value)
            }
            Op::FloatTrunc => {
                let outvn = *out.ok_or(LiftError::Unsupported)?;
                let value = self.read_varnode(input, types::F32)?;
                let result = match outvn.size {
                    4 | 8 => self.builder.ins().fcvt_to_sint_sat(sized_int(outvn.size), value),
                    _ => self.builder.ins().fcvt_to_sint_sat(types::I32, value),
                };
                self.write_varnode(&outvn, result)
            }

            Op::Branch | Op::Call => {
                // Direct branches do not read the varnode: the offset is the
                // jump target.
                if input.is_const() {
                    tracing::warn!("direct branch into constant space is internal control flow");
                    return Err(LiftError::Unsupported);
                }
                let target = self.resolve_constant_offset(input, self.word_ty)?;
                self.redirect_control_flow(target);
                Ok(())
            }
            Op::BranchInd | Op::CallInd | Op::Return => {
                let target = self.read_int(input)?;
                self.redirect_control_flow(target);
                Ok(())
            }

            _ => Err(LiftError::Unsupported),
        }
    }

    fn lower_binary(
        &mut self,
        opc: Op,
        out: Option<&VarNode>,
        a: &VarNode,
        b: &VarNode,
    ) -> Result<(), LiftError> {
        match opc {
            Op::CBranch => self.lower_cbranch(a, b),
            Op::Load => self.lower_load(out, b),
            Op::Piece => self.lower_piece(out, a, b),
            Op::Subpiece => self.lower_subpiece(out, a, b),

            Op::IntAdd => self.int_binop(out, a, b, int_add),
            Op::IntSub => self.int_binop(out, a, b, int_sub),
            Op::IntMult => self.int_binop(out, a, b, int_mult),
            Op::IntDiv => self.int_binop(out, a, b, int_div),
            Op::IntSignedDiv => self.int_binop(out, a, b, int_signed_div),
            Op::IntRem => self.int_binop(out, a, b, int_rem),
            Op::IntSignedRem => self.int_binop(out, a, b, int_signed_rem),
            Op::IntAnd => self.int_binop(out, a, b, int_and),
            Op::IntOr => self.int_binop(out, a, b, int_or),
            Op::IntXor => self.int_binop(out, a, b, int_xor),

            Op::IntLeft => self.shift_binop(out, a, b, int_left),
            Op::IntRight => self.shift_binop(out, a, b, int_right),
            Op::IntSignedRight => self.shift_binop(out, a, b, int_signed_right),

            Op::IntEqual => self.int_binop(out, a, b, int_equal),
            Op::IntNotEqual => self.int_binop(out, a, b, int_not_equal),
            Op::IntLess => self.int_binop(out, a, b, int_less),
            Op::IntSignedLess => self.int_binop(out, a, b, int_signed_less),
            Op::IntLessEqual => self.int_binop(out, a, b, int_less_equal),
            Op::IntSignedLessEqual => self.int_binop(out, a, b, int_signed_less_equal),
            Op::IntCarry => self.int_binop(out, a, b, int_carry),
            Op::IntSignedCarry => self.int_binop(out, a, b, int_signed_carry),
            Op::IntSignedBorrow => self.int_binop(out, a, b, int_signed_borrow),

            Op::BoolAnd => self.bool_binop(out, a, b, bool_and),
            Op::BoolOr => self.bool_binop(out, a, b, bool_or),
            Op::BoolXor => self.bool_binop(out, a, b, bool_xor),

            Op::FloatAdd => self.float_binop(out, a, b, float_add),
            Op::FloatSub => self.float_binop(out, a, b, float_sub),
            Op::FloatMult => self.float_binop(out, a, b, float_mult),
            Op::FloatDiv => self.float_binop(out, a, b, float_div),
            Op::FloatEqual => self.float_binop(out, a, b, float_equal),
            Op::FloatNotEqual => self.float_binop(out, a, b, float_not_equal),
            Op::FloatLess => self.float_binop(out, a, b, float_less),
            Op::FloatLessEqual => self.float_binop(out, a, b, float_less_equal),

            _ => Err(LiftError::Unsupported),
        }
    }

    fn lower_ternary(
        &mut self,
        opc: Op,
        out: Option<&VarNode>,
        a: &VarNode,
        b: &VarNode,
        c: &VarNode,
    ) -> Result<(), LiftError> {
        match opc {
            // The first operand names the address space being stored to; the
            // memory intrinsics only model the default space.
            Op::Store => self.lower_store(b, c),
            Op::PtrAdd => {
                let word_ty = self.word_ty;
                let base = self.read_varnode(a, word_ty)?;
                let index = self.read_int(b)?;
                let index = self.resize_int(index, word_ty);
                let elem_size = self.load_const(word_ty, c.offset);
                let offset = self.builder.ins().imul(index, elem_size);
                let result = self.builder.ins().iadd(base, offset);
                self.write_output(out, result)
            }
            Op::PtrSub => {
                let word_ty = self.word_ty;
                let base = self.read_varnode(a, word_ty)?;
                let offset = self.read_int(b)?;
                let offset = self.resize_int(offset, word_ty);
                let result = self.builder.ins().iadd(base, offset);
                self.write_output(out, result)
            }
            _ => Err(LiftError::Unsupported),
        }
    }

    fn lower_cbranch(&mut self, target: &VarNode, cond: &VarNode) -> Result<(), LiftError> {
        let cond_value = self.read_int(cond)?;

        if target.is_const() {
            tracing::warn!("conditional branch into constant space is internal control flow");
            return Err(LiftError::Unsupported);
        }
        let word_ty = self.word_ty;
        let jump_addr = self.resolve_constant_offset(target, sized_int(target.size))?;
        let jump_addr = self.resize_int(jump_addr, word_ty);

        // Only the low bit of the condition decides.
        let should_branch = self.builder.ins().band_imm(cond_value, 1);

        let pc = self
            .register_location("PC")
            .ok_or(LiftError::Invariant("host state has no PC register"))?;
        let current_pc = pc.read(self, word_ty)?;
        let next_pc = self.builder.ins().select(should_branch, jump_addr, current_pc);
        self.store_next_pc(next_pc);

        self.terminate_with_condition(should_branch);
        Ok(())
    }

    fn lower_load(&mut self, out: Option<&VarNode>, addr: &VarNode) -> Result<(), LiftError> {
        let outvn = *out.ok_or(LiftError::Unsupported)?;
        let index = self.read_varnode(addr, self.word_ty)?;
        let location = ValueLocation::MemoryCell { index };
        let value = location.read(self, sized_int(outvn.size))?;
        self.write_varnode(&outvn, value)
    }

    fn lower_store(&mut self, addr: &VarNode, value: &VarNode) -> Result<(), LiftError> {
        let index = self.read_varnode(addr, self.word_ty)?;
        let value = self.read_int(value)?;
        ValueLocation::MemoryCell { index }.write(self, value)
    }

    fn lower_piece(
        &mut self,
        out: Option<&VarNode>,
        hi: &VarNode,
        lo: &VarNode,
    ) -> Result<(), LiftError> {
        let outvn = *out.ok_or(LiftError::Unsupported)?;
        let out_ty = sized_int(outvn.size);

        let hi_value = self.read_int(hi)?;
        let lo_value = self.read_int(lo)?;

        // Widen the most significant operand, then shift it past the low
        // operand's bytes before concatenating.
        let ms = self.resize_int(hi_value, out_ty);
        let ms = self.builder.ins().ishl_imm(ms, i64::from(lo.size) * 8);
        let ls = self.resize_int(lo_value, out_ty);
        let result = self.builder.ins().bor(ms, ls);
        self.write_varnode(&outvn, result)
    }

    fn lower_subpiece(
        &mut self,
        out: Option<&VarNode>,
        src: &VarNode,
        byte_offset: &VarNode,
    ) -> Result<(), LiftError> {
        let outvn = *out.ok_or(LiftError::Unsupported)?;
        if !byte_offset.is_const() {
            return Err(LiftError::Invariant("SUBPIECE truncation operand not in constant space"));
        }
        if byte_offset.offset >= u64::from(src.size) {
            return Err(LiftError::Unsupported);
        }
        let new_size = src.size - byte_offset.offset as u8;

        let value = self.read_int(src)?;
        let value = self.resize_int(value, sized_int(new_size));
        let value = self.resize_int(value, sized_int(outvn.size));
        self.write_varnode(&outvn, value)
    }

    fn lower_multiequal(
        &mut self,
        out: Option<&VarNode>,
        inputs: &[VarNode],
    ) -> Result<(), LiftError> {
        let outvn = *out.ok_or(LiftError::Unsupported)?;
        let ty = sized_int(outvn.size);

        let mut merged = None;
        for input in inputs {
            let value = self.read_int(input)?;
            if merged.is_none() {
                merged = Some(self.resize_int(value, ty));
            }
        }
        let merged = merged.ok_or(LiftError::Unsupported)?;

        // The blocks each input was written in are not tracked across
        // p-code ops, so the merge only receives the fall-through value.
        tracing::warn!("MULTIEQUAL merge only sees the fall-through edge");
        let merge = self.builder.create_block();
        self.builder.append_block_param(merge, ty);
        self.builder.ins().jump(merge, &[merged]);
        self.builder.switch_to_block(merge);
        self.builder.seal_block(merge);

        let phi = self.builder.block_params(merge)[0];
        self.write_varnode(&outvn, phi)
    }

    fn lower_callother(&mut self, inputs: &[VarNode]) -> Result<(), LiftError> {
        let name = match self.user_op_name(inputs) {
            Some(name) => name.to_owned(),
            None => return Err(LiftError::Unsupported),
        };

        if name == CLAIM_EQ_USER_OP && inputs.len() == CLAIM_EQ_ARITY {
            tracing::debug!("applying equality claim");
            return self.apply_equality_claim(&inputs[1], &inputs[2]);
        }

        tracing::warn!("unsupported p-code intrinsic: {name}");
        Err(LiftError::Unsupported)
    }

    fn apply_equality_claim(
        &mut self,
        constant: &VarNode,
        value: &VarNode,
    ) -> Result<(), LiftError> {
        if !constant.is_const() {
            return Err(LiftError::Invariant("claim_eq constant operand not in constant space"));
        }
        let location = self.resolve_varnode(value)?;
        self.claims.record(constant.offset, location);
        Ok(())
    }

    fn int_binop(
        &mut self,
        out: Option<&VarNode>,
        a: &VarNode,
        b: &VarNode,
        emit: BinaryEmit,
    ) -> Result<(), LiftError> {
        let x = self.read_int(a)?;
        let y = self.read_int(b)?;
        let result = emit(&mut self.builder, x, y);
        self.write_output(out, result)
    }

    fn shift_binop(
        &mut self,
        out: Option<&VarNode>,
        a: &VarNode,
        b: &VarNode,
        emit: BinaryEmit,
    ) -> Result<(), LiftError> {
        let x = self.read_int(a)?;
        let shift = self.read_int(b)?;
        // The shift amount is brought to the left operand's width first.
        let ty = self.builder.func.dfg.value_type(x);
        let shift = self.resize_int(shift, ty);
        let result = emit(&mut self.builder, x, shift);
        self.write_output(out, result)
    }

    fn bool_binop(
        &mut self,
        out: Option<&VarNode>,
        a: &VarNode,
        b: &VarNode,
        emit: BinaryEmit,
    ) -> Result<(), LiftError> {
        let x = self.read_varnode(a, types::I8)?;
        let y = self.read_varnode(b, types::I8)?;
        let result = emit(&mut self.builder, x, y);
        self.write_output(out, result)
    }

    fn float_binop(
        &mut self,
        out: Option<&VarNode>,
        a: &VarNode,
        b: &VarNode,
        emit: BinaryEmit,
    ) -> Result<(), LiftError> {
        let x = self.read_varnode(a, types::F32)?;
        let y = self.read_varnode(b, types::F32)?;
        let result = emit(&mut self.builder, x, y);
        self.write_output(out, result)
    }

    fn float_unary(
        &mut self,
        out: Option<&VarNode>,
        input: &VarNode,
        emit: UnaryEmit,
    ) -> Result<(), LiftError> {
        let value = self.read_varnode(input, types::F32)?;
        let result = emit(&mut self.builder, value);
        self.write_output(out, result)
    }
}

fn int_add(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().iadd(a, b)
}

fn int_sub(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().isub(a, b)
}

fn int_mult(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().imul(a, b)
}

fn int_div(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().udiv(a, b)
}

fn int_signed_div(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().sdiv(a, b)
}

fn int_rem(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().urem(a, b)
}

fn int_signed_rem(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().srem(a, b)
}

fn int_and(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().band(a, b)
}

fn int_or(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().bor(a, b)
}

fn int_xor(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().bxor(a, b)
}

fn int_left(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().ishl(a, b)
}

fn int_right(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().ushr(a, b)
}

fn int_signed_right(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().sshr(a, b)
}

fn int_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().icmp(IntCC::Equal, a, b)
}

fn int_not_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().icmp(IntCC::NotEqual, a, b)
}

fn int_less(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().icmp(IntCC::UnsignedLessThan, a, b)
}

fn int_signed_less(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().icmp(IntCC::SignedLessThan, a, b)
}

fn int_less_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().icmp(IntCC::UnsignedLessThanOrEqual, a, b)
}

fn int_signed_less_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().icmp(IntCC::SignedLessThanOrEqual, a, b)
}

/// The carry bit of an unsigned addition.
fn int_carry(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    let sum = builder.ins().iadd(a, b);
    builder.ins().icmp(IntCC::UnsignedLessThan, sum, b)
}

/// The overflow bit of a signed addition.
fn int_signed_carry(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    let result = builder.ins().iadd(a, b);
    let result_lt_a = builder.ins().icmp(IntCC::SignedLessThan, result, a);
    let b_is_neg = builder.ins().icmp_imm(IntCC::SignedLessThan, b, 0);
    builder.ins().bxor(result_lt_a, b_is_neg)
}

/// The overflow bit of a signed subtraction.
fn int_signed_borrow(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    let result = builder.ins().isub(a, b);
    let result_gt_a = builder.ins().icmp(IntCC::SignedGreaterThan, result, a);
    let b_is_neg = builder.ins().icmp_imm(IntCC::SignedLessThan, b, 0);
    builder.ins().bxor(result_gt_a, b_is_neg)
}

fn bool_and(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().band(a, b)
}

fn bool_or(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().bor(a, b)
}

fn bool_xor(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().bxor(a, b)
}

fn float_add(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fadd(a, b)
}

fn float_sub(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fsub(a, b)
}

fn float_mult(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fmul(a, b)
}

fn float_div(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fdiv(a, b)
}

fn float_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fcmp(FloatCC::Equal, a, b)
}

fn float_not_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fcmp(FloatCC::NotEqual, a, b)
}

fn float_less(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fcmp(FloatCC::LessThan, a, b)
}

fn float_less_equal(builder: &mut FunctionBuilder, a: Value, b: Value) -> Value {
    builder.ins().fcmp(FloatCC::LessThanOrEqual, a, b)
}

fn float_neg(builder: &mut FunctionBuilder, a: Value) -> Value {
    builder.ins().fneg(a)
}

fn float_abs(builder: &mut FunctionBuilder, a: Value) -> Value {
    builder.ins().fabs(a)
}

fn float_sqrt(builder: &mut FunctionBuilder, a: Value) -> Value {
    builder.ins().sqrt(a)
}

fn float_ceil(builder: &mut FunctionBuilder, a: Value) -> Value {
    builder.ins().ceil(a)
}

fn float_floor(builder: &mut FunctionBuilder, a: Value) -> Value {
    builder.ins().floor(a)
}

fn float_round(builder: &mut FunctionBuilder, a: Value) -> Value {
    builder.ins().nearest(a)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use cranelift::codegen;
    use cranelift::prelude::*;
    use cranelift_jit::{JITBuilder, JITModule};
    use cranelift_module::{Linkage, Module};

    use pcode::{Op, PcodeOp, Space, VarNode};

    use crate::arch::LifterArch;
    use crate::decoder::{DecodeError, InstructionDecoder};
    use crate::intrinsics::MemIntrinsics;
    use crate::translate::{instruction_signature, PcodeEmitter};
    use crate::LiftStatus;

    struct NullDecoder;

    impl InstructionDecoder for NullDecoder {
        fn reset(&mut self) {}

        fn decode(&mut self, pc: u64, _bytes: &[u8]) -> Result<Vec<PcodeOp>, DecodeError> {
            Err(DecodeError { pc })
        }

        fn register_name(&self, _varnode: &VarNode) -> Option<String> {
            None
        }

        fn user_op_names(&self) -> &[String] {
            &[]
        }
    }

    struct ScratchArch {
        remappings: HashMap<String, String>,
    }

    impl LifterArch for ScratchArch {
        fn word_type(&self) -> Type {
            types::I64
        }

        fn has_register(&self, _name: &str) -> bool {
            false
        }

        fn load_register_address(
            &self,
            _builder: &mut FunctionBuilder,
            _state_ptr: Value,
            _name: &str,
        ) -> Option<(Value, Type)> {
            None
        }

        fn state_register_remappings(&self) -> &HashMap<String, String> {
            &self.remappings
        }
    }

    /// Lowers `ops` through a bare emitter and returns the sticky status
    /// plus the emitted IR. Defining the function runs the Cranelift
    /// verifier over it.
    fn emit(ops: &[PcodeOp]) -> (LiftStatus, String) {
        let builder = JITBuilder::new(cranelift_module::default_libcall_names())
            .expect("failed to create JIT builder");
        let mut module = JITModule::new(builder);
        let ids = MemIntrinsics::declare(&mut module).expect("failed to declare mem intrinsics");

        let decoder = NullDecoder;
        let arch = ScratchArch { remappings: HashMap::new() };

        let mut ctx = codegen::Context::new();
        ctx.func.signature = instruction_signature(module.isa().default_call_conv(), &arch);
        let mem = MemIntrinsics::import(&mut module, &mut ctx.func, &ids);

        let mut builder_ctx = FunctionBuilderContext::new();
        let fb = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let mut emitter = PcodeEmitter::new(fb, &decoder, &arch, mem);
        for op in ops {
            emitter.lower(op);
        }
        let status = emitter.finalize();
        let clif = ctx.func.display().to_string();

        let sig = ctx.func.signature.clone();
        let id = module
            .declare_function("lowering", Linkage::Local, &sig)
            .expect("failed to declare function");
        module.define_function(id, &mut ctx).expect("emitted IR failed to verify");

        (status, clif)
    }

    fn uniq(offset: u64, size: u8) -> VarNode {
        VarNode::new(Space::Unique, offset, size)
    }

    fn check_unary(op: Op, out_size: u8, needle: &str) {
        let (status, clif) = emit(&[PcodeOp::from((uniq(0x10, out_size), op, [uniq(0x20, 4)]))]);
        assert_eq!(status, LiftStatus::Lifted, "{op:?}");
        assert!(clif.contains(needle), "{op:?} should emit `{needle}`:\n{clif}");
    }

    fn check_binary(op: Op, out_size: u8, needle: &str) {
        let (status, clif) =
            emit(&[PcodeOp::from((uniq(0x10, out_size), op, [uniq(0x20, 4), uniq(0x30, 4)]))]);
        assert_eq!(status, LiftStatus::Lifted, "{op:?}");
        assert!(clif.contains(needle), "{op:?} should emit `{needle}`:\n{clif}");
    }

    #[test]
    fn float_unary_lowerings() {
        check_unary(Op::FloatNeg, 4, "fneg");
        check_unary(Op::FloatAbs, 4, "fabs");
        check_unary(Op::FloatSqrt, 4, "sqrt");
        check_unary(Op::FloatCeil, 4, "ceil");
        check_unary(Op::FloatFloor, 4, "floor");
        check_unary(Op::FloatRound, 4, "nearest");
    }

    #[test]
    fn float_arith_lowerings() {
        check_binary(Op::FloatAdd, 4, "fadd");
        check_binary(Op::FloatSub, 4, "fsub");
        check_binary(Op::FloatMult, 4, "fmul");
        check_binary(Op::FloatDiv, 4, "fdiv");
    }

    #[test]
    fn float_compares_produce_bytes() {
        check_binary(Op::FloatEqual, 1, "fcmp eq");
        check_binary(Op::FloatNotEqual, 1, "fcmp ne");
        check_binary(Op::FloatLess, 1, "fcmp lt");
        check_binary(Op::FloatLessEqual, 1, "fcmp le");
    }

    #[test]
    fn float_nan_uses_unordered_compare() {
        check_unary(Op::FloatNan, 1, "fcmp uno");
    }

    #[test]
    fn float_conversions() {
        check_unary(Op::FloatInt2Float, 4, "fcvt_from_sint");
        check_unary(Op::FloatTrunc, 4, "fcvt_to_sint_sat");
        // Narrow outputs convert through i32 and resize on the store.
        check_unary(Op::FloatTrunc, 2, "fcvt_to_sint_sat");
    }

    #[test]
    fn float_to_float_is_pass_through() {
        check_unary(Op::FloatFloat2Float, 4, "stack_load.f32");
    }
}
