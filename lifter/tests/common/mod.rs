//! Shared fixtures: a host state layout, a scripted decoder, a flat memory
//! runtime, and a JIT harness that compiles and runs lifted instructions.

use std::collections::HashMap;

use cranelift::codegen::settings::{self, Configurable};
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::FuncId;
use memoffset::offset_of;

use pcode::{PcodeOp, Space, VarNode};
use sleigh_lift::arch::LifterArch;
use sleigh_lift::decoder::{DecodeError, InstructionDecoder};
use sleigh_lift::intrinsics::MemIntrinsics;
use sleigh_lift::{BranchTakenVar, Instruction, LiftStatus, SleighLifter, CLAIM_EQ_USER_OP};

/// Register-space offsets understood by the fixture decoder.
pub const REG_BASE: u64 = 0x1000;
pub const PC_OFFSET: u64 = 0x2000;
pub const IP_OFFSET: u64 = 0x2008;

pub const DEFAULT_PC: u64 = 0x800;

/// Initial value of the next-PC cell, so tests can observe "unchanged".
pub const NEXT_PC_SENTINEL: u64 = 0xfeed_face_dead_beef;

#[derive(Default)]
#[repr(C)]
pub struct TestState {
    pub regs: [u64; 8],
    pub pc: u64,
}

/// General purpose register `i` as a varnode of `size` bytes.
pub fn reg(i: u64, size: u8) -> VarNode {
    VarNode::new(Space::Register, REG_BASE + i * 8, size)
}

pub fn pc_reg() -> VarNode {
    VarNode::new(Space::Register, PC_OFFSET, 8)
}

pub fn ip_reg() -> VarNode {
    VarNode::new(Space::Register, IP_OFFSET, 8)
}

pub fn konst(value: u64, size: u8) -> VarNode {
    VarNode::new(Space::Const, value, size)
}

pub fn uniq(offset: u64, size: u8) -> VarNode {
    VarNode::new(Space::Unique, offset, size)
}

pub fn ram(addr: u64, size: u8) -> VarNode {
    VarNode::new(Space::Ram, addr, size)
}

pub struct TestArch {
    remappings: HashMap<String, String>,
}

impl Default for TestArch {
    fn default() -> Self {
        let remappings = [("IP".to_string(), "PC".to_string())].into_iter().collect();
        Self { remappings }
    }
}

fn register_offset(name: &str) -> Option<i64> {
    if name == "PC" {
        return Some(offset_of!(TestState, pc) as i64);
    }
    let index: usize = name.strip_prefix('R')?.parse().ok()?;
    (index < 8).then(|| (offset_of!(TestState, regs) + index * 8) as i64)
}

impl LifterArch for TestArch {
    fn word_type(&self) -> Type {
        types::I64
    }

    fn has_register(&self, name: &str) -> bool {
        register_offset(name).is_some()
    }

    fn load_register_address(
        &self,
        builder: &mut FunctionBuilder,
        state_ptr: Value,
        name: &str,
    ) -> Option<(Value, Type)> {
        let offset = register_offset(name)?;
        Some((builder.ins().iadd_imm(state_ptr, offset), types::I64))
    }

    fn state_register_remappings(&self) -> &HashMap<String, String> {
        &self.remappings
    }
}

/// Replays scripted p-code sequences keyed by instruction address.
pub struct FixtureDecoder {
    pub programs: HashMap<u64, Vec<PcodeOp>>,
    pub user_ops: Vec<String>,
    pub resets: usize,
}

impl Default for FixtureDecoder {
    fn default() -> Self {
        Self {
            programs: HashMap::new(),
            user_ops: vec![CLAIM_EQ_USER_OP.to_string()],
            resets: 0,
        }
    }
}

impl InstructionDecoder for FixtureDecoder {
    fn reset(&mut self) {
        self.resets += 1;
    }

    fn decode(&mut self, pc: u64, _bytes: &[u8]) -> Result<Vec<PcodeOp>, DecodeError> {
        self.programs.get(&pc).cloned().ok_or(DecodeError { pc })
    }

    fn register_name(&self, vn: &VarNode) -> Option<String> {
        if vn.space != Space::Register {
            return None;
        }
        match vn.offset {
            PC_OFFSET => Some("pc".into()),
            IP_OFFSET => Some("ip".into()),
            offset if (REG_BASE..REG_BASE + 64).contains(&offset) => {
                Some(format!("r{}", (offset - REG_BASE) / 8))
            }
            _ => None,
        }
    }

    fn user_op_names(&self) -> &[String] {
        &self.user_ops
    }
}

/// Flat little-endian memory backing the memory intrinsics. The memory
/// pointer argument is the base address of the buffer; stores return it
/// unchanged.
pub mod runtime {
    unsafe fn load_bytes<const N: usize>(memory: u64, addr: u64) -> [u8; N] {
        let mut buf = [0; N];
        std::ptr::copy_nonoverlapping((memory as *const u8).add(addr as usize), buf.as_mut_ptr(), N);
        buf
    }

    unsafe fn store_bytes<const N: usize>(memory: u64, addr: u64, value: [u8; N]) {
        std::ptr::copy_nonoverlapping(value.as_ptr(), (memory as *mut u8).add(addr as usize), N);
    }

    pub extern "C" fn read_memory_8(memory: u64, addr: u64) -> u8 {
        unsafe { load_bytes::<1>(memory, addr)[0] }
    }

    macro_rules! read_fn {
        ($name:ident, $ty:ty) => {
            pub extern "C" fn $name(memory: u64, addr: u64) -> $ty {
                <$ty>::from_le_bytes(unsafe { load_bytes(memory, addr) })
            }
        };
    }

    read_fn!(read_memory_16, u16);
    read_fn!(read_memory_32, u32);
    read_fn!(read_memory_64, u64);

    pub extern "C" fn read_memory_128(memory: u64, addr: u64, out: u64) {
        let value = u128::from_le_bytes(unsafe { load_bytes(memory, addr) });
        unsafe { (out as *mut u128).write_unaligned(value) }
    }

    pub extern "C" fn write_memory_8(memory: u64, addr: u64, value: u8) -> u64 {
        unsafe { store_bytes(memory, addr, [value]) };
        memory
    }

    macro_rules! write_fn {
        ($name:ident, $ty:ty) => {
            pub extern "C" fn $name(memory: u64, addr: u64, value: $ty) -> u64 {
                unsafe { store_bytes(memory, addr, value.to_le_bytes()) };
                memory
            }
        };
    }

    write_fn!(write_memory_16, u16);
    write_fn!(write_memory_32, u32);
    write_fn!(write_memory_64, u64);

    pub extern "C" fn write_memory_128(memory: u64, addr: u64, low: u64, high: u64) -> u64 {
        let value = ((high as u128) << 64) | low as u128;
        unsafe { store_bytes(memory, addr, value.to_le_bytes()) };
        memory
    }
}

/// The emitted instruction function signature, as called from Rust.
pub type InstructionFn = unsafe extern "C" fn(*mut TestState, u64, *mut u8, *mut u64) -> u64;

pub struct Harness {
    pub module: JITModule,
    pub lifter: SleighLifter<FixtureDecoder, TestArch>,
}

impl Harness {
    pub fn new(decoder: FixtureDecoder) -> Self {
        let mut flag_builder = settings::builder();
        flag_builder.set("is_pic", "false").unwrap();
        flag_builder.set("enable_llvm_abi_extensions", "true").unwrap();
        flag_builder.set("preserve_frame_pointers", "true").unwrap();
        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .expect("host machine is not supported")
            .finish(flags)
            .expect("failed to create isa");

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        builder.symbol("__remill_read_memory_8", runtime::read_memory_8 as *const u8);
        builder.symbol("__remill_read_memory_16", runtime::read_memory_16 as *const u8);
        builder.symbol("__remill_read_memory_32", runtime::read_memory_32 as *const u8);
        builder.symbol("__remill_read_memory_64", runtime::read_memory_64 as *const u8);
        builder.symbol("__remill_read_memory_128", runtime::read_memory_128 as *const u8);
        builder.symbol("__remill_write_memory_8", runtime::write_memory_8 as *const u8);
        builder.symbol("__remill_write_memory_16", runtime::write_memory_16 as *const u8);
        builder.symbol("__remill_write_memory_32", runtime::write_memory_32 as *const u8);
        builder.symbol("__remill_write_memory_64", runtime::write_memory_64 as *const u8);
        builder.symbol("__remill_write_memory_128", runtime::write_memory_128 as *const u8);

        let mut module = JITModule::new(builder);
        let mem = MemIntrinsics::declare(&mut module).expect("failed to declare memory intrinsics");
        let lifter = SleighLifter::new(decoder, TestArch::default(), mem);

        Self { module, lifter }
    }

    pub fn lift_raw(
        &mut self,
        pc: u64,
        btaken: Option<&BranchTakenVar>,
    ) -> (LiftStatus, Option<FuncId>) {
        let inst = Instruction::new(pc, [0u8; 4]);
        self.lifter.lift(&mut self.module, &inst, btaken).expect("lift failed")
    }

    pub fn lift(&mut self, pc: u64) -> (LiftStatus, Option<InstructionFn>) {
        let (status, func) = self.lift_raw(pc, None);
        (status, func.map(|id| self.finalize(id)))
    }

    pub fn lift_with_btaken(
        &mut self,
        pc: u64,
        btaken: BranchTakenVar,
    ) -> (LiftStatus, Option<InstructionFn>) {
        let (status, func) = self.lift_raw(pc, Some(&btaken));
        (status, func.map(|id| self.finalize(id)))
    }

    pub fn finalize(&mut self, id: FuncId) -> InstructionFn {
        self.module.finalize_definitions().expect("failed to finalize module");
        let ptr = self.module.get_finalized_function(id);
        unsafe { std::mem::transmute(ptr) }
    }
}

/// Lifts a single-instruction program at `DEFAULT_PC`, asserting success.
pub fn lift_program(ops: Vec<PcodeOp>) -> (Harness, InstructionFn) {
    let (harness, status, func) = lift_program_status(ops);
    assert_eq!(status, LiftStatus::Lifted);
    (harness, func.expect("no function emitted"))
}

/// Lifts a single-instruction program at `DEFAULT_PC` without asserting on
/// the resulting status.
pub fn lift_program_status(ops: Vec<PcodeOp>) -> (Harness, LiftStatus, Option<InstructionFn>) {
    let mut decoder = FixtureDecoder::default();
    decoder.programs.insert(DEFAULT_PC, ops);
    let mut harness = Harness::new(decoder);
    let (status, func) = harness.lift(DEFAULT_PC);
    (harness, status, func)
}

pub struct RunResult {
    pub btaken: u8,
    pub next_pc: u64,
    pub returned_memory: u64,
}

/// Runs an emitted instruction function over `state` and `memory`.
pub fn run(func: InstructionFn, state: &mut TestState, memory: &mut [u8]) -> RunResult {
    let mut btaken: u8 = 0;
    let mut next_pc: u64 = NEXT_PC_SENTINEL;
    let memory_ptr = memory.as_mut_ptr() as u64;
    let returned =
        unsafe { func(state, memory_ptr, &mut btaken, &mut next_pc) };
    RunResult { btaken, next_pc, returned_memory: returned }
}
