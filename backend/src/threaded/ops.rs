//! Per-instruction lowering into closures.

use dbt_core::{CpuState, Fault, GuestAddress, GuestMemory, Insn, MemWidth, Op};

/// Lowered straight-line instruction.
pub(crate) type OpFn = Box<dyn Fn(&mut CpuState, &dyn GuestMemory) -> Result<(), Fault> + Send + Sync>;

fn ea(cpu: &CpuState, rs1: u8, offset: i64) -> u64 {
    cpu.gpr(rs1).wrapping_add(offset as u64)
}

fn load(mem: &dyn GuestMemory, addr: u64, width: MemWidth, signed: bool) -> Result<u64, Fault> {
    Ok(match (width, signed) {
        (MemWidth::B, true) => mem.read_u8(addr)? as i8 as i64 as u64,
        (MemWidth::B, false) => mem.read_u8(addr)? as u64,
        (MemWidth::H, true) => mem.read_u16(addr)? as i16 as i64 as u64,
        (MemWidth::H, false) => mem.read_u16(addr)? as u64,
        (MemWidth::W, true) => mem.read_u32(addr)? as i32 as i64 as u64,
        (MemWidth::W, false) => mem.read_u32(addr)? as u64,
        (MemWidth::D, _) => mem.read_u64(addr)?,
    })
}

fn store(mem: &dyn GuestMemory, addr: u64, width: MemWidth, val: u64) -> Result<(), Fault> {
    match width {
        MemWidth::B => mem.write_u8(addr, val as u8),
        MemWidth::H => mem.write_u16(addr, val as u16),
        MemWidth::W => mem.write_u32(addr, val as u32),
        MemWidth::D => mem.write_u64(addr, val),
    }
}

/// Lower a non-control-flow instruction.
///
/// Returns `None` for jumps and branches; those are lowered as block
/// exits instead.
pub(crate) fn lower(insn: &Insn) -> Option<OpFn> {
    let pc = insn.addr;
    let f: OpFn = match insn.op {
        Op::Lui { rd, imm } => Box::new(move |cpu, _| {
            cpu.set_gpr(rd, imm as u64);
            Ok(())
        }),
        Op::Auipc { rd, imm } => {
            let val = pc.offset(imm).value();
            Box::new(move |cpu, _| {
                cpu.set_gpr(rd, val);
                Ok(())
            })
        }
        Op::Load {
            width,
            signed,
            rd,
            rs1,
            offset,
        } => Box::new(move |cpu, mem| {
            let val = load(mem, ea(cpu, rs1, offset), width, signed)?;
            cpu.set_gpr(rd, val);
            Ok(())
        }),
        Op::Store {
            width,
            rs1,
            rs2,
            offset,
        } => Box::new(move |cpu, mem| store(mem, ea(cpu, rs1, offset), width, cpu.gpr(rs2))),
        Op::AluImm { op, rd, rs1, imm } => Box::new(move |cpu, _| {
            let val = op.eval(cpu.gpr(rs1), imm as u64);
            cpu.set_gpr(rd, val);
            Ok(())
        }),
        Op::Alu { op, rd, rs1, rs2 } => Box::new(move |cpu, _| {
            let val = op.eval(cpu.gpr(rs1), cpu.gpr(rs2));
            cpu.set_gpr(rd, val);
            Ok(())
        }),
        Op::Jal { .. } | Op::Jalr { .. } | Op::Branch { .. } => return None,
    };
    Some(f)
}

/// Target of `jalr`: `(rs1 + offset) & !1`.
pub(crate) fn jalr_target(cpu: &CpuState, rs1: u8, offset: i64) -> GuestAddress {
    GuestAddress(ea(cpu, rs1, offset) & !1)
}
