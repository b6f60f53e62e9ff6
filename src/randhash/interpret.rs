//! RandHash program execution against a CryptoCycle state.
//!
//! Word-width ops are SIMD-within-a-register: an `8`-suffixed op acts on
//! four independent byte lanes of the 32-bit word, a `16`-suffixed op on two
//! halfword lanes. Widening `*C` forms return the double-width lane results
//! packed into two (or four) output words. Suffix rules: `MULSU*` is
//! signed×unsigned, `MULU*` unsigned×unsigned, everything else signed.

use crate::crypto::cryptocycle::{State, STATE_WORDS};
use crate::error::ExecError;
use crate::params::ConsensusParams;
use crate::randhash::opcodes::{
    insn_has_imm, insn_imm, insn_imm24, insn_op, insn_rega, insn_regb, OpClass, OpCode,
};
use crate::randhash::randgen::{Program, MAX_VARS};

/// Words of state visible to `IN` during one cycle.
const WINDOW_WORDS: usize = 8;

/// Run `program` against `state` for `cycles` cycles, drawing `MEMORY` loads
/// from `memory` (the program's own scratch, or a window of it).
pub fn interpret(
    program: &Program,
    state: &mut State,
    memory: &[u32],
    cycles: u32,
    params: &ConsensusParams,
) -> Result<(), ExecError> {
    let mut out_ctr = 0usize;
    for cycle in 0..cycles {
        let mut machine = Machine {
            prog: program.insns(),
            memory,
            state: &mut *state,
            vars: Vec::with_capacity(64),
            scopes: Vec::with_capacity(16),
            op_ctr: 0,
            out_ctr,
            window_base: (cycle as usize * WINDOW_WORDS) % STATE_WORDS,
            max_ops: params.interp_max_ops,
        };
        machine.scopes.push(0);
        machine.run_body(0)?;
        if machine.op_ctr < params.interp_min_ops {
            return Err(ExecError::TooShort);
        }
        out_ctr = machine.out_ctr;
    }
    Ok(())
}

struct Machine<'a> {
    prog: &'a [u32],
    memory: &'a [u32],
    state: &'a mut State,
    vars: Vec<u32>,
    scopes: Vec<usize>,
    op_ctr: u32,
    out_ctr: usize,
    window_base: usize,
    max_ops: u32,
}

impl Machine<'_> {
    fn get_a(&self, insn: u32) -> Result<u32, ExecError> {
        self.vars.get(insn_rega(insn)).copied().ok_or(ExecError::TooSmall)
    }

    fn get_a2(&self, insn: u32) -> Result<u64, ExecError> {
        let i = insn_rega(insn);
        let lo = *self.vars.get(i).ok_or(ExecError::TooSmall)? as u64;
        let hi = *self.vars.get(i + 1).ok_or(ExecError::TooSmall)? as u64;
        Ok(lo | (hi << 32))
    }

    fn get_b(&self, insn: u32) -> Result<u32, ExecError> {
        if insn_has_imm(insn) {
            Ok(insn_imm(insn))
        } else {
            self.vars.get(insn_regb(insn)).copied().ok_or(ExecError::TooSmall)
        }
    }

    fn get_b2(&self, insn: u32) -> Result<u64, ExecError> {
        if insn_has_imm(insn) {
            Ok(insn_imm(insn) as i32 as i64 as u64)
        } else {
            let i = insn_regb(insn);
            let lo = *self.vars.get(i).ok_or(ExecError::TooSmall)? as u64;
            let hi = *self.vars.get(i + 1).ok_or(ExecError::TooSmall)? as u64;
            Ok(lo | (hi << 32))
        }
    }

    fn out1(&mut self, v: u32) -> Result<(), ExecError> {
        if self.vars.len() >= MAX_VARS {
            return Err(ExecError::TooBig);
        }
        self.vars.push(v);
        Ok(())
    }

    fn out2(&mut self, v: u64) -> Result<(), ExecError> {
        self.out1(v as u32)?;
        self.out1((v >> 32) as u32)
    }

    fn out4(&mut self, v: u128) -> Result<(), ExecError> {
        self.out2(v as u64)?;
        self.out2((v >> 64) as u64)
    }

    /// Pop the scope, folding every discarded variable back into the state.
    fn end_scope(&mut self) -> Result<(), ExecError> {
        let mark = self.scopes.pop().ok_or(ExecError::TooSmall)?;
        while self.vars.len() > mark {
            let v = self.vars.pop().ok_or(ExecError::TooSmall)?;
            self.state.add_word(self.out_ctr % STATE_WORDS, v);
            self.out_ctr += 1;
        }
        Ok(())
    }

    /// Execute instructions from `pc` until the scope's `END`, whose program
    /// counter is returned.
    fn run_body(&mut self, mut pc: usize) -> Result<usize, ExecError> {
        loop {
            let insn = *self.prog.get(pc).ok_or(ExecError::OutOfProgram)?;
            self.op_ctr += 1;
            if self.op_ctr > self.max_ops {
                return Err(ExecError::TooLong);
            }
            let code = OpCode::from_u8(insn_op(insn)).ok_or(ExecError::OutOfProgram)?;
            match code {
                OpCode::End => {
                    self.end_scope()?;
                    return Ok(pc);
                }
                OpCode::Loop => {
                    let count = insn >> 20;
                    if count == 0 {
                        return Err(ExecError::OutOfProgram);
                    }
                    let mut end_pc = pc;
                    for _ in 0..count {
                        self.scopes.push(self.vars.len());
                        end_pc = self.run_body(pc + 1)?;
                    }
                    pc = end_pc;
                }
                OpCode::IfLikely | OpCode::IfRandom => {
                    let cond = self.get_a(insn)?;
                    let taken = if code == OpCode::IfLikely {
                        cond & 7 != 0
                    } else {
                        cond & 1 != 0
                    };
                    let skip = ((insn >> 20) & 0xfff) as usize;
                    if skip == 0 {
                        return Err(ExecError::OutOfProgram);
                    }
                    self.scopes.push(self.vars.len());
                    pc = if taken {
                        // Falls into the first body; the JMP after its END
                        // carries us past the alternative.
                        self.run_body(pc + 1)?
                    } else {
                        self.run_body(pc + skip)?
                    };
                }
                OpCode::Jmp => {
                    let off = insn_imm24(insn) as usize;
                    if off == 0 {
                        return Err(ExecError::OutOfProgram);
                    }
                    pc += off;
                    continue;
                }
                OpCode::In => {
                    let imm = insn_imm24(insn) as usize;
                    let v = self.state.word(self.window_base + (imm % WINDOW_WORDS));
                    self.out1(v)?;
                }
                OpCode::Memory => {
                    let imm = insn_imm24(insn) as usize;
                    let slots = self.memory.len() / 2;
                    let s = (imm % slots) * 2;
                    self.out1(self.memory[s])?;
                    self.out1(self.memory[s + 1])?;
                }
                OpCode::Invalid => return Err(ExecError::OutOfProgram),
                _ => self.do_op(code, insn)?,
            }
            pc += 1;
        }
    }

    fn do_op(&mut self, code: OpCode, insn: u32) -> Result<(), ExecError> {
        match code.class() {
            OpClass::Op11 => {
                let a = self.get_a(insn)?;
                self.out1(op_1_1(code, a))
            }
            OpClass::Op21 => {
                let a = self.get_a(insn)?;
                let b = self.get_b(insn)?;
                self.out1(op_2_1(code, a, b))
            }
            OpClass::Op22 => {
                let a = self.get_a(insn)?;
                let b = self.get_b(insn)?;
                self.out2(op_2_2(code, a, b))
            }
            OpClass::Op42 => {
                let a = self.get_a2(insn)?;
                let b = self.get_b2(insn)?;
                self.out2(op_4_2(code, a, b))
            }
            OpClass::Op44 => {
                let a = self.get_a2(insn)?;
                let b = self.get_b2(insn)?;
                self.out4(op_4_4(code, a, b))
            }
            OpClass::Control => Err(ExecError::OutOfProgram),
        }
    }
}

fn map8(x: u32, f: impl Fn(u8) -> u8) -> u32 {
    u32::from_le_bytes(x.to_le_bytes().map(f))
}

fn zip8(a: u32, b: u32, f: impl Fn(u8, u8) -> u8) -> u32 {
    let (aa, bb) = (a.to_le_bytes(), b.to_le_bytes());
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = f(aa[i], bb[i]);
    }
    u32::from_le_bytes(out)
}

fn lanes16(x: u32) -> [u16; 2] {
    [(x & 0xffff) as u16, (x >> 16) as u16]
}

fn from16(l: [u16; 2]) -> u32 {
    (l[0] as u32) | ((l[1] as u32) << 16)
}

fn map16(x: u32, f: impl Fn(u16) -> u16) -> u32 {
    let l = lanes16(x);
    from16([f(l[0]), f(l[1])])
}

fn zip16(a: u32, b: u32, f: impl Fn(u16, u16) -> u16) -> u32 {
    let (aa, bb) = (lanes16(a), lanes16(b));
    from16([f(aa[0], bb[0]), f(aa[1], bb[1])])
}

/// Four byte lanes widened to 16-bit results, packed ascending.
fn wide8(a: u32, b: u32, f: impl Fn(u8, u8) -> u16) -> u64 {
    let (aa, bb) = (a.to_le_bytes(), b.to_le_bytes());
    let mut out = 0u64;
    for i in 0..4 {
        out |= (f(aa[i], bb[i]) as u64) << (16 * i);
    }
    out
}

/// Two halfword lanes widened to 32-bit results, packed ascending.
fn wide16(a: u32, b: u32, f: impl Fn(u16, u16) -> u32) -> u64 {
    let (aa, bb) = (lanes16(a), lanes16(b));
    (f(aa[0], bb[0]) as u64) | ((f(aa[1], bb[1]) as u64) << 32)
}

fn op_1_1(code: OpCode, a: u32) -> u32 {
    match code {
        OpCode::Popcnt8 => map8(a, |v| v.count_ones() as u8),
        OpCode::Popcnt16 => map16(a, |v| v.count_ones() as u16),
        OpCode::Popcnt32 => a.count_ones(),
        OpCode::Clz8 => map8(a, |v| v.leading_zeros() as u8),
        OpCode::Clz16 => map16(a, |v| v.leading_zeros() as u16),
        OpCode::Clz32 => a.leading_zeros(),
        OpCode::Ctz8 => map8(a, |v| v.trailing_zeros() as u8),
        OpCode::Ctz16 => map16(a, |v| v.trailing_zeros() as u16),
        OpCode::Ctz32 => a.trailing_zeros(),
        OpCode::Bswap16 => map16(a, u16::swap_bytes),
        OpCode::Bswap32 => a.swap_bytes(),
        _ => unreachable!("non-1x1 opcode dispatched as 1x1"),
    }
}

fn op_2_1(code: OpCode, a: u32, b: u32) -> u32 {
    match code {
        OpCode::Add8 => zip8(a, b, u8::wrapping_add),
        OpCode::Add16 => zip16(a, b, u16::wrapping_add),
        OpCode::Add32 => a.wrapping_add(b),
        OpCode::Sub8 => zip8(a, b, u8::wrapping_sub),
        OpCode::Sub16 => zip16(a, b, u16::wrapping_sub),
        OpCode::Sub32 => a.wrapping_sub(b),
        OpCode::Shll8 => zip8(a, b, |x, s| x << (s & 7)),
        OpCode::Shll16 => zip16(a, b, |x, s| x << (s & 15)),
        OpCode::Shll32 => a << (b & 31),
        OpCode::Shrl8 => zip8(a, b, |x, s| x >> (s & 7)),
        OpCode::Shrl16 => zip16(a, b, |x, s| x >> (s & 15)),
        OpCode::Shrl32 => a >> (b & 31),
        OpCode::Shra8 => zip8(a, b, |x, s| ((x as i8) >> (s & 7)) as u8),
        OpCode::Shra16 => zip16(a, b, |x, s| ((x as i16) >> (s & 15)) as u16),
        OpCode::Shra32 => ((a as i32) >> (b & 31)) as u32,
        OpCode::Rotl8 => zip8(a, b, |x, s| x.rotate_left((s & 7) as u32)),
        OpCode::Rotl16 => zip16(a, b, |x, s| x.rotate_left((s & 15) as u32)),
        OpCode::Rotl32 => a.rotate_left(b & 31),
        OpCode::Mul8 => zip8(a, b, u8::wrapping_mul),
        OpCode::Mul16 => zip16(a, b, u16::wrapping_mul),
        OpCode::Mul32 => a.wrapping_mul(b),
        OpCode::And => a & b,
        OpCode::Or => a | b,
        OpCode::Xor => a ^ b,
        _ => unreachable!("non-2x1 opcode dispatched as 2x1"),
    }
}

fn op_2_2(code: OpCode, a: u32, b: u32) -> u64 {
    match code {
        OpCode::Add8C => wide8(a, b, |x, y| ((x as i8 as i16) + (y as i8 as i16)) as u16),
        OpCode::Add16C => wide16(a, b, |x, y| ((x as i16 as i32) + (y as i16 as i32)) as u32),
        OpCode::Add32C => ((a as i32 as i64).wrapping_add(b as i32 as i64)) as u64,
        OpCode::Sub8C => wide8(a, b, |x, y| ((x as i8 as i16) - (y as i8 as i16)) as u16),
        OpCode::Sub16C => wide16(a, b, |x, y| ((x as i16 as i32) - (y as i16 as i32)) as u32),
        OpCode::Sub32C => ((a as i32 as i64).wrapping_sub(b as i32 as i64)) as u64,
        OpCode::Mul8C => wide8(a, b, |x, y| ((x as i8 as i16).wrapping_mul(y as i8 as i16)) as u16),
        OpCode::Mul16C => {
            wide16(a, b, |x, y| ((x as i16 as i32).wrapping_mul(y as i16 as i32)) as u32)
        }
        OpCode::Mul32C => ((a as i32 as i64).wrapping_mul(b as i32 as i64)) as u64,
        OpCode::Mulsu8C => wide8(a, b, |x, y| ((x as i8 as i16).wrapping_mul(y as i16)) as u16),
        OpCode::Mulsu16C => {
            wide16(a, b, |x, y| ((x as i16 as i32).wrapping_mul(y as i32)) as u32)
        }
        OpCode::Mulsu32C => ((a as i32 as i64).wrapping_mul(b as i64)) as u64,
        OpCode::Mulu8C => wide8(a, b, |x, y| (x as u16) * (y as u16)),
        OpCode::Mulu16C => wide16(a, b, |x, y| (x as u32) * (y as u32)),
        OpCode::Mulu32C => (a as u64) * (b as u64),
        _ => unreachable!("non-2x2 opcode dispatched as 2x2"),
    }
}

fn op_4_2(code: OpCode, a: u64, b: u64) -> u64 {
    match code {
        OpCode::Add64 => a.wrapping_add(b),
        OpCode::Sub64 => a.wrapping_sub(b),
        OpCode::Shll64 => a << (b & 63),
        OpCode::Shrl64 => a >> (b & 63),
        OpCode::Shra64 => ((a as i64) >> (b & 63)) as u64,
        OpCode::Rotl64 => a.rotate_left((b & 63) as u32),
        OpCode::Rotr64 => a.rotate_right((b & 63) as u32),
        OpCode::Mul64 => a.wrapping_mul(b),
        _ => unreachable!("non-4x2 opcode dispatched as 4x2"),
    }
}

fn op_4_4(code: OpCode, a: u64, b: u64) -> u128 {
    match code {
        OpCode::Add64C => ((a as i64 as i128).wrapping_add(b as i64 as i128)) as u128,
        OpCode::Sub64C => ((a as i64 as i128).wrapping_sub(b as i64 as i128)) as u128,
        OpCode::Mul64C => ((a as i64 as i128).wrapping_mul(b as i64 as i128)) as u128,
        OpCode::Mulsu64C => ((a as i64 as i128).wrapping_mul(b as i128)) as u128,
        OpCode::Mulu64C => (a as u128) * (b as u128),
        _ => unreachable!("non-4x4 opcode dispatched as 4x4"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConsensusParams {
        ConsensusParams::default()
    }

    fn seed(n: u8) -> [u8; 32] {
        let mut s = [3u8; 32];
        s[0] = n;
        s
    }

    #[test]
    fn test_execution_is_deterministic() {
        let p = params();
        let prog = Program::generate(&seed(1), &p).unwrap();
        let base = State::init(&seed(2), 77);

        let mut a = base.clone();
        let mut b = base.clone();
        interpret(&prog, &mut a, prog.memory(), 4, &p).unwrap();
        interpret(&prog, &mut b, prog.memory(), 4, &p).unwrap();
        assert_eq!(a.bytes()[..], b.bytes()[..]);
    }

    #[test]
    fn test_execution_mixes_the_state() {
        let p = params();
        let prog = Program::generate(&seed(1), &p).unwrap();
        let base = State::init(&seed(2), 77);
        let mut run = base.clone();
        interpret(&prog, &mut run, prog.memory(), 2, &p).unwrap();
        assert_ne!(base.bytes()[..], run.bytes()[..]);
    }

    #[test]
    fn test_cycles_compose() {
        // Running 1 cycle twice differs from 2 cycles only through the
        // rolling input window, so compare against an explicit re-run.
        let p = params();
        let prog = Program::generate(&seed(5), &p).unwrap();
        let mut once = State::init(&seed(6), 1);
        let mut twice = State::init(&seed(6), 1);
        interpret(&prog, &mut once, prog.memory(), 2, &p).unwrap();
        interpret(&prog, &mut twice, prog.memory(), 2, &p).unwrap();
        assert_eq!(once.bytes()[..], twice.bytes()[..]);
    }

    #[test]
    fn test_generated_programs_execute_on_any_state() {
        let p = params();
        for n in 0..16u8 {
            let prog = Program::generate(&seed(n), &p).unwrap();
            let mut state = State::init(&seed(n.wrapping_add(100)), n as u64);
            interpret(&prog, &mut state, prog.memory(), 2, &p).unwrap();
        }
    }

    #[test]
    fn test_runaway_loops_hit_the_op_budget() {
        let p = params();
        let nested = vec![
            OpCode::In as u32,
            OpCode::Loop as u32 | (4095 << 20),
            OpCode::Loop as u32 | (4095 << 20),
            OpCode::In as u32,
            OpCode::End as u32,
            OpCode::End as u32,
            OpCode::End as u32,
        ];
        let prog = Program::from_raw(nested, vec![0u32; 64]);
        let mut state = State::init(&seed(3), 0);
        assert_eq!(
            interpret(&prog, &mut state, prog.memory(), 1, &p),
            Err(ExecError::TooLong)
        );
    }

    #[test]
    fn test_truncated_program_is_rejected() {
        let p = params();
        let prog = Program::from_raw(vec![OpCode::In as u32], vec![0u32; 64]);
        let mut state = State::init(&seed(4), 0);
        assert_eq!(
            interpret(&prog, &mut state, prog.memory(), 1, &p),
            Err(ExecError::OutOfProgram)
        );
    }

    #[test]
    fn test_lane_op_semantics() {
        // 8-bit lanes wrap independently.
        assert_eq!(op_2_1(OpCode::Add8, 0x00ff_00ff, 0x0001_0001), 0x0000_0000);
        assert_eq!(op_2_1(OpCode::Add16, 0xffff_0001, 0x0001_0001), 0x0000_0002);
        // Arithmetic shift keeps the lane sign.
        assert_eq!(op_2_1(OpCode::Shra8, 0x0000_0080, 0x0000_0001), 0x0000_00c0);
        // Widening unsigned multiply.
        assert_eq!(op_2_2(OpCode::Mulu32C, 0xffff_ffff, 2), 0x1_ffff_fffe);
        // Signed widening add keeps negative carries.
        assert_eq!(
            op_2_2(OpCode::Add32C, u32::MAX, u32::MAX),
            (-2i64) as u64
        );
        // 64-bit rotate.
        assert_eq!(op_4_2(OpCode::Rotl64, 1 << 63, 1), 1);
        // 128-bit unsigned multiply.
        assert_eq!(op_4_4(OpCode::Mulu64C, u64::MAX, 2), 0x1_ffff_ffff_ffff_fffeu128);
    }
}
