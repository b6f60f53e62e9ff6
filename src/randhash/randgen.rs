//! Deterministic RandHash program generation.
//!
//! Two implementations fed the same 32-byte seed must emit byte-identical
//! instruction streams; every draw below comes from the `hash_expand`
//! stream and nothing else.

use crate::crypto::hash::hash_expand;
use crate::error::ProgramError;
use crate::params::ConsensusParams;
use crate::randhash::opcodes::{OpCode, CODES_1_1, CODES_2_1, CODES_2_2, CODES_4_2, CODES_4_4};

/// Scratch memory owned by a program, in 32-bit words (8 KiB).
pub const MEMORY_WORDS: usize = 2048;

/// Hard ceiling of the variable stack (indices are 9 bits).
pub const MAX_VARS: usize = 511;

const OP_COSTS: [u32; 5] = [1, 2, 4, 8, 16];
const INPUT_COST: u32 = 2;
const MEMORY_COST: u32 = 4;
const LOOP_MIN_BUDGET: u32 = 32;
const BRANCH_MIN_BUDGET: u32 = 16;

/// A generated program plus its seeded scratch memory.
pub struct Program {
    insns: Vec<u32>,
    memory: Vec<u32>,
}

impl Program {
    /// Emit a program from `seed`, rejecting lengths outside the consensus
    /// window.
    pub fn generate(seed: &[u8; 32], params: &ConsensusParams) -> Result<Program, ProgramError> {
        let mut emitter = Emitter {
            rng: RandStream::new(seed),
            insns: Vec::with_capacity(512),
            vars: 0,
            scopes: Vec::with_capacity(16),
            params,
        };
        emitter.scope();
        emitter.emit_input();
        emitter.emit_input();
        emitter.body(params.randgen_initial_budget)?;
        emitter.end();

        let len = emitter.insns.len();
        if len < params.randgen_min_insns || len > params.randgen_max_insns {
            return Err(ProgramError::LengthOutOfBounds(len));
        }

        let mut bytes = vec![0u8; MEMORY_WORDS * 4];
        hash_expand(&mut bytes, seed, 0);
        let memory = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().expect("4-byte chunk")))
            .collect();

        Ok(Program { insns: emitter.insns, memory })
    }

    pub fn insns(&self) -> &[u32] {
        &self.insns
    }

    pub fn memory(&self) -> &[u32] {
        &self.memory
    }

    #[cfg(test)]
    pub(crate) fn from_raw(insns: Vec<u32>, memory: Vec<u32>) -> Program {
        Program { insns, memory }
    }
}

/// Pseudo-random draw stream: a 64-byte `hash_expand` buffer refilled every
/// sixteen 32-bit draws.
struct RandStream {
    seed: [u8; 32],
    buf: [u8; 64],
    next: usize,
    counter: u32,
}

impl RandStream {
    fn new(seed: &[u8; 32]) -> RandStream {
        let mut buf = [0u8; 64];
        hash_expand(&mut buf, seed, 0);
        RandStream { seed: *seed, buf, next: 0, counter: 1 }
    }

    fn next_u32(&mut self) -> u32 {
        if self.next == 16 {
            hash_expand(&mut self.buf, &self.seed, self.counter);
            self.counter = self.counter.wrapping_add(1);
            self.next = 0;
        }
        let off = self.next * 4;
        self.next += 1;
        u32::from_le_bytes(self.buf[off..off + 4].try_into().expect("4-byte slice"))
    }

    fn range(&mut self, n: u32) -> u32 {
        self.next_u32() % n
    }
}

struct Emitter<'p> {
    rng: RandStream,
    insns: Vec<u32>,
    /// Mirror of the interpreter's variable-stack height. Bodies are always
    /// scoped, so the mirror is exact at every instruction, which is what
    /// makes absolute 9-bit variable indices sound.
    vars: usize,
    scopes: Vec<usize>,
    params: &'p ConsensusParams,
}

impl Emitter<'_> {
    fn scope(&mut self) {
        self.scopes.push(self.vars);
    }

    /// Emit `END` and discard the scope's variables from the mirror.
    fn end(&mut self) {
        self.insns.push(OpCode::End as u32);
        self.vars = self.scopes.pop().unwrap_or(0);
    }

    fn mk_vars(&mut self, n: usize) {
        self.vars += n;
    }

    /// Pick an existing variable: usually from the current scope, sometimes
    /// from anywhere up-stack.
    fn pick_var(&mut self) -> Option<u32> {
        if self.vars == 0 {
            return None;
        }
        let cur = self.scopes.last().copied().unwrap_or(0);
        let from_higher = self.rng.range(self.params.higher_scope_likelihood) == 0;
        let lo = if from_higher || cur == self.vars { 0 } else { cur };
        Some(lo as u32 + self.rng.range((self.vars - lo) as u32))
    }

    /// Pick the low index of a consecutive 64-bit variable pair.
    fn pick_pair(&mut self) -> Option<u32> {
        if self.vars < 2 {
            return None;
        }
        Some(self.rng.range((self.vars - 1) as u32))
    }

    /// Operand-B bits: a variable selector, or an immediate one time in
    /// `immediate_likelihood`.
    fn operand_b(&mut self) -> Option<u32> {
        if self.rng.range(self.params.immediate_likelihood) == 0 {
            Some((1 << 18) | (self.rng.range(1 << 12) << 20))
        } else {
            Some((self.pick_var()? & 0x1ff) << 20)
        }
    }

    fn operand_b_pair(&mut self) -> Option<u32> {
        if self.rng.range(self.params.immediate_likelihood) == 0 {
            Some((1 << 18) | (self.rng.range(1 << 12) << 20))
        } else {
            Some((self.pick_pair()? & 0x1ff) << 20)
        }
    }

    fn emit_input(&mut self) {
        let imm = self.rng.range(1 << 24);
        if self.vars >= MAX_VARS {
            return;
        }
        self.insns.push(OpCode::In as u32 | (imm << 8));
        self.mk_vars(1);
    }

    fn emit_memory(&mut self) {
        let imm = self.rng.range(1 << 24);
        if self.vars + 2 > MAX_VARS {
            return;
        }
        self.insns.push(OpCode::Memory as u32 | (imm << 8));
        self.mk_vars(2);
    }

    /// Emit one arithmetic op of the given width class; false when operands
    /// or stack space are missing.
    fn emit_arith(&mut self, class: usize) -> bool {
        let (table, outs) = match class {
            0 => (CODES_1_1, 1),
            1 => (CODES_2_1, 1),
            2 => (CODES_2_2, 2),
            3 => (CODES_4_2, 2),
            _ => (CODES_4_4, 4),
        };
        if self.vars + outs > MAX_VARS {
            return false;
        }
        let code = table[self.rng.range(table.len() as u32) as usize] as u32;
        let insn = match class {
            0 => match self.pick_var() {
                Some(a) => code | (a << 9),
                None => return false,
            },
            1 | 2 => match (self.pick_var(), self.operand_b()) {
                (Some(a), Some(b)) => code | (a << 9) | b,
                _ => return false,
            },
            _ => match (self.pick_pair(), self.operand_b_pair()) {
                (Some(a), Some(b)) => code | (a << 9) | b,
                _ => return false,
            },
        };
        self.insns.push(insn);
        self.mk_vars(outs);
        true
    }

    /// Loop: a couple of MEMORY loads, then the counted body in its own
    /// scope. The body budget is divided by the iteration count so runtime
    /// cost tracks the budget actually spent.
    fn emit_loop(&mut self, budget: u32) -> Result<(), ProgramError> {
        let mut budget = budget;
        let reads = 2 + self.rng.range(2);
        for _ in 0..reads {
            self.emit_memory();
            budget = budget.saturating_sub(MEMORY_COST);
        }
        let span = self.params.loop_max_cycles - self.params.loop_min_cycles + 1;
        let iters = self.params.loop_min_cycles + self.rng.range(span);
        self.insns.push(OpCode::Loop as u32 | (iters << 20));
        self.scope();
        self.body(budget / iters)?;
        self.end();
        Ok(())
    }

    /// Branch: `IF cond` over a scoped body, a `JMP` past the alternative,
    /// then the scoped alternative. Both offsets are back-patched once the
    /// bodies are emitted.
    fn emit_branch(&mut self, budget: u32) -> Result<(), ProgramError> {
        let cond = match self.pick_var() {
            Some(v) => v,
            None => {
                self.emit_input();
                self.pick_var().unwrap_or(0)
            }
        };
        let op = if self.rng.range(self.params.random_branch_likelihood) == 0 {
            OpCode::IfRandom
        } else {
            OpCode::IfLikely
        };
        let if_pc = self.insns.len();
        self.insns.push(op as u32 | (cond << 9));
        self.scope();
        self.body(budget / 2)?;
        self.end();

        let jmp_pc = self.insns.len();
        self.insns.push(OpCode::Jmp as u32);
        let skip = (jmp_pc + 1 - if_pc) as u32;
        if skip >= 1 << 12 {
            return Err(ProgramError::OffsetOverflow);
        }
        self.insns[if_pc] |= skip << 20;

        self.scope();
        self.body(budget - budget / 2)?;
        self.end();
        let off = (self.insns.len() - jmp_pc) as u32;
        if off >= 1 << 23 {
            return Err(ProgramError::OffsetOverflow);
        }
        self.insns[jmp_pc] |= off << 8;
        Ok(())
    }

    /// Emit until the budget runs dry. Every pass either spends the rolled
    /// construct's cost or burns one unit, so termination is unconditional.
    fn body(&mut self, mut budget: u32) -> Result<(), ProgramError> {
        while budget > 0 {
            if self.insns.len() > self.params.randgen_max_insns {
                return Err(ProgramError::LengthOutOfBounds(self.insns.len()));
            }
            let roll = self.rng.range(64);
            if roll < 2 {
                if budget < LOOP_MIN_BUDGET {
                    budget -= 1;
                    continue;
                }
                let share = budget / 2;
                budget -= share;
                self.emit_loop(share)?;
            } else if roll < 6 {
                if budget < BRANCH_MIN_BUDGET {
                    budget -= 1;
                    continue;
                }
                let share = budget / 2;
                budget -= share;
                self.emit_branch(share)?;
            } else if roll < 12 {
                if budget < INPUT_COST {
                    budget -= 1;
                    continue;
                }
                budget -= INPUT_COST;
                self.emit_input();
            } else {
                let class = self.rng.range(5) as usize;
                let cost = OP_COSTS[class];
                if budget < cost {
                    budget -= 1;
                    continue;
                }
                if self.emit_arith(class) {
                    budget -= cost;
                } else {
                    budget -= 1;
                    self.emit_input();
                }
            }
        }
        Ok(())
    }
}
