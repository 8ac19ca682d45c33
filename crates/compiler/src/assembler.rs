//! Assembler: word references to threaded code
//!
//! Emits instruction slots for a sequence of word references, enforcing
//! each opcode's inline-parameter kind. An interpreted word becomes a
//! `CALL` carrying the word reference.

use tails_core::word::Word;
use tails_core::{Instruction, Opcode, Param, ParamKind};

#[derive(Default)]
pub struct Assembler {
    instrs: Vec<Instruction>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::default()
    }

    /// Number of instruction slots emitted so far; the next slot's pc.
    pub fn code_size(&self) -> usize {
        self.instrs.len()
    }

    pub fn add(&mut self, word: &Word, param: Param) {
        match word {
            Word::Native(def) => {
                debug_assert_eq!(
                    def.opcode.param_kind(),
                    param.kind(),
                    "wrong parameter for {}",
                    def.name
                );
                self.instrs.push(Instruction {
                    op: def.opcode,
                    param,
                });
            }
            Word::Compiled(_) => {
                debug_assert_eq!(param.kind(), ParamKind::None);
                self.instrs.push(Instruction {
                    op: Opcode::Call,
                    param: Param::Word(word.clone()),
                });
            }
        }
    }

    pub fn finish(self) -> Vec<Instruction> {
        self.instrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tails_core::words::op_word;

    #[test]
    fn natives_emit_their_opcode() {
        let mut asm = Assembler::new();
        asm.add(&Word::Native(op_word(Opcode::Dup)), Param::None);
        asm.add(&Word::Native(op_word(Opcode::Int)), Param::Int(42));
        assert_eq!(asm.code_size(), 2);
        let code = asm.finish();
        assert_eq!(code[0].op, Opcode::Dup);
        assert_eq!(code[1], Instruction::with_int(42));
    }
}
