//! Disassembler: threaded code back to word references
//!
//! The inverse of the assembler. The compiler uses it to splice inline
//! words; tests use it to check emitted code and to round-trip programs
//! through the Forth front end.

use tails_core::word::Word;
use tails_core::words::op_word;
use tails_core::{Instruction, Opcode, Param, Value};

/// Iterates (word, param) pairs over an instruction slice, ending after
/// the final `_RETURN`.
pub struct Disassembler<'a> {
    code: &'a [Instruction],
    pos: usize,
    done: bool,
}

impl<'a> Disassembler<'a> {
    pub fn new(code: &'a [Instruction]) -> Disassembler<'a> {
        Disassembler {
            code,
            pos: 0,
            done: false,
        }
    }
}

impl Iterator for Disassembler<'_> {
    type Item = (Word, Param);

    fn next(&mut self) -> Option<(Word, Param)> {
        if self.done || self.pos >= self.code.len() {
            return None;
        }
        let instr = &self.code[self.pos];
        self.pos += 1;
        if instr.op == Opcode::Return {
            self.done = true;
        }
        match (&instr.op, &instr.param) {
            // A call disassembles to the called word itself.
            (Opcode::Call | Opcode::Interp | Opcode::TailInterp, Param::Word(w)) => {
                Some((w.clone(), Param::None))
            }
            (op, param) => Some((Word::Native(op_word(*op)), param.clone())),
        }
    }
}

/// Disassembles a whole instruction sequence.
pub fn disassemble_word(code: &[Instruction]) -> Vec<(Word, Param)> {
    Disassembler::new(code).collect()
}

/// Renders code as one line of word names: literals print bare, words
/// with parameters print as `NAME:<param>`.
pub fn disassemble(code: &[Instruction]) -> String {
    let mut out = String::new();
    for (word, param) in Disassembler::new(code) {
        if !out.is_empty() {
            out.push(' ');
        }
        let name = word.name().unwrap_or("<anon>");
        match param {
            Param::None => out.push_str(name),
            Param::Int(n) => out.push_str(&n.to_string()),
            Param::Literal(Value::Number(n)) => out.push_str(&Value::Number(n).to_string()),
            Param::Literal(Value::String(s)) => out.push_str(&format!("\"{}\"", s)),
            Param::Literal(v) => out.push_str(&format!("{}:<{}>", name, v)),
            Param::Offset(o) => out.push_str(&format!("{}:<{}>", name, o)),
            Param::Drop { locals, results } => {
                out.push_str(&format!("{}:<{},{}>", name, locals, results))
            }
            Param::Word(w) => out.push_str(&format!("{}:<{}>", name, w.name().unwrap_or("quote"))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use tails_core::Value;

    #[test]
    fn round_trip() {
        let code = vec![
            Instruction::with_int(3),
            Instruction::with_literal(Value::from("hi")),
            Instruction::new(Opcode::Plus),
            Instruction::with_offset(Opcode::Branch, -3),
            Instruction::new(Opcode::Return),
        ];
        let mut asm = Assembler::new();
        for (word, param) in disassemble_word(&code) {
            asm.add(&word, param);
        }
        assert_eq!(asm.finish(), code);
    }

    #[test]
    fn text_format() {
        let code = vec![
            Instruction::with_int(3),
            Instruction::with_int(4),
            Instruction::new(Opcode::Plus),
            Instruction::new(Opcode::Return),
        ];
        assert_eq!(disassemble(&code), "3 4 + _RETURN");
    }
}
