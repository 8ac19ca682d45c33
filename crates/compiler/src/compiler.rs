//! The compiler
//!
//! Assembles an interpreted word from a logical list of word references.
//! Control-flow edges are recorded as indices into that list, never as
//! numeric offsets; offsets are computed in the final emission pass, after
//! dead code has been dropped and branch chains collapsed. `finish`
//! type-checks the word, optimizes it, and emits the instruction stream.

use crate::assembler::Assembler;
use crate::disasm::Disassembler;
use crate::error::{CompileError, ErrorKind, Result};
use crate::stack_check::{self, CheckContext};
use std::sync::Arc;
use tails_core::word::{CompiledWord, Flags, Word};
use tails_core::words::op_word;
use tails_core::{vocabulary, Instruction, Opcode, Param, StackEffect, TypeSet, Value};
use tracing::debug;

/// `_DROPARGS` result count meaning "deduce from the abstract stack".
pub(crate) const RESULTS_TBD: u8 = u8::MAX;

/// One entry in the compiler's logical instruction list.
#[derive(Debug, Clone)]
pub struct SourceWord {
    pub word: Word,
    pub param: Param,
    /// Byte offset of the source token this word came from.
    pub source_pos: Option<usize>,
    /// Branch target as an index into the list.
    pub branch_to: Option<usize>,
    pub is_branch_destination: bool,
    /// Parameter as rewritten by the stack checker (arg offsets made
    /// sp-relative, `_DROPARGS` result counts resolved).
    pub(crate) resolved: Option<Param>,
    pub(crate) pc: u16,
    pub(crate) dead: bool,
}

impl SourceWord {
    fn nop() -> SourceWord {
        SourceWord {
            word: native(Opcode::Nop),
            param: Param::None,
            source_pos: None,
            branch_to: None,
            is_branch_destination: false,
            resolved: None,
            pc: 0,
            dead: false,
        }
    }

    pub(crate) fn opcode(&self) -> Option<Opcode> {
        self.word.opcode()
    }

    pub(crate) fn effective_param(&self) -> &Param {
        self.resolved.as_ref().unwrap_or(&self.param)
    }
}

pub(crate) fn native(op: Opcode) -> Word {
    Word::Native(op_word(op))
}

/// True if the instruction at `i` is a `_RETURN`, or a `_BRANCH` leading
/// (possibly via a chain) to one.
pub(crate) fn returns_immediately(words: &[SourceWord], i: usize) -> bool {
    match words[i].opcode() {
        Some(Opcode::Return) => true,
        Some(Opcode::Branch) => match words[i].branch_to {
            Some(dst) => returns_immediately(words, dst),
            None => false,
        },
        _ => false,
    }
}

/// Compiles one word. Create, feed it word references (usually from a
/// front end), then call [`Compiler::finish`].
pub struct Compiler {
    name: Option<String>,
    flags: Flags,
    words: Vec<SourceWord>,
    effect: StackEffect,
    effect_can_add_inputs: bool,
    effect_can_add_outputs: bool,
    control_stack: Vec<(char, usize)>,
    locals: Vec<TypeSet>,
    uses_args: bool,
    cur_pos: Option<usize>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler {
            name: None,
            flags: Flags::NONE,
            // Slot 0 is the `_LOCALS` prologue (stays a NOP when unused);
            // the trailing NOP is the "next instruction" sentinel that
            // `add` replaces and branch fixups point at.
            words: vec![SourceWord::nop(), SourceWord::nop()],
            effect: StackEffect::default(),
            effect_can_add_inputs: true,
            effect_can_add_outputs: true,
            control_stack: Vec::new(),
            locals: Vec::new(),
            uses_args: false,
            cur_pos: None,
        }
    }

    pub fn named(name: &str) -> Compiler {
        let mut c = Compiler::new();
        c.name = Some(name.to_string());
        c
    }

    /// Declares the word's stack effect. The checker verifies the body
    /// against it; `can_add_inputs` / `can_add_outputs` allow the checker
    /// to widen the declaration instead of failing.
    pub fn set_stack_effect(
        &mut self,
        effect: StackEffect,
        can_add_inputs: bool,
        can_add_outputs: bool,
    ) {
        self.effect = effect;
        self.effect_can_add_inputs = can_add_inputs;
        self.effect_can_add_outputs = can_add_outputs;
    }

    /// Seeds the input effect from live stack values (the REPL's stack),
    /// leaving the outputs to be deduced.
    pub fn set_input_stack(&mut self, values: &[Value]) {
        self.effect = StackEffect::default();
        for v in values {
            self.effect.add_input(TypeSet::of(v.type_of()));
        }
        self.effect_can_add_inputs = false;
        self.effect_can_add_outputs = true;
    }

    /// Marks the word as keeping its arguments on the stack until the
    /// `_DROPARGS` epilogue (words with named parameters).
    pub fn preserve_args(&mut self) {
        self.uses_args = true;
    }

    pub fn set_inline(&mut self) {
        self.flags = self.flags | Flags::INLINE;
    }

    pub fn effect(&self) -> &StackEffect {
        &self.effect
    }

    /// Sets the source position attached to subsequently added words,
    /// for error reporting.
    pub fn set_source_position(&mut self, pos: usize) {
        self.cur_pos = Some(pos);
    }

    fn err(&self, kind: ErrorKind, message: String) -> CompileError {
        CompileError::new(kind, message).with_position(self.cur_pos)
    }

    /// Appends a word reference from a parser. Magic words are rejected;
    /// `Inline` words are spliced in.
    pub fn add(&mut self, word: &Word) -> Result<usize> {
        if word.is_magic() {
            return Err(self.err(
                ErrorKind::MagicWord,
                format!(
                    "magic word `{}` cannot be used in source code",
                    word.name().unwrap_or("?")
                ),
            ));
        }
        if word.is_inline() {
            self.add_inline(word)
        } else {
            Ok(self.add_with_param(word.clone(), Param::None))
        }
    }

    /// Appends a word with an explicit parameter. Returns a stable handle
    /// usable in branch fixups.
    pub fn add_with_param(&mut self, word: Word, param: Param) -> usize {
        let i = self.words.len() - 1;
        let was_destination = self.words[i].is_branch_destination;
        self.words[i] = SourceWord {
            word,
            param,
            source_pos: self.cur_pos,
            is_branch_destination: was_destination,
            ..SourceWord::nop()
        };
        self.words.push(SourceWord::nop());
        i
    }

    /// Compiles a literal push: `_INT` when the value is an integral
    /// number that fits 16 bits, else `_LITERAL`.
    pub fn add_literal(&mut self, value: Value) -> usize {
        if let Value::Number(n) = value {
            if n.fract() == 0.0 && (i16::MIN as f64..=i16::MAX as f64).contains(&n) {
                return self.add_with_param(native(Opcode::Int), Param::Int(n as i16));
            }
        }
        self.add_with_param(native(Opcode::Literal), Param::Literal(value))
    }

    /// Adds a word by splicing in its body (minus the trailing
    /// `_RETURN`) if it is interpreted; native words are added normally.
    pub fn add_inline(&mut self, word: &Word) -> Result<usize> {
        let Some(compiled) = word.as_compiled() else {
            return Ok(self.add_with_param(word.clone(), Param::None));
        };
        let start = self.words.len() - 1;
        let mut branches = Vec::new();
        for (word, param) in Disassembler::new(compiled.instructions()) {
            if word.opcode() == Some(Opcode::Return) {
                break;
            }
            // Branches inside the spliced body come back as numeric
            // offsets; re-link them as positions so later passes stay
            // exact.
            if let (Some(Opcode::Branch | Opcode::ZBranch | Opcode::Recurse), Param::Offset(off)) =
                (word.opcode(), &param)
            {
                branches.push((self.words.len() - 1, *off));
                self.add_with_param(word, Param::Offset(-1));
            } else {
                self.add_with_param(word, param);
            }
        }
        for (pos, off) in branches {
            let dst = (pos as isize + 1 + off as isize) as usize;
            self.words[pos].branch_to = Some(dst);
            self.words[dst].is_branch_destination = true;
        }
        Ok(start)
    }

    /// Emits a branch instruction with its target still unresolved.
    pub fn add_branch(&mut self, op: Opcode) -> usize {
        self.add_with_param(native(op), Param::Offset(-1))
    }

    /// Emits a `_BRANCH` jumping back to an earlier position.
    pub fn add_branch_back_to(&mut self, pos: usize) {
        let b = self.add_branch(Opcode::Branch);
        self.words[b].branch_to = Some(pos);
        self.words[pos].is_branch_destination = true;
    }

    /// Emits a `_RECURSE`, a recursive call to the word being compiled.
    pub fn add_recurse(&mut self) {
        let r = self.add_with_param(native(Opcode::Recurse), Param::Offset(-1));
        self.words[r].branch_to = Some(0);
        self.words[0].is_branch_destination = true;
    }

    /// Points a previously emitted branch at the next instruction to be
    /// added.
    pub fn fix_branch(&mut self, src: usize) {
        let dst = self.words.len() - 1;
        self.words[src].branch_to = Some(dst);
        self.words[dst].is_branch_destination = true;
    }

    /// Emits a branch (unless `op` is None) and pushes its position with
    /// a control-flow tag. Front ends build `IF`/`BEGIN`/... from this.
    pub fn push_branch(&mut self, tag: char, op: Option<Opcode>) {
        let pos = match op {
            Some(op) => self.add_branch(op),
            None => self.words.len() - 1, // next instruction to be added
        };
        self.control_stack.push((tag, pos));
    }

    /// Pops the control-flow stack, requiring the popped tag to be one of
    /// `matching`.
    pub fn pop_branch(&mut self, matching: &str) -> Result<usize> {
        if let Some(&(tag, pos)) = self.control_stack.last() {
            if matching.contains(tag) {
                self.control_stack.pop();
                return Ok(pos);
            }
        }
        Err(self.err(
            ErrorKind::UnmatchedControlFlow,
            "no matching IF or WHILE".into(),
        ))
    }

    /// Reserves a local-variable slot, maintaining a single `_LOCALS`
    /// prologue at position 0. Returns the local's 1-based offset.
    pub fn reserve_local_variable(&mut self, types: TypeSet) -> i16 {
        self.locals.push(types);
        let n = self.locals.len() as i16;
        self.words[0].word = native(Opcode::Locals);
        self.words[0].param = Param::Offset(n);
        n
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Emits `_GETARG`: offset <= 0 reads argument #(-offset), offset >=
    /// 1 reads that local. The checker rewrites offsets to be
    /// sp-relative.
    pub fn add_get_arg(&mut self, offset: i16) -> usize {
        if offset <= 0 {
            self.uses_args = true;
        }
        self.add_with_param(native(Opcode::GetArg), Param::Offset(offset))
    }

    pub fn add_set_arg(&mut self, offset: i16) -> usize {
        self.add_with_param(native(Opcode::SetArg), Param::Offset(offset))
    }

    /// Finishes compilation: appends the frame epilogue, runs the stack
    /// checker, optimizes, emits code, and (for named words) installs the
    /// result in the user vocabulary.
    pub fn finish(mut self) -> Result<Arc<CompiledWord>> {
        if !self.control_stack.is_empty() {
            return Err(CompileError::new(
                ErrorKind::UnfinishedControlFlow,
                "Unfinished IF-ELSE-THEN or BEGIN-WHILE-REPEAT",
            ));
        }

        // Frame epilogue: collapse arguments and locals over the results.
        if self.uses_args || !self.locals.is_empty() {
            let drop_count = self.locals.len()
                + if self.uses_args {
                    self.effect.input_count()
                } else {
                    0
                };
            if drop_count > 0 {
                let results = if self.effect_can_add_outputs {
                    RESULTS_TBD
                } else {
                    self.effect.output_count() as u8
                };
                self.cur_pos = None;
                self.add_with_param(
                    native(Opcode::DropArgs),
                    Param::Drop {
                        locals: drop_count as u8,
                        results,
                    },
                );
            }
        }

        // The trailing sentinel becomes the single `_RETURN`.
        let last = self.words.len() - 1;
        debug_assert_eq!(self.words[last].opcode(), Some(Opcode::Nop));
        self.words[last].word = native(Opcode::Return);

        // Type-check, filling in the deduced effect and peak depth.
        let mut ctx = CheckContext::new(
            &mut self.effect,
            self.effect_can_add_inputs,
            self.effect_can_add_outputs,
            self.locals.len(),
            self.flags.contains(Flags::INLINE),
        );
        stack_check::check(&mut self.words, &mut ctx)?;
        let max = ctx.final_max();
        self.effect = std::mem::take(&mut self.effect).with_max(max);

        let instrs = self.assemble();
        debug!(
            name = self.name.as_deref().unwrap_or("<anon>"),
            effect = %self.effect,
            len = instrs.len(),
            "compiled word"
        );

        let word = Arc::new(CompiledWord::new(
            self.name.take(),
            std::mem::take(&mut self.effect),
            self.flags,
            instrs,
        ));
        if word.name().is_some() {
            vocabulary::define(word.clone());
        }
        Ok(word)
    }

    /// Optimization, PC assignment, and emission.
    fn assemble(&mut self) -> Vec<Instruction> {
        // Pass 1: drop unreachable code, rewrite tail calls, collapse
        // branch chains, and assign a pc to every live instruction.
        let mut after_branch = false;
        let mut pc: u16 = 0;
        for i in 0..self.words.len() {
            if after_branch && !self.words[i].is_branch_destination {
                self.words[i].dead = true;
                continue;
            }
            if self.words[i].opcode() == Some(Opcode::Nop) && !self.words[i].is_branch_destination
            {
                self.words[i].dead = true;
                continue;
            }

            if self.words[i].opcode() == Some(Opcode::Recurse) {
                if i + 1 < self.words.len() && returns_immediately(&self.words, i + 1) {
                    // Tail recursion: a plain branch back to the head.
                    debug!("rewriting tail _RECURSE to _BRANCH");
                    self.words[i].word = native(Opcode::Branch);
                } else {
                    self.flags = self.flags | Flags::RECURSIVE;
                }
            } else if self.words[i].word.as_compiled().is_some()
                && i + 1 < self.words.len()
                && returns_immediately(&self.words, i + 1)
            {
                // A call in tail position jumps instead of recursing.
                debug!("rewriting tail CALL to _TAILINTERP");
                let callee = self.words[i].word.clone();
                self.words[i].word = native(Opcode::TailInterp);
                self.words[i].param = Param::Word(callee);
            }

            if let Some(mut dst) = self.words[i].branch_to {
                // Follow chains of unconditional branches.
                while self.words[dst].opcode() == Some(Opcode::Branch) {
                    match self.words[dst].branch_to {
                        Some(next) if next != dst => dst = next,
                        _ => break,
                    }
                }
                self.words[i].branch_to = Some(dst);
            }

            self.words[i].pc = pc;
            pc += 1;
            after_branch = self.words[i].opcode() == Some(Opcode::Branch);
        }

        // Pass 2: emit, filling branch offsets from assigned pcs.
        let mut asm = Assembler::new();
        for i in 0..self.words.len() {
            if self.words[i].dead {
                continue;
            }
            let param = match self.words[i].branch_to {
                Some(dst) => {
                    let off = self.words[dst].pc as i32 - self.words[i].pc as i32 - 1;
                    Param::Offset(off as i16)
                }
                None => self.words[i].effective_param().clone(),
            };
            asm.add(&self.words[i].word, param);
        }
        asm.finish()
    }
}
