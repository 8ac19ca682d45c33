//! Words: the unit of compilation and lookup
//!
//! A word is either native (implemented by an opcode handler in the VM)
//! or interpreted (a compiled instruction sequence). Compiled words are
//! `Arc`-shared: quotes on the stack and `CALL` parameters in code hold
//! the same reference, so a word's body stays alive as long as anything
//! can reach it.

use crate::effect::StackEffect;
use crate::instruction::{Instruction, Opcode};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Word attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Implemented in native code.
    pub const NATIVE: Flags = Flags(0x01);
    /// Followed in code by an integer parameter (branches, arg offsets).
    pub const HAS_INT_PARAM: Flags = Flags(0x02);
    /// Followed in code by a Value parameter (`_LITERAL`).
    pub const HAS_VAL_PARAM: Flags = Flags(0x04);
    /// Followed in code by a word reference (`CALL`, `_TAILINTERP`).
    pub const HAS_WORD_PARAM: Flags = Flags(0x08);
    /// Low-level; may not appear in parsed source code.
    pub const MAGIC: Flags = Flags(0x10);
    /// Body is spliced into the caller instead of being called.
    pub const INLINE: Flags = Flags(0x20);
    /// Calls itself (non-tail) recursively.
    pub const RECURSIVE: Flags = Flags(0x40);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Definition of a native word: its source name, opcode, declared stack
/// effect (`None` when the effect depends on the inline parameter), and
/// flags. The table of these lives in [`words`](crate::words).
#[derive(Debug)]
pub struct NativeDef {
    pub name: &'static str,
    pub opcode: Opcode,
    pub effect: Option<StackEffect>,
    pub flags: Flags,
}

/// A word compiled at runtime. Owns its instruction buffer; the last
/// instruction is always `_RETURN`.
#[derive(Debug)]
pub struct CompiledWord {
    name: Option<String>,
    flags: Flags,
    effect: StackEffect,
    instrs: Vec<Instruction>,
}

impl CompiledWord {
    pub fn new(
        name: Option<String>,
        effect: StackEffect,
        flags: Flags,
        instrs: Vec<Instruction>,
    ) -> CompiledWord {
        debug_assert!(matches!(
            instrs.last(),
            Some(Instruction {
                op: Opcode::Return,
                ..
            })
        ));
        CompiledWord {
            name: name.map(|n| n.to_uppercase()),
            flags,
            effect,
            instrs,
        }
    }

    /// A named copy of another word, sharing nothing but the code bytes.
    pub fn renamed(other: &CompiledWord, name: &str) -> CompiledWord {
        CompiledWord {
            name: Some(name.to_uppercase()),
            flags: other.flags,
            effect: other.effect.clone(),
            instrs: other.instrs.clone(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn effect(&self) -> &StackEffect {
        &self.effect
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }
}

/// A named callable: native or interpreted.
#[derive(Clone)]
pub enum Word {
    Native(&'static NativeDef),
    Compiled(Arc<CompiledWord>),
}

impl Word {
    pub fn name(&self) -> Option<&str> {
        match self {
            Word::Native(def) => Some(def.name),
            Word::Compiled(w) => w.name(),
        }
    }

    /// The declared stack effect, or `None` if it is not fixed at compile
    /// time (magic words whose effect depends on their parameter).
    pub fn effect(&self) -> Option<&StackEffect> {
        match self {
            Word::Native(def) => def.effect.as_ref(),
            Word::Compiled(w) => Some(w.effect()),
        }
    }

    pub fn flags(&self) -> Flags {
        match self {
            Word::Native(def) => def.flags,
            Word::Compiled(w) => w.flags(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Word::Native(_))
    }

    pub fn is_magic(&self) -> bool {
        self.flags().contains(Flags::MAGIC)
    }

    pub fn is_inline(&self) -> bool {
        self.flags().contains(Flags::INLINE)
    }

    /// True if, as a native word, this opcode reads an inline parameter.
    pub fn has_param(&self) -> bool {
        let f = self.flags();
        f.contains(Flags::HAS_INT_PARAM)
            || f.contains(Flags::HAS_VAL_PARAM)
            || f.contains(Flags::HAS_WORD_PARAM)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Word::Native(def) => Some(def.opcode),
            Word::Compiled(_) => None,
        }
    }

    pub fn as_compiled(&self) -> Option<&Arc<CompiledWord>> {
        match self {
            Word::Compiled(w) => Some(w),
            Word::Native(_) => None,
        }
    }
}

impl PartialEq for Word {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Word::Native(a), Word::Native(b)) => a.opcode == b.opcode,
            (Word::Compiled(a), Word::Compiled(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Word({})", name),
            None => write!(f, "Word(<anon>)"),
        }
    }
}
