//! The native word table
//!
//! One [`NativeDef`] per opcode, in enumeration order: source name,
//! declared stack effect, and flags. Effects are written as literals and
//! parsed once, on first use. An effect of `None` means the word's
//! behavior depends on its inline parameter and is special-cased by the
//! stack checker.

use crate::effect::StackEffect;
use crate::instruction::Opcode;
use crate::type_set::TypeSet;
use crate::value::ValueType;
use crate::word::{Flags, NativeDef};
use std::sync::LazyLock;

static OP_WORDS: LazyLock<Vec<NativeDef>> = LazyLock::new(build_table);

/// The native word implementing `op`.
pub fn op_word(op: Opcode) -> &'static NativeDef {
    &LazyLock::force(&OP_WORDS)[op as usize]
}

/// All native words, in opcode order.
pub fn all_words() -> &'static [NativeDef] {
    LazyLock::force(&OP_WORDS).as_slice()
}

fn def(name: &'static str, opcode: Opcode, effect: &str, flags: Flags) -> NativeDef {
    let effect = StackEffect::parse(effect)
        .unwrap_or_else(|e| panic!("bad effect for core word {}: {}", name, e));
    NativeDef {
        name,
        opcode,
        effect: Some(effect),
        flags: flags | Flags::NATIVE,
    }
}

/// A word whose stack effect is not fixed at compile time.
fn weird(name: &'static str, opcode: Opcode, flags: Flags) -> NativeDef {
    NativeDef {
        name,
        opcode,
        effect: None,
        flags: flags | Flags::NATIVE,
    }
}

fn build_table() -> Vec<NativeDef> {
    let magic_int = Flags::MAGIC | Flags::HAS_INT_PARAM;
    let magic_val = Flags::MAGIC | Flags::HAS_VAL_PARAM;
    let magic_word = Flags::MAGIC | Flags::HAS_WORD_PARAM;
    let none = Flags::NONE;

    Opcode::ALL
        .iter()
        .map(|&op| match op {
            Opcode::Interp => weird("_INTERP", op, magic_word),
            Opcode::TailInterp => weird("_TAILINTERP", op, magic_word),
            Opcode::Literal => def("_LITERAL", op, "-- x", magic_val),
            Opcode::Int => def("_INT", op, "-- #", magic_int),
            Opcode::Return => def("_RETURN", op, "--", Flags::MAGIC),
            Opcode::Branch => def("_BRANCH", op, "--", magic_int),
            Opcode::ZBranch => def("_ZBRANCH", op, "x --", magic_int),
            Opcode::Nop => def("NOP", op, "--", none),
            Opcode::Recurse => weird("_RECURSE", op, magic_int),
            Opcode::Drop => def("DROP", op, "x --", none),
            Opcode::Dup => def("DUP", op, "x -- x x", none),
            Opcode::Over => def("OVER", op, "x y -- x y x", none),
            Opcode::Rot => def("ROT", op, "x y z -- y z x", none),
            Opcode::RotN => weird("_ROTN", op, magic_int),
            Opcode::Swap => def("SWAP", op, "x y -- y x", none),
            Opcode::Zero => def("0", op, "-- #", none),
            Opcode::One => def("1", op, "-- #", none),
            Opcode::Eq => def("=", op, "x y -- #", none),
            Opcode::Ne => def("<>", op, "x y -- #", none),
            Opcode::EqZero => def("0=", op, "x -- #", none),
            Opcode::NeZero => def("0<>", op, "x -- #", none),
            Opcode::Ge => def(">=", op, "x y -- #", none),
            Opcode::Gt => def(">", op, "x y -- #", none),
            Opcode::GtZero => def("0>", op, "x -- #", none),
            Opcode::Le => def("<=", op, "x y -- #", none),
            Opcode::Lt => def("<", op, "x y -- #", none),
            Opcode::LtZero => def("0<", op, "x -- #", none),
            Opcode::Abs => def("ABS", op, "n# -- #", none),
            Opcode::Max => def("MAX", op, "x y -- x", none),
            Opcode::Min => def("MIN", op, "x y -- x", none),
            Opcode::Div => def("/", op, "n# m# -- #", none),
            Opcode::Mod => def("MOD", op, "n# m# -- #", none),
            Opcode::Minus => def("-", op, "n# m# -- #", none),
            Opcode::Mult => def("*", op, "n# m# -- #", none),
            Opcode::Plus => def("+", op, "x#$[] y#$[] -- y#$[]", none),
            Opcode::Call => weird("CALL", op, magic_word),
            Opcode::Null => NativeDef {
                name: "NULL",
                opcode: op,
                effect: Some(StackEffect::new(
                    vec![],
                    vec![TypeSet::of(ValueType::Null)],
                )),
                flags: Flags::NATIVE,
            },
            Opcode::Length => def("LENGTH", op, "x$[] -- #", none),
            Opcode::IfElse => weird("IFELSE", op, none),
            Opcode::Define => def("DEFINE", op, "q{} name$ --", none),
            Opcode::GetArg => weird("_GETARG", op, magic_int),
            Opcode::SetArg => weird("_SETARG", op, magic_int),
            Opcode::Locals => weird("_LOCALS", op, magic_int),
            Opcode::DropArgs => weird("_DROPARGS", op, magic_int),
            Opcode::Print => def("PRINT", op, "x --", none),
            Opcode::Sp => def("SP", op, "--", none),
            Opcode::Nl => def("NL", op, "--", none),
            Opcode::Nlq => def("NLQ", op, "--", none),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_all_opcodes() {
        for op in Opcode::ALL {
            let def = op_word(op);
            assert_eq!(def.opcode, op);
            assert!(def.flags.contains(Flags::NATIVE));
        }
    }

    #[test]
    fn dup_effect_matches_input() {
        let dup = op_word(Opcode::Dup).effect.as_ref().unwrap();
        assert_eq!(dup.input_count(), 1);
        assert_eq!(dup.output_count(), 2);
        assert_eq!(dup.outputs()[0].input_match(), Some(0));
    }

    #[test]
    fn plus_is_polymorphic() {
        let plus = op_word(Opcode::Plus).effect.as_ref().unwrap();
        assert!(plus.inputs()[0].can_be(ValueType::Number));
        assert!(plus.inputs()[0].can_be(ValueType::String));
        assert!(plus.inputs()[0].can_be(ValueType::Array));
        assert!(!plus.inputs()[0].can_be(ValueType::Quote));
        assert_eq!(plus.outputs()[0].input_match(), Some(0));
    }

    #[test]
    fn magic_words_are_magic() {
        assert!(op_word(Opcode::Branch).flags.contains(Flags::MAGIC));
        assert!(op_word(Opcode::Literal).flags.contains(Flags::MAGIC));
        assert!(!op_word(Opcode::Plus).flags.contains(Flags::MAGIC));
        assert!(!op_word(Opcode::IfElse).flags.contains(Flags::MAGIC));
    }
}
