//! The Smol (infix) front end
//!
//! A conventional expression grammar compiled through the same
//! [`Compiler`] as the Forth front end. The symbol table is process-wide
//! and built on first use; `let` locals and function parameters shadow it
//! through the parser's local layer.
//!
//! Priorities (left/right): `* /` 60/61, `+ -` 50/51 (unary `-` prefix
//! 50, compiled as `0 expr -`), comparisons 40/41, `==` 30/31, `:=`
//! 11/10, `if:`/`else:` 5/6, `;` 0/1.

use crate::compiler::{native, Compiler};
use crate::error::{CompileError, ErrorKind, Result};
use crate::pratt::{FnParam, Parser, Priority, Symbol, SymbolTable};
use crate::tokenizer::TokenKind;
use std::sync::{Arc, LazyLock};
use tails_core::word::CompiledWord;
use tails_core::{Opcode, StackEffect};

/// Right-binding priority of `:=`; the parameter rule parses assignment
/// right-hand sides at this level.
pub(crate) const ASSIGN_RIGHT: Priority = 10;

static GRAMMAR: LazyLock<SymbolTable> = LazyLock::new(build_grammar);

/// Compiles a line of Smol source as an anonymous word.
pub fn parse(source: &str) -> Result<Arc<CompiledWord>> {
    parse_with(Compiler::new(), source)
}

/// Compiles Smol source with a pre-configured compiler (e.g. one whose
/// inputs were seeded from the REPL stack).
pub fn parse_with(compiler: Compiler, source: &str) -> Result<Arc<CompiledWord>> {
    Parser::new(compiler, LazyLock::force(&GRAMMAR), source).parse()
}

fn build_grammar() -> SymbolTable {
    let mut t = SymbolTable::root();

    // Delimiters and keywords consumed by other rules.
    t.add(Symbol::token(")"));
    t.add(Symbol::token("else:"));
    t.add(Symbol::token("="));
    t.add(Symbol::token(":="));

    t.add(Symbol::token("(").make_prefix_fn(5, paren_group));
    t.add(Symbol::token(";").make_infix_fn(0, 1, sequence));
    t.add(Symbol::token("if:").make_infix_fn(5, 6, if_expression));
    t.add(Symbol::token("let").make_prefix_fn(5, let_binding));

    t.add(Symbol::word_as("==", native(Opcode::Eq)).make_infix(30, 31));
    t.add(Symbol::word(native(Opcode::Lt)).make_infix(40, 41));
    t.add(Symbol::word(native(Opcode::Le)).make_infix(40, 41));
    t.add(Symbol::word(native(Opcode::Gt)).make_infix(40, 41));
    t.add(Symbol::word(native(Opcode::Ge)).make_infix(40, 41));

    t.add(Symbol::word(native(Opcode::Plus)).make_infix(50, 51));
    t.add(
        Symbol::word(native(Opcode::Minus))
            .make_infix(50, 51)
            .make_prefix_fn(50, negate),
    );
    t.add(Symbol::word(native(Opcode::Mult)).make_infix(60, 61));
    t.add(Symbol::word(native(Opcode::Div)).make_infix(60, 61));

    t
}

/// `( expr )` grouping.
fn paren_group(parser: &mut Parser<'_>) -> Result<StackEffect> {
    let inner = parser.next_expression(5)?;
    parser.require_token(")")?;
    Ok(inner)
}

/// Unary minus: compiles `0 expr -`.
fn negate(parser: &mut Parser<'_>) -> Result<StackEffect> {
    let zero = parser.compile_call(&native(Opcode::Zero))?;
    let operand = parser.next_expression(50)?;
    if operand.input_count() != 0 || operand.output_count() != 1 {
        return Err(parser.error_here(ErrorKind::Syntax, "invalid operand for prefix `-`"));
    }
    let minus = parser.compile_call(&native(Opcode::Minus))?;
    Ok(zero.then(&operand)?.then(&minus)?)
}

/// `lhs ; rhs`: discards the left side's outputs, then evaluates the
/// right side. A trailing `;` is a no-op.
fn sequence(lhs: &StackEffect, parser: &mut Parser<'_>) -> Result<StackEffect> {
    if parser.tokens().at_end()? {
        return Ok(lhs.clone());
    }
    for _ in 0..lhs.output_count() {
        parser.compiler().add(&native(Opcode::Drop))?;
    }
    let rhs = parser.next_expression(1)?;
    if rhs.input_count() > 0 {
        return Err(parser.error_here(ErrorKind::StackUnderflow, "stack underflow on RHS of `;`"));
    }
    Ok(StackEffect::new(
        lhs.inputs().to_vec(),
        rhs.outputs().to_vec(),
    ))
}

/// `test if: then-clause [else: else-clause]`. Both clauses must produce
/// the same number of values; the output types are unioned.
fn if_expression(lhs: &StackEffect, parser: &mut Parser<'_>) -> Result<StackEffect> {
    if lhs.output_count() != 1 {
        return Err(parser.error_here(ErrorKind::Syntax, "LHS of `if:` must have a value"));
    }
    let branch = parser.compiler().add_branch(Opcode::ZBranch);
    let mut then_effect = parser.next_expression(6)?;

    if parser.tokens().if_token("else:")? {
        let else_jump = parser.compiler().add_branch(Opcode::Branch);
        parser.compiler().fix_branch(branch);
        let else_effect = parser.next_expression(6)?;
        if else_effect.output_count() != then_effect.output_count() {
            return Err(parser.error_here(
                ErrorKind::InconsistentStack,
                "`if:` and `else:` clauses must return the same number of values",
            ));
        }
        for (slot, other) in then_effect
            .outputs_mut()
            .iter_mut()
            .zip(else_effect.outputs())
        {
            *slot = slot.types() | other.types();
        }
        parser.compiler().fix_branch(else_jump);
    } else {
        if then_effect.output_count() != 0 {
            return Err(parser.error_here(
                ErrorKind::InconsistentStack,
                "`if:` without `else:` cannot return a value",
            ));
        }
        parser.compiler().fix_branch(branch);
    }

    Ok(StackEffect::new(
        lhs.inputs().to_vec(),
        then_effect.outputs().to_vec(),
    ))
}

/// `let name = expr`: reserves a typed local and assigns it.
fn let_binding(parser: &mut Parser<'_>) -> Result<StackEffect> {
    let name_tok = parser.tokens().next()?;
    if name_tok.kind != TokenKind::Identifier {
        return Err(CompileError::at(
            ErrorKind::Syntax,
            "expected a local variable name",
            name_tok.pos,
        ));
    }
    let name = name_tok.literal.to_string();
    if parser.has_local_symbol(&name) {
        return Err(CompileError::at(
            ErrorKind::LocalAlreadyDefined,
            format!("`{}` is already a local variable", name),
            name_tok.pos,
        ));
    }

    parser.require_token("=")?;
    let rhs = parser.next_expression(1)?;
    if rhs.input_count() != 0 || rhs.output_count() != 1 {
        return Err(parser.error_here(
            ErrorKind::Syntax,
            format!("no value to assign to `{}`", name),
        ));
    }
    let types = rhs.outputs()[0].types();

    let offset = parser.compiler().reserve_local_variable(types);
    parser.add_local_symbol(&name, FnParam { types, offset });
    parser.compiler().add_set_arg(offset);
    Ok(StackEffect::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::disassemble;
    use tails_core::{vm, Value};

    fn compile(src: &str) -> Arc<CompiledWord> {
        match parse(src) {
            Ok(word) => word,
            Err(e) => panic!("compiling `{}`: {}", src, e),
        }
    }

    fn eval(src: &str) -> Value {
        let word = compile(src);
        let mut stack = Vec::new();
        vm::run(&word, &mut stack);
        assert_eq!(stack.len(), 1, "expected one result from `{}`", src);
        stack.pop().unwrap()
    }

    #[test]
    fn precedence() {
        assert_eq!(disassemble(compile("3+4").instructions()), "3 4 + _RETURN");
        assert_eq!(
            disassemble(compile("3+4*5").instructions()),
            "3 4 5 * + _RETURN"
        );
        assert_eq!(
            disassemble(compile("3*4+5").instructions()),
            "3 4 * 5 + _RETURN"
        );
        assert_eq!(
            disassemble(compile("3*(4+5)").instructions()),
            "3 4 5 + * _RETURN"
        );
        assert_eq!(
            disassemble(compile("3*4 == 5").instructions()),
            "3 4 * 5 = _RETURN"
        );
    }

    #[test]
    fn unary_minus() {
        assert_eq!(
            disassemble(compile("-(3-4)").instructions()),
            "0 3 4 - - _RETURN"
        );
        assert_eq!(eval("-(3-4)"), Value::Number(1.0));
    }

    #[test]
    fn arithmetic_results() {
        assert_eq!(eval("3+4*5"), Value::Number(23.0));
        assert_eq!(eval("3*4+5"), Value::Number(17.0));
        assert_eq!(eval("10/4"), Value::Number(2.5));
    }

    #[test]
    fn let_bindings() {
        assert_eq!(eval("let x = 3; let y = 4; x*x + y*y"), Value::Number(25.0));
    }

    #[test]
    fn assignment() {
        assert_eq!(eval("let x = 3; x := x + 1; x * 10"), Value::Number(40.0));
    }

    #[test]
    fn if_with_else() {
        assert_eq!(eval("1 if: 123 else: 666"), Value::Number(123.0));
        assert_eq!(eval("0 if: 123 else: 666"), Value::Number(666.0));
        assert_eq!(eval("2 < 3 if: 10 else: 20"), Value::Number(10.0));
    }

    #[test]
    fn if_without_else_returns_nothing() {
        let err = parse("1 if: 2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InconsistentStack);
    }

    #[test]
    fn clause_count_mismatch() {
        let err = parse("1 if: 2 else: ;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn duplicate_local() {
        let err = parse("let x = 1; let x = 2; x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalAlreadyDefined);
    }

    #[test]
    fn declared_parameters() {
        let word = compile("(n#) n*n");
        assert_eq!(word.effect().input_count(), 1);
        assert_eq!(word.effect().output_count(), 1);
        let mut stack = vec![Value::Number(7.0)];
        vm::run(&word, &mut stack);
        assert_eq!(stack, vec![Value::Number(49.0)]);
    }

    #[test]
    fn trailing_semicolon_is_noop() {
        assert_eq!(eval("3+4;"), Value::Number(7.0));
    }

    #[test]
    fn unknown_symbol() {
        let err = parse("3 + frob").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownWord);
    }
}
