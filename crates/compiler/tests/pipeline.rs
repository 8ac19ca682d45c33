//! End-to-end tests: source through the front ends, the checker, the
//! optimizer, and the VM.

use std::sync::Arc;
use tails_compiler::disasm::disassemble;
use tails_compiler::{forth, smol, Compiler, ErrorKind};
use tails_core::word::CompiledWord;
use tails_core::{vm, vocabulary, Opcode, StackEffect, Value};

fn run_forth(source: &str) -> Vec<Value> {
    let word = forth::parse(source).unwrap_or_else(|e| panic!("compiling `{}`: {}", source, e));
    let mut stack = Vec::new();
    vm::run(&word, &mut stack);
    stack
}

fn top_of(source: &str) -> Value {
    let mut stack = run_forth(source);
    stack.pop().expect("empty stack")
}

/// `SQUARE` as used by the reference scenarios: `DUP *` with a declared
/// numeric effect. Registered once; tests that need it call this.
fn define_square() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let mut c = Compiler::named("SQUARE");
        c.set_stack_effect(StackEffect::parse("n# -- #").unwrap(), false, false);
        forth::parse_into(&mut c, "DUP *").unwrap();
        c.finish().unwrap();
    });
}

#[test]
fn scenario_subtraction() {
    assert_eq!(top_of("3 -4 -"), Value::Number(7.0));
}

#[test]
fn scenario_dup_abs() {
    assert_eq!(top_of("4 3 + DUP + ABS"), Value::Number(14.0));
}

#[test]
fn scenario_square() {
    define_square();
    assert_eq!(top_of("4 3 + SQUARE DUP + SQUARE ABS"), Value::Number(9604.0));
}

#[test]
fn scenario_if_else_then() {
    assert_eq!(top_of("1 IF 123 ELSE 666 THEN"), Value::Number(123.0));
    assert_eq!(top_of("0 IF 123 ELSE 666 THEN"), Value::Number(666.0));
}

#[test]
fn scenario_factorial_loop() {
    assert_eq!(
        top_of("1 5 BEGIN DUP WHILE SWAP OVER * SWAP 1 - REPEAT DROP"),
        Value::Number(120.0)
    );
}

#[test]
fn scenario_infix_lets() {
    let word = smol::parse("let x = 3; let y = 4; x*x + y*y").unwrap();
    let mut stack = Vec::new();
    vm::run(&word, &mut stack);
    assert_eq!(stack, vec![Value::Number(25.0)]);
}

#[test]
fn string_plus_number_is_rejected() {
    let err = forth::parse("\"abc\" 1 +").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn string_concatenation() {
    assert_eq!(top_of("\"foo\" \"bar\" +"), Value::from("foobar"));
    assert_eq!(top_of("\"hello\" LENGTH"), Value::Number(5.0));
}

#[test]
fn declared_effects_are_enforced() {
    let mut c = Compiler::new();
    c.set_stack_effect(StackEffect::parse("-- #").unwrap(), false, false);
    forth::parse_into(&mut c, "1 2").unwrap();
    let err = c.finish().unwrap_err();
    assert_eq!(err.kind, ErrorKind::WrongResultCount);
}

#[test]
fn every_word_ends_with_one_return() {
    define_square();
    for source in ["3 -4 -", "1 IF 2 ELSE 3 THEN", "1 5 BEGIN DUP WHILE SWAP OVER * SWAP 1 - REPEAT DROP"] {
        let word = forth::parse(source).unwrap();
        let code = word.instructions();
        assert_eq!(code.last().unwrap().op, Opcode::Return, "{}", source);
        let returns = code.iter().filter(|i| i.op == Opcode::Return).count();
        assert_eq!(returns, 1, "{}", source);
    }
}

#[test]
fn branch_offsets_stay_in_bounds() {
    let word = forth::parse("1 5 BEGIN DUP WHILE SWAP OVER * SWAP 1 - REPEAT DROP").unwrap();
    let code = word.instructions();
    for (i, instr) in code.iter().enumerate() {
        if matches!(instr.op, Opcode::Branch | Opcode::ZBranch) {
            let target = i as i32 + 1 + instr.offset() as i32;
            assert!(target >= 0 && (target as usize) < code.len());
        }
    }
}

#[test]
fn peak_depth_is_declared() {
    let word = forth::parse("4 3 + DUP + ABS").unwrap();
    assert_eq!(word.effect().max(), 2);
    let word = forth::parse("1 2 3 4").unwrap();
    assert_eq!(word.effect().max(), 4);
}

#[test]
fn forth_round_trips_through_disassembly() {
    define_square();
    for source in ["4 3 + DUP + ABS", "3 -4 -", "4 SQUARE 2 MAX"] {
        let word = forth::parse(source).unwrap();
        let text = disassemble(word.instructions());
        let text = text.strip_suffix(" _RETURN").unwrap();
        let reparsed = forth::parse(text).unwrap();
        assert_eq!(
            reparsed.instructions(),
            word.instructions(),
            "round-tripping `{}` via `{}`",
            source,
            text
        );
    }
}

#[test]
fn dead_code_is_removed_but_behavior_kept() {
    // The ELSE arm emits a branch over the else-clause; everything the
    // optimizer removes must be unreachable.
    let word = forth::parse("0 IF 111 ELSE 222 THEN 1 +").unwrap();
    let mut stack = Vec::new();
    vm::run(&word, &mut stack);
    assert_eq!(stack, vec![Value::Number(223.0)]);
}

#[test]
fn tail_recursion_becomes_a_branch() {
    let mut c = Compiler::named("COUNTDOWN-TEST");
    c.set_stack_effect(StackEffect::parse("n# -- #").unwrap(), false, false);
    forth::parse_into(&mut c, "DUP 0> IF 1 -").unwrap();
    c.add_recurse();
    forth::parse_into(&mut c, "THEN").unwrap();
    let word = c.finish().unwrap();

    assert!(
        !word
            .instructions()
            .iter()
            .any(|i| i.op == Opcode::Recurse),
        "tail _RECURSE should be rewritten: {}",
        disassemble(word.instructions())
    );
    assert!(word.instructions().iter().any(|i| i.op == Opcode::Branch));

    let mut stack = vec![Value::Number(5.0)];
    vm::run(&word, &mut stack);
    assert_eq!(stack, vec![Value::Number(0.0)]);
}

#[test]
fn tail_calls_jump_instead_of_recursing(){
    define_square();
    let word = forth::parse("3 SQUARE SQUARE").unwrap();
    let code = word.instructions();
    // The final call is rewritten; the earlier one stays a plain CALL.
    assert!(code.iter().any(|i| i.op == Opcode::Call));
    assert!(code.iter().any(|i| i.op == Opcode::TailInterp));
    let mut stack = Vec::new();
    vm::run(&word, &mut stack);
    assert_eq!(stack, vec![Value::Number(81.0)]);
}

#[test]
fn quotes_and_ifelse() {
    assert_eq!(top_of("5 1 [ 1 + ] [ 2 + ] IFELSE"), Value::Number(6.0));
    assert_eq!(top_of("5 0 [ 1 + ] [ 2 + ] IFELSE"), Value::Number(7.0));
}

#[test]
fn ifelse_with_diverging_quotes_is_rejected() {
    let err = forth::parse("1 [ 1 + ] [ 5 ] IFELSE").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InconsistentStack);
}

#[test]
fn define_installs_a_word() {
    let stack = run_forth("[ 1 + ] \"pipeline-incr\" DEFINE");
    assert!(stack.is_empty());
    let word = vocabulary::lookup("PIPELINE-INCR").expect("defined word");
    assert_eq!(word.effect().unwrap().net(), 0);
    assert_eq!(top_of("41 PIPELINE-INCR"), Value::Number(42.0));
}

#[test]
fn arrays() {
    assert_eq!(top_of("{1 2 3} LENGTH"), Value::Number(3.0));
    let v = top_of("{1 2} {3} +");
    assert_eq!(v.length(), Some(3));
}

#[test]
fn repl_style_input_seeding() {
    // Compile against an existing stack, the way the REPL does.
    let mut stack = vec![Value::Number(10.0), Value::Number(20.0)];
    let mut c = Compiler::new();
    c.set_input_stack(&stack);
    forth::parse_into(&mut c, "+").unwrap();
    let word = c.finish().unwrap();
    vm::run(&word, &mut stack);
    assert_eq!(stack, vec![Value::Number(30.0)]);
}

#[test]
fn nested_quotes_share_structure() {
    let word = forth::parse("[ 1 + ]").unwrap();
    let mut stack = Vec::new();
    vm::run(&word, &mut stack);
    let quote: &Arc<CompiledWord> = stack[0].as_quote().expect("quote on stack");
    assert_eq!(quote.effect().net(), 0);
}
