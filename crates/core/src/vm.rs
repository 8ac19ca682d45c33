//! The threaded-code interpreter
//!
//! Dispatch walks an instruction slice slot by slot, switching on the
//! opcode; an interpreted call recurses into [`execute`] and `_RETURN`
//! returns from it, so the host call stack is the return stack. A
//! `_TAILINTERP` replaces the current frame instead of recursing, which
//! is what makes tail calls run in constant return-stack depth.
//!
//! The VM performs no checks: every precondition is verified statically
//! by the stack checker, and the top-level [`run`] pre-sizes the data
//! stack to the word's declared peak depth. Malformed code is a compiler
//! bug and panics.

use crate::effect::UNKNOWN_MAX;
use crate::instruction::{Opcode, Param};
use crate::value::Value;
use crate::vocabulary;
use crate::word::{CompiledWord, Word};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Set when the current output line has content; `NLQ` consults it.
static LINE_DIRTY: AtomicBool = AtomicBool::new(false);

/// Runs a compiled word against `stack`, which must already hold the
/// word's declared inputs. On return the stack holds the declared
/// outputs. The stack is grown to the declared peak depth up front so
/// execution never reallocates (except under unknown-max recursion).
pub fn run(word: &Arc<CompiledWord>, stack: &mut Vec<Value>) {
    let max = word.effect().max();
    if max != UNKNOWN_MAX {
        stack.reserve(max as usize);
    }
    trace!(word = ?word.name(), depth = stack.len(), "run");
    execute(word, 0, stack);
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("vm bug: stack underflow")
}

fn top_index(stack: &[Value], offset: i16) -> usize {
    let idx = stack.len() as isize - 1 + offset as isize;
    debug_assert!(idx >= 0, "vm bug: slot offset out of frame");
    idx as usize
}

/// The dispatch loop, entered at `start` within `word`'s code.
fn execute(word: &Arc<CompiledWord>, start: usize, stack: &mut Vec<Value>) {
    let mut cur = word.clone();
    let mut ip = start;
    loop {
        let op = cur.instructions()[ip].op;
        ip += 1;
        match op {
            Opcode::Return => return,
            Opcode::Nop => {}

            Opcode::Literal => {
                let v = match &cur.instructions()[ip - 1].param {
                    Param::Literal(v) => v.clone(),
                    _ => panic!("vm bug: _LITERAL without value"),
                };
                stack.push(v);
            }
            Opcode::Int => {
                let n = match cur.instructions()[ip - 1].param {
                    Param::Int(n) => n,
                    _ => panic!("vm bug: _INT without value"),
                };
                stack.push(Value::Number(n as f64));
            }

            Opcode::Branch => {
                ip = (ip as isize + cur.instructions()[ip - 1].offset() as isize) as usize;
            }
            Opcode::ZBranch => {
                let off = cur.instructions()[ip - 1].offset();
                if !pop(stack).is_truthy() {
                    ip = (ip as isize + off as isize) as usize;
                }
            }
            Opcode::Recurse => {
                let target = (ip as isize + cur.instructions()[ip - 1].offset() as isize) as usize;
                let callee = cur.clone();
                execute(&callee, target, stack);
            }

            Opcode::Call | Opcode::Interp => match &cur.instructions()[ip - 1].param {
                Param::Word(Word::Compiled(w)) => {
                    let callee = w.clone();
                    execute(&callee, 0, stack);
                }
                _ => panic!("vm bug: CALL without compiled word"),
            },
            Opcode::TailInterp => {
                let callee = match &cur.instructions()[ip - 1].param {
                    Param::Word(Word::Compiled(w)) => w.clone(),
                    _ => panic!("vm bug: _TAILINTERP without compiled word"),
                };
                cur = callee;
                ip = 0;
            }

            Opcode::Drop => {
                pop(stack);
            }
            Opcode::Dup => {
                let v = stack.last().expect("vm bug: stack underflow").clone();
                stack.push(v);
            }
            Opcode::Over => {
                let v = stack[stack.len() - 2].clone();
                stack.push(v);
            }
            Opcode::Rot => {
                let idx = stack.len() - 3;
                let v = stack.remove(idx);
                stack.push(v);
            }
            Opcode::RotN => {
                let n = cur.instructions()[ip - 1].offset();
                if n > 0 {
                    let idx = stack.len() - 1 - n as usize;
                    let v = stack.remove(idx);
                    stack.push(v);
                } else if n < 0 {
                    let v = pop(stack);
                    let idx = stack.len() - (-n) as usize;
                    stack.insert(idx, v);
                }
            }
            Opcode::Swap => {
                let n = stack.len();
                stack.swap(n - 1, n - 2);
            }

            Opcode::Zero => stack.push(Value::Number(0.0)),
            Opcode::One => stack.push(Value::Number(1.0)),
            Opcode::Null => stack.push(Value::Null),

            Opcode::Eq => binary(stack, |a, b| bool_value(a == b)),
            Opcode::Ne => binary(stack, |a, b| bool_value(a != b)),
            Opcode::Gt => binary(stack, |a, b| bool_value(a.cmp_value(&b).is_gt())),
            Opcode::Ge => binary(stack, |a, b| bool_value(a.cmp_value(&b).is_ge())),
            Opcode::Lt => binary(stack, |a, b| bool_value(a.cmp_value(&b).is_lt())),
            Opcode::Le => binary(stack, |a, b| bool_value(a.cmp_value(&b).is_le())),
            Opcode::EqZero => unary(stack, |v| bool_value(v == Value::Number(0.0))),
            Opcode::NeZero => unary(stack, |v| bool_value(v != Value::Number(0.0))),
            Opcode::GtZero => unary(stack, |v| bool_value(v.cmp_value(&Value::Number(0.0)).is_gt())),
            Opcode::LtZero => unary(stack, |v| bool_value(v.cmp_value(&Value::Number(0.0)).is_lt())),

            Opcode::Abs => unary(stack, |v| Value::Number(v.as_number().abs())),
            Opcode::Max => binary(stack, |a, b| if b.cmp_value(&a).is_gt() { b } else { a }),
            Opcode::Min => binary(stack, |a, b| if b.cmp_value(&a).is_lt() { b } else { a }),
            Opcode::Plus => binary(stack, |a, b| a.add(&b)),
            Opcode::Minus => binary(stack, |a, b| a.sub(&b)),
            Opcode::Mult => binary(stack, |a, b| a.mul(&b)),
            Opcode::Div => binary(stack, |a, b| a.div(&b)),
            Opcode::Mod => binary(stack, |a, b| a.rem(&b)),

            Opcode::Length => unary(stack, |v| {
                Value::Number(v.length().expect("vm bug: LENGTH on lengthless value") as f64)
            }),

            Opcode::GetArg => {
                let off = cur.instructions()[ip - 1].offset();
                let v = stack[top_index(stack, off)].clone();
                stack.push(v);
            }
            Opcode::SetArg => {
                let off = cur.instructions()[ip - 1].offset();
                let idx = top_index(stack, off);
                let v = pop(stack);
                if off != 0 {
                    stack[idx] = v;
                }
            }
            Opcode::Locals => {
                for _ in 0..cur.instructions()[ip - 1].offset() {
                    stack.push(Value::Null);
                }
            }
            Opcode::DropArgs => {
                let (locals, results) = match cur.instructions()[ip - 1].param {
                    Param::Drop { locals, results } => (locals as usize, results as usize),
                    _ => panic!("vm bug: _DROPARGS without counts"),
                };
                let results_start = stack.len() - results;
                stack.drain(results_start - locals..results_start);
            }

            Opcode::IfElse => {
                let else_quote = pop(stack);
                let then_quote = pop(stack);
                let test = pop(stack);
                let chosen = if test.is_truthy() { then_quote } else { else_quote };
                let callee = chosen
                    .as_quote()
                    .expect("vm bug: IFELSE without quotes")
                    .clone();
                execute(&callee, 0, stack);
            }
            Opcode::Define => {
                let name = pop(stack);
                let quote = pop(stack);
                let body = quote.as_quote().expect("vm bug: DEFINE without a quote");
                let name = name.as_str().expect("vm bug: DEFINE without a name");
                vocabulary::define(Arc::new(CompiledWord::renamed(body, name)));
            }

            Opcode::Print => {
                print!("{}", pop(stack));
                LINE_DIRTY.store(true, Ordering::Relaxed);
            }
            Opcode::Sp => {
                print!(" ");
                LINE_DIRTY.store(true, Ordering::Relaxed);
            }
            Opcode::Nl => {
                println!();
                LINE_DIRTY.store(false, Ordering::Relaxed);
            }
            Opcode::Nlq => {
                if LINE_DIRTY.swap(false, Ordering::Relaxed) {
                    println!();
                }
            }
        }
    }
}

fn bool_value(b: bool) -> Value {
    Value::Number(if b { 1.0 } else { 0.0 })
}

fn unary(stack: &mut Vec<Value>, f: impl FnOnce(Value) -> Value) {
    let v = pop(stack);
    stack.push(f(v));
}

fn binary(stack: &mut Vec<Value>, f: impl FnOnce(Value, Value) -> Value) {
    let b = pop(stack);
    let a = pop(stack);
    stack.push(f(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::StackEffect;
    use crate::instruction::Instruction;
    use crate::word::Flags;

    fn word_of(instrs: Vec<Instruction>, effect: &str) -> Arc<CompiledWord> {
        Arc::new(CompiledWord::new(
            None,
            StackEffect::parse(effect).unwrap(),
            Flags::NONE,
            instrs,
        ))
    }

    fn run_new(word: &Arc<CompiledWord>) -> Vec<Value> {
        let mut stack = Vec::new();
        run(word, &mut stack);
        stack
    }

    #[test]
    fn arithmetic() {
        // 3 4 + 2 *
        let w = word_of(
            vec![
                Instruction::with_int(3),
                Instruction::with_int(4),
                Instruction::new(Opcode::Plus),
                Instruction::with_int(2),
                Instruction::new(Opcode::Mult),
                Instruction::new(Opcode::Return),
            ],
            "-- #",
        );
        assert_eq!(run_new(&w), vec![Value::Number(14.0)]);
    }

    #[test]
    fn stack_gymnastics() {
        // 1 2 3 ROT  => 2 3 1
        let w = word_of(
            vec![
                Instruction::with_int(1),
                Instruction::with_int(2),
                Instruction::with_int(3),
                Instruction::new(Opcode::Rot),
                Instruction::new(Opcode::Return),
            ],
            "-- a b c",
        );
        assert_eq!(
            run_new(&w),
            vec![Value::Number(2.0), Value::Number(3.0), Value::Number(1.0)]
        );
    }

    #[test]
    fn rotn_matches_swap() {
        for n in [1i16, -1] {
            let w = word_of(
                vec![
                    Instruction::with_int(1),
                    Instruction::with_int(2),
                    Instruction::with_offset(Opcode::RotN, n),
                    Instruction::new(Opcode::Return),
                ],
                "-- a b",
            );
            assert_eq!(run_new(&w), vec![Value::Number(2.0), Value::Number(1.0)]);
        }
    }

    #[test]
    fn zbranch_takes_branch_on_falsy() {
        // 0 _ZBRANCH:<1> 123(skipped) 666
        let w = word_of(
            vec![
                Instruction::with_int(0),
                Instruction::with_offset(Opcode::ZBranch, 1),
                Instruction::with_int(123),
                Instruction::with_int(666),
                Instruction::new(Opcode::Return),
            ],
            "-- #",
        );
        assert_eq!(run_new(&w), vec![Value::Number(666.0)]);
    }

    #[test]
    fn call_and_tail_call() {
        let square = word_of(
            vec![
                Instruction::new(Opcode::Dup),
                Instruction::new(Opcode::Mult),
                Instruction::new(Opcode::Return),
            ],
            "n# -- #",
        );
        let w = word_of(
            vec![
                Instruction::with_int(7),
                Instruction::with_word(Opcode::Call, Word::Compiled(square.clone())),
                Instruction::with_word(Opcode::TailInterp, Word::Compiled(square)),
                Instruction::new(Opcode::Return),
            ],
            "-- #",
        );
        assert_eq!(run_new(&w), vec![Value::Number(2401.0)]);
    }

    #[test]
    fn locals_and_droparg_frames() {
        // inputs: 10; one local; local = input * 2; return local
        let w = word_of(
            vec![
                Instruction::with_offset(Opcode::Locals, 1),
                Instruction::with_offset(Opcode::GetArg, -1),
                Instruction::with_int(2),
                Instruction::new(Opcode::Mult),
                Instruction::with_offset(Opcode::SetArg, -1),
                Instruction::with_offset(Opcode::GetArg, 0),
                Instruction::with_drop(2, 1),
                Instruction::new(Opcode::Return),
            ],
            "n# -- #",
        );
        let mut stack = vec![Value::Number(10.0)];
        run(&w, &mut stack);
        assert_eq!(stack, vec![Value::Number(20.0)]);
    }

    #[test]
    fn ifelse_picks_by_truthiness() {
        let yes = word_of(
            vec![Instruction::with_int(1), Instruction::new(Opcode::Return)],
            "-- #",
        );
        let no = word_of(
            vec![Instruction::with_int(2), Instruction::new(Opcode::Return)],
            "-- #",
        );
        for (test, expect) in [(5.0, 1.0), (0.0, 2.0)] {
            let w = word_of(
                vec![
                    Instruction::with_literal(Value::Number(test)),
                    Instruction::with_literal(Value::Quote(yes.clone())),
                    Instruction::with_literal(Value::Quote(no.clone())),
                    Instruction::new(Opcode::IfElse),
                    Instruction::new(Opcode::Return),
                ],
                "-- #",
            );
            assert_eq!(run_new(&w), vec![Value::Number(expect)]);
        }
    }
}
