//! The Forth (postfix) front end
//!
//! Whitespace-separated words compile straight into a [`Compiler`]:
//! literals push, identifiers resolve through the vocabulary, and the
//! classic control words build branches through the compiler's tagged
//! control-flow stack. `[ … ]` compiles a nested anonymous word and
//! pushes it as a quote literal; `{ … }` builds an array literal.

use crate::compiler::Compiler;
use crate::error::{CompileError, ErrorKind, Result};
use crate::tokenizer::{Mode, Token, TokenKind, Tokenizer};
use std::sync::Arc;
use tails_core::word::CompiledWord;
use tails_core::{vocabulary, Opcode, Value};

/// Compiles a line of Forth source as an anonymous word.
pub fn parse(source: &str) -> Result<Arc<CompiledWord>> {
    let mut compiler = Compiler::new();
    parse_into(&mut compiler, source)?;
    compiler.finish()
}

/// Compiles Forth source into an existing compiler (whose effect may
/// have been seeded from the REPL stack).
pub fn parse_into(compiler: &mut Compiler, source: &str) -> Result<()> {
    let mut tokens = Tokenizer::new(source, Mode::Forth);
    parse_tokens(compiler, &mut tokens, None)
}

fn parse_tokens(
    compiler: &mut Compiler,
    tokens: &mut Tokenizer<'_>,
    closing: Option<&str>,
) -> Result<()> {
    loop {
        let tok = tokens.next()?;
        if tok.is_end() {
            return match closing {
                Some(c) => Err(CompileError::at(
                    ErrorKind::Syntax,
                    format!("missing `{}`", c),
                    tok.pos,
                )),
                None => Ok(()),
            };
        }
        if Some(tok.literal) == closing {
            return Ok(());
        }
        compiler.set_source_position(tok.pos);

        match &tok.kind {
            TokenKind::Number(n) => {
                compiler.add_literal(Value::Number(*n));
            }
            TokenKind::Str(s) => {
                compiler.add_literal(Value::String(s.as_str().into()));
            }
            _ => compile_word(compiler, tokens, &tok)?,
        }
    }
}

fn compile_word(
    compiler: &mut Compiler,
    tokens: &mut Tokenizer<'_>,
    tok: &Token<'_>,
) -> Result<()> {
    match tok.literal {
        "{" => {
            let array = parse_array(tokens, tok.pos)?;
            compiler.add_literal(array);
        }
        "[" => {
            let quote = parse_quote(tokens)?;
            compiler.add_literal(Value::Quote(quote));
        }
        "}" | "]" => {
            return Err(CompileError::at(
                ErrorKind::Syntax,
                format!("unexpected `{}`", tok.literal),
                tok.pos,
            ));
        }

        "IF" => compiler.push_branch('i', Some(Opcode::ZBranch)),
        "ELSE" => {
            let if_pos = compiler.pop_branch("i")?;
            compiler.push_branch('e', Some(Opcode::Branch));
            compiler.fix_branch(if_pos);
        }
        "THEN" => {
            let pos = compiler.pop_branch("ie")?;
            compiler.fix_branch(pos);
        }

        "BEGIN" => compiler.push_branch('b', None),
        "WHILE" => compiler.push_branch('w', Some(Opcode::ZBranch)),
        "REPEAT" => {
            let while_pos = compiler.pop_branch("w")?;
            let begin_pos = compiler.pop_branch("b")?;
            compiler.add_branch_back_to(begin_pos);
            compiler.fix_branch(while_pos);
        }

        name => match vocabulary::lookup(name) {
            Some(word) => {
                compiler.add(&word)?;
            }
            None => {
                return Err(CompileError::at(
                    ErrorKind::UnknownWord,
                    format!("unknown word `{}`", name),
                    tok.pos,
                ));
            }
        },
    }
    Ok(())
}

/// Compiles a `[ … ]` quotation as a nested anonymous word whose inputs
/// are deduced from how deep it reaches.
fn parse_quote(tokens: &mut Tokenizer<'_>) -> Result<Arc<CompiledWord>> {
    let mut nested = Compiler::new();
    parse_tokens(&mut nested, tokens, Some("]"))?;
    nested.finish()
}

/// Parses a `{ … }` array literal of values.
fn parse_array(tokens: &mut Tokenizer<'_>, open_pos: usize) -> Result<Value> {
    let mut items = Vec::new();
    loop {
        let tok = tokens.next()?;
        if tok.is_end() {
            return Err(CompileError::at(ErrorKind::Syntax, "missing `}`", open_pos));
        }
        match &tok.kind {
            TokenKind::Number(n) => items.push(Value::Number(*n)),
            TokenKind::Str(s) => items.push(Value::String(s.as_str().into())),
            _ => match tok.literal {
                "}" => return Ok(Value::Array(Arc::new(items))),
                "{" => items.push(parse_array(tokens, tok.pos)?),
                "[" => items.push(Value::Quote(parse_quote(tokens)?)),
                other => {
                    return Err(CompileError::at(
                        ErrorKind::Syntax,
                        format!("`{}` is not a literal value", other),
                        tok.pos,
                    ));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn literals_and_words() {
        let word = parse("3 -4 -").unwrap();
        assert_eq!(word.effect().input_count(), 0);
        assert_eq!(word.effect().output_count(), 1);
    }

    #[test]
    fn unknown_word() {
        let err = parse("3 FROBNICATE").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownWord);
        assert_eq!(err.position, Some(2));
    }

    #[test]
    fn magic_word_rejected() {
        let err = parse("1 _BRANCH").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MagicWord);
    }

    #[test]
    fn unfinished_if() {
        let err = parse("1 IF 2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnfinishedControlFlow);
    }

    #[test]
    fn unmatched_else() {
        let err = parse("1 ELSE").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnmatchedControlFlow);
    }

    #[test]
    fn underflow_is_static() {
        // With the inputs pinned to one value (a REPL stack of depth 1),
        // `+` has nothing to deduce and underflows at compile time.
        let mut compiler = Compiler::new();
        compiler.set_input_stack(&[Value::Number(1.0)]);
        parse_into(&mut compiler, "+").unwrap();
        let err = compiler.finish().unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackUnderflow);
    }

    #[test]
    fn array_literal() {
        let word = parse("{1 2 3} LENGTH").unwrap();
        assert_eq!(word.effect().output_count(), 1);
    }

    #[test]
    fn quote_literal() {
        let word = parse("[ 1 + ]").unwrap();
        assert_eq!(word.effect().output_count(), 1);
    }
}
