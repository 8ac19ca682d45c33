//! Parameter-list / stack-effect signature parser
//!
//! Parses the `( x# y# -- z# )` form at the head of a Smol function:
//! named inputs with optional type marks, then optional outputs after
//! `--`, ending at `)`. Type marks are the operator tokens `#`, `$`,
//! `?`, `[ ]`, and `{ }`.

use crate::error::{CompileError, ErrorKind, Result};
use crate::tokenizer::{TokenKind, Tokenizer};
use tails_core::{StackEffect, TypeSet, ValueType};

/// Parses a signature from the token stream, consuming the closing `)`.
/// Returns the effect plus input and output names, top of stack first.
pub fn parse_signature(
    tokens: &mut Tokenizer<'_>,
) -> Result<(StackEffect, Vec<String>, Vec<String>)> {
    let mut effect = StackEffect::default();
    let mut input_names: Vec<String> = Vec::new();
    let mut output_names: Vec<String> = Vec::new();
    let mut in_inputs = true;

    loop {
        let tok = tokens.next()?;
        match &tok.kind {
            TokenKind::End => {
                return Err(CompileError::at(
                    ErrorKind::BadAnnotation,
                    "missing `)` to end parameter list",
                    tok.pos,
                ));
            }
            _ if tok.literal == ")" => break,
            _ if tok.literal == "--" => {
                if !in_inputs {
                    return Err(CompileError::at(
                        ErrorKind::BadAnnotation,
                        "more than one `--` in parameter list",
                        tok.pos,
                    ));
                }
                in_inputs = false;
            }
            TokenKind::Identifier => {
                let name = tok.literal.to_string();
                if input_names.contains(&name) || output_names.contains(&name) {
                    return Err(CompileError::at(
                        ErrorKind::LocalAlreadyDefined,
                        format!("duplicate parameter or result name `{}`", name),
                        tok.pos,
                    ));
                }
                let types = finish_types(parse_types(tokens)?);
                if in_inputs {
                    effect.add_input(types);
                    input_names.insert(0, name);
                } else {
                    effect.add_output(types);
                    output_names.insert(0, name);
                }
            }
            TokenKind::Operator => {
                if in_inputs {
                    return Err(CompileError::at(
                        ErrorKind::BadAnnotation,
                        "input parameter needs a name",
                        tok.pos,
                    ));
                }
                // Unnamed output: this token is already the first mark.
                let mut types = TypeSet::none();
                add_type_mark(&mut types, tok.literal, tok.pos, tokens)?;
                let types = finish_types(types | parse_types(tokens)?);
                effect.add_output(types);
                output_names.insert(0, String::new());
            }
            _ => {
                return Err(CompileError::at(
                    ErrorKind::BadAnnotation,
                    format!("unexpected `{}` in parameter list", tok.literal),
                    tok.pos,
                ));
            }
        }
    }

    Ok((effect, input_names, output_names))
}

// No marks, or only `?`, means any type.
fn finish_types(types: TypeSet) -> TypeSet {
    let mut types = types;
    if !types.exists() || types == TypeSet::of(ValueType::Null) {
        types.add_all();
    }
    types
}

/// Reads consecutive type-mark operator tokens into a raw TypeSet (which
/// may be empty; callers apply [`finish_types`]).
fn parse_types(tokens: &mut Tokenizer<'_>) -> Result<TypeSet> {
    let mut types = TypeSet::none();
    loop {
        let peeked = tokens.peek()?;
        if peeked.kind != TokenKind::Operator || !is_type_mark(peeked.literal) {
            break;
        }
        let literal = peeked.literal;
        let pos = peeked.pos;
        tokens.consume_peeked();
        add_type_mark(&mut types, literal, pos, tokens)?;
    }
    Ok(types)
}

fn is_type_mark(literal: &str) -> bool {
    matches!(literal, "#" | "$" | "?" | "[" | "{")
}

fn add_type_mark(
    types: &mut TypeSet,
    literal: &str,
    pos: usize,
    tokens: &mut Tokenizer<'_>,
) -> Result<()> {
    match literal {
        "#" => types.add(ValueType::Number),
        "$" => types.add(ValueType::String),
        "?" => types.add(ValueType::Null),
        "[" => {
            if !tokens.if_token("]")? {
                return Err(CompileError::at(
                    ErrorKind::BadAnnotation,
                    "invalid array type; expected `]`",
                    pos,
                ));
            }
            types.add(ValueType::Array);
        }
        "{" => {
            if !tokens.if_token("}")? {
                return Err(CompileError::at(
                    ErrorKind::BadAnnotation,
                    "invalid quote type; expected `}`",
                    pos,
                ));
            }
            types.add(ValueType::Quote);
        }
        other => {
            return Err(CompileError::at(
                ErrorKind::BadAnnotation,
                format!("unknown type mark `{}`", other),
                pos,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Mode;

    fn parse(src: &str) -> Result<(StackEffect, Vec<String>, Vec<String>)> {
        let mut tokens = Tokenizer::new(src, Mode::Smol);
        parse_signature(&mut tokens)
    }

    #[test]
    fn named_inputs() {
        let (effect, inputs, _) = parse("x# y# -- #)").unwrap();
        assert_eq!(effect.input_count(), 2);
        assert_eq!(effect.output_count(), 1);
        // Names come back top of stack first.
        assert_eq!(inputs, vec!["y".to_string(), "x".to_string()]);
        assert!(effect.inputs()[0].can_be(ValueType::Number));
        assert!(!effect.inputs()[0].can_be(ValueType::String));
    }

    #[test]
    fn untyped_input_is_any() {
        let (effect, _, _) = parse("x --)").unwrap();
        assert!(effect.inputs()[0].can_be_any_type());
        assert_eq!(effect.output_count(), 0);
    }

    #[test]
    fn compound_type_marks() {
        let (effect, _, _) = parse("v#$ a [ ] --)").unwrap();
        assert!(effect.inputs()[1].can_be(ValueType::Number));
        assert!(effect.inputs()[1].can_be(ValueType::String));
        assert!(!effect.inputs()[1].can_be(ValueType::Array));
        assert!(effect.inputs()[0].can_be(ValueType::Array));
    }

    #[test]
    fn duplicate_name_rejected() {
        let err = parse("x# x# --)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalAlreadyDefined);
    }

    #[test]
    fn input_needs_name() {
        let err = parse("# --)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadAnnotation);
    }
}
