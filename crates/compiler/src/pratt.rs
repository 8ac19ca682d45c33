//! Pratt parser machinery
//!
//! A [`Symbol`] describes how one token parses: optional prefix, infix,
//! and postfix rules, each with a binding priority and either a word to
//! compile or a custom parse function. [`Parser::next_expression`] is the
//! classic priority-climbing loop. The grammar itself (symbols and
//! priorities) lives in [`smol`](crate::smol); function parameters and
//! `let` locals enter a parser-local symbol layer that shadows it.

use crate::compiler::Compiler;
use crate::error::{CompileError, ErrorKind, Result};
use crate::signature;
use crate::tokenizer::{Mode, TokenKind, Tokenizer};
use std::collections::HashMap;
use std::sync::Arc;
use tails_core::word::{CompiledWord, Word};
use tails_core::{StackEffect, TypeSet, Value};

/// Binding priority; higher binds tighter.
pub type Priority = i32;

/// Minimum priority: parse a whole expression.
pub const PRI_NONE: Priority = i32::MIN;

/// A named function argument or `let` local, with its authored stack
/// offset (<= 0 for arguments, >= 1 for locals).
#[derive(Debug, Clone, Copy)]
pub struct FnParam {
    pub types: TypeSet,
    pub offset: i16,
}

pub type PrefixFn = fn(&mut Parser<'_>) -> Result<StackEffect>;
pub type InfixFn = fn(&StackEffect, &mut Parser<'_>) -> Result<StackEffect>;

/// A grammar symbol: an identifier or operator and its parse rules.
#[derive(Clone)]
pub struct Symbol {
    pub token: String,
    word: Option<Word>,
    prefix_word: Option<Word>,
    literal: Option<Value>,
    param: Option<FnParam>,
    prefix: Option<(Priority, Option<PrefixFn>)>,
    infix: Option<(Priority, Priority, Option<InfixFn>)>,
    postfix: Option<(Priority, Option<InfixFn>)>,
}

impl Symbol {
    /// A bare token: recognized by the tokenizer, no parse behavior of
    /// its own (closing delimiters, keywords consumed by other rules).
    pub fn token(token: &str) -> Symbol {
        Symbol {
            token: token.into(),
            word: None,
            prefix_word: None,
            literal: None,
            param: None,
            prefix: None,
            infix: None,
            postfix: None,
        }
    }

    /// A symbol standing for a word, under the word's own name.
    pub fn word(word: Word) -> Symbol {
        let mut s = Symbol::token(word.name().unwrap_or_default());
        s.word = Some(word);
        s
    }

    /// A symbol standing for a word under a different spelling.
    pub fn word_as(token: &str, word: Word) -> Symbol {
        let mut s = Symbol::token(token);
        s.word = Some(word);
        s
    }

    /// A symbol that compiles to a literal value.
    pub fn literal(token: &str, value: Value) -> Symbol {
        let mut s = Symbol::token(token);
        s.literal = Some(value);
        s
    }

    /// A function parameter or local variable.
    pub fn param(token: &str, param: FnParam) -> Symbol {
        let mut s = Symbol::token(token);
        s.param = Some(param);
        s
    }

    pub fn make_prefix(mut self, priority: Priority) -> Symbol {
        self.prefix = Some((priority, None));
        self.prefix_word = self.word.clone();
        self
    }

    pub fn make_prefix_fn(mut self, priority: Priority, f: PrefixFn) -> Symbol {
        self.prefix = Some((priority, Some(f)));
        self
    }

    pub fn make_infix(mut self, left: Priority, right: Priority) -> Symbol {
        self.infix = Some((left, right, None));
        self
    }

    pub fn make_infix_fn(mut self, left: Priority, right: Priority, f: InfixFn) -> Symbol {
        self.infix = Some((left, right, Some(f)));
        self
    }

    pub fn make_postfix(mut self, priority: Priority) -> Symbol {
        self.postfix = Some((priority, None));
        self
    }

    fn is_prefix(&self) -> bool {
        self.prefix.is_some() || self.param.is_some() || self.literal.is_some()
    }

    fn parse_prefix(&self, parser: &mut Parser<'_>) -> Result<StackEffect> {
        if let Some(value) = &self.literal {
            return parser.compile_literal(value.clone());
        }
        if let Some(param) = self.param {
            return parser.param_expression(param);
        }
        let (priority, custom) = self.prefix.expect("not a prefix symbol");
        if let Some(f) = custom {
            return f(parser);
        }
        let operand = parser.next_expression(priority)?;
        let word = self
            .prefix_word
            .as_ref()
            .or(self.word.as_ref())
            .ok_or_else(|| parser.error_here(ErrorKind::Syntax, "symbol has no prefix meaning"))?
            .clone();
        let word_effect = parser.compile_call(&word)?;
        Ok(operand.then(&word_effect)?)
    }

    fn parse_infix(&self, lhs: &StackEffect, parser: &mut Parser<'_>) -> Result<StackEffect> {
        let (_, right, custom) = self.infix.expect("not an infix symbol");
        if let Some(f) = custom {
            return f(lhs, parser);
        }
        let rhs = parser.next_expression(right)?;
        let word = self
            .word
            .as_ref()
            .ok_or_else(|| parser.error_here(ErrorKind::Syntax, "symbol has no infix meaning"))?
            .clone();
        let combined = lhs.then(&rhs)?;
        let word_effect = parser.compile_call(&word)?;
        Ok(combined.then(&word_effect)?)
    }

    fn parse_postfix(&self, lhs: &StackEffect, parser: &mut Parser<'_>) -> Result<StackEffect> {
        let (_, custom) = self.postfix.expect("not a postfix symbol");
        if let Some(f) = custom {
            return f(lhs, parser);
        }
        let word = self
            .word
            .as_ref()
            .ok_or_else(|| parser.error_here(ErrorKind::Syntax, "symbol has no postfix meaning"))?
            .clone();
        let word_effect = parser.compile_call(&word)?;
        Ok(lhs.then(&word_effect)?)
    }
}

/// A symbol dictionary, optionally layered over a parent.
pub struct SymbolTable {
    parent: Option<&'static SymbolTable>,
    entries: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn root() -> SymbolTable {
        SymbolTable {
            parent: None,
            entries: HashMap::new(),
        }
    }

    pub fn layered(parent: &'static SymbolTable) -> SymbolTable {
        SymbolTable {
            parent: Some(parent),
            entries: HashMap::new(),
        }
    }

    pub fn add(&mut self, symbol: Symbol) {
        self.entries.insert(symbol.token.clone(), symbol);
    }

    pub fn get(&self, token: &str) -> Option<&Symbol> {
        self.entries
            .get(token)
            .or_else(|| self.parent.and_then(|p| p.get(token)))
    }

    /// True if this layer (not a parent) defines `token`.
    pub fn has_own(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }
}

/// The infix parser: drives a [`Compiler`] from Smol source.
pub struct Parser<'s> {
    symbols: SymbolTable,
    tokens: Tokenizer<'s>,
    compiler: Compiler,
    declared_effect: Option<StackEffect>,
}

impl<'s> Parser<'s> {
    pub fn new(compiler: Compiler, grammar: &'static SymbolTable, source: &'s str) -> Parser<'s> {
        Parser {
            symbols: SymbolTable::layered(grammar),
            tokens: Tokenizer::new(source, Mode::Smol),
            compiler,
            declared_effect: None,
        }
    }

    /// Parses the whole source as one word. A leading `( … )` declares
    /// the parameter list and stack effect.
    pub fn parse(mut self) -> Result<Arc<CompiledWord>> {
        if self.tokens.if_token("(")? {
            let pos = self.tokens.position();
            let (effect, input_names, _) = signature::parse_signature(&mut self.tokens)?;
            for (i, name) in input_names.iter().enumerate() {
                if name.is_empty() {
                    return Err(CompileError::at(
                        ErrorKind::Syntax,
                        "unnamed parameter",
                        pos,
                    ));
                }
                self.symbols.add(Symbol::param(
                    name,
                    FnParam {
                        types: effect.inputs()[i].types(),
                        offset: -(i as i16),
                    },
                ));
            }
            let deduce_outputs = effect.output_count() == 0;
            if effect.input_count() > 0 {
                self.compiler.preserve_args();
            }
            self.compiler
                .set_stack_effect(effect.clone(), false, deduce_outputs);
            self.declared_effect = Some(effect);
        }

        self.next_expression(PRI_NONE)?;
        if !self.tokens.at_end()? {
            return Err(self.error_here(ErrorKind::Syntax, "expected input to end here"));
        }
        self.compiler.finish()
    }

    /// Parses and compiles an expression until an operator binds looser
    /// than `min_priority`. Returns the expression's net stack effect.
    pub fn next_expression(&mut self, min_priority: Priority) -> Result<StackEffect> {
        let first = self.tokens.next()?;
        let mut lhs = match &first.kind {
            TokenKind::End => {
                return Err(CompileError::at(
                    ErrorKind::Syntax,
                    "unexpected end of input",
                    first.pos,
                ));
            }
            TokenKind::Number(n) => self.compile_literal(Value::Number(*n))?,
            TokenKind::Str(s) => self.compile_literal(Value::String(s.as_str().into()))?,
            TokenKind::Identifier | TokenKind::Operator => {
                let Some(symbol) = self.symbols.get(first.literal) else {
                    return Err(CompileError::at(
                        ErrorKind::UnknownWord,
                        format!("unknown symbol `{}`", first.literal),
                        first.pos,
                    ));
                };
                if !symbol.is_prefix() {
                    return Err(CompileError::at(
                        ErrorKind::Syntax,
                        format!("`{}` cannot begin an expression", first.literal),
                        first.pos,
                    ));
                }
                let symbol = symbol.clone();
                self.compiler.set_source_position(first.pos);
                symbol.parse_prefix(self)?
            }
        };

        loop {
            let (kind, pos, literal) = {
                let op = self.tokens.peek()?;
                (op.kind.clone(), op.pos, op.literal)
            };
            match kind {
                TokenKind::End => break,
                TokenKind::Number(_) | TokenKind::Str(_) => {
                    return Err(CompileError::at(
                        ErrorKind::Syntax,
                        "expected an operator",
                        pos,
                    ));
                }
                TokenKind::Identifier | TokenKind::Operator => {
                    let Some(symbol) = self.symbols.get(literal) else {
                        return Err(CompileError::at(
                            ErrorKind::UnknownWord,
                            format!("unknown symbol `{}`", literal),
                            pos,
                        ));
                    };
                    if let Some((priority, _)) = symbol.postfix {
                        if priority < min_priority {
                            break;
                        }
                        let symbol = symbol.clone();
                        self.tokens.consume_peeked();
                        self.compiler.set_source_position(pos);
                        lhs = symbol.parse_postfix(&lhs, self)?;
                    } else if let Some((left, _, _)) = symbol.infix {
                        if left < min_priority {
                            break;
                        }
                        let symbol = symbol.clone();
                        self.tokens.consume_peeked();
                        self.compiler.set_source_position(pos);
                        lhs = symbol.parse_infix(&lhs, self)?;
                    } else {
                        break;
                    }
                }
            }
        }
        Ok(lhs)
    }

    /// Consumes the next token, failing unless it matches.
    pub fn require_token(&mut self, literal: &str) -> Result<()> {
        if self.tokens.if_token(literal)? {
            Ok(())
        } else {
            Err(self.error_here(ErrorKind::Syntax, format!("expected `{}`", literal)))
        }
    }

    pub fn tokens(&mut self) -> &mut Tokenizer<'s> {
        &mut self.tokens
    }

    pub fn compiler(&mut self) -> &mut Compiler {
        &mut self.compiler
    }

    /// The effect declared by a leading parameter list, if any.
    pub fn declared_effect(&self) -> Option<&StackEffect> {
        self.declared_effect.as_ref()
    }

    pub fn error_here(&mut self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        let pos = self.tokens.position();
        CompileError::at(kind, message, pos)
    }

    /// Compiles a push of `value`; the expression effect is one output of
    /// that type.
    pub fn compile_literal(&mut self, value: Value) -> Result<StackEffect> {
        let types = TypeSet::of(value.type_of());
        self.compiler.add_literal(value);
        Ok(StackEffect::new(vec![], vec![types]))
    }

    /// Compiles a call to a word, returning the word's effect.
    pub fn compile_call(&mut self, word: &Word) -> Result<StackEffect> {
        let effect = word
            .effect()
            .ok_or_else(|| {
                CompileError::syntax(format!(
                    "stack effect of `{}` is not known",
                    word.name().unwrap_or("?")
                ))
            })?
            .clone();
        self.compiler.add(word)?;
        Ok(effect)
    }

    /// Defines a local symbol (parameter or `let` variable).
    pub fn add_local_symbol(&mut self, name: &str, param: FnParam) {
        self.symbols.add(Symbol::param(name, param));
    }

    /// True if `name` is already a parameter or local.
    pub fn has_local_symbol(&self, name: &str) -> bool {
        self.symbols.has_own(name)
    }

    /// A parameter in expression position: `x` reads it, `x := rhs`
    /// assigns it.
    fn param_expression(&mut self, param: FnParam) -> Result<StackEffect> {
        if self.tokens.if_token(":=")? {
            let rhs = self.next_expression(crate::smol::ASSIGN_RIGHT)?;
            if rhs.input_count() != 0 || rhs.output_count() != 1 {
                return Err(self.error_here(ErrorKind::Syntax, "no value to assign"));
            }
            if (rhs.outputs()[0].types() - param.types).exists() {
                return Err(self.error_here(
                    ErrorKind::TypeMismatch,
                    "type mismatch in assignment",
                ));
            }
            self.compiler.add_set_arg(param.offset);
            Ok(StackEffect::default())
        } else {
            self.compiler.add_get_arg(param.offset);
            Ok(StackEffect::new(vec![], vec![param.types]))
        }
    }
}
