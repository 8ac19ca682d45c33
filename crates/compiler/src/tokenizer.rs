//! Tokenizer shared by both front ends
//!
//! Forth source is whitespace-separated words, so in [`Mode::Forth`] a
//! token is any run of non-space characters, with `[ ] { }` standing
//! alone and `"…"` read as a string literal. The Smol front end needs
//! operator splitting instead: [`Mode::Smol`] classifies by character
//! and matches multi-character operators longest-first against the
//! grammar's operator set.

use crate::error::{CompileError, ErrorKind, Result};

/// Operator tokens the Smol tokenizer recognizes. Longest match wins.
pub const SMOL_OPERATORS: &[&str] = &[
    ":=", "==", "<=", ">=", "<>", "--", "(", ")", ";", "=", "+", "-", "*", "/", "<", ">", "#",
    "$", "?", "[", "]", "{", "}", ",",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Forth,
    Smol,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Identifier,
    Operator,
    End,
}

/// One token, with its literal text and byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub literal: &'s str,
    pub pos: usize,
}

impl Token<'_> {
    pub fn is_end(&self) -> bool {
        self.kind == TokenKind::End
    }
}

pub struct Tokenizer<'s> {
    src: &'s str,
    next: usize,
    mode: Mode,
    peeked: Option<Token<'s>>,
}

impl<'s> Tokenizer<'s> {
    pub fn new(src: &'s str, mode: Mode) -> Tokenizer<'s> {
        Tokenizer {
            src,
            next: 0,
            mode,
            peeked: None,
        }
    }

    /// Byte offset of the token `peek`/`next` would return.
    pub fn position(&mut self) -> usize {
        let _ = self.peek();
        match &self.peeked {
            Some(tok) => tok.pos,
            None => self.next,
        }
    }

    pub fn peek(&mut self) -> Result<&Token<'s>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.read_token()?);
        }
        Ok(self.peeked.as_ref().expect("just peeked"))
    }

    pub fn next(&mut self) -> Result<Token<'s>> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.read_token(),
        }
    }

    pub fn consume_peeked(&mut self) {
        self.peeked = None;
    }

    pub fn at_end(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_end())
    }

    /// Consumes the next token if its literal matches; returns whether it
    /// did.
    pub fn if_token(&mut self, literal: &str) -> Result<bool> {
        if self.peek()?.literal == literal {
            self.consume_peeked();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn rest(&self) -> &'s str {
        &self.src[self.next..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.next = self.src.len() - trimmed.len();
    }

    fn read_token(&mut self) -> Result<Token<'s>> {
        self.skip_whitespace();
        let start = self.next;
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Ok(Token {
                kind: TokenKind::End,
                literal: "",
                pos: start,
            });
        };

        if c == '"' {
            return self.read_string(start);
        }

        match self.mode {
            Mode::Forth => self.read_forth_word(start),
            Mode::Smol => self.read_smol_token(start, c),
        }
    }

    fn read_string(&mut self, start: usize) -> Result<Token<'s>> {
        let mut value = String::new();
        let mut chars = self.rest().char_indices().skip(1).peekable();
        loop {
            match chars.next() {
                None => {
                    return Err(CompileError::at(
                        ErrorKind::Syntax,
                        "unclosed string literal",
                        start,
                    ))
                }
                Some((i, '"')) => {
                    self.next = start + i + 1;
                    break;
                }
                Some((_, '\\')) => match chars.next() {
                    None => {
                        return Err(CompileError::at(
                            ErrorKind::Syntax,
                            "unclosed string literal",
                            start,
                        ))
                    }
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, escaped)) => value.push(escaped),
                },
                Some((_, c)) => value.push(c),
            }
        }
        Ok(Token {
            kind: TokenKind::Str(value),
            literal: &self.src[start..self.next],
            pos: start,
        })
    }

    /// Forth: a word is a maximal run of non-space characters, except
    /// that the four bracket characters always stand alone.
    fn read_forth_word(&mut self, start: usize) -> Result<Token<'s>> {
        const BRACKETS: [char; 4] = ['[', ']', '{', '}'];
        let rest = self.rest();
        let first = rest.chars().next().expect("nonempty");
        let end = if BRACKETS.contains(&first) {
            first.len_utf8()
        } else {
            rest.find(|c: char| c.is_whitespace() || BRACKETS.contains(&c))
                .unwrap_or(rest.len())
        };
        self.next = start + end;
        let literal = &self.src[start..self.next];

        let kind = match literal.parse::<f64>() {
            Ok(n) if n.is_finite() => TokenKind::Number(n),
            _ if BRACKETS.contains(&first) => TokenKind::Operator,
            _ => TokenKind::Identifier,
        };
        Ok(Token {
            kind,
            literal,
            pos: start,
        })
    }

    fn read_smol_token(&mut self, start: usize, c: char) -> Result<Token<'s>> {
        let rest = self.rest();
        if c.is_ascii_digit() {
            let mut end = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(rest.len());
            // Don't swallow a trailing dot that isn't a fraction.
            if rest[..end].ends_with('.') {
                end -= 1;
            }
            let literal = &rest[..end];
            let n: f64 = literal.parse().map_err(|_| {
                CompileError::at(ErrorKind::Syntax, format!("invalid number `{}`", literal), start)
            })?;
            self.next = start + end;
            return Ok(Token {
                kind: TokenKind::Number(n),
                literal: &self.src[start..self.next],
                pos: start,
            });
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut end = rest
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(rest.len());
            // An identifier may end in ':' (`if:`, `else:`).
            if rest[end..].starts_with(':') && !rest[end..].starts_with(":=") {
                end += 1;
            }
            self.next = start + end;
            return Ok(Token {
                kind: TokenKind::Identifier,
                literal: &self.src[start..self.next],
                pos: start,
            });
        }

        // Operator: longest registered match, up to 3 characters.
        for len in (1..=3).rev() {
            if let Some(op) = rest.get(..len) {
                if SMOL_OPERATORS.contains(&op) {
                    self.next = start + len;
                    return Ok(Token {
                        kind: TokenKind::Operator,
                        literal: &self.src[start..self.next],
                        pos: start,
                    });
                }
            }
        }
        Err(CompileError::at(
            ErrorKind::Syntax,
            format!("unknown token `{}`", c),
            start,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, mode: Mode) -> Vec<TokenKind> {
        let mut t = Tokenizer::new(src, mode);
        let mut out = Vec::new();
        loop {
            let tok = t.next().unwrap();
            if tok.is_end() {
                return out;
            }
            out.push(tok.kind);
        }
    }

    #[test]
    fn forth_words_split_on_whitespace() {
        let mut t = Tokenizer::new("3 -4 - DUP 0= \"hi\"", Mode::Forth);
        assert_eq!(t.next().unwrap().kind, TokenKind::Number(3.0));
        assert_eq!(t.next().unwrap().kind, TokenKind::Number(-4.0));
        let minus = t.next().unwrap();
        assert_eq!(minus.kind, TokenKind::Identifier);
        assert_eq!(minus.literal, "-");
        assert_eq!(t.next().unwrap().literal, "DUP");
        assert_eq!(t.next().unwrap().literal, "0=");
        assert_eq!(t.next().unwrap().kind, TokenKind::Str("hi".into()));
        assert!(t.at_end().unwrap());
    }

    #[test]
    fn forth_brackets_stand_alone() {
        let mut t = Tokenizer::new("[ DUP * ] {1 2}", Mode::Forth);
        assert_eq!(t.next().unwrap().literal, "[");
        assert_eq!(t.next().unwrap().literal, "DUP");
        assert_eq!(t.next().unwrap().literal, "*");
        assert_eq!(t.next().unwrap().literal, "]");
        assert_eq!(t.next().unwrap().literal, "{");
        assert_eq!(t.next().unwrap().kind, TokenKind::Number(1.0));
        assert_eq!(t.next().unwrap().kind, TokenKind::Number(2.0));
        assert_eq!(t.next().unwrap().literal, "}");
    }

    #[test]
    fn smol_operators_split() {
        let mut t = Tokenizer::new("3+4*x", Mode::Smol);
        assert_eq!(t.next().unwrap().kind, TokenKind::Number(3.0));
        assert_eq!(t.next().unwrap().literal, "+");
        assert_eq!(t.next().unwrap().kind, TokenKind::Number(4.0));
        assert_eq!(t.next().unwrap().literal, "*");
        assert_eq!(t.next().unwrap().kind, TokenKind::Identifier);
    }

    #[test]
    fn smol_minus_is_always_an_operator() {
        assert_eq!(
            kinds("3-4", Mode::Smol),
            vec![
                TokenKind::Number(3.0),
                TokenKind::Operator,
                TokenKind::Number(4.0)
            ]
        );
    }

    #[test]
    fn smol_longest_operator_wins() {
        let mut t = Tokenizer::new("x := y == z <= w", Mode::Smol);
        t.next().unwrap();
        assert_eq!(t.next().unwrap().literal, ":=");
        t.next().unwrap();
        assert_eq!(t.next().unwrap().literal, "==");
        t.next().unwrap();
        assert_eq!(t.next().unwrap().literal, "<=");
    }

    #[test]
    fn smol_identifier_may_end_in_colon() {
        let mut t = Tokenizer::new("x if: 1 else: 2", Mode::Smol);
        t.next().unwrap();
        assert_eq!(t.next().unwrap().literal, "if:");
    }

    #[test]
    fn string_escapes() {
        let mut t = Tokenizer::new(r#""a\"b\nc""#, Mode::Smol);
        assert_eq!(t.next().unwrap().kind, TokenKind::Str("a\"b\nc".into()));
    }

    #[test]
    fn unclosed_string_fails() {
        let mut t = Tokenizer::new("\"abc", Mode::Forth);
        assert!(t.next().is_err());
    }

    #[test]
    fn positions_are_byte_offsets() {
        let mut t = Tokenizer::new("ab  cd", Mode::Smol);
        assert_eq!(t.next().unwrap().pos, 0);
        assert_eq!(t.next().unwrap().pos, 4);
    }
}
