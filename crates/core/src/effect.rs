//! StackEffect: the declared API of a word
//!
//! How many values a word consumes and produces, their allowed types, and
//! the peak stack growth while it runs. Effects are written in literal
//! form, e.g. `"a# b# -- c#"`: tokens left of `--` are inputs (bottom to
//! top), tokens right of it outputs. Type marks: `#` number, `$` string,
//! `[]` array, `{}` quote, `?` null; a bare name is any type; an output
//! repeating an input's name has the same runtime type as that input.

use crate::type_set::TypeSet;
use crate::value::ValueType;
use std::fmt;

/// Sentinel for "peak stack growth not known at compile time" (e.g.
/// non-tail recursion).
pub const UNKNOWN_MAX: u16 = u16::MAX;

/// Errors from effect parsing and composition. The compiler wraps these
/// with source positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    Underflow,
    TypeMismatch,
    BadAnnotation(String),
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectError::Underflow => f.write_str("stack underflow"),
            EffectError::TypeMismatch => f.write_str("type mismatch"),
            EffectError::BadAnnotation(msg) => {
                write!(f, "bad stack-effect annotation: {}", msg)
            }
        }
    }
}

impl std::error::Error for EffectError {}

/// Inputs and outputs of a word, ordered top of stack first, plus the
/// maximum stack growth during execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackEffect {
    inputs: Vec<TypeSet>,
    outputs: Vec<TypeSet>,
    max: u16,
}

impl StackEffect {
    pub fn new(inputs: Vec<TypeSet>, outputs: Vec<TypeSet>) -> StackEffect {
        let mut e = StackEffect {
            inputs,
            outputs,
            max: 0,
        };
        e.update_max(0);
        e
    }

    /// Parses a stack-effect literal like `"a# b$ -- c?"`.
    pub fn parse(source: &str) -> Result<StackEffect, EffectError> {
        Ok(Self::parse_with_names(source)?.0)
    }

    /// Parses a literal, also returning the input and output names (empty
    /// strings for unnamed slots), top of stack first.
    pub fn parse_with_names(
        source: &str,
    ) -> Result<(StackEffect, Vec<String>, Vec<String>), EffectError> {
        let mut inputs: Vec<(TypeSet, String)> = Vec::new();
        let mut outputs: Vec<(TypeSet, String)> = Vec::new();
        let mut in_inputs = true;

        for token in source.split_whitespace() {
            if token == "--" {
                if !in_inputs {
                    return Err(EffectError::BadAnnotation(
                        "more than one `--` separator".into(),
                    ));
                }
                in_inputs = false;
                continue;
            }
            let (types, name) = parse_slot(token)?;
            if in_inputs {
                inputs.push((types, name));
            } else {
                outputs.push((types, name));
            }
        }
        if in_inputs {
            return Err(EffectError::BadAnnotation("missing `--` separator".into()));
        }

        // The literal lists slots bottom-to-top; the effect stores them
        // top-first.
        inputs.reverse();
        outputs.reverse();

        // Outputs repeating an input name carry that input's runtime type.
        for (types, name) in outputs.iter_mut() {
            if !name.is_empty() {
                if let Some(idx) = inputs.iter().position(|(_, n)| n.as_str() == name.as_str()) {
                    *types = inputs[idx].0.with_input_match(idx);
                }
            }
        }

        let (ins, in_names): (Vec<_>, Vec<_>) = inputs.into_iter().unzip();
        let (outs, out_names): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();
        Ok((StackEffect::new(ins, outs), in_names, out_names))
    }

    /// The input types, top of stack first.
    pub fn inputs(&self) -> &[TypeSet] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TypeSet] {
        &self.outputs
    }

    pub fn inputs_mut(&mut self) -> &mut [TypeSet] {
        &mut self.inputs
    }

    pub fn outputs_mut(&mut self) -> &mut [TypeSet] {
        &mut self.outputs
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Net change in stack depth from entry to exit.
    pub fn net(&self) -> i32 {
        self.outputs.len() as i32 - self.inputs.len() as i32
    }

    /// Peak growth of the stack while the word runs.
    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn max_is_unknown(&self) -> bool {
        self.max == UNKNOWN_MAX
    }

    pub fn with_max(mut self, max: u16) -> StackEffect {
        self.max = 0;
        self.update_max(max);
        self
    }

    pub fn with_unknown_max(self) -> StackEffect {
        self.with_max(UNKNOWN_MAX)
    }

    pub(crate) fn update_max(&mut self, m: u16) {
        let floor = self.net().max(0) as u16;
        self.max = self.max.max(m).max(floor);
    }

    /// Adds an input at the top of the stack.
    pub fn add_input(&mut self, entry: TypeSet) {
        self.inputs.insert(0, entry);
        self.update_max(0);
    }

    pub fn add_output(&mut self, entry: TypeSet) {
        self.outputs.insert(0, entry);
        self.update_max(0);
    }

    pub fn add_input_at_bottom(&mut self, entry: TypeSet) {
        self.inputs.push(entry);
        self.update_max(0);
    }

    pub fn add_output_at_bottom(&mut self, entry: TypeSet) {
        self.outputs.push(entry);
        self.update_max(0);
    }

    /// Sequential composition: the effect of running `self` then `next`.
    /// Fails if `next` needs more values than `self` leaves, or their
    /// types disagree.
    pub fn then(&self, next: &StackEffect) -> Result<StackEffect, EffectError> {
        let a_outs = self.outputs.len();
        let b_ins = next.inputs.len();
        if a_outs < b_ins {
            return Err(EffectError::Underflow);
        }
        for i in 0..b_ins {
            if (self.outputs[i].types() - next.inputs[i]).exists() {
                return Err(EffectError::TypeMismatch);
            }
        }

        let mut result = StackEffect::new(self.inputs.clone(), next.outputs.clone());
        // Unconsumed outputs of `self` stay on the stack, below `next`'s.
        for i in b_ins..a_outs {
            result.add_output_at_bottom(self.outputs[i]);
        }
        // Resolve input matches against what was actually on the stack.
        for slot in result.outputs.iter_mut() {
            if let Some(k) = slot.input_match() {
                if k < a_outs {
                    let actual = self.outputs[k];
                    *slot = if actual.multi_type() {
                        actual.types().with_input_match(k)
                    } else {
                        actual.types()
                    };
                }
            }
        }
        let max = (self.max as i32)
            .max(self.net() + next.max as i32)
            .max(0)
            .min(UNKNOWN_MAX as i32) as u16;
        Ok(result.with_max(max))
    }
}

fn parse_slot(token: &str) -> Result<(TypeSet, String), EffectError> {
    let mut types = TypeSet::none();
    let mut name = String::new();
    for c in token.chars() {
        match c {
            '?' => types.add(ValueType::Null),
            '#' => types.add(ValueType::Number),
            '$' => types.add(ValueType::String),
            '[' | ']' => types.add(ValueType::Array),
            '{' | '}' => types.add(ValueType::Quote),
            c if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
            _ => {
                return Err(EffectError::BadAnnotation(format!(
                    "unknown type symbol `{}`",
                    c
                )))
            }
        }
    }
    // No marks, or only `?`, means any type.
    if !types.exists() || types == TypeSet::of(ValueType::Null) {
        types.add_all();
    }
    Ok((types, name))
}

impl fmt::Display for StackEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ts in self.inputs.iter().rev() {
            write!(f, "{} ", ts)?;
        }
        f.write_str("--")?;
        for ts in self.outputs.iter().rev() {
            write!(f, " {}", ts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic() {
        let e = StackEffect::parse("a# b# -- c#").unwrap();
        assert_eq!(e.input_count(), 2);
        assert_eq!(e.output_count(), 1);
        assert_eq!(e.net(), -1);
        assert!(e.inputs()[0].can_be(ValueType::Number));
        assert!(!e.inputs()[0].can_be(ValueType::String));
    }

    #[test]
    fn parse_input_match() {
        // DUP: ( x -- x x )
        let e = StackEffect::parse("x -- x x").unwrap();
        assert_eq!(e.input_count(), 1);
        assert_eq!(e.output_count(), 2);
        assert_eq!(e.outputs()[0].input_match(), Some(0));
        assert_eq!(e.outputs()[1].input_match(), Some(0));

        // SWAP: ( x y -- y x ); inputs are stored top-first, so y is #0.
        let e = StackEffect::parse("x y -- y x").unwrap();
        assert_eq!(e.outputs()[0].input_match(), Some(1)); // x was below top
        assert_eq!(e.outputs()[1].input_match(), Some(0));
    }

    #[test]
    fn parse_types() {
        let e = StackEffect::parse("s$[] -- n#?").unwrap();
        let input = e.inputs()[0];
        assert!(input.can_be(ValueType::String));
        assert!(input.can_be(ValueType::Array));
        assert!(!input.can_be(ValueType::Number));
        let out = e.outputs()[0];
        assert!(out.can_be(ValueType::Number));
        assert!(out.can_be(ValueType::Null));
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            StackEffect::parse("a b"),
            Err(EffectError::BadAnnotation(_))
        ));
        assert!(matches!(
            StackEffect::parse("a ! -- b"),
            Err(EffectError::BadAnnotation(_))
        ));
    }

    #[test]
    fn then_composition() {
        let push = StackEffect::parse("-- #").unwrap();
        let add = StackEffect::parse("a# b# -- c#").unwrap();
        // push push add: ( -- # )
        let e = push.then(&push).unwrap().then(&add).unwrap();
        assert_eq!(e.input_count(), 0);
        assert_eq!(e.output_count(), 1);
        assert!(e.max() >= 2);
    }

    #[test]
    fn then_underflow() {
        let push = StackEffect::parse("-- #").unwrap();
        let add = StackEffect::parse("a# b# -- c#").unwrap();
        assert_eq!(push.then(&add), Err(EffectError::Underflow));
    }

    #[test]
    fn then_type_mismatch() {
        let push_str = StackEffect::parse("-- s$").unwrap();
        let abs = StackEffect::parse("n# -- m#").unwrap();
        assert_eq!(push_str.then(&abs), Err(EffectError::TypeMismatch));
    }

    #[test]
    fn net_and_max() {
        let e = StackEffect::parse("-- a b c").unwrap();
        assert_eq!(e.net(), 3);
        assert_eq!(e.max(), 3);
    }
}
