//! The stack-effect checker
//!
//! A forward abstract interpretation over the compiler's source-word
//! list. The abstract stack holds, per slot, either a set of possible
//! types or an actual literal value (literals are what let `IFELSE` see
//! real quotes). Both successors of a conditional branch are walked;
//! states are memoized at branch destinations and joined by unioning
//! types slot-wise. Every failure the VM could otherwise hit (underflow,
//! type confusion, inconsistent join depths, wrong result counts) is
//! reported here, with the source position of the offending word.
//!
//! The checker also resolves parameters the front ends leave abstract:
//! `_GETARG`/`_SETARG` offsets become sp-relative, and a `_DROPARGS`
//! epilogue with an undetermined result count gets the deduced one.

use crate::compiler::{returns_immediately, SourceWord, RESULTS_TBD};
use crate::error::{CompileError, ErrorKind, Result};
use tails_core::words::op_word;
use tails_core::{Opcode, Param, StackEffect, TypeSet, Value, ValueType, UNKNOWN_MAX};

/// One abstract stack slot: a known literal or a set of possible types.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypeItem {
    Literal(Value),
    Types(TypeSet),
}

impl TypeItem {
    fn types(&self) -> TypeSet {
        match self {
            TypeItem::Literal(v) => TypeSet::of(v.type_of()),
            TypeItem::Types(t) => t.types(),
        }
    }

    fn union(&self, other: &TypeItem) -> TypeItem {
        if self == other {
            self.clone()
        } else {
            TypeItem::Types(self.types() | other.types())
        }
    }
}

/// Simulates the runtime stack at compile time.
#[derive(Debug, Clone)]
pub(crate) struct EffectStack {
    stack: Vec<TypeItem>,
    initial_depth: usize,
    max_depth: usize,
    max_unknown: bool,
}

// Join memoization compares stack contents only; depth extremes are
// folded separately.
impl PartialEq for EffectStack {
    fn eq(&self, other: &Self) -> bool {
        self.stack == other.stack
    }
}

impl EffectStack {
    fn from_effect(effect: &StackEffect) -> EffectStack {
        let stack: Vec<TypeItem> = effect
            .inputs()
            .iter()
            .rev()
            .map(|ts| TypeItem::Types(ts.types()))
            .collect();
        let depth = stack.len();
        EffectStack {
            stack,
            initial_depth: depth,
            max_depth: depth,
            max_unknown: false,
        }
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn max_growth(&self) -> usize {
        self.max_depth - self.initial_depth
    }

    /// Slot at depth `i`; 0 is the top of the stack.
    fn at(&self, i: usize) -> Result<&TypeItem> {
        if i >= self.stack.len() {
            return Err(CompileError::underflow("stack underflow"));
        }
        Ok(&self.stack[self.stack.len() - 1 - i])
    }

    fn literal_at(&self, i: usize) -> Option<&Value> {
        match self.at(i) {
            Ok(TypeItem::Literal(v)) => Some(v),
            _ => None,
        }
    }

    fn push(&mut self, item: TypeItem) {
        self.stack.push(item);
        self.max_depth = self.max_depth.max(self.stack.len());
    }

    fn pop(&mut self) -> Result<TypeItem> {
        self.stack
            .pop()
            .ok_or_else(|| CompileError::underflow("stack underflow"))
    }

    fn set_type_at(&mut self, i: usize, types: TypeSet) {
        let idx = self.stack.len() - 1 - i;
        self.stack[idx] = TypeItem::Types(types);
    }

    /// Emulates `_ROTn`: positive `n` lifts the item at depth `n` to the
    /// top, negative `n` buries the top at depth `-n`.
    fn rotate(&mut self, n: i16) -> Result<()> {
        let depth = self.depth();
        if (n.unsigned_abs() as usize) >= depth {
            return Err(CompileError::underflow("stack underflow"));
        }
        if n > 0 {
            let item = self.stack.remove(depth - 1 - n as usize);
            self.stack.push(item);
        } else if n < 0 {
            let item = self.pop()?;
            let idx = self.stack.len() - (-n) as usize;
            self.stack.insert(idx, item);
        }
        Ok(())
    }

    /// Inserts a deduced input below everything else.
    fn add_at_bottom(&mut self, types: TypeSet) {
        self.stack.insert(0, TypeItem::Types(types));
        self.initial_depth += 1;
        self.max_depth += 1;
    }

    /// Removes the slots at depths `[begin, end)` (0 = top).
    fn erase(&mut self, begin: usize, end: usize) -> Result<()> {
        if end > self.stack.len() {
            return Err(CompileError::underflow("stack underflow"));
        }
        let len = self.stack.len();
        self.stack.drain(len - end..len - begin);
        Ok(())
    }

    /// Applies a word's stack effect: checks the inputs on the abstract
    /// stack, then replaces them with the outputs. Input-matched outputs
    /// copy the actual consumed item, so literals and narrowed types flow
    /// through polymorphic words.
    fn apply(&mut self, name: &str, effect: &StackEffect) -> Result<()> {
        let n = effect.input_count();
        if n > self.depth() {
            return Err(CompileError::underflow(format!(
                "calling `{}` would underflow ({} needed, {} available)",
                name,
                n,
                self.depth()
            )));
        }
        for i in 0..n {
            let bad = self.at(i)?.types() - effect.inputs()[i];
            if bad.exists() {
                return Err(CompileError::type_mismatch(format!(
                    "type mismatch passing {} to `{}` (depth {})",
                    bad, name, i
                )));
            }
        }

        let mut consumed = Vec::with_capacity(n);
        for i in 0..n {
            consumed.push(self.at(i)?.clone());
        }

        if effect.max_is_unknown() {
            self.max_unknown = true;
        } else {
            self.max_depth = self.max_depth.max(self.depth() + effect.max() as usize);
        }

        let len = self.stack.len();
        self.stack.truncate(len - n);
        for i in (0..effect.output_count()).rev() {
            let out = effect.outputs()[i];
            match out.input_match() {
                Some(k) if k < n => self.push(consumed[k].clone()),
                _ => self.push(TypeItem::Types(out.types())),
            }
        }
        Ok(())
    }

    /// Joins this state with another at a control-flow merge.
    fn merge_with(&mut self, other: &EffectStack) -> Result<()> {
        if self.depth() != other.depth() {
            return Err(CompileError::new(
                ErrorKind::InconsistentStack,
                "inconsistent stack depth",
            ));
        }
        for (mine, theirs) in self.stack.iter_mut().zip(other.stack.iter()) {
            *mine = mine.union(theirs);
        }
        self.max_depth = self.max_depth.max(other.max_depth);
        self.max_unknown |= other.max_unknown;
        Ok(())
    }

    /// Validates the stack at a `_RETURN` against the declared outputs,
    /// or (when allowed) widens the declaration to match.
    fn check_outputs(&self, effect: &mut StackEffect, can_add_outputs: bool) -> Result<()> {
        let declared = effect.output_count();
        let depth = self.depth();
        if declared > depth {
            return Err(CompileError::new(
                ErrorKind::WrongResultCount,
                format!("insufficient outputs: have {}, declared {}", depth, declared),
            ));
        }
        if can_add_outputs {
            for i in 0..declared {
                effect.outputs_mut()[i] = effect.outputs()[i].types() | self.at(i)?.types();
            }
            for i in declared..depth {
                effect.add_output_at_bottom(self.at(i)?.types());
            }
        } else {
            for i in 0..declared {
                let bad = self.at(i)?.types() - effect.outputs()[i];
                if bad.exists() {
                    return Err(CompileError::type_mismatch(format!(
                        "output type mismatch: cannot return {} as {} (depth {})",
                        bad,
                        effect.outputs()[i].types(),
                        i
                    )));
                }
            }
            if depth > declared {
                return Err(CompileError::new(
                    ErrorKind::WrongResultCount,
                    format!("too many outputs: have {}, declared {}", depth, declared),
                ));
            }
        }
        Ok(())
    }
}

/// Shared state for one check run.
pub(crate) struct CheckContext<'a> {
    effect: &'a mut StackEffect,
    can_add_inputs: bool,
    can_add_outputs: bool,
    locals_count: usize,
    is_inline: bool,
    max: usize,
    max_unknown: bool,
}

impl<'a> CheckContext<'a> {
    pub(crate) fn new(
        effect: &'a mut StackEffect,
        can_add_inputs: bool,
        can_add_outputs: bool,
        locals_count: usize,
        is_inline: bool,
    ) -> CheckContext<'a> {
        CheckContext {
            effect,
            can_add_inputs,
            can_add_outputs,
            locals_count,
            is_inline,
            max: 0,
            max_unknown: false,
        }
    }

    /// The word's peak stack growth, as observed across all paths.
    pub(crate) fn final_max(&self) -> u16 {
        if self.max_unknown {
            UNKNOWN_MAX
        } else {
            self.max.min(UNKNOWN_MAX as usize - 1) as u16
        }
    }
}

/// Checks a finished source-word list, starting with the declared inputs
/// on the abstract stack.
pub(crate) fn check(words: &mut [SourceWord], ctx: &mut CheckContext) -> Result<()> {
    let initial = EffectStack::from_effect(ctx.effect);
    let mut memo: Vec<Option<EffectStack>> = vec![None; words.len()];
    walk(words, 0, initial, &mut memo, ctx)
}

fn walk(
    words: &mut [SourceWord],
    start: usize,
    mut cur: EffectStack,
    memo: &mut Vec<Option<EffectStack>>,
    ctx: &mut CheckContext,
) -> Result<()> {
    let mut i = start;
    loop {
        if words[i].is_branch_destination {
            match &memo[i] {
                Some(known) if *known == cur => {
                    // This control path has already been analyzed.
                    fold_max(ctx, &cur);
                    return Ok(());
                }
                Some(known) => {
                    cur.merge_with(known)
                        .map_err(|e| e.with_position(words[i].source_pos))?;
                    memo[i] = Some(cur.clone());
                }
                None => memo[i] = Some(cur.clone()),
            }
        }

        let op = words[i].opcode();
        apply_one(words, i, &mut cur, ctx).map_err(|e| e.with_position(words[i].source_pos))?;

        match op {
            Some(Opcode::Return) => {
                cur.check_outputs(ctx.effect, ctx.can_add_outputs)
                    .map_err(|e| e.with_position(words[i].source_pos))?;
                ctx.can_add_outputs = false;
                fold_max(ctx, &cur);
                return Ok(());
            }
            Some(Opcode::Branch) => {
                i = words[i].branch_to.expect("unresolved branch target");
            }
            Some(Opcode::ZBranch) => {
                let dst = words[i].branch_to.expect("unresolved branch target");
                // Follow the fall-through case, then the branch.
                walk(words, i + 1, cur.clone(), memo, ctx)?;
                i = dst;
            }
            _ => i += 1,
        }
    }
}

fn fold_max(ctx: &mut CheckContext, cur: &EffectStack) {
    ctx.max = ctx.max.max(cur.max_growth());
    ctx.max_unknown |= cur.max_unknown;
}

fn apply_one(
    words: &mut [SourceWord],
    i: usize,
    cur: &mut EffectStack,
    ctx: &mut CheckContext,
) -> Result<()> {
    let Some(op) = words[i].opcode() else {
        // Call to an interpreted word: its declared effect applies.
        let word = words[i].word.clone();
        let effect = word
            .effect()
            .expect("compiled words always declare an effect")
            .clone();
        return apply_default(word.name().unwrap_or("<anon>"), &effect, cur, ctx);
    };

    match op {
        Opcode::Return | Opcode::Branch | Opcode::Nop => Ok(()),

        Opcode::Literal => {
            if let Param::Literal(v) = &words[i].param {
                cur.push(TypeItem::Literal(v.clone()));
            }
            Ok(())
        }
        Opcode::Int => {
            if let Param::Int(n) = words[i].param {
                cur.push(TypeItem::Literal(Value::Number(n as f64)));
            }
            Ok(())
        }

        Opcode::RotN => cur.rotate(words[i].param_offset()),
        Opcode::Locals => {
            for _ in 0..words[i].param_offset() {
                // Locals start typeless; the first assignment types them.
                cur.push(TypeItem::Types(TypeSet::none()));
            }
            Ok(())
        }

        Opcode::GetArg | Opcode::SetArg => check_get_set_arg(words, i, cur, ctx),
        Opcode::DropArgs => check_drop_args(words, i, cur, ctx),
        Opcode::Recurse => check_recurse(words, i, cur, ctx),
        Opcode::IfElse => check_ifelse(cur, ctx),
        Opcode::Plus => check_plus(cur, ctx),

        Opcode::Interp | Opcode::TailInterp | Opcode::Call => Err(CompileError::syntax(format!(
            "`{}` cannot be stack-checked",
            words[i].word.name().unwrap_or("?")
        ))),

        _ => {
            let def = op_word(op);
            let effect = def
                .effect
                .as_ref()
                .ok_or_else(|| {
                    CompileError::syntax(format!("stack effect of `{}` is not known", def.name))
                })?
                .clone();
            apply_default(def.name, &effect, cur, ctx)
        }
    }
}

/// The common case: check and apply a declared effect. When the unit may
/// deduce its inputs (quotations, Forth top level), missing inputs are
/// appended to the declaration instead of failing.
fn apply_default(
    name: &str,
    effect: &StackEffect,
    cur: &mut EffectStack,
    ctx: &mut CheckContext,
) -> Result<()> {
    deduce_inputs(effect, cur, ctx);
    cur.apply(name, effect)
}

/// When the unit's inputs are still open (quotations, Forth top level),
/// a word reaching deeper than the current stack adds its missing inputs
/// to the unit's declaration.
fn deduce_inputs(effect: &StackEffect, cur: &mut EffectStack, ctx: &mut CheckContext) {
    if !ctx.can_add_inputs {
        return;
    }
    let needed = effect.input_count();
    let mut avail = cur.depth();
    while avail < needed {
        let entry = effect.inputs()[avail].types();
        cur.add_at_bottom(entry);
        ctx.effect.add_input_at_bottom(entry);
        avail += 1;
    }
}

impl SourceWord {
    fn param_offset(&self) -> i16 {
        match self.param {
            Param::Offset(o) => o,
            _ => 0,
        }
    }
}

/// `_GETARG`/`_SETARG`: type-check the access and rewrite the authored
/// offset (argument index or 1-based local number) into the sp-relative
/// offset the VM uses.
fn check_get_set_arg(
    words: &mut [SourceWord],
    i: usize,
    cur: &mut EffectStack,
    ctx: &mut CheckContext,
) -> Result<()> {
    let authored = words[i].param_offset();
    let is_get = words[i].opcode() == Some(Opcode::GetArg);
    let depth = cur.depth() as i32;
    let input_count = ctx.effect.input_count() as i32;
    let rewritten = authored as i32 - (depth - input_count);

    if authored <= 0 {
        // Function argument #(-authored), counted from the top at entry.
        let idx = (-authored) as usize;
        if idx >= ctx.effect.input_count() {
            return Err(CompileError::syntax("argument index out of range"));
        }
        let param_type = ctx.effect.inputs()[idx].types();
        if is_get {
            cur.push(TypeItem::Types(param_type));
        } else {
            let value = cur.at(0)?.types();
            if (value - param_type).exists() {
                return Err(CompileError::type_mismatch(
                    "type mismatch assigning to argument",
                ));
            }
            cur.pop()?;
        }
    } else {
        // Local variable; pre-pop depth of its slot. A non-negative
        // rewritten offset would mean the slot has been consumed.
        if rewritten > 0 || (!is_get && rewritten == 0) {
            return Err(CompileError::underflow(
                "local variable slot is no longer on the stack",
            ));
        }
        let slot_depth = (-rewritten) as usize;
        if is_get {
            let item = cur.at(slot_depth)?.clone();
            if !item.types().exists() {
                return Err(CompileError::type_mismatch(
                    "reading local before it's assigned a value",
                ));
            }
            cur.push(item);
        } else {
            let value = cur.at(0)?.types();
            let local = cur.at(slot_depth)?.types();
            if local.exists() {
                if (value - local).exists() {
                    return Err(CompileError::type_mismatch(
                        "type mismatch assigning to local",
                    ));
                }
            } else {
                cur.set_type_at(slot_depth, value);
            }
            cur.pop()?;
        }
    }

    words[i].resolved = Some(Param::Offset(rewritten as i16));
    Ok(())
}

/// `_DROPARGS`: validate (or deduce) the result count and collapse the
/// frame on the abstract stack.
fn check_drop_args(
    words: &mut [SourceWord],
    i: usize,
    cur: &mut EffectStack,
    ctx: &mut CheckContext,
) -> Result<()> {
    let (locals, declared_results) = match words[i].param {
        Param::Drop { locals, results } => (locals, results),
        _ => return Err(CompileError::syntax("_DROPARGS without counts")),
    };
    let actual = cur.depth() as i32 - cur.initial_depth as i32 - ctx.locals_count as i32;
    if actual < 0 {
        return Err(CompileError::underflow("stack underflow at word exit"));
    }
    let results = if declared_results == RESULTS_TBD {
        actual as u8
    } else {
        if actual != declared_results as i32 {
            return Err(CompileError::new(
                ErrorKind::WrongResultCount,
                format!("should return {} values, not {}", declared_results, actual),
            ));
        }
        declared_results
    };
    words[i].resolved = Some(Param::Drop { locals, results });
    cur.erase(results as usize, results as usize + locals as usize)
}

/// `_RECURSE` needs a declared effect; non-tail recursion makes the peak
/// stack depth unknowable.
fn check_recurse(
    words: &mut [SourceWord],
    i: usize,
    cur: &mut EffectStack,
    ctx: &mut CheckContext,
) -> Result<()> {
    if ctx.can_add_inputs || ctx.can_add_outputs {
        return Err(CompileError::syntax(
            "RECURSE requires an explicit stack effect declaration",
        ));
    }
    let mut effect = ctx.effect.clone();
    if !(i + 1 < words.len() && returns_immediately(words, i + 1)) {
        if ctx.is_inline {
            return Err(CompileError::syntax("illegal recursion in an inline word"));
        }
        effect = effect.with_unknown_max();
    }
    apply_default("_RECURSE", &effect, cur, ctx)
}

/// `+` is polymorphic over numbers, strings, and arrays, but both
/// operands must share a type: `"abc" 1 +` has no meaning.
fn check_plus(cur: &mut EffectStack, ctx: &mut CheckContext) -> Result<()> {
    let def = op_word(Opcode::Plus);
    let effect = def.effect.as_ref().expect("+ declares an effect").clone();
    deduce_inputs(&effect, cur, ctx);
    if cur.depth() >= 2 {
        let common = cur.at(0)?.types() & cur.at(1)?.types();
        if !common.exists() {
            return Err(CompileError::type_mismatch(format!(
                "type mismatch: cannot add {} to {}",
                cur.at(0)?.types(),
                cur.at(1)?.types()
            )));
        }
    }
    cur.apply(def.name, &effect)
}

/// `IFELSE` demands two literal quotes whose effects can be unified;
/// anything else is rejected.
fn check_ifelse(cur: &mut EffectStack, ctx: &mut CheckContext) -> Result<()> {
    let quote_effect = |pos: usize| -> Result<StackEffect> {
        match cur.literal_at(pos) {
            Some(Value::Quote(w)) => Ok(w.effect().clone()),
            _ => Err(CompileError::syntax(
                "IFELSE must be preceded by two quotations",
            )),
        }
    };
    let a = quote_effect(1)?;
    let b = quote_effect(0)?;
    if a.net() != b.net() {
        return Err(CompileError::new(
            ErrorKind::InconsistentStack,
            "IFELSE quotes have inconsistent stack depths",
        ));
    }

    let mut op_effect = a.clone();
    for inp in 0..b.input_count() {
        let entry = b.inputs()[inp].types();
        if inp < op_effect.input_count() {
            let merged = entry & op_effect.inputs()[inp];
            if !merged.exists() {
                return Err(CompileError::type_mismatch(format!(
                    "IFELSE quotes have incompatible parameter #{}",
                    inp
                )));
            }
            op_effect.inputs_mut()[inp] = merged;
        } else {
            op_effect.add_input_at_bottom(entry);
        }
    }
    for out in 0..b.output_count() {
        let entry = b.outputs()[out].types();
        if out < op_effect.output_count() {
            op_effect.outputs_mut()[out] = op_effect.outputs()[out].types() | entry;
        } else {
            op_effect.add_output_at_bottom(entry);
        }
    }

    // IFELSE's own inputs: the test and the two quotes.
    op_effect.add_input(TypeSet::any());
    op_effect.add_input(TypeSet::of(ValueType::Quote));
    op_effect.add_input(TypeSet::of(ValueType::Quote));

    let max = if a.max_is_unknown() || b.max_is_unknown() {
        UNKNOWN_MAX
    } else {
        a.max().max(b.max()).saturating_sub(3)
    };
    let op_effect = op_effect.with_max(max);
    apply_default("IFELSE", &op_effect, cur, ctx)
}
