// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lowering of [`Rule`] bodies into symbolically-labelled cBPF.
//!
//! Boolean expressions are lowered in continuation-passing style: every
//! [`CompilerContext::compile_bool`] call takes a `jt`/`jf` pair of labels
//! and is responsible only for reaching one of them, never for producing a
//! truth value in `A`. This is the same shape the teacher's own `And`/`Or`
//! short-circuiting takes in its x86_64 conditional-branch lowering, just
//! generalized to seccomp's jump-table-free, two-target branch form.

use crate::ast::{ArithmeticOp, ComparisonOp, Expression, Numeric, Rule};
use crate::bpf;
use crate::syscalls;

use super::{CompileError, CompilerContext, Half, Label};

impl CompilerContext {
    fn invariant(&self, message: impl Into<String>) -> CompileError {
        CompileError::Invariant {
            syscall: self.current_syscall.clone(),
            message: message.into(),
        }
    }

    /// Lowers one rule: a syscall-number gate, followed by its body.
    ///
    /// A rule only ever constrains outcomes for its own syscall; when the
    /// gate fails, control falls through to whatever rule (or the default
    /// KILL trailer) follows. [`Expression::BooleanLiteral`] bodies are
    /// special-cased to skip generating any conditional code for the body
    /// at all — the gate's own branch targets ALLOW or KILL directly.
    pub(super) fn compile_rule(&mut self, rule: &Rule) -> Result<(), CompileError> {
        self.current_syscall = rule.name.clone();
        let id = syscalls::lookup(&rule.name)
            .ok_or_else(|| self.invariant(format!("unrecognized syscall `{}`", rule.name)))?;

        let next = self.new_label();
        self.load_at(bpf::SYSCALL_NR_OFFSET)?;

        match &rule.body {
            Expression::BooleanLiteral(true) => {
                self.emit_branch(bpf::JEQ_K, id, Label::Positive, next)?;
            }
            Expression::BooleanLiteral(false) => {
                self.emit_branch(bpf::JEQ_K, id, Label::Negative, next)?;
            }
            body => {
                let matched = self.new_label();
                self.emit_branch(bpf::JEQ_K, id, matched, next)?;
                self.label_here(matched);
                self.compile_bool(body, Label::Positive, Label::Negative)?;
            }
        }

        self.label_here(next);
        Ok(())
    }

    /// Lowers a boolean expression so that control reaches `jt` when it
    /// holds and `jf` when it doesn't. Never falls through past either.
    fn compile_bool(&mut self, expr: &Expression, jt: Label, jf: Label) -> Result<(), CompileError> {
        match expr {
            Expression::BooleanLiteral(true) => self.emit_jump_always(jt),
            Expression::BooleanLiteral(false) => self.emit_jump_always(jf),
            Expression::And(left, right) => {
                let mid = self.new_label();
                self.compile_bool(left, mid, jf)?;
                self.label_here(mid);
                self.compile_bool(right, jt, jf)
            }
            Expression::Or(left, right) => {
                let mid = self.new_label();
                self.compile_bool(left, jt, mid)?;
                self.label_here(mid);
                self.compile_bool(right, jt, jf)
            }
            Expression::Negation(inner) => self.compile_bool(inner, jf, jt),
            Expression::Comparison(op, left, right) => {
                self.compile_comparison(*op, left, right, jt, jf)
            }
            Expression::Inclusion {
                positive,
                left,
                rights,
            } => self.compile_inclusion(*positive, left, rights, jt, jf),
        }
    }

    fn compile_comparison(
        &mut self,
        op: ComparisonOp,
        left: &Numeric,
        right: &Numeric,
        jt: Label,
        jf: Label,
    ) -> Result<(), CompileError> {
        match op {
            ComparisonOp::Eql => self.compile_eq(left, right, jt, jf),
            ComparisonOp::Neql => self.compile_eq(left, right, jf, jt),
            ComparisonOp::Gt => self.compile_ordered(true, left, right, jt, jf),
            ComparisonOp::Gte => self.compile_ordered(false, left, right, jt, jf),
            // a < b  ==  b > a;  a <= b  ==  b >= a.
            ComparisonOp::Lt => self.compile_ordered(true, right, left, jt, jf),
            ComparisonOp::Lte => self.compile_ordered(false, right, left, jt, jf),
        }
    }

    /// Two-stage 64-bit equality: high halves must match, then low halves.
    fn compile_eq(
        &mut self,
        left: &Numeric,
        right: &Numeric,
        jt: Label,
        jf: Label,
    ) -> Result<(), CompileError> {
        let lo_stage = self.new_label();
        self.emit_compare_half(left, right, Half::High, bpf::JEQ_K, bpf::JEQ_X, lo_stage, jf)?;
        self.label_here(lo_stage);
        self.emit_compare_half(left, right, Half::Low, bpf::JEQ_K, bpf::JEQ_X, jt, jf)
    }

    /// `left > right` (`strict`) or `left >= right`, as unsigned 64-bit
    /// values staged over two 32-bit halves.
    ///
    /// The high halves decide the comparison outright unless they're
    /// equal, in which case the low halves (compared with the real
    /// operator) break the tie. That's three outcomes from two-valued
    /// branches, so the high stage runs twice: once asking "strictly
    /// greater" (settles the `true` case), once asking "equal" (settles
    /// whether to even look at the low halves). The second load is elided
    /// whenever the first pinned `A` to a literal operand's offset.
    fn compile_ordered(
        &mut self,
        strict: bool,
        left: &Numeric,
        right: &Numeric,
        jt: Label,
        jf: Label,
    ) -> Result<(), CompileError> {
        let hi_tied = self.new_label();
        self.emit_compare_half(left, right, Half::High, bpf::JGT_K, bpf::JGT_X, jt, hi_tied)?;
        self.label_here(hi_tied);

        let lo_stage = self.new_label();
        self.emit_compare_half(left, right, Half::High, bpf::JEQ_K, bpf::JEQ_X, lo_stage, jf)?;
        self.label_here(lo_stage);

        let (op_k, op_x) = if strict {
            (bpf::JGT_K, bpf::JGT_X)
        } else {
            (bpf::JGE_K, bpf::JGE_X)
        };
        self.emit_compare_half(left, right, Half::Low, op_k, op_x, jt, jf)
    }

    /// `left ∈ rights` (`positive`) or `left ∉ rights`, as a short-circuit
    /// chain of pairwise equalities — an `Or` over `rights.len()`
    /// equality comparisons, De Morgan'd into an `And` when `!positive`.
    ///
    /// When every candidate is a literal and they all share the same high
    /// half, that half only needs checking once: a mismatch there rules out
    /// every candidate simultaneously, so [`Self::compile_inclusion_shared_hi`]
    /// folds the whole set down to one high-half check followed by a chain
    /// of low-half-only comparisons. That shortcut is unsound the moment a
    /// candidate's high half isn't statically known to agree with the
    /// others (an `Argument`, or a literal above `u32::MAX` mixed with one
    /// that isn't), so anything that doesn't fit is lowered as a fully
    /// independent two-stage equality per candidate instead.
    fn compile_inclusion(
        &mut self,
        positive: bool,
        left: &Numeric,
        rights: &[Numeric],
        jt: Label,
        jf: Label,
    ) -> Result<(), CompileError> {
        let (on_match, on_miss) = if positive { (jt, jf) } else { (jf, jt) };

        let Some((last, rest)) = rights.split_last() else {
            // An empty set is never a member of, so membership is always
            // false and non-membership always true.
            return self.emit_jump_always(on_miss);
        };

        if let Some((shared_hi, los)) = Self::shared_literal_high_half(rights) {
            return self.compile_inclusion_shared_hi(left, shared_hi, &los, on_match, on_miss);
        }

        for candidate in rest {
            let next = self.new_label();
            self.compile_eq(left, candidate, on_match, next)?;
            self.label_here(next);
        }
        self.compile_eq(left, last, on_match, on_miss)
    }

    /// The high half every element of `rights` shares, together with each
    /// element's low half in `rights` order, if `rights` is non-empty and
    /// every element is a literal whose high half equals the others'.
    /// `None` the moment any element is dynamic (an `Argument` or an
    /// `Arithmetic` result, neither of which has a statically known low
    /// half) or the literals' high halves disagree.
    fn shared_literal_high_half(rights: &[Numeric]) -> Option<(u32, Vec<u32>)> {
        let mut los = Vec::with_capacity(rights.len());
        let mut shared_hi = None;
        for right in rights {
            let Numeric::NumericLiteral(value) = right else {
                return None;
            };
            let hi = (*value >> 32) as u32;
            match shared_hi {
                None => shared_hi = Some(hi),
                Some(expected) if expected != hi => return None,
                Some(_) => {}
            }
            los.push(*value as u32);
        }
        shared_hi.map(|hi| (hi, los))
    }

    /// Fast path for an `Inclusion` whose candidates are all literals
    /// sharing one high half: load `left`'s high half and check it against
    /// `shared_hi` exactly once (a mismatch settles `on_miss` without
    /// looking at any candidate's low half), then load `left`'s low half
    /// once and chain it through a plain immediate comparison per
    /// candidate, reusing that one load across the whole chain.
    fn compile_inclusion_shared_hi(
        &mut self,
        left: &Numeric,
        shared_hi: u32,
        los: &[u32],
        on_match: Label,
        on_miss: Label,
    ) -> Result<(), CompileError> {
        let lo_chain = self.new_label();
        self.load_operand(left, Half::High)?;
        self.emit_branch(bpf::JEQ_K, shared_hi, lo_chain, on_miss)?;
        self.label_here(lo_chain);

        self.load_operand(left, Half::Low)?;
        let Some((last_lo, rest_los)) = los.split_last() else {
            return self.emit_jump_always(on_miss);
        };
        for &lo in rest_los {
            let next = self.new_label();
            self.emit_branch(bpf::JEQ_K, lo, on_match, next)?;
            self.label_here(next);
        }
        self.emit_branch(bpf::JEQ_K, *last_lo, on_match, on_miss)
    }

    /// Loads one 32-bit half of a comparison against `right`'s
    /// corresponding half, taken as an immediate when statically known or
    /// staged through `X` otherwise.
    fn emit_compare_half(
        &mut self,
        left: &Numeric,
        right: &Numeric,
        half: Half,
        op_k: u16,
        op_x: u16,
        jt: Label,
        jf: Label,
    ) -> Result<(), CompileError> {
        self.load_operand(left, half)?;
        match Self::const_half(right, half) {
            Some(k) => self.emit_branch(op_k, k, jt, jf)?,
            None => {
                self.push_a()?;
                self.load_operand(right, half)?;
                self.move_a_to_x()?;
                self.pop_a()?;
                self.emit_branch(op_x, 0, jt, jf)?;
            }
        }
        Ok(())
    }

    /// The statically-known value of one half of `n`, if any. `Argument`
    /// is always dynamic in both halves; `Arithmetic` is dynamic only in
    /// its low half, since cBPF's ALU has no 64-bit support and so any
    /// computed value's high half is always zero.
    fn const_half(n: &Numeric, half: Half) -> Option<u32> {
        match (n, half) {
            (Numeric::NumericLiteral(v), Half::High) => Some((*v >> 32) as u32),
            (Numeric::NumericLiteral(v), Half::Low) => Some(*v as u32),
            (Numeric::Arithmetic(..), Half::High) => Some(0),
            (Numeric::Arithmetic(..), Half::Low) | (Numeric::Argument(_), _) => None,
        }
    }

    /// Loads one 32-bit half of `n` into `A`.
    fn load_operand(&mut self, n: &Numeric, half: Half) -> Result<(), CompileError> {
        match (n, half) {
            (Numeric::NumericLiteral(v), Half::High) => self.load_literal((*v >> 32) as u32),
            (Numeric::NumericLiteral(v), Half::Low) => self.load_literal(*v as u32),
            (Numeric::Argument(index), Half::High) => self.load_at(bpf::arg_hi_offset(*index)),
            (Numeric::Argument(index), Half::Low) => self.load_at(bpf::arg_lo_offset(*index)),
            (Numeric::Arithmetic(..), Half::High) => self.load_literal(0),
            (Numeric::Arithmetic(op, left, right), Half::Low) => {
                self.compile_arithmetic(*op, left, right)
            }
        }
    }

    /// Evaluates an arithmetic expression into `A`, using only the low 32
    /// bits of any `Argument` operand (cBPF's ALU class is 32-bit only).
    /// A literal right operand folds into the instruction's immediate
    /// form; otherwise the left operand is saved to scratch while the
    /// right is evaluated, then restored before the `X`-form op runs.
    fn compile_arithmetic(
        &mut self,
        op: ArithmeticOp,
        left: &Numeric,
        right: &Numeric,
    ) -> Result<(), CompileError> {
        let (op_k, op_x) = alu_opcodes(op);
        self.load_operand(left, Half::Low)?;
        if let Numeric::NumericLiteral(v) = right {
            self.emit(bpf::stmt(op_k, *v as u32))?;
        } else {
            self.push_a()?;
            self.load_operand(right, Half::Low)?;
            self.move_a_to_x()?;
            self.pop_a()?;
            self.emit(bpf::stmt(op_x, 0))?;
        }
        self.currently_loaded = None;
        Ok(())
    }
}

fn alu_opcodes(op: ArithmeticOp) -> (u16, u16) {
    match op {
        ArithmeticOp::Plus => (bpf::ADD_K, bpf::ADD_X),
        ArithmeticOp::Minus => (bpf::SUB_K, bpf::SUB_X),
        ArithmeticOp::Mult => (bpf::MUL_K, bpf::MUL_X),
        ArithmeticOp::Div => (bpf::DIV_K, bpf::DIV_X),
        ArithmeticOp::Mod => (bpf::MOD_K, bpf::MOD_X),
        ArithmeticOp::BinAnd => (bpf::AND_K, bpf::AND_X),
        ArithmeticOp::BinOr => (bpf::OR_K, bpf::OR_X),
        ArithmeticOp::BinXor => (bpf::XOR_K, bpf::XOR_X),
        ArithmeticOp::Lsh => (bpf::LSH_K, bpf::LSH_X),
        ArithmeticOp::Rsh => (bpf::RSH_K, bpf::RSH_X),
    }
}
