// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The validity/type checker.
//!
//! Walks a [`Policy`] and certifies it is well-formed before the generator
//! ever sees it: no duplicate rule names, every name resolves through the
//! syscall oracle, and every rule body is well-typed. The checker never
//! mutates the policy and never short-circuits: it collects one error per
//! offending rule and keeps going, so a caller can report every problem in
//! a policy at once instead of fixing it one rule at a time.

use std::collections::HashSet;

use crate::ast::{Expression, Policy, Rule};
use crate::syscalls;

/// The inferred type of an expression node.
///
/// Because [`Expression`] and [`Numeric`](crate::ast::Numeric) are distinct
/// Rust types, a comparison or inclusion operand that isn't numeric, or an
/// `And`/`Or`/`Negation` operand that isn't boolean, cannot be constructed
/// in the first place — the shape errors spec.md's checker describes are
/// ruled out statically. `Type::infer` still walks the tree and this module
/// still reports [`CheckError::TypeMismatch`] in its public surface (the
/// checker's contract includes it, and an embedder may grow a looser AST
/// later), but for this AST the type pass can never actually fail; see
/// DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Boolean,
    Numeric,
}

impl Type {
    /// Infers the type of a boolean expression. Every [`Expression`]
    /// variant is boolean by construction; this exists to mirror spec.md's
    /// checker structure rather than to ever reject a typed value.
    fn infer(expr: &Expression) -> Type {
        match expr {
            Expression::BooleanLiteral(_)
            | Expression::And(_, _)
            | Expression::Or(_, _)
            | Expression::Negation(_)
            | Expression::Comparison(_, _, _)
            | Expression::Inclusion { .. } => Type::Boolean,
        }
    }
}

/// One validity/type error, tagged with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum CheckError {
    /// {syscall}: duplicate
    Duplicate { syscall: String },
    /// {syscall}: invalid syscall
    UnknownSyscall { syscall: String },
    /// {syscall}: type mismatch in {context} (expected {expected:?}, found {found:?})
    TypeMismatch {
        syscall: String,
        context: &'static str,
        expected: Type,
        found: Type,
    },
}

impl CheckError {
    /// The syscall name of the rule that produced this error.
    pub fn syscall(&self) -> &str {
        match self {
            CheckError::Duplicate { syscall }
            | CheckError::UnknownSyscall { syscall }
            | CheckError::TypeMismatch { syscall, .. } => syscall,
        }
    }
}

/// Checks a policy and returns every error found, in rule order.
///
/// For a given rule, at most one error is reported, in priority order:
/// duplicate name, then unknown syscall, then type mismatch — matching
/// spec.md §4.2. This function never mutates `policy`.
#[tracing::instrument(level = "debug", skip(policy), fields(rules = policy.rules.len()))]
pub fn check(policy: &Policy) -> Vec<CheckError> {
    let mut seen = HashSet::new();
    let mut errors = Vec::new();

    for rule in &policy.rules {
        if let Some(error) = check_rule(rule, &mut seen) {
            tracing::debug!(syscall = %rule.name, %error, "rule failed validation");
            errors.push(error);
        }
    }

    errors
}

fn check_rule(rule: &Rule, seen: &mut HashSet<String>) -> Option<CheckError> {
    if !seen.insert(rule.name.clone()) {
        return Some(CheckError::Duplicate {
            syscall: rule.name.clone(),
        });
    }

    if syscalls::lookup(&rule.name).is_none() {
        return Some(CheckError::UnknownSyscall {
            syscall: rule.name.clone(),
        });
    }

    match Type::infer(&rule.body) {
        Type::Boolean => None,
        found => Some(CheckError::TypeMismatch {
            syscall: rule.name.clone(),
            context: "rule body",
            expected: Type::Boolean,
            found,
        }),
    }
}
