// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The policy AST.
//!
//! Everything here is assumed to already be simplified and unified by an
//! upstream collaborator: no free variables, no unresolved macro calls.
//! This crate only checks and lowers what it is handed.

use serde::{Deserialize, Serialize};

/// An ordered sequence of rules. Order is significant: the first rule
/// matching the syscall decides the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub rules: Vec<Rule>,
}

/// One rule: the syscall it applies to, and the boolean expression over its
/// arguments that must hold for the syscall to be allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub body: Expression,
}

/// A boolean-valued expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    BooleanLiteral(bool),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Negation(Box<Expression>),
    Comparison(ComparisonOp, Numeric, Numeric),
    /// `left ∈ rights` when `positive`, `left ∉ rights` otherwise.
    Inclusion {
        positive: bool,
        left: Numeric,
        rights: Vec<Numeric>,
    },
}

/// A comparison operator. Operands are treated as unsigned 64-bit values;
/// signed comparisons are not part of this language (see spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eql,
    Neql,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A numeric-valued expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Numeric {
    NumericLiteral(u64),
    /// A syscall argument, indexed 0..=5.
    Argument(u8),
    Arithmetic(ArithmeticOp, Box<Numeric>, Box<Numeric>),
}

/// An arithmetic operator over two numeric operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    BinAnd,
    BinOr,
    BinXor,
    Lsh,
    Rsh,
}

impl Numeric {
    /// `true` if this node is a literal that the generator can fold into
    /// an immediate operand without loading anything dynamic.
    pub fn is_literal(&self) -> bool {
        matches!(self, Numeric::NumericLiteral(_))
    }
}
