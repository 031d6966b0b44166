// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Property-based checks of the algebraic laws a correct lowering must
//! respect, run against the in-process interpreter rather than against
//! any one fixed disassembly.

mod support;

use proptest::prelude::*;
use seccomp_rule_compiler::{compile, syscalls, ComparisonOp, Expression, Numeric, Policy, Rule};
use support::SeccompData;

fn atomic(literal: u8) -> Expression {
    Expression::Comparison(
        ComparisonOp::Eql,
        Numeric::Argument(0),
        Numeric::NumericLiteral(u64::from(literal)),
    )
}

fn arb_expr() -> impl Strategy<Value = Expression> {
    let leaf = (0u8..4).prop_map(atomic);
    leaf.prop_recursive(4, 64, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(|e| Expression::Negation(Box::new(e))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expression::And(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expression::Or(Box::new(a), Box::new(b))),
        ]
    })
}

fn evaluate(body: Expression, arg0: u64) -> bool {
    let policy = Policy {
        rules: vec![Rule {
            name: "read".to_string(),
            body,
        }],
    };
    let program = compile(&policy).unwrap();
    let nr = syscalls::lookup("read").unwrap();
    support::allows(&program, &SeccompData::new(nr, [arg0, 0, 0, 0, 0, 0]))
}

proptest! {
    /// `!!e` and `e` must agree on every input: `Negation` is its own
    /// inverse, not an approximation of one.
    #[test]
    fn double_negation_is_identity(e in arb_expr(), arg0 in 0u64..6) {
        let direct = evaluate(e.clone(), arg0);
        let double_negated = evaluate(
            Expression::Negation(Box::new(Expression::Negation(Box::new(e)))),
            arg0,
        );
        prop_assert_eq!(direct, double_negated);
    }

    /// `!e` disagrees with `e` on every input — the lowering never
    /// produces a program where some input satisfies neither or both.
    #[test]
    fn negation_is_exactly_the_complement(e in arb_expr(), arg0 in 0u64..6) {
        let direct = evaluate(e.clone(), arg0);
        let negated = evaluate(Expression::Negation(Box::new(e)), arg0);
        prop_assert_eq!(direct, !negated);
    }

    /// `!(a && b) == (!a || !b)`.
    #[test]
    fn de_morgan_and(a in arb_expr(), b in arb_expr(), arg0 in 0u64..6) {
        let not_and = evaluate(
            Expression::Negation(Box::new(Expression::And(
                Box::new(a.clone()),
                Box::new(b.clone()),
            ))),
            arg0,
        );
        let or_of_nots = evaluate(
            Expression::Or(
                Box::new(Expression::Negation(Box::new(a))),
                Box::new(Expression::Negation(Box::new(b))),
            ),
            arg0,
        );
        prop_assert_eq!(not_and, or_of_nots);
    }

    /// `!(a || b) == (!a && !b)`.
    #[test]
    fn de_morgan_or(a in arb_expr(), b in arb_expr(), arg0 in 0u64..6) {
        let not_or = evaluate(
            Expression::Negation(Box::new(Expression::Or(
                Box::new(a.clone()),
                Box::new(b.clone()),
            ))),
            arg0,
        );
        let and_of_nots = evaluate(
            Expression::And(
                Box::new(Expression::Negation(Box::new(a))),
                Box::new(Expression::Negation(Box::new(b))),
            ),
            arg0,
        );
        prop_assert_eq!(not_or, and_of_nots);
    }
}

/// A rule only ever constrains the outcome for its own syscall — adding
/// or reordering rules for other syscalls must never change it.
#[test]
fn rule_order_does_not_affect_unrelated_syscalls() {
    let write_allow = Rule {
        name: "write".to_string(),
        body: Expression::BooleanLiteral(true),
    };
    let read_deny = Rule {
        name: "read".to_string(),
        body: Expression::BooleanLiteral(false),
    };

    let forward = Policy {
        rules: vec![write_allow.clone(), read_deny.clone()],
    };
    let backward = Policy {
        rules: vec![read_deny, write_allow],
    };

    let write_nr = syscalls::lookup("write").unwrap();
    let read_nr = syscalls::lookup("read").unwrap();

    let forward_program = compile(&forward).unwrap();
    let backward_program = compile(&backward).unwrap();

    for (nr, expected) in [(write_nr, true), (read_nr, false)] {
        let data = SeccompData::new(nr, [0; 6]);
        assert_eq!(support::allows(&forward_program, &data), expected);
        assert_eq!(support::allows(&backward_program, &data), expected);
    }
}
