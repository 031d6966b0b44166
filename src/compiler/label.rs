// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Symbolic labels used during emission, before the resolver assigns them
//! concrete instruction offsets.

/// A symbolic branch target. `Positive`/`Negative` are the two reserved,
/// program-wide trailers; every other label is freshly minted per rule or
/// per compound expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// The ALLOW trailer.
    Positive,
    /// The KILL trailer.
    Negative,
    /// A label minted during emission (a rule's `next`, an `And`/`Or`
    /// midpoint, an inserted trampoline's target anchor).
    Generated(u32),
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Positive => write!(f, "positive"),
            Label::Negative => write!(f, "negative"),
            Label::Generated(id) => write!(f, "L{id}"),
        }
    }
}
