// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The code generator and jump resolver.
//!
//! Compilation happens in two passes over a short-lived [`CompilerContext`]:
//! emission (this module + `lower.rs`) writes instructions with symbolic
//! [`Label`] targets into `result`, recording every referencing site;
//! resolution (`resolve.rs`) then assigns each label a concrete offset and
//! backpatches every site, inserting trampolines where an 8-bit `jt`/`jf`
//! cannot reach.
//!
//! A context is constructed fresh for each [`compile`] call and dropped at
//! the end of it; nothing survives across invocations except the
//! process-wide syscall table in [`crate::syscalls`].

mod label;
mod lower;
mod resolve;

pub use label::Label;

use std::collections::HashMap;

use crate::ast::Policy;
use crate::bpf::{self, SockFilter};

/// Structural errors raised while generating or resolving a program.
///
/// These are distinct from [`crate::checker::CheckError`]: a checked
/// policy can still fail to compile, for example because it is too large
/// for the kernel's instruction-count limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum CompileError {
    /// compiled program exceeds the seccomp instruction limit ({len} > {max})
    ProgramTooLong { len: usize, max: usize },
    /// scratch stack depth exceeded {max} slots while compiling `{syscall}`
    StackOverflow { syscall: String, max: u32 },
    /// label `{label}` was referenced but never defined
    UnresolvedLabel { label: String },
    /// resolver produced a trampoline reachable by fallthrough at index {index}
    UnreachableTrampoline { index: usize },
    /// internal contract violation while compiling `{syscall}`: {message}
    Invariant { syscall: String, message: String },
}

/// Compiles a checked policy into a flat cBPF program.
///
/// `policy` is assumed to have already passed [`crate::checker::check`]
/// with no errors; passing an unchecked policy may trip
/// [`CompileError::Invariant`] instead of producing a program.
#[tracing::instrument(level = "debug", skip(policy), fields(rules = policy.rules.len()))]
pub fn compile(policy: &Policy) -> Result<Vec<SockFilter>, CompileError> {
    let mut ctx = CompilerContext::new();
    for rule in &policy.rules {
        ctx.compile_rule(rule)?;
    }
    ctx.label_here(Label::Negative);
    ctx.emit(bpf::stmt(bpf::RET_K, bpf::SECCOMP_RET_KILL))?;
    ctx.label_here(Label::Positive);
    ctx.emit(bpf::stmt(bpf::RET_K, bpf::SECCOMP_RET_ALLOW))?;

    ctx.resolve()
}

/// Which 32-bit half of a 64-bit syscall argument is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Half {
    High,
    Low,
}

/// A long-jump trampoline inserted by the resolver: `index` is the `JA`'s
/// own instruction slot, `site` is the branch it was inserted to serve, and
/// `is_jt` says which of that branch's two edges points at it. A single
/// branch has only two edges, so `site` can own at most two trampolines —
/// one per edge — and each is tracked against the specific edge that
/// targets it rather than its position relative to `site`.
#[derive(Debug, Clone, Copy)]
struct Trampoline {
    index: usize,
    site: usize,
    is_jt: bool,
}

pub(crate) struct CompilerContext {
    result: Vec<SockFilter>,
    /// Absolute byte offset last loaded into `A`, if known; `None` once
    /// anything but a load has written `A`.
    currently_loaded: Option<u32>,
    stack_top: u32,
    labels: HashMap<Label, usize>,
    /// Every conditional branch site, by instruction index, with the
    /// labels its `jt` and `jf` fields resolve to.
    branches: HashMap<usize, (Label, Label)>,
    /// Indices of `JA` instructions, with the label their 32-bit `k`
    /// distance should resolve to.
    jas: HashMap<usize, Label>,
    /// Every `JA` the resolver inserted itself as a long-jump trampoline,
    /// tracked together with the branch site and edge it was inserted to
    /// serve, so reachability can be checked against the edge that
    /// actually owns it rather than assumed from position.
    trampolines: Vec<Trampoline>,
    label_counter: u32,
    current_syscall: String,
}

impl CompilerContext {
    fn new() -> Self {
        CompilerContext {
            result: Vec::new(),
            currently_loaded: None,
            stack_top: 0,
            labels: HashMap::new(),
            branches: HashMap::new(),
            jas: HashMap::new(),
            trampolines: Vec::new(),
            label_counter: 0,
            current_syscall: String::new(),
        }
    }

    fn new_label(&mut self) -> Label {
        let id = self.label_counter;
        self.label_counter += 1;
        Label::Generated(id)
    }

    fn label_here(&mut self, label: Label) {
        let at = self.result.len();
        tracing::trace!(%label, at, "anchoring label");
        self.labels.insert(label, at);
    }

    /// Appends a non-branching instruction, enforcing the program-length
    /// cap.
    fn emit(&mut self, insn: SockFilter) -> Result<usize, CompileError> {
        if self.result.len() >= bpf::MAX_PROGRAM_LEN {
            return Err(CompileError::ProgramTooLong {
                len: self.result.len() + 1,
                max: bpf::MAX_PROGRAM_LEN,
            });
        }
        let index = self.result.len();
        self.result.push(insn);
        Ok(index)
    }

    /// Appends a conditional branch, registering its `jt`/`jf` sites for
    /// later resolution. The emitted instruction's `jt`/`jf` fields are
    /// placeholders until [`Self::resolve`] runs.
    fn emit_branch(&mut self, code: u16, k: u32, jt: Label, jf: Label) -> Result<(), CompileError> {
        let index = self.emit(bpf::jump(code, k, 0, 0))?;
        self.branches.insert(index, (jt, jf));
        Ok(())
    }

    /// Appends an unconditional jump to `target`.
    fn emit_jump_always(&mut self, target: Label) -> Result<(), CompileError> {
        let index = self.emit(bpf::stmt(bpf::JA, 0))?;
        self.jas.insert(index, target);
        Ok(())
    }

    fn load_at(&mut self, offset: u32) -> Result<(), CompileError> {
        if self.currently_loaded != Some(offset) {
            self.emit(bpf::stmt(bpf::LD_ABS, offset))?;
            self.currently_loaded = Some(offset);
        }
        Ok(())
    }

    fn load_literal(&mut self, value: u32) -> Result<(), CompileError> {
        self.emit(bpf::stmt(bpf::LD_IMM, value))?;
        self.currently_loaded = None;
        Ok(())
    }

    fn move_a_to_x(&mut self) -> Result<(), CompileError> {
        self.emit(bpf::stmt(bpf::TAX, 0))?;
        Ok(())
    }

    fn push_a(&mut self) -> Result<(), CompileError> {
        if self.stack_top >= bpf::MAX_SCRATCH_SLOTS {
            return Err(CompileError::StackOverflow {
                syscall: self.current_syscall.clone(),
                max: bpf::MAX_SCRATCH_SLOTS,
            });
        }
        self.emit(bpf::stmt(bpf::ST, self.stack_top))?;
        self.stack_top += 1;
        Ok(())
    }

    /// Pops the saved value back into `A`. A pop still counts as writing
    /// `A` from somewhere other than a direct load, so load elision is
    /// invalidated same as any other write.
    fn pop_a(&mut self) -> Result<(), CompileError> {
        self.stack_top -= 1;
        self.emit(bpf::stmt(bpf::LD_MEM, self.stack_top))?;
        self.currently_loaded = None;
        Ok(())
    }
}
