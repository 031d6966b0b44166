// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An in-process cBPF interpreter for the instruction subset this crate
//! emits. Used to check compiled programs behaviorally instead of against
//! a fixed disassembly, for lowerings (like `Inclusion`) whose exact
//! instruction sequence isn't meant to be load-bearing.

use seccomp_rule_compiler::bpf::{self, SockFilter};

/// A synthetic `struct seccomp_data`: a syscall number and its six
/// 64-bit arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompData {
    pub nr: u32,
    pub args: [u64; 6],
}

impl SeccompData {
    pub fn new(nr: u32, args: [u64; 6]) -> Self {
        SeccompData { nr, args }
    }
}

fn load_abs(data: &SeccompData, offset: u32) -> u32 {
    if offset == bpf::SYSCALL_NR_OFFSET {
        return data.nr;
    }
    for index in 0..6u8 {
        if offset == bpf::arg_lo_offset(index) {
            return data.args[index as usize] as u32;
        }
        if offset == bpf::arg_hi_offset(index) {
            return (data.args[index as usize] >> 32) as u32;
        }
    }
    panic!("interpreter: no seccomp_data field at offset {offset:#x}");
}

/// Runs `program` against `data` to completion and returns its `RET_K`
/// value (one of `bpf::SECCOMP_RET_*`).
pub fn run(program: &[SockFilter], data: &SeccompData) -> u32 {
    let mut acc: u32 = 0;
    let mut idx_reg: u32 = 0;
    let mut scratch = [0u32; bpf::MAX_SCRATCH_SLOTS as usize];
    let mut pc: usize = 0;

    loop {
        let insn = program
            .get(pc)
            .unwrap_or_else(|| panic!("interpreter: ran off the end of the program at pc={pc}"));

        match insn.code {
            bpf::LD_ABS => acc = load_abs(data, insn.k),
            bpf::LD_IMM => acc = insn.k,
            bpf::LD_MEM => acc = scratch[insn.k as usize],
            bpf::LDX_MEM => idx_reg = scratch[insn.k as usize],
            bpf::ST => scratch[insn.k as usize] = acc,
            bpf::TAX => idx_reg = acc,
            bpf::ADD_K => acc = acc.wrapping_add(insn.k),
            bpf::ADD_X => acc = acc.wrapping_add(idx_reg),
            bpf::SUB_K => acc = acc.wrapping_sub(insn.k),
            bpf::SUB_X => acc = acc.wrapping_sub(idx_reg),
            bpf::MUL_K => acc = acc.wrapping_mul(insn.k),
            bpf::MUL_X => acc = acc.wrapping_mul(idx_reg),
            bpf::DIV_K => acc = if insn.k == 0 { 0 } else { acc / insn.k },
            bpf::DIV_X => acc = if idx_reg == 0 { 0 } else { acc / idx_reg },
            bpf::MOD_K => acc = if insn.k == 0 { 0 } else { acc % insn.k },
            bpf::MOD_X => acc = if idx_reg == 0 { 0 } else { acc % idx_reg },
            bpf::AND_K => acc &= insn.k,
            bpf::AND_X => acc &= idx_reg,
            bpf::OR_K => acc |= insn.k,
            bpf::OR_X => acc |= idx_reg,
            bpf::XOR_K => acc ^= insn.k,
            bpf::XOR_X => acc ^= idx_reg,
            bpf::LSH_K => acc = acc.wrapping_shl(insn.k),
            bpf::LSH_X => acc = acc.wrapping_shl(idx_reg),
            bpf::RSH_K => acc = acc.wrapping_shr(insn.k),
            bpf::RSH_X => acc = acc.wrapping_shr(idx_reg),
            bpf::JA => {
                pc += 1 + insn.k as usize;
                continue;
            }
            bpf::JEQ_K | bpf::JEQ_X | bpf::JGT_K | bpf::JGT_X | bpf::JGE_K | bpf::JGE_X => {
                let rhs = if matches!(insn.code, bpf::JEQ_K | bpf::JGT_K | bpf::JGE_K) {
                    insn.k
                } else {
                    idx_reg
                };
                let taken = match insn.code {
                    bpf::JEQ_K | bpf::JEQ_X => acc == rhs,
                    bpf::JGT_K | bpf::JGT_X => acc > rhs,
                    bpf::JGE_K | bpf::JGE_X => acc >= rhs,
                    _ => unreachable!(),
                };
                let offset = if taken { insn.jt } else { insn.jf };
                pc += 1 + offset as usize;
                continue;
            }
            bpf::RET_K => return insn.k,
            other => panic!("interpreter: unsupported opcode {other:#06x}"),
        }
        pc += 1;
    }
}

pub fn allows(program: &[SockFilter], data: &SeccompData) -> bool {
    run(program, data) == bpf::SECCOMP_RET_ALLOW
}
