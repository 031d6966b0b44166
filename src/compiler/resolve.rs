// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The jump resolver.
//!
//! Emission leaves every branch pointed at a symbolic [`Label`]; this pass
//! assigns each label a concrete instruction offset and backpatches every
//! site. Because a conditional branch's `jt`/`jf` fields are only 8 bits
//! wide, a site whose target ends up more than [`bpf::MAX_JUMP_SIZE`]
//! instructions away cannot encode the jump directly. For those sites the
//! resolver inserts a `JA` trampoline — `JA`'s `k` field is a full 32 bits,
//! so it can always reach the real target — immediately after the
//! offending instruction, and repoints the overflowing `jt`/`jf` at the
//! trampoline instead, which is always exactly zero instructions away.
//!
//! Inserting an instruction shifts every label and site after it by one,
//! which can itself push some other, previously-fine site over the limit.
//! The resolver therefore loops: scan for the first overflowing site,
//! patch it, rescan from scratch, until a full scan finds nothing to fix.
//! Each iteration grows the program by exactly one instruction, so the
//! loop is bounded by [`bpf::MAX_PROGRAM_LEN`].

use crate::bpf::{self, SockFilter};

use super::{CompileError, CompilerContext, Label, Trampoline};

impl CompilerContext {
    pub(super) fn resolve(mut self) -> Result<Vec<SockFilter>, CompileError> {
        loop {
            if self.result.len() > bpf::MAX_PROGRAM_LEN {
                return Err(CompileError::ProgramTooLong {
                    len: self.result.len(),
                    max: bpf::MAX_PROGRAM_LEN,
                });
            }

            let mut sites: Vec<usize> = self.branches.keys().copied().collect();
            sites.sort_unstable();

            let mut patched = false;
            for site in sites {
                let (jt, jf) = self.branches[&site];
                if self.overflows(site, jt)? {
                    self.insert_trampoline(site, true, jt)?;
                    patched = true;
                    break;
                }
                if self.overflows(site, jf)? {
                    self.insert_trampoline(site, false, jf)?;
                    patched = true;
                    break;
                }
            }

            if !patched {
                break;
            }
        }

        self.backpatch_branches()?;
        self.backpatch_jumps()?;
        self.check_trampolines_reachable()?;

        Ok(self.result)
    }

    fn label_offset(&self, label: Label) -> Result<usize, CompileError> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| CompileError::UnresolvedLabel {
                label: label.to_string(),
            })
    }

    /// Signed distance, in instructions, from just after `site` to
    /// `label`'s offset. All branches in this compiler's output are
    /// forward-only; a negative distance is an internal contract
    /// violation rather than something the resolver knows how to patch.
    fn distance(&self, site: usize, label: Label) -> Result<isize, CompileError> {
        let target = self.label_offset(label)? as isize;
        Ok(target - (site as isize + 1))
    }

    fn overflows(&self, site: usize, label: Label) -> Result<bool, CompileError> {
        let distance = self.distance(site, label)?;
        if distance < 0 {
            return Err(CompileError::Invariant {
                syscall: self.current_syscall.clone(),
                message: format!("backward branch from site {site} to `{label}`"),
            });
        }
        Ok(distance as usize > bpf::MAX_JUMP_SIZE)
    }

    /// Inserts a `JA far_label` trampoline right after `site`, shifts every
    /// label and recorded site after the insertion point, and repoints
    /// `site`'s overflowing edge (`jt` if `is_jt`, else `jf`) at the new
    /// trampoline, which sits exactly zero instructions away.
    fn insert_trampoline(&mut self, site: usize, is_jt: bool, far_label: Label) -> Result<(), CompileError> {
        let insert_at = site + 1;

        for position in self.labels.values_mut() {
            if *position >= insert_at {
                *position += 1;
            }
        }
        self.branches = self
            .branches
            .drain()
            .map(|(index, labels)| {
                let shifted = if index >= insert_at { index + 1 } else { index };
                (shifted, labels)
            })
            .collect();
        self.jas = self
            .jas
            .drain()
            .map(|(index, label)| {
                let shifted = if index >= insert_at { index + 1 } else { index };
                (shifted, label)
            })
            .collect();
        for trampoline in self.trampolines.iter_mut() {
            if trampoline.index >= insert_at {
                trampoline.index += 1;
            }
            if trampoline.site >= insert_at {
                trampoline.site += 1;
            }
        }

        if self.result.len() >= bpf::MAX_PROGRAM_LEN {
            return Err(CompileError::ProgramTooLong {
                len: self.result.len() + 1,
                max: bpf::MAX_PROGRAM_LEN,
            });
        }
        self.result.insert(insert_at, bpf::stmt(bpf::JA, 0));
        self.jas.insert(insert_at, far_label);
        self.trampolines.push(Trampoline {
            index: insert_at,
            site,
            is_jt,
        });

        let trampoline_label = self.new_label();
        self.labels.insert(trampoline_label, insert_at);
        let (jt, jf) = self.branches[&site];
        let repointed = if is_jt {
            (trampoline_label, jf)
        } else {
            (jt, trampoline_label)
        };
        self.branches.insert(site, repointed);

        tracing::trace!(
            site,
            insert_at,
            far_label = %far_label,
            "inserted long-jump trampoline"
        );
        Ok(())
    }

    fn backpatch_branches(&mut self) -> Result<(), CompileError> {
        let sites: Vec<usize> = self.branches.keys().copied().collect();
        for site in sites {
            let (jt, jf) = self.branches[&site];
            let jt_distance = self.distance(site, jt)?;
            let jf_distance = self.distance(site, jf)?;
            debug_assert!(jt_distance >= 0 && jt_distance as usize <= bpf::MAX_JUMP_SIZE);
            debug_assert!(jf_distance >= 0 && jf_distance as usize <= bpf::MAX_JUMP_SIZE);
            self.result[site].jt = jt_distance as u8;
            self.result[site].jf = jf_distance as u8;
        }
        Ok(())
    }

    fn backpatch_jumps(&mut self) -> Result<(), CompileError> {
        let sites: Vec<usize> = self.jas.keys().copied().collect();
        for site in sites {
            let label = self.jas[&site];
            let distance = self.distance(site, label)?;
            if distance < 0 {
                return Err(CompileError::Invariant {
                    syscall: self.current_syscall.clone(),
                    message: format!("backward unconditional jump from site {site} to `{label}`"),
                });
            }
            self.result[site].k = distance as u32;
        }
        Ok(())
    }

    /// Every trampoline the resolver inserted must be reached by the exact
    /// edge it was inserted for, not by some other branch happening to land
    /// on it, and not by ordinary sequential fallthrough.
    ///
    /// A trampoline is not always the very next instruction after the
    /// branch it serves: when a site needs a trampoline on *both* of its
    /// edges, the second insertion lands at `site + 1`, pushing the first
    /// one (and everything after it) one slot further away. That first
    /// trampoline then sits at a `jt`/`jf` distance of 1, not 0 — which is
    /// why each [`Trampoline`] records its owning `site` and `is_jt` at
    /// insertion time and this checks that specific edge's final,
    /// backpatched distance, rather than assuming `index - 1` is itself a
    /// distance-0 conditional branch. That assumption is exactly what made
    /// this check spuriously fail on a site whose both edges overflowed,
    /// even though the emitted program was already correct.
    fn check_trampolines_reachable(&self) -> Result<(), CompileError> {
        for trampoline in &self.trampolines {
            let insn = &self.result[trampoline.site];
            let edge = if trampoline.is_jt { insn.jt } else { insn.jf };
            if trampoline.site + 1 + edge as usize != trampoline.index {
                return Err(CompileError::UnreachableTrampoline {
                    index: trampoline.index,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ComparisonOp, Expression, Numeric, Policy, Rule};
    use crate::compiler::compile;

    /// Forces a trampoline by separating a comparison's true branch from
    /// its target with enough filler rules that the direct offset would
    /// overflow a `u8`.
    #[test]
    fn long_jump_inserts_a_trampoline() {
        let mut rules = vec![Rule {
            name: "write".to_string(),
            body: Expression::Comparison(
                ComparisonOp::Eql,
                Numeric::Argument(0),
                Numeric::NumericLiteral(1),
            ),
        }];
        for i in 0..100 {
            rules.push(Rule {
                name: "read".to_string(),
                body: Expression::Comparison(
                    ComparisonOp::Eql,
                    Numeric::Argument(0),
                    Numeric::NumericLiteral(u64::from(i)),
                ),
            });
        }
        let policy = Policy { rules };
        let program = compile(&policy).unwrap();
        assert!(program.iter().any(|insn| insn.code == bpf::JA));
    }

    #[test]
    fn short_program_needs_no_trampoline() {
        let policy = Policy {
            rules: vec![Rule {
                name: "write".to_string(),
                body: Expression::Comparison(
                    ComparisonOp::Eql,
                    Numeric::Argument(0),
                    Numeric::NumericLiteral(1),
                ),
            }],
        };
        let program = compile(&policy).unwrap();
        assert!(program.iter().all(|insn| insn.code != bpf::JA));
    }
}
