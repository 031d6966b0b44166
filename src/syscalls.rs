// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The syscall-name-to-number oracle.
//!
//! Upstream, textual policy parsing and macro resolution are out of scope
//! for this crate (see spec) and the syscall table is treated as an
//! external collaborator. This module is a stand-in for that collaborator:
//! a small, static x86_64 table built from `libc::SYS_*` constants, wide
//! enough to exercise the checker and generator end to end. It makes no
//! claim of being exhaustive; an embedder compiling real policies is
//! expected to supply its own table (for example one generated from the
//! running kernel's syscall headers).

/// Table entry: syscall name paired with its numeric id on this platform.
type Entry = (&'static str, i64);

const TABLE: &[Entry] = &[
    ("read", libc::SYS_read),
    ("write", libc::SYS_write),
    ("open", libc::SYS_open),
    ("openat", libc::SYS_openat),
    ("close", libc::SYS_close),
    ("stat", libc::SYS_stat),
    ("fstat", libc::SYS_fstat),
    ("lstat", libc::SYS_lstat),
    ("poll", libc::SYS_poll),
    ("lseek", libc::SYS_lseek),
    ("mmap", libc::SYS_mmap),
    ("mprotect", libc::SYS_mprotect),
    ("munmap", libc::SYS_munmap),
    ("brk", libc::SYS_brk),
    ("rt_sigaction", libc::SYS_rt_sigaction),
    ("rt_sigprocmask", libc::SYS_rt_sigprocmask),
    ("rt_sigreturn", libc::SYS_rt_sigreturn),
    ("ioctl", libc::SYS_ioctl),
    ("pread64", libc::SYS_pread64),
    ("pwrite64", libc::SYS_pwrite64),
    ("readv", libc::SYS_readv),
    ("writev", libc::SYS_writev),
    ("access", libc::SYS_access),
    ("pipe", libc::SYS_pipe),
    ("select", libc::SYS_select),
    ("sched_yield", libc::SYS_sched_yield),
    ("mremap", libc::SYS_mremap),
    ("msync", libc::SYS_msync),
    ("dup", libc::SYS_dup),
    ("dup2", libc::SYS_dup2),
    ("pause", libc::SYS_pause),
    ("nanosleep", libc::SYS_nanosleep),
    ("getpid", libc::SYS_getpid),
    ("socket", libc::SYS_socket),
    ("connect", libc::SYS_connect),
    ("accept", libc::SYS_accept),
    ("accept4", libc::SYS_accept4),
    ("sendto", libc::SYS_sendto),
    ("recvfrom", libc::SYS_recvfrom),
    ("bind", libc::SYS_bind),
    ("listen", libc::SYS_listen),
    ("clone", libc::SYS_clone),
    ("fork", libc::SYS_fork),
    ("vfork", libc::SYS_vfork),
    ("execve", libc::SYS_execve),
    ("exit", libc::SYS_exit),
    ("exit_group", libc::SYS_exit_group),
    ("wait4", libc::SYS_wait4),
    ("kill", libc::SYS_kill),
    ("ptrace", libc::SYS_ptrace),
    ("futex", libc::SYS_futex),
    ("sigaltstack", libc::SYS_sigaltstack),
    ("set_tid_address", libc::SYS_set_tid_address),
    ("fcntl", libc::SYS_fcntl),
    ("flock", libc::SYS_flock),
    ("fsync", libc::SYS_fsync),
    ("getdents64", libc::SYS_getdents64),
    ("unlink", libc::SYS_unlink),
    ("unlinkat", libc::SYS_unlinkat),
    ("mkdir", libc::SYS_mkdir),
    ("rmdir", libc::SYS_rmdir),
    ("chdir", libc::SYS_chdir),
    ("getcwd", libc::SYS_getcwd),
    ("gettid", libc::SYS_gettid),
    ("tgkill", libc::SYS_tgkill),
    ("madvise", libc::SYS_madvise),
    ("prctl", libc::SYS_prctl),
    ("arch_prctl", libc::SYS_arch_prctl),
    ("setrlimit", libc::SYS_setrlimit),
    ("getrlimit", libc::SYS_getrlimit),
    ("epoll_create1", libc::SYS_epoll_create1),
    ("epoll_ctl", libc::SYS_epoll_ctl),
    ("epoll_wait", libc::SYS_epoll_wait),
    ("eventfd2", libc::SYS_eventfd2),
    ("timerfd_create", libc::SYS_timerfd_create),
    ("signalfd4", libc::SYS_signalfd4),
    ("clock_gettime", libc::SYS_clock_gettime),
    ("clock_nanosleep", libc::SYS_clock_nanosleep),
    ("statx", libc::SYS_statx),
    ("getrandom", libc::SYS_getrandom),
    ("memfd_create", libc::SYS_memfd_create),
    ("pipe2", libc::SYS_pipe2),
    ("dup3", libc::SYS_dup3),
    ("keyctl", libc::SYS_keyctl),
    ("seccomp", libc::SYS_seccomp),
    ("restart_syscall", libc::SYS_restart_syscall),
];

/// Looks up a syscall by name, returning its numeric id on this platform
/// if the oracle knows about it.
///
/// Pure and deterministic: same input always yields the same output, for
/// the lifetime of the process.
pub fn lookup(name: &str) -> Option<u32> {
    TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id as u32)
}

/// Reverse lookup, used only for debug/log output.
pub fn name_for(id: u32) -> Option<&'static str> {
    TABLE
        .iter()
        .find(|(_, n)| *n as u32 == id)
        .map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_syscalls_resolve() {
        assert_eq!(lookup("write"), Some(libc::SYS_write as u32));
        assert_eq!(lookup("read"), Some(libc::SYS_read as u32));
    }

    #[test]
    fn unknown_syscalls_do_not_resolve() {
        assert_eq!(lookup("frobnicate"), None);
    }

    #[test]
    fn reverse_lookup_round_trips() {
        let id = lookup("openat").unwrap();
        assert_eq!(name_for(id), Some("openat"));
    }
}
