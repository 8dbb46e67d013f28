//! Shared error kind shared across every fallible core operation.
//!
//! A single flat enum (spec §7) rather than per-subsystem error types,
//! so callers that cross a VFS/IPC/MM boundary never need a translation
//! table — they propagate `KError` straight through with `?`.

use core::fmt;

/// The error kinds surfaced across the kernel core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    /// Out of memory (frame allocator or heap exhausted).
    Oom,
    /// Underlying I/O (block device, buffer cache) failed.
    Io,
    /// No such file or directory.
    NoEnt,
    /// The target already exists.
    Exists,
    /// Expected a directory, found something else.
    NotDir,
    /// Expected a non-directory, found a directory.
    IsDir,
    /// Invalid argument.
    Inval,
    /// Operation was interrupted (e.g. by a signal) and must be retried.
    Intr,
    /// Resource is busy / already in use.
    Busy,
    /// Syscall number not implemented.
    NoSys,
    /// Operation not permitted.
    Perm,
    /// Bad file descriptor.
    BadFd,
    /// Broken pipe (no readers remain).
    Pipe,
    /// Try again (would block in a context that cannot block).
    Again,
}

impl KError {
    /// The negative `errno`-style value returned to userspace in `rax`.
    pub const fn errno(self) -> i64 {
        -(match self {
            KError::Oom => 1,
            KError::Io => 2,
            KError::NoEnt => 3,
            KError::Exists => 4,
            KError::NotDir => 5,
            KError::IsDir => 6,
            KError::Inval => 7,
            KError::Intr => 8,
            KError::Busy => 9,
            KError::NoSys => 10,
            KError::Perm => 11,
            KError::BadFd => 12,
            KError::Pipe => 13,
            KError::Again => 14,
        } as i64)
    }
}

impl fmt::Display for KError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KError::Oom => "out of memory",
            KError::Io => "I/O error",
            KError::NoEnt => "no such file or directory",
            KError::Exists => "already exists",
            KError::NotDir => "not a directory",
            KError::IsDir => "is a directory",
            KError::Inval => "invalid argument",
            KError::Intr => "interrupted",
            KError::Busy => "resource busy",
            KError::NoSys => "no such syscall",
            KError::Perm => "operation not permitted",
            KError::BadFd => "bad file descriptor",
            KError::Pipe => "broken pipe",
            KError::Again => "try again",
        };
        f.write_str(s)
    }
}

/// Convenience alias used throughout the core crates.
pub type Result<T> = core::result::Result<T, KError>;
