//! Compile-time kernel configuration.
//!
//! Plain constants rather than a generated bridge crate — this kernel
//! has one build profile and no variant matrix to justify codegen.

/// Maximum log level compiled in; raised/lowered at runtime via
/// `talon_core::log::set_max_level`, this is just the initial value.
pub const MAX_LOG_LEVEL: talon_core::log::LogLevel = talon_core::log::LogLevel::Info;

/// Single-CPU only; SMP is out of scope.
pub const MAX_CPUS: usize = 1;

/// Size of the kernel heap, in bytes.
pub const KERNEL_HEAP_SIZE: usize = 16 * 1024 * 1024;

/// Conservative reservation for the kernel image plus the multiboot
/// info blob, in bytes, page-aligned. The real image is far smaller;
/// this only has to be large enough that the heap placed right after
/// it never overlaps the loaded kernel.
pub const KERNEL_IMAGE_RESERVED: u64 = 4 * 1024 * 1024;

/// End of the early boot-time identity-mapped window. Every boot-time
/// physical reservation (kernel image, heap) must fit entirely below
/// this, or initialization fails (spec §4.A).
pub const IDENTITY_WINDOW_END: u64 = 0x4000_0000;

/// Number of MLFQ priority levels (mirrors `talon_sched::task::MLFQ_LEVELS`).
pub const MLFQ_LEVELS: usize = talon_sched::task::MLFQ_LEVELS;

/// Max open files per task (mirrors `talon_fs::file::MAX_FILES`).
pub const MAX_FILES: usize = talon_fs::file::MAX_FILES;

/// Dentry cache hash table size (mirrors `talon_fs::dentry::DENTRY_HASH_SIZE`).
pub const DENTRY_HASH_SIZE: usize = talon_fs::dentry::DENTRY_HASH_SIZE;

/// Radix tree fanout shift (64-way).
pub const RADIX_TREE_MAP_SHIFT: u32 = 6;

/// Pipe ring buffer capacity, in bytes (mirrors `talon_ipc::pipe::PIPE_CAPACITY`).
pub const PIPE_SIZE: usize = talon_ipc::pipe::PIPE_CAPACITY;

/// Max message body size, in bytes (mirrors `talon_ipc::msgqueue::MSG_SIZE`).
pub const MSG_SIZE: usize = talon_ipc::msgqueue::MSG_SIZE;
