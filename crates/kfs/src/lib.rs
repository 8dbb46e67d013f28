//! Hierarchical virtual filesystem: dentry cache, inode cache, path
//! walking, mount table, page cache, buffer cache, and two concrete
//! backends (an in-memory `ramfs` and a FAT32 reader/writer).
//!
//! Host-testable like the other core crates — everything here runs
//! under `cargo test`; the kernel binary supplies a block device driver
//! and wires `mount()` at boot.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod buffer_cache;
pub mod dentry;
pub mod fat32;
pub mod file;
pub mod inode;
pub mod mount;
pub mod page_cache;
pub mod path;
pub mod radix;
pub mod ramfs;
pub mod superblock;

pub use inode::{Inode, InodeOps, InodeType};
pub use talon_core::error::{KError, Result};
