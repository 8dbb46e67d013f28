//! Architecture-specific glue, one module per target.

pub mod x86_64;
