//! Shared helpers used across the workspace crates.

pub mod shell;
