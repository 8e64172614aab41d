//! Backend implementations

#[cfg(feature = "git")]
pub mod git;

#[cfg(feature = "hg")]
pub mod hg;
