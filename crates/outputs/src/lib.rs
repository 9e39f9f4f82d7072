//! Declared task output resolution for bake
//!
//! A task declares its outputs as a tree of composable file-set nodes
//! (single files, flat sets, filtered directory trees, archive-backed
//! trees, visitor-enumerable trees, composites, and excluded nodes).
//! This crate reduces such a tree to the minimal, deterministic list of
//! backing filesystem entries needed to reproduce the output:
//!
//! - a filtered directory tree stays one root+patterns entry — the
//!   filesystem is never walked at resolution time
//! - an archive-backed tree is represented by the archive file itself
//!   and is never expanded
//! - excluded nodes contribute nothing, at any nesting depth
//!
//! The packer in `bake-cache` consumes the resulting entries.

mod error;

pub mod declaration;
pub mod resolver;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use declaration::{
    ExcludedKind, FilterMatcher, OutputDeclaration, OutputWalk, PatternFilter, WalkedEntry,
};
pub use resolver::{BackingEntry, backing_entries};
