//! Reduction of an [`OutputDeclaration`] tree to backing entries.
//!
//! Resolution is a pure tree walk: the only I/O that can happen is
//! whatever a [`Generic`](OutputDeclaration::Generic) visitor performs
//! itself. In particular an archive-backed tree is never expanded —
//! the archive file is its own backing entry.

use std::path::{Path, PathBuf};

use crate::declaration::{OutputDeclaration, PatternFilter, WalkedEntry};

/// Minimal filesystem-level description needed to reproduce part of a
/// task's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingEntry {
    /// A single backing file.
    File {
        /// Absolute location of the file
        path: PathBuf,
    },
    /// A directory root plus the patterns scoping it. Kept as
    /// root+patterns instead of one entry per contained file so that
    /// resolution never walks the filesystem.
    Directory {
        /// Root directory
        root: PathBuf,
        /// Patterns selecting files under the root
        filter: PatternFilter,
    },
}

impl BackingEntry {
    /// The backing path, regardless of kind.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::File { path } => path,
            Self::Directory { root, .. } => root,
        }
    }
}

/// Resolve a declaration to its ordered list of backing entries.
///
/// Depth-first over the declared tree, in declaration order. An
/// excluded node contributes nothing from its subtree while siblings
/// and cousins still resolve; a filtered tree contributes exactly one
/// directory entry; an archive-backed tree contributes exactly one file
/// entry (the archive itself). Entries are not deduplicated —
/// overlapping declarations yield overlapping entries.
#[must_use]
pub fn backing_entries(decl: &OutputDeclaration) -> Vec<BackingEntry> {
    let mut entries = Vec::new();
    collect(decl, &mut entries);
    tracing::trace!(count = entries.len(), "Resolved backing entries");
    entries
}

fn collect(decl: &OutputDeclaration, out: &mut Vec<BackingEntry>) {
    match decl {
        OutputDeclaration::Excluded(_) => {}
        OutputDeclaration::Composite(children) => {
            for child in children {
                collect(child, out);
            }
        }
        OutputDeclaration::File(path) => out.push(BackingEntry::File { path: path.clone() }),
        OutputDeclaration::Files(paths) => {
            for path in paths {
                out.push(BackingEntry::File { path: path.clone() });
            }
        }
        OutputDeclaration::FilteredTree { root, filter } => out.push(BackingEntry::Directory {
            root: root.clone(),
            filter: filter.clone(),
        }),
        // The archive is the backing file; its contents stay packed.
        OutputDeclaration::Archive(path) => out.push(BackingEntry::File { path: path.clone() }),
        OutputDeclaration::Generic(tree) => tree.walk(&mut |entry| {
            out.push(match entry {
                WalkedEntry::File(path) => BackingEntry::File { path },
                WalkedEntry::Directory(path) => BackingEntry::Directory {
                    root: path,
                    filter: PatternFilter::default(),
                },
            });
        }),
    }
}
