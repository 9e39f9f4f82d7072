//! Declared task outputs.
//!
//! A task declares what it produces as a tree of composable file-set
//! nodes. The tree is a closed set of variants so that the resolver in
//! [`crate::resolver`] can dispatch over it exhaustively; a new node
//! kind cannot be added without the compiler pointing at every place
//! that has to handle it.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result};

/// Include/exclude glob patterns scoping a directory tree.
///
/// An empty include set matches every file under the root; excludes are
/// subtracted afterwards. Patterns match paths relative to the tree
/// root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl PatternFilter {
    /// Create a filter from include and exclude pattern lists.
    #[must_use]
    pub fn new(
        includes: impl IntoIterator<Item = impl Into<String>>,
        excludes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            includes: includes.into_iter().map(Into::into).collect(),
            excludes: excludes.into_iter().map(Into::into).collect(),
        }
    }

    /// The include patterns as declared.
    #[must_use]
    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    /// The exclude patterns as declared.
    #[must_use]
    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// Whether the filter has no patterns at all (matches everything).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Compile the filter into a matcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if any declared pattern is not valid
    /// glob syntax.
    pub fn matcher(&self) -> Result<FilterMatcher> {
        let includes = if self.includes.is_empty() {
            None
        } else {
            Some(build_glob_set(&self.includes)?)
        };
        let excludes = build_glob_set(&self.excludes)?;
        Ok(FilterMatcher { includes, excludes })
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| Error::pattern(pattern, e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::pattern(patterns.join(", "), e.to_string()))
}

/// Compiled form of a [`PatternFilter`].
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    /// `None` means "no include patterns declared" and matches all
    includes: Option<GlobSet>,
    excludes: GlobSet,
}

impl FilterMatcher {
    /// Whether a root-relative path is selected by the filter.
    #[must_use]
    pub fn is_match(&self, rel_path: &Path) -> bool {
        let included = self
            .includes
            .as_ref()
            .is_none_or(|set| set.is_match(rel_path));
        included && !self.excludes.is_match(rel_path)
    }
}

/// Why a declared output node can never resolve to backing entries.
///
/// The exclusion set is a closed enum rather than a runtime type check
/// so it can be enumerated and tested in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludedKind {
    /// Backed by a mutable dependency configuration whose contents
    /// change outside the task's control.
    DependencyBacked,
    /// Contents are computed lazily at use time and are not stable at
    /// resolution time.
    LazyComputed,
}

/// A directory or file reported by an [`OutputWalk`] visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkedEntry {
    /// A visited directory
    Directory(PathBuf),
    /// A visited file
    File(PathBuf),
}

/// Arbitrary file trees that can only be enumerated by visiting them.
///
/// Implementations invoke the callback once per directory and file, in
/// tree order. The resolver records entries in exactly that order.
pub trait OutputWalk: fmt::Debug + Send + Sync {
    /// Visit every directory and file backing this tree.
    fn walk(&self, visit: &mut dyn FnMut(WalkedEntry));
}

/// A task's declared output: a tree over the closed set of file-set
/// node kinds.
#[derive(Debug, Clone)]
pub enum OutputDeclaration {
    /// A single declared file.
    File(PathBuf),
    /// A flat list of declared files.
    Files(Vec<PathBuf>),
    /// A directory tree scoped by a pattern filter.
    FilteredTree {
        /// Root directory of the tree
        root: PathBuf,
        /// Patterns selecting files under the root
        filter: PatternFilter,
    },
    /// A tree whose contents live inside an archive. The archive itself
    /// is the backing file; its contents are never expanded during
    /// resolution.
    Archive(PathBuf),
    /// A tree only enumerable through its visitor.
    Generic(Arc<dyn OutputWalk>),
    /// Ordered child declarations, resolved in declared order.
    Composite(Vec<OutputDeclaration>),
    /// Never resolves to entries, at any nesting depth.
    Excluded(ExcludedKind),
}

impl OutputDeclaration {
    /// A directory tree with no filtering (every file under the root).
    #[must_use]
    pub fn tree(root: impl Into<PathBuf>) -> Self {
        Self::FilteredTree {
            root: root.into(),
            filter: PatternFilter::default(),
        }
    }
}
