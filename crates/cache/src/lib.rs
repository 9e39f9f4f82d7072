//! Task output caching for bake
//!
//! This crate turns a task's declared outputs into a portable cache
//! entry and back, and persists entries keyed by an input fingerprint:
//! - Deterministic packing of resolved outputs into a zstd-compressed
//!   tar with normalized metadata (identical logical output ⇒
//!   byte-identical entry)
//! - Per-file SHA-256 integrity manifest, verified on unpack
//! - A backend-agnostic key → entry store with a local-directory
//!   reference backend (atomic publication, safe under concurrent
//!   workers)
//!
//! # Entry layout
//!
//! ```text
//! <store dir>/<cache key>        (one file per key)
//!   manifest.json                (first member: integrity index)
//!   0/report.xml                 ({slot}/{rel_path} per output file)
//!   1/classes/...
//! ```
//!
//! The decision engine in `bake-executor` drives pack/unpack around a
//! wrapped task executor.

mod error;

pub mod entry;
pub mod pack;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use entry::{CacheKey, EntryManifest, ManifestFile, PackedEntry};
pub use pack::{pack, unpack};
pub use store::{CacheStore, LocalDirectoryStore};
