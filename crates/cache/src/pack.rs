//! Packing declared outputs into portable cache entries and back.
//!
//! A packed entry is a zstd-compressed tar holding the integrity
//! manifest first, then one member per archived directory or file.
//! Member paths are `{slot}/{rel_path}` where `slot` is the index of
//! the backing entry in resolution order and `rel_path` is relative to
//! that entry's own root, so unpacking restores absolute locations from
//! the declaration alone, independent of where the build runs.
//!
//! Headers are normalized (mtime 0, uid/gid 0, mode 644/755): identical
//! logical output always serializes to identical bytes.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path};
use walkdir::WalkDir;

use bake_outputs::{BackingEntry, OutputDeclaration, PatternFilter, backing_entries};

use crate::entry::{EntryManifest, ManifestFile, PackedEntry};
use crate::{Error, Result};

/// Name of the manifest member, always first in the archive.
const MANIFEST_NAME: &str = "manifest.json";

/// zstd compression level for packed entries.
const ZSTD_LEVEL: i32 = 3;

enum Planned {
    Dir {
        archived: String,
    },
    File {
        archived: String,
        bytes: Vec<u8>,
        executable: bool,
    },
}

/// Pack a declaration's current on-disk outputs into a cache entry.
///
/// Backing entries are resolved in declaration order; a declared path
/// missing on disk contributes nothing. Directory structure under a
/// filtered tree is always archived; the pattern filter selects files.
///
/// # Errors
///
/// Returns an error if a filter pattern fails to compile, an output
/// path is not valid UTF-8, or reading the outputs fails.
pub fn pack(decl: &OutputDeclaration) -> Result<PackedEntry> {
    let entries = backing_entries(decl);
    let span = tracing::debug_span!("pack_outputs", slots = entries.len());
    let _guard = span.enter();

    let mut planned: Vec<Planned> = Vec::new();
    for (slot, entry) in entries.iter().enumerate() {
        match entry {
            BackingEntry::File { path } => plan_file(slot, path, &mut planned)?,
            BackingEntry::Directory { root, filter } => {
                plan_tree(slot, root, filter, &mut planned)?;
            }
        }
    }

    let manifest = EntryManifest {
        files: planned
            .iter()
            .filter_map(|item| match item {
                Planned::File {
                    archived, bytes, ..
                } => Some(ManifestFile {
                    path: archived.clone(),
                    size: bytes.len() as u64,
                    sha256: hex::encode(Sha256::digest(bytes)),
                }),
                Planned::Dir { .. } => None,
            })
            .collect(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| Error::serialization(format!("Failed to serialize entry manifest: {e}")))?;

    let encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)
        .map_err(|e| Error::configuration(format!("zstd encoder error: {e}")))?;
    let mut builder = tar::Builder::new(encoder);

    append_member(
        &mut builder,
        MANIFEST_NAME,
        tar::EntryType::Regular,
        0o644,
        &manifest_json,
    )?;
    for item in &planned {
        match item {
            Planned::Dir { archived } => {
                append_member(&mut builder, archived, tar::EntryType::Directory, 0o755, &[])?;
            }
            Planned::File {
                archived,
                bytes,
                executable,
            } => {
                let mode = if *executable { 0o755 } else { 0o644 };
                append_member(&mut builder, archived, tar::EntryType::Regular, mode, bytes)?;
            }
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::configuration(format!("tar finalize failed: {e}")))?;
    let bytes = encoder
        .finish()
        .map_err(|e| Error::configuration(format!("zstd finish failed: {e}")))?;

    tracing::debug!(
        files = manifest.files.len(),
        bytes = bytes.len(),
        "Packed outputs"
    );
    Ok(PackedEntry::from_bytes(bytes))
}

fn plan_file(slot: usize, path: &Path, planned: &mut Vec<Planned>) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Declared output missing; nothing to pack");
            return Ok(());
        }
        Err(e) => return Err(Error::io(e, path, "metadata")),
    };
    if !meta.is_file() {
        tracing::debug!(path = %path.display(), "Declared output is not a regular file; skipping");
        return Ok(());
    }
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        Error::configuration(format!(
            "Output path '{}' has no usable file name",
            path.display()
        ))
    })?;
    let bytes = fs::read(path).map_err(|e| Error::io(e, path, "read"))?;
    planned.push(Planned::File {
        archived: format!("{slot}/{name}"),
        bytes,
        executable: is_executable(&meta),
    });
    Ok(())
}

fn plan_tree(
    slot: usize,
    root: &Path,
    filter: &PatternFilter,
    planned: &mut Vec<Planned>,
) -> Result<()> {
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "Declared output tree missing; nothing to pack");
        return Ok(());
    }
    let matcher = filter.matcher()?;
    // sort_by_file_name keeps the member order independent of readdir order
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::io(e.into(), root, "walk"))?;
        if entry.path() == root {
            continue;
        }
        let rel = entry.path().strip_prefix(root).map_err(|_| {
            Error::configuration(format!(
                "path {} is not under output root {}",
                entry.path().display(),
                root.display()
            ))
        })?;
        let Some(rel_str) = rel.to_str() else {
            return Err(Error::configuration(format!(
                "Output path '{}' is not valid UTF-8",
                entry.path().display()
            )));
        };
        if entry.file_type().is_dir() {
            planned.push(Planned::Dir {
                archived: format!("{slot}/{rel_str}"),
            });
        } else if entry.file_type().is_file() {
            if !matcher.is_match(rel) {
                continue;
            }
            let meta = entry
                .metadata()
                .map_err(|e| Error::io(e.into(), entry.path(), "metadata"))?;
            let bytes = fs::read(entry.path()).map_err(|e| Error::io(e, entry.path(), "read"))?;
            planned.push(Planned::File {
                archived: format!("{slot}/{rel_str}"),
                bytes,
                executable: is_executable(&meta),
            });
        }
        // Symlinks and other kinds carry no reproducible content; skip.
    }
    Ok(())
}

fn append_member<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    kind: tar::EntryType,
    mode: u32,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| Error::io_no_path(e, format!("archive member {path}")))
}

/// Materialize a packed entry back onto disk at the locations the
/// declaration names, overwriting existing content and creating parent
/// directories as needed. Returns the number of files restored.
///
/// # Errors
///
/// Returns an error if the entry is malformed, a member does not match
/// the declared outputs, a restored file fails its integrity check, or
/// writing to disk fails. A failure partway is propagated — the caller
/// must treat the output tree as unusable, never as partially fresh.
pub fn unpack(decl: &OutputDeclaration, entry: &PackedEntry) -> Result<usize> {
    let entries = backing_entries(decl);
    let span = tracing::debug_span!("unpack_outputs", slots = entries.len());
    let _guard = span.enter();

    let decoder = zstd::Decoder::new(entry.bytes())
        .map_err(|e| Error::entry_format(format!("zstd decoder error: {e}")))?;
    let mut archive = tar::Archive::new(decoder);

    let mut manifest: Option<HashMap<String, ManifestFile>> = None;
    let mut restored = 0usize;

    let members = archive
        .entries()
        .map_err(|e| Error::entry_format(format!("unreadable entry archive: {e}")))?;
    for member in members {
        let mut member =
            member.map_err(|e| Error::entry_format(format!("unreadable archive member: {e}")))?;
        let raw = {
            let path_bytes = member.path_bytes();
            std::str::from_utf8(&path_bytes)
                .map_err(|_| Error::entry_format("archive member path is not UTF-8"))?
                .trim_end_matches('/')
                .to_string()
        };

        if manifest.is_none() {
            if raw != MANIFEST_NAME {
                return Err(Error::entry_format("entry manifest missing or out of order"));
            }
            let mut json = Vec::new();
            member
                .read_to_end(&mut json)
                .map_err(|e| Error::io_no_path(e, "read manifest"))?;
            let parsed: EntryManifest = serde_json::from_slice(&json)
                .map_err(|e| Error::serialization(format!("Failed to parse entry manifest: {e}")))?;
            manifest = Some(
                parsed
                    .files
                    .into_iter()
                    .map(|file| (file.path.clone(), file))
                    .collect(),
            );
            continue;
        }

        let (slot_str, rel_str) = raw
            .split_once('/')
            .ok_or_else(|| Error::entry_format(format!("unexpected archive member '{raw}'")))?;
        let slot: usize = slot_str
            .parse()
            .map_err(|_| Error::entry_format(format!("unexpected archive member '{raw}'")))?;
        let rel = Path::new(rel_str);
        if rel_str.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(Error::entry_format(format!(
                "unsafe archive member path '{raw}'"
            )));
        }
        let backing = entries.get(slot).ok_or_else(|| {
            Error::entry_format(format!(
                "archive member '{raw}' does not match the declared outputs"
            ))
        })?;
        let dest = match backing {
            BackingEntry::File { path } => {
                path.parent().unwrap_or_else(|| Path::new("")).join(rel)
            }
            BackingEntry::Directory { root, .. } => root.join(rel),
        };

        match member.header().entry_type() {
            tar::EntryType::Directory => {
                fs::create_dir_all(&dest).map_err(|e| Error::io(e, &dest, "create_dir_all"))?;
            }
            tar::EntryType::Regular => {
                let recorded = manifest
                    .as_ref()
                    .and_then(|by_path| by_path.get(&raw))
                    .ok_or_else(|| {
                        Error::entry_format(format!(
                            "archive member '{raw}' is not listed in the manifest"
                        ))
                    })?
                    .clone();
                let mut bytes = Vec::with_capacity(usize::try_from(recorded.size).unwrap_or(0));
                member
                    .read_to_end(&mut bytes)
                    .map_err(|e| Error::io_no_path(e, format!("read archive member {raw}")))?;
                let actual = hex::encode(Sha256::digest(&bytes));
                if actual != recorded.sha256 {
                    return Err(Error::Integrity {
                        path: raw,
                        expected: recorded.sha256,
                        actual,
                    });
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
                }
                fs::write(&dest, &bytes).map_err(|e| Error::io(e, &dest, "write"))?;
                let mode = member
                    .header()
                    .mode()
                    .map_err(|e| Error::io_no_path(e, "read member mode"))?;
                restore_mode(&dest, mode)?;
                restored += 1;
            }
            other => {
                tracing::debug!(kind = ?other, member = %raw, "Ignoring unsupported archive member");
            }
        }
    }

    if manifest.is_none() {
        return Err(Error::entry_format("entry contains no manifest"));
    }
    tracing::debug!(files = restored, "Unpacked outputs");
    Ok(restored)
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if mode & 0o100 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::io(e, path, "set_permissions"))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
