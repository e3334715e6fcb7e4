//! Renaming files whose names upset host tooling.
//!
//! Spaces become underscores and colons become hyphens; only the final path
//! component is touched. A failed rename is not an error: the original path
//! is handed back and callers that need a clean name have to check again.

use std::borrow::Cow;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::error::{ResolutionError, Result};

fn is_unsafe(c: char) -> bool {
    matches!(c, ' ' | ':')
}

pub fn safe_file_name(name: &str) -> Cow<'_, str> {
    if !name.contains(is_unsafe) {
        return Cow::Borrowed(name);
    }
    Cow::Owned(
        name.chars()
            .map(|c| match c {
                ' ' => '_',
                ':' => '-',
                c => c,
            })
            .collect(),
    )
}

pub fn needs_sanitizing(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|n| n.contains(is_unsafe))
}

/// Rename `path` to its safe name, returning the path to use from now on.
pub fn sanitize(path: &Utf8Path) -> Utf8PathBuf {
    let Some(name) = path.file_name() else {
        return path.to_owned();
    };
    let safe = safe_file_name(name);
    if let Cow::Borrowed(_) = safe {
        return path.to_owned();
    }
    let target = path.with_file_name(safe.as_ref());
    if target.exists() {
        warn!("Not renaming {path}: {target} already exists");
        return path.to_owned();
    }
    match std::fs::rename(path, &target) {
        Ok(()) => {
            debug!("Renamed {path} -> {target}");
            target
        }
        Err(e) => {
            warn!("Failed to rename {path} to {target}: {e}");
            path.to_owned()
        }
    }
}

/// Replace every textual occurrence of `old_name` in the descriptor with `new_name`.
pub fn rewrite_references(descriptor: &Utf8Path, old_name: &str, new_name: &str) -> Result<()> {
    let wrap = |source| ResolutionError::Descriptor {
        path: descriptor.to_owned(),
        source,
    };
    let content = std::fs::read_to_string(descriptor).map_err(wrap)?;
    if !content.contains(old_name) {
        debug!("{descriptor} does not mention {old_name}");
        return Ok(());
    }
    let updated = content.replace(old_name, new_name);
    std::fs::write(descriptor, updated).map_err(wrap)?;
    debug!("Rewrote references to {old_name} in {descriptor}");
    Ok(())
}
