//! Recursive file search inside an extracted tree.
//!
//! Results come back in a depth-first walk with entries sorted by file name,
//! so "the first match" is stable for identical directory contents. An empty
//! vector means nothing matched; callers decide whether that is fatal.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::classify::{classify, ArtifactKind};

fn walk_files(root: &Utf8Path, mut keep: impl FnMut(&Utf8Path) -> bool) -> Vec<Utf8PathBuf> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping walk entry under {root}: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(p) => p,
            Err(p) => {
                warn!("Ignoring non UTF-8 path {}", p.display());
                continue;
            }
        };
        if keep(&path) {
            found.push(path);
        }
    }
    found
}

/// Every regular file under `root` whose extension matches `ext`, ignoring case.
/// A leading dot on `ext` is accepted.
pub fn find_by_extension(root: &Utf8Path, ext: &str) -> Vec<Utf8PathBuf> {
    let ext = ext.trim_start_matches('.');
    walk_files(root, |p| {
        p.extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    })
}

/// Every regular file under `root` that classifies as `kind`.
pub fn find_by_kind(root: &Utf8Path, kind: ArtifactKind) -> Vec<Utf8PathBuf> {
    let found = walk_files(root, |p| classify(p) == kind);
    debug!("{} {kind} file(s) under {root}", found.len());
    found
}
