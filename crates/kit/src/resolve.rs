//! Turning a downloaded artifact into a disk image and optional descriptor.
//!
//! A raw disk is used as-is. Anything else is unpacked into the work area and
//! searched; if no disk image shows up, the archives it contained are
//! unpacked in turn, each one's contents searched before moving on to the
//! next, up to [`MAX_NESTING_DEPTH`] levels of nesting. The descriptor search is independent and may come up empty, which
//! is how disk-only distributions are supported.
//!
//! When more than one disk image or descriptor exists, the first in walk order
//! wins. Distributions with several disks are not handled.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::classify::{classify, ArtifactKind, DESCRIPTOR_EXTENSION};
use crate::error::{ProvisionError, ResolutionError, Result};
use crate::sanitize::{needs_sanitizing, rewrite_references, sanitize};
use crate::workarea::WorkArea;
use crate::{extract, locate};

/// Archives nested deeper than this are rejected.
pub const MAX_NESTING_DEPTH: usize = 5;

/// Where the disk image (and the descriptor, if any) ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub disk_image: Utf8PathBuf,
    pub descriptor: Option<Utf8PathBuf>,
}

/// Unpack `archive`, then the archives it contained, until a disk image
/// appears. `depth` is 1 for the downloaded artifact and grows by one per
/// nesting level; sibling archives share a level.
fn unpack_until_disk(
    archive: &Utf8Path,
    work: &WorkArea,
    depth: usize,
    unpacked: &mut BTreeSet<Utf8PathBuf>,
) -> Result<Utf8PathBuf> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ResolutionError::TooDeep {
            depth: MAX_NESTING_DEPTH,
        }
        .into());
    }
    unpacked.insert(archive.to_owned());

    let dest = work.scratch_dir("unpacked")?;
    extract::extract(archive, &dest)?;

    if let Some(disk) = locate::find_by_kind(work.path(), ArtifactKind::RawDisk)
        .into_iter()
        .next()
    {
        return Ok(disk);
    }

    for nested in locate::find_by_kind(&dest, ArtifactKind::Archive) {
        if unpacked.contains(&nested) {
            continue;
        }
        info!(
            "No disk image yet, unpacking nested {} (level {})",
            nested.file_name().unwrap_or(nested.as_str()),
            depth + 1
        );
        match unpack_until_disk(&nested, work, depth + 1, unpacked) {
            Err(ProvisionError::Resolution(ResolutionError::NoDiskImage { .. })) => {
                debug!("Nothing usable inside {nested}");
            }
            r => return r,
        }
    }
    Err(ResolutionError::NoDiskImage {
        root: work.path().to_owned(),
    }
    .into())
}

/// Resolve `artifact`, which must live inside `work`.
pub fn resolve(artifact: &Utf8Path, work: &WorkArea) -> Result<Resolution> {
    if classify(artifact) == ArtifactKind::RawDisk {
        debug!("{artifact} is already a disk image");
        return Ok(Resolution {
            disk_image: artifact.to_owned(),
            descriptor: None,
        });
    }

    let mut unpacked = BTreeSet::new();
    let mut disk_image = unpack_until_disk(artifact, work, 1, &mut unpacked)?;
    let descriptor = locate::find_by_extension(work.path(), DESCRIPTOR_EXTENSION)
        .into_iter()
        .next();

    match &descriptor {
        Some(descriptor) if needs_sanitizing(&disk_image) => {
            let renamed = sanitize(&disk_image);
            if renamed != disk_image {
                // Both come from a path inside the work area, so file names exist
                let old_name = disk_image.file_name().unwrap_or_default();
                let new_name = renamed.file_name().unwrap_or_default();
                rewrite_references(descriptor, old_name, new_name)?;
                disk_image = renamed;
            } else {
                warn!("Disk image name {disk_image} could not be sanitized");
            }
        }
        Some(_) => {}
        None => info!("No descriptor found, continuing with the disk image alone"),
    }

    info!(
        "Resolved disk image {}{}",
        disk_image,
        descriptor
            .as_ref()
            .map(|d| format!(" with descriptor {d}"))
            .unwrap_or_default()
    );
    Ok(Resolution {
        disk_image,
        descriptor,
    })
}
