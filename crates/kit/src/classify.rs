//! Artifact classification by file extension.
//!
//! No content sniffing happens here; the extraction step does its own format
//! detection.

use camino::Utf8Path;

/// Disk image formats `qm importdisk` accepts.
pub const RAW_DISK_EXTENSIONS: &[&str] =
    &["vmdk", "qcow2", "qcow", "vdi", "vhd", "vhdx", "raw", "img"];

/// Machine descriptors `qm importovf` accepts.
pub const DESCRIPTOR_EXTENSION: &str = "ovf";

/// Everything the extraction step knows how to unpack.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[
    "ova", "tar", "tgz", "gz", "tbz", "tbz2", "bz2", "txz", "xz", "zip", "7z", "rar",
];

/// What a file inside the work area turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ArtifactKind {
    RawDisk,
    Descriptor,
    Archive,
    Unknown,
}

impl ArtifactKind {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::RawDisk => RAW_DISK_EXTENSIONS,
            ArtifactKind::Descriptor => &[DESCRIPTOR_EXTENSION],
            ArtifactKind::Archive => ARCHIVE_EXTENSIONS,
            ArtifactKind::Unknown => &[],
        }
    }
}

/// Lowercased extension of `path`, if any.
pub fn extension_lowercase(path: &Utf8Path) -> Option<String> {
    path.extension().map(str::to_ascii_lowercase)
}

pub fn classify(path: &Utf8Path) -> ArtifactKind {
    let Some(ext) = extension_lowercase(path) else {
        return ArtifactKind::Unknown;
    };
    [
        ArtifactKind::RawDisk,
        ArtifactKind::Descriptor,
        ArtifactKind::Archive,
    ]
    .into_iter()
    .find(|kind| kind.extensions().contains(&ext.as_str()))
    .unwrap_or(ArtifactKind::Unknown)
}
