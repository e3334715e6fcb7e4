//! Unpacking downloaded archives.
//!
//! The format is detected from the file's leading bytes, with the extension
//! as a fallback. Tarballs (including OVA, which is a plain tar) and
//! gzip/bzip2/xz streams are handled in-process; zip, 7z and rar are handed to
//! the external `7z` tool.

use std::fs::File;
use std::io::{Read, Write};
use std::process::{Command, Stdio};

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::classify::extension_lowercase;
use crate::command_run::CommandRun;
use crate::error::{ProvisionError, Result};

/// External extractor for formats without an in-process implementation.
const EXTERNAL_EXTRACTOR: &str = "7z";

/// Enough to see the POSIX tar magic at offset 257.
const HEADER_LEN: u64 = 512;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SEVEN_ZIP_MAGIC: &[u8] = &[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c];
const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// A tarball, possibly compressed.
    Tar(Compression),
    /// A single compressed file such as `disk.vmdk.gz`.
    Stream(Compression),
    /// zip, 7z or rar.
    External,
}

fn detect_compression(header: &[u8]) -> Compression {
    if header.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else if header.starts_with(BZIP2_MAGIC) {
        Compression::Bzip2
    } else if header.starts_with(XZ_MAGIC) {
        Compression::Xz
    } else {
        Compression::None
    }
}

fn is_tar_header(header: &[u8]) -> bool {
    header.get(257..262) == Some(b"ustar".as_slice())
}

fn is_external_header(header: &[u8]) -> bool {
    [ZIP_MAGIC, SEVEN_ZIP_MAGIC, RAR_MAGIC]
        .iter()
        .any(|m| header.starts_with(m))
}

fn decoder(file: File, compression: Compression) -> Box<dyn Read> {
    match compression {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(file)),
        Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(file)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(file)),
    }
}

fn read_header(reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    reader.take(HEADER_LEN).read_to_end(&mut header)?;
    Ok(header)
}

impl ArchiveFormat {
    fn from_extension(path: &Utf8Path) -> Option<Self> {
        let format = match extension_lowercase(path)?.as_str() {
            "ova" | "tar" => Self::Tar(Compression::None),
            "tgz" => Self::Tar(Compression::Gzip),
            "tbz" | "tbz2" => Self::Tar(Compression::Bzip2),
            "txz" => Self::Tar(Compression::Xz),
            "gz" => Self::Stream(Compression::Gzip),
            "bz2" => Self::Stream(Compression::Bzip2),
            "xz" => Self::Stream(Compression::Xz),
            "zip" | "7z" | "rar" => Self::External,
            _ => return None,
        };
        Some(format)
    }

    /// Work out how to unpack `path`.
    pub fn detect(path: &Utf8Path) -> Result<Self> {
        let open = || File::open(path).map_err(|e| ProvisionError::extraction(path, e));
        let header = read_header(open()?).map_err(|e| ProvisionError::extraction(path, e))?;

        let format = match detect_compression(&header) {
            Compression::None if is_tar_header(&header) => Self::Tar(Compression::None),
            Compression::None if is_external_header(&header) => Self::External,
            Compression::None => Self::from_extension(path)
                .ok_or_else(|| ProvisionError::extraction(path, "unrecognized archive format"))?,
            compression => {
                let inner = read_header(decoder(open()?, compression))
                    .map_err(|e| ProvisionError::extraction(path, e))?;
                if is_tar_header(&inner) {
                    Self::Tar(compression)
                } else {
                    Self::Stream(compression)
                }
            }
        };
        debug!("Detected {format:?} for {path}");
        Ok(format)
    }
}

fn unpack_tar(reader: impl Read, dest: &Utf8Path) -> std::io::Result<u64> {
    let mut archive = tar::Archive::new(reader);
    let mut unpacked = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.unpack_in(dest)? {
            unpacked += 1;
        } else {
            warn!(
                "Skipped entry escaping the extraction directory: {}",
                entry.path()?.display()
            );
        }
    }
    if unpacked == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "archive contains no entries",
        ));
    }
    Ok(unpacked)
}

/// Name for the payload of a single compressed file.
fn stream_output_name(archive: &Utf8Path) -> String {
    let name = archive.file_name().unwrap_or("payload");
    match extension_lowercase(archive).as_deref() {
        Some("gz" | "bz2" | "xz") => archive.file_stem().unwrap_or(name).to_owned(),
        _ => format!("{name}.out"),
    }
}

fn decompress_stream(archive: &Utf8Path, compression: Compression, dest: &Utf8Path) -> std::io::Result<u64> {
    let mut reader = decoder(File::open(archive)?, compression);
    let target = dest.join(stream_output_name(archive));
    let mut out = File::create(&target)?;
    let written = std::io::copy(&mut reader, &mut out)?;
    out.flush()?;
    debug!("Decompressed {written} bytes to {target}");
    Ok(written)
}

/// `7z x` with overwrite, no progress output and `dest` as the target.
fn external_args(archive: &Utf8Path, dest: &Utf8Path) -> Vec<String> {
    vec![
        "x".into(),
        "-y".into(),
        "-bd".into(),
        format!("-o{dest}"),
        archive.to_string(),
    ]
}

fn extract_external(archive: &Utf8Path, dest: &Utf8Path) -> color_eyre::Result<()> {
    Command::new(EXTERNAL_EXTRACTOR)
        .args(external_args(archive, dest))
        .stdout(Stdio::null())
        .run()
}

/// Unpack `archive` into the existing directory `dest`.
pub fn extract(archive: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    let format = ArchiveFormat::detect(archive)?;
    info!(
        "Extracting {}",
        archive.file_name().unwrap_or(archive.as_str())
    );
    match format {
        ArchiveFormat::Tar(compression) => {
            let file = File::open(archive).map_err(|e| ProvisionError::extraction(archive, e))?;
            let n = unpack_tar(decoder(file, compression), dest)
                .map_err(|e| ProvisionError::extraction(archive, e))?;
            debug!("Unpacked {n} entries into {dest}");
        }
        ArchiveFormat::Stream(compression) => {
            decompress_stream(archive, compression, dest)
                .map_err(|e| ProvisionError::extraction(archive, e))?;
        }
        ArchiveFormat::External => {
            extract_external(archive, dest)
                .map_err(|e| ProvisionError::extraction(archive, format!("{e:#}")))?;
        }
    }
    Ok(())
}
