use camino::Utf8Path;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;

use crate::classify::{classify, ArtifactKind};

/// Bytes per unit; binary prefixes are powers of 1024, decimal ones powers of 1000
fn unit_to_bytes(unit: &str) -> Option<u128> {
    match unit {
        "B" | "bytes" => Some(1),
        "k" | "K" | "KiB" => Some(1024),
        "M" | "MiB" => Some(1024u128.pow(2)),
        "G" | "GiB" => Some(1024u128.pow(3)),
        "T" | "TiB" => Some(1024u128.pow(4)),

        "KB" => Some(1_000),
        "MB" => Some(1_000u128.pow(2)),
        "GB" => Some(1_000u128.pow(3)),
        "TB" => Some(1_000u128.pow(4)),

        _ => None,
    }
}

/// Parse a memory string (like "2G", "1024M", "1GB", "512") to megabytes
pub fn parse_memory_to_mb(memory_str: &str) -> Result<u32> {
    let memory_str = memory_str.trim();
    if memory_str.is_empty() {
        return Err(eyre!("Memory string cannot be empty"));
    }

    let split = memory_str
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(memory_str.len());
    let (number_str, unit) = memory_str.split_at(split);
    let unit = match unit.trim() {
        // No suffix, assume megabytes
        "" => "M",
        "g" => "G",
        "m" => "M",
        u => u,
    };

    let number: f64 = number_str
        .parse()
        .context("Invalid number in memory specification")?;
    let bytes_per_unit = unit_to_bytes(unit).ok_or_else(|| eyre!("Unknown unit: {}", unit))? as f64;

    let mib = 1024.0 * 1024.0;
    let total_mb = (number * bytes_per_unit) / mib;
    if total_mb < 1.0 || total_mb > f64::from(u32::MAX) {
        return Err(eyre!("Memory size out of range: {memory_str}"));
    }
    Ok(total_mb as u32)
}

/// Derive a machine display name from a downloaded file name.
///
/// Known archive, disk and descriptor extensions are stripped and the rest is
/// reduced to a DNS-style label. Falls back to `vm-<id>`.
pub fn display_name_for(file_name: &str, id: u32) -> String {
    let mut stem = file_name;
    while let Some((base, _)) = stem.rsplit_once('.') {
        if base.is_empty() || classify(Utf8Path::new(stem)) == ArtifactKind::Unknown {
            break;
        }
        stem = base;
    }

    let mut name = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '.' {
            c
        } else {
            '-'
        };
        if c == '-' && name.ends_with('-') {
            continue;
        }
        name.push(c);
    }
    let name = name.trim_matches(|c: char| c == '-' || c == '.');
    if name.is_empty() {
        format!("vm-{id}")
    } else {
        name.to_owned()
    }
}
