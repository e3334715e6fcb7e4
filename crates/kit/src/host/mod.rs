//! The virtualization host as seen by the provisioning driver.
//!
//! Every operation maps onto one invocation of a host tool. A failed
//! invocation surfaces as [`ProvisionError::HostCommand`] naming the logical
//! operation.
//!
//! [`ProvisionError::HostCommand`]: crate::error::ProvisionError::HostCommand

use std::collections::BTreeSet;
use std::fmt;

use camino::Utf8Path;
use clap::ValueEnum;

use crate::error::Result;

pub mod proxmox;

pub use proxmox::Proxmox;

/// Controller slot the boot disk is attached to.
pub const BOOT_DEVICE: &str = "sata0";

/// Storage format for imported disks
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum DiskFormat {
    /// QEMU Copy On Write 2 format (default)
    #[default]
    Qcow2,
    /// Raw disk image format
    Raw,
    /// VMware disk format
    Vmdk,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
            DiskFormat::Vmdk => "vmdk",
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host volume identifier such as `local-lvm:vm-400-disk-0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskVolume(pub String);

impl DiskVolume {
    /// The name a directory-backed storage gives the `slot`th disk imported
    /// for machine `id`, for when the host does not report it.
    pub fn assumed(storage: &str, id: u32, slot: u32, format: DiskFormat) -> Self {
        Self(format!("{storage}:{id}/vm-{id}-disk-{slot}.{format}"))
    }
}

impl fmt::Display for DiskVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hardware for a machine created without a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineShape {
    pub memory_mb: u32,
    pub cores: u32,
}

/// Management operations on the virtualization host.
pub trait HostManager {
    /// Every machine identifier currently assigned on the host.
    fn list_identifiers(&self) -> Result<BTreeSet<u32>>;

    fn list_storage_volumes(&self) -> Result<Vec<String>>;

    fn list_networks(&self) -> Result<Vec<String>>;

    /// Create machine `id` from a descriptor, importing the disks it references.
    fn import_descriptor(
        &self,
        id: u32,
        descriptor: &Utf8Path,
        storage: &str,
        format: DiskFormat,
    ) -> Result<()>;

    /// Create machine `id` with no disks.
    fn create_bare_machine(&self, id: u32, shape: MachineShape) -> Result<()>;

    fn set_display_name(&self, id: u32, name: &str) -> Result<()>;

    /// Copy a disk image into `storage` for machine `id`. Returns the new
    /// volume if the host reported it.
    fn import_disk(
        &self,
        id: u32,
        disk: &Utf8Path,
        storage: &str,
        format: DiskFormat,
    ) -> Result<Option<DiskVolume>>;

    fn attach_boot_disk(&self, id: u32, volume: &DiskVolume) -> Result<()>;

    fn set_boot_order(&self, id: u32, device: &str) -> Result<()>;

    fn attach_network(&self, id: u32, bridge: &str) -> Result<()>;

    fn start_machine(&self, id: u32) -> Result<()>;

    /// Part of the host interface only; a provisioning run never stops a
    /// machine.
    #[allow(dead_code)]
    fn stop_machine(&self, id: u32) -> Result<()>;

    fn machine_config(&self, id: u32) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assumed_volume() {
        assert_eq!(
            DiskVolume::assumed("local", 400, 1, DiskFormat::Qcow2).to_string(),
            "local:400/vm-400-disk-1.qcow2"
        );
        assert_eq!(
            DiskVolume::assumed("nfs", 512, 0, DiskFormat::Raw).0,
            "nfs:512/vm-512-disk-0.raw"
        );
    }
}
