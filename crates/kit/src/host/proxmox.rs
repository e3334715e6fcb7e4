//! Proxmox VE host, driven through `qm`, `pvesm` and `ip`.

use std::collections::BTreeSet;
use std::process::Command;

use camino::Utf8Path;
use serde::Deserialize;
use tracing::debug;

use super::{DiskFormat, DiskVolume, HostManager, MachineShape, BOOT_DEVICE};
use crate::command_run::CommandRun;
use crate::error::{ProvisionError, Result};

const QM: &str = "qm";
const PVESM: &str = "pvesm";
const IP: &str = "ip";

/// One `qm` invocation.
#[derive(Debug)]
enum QmCommand<'a> {
    List,
    ImportOvf {
        id: u32,
        descriptor: &'a Utf8Path,
        storage: &'a str,
        format: DiskFormat,
    },
    Create {
        id: u32,
        shape: MachineShape,
    },
    SetName {
        id: u32,
        name: &'a str,
    },
    ImportDisk {
        id: u32,
        disk: &'a Utf8Path,
        storage: &'a str,
        format: DiskFormat,
    },
    AttachBootDisk {
        id: u32,
        volume: &'a DiskVolume,
    },
    SetBootOrder {
        id: u32,
        device: &'a str,
    },
    AttachNetwork {
        id: u32,
        bridge: &'a str,
    },
    Start(u32),
    Stop(u32),
    Config(u32),
}

impl QmCommand<'_> {
    /// Logical operation name used in errors.
    fn operation(&self) -> &'static str {
        match self {
            QmCommand::List => "listIdentifiers",
            QmCommand::ImportOvf { .. } => "importDescriptor",
            QmCommand::Create { .. } => "createBareMachine",
            QmCommand::SetName { .. } => "setDisplayName",
            QmCommand::ImportDisk { .. } => "importDisk",
            QmCommand::AttachBootDisk { .. } => "attachBootDisk",
            QmCommand::SetBootOrder { .. } => "setBootOrder",
            QmCommand::AttachNetwork { .. } => "attachNetwork",
            QmCommand::Start(_) => "startMachine",
            QmCommand::Stop(_) => "stopMachine",
            QmCommand::Config(_) => "getMachineConfig",
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            QmCommand::List => vec!["list".into()],
            QmCommand::ImportOvf {
                id,
                descriptor,
                storage,
                format,
            } => vec![
                "importovf".into(),
                id.to_string(),
                descriptor.to_string(),
                storage.to_string(),
                "--format".into(),
                format.to_string(),
            ],
            QmCommand::Create { id, shape } => vec![
                "create".into(),
                id.to_string(),
                "--memory".into(),
                shape.memory_mb.to_string(),
                "--cores".into(),
                shape.cores.to_string(),
            ],
            QmCommand::SetName { id, name } => {
                vec!["set".into(), id.to_string(), "--name".into(), name.to_string()]
            }
            QmCommand::ImportDisk {
                id,
                disk,
                storage,
                format,
            } => vec![
                "importdisk".into(),
                id.to_string(),
                disk.to_string(),
                storage.to_string(),
                "--format".into(),
                format.to_string(),
            ],
            QmCommand::AttachBootDisk { id, volume } => vec![
                "set".into(),
                id.to_string(),
                format!("--{BOOT_DEVICE}"),
                volume.to_string(),
            ],
            QmCommand::SetBootOrder { id, device } => vec![
                "set".into(),
                id.to_string(),
                "--boot".into(),
                format!("order={device}"),
            ],
            QmCommand::AttachNetwork { id, bridge } => vec![
                "set".into(),
                id.to_string(),
                "--net0".into(),
                format!("model=virtio,bridge={bridge}"),
            ],
            QmCommand::Start(id) => vec!["start".into(), id.to_string()],
            QmCommand::Stop(id) => vec!["stop".into(), id.to_string()],
            QmCommand::Config(id) => vec!["config".into(), id.to_string()],
        }
    }
}

/// Identifiers from `qm list`; the header and anything unparsable are skipped.
fn parse_qm_list(output: &str) -> BTreeSet<u32> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|first| first.parse().ok())
        .collect()
}

/// Storage names from `pvesm status`.
fn parse_pvesm_status(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

/// The volume from `Successfully imported disk as 'unused0:local-lvm:vm-400-disk-0'`.
fn parse_imported_volume(output: &str) -> Option<DiskVolume> {
    const MARKER: &str = "Successfully imported disk as '";
    let line = output.lines().find(|l| l.contains(MARKER))?;
    let (_, rest) = line.split_once(MARKER)?;
    let (quoted, _) = rest.split_once('\'')?;
    let volume = match quoted.split_once(':') {
        Some((slot, volume)) if slot.starts_with("unused") => volume,
        _ => quoted,
    };
    (!volume.is_empty()).then(|| DiskVolume(volume.to_owned()))
}

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
}

/// A Proxmox VE node this process runs on.
#[derive(Debug)]
pub struct Proxmox;

impl Proxmox {
    fn qm(&self, cmd: QmCommand<'_>) -> Result<String> {
        let args = cmd.args();
        debug!("Running: qm {:?}", args);
        Command::new(QM)
            .args(&args)
            .run_get_string()
            .map_err(|e| ProvisionError::host(cmd.operation(), format!("{e:#}")))
    }
}

impl HostManager for Proxmox {
    fn list_identifiers(&self) -> Result<BTreeSet<u32>> {
        self.qm(QmCommand::List).map(|out| parse_qm_list(&out))
    }

    fn list_storage_volumes(&self) -> Result<Vec<String>> {
        let out = Command::new(PVESM)
            .arg("status")
            .run_get_string()
            .map_err(|e| ProvisionError::host("listStorageVolumes", format!("{e:#}")))?;
        Ok(parse_pvesm_status(&out))
    }

    fn list_networks(&self) -> Result<Vec<String>> {
        let links: Vec<IpLink> = Command::new(IP)
            .args(["-j", "link", "show", "type", "bridge"])
            .run_and_parse_json()
            .map_err(|e| ProvisionError::host("listNetworks", format!("{e:#}")))?;
        Ok(links.into_iter().map(|l| l.ifname).collect())
    }

    fn import_descriptor(
        &self,
        id: u32,
        descriptor: &Utf8Path,
        storage: &str,
        format: DiskFormat,
    ) -> Result<()> {
        self.qm(QmCommand::ImportOvf {
            id,
            descriptor,
            storage,
            format,
        })
        .map(drop)
    }

    fn create_bare_machine(&self, id: u32, shape: MachineShape) -> Result<()> {
        self.qm(QmCommand::Create { id, shape }).map(drop)
    }

    fn set_display_name(&self, id: u32, name: &str) -> Result<()> {
        self.qm(QmCommand::SetName { id, name }).map(drop)
    }

    fn import_disk(
        &self,
        id: u32,
        disk: &Utf8Path,
        storage: &str,
        format: DiskFormat,
    ) -> Result<Option<DiskVolume>> {
        let out = self.qm(QmCommand::ImportDisk {
            id,
            disk,
            storage,
            format,
        })?;
        Ok(parse_imported_volume(&out))
    }

    fn attach_boot_disk(&self, id: u32, volume: &DiskVolume) -> Result<()> {
        self.qm(QmCommand::AttachBootDisk { id, volume }).map(drop)
    }

    fn set_boot_order(&self, id: u32, device: &str) -> Result<()> {
        self.qm(QmCommand::SetBootOrder { id, device }).map(drop)
    }

    fn attach_network(&self, id: u32, bridge: &str) -> Result<()> {
        self.qm(QmCommand::AttachNetwork { id, bridge }).map(drop)
    }

    fn start_machine(&self, id: u32) -> Result<()> {
        self.qm(QmCommand::Start(id)).map(drop)
    }

    fn stop_machine(&self, id: u32) -> Result<()> {
        self.qm(QmCommand::Stop(id)).map(drop)
    }

    fn machine_config(&self, id: u32) -> Result<String> {
        self.qm(QmCommand::Config(id))
    }
}
