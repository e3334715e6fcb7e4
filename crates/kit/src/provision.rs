//! Provision a machine from a remote image distribution.
//!
//! A run moves strictly forward through [`Stage`]s: the identifier is settled
//! before any network I/O, the artifact is downloaded into a fresh
//! [`WorkArea`] and resolved to a disk image, and the machine is registered and
//! configured on the host. The work area is removed on every path once it has
//! been created. Host-side state is never rolled back; when a run fails after
//! the host accepted the machine, the identifier is logged so it can be
//! removed by hand.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::{debug, error, info, warn};

use crate::allocate::resolve_identifier;
use crate::common_opts::MachineOpts;
use crate::error::{ProvisionError, Result};
use crate::fetch::Fetch;
use crate::host::{DiskFormat, DiskVolume, HostManager, MachineShape, BOOT_DEVICE};
use crate::resolve::{resolve, Resolution};
use crate::utils::display_name_for;
use crate::workarea::WorkArea;

/// Default whole-download timeout in seconds
const DEFAULT_TIMEOUT_SECONDS: u64 = 2 * 60 * 60;

/// Lowest identifier the host accepts
const MIN_MACHINE_ID: i64 = 100;

/// Options for a single provisioning run
#[derive(Parser, Debug, Clone)]
pub struct ProvisionOpts {
    /// URL of the image distribution (http, https or file)
    #[clap(long)]
    pub url: String,

    /// Host storage the disks are imported into
    #[clap(long, env = "VMPROV_STORAGE")]
    pub storage: String,

    /// Bridge the machine's network interface is attached to
    #[clap(long, env = "VMPROV_NETWORK")]
    pub network: String,

    /// Machine identifier; the lowest free one from 400-653 when omitted
    #[clap(long, value_parser = clap::value_parser!(u32).range(MIN_MACHINE_ID..))]
    pub id: Option<u32>,

    /// Display name; derived from the downloaded file name when omitted
    #[clap(long)]
    pub name: Option<String>,

    #[clap(flatten)]
    pub machine: MachineOpts,

    /// Storage format for imported disks
    #[clap(long, value_enum, default_value_t = DiskFormat::Qcow2)]
    pub format: DiskFormat,

    /// Start the machine once it is configured
    #[clap(long)]
    pub start: bool,

    /// Directory the temporary work area is created in
    #[clap(long, env = "VMPROV_WORK_DIR")]
    pub work_dir: Option<Utf8PathBuf>,

    /// Download timeout in seconds (0 disables)
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    pub timeout: u64,

    /// Do not check that the storage and network exist on the host
    #[clap(long)]
    pub skip_host_checks: bool,

    /// Hide the download progress bar
    #[clap(long, short)]
    pub quiet: bool,
}

impl ProvisionOpts {
    pub fn download_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Stage {
    Idle,
    IdentifierResolved,
    Downloaded,
    Resolved,
    Registered,
    Configured,
    Completed,
    Failed,
}

/// Records and logs stage transitions.
#[derive(Debug)]
pub struct StageTracker {
    stage: Stage,
    history: Vec<Stage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            history: vec![Stage::Idle],
        }
    }
}

impl StageTracker {
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    fn advance(&mut self, next: Stage) {
        info!("{} -> {}", self.stage, next);
        self.stage = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: &ProvisionError) {
        error!("Provisioning failed during {}: {}", self.stage, err);
        self.stage = Stage::Failed;
        self.history.push(Stage::Failed);
    }
}

/// What was created, for the completion message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub id: u32,
    pub name: String,
    pub boot_disk: DiskVolume,
    pub from_descriptor: bool,
    pub storage: String,
    pub network: String,
    pub started: bool,
    pub config_lines: Option<usize>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VM '{}' ({}) created successfully!", self.name, self.id)?;
        writeln!(f, "  Boot disk: {}", self.boot_disk)?;
        writeln!(
            f,
            "  Source: {}",
            if self.from_descriptor {
                "descriptor and disk image"
            } else {
                "disk image only"
            }
        )?;
        writeln!(f, "  Storage: {}", self.storage)?;
        writeln!(f, "  Network: {}", self.network)?;
        if let Some(lines) = self.config_lines {
            writeln!(f, "  Configuration entries: {lines}")?;
        }
        if self.started {
            write!(f, "Started; use 'qm terminal {}' to connect", self.id)
        } else {
            write!(f, "Use 'qm start {}' to boot it", self.id)
        }
    }
}

/// Log that machine `id` may be left on the host.
fn report_leftover(id: u32) {
    error!(
        "Machine {id} was created on the host and is not removed automatically; \
         inspect it with 'qm config {id}' or remove it with 'qm destroy {id}'"
    );
}

/// Check the storage and network exist before doing anything expensive.
fn check_host(opts: &ProvisionOpts, host: &dyn HostManager) -> Result<()> {
    let storages = host.list_storage_volumes()?;
    if !storages.contains(&opts.storage) {
        return Err(ProvisionError::host(
            "listStorageVolumes",
            format!(
                "storage '{}' not found on host (available: {})",
                opts.storage,
                storages.join(", ")
            ),
        ));
    }
    let networks = host.list_networks()?;
    if !networks.contains(&opts.network) {
        return Err(ProvisionError::host(
            "listNetworks",
            format!(
                "network '{}' not found on host (available: {})",
                opts.network,
                networks.join(", ")
            ),
        ));
    }
    Ok(())
}

/// Create the machine, import its boot disk and name it.
fn register(
    opts: &ProvisionOpts,
    host: &dyn HostManager,
    id: u32,
    resolution: &Resolution,
    name: &str,
) -> Result<DiskVolume> {
    // A descriptor import occupies the first disk slot
    let slot = match &resolution.descriptor {
        Some(descriptor) => {
            info!("Importing descriptor {descriptor} as machine {id}");
            host.import_descriptor(id, descriptor, &opts.storage, opts.format)?;
            1
        }
        None => {
            info!("Creating machine {id} ({})", opts.machine);
            let shape = MachineShape {
                memory_mb: opts.machine.memory_mb,
                cores: opts.machine.cores,
            };
            host.create_bare_machine(id, shape)?;
            0
        }
    };

    let attempt = || -> Result<DiskVolume> {
        info!("Importing disk {} into {}", resolution.disk_image, opts.storage);
        let volume = match host.import_disk(id, &resolution.disk_image, &opts.storage, opts.format)? {
            Some(volume) => volume,
            None => {
                let assumed = DiskVolume::assumed(&opts.storage, id, slot, opts.format);
                warn!("Host did not report the imported volume, assuming {assumed}");
                assumed
            }
        };
        host.set_display_name(id, name)?;
        Ok(volume)
    };
    attempt().inspect_err(|_| report_leftover(id))
}

/// Attach the boot disk and network. Every step is attempted; the first
/// failure is returned.
fn configure(
    opts: &ProvisionOpts,
    host: &dyn HostManager,
    id: u32,
    volume: &DiskVolume,
) -> Result<()> {
    let results = [
        host.attach_boot_disk(id, volume),
        host.set_boot_order(id, BOOT_DEVICE),
        host.attach_network(id, &opts.network),
    ];
    let mut first = None;
    for err in results.into_iter().filter_map(|r| r.err()) {
        error!("{err}");
        first.get_or_insert(err);
    }
    match first {
        Some(err) => {
            report_leftover(id);
            Err(err)
        }
        None => Ok(()),
    }
}

/// Everything that happens inside the work area.
fn provision_in(
    opts: &ProvisionOpts,
    host: &dyn HostManager,
    fetcher: &dyn Fetch,
    tracker: &mut StageTracker,
    id: u32,
    work: &WorkArea,
) -> Result<Summary> {
    let artifact = fetcher.fetch(&opts.url, work.path())?;
    tracker.advance(Stage::Downloaded);

    let resolution = resolve(&artifact, work)?;
    tracker.advance(Stage::Resolved);

    let name = match &opts.name {
        Some(name) => name.clone(),
        None => display_name_for(artifact.file_name().unwrap_or_default(), id),
    };
    let boot_disk = register(opts, host, id, &resolution, &name)?;
    tracker.advance(Stage::Registered);

    configure(opts, host, id, &boot_disk)?;
    tracker.advance(Stage::Configured);

    if opts.start {
        info!("Starting machine {id}");
        host.start_machine(id).inspect_err(|_| report_leftover(id))?;
    }

    let config_lines = match host.machine_config(id) {
        Ok(config) => {
            debug!("Machine {id} configuration:\n{config}");
            Some(config.lines().count())
        }
        Err(e) => {
            warn!("Could not read back machine configuration: {e}");
            None
        }
    };

    Ok(Summary {
        id,
        name,
        boot_disk,
        from_descriptor: resolution.descriptor.is_some(),
        storage: opts.storage.clone(),
        network: opts.network.clone(),
        started: opts.start,
        config_lines,
    })
}

fn provision(
    opts: &ProvisionOpts,
    host: &dyn HostManager,
    fetcher: &dyn Fetch,
    tracker: &mut StageTracker,
) -> Result<Summary> {
    if opts.skip_host_checks {
        debug!("Skipping host storage and network checks");
    } else {
        check_host(opts, host)?;
    }
    let in_use = host.list_identifiers()?;
    let id = resolve_identifier(opts.id, &in_use)?;
    info!("Using machine identifier {id}");
    tracker.advance(Stage::IdentifierResolved);

    let work = WorkArea::create(opts.work_dir.as_deref())?;
    let outcome = provision_in(opts, host, fetcher, tracker, id, &work);
    if let Err(e) = work.close() {
        warn!("Failed to remove work area: {e}");
    }
    let summary = outcome?;
    tracker.advance(Stage::Completed);
    Ok(summary)
}

/// Run `provision` and mark the tracker failed on error.
pub fn run_tracked(
    opts: &ProvisionOpts,
    host: &dyn HostManager,
    fetcher: &dyn Fetch,
    tracker: &mut StageTracker,
) -> Result<Summary> {
    provision(opts, host, fetcher, tracker).inspect_err(|e| tracker.fail(e))
}

pub fn run(
    opts: &ProvisionOpts,
    host: &dyn HostManager,
    fetcher: &dyn Fetch,
) -> Result<Summary> {
    let mut tracker = StageTracker::default();
    let r = run_tracked(opts, host, fetcher, &mut tracker);
    debug!("Stages: {:?}", tracker.history());
    r
}
