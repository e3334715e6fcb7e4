#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stand-ins for the Proxmox tools. Each appends its argv to `$VMPROV_TEST_LOG`
/// and exits 2 when its subcommand equals `$VMPROV_TEST_FAIL`.
const FAKE_QM: &str = r#"#!/bin/sh
echo "qm $*" >> "$VMPROV_TEST_LOG"
if [ "$1" = "$VMPROV_TEST_FAIL" ]; then
    echo "qm: $1 failed for VM $2" >&2
    exit 2
fi
case "$1" in
    list)
        echo "      VMID NAME                 STATUS     MEM(MB)    BOOTDISK(GB) PID"
        echo "       100 base                 running    2048              32.00 4242"
        ;;
    importdisk)
        echo "importing disk '$3' to VM $2 ..."
        echo "Successfully imported disk as 'unused1:$4:$2/vm-$2-disk-1.qcow2'"
        ;;
    config)
        echo "boot: order=sata0"
        echo "name: test"
        ;;
esac
"#;

const FAKE_PVESM: &str = r#"#!/bin/sh
echo "pvesm $*" >> "$VMPROV_TEST_LOG"
echo "Name             Type     Status           Total            Used       Available        %"
echo "local             dir     active        98497780        12345678        80000000   12.53%"
"#;

const FAKE_IP: &str = r#"#!/bin/sh
echo "ip $*" >> "$VMPROV_TEST_LOG"
echo '[{"ifindex":3,"ifname":"vmbr0","flags":["UP"]}]'
"#;

/// Stand-in for `7z x -y -bd -o<dest> <archive>`. The fixtures it accepts are
/// a zip signature followed by a plain tarball.
const FAKE_7Z: &str = r#"#!/bin/sh
echo "7z $*" >> "$VMPROV_TEST_LOG"
dest=""
archive=""
for arg in "$@"; do
    case "$arg" in
        -o*) dest="${arg#-o}" ;;
        x|-*) ;;
        *) archive="$arg" ;;
    esac
done
tail -c +5 "$archive" | tar -xf - -C "$dest"
"#;

/// Leading bytes of a zip local file header.
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

pub const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>
    <File ovf:href="Lab Disk.vmdk" ovf:id="file1"/>
  </References>
</Envelope>
"#;

pub struct TestContext {
    dir: tempfile::TempDir,
    pub bin: PathBuf,
    pub log: PathBuf,
    pub work: PathBuf,
}

fn write_script(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

impl TestContext {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        write_script(&bin.join("qm"), FAKE_QM);
        write_script(&bin.join("pvesm"), FAKE_PVESM);
        write_script(&bin.join("ip"), FAKE_IP);
        write_script(&bin.join("7z"), FAKE_7Z);
        let log = dir.path().join("calls.log");
        fs::write(&log, "").unwrap();
        let work = dir.path().join("work");
        Self {
            dir,
            bin,
            log,
            work,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// The binary with the fake tools first on `PATH` and the work area
    /// pointed at a directory this context owns.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_vmprov"));
        cmd.timeout(Duration::from_secs(60));
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{}:{path}", self.bin.display()))
            .env("VMPROV_TEST_LOG", &self.log)
            .env("VMPROV_WORK_DIR", &self.work)
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .env_remove("VMPROV_STORAGE")
            .env_remove("VMPROV_NETWORK")
            .env_remove("VMPROV_TEST_FAIL");
        cmd
    }

    /// Every host tool invocation so far, one per line.
    pub fn calls(&self) -> String {
        fs::read_to_string(&self.log).unwrap()
    }

    fn ova_bytes(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in [
            ("Test Lab.ovf", DESCRIPTOR.as_bytes()),
            ("Lab Disk.vmdk", b"disk".as_slice()),
        ] {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn file_url(path: &Path) -> String {
        url::Url::from_file_path(path).unwrap().to_string()
    }

    /// Build an OVA holding a descriptor and a disk whose name needs
    /// sanitizing; returns its `file://` URL.
    pub fn ova_url(&self) -> String {
        let path = self.root().join("Test Lab.ova");
        fs::write(&path, self.ova_bytes()).unwrap();
        Self::file_url(&path)
    }

    /// A zip (as understood by the fake `7z`) wrapping the OVA from
    /// [`Self::ova_url`]; returns its `file://` URL.
    pub fn zip_url(&self) -> String {
        let ova = self.ova_bytes();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(ova.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "dist/Test Lab.ova", ova.as_slice())
            .unwrap();
        let mut zip = ZIP_SIGNATURE.to_vec();
        zip.extend(builder.into_inner().unwrap());
        let path = self.root().join("vm.zip");
        fs::write(&path, zip).unwrap();
        Self::file_url(&path)
    }

    pub fn assert_work_area_removed(&self) {
        if !self.work.exists() {
            return;
        }
        let left: Vec<_> = fs::read_dir(&self.work)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert!(left.is_empty(), "work area left behind: {left:?}");
    }
}
