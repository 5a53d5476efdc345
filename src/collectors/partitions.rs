use crate::collectors::{into_record, ProbeError};
use crate::health::{NodeRecord, PartitionSet};
#[cfg(target_os = "linux")]
use crate::health::{Outcome, PartitionEntry, PartitionUsage};
use std::collections::HashSet;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use tracing::debug;

#[cfg(target_os = "linux")]
const MOUNTS_PATH: &str = "/proc/mounts";
#[cfg(target_os = "linux")]
const FILESYSTEMS_PATH: &str = "/proc/filesystems";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub options: String,
}

/// Disk partitions of the node; only Linux is supported.
pub fn get_partitions(addr: &str) -> NodeRecord<PartitionSet> {
    into_record(addr, "partitions", read_partitions())
}

#[cfg(target_os = "linux")]
fn read_partitions() -> Result<PartitionSet, ProbeError> {
    let filesystems = fs::read_to_string(FILESYSTEMS_PATH)
        .map_err(|source| ProbeError::read(FILESYSTEMS_PATH, source))?;
    let mounts =
        fs::read_to_string(MOUNTS_PATH).map_err(|source| ProbeError::read(MOUNTS_PATH, source))?;

    let physical = physical_filesystems(&filesystems);
    let partitions: Vec<PartitionEntry> = parse_mounts(&mounts)
        .into_iter()
        .filter(|m| is_physical_mount(m, &physical))
        .map(probe_mount)
        .collect();
    debug!(partitions = partitions.len(), "collected partitions");

    Ok(PartitionSet { partitions })
}

#[cfg(not(target_os = "linux"))]
fn read_partitions() -> Result<PartitionSet, ProbeError> {
    Err(ProbeError::unsupported_os())
}

#[cfg(target_os = "linux")]
fn probe_mount(mount: MountEntry) -> PartitionEntry {
    use nix::sys::statvfs::statvfs;

    let outcome = match statvfs(mount.mountpoint.as_str()) {
        Ok(stat) => {
            let fragment = stat.fragment_size() as u64;
            Outcome::Collected(PartitionUsage {
                space_total: (stat.blocks() as u64).saturating_mul(fragment),
                space_free: (stat.blocks_available() as u64).saturating_mul(fragment),
                inode_total: stat.files() as u64,
                inode_free: stat.files_free() as u64,
                mountpoint: mount.mountpoint,
                fs_type: mount.fs_type,
                mount_options: mount.options,
            })
        }
        Err(err) => Outcome::Failed {
            error: format!("statvfs {}: {err}", mount.mountpoint),
        },
    };
    PartitionEntry {
        device: mount.device,
        outcome,
    }
}

/// Filesystem types backed by a block device (no `nodev` marker).
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn physical_filesystems(text: &str) -> HashSet<&str> {
    text.lines()
        .filter(|line| !line.starts_with("nodev"))
        .map(str::trim)
        .filter(|fs| !fs.is_empty())
        .collect()
}

/// Mounts without a backing device (`none`) are skipped like virtual filesystems.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn is_physical_mount(mount: &MountEntry, physical: &HashSet<&str>) -> bool {
    mount.device != "none" && physical.contains(mount.fs_type.as_str())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next().unwrap_or_default();
            Some(MountEntry {
                device: unescape_mount_field(device),
                mountpoint: unescape_mount_field(mountpoint),
                fs_type: fs_type.to_string(),
                options: options.to_string(),
            })
        })
        .collect()
}

/// Decodes the `\040`-style octal escapes the kernel uses in mount tables.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0_u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
