use crate::Collector;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use sysinfo::Disks;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "diskspace";

/// Filesystem types checked when the module sets no `filesystems` list.
pub const DEFAULT_FILESYSTEMS: [&str; 11] = [
    "ext2", "ext3", "ext4", "xfs", "glusterfs", "nfs", "ntfs", "hfs", "fat32", "fat16", "btrfs",
];

/// Pseudo filesystem mount roots that never hold user data.
const SKIPPED_MOUNT_ROOTS: [&str; 3] = ["proc", "dev", "sys"];

/// Whether a mount of type `fs_type` at `mount` should be reported.
pub fn is_checked(fs_type: &str, mount: &str, filesystems: &HashSet<String>) -> bool {
    if !filesystems.contains(fs_type) {
        return false;
    }
    let root = mount.trim_start_matches('/').split('/').next().unwrap_or("");
    !SKIPPED_MOUNT_ROOTS.contains(&root)
}

/// Metric path segment for a filesystem: the device file name
/// (`/dev/sda1` -> `sda1`), or the mount point when the device is not a path.
///
/// # Examples
///
/// ```
/// use sysminer_collector::disk::device_label;
///
/// assert_eq!(device_label("/dev/sda1", "/"), "sda1");
/// assert_eq!(device_label("server:/export", "/mnt/nfs"), "mnt_nfs");
/// assert_eq!(device_label("tmpfs", "/"), "root");
/// ```
pub fn device_label(device: &str, mount: &str) -> String {
    let from_device = device
        .starts_with('/')
        .then(|| Path::new(device).file_name())
        .flatten()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let label = if from_device.is_empty() {
        mount.trim_matches('/').replace('/', "_")
    } else {
        from_device
    };

    if label.is_empty() {
        "root".to_string()
    } else {
        label.replace('.', "_")
    }
}

/// Resolves symlinked device paths such as `/dev/disk/by-uuid/...` or
/// `/dev/mapper/...` to the device node they point at. Anything that is not
/// a resolvable path is returned unchanged.
pub fn resolve_device(device: &str) -> String {
    if !device.starts_with('/') {
        return device.to_string();
    }
    std::fs::canonicalize(device)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| device.to_string())
}

/// Space accounting of one filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    pub total: u64,
    /// Blocks in use, not counting the root reserve.
    pub used: u64,
    /// Free blocks, including the root reserve.
    pub free: u64,
    /// Free blocks only root may allocate.
    pub reserved: u64,
    /// Free blocks available to unprivileged users.
    pub available: u64,
}

impl SpaceUsage {
    /// Builds the usage from `statvfs` block counts.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysminer_collector::disk::SpaceUsage;
    ///
    /// let usage = SpaceUsage::from_blocks(4096, 100, 40, 35);
    /// assert_eq!(usage.used, 60 * 4096);
    /// assert_eq!(usage.reserved, 5 * 4096);
    /// ```
    pub fn from_blocks(fragment_size: u64, blocks: u64, blocks_free: u64, blocks_available: u64) -> Self {
        let bytes = |count: u64| count.saturating_mul(fragment_size);
        Self {
            total: bytes(blocks),
            used: bytes(blocks.saturating_sub(blocks_free)),
            free: bytes(blocks_free),
            reserved: bytes(blocks_free.saturating_sub(blocks_available)),
            available: bytes(blocks_available),
        }
    }

    /// Share of the space visible to unprivileged users that is in use,
    /// the figure `df` reports.
    pub fn used_percent(&self) -> f64 {
        let visible = self.used.saturating_add(self.available);
        if visible == 0 {
            return 0.0;
        }
        self.used as f64 / visible as f64 * 100.0
    }
}

#[cfg(unix)]
fn measure(mount: &Path) -> Result<SpaceUsage> {
    let stat = nix::sys::statvfs::statvfs(mount)
        .with_context(|| format!("statvfs failed for {}", mount.display()))?;
    Ok(SpaceUsage::from_blocks(
        stat.fragment_size() as u64,
        stat.blocks() as u64,
        stat.blocks_free() as u64,
        stat.blocks_available() as u64,
    ))
}

#[cfg(not(unix))]
fn measure(mount: &Path) -> Result<SpaceUsage> {
    anyhow::bail!("statvfs is not available for {}", mount.display())
}

pub struct DiskCollector {
    disks: Disks,
    filesystems: HashSet<String>,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
            filesystems: DEFAULT_FILESYSTEMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        match settings.optional_string_array("filesystems")? {
            Some(types) => self.filesystems = types.into_iter().collect(),
            None => tracing::debug!("filesystems not set, using default filesystem types"),
        }
        tracing::info!(filesystems = ?self.filesystems, "Disk space collector configured");
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        // Mounts come and go, so the list is rebuilt every poll
        self.disks.refresh_list();
        let now = Utc::now();
        let mut batch = MetricBatch::new(NAME);

        for disk in self.disks.iter() {
            let fs_type = disk.file_system().to_string_lossy();
            let mount = disk.mount_point().to_string_lossy();
            if !is_checked(&fs_type, &mount, &self.filesystems) {
                continue;
            }

            let usage = match measure(disk.mount_point()) {
                Ok(usage) => usage,
                Err(e) => {
                    // Usually a mount that went away since the list was read
                    tracing::debug!(mount = %mount, error = %format!("{e:#}"), "Skipping filesystem");
                    continue;
                }
            };
            let device = resolve_device(&disk.name().to_string_lossy());
            let label = device_label(&device, &mount);

            for (field, value) in [
                ("used", usage.used),
                ("free", usage.free),
                ("reserved", usage.reserved),
                ("available", usage.available),
                ("total", usage.total),
            ] {
                batch.push(Metric::at(format!("{label}.{field}"), value as f64, now));
            }
            batch.push(Metric::at(format!("{label}.used_percent"), usage.used_percent(), now));
        }

        Ok(batch)
    }
}
