use std::fmt;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, warn};

use crate::sanitize::SanitizationPolicy;

/// Lowercased filesystem type as reported by the mount table (`vfat`, `ext4`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilesystemLabel(String);

impl FilesystemLabel {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilesystemLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub file_system: String,
}

pub trait MountTable {
    /// Current mounts. Implementations must not cache between calls.
    fn mounts(&self) -> Vec<MountEntry>;

    fn is_mount_point(&self, path: &Path) -> bool {
        is_mount_point(path)
    }
}

/// Mount table read from the host through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMountTable;

impl MountTable for SystemMountTable {
    fn mounts(&self) -> Vec<MountEntry> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .map(|disk| MountEntry {
                mount_point: disk.mount_point().to_path_buf(),
                file_system: disk.file_system().to_string_lossy().to_string(),
            })
            .collect()
    }
}

/// Same test as `os.path.ismount` on POSIX: not a symlink, and either on a
/// different device than its parent or the same inode as its parent (root).
#[cfg(unix)]
pub fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if meta.file_type().is_symlink() {
        return false;
    }
    let parent = match std::fs::symlink_metadata(path.join("..")) {
        Ok(m) => m,
        Err(_) => return false,
    };
    meta.dev() != parent.dev() || meta.ino() == parent.ino()
}

#[cfg(not(unix))]
pub fn is_mount_point(path: &Path) -> bool {
    path.exists() && path.parent().is_none()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Walk up from `path` to the first mount point and look its type up in `table`.
///
/// Wildcards and missing components are fine: anything that cannot be stat-ed
/// is simply not a mount point, so the walk moves on to the parent.
pub fn detect_file_system(table: &dyn MountTable, path: &Path) -> Option<FilesystemLabel> {
    let path = absolute(path);
    debug!(path = %path.display(), "detecting filesystem");

    let mount_point = path
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .find(|p| table.is_mount_point(p));

    let Some(mount_point) = mount_point else {
        warn!(path = %path.display(), "cannot find the mount point for filesystem detection");
        return None;
    };
    debug!(mount_point = %mount_point.display(), "found mount point");

    let found = table
        .mounts()
        .into_iter()
        .find(|entry| entry.mount_point == mount_point);

    match found {
        Some(entry) => {
            let label = FilesystemLabel::new(&entry.file_system);
            debug!(mount_point = %mount_point.display(), fs = %label, "filesystem detected");
            Some(label)
        }
        None => {
            warn!(
                mount_point = %mount_point.display(),
                "cannot locate filesystem type for mount point"
            );
            None
        }
    }
}

/// Map a filesystem label to the `fat32_safe` half of a policy.
///
/// Unknown or undetected filesystems get the permissive policy.
pub fn policy_from_filesystem(label: Option<&FilesystemLabel>) -> SanitizationPolicy {
    let Some(label) = label else {
        return SanitizationPolicy::default();
    };

    match label.as_str() {
        "vfat" | "fat32" | "exfat" | "msdos" | "fat" | "fat16" => SanitizationPolicy::new(true, false),
        "ntfs" | "ntfs3" | "ntfs-3g" => {
            warn!(
                fs = %label,
                "Windows restricts file name characters on NTFS, enabling the FAT32 character set; \
                 disable filesystem detection to override"
            );
            SanitizationPolicy::new(true, false)
        }
        _ => SanitizationPolicy::default(),
    }
}
