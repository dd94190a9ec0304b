// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount points: device ids, longest-prefix ownership, quota accounting

use crate::error::{FsError, FsResult};
use crate::path::fold_case;
use crate::types::{DiskUsage, UNLIMITED};

/// A mounted filesystem: a path prefix with its own device id and an
/// optional size quota.
#[derive(Clone, Debug)]
pub(crate) struct MountPoint {
    /// Normalized absolute path without trailing separator (`/` and drive
    /// roots like `C:` keep their canonical one/zero-separator form).
    pub path: String,
    pub dev: u64,
    pub total: Option<u64>,
    pub used: u64,
}

impl MountPoint {
    pub fn usage(&self) -> DiskUsage {
        match self.total {
            Some(total) => DiskUsage {
                total,
                used: self.used,
                free: total.saturating_sub(self.used),
            },
            None => DiskUsage {
                total: UNLIMITED,
                used: self.used,
                free: UNLIMITED,
            },
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MountTable {
    mounts: Vec<MountPoint>,
    next_dev: u64,
}

impl MountTable {
    pub fn new() -> Self {
        Self {
            mounts: Vec::new(),
            next_dev: 1,
        }
    }

    /// Register a mount point at `key` (a trimmed, normalized absolute
    /// path) and return its device id. Callers check [`Self::contains`]
    /// first; the table itself accepts any key.
    pub fn add(&mut self, key: &str, total: Option<u64>) -> u64 {
        let dev = self.next_dev;
        self.next_dev += 1;
        self.mounts.push(MountPoint {
            path: key.to_string(),
            dev,
            total,
            used: 0,
        });
        dev
    }

    pub fn contains(&self, key: &str, case_sensitive: bool) -> bool {
        let folded = fold_case(key, case_sensitive);
        self.mounts.iter().any(|m| fold_case(&m.path, case_sensitive) == folded)
    }

    /// The mount point governing `path`: the one with the longest matching
    /// prefix. A single-separator root mount matches every path.
    pub fn mount_for(&self, path: &str, sep: char, case_sensitive: bool) -> Option<&MountPoint> {
        let folded = fold_case(path, case_sensitive);
        let mut best: Option<&MountPoint> = None;
        for mount in &self.mounts {
            let key = fold_case(&mount.path, case_sensitive);
            let matches = if key.len() == 1 && key.starts_with(sep) {
                true
            } else {
                folded == key
                    || (folded.starts_with(&key)
                        && folded.as_bytes().get(key.len()) == Some(&(sep as u8)))
            };
            if matches && best.map(|b| b.path.len() < mount.path.len()).unwrap_or(true) {
                best = Some(mount);
            }
        }
        best
    }

    #[cfg(test)]
    pub fn by_dev(&self, dev: u64) -> Option<&MountPoint> {
        self.mounts.iter().find(|m| m.dev == dev)
    }

    fn by_dev_mut(&mut self, dev: u64) -> Option<&mut MountPoint> {
        self.mounts.iter_mut().find(|m| m.dev == dev)
    }

    /// Debit `bytes` from the mount's free space, failing with ENOSPC and
    /// no state change when the quota would be exceeded.
    pub fn charge(&mut self, dev: u64, bytes: u64, path: &str) -> FsResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        if let Some(mount) = self.by_dev_mut(dev) {
            if let Some(total) = mount.total {
                if mount.used.saturating_add(bytes) > total {
                    return Err(FsError::no_space(path));
                }
            }
            mount.used += bytes;
        }
        Ok(())
    }

    pub fn release(&mut self, dev: u64, bytes: u64) {
        if let Some(mount) = self.by_dev_mut(dev) {
            mount.used = mount.used.saturating_sub(bytes);
        }
    }

    /// Resize a mount's quota. Shrinking below the space already in use is
    /// refused.
    pub fn set_total(&mut self, dev: u64, total: Option<u64>, path: &str) -> FsResult<()> {
        if let Some(mount) = self.by_dev_mut(dev) {
            if let Some(new_total) = total {
                if new_total < mount.used {
                    return Err(FsError::no_space(path));
                }
            }
            mount.total = total;
        }
        Ok(())
    }
}
