// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Public value types for the engine surface

use crate::error::{FsError, FsResult};

/// Path input accepted by every primitive: text or raw bytes.
///
/// Byte paths must decode as UTF-8; anything else is reported as
/// [`FsError::InvalidPath`] (programmer misuse, not a filesystem
/// condition).
#[derive(Clone, Copy, Debug)]
pub enum PathArg<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> PathArg<'a> {
    pub(crate) fn to_text(self) -> FsResult<&'a str> {
        match self {
            PathArg::Text(s) => Ok(s),
            PathArg::Bytes(b) => std::str::from_utf8(b)
                .map_err(|_| FsError::InvalidPath(String::from_utf8_lossy(b).into_owned())),
        }
    }
}

impl<'a> From<&'a str> for PathArg<'a> {
    fn from(s: &'a str) -> Self {
        PathArg::Text(s)
    }
}

impl<'a> From<&'a String> for PathArg<'a> {
    fn from(s: &'a String) -> Self {
        PathArg::Text(s)
    }
}

impl<'a> From<&'a [u8]> for PathArg<'a> {
    fn from(b: &'a [u8]) -> Self {
        PathArg::Bytes(b)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for PathArg<'a> {
    fn from(b: &'a [u8; N]) -> Self {
        PathArg::Bytes(b)
    }
}

/// File descriptor handed out by `open`, reclaimed by `close`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fd(pub u32);

/// Stat result with the standard field set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub st_mode: u32,
    pub st_ino: u64,
    pub st_dev: u64,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: u64,
    pub st_atime: i64,
    pub st_mtime: i64,
    pub st_ctime: i64,
}

impl FileStat {
    /// Fields in host stat order: mode, ino, dev, nlink, uid, gid, size,
    /// atime, mtime, ctime.
    #[allow(clippy::type_complexity)]
    pub fn as_tuple(&self) -> (u32, u64, u64, u32, u32, u32, u64, i64, i64, i64) {
        (
            self.st_mode,
            self.st_ino,
            self.st_dev,
            self.st_nlink,
            self.st_uid,
            self.st_gid,
            self.st_size,
            self.st_atime,
            self.st_mtime,
            self.st_ctime,
        )
    }

    pub fn is_dir(&self) -> bool {
        self.st_mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_file(&self) -> bool {
        self.st_mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.st_mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }
}

/// One directory listing entry. Kind flags describe the entry itself;
/// a symlink is never followed here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub len: u64,
}

/// Sentinel reported for the total and free space of unbounded mounts.
pub const UNLIMITED: u64 = u64::MAX;

/// Space accounting for one mount point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// Options for [`crate::FakeFs::open`].
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    /// Exclusive create: fail with EEXIST when the path already exists.
    pub create_new: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    pub fn appending() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }

    pub fn exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            create_new: true,
            ..Default::default()
        }
    }
}
