// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory node model: files, directories, symlinks

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

/// Internal node ID; doubles as the inode number reported by stat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u64);

/// File payload: real bytes, or a declared size without materialized
/// content ("large file"). Reads and writes on the latter are refused.
#[derive(Clone, Debug)]
pub(crate) enum FileContent {
    Bytes(Vec<u8>),
    SizeOnly(u64),
}

impl FileContent {
    pub fn len(&self) -> u64 {
        match self {
            FileContent::Bytes(bytes) => bytes.len() as u64,
            FileContent::SizeOnly(size) => *size,
        }
    }
}

/// Filesystem node kinds. Directory entries are insertion-ordered and
/// keyed by the stored (original case) name.
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    File { content: FileContent },
    Directory { entries: IndexMap<String, NodeId> },
    Symlink { target: String },
}

/// One filesystem node. Hard links share a single `Node` through its id;
/// `nlink` counts the directory entries referencing it.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub ino: u64,
    pub dev: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Node {
    pub fn new_file(
        name: String,
        ino: u64,
        dev: u64,
        uid: u32,
        gid: u32,
        perm: u32,
        content: FileContent,
    ) -> Self {
        let now = current_timestamp();
        Self {
            name,
            kind: NodeKind::File { content },
            mode: libc::S_IFREG as u32 | (perm & 0o7777),
            uid,
            gid,
            nlink: 1,
            ino,
            dev,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn new_directory(name: String, ino: u64, dev: u64, uid: u32, gid: u32, perm: u32) -> Self {
        let now = current_timestamp();
        Self {
            name,
            kind: NodeKind::Directory {
                entries: IndexMap::new(),
            },
            mode: libc::S_IFDIR as u32 | (perm & 0o7777),
            uid,
            gid,
            nlink: 2,
            ino,
            dev,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn new_symlink(name: String, ino: u64, dev: u64, uid: u32, gid: u32, target: String) -> Self {
        let now = current_timestamp();
        Self {
            name,
            kind: NodeKind::Symlink { target },
            mode: libc::S_IFLNK as u32 | 0o777,
            uid,
            gid,
            nlink: 1,
            ino,
            dev,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink { .. })
    }

    pub fn entries(&self) -> Option<&IndexMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { entries } => Some(entries),
            _ => None,
        }
    }

    pub fn entries_mut(&mut self) -> Option<&mut IndexMap<String, NodeId>> {
        match &mut self.kind {
            NodeKind::Directory { entries } => Some(entries),
            _ => None,
        }
    }

    /// Size of this node alone: content length for files, target length
    /// for symlinks, zero for directories (their recursive size is
    /// computed by the engine).
    pub fn flat_size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { content } => content.len(),
            NodeKind::Symlink { target } => target.len() as u64,
            NodeKind::Directory { .. } => 0,
        }
    }

    pub fn perm_bits(&self) -> u32 {
        self.mode & 0o7777
    }
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
