// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open file descriptors and their offsets

use crate::error::{FsError, FsResult};
use crate::node::NodeId;
use crate::types::{Fd, OpenOptions};

/// One open file: the node it refers to, the byte offset, and the mode it
/// was opened with. The path is kept for error payloads.
#[derive(Clone, Debug)]
pub(crate) struct OpenFile {
    pub node_id: NodeId,
    pub path: String,
    pub offset: u64,
    pub options: OpenOptions,
}

/// Descriptor table. Closed slots are reused lowest-first, like a host
/// process's fd table.
#[derive(Debug, Default)]
pub(crate) struct OpenFileTable {
    slots: Vec<Option<OpenFile>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn insert(&mut self, file: OpenFile) -> Fd {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Fd(idx as u32);
            }
        }
        self.slots.push(Some(file));
        Fd((self.slots.len() - 1) as u32)
    }

    pub fn get(&self, fd: Fd) -> FsResult<&OpenFile> {
        self.slots
            .get(fd.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(FsError::BadDescriptor(fd.0))
    }

    pub fn get_mut(&mut self, fd: Fd) -> FsResult<&mut OpenFile> {
        self.slots
            .get_mut(fd.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(FsError::BadDescriptor(fd.0))
    }

    pub fn remove(&mut self, fd: Fd) -> FsResult<OpenFile> {
        self.slots
            .get_mut(fd.0 as usize)
            .and_then(|slot| slot.take())
            .ok_or(FsError::BadDescriptor(fd.0))
    }

    /// Whether any descriptor still references `node`.
    pub fn any_open(&self, node: NodeId) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|file| file.node_id == node)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
