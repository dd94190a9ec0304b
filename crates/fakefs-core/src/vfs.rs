// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The filesystem engine: node arena, path resolution and the
//! syscall-shaped operation surface.

use std::collections::{HashMap, VecDeque};
use std::io::{self, SeekFrom};
use std::sync::Mutex;

use tracing::debug;

use crate::config::{FsConfig, OsFlavor};
use crate::error::{FsError, FsResult};
use crate::fault::{FaultInjector, FaultOp, FaultPolicy};
use crate::handles::{OpenFile, OpenFileTable};
use crate::mount::MountTable;
use crate::node::{current_timestamp, FileContent, Node, NodeId, NodeKind};
use crate::path::fold_case;
use crate::types::{DirEntry, DiskUsage, Fd, FileStat, OpenOptions, PathArg, UNLIMITED};

/// Symlink expansions tolerated within one resolution before the walk is
/// declared a loop.
const MAX_LINK_DEPTH: u32 = 40;

/// Mode bits for files created through `open`.
const DEFAULT_FILE_PERM: u32 = 0o644;
/// Mode bits for directories created implicitly below a deeper target.
const DEFAULT_DIR_PERM: u32 = 0o755;

/// Node kind snapshot taken during a walk, with the symlink target copied
/// out so the arena borrow can end before the walk continues.
enum Probe {
    Dir,
    File,
    Symlink(String),
}

/// Everything behind the engine lock. Operations that touch more than one
/// of these fields (quota charge plus arena mutation, handle close plus
/// node teardown) stay atomic because the whole struct is one unit.
struct FsState {
    config: FsConfig,
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    cwd: String,
    mounts: MountTable,
    open_files: OpenFileTable,
    next_node_id: u64,
}

impl FsState {
    fn fresh(config: FsConfig) -> Self {
        let mut state = Self {
            config,
            nodes: HashMap::new(),
            root: NodeId(0),
            cwd: String::new(),
            mounts: MountTable::new(),
            open_files: OpenFileTable::new(),
            next_node_id: 1,
        };
        state.initialize_tree();
        state
    }

    /// Rebuild the root directory, mount table and cwd for the current
    /// configuration. Node ids keep counting up so stats taken before a
    /// reset never collide with stats taken after.
    fn initialize_tree(&mut self) {
        self.nodes.clear();
        self.open_files.clear();
        self.mounts = MountTable::new();

        let sep = self.config.path_separator;
        let root_name = sep.to_string();
        let windows = self.config.is_windows_fs();
        let root_quota = if windows { None } else { self.config.root_total_size };
        let root_dev = self.mounts.add(&root_name, root_quota);
        let root_id = self.alloc_id();
        let root = Node::new_directory(root_name.clone(), root_id.0, root_dev, 0, 0, 0o777);
        self.nodes.insert(root_id, root);
        self.root = root_id;

        if windows {
            // The system drive exists from the start and carries the
            // configured quota; further drives appear on first touch.
            let drive = "C:";
            let dev = self.mounts.add(drive, self.config.root_total_size);
            let id = self.alloc_id();
            let node = Node::new_directory(drive.to_string(), id.0, dev, 0, 0, 0o777);
            self.nodes.insert(id, node);
            if let Some(root_node) = self.nodes.get_mut(&root_id) {
                if let Some(entries) = root_node.entries_mut() {
                    entries.insert(drive.to_string(), id);
                }
            }
            self.cwd = format!("{drive}{sep}");
        } else {
            self.cwd = root_name;
        }
        debug!(flavor = ?self.config.flavor, cwd = %self.cwd, "filesystem initialized");
    }

    fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    // ---- node probes ----------------------------------------------------

    fn probe(&self, id: NodeId) -> Option<Probe> {
        self.nodes.get(&id).map(|node| match &node.kind {
            NodeKind::Directory { .. } => Probe::Dir,
            NodeKind::File { .. } => Probe::File,
            NodeKind::Symlink { target } => Probe::Symlink(target.clone()),
        })
    }

    fn node_is_dir(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| n.is_dir()).unwrap_or(false)
    }

    fn node_is_file(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| n.is_file()).unwrap_or(false)
    }

    fn node_is_symlink(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| n.is_symlink()).unwrap_or(false)
    }

    fn node_dev(&self, id: NodeId) -> u64 {
        self.nodes.get(&id).map(|n| n.dev).unwrap_or(0)
    }

    fn node_size(&self, id: NodeId) -> u64 {
        self.nodes.get(&id).map(|n| n.flat_size()).unwrap_or(0)
    }

    fn symlink_target(&self, id: NodeId) -> Option<String> {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(NodeKind::Symlink { target }) => Some(target.clone()),
            _ => None,
        }
    }

    fn entries_empty(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .and_then(|n| n.entries())
            .map(|e| e.is_empty())
            .unwrap_or(true)
    }

    /// Recursive size of a directory: the flat sizes of every file and
    /// symlink below it. Directories cannot be hard-linked, so the walk
    /// never revisits a node.
    fn tree_size(&self, id: NodeId) -> u64 {
        let mut total = 0u64;
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.get(&cur) {
                match &node.kind {
                    NodeKind::Directory { entries } => stack.extend(entries.values().copied()),
                    _ => total += node.flat_size(),
                }
            }
        }
        total
    }

    // ---- permission checks ----------------------------------------------

    /// Classic owner/group/other mode-bit test against the configured
    /// identity. Always passes when checks are off for this configuration.
    fn allowed(&self, node: &Node, read: bool, write: bool, exec: bool) -> bool {
        if !self.config.checks_permissions() {
            return true;
        }
        let mode = node.perm_bits();
        let (r, w, x) = if node.uid == self.config.uid {
            (mode & 0o400, mode & 0o200, mode & 0o100)
        } else if node.gid == self.config.gid {
            (mode & 0o040, mode & 0o020, mode & 0o010)
        } else {
            (mode & 0o004, mode & 0o002, mode & 0o001)
        };
        (!read || r != 0) && (!write || w != 0) && (!exec || x != 0)
    }

    fn check_parent_mutable(&self, parent: NodeId, path: &str) -> FsResult<()> {
        if !self.config.checks_permissions() {
            return Ok(());
        }
        let Some(node) = self.nodes.get(&parent) else {
            return Err(FsError::not_found(path));
        };
        if !self.allowed(node, false, true, true) {
            return Err(FsError::access_denied(path));
        }
        Ok(())
    }

    fn check_owner(&self, id: NodeId, path: &str) -> FsResult<()> {
        if !self.config.checks_permissions() {
            return Ok(());
        }
        let Some(node) = self.nodes.get(&id) else {
            return Err(FsError::not_found(path));
        };
        if node.uid != self.config.uid {
            return Err(FsError::not_permitted(path));
        }
        Ok(())
    }

    // ---- path resolution ------------------------------------------------

    /// Walk lookup components from the root. `follow_final` distinguishes
    /// stat from lstat behavior on a final symlink; `require_dir` is the
    /// trailing-separator constraint and forces a final symlink to be
    /// followed even when `follow_final` is off.
    fn walk(
        &mut self,
        comps: Vec<String>,
        follow_final: bool,
        require_dir: bool,
        orig: &str,
    ) -> FsResult<NodeId> {
        let mut pending: VecDeque<String> = comps.into();
        let mut parents: Vec<NodeId> = Vec::new();
        let mut current = self.root;
        let mut hops = 0u32;

        loop {
            let Some(comp) = pending.pop_front() else {
                return Ok(current);
            };
            match comp.as_str() {
                "." => continue,
                ".." => {
                    if let Some(parent) = parents.pop() {
                        current = parent;
                    }
                    continue;
                }
                _ => {}
            }
            let is_last = pending.is_empty();

            {
                let dir = self.nodes.get(&current).ok_or_else(|| FsError::not_found(orig))?;
                if !self.allowed(dir, false, false, true) {
                    return Err(FsError::access_denied(orig));
                }
            }

            let child_id = match self.find_entry(current, &comp) {
                Some((_, id)) => id,
                None => {
                    if current == self.root && self.config.style().is_drive_component(&comp) {
                        self.auto_mount_drive(&comp)
                    } else {
                        return Err(FsError::not_found(orig));
                    }
                }
            };

            let Some(probe) = self.probe(child_id) else {
                return Err(FsError::not_found(orig));
            };
            match probe {
                Probe::Dir => {
                    if is_last {
                        return Ok(child_id);
                    }
                    parents.push(current);
                    current = child_id;
                }
                Probe::File => {
                    if !is_last || require_dir {
                        return Err(FsError::not_a_directory(orig));
                    }
                    return Ok(child_id);
                }
                Probe::Symlink(target) => {
                    if is_last && !follow_final && !require_dir {
                        return Ok(child_id);
                    }
                    hops += 1;
                    if hops > MAX_LINK_DEPTH {
                        return Err(FsError::link_loop(orig));
                    }
                    if target.is_empty() {
                        return Err(FsError::not_found(orig));
                    }
                    let (absolute, mut target_comps) = self.config.style().target_components(&target);
                    if absolute {
                        parents.clear();
                        current = self.root;
                    }
                    for tc in target_comps.drain(..).rev() {
                        pending.push_front(tc);
                    }
                }
            }
        }
    }

    /// Look up the node for `text`, following a final symlink when asked.
    /// A trailing separator requires the target to be a directory on the
    /// Linux flavor and is ignored elsewhere.
    fn resolve(&mut self, text: &str, follow_final: bool) -> FsResult<NodeId> {
        if text.is_empty() {
            return Err(FsError::not_found(text));
        }
        let style = self.config.style();
        let require_dir = style.ends_with_sep(text) && self.config.flavor == OsFlavor::Linux;
        let abs = style.absolute(text, &self.cwd);
        let comps = style.components(&abs);
        self.walk(comps, follow_final, require_dir, text)
    }

    /// Resolve the directory that would hold `text` and hand back the final
    /// name. Root paths have no parent and report `InvalidArgument`.
    fn resolve_parent(&mut self, text: &str) -> FsResult<(NodeId, String)> {
        if text.is_empty() {
            return Err(FsError::not_found(text));
        }
        let style = self.config.style();
        let abs = style.absolute(text, &self.cwd);
        let (parent, name) = style.parent_and_name(&abs);
        if name.is_empty() {
            return Err(FsError::invalid_argument(text));
        }
        let comps = style.components(&parent);
        let parent_id = self.walk(comps, true, false, text)?;
        if !self.node_is_dir(parent_id) {
            return Err(FsError::not_a_directory(text));
        }
        Ok((parent_id, name))
    }

    /// Entry lookup in one directory: exact name first, case-folded when
    /// the engine is case-insensitive. Returns the stored spelling.
    fn find_entry(&self, dir: NodeId, name: &str) -> Option<(String, NodeId)> {
        let node = self.nodes.get(&dir)?;
        let entries = node.entries()?;
        if let Some(id) = entries.get(name) {
            return Some((name.to_string(), *id));
        }
        if !self.config.case_sensitive {
            let folded = fold_case(name, false);
            for (stored, id) in entries {
                if fold_case(stored, false) == folded {
                    return Some((stored.clone(), *id));
                }
            }
        }
        None
    }

    /// Materialize a drive or UNC share the first time a path names it.
    fn auto_mount_drive(&mut self, drive: &str) -> NodeId {
        let dev = self.mounts.add(drive, None);
        let id = self.alloc_id();
        let node = Node::new_directory(drive.to_string(), id.0, dev, 0, 0, 0o777);
        self.nodes.insert(id, node);
        if let Some(root_node) = self.nodes.get_mut(&self.root) {
            if let Some(entries) = root_node.entries_mut() {
                entries.insert(drive.to_string(), id);
            }
        }
        debug!(drive, dev, "drive mounted on first use");
        id
    }

    // ---- entry bookkeeping ----------------------------------------------

    fn attach_entry(&mut self, parent: NodeId, name: &str, id: NodeId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if let Some(entries) = parent_node.entries_mut() {
                entries.insert(name.to_string(), id);
            }
            let now = current_timestamp();
            parent_node.mtime = now;
            parent_node.ctime = now;
        }
    }

    /// Drop one directory entry for a non-directory node, decrementing its
    /// link count and destroying it once nothing references it.
    fn detach_entry(&mut self, parent: NodeId, stored: &str, id: NodeId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if let Some(entries) = parent_node.entries_mut() {
                entries.shift_remove(stored);
            }
            let now = current_timestamp();
            parent_node.mtime = now;
            parent_node.ctime = now;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.nlink = node.nlink.saturating_sub(1);
            node.ctime = current_timestamp();
        }
        self.drop_if_orphaned(id);
    }

    /// Destroy a node with no remaining links unless an open handle still
    /// holds it; quota is released at destruction, not at unlink. Only
    /// regular-file bytes are ever charged, so only they are released;
    /// symlinks come and go without touching the mount's usage.
    fn drop_if_orphaned(&mut self, id: NodeId) {
        let orphaned = self
            .nodes
            .get(&id)
            .map(|n| n.nlink == 0 && !n.is_dir())
            .unwrap_or(false);
        if orphaned && !self.open_files.any_open(id) {
            if let Some(node) = self.nodes.remove(&id) {
                if node.is_file() {
                    self.mounts.release(node.dev, node.flat_size());
                }
            }
        }
    }

    fn remove_dir_entry(&mut self, parent: NodeId, stored: &str, id: NodeId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if let Some(entries) = parent_node.entries_mut() {
                entries.shift_remove(stored);
            }
            let now = current_timestamp();
            parent_node.mtime = now;
            parent_node.ctime = now;
        }
        self.nodes.remove(&id);
    }

    fn unlink_dir_error(&self, path: &str) -> FsError {
        match self.config.flavor {
            OsFlavor::Linux => FsError::is_a_directory(path),
            OsFlavor::MacOs => FsError::not_permitted(path),
            OsFlavor::Windows => FsError::access_denied(path),
        }
    }

    // ---- creation -------------------------------------------------------

    fn create_file_impl(&mut self, text: &str, perm: u32, content: FileContent) -> FsResult<()> {
        let style = self.config.style();
        let abs = style.absolute(text, &self.cwd);
        let (parent_path, _) = style.parent_and_name(&abs);

        let (parent_id, name) = match self.resolve_parent(text) {
            Ok(pair) => pair,
            Err(FsError::NotFound(_)) => {
                self.mkdir_all_impl(&parent_path, DEFAULT_DIR_PERM)?;
                self.resolve_parent(text)?
            }
            Err(err) => return Err(err),
        };
        if self.find_entry(parent_id, &name).is_some() {
            return Err(FsError::already_exists(text));
        }
        self.check_parent_mutable(parent_id, text)?;

        let dev = self.node_dev(parent_id);
        self.mounts.charge(dev, content.len(), text)?;
        let id = self.alloc_id();
        let node = Node::new_file(
            name.clone(),
            id.0,
            dev,
            self.config.uid,
            self.config.gid,
            perm,
            content,
        );
        self.nodes.insert(id, node);
        self.attach_entry(parent_id, &name, id);
        Ok(())
    }

    fn mkdir_impl(&mut self, text: &str, perm: u32) -> FsResult<()> {
        let (parent_id, name) = match self.resolve_parent(text) {
            Ok(pair) => pair,
            // a root form like "/" or "C:\" already exists
            Err(FsError::InvalidArgument(_)) => return Err(FsError::already_exists(text)),
            Err(err) => return Err(err),
        };
        if let Some((stored, existing)) = self.find_entry(parent_id, &name) {
            if stored != name && self.node_is_dir(existing) {
                // same name under case folding; adopt the existing directory
                return Ok(());
            }
            return Err(FsError::already_exists(text));
        }
        self.check_parent_mutable(parent_id, text)?;

        let dev = self.node_dev(parent_id);
        let id = self.alloc_id();
        let node = Node::new_directory(
            name.clone(),
            id.0,
            dev,
            self.config.uid,
            self.config.gid,
            perm,
        );
        self.nodes.insert(id, node);
        self.attach_entry(parent_id, &name, id);
        Ok(())
    }

    fn mkdir_all_impl(&mut self, text: &str, perm: u32) -> FsResult<()> {
        if text.is_empty() {
            return Err(FsError::not_found(text));
        }
        let style = self.config.style();
        let abs = style.absolute(text, &self.cwd);
        let comps = style.components(&abs);

        let mut partial = String::new();
        for comp in &comps {
            if partial.is_empty() {
                if style.is_drive_component(comp) {
                    partial = comp.clone();
                } else {
                    partial = format!("{}{}", style.sep, comp);
                }
            } else {
                partial = style.join(&partial, comp);
            }
            match self.resolve(&partial, true) {
                Ok(id) => {
                    if !self.node_is_dir(id) {
                        return Err(FsError::not_a_directory(partial));
                    }
                }
                Err(FsError::NotFound(_)) => self.mkdir_impl(&partial, perm)?,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn symlink_impl(&mut self, target: &str, link: &str) -> FsResult<()> {
        if target.is_empty() {
            return Err(FsError::not_found(target));
        }
        let (parent_id, name) = self.resolve_parent(link)?;
        if self.find_entry(parent_id, &name).is_some() {
            return Err(FsError::already_exists(link));
        }
        self.check_parent_mutable(parent_id, link)?;

        let dev = self.node_dev(parent_id);
        let id = self.alloc_id();
        let node = Node::new_symlink(
            name.clone(),
            id.0,
            dev,
            self.config.uid,
            self.config.gid,
            target.to_string(),
        );
        self.nodes.insert(id, node);
        self.attach_entry(parent_id, &name, id);
        Ok(())
    }

    fn link_impl(&mut self, old: &str, new: &str) -> FsResult<()> {
        let src_id = self.resolve(old, true)?;
        if self.node_is_dir(src_id) {
            return Err(match self.config.flavor {
                OsFlavor::Windows => FsError::access_denied(old),
                _ => FsError::not_permitted(old),
            });
        }
        let (parent_id, name) = self.resolve_parent(new)?;
        if self.find_entry(parent_id, &name).is_some() {
            return Err(FsError::already_exists(new));
        }
        if self.node_dev(parent_id) != self.node_dev(src_id) {
            return Err(FsError::cross_device(new));
        }
        self.check_parent_mutable(parent_id, new)?;

        self.attach_entry(parent_id, &name, src_id);
        if let Some(node) = self.nodes.get_mut(&src_id) {
            node.nlink += 1;
            node.ctime = current_timestamp();
        }
        Ok(())
    }

    // ---- removal --------------------------------------------------------

    fn unlink_impl(&mut self, text: &str) -> FsResult<()> {
        let style = self.config.style();
        let trailing = style.ends_with_sep(text);
        let (parent_id, name) = match self.resolve_parent(text) {
            Ok(pair) => pair,
            // the root itself is a directory
            Err(FsError::InvalidArgument(_)) => return Err(self.unlink_dir_error(text)),
            Err(err) => return Err(err),
        };
        let Some((stored, id)) = self.find_entry(parent_id, &name) else {
            return Err(FsError::not_found(text));
        };
        if self.node_is_dir(id) {
            return Err(self.unlink_dir_error(text));
        }
        if trailing && self.config.flavor == OsFlavor::Linux {
            return Err(FsError::not_a_directory(text));
        }
        if self.config.is_windows_fs() && self.open_files.any_open(id) {
            return Err(FsError::access_denied(text));
        }
        self.check_parent_mutable(parent_id, text)?;
        self.detach_entry(parent_id, &stored, id);
        Ok(())
    }

    fn rmdir_impl(&mut self, text: &str) -> FsResult<()> {
        let (parent_id, name) = self.resolve_parent(text)?;
        let Some((stored, id)) = self.find_entry(parent_id, &name) else {
            return Err(FsError::not_found(text));
        };
        if !self.node_is_dir(id) {
            return Err(FsError::not_a_directory(text));
        }
        if !self.entries_empty(id) {
            return Err(FsError::not_empty(text));
        }
        self.check_parent_mutable(parent_id, text)?;
        self.remove_dir_entry(parent_id, &stored, id);
        Ok(())
    }

    // ---- rename ---------------------------------------------------------

    fn rename_impl(&mut self, old: &str, new: &str, force_replace: bool) -> FsResult<()> {
        let style = self.config.style();
        let cs = self.config.case_sensitive;
        let old_abs = style.absolute(old, &self.cwd);
        let new_abs = style.absolute(new, &self.cwd);
        let strict_sep = self.config.flavor == OsFlavor::Linux;
        let old_trailing = strict_sep && style.ends_with_sep(old);
        let new_trailing = strict_sep && style.ends_with_sep(new);

        let (old_parent, old_name) = self.resolve_parent(old)?;
        let Some((old_stored, src_id)) = self.find_entry(old_parent, &old_name) else {
            return Err(FsError::not_found(old));
        };
        if old_trailing && !self.node_is_dir(src_id) {
            return Err(FsError::not_a_directory(old));
        }

        if fold_case(&old_abs, cs) == fold_case(&new_abs, cs) {
            if new_trailing && !self.node_is_dir(src_id) {
                return Err(FsError::not_a_directory(new));
            }
            if old_abs == new_abs {
                return Ok(());
            }
            // same path under folding: a case-only rename
            let (_, new_name) = style.parent_and_name(&new_abs);
            self.rename_entry_case(old_parent, &old_stored, new_name, src_id);
            return Ok(());
        }

        let (new_parent, new_name) = self.resolve_parent(new)?;

        // a directory cannot move below itself
        let prefix = format!("{}{}", old_abs, style.sep);
        if self.node_is_dir(src_id) && fold_case(&new_abs, cs).starts_with(&fold_case(&prefix, cs)) {
            return Err(FsError::invalid_argument(new));
        }

        let old_dev = self.mounts.mount_for(&old_abs, style.sep, cs).map(|m| m.dev);
        let new_dev = self.mounts.mount_for(&new_abs, style.sep, cs).map(|m| m.dev);
        if old_dev != new_dev {
            return Err(FsError::cross_device(new));
        }

        self.check_parent_mutable(old_parent, old)?;
        self.check_parent_mutable(new_parent, new)?;

        if let Some((dst_stored, dst_id)) = self.find_entry(new_parent, &new_name) {
            if new_trailing && !self.node_is_dir(dst_id) {
                return Err(FsError::not_a_directory(new));
            }
            if dst_id == src_id {
                // the two names are hard links to one node; POSIX keeps both
                return Ok(());
            }
            let src_is_dir = self.node_is_dir(src_id);
            let dst_is_dir = self.node_is_dir(dst_id);
            if self.config.is_windows_fs() {
                if !force_replace || dst_is_dir {
                    return Err(FsError::already_exists(new));
                }
                if self.open_files.any_open(dst_id) {
                    return Err(FsError::access_denied(new));
                }
            } else {
                if dst_is_dir && !src_is_dir {
                    return Err(FsError::is_a_directory(new));
                }
                if !dst_is_dir && src_is_dir {
                    return Err(FsError::not_a_directory(new));
                }
                if dst_is_dir && !self.entries_empty(dst_id) {
                    return Err(FsError::not_empty(new));
                }
            }
            if dst_is_dir {
                self.remove_dir_entry(new_parent, &dst_stored, dst_id);
            } else {
                self.detach_entry(new_parent, &dst_stored, dst_id);
            }
        } else if new_trailing && !self.node_is_dir(src_id) {
            return Err(FsError::not_a_directory(new));
        }

        if let Some(node) = self.nodes.get_mut(&old_parent) {
            if let Some(entries) = node.entries_mut() {
                entries.shift_remove(&old_stored);
            }
            let now = current_timestamp();
            node.mtime = now;
            node.ctime = now;
        }
        if let Some(node) = self.nodes.get_mut(&new_parent) {
            if let Some(entries) = node.entries_mut() {
                entries.insert(new_name.clone(), src_id);
            }
            let now = current_timestamp();
            node.mtime = now;
            node.ctime = now;
        }
        if let Some(node) = self.nodes.get_mut(&src_id) {
            node.name = new_name;
            node.ctime = current_timestamp();
        }
        debug!(from = old, to = new, "renamed");
        Ok(())
    }

    fn rename_entry_case(&mut self, parent: NodeId, old_key: &str, new_name: String, id: NodeId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if let Some(entries) = parent_node.entries_mut() {
                entries.shift_remove(old_key);
                entries.insert(new_name.clone(), id);
            }
            let now = current_timestamp();
            parent_node.mtime = now;
            parent_node.ctime = now;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = new_name;
            node.ctime = current_timestamp();
        }
    }

    // ---- metadata -------------------------------------------------------

    fn stat_of(&self, id: NodeId) -> Option<FileStat> {
        let node = self.nodes.get(&id)?;
        let size = if node.is_dir() {
            self.tree_size(id)
        } else {
            node.flat_size()
        };
        Some(FileStat {
            st_mode: node.mode,
            st_ino: node.ino,
            st_dev: node.dev,
            st_nlink: node.nlink,
            st_uid: node.uid,
            st_gid: node.gid,
            st_size: size,
            st_atime: node.atime,
            st_mtime: node.mtime,
            st_ctime: node.ctime,
        })
    }

    fn stat_impl(&mut self, text: &str) -> FsResult<FileStat> {
        let id = self.resolve(text, true)?;
        self.stat_of(id).ok_or_else(|| FsError::not_found(text))
    }

    fn lstat_impl(&mut self, text: &str) -> FsResult<FileStat> {
        let id = self.resolve(text, false)?;
        self.stat_of(id).ok_or_else(|| FsError::not_found(text))
    }

    fn fstat_impl(&self, fd: Fd) -> FsResult<FileStat> {
        let id = self.open_files.get(fd)?.node_id;
        self.stat_of(id).ok_or(FsError::BadDescriptor(fd.0))
    }

    fn chmod_impl(&mut self, text: &str, perm: u32, follow: bool) -> FsResult<()> {
        if !follow && self.config.flavor == OsFlavor::Linux {
            return Err(FsError::NotImplemented("lchmod".to_string()));
        }
        let id = self.resolve(text, follow)?;
        self.check_owner(id, text)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mode = (node.mode & libc::S_IFMT as u32) | (perm & 0o7777);
            node.ctime = current_timestamp();
        }
        Ok(())
    }

    fn chown_impl(&mut self, text: &str, uid: u32, gid: u32) -> FsResult<()> {
        let id = self.resolve(text, true)?;
        if self.config.checks_permissions() {
            let Some(node) = self.nodes.get(&id) else {
                return Err(FsError::not_found(text));
            };
            // only root may hand a file to another owner
            if node.uid != uid || node.uid != self.config.uid {
                return Err(FsError::not_permitted(text));
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.uid = uid;
            node.gid = gid;
            node.ctime = current_timestamp();
        }
        Ok(())
    }

    fn utime_impl(&mut self, text: &str, times: Option<(i64, i64)>) -> FsResult<()> {
        let id = self.resolve(text, true)?;
        if self.config.checks_permissions() {
            let Some(node) = self.nodes.get(&id) else {
                return Err(FsError::not_found(text));
            };
            let owner = node.uid == self.config.uid;
            if times.is_some() {
                if !owner {
                    return Err(FsError::not_permitted(text));
                }
            } else if !owner && !self.allowed(node, false, true, false) {
                return Err(FsError::access_denied(text));
            }
        }
        let (atime, mtime) = times.unwrap_or_else(|| {
            let now = current_timestamp();
            (now, now)
        });
        if let Some(node) = self.nodes.get_mut(&id) {
            node.atime = atime;
            node.mtime = mtime;
            node.ctime = current_timestamp();
        }
        Ok(())
    }

    // ---- directory reading ----------------------------------------------

    fn listdir_impl(&mut self, text: &str) -> FsResult<Vec<String>> {
        let id = self.resolve(text, true)?;
        let node = self.nodes.get(&id).ok_or_else(|| FsError::not_found(text))?;
        let Some(entries) = node.entries() else {
            return Err(FsError::not_a_directory(text));
        };
        if !self.allowed(node, true, false, false) {
            return Err(FsError::access_denied(text));
        }
        Ok(entries.keys().cloned().collect())
    }

    fn read_dir_impl(&mut self, text: &str) -> FsResult<Vec<DirEntry>> {
        let id = self.resolve(text, true)?;
        let node = self.nodes.get(&id).ok_or_else(|| FsError::not_found(text))?;
        let Some(entries) = node.entries() else {
            return Err(FsError::not_a_directory(text));
        };
        if !self.allowed(node, true, false, false) {
            return Err(FsError::access_denied(text));
        }
        let mut out = Vec::with_capacity(entries.len());
        for (name, child_id) in entries {
            if let Some(child) = self.nodes.get(child_id) {
                out.push(DirEntry {
                    name: name.clone(),
                    is_dir: child.is_dir(),
                    is_symlink: child.is_symlink(),
                    len: child.flat_size(),
                });
            }
        }
        Ok(out)
    }

    fn readlink_impl(&mut self, text: &str) -> FsResult<String> {
        let style = self.config.style();
        if style.ends_with_sep(text) && self.config.flavor == OsFlavor::Linux {
            // the trailing separator forces resolution to the target, which
            // is then not a symlink
            self.resolve(text, true)?;
            return Err(FsError::invalid_argument(text));
        }
        let id = self.resolve(text, false)?;
        match self.symlink_target(id) {
            Some(target) => Ok(target),
            None => Err(FsError::invalid_argument(text)),
        }
    }

    // ---- open files -----------------------------------------------------

    fn open_impl(&mut self, text: &str, options: &OpenOptions) -> FsResult<Fd> {
        if !options.read && !options.write {
            return Err(FsError::invalid_argument(text));
        }
        let create = options.create || options.create_new;
        match self.resolve(text, true) {
            Ok(id) => {
                if self.node_is_dir(id) {
                    return Err(FsError::is_a_directory(text));
                }
                if options.create_new {
                    return Err(FsError::already_exists(text));
                }
                {
                    let node = self.nodes.get(&id).ok_or_else(|| FsError::not_found(text))?;
                    if !self.allowed(node, options.read, options.write, false) {
                        return Err(FsError::access_denied(text));
                    }
                }
                if options.write && options.truncate {
                    self.truncate_node(id, 0, text)?;
                }
                let offset = if options.append { self.node_size(id) } else { 0 };
                let fd = self.open_files.insert(OpenFile {
                    node_id: id,
                    path: text.to_string(),
                    offset,
                    options: options.clone(),
                });
                Ok(fd)
            }
            Err(FsError::NotFound(_)) if create => self.open_create(text, options),
            Err(err) => Err(err),
        }
    }

    /// Create the file an `open` with a create flag is asking for. A
    /// dangling symlink chain redirects creation to its final target path.
    fn open_create(&mut self, text: &str, options: &OpenOptions) -> FsResult<Fd> {
        let style = self.config.style();
        let mut target_text = style.absolute(text, &self.cwd);
        let mut hops = 0u32;
        loop {
            match self.resolve(&target_text, false) {
                Ok(id) => {
                    let Some(target) = self.symlink_target(id) else {
                        return Err(FsError::not_found(text));
                    };
                    if options.create_new {
                        return Err(FsError::already_exists(text));
                    }
                    hops += 1;
                    if hops > MAX_LINK_DEPTH {
                        return Err(FsError::link_loop(text));
                    }
                    let (parent, _) = style.parent_and_name(&target_text);
                    target_text = style.absolute(&target, &parent);
                }
                Err(FsError::NotFound(_)) => break,
                Err(err) => return Err(err),
            }
        }
        let (parent_id, name) = self.resolve_parent(&target_text)?;
        self.check_parent_mutable(parent_id, text)?;

        let dev = self.node_dev(parent_id);
        let id = self.alloc_id();
        let node = Node::new_file(
            name.clone(),
            id.0,
            dev,
            self.config.uid,
            self.config.gid,
            DEFAULT_FILE_PERM,
            FileContent::Bytes(Vec::new()),
        );
        self.nodes.insert(id, node);
        self.attach_entry(parent_id, &name, id);
        let fd = self.open_files.insert(OpenFile {
            node_id: id,
            path: text.to_string(),
            offset: 0,
            options: options.clone(),
        });
        Ok(fd)
    }

    fn read_impl(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        let (id, offset, can_read) = {
            let file = self.open_files.get(fd)?;
            (file.node_id, file.offset, file.options.read)
        };
        if !can_read {
            return Err(FsError::BadDescriptor(fd.0));
        }
        let n = {
            let node = self.nodes.get(&id).ok_or(FsError::BadDescriptor(fd.0))?;
            match &node.kind {
                NodeKind::File {
                    content: FileContent::Bytes(bytes),
                } => {
                    let start = (offset as usize).min(bytes.len());
                    let n = buf.len().min(bytes.len() - start);
                    buf[..n].copy_from_slice(&bytes[start..start + n]);
                    n
                }
                NodeKind::File {
                    content: FileContent::SizeOnly(_),
                } => return Err(FsError::Io(io::Error::from_raw_os_error(libc::EIO))),
                _ => return Err(FsError::BadDescriptor(fd.0)),
            }
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.atime = current_timestamp();
        }
        if let Ok(file) = self.open_files.get_mut(fd) {
            file.offset = offset + n as u64;
        }
        Ok(n)
    }

    fn write_impl(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let (id, offset, opts, path) = {
            let file = self.open_files.get(fd)?;
            (file.node_id, file.offset, file.options.clone(), file.path.clone())
        };
        if !opts.write {
            return Err(FsError::BadDescriptor(fd.0));
        }
        let (dev, old_len, size_only) = {
            let node = self.nodes.get(&id).ok_or(FsError::BadDescriptor(fd.0))?;
            match &node.kind {
                NodeKind::File { content } => (
                    node.dev,
                    content.len(),
                    matches!(content, FileContent::SizeOnly(_)),
                ),
                _ => return Err(FsError::BadDescriptor(fd.0)),
            }
        };
        if size_only {
            return Err(FsError::Io(io::Error::from_raw_os_error(libc::EIO)));
        }

        let pos = if opts.append { old_len } else { offset };
        let end = pos + data.len() as u64;
        let new_len = end.max(old_len);
        if new_len > old_len {
            self.mounts.charge(dev, new_len - old_len, &path)?;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            if let NodeKind::File {
                content: FileContent::Bytes(bytes),
            } = &mut node.kind
            {
                if bytes.len() < end as usize {
                    bytes.resize(end as usize, 0);
                }
                bytes[pos as usize..end as usize].copy_from_slice(data);
            }
            let now = current_timestamp();
            node.mtime = now;
            node.ctime = now;
        }
        if let Ok(file) = self.open_files.get_mut(fd) {
            file.offset = end;
        }
        Ok(data.len())
    }

    fn seek_impl(&mut self, fd: Fd, pos: SeekFrom) -> FsResult<u64> {
        let (id, offset, path) = {
            let file = self.open_files.get(fd)?;
            (file.node_id, file.offset, file.path.clone())
        };
        let len = self.node_size(id);
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => offset as i128 + delta as i128,
            SeekFrom::End(delta) => len as i128 + delta as i128,
        };
        if target < 0 {
            return Err(FsError::invalid_argument(path));
        }
        let target = target as u64;
        self.open_files.get_mut(fd)?.offset = target;
        Ok(target)
    }

    fn ftruncate_impl(&mut self, fd: Fd, len: u64) -> FsResult<()> {
        let (id, can_write, path) = {
            let file = self.open_files.get(fd)?;
            (file.node_id, file.options.write, file.path.clone())
        };
        if !can_write {
            return Err(FsError::BadDescriptor(fd.0));
        }
        self.truncate_node(id, len, &path)
    }

    /// Resize file contents, settling the quota delta first so a refused
    /// grow leaves the file untouched.
    fn truncate_node(&mut self, id: NodeId, new_len: u64, path: &str) -> FsResult<()> {
        let (dev, old_len, size_only) = {
            let node = self.nodes.get(&id).ok_or_else(|| FsError::not_found(path))?;
            match &node.kind {
                NodeKind::File { content } => (
                    node.dev,
                    content.len(),
                    matches!(content, FileContent::SizeOnly(_)),
                ),
                _ => return Err(FsError::is_a_directory(path)),
            }
        };
        if size_only {
            return Err(FsError::Io(io::Error::from_raw_os_error(libc::EIO)));
        }
        if new_len > old_len {
            self.mounts.charge(dev, new_len - old_len, path)?;
        } else {
            self.mounts.release(dev, old_len - new_len);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            if let NodeKind::File {
                content: FileContent::Bytes(bytes),
            } = &mut node.kind
            {
                bytes.resize(new_len as usize, 0);
            }
            let now = current_timestamp();
            node.mtime = now;
            node.ctime = now;
        }
        Ok(())
    }

    fn close_impl(&mut self, fd: Fd) -> FsResult<()> {
        let file = self.open_files.remove(fd)?;
        self.drop_if_orphaned(file.node_id);
        Ok(())
    }

    // ---- mounts and usage -----------------------------------------------

    fn add_mount_point_impl(&mut self, text: &str, total: Option<u64>) -> FsResult<()> {
        let style = self.config.style();
        let abs = style.absolute(text, &self.cwd);
        let key = if abs.len() > 1 && style.ends_with_sep(&abs) {
            abs[..abs.len() - 1].to_string()
        } else {
            abs.clone()
        };
        if self.mounts.contains(&key, self.config.case_sensitive) {
            return Err(FsError::already_exists(text));
        }
        self.mkdir_all_impl(&abs, DEFAULT_DIR_PERM)?;
        let dev = self.mounts.add(&key, total);
        let id = self.resolve(&abs, true)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.dev = dev;
        }
        debug!(path = %key, dev, "mount point added");
        Ok(())
    }

    fn set_disk_usage_impl(&mut self, text: &str, total: Option<u64>) -> FsResult<()> {
        let style = self.config.style();
        let abs = style.absolute(text, &self.cwd);
        let dev = self
            .mounts
            .mount_for(&abs, style.sep, self.config.case_sensitive)
            .map(|m| m.dev);
        match dev {
            Some(dev) => self.mounts.set_total(dev, total, text),
            None => Err(FsError::not_found(text)),
        }
    }

    fn disk_usage_impl(&self, text: &str) -> FsResult<DiskUsage> {
        let style = self.config.style();
        let abs = style.absolute(text, &self.cwd);
        let usage = self
            .mounts
            .mount_for(&abs, style.sep, self.config.case_sensitive)
            .map(|m| m.usage())
            .unwrap_or(DiskUsage {
                total: UNLIMITED,
                used: 0,
                free: UNLIMITED,
            });
        Ok(usage)
    }

    // ---- lifecycle ------------------------------------------------------

    fn set_os_impl(&mut self, flavor: OsFlavor) {
        let uid = self.config.uid;
        let gid = self.config.gid;
        let enforce = self.config.enforce_permissions;
        let root_total = self.config.root_total_size;
        self.config = FsConfig::for_flavor(flavor);
        self.config.uid = uid;
        self.config.gid = gid;
        self.config.enforce_permissions = enforce;
        self.config.root_total_size = root_total;
        debug!(?flavor, "switching emulated os");
        self.initialize_tree();
    }

    fn set_cwd_impl(&mut self, text: &str) -> FsResult<()> {
        let id = self.resolve(text, true)?;
        {
            let node = self.nodes.get(&id).ok_or_else(|| FsError::not_found(text))?;
            if !node.is_dir() {
                return Err(FsError::not_a_directory(text));
            }
            if !self.allowed(node, false, false, true) {
                return Err(FsError::access_denied(text));
            }
        }
        let style = self.config.style();
        self.cwd = style.absolute(text, &self.cwd);
        Ok(())
    }
}

/// An in-memory filesystem with per-OS path and error semantics.
///
/// One `FakeFs` stands in for the machine's filesystem during a test: paths
/// resolve against its private node tree, and every operation reports errors
/// the way the configured OS flavor would. All state sits behind one lock,
/// so a `FakeFs` can be shared freely across threads.
pub struct FakeFs {
    state: Mutex<FsState>,
    faults: FaultInjector,
}

impl FakeFs {
    pub fn new(config: FsConfig) -> Self {
        Self {
            state: Mutex::new(FsState::fresh(config)),
            faults: FaultInjector::new(),
        }
    }

    /// Discard all files, directories, mounts and open handles, restoring
    /// the pristine tree for the current configuration.
    pub fn reset(&self) {
        self.state.lock().unwrap().initialize_tree();
    }

    /// Switch the emulated OS flavor mid-test. The tree is rebuilt;
    /// identity, permission enforcement and the root quota carry over.
    pub fn set_os(&self, flavor: OsFlavor) {
        self.state.lock().unwrap().set_os_impl(flavor);
    }

    // ---- configuration --------------------------------------------------

    pub fn os(&self) -> OsFlavor {
        self.state.lock().unwrap().config.flavor
    }

    pub fn is_windows_fs(&self) -> bool {
        self.state.lock().unwrap().config.is_windows_fs()
    }

    pub fn is_macos(&self) -> bool {
        self.state.lock().unwrap().config.is_macos()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.state.lock().unwrap().config.case_sensitive
    }

    /// Flip case sensitivity in place. Existing entries keep their stored
    /// spelling; only lookup behavior changes.
    pub fn set_case_sensitive(&self, value: bool) {
        self.state.lock().unwrap().config.case_sensitive = value;
    }

    pub fn path_separator(&self) -> char {
        self.state.lock().unwrap().config.path_separator
    }

    pub fn set_path_separator(&self, sep: char) {
        self.state.lock().unwrap().config.path_separator = sep;
    }

    pub fn alternative_path_separator(&self) -> Option<char> {
        self.state.lock().unwrap().config.alternative_path_separator
    }

    pub fn set_alternative_path_separator(&self, alt: Option<char>) {
        self.state.lock().unwrap().config.alternative_path_separator = alt;
    }

    pub fn supports_drive_letter(&self) -> bool {
        self.state.lock().unwrap().config.supports_drive_letter
    }

    pub fn set_supports_drive_letter(&self, value: bool) {
        self.state.lock().unwrap().config.supports_drive_letter = value;
    }

    pub fn uid(&self) -> u32 {
        self.state.lock().unwrap().config.uid
    }

    /// Change the simulated user. uid 0 bypasses permission checks.
    pub fn set_uid(&self, uid: u32) {
        self.state.lock().unwrap().config.uid = uid;
    }

    pub fn gid(&self) -> u32 {
        self.state.lock().unwrap().config.gid
    }

    pub fn set_gid(&self, gid: u32) {
        self.state.lock().unwrap().config.gid = gid;
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> FsConfig {
        self.state.lock().unwrap().config.clone()
    }

    pub fn cwd(&self) -> String {
        self.state.lock().unwrap().cwd.clone()
    }

    pub fn set_cwd<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().set_cwd_impl(text)
    }

    // ---- creation -------------------------------------------------------

    /// Create a file with the given contents, building missing parent
    /// directories on the way. Mode bits default to 0o644.
    pub fn create_file<'p>(
        &self,
        path: impl Into<PathArg<'p>>,
        contents: impl AsRef<[u8]>,
    ) -> FsResult<()> {
        self.create_file_with_mode(path, DEFAULT_FILE_PERM, contents)
    }

    pub fn create_file_with_mode<'p>(
        &self,
        path: impl Into<PathArg<'p>>,
        perm: u32,
        contents: impl AsRef<[u8]>,
    ) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Create) {
            return Err(errno.to_error(text));
        }
        self.state.lock().unwrap().create_file_impl(
            text,
            perm,
            FileContent::Bytes(contents.as_ref().to_vec()),
        )
    }

    /// Create a file that reports `size` without storing any bytes. It
    /// charges disk usage like a real file; reading or writing it fails
    /// with EIO.
    pub fn create_large_file<'p>(&self, path: impl Into<PathArg<'p>>, size: u64) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Create) {
            return Err(errno.to_error(text));
        }
        self.state
            .lock()
            .unwrap()
            .create_file_impl(text, DEFAULT_FILE_PERM, FileContent::SizeOnly(size))
    }

    /// Create one directory. The parent must already exist.
    pub fn mkdir<'p>(&self, path: impl Into<PathArg<'p>>, perm: u32) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Mkdir) {
            return Err(errno.to_error(text));
        }
        self.state.lock().unwrap().mkdir_impl(text, perm)
    }

    /// Create a directory and any missing ancestors. An existing directory
    /// at the target is not an error.
    pub fn mkdir_all<'p>(&self, path: impl Into<PathArg<'p>>, perm: u32) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Mkdir) {
            return Err(errno.to_error(text));
        }
        self.state.lock().unwrap().mkdir_all_impl(text, perm)
    }

    /// Create a symlink at `link` pointing at `target`. The target text is
    /// stored verbatim and may dangle.
    pub fn symlink<'t, 'p>(
        &self,
        target: impl Into<PathArg<'t>>,
        link: impl Into<PathArg<'p>>,
    ) -> FsResult<()> {
        let target = target.into();
        let link = link.into();
        let target_text = target.to_text()?;
        let link_text = link.to_text()?;
        self.state.lock().unwrap().symlink_impl(target_text, link_text)
    }

    /// Create a hard link: a second directory entry for an existing file's
    /// node. Directories cannot be hard-linked.
    pub fn link<'o, 'n>(
        &self,
        old: impl Into<PathArg<'o>>,
        new: impl Into<PathArg<'n>>,
    ) -> FsResult<()> {
        let old = old.into();
        let new = new.into();
        let old_text = old.to_text()?;
        let new_text = new.to_text()?;
        self.state.lock().unwrap().link_impl(old_text, new_text)
    }

    // ---- removal --------------------------------------------------------

    /// Remove a file or symlink. Under POSIX flavors a node still held by
    /// an open handle lives on anonymously until the last close; the
    /// Windows flavor refuses with EACCES instead.
    pub fn unlink<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Unlink) {
            return Err(errno.to_error(text));
        }
        self.state.lock().unwrap().unlink_impl(text)
    }

    /// Alias for [`Self::unlink`].
    pub fn remove<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<()> {
        self.unlink(path)
    }

    /// Remove an empty directory.
    pub fn rmdir<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().rmdir_impl(text)
    }

    // ---- rename ---------------------------------------------------------

    /// Move a file, directory or symlink. An existing destination file is
    /// replaced on POSIX flavors and refused on Windows; see
    /// [`Self::replace`] for the forced form.
    pub fn rename<'o, 'n>(
        &self,
        old: impl Into<PathArg<'o>>,
        new: impl Into<PathArg<'n>>,
    ) -> FsResult<()> {
        self.rename_inner(old.into(), new.into(), false)
    }

    /// Move like [`Self::rename`] but replace an existing destination file
    /// on every flavor.
    pub fn replace<'o, 'n>(
        &self,
        old: impl Into<PathArg<'o>>,
        new: impl Into<PathArg<'n>>,
    ) -> FsResult<()> {
        self.rename_inner(old.into(), new.into(), true)
    }

    fn rename_inner(&self, old: PathArg<'_>, new: PathArg<'_>, force: bool) -> FsResult<()> {
        let old_text = old.to_text()?;
        let new_text = new.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Rename) {
            return Err(errno.to_error(old_text));
        }
        self.state.lock().unwrap().rename_impl(old_text, new_text, force)
    }

    // ---- metadata -------------------------------------------------------

    /// Stat with symlinks followed.
    pub fn stat<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<FileStat> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().stat_impl(text)
    }

    /// Stat of the entry itself; a final symlink is not followed.
    pub fn lstat<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<FileStat> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().lstat_impl(text)
    }

    pub fn fstat(&self, fd: Fd) -> FsResult<FileStat> {
        self.state.lock().unwrap().fstat_impl(fd)
    }

    pub fn chmod<'p>(&self, path: impl Into<PathArg<'p>>, perm: u32) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().chmod_impl(text, perm, true)
    }

    /// Change mode bits of a symlink itself. The Linux flavor reports
    /// ENOSYS, matching the missing syscall there.
    pub fn lchmod<'p>(&self, path: impl Into<PathArg<'p>>, perm: u32) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().chmod_impl(text, perm, false)
    }

    pub fn chown<'p>(&self, path: impl Into<PathArg<'p>>, uid: u32, gid: u32) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().chown_impl(text, uid, gid)
    }

    /// Set access and modification times, or both to now when `times` is
    /// `None`.
    pub fn utime<'p>(&self, path: impl Into<PathArg<'p>>, times: Option<(i64, i64)>) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().utime_impl(text, times)
    }

    // ---- queries --------------------------------------------------------

    /// Whether the path resolves, symlinks followed. Never errors; broken
    /// links and unreadable paths report `false`.
    pub fn exists<'p>(&self, path: impl Into<PathArg<'p>>) -> bool {
        match path.into().to_text() {
            Ok(text) => self.state.lock().unwrap().resolve(text, true).is_ok(),
            Err(_) => false,
        }
    }

    pub fn is_file<'p>(&self, path: impl Into<PathArg<'p>>) -> bool {
        match path.into().to_text() {
            Ok(text) => {
                let mut state = self.state.lock().unwrap();
                state
                    .resolve(text, true)
                    .map(|id| state.node_is_file(id))
                    .unwrap_or(false)
            }
            Err(_) => false,
        }
    }

    pub fn is_dir<'p>(&self, path: impl Into<PathArg<'p>>) -> bool {
        match path.into().to_text() {
            Ok(text) => {
                let mut state = self.state.lock().unwrap();
                state
                    .resolve(text, true)
                    .map(|id| state.node_is_dir(id))
                    .unwrap_or(false)
            }
            Err(_) => false,
        }
    }

    /// Whether the entry itself is a symlink; the final component is not
    /// followed.
    pub fn is_symlink<'p>(&self, path: impl Into<PathArg<'p>>) -> bool {
        match path.into().to_text() {
            Ok(text) => {
                let mut state = self.state.lock().unwrap();
                state
                    .resolve(text, false)
                    .map(|id| state.node_is_symlink(id))
                    .unwrap_or(false)
            }
            Err(_) => false,
        }
    }

    /// Entry names of a directory in insertion order.
    pub fn listdir<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<Vec<String>> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().listdir_impl(text)
    }

    /// Entries of a directory with their kinds and sizes.
    pub fn read_dir<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<Vec<DirEntry>> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().read_dir_impl(text)
    }

    /// The stored target text of a symlink.
    pub fn readlink<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<String> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().readlink_impl(text)
    }

    // ---- open files -----------------------------------------------------

    /// Open a file and return a descriptor for it. Creation flags follow
    /// their `std::fs::OpenOptions` meanings.
    pub fn open<'p>(&self, path: impl Into<PathArg<'p>>, options: OpenOptions) -> FsResult<Fd> {
        let arg = path.into();
        let text = arg.to_text()?;
        if let Some(errno) = self.faults.should_fault(FaultOp::Open) {
            return Err(errno.to_error(text));
        }
        self.state.lock().unwrap().open_impl(text, &options)
    }

    /// Read from the descriptor's current offset into `buf`, returning the
    /// number of bytes read. Zero means end of file.
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(errno) = self.faults.should_fault(FaultOp::Read) {
            let path = state.open_files.get(fd).map(|f| f.path.clone()).unwrap_or_default();
            return Err(errno.to_error(&path));
        }
        state.read_impl(fd, buf)
    }

    /// Write at the descriptor's current offset (or the end, for append
    /// descriptors). Contents land immediately; there is no buffering.
    pub fn write(&self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(errno) = self.faults.should_fault(FaultOp::Write) {
            let path = state.open_files.get(fd).map(|f| f.path.clone()).unwrap_or_default();
            return Err(errno.to_error(&path));
        }
        state.write_impl(fd, data)
    }

    pub fn seek(&self, fd: Fd, pos: SeekFrom) -> FsResult<u64> {
        self.state.lock().unwrap().seek_impl(fd, pos)
    }

    pub fn ftruncate(&self, fd: Fd, len: u64) -> FsResult<()> {
        self.state.lock().unwrap().ftruncate_impl(fd, len)
    }

    /// Release a descriptor. Closing the last handle of a fully unlinked
    /// node destroys it and frees its disk usage.
    pub fn close(&self, fd: Fd) -> FsResult<()> {
        self.state.lock().unwrap().close_impl(fd)
    }

    // ---- mounts and usage -----------------------------------------------

    /// Mount a new filesystem at `path`, creating the directory if needed.
    /// Files under it live on their own device id, making renames across
    /// the boundary fail with EXDEV, and count against `total` when one is
    /// given.
    pub fn add_mount_point<'p>(
        &self,
        path: impl Into<PathArg<'p>>,
        total: Option<u64>,
    ) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().add_mount_point_impl(text, total)
    }

    /// Resize the quota of the mount owning `path`. Shrinking below current
    /// usage is refused.
    pub fn set_disk_usage<'p>(
        &self,
        path: impl Into<PathArg<'p>>,
        total: Option<u64>,
    ) -> FsResult<()> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().set_disk_usage_impl(text, total)
    }

    /// Usage of the mount owning `path`. Unlimited mounts report
    /// [`UNLIMITED`] for total and free.
    pub fn get_disk_usage<'p>(&self, path: impl Into<PathArg<'p>>) -> FsResult<DiskUsage> {
        let arg = path.into();
        let text = arg.to_text()?;
        self.state.lock().unwrap().disk_usage_impl(text)
    }

    // ---- fault injection ------------------------------------------------

    /// Install a fault policy; counters restart from zero.
    pub fn set_fault_policy(&self, policy: FaultPolicy) {
        self.faults.set_policy(policy);
    }

    pub fn clear_fault_policy(&self) {
        self.faults.clear();
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        self.faults.policy()
    }
}

impl Default for FakeFs {
    fn default() -> Self {
        Self::new(FsConfig::linux())
    }
}
