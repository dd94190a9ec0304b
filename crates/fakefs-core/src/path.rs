// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path text handling: separators, normalization, drive and UNC prefixes.
//!
//! Everything here is pure string work over a [`PathStyle`] snapshot of the
//! engine configuration; node lookup lives in `vfs.rs`.

/// Separator and drive rules extracted from the engine configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PathStyle {
    pub sep: char,
    pub altsep: Option<char>,
    pub drive_letters: bool,
}

impl PathStyle {
    pub fn is_sep(&self, c: char) -> bool {
        c == self.sep || Some(c) == self.altsep
    }

    fn is_sep_byte(&self, b: u8) -> bool {
        b.is_ascii() && self.is_sep(b as char)
    }

    /// Replace alternative separators with the primary one.
    pub fn canonical(&self, path: &str) -> String {
        match self.altsep {
            Some(alt) => path.replace(alt, &self.sep.to_string()),
            None => path.to_string(),
        }
    }

    /// Split off a drive letter (`C:`) or UNC share (`\\server\share`)
    /// prefix. Returns `("", path)` when there is none or drive support is
    /// disabled.
    pub fn split_drive<'a>(&self, path: &'a str) -> (&'a str, &'a str) {
        if !self.drive_letters {
            return ("", path);
        }
        let bytes = path.as_bytes();
        if bytes.len() >= 2 && self.is_sep_byte(bytes[0]) && self.is_sep_byte(bytes[1]) {
            // UNC path; the prefix runs through the share component
            if bytes.len() >= 3 && self.is_sep_byte(bytes[2]) {
                return ("", path);
            }
            let server_end = match (2..bytes.len()).find(|&i| self.is_sep_byte(bytes[i])) {
                Some(i) => i,
                None => return ("", path),
            };
            if server_end + 1 >= bytes.len() || self.is_sep_byte(bytes[server_end + 1]) {
                return ("", path);
            }
            let share_end = (server_end + 1..bytes.len())
                .find(|&i| self.is_sep_byte(bytes[i]))
                .unwrap_or(bytes.len());
            return (&path[..share_end], &path[share_end..]);
        }
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return (&path[..2], &path[2..]);
        }
        ("", path)
    }

    pub fn is_absolute(&self, path: &str) -> bool {
        let canon = self.canonical(path);
        let (drive, rest) = self.split_drive(&canon);
        !drive.is_empty() || rest.starts_with(self.sep)
    }

    pub fn ends_with_sep(&self, path: &str) -> bool {
        path.chars().last().map(|c| self.is_sep(c)).unwrap_or(false)
    }

    /// Collapse `.` components, separator runs and interior `..`; a leading
    /// separator run becomes the single root marker. `..` at the root is
    /// absorbed, `..` at the head of a relative path is preserved. A
    /// drive-relative path (`C:foo`) is rooted at the drive.
    pub fn normalize(&self, path: &str) -> String {
        let canon = self.canonical(path);
        if canon.is_empty() {
            return ".".to_string();
        }
        let (drive, rest) = self.split_drive(&canon);
        let absolute = rest.starts_with(self.sep);
        let mut stack: Vec<&str> = Vec::new();
        for comp in rest.split(self.sep) {
            match comp {
                "" | "." => {}
                ".." => match stack.last() {
                    Some(&"..") => stack.push(".."),
                    Some(_) => {
                        stack.pop();
                    }
                    None => {
                        if !absolute && drive.is_empty() {
                            stack.push("..");
                        }
                    }
                },
                other => stack.push(other),
            }
        }
        let mut out = String::from(drive);
        if absolute || !drive.is_empty() {
            out.push(self.sep);
        }
        out.push_str(&stack.join(&self.sep.to_string()));
        if out.is_empty() {
            ".".to_string()
        } else {
            out
        }
    }

    pub fn join(&self, base: &str, rel: &str) -> String {
        if base.is_empty() {
            return rel.to_string();
        }
        let mut out = base.to_string();
        let needs_sep = !out.chars().last().map(|c| self.is_sep(c)).unwrap_or(true);
        if needs_sep {
            out.push(self.sep);
        }
        out.push_str(rel);
        out
    }

    /// Normalized absolute form of `path`, resolving relative input against
    /// `cwd`.
    pub fn absolute(&self, path: &str, cwd: &str) -> String {
        if self.is_absolute(path) {
            self.normalize(path)
        } else {
            self.normalize(&self.join(cwd, path))
        }
    }

    /// Split a normalized absolute path into its parent directory path and
    /// final component. The root itself yields an empty name.
    pub fn parent_and_name(&self, abs: &str) -> (String, String) {
        let (drive, rest) = self.split_drive(abs);
        match rest.rfind(self.sep) {
            Some(idx) => {
                let name = rest[idx + 1..].to_string();
                let parent = if rest[..idx].is_empty() {
                    format!("{}{}", drive, self.sep)
                } else {
                    format!("{}{}", drive, &rest[..idx])
                };
                (parent, name)
            }
            None => (format!("{}{}", drive, self.sep), rest.to_string()),
        }
    }

    /// Lookup components of a normalized absolute path; a drive or UNC
    /// prefix appears as the first component.
    pub fn components(&self, abs: &str) -> Vec<String> {
        let (drive, rest) = self.split_drive(abs);
        let mut comps = Vec::new();
        if !drive.is_empty() {
            comps.push(drive.to_string());
        }
        comps.extend(rest.split(self.sep).filter(|c| !c.is_empty()).map(str::to_string));
        comps
    }

    /// Components of a raw symlink target. `.` and `..` are kept for the
    /// resolver to process in place. Returns whether the target restarts at
    /// the root.
    pub fn target_components(&self, target: &str) -> (bool, Vec<String>) {
        let canon = self.canonical(target);
        let (drive, rest) = self.split_drive(&canon);
        let absolute = !drive.is_empty() || rest.starts_with(self.sep);
        let mut comps = Vec::new();
        if !drive.is_empty() {
            comps.push(drive.to_string());
        }
        comps.extend(rest.split(self.sep).filter(|c| !c.is_empty()).map(str::to_string));
        (absolute, comps)
    }

    /// Whether a lookup component names a drive or UNC root eligible for
    /// auto-mounting.
    pub fn is_drive_component(&self, comp: &str) -> bool {
        if !self.drive_letters {
            return false;
        }
        let bytes = comp.as_bytes();
        (bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
            || (bytes.len() > 2 && self.is_sep_byte(bytes[0]) && self.is_sep_byte(bytes[1]))
    }
}

/// Comparison key for directory entry lookup. Stored names keep their
/// original case; only comparisons fold.
pub(crate) fn fold_case(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}
