// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration: OS flavor, separators, case sensitivity

use serde::{Deserialize, Serialize};

use crate::path::PathStyle;

/// Which operating system's filesystem conventions an engine emulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFlavor {
    Linux,
    MacOs,
    Windows,
}

impl OsFlavor {
    pub fn is_posix(self) -> bool {
        !matches!(self, OsFlavor::Windows)
    }
}

/// Engine configuration. All fields may be changed mid-test through the
/// engine's setters; consumers must re-query rather than cache them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsConfig {
    pub flavor: OsFlavor,
    pub case_sensitive: bool,
    pub path_separator: char,
    pub alternative_path_separator: Option<char>,
    pub supports_drive_letter: bool,
    /// Simulated effective user. uid 0 bypasses all permission checks.
    pub uid: u32,
    pub gid: u32,
    /// Whether POSIX mode bits are enforced. Ignored under the Windows
    /// flavor, which never enforces them.
    pub enforce_permissions: bool,
    /// Quota for the initially mounted filesystem, `None` for unlimited.
    /// Governs `/` on POSIX flavors and the `C:` drive on Windows.
    pub root_total_size: Option<u64>,
}

impl FsConfig {
    pub fn linux() -> Self {
        Self {
            flavor: OsFlavor::Linux,
            case_sensitive: true,
            path_separator: '/',
            alternative_path_separator: None,
            supports_drive_letter: false,
            uid: 1,
            gid: 1,
            enforce_permissions: true,
            root_total_size: None,
        }
    }

    pub fn macos() -> Self {
        Self {
            flavor: OsFlavor::MacOs,
            case_sensitive: false,
            ..Self::linux()
        }
    }

    pub fn windows() -> Self {
        Self {
            flavor: OsFlavor::Windows,
            case_sensitive: false,
            path_separator: '\\',
            alternative_path_separator: Some('/'),
            supports_drive_letter: true,
            uid: 1,
            gid: 1,
            enforce_permissions: true,
            root_total_size: None,
        }
    }

    /// Defaults for the given flavor.
    pub fn for_flavor(flavor: OsFlavor) -> Self {
        match flavor {
            OsFlavor::Linux => Self::linux(),
            OsFlavor::MacOs => Self::macos(),
            OsFlavor::Windows => Self::windows(),
        }
    }

    pub fn is_windows_fs(&self) -> bool {
        self.flavor == OsFlavor::Windows
    }

    pub fn is_macos(&self) -> bool {
        self.flavor == OsFlavor::MacOs
    }

    /// Separator and drive rules for path text handling.
    pub(crate) fn style(&self) -> PathStyle {
        PathStyle {
            sep: self.path_separator,
            altsep: self.alternative_path_separator,
            drive_letters: self.supports_drive_letter,
        }
    }

    /// Whether mode bits are checked for this configuration.
    pub(crate) fn checks_permissions(&self) -> bool {
        self.enforce_permissions && self.flavor.is_posix() && self.uid != 0
    }
}
