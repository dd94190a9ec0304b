// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory fake filesystem engine for tests
//!
//! This crate implements a filesystem that lives entirely in memory and
//! mimics the path rules and error behavior of Linux, macOS or Windows,
//! independent of the machine the tests run on. Code under test performs
//! ordinary-looking file operations against a [`FakeFs`]; tests inspect
//! and manipulate the tree directly, switch OS flavors, constrain disk
//! space or inject faults.
//!
//! ```
//! use fakefs_core::{FakeFs, FsConfig};
//!
//! let fs = FakeFs::new(FsConfig::linux());
//! fs.create_file("/etc/hosts", b"127.0.0.1 localhost")?;
//! assert!(fs.is_file("/etc/hosts"));
//! assert_eq!(fs.listdir("/etc")?, vec!["hosts"]);
//! # Ok::<(), fakefs_core::FsError>(())
//! ```

pub mod config;
pub mod error;
pub mod fault;
pub mod types;
pub mod vfs;

mod handles;
mod mount;
mod node;
mod path;

// Re-export key types
pub use config::{FsConfig, OsFlavor};
pub use error::{FsError, FsResult};
pub use fault::{FaultErrno, FaultOp, FaultPolicy, FaultRule};
pub use types::{DirEntry, DiskUsage, Fd, FileStat, OpenOptions, PathArg, UNLIMITED};
pub use vfs::FakeFs;
