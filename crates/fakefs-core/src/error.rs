// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the fake filesystem engine

use std::io;

/// Filesystem error carrying the offending path (or descriptor).
///
/// Every variant maps onto the errno space through [`FsError::errno`] so
/// emulated call sites can report the same numeric codes a host OS would.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("file exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("permission denied: {0}")]
    AccessDenied(String),
    #[error("operation not permitted: {0}")]
    OperationNotPermitted(String),
    #[error("too many levels of symbolic links: {0}")]
    FilesystemLoop(String),
    #[error("invalid cross-device link: {0}")]
    CrossDevice(String),
    #[error("no space left on device: {0}")]
    NoSpace(String),
    #[error("bad file descriptor: {0}")]
    BadDescriptor(u32),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    pub fn access_denied(path: impl Into<String>) -> Self {
        Self::AccessDenied(path.into())
    }

    pub fn not_permitted(path: impl Into<String>) -> Self {
        Self::OperationNotPermitted(path.into())
    }

    pub fn link_loop(path: impl Into<String>) -> Self {
        Self::FilesystemLoop(path.into())
    }

    pub fn cross_device(path: impl Into<String>) -> Self {
        Self::CrossDevice(path.into())
    }

    pub fn no_space(path: impl Into<String>) -> Self {
        Self::NoSpace(path.into())
    }

    pub fn invalid_argument(path: impl Into<String>) -> Self {
        Self::InvalidArgument(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// The errno a host OS would report for this condition.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            FsError::AccessDenied(_) => libc::EACCES,
            FsError::OperationNotPermitted(_) => libc::EPERM,
            FsError::FilesystemLoop(_) => libc::ELOOP,
            FsError::CrossDevice(_) => libc::EXDEV,
            FsError::NoSpace(_) => libc::ENOSPC,
            FsError::BadDescriptor(_) => libc::EBADF,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::NotImplemented(_) => libc::ENOSYS,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// The path the operation failed on, when one is known.
    pub fn path(&self) -> Option<&str> {
        match self {
            FsError::NotFound(p)
            | FsError::AlreadyExists(p)
            | FsError::NotADirectory(p)
            | FsError::IsADirectory(p)
            | FsError::DirectoryNotEmpty(p)
            | FsError::AccessDenied(p)
            | FsError::OperationNotPermitted(p)
            | FsError::FilesystemLoop(p)
            | FsError::CrossDevice(p)
            | FsError::NoSpace(p)
            | FsError::InvalidArgument(p)
            | FsError::InvalidPath(p) => Some(p),
            _ => None,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(inner) => inner,
            other => io::Error::from_raw_os_error(other.errno()),
        }
    }
}
