use thiserror::Error;

use crate::alloc::Pool;

/// Why a file system operation failed.
///
/// Everything except [`FsError::Storage`] is reported to the client as a `-1` result and leaves
/// the image untouched. A storage failure means the image in memory may no longer match the
/// backing file, so the server stops.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid inode number: {0}")]
    InvalidInode(i64),

    #[error("inode {0} is not allocated")]
    FreeInode(usize),

    #[error("inode {0} is not a directory")]
    NotADirectory(usize),

    #[error("inode {0} is not a regular file")]
    NotAFile(usize),

    #[error("block offset {0} is out of range")]
    InvalidOffset(i64),

    #[error("invalid entry name: {0}")]
    InvalidName(String),

    #[error("cannot create an entry of kind Empty")]
    InvalidKind,

    #[error("no entry named {0}")]
    NotFound(String),

    #[error("no free {0:?} left")]
    Exhausted(Pool),

    #[error("directory {0} has no room for another entry")]
    DirectoryFull(usize),

    #[error("directory {0} is not empty")]
    DirectoryNotEmpty(usize),

    #[error("image is corrupt")]
    Corrupt(#[source] anyhow::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FsError {
    /// Whether the server can keep serving requests after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Storage(_))
    }

    /// Whether this error reports a full pool or directory.
    pub fn is_capacity(&self) -> bool {
        matches!(self, FsError::Exhausted(_) | FsError::DirectoryFull(_))
    }
}
