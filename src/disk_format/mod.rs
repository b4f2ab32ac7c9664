//! Constants and structures that define the MFS image format.

/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// MFS blocks.
pub mod block;
/// Directory entries, entry names and directory blocks.
pub mod directory_entry;
/// Inodes.
pub mod inode;
