use std::mem::size_of;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::mfs::{BlockIndex, InodeNumber};

use super::block::BLOCK_SIZE;

pub const INODE_SIZE: usize = 64;
const_assert!(size_of::<Inode>() == INODE_SIZE);

/// number of inodes in the inode table
pub const NUM_INODES: usize = 4096;

/// number of block references held by an inode
pub const NUM_BLOCK_REFS: usize = 10;

pub const MAX_FILE_SIZE: usize = NUM_BLOCK_REFS * BLOCK_SIZE;

pub const ROOT_INODE: InodeNumber = 0;

/// An unallocated inode. An all-zero inode on disk decodes to this value.
pub const FREE_INODE: Inode = Inode {
    kind: InodeKind::Empty,
    size: 0,
    block_count: 0,
    block_refs: [BlockRef::NONE; NUM_BLOCK_REFS],
    padding: [0; 3],
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Inode {
    /// what the inode describes (and how its blocks are interpreted)
    pub kind: InodeKind,
    /// size in bytes
    pub size: u32,
    /// number of leading entries of `block_refs` in use
    pub block_count: u32,
    /// references into the block pool, in logical order
    pub block_refs: [BlockRef; NUM_BLOCK_REFS],
    /// Padding to make the struct occupy exactly [`INODE_SIZE`] bytes.
    pub padding: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum InodeKind {
    /// This inode is not in use.
    Empty = 0,
    /// This inode describes a directory.
    Directory = 1,
    /// This inode describes a regular data file.
    File = 2,
}

/// A reference to a slot in the block pool.
///
/// The slot index is stored off by one so that zero means "no block". That keeps a zeroed inode
/// identical to [`FREE_INODE`] while still allowing references to block zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BlockRef(u32);

impl BlockRef {
    pub const NONE: BlockRef = BlockRef(0);

    pub fn new(index: BlockIndex) -> Self {
        BlockRef(index as u32 + 1)
    }

    pub fn index(self) -> Option<BlockIndex> {
        self.0.checked_sub(1).map(|index| index as BlockIndex)
    }
}

impl Inode {
    /// An empty regular file.
    pub fn new_file() -> Self {
        Inode {
            kind: InodeKind::File,
            ..FREE_INODE
        }
    }

    /// A directory whose first block is `first_block`. The caller fills in the block and size.
    pub fn new_directory(first_block: BlockIndex) -> Self {
        let mut inode = Inode {
            kind: InodeKind::Directory,
            ..FREE_INODE
        };
        let pushed = inode.push_block(first_block);
        debug_assert!(pushed);

        inode
    }

    pub fn is_free(&self) -> bool {
        self.kind == InodeKind::Empty
    }

    pub fn num_blocks(&self) -> usize {
        self.block_count as usize
    }

    /// The block at logical position `n`, if that position is in use.
    pub fn block(&self, n: usize) -> Option<BlockIndex> {
        if n >= self.num_blocks() {
            return None;
        }

        self.block_refs.get(n).and_then(|block_ref| block_ref.index())
    }

    /// The blocks in use, in logical order. Absent references are skipped.
    pub fn blocks(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        self.block_refs
            .iter()
            .take(self.num_blocks())
            .filter_map(|block_ref| block_ref.index())
    }

    pub fn has_room_for_block(&self) -> bool {
        self.num_blocks() < NUM_BLOCK_REFS
    }

    /// Appends a block reference. Returns `false` if all references are in use.
    #[must_use]
    pub fn push_block(&mut self, block: BlockIndex) -> bool {
        if !self.has_room_for_block() {
            return false;
        }

        self.block_refs[self.num_blocks()] = BlockRef::new(block);
        self.block_count += 1;

        true
    }

    /// Removes the reference at logical position `n` by moving the last reference into its place.
    pub fn swap_remove_block(&mut self, n: usize) -> Option<BlockIndex> {
        if n >= self.num_blocks() {
            return None;
        }

        let last = self.num_blocks() - 1;
        let removed = self.block_refs[n].index();

        self.block_refs[n] = self.block_refs[last];
        self.block_refs[last] = BlockRef::NONE;
        self.block_count -= 1;

        removed
    }
}
