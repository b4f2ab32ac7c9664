use std::{
    ffi::{CStr, CString},
    fmt::{self, Debug},
    mem::size_of,
};

use anyhow::{anyhow, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::mfs::InodeNumber;

use super::{
    block::{Block, BLOCK_SIZE},
    inode::NUM_INODES,
};

/// The number of bytes occupied by a directory entry.
pub const DIRECTORY_ENTRY_SIZE: usize = 254;
const_assert!(size_of::<DirectoryEntry>() == DIRECTORY_ENTRY_SIZE);

/// The number of directory entries that fit in a directory block.
pub const DIRECTORY_ENTRIES_PER_BLOCK: usize = 16;
const_assert!(size_of::<DirectoryBlock>() == BLOCK_SIZE);

/// The size of the name field, including room for the nul-terminator.
pub const NAME_FIELD_LEN: usize = 252;
const_assert!(size_of::<DirectoryEntryName>() == NAME_FIELD_LEN);

/// The maximum supported size of a file or directory name, excluding the nul-terminator.
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

// every inode number fits in an entry
const_assert!(NUM_INODES <= u16::MAX as usize + 1);

pub const DOT: &CStr = c".";
pub const DOT_DOT: &CStr = c"..";

const DOT_NAME: DirectoryEntryName = {
    let mut name = [0; NAME_FIELD_LEN];
    name[0] = b'.';
    DirectoryEntryName(name)
};

const DOT_DOT_NAME: DirectoryEntryName = {
    let mut name = [0; NAME_FIELD_LEN];
    name[0] = b'.';
    name[1] = b'.';
    DirectoryEntryName(name)
};

/// A free directory entry.
pub const FREE_DIRECTORY_ENTRY: DirectoryEntry = DirectoryEntry {
    inum: 0,
    name: DirectoryEntryName([0; NAME_FIELD_LEN]),
};

/// A directory block with no live entries.
pub const EMPTY_DIRECTORY_BLOCK: DirectoryBlock = DirectoryBlock {
    entries: [FREE_DIRECTORY_ENTRY; DIRECTORY_ENTRIES_PER_BLOCK],
    live_count: 0,
    reserved: 0,
    padding: [0; 30],
};

/// A directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntry {
    /// The inode number.
    pub inum: u16,
    /// The name of the entry.
    pub name: DirectoryEntryName,
}

impl DirectoryEntry {
    /// Constructs a new [`DirectoryEntry`] instance.
    pub fn new(inum: InodeNumber, name: &CStr) -> Result<DirectoryEntry> {
        Ok(DirectoryEntry {
            inum: inum
                .try_into()
                .with_context(|| format!("inode number {inum} does not fit in an entry"))?,
            name: name.try_into()?,
        })
    }

    /// Constructs an entry from an already validated name. `inum` must be below [`NUM_INODES`].
    pub fn with_name(inum: InodeNumber, name: DirectoryEntryName) -> DirectoryEntry {
        debug_assert!(inum < NUM_INODES);

        DirectoryEntry {
            inum: inum as u16,
            name,
        }
    }

    pub fn inode_number(&self) -> InodeNumber {
        self.inum as InodeNumber
    }
}

/// A name, as used in [`DirectoryEntry`].
///
/// Names of up to [`MAX_NAME_LEN`] bytes are supported; the rest of the field is nul bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntryName(#[serde(with = "BigArray")] [u8; NAME_FIELD_LEN]);

impl DirectoryEntryName {
    /// The bytes of the name, up to (and excluding) the first nul byte.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(NAME_FIELD_LEN);
        &self.0[..len]
    }

    pub fn matches(&self, name: &CStr) -> bool {
        self.as_bytes() == name.to_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl Debug for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectoryEntryName")
            .field(&CString::from(self))
            .finish()
    }
}

impl TryFrom<&CStr> for DirectoryEntryName {
    type Error = anyhow::Error;

    fn try_from(value: &CStr) -> Result<Self, Self::Error> {
        ensure!(
            value.count_bytes() <= MAX_NAME_LEN,
            "name is more than {MAX_NAME_LEN} bytes long"
        );

        let bytes = value.to_bytes();
        let mut converted = [0; NAME_FIELD_LEN];
        converted[0..bytes.len()].copy_from_slice(bytes);

        Ok(DirectoryEntryName(converted))
    }
}

impl From<&DirectoryEntryName> for CString {
    fn from(val: &DirectoryEntryName) -> Self {
        CString::new(val.as_bytes()).expect("as_bytes stops at the first nul byte")
    }
}

impl fmt::Display for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// One block's worth of directory entries.
///
/// Entries below `live_count` are live and dense; everything above it is zeroed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryBlock {
    entries: [DirectoryEntry; DIRECTORY_ENTRIES_PER_BLOCK],
    live_count: u8,
    reserved: u8,
    padding: [u8; 30],
}

impl DirectoryBlock {
    /// The first block of a new directory: "." pointing at `inum` and ".." at `parent_inum`.
    pub fn new_directory(inum: InodeNumber, parent_inum: InodeNumber) -> Self {
        let mut block = EMPTY_DIRECTORY_BLOCK;
        block.entries[0] = DirectoryEntry::with_name(inum, DOT_NAME);
        block.entries[1] = DirectoryEntry::with_name(parent_inum, DOT_DOT_NAME);
        block.live_count = 2;

        block
    }

    pub fn decode(block: &Block) -> Result<Self> {
        let directory: DirectoryBlock =
            bincode::deserialize(block).context("parsing directory block")?;

        ensure!(
            directory.len() <= DIRECTORY_ENTRIES_PER_BLOCK,
            "directory block claims {} live entries",
            directory.live_count
        );

        Ok(directory)
    }

    pub fn encode(&self) -> Result<Block> {
        let serialized = bincode::serialize(self).context("serializing directory block")?;

        serialized.try_into().map_err(|bytes: Vec<u8>| {
            anyhow!("directory block serialized to {} bytes", bytes.len())
        })
    }

    /// The encoded live entries, without the unused slots and the trailer.
    pub fn encode_live_entries(&self) -> Result<Vec<u8>> {
        let block = self.encode()?;
        Ok(block[..self.len() * DIRECTORY_ENTRY_SIZE].to_vec())
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries[..self.len()]
    }

    pub fn len(&self) -> usize {
        self.live_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= DIRECTORY_ENTRIES_PER_BLOCK
    }

    /// The position and value of the live entry called `name`.
    pub fn find(&self, name: &CStr) -> Option<(usize, &DirectoryEntry)> {
        self.entries()
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.name.matches(name))
    }

    /// Appends an entry. Returns `false` if the block is full.
    #[must_use]
    pub fn push(&mut self, entry: DirectoryEntry) -> bool {
        if self.is_full() {
            return false;
        }

        self.entries[self.len()] = entry;
        self.live_count += 1;

        true
    }

    /// Removes the live entry at `index` by moving the last live entry into its place.
    pub fn swap_remove(&mut self, index: usize) -> Option<DirectoryEntry> {
        if index >= self.len() {
            return None;
        }

        let last = self.len() - 1;
        let removed = self.entries[index];

        self.entries[index] = self.entries[last];
        self.entries[last] = FREE_DIRECTORY_ENTRY;
        self.live_count -= 1;

        Some(removed)
    }
}
