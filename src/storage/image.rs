use std::fmt;

use anyhow::{ensure, Context, Result};

use crate::{
    alloc::{self, Bitmap, Pool, BITMAP_SIZE},
    disk_format::{
        block::{Block, BLOCK_SIZE, EMPTY_BLOCK, NUM_BLOCKS},
        directory_entry::{DirectoryBlock, DIRECTORY_ENTRY_SIZE},
        inode::{Inode, FREE_INODE, INODE_SIZE, NUM_INODES, ROOT_INODE},
    },
};

const INODE_BITMAP_START: usize = 0;
const BLOCK_BITMAP_START: usize = INODE_BITMAP_START + BITMAP_SIZE;
const INODE_TABLE_START: usize = BLOCK_BITMAP_START + BITMAP_SIZE;
const BLOCK_POOL_START: usize = INODE_TABLE_START + NUM_INODES * INODE_SIZE;

/// The number of bytes in a serialized image.
pub const IMAGE_SIZE: usize = BLOCK_POOL_START + NUM_BLOCKS * BLOCK_SIZE;

/// The whole file system: both allocation bitmaps, the inode table and the block pool.
///
/// On disk these appear contiguously in that order, with no header.
#[derive(Clone)]
pub struct Image {
    pub inode_bitmap: Bitmap,
    pub block_bitmap: Bitmap,
    pub inodes: Vec<Inode>,
    pub blocks: Vec<Block>,
}

impl Image {
    /// An image with every inode and block free. Not a valid file system: it has no root.
    pub fn zeroed() -> Self {
        Self {
            inode_bitmap: Bitmap::ZERO,
            block_bitmap: Bitmap::ZERO,
            inodes: vec![FREE_INODE; NUM_INODES],
            blocks: vec![EMPTY_BLOCK; NUM_BLOCKS],
        }
    }

    /// An empty file system: only the root directory, holding "." and "..".
    pub fn format() -> Result<Self> {
        let mut image = Self::zeroed();

        let root_block = alloc::allocate(&mut image.block_bitmap, Pool::Blocks)?;
        image.blocks[root_block] = DirectoryBlock::new_directory(ROOT_INODE, ROOT_INODE).encode()?;

        let mut root = Inode::new_directory(root_block);
        root.size = (2 * DIRECTORY_ENTRY_SIZE) as u32;
        image.inodes[ROOT_INODE] = root;
        image.inode_bitmap.set(ROOT_INODE, true);

        Ok(image)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(IMAGE_SIZE);

        bytes.extend_from_slice(self.inode_bitmap.as_raw_slice());
        bytes.extend_from_slice(self.block_bitmap.as_raw_slice());

        for inode in &self.inodes {
            bincode::serialize_into(&mut bytes, inode).context("serializing inode")?;
        }

        for block in &self.blocks {
            bytes.extend_from_slice(block);
        }

        ensure!(
            bytes.len() == IMAGE_SIZE,
            "image serialized to {} bytes",
            bytes.len()
        );

        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == IMAGE_SIZE,
            "image is {} bytes, expected {IMAGE_SIZE}",
            bytes.len()
        );

        let inode_bitmap = read_bitmap(&bytes[INODE_BITMAP_START..BLOCK_BITMAP_START])?;
        let block_bitmap = read_bitmap(&bytes[BLOCK_BITMAP_START..INODE_TABLE_START])?;

        let inodes = bytes[INODE_TABLE_START..BLOCK_POOL_START]
            .chunks_exact(INODE_SIZE)
            .map(|inode| bincode::deserialize(inode).context("parsing inode"))
            .collect::<Result<Vec<Inode>>>()?;

        let blocks = bytes[BLOCK_POOL_START..]
            .chunks_exact(BLOCK_SIZE)
            .map(|block| block.try_into().expect("chunks are exactly BLOCK_SIZE long"))
            .collect::<Vec<Block>>();

        Ok(Self {
            inode_bitmap,
            block_bitmap,
            inodes,
            blocks,
        })
    }

    pub fn num_allocated_inodes(&self) -> usize {
        self.inode_bitmap.count_ones()
    }

    pub fn num_allocated_blocks(&self) -> usize {
        self.block_bitmap.count_ones()
    }
}

fn read_bitmap(bytes: &[u8]) -> Result<Bitmap> {
    let raw: [u8; BITMAP_SIZE] = bytes.try_into().context("bitmap has the wrong size")?;
    Ok(Bitmap::new(raw))
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.inode_bitmap.as_raw_slice() == other.inode_bitmap.as_raw_slice()
            && self.block_bitmap.as_raw_slice() == other.block_bitmap.as_raw_slice()
            && self.inodes == other.inodes
            && self.blocks == other.blocks
    }
}

impl Eq for Image {}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("allocated_inodes", &self.num_allocated_inodes())
            .field("allocated_blocks", &self.num_allocated_blocks())
            .finish_non_exhaustive()
    }
}
