use std::mem::size_of;

/// size of a block in bytes
pub const BLOCK_SIZE: usize = 4096;

/// number of blocks in the block pool
pub const NUM_BLOCKS: usize = 4096;

pub type Block = [u8; BLOCK_SIZE];
const_assert!(size_of::<Block>() == BLOCK_SIZE);

pub const EMPTY_BLOCK: Block = [0; BLOCK_SIZE];
