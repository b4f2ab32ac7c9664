//! First-fit slot allocation over fixed-size bitmaps.

use bitvec::prelude::*;

use crate::error::FsError;

/// The number of slots tracked by a bitmap.
pub const BITMAP_BITS: usize = 4096;

/// The number of bytes a bitmap occupies in the image.
pub const BITMAP_SIZE: usize = BITMAP_BITS / 8;

/// Tracks the allocation status of inode or block slots.
/// A set bit represents "allocated".
pub type Bitmap = BitArray<[u8; BITMAP_SIZE], Lsb0>;

/// Which pool a bitmap tracks. Only used to report exhaustion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pool {
    Inodes,
    Blocks,
}

impl Pool {
    /// The first slot handed out by [`allocate`]. Inode 0 belongs to the root directory.
    pub fn reserved_start(self) -> usize {
        match self {
            Pool::Inodes => 1,
            Pool::Blocks => 0,
        }
    }
}

/// Finds the first clear bit at or after the pool's reserved start, sets it and returns its
/// index.
pub fn allocate(bitmap: &mut Bitmap, pool: Pool) -> Result<usize, FsError> {
    let start = pool.reserved_start();

    let index = bitmap[start..]
        .first_zero()
        .map(|offset| start + offset)
        .ok_or(FsError::Exhausted(pool))?;

    bitmap.set(index, true);

    Ok(index)
}

/// Clears the bit for `index`. The caller is responsible for having zeroed the slot.
pub fn free(bitmap: &mut Bitmap, index: usize) {
    bitmap.set(index, false);
}

pub fn test(bitmap: &Bitmap, index: usize) -> bool {
    bitmap.get(index).is_some_and(|bit| *bit)
}
