use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::path::Path;

use anyhow::{anyhow, bail, ensure};
use log::{debug, info, warn};

use crate::{
    alloc::{self, Pool},
    disk_format::{
        block::{Block, BLOCK_SIZE, EMPTY_BLOCK, NUM_BLOCKS},
        directory_entry::{
            DirectoryBlock, DirectoryEntry, DirectoryEntryName, DIRECTORY_ENTRY_SIZE, DOT,
            DOT_DOT, EMPTY_DIRECTORY_BLOCK,
        },
        inode::{Inode, InodeKind, FREE_INODE, NUM_BLOCK_REFS, NUM_INODES, ROOT_INODE},
    },
    error::FsError,
    storage::{FileBackedStorage, Image, ImageStorage},
};

// inode numbers are `u16`s in directory entries and `i32`s on the wire, but we use `usize`s to
// avoid littering the code with casts
pub type InodeNumber = usize;

/// An index into the block pool.
pub type BlockIndex = usize;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// What [`Mfs::stat`] reports about an inode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub kind: InodeKind,
    pub size: u32,
    pub blocks: u32,
}

/// The contents of a block, interpreted according to the kind of the inode that owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockContent {
    File(Block),
    Directory(DirectoryBlock),
}

impl BlockContent {
    /// The meaningful bytes of the block. For directories, only the live entries.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            BlockContent::File(block) => Ok(block.to_vec()),
            BlockContent::Directory(directory) => Ok(directory.encode_live_entries()?),
        }
    }
}

/// Where a directory entry lives.
struct EntryLocation {
    /// logical position of the block within the directory
    position: usize,
    /// the block holding the entry
    block: BlockIndex,
    /// the decoded block
    directory: DirectoryBlock,
    /// index of the entry within the block
    index: usize,
    /// the inode the entry points to
    inum: InodeNumber,
}

/// Where a new entry will go in a directory.
enum Room {
    /// an existing block with a free slot
    Existing {
        block: BlockIndex,
        directory: DirectoryBlock,
    },
    /// every block is full, so the directory takes a new one
    Grow,
}

/// Slots claimed by [`Mfs::reserve`].
struct Reserved {
    inum: InodeNumber,
    parent_block: Option<BlockIndex>,
    child_block: Option<BlockIndex>,
}

/// The file system: the image and the storage it is persisted to.
///
/// Every mutating operation rewrites the whole image to storage before returning success.
pub struct Mfs<S: ImageStorage> {
    storage: S,
    image: Image,
}

impl Mfs<FileBackedStorage> {
    /// Opens the image called `base`, creating an empty file system if it doesn't exist yet.
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        Self::new(FileBackedStorage::open(base)?)
    }
}

impl<S: ImageStorage> Mfs<S> {
    /// Loads the image held by `storage`, or formats and persists a new one if there is none.
    pub fn new(mut storage: S) -> Result<Self> {
        let image = match storage.load()? {
            Some(bytes) => Image::decode(&bytes).map_err(FsError::Corrupt)?,
            None => {
                info!("formatting new image");
                let image = Image::format()?;
                storage.persist(&image.encode()?)?;

                image
            }
        };

        Self::from_image(storage, image)
    }

    /// Loads the image held by `storage`. Fails if there is none.
    pub fn load(mut storage: S) -> Result<Self> {
        let bytes = storage
            .load()?
            .ok_or_else(|| anyhow!("storage holds no image"))?;
        let image = Image::decode(&bytes).map_err(FsError::Corrupt)?;

        Self::from_image(storage, image)
    }

    fn from_image(storage: S, image: Image) -> Result<Self> {
        if image.inodes[ROOT_INODE].kind != InodeKind::Directory {
            return Err(FsError::Corrupt(anyhow!("root inode is not a directory")));
        }

        info!(
            "{} of {NUM_INODES} inodes and {} of {NUM_BLOCKS} blocks allocated",
            image.num_allocated_inodes(),
            image.num_allocated_blocks()
        );

        Ok(Self { storage, image })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Looks up `name` in the directory `parent_inum`.
    pub fn lookup(&self, parent_inum: InodeNumber, name: &CStr) -> Result<InodeNumber> {
        let parent = self.directory_inode(parent_inum)?;

        self.find_entry(&parent, name)?
            .map(|location| location.inum)
            .ok_or_else(|| FsError::NotFound(name.to_string_lossy().into_owned()))
    }

    /// Creates a file or directory called `name` in the directory `parent_inum`.
    ///
    /// Succeeds without changing anything if `name` already exists, so a retried request is
    /// harmless.
    pub fn create(&mut self, parent_inum: InodeNumber, kind: InodeKind, name: &CStr) -> Result<()> {
        let mut parent = self.directory_inode(parent_inum)?;

        if kind == InodeKind::Empty {
            return Err(FsError::InvalidKind);
        }

        let entry_name = validate_name(name)?;

        if self.find_entry(&parent, name)?.is_some() {
            info!("[inode #{parent_inum}] {name:?} already exists");
            return Ok(());
        }

        let room = self.find_room(parent_inum, &parent)?;
        let reserved = self.reserve(
            matches!(room, Room::Grow),
            kind == InodeKind::Directory,
        )?;
        let new_inum = reserved.inum;

        let (parent_block, mut parent_directory) = match room {
            Room::Existing { block, directory } => (block, directory),
            Room::Grow => {
                let block = reserved
                    .parent_block
                    .expect("a block is reserved whenever the parent grows");
                let pushed = parent.push_block(block);
                debug_assert!(pushed, "find_room checked for a free reference");

                (block, EMPTY_DIRECTORY_BLOCK)
            }
        };

        let pushed = parent_directory.push(DirectoryEntry::with_name(new_inum, entry_name));
        debug_assert!(pushed, "find_room returned a block with a free slot");
        self.write_directory_block(parent_block, &parent_directory)?;

        parent.size += DIRECTORY_ENTRY_SIZE as u32;
        self.image.inodes[parent_inum] = parent;

        let new_inode = match reserved.child_block {
            Some(block) => {
                let directory = DirectoryBlock::new_directory(new_inum, parent_inum);
                self.write_directory_block(block, &directory)?;

                let mut inode = Inode::new_directory(block);
                inode.size = (directory.len() * DIRECTORY_ENTRY_SIZE) as u32;
                inode
            }
            None => Inode::new_file(),
        };
        self.image.inodes[new_inum] = new_inode;

        self.persist()?;

        info!("[inode #{parent_inum}] created {kind:?} {name:?} as inode #{new_inum}");
        Ok(())
    }

    pub fn stat(&self, inum: InodeNumber) -> Result<Stat> {
        let inode = self.allocated_inode(inum)?;

        Ok(Stat {
            kind: inode.kind,
            size: inode.size,
            blocks: inode.block_count,
        })
    }

    /// Reads the block at logical position `offset` of `inum`.
    ///
    /// File blocks are returned whole. Directory blocks are returned as their live entries only.
    pub fn read_block(&self, inum: InodeNumber, offset: usize) -> Result<Vec<u8>> {
        debug!("[inode #{inum}] reading block {offset}");

        let inode = self.allocated_inode(inum)?;
        let content = self.block_content(inum, &inode, offset)?;

        content.to_bytes()
    }

    /// Writes `data` to the block at logical position `offset` of the regular file `inum`.
    ///
    /// `offset` may name an existing block, which is overwritten in place, or the position just
    /// past the last block, which allocates a new one. Writing the same data to the same offset
    /// again leaves the image unchanged.
    pub fn write_block(&mut self, inum: InodeNumber, offset: usize, data: &Block) -> Result<()> {
        let mut inode = self.file_inode(inum)?;

        if offset > inode.num_blocks() || offset >= NUM_BLOCK_REFS {
            return Err(FsError::InvalidOffset(offset as i64));
        }

        let block = if offset < inode.num_blocks() {
            inode.block(offset).ok_or_else(|| {
                FsError::Corrupt(anyhow!("inode #{inum} is missing block {offset}"))
            })?
        } else {
            let block = alloc::allocate(&mut self.image.block_bitmap, Pool::Blocks)?;
            let pushed = inode.push_block(block);
            debug_assert!(pushed, "offset is below NUM_BLOCK_REFS");

            block
        };

        *self.pool_block_mut(block)? = *data;

        inode.size = (inode.num_blocks() * BLOCK_SIZE) as u32;
        self.image.inodes[inum] = inode;

        self.persist()?;

        info!("[inode #{inum}] wrote block {offset} (pool block {block})");
        Ok(())
    }

    /// Removes `name` from the directory `parent_inum`, freeing its inode and blocks.
    ///
    /// Succeeds without changing anything if `name` doesn't exist, so a retried request is
    /// harmless. Directories must be empty.
    pub fn unlink(&mut self, parent_inum: InodeNumber, name: &CStr) -> Result<()> {
        let mut parent = self.directory_inode(parent_inum)?;

        if name == DOT || name == DOT_DOT {
            return Err(FsError::InvalidName(name.to_string_lossy().into_owned()));
        }

        let Some(location) = self.find_entry(&parent, name)? else {
            info!("[inode #{parent_inum}] no entry {name:?} to unlink");
            return Ok(());
        };

        let inum = location.inum;
        let target = self.allocated_inode(inum).map_err(|err| match err {
            FsError::Corrupt(_) => err,
            _ => FsError::Corrupt(anyhow!("entry {name:?} points to inode #{inum}: {err}")),
        })?;

        if target.kind == InodeKind::Directory && self.count_entries(&target)? != 2 {
            return Err(FsError::DirectoryNotEmpty(inum));
        }

        parent.size = parent
            .size
            .checked_sub(DIRECTORY_ENTRY_SIZE as u32)
            .ok_or_else(|| {
                FsError::Corrupt(anyhow!("directory #{parent_inum} is smaller than its entries"))
            })?;

        let mut directory = location.directory;
        directory.swap_remove(location.index);
        self.write_directory_block(location.block, &directory)?;

        for block in target.blocks() {
            self.release_block(block)?;
        }
        self.image.inodes[inum] = FREE_INODE;
        alloc::free(&mut self.image.inode_bitmap, inum);

        // the first block always holds "." and "..", so only later blocks can empty out
        if directory.is_empty() && location.position != 0 {
            parent.swap_remove_block(location.position);
            self.release_block(location.block)?;
        }
        self.image.inodes[parent_inum] = parent;

        self.persist()?;

        info!("[inode #{parent_inum}] unlinked {name:?} (inode #{inum})");
        Ok(())
    }

    /// All live entries of the directory `inum`, including "." and "..".
    pub fn read_directory(&self, inum: InodeNumber) -> Result<Vec<DirectoryEntry>> {
        let inode = self.directory_inode(inum)?;

        let mut entries = vec![];
        for block in inode.blocks() {
            entries.extend_from_slice(self.read_directory_block(block)?.entries());
        }

        Ok(entries)
    }

    /// Checks the file system for consistency. Performs a depth-first traversal of the directory
    /// tree after checking the inode table against both bitmaps.
    pub fn check_filesystem(&self) -> anyhow::Result<()> {
        let mut owned_blocks = HashSet::<BlockIndex>::new();
        let mut num_allocated_inodes = 0;

        for (inum, inode) in self.image.inodes.iter().enumerate() {
            let bit = alloc::test(&self.image.inode_bitmap, inum);

            if inode.is_free() {
                ensure!(!bit, "free inode #{inum} is marked allocated");
                ensure!(*inode == FREE_INODE, "free inode #{inum} is not zeroed");
                continue;
            }

            ensure!(bit, "inode #{inum} is in use but not marked allocated");
            num_allocated_inodes += 1;

            ensure!(
                inode.num_blocks() <= NUM_BLOCK_REFS,
                "inode #{inum} claims {} blocks",
                inode.block_count
            );

            for (position, block_ref) in inode.block_refs.iter().enumerate() {
                let Some(block) = block_ref.index() else {
                    ensure!(
                        position >= inode.num_blocks(),
                        "inode #{inum} is missing block {position}"
                    );
                    continue;
                };

                ensure!(
                    position < inode.num_blocks(),
                    "inode #{inum} has a stray block reference at {position}"
                );
                ensure!(block < NUM_BLOCKS, "inode #{inum} references block {block}");
                ensure!(
                    alloc::test(&self.image.block_bitmap, block),
                    "block {block} of inode #{inum} is not marked allocated"
                );
                ensure!(
                    owned_blocks.insert(block),
                    "block {block} is referenced more than once"
                );
            }

            if inode.kind == InodeKind::File {
                ensure!(
                    inode.size as usize == inode.num_blocks() * BLOCK_SIZE,
                    "file inode #{inum} has size {} for {} blocks",
                    inode.size,
                    inode.block_count
                );
            }
        }

        ensure!(
            num_allocated_inodes == self.image.num_allocated_inodes(),
            "{} inodes marked allocated, {num_allocated_inodes} in use",
            self.image.num_allocated_inodes()
        );
        ensure!(
            owned_blocks.len() == self.image.num_allocated_blocks(),
            "{} blocks marked allocated, {} in use",
            self.image.num_allocated_blocks(),
            owned_blocks.len()
        );

        self.check_directory_tree(num_allocated_inodes)
    }

    fn check_directory_tree(&self, num_allocated_inodes: usize) -> anyhow::Result<()> {
        let root_inode = self.image.inodes[ROOT_INODE];
        if root_inode.kind != InodeKind::Directory {
            bail!("root inode does not represent a directory");
        }

        let mut queue = vec![ROOT_INODE];
        let mut seen_inodes = HashSet::from([ROOT_INODE]);
        let mut directory_parents = HashMap::from([(ROOT_INODE, ROOT_INODE)]);

        while let Some(inum) = queue.pop() {
            let inode = self.image.inodes[inum];
            if inode.is_free() {
                bail!("directory tree includes free inode #{inum}");
            }

            if inode.kind != InodeKind::Directory {
                continue;
            }

            let parent_inum = *directory_parents
                .get(&inum)
                .expect("this directory was discovered through the entries of some directory");

            let mut entry_names: HashSet<CString> = HashSet::new();
            let mut num_entries = 0;

            for (position, block) in inode.blocks().enumerate() {
                let directory = self.read_directory_block(block)?;

                if position > 0 && directory.is_empty() {
                    warn!("directory #{inum} holds an empty block {block}");
                }

                if position == 0 {
                    let entries = directory.entries();
                    ensure!(
                        entries.len() >= 2 && entries[0].name.matches(DOT),
                        "directory #{inum} does not start with '.'"
                    );
                    ensure!(
                        entries[1].name.matches(DOT_DOT),
                        "directory #{inum} does not have '..' second"
                    );
                }

                for entry in directory.entries() {
                    num_entries += 1;

                    let entry_inum = entry.inode_number();
                    ensure!(
                        entry_inum < NUM_INODES,
                        "invalid inode number in directory entry: {entry_inum}"
                    );

                    let entry_name = CString::from(&entry.name);
                    let entry_name = entry_name.as_c_str();

                    if !entry_names.insert(entry_name.to_owned()) {
                        bail!("directory #{inum} contains duplicate entry: {}", entry.name);
                    }

                    if entry_name == DOT {
                        ensure!(entry_inum == inum, "'.' entry doesn't point to self");
                        continue;
                    }

                    if entry_name == DOT_DOT {
                        ensure!(entry_inum == parent_inum, "'..' entry doesn't point to parent");
                        continue;
                    }

                    if entry.name.is_empty() {
                        bail!("invalid directory entry name: \"\"");
                    }

                    if !seen_inodes.insert(entry_inum) {
                        bail!("inode #{entry_inum} is reachable more than once");
                    }

                    if self.image.inodes[entry_inum].kind == InodeKind::Directory {
                        directory_parents.insert(entry_inum, inum);
                    }

                    queue.push(entry_inum);
                }
            }

            ensure!(
                inode.size as usize == num_entries * DIRECTORY_ENTRY_SIZE,
                "directory #{inum} has size {} for {num_entries} entries",
                inode.size
            );
        }

        if seen_inodes.len() != num_allocated_inodes {
            warn!(
                "{} allocated inodes are not reachable from the root",
                num_allocated_inodes - seen_inodes.len().min(num_allocated_inodes)
            );
        }

        Ok(())
    }

    fn inode(&self, inum: InodeNumber) -> Result<Inode> {
        self.image
            .inodes
            .get(inum)
            .copied()
            .ok_or(FsError::InvalidInode(inum as i64))
    }

    /// An allocated inode whose block references all lie inside the pool, so that operations
    /// can index the pool with them.
    fn allocated_inode(&self, inum: InodeNumber) -> Result<Inode> {
        let inode = self.inode(inum)?;
        if inode.is_free() {
            return Err(FsError::FreeInode(inum));
        }

        if inode.num_blocks() > NUM_BLOCK_REFS {
            return Err(FsError::Corrupt(anyhow!(
                "inode #{inum} claims {} blocks",
                inode.block_count
            )));
        }

        if let Some(block) = inode.blocks().find(|block| *block >= NUM_BLOCKS) {
            return Err(FsError::Corrupt(anyhow!(
                "inode #{inum} references block {block}, outside the pool"
            )));
        }

        Ok(inode)
    }

    fn directory_inode(&self, inum: InodeNumber) -> Result<Inode> {
        let inode = self.allocated_inode(inum)?;
        if inode.kind != InodeKind::Directory {
            return Err(FsError::NotADirectory(inum));
        }

        Ok(inode)
    }

    fn file_inode(&self, inum: InodeNumber) -> Result<Inode> {
        let inode = self.allocated_inode(inum)?;
        if inode.kind != InodeKind::File {
            return Err(FsError::NotAFile(inum));
        }

        Ok(inode)
    }

    /// The block at logical position `offset` of `inode`, interpreted by the inode's kind.
    fn block_content(&self, inum: InodeNumber, inode: &Inode, offset: usize) -> Result<BlockContent> {
        let block = inode
            .block(offset)
            .ok_or(FsError::InvalidOffset(offset as i64))?;

        match inode.kind {
            InodeKind::File => Ok(BlockContent::File(*self.pool_block(block)?)),
            InodeKind::Directory => Ok(BlockContent::Directory(self.read_directory_block(block)?)),
            InodeKind::Empty => Err(FsError::FreeInode(inum)),
        }
    }

    fn pool_block(&self, block: BlockIndex) -> Result<&Block> {
        self.image
            .blocks
            .get(block)
            .ok_or_else(|| FsError::Corrupt(anyhow!("block {block} is outside the pool")))
    }

    fn pool_block_mut(&mut self, block: BlockIndex) -> Result<&mut Block> {
        self.image
            .blocks
            .get_mut(block)
            .ok_or_else(|| FsError::Corrupt(anyhow!("block {block} is outside the pool")))
    }

    fn read_directory_block(&self, block: BlockIndex) -> Result<DirectoryBlock> {
        DirectoryBlock::decode(self.pool_block(block)?).map_err(FsError::Corrupt)
    }

    fn write_directory_block(&mut self, block: BlockIndex, directory: &DirectoryBlock) -> Result<()> {
        *self.pool_block_mut(block)? = directory.encode()?;
        Ok(())
    }

    fn find_entry(&self, directory: &Inode, name: &CStr) -> Result<Option<EntryLocation>> {
        for (position, block) in directory.blocks().enumerate() {
            let decoded = self.read_directory_block(block)?;

            if let Some((index, entry)) = decoded.find(name) {
                return Ok(Some(EntryLocation {
                    position,
                    block,
                    index,
                    inum: entry.inode_number(),
                    directory: decoded,
                }));
            }
        }

        Ok(None)
    }

    /// Finds a slot for a new entry, preferring existing blocks over growing the directory.
    fn find_room(&self, inum: InodeNumber, directory: &Inode) -> Result<Room> {
        for block in directory.blocks() {
            let decoded = self.read_directory_block(block)?;

            if !decoded.is_full() {
                return Ok(Room::Existing {
                    block,
                    directory: decoded,
                });
            }
        }

        if directory.has_room_for_block() {
            Ok(Room::Grow)
        } else {
            Err(FsError::DirectoryFull(inum))
        }
    }

    fn count_entries(&self, directory: &Inode) -> Result<usize> {
        let mut count = 0;
        for block in directory.blocks() {
            count += self.read_directory_block(block)?.len();
        }

        Ok(count)
    }

    /// Claims a new inode and the blocks a create needs. Either everything is claimed or nothing
    /// is.
    fn reserve(&mut self, grow_parent: bool, child_directory: bool) -> Result<Reserved> {
        let inum = alloc::allocate(&mut self.image.inode_bitmap, Pool::Inodes)?;

        let mut blocks = vec![];
        for _ in 0..(usize::from(grow_parent) + usize::from(child_directory)) {
            match alloc::allocate(&mut self.image.block_bitmap, Pool::Blocks) {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    for block in blocks {
                        alloc::free(&mut self.image.block_bitmap, block);
                    }
                    alloc::free(&mut self.image.inode_bitmap, inum);

                    return Err(err);
                }
            }
        }

        let mut blocks = blocks.into_iter();
        let parent_block = if grow_parent { blocks.next() } else { None };
        let child_block = if child_directory { blocks.next() } else { None };

        Ok(Reserved {
            inum,
            parent_block,
            child_block,
        })
    }

    /// Zeroes a block and marks it free.
    fn release_block(&mut self, block: BlockIndex) -> Result<()> {
        *self.pool_block_mut(block)? = EMPTY_BLOCK;
        alloc::free(&mut self.image.block_bitmap, block);

        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let bytes = self.image.encode()?;
        self.storage.persist(&bytes)?;

        Ok(())
    }
}

/// Checks that `name` can be stored in a directory entry.
fn validate_name(name: &CStr) -> Result<DirectoryEntryName> {
    if name.is_empty() {
        return Err(FsError::InvalidName(String::new()));
    }

    DirectoryEntryName::try_from(name)
        .map_err(|err| FsError::InvalidName(format!("{}: {err}", name.to_string_lossy())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alloc::Bitmap, disk_format::directory_entry::MAX_NAME_LEN, storage::MemoryStorage,
    };

    fn new_mfs() -> Mfs<MemoryStorage> {
        Mfs::new(MemoryStorage::new()).unwrap()
    }

    fn name(i: usize) -> CString {
        CString::new(format!("entry-{i}")).unwrap()
    }

    fn pattern(seed: u8) -> Block {
        let mut block = EMPTY_BLOCK;
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }

        block
    }

    mod open {
        use super::*;

        #[test]
        fn test_new_formats_and_persists() {
            let mfs = new_mfs();

            assert_eq!(mfs.storage().persist_count(), 1);
            assert!(mfs.storage().persisted().unwrap() == mfs.image().encode().unwrap());
            assert_eq!(mfs.image().num_allocated_inodes(), 1);
            assert_eq!(mfs.image().num_allocated_blocks(), 1);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_reopen_sees_same_image() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();
            mfs.write_block(1, 0, &pattern(3)).unwrap();
            let image = mfs.image().clone();

            let reopened = Mfs::new(mfs.into_storage()).unwrap();
            assert!(*reopened.image() == image);
            assert_eq!(reopened.storage().persist_count(), 3);
        }

        #[test]
        fn test_load_requires_image() {
            assert!(Mfs::load(MemoryStorage::new()).is_err());
        }

        #[test]
        fn test_root_must_be_directory() {
            let mut storage = MemoryStorage::new();
            storage.persist(&Image::zeroed().encode().unwrap()).unwrap();

            assert!(matches!(Mfs::new(storage), Err(FsError::Corrupt(_))));
        }
    }

    mod lookup {
        use super::*;

        #[test]
        fn test_root_dot_entries() {
            let mfs = new_mfs();

            assert_eq!(mfs.lookup(ROOT_INODE, DOT).unwrap(), ROOT_INODE);
            assert_eq!(mfs.lookup(ROOT_INODE, DOT_DOT).unwrap(), ROOT_INODE);
        }

        #[test]
        fn test_subdirectory_dot_dot() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::Directory, c"sub").unwrap();

            let sub = mfs.lookup(ROOT_INODE, c"sub").unwrap();
            assert_eq!(mfs.lookup(sub, DOT).unwrap(), sub);
            assert_eq!(mfs.lookup(sub, DOT_DOT).unwrap(), ROOT_INODE);
        }

        #[test]
        fn test_missing_name() {
            let mfs = new_mfs();
            assert!(matches!(
                mfs.lookup(ROOT_INODE, c"missing"),
                Err(FsError::NotFound(_))
            ));
        }

        #[test]
        fn test_invalid_parent() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();

            assert!(matches!(
                mfs.lookup(NUM_INODES, DOT),
                Err(FsError::InvalidInode(_))
            ));
            assert!(matches!(mfs.lookup(7, DOT), Err(FsError::FreeInode(7))));
            assert!(matches!(mfs.lookup(1, DOT), Err(FsError::NotADirectory(1))));
        }
    }

    mod create {
        use super::*;

        #[test]
        fn test_create_file() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();

            let inum = mfs.lookup(ROOT_INODE, c"abc").unwrap();
            assert_eq!(inum, 1);
            assert_eq!(
                mfs.stat(inum).unwrap(),
                Stat {
                    kind: InodeKind::File,
                    size: 0,
                    blocks: 0
                }
            );
            assert_eq!(
                mfs.stat(ROOT_INODE).unwrap().size as usize,
                3 * DIRECTORY_ENTRY_SIZE
            );
            assert_eq!(mfs.image().num_allocated_blocks(), 1);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_create_directory() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::Directory, c"dir").unwrap();

            let inum = mfs.lookup(ROOT_INODE, c"dir").unwrap();
            assert_eq!(
                mfs.stat(inum).unwrap(),
                Stat {
                    kind: InodeKind::Directory,
                    size: 2 * DIRECTORY_ENTRY_SIZE as u32,
                    blocks: 1
                }
            );
            assert_eq!(mfs.image().num_allocated_blocks(), 2);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_create_twice_changes_nothing() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();
            let image = mfs.image().clone();
            let persists = mfs.storage().persist_count();

            mfs.create(ROOT_INODE, InodeKind::Directory, c"abc").unwrap();

            assert!(*mfs.image() == image);
            assert_eq!(mfs.storage().persist_count(), persists);
            assert_eq!(mfs.stat(1).unwrap().kind, InodeKind::File);
        }

        #[test]
        fn test_invalid_names() {
            let mut mfs = new_mfs();

            let longest = CString::new(vec![b'n'; MAX_NAME_LEN]).unwrap();
            let too_long = CString::new(vec![b'n'; MAX_NAME_LEN + 1]).unwrap();

            assert!(matches!(
                mfs.create(ROOT_INODE, InodeKind::File, c""),
                Err(FsError::InvalidName(_))
            ));
            assert!(matches!(
                mfs.create(ROOT_INODE, InodeKind::File, &too_long),
                Err(FsError::InvalidName(_))
            ));
            assert_eq!(mfs.storage().persist_count(), 1);

            mfs.create(ROOT_INODE, InodeKind::File, &longest).unwrap();
            assert_eq!(mfs.lookup(ROOT_INODE, &longest).unwrap(), 1);
        }

        #[test]
        fn test_invalid_kind_and_parent() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();

            assert!(matches!(
                mfs.create(ROOT_INODE, InodeKind::Empty, c"x"),
                Err(FsError::InvalidKind)
            ));
            assert!(matches!(
                mfs.create(1, InodeKind::File, c"x"),
                Err(FsError::NotADirectory(1))
            ));
            assert!(matches!(
                mfs.create(9, InodeKind::File, c"x"),
                Err(FsError::FreeInode(9))
            ));
        }

        #[test]
        fn test_directory_grows_past_one_block() {
            let mut mfs = new_mfs();

            // "." and ".." plus 14 entries fill the first block
            for i in 0..15 {
                mfs.create(ROOT_INODE, InodeKind::File, &name(i)).unwrap();
            }

            let root = mfs.stat(ROOT_INODE).unwrap();
            assert_eq!(root.blocks, 2);
            assert_eq!(root.size as usize, 17 * DIRECTORY_ENTRY_SIZE);
            assert_eq!(mfs.lookup(ROOT_INODE, &name(14)).unwrap(), 15);
            assert_eq!(mfs.read_directory(ROOT_INODE).unwrap().len(), 17);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_directory_full() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::Directory, c"d").unwrap();
            let dir = mfs.lookup(ROOT_INODE, c"d").unwrap();

            let capacity = NUM_BLOCK_REFS * 16 - 2;
            for i in 0..capacity {
                mfs.create(dir, InodeKind::File, &name(i)).unwrap();
            }

            let image = mfs.image().clone();
            assert!(matches!(
                mfs.create(dir, InodeKind::File, c"one-more"),
                Err(FsError::DirectoryFull(d)) if d == dir
            ));
            assert!(*mfs.image() == image);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_no_free_inodes() {
            let mut mfs = new_mfs();
            mfs.image.inode_bitmap = Bitmap::new([0xff; crate::alloc::BITMAP_SIZE]);

            assert!(matches!(
                mfs.create(ROOT_INODE, InodeKind::File, c"f"),
                Err(FsError::Exhausted(Pool::Inodes))
            ));
            assert_eq!(mfs.storage().persist_count(), 1);
        }

        #[test]
        fn test_no_free_blocks_rolls_back_inode() {
            let mut mfs = new_mfs();
            mfs.image.block_bitmap = Bitmap::new([0xff; crate::alloc::BITMAP_SIZE]);
            let image = mfs.image().clone();

            assert!(matches!(
                mfs.create(ROOT_INODE, InodeKind::Directory, c"d"),
                Err(FsError::Exhausted(Pool::Blocks))
            ));
            assert!(*mfs.image() == image);

            // files need no block until written
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();
            assert!(matches!(
                mfs.write_block(1, 0, &pattern(0)),
                Err(FsError::Exhausted(Pool::Blocks))
            ));
        }

        #[test]
        fn test_growing_directory_needs_two_blocks() {
            let mut mfs = new_mfs();
            for i in 0..14 {
                mfs.create(ROOT_INODE, InodeKind::File, &name(i)).unwrap();
            }

            // leave exactly one free block: enough to grow the root but not for the new directory
            let mut bitmap = Bitmap::new([0xff; crate::alloc::BITMAP_SIZE]);
            bitmap.set(NUM_BLOCKS - 1, false);
            mfs.image.block_bitmap = bitmap;
            let image = mfs.image().clone();

            assert!(matches!(
                mfs.create(ROOT_INODE, InodeKind::Directory, c"d"),
                Err(FsError::Exhausted(Pool::Blocks))
            ));
            assert!(*mfs.image() == image);
        }
    }

    mod stat {
        use super::*;

        #[test]
        fn test_root() {
            let mfs = new_mfs();

            assert_eq!(
                mfs.stat(ROOT_INODE).unwrap(),
                Stat {
                    kind: InodeKind::Directory,
                    size: 2 * DIRECTORY_ENTRY_SIZE as u32,
                    blocks: 1
                }
            );
        }

        #[test]
        fn test_invalid() {
            let mfs = new_mfs();

            assert!(matches!(mfs.stat(NUM_INODES), Err(FsError::InvalidInode(_))));
            assert!(matches!(mfs.stat(1), Err(FsError::FreeInode(1))));
        }
    }

    mod write {
        use super::*;

        #[test]
        fn test_write_then_read() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();

            let mut data = EMPTY_BLOCK;
            data[..3].copy_from_slice(&[1, 2, 3]);
            data[BLOCK_SIZE - 1] = 96;

            mfs.write_block(1, 0, &data).unwrap();

            assert_eq!(mfs.read_block(1, 0).unwrap(), data.to_vec());
            assert_eq!(
                mfs.stat(1).unwrap(),
                Stat {
                    kind: InodeKind::File,
                    size: BLOCK_SIZE as u32,
                    blocks: 1
                }
            );
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_rewrite_is_idempotent() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();
            mfs.write_block(1, 0, &pattern(1)).unwrap();
            let image = mfs.image().clone();

            mfs.write_block(1, 0, &pattern(1)).unwrap();

            assert!(*mfs.image() == image);
        }

        #[test]
        fn test_overwrite_in_place() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();
            mfs.write_block(1, 0, &pattern(1)).unwrap();
            mfs.write_block(1, 1, &pattern(2)).unwrap();

            mfs.write_block(1, 0, &pattern(9)).unwrap();

            assert_eq!(mfs.read_block(1, 0).unwrap(), pattern(9).to_vec());
            assert_eq!(mfs.read_block(1, 1).unwrap(), pattern(2).to_vec());
            assert_eq!(mfs.stat(1).unwrap().blocks, 2);
            assert_eq!(mfs.image().num_allocated_blocks(), 3);
        }

        #[test]
        fn test_offsets() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();

            assert!(matches!(
                mfs.write_block(1, 1, &pattern(0)),
                Err(FsError::InvalidOffset(1))
            ));

            for offset in 0..NUM_BLOCK_REFS {
                mfs.write_block(1, offset, &pattern(offset as u8)).unwrap();
            }

            assert!(matches!(
                mfs.write_block(1, NUM_BLOCK_REFS, &pattern(0)),
                Err(FsError::InvalidOffset(_))
            ));
            assert_eq!(
                mfs.stat(1).unwrap().size as usize,
                crate::disk_format::inode::MAX_FILE_SIZE
            );
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_not_a_file() {
            let mut mfs = new_mfs();

            assert!(matches!(
                mfs.write_block(ROOT_INODE, 0, &pattern(0)),
                Err(FsError::NotAFile(ROOT_INODE))
            ));
            assert!(matches!(
                mfs.write_block(3, 0, &pattern(0)),
                Err(FsError::FreeInode(3))
            ));
            assert_eq!(mfs.storage().persist_count(), 1);
        }
    }

    mod read {
        use super::*;

        #[test]
        fn test_directory_block_holds_live_entries() {
            let mfs = new_mfs();

            let bytes = mfs.read_block(ROOT_INODE, 0).unwrap();
            assert_eq!(bytes.len(), 2 * DIRECTORY_ENTRY_SIZE);

            let entries = mfs.read_directory(ROOT_INODE).unwrap();
            assert!(entries[0].name.matches(DOT));
            assert!(entries[1].name.matches(DOT_DOT));
        }

        #[test]
        fn test_offsets() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();

            assert!(matches!(mfs.read_block(1, 0), Err(FsError::InvalidOffset(0))));
            assert!(matches!(
                mfs.read_block(ROOT_INODE, 1),
                Err(FsError::InvalidOffset(1))
            ));
            assert!(matches!(mfs.read_block(2, 0), Err(FsError::FreeInode(2))));
        }
    }

    mod unlink {
        use super::*;

        #[test]
        fn test_unlink_file() {
            let mut mfs = new_mfs();
            let formatted = mfs.image().clone();

            mfs.create(ROOT_INODE, InodeKind::File, c"abc").unwrap();
            mfs.write_block(1, 0, &pattern(5)).unwrap();
            mfs.unlink(ROOT_INODE, c"abc").unwrap();

            assert!(*mfs.image() == formatted);
            assert!(matches!(
                mfs.lookup(ROOT_INODE, c"abc"),
                Err(FsError::NotFound(_))
            ));
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_missing_name_changes_nothing() {
            let mut mfs = new_mfs();
            let image = mfs.image().clone();

            mfs.unlink(ROOT_INODE, c"ghost").unwrap();

            assert!(*mfs.image() == image);
            assert_eq!(mfs.storage().persist_count(), 1);
        }

        #[test]
        fn test_dot_entries() {
            let mut mfs = new_mfs();

            assert!(matches!(
                mfs.unlink(ROOT_INODE, DOT),
                Err(FsError::InvalidName(_))
            ));
            assert!(matches!(
                mfs.unlink(ROOT_INODE, DOT_DOT),
                Err(FsError::InvalidName(_))
            ));
        }

        #[test]
        fn test_directory_not_empty() {
            let mut mfs = new_mfs();
            let formatted = mfs.image().clone();

            mfs.create(ROOT_INODE, InodeKind::Directory, c"d").unwrap();
            mfs.create(1, InodeKind::File, c"f").unwrap();
            let image = mfs.image().clone();
            let persists = mfs.storage().persist_count();

            assert!(matches!(
                mfs.unlink(ROOT_INODE, c"d"),
                Err(FsError::DirectoryNotEmpty(1))
            ));
            assert!(*mfs.image() == image);
            assert_eq!(mfs.storage().persist_count(), persists);

            mfs.unlink(1, c"f").unwrap();
            mfs.unlink(ROOT_INODE, c"d").unwrap();

            assert!(*mfs.image() == formatted);
        }

        #[test]
        fn test_frees_emptied_block() {
            let mut mfs = new_mfs();
            for i in 0..15 {
                mfs.create(ROOT_INODE, InodeKind::File, &name(i)).unwrap();
            }
            assert_eq!(mfs.stat(ROOT_INODE).unwrap().blocks, 2);

            mfs.unlink(ROOT_INODE, &name(14)).unwrap();

            let root = mfs.stat(ROOT_INODE).unwrap();
            assert_eq!(root.blocks, 1);
            assert_eq!(root.size as usize, 16 * DIRECTORY_ENTRY_SIZE);
            assert_eq!(mfs.image().num_allocated_blocks(), 1);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_emptied_middle_block_is_replaced_by_last() {
            let mut mfs = new_mfs();

            // 14 names in the first block, 16 in the second and 1 in the third
            for i in 0..31 {
                mfs.create(ROOT_INODE, InodeKind::File, &name(i)).unwrap();
            }
            assert_eq!(mfs.stat(ROOT_INODE).unwrap().blocks, 3);

            for i in 14..30 {
                mfs.unlink(ROOT_INODE, &name(i)).unwrap();
            }

            assert_eq!(mfs.stat(ROOT_INODE).unwrap().blocks, 2);
            assert_eq!(mfs.lookup(ROOT_INODE, &name(30)).unwrap(), 31);
            assert_eq!(mfs.lookup(ROOT_INODE, &name(0)).unwrap(), 1);
            assert_eq!(mfs.image().num_allocated_blocks(), 2);
            mfs.check_filesystem().unwrap();
        }

        #[test]
        fn test_slots_are_reused() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"a").unwrap();
            mfs.create(ROOT_INODE, InodeKind::File, c"b").unwrap();
            mfs.unlink(ROOT_INODE, c"a").unwrap();

            mfs.create(ROOT_INODE, InodeKind::File, c"c").unwrap();

            assert_eq!(mfs.lookup(ROOT_INODE, c"c").unwrap(), 1);
            assert_eq!(mfs.lookup(ROOT_INODE, c"b").unwrap(), 2);
            mfs.check_filesystem().unwrap();
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn test_unmarked_block() {
            let mut mfs = new_mfs();
            mfs.image.block_bitmap.set(5, true);

            assert!(mfs.check_filesystem().is_err());
        }

        #[test]
        fn test_unmarked_inode() {
            let mut mfs = new_mfs();
            mfs.image.inodes[3] = Inode::new_file();

            assert!(mfs.check_filesystem().is_err());
        }

        #[test]
        fn test_file_size_mismatch() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();
            mfs.image.inodes[1].size = 10;

            assert!(mfs.check_filesystem().is_err());
        }

        #[test]
        fn test_doubly_referenced_block() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();
            let root_block = mfs.image.inodes[ROOT_INODE].block(0).unwrap();
            assert!(mfs.image.inodes[1].push_block(root_block));
            mfs.image.inodes[1].size = BLOCK_SIZE as u32;

            assert!(mfs.check_filesystem().is_err());
        }

        #[test]
        fn test_directory_size_mismatch() {
            let mut mfs = new_mfs();
            mfs.image.inodes[ROOT_INODE].size += 1;

            assert!(mfs.check_filesystem().is_err());
        }

        #[test]
        fn test_block_outside_pool_is_refused() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"bad").unwrap();
            assert!(mfs.image.inodes[1].push_block(NUM_BLOCKS + 904));
            mfs.image.inodes[1].size = BLOCK_SIZE as u32;
            let image = mfs.image().clone();
            let persists = mfs.storage().persist_count();

            assert!(matches!(mfs.read_block(1, 0), Err(FsError::Corrupt(_))));
            assert!(matches!(
                mfs.write_block(1, 0, &pattern(1)),
                Err(FsError::Corrupt(_))
            ));
            assert!(matches!(
                mfs.unlink(ROOT_INODE, c"bad"),
                Err(FsError::Corrupt(_))
            ));

            assert!(*mfs.image() == image);
            assert_eq!(mfs.storage().persist_count(), persists);
            assert!(mfs.check_filesystem().is_err());
        }

        #[test]
        fn test_too_many_blocks_is_refused() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();
            mfs.image.inodes[1].block_count = NUM_BLOCK_REFS as u32 + 1;

            assert!(matches!(mfs.stat(1), Err(FsError::Corrupt(_))));
            assert!(matches!(
                mfs.write_block(1, 0, &pattern(1)),
                Err(FsError::Corrupt(_))
            ));
        }

        #[test]
        fn test_undersized_directory_is_refused() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();
            mfs.image.inodes[ROOT_INODE].size = 0;
            let image = mfs.image().clone();

            assert!(matches!(
                mfs.unlink(ROOT_INODE, c"f"),
                Err(FsError::Corrupt(_))
            ));
            assert!(*mfs.image() == image);
        }

        #[test]
        fn test_duplicate_entries() {
            let mut mfs = new_mfs();
            mfs.create(ROOT_INODE, InodeKind::File, c"f").unwrap();

            let block = mfs.image.inodes[ROOT_INODE].block(0).unwrap();
            let mut directory = DirectoryBlock::decode(&mfs.image.blocks[block]).unwrap();
            assert!(directory.push(DirectoryEntry::new(1, c"f").unwrap()));
            mfs.image.blocks[block] = directory.encode().unwrap();
            mfs.image.inodes[ROOT_INODE].size += DIRECTORY_ENTRY_SIZE as u32;

            assert!(mfs.check_filesystem().is_err());
        }
    }
}
