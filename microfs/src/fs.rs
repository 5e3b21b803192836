use log::{debug, info};
use thiserror::Error;

use crate::alloc::Bitmap;
use crate::io::BlockStorage;
use crate::layout::{
    block_kind, DataBlock, DirEntry, Directory, Inode, KIND_DIRECTORY, KIND_FILE, NO_BLOCK,
};
use crate::path;
use crate::{Block, BLOCK_SIZE, DATA_CAPACITY, INODE_SLOTS, MAX_FILE_SIZE, NAME_LEN, NUM_BLOCKS};

/// Known locations.
const SUPERBLOCK_INDEX: usize = 0;
const BITMAP_INDEX: usize = 1;

#[derive(Error, Debug)]
pub enum MfsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("parent directory of {0} does not exist")]
    ParentNotFound(String),
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("directory is full: {0}")]
    DirectoryFull(String),
    #[error("directory is not empty: {0}")]
    NotEmpty(String),
    #[error("no free blocks available")]
    OutOfSpace,
    #[error("content of {0} bytes exceeds the {MAX_FILE_SIZE} byte file limit")]
    TooLarge(usize),
    #[error("image does not contain an initialized filesystem")]
    NotInitialized,
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
    #[error("image access failed")]
    Io(#[from] std::io::Error),
}

/// What a directory entry points at, judged by the target block's leading
/// discriminant field alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Unknown,
}

/// The filesystem engine: a fixed 2048-block image with the root directory
/// in block 0 and the free bitmap in block 1.
///
/// Every operation runs synchronously against the store handle and returns a
/// terminal result; there is no internal locking, so callers serialize
/// mutating access externally. The bitmap is kept in memory and written
/// through to block 1 by every mutating operation.
pub struct MFS<T: BlockStorage> {
    dev: T,
    bitmap: Bitmap,
}

impl<T: BlockStorage> MFS<T> {
    /// Writes an empty filesystem onto owned block storage: a root directory
    /// holding only `.` and `..`, and a bitmap with every block free except
    /// the two reserved ones.
    pub fn format(mut dev: T) -> Result<Self, MfsError> {
        let root = Directory::new("/", SUPERBLOCK_INDEX as i32, SUPERBLOCK_INDEX as i32);
        let mut block = [0u8; BLOCK_SIZE];
        root.write(&mut block);
        dev.write_block(SUPERBLOCK_INDEX, &block)?;

        let mut bitmap = Bitmap::all_free();
        bitmap.mark_used(SUPERBLOCK_INDEX);
        bitmap.mark_used(BITMAP_INDEX);
        dev.write_block(BITMAP_INDEX, bitmap.serialize())?;
        dev.sync_disk()?;

        info!("formatted image: {} blocks of {} bytes", NUM_BLOCKS, BLOCK_SIZE);
        Ok(MFS { dev, bitmap })
    }

    /// Opens an already-formatted image, verifying that block 0 looks like a
    /// valid root directory.
    pub fn open(mut dev: T) -> Result<Self, MfsError> {
        let mut block = [0u8; BLOCK_SIZE];
        dev.read_block(SUPERBLOCK_INDEX, &mut block)?;
        let root = Directory::read(&block);
        if root.kind != KIND_DIRECTORY || !root.name_matches("/") {
            return Err(MfsError::NotInitialized);
        }

        dev.read_block(BITMAP_INDEX, &mut block)?;
        let bitmap = Bitmap::parse(&block);
        Ok(MFS { dev, bitmap })
    }

    /// Creates an empty regular file. The parent directory must already
    /// exist; unlike [`MFS::create_dir`], missing ancestors are not created.
    pub fn create_file(&mut self, fs_path: &str) -> Result<(), MfsError> {
        let (parent_path, name) = path::split_parent(fs_path);
        Self::validate_name(name)?;
        let (parent_id, mut parent) = match self.resolve_dir(parent_path) {
            Err(MfsError::NotFound(_)) => {
                return Err(MfsError::ParentNotFound(fs_path.to_string()))
            }
            other => other?,
        };
        self.check_can_append(&parent, parent_path, name, fs_path)?;

        let inode_id = self.alloc_block()?;
        let inode = Inode::new(name);
        self.write_inode(inode_id, &inode)?;

        parent.push_entry(DirEntry::new(inode_id as i32, name));
        self.write_dir(parent_id, &parent)?;
        self.write_bitmap()?;
        debug!("created file {} in block {}", fs_path, inode_id);
        Ok(())
    }

    /// Creates a directory, recursively creating any missing ancestors.
    pub fn create_dir(&mut self, fs_path: &str) -> Result<(), MfsError> {
        let (parent_path, name) = path::split_parent(fs_path);
        if name.is_empty() {
            // The final segment is the root itself.
            return Err(MfsError::AlreadyExists("/".to_string()));
        }
        Self::validate_name(name)?;
        let (parent_id, mut parent) = match self.resolve_dir(parent_path) {
            Err(MfsError::NotFound(_)) => {
                self.create_dir(parent_path)?;
                self.resolve_dir(parent_path)?
            }
            other => other?,
        };
        self.check_can_append(&parent, parent_path, name, fs_path)?;

        let block_id = self.alloc_block()?;
        let dir = Directory::new(name, block_id as i32, parent_id as i32);
        self.write_dir(block_id, &dir)?;

        parent.push_entry(DirEntry::new(block_id as i32, name));
        self.write_dir(parent_id, &parent)?;
        self.write_bitmap()?;
        debug!("created directory {} in block {}", fs_path, block_id);
        Ok(())
    }

    /// Removes an empty directory, freeing and zeroing its block.
    pub fn remove_dir(&mut self, fs_path: &str) -> Result<(), MfsError> {
        Self::reject_dot_names(fs_path)?;
        let (parent_id, mut parent, index, target) = self.resolve_entry(fs_path)?;
        let block = self.read_block(target)?;
        let dir = Directory::read(&block);
        if dir.kind != KIND_DIRECTORY {
            return Err(MfsError::NotADirectory(fs_path.to_string()));
        }
        if dir.size > 2 {
            return Err(MfsError::NotEmpty(fs_path.to_string()));
        }

        parent.remove_entry(index);
        self.write_dir(parent_id, &parent)?;
        self.bitmap.mark_free(target);
        self.zero_block(target)?;
        self.write_bitmap()?;
        debug!("removed directory {} freeing block {}", fs_path, target);
        Ok(())
    }

    /// Removes a regular file, freeing its data blocks and inode and zeroing
    /// the inode block.
    pub fn remove_file(&mut self, fs_path: &str) -> Result<(), MfsError> {
        Self::reject_dot_names(fs_path)?;
        let (parent_id, mut parent, index, target) = self.resolve_entry(fs_path)?;
        let block = self.read_block(target)?;
        if block_kind(&block) != KIND_FILE {
            return Err(MfsError::NotAFile(fs_path.to_string()));
        }
        let inode = Inode::read(&block);

        for data_block in inode.data_blocks() {
            self.bitmap.mark_free(data_block as usize);
        }
        self.bitmap.mark_free(target);
        parent.remove_entry(index);
        self.write_dir(parent_id, &parent)?;
        self.zero_block(target)?;
        self.write_bitmap()?;
        debug!("removed file {} freeing block {}", fs_path, target);
        Ok(())
    }

    /// The directory's live entries in stored order, each classified by its
    /// target block's discriminant.
    pub fn list_dir(&mut self, fs_path: &str) -> Result<Vec<(String, EntryKind)>, MfsError> {
        let (_, dir) = self.resolve_dir(fs_path)?;
        let mut listing = Vec::with_capacity(dir.entries().len());
        for entry in dir.entries() {
            let block = self.read_block(entry.block_id as usize)?;
            let kind = match block_kind(&block) {
                KIND_DIRECTORY => EntryKind::Directory,
                KIND_FILE => EntryKind::File,
                _ => EntryKind::Unknown,
            };
            listing.push((entry.name(), kind));
        }
        Ok(listing)
    }

    /// The file's content: each referenced data block's meaningful bytes in
    /// order, until the inode's declared size is satisfied or the reference
    /// chain ends. A truncated chain yields a short read, not an error.
    pub fn read_file(&mut self, fs_path: &str) -> Result<Vec<u8>, MfsError> {
        let (_, inode) = self.resolve_inode(fs_path)?;

        let mut remaining = inode.size.max(0) as usize;
        let mut content = Vec::with_capacity(remaining);
        for block_id in inode.data_blocks() {
            if remaining == 0 {
                break;
            }
            let block = self.read_block(block_id as usize)?;
            let data = DataBlock::read(&block);
            let take = remaining.min(data.bytes().len());
            content.extend_from_slice(&data.bytes()[..take]);
            remaining -= take;
        }
        Ok(content)
    }

    /// Replaces the file's content: every previously referenced data block
    /// is freed, zeroed, and unreferenced, then the new content is chunked
    /// into fresh first-fit blocks.
    ///
    /// Running out of space mid-write is terminal: chunks stored before the
    /// failure stay allocated and referenced, and the inode keeps its
    /// pre-write size. There is no rollback.
    pub fn write_file(&mut self, fs_path: &str, content: &[u8]) -> Result<(), MfsError> {
        if content.len() > MAX_FILE_SIZE {
            return Err(MfsError::TooLarge(content.len()));
        }
        let (inode_id, mut inode) = self.resolve_inode(fs_path)?;

        // Truncate: release everything the file referenced before.
        for slot in 0..INODE_SLOTS {
            let block_id = inode.blocks[slot];
            if block_id == NO_BLOCK {
                break;
            }
            self.bitmap.mark_free(block_id as usize);
            self.zero_block(block_id as usize)?;
            inode.blocks[slot] = NO_BLOCK;
        }

        let mut filled = 0;
        for chunk in content.chunks(DATA_CAPACITY) {
            let block_id = match self.bitmap.find_free_block() {
                Some(id) => id,
                None => {
                    // Persist the partial state before failing.
                    self.write_inode(inode_id, &inode)?;
                    self.write_bitmap()?;
                    return Err(MfsError::OutOfSpace);
                }
            };
            self.bitmap.mark_used(block_id);

            let data = DataBlock::new(chunk);
            let mut block = [0u8; BLOCK_SIZE];
            data.write(&mut block);
            self.dev.write_block(block_id, &block)?;

            inode.blocks[filled] = block_id as i32;
            filled += 1;
        }

        inode.size = content.len() as i32;
        self.write_inode(inode_id, &inode)?;
        self.write_bitmap()?;
        debug!("wrote {} bytes to {} across {} blocks", content.len(), fs_path, filled);
        Ok(())
    }

    /// The root directory's contents, for diagnostic dumps.
    pub fn root(&mut self) -> Result<Directory, MfsError> {
        let block = self.read_block(SUPERBLOCK_INDEX)?;
        Ok(Directory::read(&block))
    }

    /// Raw bytes of the free bitmap covering all tracked blocks, for
    /// diagnostic dumps.
    pub fn bitmap_bits(&self) -> &[u8] {
        self.bitmap.tracked_bytes()
    }

    /// Flushes every buffered block write to the backing store.
    pub fn sync(&mut self) -> Result<(), MfsError> {
        self.dev.sync_disk()?;
        Ok(())
    }

    /// Walks `fs_path` segment by segment from the root, returning the final
    /// directory's block id and contents.
    fn resolve_dir(&mut self, fs_path: &str) -> Result<(usize, Directory), MfsError> {
        let mut block_id = SUPERBLOCK_INDEX;
        let mut dir = self.read_dir(block_id, fs_path)?;
        for segment in path::segments(fs_path) {
            let next = dir
                .find_entry(segment)
                .map(|(_, entry)| entry.block_id)
                .ok_or_else(|| MfsError::NotFound(fs_path.to_string()))?;
            block_id = next as usize;
            dir = self.read_dir(block_id, fs_path)?;
        }
        Ok((block_id, dir))
    }

    /// Resolves `fs_path` to its parent directory, the entry index inside
    /// it, and the target's block id.
    fn resolve_entry(&mut self, fs_path: &str) -> Result<(usize, Directory, usize, usize), MfsError> {
        let (parent_path, name) = path::split_parent(fs_path);
        let (parent_id, parent) = self.resolve_dir(parent_path)?;
        let (index, entry) = parent
            .find_entry(name)
            .ok_or_else(|| MfsError::NotFound(fs_path.to_string()))?;
        let target = entry.block_id as usize;
        Ok((parent_id, parent, index, target))
    }

    /// Resolves `fs_path` to a regular file's inode.
    fn resolve_inode(&mut self, fs_path: &str) -> Result<(usize, Inode), MfsError> {
        let (_, _, _, target) = self.resolve_entry(fs_path)?;
        let block = self.read_block(target)?;
        if block_kind(&block) != KIND_FILE {
            return Err(MfsError::NotAFile(fs_path.to_string()));
        }
        Ok((target, Inode::read(&block)))
    }

    /// Shared preconditions for appending an entry named `name` to `parent`.
    fn check_can_append(
        &self,
        parent: &Directory,
        parent_path: &str,
        name: &str,
        fs_path: &str,
    ) -> Result<(), MfsError> {
        if parent.find_entry(name).is_some() {
            return Err(MfsError::AlreadyExists(fs_path.to_string()));
        }
        if parent.is_full() {
            return Err(MfsError::DirectoryFull(path::display(parent_path).to_string()));
        }
        Ok(())
    }

    fn validate_name(name: &str) -> Result<(), MfsError> {
        if name.is_empty() || name.len() >= NAME_LEN {
            return Err(MfsError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Removal through a `.`/`..` entry would detach a directory from
    /// itself; reject it up front.
    fn reject_dot_names(fs_path: &str) -> Result<(), MfsError> {
        let (_, name) = path::split_parent(fs_path);
        if name == "." || name == ".." {
            return Err(MfsError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn read_block(&mut self, index: usize) -> Result<Block, MfsError> {
        let mut block = [0u8; BLOCK_SIZE];
        self.dev.read_block(index, &mut block)?;
        Ok(block)
    }

    /// Reads `index` as a directory, failing when the block holds anything
    /// else. Used while descending, so a path through a file reports the
    /// mismatch instead of scanning reinterpreted bytes.
    fn read_dir(&mut self, index: usize, fs_path: &str) -> Result<Directory, MfsError> {
        let block = self.read_block(index)?;
        if block_kind(&block) != KIND_DIRECTORY {
            return Err(MfsError::NotADirectory(fs_path.to_string()));
        }
        Ok(Directory::read(&block))
    }

    fn write_dir(&mut self, index: usize, dir: &Directory) -> Result<(), MfsError> {
        let mut block = [0u8; BLOCK_SIZE];
        dir.write(&mut block);
        self.dev.write_block(index, &block)?;
        Ok(())
    }

    fn write_inode(&mut self, index: usize, inode: &Inode) -> Result<(), MfsError> {
        let mut block = [0u8; BLOCK_SIZE];
        inode.write(&mut block);
        self.dev.write_block(index, &block)?;
        Ok(())
    }

    fn zero_block(&mut self, index: usize) -> Result<(), MfsError> {
        self.dev.write_block(index, &[0u8; BLOCK_SIZE])?;
        Ok(())
    }

    fn write_bitmap(&mut self) -> Result<(), MfsError> {
        self.dev.write_block(BITMAP_INDEX, self.bitmap.serialize())?;
        Ok(())
    }

    fn alloc_block(&mut self) -> Result<usize, MfsError> {
        let block_id = self.bitmap.find_free_block().ok_or(MfsError::OutOfSpace)?;
        self.bitmap.mark_used(block_id);
        Ok(block_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockDevice, FileBlockDeviceBuilder};

    fn create_test_device() -> FileBlockDevice {
        let image = tempfile::tempfile().unwrap();
        FileBlockDeviceBuilder::from(image)
            .with_block_count(NUM_BLOCKS)
            .build()
            .expect("could not allocate backing image")
    }

    #[test]
    fn format_produces_a_root_with_dot_entries() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        let root = fs.root().unwrap();
        assert_eq!(root.kind, KIND_DIRECTORY);
        assert!(root.name_matches("/"));
        assert_eq!(root.size, 2);
        assert_eq!(root.entries()[0].block_id, 0);
        assert_eq!(root.entries()[1].block_id, 0);
    }

    #[test]
    fn opening_an_unformatted_image_fails() {
        let result = MFS::open(create_test_device());
        assert!(matches!(result, Err(MfsError::NotInitialized)));
    }

    #[test]
    fn create_file_requires_an_existing_parent() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        let result = fs.create_file("/missing/f");
        assert!(matches!(result, Err(MfsError::ParentNotFound(_))));
    }

    #[test]
    fn create_dir_builds_missing_ancestors() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        fs.create_dir("/a/b/c").unwrap();

        let listing = fs.list_dir("/a/b/c").unwrap();
        assert_eq!(listing.len(), 2);
        let root_listing = fs.list_dir("/").unwrap();
        assert_eq!(root_listing.len(), 3);
        assert_eq!(root_listing[2], ("a".to_string(), EntryKind::Directory));
    }

    #[test]
    fn duplicate_names_are_rejected_across_kinds() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        fs.create_dir("/x").unwrap();
        assert!(matches!(fs.create_dir("/x"), Err(MfsError::AlreadyExists(_))));
        assert!(matches!(fs.create_file("/x"), Err(MfsError::AlreadyExists(_))));
    }

    #[test]
    fn overlong_names_are_rejected() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        let name = "x".repeat(NAME_LEN);
        assert!(matches!(
            fs.create_file(&format!("/{}", name)),
            Err(MfsError::InvalidName(_))
        ));
        // 27 bytes still fits the field with its terminator.
        fs.create_file(&format!("/{}", "y".repeat(NAME_LEN - 1))).unwrap();
    }

    #[test]
    fn removing_dot_entries_is_rejected() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        fs.create_dir("/a").unwrap();
        assert!(matches!(fs.remove_dir("/a/."), Err(MfsError::InvalidName(_))));
        assert!(matches!(fs.remove_dir("/a/.."), Err(MfsError::InvalidName(_))));
    }

    #[test]
    fn type_mismatches_are_reported() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        fs.create_dir("/d").unwrap();
        fs.create_file("/f").unwrap();

        assert!(matches!(fs.remove_dir("/f"), Err(MfsError::NotADirectory(_))));
        assert!(matches!(fs.remove_file("/d"), Err(MfsError::NotAFile(_))));
        assert!(matches!(fs.read_file("/d"), Err(MfsError::NotAFile(_))));
        assert!(matches!(fs.write_file("/d", b"x"), Err(MfsError::NotAFile(_))));
        assert!(matches!(fs.list_dir("/f"), Err(MfsError::NotADirectory(_))));
    }

    #[test]
    fn allocation_is_first_fit_in_ascending_order() {
        let mut fs = MFS::format(create_test_device()).unwrap();

        fs.create_dir("/a").unwrap();
        fs.create_file("/a/f").unwrap();
        fs.write_file("/a/f", &[7u8; DATA_CAPACITY + 1]).unwrap();

        // Directory, inode, then two data chunks land on blocks 2..=5.
        let root = fs.root().unwrap();
        assert_eq!(root.find_entry("a").map(|(_, e)| e.block_id), Some(2));

        let (_, inode) = fs.resolve_inode("/a/f").unwrap();
        assert_eq!(inode.data_blocks().collect::<Vec<i32>>(), vec![4, 5]);

        // Rewriting frees and reuses the same blocks, lowest index first.
        fs.write_file("/a/f", b"tiny").unwrap();
        let (_, inode) = fs.resolve_inode("/a/f").unwrap();
        assert_eq!(inode.data_blocks().collect::<Vec<i32>>(), vec![4]);
    }
}
