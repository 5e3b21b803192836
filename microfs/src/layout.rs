//! On-disk layouts. Every struct here is a fixed-width `repr(C)` image of
//! (at most) one 512-byte block; field widths and order are part of the disk
//! format and must not change.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::{Block, DATA_CAPACITY, DIR_CAPACITY, INODE_SLOTS, NAME_LEN};

/// Discriminant in the leading field of directory and inode blocks.
pub const KIND_FILE: i32 = 0;
pub const KIND_DIRECTORY: i32 = 1;

/// Sentinel for an unused inode data slot. Slots are hole-free: everything
/// after the first sentinel is also unused.
pub const NO_BLOCK: i32 = -1;

fn write_name(field: &mut [u8; NAME_LEN], name: &str) {
    debug_assert!(name.len() < NAME_LEN);
    field[..name.len()].copy_from_slice(name.as_bytes());
}

/// The meaningful bytes of a name field, i.e. everything before the NUL.
fn name_bytes(field: &[u8; NAME_LEN]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    &field[..end]
}

fn display_name(field: &[u8; NAME_LEN]) -> String {
    String::from_utf8_lossy(name_bytes(field)).into_owned()
}

/// One slot of a directory block: a child's block id and its name.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct DirEntry {
    pub block_id: i32,
    name: [u8; NAME_LEN],
}

impl DirEntry {
    pub fn new(block_id: i32, name: &str) -> Self {
        let mut entry = Self {
            block_id,
            name: [0; NAME_LEN],
        };
        write_name(&mut entry.name, name);
        entry
    }

    /// Exact, case-sensitive match against the stored bytes.
    pub fn name_matches(&self, name: &str) -> bool {
        name_bytes(&self.name) == name.as_bytes()
    }

    pub fn name(&self) -> String {
        display_name(&self.name)
    }
}

/// A directory block. The first two entries are always `.` and `..`; `size`
/// is the authoritative count of live entries and never drops below 2.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct Directory {
    pub kind: i32,
    name: [u8; NAME_LEN],
    pub size: i32,
    entries: [DirEntry; DIR_CAPACITY],
}

impl Directory {
    pub fn new(name: &str, own_id: i32, parent_id: i32) -> Self {
        let mut dir = Self {
            kind: KIND_DIRECTORY,
            name: [0; NAME_LEN],
            size: 2,
            entries: [DirEntry {
                block_id: NO_BLOCK,
                name: [0; NAME_LEN],
            }; DIR_CAPACITY],
        };
        write_name(&mut dir.name, name);
        dir.entries[0] = DirEntry::new(own_id, ".");
        dir.entries[1] = DirEntry::new(parent_id, "..");
        dir
    }

    pub fn read(block: &Block) -> Self {
        Self::read_from_prefix(block.as_slice()).expect("block holds a directory layout")
    }

    pub fn write(&self, block: &mut Block) {
        block[..core::mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }

    pub fn name(&self) -> String {
        display_name(&self.name)
    }

    pub fn name_matches(&self, name: &str) -> bool {
        name_bytes(&self.name) == name.as_bytes()
    }

    /// The live entries, `.` and `..` included.
    pub fn entries(&self) -> &[DirEntry] {
        let count = (self.size.max(0) as usize).min(DIR_CAPACITY);
        &self.entries[..count]
    }

    /// Linear scan over the live entries for an exact name match.
    pub fn find_entry(&self, name: &str) -> Option<(usize, &DirEntry)> {
        self.entries()
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.name_matches(name))
    }

    pub fn is_full(&self) -> bool {
        self.size as usize >= DIR_CAPACITY
    }

    pub fn push_entry(&mut self, entry: DirEntry) {
        debug_assert!(!self.is_full());
        self.entries[self.size as usize] = entry;
        self.size += 1;
    }

    /// Drops the entry at `index`, shifting every later entry left by one so
    /// sibling order is preserved.
    pub fn remove_entry(&mut self, index: usize) {
        let count = self.size as usize;
        debug_assert!(index < count);
        for i in index..count - 1 {
            self.entries[i] = self.entries[i + 1];
        }
        self.size -= 1;
    }
}

/// A regular file's header block: total length in bytes plus an ordered list
/// of direct data-block references.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct Inode {
    pub kind: i32,
    name: [u8; NAME_LEN],
    pub size: i32,
    pub blocks: [i32; INODE_SLOTS],
}

impl Inode {
    pub fn new(name: &str) -> Self {
        let mut inode = Self {
            kind: KIND_FILE,
            name: [0; NAME_LEN],
            size: 0,
            blocks: [NO_BLOCK; INODE_SLOTS],
        };
        write_name(&mut inode.name, name);
        inode
    }

    pub fn read(block: &Block) -> Self {
        Self::read_from_prefix(block.as_slice()).expect("block holds an inode layout")
    }

    pub fn write(&self, block: &mut Block) {
        block[..core::mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }

    pub fn name(&self) -> String {
        display_name(&self.name)
    }

    /// The referenced data blocks in order, stopping at the first sentinel.
    pub fn data_blocks(&self) -> impl Iterator<Item = i32> + '_ {
        self.blocks.iter().copied().take_while(|&id| id != NO_BLOCK)
    }
}

/// One chunk of file content: a length field and up to 508 payload bytes.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
pub struct DataBlock {
    pub size: i32,
    payload: [u8; DATA_CAPACITY],
}

impl DataBlock {
    pub fn new(chunk: &[u8]) -> Self {
        debug_assert!(chunk.len() <= DATA_CAPACITY);
        let mut data = Self {
            size: chunk.len() as i32,
            payload: [0; DATA_CAPACITY],
        };
        data.payload[..chunk.len()].copy_from_slice(chunk);
        data
    }

    pub fn read(block: &Block) -> Self {
        Self::read_from_prefix(block.as_slice()).expect("block holds a data-block layout")
    }

    pub fn write(&self, block: &mut Block) {
        block[..core::mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }

    /// The meaningful payload bytes, bounded by the length field.
    pub fn bytes(&self) -> &[u8] {
        let count = (self.size.max(0) as usize).min(DATA_CAPACITY);
        &self.payload[..count]
    }
}

/// Reads the leading discriminant of a block without committing to a full
/// layout, for classifying what a directory entry points at.
pub fn block_kind(block: &Block) -> i32 {
    i32::from_ne_bytes([block[0], block[1], block[2], block[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;

    #[test]
    fn layouts_have_on_disk_sizes() {
        assert_eq!(core::mem::size_of::<DirEntry>(), 32);
        assert_eq!(core::mem::size_of::<Directory>(), 484);
        assert_eq!(core::mem::size_of::<Inode>(), BLOCK_SIZE);
        assert_eq!(core::mem::size_of::<DataBlock>(), BLOCK_SIZE);
    }

    #[test]
    fn new_directory_points_dot_entries_at_self_and_parent() {
        let dir = Directory::new("logs", 7, 2);

        assert_eq!(dir.kind, KIND_DIRECTORY);
        assert_eq!(dir.size, 2);
        let entries = dir.entries();
        assert!(entries[0].name_matches("."));
        assert_eq!(entries[0].block_id, 7);
        assert!(entries[1].name_matches(".."));
        assert_eq!(entries[1].block_id, 2);
    }

    #[test]
    fn entry_matching_is_exact_and_case_sensitive() {
        let entry = DirEntry::new(3, "Notes");

        assert!(entry.name_matches("Notes"));
        assert!(!entry.name_matches("notes"));
        assert!(!entry.name_matches("Note"));
        assert!(!entry.name_matches("Notes.txt"));
    }

    #[test]
    fn removing_an_entry_shifts_later_siblings_left() {
        let mut dir = Directory::new("d", 5, 0);
        dir.push_entry(DirEntry::new(10, "a"));
        dir.push_entry(DirEntry::new(11, "b"));
        dir.push_entry(DirEntry::new(12, "c"));

        dir.remove_entry(3);

        assert_eq!(dir.size, 4);
        assert_eq!(dir.find_entry("a").map(|(i, _)| i), Some(2));
        assert_eq!(dir.find_entry("c").map(|(i, _)| i), Some(3));
        assert!(dir.find_entry("b").is_none());
    }

    #[test]
    fn directory_round_trips_through_a_block() {
        let mut dir = Directory::new("home", 4, 0);
        dir.push_entry(DirEntry::new(9, "readme"));

        let mut block = [0u8; BLOCK_SIZE];
        dir.write(&mut block);
        let read_back = Directory::read(&block);

        assert_eq!(read_back.size, 3);
        assert!(read_back.name_matches("home"));
        assert_eq!(read_back.find_entry("readme").map(|(_, e)| e.block_id), Some(9));
        assert_eq!(block_kind(&block), KIND_DIRECTORY);
    }

    #[test]
    fn fresh_inode_has_no_data_blocks() {
        let inode = Inode::new("empty");

        assert_eq!(inode.kind, KIND_FILE);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.data_blocks().count(), 0);
    }

    #[test]
    fn data_block_iteration_stops_at_the_sentinel() {
        let mut inode = Inode::new("f");
        inode.blocks[0] = 12;
        inode.blocks[1] = 40;
        // Everything past the first sentinel is ignored even if non-empty.
        inode.blocks[3] = 99;

        let blocks: Vec<i32> = inode.data_blocks().collect();
        assert_eq!(blocks, vec![12, 40]);
    }

    #[test]
    fn data_block_bounds_payload_by_length_field() {
        let data = DataBlock::new(b"hello");
        assert_eq!(data.size, 5);
        assert_eq!(data.bytes(), b"hello");

        let mut block = [0u8; BLOCK_SIZE];
        data.write(&mut block);
        assert_eq!(DataBlock::read(&block).bytes(), b"hello");
    }
}
