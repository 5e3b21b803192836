use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the
/// last block) where n is the number of blocks available.
pub type BlockNumber = usize;

/// The store handle every engine operation goes through: a fixed array of
/// 512-byte blocks with explicit flushing. The engine core never persists on
/// its own; callers sync after a successful mutating operation.
pub trait BlockStorage {
    /// Opens a disk image at the specified path. This method does not
    /// validate the stored blocks, it is up to clients to ensure images are
    /// appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// Reads disk block number into the provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes the provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This guarantees the block
    /// writes actually reached the backing store, for instance before
    /// reporting success to a caller.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
