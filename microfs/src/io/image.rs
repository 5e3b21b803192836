use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

use crate::io::block::{BlockNumber, BlockStorage};
use crate::BLOCK_SIZE;

/// Backs the block store with a regular file holding the raw image, one
/// seek-and-transfer per block access.
pub struct FileBlockDevice {
    /// The file must be a fixed-size file some exact multiple of the size of
    /// a block.
    fd: File,
    /// The total number of blocks available in the image.
    block_count: usize,
}

impl FileBlockDevice {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }
}

impl BlockStorage for FileBlockDevice {
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return an error if the image does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(FileBlockDevice {
            fd: file,
            block_count: nblocks,
        })
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        if blocknr > (self.block_count - 1) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }

        if buf.len() < BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.fd.seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        self.fd.read_exact(&mut buf[..BLOCK_SIZE])
    }

    /// This method truncates writes that exceed the block size.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        if blocknr > (self.block_count - 1) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block out of range",
            ));
        }
        self.fd.seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;

        let max = BLOCK_SIZE.min(buf.len());
        self.fd.write_all(&buf[0..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockDeviceBuilder {
    fd: File,
    block_count: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockDeviceBuilder {
    fn from(fd: File) -> Self {
        FileBlockDeviceBuilder {
            fd,
            // A better default here might be the size of the file rounded
            // down to the nearest block.
            block_count: 0,
            clear_medium: true,
        }
    }
}

impl FileBlockDeviceBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether `build` zeroes the medium first. Disable to wrap an image
    /// that already holds a filesystem.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless
    /// `clear_medium(false)` was set, does destructive things to prepare the
    /// file for use. Ownership of the file is transferred to the device,
    /// meaning this builder can only be used to create one device.
    pub fn build(mut self) -> std::io::Result<FileBlockDevice> {
        debug_assert!(self.block_count > 0);
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(FileBlockDevice {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        let mut bfd = BufWriter::new(&self.fd);
        bfd.seek(SeekFrom::Start(0))?;
        // Zero out the "disk" blocks, buffering each write to prevent
        // excessive syscalls.
        for _ in 0..self.block_count {
            bfd.write_all(&[0u8; BLOCK_SIZE])?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_allocates_correct_num_bytes() {
        let image = tempfile::tempfile().unwrap();
        let mut dev = FileBlockDeviceBuilder::from(image)
            .with_block_count(4)
            .build()
            .expect("failed to allocate image file");
        dev.sync_disk().unwrap();
        assert_eq!(dev.into_file().metadata().unwrap().len(), 4 * 512);
    }

    #[test]
    fn can_read_and_write_blocks() {
        let image = tempfile::tempfile().unwrap();
        let mut dev = FileBlockDeviceBuilder::from(image)
            .with_block_count(4)
            .build()
            .expect("failed to allocate image file");

        let block = [0x55u8; BLOCK_SIZE];
        dev.write_block(2, &block).unwrap();
        dev.sync_disk().unwrap();

        // A different block stays zeroed.
        let mut read_back = [0x00u8; BLOCK_SIZE];
        dev.read_block(3, &mut read_back).unwrap();
        assert_eq!(read_back, [0x00u8; BLOCK_SIZE]);

        dev.read_block(2, &mut read_back).unwrap();
        assert_eq!(read_back, [0x55u8; BLOCK_SIZE]);
    }

    #[test]
    fn block_access_beyond_range_is_an_error() {
        let image = tempfile::tempfile().unwrap();
        let mut dev = FileBlockDeviceBuilder::from(image)
            .with_block_count(1)
            .build()
            .expect("failed to allocate image file");

        let block = [0x55u8; BLOCK_SIZE];
        assert!(dev.write_block(1, &block).is_err());

        let mut read_back = [0x00u8; BLOCK_SIZE];
        assert!(dev.read_block(1, &mut read_back).is_err());
    }

    #[test]
    fn short_writes_leave_the_block_tail_intact() {
        let image = tempfile::tempfile().unwrap();
        let mut dev = FileBlockDeviceBuilder::from(image)
            .with_block_count(1)
            .build()
            .expect("failed to allocate image file");

        dev.write_block(0, &[0x55u8; 256]).unwrap();

        let mut read_back = [0xFFu8; BLOCK_SIZE];
        dev.read_block(0, &mut read_back).unwrap();
        assert_eq!(&read_back[..256], &[0x55u8; 256]);
        assert_eq!(&read_back[256..], &[0x00u8; 256]);
    }
}
