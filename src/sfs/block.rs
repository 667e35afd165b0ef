//! Adaptor over the backing disk image, providing fixed-index block I/O.

use crate::layout::BLOCK_SIZE;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;

/// A block device backed by a disk image file.
///
/// Every transfer moves exactly one block of `BLOCK_SIZE` bytes.
#[derive(Debug)]
pub struct BlockDevice {
    /// The backing image file.
    file: File,
}

impl BlockDevice {
    /// Opens the disk image at `path`, creating it if it does not exist.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Tells whether the image is zero-length, meaning it has never been
    /// formatted.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.file.metadata()?.len() == 0)
    }

    /// Reads the block at index `idx` into `buf`.
    pub fn read_block(&mut self, idx: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(idx as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)
    }

    /// Writes `buf` as the block at index `idx`.
    pub fn write_block(&mut self, idx: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(idx as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)
    }

    /// Writes `data` at the beginning of block `idx`, padding the rest of
    /// the block with zeros. `data` must not be larger than a block.
    pub fn write_padded(&mut self, idx: u32, data: &[u8]) -> io::Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[..data.len()].copy_from_slice(data);
        self.write_block(idx, &buf)
    }

    /// Flushes pending writes to the image.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::temp_image;

    #[test]
    fn block_round_trip() {
        let path = temp_image("block-round-trip");
        let mut dev = BlockDevice::open(&path).unwrap();
        assert!(dev.is_empty().unwrap());

        let mut out = [0u8; BLOCK_SIZE];
        out[0] = 0xab;
        out[BLOCK_SIZE - 1] = 0xcd;
        dev.write_block(3, &out).unwrap();
        assert!(!dev.is_empty().unwrap());

        let mut buf = [0xffu8; BLOCK_SIZE];
        dev.read_block(3, &mut buf).unwrap();
        assert_eq!(buf, out);
    }

    #[test]
    fn padded_write() {
        let path = temp_image("block-padded");
        let mut dev = BlockDevice::open(&path).unwrap();
        dev.write_block(0, &[0xffu8; BLOCK_SIZE]).unwrap();
        dev.write_padded(0, b"hello").unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_block(0, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"hello");
        assert!(buf[5..].iter().all(|b| *b == 0));
    }
}
