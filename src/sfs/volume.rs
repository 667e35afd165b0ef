//! Volume lifecycle: formatting, mounting and unmounting a disk image.

use crate::bitmap;
use crate::bitmap::SLOT_FREE;
use crate::bitmap::SLOT_USED;
use crate::bitmap::SlotPool;
use crate::block::BlockDevice;
use crate::inode;
use crate::inode::Inode;
use crate::layout::BLOCK_DATA;
use crate::layout::BLOCK_DATA_BITMAP;
use crate::layout::BLOCK_INODE_BITMAP;
use crate::layout::BLOCK_INODE_TABLE;
use crate::layout::BLOCK_SIZE;
use crate::layout::MAGIC;
use crate::layout::NBLOCKS_DATA;
use crate::layout::NBLOCKS_DATA_BITMAP;
use crate::layout::NBLOCKS_INODE_BITMAP;
use crate::layout::NBLOCKS_INODE_TABLE;
use crate::layout::NINODES;
use crate::layout::ROOT_INO;
use crate::layout::Superblock;
use crate::util::get_timestamp;
use crate::util::reinterpret;
use std::io;
use std::io::Error;
use std::mem;
use std::path::Path;

/// A mounted volume: the backing device plus the in-memory state mirroring
/// its bitmaps.
///
/// The volume owns the image for the lifetime of the mount and is not
/// reentrant; the mount bridge must call into it from one thread at a time.
#[derive(Debug)]
pub struct Volume {
    /// The backing block device.
    pub(crate) dev: BlockDevice,
    /// Cached copy of the superblock.
    pub(crate) sb: Superblock,
    /// The root directory's inode, cached from the superblock.
    pub(crate) ino_root: u32,
    /// Free inode slots, mirroring the inode bitmap.
    pub(crate) free_inodes: SlotPool,
    /// Free data blocks, mirroring the data bitmap.
    pub(crate) free_data_blocks: SlotPool,
}

impl Volume {
    /// Mounts the volume backed by the image at `path`.
    ///
    /// A zero-length image is formatted first; anything else must already
    /// carry a valid superblock. The free lists are rebuilt from the
    /// bitmaps on every mount.
    pub fn mount(path: &Path) -> io::Result<Self> {
        let mut dev = BlockDevice::open(path)?;
        if dev.is_empty()? {
            format(&mut dev)?;
        }
        let sb = Superblock::read(&mut dev)?;
        if !sb.is_valid() {
            return Err(Error::from_raw_os_error(libc::EINVAL));
        }
        let free_inodes = bitmap::scan_bitmap(&mut dev, BLOCK_INODE_BITMAP, NINODES)?;
        let free_data_blocks = bitmap::scan_bitmap(&mut dev, BLOCK_DATA_BITMAP, NBLOCKS_DATA)?;
        let ino_root = sb.inode_root;
        Ok(Self {
            dev,
            sb,
            ino_root,
            free_inodes,
            free_data_blocks,
        })
    }

    /// Unmounts the volume: refreshes the superblock's free-block count,
    /// flushes the image and closes the device.
    pub fn unmount(mut self) -> io::Result<()> {
        self.sb.num_free_blocks = self.free_data_blocks.free_count() as u32;
        self.sb.write(&mut self.dev)?;
        self.dev.sync()
    }

    /// Returns the root directory's inode number.
    pub fn root_ino(&self) -> u32 {
        self.ino_root
    }

    /// Returns the number of free inodes.
    pub fn free_inode_count(&self) -> usize {
        self.free_inodes.free_count()
    }

    /// Returns the number of free data blocks.
    pub fn free_block_count(&self) -> usize {
        self.free_data_blocks.free_count()
    }

    /// Allocates an inode slot and marks it in the inode bitmap.
    pub fn alloc_inode(&mut self) -> io::Result<u32> {
        let Some(ino) = self.free_inodes.pop() else {
            return Err(Error::from_raw_os_error(libc::ENOSPC));
        };
        bitmap::update_bitmap(&mut self.dev, BLOCK_INODE_BITMAP, ino, SLOT_USED)?;
        Ok(ino)
    }

    /// Returns the inode slot `ino` to the free list and the bitmap.
    pub fn free_inode(&mut self, ino: u32) -> io::Result<()> {
        self.free_inodes.push(ino);
        bitmap::update_bitmap(&mut self.dev, BLOCK_INODE_BITMAP, ino, SLOT_FREE)
    }

    /// Allocates a data block and marks it in the data bitmap.
    ///
    /// The returned number is relative to the data region base.
    pub fn alloc_data_block(&mut self) -> io::Result<u32> {
        let Some(bno) = self.free_data_blocks.pop() else {
            return Err(Error::from_raw_os_error(libc::ENOSPC));
        };
        bitmap::update_bitmap(&mut self.dev, BLOCK_DATA_BITMAP, bno, SLOT_USED)?;
        Ok(bno)
    }

    /// Returns the data block `bno` to the free list and the bitmap.
    pub fn free_data_block(&mut self, bno: u32) -> io::Result<()> {
        self.free_data_blocks.push(bno);
        bitmap::update_bitmap(&mut self.dev, BLOCK_DATA_BITMAP, bno, SLOT_FREE)
    }

    /// Reads the data-region block `bno` into `buf`.
    pub fn read_data_block(&mut self, bno: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
        self.dev.read_block(BLOCK_DATA + bno, buf)
    }

    /// Writes `buf` as the data-region block `bno`.
    pub fn write_data_block(&mut self, bno: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        self.dev.write_block(BLOCK_DATA + bno, buf)
    }

    /// Loads the inode `ino` from the inode table.
    pub fn get_inode(&mut self, ino: u32) -> io::Result<Inode> {
        inode::get_inode(&mut self.dev, &self.free_inodes, ino)
    }

    /// Stores the inode back to the inode table, stamping its `mtime`.
    pub fn put_inode(&mut self, inode: &mut Inode) -> io::Result<()> {
        inode::put_inode(&mut self.dev, inode)
    }
}

/// Formats a blank image: superblock, all-free bitmaps, zeroed inode table
/// and data region, and the root directory at inode 0 owning data block 0.
fn format(dev: &mut BlockDevice) -> io::Result<()> {
    let sb = Superblock {
        magic: MAGIC,
        num_data_blocks: NBLOCKS_DATA,
        num_free_blocks: NBLOCKS_DATA - 1,
        num_inodes: NINODES,
        bitmap_inode_blocks: BLOCK_INODE_BITMAP,
        bitmap_data_blocks: BLOCK_DATA_BITMAP,
        inode_root: ROOT_INO,
    };
    sb.write(dev)?;

    let free = [SLOT_FREE; BLOCK_SIZE];
    for i in 0..NBLOCKS_INODE_BITMAP {
        dev.write_block(BLOCK_INODE_BITMAP + i, &free)?;
    }
    for i in 0..NBLOCKS_DATA_BITMAP {
        dev.write_block(BLOCK_DATA_BITMAP + i, &free)?;
    }

    let zero = [0u8; BLOCK_SIZE];
    for i in 0..NBLOCKS_INODE_TABLE {
        dev.write_block(BLOCK_INODE_TABLE + i, &zero)?;
    }
    for i in 0..NBLOCKS_DATA {
        dev.write_block(BLOCK_DATA + i, &zero)?;
    }

    bitmap::update_bitmap(dev, BLOCK_INODE_BITMAP, ROOT_INO, SLOT_USED)?;
    bitmap::update_bitmap(dev, BLOCK_DATA_BITMAP, 0, SLOT_USED)?;

    let now = get_timestamp();
    let mut root: Inode = unsafe { mem::zeroed() };
    root.ino = ROOT_INO;
    root.mode = libc::S_IFDIR;
    root.nblocks = 1;
    root.atime = now;
    root.mtime = now;
    root.ctime = now;
    dev.write_padded(BLOCK_INODE_TABLE, reinterpret(&root))
}
