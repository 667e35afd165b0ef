//! Inode records and the on-disk inode table.

use crate::bitmap::SlotPool;
use crate::block::BlockDevice;
use crate::layout::BLOCK_INODE_TABLE;
use crate::layout::BLOCK_SIZE;
use crate::layout::INODE_SIZE;
use crate::layout::N_BLOCKS;
use crate::layout::NINODES;
use crate::util::get_timestamp;
use crate::util::reinterpret;
use crate::util::reinterpret_mut;
use std::io;
use std::io::Error;
use std::mem;
use std::mem::size_of;

/// The number of inode records per block of the inode table.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// An inode, the metadata record of one file or directory.
///
/// The record is stored packed in the inode table, one `INODE_SIZE`-byte
/// slot per inode; the unused tail of the slot stays zeroed.
#[repr(C, packed)]
#[derive(Debug)]
pub struct Inode {
    /// The inode number.
    pub ino: u32,
    /// File type and permission bits.
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u32,
    /// Size of the content in bytes.
    pub size: u32,
    /// Number of data blocks charged to the inode.
    pub nblocks: u32,
    /// Timestamp of the last access.
    pub atime: u32,
    /// Timestamp of the last modification of the content.
    pub mtime: u32,
    /// Timestamp of the last modification of the metadata.
    pub ctime: u32,
    /// Block pointers, relative to the data region base. The first
    /// `NDIR_BLOCKS` are direct; the rest are reserved for indirections and
    /// not addressable here.
    pub blocks: [u32; N_BLOCKS],
}

impl Inode {
    /// Tells whether the inode is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    /// Tells whether the inode is a regular file.
    pub fn is_reg(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }
}

/// Returns the table block holding the inode `ino` along with the byte
/// offset of its slot inside that block.
fn locate(ino: u32) -> (u32, usize) {
    let block = BLOCK_INODE_TABLE + ino / INODES_PER_BLOCK as u32;
    let offset = (ino as usize % INODES_PER_BLOCK) * INODE_SIZE;
    (block, offset)
}

/// Reads the inode `ino` from the inode table.
///
/// Loading refuses with `ENOENT` when `ino` is out of range or its slot
/// sits on the free list, which means the caller holds a stale number.
pub fn get_inode(dev: &mut BlockDevice, pool: &SlotPool, ino: u32) -> io::Result<Inode> {
    if ino >= NINODES || pool.is_free(ino) {
        eprintln!("sfs: inode {ino} not in use");
        return Err(Error::from_raw_os_error(libc::ENOENT));
    }
    let (block, offset) = locate(ino);
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(block, &mut buf)?;
    let mut inode: Inode = unsafe { mem::zeroed() };
    reinterpret_mut(&mut inode).copy_from_slice(&buf[offset..offset + size_of::<Inode>()]);
    Ok(inode)
}

/// Writes the inode back to its slot in the inode table, stamping `mtime`.
pub fn put_inode(dev: &mut BlockDevice, inode: &mut Inode) -> io::Result<()> {
    inode.mtime = get_timestamp();
    let (block, offset) = locate(inode.ino);
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(block, &mut buf)?;
    buf[offset..offset + size_of::<Inode>()].copy_from_slice(reinterpret(inode));
    dev.write_block(block, &buf)
}
