//! Directory entries, their packing inside a directory's data blocks, and
//! path resolution.
//!
//! A directory's content is a densely packed array of fixed-size entries.
//! Entry `k` lives in the directory's block `k / DENTRIES_PER_BLOCK`, at
//! slot `k % DENTRIES_PER_BLOCK`. Appends go to the end of the array;
//! removal fills the vacated slot with the last entry, so listing order is
//! not stable across removals.

use crate::inode::Inode;
use crate::layout::BLOCK_SIZE;
use crate::layout::DENTRY_SIZE;
use crate::layout::MAX_NAME_LEN;
use crate::layout::NDIR_BLOCKS;
use crate::util::reinterpret;
use crate::util::reinterpret_mut;
use crate::volume::Volume;
use std::io;
use std::io::Error;
use std::mem;
use std::mem::size_of;
use std::str;

/// The number of directory entry slots per data block.
pub const DENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DENTRY_SIZE;

/// A directory entry, binding a name to an inode number.
///
/// Entries are stored on a `DENTRY_SIZE`-byte stride; the bytes between the
/// end of the record and the end of its slot are ignored.
#[repr(C, packed)]
pub struct Dirent {
    /// The inode number of the child.
    pub inode_number: u32,
    /// The child's name, NUL-terminated inside the fixed field.
    pub name: [u8; MAX_NAME_LEN],
}

impl Dirent {
    /// Creates an entry binding `name` to the inode `ino`.
    ///
    /// `name` must be at most `MAX_NAME_LEN - 1` bytes.
    pub fn new(ino: u32, name: &str) -> Self {
        let mut entry = Self {
            inode_number: ino,
            name: [0; MAX_NAME_LEN],
        };
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry
    }

    /// Returns the entry's name, up to the first NUL byte.
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.name.len());
        str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// Decodes the entry stored at byte `offset` of a directory block.
fn entry_at(buf: &[u8; BLOCK_SIZE], offset: usize) -> Dirent {
    let mut entry: Dirent = unsafe { mem::zeroed() };
    reinterpret_mut(&mut entry).copy_from_slice(&buf[offset..offset + size_of::<Dirent>()]);
    entry
}

/// Appends an entry binding `name` to `child_ino` at the end of the
/// directory `parent_ino`, growing the directory by one block when the
/// entry opens a new one.
pub fn create_dentry(
    vol: &mut Volume,
    name: &str,
    child_ino: u32,
    parent_ino: u32,
) -> io::Result<()> {
    let mut parent = vol.get_inode(parent_ino)?;
    let k = parent.size as usize / DENTRY_SIZE;
    let block_index = k / DENTRIES_PER_BLOCK;
    let slot = k % DENTRIES_PER_BLOCK;
    if block_index >= NDIR_BLOCKS {
        // all direct blocks full
        return Err(Error::from_raw_os_error(libc::ENOSPC));
    }
    if slot == 0 && k != 0 {
        // the entry opens a new block
        let bno = vol.alloc_data_block()?;
        parent.blocks[block_index] = bno;
        parent.nblocks += 1;
    }

    let bno = parent.blocks[block_index];
    let mut buf = [0u8; BLOCK_SIZE];
    vol.read_data_block(bno, &mut buf)?;
    let offset = slot * DENTRY_SIZE;
    let entry = Dirent::new(child_ino, name);
    buf[offset..offset + size_of::<Dirent>()].copy_from_slice(reinterpret(&entry));
    vol.write_data_block(bno, &buf)?;

    parent.size += DENTRY_SIZE as u32;
    vol.put_inode(&mut parent)
}

/// Removes the entry referring to `child_ino` from the directory
/// `parent_ino`.
///
/// The vacated slot is overwritten with the directory's last entry to keep
/// the array packed; a tail block left empty by the move is freed.
pub fn remove_dentry(vol: &mut Volume, child_ino: u32, parent_ino: u32) -> io::Result<()> {
    let mut parent = vol.get_inode(parent_ino)?;
    let count = parent.size as usize / DENTRY_SIZE;

    let mut found = None;
    let mut buf = [0u8; BLOCK_SIZE];
    for k in 0..count {
        let slot = k % DENTRIES_PER_BLOCK;
        if slot == 0 {
            vol.read_data_block(parent.blocks[k / DENTRIES_PER_BLOCK], &mut buf)?;
        }
        let entry = entry_at(&buf, slot * DENTRY_SIZE);
        if entry.inode_number == child_ino {
            found = Some(k);
            break;
        }
    }
    let Some(k) = found else {
        return Err(Error::from_raw_os_error(libc::ENOENT));
    };

    let last = count - 1;
    if k != last {
        // move the last entry into the vacated slot
        let mut record = [0u8; size_of::<Dirent>()];
        let last_offset = (last % DENTRIES_PER_BLOCK) * DENTRY_SIZE;
        vol.read_data_block(parent.blocks[last / DENTRIES_PER_BLOCK], &mut buf)?;
        record.copy_from_slice(&buf[last_offset..last_offset + size_of::<Dirent>()]);

        let offset = (k % DENTRIES_PER_BLOCK) * DENTRY_SIZE;
        let bno = parent.blocks[k / DENTRIES_PER_BLOCK];
        vol.read_data_block(bno, &mut buf)?;
        buf[offset..offset + size_of::<Dirent>()].copy_from_slice(&record);
        vol.write_data_block(bno, &buf)?;
    }

    // free the tail block if the last entry was alone in it
    let last_block = last / DENTRIES_PER_BLOCK;
    if last % DENTRIES_PER_BLOCK == 0 && last_block > 0 {
        vol.free_data_block(parent.blocks[last_block])?;
        parent.nblocks -= 1;
    }

    parent.size -= DENTRY_SIZE as u32;
    vol.put_inode(&mut parent)
}

/// Enumerates the directory's entries in physical layout order.
pub fn read_dentries(vol: &mut Volume, dir: &Inode) -> io::Result<Vec<Dirent>> {
    let count = dir.size as usize / DENTRY_SIZE;
    let mut entries = Vec::with_capacity(count);
    let mut buf = [0u8; BLOCK_SIZE];
    for k in 0..count {
        let slot = k % DENTRIES_PER_BLOCK;
        if slot == 0 {
            vol.read_data_block(dir.blocks[k / DENTRIES_PER_BLOCK], &mut buf)?;
        }
        entries.push(entry_at(&buf, slot * DENTRY_SIZE));
    }
    Ok(entries)
}

/// Returns the inode number bound to `name` in the given directory, if any.
pub fn lookup(vol: &mut Volume, dir: &Inode, name: &str) -> io::Result<Option<u32>> {
    let entries = read_dentries(vol, dir)?;
    Ok(entries
        .iter()
        .find(|e| e.name() == name)
        .map(|e| e.inode_number))
}

/// Resolves a path to an inode number.
///
/// Only the root itself and single-level paths under it resolve; a path
/// without a leading `/`, or with more than one component, yields `None`.
pub fn path_to_ino(vol: &mut Volume, path: &str) -> io::Result<Option<u32>> {
    let root = vol.root_ino();
    if path == "/" {
        return Ok(Some(root));
    }
    let Some(name) = path.strip_prefix('/') else {
        eprintln!("sfs: ignoring path without a leading `/`: {path}");
        return Ok(None);
    };
    if name.is_empty() || name.contains('/') {
        return Ok(None);
    }
    let root_inode = vol.get_inode(root)?;
    lookup(vol, &root_inode, name)
}
