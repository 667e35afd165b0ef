//! Byte-level file I/O over an inode's direct blocks.
//!
//! Requests come in as a byte offset and length; each is translated to a
//! run of block indices with an intra-block offset, and the data is moved
//! through a one-block bounce buffer. Only the direct blocks are
//! addressable, which bounds a file at `NDIR_BLOCKS * BLOCK_SIZE` bytes.

use crate::inode::Inode;
use crate::layout::BLOCK_SIZE;
use crate::layout::NDIR_BLOCKS;
use crate::volume::Volume;
use std::cmp::min;
use std::io;

/// Writes `buf` at byte `offset` of the file, allocating data blocks as the
/// file extends.
///
/// A request past the direct-block capacity is refused whole: the function
/// returns `Ok(0)` and the file is untouched. On success the file's size
/// becomes `offset + buf.len()` and the number of bytes written is
/// returned.
pub fn write_inode_data(
    vol: &mut Volume,
    inode: &mut Inode,
    buf: &[u8],
    offset: usize,
) -> io::Result<usize> {
    let first = offset / BLOCK_SIZE;
    if first >= NDIR_BLOCKS {
        return Ok(0);
    }
    let capacity = (NDIR_BLOCKS - first) * BLOCK_SIZE - offset % BLOCK_SIZE;
    if buf.len() > capacity {
        return Ok(0);
    }
    if buf.is_empty() {
        return Ok(0);
    }

    // charge every block up to the last one written, keeping the block map
    // dense
    let last = (offset + buf.len() - 1) / BLOCK_SIZE;
    let mut num_new_blocks = 0u32;
    while ((inode.nblocks + num_new_blocks) as usize) <= last {
        let i = (inode.nblocks + num_new_blocks) as usize;
        inode.blocks[i] = vol.alloc_data_block()?;
        num_new_blocks += 1;
    }

    let mut written = 0;
    let mut i = first;
    let mut o = offset % BLOCK_SIZE;
    let mut block = [0u8; BLOCK_SIZE];
    while written < buf.len() {
        let n = min(BLOCK_SIZE - o, buf.len() - written);
        let bno = inode.blocks[i];
        if n < BLOCK_SIZE {
            // partial block: preserve the bytes around the write
            vol.read_data_block(bno, &mut block)?;
        }
        block[o..o + n].copy_from_slice(&buf[written..written + n]);
        vol.write_data_block(bno, &block)?;
        written += n;
        i += 1;
        o = 0;
    }

    inode.nblocks += num_new_blocks;
    inode.size = (offset + buf.len()) as u32;
    vol.put_inode(inode)?;
    Ok(written)
}

/// Reads from the file at byte `offset` into `buf`, stopping at the end of
/// the file. Returns the number of bytes read.
pub fn read_inode_data(
    vol: &mut Volume,
    inode: &Inode,
    buf: &mut [u8],
    offset: usize,
) -> io::Result<usize> {
    let size = inode.size as usize;
    let mut read = 0;
    let mut block = [0u8; BLOCK_SIZE];
    while read < buf.len() {
        let pos = offset + read;
        if pos >= size {
            break;
        }
        let i = pos / BLOCK_SIZE;
        if i >= NDIR_BLOCKS {
            break;
        }
        let o = pos % BLOCK_SIZE;
        let n = min(BLOCK_SIZE - o, min(buf.len() - read, size - pos));
        vol.read_data_block(inode.blocks[i], &mut block)?;
        buf[read..read + n].copy_from_slice(&block[o..o + n]);
        read += n;
    }
    Ok(read)
}
