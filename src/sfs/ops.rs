//! The operation surface the mount bridge calls.
//!
//! Every operation takes a path, resolves it against the root directory and
//! acts on the resulting inode. Failures carry a raw OS errno inside the
//! [`std::io::Error`], which the bridge turns back into a negative return
//! code.

use crate::dir;
use crate::file;
use crate::inode::Inode;
use crate::layout::BLOCK_SIZE;
use crate::layout::MAX_NAME_LEN;
use crate::util::get_timestamp;
use crate::volume::Volume;
use std::io;
use std::io::Error;
use std::mem;

/// File attributes, as reported by [`Volume::getattr`].
#[derive(Debug)]
pub struct Stat {
    /// The inode number.
    pub st_ino: u32,
    /// File type and permission bits.
    pub st_mode: u32,
    /// Number of hard links.
    pub st_nlink: u32,
    /// Size of the content in bytes.
    pub st_size: u32,
    /// The block size for I/O.
    pub st_blksize: u32,
    /// Number of data blocks charged to the file.
    pub st_blocks: u32,
    /// Owning user, reported as the mounting process's.
    pub st_uid: libc::uid_t,
    /// Owning group, reported as the mounting process's.
    pub st_gid: libc::gid_t,
    /// Timestamp of the last access.
    pub st_atime: u32,
    /// Timestamp of the last modification of the content.
    pub st_mtime: u32,
    /// Timestamp of the last modification of the metadata.
    pub st_ctime: u32,
}

impl Stat {
    /// Fills the attributes from an inode record.
    fn from_inode(inode: &Inode) -> Self {
        Self {
            st_ino: inode.ino,
            st_mode: inode.mode,
            st_nlink: inode.nlink,
            st_size: inode.size,
            st_blksize: BLOCK_SIZE as u32,
            st_blocks: inode.nblocks,
            st_uid: unsafe { libc::getuid() },
            st_gid: unsafe { libc::getgid() },
            st_atime: inode.atime,
            st_mtime: inode.mtime,
            st_ctime: inode.ctime,
        }
    }
}

/// Extracts the single path component under the root.
fn basename(path: &str) -> io::Result<&str> {
    let Some(name) = path.strip_prefix('/') else {
        eprintln!("sfs: ignoring path without a leading `/`: {path}");
        return Err(Error::from_raw_os_error(libc::ENOENT));
    };
    if name.is_empty() || name.contains('/') {
        return Err(Error::from_raw_os_error(libc::ENOENT));
    }
    if name.len() >= MAX_NAME_LEN {
        return Err(Error::from_raw_os_error(libc::ENAMETOOLONG));
    }
    Ok(name)
}

impl Volume {
    /// Resolves `path`, failing with `ENOENT` when it does not exist.
    fn resolve(&mut self, path: &str) -> io::Result<u32> {
        dir::path_to_ino(self, path)?.ok_or_else(|| Error::from_raw_os_error(libc::ENOENT))
    }

    /// Returns the attributes of the file at `path`.
    pub fn getattr(&mut self, path: &str) -> io::Result<Stat> {
        let ino = self.resolve(path)?;
        let inode = self.get_inode(ino)?;
        Ok(Stat::from_inode(&inode))
    }

    /// Creates a file at `path` with the given mode and returns its inode
    /// number.
    ///
    /// The caller provides the full mode, type bits included; `mkdir` goes
    /// through here with directory bits set. Creating over an existing path
    /// returns the existing inode without error.
    pub fn create(&mut self, path: &str, mode: u32) -> io::Result<u32> {
        let name = basename(path)?;
        let root = self.root_ino();
        let root_inode = self.get_inode(root)?;
        if let Some(ino) = dir::lookup(self, &root_inode, name)? {
            eprintln!("sfs: create: {path} already exists");
            return Ok(ino);
        }

        let ino = self.alloc_inode()?;
        let bno = match self.alloc_data_block() {
            Ok(bno) => bno,
            Err(e) => {
                self.free_inode(ino)?;
                return Err(e);
            }
        };

        let now = get_timestamp();
        let mut inode: Inode = unsafe { mem::zeroed() };
        inode.ino = ino;
        inode.mode = mode;
        inode.nblocks = 1;
        inode.blocks[0] = bno;
        inode.atime = now;
        inode.ctime = now;
        self.put_inode(&mut inode)?;

        if let Err(e) = dir::create_dentry(self, name, ino, root) {
            // the parent is full; roll the allocations back
            self.free_data_block(bno)?;
            self.free_inode(ino)?;
            return Err(e);
        }
        Ok(ino)
    }

    /// Creates a directory at `path`. The caller sets the directory mode
    /// bits.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> io::Result<u32> {
        self.create(path, mode)
    }

    /// Removes the file at `path`, returning its blocks and inode to the
    /// free lists.
    pub fn unlink(&mut self, path: &str) -> io::Result<()> {
        let ino = self.resolve(path)?;
        let inode = self.get_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::from_raw_os_error(libc::EISDIR));
        }
        self.remove_node(inode)
    }

    /// Removes the directory at `path`, which must be empty.
    pub fn rmdir(&mut self, path: &str) -> io::Result<()> {
        let ino = self.resolve(path)?;
        if ino == self.root_ino() {
            return Err(Error::from_raw_os_error(libc::EBUSY));
        }
        let inode = self.get_inode(ino)?;
        if !inode.is_dir() {
            return Err(Error::from_raw_os_error(libc::ENOTDIR));
        }
        if inode.size > 0 {
            return Err(Error::from_raw_os_error(libc::ENOTEMPTY));
        }
        self.remove_node(inode)
    }

    /// Frees every direct block of `inode`, then the inode itself, then its
    /// entry under the root directory.
    fn remove_node(&mut self, inode: Inode) -> io::Result<()> {
        for i in 0..inode.nblocks as usize {
            self.free_data_block(inode.blocks[i])?;
        }
        self.free_inode(inode.ino)?;
        let root = self.root_ino();
        dir::remove_dentry(self, inode.ino, root)
    }

    /// Opens the file at `path`, failing unless it is a regular file.
    pub fn open(&mut self, path: &str) -> io::Result<()> {
        let ino = self.resolve(path)?;
        let inode = self.get_inode(ino)?;
        if !inode.is_reg() {
            return Err(Error::from_raw_os_error(libc::EISDIR));
        }
        Ok(())
    }

    /// Releases the file at `path`. The core keeps no per-open state.
    pub fn release(&mut self, _path: &str) -> io::Result<()> {
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at `offset` from the file at `path`,
    /// returning the number of bytes read.
    pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let ino = self.resolve(path)?;
        let inode = self.get_inode(ino)?;
        file::read_inode_data(self, &inode, buf, offset as usize)
    }

    /// Writes `buf` at `offset` to the file at `path`, returning the number
    /// of bytes written.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> io::Result<usize> {
        let ino = self.resolve(path)?;
        let mut inode = self.get_inode(ino)?;
        file::write_inode_data(self, &mut inode, buf, offset as usize)
    }

    /// Opens the directory at `path`, failing unless it is a directory.
    pub fn opendir(&mut self, path: &str) -> io::Result<()> {
        let ino = self.resolve(path)?;
        let inode = self.get_inode(ino)?;
        if !inode.is_dir() {
            return Err(Error::from_raw_os_error(libc::ENOTDIR));
        }
        Ok(())
    }

    /// Emits `.`, `..` and the name of every entry of the directory at
    /// `path` to `filler`.
    pub fn readdir<F: FnMut(&str)>(&mut self, path: &str, mut filler: F) -> io::Result<()> {
        let ino = self.resolve(path)?;
        let inode = self.get_inode(ino)?;
        if !inode.is_dir() {
            return Err(Error::from_raw_os_error(libc::ENOTDIR));
        }
        filler(".");
        filler("..");
        for entry in dir::read_dentries(self, &inode)? {
            filler(entry.name());
        }
        Ok(())
    }

    /// Releases the directory at `path`. The core keeps no per-open state.
    pub fn releasedir(&mut self, _path: &str) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmap::SLOT_FREE;
    use crate::layout::BLOCK_DATA_BITMAP;
    use crate::layout::BLOCK_INODE_BITMAP;
    use crate::layout::DENTRY_SIZE;
    use crate::layout::NBLOCKS_DATA;
    use crate::layout::NBLOCKS_DATA_BITMAP;
    use crate::layout::NDIR_BLOCKS;
    use crate::layout::NINODES;
    use crate::util::ceil_division;
    use crate::util::temp_image;
    use std::collections::HashSet;

    const FILE_MODE: u32 = libc::S_IFREG | 0o644;
    const DIR_MODE: u32 = libc::S_IFDIR | 0o755;

    fn listing(vol: &mut Volume, path: &str) -> Vec<String> {
        let mut names = Vec::new();
        vol.readdir(path, |name| names.push(name.to_owned())).unwrap();
        names
    }

    /// Checks the volume-wide consistency properties: free lists agree with
    /// the bitmaps, live inodes reference distinct allocated blocks, and
    /// directory sizes match their block counts.
    fn check_invariants(vol: &mut Volume) {
        let mut buf = [0u8; BLOCK_SIZE];
        vol.dev.read_block(BLOCK_INODE_BITMAP, &mut buf).unwrap();
        for k in 0..NINODES {
            let bitmap_free = buf[k as usize] == SLOT_FREE;
            assert_eq!(
                bitmap_free,
                vol.free_inodes.is_free(k),
                "inode bitmap out of sync at slot {k}"
            );
        }
        for b in 0..NBLOCKS_DATA_BITMAP {
            vol.dev.read_block(BLOCK_DATA_BITMAP + b, &mut buf).unwrap();
            for i in 0..BLOCK_SIZE {
                let slot = b * BLOCK_SIZE as u32 + i as u32;
                if slot >= NBLOCKS_DATA {
                    break;
                }
                let bitmap_free = buf[i] == SLOT_FREE;
                assert_eq!(
                    bitmap_free,
                    vol.free_data_blocks.is_free(slot),
                    "data bitmap out of sync at slot {slot}"
                );
            }
        }

        let mut referenced = HashSet::new();
        for k in 0..NINODES {
            if vol.free_inodes.is_free(k) {
                continue;
            }
            let inode = vol.get_inode(k).unwrap();
            for i in 0..inode.nblocks as usize {
                let bno = inode.blocks[i];
                assert!(!vol.free_data_blocks.is_free(bno));
                assert!(referenced.insert(bno), "data block {bno} referenced twice");
            }
            if inode.is_dir() {
                let size = inode.size;
                let nblocks = inode.nblocks;
                assert_eq!(size as usize % DENTRY_SIZE, 0);
                assert_eq!(nblocks, ceil_division(size, BLOCK_SIZE as u32).max(1));
            }
        }
    }

    #[test]
    fn fresh_volume_lists_dot_entries() {
        let path = temp_image("ops-fresh");
        let mut vol = Volume::mount(&path).unwrap();
        assert_eq!(listing(&mut vol, "/"), [".", ".."]);

        let stat = vol.getattr("/").unwrap();
        assert_eq!(stat.st_mode & libc::S_IFMT, libc::S_IFDIR);
        assert_eq!(stat.st_blksize, BLOCK_SIZE as u32);
        assert_eq!(stat.st_blocks, 1);
        check_invariants(&mut vol);
    }

    #[test]
    fn mkdir_shows_up_in_listing() {
        let path = temp_image("ops-mkdir");
        let mut vol = Volume::mount(&path).unwrap();
        vol.mkdir("/d", DIR_MODE).unwrap();
        assert_eq!(listing(&mut vol, "/"), [".", "..", "d"]);
        vol.opendir("/d").unwrap();
        assert_eq!(listing(&mut vol, "/d"), [".", ".."]);
        check_invariants(&mut vol);
    }

    #[test]
    fn write_read_round_trip() {
        let path = temp_image("ops-round-trip");
        let mut vol = Volume::mount(&path).unwrap();
        vol.create("/f", FILE_MODE).unwrap();
        assert_eq!(vol.write("/f", b"ABCDE", 0).unwrap(), 5);

        let mut buf = [0u8; 5];
        assert_eq!(vol.read("/f", &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"ABCDE");
        check_invariants(&mut vol);
    }

    #[test]
    fn contents_survive_remount() {
        let path = temp_image("ops-remount");
        let mut vol = Volume::mount(&path).unwrap();
        vol.create("/a", FILE_MODE).unwrap();
        assert_eq!(vol.write("/a", b"hello", 0).unwrap(), 5);
        vol.unmount().unwrap();

        let mut vol = Volume::mount(&path).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(vol.read("/a", &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(vol.getattr("/a").unwrap().st_size, 5);
        check_invariants(&mut vol);
    }

    #[test]
    fn unlink_reorders_but_keeps_entries() {
        let path = temp_image("ops-unlink");
        let mut vol = Volume::mount(&path).unwrap();
        vol.create("/x", FILE_MODE).unwrap();
        vol.create("/y", FILE_MODE).unwrap();
        vol.create("/z", FILE_MODE).unwrap();
        vol.unlink("/y").unwrap();

        let names = listing(&mut vol, "/");
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"x".to_owned()));
        assert!(names.contains(&"z".to_owned()));
        assert!(!names.contains(&"y".to_owned()));

        let err = vol.getattr("/y").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        check_invariants(&mut vol);
    }

    #[test]
    fn unlink_create_is_idempotent() {
        let path = temp_image("ops-idempotence");
        let mut vol = Volume::mount(&path).unwrap();
        vol.create("/a", FILE_MODE).unwrap();
        vol.write("/a", &[0x42u8; 3 * BLOCK_SIZE], 0).unwrap();

        let free_inodes = vol.free_inode_count();
        let free_blocks = vol.free_block_count();
        for _ in 0..10 {
            vol.unlink("/a").unwrap();
            vol.create("/a", FILE_MODE).unwrap();
            vol.write("/a", &[0x42u8; 3 * BLOCK_SIZE], 0).unwrap();
            assert_eq!(vol.free_inode_count(), free_inodes);
            assert_eq!(vol.free_block_count(), free_blocks);
        }
        check_invariants(&mut vol);
    }

    #[test]
    fn create_on_existing_path_returns_same_inode() {
        let path = temp_image("ops-existing");
        let mut vol = Volume::mount(&path).unwrap();
        let ino = vol.create("/f", FILE_MODE).unwrap();
        let free = vol.free_inode_count();
        assert_eq!(vol.create("/f", FILE_MODE).unwrap(), ino);
        assert_eq!(vol.free_inode_count(), free);
    }

    #[test]
    fn inode_pool_exhaustion_leaves_bitmap_consistent() {
        let path = temp_image("ops-exhaustion");
        let mut vol = Volume::mount(&path).unwrap();
        let mut allocated = Vec::new();
        while let Ok(ino) = vol.alloc_inode() {
            allocated.push(ino);
        }
        // the root holds slot 0; every other slot was handed out once
        assert_eq!(allocated.len(), NINODES as usize - 1);
        let err = vol.alloc_inode().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
        assert_eq!(vol.free_inode_count(), 0);
        check_invariants(&mut vol);

        for ino in allocated {
            vol.free_inode(ino).unwrap();
        }
        assert_eq!(vol.free_inode_count(), NINODES as usize - 1);
        check_invariants(&mut vol);
    }

    #[test]
    fn full_directory_refuses_create() {
        let path = temp_image("ops-dir-full");
        let mut vol = Volume::mount(&path).unwrap();
        let capacity = NDIR_BLOCKS * (BLOCK_SIZE / DENTRY_SIZE);
        for i in 0..capacity {
            vol.create(&format!("/f{i}"), FILE_MODE).unwrap();
        }

        let free_inodes = vol.free_inode_count();
        let free_blocks = vol.free_block_count();
        let err = vol.create("/overflow", FILE_MODE).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
        // the refused create rolled its allocations back
        assert_eq!(vol.free_inode_count(), free_inodes);
        assert_eq!(vol.free_block_count(), free_blocks);
        check_invariants(&mut vol);
    }

    #[test]
    fn kind_checks() {
        let path = temp_image("ops-kinds");
        let mut vol = Volume::mount(&path).unwrap();
        vol.create("/f", FILE_MODE).unwrap();
        vol.mkdir("/d", DIR_MODE).unwrap();

        vol.open("/f").unwrap();
        assert_eq!(vol.open("/d").unwrap_err().raw_os_error(), Some(libc::EISDIR));
        vol.opendir("/d").unwrap();
        assert_eq!(
            vol.opendir("/f").unwrap_err().raw_os_error(),
            Some(libc::ENOTDIR)
        );
        assert_eq!(
            vol.unlink("/d").unwrap_err().raw_os_error(),
            Some(libc::EISDIR)
        );
        assert_eq!(
            vol.rmdir("/f").unwrap_err().raw_os_error(),
            Some(libc::ENOTDIR)
        );
        vol.release("/f").unwrap();
        vol.releasedir("/d").unwrap();
    }

    #[test]
    fn rmdir_semantics() {
        let path = temp_image("ops-rmdir");
        let mut vol = Volume::mount(&path).unwrap();
        let ino = vol.mkdir("/d", DIR_MODE).unwrap();
        assert_eq!(vol.rmdir("/").unwrap_err().raw_os_error(), Some(libc::EBUSY));

        // an occupied directory refuses removal
        dir::create_dentry(&mut vol, "child", 99, ino).unwrap();
        assert_eq!(
            vol.rmdir("/d").unwrap_err().raw_os_error(),
            Some(libc::ENOTEMPTY)
        );
        dir::remove_dentry(&mut vol, 99, ino).unwrap();

        let free_inodes = vol.free_inode_count();
        vol.rmdir("/d").unwrap();
        assert_eq!(vol.free_inode_count(), free_inodes + 1);
        assert_eq!(vol.getattr("/d").unwrap_err().raw_os_error(), Some(libc::ENOENT));
        check_invariants(&mut vol);
    }

    #[test]
    fn path_validation() {
        let path = temp_image("ops-paths");
        let mut vol = Volume::mount(&path).unwrap();
        assert_eq!(
            vol.create("relative", FILE_MODE).unwrap_err().raw_os_error(),
            Some(libc::ENOENT)
        );
        assert_eq!(
            vol.create("/a/b", FILE_MODE).unwrap_err().raw_os_error(),
            Some(libc::ENOENT)
        );
        let long = format!("/{}", "n".repeat(MAX_NAME_LEN));
        assert_eq!(
            vol.create(&long, FILE_MODE).unwrap_err().raw_os_error(),
            Some(libc::ENAMETOOLONG)
        );
        assert_eq!(
            vol.getattr("/missing").unwrap_err().raw_os_error(),
            Some(libc::ENOENT)
        );
    }
}
