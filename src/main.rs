//! The `sfs` command prepares a simple-filesystem disk image for mounting.
//!
//! The process bootstrap: the command line names the backing disk image and
//! the mount point, with any leading options passed through to the mount
//! bridge. The core formats a blank image on first use, checks an existing
//! one, and reports the volume's state.

use sfs::error;
use sfs::volume::Volume;
use std::path::PathBuf;
use std::process::exit;

/// Prints the command's usage.
fn print_usage() {
    eprintln!("usage: sfs [mount options] <diskFile> <mountPoint>");
}

fn main() {
    let (_, args) = sfs::args();
    let args: Vec<_> = args.collect();
    if args.len() < 2 {
        print_usage();
        exit(1);
    }
    // the image and the mount point are the two trailing arguments; neither
    // may be an option
    let disk = &args[args.len() - 2];
    let mount_point = &args[args.len() - 1];
    if disk.to_string_lossy().starts_with('-') || mount_point.to_string_lossy().starts_with('-') {
        print_usage();
        exit(1);
    }

    let disk = PathBuf::from(disk);
    let vol = Volume::mount(&disk).unwrap_or_else(|e| {
        error("sfs", format_args!("{}: {e}", disk.display()));
    });
    println!(
        "{}: {} inodes free, {} data blocks free, mount point {}",
        disk.display(),
        vol.free_inode_count(),
        vol.free_block_count(),
        PathBuf::from(mount_point).display(),
    );

    // the mount bridge attaches the volume to the mount point and drives the
    // operation surface; here the volume is torn down cleanly
    vol.unmount().unwrap_or_else(|e| {
        error("sfs", format_args!("{}: {e}", disk.display()));
    });
}
