//! Helpers for backends built on a real file system: conversion from
//! `std::fs::Metadata` to [`FileAttr`] and mode/kind extraction.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use crate::vfs::{FileAttr, FileKind, Timestamp};

/// File kind from the Unix mode word.
pub fn kind_from_mode(mode: u32) -> FileKind {
    match mode & 0o170000 {
        0o040000 => FileKind::Directory,
        0o120000 => FileKind::Symlink,
        0o140000 => FileKind::Socket,
        0o010000 => FileKind::Fifo,
        0o020000 => FileKind::CharDevice,
        0o060000 => FileKind::BlockDevice,
        _ => FileKind::Regular,
    }
}

fn timestamp(secs: i64, nanos: i64) -> Timestamp {
    if secs < 0 {
        return Timestamp::default();
    }
    Timestamp { seconds: secs as u64, nanos: (nanos.clamp(0, 999_999_999)) as u32 }
}

/// Builds [`FileAttr`] from file metadata. `fileid` falls back to the
/// inode number.
pub fn metadata_to_attr(meta: &Metadata) -> FileAttr {
    FileAttr {
        kind: kind_from_mode(meta.mode()),
        mode: meta.mode() & 0o7777,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.size(),
        used: meta.blocks() * 512,
        rdev: (((meta.rdev() >> 8) & 0xffff_ffff) as u32, (meta.rdev() & 0xff) as u32),
        fsid: meta.dev(),
        fileid: meta.ino(),
        atime: timestamp(meta.atime(), meta.atime_nsec()),
        mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
        ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
    }
}
