//! XDR structures for the directory procedures: MKDIR, SYMLINK, MKNOD,
//! READDIR and READDIRPLUS (RFC 1813 sections 3.3.9–3.3.11, 3.3.16, 3.3.17).

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use super::*;

/// Arguments of MKDIR.
#[derive(Clone, Debug, Default)]
pub struct MKDIR3args {
    pub dirops: diropargs3,
    pub attributes: sattr3,
}
DeserializeStruct!(MKDIR3args, dirops, attributes);
SerializeStruct!(MKDIR3args, dirops, attributes);

/// Arguments of SYMLINK.
#[derive(Clone, Debug, Default)]
pub struct SYMLINK3args {
    pub dirops: diropargs3,
    pub symlink: symlinkdata3,
}
DeserializeStruct!(SYMLINK3args, dirops, symlink);
SerializeStruct!(SYMLINK3args, dirops, symlink);

/// One READDIR entry.
#[derive(Clone, Debug, Default)]
pub struct entry3 {
    pub fileid: fileid3,
    pub name: filename3,
    /// Position of the entry; passing it back resumes the listing after it.
    pub cookie: cookie3,
}
DeserializeStruct!(entry3, fileid, name, cookie);
SerializeStruct!(entry3, fileid, name, cookie);

/// Arguments of READDIR.
#[derive(Clone, Debug, Default)]
pub struct READDIR3args {
    pub dir: nfs_fh3,
    /// Zero starts at the beginning of the directory.
    pub cookie: cookie3,
    pub cookieverf: cookieverf3,
    /// Maximum bytes of directory information to return.
    pub dircount: count3,
}
DeserializeStruct!(READDIR3args, dir, cookie, cookieverf, dircount);
SerializeStruct!(READDIR3args, dir, cookie, cookieverf, dircount);

/// One READDIRPLUS entry: name plus attributes and handle.
#[derive(Clone, Debug, Default)]
pub struct entryplus3 {
    pub fileid: fileid3,
    pub name: filename3,
    pub cookie: cookie3,
    pub name_attributes: post_op_attr,
    pub name_handle: post_op_fh3,
}
DeserializeStruct!(entryplus3, fileid, name, cookie, name_attributes, name_handle);
SerializeStruct!(entryplus3, fileid, name, cookie, name_attributes, name_handle);

/// Arguments of READDIRPLUS.
#[derive(Clone, Debug, Default)]
pub struct READDIRPLUS3args {
    pub dir: nfs_fh3,
    pub cookie: cookie3,
    pub cookieverf: cookieverf3,
    /// Byte budget for the entry names and cookies alone.
    pub dircount: count3,
    /// Byte budget for the whole reply.
    pub maxcount: count3,
}
DeserializeStruct!(READDIRPLUS3args, dir, cookie, cookieverf, dircount, maxcount);
SerializeStruct!(READDIRPLUS3args, dir, cookie, cookieverf, dircount, maxcount);

/// Device numbers plus attributes for MKNOD of block/character devices.
#[derive(Clone, Debug, Default)]
pub struct devicedata3 {
    pub dev_attributes: sattr3,
    pub spec: specdata3,
}
DeserializeStruct!(devicedata3, dev_attributes, spec);
SerializeStruct!(devicedata3, dev_attributes, spec);

/// MKNOD type union, discriminated by [`ftype3`]. Regular files and
/// directories are not valid here.
#[derive(Clone, Debug)]
pub enum mknoddata3 {
    /// NF3CHR or NF3BLK with device numbers.
    Device(ftype3, devicedata3),
    /// NF3SOCK or NF3FIFO, attributes only.
    Pipe(ftype3, sattr3),
}

impl Default for mknoddata3 {
    fn default() -> mknoddata3 {
        mknoddata3::Pipe(ftype3::NF3FIFO, sattr3::default())
    }
}

impl mknoddata3 {
    pub fn ftype(&self) -> ftype3 {
        match self {
            mknoddata3::Device(t, _) | mknoddata3::Pipe(t, _) => *t,
        }
    }
}

impl Serialize for mknoddata3 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            mknoddata3::Device(ftype, data) => {
                ftype.serialize(dest)?;
                data.serialize(dest)
            }
            mknoddata3::Pipe(ftype, attr) => {
                ftype.serialize(dest)?;
                attr.serialize(dest)
            }
        }
    }
}

impl Deserialize for mknoddata3 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let ftype = deserialize::<ftype3>(src)?;
        match ftype {
            ftype3::NF3CHR | ftype3::NF3BLK => {
                *self = mknoddata3::Device(ftype, deserialize(src)?);
            }
            ftype3::NF3SOCK | ftype3::NF3FIFO => {
                *self = mknoddata3::Pipe(ftype, deserialize(src)?);
            }
            other => {
                return Err(super::super::invalid_data(format!(
                    "mknod does not accept file type {other:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Arguments of MKNOD.
#[derive(Clone, Debug, Default)]
pub struct MKNOD3args {
    pub where_dir: diropargs3,
    pub what: mknoddata3,
}
DeserializeStruct!(MKNOD3args, where_dir, what);
SerializeStruct!(MKNOD3args, where_dir, what);
