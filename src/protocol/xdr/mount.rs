//! XDR structures for the MOUNT protocol, versions 1 and 3 (RFC 1813
//! Appendix I). The procedures and wire layout are identical in both
//! versions served here.

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::*;

/// RPC program number of the MOUNT service.
pub const PROGRAM: u32 = 100005;
/// Highest MOUNT version served.
pub const VERSION: u32 = 3;
/// Oldest MOUNT version served.
pub const VERSION_LOW: u32 = 1;

/// Maximum bytes in a path name.
pub const MNTPATHLEN: u32 = 1024;
/// Maximum bytes in a host or group name.
pub const MNTNAMLEN: u32 = 255;
/// Maximum bytes in a version 3 file handle.
pub const FHSIZE3: u32 = 64;

pub type fhandle3 = Vec<u8>;

/// Server-side directory path, bounded at [`MNTPATHLEN`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct dirpath(pub Vec<u8>);

impl dirpath {
    pub fn as_utf8(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for dirpath {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().into())
    }
}

impl Serialize for dirpath {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for dirpath {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_bounded_opaque(src, MNTPATHLEN)?;
        Ok(())
    }
}

/// Host or group name, bounded at [`MNTNAMLEN`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct name(pub Vec<u8>);

impl From<&str> for name {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().into())
    }
}

impl Serialize for name {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(&self.0, dest)
    }
}

impl Deserialize for name {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0 = read_bounded_opaque(src, MNTNAMLEN)?;
        Ok(())
    }
}

/// Status codes returned by MOUNT procedures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum mountstat3 {
    MNT3_OK = 0,
    MNT3ERR_PERM = 1,
    MNT3ERR_NOENT = 2,
    MNT3ERR_IO = 5,
    MNT3ERR_ACCES = 13,
    MNT3ERR_NOTDIR = 20,
    MNT3ERR_INVAL = 22,
    MNT3ERR_NAMETOOLONG = 63,
    MNT3ERR_NOTSUPP = 10004,
    MNT3ERR_SERVERFAULT = 10006,
}
SerializeEnum!(mountstat3);
DeserializeEnum!(mountstat3);

/// Successful MNT result: the root handle plus accepted auth flavors.
#[derive(Clone, Debug, Default)]
pub struct mountres3_ok {
    pub fhandle: fhandle3,
    pub auth_flavors: Vec<u32>,
}
DeserializeStruct!(mountres3_ok, fhandle, auth_flavors);
SerializeStruct!(mountres3_ok, fhandle, auth_flavors);

/// One entry of the DUMP mount list.
#[derive(Clone, Debug, Default)]
pub struct mountbody {
    pub ml_hostname: name,
    pub ml_directory: dirpath,
}
DeserializeStruct!(mountbody, ml_hostname, ml_directory);
SerializeStruct!(mountbody, ml_hostname, ml_directory);

/// One entry of the EXPORT list.
#[derive(Clone, Debug, Default)]
pub struct exportnode {
    pub ex_dir: dirpath,
    pub ex_groups: Vec<name>,
}

impl Serialize for exportnode {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.ex_dir.serialize(dest)?;
        serialize_list(&self.ex_groups, dest)
    }
}

/// Writes an XDR optional-chained list: `true entry ... false`.
pub fn serialize_list<T: Serialize>(items: &[T], dest: &mut impl Write) -> std::io::Result<()> {
    for item in items {
        true.serialize(dest)?;
        item.serialize(dest)?;
    }
    false.serialize(dest)
}

/// Procedure numbers of the MOUNT protocol.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, FromPrimitive, ToPrimitive)]
pub enum MountProgram {
    MOUNTPROC3_NULL = 0,
    MOUNTPROC3_MNT = 1,
    MOUNTPROC3_DUMP = 2,
    MOUNTPROC3_UMNT = 3,
    MOUNTPROC3_UMNTALL = 4,
    MOUNTPROC3_EXPORT = 5,
    INVALID,
}
