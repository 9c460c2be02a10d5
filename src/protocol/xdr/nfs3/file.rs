//! XDR structures for the file-content procedures: READ, WRITE, CREATE,
//! COMMIT and LINK (RFC 1813 sections 3.3.6–3.3.8, 3.3.15, 3.3.21).

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use super::*;

/// Arguments of READ.
#[derive(Clone, Debug, Default)]
pub struct READ3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
}
DeserializeStruct!(READ3args, file, offset, count);
SerializeStruct!(READ3args, file, offset, count);

/// Successful READ result.
#[derive(Clone, Debug, Default)]
pub struct READ3resok {
    pub file_attributes: post_op_attr,
    pub count: count3,
    /// True when the read reached end of file.
    pub eof: bool,
    pub data: Vec<u8>,
}
DeserializeStruct!(READ3resok, file_attributes, count, eof, data);
SerializeStruct!(READ3resok, file_attributes, count, eof, data);

/// Write stability requested by the client and honored in the reply.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum stable_how {
    /// The server may reply before data reaches stable storage; the client
    /// must COMMIT later.
    #[default]
    UNSTABLE = 0,
    /// The data of this request must be stable before replying.
    DATA_SYNC = 1,
    /// Data and metadata must be stable before replying.
    FILE_SYNC = 2,
}
SerializeEnum!(stable_how);
DeserializeEnum!(stable_how);

/// Arguments of WRITE.
#[derive(Clone, Debug, Default)]
pub struct WRITE3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
    pub stable: stable_how,
    pub data: Vec<u8>,
}
DeserializeStruct!(WRITE3args, file, offset, count, stable, data);
SerializeStruct!(WRITE3args, file, offset, count, stable, data);

/// Successful WRITE result.
#[derive(Clone, Debug, Default)]
pub struct WRITE3resok {
    pub file_wcc: wcc_data,
    pub count: count3,
    pub committed: stable_how,
    /// Changes when the server restarts, telling clients to re-send
    /// uncommitted writes.
    pub verf: writeverf3,
}
DeserializeStruct!(WRITE3resok, file_wcc, count, committed, verf);
SerializeStruct!(WRITE3resok, file_wcc, count, committed, verf);

/// CREATE disposition union: attributes for UNCHECKED/GUARDED, a verifier
/// for EXCLUSIVE.
#[derive(Clone, Debug)]
pub enum createhow3 {
    UNCHECKED(sattr3),
    GUARDED(sattr3),
    EXCLUSIVE(createverf3),
}

impl Default for createhow3 {
    fn default() -> createhow3 {
        createhow3::UNCHECKED(sattr3::default())
    }
}

impl Serialize for createhow3 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            createhow3::UNCHECKED(attr) => {
                (createmode3::UNCHECKED as u32).serialize(dest)?;
                attr.serialize(dest)
            }
            createhow3::GUARDED(attr) => {
                (createmode3::GUARDED as u32).serialize(dest)?;
                attr.serialize(dest)
            }
            createhow3::EXCLUSIVE(verf) => {
                (createmode3::EXCLUSIVE as u32).serialize(dest)?;
                verf.serialize(dest)
            }
        }
    }
}

impl Deserialize for createhow3 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<createmode3>(src)? {
            createmode3::UNCHECKED => *self = createhow3::UNCHECKED(deserialize(src)?),
            createmode3::GUARDED => *self = createhow3::GUARDED(deserialize(src)?),
            createmode3::EXCLUSIVE => *self = createhow3::EXCLUSIVE(deserialize(src)?),
        }
        Ok(())
    }
}

/// Arguments of CREATE.
#[derive(Clone, Debug, Default)]
pub struct CREATE3args {
    pub dirops: diropargs3,
    pub how: createhow3,
}
DeserializeStruct!(CREATE3args, dirops, how);
SerializeStruct!(CREATE3args, dirops, how);

/// Arguments of COMMIT.
#[derive(Clone, Debug, Default)]
pub struct COMMIT3args {
    pub file: nfs_fh3,
    pub offset: offset3,
    pub count: count3,
}
DeserializeStruct!(COMMIT3args, file, offset, count);
SerializeStruct!(COMMIT3args, file, offset, count);

/// Successful COMMIT result.
#[derive(Clone, Debug, Default)]
pub struct COMMIT3resok {
    pub file_wcc: wcc_data,
    pub verf: writeverf3,
}
DeserializeStruct!(COMMIT3resok, file_wcc, verf);
SerializeStruct!(COMMIT3resok, file_wcc, verf);

/// Arguments of LINK.
#[derive(Clone, Debug, Default)]
pub struct LINK3args {
    pub file: nfs_fh3,
    pub link: diropargs3,
}
DeserializeStruct!(LINK3args, file, link);
SerializeStruct!(LINK3args, file, link);
