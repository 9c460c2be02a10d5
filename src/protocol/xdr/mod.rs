//! XDR (External Data Representation, RFC 4506) encoding for the RPC, NFS
//! version 3, MOUNT and PORTMAP wire types.
//!
//! All integers are big-endian and every item is aligned to four bytes.
//! Variable-length items are decoded through [`read_bounded_opaque`], which
//! validates the length prefix against a caller-supplied maximum before any
//! proportional allocation happens. A length field above the limit turns into
//! `InvalidData`, which the dispatcher reports as `GARBAGE_ARGS`.

use std::io::{Read, Write};

use byteorder::BigEndian;
use byteorder::{ReadBytesExt, WriteBytesExt};

pub mod mount;
pub mod nfs3;
pub mod portmap;
pub mod rpc;

/// Endianness mandated by RFC 4506.
pub type XdrEndian = BigEndian;

/// XDR items are padded to multiples of four bytes.
pub const ALIGNMENT: usize = 4;

/// Upper bound applied to opaques whose type carries no tighter limit.
/// Anything larger than a maximum-size WRITE payload is malformed.
pub const DEFAULT_OPAQUE_LIMIT: u32 = 2 * 1024 * 1024;

/// Serialization half of the XDR codec.
pub trait Serialize {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

/// Deserialization half of the XDR codec.
///
/// Implementations decode into `&mut self` so that the struct macros can walk
/// fields in declaration order, mirroring the XDR struct layout.
pub trait Deserialize {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Decodes a value of type `T` from the stream.
pub fn deserialize<T: Deserialize + Default>(src: &mut impl Read) -> std::io::Result<T> {
    let mut value = T::default();
    value.deserialize(src)?;
    Ok(value)
}

pub fn invalid_data(m: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, m.into())
}

/// Consumes the padding that follows an item of `len` bytes. The padding
/// bytes must be present in the input.
pub fn read_padding(len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut pad: [u8; ALIGNMENT] = Default::default();
    src.read_exact(&mut pad[..(ALIGNMENT - len % ALIGNMENT) % ALIGNMENT])
}

/// Writes zero padding after an item of `len` bytes.
pub fn write_padding(len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    let pad: [u8; ALIGNMENT] = Default::default();
    dest.write_all(&pad[..(ALIGNMENT - len % ALIGNMENT) % ALIGNMENT])
}

/// Reads a variable-length opaque with an explicit maximum.
///
/// The length prefix is validated before the body is touched; the buffer
/// grows with the bytes actually read, so a hostile length field cannot
/// force a large allocation.
pub fn read_bounded_opaque(src: &mut impl Read, max: u32) -> std::io::Result<Vec<u8>> {
    let length = deserialize::<u32>(src)?;
    if length > max {
        return Err(invalid_data(format!("opaque length {length} exceeds limit {max}")));
    }
    let mut data = Vec::new();
    src.take(u64::from(length)).read_to_end(&mut data)?;
    if data.len() != length as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "opaque body shorter than its length prefix",
        ));
    }
    read_padding(length as usize, src)?;
    Ok(data)
}

/// Writes a variable-length opaque with its length prefix and padding.
pub fn write_opaque(data: &[u8], dest: &mut impl Write) -> std::io::Result<()> {
    debug_assert!(data.len() < u32::MAX as usize);
    (data.len() as u32).serialize(dest)?;
    dest.write_all(data)?;
    write_padding(data.len(), dest)
}

impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XdrEndian>(u32::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XdrEndian>()? > 0;
        Ok(())
    }
}

impl Serialize for i32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XdrEndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i32::<XdrEndian>()?;
        Ok(())
    }
}

impl Serialize for u32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XdrEndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XdrEndian>()?;
        Ok(())
    }
}

impl Serialize for i64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i64::<XdrEndian>(*self)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i64::<XdrEndian>()?;
        Ok(())
    }
}

impl Serialize for u64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u64::<XdrEndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XdrEndian>()?;
        Ok(())
    }
}

/// Fixed-size opaques carry no length prefix; all fixed sizes used by the
/// implemented protocols are multiples of four, so no padding either.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)
    }
}

impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)
    }
}

impl Serialize for Vec<u8> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(self, dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = read_bounded_opaque(src, DEFAULT_OPAQUE_LIMIT)?;
        Ok(())
    }
}

/// Counted array of 32-bit integers (auth gid lists, auth flavor lists).
impl Serialize for Vec<u32> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        debug_assert!(self.len() < u32::MAX as usize);
        (self.len() as u32).serialize(dest)?;
        for item in self {
            item.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for Vec<u32> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<u32>(src)?;
        // RFC 5531 caps the auth gid list at 16 entries; nothing else in the
        // implemented protocols carries a longer integer array.
        if length > 64 {
            return Err(invalid_data(format!("integer array length {length} exceeds limit")));
        }
        self.clear();
        for _ in 0..length {
            self.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// Implements [`Serialize`] for a struct by walking its fields in order.
#[macro_export]
macro_rules! SerializeStruct {
    ($t:ident, $($field:ident),* $(,)?) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                $(self.$field.serialize(dest)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Deserialize`] for a struct by walking its fields in order.
#[macro_export]
macro_rules! DeserializeStruct {
    ($t:ident, $($field:ident),* $(,)?) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                $(self.$field.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

/// Implements [`Serialize`] for a fieldless enum as its u32 discriminant.
#[macro_export]
macro_rules! SerializeEnum {
    ($t:ident) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                (*self as u32).serialize(dest)
            }
        }
    };
}

/// Implements [`Deserialize`] for a fieldless enum, rejecting discriminants
/// outside the defined set.
#[macro_export]
macro_rules! DeserializeEnum {
    ($t:ident) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                let raw = $crate::protocol::xdr::deserialize::<u32>(src)?;
                match FromPrimitive::from_u32(raw) {
                    Some(value) => {
                        *self = value;
                        Ok(())
                    }
                    None => Err($crate::protocol::xdr::invalid_data(format!(
                        "invalid discriminant {} for {}",
                        raw,
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}

/// Implements the codec for the common XDR union `bool ? T : void`.
#[macro_export]
macro_rules! SerializeBoolUnion {
    ($t:ident, $case:ident, $inner:ty) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
                match self {
                    $t::Void => false.serialize(dest),
                    $t::$case(v) => {
                        true.serialize(dest)?;
                        v.serialize(dest)
                    }
                }
            }
        }
    };
}

#[macro_export]
macro_rules! DeserializeBoolUnion {
    ($t:ident, $case:ident, $inner:ty) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
                if $crate::protocol::xdr::deserialize::<bool>(src)? {
                    *self = $t::$case($crate::protocol::xdr::deserialize::<$inner>(src)?);
                } else {
                    *self = $t::Void;
                }
                Ok(())
            }
        }
    };
}

pub use crate::{
    DeserializeBoolUnion, DeserializeEnum, DeserializeStruct, SerializeBoolUnion, SerializeEnum,
    SerializeStruct,
};
