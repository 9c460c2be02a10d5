//! ONC RPC version 2 message structures (RFC 5531, previously RFC 1057).
//!
//! Only the message framing types live here; record marking and dispatch are
//! in `protocol::rpc`.

#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;
use smallvec::SmallVec;

use super::*;

/// The RPC protocol version this server speaks.
pub const RPC_VERSION: u32 = 2;

/// Reasons an authentication attempt was rejected.
#[derive(Copy, Clone, Debug, Default, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Bad credential (seal broken).
    #[default]
    AUTH_BADCRED = 1,
    /// Client must begin a new session.
    AUTH_REJECTEDCRED = 2,
    /// Bad verifier (seal broken).
    AUTH_BADVERF = 3,
    /// Verifier expired or replayed.
    AUTH_REJECTEDVERF = 4,
    /// Rejected for security reasons.
    AUTH_TOOWEAK = 5,
}
SerializeEnum!(auth_stat);
DeserializeEnum!(auth_stat);

/// Authentication flavors defined by RFC 5531.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum auth_flavor {
    AUTH_NULL = 0,
    AUTH_UNIX = 1,
    AUTH_SHORT = 2,
    AUTH_DES = 3,
}
SerializeEnum!(auth_flavor);
DeserializeEnum!(auth_flavor);

/// Supplementary group list inside `auth_unix`; RFC 5531 caps it at 16
/// entries, so it almost always fits inline.
pub type gid_list = SmallVec<[u32; 16]>;

impl Serialize for gid_list {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        (self.len() as u32).serialize(dest)?;
        for gid in self {
            gid.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for gid_list {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let length = deserialize::<u32>(src)?;
        if length > 16 {
            return Err(invalid_data(format!("auth_unix carries {length} gids, limit is 16")));
        }
        self.clear();
        for _ in 0..length {
            self.push(deserialize(src)?);
        }
        Ok(())
    }
}

/// AUTH_UNIX (AUTH_SYS) credential body.
#[derive(Clone, Debug, Default)]
pub struct auth_unix {
    pub stamp: u32,
    /// Name of the caller's machine, bounded per RFC 5531.
    pub machinename: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
    pub gids: gid_list,
}

impl Serialize for auth_unix {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.stamp.serialize(dest)?;
        write_opaque(&self.machinename, dest)?;
        self.uid.serialize(dest)?;
        self.gid.serialize(dest)?;
        self.gids.serialize(dest)
    }
}

impl Deserialize for auth_unix {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.stamp.deserialize(src)?;
        self.machinename = read_bounded_opaque(src, 255)?;
        self.uid.deserialize(src)?;
        self.gid.deserialize(src)?;
        self.gids.deserialize(src)
    }
}

/// Flavor-tagged opaque authentication field. RFC 5531 bounds the body at
/// 400 bytes.
#[derive(Clone, Debug)]
pub struct opaque_auth {
    pub flavor: auth_flavor,
    pub body: Vec<u8>,
}

impl Default for opaque_auth {
    fn default() -> opaque_auth {
        opaque_auth { flavor: auth_flavor::AUTH_NULL, body: Vec::new() }
    }
}

impl Serialize for opaque_auth {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.flavor.serialize(dest)?;
        write_opaque(&self.body, dest)
    }
}

impl Deserialize for opaque_auth {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.flavor.deserialize(src)?;
        self.body = read_bounded_opaque(src, 400)?;
        Ok(())
    }
}

/// A complete RPC message: transaction id plus call or reply body.
///
/// The xid only matches calls with replies; it is not a sequence number.
#[derive(Clone, Debug, Default)]
pub struct rpc_msg {
    pub xid: u32,
    pub body: rpc_body,
}
DeserializeStruct!(rpc_msg, xid, body);
SerializeStruct!(rpc_msg, xid, body);

#[derive(Clone, Debug)]
pub enum rpc_body {
    CALL(call_body),
    REPLY(reply_body),
}

impl Default for rpc_body {
    fn default() -> rpc_body {
        rpc_body::CALL(call_body::default())
    }
}

impl Serialize for rpc_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rpc_body::CALL(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            rpc_body::REPLY(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rpc_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rpc_body::CALL(deserialize(src)?),
            1 => *self = rpc_body::REPLY(deserialize(src)?),
            msg_type => {
                return Err(invalid_data(format!("invalid rpc message type {msg_type}")));
            }
        }
        Ok(())
    }
}

/// Body of an RPC call: target program coordinates plus credentials.
#[derive(Clone, Debug, Default)]
pub struct call_body {
    /// Must be [`RPC_VERSION`].
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: opaque_auth,
    pub verf: opaque_auth,
    // procedure-specific arguments follow on the wire
}
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

#[derive(Clone, Debug)]
pub enum reply_body {
    MSG_ACCEPTED(accepted_reply),
    MSG_DENIED(rejected_reply),
}

impl Default for reply_body {
    fn default() -> reply_body {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

impl Serialize for reply_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            reply_body::MSG_ACCEPTED(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            reply_body::MSG_DENIED(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for reply_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = reply_body::MSG_ACCEPTED(deserialize(src)?),
            1 => *self = reply_body::MSG_DENIED(deserialize(src)?),
            status => {
                return Err(invalid_data(format!("invalid reply status {status}")));
            }
        }
        Ok(())
    }
}

/// Version range reported on program or RPC version mismatches.
#[derive(Clone, Debug, Default)]
pub struct mismatch_info {
    pub low: u32,
    pub high: u32,
}
DeserializeStruct!(mismatch_info, low, high);
SerializeStruct!(mismatch_info, low, high);

/// Reply to a call the server accepted. The call may still have failed; the
/// union inside tells the caller how.
#[derive(Clone, Debug, Default)]
pub struct accepted_reply {
    pub verf: opaque_auth,
    pub reply_data: accept_body,
}
DeserializeStruct!(accepted_reply, verf, reply_data);
SerializeStruct!(accepted_reply, verf, reply_data);

#[derive(Clone, Debug, Default)]
pub enum accept_body {
    /// Procedure-specific results follow on the wire.
    #[default]
    SUCCESS,
    PROG_UNAVAIL,
    PROG_MISMATCH(mismatch_info),
    PROC_UNAVAIL,
    /// The server could not decode the arguments.
    GARBAGE_ARGS,
}

impl Serialize for accept_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            accept_body::SUCCESS => 0_u32.serialize(dest),
            accept_body::PROG_UNAVAIL => 1_u32.serialize(dest),
            accept_body::PROG_MISMATCH(v) => {
                2_u32.serialize(dest)?;
                v.serialize(dest)
            }
            accept_body::PROC_UNAVAIL => 3_u32.serialize(dest),
            accept_body::GARBAGE_ARGS => 4_u32.serialize(dest),
        }
    }
}

impl Deserialize for accept_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = accept_body::SUCCESS,
            1 => *self = accept_body::PROG_UNAVAIL,
            2 => *self = accept_body::PROG_MISMATCH(deserialize(src)?),
            3 => *self = accept_body::PROC_UNAVAIL,
            4 => *self = accept_body::GARBAGE_ARGS,
            stat => {
                return Err(invalid_data(format!("invalid accept_stat {stat}")));
            }
        }
        Ok(())
    }
}

/// Reply to a call the server refused outright: either the RPC version is
/// unsupported or authentication failed.
#[derive(Clone, Debug)]
pub enum rejected_reply {
    RPC_MISMATCH(mismatch_info),
    AUTH_ERROR(auth_stat),
}

impl Default for rejected_reply {
    fn default() -> rejected_reply {
        rejected_reply::AUTH_ERROR(auth_stat::default())
    }
}

impl Serialize for rejected_reply {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rejected_reply::RPC_MISMATCH(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            rejected_reply::AUTH_ERROR(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rejected_reply {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rejected_reply::RPC_MISMATCH(deserialize(src)?),
            1 => *self = rejected_reply::AUTH_ERROR(deserialize(src)?),
            stat => {
                return Err(invalid_data(format!("invalid reject_stat {stat}")));
            }
        }
        Ok(())
    }
}

/// Reply builder for a successfully accepted call; procedure results are
/// appended after it.
pub fn make_success_reply(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::SUCCESS)
}

pub fn prog_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::PROG_UNAVAIL)
}

pub fn proc_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::PROC_UNAVAIL)
}

pub fn garbage_args_reply_message(xid: u32) -> rpc_msg {
    accepted(xid, accept_body::GARBAGE_ARGS)
}

pub fn prog_mismatch_reply_message(xid: u32, accepted_ver: u32) -> rpc_msg {
    accepted(
        xid,
        accept_body::PROG_MISMATCH(mismatch_info { low: accepted_ver, high: accepted_ver }),
    )
}

pub fn rpc_vers_mismatch(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(mismatch_info {
        low: RPC_VERSION,
        high: RPC_VERSION,
    }));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

pub fn auth_error_reply_message(xid: u32, stat: auth_stat) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

fn accepted(xid: u32, reply_data: accept_body) -> rpc_msg {
    let reply =
        reply_body::MSG_ACCEPTED(accepted_reply { verf: opaque_auth::default(), reply_data });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}
