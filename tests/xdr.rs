//! XDR codec tests: serialize/deserialize bijection for the primitive and
//! protocol types, and bounded decoding of hostile inputs.

use std::fmt::Debug;
use std::io::Cursor;

use nfs_bridge::xdr::{
    self, deserialize, nfs3, read_bounded_opaque, Deserialize, Serialize,
};

fn roundtrip<T: Serialize + Deserialize + Default>(value: &T) -> T {
    let mut buf = Vec::new();
    value.serialize(&mut buf).expect("serialize");
    assert_eq!(buf.len() % 4, 0, "XDR output must be 4-byte aligned");
    deserialize::<T>(&mut Cursor::new(buf)).expect("deserialize")
}

fn check<T: Serialize + Deserialize + Default + PartialEq + Debug>(value: T) {
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn scalar_bijection() {
    check(false);
    check(true);
    check(0u32);
    check(u32::MAX);
    check(i32::MIN);
    check(0u64);
    check(u64::MAX);
    check(i64::MIN);
}

#[test]
fn opaque_bijection_with_padding() {
    for len in 0..9 {
        let value: Vec<u8> = (0..len).map(|i| i as u8).collect();
        check(value);
    }
}

#[test]
fn nfsstring_bijection() {
    check(nfs3::nfsstring::from("hello.txt"));
    check(nfs3::nfsstring::from(""));
    check(nfs3::nfsstring::from("päth/with/ütf8"));
}

#[test]
fn fattr3_bijection() {
    let attr = nfs3::fattr3 {
        ftype: nfs3::ftype3::NF3LNK,
        mode: 0o644,
        nlink: 3,
        uid: 1000,
        gid: 100,
        size: 4096,
        used: 8192,
        rdev: nfs3::specdata3 { specdata1: 8, specdata2: 1 },
        fsid: 7,
        fileid: 42,
        atime: nfs3::nfstime3 { seconds: 1, nseconds: 2 },
        mtime: nfs3::nfstime3 { seconds: 3, nseconds: 4 },
        ctime: nfs3::nfstime3 { seconds: 5, nseconds: 6 },
    };
    check(attr);
}

#[test]
fn file_handle_bijection_and_bound() {
    check(nfs3::nfs_fh3 { data: vec![7u8; 32] });
    check(nfs3::nfs_fh3 { data: vec![] });

    // A handle longer than NFS3_FHSIZE must fail to decode.
    let oversized = nfs3::nfs_fh3 { data: vec![0u8; 65] };
    let mut buf = Vec::new();
    oversized.serialize(&mut buf).unwrap();
    assert!(deserialize::<nfs3::nfs_fh3>(&mut Cursor::new(buf)).is_err());
}

#[test]
fn hostile_length_prefix_is_rejected() {
    // Length field claims 2 GiB with a four-byte body.
    let mut buf = Vec::new();
    (0x7fff_ffff_u32).serialize(&mut buf).unwrap();
    buf.extend_from_slice(&[1, 2, 3, 4]);
    let err = deserialize::<Vec<u8>>(&mut Cursor::new(buf)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn truncated_opaque_is_rejected() {
    let mut buf = Vec::new();
    8u32.serialize(&mut buf).unwrap();
    buf.extend_from_slice(&[1, 2, 3]);
    assert!(read_bounded_opaque(&mut Cursor::new(buf), 64).is_err());
}

#[test]
fn missing_padding_is_rejected() {
    // Opaque of length 1 followed by nothing: the three padding bytes are
    // part of the wire format and must be present.
    let mut buf = Vec::new();
    1u32.serialize(&mut buf).unwrap();
    buf.push(0xaa);
    assert!(read_bounded_opaque(&mut Cursor::new(buf), 64).is_err());
}

#[test]
fn invalid_enum_discriminant_is_rejected() {
    let mut buf = Vec::new();
    999u32.serialize(&mut buf).unwrap();
    assert!(deserialize::<nfs3::ftype3>(&mut Cursor::new(buf)).is_err());
}

#[test]
fn sattr3_roundtrip_preserves_unions() {
    let sattr = nfs3::sattr3 {
        mode: nfs3::set_mode3::mode(0o600),
        uid: nfs3::set_uid3::Void,
        gid: nfs3::set_gid3::gid(12),
        size: nfs3::set_size3::size(99),
        atime: nfs3::set_atime::SET_TO_SERVER_TIME,
        mtime: nfs3::set_mtime::SET_TO_CLIENT_TIME(nfs3::nfstime3 { seconds: 9, nseconds: 1 }),
    };
    let mut buf = Vec::new();
    sattr.serialize(&mut buf).unwrap();
    let back = deserialize::<nfs3::sattr3>(&mut Cursor::new(buf)).unwrap();
    assert!(matches!(back.mode, nfs3::set_mode3::mode(0o600)));
    assert!(matches!(back.uid, nfs3::set_uid3::Void));
    assert!(matches!(back.gid, nfs3::set_gid3::gid(12)));
    assert!(matches!(back.size, nfs3::set_size3::size(99)));
    assert!(matches!(back.atime, nfs3::set_atime::SET_TO_SERVER_TIME));
    assert!(matches!(
        back.mtime,
        nfs3::set_mtime::SET_TO_CLIENT_TIME(nfs3::nfstime3 { seconds: 9, nseconds: 1 })
    ));
}

#[test]
fn rpc_message_bijection() {
    let msg = xdr::rpc::rpc_msg {
        xid: 77,
        body: xdr::rpc::rpc_body::CALL(xdr::rpc::call_body {
            rpcvers: 2,
            prog: 100003,
            vers: 3,
            proc: 1,
            cred: xdr::rpc::opaque_auth::default(),
            verf: xdr::rpc::opaque_auth::default(),
        }),
    };
    let mut buf = Vec::new();
    msg.serialize(&mut buf).unwrap();
    let back = deserialize::<xdr::rpc::rpc_msg>(&mut Cursor::new(buf)).unwrap();
    assert_eq!(back.xid, 77);
    match back.body {
        xdr::rpc::rpc_body::CALL(call) => {
            assert_eq!(call.prog, 100003);
            assert_eq!(call.vers, 3);
            assert_eq!(call.proc, 1);
        }
        _ => panic!("expected a CALL body"),
    }
}

#[test]
fn auth_unix_gid_list_is_bounded() {
    let mut buf = Vec::new();
    0u32.serialize(&mut buf).unwrap(); // stamp
    xdr::write_opaque(b"host", &mut buf).unwrap();
    0u32.serialize(&mut buf).unwrap(); // uid
    0u32.serialize(&mut buf).unwrap(); // gid
    17u32.serialize(&mut buf).unwrap(); // 17 gids: one too many
    for _ in 0..17 {
        0u32.serialize(&mut buf).unwrap();
    }
    assert!(deserialize::<xdr::rpc::auth_unix>(&mut Cursor::new(buf)).is_err());
}
