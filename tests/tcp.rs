//! Connection-manager tests over real sockets: record-marked framing end
//! to end, allow-list rejection and the connection cap.

mod support;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use nfs_bridge::config::ExportOptions;
use nfs_bridge::tcp::{NfsTcp, NfsTcpListener};
use support::*;

async fn start_server(options: ExportOptions) -> std::sync::Arc<NfsTcpListener> {
    let listener =
        NfsTcpListener::bind("127.0.0.1:0", MemFs::new(), EXPORT, options).await.unwrap();
    let listener = std::sync::Arc::new(listener);
    let serving = listener.clone();
    tokio::spawn(async move {
        let _ = serving.handle_forever().await;
    });
    listener
}

async fn send_record(stream: &mut TcpStream, record: &[u8]) {
    let header = (record.len() as u32) | (1 << 31);
    stream.write_all(&header.to_be_bytes()).await.unwrap();
    stream.write_all(record).await.unwrap();
}

async fn read_record(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let len = (u32::from_be_bytes(header) & ((1 << 31) - 1)) as usize;
    let mut record = vec![0u8; len];
    stream.read_exact(&mut record).await.unwrap();
    record
}

#[tokio::test]
async fn null_call_roundtrips_over_tcp() {
    let server = start_server(ExportOptions::default()).await;
    let port = server.get_listen_port();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let xid = next_xid();
    send_record(&mut stream, &build_call(xid, 100003, 3, 0, &[])).await;
    let reply = read_record(&mut stream).await;
    let (reply_xid, body) = accepted_body(&reply);
    assert_eq!(reply_xid, xid);
    assert!(body.is_empty());

    server.unexport().await;
}

#[tokio::test]
async fn requests_on_one_connection_reply_in_order() {
    let server = start_server(ExportOptions::default()).await;
    let port = server.get_listen_port();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let xids: Vec<u32> = (0..8).map(|_| next_xid()).collect();
    for &xid in &xids {
        send_record(&mut stream, &build_call(xid, 100003, 3, 0, &[])).await;
    }
    for &xid in &xids {
        let reply = read_record(&mut stream).await;
        let (reply_xid, _) = accepted_body(&reply);
        assert_eq!(reply_xid, xid);
    }

    server.unexport().await;
}

#[tokio::test]
async fn allow_list_rejects_before_any_protocol_bytes() {
    let mut options = ExportOptions::default();
    // Loopback is not in the list.
    options.allowed_ips = vec!["198.51.100.0/24".parse().unwrap()];
    let server = start_server(options).await;
    let port = server.get_listen_port();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    // The server closes without reading any protocol bytes.
    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("connection should be closed promptly")
        .unwrap();
    assert_eq!(read, 0, "rejected connection must be closed, not served");
    assert_eq!(server.stats().rejected_connections, 1);

    server.unexport().await;
}

#[tokio::test]
async fn connection_cap_refuses_excess_connections() {
    let options = ExportOptions { max_connections: 1, ..ExportOptions::default() };
    let server = start_server(options).await;
    let port = server.get_listen_port();

    let mut first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    // Prove the first connection is live before the second arrives.
    send_record(&mut first, &build_call(next_xid(), 100003, 3, 0, &[])).await;
    let _ = read_record(&mut first).await;

    let mut second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
        .await
        .expect("excess connection should be closed promptly")
        .unwrap();
    assert_eq!(read, 0);

    server.unexport().await;
}
