//! Loopback fixtures shared by the end-to-end tests.

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Minimal anonymous SOCKS5 server.
///
/// Every CONNECT is answered with success and the handshaken stream is sent
/// to the test together with the requested `host:port`; the test then plays
/// the target side.
pub async fn spawn_socks_stub() -> (SocketAddr, mpsc::UnboundedReceiver<(String, TcpStream)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let target = socks_handshake(&mut stream).await;
                let _ = tx.send((target, stream));
            });
        }
    });

    (addr, rx)
}

async fn socks_handshake(s: &mut TcpStream) -> String {
    // VER NMETHODS METHODS
    let mut head = [0u8; 2];
    s.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);
    let mut methods = vec![0u8; head[1] as usize];
    s.read_exact(&mut methods).await.unwrap();
    assert!(methods.contains(&0x00), "client must offer no-auth");
    s.write_all(&[0x05, 0x00]).await.unwrap();

    // VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut req = [0u8; 4];
    s.read_exact(&mut req).await.unwrap();
    assert_eq!(req[..3], [0x05, 0x01, 0x00]);
    let host = match req[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            s.read_exact(&mut ip).await.unwrap();
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let len = s.read_u8().await.unwrap();
            let mut name = vec![0u8; len as usize];
            s.read_exact(&mut name).await.unwrap();
            String::from_utf8(name).unwrap()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            s.read_exact(&mut ip).await.unwrap();
            format!("[{}]", std::net::Ipv6Addr::from(ip))
        }
        other => panic!("unexpected address type {other:#x}"),
    };
    let port = s.read_u16().await.unwrap();

    s.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    format!("{host}:{port}")
}

/// Read an HTTP message head up to and including the blank line
pub async fn read_head<R: AsyncRead + Unpin>(r: &mut R) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = r.read_u8().await.expect("connection closed inside head");
        head.push(byte);
    }
    String::from_utf8(head).unwrap()
}

/// Read a response head and its Content-Length delimited body
pub async fn read_response<R: AsyncRead + Unpin>(r: &mut R) -> (String, Vec<u8>) {
    let head = read_head(r).await;
    let len = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await.unwrap();
    (head, body)
}
