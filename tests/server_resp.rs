//! Wire-level tests: a real server on an ephemeral port, raw RESP frames.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use tanoak::config::ServerConfig;
use tanoak::consensus::LocalConsensus;
use tanoak::machine::SqlMachine;
use tanoak::server::Server;
use tempfile::TempDir;

/// Parsed wire reply, shaped for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Wire {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(String),
    Nil,
    Array(Vec<Wire>),
}

struct TestServer {
    _dir: TempDir,
    addr: std::net::SocketAddr,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start(auth: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let machine = Arc::new(SqlMachine::open(dir.path(), 4).unwrap());
        let consensus = Arc::new(LocalConsensus::new(Arc::clone(&machine)));
        let config = ServerConfig {
            auth: auth.map(str::to_string),
            ..ServerConfig::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            let server = Server::new(config, machine, consensus);
            let _ = server.run(listener, server_cancel).await;
        });
        Self { _dir: dir, addr, cancel }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send(stream: &mut TcpStream, args: &[&str]) {
    let mut out = format!("*{}\r\n", args.len());
    for arg in args {
        out.push_str(&format!("${}\r\n{arg}\r\n", arg.len()));
    }
    stream.write_all(out.as_bytes()).await.unwrap();
}

async fn read_line(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await.unwrap();
        if byte == b'\n' {
            break;
        }
        if byte != b'\r' {
            line.push(byte);
        }
    }
    String::from_utf8(line).unwrap()
}

async fn read_reply(stream: &mut TcpStream) -> Wire {
    let line = read_line(stream).await;
    let (kind, rest) = line.split_at(1);
    match kind {
        "+" => Wire::Simple(rest.to_string()),
        "-" => Wire::Error(rest.to_string()),
        ":" => Wire::Integer(rest.parse().unwrap()),
        "$" => {
            let len: i64 = rest.parse().unwrap();
            if len < 0 {
                return Wire::Nil;
            }
            let mut body = vec![0u8; len as usize + 2];
            stream.read_exact(&mut body).await.unwrap();
            body.truncate(len as usize);
            Wire::Bulk(String::from_utf8(body).unwrap())
        }
        "*" => {
            let len: usize = rest.parse().unwrap();
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(Box::pin(read_reply(stream)).await);
            }
            Wire::Array(items)
        }
        other => panic!("unexpected reply type {other:?}"),
    }
}

async fn roundtrip(stream: &mut TcpStream, args: &[&str]) -> Wire {
    send(stream, args).await;
    read_reply(stream).await
}

#[tokio::test]
async fn test_ping_version_quit() {
    let server = TestServer::start(None).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();

    assert_eq!(roundtrip(&mut conn, &["PING"]).await, Wire::Simple("PONG".into()));
    assert_eq!(
        roundtrip(&mut conn, &["PING", "hello"]).await,
        Wire::Bulk("hello".into())
    );
    match roundtrip(&mut conn, &["VERSION"]).await {
        Wire::Bulk(v) => assert!(!v.is_empty()),
        other => panic!("expected bulk version, got {other:?}"),
    }
    assert_eq!(roundtrip(&mut conn, &["QUIT"]).await, Wire::Simple("OK".into()));
}

#[tokio::test]
async fn test_sql_over_the_wire() {
    let server = TestServer::start(None).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();

    let reply = roundtrip(&mut conn, &["CREATE TABLE t(a INT)"]).await;
    assert_eq!(reply, Wire::Array(vec![Wire::Array(vec![])]));

    roundtrip(&mut conn, &["INSERT", "INTO t VALUES (1),(2)"]).await;
    let reply = roundtrip(&mut conn, &["SELECT a FROM t ORDER BY a"]).await;
    assert_eq!(
        reply,
        Wire::Array(vec![Wire::Array(vec![
            Wire::Array(vec![Wire::Bulk("a".into())]),
            Wire::Array(vec![Wire::Bulk("1".into())]),
            Wire::Array(vec![Wire::Bulk("2".into())]),
        ])])
    );
}

#[tokio::test]
async fn test_inline_commands() {
    let server = TestServer::start(None).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();
    conn.write_all(b"PING\r\n").await.unwrap();
    assert_eq!(read_reply(&mut conn).await, Wire::Simple("PONG".into()));
}

#[tokio::test]
async fn test_errors_carry_wire_prefix() {
    let server = TestServer::start(None).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();

    match roundtrip(&mut conn, &["FROB", "it"]).await {
        Wire::Error(msg) => assert_eq!(msg, "ERR near \"frob\": syntax error"),
        other => panic!("expected error, got {other:?}"),
    }

    // The connection survives an error reply.
    assert_eq!(roundtrip(&mut conn, &["PING"]).await, Wire::Simple("PONG".into()));
}

#[tokio::test]
async fn test_internal_primitives_are_rejected() {
    let server = TestServer::start(None).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();
    match roundtrip(&mut conn, &["$EXEC", "[\"SELECT 1\"]"]).await {
        Wire::Error(msg) => assert!(msg.starts_with("ERR unknown command"), "{msg}"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_proc_over_the_wire() {
    let server = TestServer::start(None).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();

    assert_eq!(roundtrip(&mut conn, &["PROC", "GET", "missing"]).await, Wire::Nil);

    // Top level, where `arguments` is the host-provided array.
    let script = "arguments.length;";
    assert_eq!(
        roundtrip(&mut conn, &["PROC", "SET", "argc", script]).await,
        Wire::Simple("OK".into())
    );
    assert_eq!(
        roundtrip(&mut conn, &["PROC", "GET", "argc"]).await,
        Wire::Bulk(script.into())
    );
    assert_eq!(
        roundtrip(&mut conn, &["PROC", "LIST"]).await,
        Wire::Array(vec![Wire::Bulk("argc".into())])
    );
    assert_eq!(
        roundtrip(&mut conn, &["PROC", "EXEC", "argc", "x", "y"]).await,
        Wire::Integer(2)
    );
    assert_eq!(
        roundtrip(&mut conn, &["PROC", "DELETE", "argc"]).await,
        Wire::Simple("OK".into())
    );
    assert_eq!(roundtrip(&mut conn, &["PROC", "GET", "argc"]).await, Wire::Nil);

    match roundtrip(&mut conn, &["PROC", "BOGUS"]).await {
        Wire::Error(msg) => assert!(msg.contains("try PROC HELP"), "{msg}"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_auth_gate() {
    let server = TestServer::start(Some("sekrit")).await;
    let mut conn = TcpStream::connect(server.addr).await.unwrap();

    match roundtrip(&mut conn, &["PING"]).await {
        Wire::Error(msg) => assert_eq!(msg, "ERR authentication required"),
        other => panic!("expected error, got {other:?}"),
    }
    match roundtrip(&mut conn, &["AUTH", "wrong"]).await {
        Wire::Error(msg) => assert_eq!(msg, "ERR unauthorized"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(roundtrip(&mut conn, &["AUTH", "sekrit"]).await, Wire::Simple("OK".into()));
    assert_eq!(roundtrip(&mut conn, &["PING"]).await, Wire::Simple("PONG".into()));
}

#[tokio::test]
async fn test_concurrent_readers_during_writes() {
    let server = TestServer::start(None).await;
    let mut seed = TcpStream::connect(server.addr).await.unwrap();
    roundtrip(&mut seed, &["CREATE TABLE t(a INT)"]).await;
    roundtrip(&mut seed, &["INSERT INTO t VALUES (1)"]).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            if i % 2 == 0 {
                for _ in 0..10 {
                    let reply = roundtrip(&mut conn, &["SELECT COUNT(*) FROM t"]).await;
                    assert!(matches!(reply, Wire::Array(_)), "{reply:?}");
                }
            } else {
                for _ in 0..10 {
                    let reply = roundtrip(&mut conn, &["INSERT INTO t VALUES (1)"]).await;
                    assert!(matches!(reply, Wire::Array(_)), "{reply:?}");
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let reply = roundtrip(&mut seed, &["SELECT COUNT(*) FROM t"]).await;
    assert_eq!(
        reply,
        Wire::Array(vec![Wire::Array(vec![
            Wire::Array(vec![Wire::Bulk("COUNT(*)".into())]),
            Wire::Array(vec![Wire::Bulk("41".into())]),
        ])])
    );
}
