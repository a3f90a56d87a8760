use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

use broadcast_relay::client::{ClientId, ClientRegistry};
use broadcast_relay::{Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(3);

// Start a server on an ephemeral port and return its address and registry
async fn start_test_server(config: ServerConfig) -> (SocketAddr, Arc<ClientRegistry>) {
    let server = Server::bind(ServerConfig { port: 0, ..config })
        .await
        .expect("server failed to bind");
    let addr = server.local_addr().unwrap();
    let registry = server.registry();

    tokio::spawn(async move { server.run().await });

    (addr, registry)
}

// Wait until the registry holds exactly `count` clients
async fn wait_for_clients(registry: &ClientRegistry, count: usize) {
    let waited = timeout(WAIT, async {
        while registry.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(
        waited.is_ok(),
        "expected {count} clients, registry holds {}",
        registry.len()
    );
}

// Connect a client and wait until the server has registered it
async fn connect(addr: SocketAddr, registry: &ClientRegistry) -> TcpStream {
    let expected = registry.len() + 1;
    let stream = TcpStream::connect(addr).await.expect("failed to connect");
    wait_for_clients(registry, expected).await;
    stream
}

async fn expect_payload(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("payload not delivered in time")
        .expect("read failed");
    assert_eq!(buf, expected);
}

// Read until the stream ends with `marker`; earlier relayed bytes are skipped
async fn expect_trailing(stream: &mut TcpStream, marker: &[u8]) {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    let waited = timeout(WAIT, async {
        while !received.ends_with(marker) {
            let n = stream.read(&mut buf).await.expect("read failed");
            assert!(n > 0, "connection closed before {marker:?} arrived");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await;
    assert!(waited.is_ok(), "never received {marker:?}, got {received:?}");
}

// Count bytes until `total` have arrived or the stream ends
async fn drain<R: AsyncRead + Unpin>(mut reader: R, total: usize) -> usize {
    let mut received = 0;
    let mut buf = vec![0u8; 64 * 1024];
    while received < total {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received += n,
        }
    }
    received
}

// Connect until the server admits the client; a refused attempt is closed at once
async fn connect_when_admitted(addr: SocketAddr, registry: &ClientRegistry) -> TcpStream {
    let deadline = Instant::now() + WAIT;
    let expected = registry.len() + 1;

    while Instant::now() < deadline {
        let mut stream = TcpStream::connect(addr).await.expect("failed to connect");
        let registered = timeout(Duration::from_millis(100), async {
            while registry.len() != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        if registered.is_ok() {
            return stream;
        }

        let mut buf = [0u8; 1];
        let _ = timeout(Duration::from_millis(100), stream.read(&mut buf)).await;
    }

    panic!("client was never admitted");
}

async fn expect_silence(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected data: {read:?}");
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected data: {read:?}");
}

// Drop a client with SO_LINGER 0 so the server sees a reset
fn abort(stream: TcpStream) {
    let _ = stream.set_linger(Some(Duration::ZERO));
    drop(stream);
}

#[tokio::test]
async fn test_hello_world_scenario() {
    let (addr, registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(addr, &registry).await;
    let mut b = connect(addr, &registry).await;

    a.write_all(b"hello").await.unwrap();
    expect_payload(&mut a, b"hello").await;
    expect_payload(&mut b, b"hello").await;

    drop(b);
    wait_for_clients(&registry, 1).await;

    a.write_all(b"world").await.unwrap();
    expect_payload(&mut a, b"world").await;
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_broken_peer_does_not_block_others() {
    let (addr, registry) = start_test_server(ServerConfig::default()).await;

    let mut a = connect(addr, &registry).await;
    let mut b = connect(addr, &registry).await;
    let c = connect(addr, &registry).await;

    abort(c);

    a.write_all(b"payload").await.unwrap();
    expect_payload(&mut a, b"payload").await;
    expect_payload(&mut b, b"payload").await;

    wait_for_clients(&registry, 2).await;
}

#[tokio::test]
async fn test_stalled_reader_is_evicted() {
    const CHUNK: usize = 2048;
    const CHUNKS: usize = 8000;
    const TOTAL: usize = CHUNK * CHUNKS;

    let config = ServerConfig {
        write_timeout_ms: 300,
        ..ServerConfig::default()
    };
    let (addr, registry) = start_test_server(config).await;

    let a = connect(addr, &registry).await;
    let stalled = connect(addr, &registry).await;
    let c = connect(addr, &registry).await;
    let stalled_id = ClientId::new(2);
    assert!(registry.contains(stalled_id));

    let (a_reader, mut a_writer) = a.into_split();
    let a_drain = tokio::spawn(drain(a_reader, TOTAL));
    let c_drain = tokio::spawn(drain(c, TOTAL));

    // Far more than the socket buffers of a peer that never reads can hold
    let chunk = [b'x'; CHUNK];
    for _ in 0..CHUNKS {
        a_writer.write_all(&chunk).await.unwrap();
    }

    let c_received = timeout(Duration::from_secs(30), c_drain)
        .await
        .expect("c stopped receiving")
        .unwrap();
    assert_eq!(c_received, TOTAL);

    let a_received = timeout(Duration::from_secs(30), a_drain)
        .await
        .expect("sender stopped receiving")
        .unwrap();
    assert_eq!(a_received, TOTAL);

    assert!(!registry.contains(stalled_id));
    assert_eq!(registry.len(), 2);

    // Accepting still works after the eviction
    let _d = connect(addr, &registry).await;
    assert_eq!(registry.len(), 3);

    drop(stalled);
}

#[tokio::test]
async fn test_churn_leaves_only_survivors() {
    let (addr, registry) = start_test_server(ServerConfig::default()).await;

    let mut clients = Vec::new();
    for _ in 0..6 {
        clients.push(connect(addr, &registry).await);
    }

    // Abruptly drop every other client in the middle of sending
    let mut survivors = Vec::new();
    for (i, mut client) in clients.into_iter().enumerate() {
        if i % 2 == 0 {
            client.write_all(b"partial message, cut o").await.unwrap();
            abort(client);
        } else {
            survivors.push(client);
        }
    }
    wait_for_clients(&registry, 3).await;

    survivors[0].write_all(b"still alive").await.unwrap();
    for survivor in survivors.iter_mut() {
        expect_trailing(survivor, b"still alive").await;
    }
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn test_sender_exclusion() {
    let config = ServerConfig {
        echo_to_sender: false,
        ..ServerConfig::default()
    };
    let (addr, registry) = start_test_server(config).await;

    let mut a = connect(addr, &registry).await;
    let mut b = connect(addr, &registry).await;

    a.write_all(b"just for b").await.unwrap();
    expect_payload(&mut b, b"just for b").await;
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn test_per_sender_order_is_preserved() {
    let config = ServerConfig {
        read_chunk_size: 4,
        ..ServerConfig::default()
    };
    let (addr, registry) = start_test_server(config).await;

    let mut a = connect(addr, &registry).await;
    let mut b = connect(addr, &registry).await;

    // Larger than one chunk, so it is relayed as several payloads
    a.write_all(b"abcdefghij").await.unwrap();
    a.write_all(b"klmn").await.unwrap();

    expect_payload(&mut b, b"abcdefghijklmn").await;
    expect_payload(&mut a, b"abcdefghijklmn").await;
}

#[tokio::test]
async fn test_admission_limit() {
    let config = ServerConfig {
        max_clients: 1,
        ..ServerConfig::default()
    };
    let (addr, registry) = start_test_server(config).await;

    let a = connect(addr, &registry).await;

    let mut rejected = TcpStream::connect(addr).await.unwrap();
    expect_closed(&mut rejected).await;
    assert_eq!(registry.len(), 1);

    drop(a);
    wait_for_clients(&registry, 0).await;

    let mut c = connect_when_admitted(addr, &registry).await;
    c.write_all(b"admitted").await.unwrap();
    expect_payload(&mut c, b"admitted").await;
}

#[tokio::test]
async fn test_idle_client_is_disconnected() {
    let config = ServerConfig {
        idle_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let (addr, registry) = start_test_server(config).await;

    let mut a = connect(addr, &registry).await;

    expect_closed(&mut a).await;
    wait_for_clients(&registry, 0).await;
}
