use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use bobbin::config::Config;
use bobbin::server::Server;

fn test_config(dir: &TempDir) -> Config {
    Config {
        port: 0,
        data: dir.path().to_path_buf(),
        ..Default::default()
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Stops accepting, waits for live connections to drain, and releases
    /// the data directory.
    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.expect("server task should not panic");
    }
}

async fn start_server(config: Config) -> TestServer {
    let server = Server::bind(&config).await.expect("server should bind");
    let addr = server.local_addr().expect("listener has an address");
    let (shutdown, rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        server
            .run(async {
                let _ = rx.await;
            })
            .await
            .expect("server should run until the test ends");
    });
    TestServer {
        addr,
        shutdown,
        handle,
    }
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect should succeed")
}

async fn send(client: &mut TcpStream, bytes: &[u8]) {
    client.write_all(bytes).await.expect("send should succeed");
}

/// Reads exactly as many bytes as `expected` and compares.
async fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    client
        .read_exact(&mut buf)
        .await
        .expect("reply should arrive");
    assert_eq!(
        buf,
        expected,
        "got {:?}, want {:?}",
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

/// Reads until the reply ends with `END\r\n`.
async fn read_until_end(client: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = client.read(&mut buf).await.expect("read should succeed");
        assert!(n > 0, "connection closed before END");
        out.extend_from_slice(&buf[..n]);
        if out.ends_with(b"END\r\n") {
            return String::from_utf8(out).expect("stats are ascii");
        }
    }
}

#[tokio::test]
async fn test_simple_set_get() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 5\r\nhello\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 5\r\nhello\r\nEND\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_timed_wait_success() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;

    let mut popper = connect(addr).await;
    let started = Instant::now();
    send(&mut popper, b"GET q/t=2000\r\n").await;

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut pusher = connect(addr).await;
        send(&mut pusher, b"SET q 0 0 3\r\nhey\r\n").await;
        expect_reply(&mut pusher, b"STORED\r\n").await;
    });

    expect_reply(&mut popper, b"VALUE q 0 3\r\nhey\r\nEND\r\n").await;
    assert!(
        started.elapsed() < Duration::from_millis(2000),
        "the push should resolve the wait well before the deadline"
    );
}

#[tokio::test]
async fn test_timed_wait_timeout() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    let started = Instant::now();
    send(&mut client, b"GET q/t=50\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
    assert!(
        started.elapsed() >= Duration::from_millis(45),
        "an empty queue should hold the pop until the deadline"
    );
}

#[tokio::test]
async fn test_reserve_and_return() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 2\r\nok\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q/open\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 2\r\nok\r\nEND\r\n").await;

    send(&mut client, b"GET q/abort\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;

    // the aborted item is available again
    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 2\r\nok\r\nEND\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_open_then_close_erases() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 4\r\nwork\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q/open\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 4\r\nwork\r\nEND\r\n").await;

    send(&mut client, b"GET q/close\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_close_open_combo_reserves_next() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 1\r\na\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;
    send(&mut client, b"SET q 0 0 1\r\nb\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q/open\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 1\r\na\r\nEND\r\n").await;

    // close the first and reserve the second in one round trip
    send(&mut client, b"GET q/close/open\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 1\r\nb\r\nEND\r\n").await;

    send(&mut client, b"GET q/close\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_multi_chunk_set_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        chunk_size: 4,
        ..test_config(&dir)
    };
    let server = start_server(config).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 10\r\nABCDEFGHIJ\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 10\r\nABCDEFGHIJ\r\nEND\r\n").await;
}

#[tokio::test]
async fn test_null_terminated_value() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 3\r\nA\x00\x00\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 3\r\nA\x00\x00\r\nEND\r\n").await;
}

#[tokio::test]
async fn test_peek_leaves_item() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 3\r\nyes\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q/peek\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 3\r\nyes\r\nEND\r\n").await;

    // still there
    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 3\r\nyes\r\nEND\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_get_conflicting_options() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;

    let mut client = connect(addr).await;
    send(&mut client, b"GET q/abort/open\r\n").await;
    expect_reply(&mut client, b"CLIENT_ERROR abort must be by itself\r\n").await;

    let mut client = connect(addr).await;
    send(&mut client, b"GET q/open/peek\r\n").await;
    expect_reply(&mut client, b"CLIENT_ERROR cannot open and peek\r\n").await;
}

#[tokio::test]
async fn test_get_while_item_open_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 1\r\nx\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q/open\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 1\r\nx\r\nEND\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"CLIENT_ERROR close current item first\r\n").await;
}

#[tokio::test]
async fn test_disconnect_returns_open_item() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;

    let mut client = connect(addr).await;
    send(&mut client, b"SET q 0 0 4\r\nkeep\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"GET q/open\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 4\r\nkeep\r\nEND\r\n").await;
    drop(client);

    // the dropped connection's reservation lands back in the queue
    let mut client = connect(addr).await;
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        send(&mut client, b"GET q\r\n").await;
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        if &reply == b"VALUE" {
            expect_reply(&mut client, b" q 0 4\r\nkeep\r\nEND\r\n").await;
            return;
        }
        // "END\r\n" has arrived; the return hasn't landed yet
        assert!(Instant::now() < deadline, "item never came back");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_bad_data_chunk_trailer() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 2\r\nhiXX").await;
    expect_reply(&mut client, b"CLIENT_ERROR bad data chunk\r\n").await;

    // the item was never committed
    let mut client = connect(addr).await;
    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_parse_error_closes_connection() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"NONSENSE\r\n").await;
    expect_reply(&mut client, b"ERROR\r\n").await;

    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "the server should hang up after an error");
}

#[tokio::test]
async fn test_version() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"VERSION\r\n").await;
    let expected = format!("VERSION {}\r\n", env!("CARGO_PKG_VERSION"));
    expect_reply(&mut client, expected.as_bytes()).await;
}

#[tokio::test]
async fn test_stats_reports_counters() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 2\r\nhi\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"STATS\r\n").await;
    let stats = read_until_end(&mut client).await;
    assert!(stats.contains("STAT uptime "), "{stats}");
    assert!(stats.contains("STAT curr_items 1\r\n"), "{stats}");
    assert!(stats.contains("STAT total_items 1\r\n"), "{stats}");
    assert!(stats.contains("STAT cmd_set 1\r\n"), "{stats}");
    assert!(stats.contains("STAT queue_q_items 1\r\n"), "{stats}");
}

#[tokio::test]
async fn test_flush_discards_queue() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET q 0 0 4\r\ngone\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"FLUSH q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;

    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_flush_all() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;
    let mut client = connect(addr).await;

    send(&mut client, b"SET a 0 0 1\r\nx\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;
    send(&mut client, b"SET b 0 0 1\r\ny\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;

    send(&mut client, b"FLUSH_ALL\r\n").await;
    expect_reply(&mut client, b"Flushed all queues.\r\n").await;

    send(&mut client, b"GET a\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
    send(&mut client, b"GET b\r\n").await;
    expect_reply(&mut client, b"END\r\n").await;
}

#[tokio::test]
async fn test_items_survive_restart() {
    let dir = TempDir::new().unwrap();

    let server = start_server(test_config(&dir)).await;
    let mut client = connect(server.addr).await;
    send(&mut client, b"SET q 0 0 7\r\ndurable\r\n").await;
    expect_reply(&mut client, b"STORED\r\n").await;
    drop(client);
    server.stop().await; // releases the journal directories

    // a second server over the same data directory sees the item
    let server = start_server(test_config(&dir)).await;
    let mut client = connect(server.addr).await;
    send(&mut client, b"GET q\r\n").await;
    expect_reply(&mut client, b"VALUE q 0 7\r\ndurable\r\nEND\r\n").await;
}

#[tokio::test]
async fn test_concurrent_waiters_each_get_an_item() {
    let dir = TempDir::new().unwrap();
    let server = start_server(test_config(&dir)).await;
    let addr = server.addr;

    let mut first = connect(addr).await;
    send(&mut first, b"GET q/t=5000\r\n").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut second = connect(addr).await;
    send(&mut second, b"GET q/t=5000\r\n").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut pusher = connect(addr).await;
    send(&mut pusher, b"SET q 0 0 1\r\n1\r\n").await;
    expect_reply(&mut pusher, b"STORED\r\n").await;
    send(&mut pusher, b"SET q 0 0 1\r\n2\r\n").await;
    expect_reply(&mut pusher, b"STORED\r\n").await;

    // two pushes resolve two pending waiters, one item each
    let mut replies = Vec::new();
    for client in [&mut first, &mut second] {
        let mut reply = [0u8; 19]; // "VALUE q 0 1\r\n?\r\nEND" prefix
        client.read_exact(&mut reply).await.unwrap();
        replies.push(reply.to_vec());
    }
    replies.sort();
    assert_eq!(replies[0], b"VALUE q 0 1\r\n1\r\nEND");
    assert_eq!(replies[1], b"VALUE q 0 1\r\n2\r\nEND");
}
