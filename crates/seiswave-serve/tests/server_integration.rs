//! Integration tests for the wave server over real TCP sockets
//!
//! These tests verify the black-box behavior of the server:
//! - Waveform queries return framed binary chunks
//! - Unsupported commands close the connection without a reply
//! - Native and HTTP commands share a socket and are counted apart
//! - Backend failures surface as empty replies

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use seiswave::{
    ChannelInfo, MemoryStore, QueryEngine, QueryKind, Sample, Scnl, StoreError, TimeSpan,
    WaveRecord, WaveStore, Waveform, decode_binary_chunks,
};
use seiswave_serve::{
    ServerConfig, ServerState, StorePool, WaveServer, read_response,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::time::timeout;

struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Helper to set up a test server over `store`
async fn start_server(store: Arc<dyn WaveStore>) -> TestServer {
    let pool = StorePool::shared(store, 2).unwrap();
    let server = WaveServer::new(ServerState::new(
        pool,
        QueryEngine::default(),
        ServerConfig::default(),
    ));
    let state = server.state().clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        state,
        shutdown: Some(tx),
    }
}

fn seeded_store() -> Arc<dyn WaveStore> {
    let store = MemoryStore::new();
    store
        .insert(WaveRecord::new(
            Scnl::new("STA1", "EHZ", "NW", "--"),
            Waveform::new(1000.0, 50.0, (0..500).collect()),
        ))
        .unwrap();
    Arc::new(store)
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Next framed reply, with timeout
    async fn recv(&mut self) -> (seiswave_serve::ResponseHeader, Vec<u8>) {
        timeout(Duration::from_secs(2), read_response(&mut self.reader))
            .await
            .expect("Timeout waiting for response")
            .expect("Protocol error")
            .expect("Connection closed")
    }

    async fn recv_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        timeout(Duration::from_secs(2), self.reader.read_to_end(&mut out))
            .await
            .expect("Timeout waiting for close")
            .unwrap();
        out
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ============ Queries ============

#[tokio::test]
async fn raw_query_returns_binary_chunk() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GETSCNLRAW 1 STA1 EHZ NW -- 1000.0 1010.0 0 1").await;
    let (header, payload) = client.recv().await;
    assert_eq!(header.seq, "1");
    assert_eq!(header.chunks, 1);
    assert_eq!(header.bytes, payload.len());

    let chunks = decode_binary_chunks(&payload).unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].kind, QueryKind::Raw);
    assert_eq!(chunks[0].scnl, Scnl::new("STA1", "EHZ", "NW", "--"));
    assert_eq!(chunks[0].values.len(), 500);

    let snapshot = server.state.registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].queries, 1);
    assert_eq!(snapshot[0].query_bytes, payload.len() as u64);
}

#[tokio::test]
async fn empty_result_has_zero_counts() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GETSCNLRAW 7 STA1 EHZ NW -- 5000 6000 0 1").await;
    let (header, payload) = client.recv().await;
    assert_eq!(header.to_string(), "7 0 0");
    assert!(payload.is_empty());
}

#[tokio::test]
async fn version_and_menu() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("VERSION 1").await;
    let (_, payload) = client.recv().await;
    assert_eq!(payload, b"PROTOCOL_VERSION: 3\n");

    client.send("MENU: 2").await;
    let (header, payload) = client.recv().await;
    assert_eq!(header.seq, "2");
    assert_eq!(
        String::from_utf8(payload).unwrap(),
        "2 STA1 EHZ NW -- 1000.000000 1009.980000 i4\n"
    );
}

#[tokio::test]
async fn repeated_polls_reuse_the_connection() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    for _ in 0..3 {
        client.send("GETSCNRAW 4 STA1 EHZ NW 1000 1001").await;
        let (header, payload) = client.recv().await;
        assert_eq!(header.chunks, 1);
        assert_eq!(decode_binary_chunks(&payload).unwrap()[0].values.len(), 51);
    }
}

// ============ Connection handling ============

#[tokio::test]
async fn unsupported_command_closes_without_reply() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("FOO 1").await;
    assert!(client.recv_to_end().await.is_empty());

    let state = server.state.clone();
    wait_for(|| state.registry.totals().open == 0).await;
}

#[tokio::test]
async fn malformed_command_keeps_connection() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GETSCNLRAW 1 STA1 EHZ NW -- abc 1010").await;
    client.send("VERSION 2").await;
    let (header, _) = client.recv().await;
    assert_eq!(header.seq, "2");
}

#[tokio::test]
async fn wws_and_http_commands_are_counted() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    for seq in 1..=3 {
        client.send(&format!("VERSION {seq}")).await;
        client.recv().await;
    }

    client
        .writer
        .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut status_line = String::new();
    client.reader.read_line(&mut status_line).await.unwrap();
    assert_eq!(status_line, "HTTP/1.1 200 OK\r\n");

    let totals = server.state.registry.totals();
    assert_eq!((totals.wws, totals.http, totals.open), (3, 1, 1));

    drop(client);
    let state = server.state.clone();
    wait_for(|| state.registry.totals().open == 0).await;
    assert_eq!(server.state.registry.totals().total, 1);
}

#[tokio::test]
async fn status_command_reports_connections() {
    let server = start_server(seeded_store()).await;
    let mut client = Client::connect(server.addr).await;

    client.send("STATUS 9 A").await;
    let (header, payload) = client.recv().await;
    assert_eq!(header.seq, "9");
    let report = String::from_utf8(payload).unwrap();
    assert!(report.contains("Total Connections: 1"));
    assert!(report.contains("Open Connections: 1"));
    assert!(report.contains("WWS Commands: 1"));
}

// ============ Backend failures ============

struct FailingStore;

impl WaveStore for FailingStore {
    fn fetch_samples(&self, _scnl: &Scnl, _span: TimeSpan) -> Result<Vec<Sample>, StoreError> {
        Err(StoreError::Backend("disk on fire".into()))
    }

    fn channel_exists(&self, _code: &str) -> bool {
        true
    }

    fn create_channel(&self, _code: &str) -> Result<(), StoreError> {
        Ok(())
    }

    fn write_record(&self, _record: &WaveRecord) -> Result<(), StoreError> {
        Err(StoreError::Backend("read only".into()))
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        Vec::new()
    }
}

#[tokio::test]
async fn backend_failure_is_an_empty_reply() {
    let server = start_server(Arc::new(FailingStore)).await;
    let mut client = Client::connect(server.addr).await;

    client.send("GETSCNLRAW 3 STA1 EHZ NW -- 1000 1010").await;
    let (header, payload) = client.recv().await;
    assert_eq!(header.to_string(), "3 0 0");
    assert!(payload.is_empty());

    client.send("VERSION 4").await;
    assert_eq!(client.recv().await.0.seq, "4");
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let mut server = start_server(seeded_store()).await;
    let addr = server.addr;
    if let Some(tx) = server.shutdown.take() {
        tx.send(()).unwrap();
    }

    let mut refused = false;
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refused);
}
