//! Shared utilities for integration testing: in-process HTTP/1.1 mock servers.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use h1_transport::config::{HostSettings, TransportConfig, DEFAULT_HOST_PATTERN};
use h1_transport::{BoxedStream, Connector, HostKey, Transport};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// One request as the mock server saw it.
#[derive(Debug, Clone, Default)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Server side of one accepted connection.
pub struct ServerConn {
    pub index: usize,
    reader: BufReader<TcpStream>,
}

impl ServerConn {
    /// Read a request head. `None` when the client closed the connection.
    pub async fn read_head(&mut self) -> Option<RecordedRequest> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let mut parts = line.trim_end().splitn(3, ' ');
        let mut request = RecordedRequest {
            method: parts.next()?.to_string(),
            target: parts.next()?.to_string(),
            ..RecordedRequest::default()
        };
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await.ok()? == 0 {
                return None;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':')?;
            request.headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        Some(request)
    }

    /// Read the body announced by the head, decoding chunked framing.
    pub async fn read_body(&mut self, request: &mut RecordedRequest) -> io::Result<()> {
        let chunked = request
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        if chunked {
            loop {
                let mut size_line = String::new();
                self.reader.read_line(&mut size_line).await?;
                let size = usize::from_str_radix(size_line.trim(), 16)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let mut chunk = vec![0u8; size + 2];
                self.reader.read_exact(&mut chunk).await?;
                if size == 0 {
                    return Ok(());
                }
                request.body.extend_from_slice(&chunk[..size]);
            }
        }
        if let Some(len) = request.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body).await?;
            request.body = body;
        }
        Ok(())
    }

    /// Read a whole request, head and body.
    pub async fn read_request(&mut self) -> Option<RecordedRequest> {
        let mut request = self.read_head().await?;
        self.read_body(&mut request).await.ok()?;
        Some(request)
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await
    }

    /// Write `data` one byte per write, with a flush and yield in between.
    pub async fn write_bytewise(&mut self, data: &[u8]) -> io::Result<()> {
        for byte in data {
            self.write(std::slice::from_ref(byte)).await?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    pub async fn read_some(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; 4096];
        let n = self.reader.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    pub async fn close(mut self) {
        let _ = self.reader.get_mut().shutdown().await;
    }
}

/// A running mock server.
pub struct MockServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a programmable mock server on an ephemeral port. `handler` runs
/// once per accepted connection.
pub async fn start_server<F, Fut>(handler: F) -> MockServer
where
    F: Fn(ServerConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let index = counter.fetch_add(1, Ordering::SeqCst);
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler(ServerConn {
                            index,
                            reader: BufReader::new(socket),
                        })
                        .await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockServer { addr, accepted }
}

/// Keep-alive server answering every request with `body`.
pub async fn start_keep_alive_server(body: &'static str) -> MockServer {
    start_server(move |mut conn| async move {
        while conn.read_request().await.is_some() {
            let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
            if conn.write(response.as_bytes()).await.is_err() {
                break;
            }
        }
    })
    .await
}

/// Dials one fixed address whatever the host, so tests can use real host names.
pub struct FixedConnector(pub SocketAddr);

impl Connector for FixedConnector {
    fn connect<'a>(&'a self, _host: &'a HostKey) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(self.0).await?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Config with one host setting changed from the defaults.
pub fn config_with(settings: HostSettings) -> TransportConfig {
    let mut config = TransportConfig::default();
    config.hosts.insert(DEFAULT_HOST_PATTERN.to_string(), settings);
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config
}

pub fn transport() -> Transport {
    Transport::new(config_with(HostSettings::default())).unwrap()
}
