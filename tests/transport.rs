//! End-to-end tests against in-process mock servers.

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use h1_transport::config::{HostSettings, TransportConfig};
use h1_transport::{Request, RequestState, Transport, TransportError};
use tokio::time::{timeout, Instant};

mod common;

use common::{config_with, start_keep_alive_server, start_server, transport, FixedConnector};

const DEADLINE: Duration = Duration::from_secs(10);

fn record_states(request: Request) -> (Request, Arc<Mutex<Vec<RequestState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let request = request.on_state_change(move |_, state| sink.lock().unwrap().push(state));
    (request, states)
}

/// Upload source that never ends, yielding 1 KiB every 20 ms.
struct TrickleBody {
    pulled: Arc<AtomicU64>,
}

impl Read for TrickleBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(Duration::from_millis(20));
        let n = buf.len().min(1024);
        buf[..n].fill(b'x');
        self.pulled.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

async fn wait_for_connections(transport: &Transport, count: usize, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if transport.connection_count() == count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    transport.connection_count() == count
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fixed_length_response() {
    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let server = start_server(move |mut conn| {
        let record = record.clone();
        async move {
            let request = conn.read_request().await.unwrap();
            *record.lock().unwrap() = Some(request);
            conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await.unwrap();
        }
    })
    .await;

    let transport = Transport::with_connector(TransportConfig::default(), Arc::new(FixedConnector(server.addr))).unwrap();
    let response = timeout(DEADLINE, transport.execute(Request::get("http://a.example.com/").unwrap()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.body().as_ref(), b"hello");
    assert_eq!(response.downloaded(), 5);
    assert_eq!(response.version(), (1, 1));

    let request = seen.lock().unwrap().take().unwrap();
    assert_eq!(request.method, "GET");
    assert_eq!(request.target, "/");
    assert_eq!(request.header("host"), Some("a.example.com"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunked_response_one_byte_per_read() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        conn.write_bytewise(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n")
            .await
            .unwrap();
    })
    .await;

    let transport = transport();
    let response = timeout(DEADLINE, transport.execute(Request::get(&server.url("/wiki")).unwrap()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.body().as_ref(), b"Wikipedia");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fault_mid_response_is_resent_on_new_connection() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        if conn.index == 0 {
            conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel").await.unwrap();
            conn.close().await;
        } else {
            conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhelloworld").await.unwrap();
        }
    })
    .await;

    let transport = transport();
    let request = Request::get(&server.url("/")).unwrap().max_retries(2);
    let response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();

    assert_eq!(response.body().as_ref(), b"helloworld");
    assert_eq!(response.retries(), 1);
    assert_eq!(server.accepted(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fault_without_retry_budget_fails() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel").await.unwrap();
        conn.close().await;
    })
    .await;

    let transport = transport();
    let (request, states) = record_states(Request::get(&server.url("/")).unwrap().max_retries(0));
    let err = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap_err();

    assert!(matches!(err, TransportError::ConnectionClosed), "got {err:?}");
    assert_eq!(states.lock().unwrap().last(), Some(&RequestState::Error));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sequential_requests_reuse_connection() {
    let server = start_keep_alive_server("ok").await;
    let transport = Transport::new(config_with(HostSettings {
        max_connections_per_host: 1,
        ..HostSettings::default()
    }))
    .unwrap();

    let first = timeout(DEADLINE, transport.execute(Request::get(&server.url("/1")).unwrap()))
        .await
        .unwrap()
        .unwrap();
    let second = timeout(DEADLINE, transport.execute(Request::get(&server.url("/2")).unwrap()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.connection_id(), second.connection_id());
    assert_eq!(server.accepted(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_close_is_not_reused() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await.unwrap();
        conn.close().await;
    })
    .await;

    let transport = transport();
    let first = timeout(DEADLINE, transport.execute(Request::get(&server.url("/")).unwrap()))
        .await
        .unwrap()
        .unwrap();
    let second = timeout(DEADLINE, transport.execute(Request::get(&server.url("/")).unwrap()))
        .await
        .unwrap()
        .unwrap();

    assert_ne!(first.connection_id(), second.connection_id());
    assert_eq!(server.accepted(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_host_connection_cap() {
    let server = start_server(|mut conn| async move {
        while conn.read_request().await.is_some() {
            tokio::time::sleep(Duration::from_millis(30)).await;
            if conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await.is_err() {
                break;
            }
        }
    })
    .await;

    let transport = Transport::new(config_with(HostSettings {
        max_connections_per_host: 2,
        ..HostSettings::default()
    }))
    .unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| transport.send(Request::get(&server.url(&format!("/{i}"))).unwrap()).unwrap())
        .collect();
    for handle in handles {
        let response = timeout(DEADLINE, handle.response()).await.unwrap().unwrap();
        assert_eq!(response.body().as_ref(), b"ok");
    }

    assert!(server.accepted() <= 2, "opened {} connections", server.accepted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_timeout() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let transport = transport();
    let (request, states) = record_states(
        Request::get(&server.url("/slow"))
            .unwrap()
            .timeout(Duration::from_millis(200)),
    );
    let err = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap_err();

    assert!(err.is_timeout(), "got {err:?}");
    assert_eq!(states.lock().unwrap().last(), Some(&RequestState::TimedOut));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_in_flight() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let transport = transport();
    let handle = transport.send(Request::get(&server.url("/hang")).unwrap()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    let err = timeout(DEADLINE, handle.response()).await.unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Aborted), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_queued() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let transport = Transport::new(config_with(HostSettings {
        max_connections_per_host: 1,
        ..HostSettings::default()
    }))
    .unwrap();
    let _busy = transport.send(Request::get(&server.url("/busy")).unwrap()).unwrap();
    let queued = transport.send(Request::get(&server.url("/queued")).unwrap()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queued.state(), RequestState::Queued);
    queued.cancel();
    assert_eq!(queued.state(), RequestState::Aborted);
    let err = timeout(DEADLINE, queued.response()).await.unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Aborted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redirect_followed() {
    let server = start_server(|mut conn| async move {
        while let Some(request) = conn.read_request().await {
            let response = match request.target.as_str() {
                "/old" => "HTTP/1.1 302 Found\r\nLocation: /new\r\nContent-Length: 0\r\n\r\n".to_string(),
                "/form" => "HTTP/1.1 303 See Other\r\nLocation: /done\r\nContent-Length: 0\r\n\r\n".to_string(),
                _ => {
                    let body = format!("{} {} {}", request.method, request.target, request.body.len());
                    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
                }
            };
            if conn.write(response.as_bytes()).await.is_err() {
                break;
            }
        }
    })
    .await;

    let transport = transport();
    let response = timeout(DEADLINE, transport.execute(Request::get(&server.url("/old")).unwrap()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.url().path(), "/new");
    assert_eq!(response.body().as_ref(), b"GET /new 0");

    let post = Request::post(&server.url("/form")).unwrap().body("field=1");
    let response = timeout(DEADLINE, transport.execute(post)).await.unwrap().unwrap();
    assert_eq!(response.body().as_ref(), b"GET /done 0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redirects_disabled_returns_3xx() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        conn.write(b"HTTP/1.1 301 Moved Permanently\r\nLocation: /elsewhere\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    })
    .await;

    let transport = transport();
    let request = Request::get(&server.url("/")).unwrap().max_redirects(0);
    let response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(response.headers().get("location"), Some("/elsewhere"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_307_with_streamed_body_returns_3xx() {
    let server = start_server(|mut conn| async move {
        while conn.read_request().await.is_some() {
            let response = "HTTP/1.1 307 Temporary Redirect\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n";
            if conn.write(response.as_bytes()).await.is_err() {
                break;
            }
        }
    })
    .await;

    let (request, states) = record_states(
        Request::post(&server.url("/upload"))
            .unwrap()
            .body_reader(Cursor::new(b"sent once".to_vec()), None),
    );
    let transport = transport();
    let response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 307);
    assert_eq!(response.url().path(), "/upload");
    assert_eq!(response.headers().get("location"), Some("/next"));
    assert_eq!(server.accepted(), 1);
    assert_eq!(states.lock().unwrap().last(), Some(&RequestState::Finished));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_chunked_upload() {
    let server = start_server(|mut conn| async move {
        let request = conn.read_request().await.unwrap();
        let body = format!(
            "{} {}",
            request.header("transfer-encoding").unwrap_or("-"),
            String::from_utf8_lossy(&request.body)
        );
        let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
        conn.write(response.as_bytes()).await.unwrap();
    })
    .await;

    let uploaded = Arc::new(Mutex::new(0u64));
    let progress = uploaded.clone();
    let request = Request::post(&server.url("/upload"))
        .unwrap()
        .body_reader(Cursor::new(b"streamed upload body".to_vec()), None)
        .on_upload_progress(move |sent, _| *progress.lock().unwrap() = sent);

    let transport = transport();
    let response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();

    assert_eq!(response.body().as_ref(), b"chunked streamed upload body");
    assert_eq!(*uploaded.lock().unwrap(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expect_continue() {
    let server = start_server(|mut conn| async move {
        let mut request = conn.read_head().await.unwrap();
        assert_eq!(request.header("expect"), Some("100-continue"));
        conn.write(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();
        conn.read_body(&mut request).await.unwrap();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            request.body.len(),
            String::from_utf8_lossy(&request.body)
        );
        conn.write(response.as_bytes()).await.unwrap();
    })
    .await;

    let transport = transport();
    let request = Request::post(&server.url("/put")).unwrap().body("payload").expect_continue();
    let response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.body().as_ref(), b"payload");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expect_continue_rejected_skips_body() {
    let server = start_server(|mut conn| async move {
        conn.read_head().await.unwrap();
        conn.write(b"HTTP/1.1 417 Expectation Failed\r\nContent-Length: 0\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
    .await;

    let transport = transport();
    let request = Request::post(&server.url("/put")).unwrap().body("payload").expect_continue();
    let response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 417);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_upload_stops_reading_body() {
    let server = start_server(|mut conn| async move {
        conn.read_head().await.unwrap();
        while matches!(conn.read_some().await, Ok(data) if !data.is_empty()) {}
    })
    .await;

    let pulled = Arc::new(AtomicU64::new(0));
    let request = Request::post(&server.url("/upload"))
        .unwrap()
        .body_reader(TrickleBody { pulled: pulled.clone() }, None)
        .timeout(Duration::from_millis(200));

    let transport = transport();
    let err = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");

    // At most the read already in progress finishes after the timeout.
    let at_timeout = pulled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = pulled.load(Ordering::SeqCst);
    assert!(after - at_timeout <= 2048, "kept reading: {at_timeout} -> {after}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streaming_download() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        conn.write(b"HTTP/1.1 200 OK\r\nContent-Length: 26\r\n\r\n").await.unwrap();
        for piece in [&b"abcdefgh"[..], b"ijklmnop", b"qrstuvwxyz"] {
            conn.write(piece).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let transport = transport();
    let handle = transport
        .send(Request::get(&server.url("/stream")).unwrap().streaming(4))
        .unwrap();
    let mut stream = handle.body_stream();
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk);
        }
        out
    });

    let response = timeout(DEADLINE, handle.response()).await.unwrap().unwrap();
    assert!(response.body().is_empty());
    let body = timeout(DEADLINE, collector).await.unwrap().unwrap();
    assert_eq!(body, b"abcdefghijklmnopqrstuvwxyz");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_protocol_upgrade() {
    let server = start_server(|mut conn| async move {
        conn.read_request().await.unwrap();
        conn.write(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: echo\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();
        loop {
            match conn.read_some().await {
                Ok(data) if !data.is_empty() => {
                    if conn.write(&data).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    })
    .await;

    let transport = transport();
    let request = Request::get(&server.url("/echo"))
        .unwrap()
        .header("Upgrade", "echo")
        .header("Connection", "Upgrade")
        .upgrade();
    let mut response = timeout(DEADLINE, transport.execute(request)).await.unwrap().unwrap();

    assert_eq!(response.status(), 101);
    assert!(response.is_upgraded());
    let mut stream = response.take_upgraded().unwrap();
    stream.write_all(b"ping").await.unwrap();
    let echoed = timeout(DEADLINE, stream.read()).await.unwrap().unwrap();
    assert_eq!(echoed.as_ref(), b"ping");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_idle_connections() {
    let server = start_keep_alive_server("ok").await;
    let transport = transport();

    timeout(DEADLINE, transport.execute(Request::get(&server.url("/")).unwrap()))
        .await
        .unwrap()
        .unwrap();
    // Recycling goes through the pool event loop.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.connection_count(), 1);
    assert_eq!(transport.remove_idle_connections(), 1);
    assert_eq!(transport.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_connection_closed_after_keep_alive() {
    let server = start_keep_alive_server("ok").await;
    let transport = Transport::new(config_with(HostSettings {
        keep_alive_secs: 1,
        idle_check_interval_ms: 50,
        ..HostSettings::default()
    }))
    .unwrap();

    let started = Instant::now();
    timeout(DEADLINE, transport.execute(Request::get(&server.url("/")).unwrap()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transport.connection_count(), 1);

    assert!(wait_for_connections(&transport, 0, Duration::from_secs(3)).await);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_advertised_keep_alive_shortens_idle_timeout() {
    let server = start_server(|mut conn| async move {
        while conn.read_request().await.is_some() {
            let response = "HTTP/1.1 200 OK\r\nKeep-Alive: timeout=1\r\nContent-Length: 2\r\n\r\nok";
            if conn.write(response.as_bytes()).await.is_err() {
                break;
            }
        }
    })
    .await;
    let transport = Transport::new(config_with(HostSettings {
        keep_alive_secs: 30,
        idle_check_interval_ms: 50,
        ..HostSettings::default()
    }))
    .unwrap();

    timeout(DEADLINE, transport.execute(Request::get(&server.url("/")).unwrap()))
        .await
        .unwrap()
        .unwrap();

    assert!(wait_for_connections(&transport, 0, Duration::from_secs(3)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reuse_restarts_idle_timer() {
    let server = start_keep_alive_server("ok").await;
    let transport = Transport::new(config_with(HostSettings {
        keep_alive_secs: 1,
        idle_check_interval_ms: 50,
        ..HostSettings::default()
    }))
    .unwrap();
    let get = || Request::get(&server.url("/")).unwrap();

    timeout(DEADLINE, transport.execute(get())).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    timeout(DEADLINE, transport.execute(get())).await.unwrap().unwrap();
    assert_eq!(server.accepted(), 1);

    // Past the first release's deadline, well inside the second's.
    tokio::time::sleep(Duration::from_millis(650)).await;
    assert_eq!(transport.connection_count(), 1);

    assert!(wait_for_connections(&transport, 0, Duration::from_secs(3)).await);
    assert_eq!(server.accepted(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_rejects_new_requests() {
    let transport = transport();
    transport.shutdown();
    let err = transport.send(Request::get("http://127.0.0.1:9/").unwrap()).unwrap_err();
    assert!(matches!(err, TransportError::Shutdown));
}
