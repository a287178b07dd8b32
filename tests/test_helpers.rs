//! Test helpers for integration tests
//!
//! Reusable mock servers and I/O utilities so individual tests stay
//! focused on protocol behavior.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;
use tokio::time::timeout;

use sockproxyd::{Daemon, Settings};

/// Mock remote endpoint that echoes every byte back.
///
/// Binds an ephemeral port and serves until the returned AbortHandle is
/// dropped, which cancels the background task immediately.
pub struct MockEchoServer;

impl MockEchoServer {
    pub async fn spawn() -> (SocketAddr, AbortHandle) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind echo server");
        let addr = listener.local_addr().expect("echo server addr");

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                drop(tokio::spawn(async move {
                    let mut buffer = [0u8; 4096];
                    loop {
                        match stream.read(&mut buffer).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buffer[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }));
            }
        })
        .abort_handle();

        (addr, handle)
    }
}

/// Mock remote endpoint that accepts connections and stays silent,
/// handing each accepted socket to the test.
pub struct MockSilentServer;

impl MockSilentServer {
    pub async fn spawn() -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<TcpStream>, AbortHandle) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind silent server");
        let addr = listener.local_addr().expect("silent server addr");
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if tx.send(stream).is_err() {
                    break;
                }
            }
        })
        .abort_handle();

        (addr, rx, handle)
    }
}

/// Mock controller HTTP endpoint recording every request line.
pub struct MockController {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
    _abort: DropAbort,
}

struct DropAbort(AbortHandle);

impl Drop for DropAbort {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl MockController {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock controller");
        let addr = listener.local_addr().expect("mock controller addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                drop(tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buffer = [0u8; 1024];
                    loop {
                        match stream.read(&mut buffer).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                head.extend_from_slice(&buffer[..n]);
                                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }
                    let text = String::from_utf8_lossy(&head);
                    if let Some(line) = text.lines().next() {
                        recorded.lock().unwrap().push(line.to_string());
                    }
                    let _ = stream
                        .write_all(
                            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        )
                        .await;
                }));
            }
        })
        .abort_handle();

        Self {
            base_url: format!("http://{}", addr),
            requests,
            _abort: DropAbort(handle),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Settings for a daemon bound to ephemeral localhost ports.
pub fn test_settings(controller_url: &str) -> Settings {
    Settings {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        controller_url: controller_url.to_string(),
        ..Settings::default()
    }
}

/// Bind and launch a daemon, returning its command address, direct
/// addresses, and the run handle.
pub async fn start_daemon(
    settings: Settings,
) -> (
    SocketAddr,
    Vec<SocketAddr>,
    tokio::task::JoinHandle<Result<()>>,
) {
    let daemon = Daemon::bind(settings).await.expect("bind daemon");
    let addr = daemon.local_addr().expect("daemon addr");
    let direct = daemon.direct_local_addrs().expect("direct addrs");
    let handle = tokio::spawn(daemon.run());
    (addr, direct, handle)
}

/// Read one `\n`-terminated line (terminator stripped) with a timeout.
pub async fn read_line(stream: &mut TcpStream) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = timeout(Duration::from_secs(2), stream.read(&mut byte)).await??;
        if n == 0 {
            bail!(
                "connection closed before newline; got '{}'",
                String::from_utf8_lossy(&line)
            );
        }
        if byte[0] == b'\n' {
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte[0]);
    }
}

/// Expect EOF on the stream within the timeout.
pub async fn expect_eof(stream: &mut TcpStream) -> Result<()> {
    let mut buffer = [0u8; 64];
    loop {
        let n = timeout(Duration::from_secs(2), stream.read(&mut buffer)).await??;
        if n == 0 {
            return Ok(());
        }
        // Drain any replies still in flight before the close
    }
}

/// Connect to the daemon and consume the greeting, returning the stream
/// and the allocated session id.
pub async fn connect_and_greet(addr: SocketAddr) -> Result<(TcpStream, String)> {
    let mut stream = TcpStream::connect(addr).await?;
    let greeting = read_line(&mut stream).await?;
    let id = greeting
        .rsplit(' ')
        .next()
        .map(str::to_string)
        .unwrap_or_default();
    Ok((stream, id))
}
