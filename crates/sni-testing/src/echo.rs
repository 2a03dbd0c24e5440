//! Loopback echo server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::tls::accept_prelogin_tls;

#[derive(Debug, Default)]
struct Counters {
    open: AtomicUsize,
    accepted: AtomicUsize,
}

/// Server that echoes every byte it receives.
///
/// With a TLS acceptor it first runs the pre-login framed handshake, then
/// echoes the decrypted bytes.
#[derive(Debug)]
pub struct EchoServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    counters: Arc<Counters>,
}

impl EchoServer {
    /// Start a plain TCP echo server on an ephemeral loopback port.
    pub async fn start() -> std::io::Result<Self> {
        Self::spawn(None).await
    }

    /// Start an echo server that requires a TLS handshake first.
    pub async fn start_tls(acceptor: TlsAcceptor) -> std::io::Result<Self> {
        Self::spawn(Some(acceptor)).await
    }

    async fn spawn(acceptor: Option<TlsAcceptor>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let counters = Arc::new(Counters::default());

        let mut shutdown_rx = shutdown_tx.subscribe();
        let loop_counters = Arc::clone(&counters);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let (stream, _) = match result {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::error!("echo server accept error: {}", e);
                                break;
                            }
                        };
                        let counters = Arc::clone(&loop_counters);
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            counters.accepted.fetch_add(1, Ordering::SeqCst);
                            counters.open.fetch_add(1, Ordering::SeqCst);
                            let result = match acceptor {
                                Some(acceptor) => match accept_prelogin_tls(&acceptor, stream).await {
                                    Ok(tls) => echo(tls).await,
                                    Err(e) => Err(e),
                                },
                                None => echo(stream).await,
                            };
                            if let Err(e) = result {
                                tracing::debug!("echo connection error: {}", e);
                            }
                            counters.open.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            counters,
        })
    }

    /// Get the listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Server spec a client transport can connect to.
    pub fn server_spec(&self) -> String {
        format!("tcp:{},{}", self.addr.ip(), self.addr.port())
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Number of connections accepted since start.
    pub fn accepted_connections(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn echo<S>(mut stream: S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n]).await?;
        stream.flush().await?;
    }
}
