//! The transport handle abstraction.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use sni_tls::TlsConfig;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{Provider, TransportError};
use crate::packet::Packet;

/// A duplex packet stream: a TCP socket, a named pipe or a multiplexed
/// session.
///
/// Each direction runs at most one operation at a time; a second caller in
/// the same direction waits for the first.
#[async_trait]
pub trait TransportHandle: Send + Sync + fmt::Debug {
    /// Identifier assigned when the handle was opened.
    fn connection_id(&self) -> Uuid;

    /// Provider reported in errors from this handle.
    fn provider(&self) -> Provider;

    /// Send a packet and wait until it is written.
    ///
    /// A registered completion callback on the packet runs with the result.
    async fn send(&self, packet: Packet) -> Result<(), TransportError>;

    /// Start sending a packet.
    ///
    /// Returns [`AsyncOp::Complete`] when the write finished without waiting
    /// and `force_callback` is false.
    fn send_async(&self, packet: Packet, force_callback: bool) -> AsyncOp<()>;

    /// Receive the next packet, waiting at most `timeout` (`None` waits
    /// forever).
    async fn receive(&self, timeout: Option<Duration>) -> Result<Packet, TransportError>;

    /// Start receiving a packet.
    fn receive_async(&self, force_callback: bool) -> AsyncOp<Packet>;

    /// Run the TLS client handshake and encrypt all later traffic.
    async fn enable_tls(&self, config: &TlsConfig) -> Result<(), TransportError>;

    /// Drop TLS and go back to the raw stream.
    async fn disable_tls(&self) -> Result<(), TransportError>;

    /// Cheap liveness probe that performs no I/O round trip.
    fn check_connection(&self) -> Result<(), TransportError>;

    /// Abort the handle. In-flight operations fail with a terminated error.
    fn kill(&self);

    /// Close the handle gracefully.
    async fn close(&self) -> Result<(), TransportError>;

    /// Set the receive buffer size.
    fn set_buffer_size(&self, size: usize);
}

// =============================================================================
// Async operations
// =============================================================================

/// Result of starting an asynchronous operation.
#[derive(Debug)]
#[must_use = "a pending operation does nothing observable unless awaited"]
pub enum AsyncOp<T> {
    /// The operation finished immediately.
    Complete(Result<T, TransportError>),
    /// The operation continues on a worker task.
    Pending(Completion<T>),
}

impl<T: Send + 'static> AsyncOp<T> {
    /// Start `operation`.
    ///
    /// Unless `force_callback` is set the operation is polled once in place
    /// and returned as [`AsyncOp::Complete`] if it is already done. Otherwise
    /// it moves to a spawned task and its result is delivered exactly once
    /// through the [`Completion`].
    pub fn start<F>(operation: F, force_callback: bool) -> Self
    where
        F: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        let mut operation = Box::pin(operation);
        if !force_callback {
            if let Some(result) = (&mut operation).now_or_never() {
                return Self::Complete(result);
            }
        }

        let (tx, completion) = Completion::channel();
        tokio::spawn(async move {
            tx.complete(operation.await);
        });
        Self::Pending(completion)
    }
}

impl<T> AsyncOp<T> {
    /// Whether the result will arrive through a [`Completion`].
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Wait for the result.
    pub async fn wait(self) -> Result<T, TransportError> {
        match self {
            Self::Complete(result) => result,
            Self::Pending(completion) => completion.await,
        }
    }
}

/// Future resolving to the result of a pending operation.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, TransportError>>,
}

impl<T> Completion<T> {
    /// Create a completion and the sender that resolves it.
    pub fn channel() -> (CompletionSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender { tx }, Self { rx })
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(_) => Poll::Ready(Err(TransportError::terminated(Provider::Invalid))),
        }
    }
}

/// Sending side of a [`Completion`].
///
/// Dropping it without calling [`complete`](Self::complete) resolves the
/// completion with a terminated error.
#[derive(Debug)]
pub struct CompletionSender<T> {
    tx: oneshot::Sender<Result<T, TransportError>>,
}

impl<T> CompletionSender<T> {
    /// Deliver the result. Does nothing if the completion was dropped.
    pub fn complete(self, result: Result<T, TransportError>) {
        let _ = self.tx.send(result);
    }

    /// Whether the waiting side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
