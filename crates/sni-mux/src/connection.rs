//! Multiplexed connection.
//!
//! [`MultiplexedConnection`] owns the physical handle once multiplexing is
//! enabled. Two background tasks serve it:
//!
//! - the **writer** drains one channel of encoded frames, so frames from all
//!   sessions reach the wire in the order they were queued;
//! - the **receive loop** reads physical packets, runs them through the
//!   connection-wide [`FrameReassembler`] and dispatches each frame to its
//!   session.
//!
//! An unknown session on DATA/ACK, a malformed header or a failed physical
//! read tears down the whole connection: every session sees the error and
//! the physical handle is killed.

use std::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use sni_protocol::{Frame, FrameFlags, FrameReassembler};
use sni_transport::{Completion, Packet, Provider, SniErrorCode, TransportError, TransportHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MuxConfig;
use crate::session::{Session, SessionState};

/// Channel feeding the writer task.
pub(crate) type FrameSender = mpsc::UnboundedSender<Packet>;

fn protocol_violation(message: impl Into<String>) -> TransportError {
    TransportError::new(
        Provider::Smux,
        SniErrorCode::MuxProtocolViolation,
        message,
    )
}

// =============================================================================
// Shared state
// =============================================================================

struct SessionTable {
    sessions: HashMap<u16, Arc<SessionState>>,
    next_id: u16,
    /// Set once the connection is torn down.
    error: Option<TransportError>,
}

impl SessionTable {
    /// Next free id, wrapping and skipping ids still in use.
    fn allocate_id(&mut self) -> Result<u16, TransportError> {
        if self.sessions.len() > usize::from(u16::MAX) {
            return Err(TransportError::new(
                Provider::Smux,
                SniErrorCode::InternalException,
                "no free session id",
            ));
        }
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.sessions.contains_key(&id) {
                return Ok(id);
            }
        }
    }
}

/// What the receive loop does after a packet.
enum Step {
    Continue,
    /// The last session closed; close the physical handle.
    Close,
    /// The connection was torn down.
    Stop,
}

pub(crate) struct Shared {
    id: Uuid,
    pub(crate) config: MuxConfig,
    pub(crate) lower: Arc<dyn TransportHandle>,
    pub(crate) writer: FrameSender,
    table: Mutex<SessionTable>,
    reassembler: Mutex<FrameReassembler>,
    shutdown: CancellationToken,
}

impl Shared {
    /// Fail unless the connection is still up.
    pub(crate) fn check_usable(&self) -> Result<(), TransportError> {
        match &self.table.lock().error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn check_connection(&self) -> Result<(), TransportError> {
        self.check_usable()?;
        self.lower.check_connection()
    }

    pub(crate) fn kill(&self) {
        self.tear_down(TransportError::not_usable(Provider::Smux));
    }

    /// Record `err`, fail every session and stop both tasks.
    ///
    /// Returns false if the connection was already down.
    fn shut(&self, err: &TransportError) -> bool {
        let sessions: Vec<_> = {
            let mut table = self.table.lock();
            if table.error.is_some() {
                return false;
            }
            table.error = Some(err.clone());
            table.sessions.drain().map(|(_, state)| state).collect()
        };

        for state in sessions {
            state.fail(err.clone());
        }
        self.shutdown.cancel();
        true
    }

    /// Tear down and kill the physical handle.
    fn tear_down(&self, err: TransportError) {
        if !self.shut(&err) {
            return;
        }
        if err.is_protocol_violation() {
            tracing::warn!(connection_id = %self.id, error = %err, "tearing down multiplexed connection");
        } else {
            tracing::debug!(connection_id = %self.id, error = %err, "multiplexed connection torn down");
        }
        self.lower.kill();
    }

    /// Feed one physical packet through reassembly and dispatch its frames.
    fn process(&self, mut packet: Packet) -> Step {
        let mut frames: SmallVec<[Frame; 4]> = SmallVec::new();
        let failure = {
            let mut reassembler = self.reassembler.lock();
            loop {
                match reassembler.next_frame(&mut packet) {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                }
            }
        };

        for frame in frames {
            match self.dispatch(frame) {
                Step::Continue => {}
                step => return step,
            }
        }

        match failure {
            Some(e) => {
                self.tear_down(protocol_violation(e.to_string()));
                Step::Stop
            }
            None => Step::Continue,
        }
    }

    fn dispatch(&self, frame: Frame) -> Step {
        let header = frame.header;
        let session_id = header.session_id;

        match header.flags {
            FrameFlags::Syn => {
                tracing::trace!(session = session_id, "ignoring SYN from peer");
                Step::Continue
            }
            FrameFlags::Fin => {
                let (removed, empty) = {
                    let mut table = self.table.lock();
                    let removed = table.sessions.remove(&session_id);
                    (removed, table.sessions.is_empty())
                };
                let Some(state) = removed else {
                    tracing::trace!(session = session_id, "FIN for unknown session");
                    return Step::Continue;
                };

                tracing::debug!(connection_id = %self.id, session = session_id, "session closed by peer");
                let last = empty && self.shut(&TransportError::terminated(Provider::Smux));
                state.fail(TransportError::terminated(Provider::Smux));
                if last {
                    tracing::debug!(connection_id = %self.id, "last session closed");
                    return Step::Close;
                }
                Step::Continue
            }
            FrameFlags::Data | FrameFlags::Ack => {
                let state = self.table.lock().sessions.get(&session_id).cloned();
                let Some(state) = state else {
                    self.tear_down(protocol_violation(format!(
                        "Packet for unknown MARS session {session_id} received"
                    )));
                    return Step::Stop;
                };

                if header.flags == FrameFlags::Data {
                    tracing::trace!(
                        session = session_id,
                        seq = header.sequence_number,
                        len = frame.payload.len(),
                        "data frame"
                    );
                    let payload = Packet::from(Vec::from(frame.payload));
                    state.handle_data(header.highwater, payload, &self.writer);
                } else {
                    state.handle_ack(header.highwater, &self.writer);
                }
                Step::Continue
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn write_loop(
    lower: Arc<dyn TransportHandle>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    shutdown: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            packet = rx.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        // The packet's completion reports the result to its sender.
        if let Err(e) = lower.send(packet).await {
            tracing::trace!(error = %e, "frame write failed");
        }
    }

    rx.close();
    while let Ok(mut packet) = rx.try_recv() {
        packet.invoke_completion(Err(TransportError::terminated(Provider::Smux)));
    }
}

async fn receive_loop(
    shared: Weak<Shared>,
    lower: Arc<dyn TransportHandle>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            received = lower.receive(None) => received,
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };

        match received {
            Ok(packet) => match shared.process(packet) {
                Step::Continue => {}
                Step::Close => {
                    if let Err(e) = lower.close().await {
                        tracing::debug!(error = %e, "closing transport failed");
                    }
                    return;
                }
                Step::Stop => return,
            },
            Err(e) => {
                shared.tear_down(e);
                return;
            }
        }
    }
}

// =============================================================================
// Public handle
// =============================================================================

/// A physical connection carrying multiplexed sessions.
///
/// Cloning yields another handle to the same connection. The background
/// tasks stop when the connection is closed or torn down, or when every
/// handle and session is gone.
///
/// # Example
///
/// ```rust,ignore
/// use sni_mux::MultiplexedConnection;
///
/// let handle = sni_transport::connect("tcp:db.corp.local,1433", None, false).await?;
/// let mux = MultiplexedConnection::new(handle);
/// let first = mux.create_session().await?;
/// let second = mux.create_session().await?;
/// ```
#[derive(Clone)]
pub struct MultiplexedConnection {
    inner: Arc<Shared>,
}

impl MultiplexedConnection {
    /// Enable multiplexing on `handle` with the default configuration.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(handle: Arc<dyn TransportHandle>) -> Self {
        Self::start(handle, MuxConfig::default())
    }

    /// Enable multiplexing on `handle` with `config`.
    pub fn with_config(
        handle: Arc<dyn TransportHandle>,
        config: MuxConfig,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self::start(handle, config))
    }

    fn start(lower: Arc<dyn TransportHandle>, config: MuxConfig) -> Self {
        let (writer, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let reassembler = FrameReassembler::new().with_max_payload(config.max_frame_payload);

        let inner = Arc::new(Shared {
            id: Uuid::new_v4(),
            config,
            lower: Arc::clone(&lower),
            writer,
            table: Mutex::new(SessionTable {
                sessions: HashMap::new(),
                next_id: 0,
                error: None,
            }),
            reassembler: Mutex::new(reassembler),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(write_loop(Arc::clone(&lower), rx, shutdown.clone()));
        tokio::spawn(receive_loop(Arc::downgrade(&inner), lower, shutdown));

        tracing::debug!(
            connection_id = %inner.id,
            transport = %inner.lower.connection_id(),
            "multiplexing enabled"
        );
        Self { inner }
    }

    /// Identifier of this multiplexed connection.
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.inner.id
    }

    /// The physical handle underneath.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportHandle> {
        &self.inner.lower
    }

    /// Open a new session and wait until its SYN is written.
    pub async fn create_session(&self) -> Result<Session, TransportError> {
        let state = {
            let mut table = self.inner.table.lock();
            if let Some(err) = &table.error {
                return Err(err.clone());
            }
            let id = table.allocate_id()?;
            let state = Arc::new(SessionState::new(id));
            table.sessions.insert(id, Arc::clone(&state));
            state
        };

        let (done, written) = Completion::channel();
        let syn = state.syn_frame(done);
        let sent = match self.inner.writer.send(syn) {
            Ok(()) => written.await,
            Err(_) => Err(TransportError::terminated(Provider::Smux)),
        };
        if let Err(e) = sent {
            self.inner.table.lock().sessions.remove(&state.id());
            return Err(e);
        }

        tracing::debug!(connection_id = %self.inner.id, session = state.id(), "session opened");
        Ok(Session::new(state, Arc::clone(&self.inner)))
    }

    /// Number of sessions the peer has not closed yet.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.table.lock().sessions.len()
    }

    /// Whether the connection was closed or torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.table.lock().error.is_some()
    }

    /// Cheap liveness probe of the connection and its physical handle.
    pub fn check_connection(&self) -> Result<(), TransportError> {
        self.inner.check_connection()
    }

    /// Abort the connection. Every session fails with a not-usable error.
    pub fn kill(&self) {
        self.inner.kill();
    }

    /// Fail every session and close the physical handle.
    ///
    /// Closing an already closed connection does nothing.
    pub async fn close(&self) -> Result<(), TransportError> {
        if !self.inner.shut(&TransportError::not_usable(Provider::Smux)) {
            return Ok(());
        }
        tracing::debug!(connection_id = %self.inner.id, "multiplexed connection closed");
        self.inner.lower.close().await
    }
}

impl fmt::Debug for MultiplexedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedConnection")
            .field("id", &self.inner.id)
            .field("sessions", &self.session_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
