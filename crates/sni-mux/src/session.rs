//! Multiplexed sessions.
//!
//! A [`Session`] is one logical stream on a [`MultiplexedConnection`]. It
//! carries its own sequence numbers and credit window:
//!
//! - SYN carries sequence 0, every DATA frame the next sequence number, and
//!   ACK/FIN frames the last one sent.
//! - A DATA frame may go out only while its sequence number is within the
//!   highwater the peer granted. Sends beyond that wait in a FIFO queue.
//! - Each consumed inbound payload raises the receive highwater; once more
//!   than [`ACK_THRESHOLD`](crate::ACK_THRESHOLD) consumed frames are
//!   unacknowledged an ACK frame reports the new highwater.
//!
//! [`MultiplexedConnection`]: crate::MultiplexedConnection

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use smallvec::SmallVec;
use sni_protocol::{FrameFlags, FrameHeader};
use sni_tls::TlsConfig;
use sni_transport::{
    AsyncOp, Completion, CompletionSender, Packet, Provider, SniErrorCode, TransportError,
    TransportHandle,
};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::INITIAL_HIGHWATER;
use crate::connection::{FrameSender, Shared};

// =============================================================================
// Per-session state
// =============================================================================

/// State shared between a [`Session`] and the connection's receive task.
pub(crate) struct SessionState {
    id: u16,
    flow: Mutex<Flow>,
    inbox: Mutex<Inbox>,
    closed: AtomicBool,
}

struct Flow {
    /// Last sequence number put on the wire.
    sequence_number: u32,
    send_highwater: u32,
    receive_highwater: u32,
    last_acked: u32,
    queue: VecDeque<QueuedSend>,
    error: Option<TransportError>,
}

struct QueuedSend {
    packet: Packet,
    done: CompletionSender<()>,
}

#[derive(Default)]
struct Inbox {
    packets: VecDeque<Packet>,
    waiters: VecDeque<oneshot::Sender<Packet>>,
    error: Option<TransportError>,
}

type Failed = SmallVec<[Packet; 2]>;

impl Flow {
    fn new() -> Self {
        Self {
            sequence_number: 0,
            send_highwater: INITIAL_HIGHWATER,
            receive_highwater: INITIAL_HIGHWATER,
            last_acked: INITIAL_HIGHWATER,
            queue: VecDeque::new(),
            error: None,
        }
    }

    /// Whether the next DATA frame fits in the peer's window.
    fn window_open(&self) -> bool {
        let next = self.sequence_number.wrapping_add(1);
        self.send_highwater.wrapping_sub(next) as i32 >= 0
    }

    /// Build a frame and record the highwater it carries as acknowledged.
    fn frame(&mut self, session_id: u16, flags: FrameFlags, payload: &[u8]) -> Packet {
        if flags == FrameFlags::Data {
            self.sequence_number = self.sequence_number.wrapping_add(1);
        }
        let header = FrameHeader::new(
            flags,
            session_id,
            payload.len() as u32,
            self.sequence_number,
            self.receive_highwater,
        );
        self.last_acked = self.receive_highwater;

        let mut packet = Packet::with_capacity(header.length as usize);
        packet.append_data(&header.encode_to_array());
        packet.append_data(payload);
        packet
    }

    /// Move queued sends onto the wire while the window allows.
    ///
    /// Returns the frames the writer refused; their completions must run
    /// after the lock is released.
    fn pump(&mut self, session_id: u16, writer: &FrameSender) -> Failed {
        let mut failed = Failed::new();
        while self.window_open() {
            let Some(QueuedSend { mut packet, done }) = self.queue.pop_front() else {
                break;
            };
            let mut frame = self.frame(session_id, FrameFlags::Data, packet.data());
            frame.set_completion(move |result| {
                packet.invoke_completion(result.clone());
                done.complete(result);
            });
            tracing::trace!(
                session = session_id,
                seq = self.sequence_number,
                highwater = self.send_highwater,
                "data frame queued"
            );
            if let Err(mpsc::error::SendError(frame)) = writer.send(frame) {
                failed.push(frame);
            }
        }
        failed
    }

    fn drain(&mut self) -> Vec<QueuedSend> {
        self.queue.drain(..).collect()
    }
}

fn fail_frames(failed: Failed) {
    for mut frame in failed {
        frame.invoke_completion(Err(TransportError::terminated(Provider::Smux)));
    }
}

impl SessionState {
    pub(crate) fn new(id: u16) -> Self {
        Self {
            id,
            flow: Mutex::new(Flow::new()),
            inbox: Mutex::new(Inbox::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u16 {
        self.id
    }

    /// SYN frame opening the session. `done` reports the write.
    pub(crate) fn syn_frame(&self, done: CompletionSender<()>) -> Packet {
        let mut frame = self.flow.lock().frame(self.id, FrameFlags::Syn, &[]);
        frame.set_completion(move |result| done.complete(result));
        frame
    }

    /// Peer granted credit up to `highwater`.
    pub(crate) fn handle_ack(&self, highwater: u32, writer: &FrameSender) {
        let failed = {
            let mut flow = self.flow.lock();
            if flow.send_highwater == highwater {
                return;
            }
            tracing::trace!(
                session = self.id,
                from = flow.send_highwater,
                to = highwater,
                "send window moved"
            );
            flow.send_highwater = highwater;
            flow.pump(self.id, writer)
        };
        fail_frames(failed);
    }

    /// A DATA frame arrived for this session.
    pub(crate) fn handle_data(&self, highwater: u32, mut payload: Packet, writer: &FrameSender) {
        self.handle_ack(highwater, writer);

        if self.closed.load(Ordering::Acquire) {
            tracing::trace!(session = self.id, "dropping data for closed session");
            return;
        }

        let mut inbox = self.inbox.lock();
        if inbox.error.is_some() {
            return;
        }
        while let Some(waiter) = inbox.waiters.pop_front() {
            match waiter.send(payload) {
                Ok(()) => return,
                Err(returned) => payload = returned,
            }
        }
        inbox.packets.push_back(payload);
    }

    /// Fail every pending and future operation with `err`.
    ///
    /// Only the first error sticks.
    pub(crate) fn fail(&self, err: TransportError) {
        let queued = {
            let mut flow = self.flow.lock();
            if flow.error.is_none() {
                flow.error = Some(err.clone());
            }
            flow.drain()
        };
        {
            let mut inbox = self.inbox.lock();
            if inbox.error.is_none() {
                inbox.error = Some(err.clone());
            }
            // Dropped senders wake their receivers, which then read the error.
            inbox.waiters.clear();
        }
        for QueuedSend { mut packet, done } in queued {
            packet.invoke_completion(Err(err.clone()));
            done.complete(Err(err.clone()));
        }
    }

    fn error(&self) -> Option<TransportError> {
        self.inbox.lock().error.clone()
    }
}

// =============================================================================
// Session handle
// =============================================================================

/// One logical stream on a multiplexed connection.
///
/// Implements [`TransportHandle`], so layers above treat it like any
/// physical handle. Dropping a session closes it.
pub struct Session {
    id: Uuid,
    state: Arc<SessionState>,
    conn: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(state: Arc<SessionState>, conn: Arc<Shared>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            conn,
        }
    }

    /// Session id carried in every frame header.
    #[must_use]
    pub fn session_id(&self) -> u16 {
        self.state.id
    }

    /// Whether [`close`](TransportHandle::close) has run or the session was
    /// dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Queue `packet` behind earlier sends of this session.
    fn enqueue(&self, mut packet: Packet) -> Result<Completion<()>, TransportError> {
        if let Err(err) = self.check_send(&packet) {
            packet.invoke_completion(Err(err.clone()));
            return Err(err);
        }

        let (done, completion) = Completion::channel();
        let failed = {
            let mut flow = self.state.flow.lock();
            if let Some(err) = flow.error.clone() {
                drop(flow);
                packet.invoke_completion(Err(err.clone()));
                return Err(err);
            }
            flow.queue.push_back(QueuedSend { packet, done });
            flow.pump(self.state.id, &self.conn.writer)
        };
        fail_frames(failed);
        Ok(completion)
    }

    fn check_send(&self, packet: &Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::not_usable(Provider::Smux));
        }
        self.conn.check_usable()?;
        if packet.len() > self.conn.config.max_frame_payload {
            return Err(TransportError::new(
                Provider::Smux,
                SniErrorCode::InvalidParameter,
                format!(
                    "packet of {} bytes exceeds the frame payload limit of {}",
                    packet.len(),
                    self.conn.config.max_frame_payload
                ),
            ));
        }
        Ok(())
    }

    /// Mark the session closed and queue its FIN. Returns `None` when the
    /// session was already closed or the connection is gone.
    fn shutdown(&self) -> Option<Completion<()>> {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return None;
        }

        let fin = {
            let mut flow = self.state.flow.lock();
            if flow.error.is_some() {
                None
            } else {
                let (done, completion) = Completion::channel();
                let mut frame = flow.frame(self.state.id, FrameFlags::Fin, &[]);
                frame.set_completion(move |result| done.complete(result));
                self.conn.writer.send(frame).ok().map(|()| completion)
            }
        };

        self.state.fail(TransportError::not_usable(Provider::Smux));
        tracing::debug!(session = self.state.id, fin = fin.is_some(), "session closed");
        fin
    }
}

/// Wait for the next payload of `state`, then account for its consumption.
async fn receive_from(
    state: Arc<SessionState>,
    conn: Arc<Shared>,
    timeout: Option<Duration>,
) -> Result<Packet, TransportError> {
    let mut rx = {
        let mut inbox = state.inbox.lock();
        if let Some(packet) = inbox.packets.pop_front() {
            drop(inbox);
            consumed(&state, &conn);
            return Ok(packet);
        }
        if let Some(err) = &inbox.error {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        inbox.waiters.push_back(tx);
        rx
    };

    let received = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, &mut rx).await {
            Ok(received) => received,
            Err(_) => {
                // A payload may have landed as the timer fired.
                rx.close();
                match rx.try_recv() {
                    Ok(packet) => Ok(packet),
                    Err(_) => return Err(TransportError::timeout(Provider::Smux)),
                }
            }
        },
        None => (&mut rx).await,
    };

    match received {
        Ok(packet) => {
            consumed(&state, &conn);
            Ok(packet)
        }
        Err(_) => Err(state
            .error()
            .unwrap_or_else(|| TransportError::terminated(Provider::Smux))),
    }
}

/// Raise the receive highwater and acknowledge once past the threshold.
fn consumed(state: &SessionState, conn: &Shared) {
    let mut flow = state.flow.lock();
    flow.receive_highwater = flow.receive_highwater.wrapping_add(1);

    let unacked = flow.receive_highwater.wrapping_sub(flow.last_acked);
    if unacked > conn.config.ack_threshold
        && flow.error.is_none()
        && !state.closed.load(Ordering::Acquire)
    {
        let frame = flow.frame(state.id, FrameFlags::Ack, &[]);
        tracing::trace!(
            session = state.id,
            highwater = flow.receive_highwater,
            "ack queued"
        );
        // A closed writer means the connection is already torn down.
        let _ = conn.writer.send(frame);
    }
}

fn not_on_session() -> TransportError {
    TransportError::new(
        Provider::Smux,
        SniErrorCode::InvalidParameter,
        "TLS is negotiated on the physical connection before multiplexing starts",
    )
}

#[async_trait]
impl TransportHandle for Session {
    fn connection_id(&self) -> Uuid {
        self.id
    }

    fn provider(&self) -> Provider {
        Provider::Smux
    }

    async fn send(&self, packet: Packet) -> Result<(), TransportError> {
        self.enqueue(packet)?.await
    }

    fn send_async(&self, packet: Packet, force_callback: bool) -> AsyncOp<()> {
        let queued = self.enqueue(packet);
        AsyncOp::start(async move { queued?.await }, force_callback)
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Packet, TransportError> {
        receive_from(Arc::clone(&self.state), Arc::clone(&self.conn), timeout).await
    }

    fn receive_async(&self, force_callback: bool) -> AsyncOp<Packet> {
        AsyncOp::start(
            receive_from(Arc::clone(&self.state), Arc::clone(&self.conn), None),
            force_callback,
        )
    }

    async fn enable_tls(&self, _config: &TlsConfig) -> Result<(), TransportError> {
        Err(not_on_session())
    }

    async fn disable_tls(&self) -> Result<(), TransportError> {
        Err(not_on_session())
    }

    fn check_connection(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::not_usable(Provider::Smux));
        }
        self.conn.check_connection()
    }

    fn kill(&self) {
        self.conn.kill();
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(fin) = self.shutdown() {
            if let Err(e) = fin.await {
                tracing::debug!(session = self.state.id, error = %e, "FIN not written");
            }
        }
        Ok(())
    }

    fn set_buffer_size(&self, size: usize) {
        self.conn.lower.set_buffer_size(size);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("session_id", &self.state.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
