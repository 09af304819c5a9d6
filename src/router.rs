//! The Response Router: per-reference mailboxes plus the active streaming-frame channel.
//!
//! The Router is driven by the Transport's notification callback, which may run on an
//! unrelated thread from the waiter. It hands responses off to waiters through
//! [`tokio::sync::oneshot`] mailboxes and streamed data frames through a
//! [`tokio::sync::mpsc`] channel — both thread-safe, so the Session's single-task
//! discipline over the outstanding-reference map never needs its own lock on the hot
//! notification path.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::codec::{self, InboundFrame};

/// A decoded `CommandResponse`, handed to the waiter armed for its reference.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommandOutcome {
    pub status_code: Option<u16>,
    pub data: Vec<u8>,
}

/// One streamed data frame, handed to the active stream reader.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StreamFrame {
    pub payload: Vec<u8>,
}

struct StreamSlot {
    reference: u8,
    sender: mpsc::UnboundedSender<StreamFrame>,
}

#[derive(Default)]
struct RouterState {
    outstanding: HashMap<u8, oneshot::Sender<CommandOutcome>>,
    stream: Option<StreamSlot>,
    hello_reference: Option<u8>,
}

/// Classifies and routes every inbound GSP frame for one [`crate::session::Session`].
pub struct ResponseRouter {
    state: Mutex<RouterState>,
}

impl ResponseRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Registers `reference` as the Session's HELLO reference so the codec can suppress
    /// status-word parsing for that one response. Must be called before the HELLO
    /// command is dispatched.
    pub fn set_hello_reference(&self, reference: u8) {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).hello_reference = Some(reference);
    }

    /// Arms a mailbox for `reference`. Must be called before the corresponding command
    /// is written, so a data frame or response that arrives first is never lost.
    pub fn arm(&self, reference: u8) -> oneshot::Receiver<CommandOutcome> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.outstanding.insert(reference, sender);
        receiver
    }

    /// Removes a mailbox without waiting for a response — used when a command's
    /// deadline elapses so the Router can cleanly drop a now-orphaned response.
    pub fn disarm(&self, reference: u8) {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).outstanding.remove(&reference);
    }

    /// Arms the single active-stream slot for `reference`. Must be called before the
    /// triggering command (e.g. `FETCH_LOG`) is written.
    pub fn arm_stream(&self, reference: u8) -> mpsc::UnboundedReceiver<StreamFrame> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.stream = Some(StreamSlot { reference, sender });
        receiver
    }

    /// Disarms the active-stream slot, if any. Dropping the sender closes the
    /// receiver, which unblocks a waiting reader.
    pub fn disarm_stream(&self) {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).stream = None;
    }

    /// Decodes and routes one raw notification payload. Invoked from the transport's
    /// notification callback.
    pub fn dispatch_bytes(&self, bytes: &[u8]) {
        let hello_reference = self
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .hello_reference;
        let frame = match codec::decode_frame(bytes, |reference| Some(reference) == hello_reference)
        {
            Ok(frame) => frame,
            Err(error) => {
                warn!(?error, "discarding malformed inbound frame");
                return;
            }
        };
        self.dispatch(frame);
    }

    /// Routes one already-decoded frame.
    pub fn dispatch(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::CommandResponse {
                reference,
                status_code,
                data,
            } => {
                let sender = {
                    let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
                    state.outstanding.remove(&reference)
                };
                match sender {
                    Some(sender) => {
                        // A dropped receiver (cancelled waiter) makes this a no-op, matching
                        // "a subsequent response for that reference is treated as orphan".
                        let _ = sender.send(CommandOutcome { status_code, data });
                    }
                    None => {
                        warn!(reference, "discarding response for unknown or completed reference");
                    }
                }
            }
            InboundFrame::DataFrame { reference, payload }
            | InboundFrame::DataFramePart2 { reference, payload } => {
                let state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
                match &state.stream {
                    Some(slot) if slot.reference == reference => {
                        let _ = slot.sender.send(StreamFrame { payload });
                    }
                    _ => {
                        warn!(reference, "discarding data frame with no active stream reader");
                    }
                }
            }
        }
    }

    /// Returns whether there are no outstanding mailboxes and no active stream.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.outstanding.is_empty() && state.stream.is_none()
    }

    /// Drops every outstanding mailbox and the active stream slot. Called on
    /// `Session::close` (and, implicitly, on Drop) so `Cancelled` is observed by every
    /// waiter instead of leaving them pending forever.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        state.outstanding.clear();
        state.stream = None;
    }
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn delivers_command_response_to_armed_mailbox() {
        let router = ResponseRouter::new();
        let receiver = router.arm(0x65);

        router.dispatch(InboundFrame::CommandResponse {
            reference: 0x65,
            status_code: Some(200),
            data: vec![0x02],
        });

        let outcome = receiver.await.expect("mailbox should receive delivery");
        assert_eq!(Some(200), outcome.status_code);
        assert_eq!(vec![0x02], outcome.data);
    }

    #[tokio::test]
    async fn second_response_for_same_reference_is_discarded() {
        let router = ResponseRouter::new();
        let receiver = router.arm(0x65);

        router.dispatch(InboundFrame::CommandResponse {
            reference: 0x65,
            status_code: Some(200),
            data: vec![],
        });
        // Second delivery for the same (now-removed) reference must not panic and
        // must not be observable by the original waiter.
        router.dispatch(InboundFrame::CommandResponse {
            reference: 0x65,
            status_code: Some(200),
            data: vec![0xFF],
        });

        let outcome = receiver.await.expect("first delivery should win");
        assert_eq!(Vec::<u8>::new(), outcome.data);
    }

    #[tokio::test]
    async fn cancelling_a_waiter_drops_its_mailbox_entry() {
        let router = ResponseRouter::new();
        let receiver = router.arm(0x65);
        drop(receiver);

        // Orphaned response after cancellation: must not panic.
        router.dispatch(InboundFrame::CommandResponse {
            reference: 0x65,
            status_code: Some(200),
            data: vec![],
        });
    }

    #[tokio::test]
    async fn data_frame_without_active_stream_is_discarded_not_panicking() {
        let router = ResponseRouter::new();
        router.dispatch(InboundFrame::DataFrame {
            reference: 0x65,
            payload: vec![1, 2, 3],
        });
    }

    #[tokio::test]
    async fn data_frame_is_routed_to_the_armed_stream() {
        let router = ResponseRouter::new();
        let mut receiver = router.arm_stream(0x65);

        router.dispatch(InboundFrame::DataFrame {
            reference: 0x65,
            payload: vec![1, 2, 3],
        });

        let frame = receiver.recv().await.expect("stream frame should be delivered");
        assert_eq!(vec![1, 2, 3], frame.payload);
    }

    #[tokio::test]
    async fn data_frame_arriving_before_command_response_is_buffered_by_arming_first() {
        let router = ResponseRouter::new();
        // Arm the stream before the triggering command would be written.
        let mut stream_receiver = router.arm_stream(0x65);
        let response_receiver = router.arm(0x65);

        // Data frame observed before the initial command response, in practice for FETCH_LOG.
        router.dispatch(InboundFrame::DataFrame {
            reference: 0x65,
            payload: vec![0, 0, 0, 0],
        });
        router.dispatch(InboundFrame::CommandResponse {
            reference: 0x65,
            status_code: Some(200),
            data: vec![],
        });

        let outcome = response_receiver.await.expect("response should still arrive");
        assert_eq!(Some(200), outcome.status_code);
        let frame = stream_receiver.recv().await.expect("buffered data frame should arrive");
        assert_eq!(vec![0, 0, 0, 0], frame.payload);
    }

    #[tokio::test]
    async fn cancel_all_unblocks_pending_waiters() {
        let router = ResponseRouter::new();
        let receiver = router.arm(0x65);
        let mut stream_receiver = router.arm_stream(0x65);

        router.cancel_all();

        assert!(receiver.await.is_err());
        assert_eq!(None, stream_receiver.recv().await);
    }

    #[tokio::test]
    async fn hello_response_suppresses_status_word_parsing_via_dispatch_bytes() {
        let router = ResponseRouter::new();
        router.set_hello_reference(0x64);
        let receiver = router.arm(0x64);

        let mut bytes = vec![0x01, 0x64, 0x01];
        bytes.extend_from_slice(b"241330000455\0");
        router.dispatch_bytes(&bytes);

        let outcome = receiver.await.expect("HELLO response should be delivered");
        assert_eq!(None, outcome.status_code);
    }

    #[tokio::test]
    async fn malformed_frame_is_discarded_without_panicking() {
        let router = ResponseRouter::new();
        router.dispatch_bytes(&[0x01]);
    }
}
