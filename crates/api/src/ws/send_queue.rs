//! Per-participant outbound message queue.
//!
//! Producer is the Room task (and the connection's reader loop for `pong`);
//! consumer is the connection's writer task. The Room must never block on a
//! slow socket, so the queue is bounded with a drop-oldest-non-critical
//! overflow policy: `translation` and `pong` frames may be shed, roster and
//! error frames may not. When a critical frame cannot be queued the push
//! fails and the caller disconnects the participant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Notify;

use crate::protocol::ServerMessage;

#[derive(Debug, Error)]
#[error("send queue full of undroppable messages")]
pub struct QueueOverflow;

struct QueueState {
    items: VecDeque<ServerMessage>,
    closed: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    capacity: usize,
    /// Wakes the writer task when an item arrives or the queue closes.
    items: Notify,
    /// Wakes the reader loop when the queue closes (forced disconnect).
    closed: Notify,
}

#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity.min(64)),
                    closed: false,
                }),
                capacity: capacity.max(1),
                items: Notify::new(),
                closed: Notify::new(),
            }),
        }
    }

    /// Enqueues a message, shedding the oldest droppable message on
    /// overflow. `Err` means the queue is full of critical messages and the
    /// participant must be disconnected.
    pub fn push(&self, msg: ServerMessage) -> Result<(), QueueOverflow> {
        {
            let mut state = self.inner.state.lock().expect("send queue poisoned");
            if state.closed {
                // Connection is going away; nothing to deliver to.
                return Ok(());
            }
            if state.items.len() >= self.inner.capacity {
                if let Some(idx) = state.items.iter().position(|m| !m.is_critical()) {
                    let _ = state.items.remove(idx);
                } else if msg.is_critical() {
                    return Err(QueueOverflow);
                } else {
                    // Everything queued outranks the newcomer; shed it.
                    return Ok(());
                }
            }
            state.items.push_back(msg);
        }
        self.inner.items.notify_one();
        Ok(())
    }

    /// Next message to write, or None once the queue is closed and drained.
    pub async fn pop(&self) -> Option<ServerMessage> {
        loop {
            let notified = self.inner.items.notified();
            {
                let mut state = self.inner.state.lock().expect("send queue poisoned");
                if let Some(msg) = state.items.pop_front() {
                    return Some(msg);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue: pending messages still drain, new pushes are
    /// ignored, and both attached tasks wake up.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock().expect("send queue poisoned");
            state.closed = true;
        }
        self.inner.items.notify_waiters();
        self.inner.closed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("send queue poisoned").closed
    }

    /// Resolves once the queue has been closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.closed.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.state.lock().expect("send queue poisoned").items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use std::collections::BTreeMap;

    fn translation(text: &str) -> ServerMessage {
        ServerMessage::Translation {
            speaker_id: "P_01".into(),
            speaker_name: "Bob".into(),
            source_lang: "en".into(),
            source_text: text.into(),
            translations: BTreeMap::new(),
            timestamp: 0.0,
        }
    }

    fn left(id: &str) -> ServerMessage {
        ServerMessage::ParticipantLeft {
            participant_id: id.into(),
        }
    }

    #[tokio::test]
    async fn overflow_sheds_oldest_droppable() {
        let queue = OutboundQueue::new(2);
        queue.push(translation("first")).unwrap();
        queue.push(left("P_02")).unwrap();
        // Queue full: the droppable "first" goes, the critical entry stays.
        queue.push(translation("second")).unwrap();

        match queue.pop().await.unwrap() {
            ServerMessage::ParticipantLeft { participant_id } => {
                assert_eq!(participant_id, "P_02")
            }
            other => panic!("unexpected: {other:?}"),
        }
        match queue.pop().await.unwrap() {
            ServerMessage::Translation { source_text, .. } => assert_eq!(source_text, "second"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn critical_overflow_fails() {
        let queue = OutboundQueue::new(2);
        queue.push(left("P_01")).unwrap();
        queue.push(left("P_02")).unwrap();
        let err = queue.push(ServerMessage::error(ErrorCode::PipelineError, "x"));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn droppable_newcomer_is_shed_when_full_of_critical() {
        let queue = OutboundQueue::new(1);
        queue.push(left("P_01")).unwrap();
        queue.push(translation("ignored")).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = OutboundQueue::new(4);
        queue.push(ServerMessage::Pong).unwrap();
        queue.close();
        assert!(matches!(queue.pop().await, Some(ServerMessage::Pong)));
        assert!(queue.pop().await.is_none());
        // Pushes after close are ignored, not errors.
        queue.push(left("P_09")).unwrap();
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let queue = OutboundQueue::new(4);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.closed().await;
            })
        };
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        waiter.await.unwrap();
        assert!(popper.await.unwrap().is_none());
    }
}
