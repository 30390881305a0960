//! FIFO correlation of pending requests with responses: an unbounded
//! multi-producer queue that the response loop drains in strict insertion
//! order.
use crate::error::{RedisError, RedisResult};
use crate::resp::Frame;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// A submitted request awaiting its response. `enqueue` happens while the
/// write mutex (held by the caller) is locked, exactly when the serialized
/// bytes are committed to the write pipe.
pub struct PendingRequest {
    completion: oneshot::Sender<RedisResult<Frame>>,
}

/// The caller's half: resolves when the response loop matches a frame, or
/// when cancelled.
pub struct PendingHandle {
    receiver: oneshot::Receiver<RedisResult<Frame>>,
}

impl PendingHandle {
    pub async fn wait(self) -> RedisResult<Frame> {
        match self.receiver.await {
            Ok(result) => result,
            // The sender was dropped without resolving — connection tore down.
            Err(_) => Err(RedisError::Disconnected("connection closed".into())),
        }
    }
}

pub fn pending_pair() -> (PendingRequest, PendingHandle) {
    let (tx, rx) = oneshot::channel();
    (
        PendingRequest { completion: tx },
        PendingHandle { receiver: rx },
    )
}

/// Single-reader (response loop), multi-writer (submitters via the write
/// mutex) FIFO. Not `Send`-shared directly — the connection engine owns one
/// instance and accesses it only from the write-mutex critical section
/// (`push_back`) and the response loop (`pop_front`).
#[derive(Default)]
pub struct RequestQueue {
    queue: VecDeque<Slot>,
    /// Monotonic count of slots ever popped from the front; lets a `Ticket`
    /// minted at enqueue time find its slot later even after earlier slots
    /// have resolved and shifted everything else's `VecDeque` index.
    consumed: usize,
    /// Monotonic count of slots ever pushed; the next ticket's absolute id.
    produced: usize,
}

enum Slot {
    Active(PendingRequest),
    /// Cancelled but not removed — its eventual response is dropped in place
    /// so wire ordering with later requests is never disturbed.
    Abandoned,
}

/// A cancellable ticket referencing a slot in the queue by absolute
/// insertion order. Holding this and calling `cancel` on the queue marks the
/// slot abandoned without physically removing it, however much time (and
/// however many other resolutions) passed since it was minted.
pub struct Ticket(usize);

impl RequestQueue {
    pub fn new() -> RequestQueue {
        RequestQueue {
            queue: VecDeque::new(),
            consumed: 0,
            produced: 0,
        }
    }

    /// Enqueues a pending request; returns a ticket usable for cancellation.
    pub fn enqueue(&mut self, request: PendingRequest) -> Ticket {
        let id = self.produced;
        self.produced += 1;
        self.queue.push_back(Slot::Active(request));
        Ticket(id)
    }

    /// Marks a still-outstanding request abandoned. No-op if it already
    /// resolved (the ticket's absolute id is behind the consumed count).
    pub fn cancel(&mut self, ticket: Ticket) {
        if ticket.0 < self.consumed {
            return;
        }
        let idx = ticket.0 - self.consumed;
        if let Some(slot) = self.queue.get_mut(idx) {
            if matches!(slot, Slot::Active(_)) {
                let _ = std::mem::replace(slot, Slot::Abandoned);
            }
        }
    }

    /// Pops the next slot in FIFO order and resolves it (or silently drops
    /// an abandoned one), matching one non-push response frame.
    pub fn resolve_next(&mut self, result: RedisResult<Frame>) -> bool {
        match self.queue.pop_front() {
            Some(Slot::Active(req)) => {
                self.consumed += 1;
                let _ = req.completion.send(result);
                true
            }
            Some(Slot::Abandoned) => {
                self.consumed += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains every outstanding slot, failing each active one with `cause`
    /// (connection teardown, /).
    pub fn fail_all(&mut self, cause: RedisError) {
        while let Some(slot) = self.queue.pop_front() {
            if let Slot::Active(req) = slot {
                let _ = req.completion.send(Err(cause.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn fifo_resolution_order() {
        let mut queue = RequestQueue::new();
        let (p1, h1) = pending_pair();
        let (p2, h2) = pending_pair();
        queue.enqueue(p1);
        queue.enqueue(p2);

        queue.resolve_next(Ok(Frame::Integer(1)));
        queue.resolve_next(Ok(Frame::Integer(2)));

        assert_eq!(h1.wait().await.unwrap(), Frame::Integer(1));
        assert_eq!(h2.wait().await.unwrap(), Frame::Integer(2));
    }

    #[tokio::test]
    async fn cancel_does_not_disturb_other_requests() {
        let mut queue = RequestQueue::new();
        let (p1, h1) = pending_pair();
        let (p2, h2) = pending_pair();
        let t1 = queue.enqueue(p1);
        queue.enqueue(p2);

        queue.cancel(t1);
        // The cancelled slot's eventual response is dropped in place...
        queue.resolve_next(Ok(Frame::SimpleString(Bytes::from_static(b"ignored"))));
        // ...and request 2 still resolves correctly, in order.
        queue.resolve_next(Ok(Frame::Integer(7)));

        assert_eq!(h2.wait().await.unwrap(), Frame::Integer(7));
        drop(h1);
    }

    #[tokio::test]
    async fn cancel_after_prior_resolution_still_finds_its_slot() {
        let mut queue = RequestQueue::new();
        let (p1, h1) = pending_pair();
        let (p2, h2) = pending_pair();
        let (p3, h3) = pending_pair();
        queue.enqueue(p1);
        let t2 = queue.enqueue(p2);
        queue.enqueue(p3);

        // Resolve the head first, shifting slot 2's position in the deque...
        queue.resolve_next(Ok(Frame::Integer(1)));
        assert_eq!(h1.wait().await.unwrap(), Frame::Integer(1));

        // ...the ticket minted before that must still cancel the right slot.
        queue.cancel(t2);
        queue.resolve_next(Ok(Frame::SimpleString(Bytes::from_static(b"ignored"))));
        queue.resolve_next(Ok(Frame::Integer(3)));

        assert_eq!(h3.wait().await.unwrap(), Frame::Integer(3));
        drop(h2);
    }

    #[tokio::test]
    async fn fail_all_resolves_every_outstanding_request() {
        let mut queue = RequestQueue::new();
        let (p1, h1) = pending_pair();
        let (p2, h2) = pending_pair();
        queue.enqueue(p1);
        queue.enqueue(p2);

        queue.fail_all(RedisError::Disconnected("socket closed".into()));

        assert!(matches!(h1.wait().await, Err(RedisError::Disconnected(_))));
        assert!(matches!(h2.wait().await, Err(RedisError::Disconnected(_))));
    }
}
