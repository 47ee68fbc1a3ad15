//! Worker queues
//!
//! `Mailbox` is the FIFO feeding a single worker thread: producers push,
//! the worker blocks in `pop` until an item arrives or the mailbox is closed.
//! Closing keeps what is already queued, so the worker drains it before
//! `pop` returns `None`.
//!
//! `reply` builds a one-shot slot for handing a single result back to a
//! blocked caller. Dropping the sending half without replying wakes the
//! receiver with `None`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct Queue<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-producer queue drained by one worker
pub(crate) struct Mailbox<T> {
    queue: Mutex<Queue<T>>,
    work_ready: Condvar,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Mailbox {
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                closed: false,
            }),
            work_ready: Condvar::new(),
        }
    }

    /// Queue `item`; hands it back if the mailbox is closed
    pub(crate) fn push(&self, item: T) -> std::result::Result<(), T> {
        {
            let mut queue = self.queue.lock();
            if queue.closed {
                return Err(item);
            }
            queue.items.push_back(item);
        }
        self.work_ready.notify_one();
        Ok(())
    }

    /// Block until an item is available, or `None` once closed and empty
    pub(crate) fn pop(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(item) = queue.items.pop_front() {
                return Some(item);
            }
            if queue.closed {
                return None;
            }
            self.work_ready.wait(&mut queue);
        }
    }

    /// Refuse further pushes and wake the worker; idempotent
    pub(crate) fn close(&self) {
        // Notify under the lock so a worker between its check and wait sees it
        let mut queue = self.queue.lock();
        queue.closed = true;
        self.work_ready.notify_all();
    }
}

enum Slot<T> {
    Empty,
    Full(T),
    Abandoned,
}

struct ReplyInner<T> {
    slot: Mutex<Slot<T>>,
    filled: Condvar,
}

/// Sending half of a one-shot reply
pub(crate) struct Replier<T> {
    inner: Arc<ReplyInner<T>>,
    sent: bool,
}

/// Receiving half of a one-shot reply
pub(crate) struct Reply<T> {
    inner: Arc<ReplyInner<T>>,
}

/// Create a connected replier and reply
pub(crate) fn reply<T>() -> (Replier<T>, Reply<T>) {
    let inner = Arc::new(ReplyInner {
        slot: Mutex::new(Slot::Empty),
        filled: Condvar::new(),
    });
    (
        Replier {
            inner: Arc::clone(&inner),
            sent: false,
        },
        Reply { inner },
    )
}

impl<T> Replier<T> {
    pub(crate) fn send(mut self, value: T) {
        self.fill(Slot::Full(value));
        self.sent = true;
    }

    fn fill(&self, slot: Slot<T>) {
        let mut current = self.inner.slot.lock();
        *current = slot;
        self.inner.filled.notify_all();
    }
}

impl<T> Drop for Replier<T> {
    fn drop(&mut self) {
        if !self.sent {
            self.fill(Slot::Abandoned);
        }
    }
}

impl<T> Reply<T> {
    /// Block until the value arrives; `None` if the replier was dropped
    pub(crate) fn recv(self) -> Option<T> {
        let mut slot = self.inner.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Abandoned) {
                Slot::Full(value) => return Some(value),
                Slot::Abandoned => return None,
                Slot::Empty => {
                    *slot = Slot::Empty;
                    self.inner.filled.wait(&mut slot);
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.slot.lock() {
            Slot::Empty => "empty",
            Slot::Full(_) => "full",
            Slot::Abandoned => "abandoned",
        };
        f.debug_struct("Reply").field("state", &state).finish()
    }
}
