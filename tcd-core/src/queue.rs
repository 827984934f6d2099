//! Bounded blocking FIFO queue of shared frame handles.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::frame::Frame;

/// Backstop against a lost reader thread.
pub const OVERFLOW_LIMIT: usize = 200;

struct Inner {
    queue: VecDeque<Arc<Frame>>,
    running: bool,
}

/// A FIFO of `Arc<Frame>` handles with a blocking `pop` and a `shutdown`
/// that releases every blocked popper.
pub struct FrameQueue {
    state: Mutex<Inner>,
    not_empty: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        FrameQueue {
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                running: true,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes a frame and returns the new queue length. Unblocks one waiting
    /// popper.
    pub fn push(&self, frame: Arc<Frame>) -> usize {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.queue.push_back(frame);
        let len = state.queue.len();
        self.not_empty.notify_one();
        len
    }

    /// Blocks while the queue is empty and running; returns `None` once
    /// `shutdown` has been called and the queue has drained.
    pub fn pop(&self) -> Option<Arc<Frame>> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(frame) = state.queue.pop_front() {
                return Some(frame);
            }
            if !state.running {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .expect("queue condvar mutex poisoned");
        }
    }

    /// Empties the queue and wakes every blocked popper with `None` forever
    /// after.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.queue.clear();
        state.running = false;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CodecKind, IngressPayload};
    use std::thread;
    use std::time::Duration;

    fn dummy_frame(seq: u32) -> Arc<Frame> {
        Arc::new(Frame::new(
            'A',
            0,
            seq,
            false,
            CodecKind::Usrp,
            IngressPayload::Usrp([0; 160]),
        ))
    }

    #[test]
    fn push_pop_is_fifo() {
        let q = FrameQueue::new();
        q.push(dummy_frame(0));
        q.push(dummy_frame(1));
        assert_eq!(q.pop().unwrap().sequence, 0);
        assert_eq!(q.pop().unwrap().sequence, 1);
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(FrameQueue::new());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(50));
        q.push(dummy_frame(7));
        let popped = handle.join().unwrap();
        assert_eq!(popped.unwrap().sequence, 7);
    }

    #[test]
    fn shutdown_releases_blocked_poppers_with_none() {
        let q = Arc::new(FrameQueue::new());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(50));
        q.shutdown();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn shutdown_empties_the_queue() {
        let q = FrameQueue::new();
        q.push(dummy_frame(0));
        q.push(dummy_frame(1));
        q.shutdown();
        assert_eq!(q.len(), 0);
        assert!(q.pop().is_none());
    }
}
