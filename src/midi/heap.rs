//! A bounded, thread-safe min-heap keeping outbound MIDI messages in order.
//!
//! The sequencer inserts messages as it walks the pattern; the pump thread
//! pops them back in `(time, port)` order. Both sides block: `insert` waits
//! for space when the heap is full, `peek_min`/`pop_min` wait for an element
//! when it is empty. `close` wakes every waiter so the threads can exit
//! during shutdown.

use std::sync::{Condvar, Mutex};

use crate::error::EngineError;
use crate::midi::message::MidiMessage;

pub struct TimeHeap {
    state: Mutex<HeapState>,
    can_read: Condvar,
    can_write: Condvar,
}

struct HeapState {
    slots: Vec<MidiMessage>,
    len: usize,
    closed: bool,
}

fn parent(i: usize) -> Option<usize> {
    if i == 0 {
        None
    } else {
        Some((i + 1) / 2 - 1)
    }
}

fn lchild(i: usize) -> usize {
    (i + 1) * 2 - 1
}

fn rchild(i: usize) -> usize {
    (i + 1) * 2
}

impl HeapState {
    /// Index of the in-range child with the smaller `(time, port)` key.
    fn imin(&self, i: usize, j: usize) -> Option<usize> {
        match (i < self.len, j < self.len) {
            (true, false) => Some(i),
            (false, true) => Some(j),
            (false, false) => None,
            (true, true) => {
                if self.slots[i].key() <= self.slots[j].key() {
                    Some(i)
                } else {
                    Some(j)
                }
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        while let Some(j) = self.imin(lchild(i), rchild(i)) {
            if self.slots[i].time <= self.slots[j].time {
                break;
            }
            self.slots.swap(i, j);
            i = j;
        }
    }
}

impl TimeHeap {
    pub fn new(capacity: usize) -> Self {
        TimeHeap {
            state: Mutex::new(HeapState {
                slots: vec![MidiMessage::default(); capacity],
                len: 0,
                closed: false,
            }),
            can_read: Condvar::new(),
            can_write: Condvar::new(),
        }
    }

    /// Add a message while maintaining the order.
    ///
    /// Blocks until there is space in the buffer. The sift-up compares times
    /// only, so messages with equal timestamps keep their insertion order.
    pub fn insert(&self, msg: MidiMessage) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        while !st.closed && st.len + 1 >= st.slots.len() {
            st = self.can_write.wait(st).unwrap();
        }
        if st.closed {
            return Err(EngineError::Shutdown);
        }

        let mut i = st.len;
        st.slots[i] = msg;
        st.len += 1;
        while let Some(p) = parent(i) {
            if st.slots[i].time < st.slots[p].time {
                st.slots.swap(i, p);
                i = p;
            } else {
                break;
            }
        }

        self.can_read.notify_all();
        Ok(())
    }

    /// Remove and return the earliest message.
    ///
    /// Blocks until there is an element to read.
    pub fn pop_min(&self) -> Result<MidiMessage, EngineError> {
        let mut st = self.state.lock().unwrap();
        while !st.closed && st.len == 0 {
            st = self.can_read.wait(st).unwrap();
        }
        if st.closed {
            return Err(EngineError::Shutdown);
        }

        let min = st.slots[0];
        st.len -= 1;
        let last = st.len;
        st.slots[0] = st.slots[last];
        st.sift_down(0);

        self.can_write.notify_all();
        Ok(min)
    }

    /// Return a copy of the earliest message without removing it.
    ///
    /// Blocks until there is an element to look at.
    pub fn peek_min(&self) -> Result<MidiMessage, EngineError> {
        let mut st = self.state.lock().unwrap();
        while !st.closed && st.len == 0 {
            st = self.can_read.wait(st).unwrap();
        }
        if st.closed {
            return Err(EngineError::Shutdown);
        }
        Ok(st.slots[0])
    }

    /// The number of messages currently held.
    pub fn count(&self) -> usize {
        self.state.lock().unwrap().len
    }

    /// Refuse further work and wake every blocked caller.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.can_read.notify_all();
        self.can_write.notify_all();
    }
}
