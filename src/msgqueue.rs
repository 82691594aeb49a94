//! # Bounded Message Queue
//!
//! A fixed-capacity ring buffer of fixed-size messages. `send` and
//! `receive` both run under a critical section so the queue is safe to use
//! from task context and ISR context alike; a `send` against a full queue
//! increments a drop counter instead of blocking or overwriting.

use crate::critical;
use crate::error::{OsError, OsResult};

/// A fixed-size message payload. Keeping this small and `Copy` means the
/// queue can move messages by value through the ring buffer with no
/// indirection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Message {
    pub kind: u32,
    pub data: u32,
    pub ptr: *mut (),
}

unsafe impl Send for Message {}

pub struct MessageQueue {
    buffer: *mut Message,
    capacity: usize,
    count: usize,
    head: usize,
    tail: usize,
    dropped: u32,
}

unsafe impl Send for MessageQueue {}
unsafe impl Sync for MessageQueue {}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            buffer: core::ptr::null_mut(),
            capacity: 0,
            count: 0,
            head: 0,
            tail: 0,
            dropped: 0,
        }
    }

    pub fn init(&mut self, buffer: &'static mut [Message]) -> OsResult<()> {
        if buffer.is_empty() {
            return Err(OsError::Invalid);
        }
        critical::critical_section(|| {
            self.buffer = buffer.as_mut_ptr();
            self.capacity = buffer.len();
            self.count = 0;
            self.head = 0;
            self.tail = 0;
            self.dropped = 0;
        });
        Ok(())
    }

    /// Enqueue `msg` at the tail. Counts and reports `Full` instead of
    /// overwriting the oldest message or blocking.
    pub fn send(&mut self, msg: Message) -> OsResult<()> {
        critical::critical_section(|| {
            if self.count >= self.capacity {
                self.dropped += 1;
                return Err(OsError::Full);
            }
            unsafe {
                self.buffer.add(self.tail).write(msg);
            }
            self.tail = (self.tail + 1) % self.capacity;
            self.count += 1;
            Ok(())
        })
    }

    /// Dequeue the message at the head, in strict FIFO order.
    pub fn receive(&mut self) -> OsResult<Message> {
        critical::critical_section(|| {
            if self.count == 0 {
                return Err(OsError::Empty);
            }
            let msg = unsafe { self.buffer.add(self.head).read() };
            self.head = (self.head + 1) % self.capacity;
            self.count -= 1;
            Ok(msg)
        })
    }

    pub fn count(&self) -> usize {
        critical::critical_section(|| self.count)
    }

    pub fn space(&self) -> usize {
        critical::critical_section(|| self.capacity - self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        critical::critical_section(|| self.count >= self.capacity)
    }

    /// Number of `send` calls that found the queue full and were dropped.
    pub fn dropped(&self) -> u32 {
        critical::critical_section(|| self.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(data: u32) -> Message {
        Message { kind: 0, data, ptr: core::ptr::null_mut() }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let storage = Box::leak(vec![Message::default(); 4].into_boxed_slice());
        let mut q = MessageQueue::new();
        q.init(storage).unwrap();

        q.send(msg(1)).unwrap();
        q.send(msg(2)).unwrap();
        q.send(msg(3)).unwrap();

        assert_eq!(q.receive().unwrap().data, 1);
        assert_eq!(q.receive().unwrap().data, 2);
        assert_eq!(q.receive().unwrap().data, 3);
    }

    #[test]
    fn receive_on_empty_queue_reports_empty() {
        let storage = Box::leak(vec![Message::default(); 2].into_boxed_slice());
        let mut q = MessageQueue::new();
        q.init(storage).unwrap();
        assert_eq!(q.receive().unwrap_err(), OsError::Empty);
    }

    #[test]
    fn overflow_increments_the_drop_counter() {
        let storage = Box::leak(vec![Message::default(); 4].into_boxed_slice());
        let mut q = MessageQueue::new();
        q.init(storage).unwrap();

        for i in 0..4 {
            q.send(msg(i)).unwrap();
        }
        for i in 4..6 {
            assert_eq!(q.send(msg(i)).unwrap_err(), OsError::Full);
        }
        assert_eq!(q.dropped(), 2);
        assert!(q.is_full());
    }

    #[test]
    fn count_and_space_track_occupancy() {
        let storage = Box::leak(vec![Message::default(); 4].into_boxed_slice());
        let mut q = MessageQueue::new();
        q.init(storage).unwrap();
        assert!(q.is_empty());
        q.send(msg(1)).unwrap();
        q.send(msg(2)).unwrap();
        assert_eq!(q.count(), 2);
        assert_eq!(q.space(), 2);
    }
}
