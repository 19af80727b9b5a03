/// Bounded message queue: a fixed-capacity circular buffer of fixed-size
/// slots, with separate priority-ordered blocked lists for producers
/// (waiting for space) and consumers (waiting for data).
///
/// The teacher's `interrupts::ScancodeQueue` is the same circular-buffer-
/// with-head/write/count shape, just fixed at `u8` and 128 slots and
/// without any blocking — it only ever gets drained by polling from
/// `task::keyboard`. This generalizes it to any `T`, an explicit capacity,
/// and real blocking producers/consumers, the way the specification's
/// queue primitive needs.
extern crate alloc;

use alloc::vec::Vec;
use spin::Mutex as SpinMutex;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::list::PriorityOrderedList;
use crate::task::scheduler;

struct Inner<T> {
    buf: Vec<Option<T>>,
    capacity: usize,
    head: usize,
    count: usize,
    producers: PriorityOrderedList,
    consumers: PriorityOrderedList,
}

pub struct Queue<T> {
    inner: SpinMutex<Inner<T>>,
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> KernelResult<Self> {
        if capacity == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut buf = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buf.push(None);
        }
        Ok(Queue {
            inner: SpinMutex::new(Inner {
                buf,
                capacity,
                head: 0,
                count: 0,
                producers: PriorityOrderedList::new(),
                consumers: PriorityOrderedList::new(),
            }),
        })
    }

    pub fn try_send(&self, item: T) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        if inner.count == inner.capacity {
            return Err(KernelError::WouldBlock);
        }
        let idx = (inner.head + inner.count) % inner.capacity;
        inner.buf[idx] = Some(item);
        inner.count += 1;
        if let Some(t) = inner.consumers.pop_front() {
            scheduler::wake_thread(t);
        }
        Ok(())
    }

    pub fn send(&self, item: T) -> KernelResult<()> {
        self.send_timeout(item, config::WAIT_FOREVER)
    }

    pub fn send_timeout(&self, item: T, timeout_ticks: u32) -> KernelResult<()> {
        let mut item = Some(item);
        loop {
            let mut inner = self.inner.lock();
            if inner.count < inner.capacity {
                let idx = (inner.head + inner.count) % inner.capacity;
                inner.buf[idx] = item.take();
                inner.count += 1;
                if let Some(t) = inner.consumers.pop_front() {
                    scheduler::wake_thread(t);
                }
                return Ok(());
            }
            if timeout_ticks == config::NO_WAIT {
                return Err(KernelError::WouldBlock);
            }
            // `inner` moves into the closure and drops there, inside the
            // scheduler's critical section, before `block_current` unmasks
            // interrupts and the pended switch fires — see
            // `sync::mutex::Mutex::lock_timeout`. Held past that point it
            // would still be locked across the switch, and `try_receive`
            // would spin on it forever trying to wake this very producer.
            let woken = scheduler::wait(timeout_ticks, move |t, prio| {
                let mut inner = inner;
                inner.producers.insert(t, prio);
            });
            if !woken {
                return Err(KernelError::Timeout);
            }
        }
    }

    pub fn try_receive(&self) -> KernelResult<T> {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            return Err(KernelError::WouldBlock);
        }
        let item = inner.buf[inner.head]
            .take()
            .expect("queue slot invariant violated");
        inner.head = (inner.head + 1) % inner.capacity;
        inner.count -= 1;
        if let Some(t) = inner.producers.pop_front() {
            scheduler::wake_thread(t);
        }
        Ok(item)
    }

    pub fn receive(&self) -> KernelResult<T> {
        self.receive_timeout(config::WAIT_FOREVER)
    }

    pub fn receive_timeout(&self, timeout_ticks: u32) -> KernelResult<T> {
        loop {
            match self.try_receive() {
                Ok(item) => return Ok(item),
                Err(KernelError::WouldBlock) => {}
                Err(e) => return Err(e),
            }
            if timeout_ticks == config::NO_WAIT {
                return Err(KernelError::WouldBlock);
            }
            let mut inner = self.inner.lock();
            if inner.count > 0 {
                continue;
            }
            // See `send_timeout` above: `inner` must drop inside the
            // closure, not after `scheduler::wait` returns.
            let woken = scheduler::wait(timeout_ticks, move |t, prio| {
                let mut inner = inner;
                inner.consumers.insert(t, prio);
            });
            if !woken {
                return Err(KernelError::Timeout);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.count == inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_invalid_argument() {
        assert!(Queue::<u8>::new(0).is_err());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q: Queue<u32> = Queue::new(4).unwrap();
        q.try_send(1).unwrap();
        q.try_send(2).unwrap();
        q.try_send(3).unwrap();
        assert_eq!(q.try_receive().unwrap(), 1);
        assert_eq!(q.try_receive().unwrap(), 2);
        assert_eq!(q.try_receive().unwrap(), 3);
    }

    #[test]
    fn full_queue_rejects_try_send() {
        let q: Queue<u32> = Queue::new(2).unwrap();
        q.try_send(1).unwrap();
        q.try_send(2).unwrap();
        assert_eq!(q.try_send(3), Err(KernelError::WouldBlock));
    }

    #[test]
    fn empty_queue_rejects_try_receive() {
        let q: Queue<u32> = Queue::new(2).unwrap();
        assert_eq!(q.try_receive(), Err(KernelError::WouldBlock));
    }

    #[test]
    fn wraps_around_the_circular_buffer() {
        let q: Queue<u32> = Queue::new(2).unwrap();
        q.try_send(1).unwrap();
        q.try_send(2).unwrap();
        assert_eq!(q.try_receive().unwrap(), 1);
        q.try_send(3).unwrap();
        assert_eq!(q.try_receive().unwrap(), 2);
        assert_eq!(q.try_receive().unwrap(), 3);
    }
}
