/// Signalling between threads, independent of a shared resource.
///
/// The specification's data model names a binary "signalled / not
/// signalled" event without settling whether signalling should wake one
/// waiter and auto-clear, or broadcast to every waiter and stay set until
/// explicitly cleared — both are common and neither subsumes the other, so
/// both are exposed: `Event` is the auto-reset, single-wakeup primitive
/// (the base case — think "a byte arrived"), and `ManualResetEvent` is the
/// broadcast variant that stays signalled for any number of waiters until
/// `reset` (think "subsystem X has finished booting").
use spin::Mutex as SpinMutex;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::list::PriorityOrderedList;
use crate::task::scheduler;

struct Inner {
    signaled: bool,
    waiters: PriorityOrderedList,
}

impl Inner {
    const fn new() -> Self {
        Inner {
            signaled: false,
            waiters: PriorityOrderedList::new(),
        }
    }
}

/// Auto-reset: `signal` wakes exactly one waiter (or leaves the event
/// signalled for the next `wait`, if nobody is waiting yet); whichever
/// thread's `wait` consumes the signal clears it.
pub struct Event {
    inner: SpinMutex<Inner>,
}

impl Event {
    pub const fn new() -> Self {
        Event {
            inner: SpinMutex::new(Inner::new()),
        }
    }

    pub fn signal(&self) {
        let mut inner = self.inner.lock();
        match inner.waiters.pop_front() {
            Some(t) => scheduler::wake_thread(t),
            None => inner.signaled = true,
        }
    }

    pub fn wait(&self) -> KernelResult<()> {
        self.wait_timeout(config::WAIT_FOREVER)
    }

    pub fn wait_timeout(&self, timeout_ticks: u32) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        if inner.signaled {
            inner.signaled = false;
            return Ok(());
        }
        if timeout_ticks == config::NO_WAIT {
            return Err(KernelError::WouldBlock);
        }
        // `inner` is moved into the closure and dropped there, inside the
        // scheduler's critical section, before `block_current` unmasks
        // interrupts and the switch it pends actually fires — see
        // `sync::mutex::Mutex::lock_timeout`. Dropping it after
        // `scheduler::wait` returns would hold this spin lock across the
        // context switch, and `signal` would spin on it forever trying to
        // wake the very thread holding it.
        let woken = scheduler::wait(timeout_ticks, move |t, prio| {
            let mut inner = inner;
            inner.waiters.insert(t, prio);
        });
        if woken {
            Ok(())
        } else {
            Err(KernelError::Timeout)
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast, manual-reset: `signal` wakes every current waiter and stays
/// signalled for anyone who calls `wait` afterwards, until `reset` runs.
pub struct ManualResetEvent {
    inner: SpinMutex<Inner>,
}

impl ManualResetEvent {
    pub const fn new() -> Self {
        ManualResetEvent {
            inner: SpinMutex::new(Inner::new()),
        }
    }

    pub fn signal(&self) {
        let mut inner = self.inner.lock();
        inner.signaled = true;
        while let Some(t) = inner.waiters.pop_front() {
            scheduler::wake_thread(t);
        }
    }

    pub fn reset(&self) {
        self.inner.lock().signaled = false;
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.lock().signaled
    }

    pub fn wait(&self) -> KernelResult<()> {
        self.wait_timeout(config::WAIT_FOREVER)
    }

    pub fn wait_timeout(&self, timeout_ticks: u32) -> KernelResult<()> {
        let inner = self.inner.lock();
        if inner.signaled {
            return Ok(());
        }
        if timeout_ticks == config::NO_WAIT {
            return Err(KernelError::WouldBlock);
        }
        // See `Event::wait_timeout` above: `inner` must drop inside the
        // closure, under the scheduler's critical section, not after
        // `scheduler::wait` returns.
        let woken = scheduler::wait(timeout_ticks, move |t, prio| {
            let mut inner = inner;
            inner.waiters.insert(t, prio);
        });
        if woken {
            Ok(())
        } else {
            Err(KernelError::Timeout)
        }
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_before_wait_is_remembered() {
        let e = Event::new();
        e.signal();
        assert!(e.inner.lock().signaled);
        assert_eq!(e.wait_timeout(config::NO_WAIT), Ok(()));
        assert!(!e.inner.lock().signaled);
    }

    #[test]
    fn wait_with_no_wait_and_no_signal_would_block() {
        let e = Event::new();
        assert_eq!(e.wait_timeout(config::NO_WAIT), Err(KernelError::WouldBlock));
    }

    #[test]
    fn manual_reset_event_stays_signaled_until_reset() {
        let e = ManualResetEvent::new();
        e.signal();
        assert!(e.is_signaled());
        assert_eq!(e.wait_timeout(config::NO_WAIT), Ok(()));
        assert!(e.is_signaled());
        e.reset();
        assert!(!e.is_signaled());
    }
}
