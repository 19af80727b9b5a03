/// Priority-unaware mutual exclusion.
///
/// No priority inheritance: the owner keeps whatever priority it already
/// had while holding the lock, even if a higher-priority thread is waiting
/// on it. The specification calls this out as an open question rather than
/// a requirement, and getting inheritance wrong (the classic bug: forgetting
/// to restore the donated priority on a timeout) is worse than not having
/// it, so it is left for a caller to build on top with `thread::
/// priority_set` if a given application needs it.
///
/// No recursive locking: re-locking from the owning thread returns
/// `InvalidState` rather than deadlocking or silently succeeding, the same
/// "caller violated a primitive's state machine" bucket `try_lock`'s
/// double-release sibling in `heap.rs` uses.
use spin::Mutex as SpinMutex;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::list::PriorityOrderedList;
use crate::task::scheduler::{self, ThreadId};

struct Inner {
    locked: bool,
    owner: Option<ThreadId>,
    waiters: PriorityOrderedList,
}

pub struct Mutex {
    inner: SpinMutex<Inner>,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: SpinMutex::new(Inner {
                locked: false,
                owner: None,
                waiters: PriorityOrderedList::new(),
            }),
        }
    }

    /// Acquire without blocking. `WouldBlock` if already held by someone
    /// else, `InvalidState` if the caller already holds it.
    pub fn try_lock(&self) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        let me = scheduler::current_thread_id();
        if inner.locked {
            if inner.owner == me {
                return Err(KernelError::InvalidState);
            }
            return Err(KernelError::WouldBlock);
        }
        inner.locked = true;
        inner.owner = me;
        Ok(())
    }

    pub fn lock(&self) -> KernelResult<()> {
        self.lock_timeout(config::WAIT_FOREVER)
    }

    /// Acquire, blocking for at most `timeout_ticks` system ticks.
    /// `config::NO_WAIT` is equivalent to `try_lock`.
    pub fn lock_timeout(&self, timeout_ticks: u32) -> KernelResult<()> {
        loop {
            match self.try_lock() {
                Ok(()) => return Ok(()),
                Err(KernelError::InvalidState) => return Err(KernelError::InvalidState),
                Err(_) => {}
            }
            if timeout_ticks == config::NO_WAIT {
                return Err(KernelError::WouldBlock);
            }
            let inner = self.inner.lock();
            // Re-check under the same lock `try_lock` would take, so a
            // release that happened between the failed `try_lock` above
            // and here isn't missed.
            if !inner.locked {
                continue;
            }
            // `inner` moves into the closure and is dropped there, inside
            // the scheduler's own critical section, strictly before
            // `block_current` unmasks interrupts and the pended switch
            // actually fires. Dropping it only after `scheduler::wait`
            // returns (as this used to) would leave it locked across the
            // switch, and the parked thread can't run again to release it —
            // `unlock` spins on this same lock forever.
            let woken = scheduler::wait(timeout_ticks, move |t, prio| {
                let mut inner = inner;
                inner.waiters.insert(t, prio);
            });
            if !woken {
                return Err(KernelError::Timeout);
            }
            // Woken because the lock was handed to us directly by
            // `unlock`; loop around to confirm ownership via `try_lock`.
        }
    }

    /// Release. `InvalidState` if the caller doesn't hold the lock.
    pub fn unlock(&self) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        if !inner.locked || inner.owner != scheduler::current_thread_id() {
            return Err(KernelError::InvalidState);
        }
        match inner.waiters.pop_front() {
            Some(next) => {
                inner.owner = Some(unsafe { next.as_ref().id });
                scheduler::wake_thread(next);
            }
            None => {
                inner.locked = false;
                inner.owner = None;
            }
        }
        Ok(())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_unlock_round_trips() {
        let m = Mutex::new();
        m.try_lock().unwrap();
        m.unlock().unwrap();
        m.try_lock().unwrap();
        m.unlock().unwrap();
    }

    #[test]
    fn unlock_without_owning_is_invalid_state() {
        let m = Mutex::new();
        assert_eq!(m.unlock(), Err(KernelError::InvalidState));
    }

    #[test]
    fn recursive_lock_from_same_thread_is_invalid_state() {
        let m = Mutex::new();
        m.try_lock().unwrap();
        assert_eq!(m.try_lock(), Err(KernelError::InvalidState));
        m.unlock().unwrap();
    }
}
