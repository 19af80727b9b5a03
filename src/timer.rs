/// System tick counter and the timer delta-list.
///
/// The teacher has no equivalent module — its `interrupts::timer_tick_handler`
/// only advances a flat `TICK_COUNT` and unconditionally calls into the
/// scheduler. This kernel still advances a tick counter the same way, but
/// every time-bounded wait (sleeps, and the timeout argument on the
/// mutex/event/queue operations in `sync/`) is driven by a classic
/// delta-list: entries are kept in fire order, each storing only the number
/// of ticks *after the entry ahead of it* before it is due, so processing
/// one tick is O(1) regardless of how many timers are armed — only the head
/// entry's delta is ever decremented. Arming and cancelling are O(n) walks
/// of however many timers are currently outstanding, which in this kernel
/// is always small.
extern crate alloc;

use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::critical_section;
use crate::task::scheduler::{self, Thread};

/// Ticks elapsed since boot. Read by the logging backend too, so it stays a
/// bare atomic rather than something hidden behind the timer lock.
pub static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

pub type TimerId = u32;

enum TimerAction {
    WakeThread(NonNull<Thread>),
    WakeThreadTimeout(NonNull<Thread>),
    Callback(fn(u32), u32),
}

// Safety: the `NonNull<Thread>` variant is only ever dereferenced from
// inside a `critical_section`, same as every other raw thread pointer in
// this kernel.
unsafe impl Send for TimerAction {}

struct TimerEntry {
    id: TimerId,
    delta: u64,
    period: Option<u64>,
    action: TimerAction,
}

static NEXT_TIMER_ID: AtomicU32 = AtomicU32::new(1);
static TIMERS: Mutex<Vec<TimerEntry>> = Mutex::new(Vec::new());

pub fn current_tick() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

/// Called once per `SysTick`. Returns the new tick count.
pub(crate) fn advance_tick() -> u64 {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed) + 1
}

fn insert(action: TimerAction, ticks: u64, period: Option<u64>) -> TimerId {
    let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
    critical_section::with(|| {
        let mut list = TIMERS.lock();
        let mut remaining = ticks;
        let mut idx = 0;
        while idx < list.len() {
            if remaining < list[idx].delta {
                list[idx].delta -= remaining;
                break;
            }
            remaining -= list[idx].delta;
            idx += 1;
        }
        list.insert(
            idx,
            TimerEntry {
                id,
                delta: remaining,
                period,
                action,
            },
        );
    });
    id
}

/// Arm a one-shot wakeup for `t` at the given absolute tick. Used by
/// `scheduler::sleep` and by the timeout argument of the blocking
/// synchronisation operations.
pub(crate) fn arm_wake(t: NonNull<Thread>, absolute_tick: u64) {
    let now = current_tick();
    let ticks = absolute_tick.saturating_sub(now);
    insert(TimerAction::WakeThread(t), ticks, None);
}

/// Arm a timeout for a blocked waiter: `ticks` from now, `scheduler::
/// wake_on_timeout` fires instead of a plain wake so the waiter can tell a
/// timeout apart from having actually been granted what it was waiting for.
pub(crate) fn arm_timeout(t: NonNull<Thread>, ticks: u64) -> TimerId {
    insert(TimerAction::WakeThreadTimeout(t), ticks, None)
}

/// Arm a software callback, optionally periodic. Exposed for device drivers
/// and anything else in `irq.rs` that wants a polling or watchdog timer
/// without its own hardware channel.
pub fn arm_callback(ticks: u64, periodic: bool, f: fn(u32), arg: u32) -> TimerId {
    let period = if periodic { Some(ticks.max(1)) } else { None };
    insert(TimerAction::Callback(f, arg), ticks, period)
}

/// Cancel a still-pending timer, redistributing its delta onto whichever
/// entry was behind it so later entries still fire at their original
/// absolute tick. Returns `false` if `id` already fired or never existed.
pub fn cancel(id: TimerId) -> bool {
    critical_section::with(|| {
        let mut list = TIMERS.lock();
        match list.iter().position(|e| e.id == id) {
            Some(pos) => {
                let removed = list.remove(pos);
                if let Some(next) = list.get_mut(pos) {
                    next.delta += removed.delta;
                }
                true
            }
            None => false,
        }
    })
}

/// Called once per `SysTick`, after the tick counter has been advanced:
/// decrement the head entry's delta and fire everything that just reached
/// zero (there can be more than one, if several timers shared an absolute
/// expiry tick).
pub(crate) fn process_due(_now: u64) {
    critical_section::with(|| {
        let mut list = TIMERS.lock();
        if let Some(head) = list.first_mut() {
            if head.delta > 0 {
                head.delta -= 1;
            }
        }
    });
    loop {
        let fired = critical_section::with(|| {
            let mut list = TIMERS.lock();
            match list.first() {
                Some(head) if head.delta == 0 => Some(list.remove(0)),
                _ => None,
            }
        });
        match fired {
            Some(entry) => fire(entry),
            None => break,
        }
    }
}

fn fire(entry: TimerEntry) {
    let period = entry.period;
    match entry.action {
        TimerAction::WakeThread(t) => scheduler::wake_thread(t),
        TimerAction::WakeThreadTimeout(t) => scheduler::wake_on_timeout(t),
        TimerAction::Callback(f, arg) => {
            f(arg);
            if let Some(p) = period {
                insert(TimerAction::Callback(f, arg), p, Some(p));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32 as CounterU32;

    fn reset() {
        TICK_COUNT.store(0, Ordering::SeqCst);
        TIMERS.lock().clear();
    }

    static FIRE_COUNT: CounterU32 = CounterU32::new(0);

    fn bump(_arg: u32) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    fn tick_n(n: u32) {
        for _ in 0..n {
            let now = advance_tick();
            process_due(now);
        }
    }

    #[test]
    fn one_shot_callback_fires_once_at_the_right_tick() {
        reset();
        FIRE_COUNT.store(0, Ordering::SeqCst);
        arm_callback(3, false, bump, 0);
        tick_n(2);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 0);
        tick_n(1);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
        tick_n(5);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_callback_rearms_itself() {
        reset();
        FIRE_COUNT.store(0, Ordering::SeqCst);
        arm_callback(2, true, bump, 0);
        tick_n(6);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancel_redistributes_delta_to_successor() {
        reset();
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let first = arm_callback(2, false, bump, 0);
        arm_callback(5, false, bump, 0); // absolute tick 5, delta 3 behind `first`
        assert!(cancel(first));
        tick_n(5);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_timers_sharing_an_expiry_both_fire_the_same_tick() {
        reset();
        FIRE_COUNT.store(0, Ordering::SeqCst);
        arm_callback(4, false, bump, 0);
        arm_callback(4, false, bump, 0);
        tick_n(4);
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 2);
    }
}
