/// Thread core: the `Thread` control block and the scheduling algorithm
/// that picks what runs next.
///
/// The teacher's `Scheduler` keeps threads in a flat `VecDeque` and drives
/// switches from a periodic timer ISR that always switches unconditionally.
/// This one keeps the teacher's shape — a `BTreeMap<ThreadId, _>` registry
/// (mirroring the teacher's `task::process::ProcessTable`) owning every
/// thread, a small amount of state guarded by one lock, and `spawn`'s
/// synthetic-initial-frame trick for brand new threads — but the run queue
/// is `list::ReadyQueue` instead of a `VecDeque`, and a switch only ever
/// actually happens when the candidate differs from whoever is currently
/// running, exactly as this kernel's priority-preemption contract requires.
extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::config;
use crate::critical_section;
use crate::error::{KernelError, KernelResult};
use crate::list::{ListLink, ReadyQueue};
use crate::task::context::{HardwareFrame, SoftwareFrame, ThreadFrame, INITIAL_XPSR};

pub type ThreadId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    Terminated,
}

/// A thread's control block. Lives in a `Box` owned by the scheduler's
/// registry for the thread's whole lifetime, so its address never moves —
/// every list this thread is ever linked into stores a raw pointer straight
/// at this struct.
pub struct Thread {
    pub(crate) link: ListLink,
    pub id: ThreadId,
    pub priority: u8,
    pub state: ThreadState,
    stack_base: *mut u8,
    stack_layout: Layout,
    /// Stack pointer saved on the last switch away from this thread: the
    /// low address of its `ThreadFrame`. Meaningless while `state ==
    /// Running` (the live value is in PSP, not here).
    saved_sp: *mut u32,
    /// Ticks of quantum remaining. Reloaded to `QUANTUM_TICKS` whenever
    /// this thread starts running.
    quantum: u32,
    /// Absolute tick at which a sleeping thread should wake. Meaningless
    /// outside `ThreadState::Sleeping`.
    pub wake_tick: u64,
    /// Set by the timer module when a timed wait's deadline fires before
    /// the primitive being waited on was satisfied. Read by `sync::wait`
    /// right after the thread resumes, then cleared before the next wait.
    pub(crate) timed_out: bool,
}

// Safety: a `Thread` is only ever mutated from inside a `critical_section`,
// so it never needs to cross an actual concurrent access, just a context
// switch.
unsafe impl Send for Thread {}

impl Thread {
    fn canary_slot(&self) -> *const u32 {
        self.stack_base as *const u32
    }

    /// Checked only in debug/test builds (§9 open question: stack overflow
    /// is detected, not prevented).
    #[cfg(debug_assertions)]
    fn check_canary(&self) {
        let word = unsafe { core::ptr::read_volatile(self.canary_slot()) };
        debug_assert_eq!(
            word,
            config::STACK_CANARY,
            "thread {} stack overflowed its allocation",
            self.id
        );
    }

    #[cfg(not(debug_assertions))]
    fn check_canary(&self) {}
}

extern "C" fn thread_entry_wrapper(arg: u32, entry: u32) -> ! {
    let entry: fn(u32) = unsafe { core::mem::transmute(entry as usize) };
    entry(arg);
    exit();
}

struct Scheduler {
    threads: BTreeMap<ThreadId, Box<Thread>>,
    ready: ReadyQueue,
    current: Option<NonNull<Thread>>,
    /// Stack pointer to resume if the ready queue is ever found empty —
    /// should never actually happen once the idle thread exists, kept only
    /// as a safety net against that invariant being violated.
    boot_sp: *mut u32,
    deferred_free: Option<ThreadId>,
    idle_id: ThreadId,
}

static NEXT_ID: AtomicU32 = AtomicU32::new(1);
static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

fn alloc_id() -> ThreadId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            threads: BTreeMap::new(),
            ready: ReadyQueue::new(),
            current: None,
            boot_sp: core::ptr::null_mut(),
            deferred_free: None,
            idle_id: 0,
        }
    }

    fn free_thread(&mut self, id: ThreadId) {
        if let Some(t) = self.threads.remove(&id) {
            let layout = t.stack_layout;
            let base = t.stack_base;
            drop(t);
            unsafe { alloc::alloc::dealloc(base, layout) };
        }
    }

    /// Runs from `PendSV` with interrupts masked. `old_sp` is the low
    /// address of the outgoing thread's `ThreadFrame` (or garbage, at
    /// first boot, before any thread has ever run).
    fn switch(&mut self, old_sp: *mut u32) -> *mut u32 {
        if let Some(id) = self.deferred_free.take() {
            self.free_thread(id);
        }

        if let Some(mut cur) = self.current {
            unsafe {
                cur.as_mut().saved_sp = old_sp;
                cur.as_ref().check_canary();
            }
            let cur_state = unsafe { cur.as_ref().state };
            if cur_state == ThreadState::Running {
                let cur_priority = unsafe { cur.as_ref().priority };
                let cur_quantum = unsafe { cur.as_ref().quantum };
                let should_switch = match self.ready.peek() {
                    None => false,
                    Some((_, cand_priority)) => {
                        cand_priority < cur_priority
                            || (cand_priority == cur_priority && cur_quantum == 0)
                    }
                };
                if !should_switch {
                    return old_sp;
                }
                unsafe {
                    cur.as_mut().state = ThreadState::Ready;
                    cur.as_mut().quantum = config::QUANTUM_TICKS;
                }
                self.ready.push_back(cur, cur_priority);
            } else if cur_state == ThreadState::Terminated {
                self.deferred_free = Some(unsafe { cur.as_ref().id });
            }
            self.current = None;
        } else {
            self.boot_sp = old_sp;
        }

        match self.ready.pop_front_best() {
            Some(mut next) => {
                unsafe {
                    next.as_mut().state = ThreadState::Running;
                    next.as_mut().quantum = config::QUANTUM_TICKS;
                }
                self.current = Some(next);
                unsafe { next.as_ref().saved_sp }
            }
            None => self.boot_sp,
        }
    }

    fn wake(&mut self, mut t: NonNull<Thread>) {
        let state = unsafe { t.as_ref().state };
        if state != ThreadState::Blocked && state != ThreadState::Sleeping {
            return;
        }
        let priority = unsafe { t.as_ref().priority };
        unsafe {
            t.as_mut().state = ThreadState::Ready;
            t.as_mut().quantum = config::QUANTUM_TICKS;
        }
        self.ready.push_back(t, priority);
    }
}

#[cfg(not(test))]
fn request_switch() {
    const SCB_ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    const PENDSVSET: u32 = 1 << 28;
    unsafe { core::ptr::write_volatile(SCB_ICSR, PENDSVSET) };
}

#[cfg(test)]
static SWITCH_REQUESTED: core::sync::atomic::AtomicBool =
    core::sync::atomic::AtomicBool::new(false);

#[cfg(test)]
fn request_switch() {
    SWITCH_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(test)]
pub fn take_switch_requested_for_test() -> bool {
    SWITCH_REQUESTED.swap(false, Ordering::SeqCst)
}

fn new_stack_frame(stack_top: *mut u32, arg: u32, entry_addr: u32) -> *mut u32 {
    let frame_ptr =
        (stack_top as usize - core::mem::size_of::<ThreadFrame>()) as *mut ThreadFrame;
    unsafe {
        (*frame_ptr).software = SoftwareFrame {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
        };
        (*frame_ptr).hardware = HardwareFrame {
            r0: arg,
            r1: entry_addr,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: 0,
            pc: thread_entry_wrapper as usize as u32,
            xpsr: INITIAL_XPSR,
        };
    }
    frame_ptr as *mut u32
}

fn spawn_inner(priority: u8, stack_bytes: usize, entry: fn(u32), arg: u32) -> KernelResult<ThreadId> {
    if priority as usize >= config::PRIORITY_LEVELS {
        return Err(KernelError::InvalidArgument);
    }
    let stack_size = if stack_bytes == 0 {
        config::DEFAULT_STACK_SIZE
    } else {
        stack_bytes
    };
    if stack_size < config::MIN_STACK_SIZE {
        return Err(KernelError::InvalidArgument);
    }
    let layout = Layout::from_size_align(stack_size, config::HEAP_ALIGN)
        .map_err(|_| KernelError::InvalidArgument)?;
    let stack_base = unsafe { alloc::alloc::alloc_zeroed(layout) };
    if stack_base.is_null() {
        return Err(KernelError::OutOfMemory);
    }
    unsafe { core::ptr::write_volatile(stack_base as *mut u32, config::STACK_CANARY) };

    let stack_top = unsafe { stack_base.add(stack_size) as *mut u32 };
    let saved_sp = new_stack_frame(stack_top, arg, entry as usize as u32);

    let id = alloc_id();
    let thread = Box::new(Thread {
        link: ListLink::new(),
        id,
        priority,
        state: ThreadState::Ready,
        stack_base,
        stack_layout: layout,
        saved_sp,
        quantum: config::QUANTUM_TICKS,
        wake_tick: 0,
        timed_out: false,
    });

    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.get_or_insert_with(Scheduler::new);
        let ptr = NonNull::from(thread.as_ref());
        sched.threads.insert(id, thread);
        sched.ready.push_back(ptr, priority);
    });
    request_switch();
    Ok(id)
}

/// Must run once before anything else in this module: creates the
/// always-present idle thread. Mirrors the teacher's `Scheduler::new`
/// seeding a demo thread at construction time.
pub fn init() {
    let id = spawn_inner(config::IDLE_PRIORITY, config::IDLE_STACK_SIZE, idle_body, 0)
        .expect("failed to create idle thread");
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            sched.idle_id = id;
        }
    });
}

fn idle_body(_arg: u32) {
    loop {
        cortex_m_wfi();
    }
}

#[cfg(not(test))]
fn cortex_m_wfi() {
    cortex_m::asm::wfi();
}

#[cfg(test)]
fn cortex_m_wfi() {}

/// Create a new thread. `stack_bytes == 0` uses `config::DEFAULT_STACK_SIZE`.
pub fn create(priority: u8, stack_bytes: usize, entry: fn(u32), arg: u32) -> KernelResult<ThreadId> {
    spawn_inner(priority, stack_bytes, entry, arg)
}

/// Give up the remainder of the current quantum, allowing an equal- or
/// higher-priority ready thread to run. Does not hand off to a lower
/// priority thread just because it was called.
pub fn yield_now() {
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            if let Some(mut cur) = sched.current {
                unsafe { cur.as_mut().quantum = 0 };
            }
        }
    });
    request_switch();
}

/// Block the current thread for at least `ticks` system ticks.
pub fn sleep(ticks: u32) {
    if ticks == 0 {
        return;
    }
    let wake_at = crate::timer::current_tick() + ticks as u64;
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            if let Some(mut cur) = sched.current {
                unsafe {
                    cur.as_mut().state = ThreadState::Sleeping;
                    cur.as_mut().wake_tick = wake_at;
                }
                crate::timer::arm_wake(cur, wake_at);
            }
        }
    });
    request_switch();
}

/// Terminate the calling thread. Never returns; the stack is reclaimed on
/// the next switch away from it, since it is still in use by the code that
/// calls this function.
pub fn exit() -> ! {
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            if let Some(mut cur) = sched.current {
                unsafe { cur.as_mut().state = ThreadState::Terminated };
            }
        }
    });
    request_switch();
    loop {
        cortex_m_wfi();
    }
}

/// Change a thread's priority, repositioning it in the ready queue if it is
/// currently sitting there.
pub fn priority_set(id: ThreadId, new_priority: u8) -> KernelResult<()> {
    if new_priority as usize >= config::PRIORITY_LEVELS {
        return Err(KernelError::InvalidArgument);
    }
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().ok_or(KernelError::InvalidState)?;
        let thread = sched.threads.get(&id).ok_or(KernelError::InvalidArgument)?;
        let ptr = NonNull::from(thread.as_ref());
        let (state, old_priority) = unsafe { ((*ptr.as_ptr()).state, (*ptr.as_ptr()).priority) };
        if state == ThreadState::Ready {
            sched.ready.remove(ptr, old_priority);
            unsafe { (*ptr.as_ptr()).priority = new_priority };
            sched.ready.push_back(ptr, new_priority);
        } else {
            unsafe { (*ptr.as_ptr()).priority = new_priority };
        }
        Ok(())
    })?;
    request_switch();
    Ok(())
}

/// Perform the first context switch, into the highest-priority ready
/// thread (always at least the idle thread). Never returns. Matches §6's
/// kernel init sequence: called once, after the idle and initial
/// application threads have been created.
pub fn start() -> ! {
    let sp = critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().expect("scheduler not initialized");
        let mut next = sched
            .ready
            .pop_front_best()
            .expect("no ready thread at scheduler start");
        unsafe {
            next.as_mut().state = ThreadState::Running;
            next.as_mut().quantum = config::QUANTUM_TICKS;
        }
        let sp = unsafe { next.as_ref().saved_sp };
        sched.current = Some(next);
        sp
    });
    crate::task::context::start_first_thread(sp);
}

/// The calling thread's id, or `None` before the scheduler has started.
pub fn current_thread_id() -> Option<ThreadId> {
    critical_section::with(|| {
        let guard = SCHEDULER.lock();
        guard
            .as_ref()
            .and_then(|s| s.current)
            .map(|t| unsafe { t.as_ref().id })
    })
}

/// Wake a sleeping or blocked thread. Called from the timer module and
/// from the synchronisation primitives' release paths.
pub(crate) fn wake_thread(t: NonNull<Thread>) {
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            sched.wake(t);
        }
    });
    request_switch();
}

/// Move the calling thread to `Blocked` and hand it to a primitive's wait
/// list without ever letting go of the scheduler lock in between, so no
/// wakeup can be lost between "decide to block" and "linked into the list".
pub(crate) fn block_current(insert: impl FnOnce(NonNull<Thread>, u8)) {
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            if let Some(mut cur) = sched.current {
                let priority = unsafe { cur.as_ref().priority };
                unsafe { cur.as_mut().state = ThreadState::Blocked };
                insert(cur, priority);
            }
        }
    });
    request_switch();
}

/// The calling thread's own control block pointer, for primitives that
/// need to arm a timeout against themselves.
pub(crate) fn current_thread_ptr() -> Option<NonNull<Thread>> {
    critical_section::with(|| {
        let guard = SCHEDULER.lock();
        guard.as_ref().and_then(|s| s.current)
    })
}

/// Woken by the timer module when a timed wait's deadline elapses before
/// the primitive was satisfied. Distinct from `wake_thread` only in that it
/// also sets `timed_out`, so the waiter can tell the two apart once it
/// resumes.
pub(crate) fn wake_on_timeout(mut t: NonNull<Thread>) {
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            unsafe { t.as_mut().timed_out = true };
            sched.wake(t);
        }
    });
    request_switch();
}

/// Block the calling thread — inserted into a primitive's wait list by
/// `insert` — until woken, or until `timeout_ticks` ticks elapse.
/// `config::WAIT_FOREVER` never times out. Returns `true` if woken
/// normally, `false` on timeout.
pub(crate) fn wait(timeout_ticks: u32, insert: impl FnOnce(NonNull<Thread>, u8)) -> bool {
    if let Some(mut me) = current_thread_ptr() {
        unsafe { me.as_mut().timed_out = false };
    }
    let me = current_thread_ptr();
    let timer_id = if timeout_ticks != config::WAIT_FOREVER {
        me.map(|t| crate::timer::arm_timeout(t, timeout_ticks as u64))
    } else {
        None
    };
    block_current(insert);
    let timed_out = me
        .map(|t| unsafe { t.as_ref().timed_out })
        .unwrap_or(false);
    if !timed_out {
        if let Some(id) = timer_id {
            crate::timer::cancel(id);
        }
    }
    !timed_out
}

/// Called once per `SysTick` interrupt: advances the tick counter, fires
/// due timers, decrements the running thread's quantum, and always
/// requests a `PendSV` — `switch()` cheaply no-ops when nothing actually
/// needs to change.
pub(crate) fn tick() {
    let now = crate::timer::advance_tick();
    crate::timer::process_due(now);
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        if let Some(sched) = guard.as_mut() {
            if let Some(mut cur) = sched.current {
                let q = unsafe { cur.as_ref().quantum };
                if q > 0 {
                    unsafe { cur.as_mut().quantum = q - 1 };
                }
            }
        }
    });
    request_switch();
}

/// Called from `PendSV`'s assembly trampoline. Never called directly by
/// kernel logic.
#[no_mangle]
extern "C" fn pendsv_select_next(old_sp: *mut u32) -> *mut u32 {
    critical_section::with(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.get_or_insert_with(Scheduler::new);
        sched.switch(old_sp)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let mut guard = SCHEDULER.lock();
        *guard = Some(Scheduler::new());
    }

    fn noop_entry(_arg: u32) {}

    #[test]
    fn create_rejects_out_of_range_priority() {
        reset();
        let err = spawn_inner(config::PRIORITY_LEVELS as u8, 0, noop_entry, 0).unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument);
    }

    #[test]
    fn create_rejects_undersized_stack() {
        reset();
        let err = spawn_inner(0, 1, noop_entry, 0).unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument);
    }

    #[test]
    fn create_enqueues_ready_thread_and_requests_switch() {
        reset();
        take_switch_requested_for_test();
        let id = spawn_inner(1, 0, noop_entry, 0).unwrap();
        assert!(id > 0);
        assert!(take_switch_requested_for_test());
        let guard = SCHEDULER.lock();
        let sched = guard.as_ref().unwrap();
        assert!(sched.threads.contains_key(&id));
        assert_eq!(sched.ready.len_at(1), 1);
    }

    #[test]
    fn priority_set_rejects_out_of_range() {
        reset();
        assert_eq!(
            priority_set(1, config::PRIORITY_LEVELS as u8),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn priority_set_repositions_ready_thread() {
        reset();
        let id = spawn_inner(5, 0, noop_entry, 0).unwrap();
        priority_set(id, 1).unwrap();
        let guard = SCHEDULER.lock();
        let sched = guard.as_ref().unwrap();
        assert_eq!(sched.ready.len_at(5), 0);
        assert_eq!(sched.ready.len_at(1), 1);
    }
}
