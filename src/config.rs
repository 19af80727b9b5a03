/// Kernel-wide tunables, gathered in one place rather than threaded through
/// call sites — the same spirit as the scattered `HEAP_START`/`HEAP_SIZE`
/// and PIT-divisor constants a bare-metal kernel usually hardcodes, just
/// centralized. All of these are compile-time constants: a kernel has no
/// config file to parse before it has a heap.

/// System tick rate in Hz. Canonical RTOS default.
pub const TICK_HZ: u32 = 1_000;

/// Number of distinct thread priority levels. Priority 0 is highest.
pub const PRIORITY_LEVELS: usize = 8;

/// Priority assigned to the always-present idle thread.
pub const IDLE_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

/// Default stack size handed to `thread_create` callers that don't
/// override it.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024;

/// Minimum stack a thread may request; below this `thread_create` returns
/// `InvalidArgument`. Must be large enough for one `InterruptFrame` plus
/// the canary word.
pub const MIN_STACK_SIZE: usize = 256;

/// Stack reserved for the idle thread, which never calls deeply.
pub const IDLE_STACK_SIZE: usize = 512;

/// Sentinel written at the low end of every thread's stack; checked on
/// context switch in debug/test builds to catch stack overflow.
pub const STACK_CANARY: u32 = 0xDEAD_BEEF;

/// Round-robin quantum, in ticks, granted to a thread each time it is
/// selected to run.
pub const QUANTUM_TICKS: u32 = 10;

/// Timeout value meaning "wait forever".
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Timeout value meaning "try once, do not block".
pub const NO_WAIT: u32 = 0;

/// Base RAM address and length of the region the heap allocator manages.
/// Chosen to sit above `.bss`/`.data` in `memory.x`'s RAM region; a real
/// link would derive this from linker symbols instead of a fixed
/// constant, but the heap module takes the region as a parameter so the
/// constant here is only the default used by `kernel_main`.
pub const HEAP_SIZE: usize = 48 * 1024;

/// Minimum leftover size (in bytes, excluding the header) below which a
/// free-list split is skipped and the whole block is handed to the
/// caller instead, to avoid manufacturing unusably tiny fragments.
pub const HEAP_MIN_SPLIT: usize = 16;

/// Alignment guaranteed for every pointer `alloc` returns: the maximum
/// scalar alignment on Cortex-M4 with an FPU (an `f64`/`u64`).
pub const HEAP_ALIGN: usize = 8;

/// Number of IRQ vectors the software dispatch table indexes. Matches the
/// external interrupt count of a typical STM32F4-class part.
pub const IRQ_COUNT: usize = 96;

/// Capacity of a message queue's fixed circular buffer, in slots, when a
/// caller doesn't specify one explicitly. Exists only as documentation of
/// a sane default; `Queue::new` always takes an explicit capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
