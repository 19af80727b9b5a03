/// Logging backend for the `log` facade.
///
/// The teacher owns its serial port directly and exports `serial_print!`/
/// `serial_println!` macros that format straight onto it. This kernel keeps
/// that call-site ergonomics but decouples it from the backend: modules log
/// through `log::{info, warn, error, debug, trace}` and only this file knows
/// the message ends up on semihosting. A real board swaps this module for a
/// UART-backed `Device` (§6) without touching a single call site.
///
/// Semihosting is the standard zero-hardware-dependency channel for
/// Cortex-M kernels under QEMU or a debug probe (the same channel the
/// `sjp27-cortexm-threads` demo and `oxidecomputer-hubris`'s `klog!` macro
/// use), so it is the right default here where no concrete board is named.
extern crate alloc;

use core::fmt::Write;
use core::sync::atomic::Ordering;
use log::{Level, Log, Metadata, Record};
use spin::Mutex;

use crate::timer::TICK_COUNT;

struct SemihostingLogger;

static HOST_STDOUT: Mutex<()> = Mutex::new(());

impl Log for SemihostingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Semihosting calls are themselves a (very slow) trap into the
        // debugger; serialize them so interleaved log lines from different
        // threads don't interleave their characters too.
        let _guard = HOST_STDOUT.lock();
        let tick = TICK_COUNT.load(Ordering::Relaxed);
        let thread = crate::task::scheduler::current_thread_id().unwrap_or(0);
        let mut stdout = cortex_m_semihosting::hio::hstdout().ok();
        if let Some(stdout) = stdout.as_mut() {
            let _ = writeln!(
                stdout,
                "[{:>8}t tid={:>3}] {:<5} {}",
                tick,
                thread,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: SemihostingLogger = SemihostingLogger;

/// Install the global logger. Must run once, before the first reschedule,
/// matching the teacher's `serial::init()` call at the top of boot.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Info))
        .ok();
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    let _guard = HOST_STDOUT.lock();
    if let Ok(mut stdout) = cortex_m_semihosting::hio::hstdout() {
        let _ = stdout.write_fmt(args);
    }
}

/// Unconditional console output, independent of the `log` level filter —
/// the Cortex-M analogue of the teacher's `println!`, used by the panic
/// handler and demo thread bodies.
#[macro_export]
macro_rules! println {
    () => ($crate::logging::_print(core::format_args!("\n")));
    ($($arg:tt)*) => ($crate::logging::_print(core::format_args!("{}\n", core::format_args!($($arg)*))));
}
