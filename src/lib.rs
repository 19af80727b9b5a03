//! Preemptive, priority-based thread scheduler core for a single Cortex-M4
//! core: round-robin among equal priorities, mutex/event/queue
//! synchronisation, a timer delta-list, a best-effort heap, and software
//! IRQ vector dispatch.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod critical_section;
pub mod device;
pub mod error;
pub mod heap;
pub mod irq;
pub mod list;
pub mod logging;
pub mod sync;
pub mod task;
pub mod timer;

#[cfg(not(test))]
use core::panic::PanicInfo;

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: heap::KernelAllocator = heap::KernelAllocator;

/// Spin forever with interrupts enabled — the idle thread's body is the
/// normal way to wait for work, but this is used by the panic handler and
/// by `task::scheduler::exit`'s defensive fallback loop too.
pub fn hlt_loop() -> ! {
    loop {
        #[cfg(not(test))]
        cortex_m::asm::wfi();
        #[cfg(test)]
        break;
    }
    #[cfg(test)]
    loop {}
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("{}", info);
    hlt_loop()
}

/// Driven by a single hardware timer (`SysTick`) configured for the system
/// tick rate: advances the tick counter, processes the head of the timer
/// delta-list, decrements the running thread's quantum, and requests a
/// context switch if warranted.
#[cfg(not(test))]
#[cortex_m_rt::exception]
fn SysTick() {
    task::scheduler::tick();
}

/// Bring up the tick source and run the kernel's init sequence up through
/// thread creation, stopping just short of `task::scheduler::start()` so
/// `main.rs` can create its own initial application thread(s) first.
#[cfg(not(test))]
pub fn init(core: &mut cortex_m::Peripherals, heap_start: *mut u8, heap_len: usize) {
    unsafe { heap::init(heap_start, heap_len) };
    logging::init();

    // PendSV must sit at the lowest NVIC priority so it only ever runs
    // after every hardware ISR (including SysTick) has finished, and never
    // tail-chains ahead of one — reset leaves every exception at priority
    // 0, same as SysTick, which would let a switch preempt an ISR it's
    // supposed to wait behind.
    unsafe {
        core.SCB.set_priority(cortex_m::peripheral::scb::SystemHandler::PendSV, 0xff);
    }

    core.SYST.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
    let reload = (cortex_m::peripheral::SYST::get_ticks_per_10ms() / 10) * (1000 / config::TICK_HZ);
    core.SYST.set_reload(reload.max(1));
    core.SYST.clear_current();
    core.SYST.enable_counter();
    core.SYST.enable_interrupt();
    task::scheduler::init();
}

/// Exit code an integration test reports to the QEMU harness via
/// semihosting, the Cortex-M equivalent of the teacher's `isa-debug-exit`
/// I/O port device.
#[cfg(not(test))]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0,
    Failed = 1,
}

#[cfg(not(test))]
pub fn exit_qemu(code: QemuExitCode) -> ! {
    match code {
        QemuExitCode::Success => cortex_m_semihosting::debug::exit(cortex_m_semihosting::debug::EXIT_SUCCESS),
        QemuExitCode::Failed => cortex_m_semihosting::debug::exit(cortex_m_semihosting::debug::EXIT_FAILURE),
    }
    hlt_loop()
}

/// `custom_test_frameworks` runner for the `tests/` integration binaries:
/// each `#[test_case]` fn runs in turn, success or panic reported back to
/// the host over semihosting.
#[cfg(not(test))]
pub fn test_runner(tests: &[&dyn Fn()]) {
    println!("running {} tests", tests.len());
    for test in tests {
        test();
    }
    exit_qemu(QemuExitCode::Success);
}

#[cfg(not(test))]
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    println!("[failed]\n");
    println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed)
}
