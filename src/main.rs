#![no_std]
#![no_main]

use cortex_m_rt::entry;
use kernel::task::scheduler;

/// The kernel reserves the low end of its managed RAM region for the heap;
/// a real board derives this from a linker symbol placed after `.bss`
/// instead of a fixed offset into `memory.x`'s RAM region.
const HEAP_START: usize = 0x2000_4000;

fn application_main(_arg: u32) {
    loop {
        scheduler::sleep(kernel::config::TICK_HZ);
        log::info!("tick");
    }
}

#[entry]
fn main() -> ! {
    let core = cortex_m::Peripherals::take().expect("peripherals already taken");
    let mut core = core;
    kernel::init(&mut core, HEAP_START as *mut u8, kernel::config::HEAP_SIZE);

    scheduler::create(0, 0, application_main, 0).expect("failed to create initial thread");

    scheduler::start();
}
