//! Integration test: verify the kernel boots, the heap comes up, and
//! logging reaches the semihosting channel.
#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use cortex_m_rt::entry;
use kernel::println;

#[entry]
fn main() -> ! {
    let mut core = cortex_m::Peripherals::take().expect("peripherals already taken");
    kernel::init(&mut core, 0x2000_4000 as *mut u8, kernel::config::HEAP_SIZE);
    test_main();
    kernel::hlt_loop()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::test_panic_handler(info)
}

#[test_case]
fn test_println_simple() {
    println!("test_println_simple output");
}

#[test_case]
fn test_println_many() {
    for i in 0..200 {
        println!("test_println_many output {}", i);
    }
}

#[test_case]
fn test_idle_thread_exists_after_init() {
    // `kernel::init` always creates the idle thread as part of
    // `task::scheduler::init`; a freshly booted kernel should report no
    // current thread yet (the scheduler hasn't performed its first switch)
    // without panicking.
    assert!(kernel::task::scheduler::current_thread_id().is_none());
}

#[test_case]
fn test_heap_allocates_and_frees() {
    extern crate alloc;
    use alloc::vec::Vec;
    let mut v: Vec<u32> = Vec::with_capacity(16);
    for i in 0..16 {
        v.push(i);
    }
    assert_eq!(v.iter().sum::<u32>(), (0..16).sum());
    drop(v);
}
