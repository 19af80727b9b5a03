/// CPU state saved/restored across a context switch.
///
/// The teacher drives its switch from a raw timer-ISR assembly stub that
/// pushes all general-purpose registers and `iretq`s into the next frame.
/// Cortex-M already does half of that work in hardware: on any exception
/// taken while a thread is running on the Process Stack Pointer (PSP), the
/// core automatically pushes `{r0-r3, r12, lr, pc, xpsr}` before the
/// handler even starts, and automatically pops the same eight words on
/// exception return. The teacher's approach of "push everything, call a
/// Rust function with the frame pointer, load whatever it returns, then
/// return from exception" still applies — there are just four fewer
/// registers (`r4-r11`) for the handler to push/pop by hand, and the
/// hardware does the rest.
///
/// This is deliberately done in `PendSV` rather than the tick ISR itself
/// (see `oxidecomputer-hubris`'s `arm_m.rs` for the canonical explanation):
/// `PendSV` runs at the lowest exception priority, so it only fires after
/// every other pending interrupt (including `SysTick`) has been handled,
/// which means a switch never happens in the middle of another ISR's
/// work — the tick handler just *requests* a switch by setting
/// `SCB.ICSR.PENDSVSET`, and this module's handler does the actual frame
/// shuffle once the core is ready for it.
use core::arch::global_asm;

/// The portion of the saved frame this kernel pushes/pops itself. Layout
/// matches the `stmdb`/`ldmia` register list in the assembly below.
#[repr(C)]
pub struct SoftwareFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
}

/// The portion of the saved frame the hardware pushes/pops automatically
/// on exception entry/exit while running on the PSP.
#[repr(C)]
pub struct HardwareFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// The full saved-context block a thread's `saved_sp` points to while it
/// is not running: `SoftwareFrame` followed immediately by `HardwareFrame`,
/// at the lowest address of the thread's stack usage.
#[repr(C)]
pub struct ThreadFrame {
    pub software: SoftwareFrame,
    pub hardware: HardwareFrame,
}

/// Initial xPSR for every freshly created thread: the Thumb bit (bit 24)
/// must always be set, Cortex-M has no ARM instruction mode.
pub const INITIAL_XPSR: u32 = 0x0100_0000;

/// Returns the address of the raw `PendSV` handler, for completeness with
/// the teacher's `timer_isr_addr()` — on Cortex-M the vector table is
/// built by `cortex-m-rt`'s `#[exception] fn PendSV()` attribute rather
/// than by hand, so nothing needs to install this address explicitly, but
/// tests reference it as the documented switch entry point.
pub fn pendsv_handler_addr() -> u32 {
    extern "C" {
        fn PendSV();
    }
    PendSV as *const () as u32
}

// Raw PendSV entry: push the four callee-saved register pairs the
// hardware doesn't save automatically, hand the full frame pointer to the
// scheduler, load whatever stack pointer it returns (the incoming
// thread's — may be the same one if nothing is switching), pop its
// callee-saved registers, and let exception return unstack the rest.
global_asm!(
    ".global PendSV",
    ".section .text.PendSV",
    ".thumb_func",
    "PendSV:",
    "mrs r0, psp",
    "stmdb r0!, {{r4-r11}}",
    "bl pendsv_select_next",
    "ldmia r0!, {{r4-r11}}",
    "msr psp, r0",
    "bx lr",
);

// One-time bootstrap into the very first thread. There is no outgoing
// frame to save here — we are Reset-handler code running on the main
// stack, not an exception handler — so this can't just be a call to
// `pendsv_select_next`. It manually does the part of exception return
// PendSV normally gets from hardware: pop the callee-saved half of the
// frame, switch to PSP, then pop the caller-saved half by hand. xPSR is
// deliberately not restored from the synthetic frame — this kernel never
// sets the IT-block bits and the Thumb bit is permanently set on Cortex-M,
// so the only bit of xPSR that would ever matter here is already correct.
// `pc` is popped into r2, not r1: r0/r1 carry `thread_entry_wrapper`'s
// arguments (arg, entry) straight out of the synthetic hardware frame, and
// clobbering r1 with the return address before the `bx` would hand the
// wrapper its own address as the entry function instead of the real one.
global_asm!(
    ".global cortex_m_start_first_thread",
    ".section .text.cortex_m_start_first_thread",
    ".thumb_func",
    "cortex_m_start_first_thread:",
    "ldmia r0!, {{r4-r11}}",
    "msr psp, r0",
    "movs r1, #2",
    "msr control, r1",
    "isb",
    "pop {{r0-r3, r12, lr}}",
    "pop {{r2}}",
    "add sp, sp, #4",
    "cpsie i",
    "bx r2",
);

/// Jump into `sp` (a freshly constructed `ThreadFrame`'s low address) as
/// the very first thread this core ever runs. Never returns.
pub fn start_first_thread(sp: *mut u32) -> ! {
    extern "C" {
        fn cortex_m_start_first_thread(sp: *mut u32) -> !;
    }
    unsafe { cortex_m_start_first_thread(sp) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn thread_frame_is_sixteen_words() {
        assert_eq!(size_of::<ThreadFrame>(), 16 * size_of::<u32>());
    }
}
