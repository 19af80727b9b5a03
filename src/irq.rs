/// Software IRQ vector dispatch table.
///
/// The teacher hardcodes two IDT entries (`InterruptIndex::Timer`,
/// `InterruptIndex::Keyboard`) by hand in `interrupts::init_idt`. This
/// kernel's device contract (§6) needs an arbitrary number of interrupt
/// sources to register a handler at runtime instead of at compile time —
/// the same shape `cbiffle/embrs`'s `InterruptTable` uses for its STM32F4
/// IRQ vector: a fixed-size array of optional `(handler, arg)` slots,
/// indexed by IRQ number, with NVIC enable/disable wrapped alongside so a
/// driver only ever touches this module instead of the raw peripheral.
///
/// `cortex-m-rt`'s vector table still has to name a concrete `#[interrupt]`
/// function per physical IRQ line for a specific chip; on a part this
/// kernel doesn't target by name, those entries would each just call
/// `irq::dispatch(N)`. That wiring is out of scope here — this module is
/// the dispatch table underneath it.
use core::sync::atomic::Ordering;

use spin::Mutex;

use crate::config::IRQ_COUNT;
use crate::critical_section;
use crate::error::{KernelError, KernelResult};

pub type IrqHandler = fn(u32);

#[derive(Clone, Copy)]
struct Slot {
    handler: Option<IrqHandler>,
    arg: u32,
}

const EMPTY_SLOT: Slot = Slot {
    handler: None,
    arg: 0,
};

static TABLE: Mutex<[Slot; IRQ_COUNT]> = Mutex::new([EMPTY_SLOT; IRQ_COUNT]);

/// Register `handler` for `irq`, replacing whatever was registered before.
/// `arg` is passed back to the handler on every dispatch, letting one
/// handler function serve several instances of the same device.
pub fn register(irq: usize, handler: IrqHandler, arg: u32) -> KernelResult<()> {
    if irq >= IRQ_COUNT {
        return Err(KernelError::InvalidArgument);
    }
    critical_section::with(|| {
        TABLE.lock()[irq] = Slot {
            handler: Some(handler),
            arg,
        };
    });
    Ok(())
}

pub fn unregister(irq: usize) -> KernelResult<()> {
    if irq >= IRQ_COUNT {
        return Err(KernelError::InvalidArgument);
    }
    critical_section::with(|| {
        TABLE.lock()[irq] = EMPTY_SLOT;
    });
    Ok(())
}

/// Invoked by a chip's concrete vector table entry for `irq`. Unregistered
/// IRQs are silently ignored rather than panicking — a spurious or
/// not-yet-registered interrupt firing during boot shouldn't take the
/// kernel down.
pub fn dispatch(irq: usize) {
    let slot = critical_section::with(|| {
        TABLE
            .lock()
            .get(irq)
            .copied()
            .unwrap_or(EMPTY_SLOT)
    });
    if let Some(handler) = slot.handler {
        handler(slot.arg);
    }
}

#[cfg(not(test))]
mod nvic {
    const ISER0: usize = 0xE000_E100;
    const ICER0: usize = 0xE000_E180;

    fn reg(base: usize, irq: usize) -> *mut u32 {
        (base + (irq / 32) * 4) as *mut u32
    }

    pub fn enable(irq: usize) {
        unsafe { core::ptr::write_volatile(reg(ISER0, irq), 1 << (irq % 32)) };
    }

    pub fn disable(irq: usize) {
        unsafe { core::ptr::write_volatile(reg(ICER0, irq), 1 << (irq % 32)) };
    }
}

#[cfg(test)]
mod nvic {
    use super::*;
    use core::sync::atomic::AtomicU32;
    pub static ENABLED_MASK: AtomicU32 = AtomicU32::new(0);

    pub fn enable(irq: usize) {
        ENABLED_MASK.fetch_or(1 << (irq % 32), Ordering::SeqCst);
    }

    pub fn disable(irq: usize) {
        ENABLED_MASK.fetch_and(!(1 << (irq % 32)), Ordering::SeqCst);
    }
}

pub fn enable(irq: usize) -> KernelResult<()> {
    if irq >= IRQ_COUNT {
        return Err(KernelError::InvalidArgument);
    }
    nvic::enable(irq);
    Ok(())
}

pub fn disable(irq: usize) -> KernelResult<()> {
    if irq >= IRQ_COUNT {
        return Err(KernelError::InvalidArgument);
    }
    nvic::disable(irq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    static CALLS: AtomicU32 = AtomicU32::new(0);
    static LAST_ARG: AtomicU32 = AtomicU32::new(0);

    fn handler(arg: u32) {
        CALLS.fetch_add(1, Ordering::SeqCst);
        LAST_ARG.store(arg, Ordering::SeqCst);
    }

    #[test]
    fn register_rejects_out_of_range_irq() {
        assert_eq!(register(IRQ_COUNT, handler, 0), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn dispatch_calls_registered_handler_with_arg() {
        CALLS.store(0, Ordering::SeqCst);
        register(3, handler, 42).unwrap();
        dispatch(3);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_ARG.load(Ordering::SeqCst), 42);
        unregister(3).unwrap();
    }

    #[test]
    fn dispatch_on_unregistered_irq_is_a_no_op() {
        CALLS.store(0, Ordering::SeqCst);
        dispatch(7);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enable_disable_track_the_mask() {
        enable(5).unwrap();
        assert_ne!(nvic::ENABLED_MASK.load(Ordering::SeqCst) & (1 << 5), 0);
        disable(5).unwrap();
        assert_eq!(nvic::ENABLED_MASK.load(Ordering::SeqCst) & (1 << 5), 0);
    }
}
