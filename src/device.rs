/// Device contract consumed by UART/SPI/I2C/RTC drivers: an opaque
/// `Device` carrying per-instance state plus a small `{open, close, read,
/// write, ioctl}` operation table, registered by name at init.
///
/// The kernel makes no assumptions about byte ordering, framing, or
/// buffering inside a driver — `state` is whatever the driver wants it to
/// be, type-erased behind a raw pointer the same way the teacher's
/// `framebuffer`/`console` modules each keep their own `spin::Mutex<Option<
/// T>>` singleton rather than routing through a shared interface. Drivers
/// may call `event::Event::signal` or `sync::queue::Queue::send` from ISR
/// context (both only ever touch a `spin::Mutex` guarded by this kernel's
/// critical section, which nests safely); they must not call `alloc` or
/// `sync::mutex::Mutex::lock` from ISR context, since both can block
/// indefinitely and an ISR has nothing to block on.
extern crate alloc;

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub struct DeviceOps {
    pub open: fn(*mut ()) -> KernelResult<()>,
    pub close: fn(*mut ()) -> KernelResult<()>,
    pub read: fn(*mut (), buf: &mut [u8]) -> KernelResult<usize>,
    pub write: fn(*mut (), buf: &[u8]) -> KernelResult<usize>,
    pub ioctl: fn(*mut (), request: u32, arg: usize) -> KernelResult<usize>,
}

pub struct Device {
    pub name: &'static str,
    ops: DeviceOps,
    state: *mut (),
}

// Safety: a registered `Device` is only ever reached through the
// critical-section-guarded registry below.
unsafe impl Send for Device {}

impl Device {
    pub const fn new(name: &'static str, ops: DeviceOps, state: *mut ()) -> Self {
        Device { name, ops, state }
    }

    pub fn open(&mut self) -> KernelResult<()> {
        (self.ops.open)(self.state)
    }

    pub fn close(&mut self) -> KernelResult<()> {
        (self.ops.close)(self.state)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        (self.ops.read)(self.state, buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> KernelResult<usize> {
        (self.ops.write)(self.state, buf)
    }

    pub fn ioctl(&mut self, request: u32, arg: usize) -> KernelResult<usize> {
        (self.ops.ioctl)(self.state, request, arg)
    }
}

static REGISTRY: Mutex<BTreeMap<&'static str, Device>> = Mutex::new(BTreeMap::new());

/// Register a driver instance under its name. `InvalidState` if the name
/// is already taken.
pub fn register(device: Device) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(device.name) {
        return Err(KernelError::InvalidState);
    }
    registry.insert(device.name, device);
    Ok(())
}

pub fn unregister(name: &str) -> KernelResult<()> {
    let mut registry = REGISTRY.lock();
    registry
        .remove(name)
        .map(|_| ())
        .ok_or(KernelError::InvalidArgument)
}

/// Look up a registered device by name and run `f` against it.
/// `InvalidArgument` if no driver registered under that name.
pub fn with_device<R>(name: &str, f: impl FnOnce(&mut Device) -> R) -> KernelResult<R> {
    let mut registry = REGISTRY.lock();
    match registry.get_mut(name) {
        Some(device) => Ok(f(device)),
        None => Err(KernelError::InvalidArgument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static OPEN_CALLS: AtomicU32 = AtomicU32::new(0);

    fn fake_open(_state: *mut ()) -> KernelResult<()> {
        OPEN_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn fake_close(_state: *mut ()) -> KernelResult<()> {
        Ok(())
    }
    fn fake_read(_state: *mut (), buf: &mut [u8]) -> KernelResult<usize> {
        buf.fill(0xAB);
        Ok(buf.len())
    }
    fn fake_write(_state: *mut (), buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }
    fn fake_ioctl(_state: *mut (), _request: u32, _arg: usize) -> KernelResult<usize> {
        Ok(0)
    }

    fn fake_ops() -> DeviceOps {
        DeviceOps {
            open: fake_open,
            close: fake_close,
            read: fake_read,
            write: fake_write,
            ioctl: fake_ioctl,
        }
    }

    #[test]
    fn register_then_look_up_by_name() {
        OPEN_CALLS.store(0, Ordering::SeqCst);
        register(Device::new("test-uart-0", fake_ops(), core::ptr::null_mut())).unwrap();
        let n = with_device("test-uart-0", |d| d.open().unwrap()).unwrap();
        let _: () = n;
        assert_eq!(OPEN_CALLS.load(Ordering::SeqCst), 1);
        unregister("test-uart-0").unwrap();
    }

    #[test]
    fn duplicate_name_is_invalid_state() {
        register(Device::new("test-uart-1", fake_ops(), core::ptr::null_mut())).unwrap();
        let err = register(Device::new("test-uart-1", fake_ops(), core::ptr::null_mut())).unwrap_err();
        assert_eq!(err, KernelError::InvalidState);
        unregister("test-uart-1").unwrap();
    }

    #[test]
    fn unknown_name_is_invalid_argument() {
        let err = with_device("does-not-exist", |_| ()).unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument);
    }

    #[test]
    fn read_and_write_route_through_the_operation_table() {
        register(Device::new("test-uart-2", fake_ops(), core::ptr::null_mut())).unwrap();
        let mut buf = [0u8; 4];
        let read_n = with_device("test-uart-2", |d| d.read(&mut buf).unwrap()).unwrap();
        assert_eq!(read_n, 4);
        assert_eq!(buf, [0xAB; 4]);
        let write_n = with_device("test-uart-2", |d| d.write(&buf).unwrap()).unwrap();
        assert_eq!(write_n, 4);
        unregister("test-uart-2").unwrap();
    }
}
