/// Unified error type for every fallible kernel operation.
///
/// Carries no heap allocation, so it can be constructed and returned
/// from interrupt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Heap exhaustion during `alloc`, thread creation, or queue creation.
    OutOfMemory,
    /// A blocking operation returned because its deadline elapsed.
    Timeout,
    /// A caller violated a primitive's state machine (double release,
    /// recursive mutex re-acquire, freeing a foreign pointer, ...).
    InvalidState,
    /// A null handle, an out-of-range priority, a stack size below the
    /// platform minimum, or similar.
    InvalidArgument,
    /// A non-blocking variant was attempted while the object was busy.
    WouldBlock,
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::Timeout => write!(f, "timed out"),
            KernelError::InvalidState => write!(f, "invalid state"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::WouldBlock => write!(f, "would block"),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
