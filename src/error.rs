//! Kernel error taxonomy.
//!
//! Transient errors are absorbed by the state machines that produce them
//! and never surface here. Only the handful of kinds that a caller (or a
//! panic hook) needs to observe are represented.

/// Errors produced by the kernel, generic over the radio driver's own
/// associated error type `E`.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError<E> {
    /// ISF read failed or returned a value outside its valid range.
    ConfigInvalid,

    /// A required ISF file is missing or truncated.
    IsfRead,

    /// CSMA-CA exhausted `tca` without acquiring the channel.
    CsmaFailed,

    /// Frame failed CRC and no further retry is possible within the
    /// current listen window.
    CrcBad,

    /// Frame was rejected by the subnet/link-budget filter.
    FilterRejected,

    /// A foreground listen expired with no frame received.
    ListenTimeout,

    /// The soft watchdog expired; the radio has been killed.
    WatchdogExpired,

    /// The session stack is full; `new_session` could not push.
    SessionStackFull,

    /// Wrapper for unhandled / underlying radio driver errors.
    Radio(E),
}

impl<E> From<E> for KernelError<E> {
    fn from(e: E) -> Self {
        KernelError::Radio(e)
    }
}

impl<E> KernelError<E> {
    /// Stable numeric code surfaced to `sys_panic`'s panic hook, independent
    /// of `E` so a host doesn't need the radio driver's error type to
    /// interpret it.
    pub fn code(&self) -> u16 {
        match self {
            KernelError::ConfigInvalid => 1,
            KernelError::IsfRead => 2,
            KernelError::CsmaFailed => 3,
            KernelError::CrcBad => 4,
            KernelError::FilterRejected => 5,
            KernelError::ListenTimeout => 6,
            KernelError::WatchdogExpired => 7,
            KernelError::SessionStackFull => 8,
            KernelError::Radio(_) => 9,
        }
    }
}
