//! Network configuration and capability/hook model.
//!
//! Compile-time feature toggles (`ENDPOINT, BEACONS, GATEWAY,
//! SUBCONTROLLER, EXTERNAL_EVENT, RTC_SCHEDULER`) become a runtime
//! `Capabilities` flag set; function-pointer hook tables become trait
//! objects with default no-op impls.

use bitflags::bitflags;

bitflags! {
    /// Device role/capability flags, replacing the source's compile-time
    /// feature toggles.
    #[derive(Default)]
    pub struct Capabilities: u16 {
        const ENDPOINT       = 1 << 0;
        const BEACONS        = 1 << 1;
        const GATEWAY        = 1 << 2;
        const SUBCONTROLLER  = 1 << 3;
        const EXTERNAL_EVENT = 1 << 4;
        const RTC_SCHEDULER  = 1 << 5;
    }
}

impl Capabilities {
    /// Endpoints may sleep; every other class collapses to hold.
    pub fn is_endpoint(&self) -> bool {
        self.contains(Capabilities::ENDPOINT)
    }
}

/// Persisted network configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    pub subnet: u8,
    pub b_subnet: u8,
    pub active: Capabilities,
    pub dd_flags: u8,
    pub b_attempts: u8,
    /// Hold cycles before descending to sleep.
    pub hold_limit: u16,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            subnet: 0,
            b_subnet: 0,
            active: Capabilities::ENDPOINT,
            dd_flags: 0,
            b_attempts: 0,
            hold_limit: 1,
        }
    }
}

/// Watchdog configuration, collapsing the HW/SW watchdog variant toggles
/// into a single runtime period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub period_ms: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { period_ms: 1000 }
    }
}

/// Application-load hook: called by the idle task to offer the
/// application a chance to do work before computing the next ETA.
pub trait LoadAppHook {
    /// Returns true if application work was performed (the idle task
    /// should loop rather than sleep).
    fn load(&mut self) -> bool {
        false
    }
}

pub struct NoOpLoadApp;
impl LoadAppHook for NoOpLoadApp {}

/// Panic hook invoked by `sys_panic`. Must not allocate or touch
/// the radio.
pub trait PanicHook {
    fn on_panic(&mut self, _code: u16) {}
}

pub struct NoOpPanicHook;
impl PanicHook for NoOpPanicHook {}

/// RFA (radio-activity) init/terminate hooks, invoked around radio state
/// machine entry/exit.
pub trait RfaHook {
    fn on_init(&mut self, _event_no: u8) {}
    fn on_terminate(&mut self, _event_no: u8) {}
}

pub struct NoOpRfaHook;
impl RfaHook for NoOpRfaHook {}

/// Prestart hook, invoked before an idle-time event fires (e.g. to let the
/// application abort or modify a scheduled scan/beacon).
pub trait PrestartHook {
    fn prestart(&mut self, _event_no: u8) -> bool {
        true
    }
}

pub struct NoOpPrestartHook;
impl PrestartHook for NoOpPrestartHook {}
