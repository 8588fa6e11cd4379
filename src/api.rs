//! Application API: the handful of entry points an application
//! calls into the kernel from outside the dispatcher loop.

use rand_core::RngCore;

use crate::auth::AuthProvider;
use crate::dispatch::{HookSet, Kernel};
use crate::error::KernelError;
use crate::isf::IsfStore;
use crate::network::NetworkStack;
use crate::queue::ByteQueue;
use crate::radio::{RadioDriver, RfaState, SysMutex};
use crate::session::{NetState, Session};
use crate::timer::Timer;

/// Parameters for an application-requested ad-hoc session: a caller-supplied
/// timeout and channel; the subnet/flags masks are applied against the
/// network defaults already held in `NetConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTemplate {
    pub channel: u8,
    pub flags: u8,
    pub timeout: i32,
}

/// Bit 6 of a network address marks it as broadcast; `open_request` only
/// applies to unicast/anycast addressing.
const ADDR_BROADCAST_BIT: u8 = 0x40;

impl<D, T, F, N, A, H, G, Q, const S: usize> Kernel<D, T, F, N, A, H, G, Q, S>
where
    D: RadioDriver,
    T: Timer,
    F: IsfStore,
    N: NetworkStack,
    A: AuthProvider,
    H: HookSet,
    G: RngCore,
    Q: ByteQueue + Default,
{
    /// Open an ad-hoc request-TX session. Returns
    /// the opaque session id, or 0 on failure.
    pub fn new_session(&mut self, template: SessionTemplate) -> u16 {
        self.dll.tc = template.timeout;
        self.dll.tca = template.timeout;

        self.dialog_id_counter = self.dialog_id_counter.wrapping_add(1).max(1);
        let dialog_id = self.dialog_id_counter;

        // Subnet comes from network defaults; no concrete flag mask is
        // defined beyond applying subnet/flag masks over network defaults,
        // so the template's flags pass through as-is.
        let session = Session::new(
            template.channel,
            self.netconf.subnet,
            template.flags,
            dialog_id,
            NetState::INIT | NetState::REQTX,
            template.timeout,
        );

        match self.sessions.new_session(0, session) {
            Some(s) => s.dialog_id,
            None => 0,
        }
    }

    /// Build the M2NP header on the top session for a unicast/anycast
    /// request, staging the encoded bytes in `tx_queue`.
    pub fn open_request(&mut self, addr: u8, routing: &[u8]) -> bool {
        if addr & ADDR_BROADCAST_BIT != 0 {
            return false;
        }

        self.tx_queue.clear();
        let Some(top) = self.sessions.top_mut() else { return false };
        self.network.build_header(top, routing, &mut self.tx_queue).is_ok()
    }

    /// Finalise the footer of an in-progress request, appending to
    /// `tx_queue`.
    pub fn close_request(&mut self) -> bool {
        let Some(top) = self.sessions.top_mut() else { return false };
        self.network.close_footer(top, &mut self.tx_queue).is_ok()
    }

    /// Arm a flood TX for `duration` ticks, or start a normal dialog if
    /// `duration == 0`. Returns the tick budget.
    pub fn start_flood(&mut self, duration: i32) -> i32 {
        if duration == 0 {
            self.start_dialog();
            return 0;
        }

        self.dll.tc = duration;
        let _ = self.radio.init_btx(duration, &mut self.dll.tca);
        duration
    }

    /// Clear the mutex, kill the radio, and preempt the dispatcher into
    /// re-evaluating tasks.
    pub fn start_dialog(&mut self) -> bool {
        self.radio.mutex = SysMutex::empty();
        self.radio.rfa = RfaState::idle();
        self.radio.driver.kill();
        true
    }

    /// Rerun the network-configuration refresh from the ISF store.
    pub fn sysinit(&mut self) -> Result<(), KernelError<D::Error>> {
        let settings = self.isf.network_settings().map_err(|_| KernelError::IsfRead)?;

        self.netconf.subnet = settings.subnet;
        self.netconf.b_subnet = settings.b_subnet;
        self.netconf.dd_flags = settings.dd_flags;
        self.netconf.b_attempts = settings.b_attempts;
        self.netconf.hold_limit = settings.hold_limit;
        self.hold_cycle.limit = settings.hold_limit;

        let (idle_state, idle_events) = crate::idle::cold_start(self.netconf.active.is_endpoint());
        self.idle_state = idle_state;
        self.idle_events = idle_events;

        Ok(())
    }
}
