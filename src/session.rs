//! Session data model and session stack.
//!
//! `NetState` replaces a packed bitfield with a tagged bitflags set plus an
//! explicit two-bit `DialogClass` subfield.

use bitflags::bitflags;
use heapless::Vec;
use log::{debug, trace, warn};

use crate::csma::CsmaCaParams;

bitflags! {
    /// MAC dialog state flags.
    ///
    /// Bits 5 and 6 are reserved for the packed `DialogClass` selector
    /// (`dialog_class`/`set_dialog_class`) rather than named flags, read
    /// out via `(netstate >> 5) & 3`.
    pub struct NetState: u16 {
        const INIT      = 1 << 0;
        const REQTX     = 1 << 1;
        const REQRX     = 1 << 2;
        const RESPTX    = 1 << 3;
        const RESPRX    = 1 << 4;
        const CONNECTED = 1 << 7;
        const HOLD      = 1 << 8;
        const SCRAP     = 1 << 9;
        const FIRSTRX   = 1 << 10;
        const DS_DIALOG = 1 << 11;
    }
}

const DIALOG_CLASS_SHIFT: u16 = 5;
const DIALOG_CLASS_MASK: u16 = 0b11 << DIALOG_CLASS_SHIFT;

/// Session initializer selector, taken from `(netstate >> 5) & 3`.
///
/// If the top bit of the selector is set the session task scraps the
/// session instead of calling an initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogClass {
    InitFtx = 0,
    Fscan = 1,
    InitBtx = 2,
    Bscan = 3,
}

impl DialogClass {
    pub fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => DialogClass::InitFtx,
            1 => DialogClass::Fscan,
            2 => DialogClass::InitBtx,
            _ => DialogClass::Bscan,
        }
    }

    /// True when the top bit of the two-bit selector is set (values 2, 3):
    /// the session task scraps rather than initializes.
    pub fn is_scrap(&self) -> bool {
        matches!(self, DialogClass::InitBtx | DialogClass::Bscan)
    }
}

impl NetState {
    pub fn dialog_class(&self) -> DialogClass {
        let v = (self.bits() & DIALOG_CLASS_MASK) >> DIALOG_CLASS_SHIFT;
        DialogClass::from_bits(v as u8)
    }

    pub fn set_dialog_class(&mut self, class: DialogClass) {
        let cleared = self.bits() & !DIALOG_CLASS_MASK;
        let v = (class as u16) << DIALOG_CLASS_SHIFT;
        *self = NetState::from_bits_truncate(cleared | v);
    }

    /// Toggle RESPRX<->REQTX and REQRX<->RESPTX, used when a CSMA-CA A2P
    /// dialog times out and must swap roles for the retry.
    pub fn toggle_a2p_roles(&mut self) {
        if self.contains(NetState::RESPRX) {
            self.remove(NetState::RESPRX);
            self.insert(NetState::REQTX);
        } else if self.contains(NetState::REQTX) {
            self.remove(NetState::REQTX);
            self.insert(NetState::RESPRX);
        }

        if self.contains(NetState::REQRX) {
            self.remove(NetState::REQRX);
            self.insert(NetState::RESPTX);
        } else if self.contains(NetState::RESPTX) {
            self.remove(NetState::RESPTX);
            self.insert(NetState::REQRX);
        }
    }
}

/// Per-dialog MAC parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DllComm {
    /// Contention window total, in ticks.
    pub tc: i32,
    /// Contention window remaining, in ticks. Invariant: `tca <= tc`.
    pub tca: i32,
    /// Foreground listen timeout, in ticks.
    pub rx_timeout: i32,
    /// Remaining re-transmissions.
    pub redundants: u8,

    pub tx_channels: u8,
    pub rx_channels: u8,
    /// Inline single-channel scratch list, used when `tx_channels`/
    /// `rx_channels` == 1 rather than allocating into `tx_chanlist`.
    pub scratch: [u8; 2],

    pub tx_chanlist: Vec<u8, 8>,
    pub rx_chanlist: Vec<u8, 8>,

    pub csmaca_params: CsmaCaParams,

    pub idle_state: IdleState,
}

impl Default for DllComm {
    fn default() -> Self {
        Self {
            tc: 0,
            tca: 0,
            rx_timeout: 0,
            redundants: 0,
            tx_channels: 0,
            rx_channels: 0,
            scratch: [0; 2],
            tx_chanlist: Vec::new(),
            rx_chanlist: Vec::new(),
            csmaca_params: CsmaCaParams::default(),
            idle_state: IdleState::Off,
        }
    }
}

/// Device idle policy. After any call to the idle routine, `idle_state`
/// is one of these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Off,
    Sleep,
    Hold,
}

/// A unit of MAC dialog.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub channel: u8,
    pub subnet: u8,
    pub flags: u8,
    pub dialog_id: u16,
    pub netstate: NetState,
    /// Ticks until next action. May go negative; callers that require a
    /// non-negative countdown should clamp at read time.
    pub counter: i32,
    /// Present for sessions created with `drop()`: header state retained
    /// but the session is not dispatched.
    pub dropped: bool,
}

impl Session {
    pub fn new(channel: u8, subnet: u8, flags: u8, dialog_id: u16, netstate: NetState, counter: i32) -> Self {
        Self { channel, subnet, flags, dialog_id, netstate, counter, dropped: false }
    }

    pub fn is_scrap(&self) -> bool {
        self.netstate.contains(NetState::SCRAP)
    }

    pub fn is_ready(&self) -> bool {
        !self.dropped && self.netstate.contains(NetState::INIT)
    }
}

/// Bounded LIFO session stack: sessions are serviced top-of-stack rather
/// than in FIFO order, backed by a fixed-capacity `heapless::Vec`.
pub struct SessionStack<const N: usize> {
    stack: Vec<Session, N>,
}

impl<const N: usize> SessionStack<N> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Push a new session. Ad-hoc sessions (`wait == 0`) always succeed,
    /// evicting the bottom (oldest) session if the stack is full.
    pub fn new_session(&mut self, wait: u16, session: Session) -> Option<&Session> {
        if self.stack.is_full() {
            if wait == 0 {
                debug!("Session stack full, evicting oldest for ad-hoc session");
                self.stack.remove(0);
            } else {
                warn!("Session stack overflow");
                return None;
            }
        }

        self.stack.push(session).ok();
        self.stack.last()
    }

    pub fn top(&self) -> Option<&Session> {
        self.stack.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Session> {
        self.stack.last_mut()
    }

    pub fn pop(&mut self) -> Option<Session> {
        self.stack.pop()
    }

    /// Mark the top session inactive, retaining its header state.
    pub fn drop_top(&mut self) {
        if let Some(s) = self.stack.last_mut() {
            s.dropped = true;
        }
    }

    /// Decrement per-session counters by `elapsed` and pop expired sessions
    /// from the top of the stack.
    pub fn refresh(&mut self, elapsed: i32) {
        if let Some(top) = self.stack.last_mut() {
            top.counter -= elapsed;
        }

        while let Some(top) = self.stack.last() {
            if top.counter <= 0 && !top.netstate.contains(NetState::HOLD) {
                trace!("Session expired, popping");
                self.stack.pop();
            } else {
                break;
            }
        }

        if let Some(top) = self.stack.last() {
            if top.is_scrap() {
                self.stack.pop();
            }
        }
    }

    /// Remove all non-holding expired sessions from anywhere in the stack.
    pub fn flush(&mut self) {
        // heapless::Vec has no `drain`; pop into a scratch stack (which
        // reverses order) then pop that back into `self.stack` (reversing
        // again) to restore relative order among the kept sessions.
        let mut tmp: Vec<Session, N> = Vec::new();
        while let Some(s) = self.stack.pop() {
            if s.counter > 0 || s.netstate.contains(NetState::HOLD) {
                let _ = tmp.push(s);
            }
        }
        while let Some(s) = tmp.pop() {
            let _ = self.stack.push(s);
        }
    }

    /// Unconditionally discard every session, including holding ones.
    /// Used by `sys_panic`, unlike `flush`, which only drops expired
    /// non-holding entries.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Depth minus one; negative when empty.
    pub fn count(&self) -> i32 {
        self.stack.len() as i32 - 1
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl<const N: usize> Default for SessionStack<N> {
    fn default() -> Self {
        Self::new()
    }
}
