//! The event manager: the strict-priority cooperative dispatcher that ties
//! the radio state machine, session stack, CSMA-CA and idle-time sequencer
//! together. A single tick entry point clocks timers, picks the
//! highest-priority ready task, and drives one step of it.

use log::warn;
use rand_core::RngCore;

use crate::auth::AuthProvider;
use crate::config::{Capabilities, LoadAppHook, NetConfig, PanicHook, PrestartHook, RfaHook, WatchdogConfig};
use crate::error::KernelError;
use crate::filter::FilterConfig;
use crate::idle::{self, HoldCycle, IdleEvents, RtcAlarm};
use crate::isf::IsfStore;
use crate::network::NetworkStack;
use crate::queue::ByteQueue;
use crate::radio::{RadioDriver, RadioIo, RfaEvent};
use crate::session::{DialogClass, DllComm, IdleState, NetState, Session, SessionStack};
use crate::timer::Timer;

/// Bit in a session's `flags` requesting that its receiver clone a
/// follow-up request-RX session once this frame is delivered. Not defined numerically elsewhere in the wire format, so the
/// low bit is used; reserved for the network layer's own flag allocation.
pub const FLAG_LISTEN: u8 = 0x01;

/// The task the dispatcher selects this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Processing,
    Radio,
    Session,
    Hold,
    Sleep,
    Beacon,
    External,
    Idle,
}

/// Bundles the four capability-set hooks plus RTC programming into a single generic parameter so the
/// kernel doesn't carry one type parameter per hook.
pub trait HookSet: LoadAppHook + PanicHook + RfaHook + PrestartHook + RtcAlarm {}
impl<T: LoadAppHook + PanicHook + RfaHook + PrestartHook + RtcAlarm> HookSet for T {}

pub struct NoOpHooks;
impl LoadAppHook for NoOpHooks {}
impl PanicHook for NoOpHooks {}
impl RfaHook for NoOpHooks {}
impl PrestartHook for NoOpHooks {}
impl RtcAlarm for NoOpHooks {
    fn program(&mut self, _mask: u16, _value: u16) {}
}

/// The kernel: owns every process-wide singleton (the radio, the system
/// mutex, the session stack, the DLL comm block, and the two byte queues)
/// behind one exclusively-borrowed value.
pub struct Kernel<D, T, F, N, A, H, G, Q, const S: usize>
where
    D: RadioDriver,
    T: Timer,
    F: IsfStore,
    N: NetworkStack,
    A: AuthProvider,
    H: HookSet,
    G: RngCore,
    Q: ByteQueue,
{
    pub radio: RadioIo<D>,
    pub timer: T,
    pub isf: F,
    pub network: N,
    pub auth: A,
    pub hooks: H,
    pub rng: G,

    pub sessions: SessionStack<S>,
    pub dll: DllComm,
    pub netconf: NetConfig,

    /// Staging buffer for the frame currently being built/transmitted on
    /// the top session; its length feeds `pkt_duration` for CSMA timing.
    pub tx_queue: Q,

    pub idle_events: IdleEvents,
    pub hold_cycle: HoldCycle,
    pub idle_state: IdleState,

    pub filter: FilterConfig,
    pub watchdog: WatchdogConfig,
    pub soft_watchdog_remaining: i32,

    pub processing_pending: bool,
    pub external_pending: bool,

    /// Opaque session id counter, handed out by `new_session`.
    pub dialog_id_counter: u16,

    /// Timer reading as of the last `step` entry, for computing `elapsed`.
    last_tick_ms: u32,
}

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
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: D,
        timer: T,
        isf: F,
        network: N,
        auth: A,
        hooks: H,
        rng: G,
        filter: FilterConfig,
        watchdog: WatchdogConfig,
    ) -> Self {
        let netconf = NetConfig::default();
        let (idle_state, idle_events) = idle::cold_start(netconf.active.is_endpoint());
        let last_tick_ms = timer.ticks_ms();

        Self {
            radio: RadioIo::new(driver),
            timer,
            isf,
            network,
            auth,
            hooks,
            rng,
            sessions: SessionStack::new(),
            dll: DllComm::default(),
            netconf,
            tx_queue: Q::default(),
            idle_events,
            hold_cycle: HoldCycle { count: 0, limit: netconf.hold_limit },
            idle_state,
            filter,
            watchdog,
            soft_watchdog_remaining: watchdog.period_ms as i32,
            processing_pending: false,
            external_pending: false,
            dialog_id_counter: 0,
            last_tick_ms,
        }
    }

    /// Subtract `elapsed` from every countdown the dispatcher owns and
    /// refresh the session stack.
    pub fn clock_tasks(&mut self, elapsed: i32) {
        self.dll.tca -= elapsed;
        self.radio.rfa.nextevent -= elapsed;

        if self.idle_events.hold.is_active() {
            self.idle_events.hold.nextevent -= elapsed;
        }
        if self.idle_events.sleep.is_active() {
            self.idle_events.sleep.nextevent -= elapsed;
        }
        if self.idle_events.beacon.is_active() {
            self.idle_events.beacon.nextevent -= elapsed;
        }

        self.sessions.refresh(elapsed);
    }

    /// Choose the highest-priority ready task.
    pub fn select_task(&self) -> Task {
        if self.processing_pending {
            return Task::Processing;
        }

        if !matches!(self.radio.rfa.event, RfaEvent::Idle) {
            return Task::Radio;
        }

        if let Some(top) = self.sessions.top() {
            if top.is_ready() {
                return Task::Session;
            }
        }

        // Iterate lowest to highest index and overwrite, so a later match
        // wins: Beacon > Sleep > Hold.
        let mut idle_task = None;
        if self.idle_events.hold.is_active() && self.idle_events.hold.nextevent <= 0 {
            idle_task = Some(Task::Hold);
        }
        if self.idle_events.sleep.is_active() && self.idle_events.sleep.nextevent <= 0 {
            idle_task = Some(Task::Sleep);
        }
        if self.idle_events.beacon.is_active() && self.idle_events.beacon.nextevent <= 0 {
            idle_task = Some(Task::Beacon);
        }
        if let Some(task) = idle_task {
            return task;
        }

        if self.external_pending && self.netconf.active.contains(Capabilities::EXTERNAL_EVENT) {
            return Task::External;
        }

        Task::Idle
    }

    /// One dispatcher iteration. Reads elapsed ticks since the last entry
    /// off the timer and resets the watchdog. Returns the number of ticks
    /// the caller may sleep the MCU for before the next entry.
    pub fn step(&mut self) -> u16 {
        let now = self.timer.ticks_ms();
        let elapsed = now.wrapping_sub(self.last_tick_ms);
        self.last_tick_ms = now;

        self.timer.reset_watchdog(self.watchdog.period_ms);

        self.soft_watchdog_remaining -= elapsed as i32;
        if self.soft_watchdog_remaining <= 0 {
            warn!("soft watchdog expired, killing radio");
            self.radio.driver.kill();
            self.soft_watchdog_remaining = self.watchdog.period_ms as i32;
        }

        self.clock_tasks(elapsed as i32);

        match self.select_task() {
            Task::Processing => {
                self.run_processing();
                0
            }
            Task::Radio => self.run_radio(),
            Task::Session => {
                self.run_session();
                0
            }
            Task::Hold => self.run_hold(),
            Task::Sleep => self.run_sleep(),
            Task::Beacon => self.run_beacon(),
            Task::External => self.run_external(),
            Task::Idle => self.run_idle(),
        }
    }

    /// Processing task.
    fn run_processing(&mut self) {
        if let Some(top) = self.sessions.top().cloned() {
            if let Ok(score) = self.network.route_score(&top) {
                if score >= 0 {
                    self.idle_state = IdleState::Hold;
                    self.hold_cycle.count = 0;

                    if top.flags & FLAG_LISTEN != 0 {
                        let tx_len = self.radio.driver.pkt_duration(self.tx_queue.len()) as i32;
                        let wait = (self.dll.tc - tx_len).max(0);
                        let clone = Session::new(
                            top.channel,
                            top.subnet,
                            top.flags,
                            top.dialog_id,
                            NetState::INIT | NetState::REQRX,
                            wait,
                        );
                        self.sessions.new_session(wait as u16, clone);
                    }
                }
            }
        }

        self.radio.mutex.remove(crate::radio::SysMutex::PROCESSING);
        self.processing_pending = false;
    }

    /// Radio task: drive the radio state machine one step.
    fn run_radio(&mut self) -> u16 {
        if self.radio.rfa.nextevent > 0 {
            return self.radio.rfa.nextevent.max(0) as u16;
        }

        match self.radio.rfa.event {
            RfaEvent::Idle => 0,
            RfaEvent::Bscan | RfaEvent::Fscan => {
                self.radio.driver.rxtimeout_isr();
                0
            }
            RfaEvent::Btx | RfaEvent::Ftx => {
                let params = self.dll.csmaca_params;
                let tx_len = self.tx_queue.len();
                let tx_frame0 = self.radio.driver.pkt_duration(tx_len) as i32;
                let guard = self.radio.driver.default_tgd(self.dll.tx_channels) as i32;
                let tx_length = self.radio.driver.pkt_duration(tx_len) as i32;

                let outcome = self.radio.tx_csma_step(
                    &params,
                    &mut self.dll.tc,
                    &mut self.dll.tca,
                    tx_frame0,
                    guard,
                    tx_length,
                    &mut self.rng,
                );

                if let crate::radio::TxCsmaOutcome::Failed = outcome {
                    self.sessions.pop();
                    self.radio.rfa = crate::radio::RfaState::idle();
                }
                0
            }
            RfaEvent::BtxInFlight | RfaEvent::FtxInFlight => {
                self.timer.reset_watchdog(self.watchdog.period_ms);
                1
            }
        }
    }

    /// Session task: select one of the four initializers from the top
    /// session's dialog class and arm the radio, or scrap the session if
    /// the class's top bit is set.
    fn run_session(&mut self) {
        let Some(top) = self.sessions.top() else { return };
        let class = top.netstate.dialog_class();
        let channel = top.channel;
        let rx_timeout = self.dll.rx_timeout;

        self.hooks.on_init(top.netstate.bits() as u8);

        match class {
            DialogClass::InitBtx | DialogClass::Bscan => {
                self.sessions.pop();
                return;
            }
            DialogClass::InitFtx => {
                let params = self.dll.csmaca_params;
                let tx_frame0 = self.radio.driver.pkt_duration(self.tx_queue.len()) as i32;
                let _ = self.radio.init_ftx(&params, &mut self.dll.tc, &mut self.dll.tca, tx_frame0, &mut self.rng);
            }
            DialogClass::Fscan => {
                let _ = self.radio.init_fscan(channel, 1, rx_timeout);
            }
        }

        if let Some(top) = self.sessions.top_mut() {
            top.netstate.remove(NetState::INIT);
        }
    }

    fn run_hold(&mut self) -> u16 {
        let mut prestart_dummy = NoOpHooksPrestartProxy(&mut self.hooks);
        let fired = idle::fire_scan(&mut self.idle_events.hold, &self.isf, crate::isf::ScanSeq::Hold, &mut prestart_dummy);

        match fired {
            Ok(Some(rec)) => {
                let wrapped = self.idle_events.hold.cursor == 0;
                if wrapped {
                    let transitioned = idle::on_hold_wrap(
                        &mut self.hold_cycle,
                        &mut self.idle_events.hold,
                        &mut self.idle_events.sleep,
                        &mut self.idle_state,
                    );
                    if transitioned {
                        self.run_sleep();
                    }
                }
                let rx_timeout = rec.rx_timeout_ticks() as i32;
                self.sessions.new_session(
                    0,
                    Session::new(rec.channel, self.netconf.subnet, 0, 0, NetState::INIT, rx_timeout),
                );
            }
            Ok(None) => {}
            Err(_) => self.sys_panic(KernelError::<D::Error>::IsfRead.code()),
        }

        0
    }

    fn run_sleep(&mut self) -> u16 {
        let mut prestart_dummy = NoOpHooksPrestartProxy(&mut self.hooks);
        let fired = idle::fire_scan(&mut self.idle_events.sleep, &self.isf, crate::isf::ScanSeq::Sleep, &mut prestart_dummy);

        match fired {
            Ok(Some(rec)) => {
                let rx_timeout = rec.rx_timeout_ticks() as i32;
                self.sessions.new_session(
                    0,
                    Session::new(rec.channel, self.netconf.subnet, 0, 0, NetState::INIT, rx_timeout),
                );
            }
            Ok(None) => {}
            Err(_) => self.sys_panic(KernelError::<D::Error>::IsfRead.code()),
        }

        0
    }

    fn run_beacon(&mut self) -> u16 {
        let mut prestart_dummy = NoOpHooksPrestartProxy(&mut self.hooks);
        let fired = idle::fire_beacon(&mut self.idle_events.beacon, &self.isf, &mut prestart_dummy);

        match fired {
            Ok(Some(rec)) => {
                let guest = self.auth.guest_context();
                let mut buf = [0u8; 32];
                let _ = self.network.build_beacon_payload(rec.channel, rec.params, guest, &mut buf);
            }
            Ok(None) => {}
            Err(_) => self.sys_panic(KernelError::<D::Error>::IsfRead.code()),
        }

        0
    }

    /// Fatal-error path for ISF corruption or invalid configuration:
    /// flushes the session stack, forces idle, and invokes the panic hook.
    /// Must not allocate or touch the radio.
    pub fn sys_panic(&mut self, code: u16) {
        self.sessions.clear();
        self.idle_events = IdleEvents::default();
        self.idle_state = IdleState::Off;
        self.hooks.on_panic(code);
    }

    fn run_external(&mut self) -> u16 {
        self.hooks.load();
        self.external_pending = false;
        0
    }

    /// Idle task.
    fn run_idle(&mut self) -> u16 {
        if let Some(top) = self.sessions.top() {
            if top.netstate.contains(NetState::CONNECTED) {
                return top.counter.max(0) as u16;
            }
        }

        if self.hooks.load() {
            return 0;
        }

        self.idle_events.next_eta()
    }
}

/// Adapts the bundled `HookSet` to the standalone `PrestartHook` trait
/// `idle::fire_scan`/`fire_beacon` expect, without requiring a second
/// mutable borrow of `self.hooks`.
struct NoOpHooksPrestartProxy<'a, H: HookSet>(&'a mut H);
impl<'a, H: HookSet> PrestartHook for NoOpHooksPrestartProxy<'a, H> {
    fn prestart(&mut self, event_no: u8) -> bool {
        self.0.prestart(event_no)
    }
}
