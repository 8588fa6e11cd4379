//! Radio I/O state machine and radio driver contract.
//!
//! The radio hardware abstraction itself is an external collaborator;
//! `RadioDriver` is the Rust shape of its `rm2_*` contract. Everything else
//! here (the RFA event, the system mutex, and the
//! bscan/fscan/initftx/initbtx/txcsma/ftx/btx transition functions) is
//! owned by this module.

use bitflags::bitflags;
use rand_core::RngCore;

use crate::csma::{CsmaCa, CsmaCaParams, SlotResult};
use crate::session::NetState;

/// CSMA return codes.
pub const RM2_CSMA_SUCCESS: i32 = -1;
pub const RM2_ERR_BADCHANNEL: i32 = -2;
pub const RM2_ERR_CCAFAIL: i32 = -3;

/// Radio driver contract. An external collaborator: initiate
/// TX/RX, kill, packet-duration calculator, random. Implementations sit on
/// top of the actual radio hardware; the kernel never blocks on them.
pub trait RadioDriver {
    type Error;

    fn rxinit_bf(&mut self, channel: u8) -> Result<(), Self::Error>;
    fn rxinit_ff(&mut self, channel: u8, est_frames: u8) -> Result<(), Self::Error>;
    fn rxtimeout_isr(&mut self);
    fn reenter_rx(&mut self, mode: u8) -> Result<(), Self::Error>;

    fn txinit_bf(&mut self) -> Result<(), Self::Error>;
    fn txinit_ff(&mut self, est_frames: u8) -> Result<(), Self::Error>;
    /// Attempt one CSMA step; returns a CSMA return code.
    fn txcsma(&mut self) -> i32;
    fn prep_resend(&mut self) -> Result<(), Self::Error>;
    fn txstop_flood(&mut self) -> Result<(), Self::Error>;

    fn pkt_duration(&self, bytes: usize) -> u32;
    fn default_tgd(&self, channel: u8) -> u32;

    fn kill(&mut self);
}

/// RFA (radio-activity) event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfaEvent {
    Idle = 0,
    Bscan = 1,
    Fscan = 2,
    Btx = 3,
    Ftx = 4,
    BtxInFlight = 5,
    FtxInFlight = 6,
}

/// Radio-activity (RFA) event state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfaState {
    pub event: RfaEvent,
    pub nextevent: i32,
}

impl RfaState {
    pub fn idle() -> Self {
        Self { event: RfaEvent::Idle, nextevent: 0 }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.event, RfaEvent::Idle)
    }
}

impl Default for RfaState {
    fn default() -> Self {
        Self::idle()
    }
}

bitflags! {
    /// System mutex: a non-blocking busy indicator, not a lock.
    #[derive(Default)]
    pub struct SysMutex: u8 {
        const RADIO_LISTEN = 1 << 0;
        const RADIO_DATA   = 1 << 1;
        const PROCESSING   = 1 << 2;
    }
}

/// Outcome of a background-scan completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BscanOutcome {
    /// `scode == -1` (CRC/init retry) and redundants remain: re-arm RX.
    Retry,
    /// Radio slept, session popped, frame handed to the processing task.
    Accept { fcode: i32 },
    /// Radio slept, session popped, frame dropped (filter or CRC failure).
    Drop,
}

/// Outcome of a foreground-receive callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrxOutcome {
    /// `pcode < 0`: listen window expired with nothing received.
    Timeout,
    /// Frame accepted; `packet_complete` when `pcode == 0`.
    FrameGood { packet_complete: bool },
    /// Bad CRC always yields `frx_code == -1`, regardless of
    /// datastream-ness. See DESIGN.md.
    FrameBadCrc { packet_complete: bool },
    /// CRC good but the MAC filter rejected the frame: `frx_code == -4`.
    FilterRejected { packet_complete: bool },
}

impl FrxOutcome {
    pub fn frx_code(&self) -> i32 {
        match self {
            FrxOutcome::Timeout | FrxOutcome::FrameGood { .. } => 0,
            FrxOutcome::FrameBadCrc { .. } => -1,
            FrxOutcome::FilterRejected { .. } => -4,
        }
    }

    /// True when the listen should re-enter RX without returning to the
    /// kernel (bad frame or filter-rejected, packet complete).
    pub fn should_reenter_rx(&self) -> bool {
        matches!(
            self,
            FrxOutcome::FrameBadCrc { packet_complete: true } | FrxOutcome::FilterRejected { packet_complete: true }
        )
    }
}

/// Outcome of an `rfevt_ftx` completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtxCompletion {
    /// Redundants remain and either `rx_timeout == 0` or this was a
    /// response: prepare an immediate resend with CSMA off.
    ResendNow,
    /// End of dialog: RESPRX netstate bits set (SCRAP on error).
    EndSession,
}

/// Outcome of an `rfevt_btx` completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtxCompletion {
    ToForegroundRequest,
    ContinueFlood,
    Terminate,
}

/// Outcome of a TX CSMA step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCsmaOutcome {
    Failed,
    CcaRetry { offset: i32 },
    Success,
}

/// The radio I/O state machine: the RFA event and system mutex, plus the
/// bscan/fscan/TX transition functions. Generic over the radio driver so
/// it can be driven against a mock in tests.
pub struct RadioIo<D> {
    pub driver: D,
    pub rfa: RfaState,
    pub mutex: SysMutex,
}

impl<D: RadioDriver> RadioIo<D> {
    pub fn new(driver: D) -> Self {
        Self { driver, rfa: RfaState::idle(), mutex: SysMutex::empty() }
    }

    /// Arm the radio for background-frame RX.
    pub fn init_bscan(&mut self, channel: u8, rx_timeout: i32) -> Result<(), D::Error> {
        self.driver.rxinit_bf(channel)?;
        self.rfa = RfaState { event: RfaEvent::Bscan, nextevent: rx_timeout };
        self.mutex.insert(SysMutex::RADIO_LISTEN);
        Ok(())
    }

    /// Handle the bscan completion callback.
    pub fn on_bscan_complete(&mut self, scode: i32, redundants: &mut u8) -> BscanOutcome {
        if scode == -1 && *redundants > 0 {
            *redundants -= 1;
            return BscanOutcome::Retry;
        }

        self.mutex = SysMutex::empty();
        self.rfa = RfaState::idle();

        if scode >= 0 {
            BscanOutcome::Accept { fcode: scode }
        } else {
            BscanOutcome::Drop
        }
    }

    /// Arm the radio for foreground RX on the top session's channel.
    pub fn init_fscan(&mut self, channel: u8, est_frames: u8, rx_timeout: i32) -> Result<(), D::Error> {
        self.driver.rxinit_ff(channel, est_frames)?;
        self.rfa = RfaState { event: RfaEvent::Fscan, nextevent: rx_timeout };
        self.mutex.insert(SysMutex::RADIO_LISTEN);
        Ok(())
    }

    /// Handle the `rfevt_frx` callback.
    pub fn on_frx(
        &mut self,
        pcode: i32,
        fcode: i32,
        subnet_ok: bool,
        redundants: &mut u8,
        a2p: bool,
        netstate: &mut NetState,
    ) -> FrxOutcome {
        if pcode < 0 {
            self.rfa = RfaState::idle();

            if *redundants > 0 {
                *netstate = NetState::REQTX | NetState::INIT | NetState::FIRSTRX;
            } else if a2p {
                netstate.toggle_a2p_roles();
            } else {
                netstate.insert(NetState::SCRAP);
            }

            return FrxOutcome::Timeout;
        }

        let packet_complete = pcode == 0;
        let crc_bad = fcode != 0;

        let outcome = if crc_bad {
            FrxOutcome::FrameBadCrc { packet_complete }
        } else if !subnet_ok {
            FrxOutcome::FilterRejected { packet_complete }
        } else {
            FrxOutcome::FrameGood { packet_complete }
        };

        if packet_complete {
            match outcome {
                FrxOutcome::FrameGood { .. } => {
                    self.mutex.insert(SysMutex::PROCESSING);
                    self.rfa = RfaState::idle();
                }
                FrxOutcome::FrameBadCrc { .. } | FrxOutcome::FilterRejected { .. } => {
                    // Re-enter RX without returning to the kernel;
                    // RFA.event_no is left unchanged.
                }
                FrxOutcome::Timeout => unreachable!(),
            }
        }

        outcome
    }

    /// Arm the radio for foreground TX.
    pub fn init_ftx(
        &mut self,
        csma: &CsmaCaParams,
        tc: &mut i32,
        tca: &mut i32,
        tx_frame0_ticks: i32,
        rng: &mut impl RngCore,
    ) -> Result<(), D::Error> {
        self.driver.txinit_ff(1)?;
        let offset = CsmaCa::init(csma, tc, tca, tx_frame0_ticks, rng);
        *tca = *tc;
        self.rfa = RfaState { event: RfaEvent::Ftx, nextevent: offset };
        self.mutex.insert(SysMutex::RADIO_LISTEN);
        Ok(())
    }

    /// Arm the radio for background-flood TX.
    pub fn init_btx(&mut self, tc: i32, tca: &mut i32) -> Result<(), D::Error> {
        self.driver.txinit_bf()?;
        *tca = tc;
        self.rfa = RfaState { event: RfaEvent::Btx, nextevent: 0 };
        Ok(())
    }

    /// Drive one CSMA step.
    #[allow(clippy::too_many_arguments)]
    pub fn tx_csma_step(
        &mut self,
        params: &CsmaCaParams,
        tc: &mut i32,
        tca: &mut i32,
        tx_frame0_ticks: i32,
        guard_ticks: i32,
        tx_length_ticks: i32,
        rng: &mut impl RngCore,
    ) -> TxCsmaOutcome {
        if *tca < 0 {
            return TxCsmaOutcome::Failed;
        }

        let code = self.driver.txcsma();

        if code == RM2_CSMA_SUCCESS {
            self.mutex.insert(SysMutex::RADIO_DATA);
            self.rfa.event = match self.rfa.event {
                RfaEvent::Btx => RfaEvent::BtxInFlight,
                RfaEvent::Ftx => RfaEvent::FtxInFlight,
                other => other,
            };
            self.rfa.nextevent = tx_length_ticks;
            TxCsmaOutcome::Success
        } else {
            match CsmaCa::next_slot(params, tc, tca, tx_frame0_ticks, guard_ticks, rng) {
                SlotResult::Offset(offset) => {
                    self.rfa.nextevent = offset;
                    TxCsmaOutcome::CcaRetry { offset }
                }
                SlotResult::Exhausted => {
                    *tca = -1;
                    TxCsmaOutcome::Failed
                }
            }
        }
    }

    /// Handle the `rfevt_ftx` completion callback.
    pub fn on_ftx_complete(
        &mut self,
        rx_timeout: i32,
        is_response: bool,
        redundants: &mut u8,
        error: bool,
        netstate: &mut NetState,
    ) -> FtxCompletion {
        *redundants = redundants.saturating_sub(1);

        if (rx_timeout == 0 || is_response) && *redundants > 0 {
            FtxCompletion::ResendNow
        } else {
            netstate.insert(NetState::RESPRX);
            if error {
                netstate.insert(NetState::SCRAP);
            }
            FtxCompletion::EndSession
        }
    }

    /// Handle the `rfevt_btx` completion callback.
    pub fn on_btx_complete(
        &mut self,
        flcode: i32,
        tc: &mut i32,
        redundants: &mut u8,
        csma: &mut CsmaCaParams,
    ) -> BtxCompletion {
        match flcode {
            0 => {
                *tc = 2;
                csma.macca = false;
                *redundants = 1;
                BtxCompletion::ToForegroundRequest
            }
            2 => BtxCompletion::ContinueFlood,
            _ => BtxCompletion::Terminate,
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use heapless::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockRadioError;

    /// Expectation-queue mock, hand-rolled since the `rm2_*` contract has
    /// no existing crate-provided mock.
    #[derive(Default)]
    pub struct MockRadioDriver {
        pub calls: Vec<&'static str, 32>,
        pub next_csma_code: i32,
        pub next_pkt_duration: u32,
    }

    impl RadioDriver for MockRadioDriver {
        type Error = MockRadioError;

        fn rxinit_bf(&mut self, _channel: u8) -> Result<(), Self::Error> {
            self.calls.push("rxinit_bf").ok();
            Ok(())
        }

        fn rxinit_ff(&mut self, _channel: u8, _est_frames: u8) -> Result<(), Self::Error> {
            self.calls.push("rxinit_ff").ok();
            Ok(())
        }

        fn rxtimeout_isr(&mut self) {
            self.calls.push("rxtimeout_isr").ok();
        }

        fn reenter_rx(&mut self, _mode: u8) -> Result<(), Self::Error> {
            self.calls.push("reenter_rx").ok();
            Ok(())
        }

        fn txinit_bf(&mut self) -> Result<(), Self::Error> {
            self.calls.push("txinit_bf").ok();
            Ok(())
        }

        fn txinit_ff(&mut self, _est_frames: u8) -> Result<(), Self::Error> {
            self.calls.push("txinit_ff").ok();
            Ok(())
        }

        fn txcsma(&mut self) -> i32 {
            self.next_csma_code
        }

        fn prep_resend(&mut self) -> Result<(), Self::Error> {
            self.calls.push("prep_resend").ok();
            Ok(())
        }

        fn txstop_flood(&mut self) -> Result<(), Self::Error> {
            self.calls.push("txstop_flood").ok();
            Ok(())
        }

        fn pkt_duration(&self, _bytes: usize) -> u32 {
            self.next_pkt_duration
        }

        fn default_tgd(&self, _channel: u8) -> u32 {
            5
        }

        fn kill(&mut self) {
            self.calls.push("kill").ok();
        }
    }
}

#[cfg(test)]
mod test {
    use super::mock::*;
    use super::*;

    #[test]
    fn bscan_retry_on_scode_minus_one_with_redundants() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_bscan(3, 100).unwrap();
        let mut redundants = 2u8;

        let outcome = io.on_bscan_complete(-1, &mut redundants);
        assert_eq!(outcome, BscanOutcome::Retry);
        assert_eq!(redundants, 1);
    }

    #[test]
    fn bscan_accept_clears_mutex_and_rfa() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_bscan(3, 100).unwrap();
        let mut redundants = 0u8;

        let outcome = io.on_bscan_complete(1, &mut redundants);
        assert_eq!(outcome, BscanOutcome::Accept { fcode: 1 });
        assert!(io.rfa.is_idle());
        assert!(io.mutex.is_empty());
    }

    #[test]
    fn fscan_timeout_with_redundants_sets_reqtx_init_firstrx() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_fscan(3, 1, 50).unwrap();

        let mut redundants = 2u8;
        let mut netstate = NetState::empty();

        let outcome = io.on_frx(-1, 0, true, &mut redundants, false, &mut netstate);

        assert_eq!(outcome, FrxOutcome::Timeout);
        assert!(io.rfa.is_idle());
        assert!(netstate.contains(NetState::REQTX | NetState::INIT | NetState::FIRSTRX));
        // Redundants are decremented on TX completion, not RX timeout.
        assert_eq!(redundants, 2);
    }

    #[test]
    fn fscan_timeout_no_redundants_a2p_toggles_roles() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_fscan(3, 1, 50).unwrap();

        let mut redundants = 0u8;
        let mut netstate = NetState::REQTX;

        io.on_frx(-1, 0, true, &mut redundants, true, &mut netstate);
        assert!(netstate.contains(NetState::RESPRX));
        assert!(!netstate.contains(NetState::REQTX));
    }

    #[test]
    fn fscan_timeout_no_redundants_no_a2p_scraps() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_fscan(3, 1, 50).unwrap();

        let mut redundants = 0u8;
        let mut netstate = NetState::empty();

        io.on_frx(-1, 0, true, &mut redundants, false, &mut netstate);
        assert!(netstate.contains(NetState::SCRAP));
    }

    #[test]
    fn fscan_bad_crc_single_frame_reenters_rx() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_fscan(3, 1, 50).unwrap();
        let rfa_before = io.rfa;

        let mut redundants = 1u8;
        let mut netstate = NetState::empty();

        let outcome = io.on_frx(0, 1, true, &mut redundants, false, &mut netstate);

        assert_eq!(outcome.frx_code(), -1);
        assert!(!io.mutex.contains(SysMutex::PROCESSING));
        assert!(outcome.should_reenter_rx());
        assert_eq!(io.rfa, rfa_before);
    }

    #[test]
    fn fscan_subnet_rejected_sets_frx_code_minus_4() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_fscan(3, 1, 50).unwrap();

        let mut redundants = 1u8;
        let mut netstate = NetState::empty();

        let outcome = io.on_frx(0, 0, false, &mut redundants, false, &mut netstate);
        assert_eq!(outcome.frx_code(), -4);
        assert!(!io.mutex.contains(SysMutex::PROCESSING));
    }

    #[test]
    fn fscan_good_frame_sets_processing() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        io.init_fscan(3, 1, 50).unwrap();

        let mut redundants = 1u8;
        let mut netstate = NetState::empty();

        let outcome = io.on_frx(0, 0, true, &mut redundants, false, &mut netstate);
        assert_eq!(outcome, FrxOutcome::FrameGood { packet_complete: true });
        assert!(io.mutex.contains(SysMutex::PROCESSING));
        assert!(io.rfa.is_idle());
    }

    #[test]
    fn txcsma_fails_when_tca_negative() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        let mut tc = 100;
        let mut tca = -1;
        let params = CsmaCaParams::default();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);

        let outcome = io.tx_csma_step(&params, &mut tc, &mut tca, 10, 5, 50, &mut rng);
        assert_eq!(outcome, TxCsmaOutcome::Failed);
    }

    #[test]
    fn txcsma_success_transitions_to_in_flight() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut io = RadioIo::new(MockRadioDriver::default());
        io.rfa.event = RfaEvent::Ftx;
        io.driver.next_csma_code = RM2_CSMA_SUCCESS;

        let mut tc = 100;
        let mut tca = 100;
        let params = CsmaCaParams::default();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);

        let outcome = io.tx_csma_step(&params, &mut tc, &mut tca, 10, 5, 50, &mut rng);
        assert_eq!(outcome, TxCsmaOutcome::Success);
        assert_eq!(io.rfa.event, RfaEvent::FtxInFlight);
        assert_eq!(io.rfa.nextevent, 50);
        assert!(io.mutex.contains(SysMutex::RADIO_DATA));
    }

    #[test]
    fn btx_complete_flcode_zero_arms_foreground_request() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        let mut tc = 1000;
        let mut redundants = 0u8;
        let mut csma = CsmaCaParams { macca: true, ..Default::default() };

        let outcome = io.on_btx_complete(0, &mut tc, &mut redundants, &mut csma);
        assert_eq!(outcome, BtxCompletion::ToForegroundRequest);
        assert_eq!(tc, 2);
        assert_eq!(redundants, 1);
        assert!(!csma.macca);
    }

    #[test]
    fn ftx_complete_ends_session_and_sets_resprx() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        let mut redundants = 1u8;
        let mut netstate = NetState::empty();

        let outcome = io.on_ftx_complete(10, false, &mut redundants, false, &mut netstate);
        assert_eq!(outcome, FtxCompletion::EndSession);
        assert!(netstate.contains(NetState::RESPRX));
        assert_eq!(redundants, 0);
    }

    #[test]
    fn ftx_complete_resends_when_response_and_redundants_remain() {
        let mut io = RadioIo::new(MockRadioDriver::default());
        let mut redundants = 2u8;
        let mut netstate = NetState::empty();

        let outcome = io.on_ftx_complete(10, true, &mut redundants, false, &mut netstate);
        assert_eq!(outcome, FtxCompletion::ResendNow);
        assert_eq!(redundants, 1);
    }
}
