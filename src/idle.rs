//! Idle-time scan sequencer: HSS (hold-scan), SSS (sleep-scan) and BTS
//! (beacon-transmit) event sequencing against an arbitrary-length
//! ISF-backed record sequence.
//!
//! `cursor` here indexes ISF *records*, not raw bytes. `IsfStore::scan_record`
//! / `beacon_record` take a record index, so a fixed-size byte cursor
//! advancing by one record length is equivalent to the cursor advancing by
//! one record. See DESIGN.md.

use crate::config::PrestartHook;
use crate::isf::{BeaconRecord, IsfStore, ScanRecord, ScanSeq};
use crate::session::IdleState;

/// One of the three idle-time events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEvent {
    /// `0` disables the event.
    pub event_no: u8,
    /// Index into the associated ISF sequence.
    pub cursor: u16,
    /// Signed tick countdown to the next firing.
    pub nextevent: i32,
    /// Nonzero binds this event to an RTC alarm.
    pub sched_id: u8,
    /// Set after a prestart hook vetoes a firing, so the dispatcher can
    /// retry rather than silently drop the event.
    pub prestart: bool,
}

impl Default for IdleEvent {
    fn default() -> Self {
        Self { event_no: 0, cursor: 0, nextevent: 0, sched_id: 0, prestart: true }
    }
}

impl IdleEvent {
    pub fn is_active(&self) -> bool {
        self.event_no != 0
    }
}

/// The three idle-time events as a group.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleEvents {
    pub hold: IdleEvent,
    pub sleep: IdleEvent,
    pub beacon: IdleEvent,
}

impl IdleEvents {
    /// Smallest `nextevent` among active events, clamped to `[0, 65535]`.
    pub fn next_eta(&self) -> u16 {
        let mut eta = i32::MAX;
        for ev in [&self.hold, &self.sleep, &self.beacon] {
            if ev.is_active() {
                eta = eta.min(ev.nextevent.max(0));
            }
        }
        if eta == i32::MAX {
            65535
        } else {
            eta.min(65535) as u16
        }
    }
}

/// Cold-start idle-event configuration: endpoints boot
/// directly into sleep; every other class boots into hold.
pub fn cold_start(is_endpoint: bool) -> (IdleState, IdleEvents) {
    let mut events = IdleEvents::default();

    if is_endpoint {
        events.sleep.event_no = 1;
        events.sleep.cursor = 0;
        (IdleState::Sleep, events)
    } else {
        events.hold.event_no = 1;
        events.hold.cursor = 0;
        (IdleState::Hold, events)
    }
}

/// Hold-cycle tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldCycle {
    pub count: u16,
    pub limit: u16,
}

/// Fire one HSS/SSS entry: read the record at `cursor`, advance (wrapping
/// at end-of-file), and update `nextevent`. Returns `None` if a
/// prestart hook vetoes the firing or the sequence is empty.
pub fn fire_scan<I: IsfStore>(
    event: &mut IdleEvent,
    isf: &I,
    seq: ScanSeq,
    prestart: &mut impl PrestartHook,
) -> Result<Option<ScanRecord>, I::Error> {
    if !prestart.prestart(event.event_no) {
        return Ok(None);
    }

    let len = isf.scan_len(seq)?;
    if len == 0 {
        return Ok(None);
    }

    let rec = isf.scan_record(seq, event.cursor as usize)?;
    event.cursor = ((event.cursor as usize + 1) % len) as u16;
    event.nextevent = rec.next_interval as i32;

    Ok(Some(rec))
}

/// Fire one BTS entry, mirroring `fire_scan`.
pub fn fire_beacon<I: IsfStore>(
    event: &mut IdleEvent,
    isf: &I,
    prestart: &mut impl PrestartHook,
) -> Result<Option<BeaconRecord>, I::Error> {
    if !prestart.prestart(event.event_no) {
        return Ok(None);
    }

    let len = isf.beacon_len()?;
    if len == 0 {
        return Ok(None);
    }

    let rec = isf.beacon_record(event.cursor as usize)?;
    event.cursor = ((event.cursor as usize + 1) % len) as u16;
    event.nextevent = rec.next_interval as i32;

    Ok(Some(rec))
}

/// After a hold-scan fire whose cursor wrapped to 0, advance the hold
/// cycle; transition hold→sleep when `hold_limit` is reached. Returns true on transition,
/// in which case the caller must immediately run one sleep-scan fire.
pub fn on_hold_wrap(
    tracker: &mut HoldCycle,
    hold: &mut IdleEvent,
    sleep: &mut IdleEvent,
    idle_state: &mut IdleState,
) -> bool {
    tracker.count += 1;

    if tracker.count >= tracker.limit {
        tracker.count = 0;
        *idle_state = IdleState::Sleep;
        hold.event_no = 0;
        sleep.event_no = 1;
        sleep.cursor = 0;
        sleep.nextevent = 0;
        true
    } else {
        false
    }
}

/// RTC alarm programming contract. An
/// external collaborator akin to the radio driver and timer.
pub trait RtcAlarm {
    fn program(&mut self, mask: u16, value: u16);
}

pub struct NoOpRtcAlarm;
impl RtcAlarm for NoOpRtcAlarm {
    fn program(&mut self, _mask: u16, _value: u16) {}
}

/// Bind an idle event to its RTC alarm slot and reset it to wait for the
/// asynchronous RTC firing.
pub fn bind_rtc<I: IsfStore>(
    event: &mut IdleEvent,
    isf: &I,
    rtc: &mut impl RtcAlarm,
) -> Result<(), I::Error> {
    if event.sched_id != 0 {
        let slot = isf.rtc_schedule_slot(event.sched_id)?;
        rtc.program(slot.mask, slot.value);
        event.cursor = 0;
        event.nextevent = 0;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::NoOpPrestartHook;
    use crate::isf::mock::MockIsfStore;

    #[test]
    fn cold_start_endpoint_goes_to_sleep() {
        let (idle_state, events) = cold_start(true);
        assert_eq!(idle_state, IdleState::Sleep);
        assert_eq!(events.sleep.event_no, 1);
        assert_eq!(events.sleep.cursor, 0);
        assert_eq!(events.hold.event_no, 0);
    }

    #[test]
    fn cold_start_non_endpoint_goes_to_hold() {
        let (idle_state, events) = cold_start(false);
        assert_eq!(idle_state, IdleState::Hold);
        assert_eq!(events.hold.event_no, 1);
        assert_eq!(events.sleep.event_no, 0);
    }

    fn isf_with_hold_records(n: usize) -> MockIsfStore {
        let mut isf = MockIsfStore::default();
        for i in 0..n {
            isf.hold_scan.push(ScanRecord { channel: i as u8, flags: 0, next_interval: 10 }).ok();
        }
        isf
    }

    #[test]
    fn scan_cursor_wraps_at_end_of_sequence() {
        let isf = isf_with_hold_records(3);
        let mut event = IdleEvent { event_no: 1, ..Default::default() };
        let mut prestart = NoOpPrestartHook;

        for expected_channel in [0u8, 1, 2] {
            let rec = fire_scan(&mut event, &isf, ScanSeq::Hold, &mut prestart).unwrap().unwrap();
            assert_eq!(rec.channel, expected_channel);
        }
        // Cursor wrapped back to 0 after the third (last) record.
        assert_eq!(event.cursor, 0);
    }

    #[test]
    fn hold_to_sleep_transition_after_hold_limit() {
        // hold_limit = 3: fire hold-scan 3 times with cursor wrapping on
        // the third.
        let isf = isf_with_hold_records(1);
        let mut hold = IdleEvent { event_no: 1, ..Default::default() };
        let mut sleep = IdleEvent::default();
        let mut tracker = HoldCycle { count: 0, limit: 3 };
        let mut idle_state = IdleState::Hold;
        let mut prestart = NoOpPrestartHook;

        let mut transitioned = false;
        for _ in 0..3 {
            fire_scan(&mut hold, &isf, ScanSeq::Hold, &mut prestart).unwrap();
            // Single-record sequence: cursor wraps to 0 on every fire.
            transitioned = on_hold_wrap(&mut tracker, &mut hold, &mut sleep, &mut idle_state);
        }

        assert!(transitioned);
        assert_eq!(idle_state, IdleState::Sleep);
        assert_eq!(sleep.event_no, 1);
        assert_eq!(hold.event_no, 0);

        // "one immediate sleep-scan executed" is the dispatcher's job once
        // transitioned == true; verify the sleep sequence is ready to fire.
        let sleep_isf = {
            let mut s = MockIsfStore::default();
            s.sleep_scan.push(ScanRecord { channel: 9, flags: 0, next_interval: 20 }).ok();
            s
        };
        let rec = fire_scan(&mut sleep, &sleep_isf, ScanSeq::Sleep, &mut prestart).unwrap().unwrap();
        assert_eq!(rec.channel, 9);
    }

    #[test]
    fn beacon_fire_scenario_boundary_7() {
        let mut isf = MockIsfStore::default();
        isf.beacon_scan
            .push(BeaconRecord { channel: 7, params: 0x05, call_hi: 1, call_lo: 2, next_interval: 200 })
            .ok();

        let mut event = IdleEvent { event_no: 1, ..Default::default() };
        let mut prestart = NoOpPrestartHook;

        let rec = fire_beacon(&mut event, &isf, &mut prestart).unwrap().unwrap();
        assert_eq!(rec.channel, 7);
        assert_eq!(rec.params, 0x05);
        assert_eq!(event.nextevent, 200);
        assert_eq!(event.cursor, 0); // wrapped: single-record sequence
    }

    #[test]
    fn prestart_veto_skips_firing() {
        struct AlwaysVeto;
        impl PrestartHook for AlwaysVeto {
            fn prestart(&mut self, _event_no: u8) -> bool {
                false
            }
        }

        let isf = isf_with_hold_records(1);
        let mut event = IdleEvent { event_no: 1, ..Default::default() };
        let mut veto = AlwaysVeto;

        let rec = fire_scan(&mut event, &isf, ScanSeq::Hold, &mut veto).unwrap();
        assert!(rec.is_none());
        assert_eq!(event.cursor, 0);
    }

    #[test]
    fn rtc_bind_resets_cursor_and_nextevent() {
        let mut isf = MockIsfStore::default();
        isf.rtc_slots.push(crate::isf::RtcScheduleSlot { mask: 0x00FF, value: 0x1234 }).ok();

        let mut event = IdleEvent { event_no: 1, cursor: 5, nextevent: 99, sched_id: 4, prestart: true };
        let mut rtc = NoOpRtcAlarm;

        bind_rtc(&mut event, &isf, &mut rtc).unwrap();
        assert_eq!(event.cursor, 0);
        assert_eq!(event.nextevent, 0);
    }

    #[test]
    fn next_eta_picks_smallest_active() {
        let mut events = IdleEvents::default();
        events.hold = IdleEvent { event_no: 1, nextevent: 50, ..Default::default() };
        events.sleep = IdleEvent { event_no: 0, nextevent: 5, ..Default::default() };
        events.beacon = IdleEvent { event_no: 1, nextevent: 20, ..Default::default() };

        assert_eq!(events.next_eta(), 20);
    }

    #[test]
    fn next_eta_defaults_to_max_when_nothing_active() {
        let events = IdleEvents::default();
        assert_eq!(events.next_eta(), 65535);
    }
}
