//! Indexed Subordinate File (ISF) store contract.
//!
//! The file store itself is an external collaborator, referenced by
//! contract only. This module defines the read-only trait the kernel needs
//! and the record layouts, plus explicit endian-aware decode helpers.

use byteorder::{BigEndian, ByteOrder};

/// ISF 0: network settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkSettings {
    pub subnet: u8,
    pub b_subnet: u8,
    /// Active settings / device class bitmap.
    pub active: u16,
    pub dd_flags: u8,
    pub b_attempts: u8,
    /// Hold cycles before descending to sleep.
    pub hold_limit: u16,
}

impl NetworkSettings {
    /// Decode ISF 0 from its raw byte layout:
    /// `0..1 {subnet, b_subnet}; 4 {active, u16}; 6..7 {dd_flags, b_attempts};
    /// 8 {hold_limit, u16, BE}`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 10 {
            return None;
        }

        Some(Self {
            subnet: buf[0],
            b_subnet: buf[1],
            active: BigEndian::read_u16(&buf[4..6]),
            dd_flags: buf[6],
            b_attempts: buf[7],
            hold_limit: BigEndian::read_u16(&buf[8..10]),
        })
    }
}

/// Which idle-time scan sequence a record belongs to; HSS and SSS share a
/// record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSeq {
    Hold,
    Sleep,
}

/// A single HSS/SSS scan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRecord {
    pub channel: u8,
    pub flags: u8,
    pub next_interval: u16,
}

pub const SCAN_RECORD_LEN: usize = 4;

impl ScanRecord {
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SCAN_RECORD_LEN {
            return None;
        }
        Some(Self {
            channel: buf[0],
            flags: buf[1],
            next_interval: BigEndian::read_u16(&buf[2..4]),
        })
    }

    pub fn is_background(&self) -> bool {
        self.flags & 0x80 != 0
    }

    /// Expand the exp-mantissa timeout code (bits 5:0) into ticks, applying
    /// the x1024 multiplier (bit 6) when set.
    pub fn rx_timeout_ticks(&self) -> u32 {
        decode_exp_mantissa(self.flags)
    }
}

/// A single BTS beacon entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconRecord {
    pub channel: u8,
    pub params: u8,
    pub call_hi: u16,
    pub call_lo: u16,
    pub next_interval: u16,
}

pub const BEACON_RECORD_LEN: usize = 8;

impl BeaconRecord {
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < BEACON_RECORD_LEN {
            return None;
        }
        Some(Self {
            channel: buf[0],
            params: buf[1],
            call_hi: BigEndian::read_u16(&buf[2..4]),
            call_lo: BigEndian::read_u16(&buf[4..6]),
            next_interval: BigEndian::read_u16(&buf[6..8]),
        })
    }
}

/// Expand an exp-mantissa timeout code: bit 7 is the scan-type flag (not
/// consumed here), bit 6 is a x1024 multiplier, bits 5:0 split into a 3-bit
/// exponent (bits 5:3) and 3-bit mantissa (bits 2:0):
/// `ticks = (mantissa + 1) << exponent`, times 1024 if bit 6 is set.
pub fn decode_exp_mantissa(code: u8) -> u32 {
    let exponent = (code >> 3) & 0x7;
    let mantissa = code & 0x7;
    let base = ((mantissa as u32) + 1) << exponent;

    if code & 0x40 != 0 {
        base * 1024
    } else {
        base
    }
}

/// RTC schedule slot: `{mask: u16 BE, value: u16 BE}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcScheduleSlot {
    pub mask: u16,
    pub value: u16,
}

pub const RTC_SLOT_LEN: usize = 4;

impl RtcScheduleSlot {
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTC_SLOT_LEN {
            return None;
        }
        Some(Self {
            mask: BigEndian::read_u16(&buf[0..2]),
            value: BigEndian::read_u16(&buf[2..4]),
        })
    }

    /// Byte offset of a schedule slot for a given `sched_id`.
    pub fn offset_for(sched_id: u8) -> usize {
        (sched_id.saturating_sub(4) as usize) * RTC_SLOT_LEN
    }
}

/// Read-only file-store contract. An external collaborator;
/// implementations back this with flash/EEPROM storage.
pub trait IsfStore {
    type Error;

    fn network_settings(&self) -> Result<NetworkSettings, Self::Error>;
    fn supported_settings(&self) -> Result<u16, Self::Error>;

    /// Number of records in the given scan sequence.
    fn scan_len(&self, seq: ScanSeq) -> Result<usize, Self::Error>;
    fn scan_record(&self, seq: ScanSeq, index: usize) -> Result<ScanRecord, Self::Error>;

    fn beacon_len(&self) -> Result<usize, Self::Error>;
    fn beacon_record(&self, index: usize) -> Result<BeaconRecord, Self::Error>;

    fn rtc_schedule_slot(&self, sched_id: u8) -> Result<RtcScheduleSlot, Self::Error>;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use heapless::Vec;

    #[derive(Default)]
    pub struct MockIsfStore {
        pub network_settings: NetworkSettings,
        pub supported_settings: u16,
        pub hold_scan: Vec<ScanRecord, 16>,
        pub sleep_scan: Vec<ScanRecord, 16>,
        pub beacon_scan: Vec<BeaconRecord, 16>,
        pub rtc_slots: Vec<RtcScheduleSlot, 16>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockIsfError;

    impl IsfStore for MockIsfStore {
        type Error = MockIsfError;

        fn network_settings(&self) -> Result<NetworkSettings, Self::Error> {
            Ok(self.network_settings)
        }

        fn supported_settings(&self) -> Result<u16, Self::Error> {
            Ok(self.supported_settings)
        }

        fn scan_len(&self, seq: ScanSeq) -> Result<usize, Self::Error> {
            Ok(match seq {
                ScanSeq::Hold => self.hold_scan.len(),
                ScanSeq::Sleep => self.sleep_scan.len(),
            })
        }

        fn scan_record(&self, seq: ScanSeq, index: usize) -> Result<ScanRecord, Self::Error> {
            let list = match seq {
                ScanSeq::Hold => &self.hold_scan,
                ScanSeq::Sleep => &self.sleep_scan,
            };
            list.get(index).copied().ok_or(MockIsfError)
        }

        fn beacon_len(&self) -> Result<usize, Self::Error> {
            Ok(self.beacon_scan.len())
        }

        fn beacon_record(&self, index: usize) -> Result<BeaconRecord, Self::Error> {
            self.beacon_scan.get(index).copied().ok_or(MockIsfError)
        }

        fn rtc_schedule_slot(&self, sched_id: u8) -> Result<RtcScheduleSlot, Self::Error> {
            let idx = RtcScheduleSlot::offset_for(sched_id) / RTC_SLOT_LEN;
            self.rtc_slots.get(idx).copied().ok_or(MockIsfError)
        }
    }
}
