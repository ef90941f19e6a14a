//! Per-tag payload parsers for 26-byte event windows.
//!
//! Offsets are absolute positions inside the window. The window is a fixed
//! size array, so every read below is statically in bounds.

use super::record::{
    pump_time, BasalChangeType, BasalRateChange, BolusCompleted, BolusCompletionStatus, CgmSample,
    EventData, SensorFamily, TelemetryRecord,
};

/// Size of one wire record.
pub const RECORD_LEN: usize = 26;

pub type Window = [u8; RECORD_LEN];

/// Fields shared by every record kind (bytes 0..10).
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub tag: u16,
    pub source: u8,
    pub timestamp_offset: u32,
    pub sequence_number: u32,
}

impl RecordHeader {
    pub fn read(w: &Window) -> Self {
        let raw_id = read_u16(w, 0);
        Self {
            tag: raw_id & 0x0fff,
            source: (raw_id >> 12) as u8,
            timestamp_offset: read_u32(w, 2),
            sequence_number: read_u32(w, 6),
        }
    }

    fn record(&self, timestamp_offset: u32, event: EventData) -> Option<TelemetryRecord> {
        Some(TelemetryRecord {
            record_id: self.tag,
            source: self.source,
            sequence_number: self.sequence_number,
            timestamp: pump_time(timestamp_offset)?,
            event,
        })
    }
}

pub type ParseFn = fn(&RecordHeader, &Window) -> Option<TelemetryRecord>;

/// Tag -> parser lookup. Tags absent here are skipped by the decoder.
pub const PARSERS: &[(u16, ParseFn)] = &[
    (3, parse_basal_rate_change),
    (20, parse_bolus_completed),
    (256, parse_cgm_sample),
    (372, parse_cgm_sample),
    (399, parse_cgm_sample),
];

pub fn parser_for(tag: u16) -> Option<ParseFn> {
    PARSERS
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, parse)| *parse)
}

fn parse_basal_rate_change(header: &RecordHeader, w: &Window) -> Option<TelemetryRecord> {
    let event = EventData::BasalRateChange(BasalRateChange {
        commanded_rate: read_f32(w, 10),
        base_rate: read_f32(w, 14),
        max_rate: read_f32(w, 18),
        change_type: BasalChangeType::from_raw(w[23]),
        profile_id: read_u16(w, 24),
    });
    header.record(header.timestamp_offset, event)
}

fn parse_bolus_completed(header: &RecordHeader, w: &Window) -> Option<TelemetryRecord> {
    let event = EventData::BolusCompleted(BolusCompleted {
        bolus_id: read_u16(w, 10),
        completion_status: BolusCompletionStatus::from_raw(read_u16(w, 12)),
        insulin_on_board: read_f32(w, 14),
        insulin_delivered: read_f32(w, 18),
        insulin_requested: read_f32(w, 22),
    });
    header.record(header.timestamp_offset, event)
}

fn parse_cgm_sample(header: &RecordHeader, w: &Window) -> Option<TelemetryRecord> {
    let family = SensorFamily::from_tag(header.tag)?;
    let egv_offset = read_u32(w, 18);
    let event = EventData::CgmSample(CgmSample {
        family,
        pump_timestamp: pump_time(header.timestamp_offset)?,
        rate_of_change: w[10] as i8,
        sub_type: w[11],
        glucose_status: read_u16(w, 12),
        glucose_value: read_u16(w, 14),
        signal_strength: w[16] as i8,
        algorithm_state: w[17],
        interval: w[23],
        info: read_u16(w, 24),
    });
    header.record(egv_offset, event)
}

#[inline]
fn read_u16(w: &Window, offset: usize) -> u16 {
    u16::from_be_bytes([w[offset], w[offset + 1]])
}

#[inline]
fn read_u32(w: &Window, offset: usize) -> u32 {
    u32::from_be_bytes([w[offset], w[offset + 1], w[offset + 2], w[offset + 3]])
}

#[inline]
fn read_f32(w: &Window, offset: usize) -> f32 {
    f32::from_bits(read_u32(w, offset))
}
