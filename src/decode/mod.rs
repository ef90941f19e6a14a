//! Decoder for the pump's fixed-length binary event stream.
//!
//! Payloads arrive as base64 text, optionally zlib-compressed, and decode to
//! a concatenation of 26-byte records. Decoding is total: unknown tags,
//! truncated tails and undecodable input shrink the output, they never fail.

mod parse;
pub mod record;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use std::io::Read;
use tracing::{debug, warn};

pub use parse::{RecordHeader, RECORD_LEN};
pub use record::{
    BasalChangeType, BasalRateChange, BolusCompleted, BolusCompletionStatus, CgmSample, EventData,
    RecordKey, SensorFamily, TelemetryRecord, PUMP_EPOCH_UNIX,
};

const MAX_INFLATED_SIZE: usize = 10 * 1024 * 1024;

/// Standard alphabet, padding optional.
const PAYLOAD_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Outcome of decoding a single window.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Known(TelemetryRecord),
    /// Tag not in the dispatch table.
    Unknown { tag: u16 },
    /// Known tag whose timestamp could not be represented.
    Malformed { tag: u16 },
}

/// Per-call decode counters, logged at debug level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub windows: usize,
    pub decoded: usize,
    pub unknown: usize,
    pub malformed: usize,
    pub trailing_bytes: usize,
}

/// Decode a base64 (optionally deflated) telemetry payload.
pub fn decode(payload: &[u8]) -> Vec<TelemetryRecord> {
    let text = payload_text(payload);
    let raw = match PAYLOAD_BASE64.decode(&text) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, payload_len = payload.len(), "telemetry payload is not base64");
            return Vec::new();
        }
    };
    let inflated = inflate_if_compressed(Bytes::from(raw));
    decode_raw(&inflated)
}

/// Decode an already-inflated buffer of concatenated records.
pub fn decode_raw(buf: &[u8]) -> Vec<TelemetryRecord> {
    let (records, stats) = decode_raw_with_stats(buf);
    debug!(
        windows = stats.windows,
        decoded = stats.decoded,
        unknown = stats.unknown,
        malformed = stats.malformed,
        trailing_bytes = stats.trailing_bytes,
        "decoded event stream"
    );
    records
}

pub fn decode_raw_with_stats(buf: &[u8]) -> (Vec<TelemetryRecord>, DecodeStats) {
    let chunks = buf.chunks_exact(RECORD_LEN);
    let mut stats = DecodeStats {
        trailing_bytes: chunks.remainder().len(),
        ..DecodeStats::default()
    };
    let mut records = Vec::with_capacity(buf.len() / RECORD_LEN);

    for chunk in chunks {
        stats.windows += 1;
        let Ok(window) = <&[u8; RECORD_LEN]>::try_from(chunk) else {
            continue;
        };
        match decode_window(window) {
            Decoded::Known(record) => {
                stats.decoded += 1;
                records.push(record);
            }
            Decoded::Unknown { .. } => stats.unknown += 1,
            Decoded::Malformed { .. } => stats.malformed += 1,
        }
    }

    (records, stats)
}

/// Decode one 26-byte window through the tag dispatch table.
pub fn decode_window(window: &[u8; RECORD_LEN]) -> Decoded {
    let header = RecordHeader::read(window);
    match parse::parser_for(header.tag) {
        Some(parse) => match parse(&header, window) {
            Some(record) => Decoded::Known(record),
            None => Decoded::Malformed { tag: header.tag },
        },
        None => Decoded::Unknown { tag: header.tag },
    }
}

/// Inflate a zlib stream, or hand back the input untouched if it is not one.
pub fn inflate_if_compressed(body: Bytes) -> Bytes {
    if body.is_empty() {
        return body;
    }

    let decoder = ZlibDecoder::new(body.as_ref());
    let mut inflated = Vec::with_capacity(body.len().saturating_mul(4));
    match decoder
        .take((MAX_INFLATED_SIZE + 1) as u64)
        .read_to_end(&mut inflated)
    {
        Ok(n) if n > MAX_INFLATED_SIZE => {
            warn!(
                max = MAX_INFLATED_SIZE,
                "inflated payload exceeds limit, using raw bytes"
            );
            body
        }
        Ok(n) => {
            debug!(compressed = body.len(), inflated = n, "payload inflated");
            Bytes::from(inflated)
        }
        Err(e) => {
            debug!(error = %e, "payload not deflated, using raw bytes");
            body
        }
    }
}

/// Strip whitespace and an optional JSON string wrapper from a response body.
fn payload_text(payload: &[u8]) -> Vec<u8> {
    let compact = strip_whitespace(payload);
    if compact.first() == Some(&b'"') {
        if let Ok(inner) = serde_json::from_slice::<String>(&compact) {
            return strip_whitespace(inner.as_bytes());
        }
    }
    compact
}

fn strip_whitespace(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect()
}
