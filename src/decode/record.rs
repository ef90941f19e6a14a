//! Typed telemetry records produced by the event decoder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix seconds of 2008-01-01T00:00:00Z, the zero point of every pump clock field.
pub const PUMP_EPOCH_UNIX: i64 = 1_199_145_600;

/// Convert a pump-clock seconds offset into an absolute instant.
pub fn pump_time(offset_secs: u32) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(PUMP_EPOCH_UNIX + i64::from(offset_secs), 0)
}

/// One decoded pump event.
///
/// `timestamp` is the record's primary instant. For CGM samples it is the
/// sensor's EGV timestamp; the pump-side event time is kept in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub record_id: u16,
    pub source: u8,
    pub sequence_number: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    BasalRateChange(BasalRateChange),
    BolusCompleted(BolusCompleted),
    CgmSample(CgmSample),
}

impl EventData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EventData::BasalRateChange(_) => "basal_rate_change",
            EventData::BolusCompleted(_) => "bolus_completed",
            EventData::CgmSample(_) => "cgm_sample",
        }
    }
}

/// Identity used to collapse copies of the same event returned by
/// overlapping fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: &'static str,
    pub record_id: u16,
    pub timestamp_ms: i64,
}

impl TelemetryRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            kind: self.event.kind_name(),
            record_id: self.record_id,
            timestamp_ms: self.timestamp.timestamp_millis(),
        }
    }
}

/// Rates are in units/hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasalRateChange {
    #[serde(with = "wire_f32")]
    pub commanded_rate: f32,
    #[serde(with = "wire_f32")]
    pub base_rate: f32,
    #[serde(with = "wire_f32")]
    pub max_rate: f32,
    pub profile_id: u16,
    pub change_type: BasalChangeType,
}

/// Insulin amounts are in units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolusCompleted {
    pub bolus_id: u16,
    pub completion_status: BolusCompletionStatus,
    #[serde(with = "wire_f32")]
    pub insulin_on_board: f32,
    #[serde(with = "wire_f32")]
    pub insulin_delivered: f32,
    #[serde(with = "wire_f32")]
    pub insulin_requested: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgmSample {
    pub family: SensorFamily,
    /// Pump-side event time; the record timestamp carries the EGV time.
    pub pump_timestamp: DateTime<Utc>,
    /// mg/dL
    pub glucose_value: u16,
    pub glucose_status: u16,
    pub rate_of_change: i8,
    pub sub_type: u8,
    pub signal_strength: i8,
    pub algorithm_state: u8,
    pub interval: u8,
    pub info: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasalChangeType {
    TimedSegment,
    NewProfile,
    TempRateStart,
    TempRateEnd,
    PumpSuspended,
    PumpResumed,
    PumpShutDown,
    BasalLimit,
    Unknown(u8),
}

impl BasalChangeType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::TimedSegment,
            2 => Self::NewProfile,
            4 => Self::TempRateStart,
            8 => Self::TempRateEnd,
            16 => Self::PumpSuspended,
            32 => Self::PumpResumed,
            64 => Self::PumpShutDown,
            128 => Self::BasalLimit,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::TimedSegment => 1,
            Self::NewProfile => 2,
            Self::TempRateStart => 4,
            Self::TempRateEnd => 8,
            Self::PumpSuspended => 16,
            Self::PumpResumed => 32,
            Self::PumpShutDown => 64,
            Self::BasalLimit => 128,
            Self::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BolusCompletionStatus {
    UserAborted,
    TerminatedByAlarm,
    TerminatedByMalfunction,
    Completed,
    Rejected,
    AbortedBySafetySystem,
    Unknown(u16),
}

impl BolusCompletionStatus {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::UserAborted,
            1 => Self::TerminatedByAlarm,
            2 => Self::TerminatedByMalfunction,
            3 => Self::Completed,
            4 => Self::Rejected,
            5 => Self::AbortedBySafetySystem,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            Self::UserAborted => 0,
            Self::TerminatedByAlarm => 1,
            Self::TerminatedByMalfunction => 2,
            Self::Completed => 3,
            Self::Rejected => 4,
            Self::AbortedBySafetySystem => 5,
            Self::Unknown(raw) => raw,
        }
    }
}

/// Sensor family of a CGM sample, selected by the record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFamily {
    DexcomG6,
    DexcomG7,
    Libre2,
}

impl SensorFamily {
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            256 => Some(Self::DexcomG6),
            399 => Some(Self::DexcomG7),
            372 => Some(Self::Libre2),
            _ => None,
        }
    }

    pub fn tag(self) -> u16 {
        match self {
            Self::DexcomG6 => 256,
            Self::DexcomG7 => 399,
            Self::Libre2 => 372,
        }
    }
}

/// Pump floats as JSON. Finite values are plain numbers; NaN and infinities
/// (which JSON cannot hold) are strings, with NaN payload bits kept:
/// `"inf"`, `"-inf"`, `"NaN"`, or `"NaN(0x7fc01234)"`.
mod wire_f32 {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    const CANONICAL_NAN_BITS: u32 = 0x7fc0_0000;

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f32(*value)
        } else if value.is_nan() {
            let bits = value.to_bits();
            if bits == CANONICAL_NAN_BITS {
                serializer.serialize_str("NaN")
            } else {
                serializer.serialize_str(&format!("NaN({:#010x})", bits))
            }
        } else if value.is_sign_negative() {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_str("inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        deserializer.deserialize_any(WireF32Visitor)
    }

    struct WireF32Visitor;

    impl<'de> Visitor<'de> for WireF32Visitor {
        type Value = f32;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number, \"inf\", \"-inf\" or \"NaN\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f32, E> {
            match v {
                "inf" => Ok(f32::INFINITY),
                "-inf" => Ok(f32::NEG_INFINITY),
                "NaN" => Ok(f32::from_bits(CANONICAL_NAN_BITS)),
                other => other
                    .strip_prefix("NaN(0x")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .map(f32::from_bits)
                    .filter(|f| f.is_nan())
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}
