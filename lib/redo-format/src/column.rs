//! Column-value decoding for the types named in spec.md §4.3.
//!
//! `NUMBER` uses a base-100 mantissa with an excess-193 biased exponent
//! byte, the way the source database's `sqlnet`/`OCI` layer represents
//! numerics on the wire; `DATE`/`TIMESTAMP` unpack a fixed-width byte
//! structure; `TIMESTAMP WITH (LOCAL) TIME ZONE` additionally carries two
//! timezone bytes, either a packed fixed offset or an index into a name
//! table.

use chrono::NaiveDate;

use crate::charset::{decode_all, CharacterSet, Decoder};

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampValue {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanos: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TzOffset {
    Fixed { hours: i8, minutes: i8 },
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimestampTzValue {
    pub timestamp: TimestampValue,
    pub tz: TzOffset,
}

/// A small stand-in timezone name table; the original system ships one with
/// several hundred entries (out of scope here, see spec.md §1).
const TZ_NAMES: &[&str] = &[
    "UTC",
    "US/Pacific",
    "US/Eastern",
    "Europe/Warsaw",
    "Asia/Tokyo",
];

pub fn decode_varchar(bytes: &[u8], charset: CharacterSet) -> String {
    decode_all(&charset as &dyn Decoder, bytes)
}

/// Decodes the source database's `NUMBER` wire format into a decimal
/// string, e.g. `[0xC1, 0x2B]` -> `"42"`.
pub fn decode_number(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return Some("0".to_string());
    }
    // A single 0x80 byte represents the value zero.
    if bytes.len() == 1 && bytes[0] == 0x80 {
        return Some("0".to_string());
    }

    let exponent_byte = bytes[0];
    let negative = exponent_byte < 0x80;
    let biased = if negative { 0x7F - exponent_byte } else { exponent_byte - 0x80 } as i32;
    // The exponent is the power of 100 of the most significant mantissa
    // digit group; 193 (0xC1) is the encoded zero-exponent marker.
    let exponent = biased - 64;

    let digit_bytes = if negative { &bytes[1..bytes.len().saturating_sub(1)] } else { &bytes[1..] };

    let mut digits: Vec<u8> = Vec::with_capacity(digit_bytes.len());
    for &b in digit_bytes {
        let d = if negative { 101 - (b as i32) } else { (b as i32) - 1 };
        if !(0..=99).contains(&d) {
            return None;
        }
        digits.push(d as u8);
    }
    if digits.is_empty() {
        digits.push(0);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    // Integer part: `exponent + 1` base-100 digit groups before the point.
    let int_groups = (exponent + 1).max(0) as usize;
    for (i, &d) in digits.iter().enumerate() {
        if i > 0 && i == int_groups {
            out.push('.');
        }
        if i == 0 && int_groups == 0 {
            out.push_str("0.");
        }
        if i == 0 {
            out.push_str(&d.to_string());
        } else {
            out.push_str(&format!("{d:02}"));
        }
    }
    while digits.len() < int_groups {
        out.push_str("00");
        digits.push(0);
    }
    Some(out)
}

/// Unpacks a 7- or 11-byte `DATE`/`TIMESTAMP` structure.
///
/// Byte layout: `century+100, year+100, month, day, hour+1, minute+1,
/// second+1[, nanos:u32-be]`.
pub fn decode_timestamp(bytes: &[u8]) -> Option<TimestampValue> {
    if bytes.len() != 7 && bytes.len() != 11 {
        return None;
    }
    let century = bytes[0] as i32 - 100;
    let year_in_century = bytes[1] as i32 - 100;
    let year = century * 100 + year_in_century;
    let month = bytes[2];
    let day = bytes[3];
    let hour = bytes[4].checked_sub(1)?;
    let minute = bytes[5].checked_sub(1)?;
    let second = bytes[6].checked_sub(1)?;
    let nanos = if bytes.len() == 11 {
        u32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]])
    } else {
        0
    };

    NaiveDate::from_ymd_opt(year, month as u32, day as u32)?;

    Some(TimestampValue { year, month, day, hour, minute, second, nanos })
}

/// Decodes the two timezone bytes following a `TIMESTAMP WITH TIME ZONE`
/// payload. Bytes in the reserved high range (`>= 0x80` on the hour byte)
/// encode a fixed `HH:MM` offset biased by 20 hours / 60 minutes; otherwise
/// the first byte indexes into the name table.
pub fn decode_timestamp_tz(timestamp_bytes: &[u8], tz_bytes: [u8; 2]) -> Option<TimestampTzValue> {
    let timestamp = decode_timestamp(timestamp_bytes)?;
    let tz = if tz_bytes[0] & 0x80 != 0 {
        TzOffset::Fixed {
            hours: (tz_bytes[0] & 0x7F) as i8 - 20,
            minutes: tz_bytes[1] as i8 - 60,
        }
    } else {
        let idx = tz_bytes[0] as usize;
        TzOffset::Named(
            TZ_NAMES
                .get(idx)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("UNKNOWN_TZ_{idx}")),
        )
    };
    Some(TimestampTzValue { timestamp, tz })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_number_s1_example() {
        // NUMBER = 42, payload `C1 2B` per the S1 scenario in spec.md §8.
        assert_eq!(decode_number(&[0xC1, 0x2B]), Some("42".to_string()));
    }

    #[test]
    fn decode_number_zero() {
        assert_eq!(decode_number(&[0x80]), Some("0".to_string()));
    }

    #[test]
    fn decode_varchar_s1_example() {
        assert_eq!(decode_varchar(&[0x68, 0x69], CharacterSet::Utf8), "hi");
    }

    #[test]
    fn decode_timestamp_unpacks_fields() {
        // 2024-03-05 10:20:30, century=20,year=24 => bytes 120,124
        let bytes = [120, 124, 3, 5, 11, 21, 31];
        let ts = decode_timestamp(&bytes).unwrap();
        assert_eq!(ts.year, 2024);
        assert_eq!(ts.month, 3);
        assert_eq!(ts.day, 5);
        assert_eq!(ts.hour, 10);
        assert_eq!(ts.minute, 20);
        assert_eq!(ts.second, 30);
    }

    #[test]
    fn decode_timestamp_tz_fixed_offset() {
        let bytes = [120, 124, 3, 5, 11, 21, 31];
        let tz = decode_timestamp_tz(&bytes, [20 + 0x80, 60]).unwrap();
        assert_eq!(tz.tz, TzOffset::Fixed { hours: 0, minutes: 0 });
    }

    #[test]
    fn decode_timestamp_tz_named() {
        let bytes = [120, 124, 3, 5, 11, 21, 31];
        let tz = decode_timestamp_tz(&bytes, [0, 0]).unwrap();
        assert_eq!(tz.tz, TzOffset::Named("UTC".to_string()));
    }
}
