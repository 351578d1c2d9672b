//! Normalization of management query cells to `i64`.

use chrono::{Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PerfError, Result};

/// A typed cell as reported by the management query source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(String),
    /// CIM datetime already converted to epoch milliseconds.
    DateTime(i64),
    /// Any native type the decoder was not built for; carries the native type name.
    Unsupported(String),
}

impl Cell {
    /// Native type tag, for logs and errors.
    pub fn type_name(&self) -> &str {
        match self {
            Cell::I16(_) => "I16",
            Cell::U16(_) => "U16",
            Cell::I32(_) => "I32",
            Cell::U32(_) => "U32",
            Cell::I64(_) => "I64",
            Cell::U64(_) => "U64",
            Cell::Str(_) => "String",
            Cell::DateTime(_) => "DateTime",
            Cell::Unsupported(name) => name,
        }
    }

    /// String payload, used for instance-name columns.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Decode a cell. 16- and 32-bit integers are read as unsigned, so a raw
/// 0xFFFF stays 65535. Numeric strings pass through, short non-numeric ASCII
/// strings pack big-endian into the integer, and anything longer decodes as 0.
pub fn decode(cell: &Cell) -> Result<i64> {
    Ok(match cell {
        Cell::I16(v) => i64::from(*v as u16),
        Cell::U16(v) => i64::from(*v),
        Cell::I32(v) => i64::from(*v as u32),
        Cell::U32(v) => i64::from(*v),
        Cell::I64(v) => *v,
        Cell::U64(v) => *v as i64,
        Cell::DateTime(ms) => *ms,
        Cell::Str(s) => decode_str(s),
        Cell::Unsupported(name) => {
            log::error!("No decoder for management cell type {}", name);
            return Err(PerfError::UnsupportedCell(name.clone()));
        }
    })
}

fn decode_str(s: &str) -> i64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0;
    }
    // Management sources report 64-bit counters as decimal strings.
    if let Ok(v) = trimmed.parse::<u64>() {
        return v as i64;
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return v;
    }
    if s.is_ascii() && s.len() <= 8 {
        return s.bytes().fold(0i64, |acc, b| (acc << 8) | i64::from(b));
    }
    log::debug!("Dropping {}-byte string in numeric slot", s.len());
    0
}

/// Parse a CIM datetime (`yyyymmddHHMMSS.ffffff+UUU`, offset in minutes)
/// into epoch milliseconds.
pub fn parse_cim_datetime(s: &str) -> Option<i64> {
    if s.len() != 25 || !s.is_ascii() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&s[..21], "%Y%m%d%H%M%S%.6f").ok()?;
    let offset_minutes: i64 = match &s[21..22] {
        "+" => s[22..].parse().ok()?,
        "-" => -s[22..].parse::<i64>().ok()?,
        _ => return None,
    };
    let utc = naive - Duration::minutes(offset_minutes);
    Some(Utc.from_utc_datetime(&utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_not_sign_extended() {
        assert_eq!(decode(&Cell::I16(-1)).unwrap(), 65535);
        assert_eq!(decode(&Cell::U16(65535)).unwrap(), 65535);
    }

    #[test]
    fn test_u32_not_sign_extended() {
        assert_eq!(decode(&Cell::I32(-2)).unwrap(), 4_294_967_294);
        assert_eq!(decode(&Cell::I32(i32::MIN)).unwrap(), 2_147_483_648);
        assert_eq!(decode(&Cell::U32(u32::MAX)).unwrap(), 4_294_967_295);
    }

    #[test]
    fn test_64_bit_passthrough() {
        assert_eq!(decode(&Cell::I64(-5)).unwrap(), -5);
        assert_eq!(decode(&Cell::U64(1 << 40)).unwrap(), 1 << 40);
        assert_eq!(decode(&Cell::DateTime(1_700_000_000_000)).unwrap(), 1_700_000_000_000);
    }

    #[test]
    fn test_numeric_strings() {
        assert_eq!(decode(&Cell::Str("123456789012".into())).unwrap(), 123_456_789_012);
        assert_eq!(decode(&Cell::Str("-42".into())).unwrap(), -42);
        assert_eq!(decode(&Cell::Str(u64::MAX.to_string())).unwrap(), -1);
        assert_eq!(decode(&Cell::Str(String::new())).unwrap(), 0);
    }

    #[test]
    fn test_short_string_packs() {
        assert_eq!(decode(&Cell::Str("AB".into())).unwrap(), 0x4142);
        assert_eq!(
            decode(&Cell::Str("ABCDEFGH".into())).unwrap(),
            0x4142_4344_4546_4748
        );
    }

    #[test]
    fn test_long_string_is_zero() {
        assert_eq!(decode(&Cell::Str("svchost.exe#12".into())).unwrap(), 0);
    }

    #[test]
    fn test_unsupported_is_error() {
        let err = decode(&Cell::Unsupported("R8".into())).unwrap_err();
        assert!(matches!(err, PerfError::UnsupportedCell(ref t) if t == "R8"));
        assert!(err.is_defect());
    }

    #[test]
    fn test_cim_datetime() {
        assert_eq!(
            parse_cim_datetime("20231114221320.000000+000"),
            Some(1_700_000_000_000)
        );
        assert_eq!(
            parse_cim_datetime("20231115001320.500000+120"),
            Some(1_700_000_000_500)
        );
        assert_eq!(
            parse_cim_datetime("20231114201320.000000-120"),
            Some(1_700_000_000_000)
        );
        assert_eq!(parse_cim_datetime("not a datetime"), None);
        assert_eq!(parse_cim_datetime("2023111422132X.000000+000"), None);
    }

    #[test]
    fn test_type_name() {
        assert_eq!(Cell::U32(1).type_name(), "U32");
        assert_eq!(Cell::Unsupported("Bool".into()).type_name(), "Bool");
        assert_eq!(Cell::Str("x".into()).as_str(), Some("x"));
        assert_eq!(Cell::U64(1).as_str(), None);
    }
}
