//! `grpc-timeout` encoding.
//!
//! Format: `<value><unit>` where the value has at most 8 ASCII digits and
//! the unit is one of `n` (nanoseconds), `u` (microseconds),
//! `m` (milliseconds), `S` (seconds), `M` (minutes), `H` (hours).

use std::time::Duration;

use crate::error::{GrpcError, GrpcResult};

/// Largest value representable in 8 digits.
const MAX_VALUE: u128 = 99_999_999;

const UNITS: [(char, u128); 6] = [
    ('n', 1),
    ('u', 1_000),
    ('m', 1_000_000),
    ('S', 1_000_000_000),
    ('M', 60 * 1_000_000_000),
    ('H', 3_600 * 1_000_000_000),
];

/// Encode a deadline hint using the finest unit that fits in 8 digits.
///
/// Values are rounded up so the advertised deadline is never shorter than
/// the requested one. Durations beyond `99999999H` are clamped.
pub fn encode_timeout(timeout: Duration) -> String {
    let nanos = timeout.as_nanos();
    for (unit, scale) in UNITS {
        let value = nanos.div_ceil(scale);
        if value <= MAX_VALUE {
            return format!("{value}{unit}");
        }
    }
    format!("{MAX_VALUE}H")
}

/// Parse a `grpc-timeout` header value.
pub fn parse_timeout(value: &str) -> GrpcResult<Duration> {
    let invalid = || GrpcError::Protocol(format!("invalid grpc-timeout: {value:?}"));

    let unit = value.chars().last().ok_or_else(invalid)?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let timeout = match unit {
        'n' => Duration::from_nanos(amount),
        'u' => Duration::from_micros(amount),
        'm' => Duration::from_millis(amount),
        'S' => Duration::from_secs(amount),
        'M' => Duration::from_secs(amount * 60),
        'H' => Duration::from_secs(amount * 3_600),
        _ => return Err(invalid()),
    };
    Ok(timeout)
}
