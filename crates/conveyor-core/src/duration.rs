//! Duration strings used for step and steady-state timeouts.
//!
//! Accepts one or more `<integer><unit>` pairs (`"10m"`, `"1h30m"`,
//! `"500ms"`) with units `ms`, `s`, `m`, `h`, `d`. A bare integer is read
//! as minutes. Anything else is an error; callers never fall back to a
//! default when parsing fails.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Parse a duration string such as `"10m"` or `"1h30m"`.
pub fn parse_duration(input: &str) -> CoreResult<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input, "empty duration"));
    }

    // Bare integer: minutes.
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let minutes = parse_number(input, s)?;
        return scale(input, minutes, 60_000);
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let (number, tail) = rest.split_at(digits);
        let unit_len = tail.bytes().take_while(u8::is_ascii_alphabetic).count();
        if unit_len == 0 {
            return Err(invalid(input, "missing unit"));
        }
        let (unit, tail) = tail.split_at(unit_len);

        let factor = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            other => return Err(invalid(input, &format!("unknown unit '{other}'"))),
        };
        let value = parse_number(input, number)?;
        let part = value
            .checked_mul(factor)
            .ok_or_else(|| invalid(input, "duration overflow"))?;
        total_ms = total_ms
            .checked_add(part)
            .ok_or_else(|| invalid(input, "duration overflow"))?;
        rest = tail;
    }

    Ok(Duration::from_millis(total_ms))
}

/// Render a duration in the same grammar (`"10m"`, `"90s"`, `"250ms"`).
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}

fn parse_number(input: &str, digits: &str) -> CoreResult<u64> {
    digits
        .parse::<u64>()
        .map_err(|e| invalid(input, &e.to_string()))
}

fn scale(input: &str, value: u64, factor: u64) -> CoreResult<Duration> {
    value
        .checked_mul(factor)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid(input, "duration overflow"))
}

fn invalid(value: &str, reason: &str) -> CoreError {
    CoreError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
