//! Parsing for human-readable timeouts such as `6m` or `1m30s`.

use std::iter::Peekable;
use std::str::Chars;
use std::time::Duration;

/// Parses a duration made of one or more `<number><unit>` segments.
///
/// Units are `ms`, `s`, `m` and `h`; segments add up, so `1m30s` is ninety
/// seconds. A bare `0` is accepted.
///
/// # Errors
///
/// Returns a message when the input is empty, a segment lacks a number or a
/// unit, the unit is unknown, or the total overflows.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(String::from("empty duration string"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut chars = trimmed.chars().peekable();
    let mut total = Duration::ZERO;
    while chars.peek().is_some() {
        let amount = take_number(&mut chars)
            .ok_or_else(|| format!("expected a number in duration {trimmed:?}"))?;
        let unit = take_unit(&mut chars);
        let segment = match unit.as_str() {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            "h" => amount.checked_mul(3600).map(Duration::from_secs),
            "" => return Err(format!("missing unit in duration {trimmed:?}")),
            other => return Err(format!("unknown duration unit {other:?}")),
        };
        total = segment
            .and_then(|value| total.checked_add(value))
            .ok_or_else(|| format!("duration {trimmed:?} is too large"))?;
    }
    Ok(total)
}

fn take_number(chars: &mut Peekable<Chars<'_>>) -> Option<u64> {
    let mut value: Option<u64> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        value = Some(
            value
                .unwrap_or(0)
                .checked_mul(10)?
                .checked_add(u64::from(digit))?,
        );
    }
    value
}

fn take_unit(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut unit = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_alphabetic) {
        unit.push(c);
    }
    unit
}
