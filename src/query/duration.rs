//! Duration strings for `range` and `threshold` parameters
//!
//! Accepted syntax is a signed sequence of `<decimal><unit>` groups, e.g.
//! `5m`, `1h30m`, `1.5h`, `250ms`, `-2s`, with units `ns`, `us`/`µs`, `ms`,
//! `s`, `m`, `h`. A bare `0` is also accepted.

use crate::error::QueryError;
use chrono::Duration;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, digit0};
use nom::combinator::{all_consuming, opt, recognize, verify};
use nom::multi::many1;
use nom::{IResult, Parser};

const NANOS_PER_MICRO: f64 = 1e3;
const NANOS_PER_MILLI: f64 = 1e6;
const NANOS_PER_SECOND: f64 = 1e9;

/// Decimal number with optional fraction; at least one digit required
fn decimal(input: &str) -> IResult<&str, f64> {
    let (rest, text) = verify(
        recognize((digit0, opt((char('.'), digit0)))),
        |s: &str| s.chars().any(|c| c.is_ascii_digit()),
    )
    .parse(input)?;
    // recognized text is digits with at most one dot, always a valid f64
    let value = text.parse::<f64>().unwrap_or(0.0);
    Ok((rest, value))
}

/// Unit suffix as nanoseconds per unit
fn unit(input: &str) -> IResult<&str, f64> {
    let (rest, unit) = alt((
        tag("ns"),
        tag("us"),
        tag("µs"),
        tag("μs"),
        tag("ms"),
        tag("s"),
        tag("m"),
        tag("h"),
    ))
    .parse(input)?;

    let nanos = match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => NANOS_PER_MICRO,
        "ms" => NANOS_PER_MILLI,
        "s" => NANOS_PER_SECOND,
        "m" => 60.0 * NANOS_PER_SECOND,
        _ => 3600.0 * NANOS_PER_SECOND,
    };
    Ok((rest, nanos))
}

/// One `<decimal><unit>` group in nanoseconds
fn component(input: &str) -> IResult<&str, f64> {
    let (rest, (value, scale)) = (decimal, unit).parse(input)?;
    Ok((rest, value * scale))
}

/// Parse a duration string, `None` when malformed or out of range
pub fn parse_duration(input: &str) -> Option<Duration> {
    let (negative, body) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if body == "0" {
        return Some(Duration::zero());
    }

    let (_, parts) = all_consuming(many1(component)).parse(body).ok()?;
    let nanos: f64 = parts.iter().sum();
    if !nanos.is_finite() || nanos >= i64::MAX as f64 {
        return None;
    }

    let nanos = nanos as i64;
    Some(Duration::nanoseconds(if negative { -nanos } else { nanos }))
}

/// Parse a named query parameter, falling back to `default` when absent
pub fn parse_duration_param(
    param: &'static str,
    raw: Option<&str>,
    default: &str,
) -> Result<Duration, QueryError> {
    let value = raw.filter(|v| !v.is_empty()).unwrap_or(default);
    parse_duration(value).ok_or_else(|| QueryError::InvalidDuration {
        param,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_duration("5m"), Some(Duration::minutes(5)));
        assert_eq!(parse_duration("1h"), Some(Duration::hours(1)));
        assert_eq!(parse_duration("30s"), Some(Duration::seconds(30)));
        assert_eq!(parse_duration("250ms"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_duration("7us"), Some(Duration::microseconds(7)));
        assert_eq!(parse_duration("7µs"), Some(Duration::microseconds(7)));
        assert_eq!(parse_duration("9ns"), Some(Duration::nanoseconds(9)));
    }

    #[test]
    fn test_compound_and_fractional() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration(".5s"), Some(Duration::milliseconds(500)));
        assert_eq!(parse_duration("2m3.5s"), Some(Duration::milliseconds(123_500)));
    }

    #[test]
    fn test_sign_and_zero() {
        assert_eq!(parse_duration("0"), Some(Duration::zero()));
        assert_eq!(parse_duration("-2s"), Some(Duration::seconds(-2)));
        assert_eq!(parse_duration("+2s"), Some(Duration::seconds(2)));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "5", "m", "5 minutes", "1d", ".s", "5m3", "1h-2m", "--1s", "10M"] {
            assert_eq!(parse_duration(bad), None, "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_param_default_and_error() {
        assert_eq!(
            parse_duration_param("threshold", None, "5m").unwrap(),
            Duration::minutes(5)
        );
        assert_eq!(
            parse_duration_param("range", Some(""), "1h").unwrap(),
            Duration::hours(1)
        );
        let err = parse_duration_param("range", Some("soon"), "1h").unwrap_err();
        assert_eq!(err.to_string(), "invalid range");
    }
}
