//! Wall-clock helpers and TTL duration parsing.
//!
//! Timestamps are nanoseconds since the Unix epoch as `u64`, the same
//! representation the WAL persists. TTL strings use the `<int><unit>`
//! form (`500ms`, `2m`, `1h`).

use crate::error::{Error, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Parse a TTL duration string of the form `<int><unit>`.
///
/// Accepted units: `ns`, `us`, `ms`, `s`, `m`, `h`. A zero duration is
/// rejected — an entry that expires at its own creation instant is a
/// caller error.
pub fn parse_ttl(s: &str) -> Result<Duration> {
    let ttl = humantime::parse_duration(s)
        .map_err(|e| Error::BadRequest(format!("invalid ttl {s:?}: {e}")))?;
    if ttl.is_zero() {
        return Err(Error::BadRequest("ttl must be positive".into()));
    }
    Ok(ttl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ttl_units() {
        assert_eq!(parse_ttl("250ns").unwrap(), Duration::from_nanos(250));
        assert_eq!(parse_ttl("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_ttl("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_ttl("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_ttl("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_ttl("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_ttl_rejects_garbage() {
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("fast").is_err());
        assert!(parse_ttl("-5s").is_err());
        assert!(parse_ttl("0s").is_err());
    }

    #[test]
    fn test_unix_nanos_advances() {
        let a = unix_nanos();
        let b = unix_nanos();
        assert!(b >= a);
        // Sanity: later than 2020-01-01 in nanoseconds.
        assert!(a > 1_577_836_800_000_000_000);
    }
}
