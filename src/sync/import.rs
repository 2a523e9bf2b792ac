//! Contribution links: building them, and reading them back from the shared log.

use crate::error::{Result, TrailError};
use crate::format::nice_timestamp;
use crate::types::Fix;
use chrono::{DateTime, NaiveDateTime};
use reqwest::Url;
use std::collections::HashMap;

/// Positional keys of the `A=` shortcut parameter
const SHORTCUT_KEYS: [&str; 5] = ["lskey", "lat", "lon", "at", "start"];

/// Epoch values below this are seconds, above are milliseconds
const SECONDS_CEILING: i64 = 30_000_000_000;

/// Accepted instants: 1970-01-01 up to the end of year 9999, in ms
const EPOCH_RANGE_MS: std::ops::RangeInclusive<i64> = 0..=253_402_300_799_999;

/// Query parameters of a link, with the `A=` shortcut expanded
///
/// Explicit parameters win over the shortcut's positional values.
pub fn url_params(url: &Url) -> HashMap<String, String> {
    let mut explicit: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let mut params = HashMap::new();

    if let Some(shortcut) = explicit.remove("A") {
        for (key, value) in SHORTCUT_KEYS.iter().zip(shortcut.split(',')) {
            params.insert(key.to_string(), value.to_string());
        }
    }
    params.extend(explicit);
    params
}

/// Parse a timestamp given as ISO-8601, epoch seconds or epoch milliseconds
///
/// # Rules
/// - contains `T`: ISO instant (offset optional, UTC assumed when absent)
/// - integer below 30 000 000 000: seconds, scaled to milliseconds
/// - larger integer: already milliseconds
/// - instants before 1970 or after year 9999 are rejected
pub fn guess_timestamp(s: &str) -> Result<i64> {
    let s = s.trim();
    let millis = if s.contains('T') {
        match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.timestamp_millis(),
            Err(_) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
                .map(|naive| naive.and_utc().timestamp_millis())
                .map_err(|_| TrailError::validation(format!("bad ISO timestamp '{}'", s)))?,
        }
    } else {
        let value: i64 = s
            .parse()
            .map_err(|_| TrailError::validation(format!("bad timestamp '{}'", s)))?;
        if value < SECONDS_CEILING {
            value
                .checked_mul(1000)
                .ok_or_else(|| TrailError::validation(format!("timestamp out of range '{}'", s)))?
        } else {
            value
        }
    };

    if !EPOCH_RANGE_MS.contains(&millis) {
        return Err(TrailError::validation(format!("timestamp out of range '{}'", s)));
    }
    Ok(millis)
}

/// Link publishing one fix: `base?A=key,lat,lon,tsec`
pub fn contribute_url(base_url: &str, key: &str, lat: f64, lon: f64, tsec: i64) -> String {
    format!("{}?A={},{:.4},{:.4},{}", base_url, key, lat, lon, tsec)
}

/// Shared-log chunk for one contribution: readable time line, then the link
pub fn contribution_chunk(timestamp_ms: i64, url: &str) -> String {
    format!("{}\n{}\n", nice_timestamp(timestamp_ms), url)
}

/// One contribution read from a link
#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    pub fix: Fix,
    pub start: Option<i64>,
}

/// Extract a contribution for `key` from link parameters
///
/// `Ok(None)` when the link is incomplete or targets another key; an error
/// when the parameters are present but malformed.
pub fn contribution_from_params(params: &HashMap<String, String>, key: &str) -> Result<Option<Contribution>> {
    let (Some(lat), Some(lon), Some(at)) = (params.get("lat"), params.get("lon"), params.get("at")) else {
        return Ok(None);
    };
    if params.get("lskey").map(String::as_str) != Some(key) {
        return Ok(None);
    }

    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| TrailError::validation(format!("bad lat '{}'", lat)))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| TrailError::validation(format!("bad lon '{}'", lon)))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(TrailError::validation(format!("position out of range {},{}", lat, lon)));
    }
    let timestamp = guess_timestamp(at)?;
    let start = match params.get("start") {
        Some(s) if !s.is_empty() => Some(guess_timestamp(s)?),
        _ => None,
    };

    Ok(Some(Contribution {
        fix: Fix::new(timestamp, lat, lon),
        start,
    }))
}

/// Result of scanning shared content
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedImport {
    /// Unique by timestamp, in log order
    pub fixes: Vec<Fix>,
    /// Last `start` seen, only when start import is enabled
    pub start_time: Option<i64>,
    /// Allow-listed lines that could not be used
    pub rejected: usize,
}

/// Read every contribution for `key` from shared-log content
pub fn import_contributions(
    content: &str,
    key: &str,
    allowed_origins: &[&str],
    import_start: bool,
) -> SharedImport {
    let mut result = SharedImport::default();

    let lines = content
        .lines()
        .map(str::trim)
        .filter(|l| allowed_origins.iter().any(|o| !o.is_empty() && l.starts_with(o)));

    for line in lines {
        let parsed = Url::parse(line)
            .map_err(|e| TrailError::validation(format!("bad link: {}", e)))
            .and_then(|url| contribution_from_params(&url_params(&url), key));

        match parsed {
            Ok(Some(contribution)) => {
                let ts = contribution.fix.timestamp;
                if !result.fixes.iter().any(|f| f.timestamp == ts) {
                    result.fixes.push(contribution.fix);
                }
                if import_start {
                    if let Some(start) = contribution.start {
                        result.start_time = Some(start);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("Skipping shared line '{}': {}", line, e);
                result.rejected += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://localhost:7777/";

    #[test]
    fn test_guess_timestamp_iso() {
        assert_eq!(guess_timestamp("2024-01-01T00:00:00Z").unwrap(), 1_704_067_200_000);
        assert_eq!(guess_timestamp("2024-01-01T01:00:00+01:00").unwrap(), 1_704_067_200_000);
        assert_eq!(guess_timestamp("2024-01-01T00:00:00").unwrap(), 1_704_067_200_000);
    }

    #[test]
    fn test_guess_timestamp_seconds_vs_millis() {
        assert_eq!(guess_timestamp("1700000000").unwrap(), 1_700_000_000_000);
        assert_eq!(guess_timestamp("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(guess_timestamp("29999999999").unwrap(), 29_999_999_999_000);
        assert_eq!(guess_timestamp("30000000000").unwrap(), 30_000_000_000);
    }

    #[test]
    fn test_guess_timestamp_rejects_garbage() {
        assert!(matches!(guess_timestamp("soon"), Err(TrailError::Validation(_))));
        assert!(matches!(guess_timestamp("2024-13-45T99"), Err(TrailError::Validation(_))));
    }

    #[test]
    fn test_guess_timestamp_rejects_out_of_range() {
        for s in [
            "-9223372036854775807",
            "-9223372036854775",
            "-1",
            "9223372036854775807",
            "1000000-01-01T00:00:00Z",
        ] {
            assert!(matches!(guess_timestamp(s), Err(TrailError::Validation(_))), "{}", s);
        }
        assert_eq!(guess_timestamp("0").unwrap(), 0);
    }

    #[test]
    fn test_import_skips_out_of_range_lines() {
        let content = "\
http://localhost:7777/?A=25eb,45.0,5.0,-9223372036854775807
http://localhost:7777/?A=25eb,45.0,5.0,1700000000,-9223372036854775
http://localhost:7777/?A=25eb,45.1,5.1,1700000060
";
        let import = import_contributions(content, "25eb", &[BASE], true);
        assert_eq!(import.fixes, vec![Fix::new(1_700_000_060_000, 45.1, 5.1)]);
        assert_eq!(import.start_time, None);
        assert_eq!(import.rejected, 2);
    }

    #[test]
    fn test_shortcut_expansion() {
        let url = Url::parse("http://localhost:7777/?A=25eb@bob,45.1000,5.2000,1700000000,1699990000").unwrap();
        let params = url_params(&url);
        assert_eq!(params["lskey"], "25eb@bob");
        assert_eq!(params["lat"], "45.1000");
        assert_eq!(params["lon"], "5.2000");
        assert_eq!(params["at"], "1700000000");
        assert_eq!(params["start"], "1699990000");
        assert!(!params.contains_key("A"));
    }

    #[test]
    fn test_explicit_params_override_shortcut() {
        let url = Url::parse("http://localhost:7777/?A=25eb,45.1,5.2,1700000000&lat=46.0").unwrap();
        let params = url_params(&url);
        assert_eq!(params["lat"], "46.0");
        assert_eq!(params["lon"], "5.2");
        assert!(!params.contains_key("start"));
    }

    #[test]
    fn test_contribute_url_format() {
        let url = contribute_url(BASE, "25eb", 45.123456, 5.98766, 1_700_000_000);
        assert_eq!(url, "http://localhost:7777/?A=25eb,45.1235,5.9877,1700000000");

        let chunk = contribution_chunk(1_700_000_000_000, &url);
        let lines: Vec<&str> = chunk.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], url);
        assert!(chunk.ends_with('\n'));
    }

    #[test]
    fn test_contribution_requires_all_fields_and_key() {
        let url = Url::parse("http://localhost:7777/?A=25eb,45.1,5.2").unwrap();
        assert_eq!(contribution_from_params(&url_params(&url), "25eb").unwrap(), None);

        let url = Url::parse("http://localhost:7777/?A=other,45.1,5.2,1700000000").unwrap();
        assert_eq!(contribution_from_params(&url_params(&url), "25eb").unwrap(), None);

        let url = Url::parse("http://localhost:7777/?A=25eb,abc,5.2,1700000000").unwrap();
        assert!(matches!(
            contribution_from_params(&url_params(&url), "25eb"),
            Err(TrailError::Validation(_))
        ));
    }

    #[test]
    fn test_import_filters_and_dedups() {
        let content = "\
2024-01-01 10:00:00
http://localhost:7777/?A=25eb,45.1000,5.2000,1700000000
2024-01-01 10:05:00
http://localhost:7777/?A=25eb,45.1100,5.2100,1700000300,1699999000
http://localhost:7777/?A=25eb,45.9999,5.9999,1700000000
http://localhost:7777/?A=25eb@bob,45.2,5.3,1700000600
https://elsewhere.example/?A=25eb,45.3,5.4,1700000900
http://localhost:7777/?A=25eb,north,5.4,1700001200
";
        let import = import_contributions(content, "25eb", &[BASE], true);
        assert_eq!(import.fixes.len(), 2);
        assert_eq!(import.fixes[0], Fix::new(1_700_000_000_000, 45.1, 5.2));
        assert_eq!(import.fixes[1].timestamp, 1_700_000_300_000);
        assert_eq!(import.start_time, Some(1_699_999_000_000));
        assert_eq!(import.rejected, 1);

        let no_start = import_contributions(content, "25eb", &[BASE], false);
        assert_eq!(no_start.start_time, None);

        let bob = import_contributions(content, "25eb@bob", &[BASE], false);
        assert_eq!(bob.fixes.len(), 1);
    }

    #[test]
    fn test_import_extra_origin() {
        let content = "https://mirror.example/follow/?A=25eb,45.3,5.4,1700000900\n";
        assert!(import_contributions(content, "25eb", &[BASE], false).fixes.is_empty());
        let import = import_contributions(content, "25eb", &[BASE, "https://mirror.example/follow/"], false);
        assert_eq!(import.fixes.len(), 1);
    }
}
