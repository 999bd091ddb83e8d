//! Shared helpers: UTC date formatting for dynamic variables and
//! public-URL normalization for TwiML callbacks.

use chrono::{Duration, NaiveDate, Utc};

/// Date format used everywhere a date crosses a wire boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Today's date in UTC, formatted `YYYY-MM-DD`.
pub fn today() -> String {
    Utc::now().date_naive().format(DATE_FORMAT).to_string()
}

/// Tomorrow's date in UTC, formatted `YYYY-MM-DD`.
pub fn tomorrow() -> String {
    (Utc::now().date_naive() + Duration::days(1))
        .format(DATE_FORMAT)
        .to_string()
}

/// The date one week from today in UTC, formatted `YYYY-MM-DD`.
pub fn week_from_today() -> String {
    (Utc::now().date_naive() + Duration::days(7))
        .format(DATE_FORMAT)
        .to_string()
}

/// Validate a `YYYY-MM-DD` date string.
pub fn is_valid_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, DATE_FORMAT).is_ok()
}

/// Normalize a configured public host into an `https://` base URL with no
/// trailing slash. Accepts bare domains (Railway injects them without a
/// scheme) and full URLs.
pub fn public_base_url(host: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Derive the `wss://` form of the public base URL.
pub fn public_ws_url(host: &str) -> String {
    public_base_url(host)
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1)
}
