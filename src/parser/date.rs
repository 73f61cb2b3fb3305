//! Date resolution.
//!
//! `Date:` values in the wild stray a long way from RFC 5322, so parsing
//! is permissive and runs through a short recovery ladder:
//!
//! 1. parse the value directly (weekday optional, seconds optional,
//!    two-digit years, numeric zone offset optional),
//! 2. retry once after turning dashes into spaces inside the first two
//!    tokens (`16-Nov-2012 13:16:09 -0400`),
//! 3. retry once against the timestamp after the final `;` of the last
//!    `Received:` header.
//!
//! A message whose date survives none of these is invalid. The resolved
//! wall clock is kept both as a UTC epoch (filters) and as host local time
//! (filenames).

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

use super::header::Message;

/// Month number for an English three-letter abbreviation, any case.
pub(crate) fn month_number(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| token.eq_ignore_ascii_case(m))
        .map(|p| p as u32 + 1)
}

/// A successfully resolved message date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    /// Seconds since the Unix epoch, UTC.
    pub epoch: i64,
    /// The same instant in the host's local zone, used for filenames.
    pub local: NaiveDateTime,
}

/// Run the recovery ladder for a message whose `Date:` value is `raw`.
pub fn resolve_date(message: &Message, raw: &str) -> Option<ResolvedDate> {
    if let Some(date) = parse_permissive(raw) {
        return Some(date);
    }
    if let Some(date) = parse_permissive(&normalize_dashes(raw)) {
        return Some(date);
    }
    let received = message.last_field("Received")?;
    let (_, stamp) = received.rsplit_once(';')?;
    parse_permissive(stamp.trim())
}

/// Permissive RFC 5322 date parse.
pub fn parse_permissive(s: &str) -> Option<ResolvedDate> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    // A leading weekday ("Fri,") shifts every index by one.
    let di = if tokens.first()?.starts_with(|c: char| c.is_ascii_digit()) {
        0
    } else {
        1
    };
    if tokens.len() < di + 4 {
        return None;
    }

    let day: u32 = parse_digits(tokens[di])?;
    let month = month_number(tokens[di + 1])?;
    let year = expand_year(parse_digits(tokens[di + 2])?);

    let time = tokens[di + 3];
    if !time.contains(':') {
        return None;
    }
    let parts: Vec<&str> = time.split(':').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let hour: u32 = parse_digits(parts[0])?;
    let minute: u32 = parts.get(1).map_or(Some(0), |p| parse_digits(p))?;
    let second: u32 = parts.get(2).map_or(Some(0), |p| parse_digits(p))?;

    let zone_minutes = tokens.get(di + 4).map_or(0, |t| parse_zone(t));
    let zone_seconds = (zone_minutes / 100) * 3600 + (zone_minutes % 100) * 60;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    let epoch = naive.and_utc().timestamp() - zone_seconds as i64;
    let local = DateTime::from_timestamp(epoch, 0)?
        .with_timezone(&Local)
        .naive_local();
    Some(ResolvedDate { epoch, local })
}

fn expand_year(year: i64) -> i32 {
    if year < 90 {
        (year + 2000) as i32
    } else if year < 100 {
        (year + 1900) as i32
    } else {
        year as i32
    }
}

fn parse_digits<T: std::str::FromStr>(token: &str) -> Option<T> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Signed `hhmm` offset; anything non-numeric (named zones, parentheses)
/// counts as `+0000`.
fn parse_zone(token: &str) -> i32 {
    let (sign, rest) = match token.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, token.strip_prefix('+').unwrap_or(token)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse::<i32>().map_or(0, |v| sign * v)
}

/// Rewrite `16-Nov-2012 ...` into `16 Nov 2012 ...` by replacing dashes
/// inside the first two whitespace tokens.
fn normalize_dashes(s: &str) -> String {
    let mut tokens: Vec<String> = s.split_whitespace().map(str::to_owned).collect();
    for token in tokens.iter_mut().take(2) {
        *token = token.replace('-', " ");
    }
    tokens.join(" ")
}
