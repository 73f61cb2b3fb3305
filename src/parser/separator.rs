//! Envelope-line detection.
//!
//! `From ` is only a message boundary when the rest of the line looks like
//! a real envelope: `From <sender> Www Mmm d hh:mm:ss yyyy [moreinfo]`.
//! Plain `From ` at the start of a body line fails the date check and is
//! skipped, so the scan keeps looking for the next candidate. The date is
//! matched permissively: single-digit days and time components are fine,
//! the weekday and month must be English three-letter abbreviations in any
//! case, and the date itself has to exist in the Gregorian calendar
//! (year 1582 or later).

use chrono::NaiveDate;

use super::date::month_number;
use super::window::Window;
use crate::error::{Error, Result};

/// One located message: `message_len` bytes at the front of the window,
/// including the envelope line and, unless this is the final message, the
/// newline that precedes the next envelope.
#[derive(Debug, Clone, Copy)]
pub struct Separation {
    pub message_len: usize,
    pub is_last: bool,
}

enum Scan {
    Found(usize),
    /// No qualifying separator yet; resume scanning at this offset once
    /// more bytes are in the window.
    NeedMore(usize),
}

/// Locate the end of the message currently at the front of the window,
/// reading more of the file as required. The window must be non-empty.
pub fn find_separator(window: &mut Window) -> Result<Separation> {
    let mut from = 1;
    loop {
        match scan(window.data(), from) {
            Scan::Found(len) => {
                return Ok(Separation {
                    message_len: len,
                    is_last: false,
                })
            }
            Scan::NeedMore(resume) => {
                if window.is_eof() {
                    return Ok(Separation {
                        message_len: window.len(),
                        is_last: true,
                    });
                }
                if window.len() > window.cap() {
                    return Err(Error::ParseOverflow {
                        offset: window.offset(),
                        limit: window.cap(),
                    });
                }
                window.fill()?;
                from = resume;
            }
        }
    }
}

/// Discard the oversized span at the front of the window, stopping at the
/// next qualifying envelope line. The window then starts at that line.
/// Returns false when the rest of the file went by without one.
///
/// Memory stays bounded: everything the scan has ruled out is dropped
/// before reading on, keeping only one byte of slop ahead of a possible
/// boundary.
pub fn resync(window: &mut Window) -> Result<bool> {
    loop {
        match scan(window.data(), 1) {
            Scan::Found(start) => {
                window.consume(start);
                return Ok(true);
            }
            Scan::NeedMore(resume) => {
                window.consume(resume.saturating_sub(1));
                if window.len() > window.cap() {
                    // A candidate line this long cannot be an envelope.
                    let len = window.len();
                    window.consume(len.saturating_sub(1));
                }
                if window.is_eof() {
                    window.consume(window.len());
                    return Ok(false);
                }
                window.fill()?;
            }
        }
    }
}

fn scan(data: &[u8], start: usize) -> Scan {
    let mut i = start.max(1);
    while let Some(pos) = find(data, b"\nFrom ", i) {
        let line_start = pos + 1;
        match find_byte(data, b'\n', line_start) {
            Some(eol) => {
                let mut line = &data[line_start..eol];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                if is_envelope_line(line) {
                    return Scan::Found(line_start);
                }
                i = line_start;
            }
            // Candidate line still incomplete; re-examine it after the
            // next fill.
            None => return Scan::NeedMore(pos),
        }
    }
    Scan::NeedMore(data.len().saturating_sub(6).max(1))
}

/// True when `line` (without its newline) is a qualifying envelope line.
pub fn is_envelope_line(line: &[u8]) -> bool {
    let Some(rest) = line.strip_prefix(b"From ") else {
        return false;
    };
    let mut tokens = rest
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|t| !t.is_empty());
    if tokens.next().is_none() {
        // No sender.
        return false;
    }
    let date: Vec<&[u8]> = tokens.take(5).collect();
    if date.len() < 5 {
        return false;
    }
    is_permissive_asctime(&date)
}

/// `[Www, Mmm, d, hh:mm:ss, yyyy]` with permissive field widths.
fn is_permissive_asctime(tokens: &[&[u8]]) -> bool {
    const WEEKDAYS: [&[u8]; 7] = [b"Mon", b"Tue", b"Wed", b"Thu", b"Fri", b"Sat", b"Sun"];
    if !WEEKDAYS.iter().any(|w| tokens[0].eq_ignore_ascii_case(w)) {
        return false;
    }
    let Some(month) = std::str::from_utf8(tokens[1]).ok().and_then(month_number) else {
        return false;
    };
    let (Some(day), Some(year)) = (parse_number(tokens[2]), parse_number(tokens[4])) else {
        return false;
    };
    let time: Vec<&[u8]> = tokens[3].split(|&b| b == b':').filter(|p| !p.is_empty()).collect();
    if time.len() != 3 {
        return false;
    }
    let (Some(hour), Some(minute), Some(second)) =
        (parse_number(time[0]), parse_number(time[1]), parse_number(time[2]))
    else {
        return false;
    };
    if hour > 23 || minute > 59 || second > 59 {
        return false;
    }
    year >= 1582 && NaiveDate::from_ymd_opt(year as i32, month, day).is_some()
}

fn parse_number(token: &[u8]) -> Option<u32> {
    if token.is_empty() || !token.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    std::str::from_utf8(token).ok()?.parse().ok()
}

fn find(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn find_byte(data: &[u8], byte: u8, from: usize) -> Option<usize> {
    data.get(from..)?.iter().position(|&b| b == byte).map(|p| p + from)
}
