//! Message layout and header field extraction.
//!
//! A message is split at the first blank line into a header block and a
//! body; both `LF LF` and `CRLF CRLF` are recognised and the newline style
//! is remembered so emission can stay byte faithful. Field lookup is
//! case-sensitive first (the common case, and cheaper) with a
//! case-insensitive fallback, supports the k-th occurrence of repeated
//! fields such as `Received:`, and unfolds continuation lines by trimming
//! each fragment and concatenating.

/// Newline convention of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newline {
    Lf,
    CrLf,
}

/// One raw message: the bytes from its envelope line up to (excluding) the
/// next envelope line, with the header/body split located.
pub struct Message<'a> {
    bytes: &'a [u8],
    header_end: usize,
    body_start: usize,
    newline: Newline,
}

impl<'a> Message<'a> {
    /// Locate the header/body split. A message without a blank line keeps
    /// everything in the header block and has an empty body, so it still
    /// runs through classification.
    pub fn parse(bytes: &'a [u8]) -> Self {
        for i in 0..bytes.len() {
            if bytes[i..].starts_with(b"\r\n\r\n") {
                return Self {
                    bytes,
                    header_end: i + 2,
                    body_start: i + 4,
                    newline: Newline::CrLf,
                };
            }
            if bytes[i..].starts_with(b"\n\n") {
                return Self {
                    bytes,
                    header_end: i + 1,
                    body_start: i + 2,
                    newline: Newline::Lf,
                };
            }
        }
        Self {
            bytes,
            header_end: bytes.len(),
            body_start: bytes.len(),
            newline: Newline::Lf,
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Header block including the envelope line and one trailing newline.
    pub fn header(&self) -> &'a [u8] {
        &self.bytes[..self.header_end]
    }

    pub fn body(&self) -> &'a [u8] {
        &self.bytes[self.body_start..]
    }

    pub fn newline(&self) -> Newline {
        self.newline
    }

    /// Offset of the first byte after the envelope line.
    pub fn envelope_end(&self) -> usize {
        match self.bytes.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => self.bytes.len(),
        }
    }

    /// Everything after the envelope line (headers and body).
    pub fn after_envelope(&self) -> &'a [u8] {
        &self.bytes[self.envelope_end()..]
    }

    /// First occurrence, exact-case name match. Empty values count as
    /// absent.
    pub fn field(&self, name: &str) -> Option<String> {
        self.lookup(name, false, 0)
    }

    /// First occurrence, any case.
    pub fn field_ci(&self, name: &str) -> Option<String> {
        self.lookup(name, true, 0)
    }

    /// k-th occurrence (0-based), exact case.
    pub fn field_nth(&self, name: &str, nth: usize) -> Option<String> {
        self.lookup(name, false, nth)
    }

    /// Last occurrence, exact case.
    pub fn last_field(&self, name: &str) -> Option<String> {
        let mut last = None;
        for nth in 0.. {
            match self.lookup(name, false, nth) {
                Some(value) => last = Some(value),
                None => break,
            }
        }
        last
    }

    /// Exact-case lookup with a case-insensitive retry, the composition
    /// the classifier uses everywhere.
    pub fn header_value(&self, name: &str) -> Option<String> {
        self.field(name).or_else(|| self.field_ci(name))
    }

    fn lookup(&self, name: &str, ci: bool, nth: usize) -> Option<String> {
        // The leading newline keeps us from matching text inside a value
        // and from ever matching the envelope line.
        let mut pattern = Vec::with_capacity(name.len() + 2);
        pattern.push(b'\n');
        pattern.extend_from_slice(name.as_bytes());
        pattern.push(b':');

        let header = self.header();
        let mut from = 0;
        let mut index = 0;
        while let Some(pos) = find_pattern(header, &pattern, from, ci) {
            if index == nth {
                let value = extract_value(header, pos + pattern.len());
                return if value.is_empty() { None } else { Some(value) };
            }
            index += 1;
            from = pos + 1;
        }
        None
    }
}

/// Value starting at `value_start`, unfolded over SP/TAB continuation
/// lines. Each fragment is trimmed of ASCII space and tab and the
/// fragments are concatenated directly.
fn extract_value(header: &[u8], value_start: usize) -> String {
    let mut value = String::new();
    let mut start = value_start;
    loop {
        let eol = header[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| p + start)
            .unwrap_or(header.len());
        let mut line = &header[start..eol];
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        value.push_str(String::from_utf8_lossy(line).trim_matches(&[' ', '\t'][..]));

        start = eol + 1;
        match header.get(start) {
            Some(&b' ') | Some(&b'\t') => continue,
            _ => break,
        }
    }
    value
}

fn find_pattern(data: &[u8], pattern: &[u8], from: usize, ci: bool) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(pattern.len())
        .position(|w| {
            if ci {
                w.eq_ignore_ascii_case(pattern)
            } else {
                w == pattern
            }
        })
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIL: &[u8] = b"From a@b Thu Jan 02 15:37:45 2014\n\
Received: from relay1; Thu, 02 Jan 2014 15:00:00 +0000\n\
Received: from relay2; Thu, 02 Jan 2014 15:30:00 +0000\n\
Subject: This is a long\n\t subject line\n\
From: Alice <a@b>\n\
date: Thu, 02 Jan 2014 15:37:45 +0000\n\
Empty:\n\
\n\
Body first line\nFrom the body, not a separator\n";

    #[test]
    fn test_split_lf() {
        let msg = Message::parse(MAIL);
        assert_eq!(msg.newline(), Newline::Lf);
        assert!(msg.header().ends_with(b"Empty:\n"));
        assert!(msg.body().starts_with(b"Body first line"));
    }

    #[test]
    fn test_split_crlf() {
        let raw = b"From a@b Thu Jan 02 15:37:45 2014\r\nSubject: x\r\n\r\nBody\r\n";
        let msg = Message::parse(raw);
        assert_eq!(msg.newline(), Newline::CrLf);
        assert_eq!(msg.body(), b"Body\r\n");
        assert!(msg.header().ends_with(b"Subject: x\r\n"));
    }

    #[test]
    fn test_no_blank_line() {
        let raw = b"From a@b Thu Jan 02 15:37:45 2014\nSubject: x\n";
        let msg = Message::parse(raw);
        assert_eq!(msg.header(), raw);
        assert!(msg.body().is_empty());
    }

    #[test]
    fn test_field_exact_case() {
        let msg = Message::parse(MAIL);
        assert_eq!(msg.field("From").as_deref(), Some("Alice <a@b>"));
        assert!(msg.field("Date").is_none());
    }

    #[test]
    fn test_field_case_insensitive_fallback() {
        let msg = Message::parse(MAIL);
        assert_eq!(
            msg.header_value("Date").as_deref(),
            Some("Thu, 02 Jan 2014 15:37:45 +0000")
        );
    }

    #[test]
    fn test_folded_value_concatenates_trimmed_fragments() {
        let msg = Message::parse(MAIL);
        assert_eq!(msg.field("Subject").as_deref(), Some("This is a longsubject line"));
    }

    #[test]
    fn test_indexed_and_last_occurrence() {
        let msg = Message::parse(MAIL);
        assert_eq!(
            msg.field_nth("Received", 0).as_deref(),
            Some("from relay1; Thu, 02 Jan 2014 15:00:00 +0000")
        );
        assert_eq!(
            msg.last_field("Received").as_deref(),
            Some("from relay2; Thu, 02 Jan 2014 15:30:00 +0000")
        );
        assert!(msg.field_nth("Received", 2).is_none());
    }

    #[test]
    fn test_empty_value_counts_as_absent() {
        let msg = Message::parse(MAIL);
        assert!(msg.field("Empty").is_none());
    }

    #[test]
    fn test_value_in_body_not_matched() {
        let msg = Message::parse(MAIL);
        // "From the body" is below the blank line and must not be found.
        assert!(msg.field("From the body, not a separator").is_none());
    }

    #[test]
    fn test_envelope_line_never_matches() {
        let raw = b"From a@b Thu Jan 02 15:37:45 2014\nX: y\n\nbody\n";
        let msg = Message::parse(raw);
        assert!(msg.field("From a@b Thu Jan 02 15de37").is_none());
        assert_eq!(msg.envelope_end(), raw.iter().position(|&b| b == b'\n').unwrap() + 1);
    }
}
