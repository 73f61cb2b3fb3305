//! Per-message eml files.
//!
//! The payload is the message without its envelope line, byte for byte as
//! read from the mbox, except for two optional transforms: LF messages can
//! be rewritten to CRLF (`--windows-format`) and the result can be gzip
//! wrapped (`--compress`). Writing is idempotent: an existing file is left
//! untouched.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::parser::header::{Message, Newline};

/// Result of one eml write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmlWrite {
    Written,
    AlreadyExists,
}

/// Write `payload` to `target` unless the file already exists.
/// A partial file left behind by a failed write is removed.
pub fn write_eml(target: &Path, payload: &[u8]) -> io::Result<EmlWrite> {
    if target.exists() {
        return Ok(EmlWrite::AlreadyExists);
    }
    let mut file = File::create(target)?;
    if let Err(err) = file.write_all(payload).and_then(|_| file.flush()) {
        drop(file);
        let _ = fs::remove_file(target);
        return Err(err);
    }
    Ok(EmlWrite::Written)
}

/// Message bytes after the envelope line, with the requested transforms
/// applied.
pub fn render_payload(message: &Message, windows_format: bool, compress: bool) -> io::Result<Vec<u8>> {
    let body = message.after_envelope();
    let mut payload = if windows_format && message.newline() == Newline::Lf {
        to_crlf(body)
    } else {
        body.to_vec()
    };
    if compress {
        let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
        encoder.write_all(&payload)?;
        payload = encoder.finish()?;
    }
    Ok(payload)
}

/// Rewrite LF line endings as CRLF, collapsing any `\r` already present
/// at line ends. A final line without a newline is kept as is.
fn to_crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 32);
    for chunk in bytes.split_inclusive(|&b| b == b'\n') {
        match chunk.strip_suffix(b"\n") {
            Some(line) => {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                out.extend_from_slice(line);
                out.extend_from_slice(b"\r\n");
            }
            None => out.extend_from_slice(chunk),
        }
    }
    out
}
