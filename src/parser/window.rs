//! Sliding byte window over an mbox file.
//!
//! The window always starts at the first byte of the next unemitted
//! message. The separator finder appends chunks as needed and consumes
//! whole messages off the front.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Read granularity.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Largest message the parser will hold in memory.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Hard cap on the resident window.
pub const MAX_WINDOW: usize = MAX_MESSAGE_SIZE + CHUNK_SIZE;

#[derive(Debug)]
pub struct Window {
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
    eof: bool,
    consumed: u64,
    cap: usize,
}

impl Window {
    /// Open an mbox file and read the first chunk. Fails fast with
    /// [`Error::NotAnMbox`] unless the file starts with the literal
    /// `From ` prefix.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut window = Self {
            path: path.to_path_buf(),
            file,
            buf: Vec::with_capacity(CHUNK_SIZE),
            eof: false,
            consumed: 0,
            cap: MAX_WINDOW,
        };
        window.fill()?;
        if !window.buf.starts_with(b"From ") {
            return Err(Error::NotAnMbox(path.to_path_buf()));
        }
        Ok(window)
    }

    /// Resident size the separator finder may not exceed while hunting
    /// for a boundary.
    pub fn cap(&self) -> usize {
        self.cap
    }

    pub(crate) fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Absolute file offset of the first byte in the window.
    pub fn offset(&self) -> u64 {
        self.consumed
    }

    /// Append one read of up to [`CHUNK_SIZE`] bytes. Returns the number
    /// of bytes added; zero marks end of file.
    pub fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let old_len = self.buf.len();
        self.buf.resize(old_len + CHUNK_SIZE, 0);
        let n = self
            .file
            .read(&mut self.buf[old_len..])
            .map_err(|e| Error::io(&self.path, e))?;
        self.buf.truncate(old_len + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Keep reading until at least `n` bytes are resident or the file is
    /// exhausted. Returns whether the request was satisfied.
    pub fn fill_at_least(&mut self, n: usize) -> Result<bool> {
        while self.buf.len() < n && !self.eof {
            self.fill()?;
        }
        Ok(self.buf.len() >= n)
    }

    /// Drop `n` bytes off the front of the window.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        self.consumed += n as u64;
    }
}
