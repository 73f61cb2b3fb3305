//! Compact mbox output: every accepted message appended in full,
//! envelope line included, to `<mboxname>_<runstart>`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use super::SinkState;

pub struct CompactSink {
    path: PathBuf,
    file: std::fs::File,
    state: SinkState,
}

impl CompactSink {
    /// Create the compact file for this run inside `outdir`.
    pub fn open(outdir: &Path, mbox_name: &str, run_start: &NaiveDateTime) -> io::Result<Self> {
        let path = outdir.join(format!("{}_{}", mbox_name, run_start.format("%Y%m%d%H%M%S")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            state: SinkState::Enabled,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Append one full message. Returns whether it was written; a write
    /// failure disables the sink for the rest of the run.
    pub fn append(&mut self, message: &[u8]) -> bool {
        if !self.state.is_enabled() {
            return false;
        }
        if let Err(err) = self.file.write_all(message) {
            log::error!(
                "could not write to {:?}, compact process is aborted: {err}",
                self.path
            );
            self.state = SinkState::Disabled(err.to_string());
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn run_start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_appends_full_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = CompactSink::open(tmp.path(), "inbox", &run_start()).unwrap();
        assert!(sink.append(b"From a@b Thu Jan 02 15:37:45 2014\nA\n"));
        assert!(sink.append(b"From c@d Fri Jan 03 10:00:00 2014\nB\n"));

        let content = std::fs::read(sink.path()).unwrap();
        assert_eq!(
            content,
            b"From a@b Thu Jan 02 15:37:45 2014\nA\nFrom c@d Fri Jan 03 10:00:00 2014\nB\n"
        );
        assert!(sink
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("inbox_20240601120000"));
    }
}
