//! Streaming mbox parsing pipeline.
//!
//! # Architecture
//!
//! - **`window`**: feeds the file through a bounded sliding byte buffer
//!   whose first byte is always the start of the next unemitted message.
//! - **`separator`**: finds the next qualifying `From ` envelope line
//!   (the permissive asctime heuristic) and with it the message boundary.
//! - **`header`**: splits a message at the first blank line and answers
//!   field lookups with folding and repeated-field support.
//! - **`date`**: turns the `Date:` header (or the last `Received:` stamp)
//!   into an epoch and a local wall clock.
//! - **`classify`**: applies validity, deletion, date-window and
//!   duplicate rules and decides the output filename.
//! - **`naming`**: the `<timestamp>_<md5>.eml` scheme.
//! - **`stats`**: per-run counters.
//!
//! [`MboxParser::parse`] drives one mbox through
//! `fill -> find separator -> classify -> fan out` and finishes with the
//! optional destination synchronisation. Everything is strictly
//! sequential; state lives for exactly one call so the parser can be
//! reused across files.

pub mod classify;
pub mod date;
pub mod header;
pub mod naming;
pub mod separator;
pub mod stats;
pub mod window;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::error::{Error, Result};
use crate::sink::{CompactSink, EmlConsumer, SplitSink};
use crate::util;
use classify::{Classifier, FilterWindow, Outcome, RetentionPolicy};
use header::Message;
use stats::RunStats;
use window::Window;

/// Everything that configures one parse run.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub extract: bool,
    pub compress: bool,
    pub compact: bool,
    pub split_max: Option<u64>,
    pub windows_format: bool,
    pub synchronize: bool,
    pub policy: RetentionPolicy,
    /// Keep only messages older than this many days.
    pub age_min: u32,
    /// Keep only messages younger than this many days.
    pub age_max: u32,
    pub date_before: Option<i64>,
    pub date_after: Option<i64>,
}

impl ParseOptions {
    fn wants_files(&self) -> bool {
        self.extract || self.compact || self.split_max.is_some()
    }

    /// Bounds for this run. Age options win over absolute dates; the
    /// config layer rejects setting both.
    fn filter_window(&self, run_start: i64) -> FilterWindow {
        let before = if self.age_min > 0 {
            Some(run_start - self.age_min as i64 * 86400)
        } else {
            self.date_before
        };
        let after = if self.age_max > 0 {
            Some(run_start - self.age_max as i64 * 86400)
        } else {
            self.date_after
        };
        FilterWindow { before, after }
    }
}

/// Result of one parse run: the counters plus the names emitted, in
/// order, for duplicate bookkeeping upstream and synchronisation.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub stats: RunStats,
    pub emitted: Vec<String>,
    /// The scan skipped at least one span with no locatable boundary, so
    /// `emitted` is incomplete and must not drive synchronisation.
    pub partial: bool,
}

pub struct MboxParser {
    options: ParseOptions,
    window_cap: usize,
}

impl MboxParser {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            options,
            window_cap: window::MAX_WINDOW,
        }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Parse one mbox and drive every enabled sink.
    ///
    /// `outdir` is the destination directory as a display string ending
    /// with `/` (or empty when no file sink is enabled); it is created if
    /// missing and handed verbatim to the consumer. Errors returned here
    /// abort this file only; the caller decides what happens to the rest
    /// of the batch.
    pub fn parse(
        &self,
        mbox_path: &Path,
        outdir: &str,
        mut consumer: Option<&mut dyn EmlConsumer>,
    ) -> Result<ParseOutcome> {
        let mbox_name = mbox_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mbox".to_string());

        let mut window = Window::open(mbox_path)?;
        window.set_cap(self.window_cap);
        let input_size = fs::metadata(mbox_path)
            .map(|m| m.len())
            .map_err(|e| Error::io(mbox_path, e))?;

        let out_path = Path::new(outdir);
        if self.options.wants_files() {
            if outdir.is_empty() {
                return Err(Error::Config("output directory is undefined".into()));
            }
            fs::create_dir_all(out_path).map_err(|e| Error::io(out_path, e))?;
        }

        let run_start: DateTime<Local> = Local::now();
        let filter = self.options.filter_window(run_start.timestamp());
        if let Some(after) = filter.after {
            log::info!("applying filter AFTER {}", format_local(after));
        }
        if let Some(before) = filter.before {
            log::info!("applying filter BEFORE {}", format_local(before));
        }

        let mut classifier = Classifier::new(filter, self.options.policy, self.options.compress);
        let mut compact_sink = if self.options.compact {
            match CompactSink::open(out_path, &mbox_name, &run_start.naive_local()) {
                Ok(sink) => Some(sink),
                Err(err) => {
                    log::error!("could not open compact file in {out_path:?}, compact process is aborted: {err}");
                    None
                }
            }
        } else {
            None
        };
        let mut split_sink = self
            .options
            .split_max
            .map(|max| SplitSink::new(out_path, &mbox_name, max, input_size));

        log::info!("start parsing file {mbox_path:?}");

        let mut outcome = ParseOutcome::default();
        loop {
            if window.is_empty() {
                break;
            }
            let separation = match separator::find_separator(&mut window) {
                Ok(separation) => separation,
                // Recoverable: the span with no locatable boundary counts
                // as one unclassifiable message and the scan resumes at
                // the next envelope line.
                Err(Error::ParseOverflow { offset, limit }) => {
                    log::error!(
                        "no message separator within {limit} bytes at offset {offset}, skipping oversized message"
                    );
                    outcome.stats.read += 1;
                    outcome.stats.invalid += 1;
                    outcome.partial = true;
                    if separator::resync(&mut window)? {
                        continue;
                    }
                    break;
                }
                Err(err) => return Err(err),
            };
            if separation.message_len == 0 {
                break;
            }
            {
                let bytes = &window.data()[..separation.message_len];
                let consumer_ref: Option<&mut dyn EmlConsumer> = match consumer {
                    Some(ref mut c) => Some(&mut **c),
                    None => None,
                };
                self.process_message(
                    bytes,
                    &mut classifier,
                    compact_sink.as_mut(),
                    split_sink.as_mut(),
                    consumer_ref,
                    out_path,
                    outdir,
                    &mut outcome,
                );
            }
            window.consume(separation.message_len);
            if separation.is_last {
                break;
            }
        }
        if let Some(split) = &split_sink {
            outcome.stats.split_files = split.files_created();
        }
        drop(compact_sink);
        drop(split_sink);

        if self.options.synchronize && self.options.extract {
            if outcome.partial {
                log::warn!("skipping destination synchronisation after a partial scan");
            } else {
                self.synchronize_destination(out_path, &outcome.emitted, &mut outcome.stats);
            }
        }
        if self.options.wants_files() && util::dir_is_empty(out_path) {
            let _ = fs::remove_dir(out_path);
        }

        log::info!("end parsing and processing file");
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_message(
        &self,
        bytes: &[u8],
        classifier: &mut Classifier,
        compact_sink: Option<&mut CompactSink>,
        split_sink: Option<&mut SplitSink>,
        consumer: Option<&mut dyn EmlConsumer>,
        out_path: &Path,
        outdir: &str,
        outcome: &mut ParseOutcome,
    ) {
        outcome.stats.read += 1;
        let message = Message::parse(bytes);
        let (decision, facets) = classifier.classify(&message);
        outcome.stats.invalid += facets.invalid as usize;
        outcome.stats.deleted += facets.deleted as usize;
        outcome.stats.duplicated += facets.duplicate as usize;

        let filename = match decision {
            Outcome::Accepted { filename, .. } => filename,
            Outcome::ExcludedByDate => {
                outcome.stats.excluded += 1;
                return;
            }
            Outcome::Dropped(_) => return,
        };
        outcome.stats.accepted += 1;
        outcome.emitted.push(filename.clone());

        // Rendered lazily: only the eml sink and the consumer need it.
        let mut payload: Option<Vec<u8>> = None;

        if self.options.extract {
            let target = out_path.join(&filename);
            match render_cached(&mut payload, &message, &self.options) {
                Some(bytes) => match crate::sink::eml::write_eml(&target, bytes) {
                    Ok(crate::sink::eml::EmlWrite::Written) => {
                        outcome.stats.extracted += 1;
                        log::debug!(target: "verbose3", "successfully saved email to {target:?}");
                    }
                    Ok(crate::sink::eml::EmlWrite::AlreadyExists) => {
                        log::debug!(target: "verbose2", "already existing file {target:?}");
                    }
                    Err(err) => {
                        log::debug!(target: "verbose1", "unable to save email to {target:?}: {err}");
                    }
                },
                None => {
                    log::debug!(target: "verbose1", "unable to render email for {target:?}");
                }
            }
        }

        if let Some(sink) = compact_sink {
            if sink.append(bytes) {
                outcome.stats.compact += 1;
            }
        }
        if let Some(sink) = split_sink {
            if sink.append(bytes) {
                outcome.stats.split += 1;
            }
        }

        if let Some(consumer) = consumer {
            if consumer.wants(outdir, &filename) {
                if let Some(bytes) = render_cached(&mut payload, &message, &self.options) {
                    consumer.consume(outdir, &filename, bytes);
                }
            }
        }
    }

    /// Remove destination files that no longer correspond to an emitted
    /// message.
    fn synchronize_destination(&self, out_path: &Path, emitted: &[String], stats: &mut RunStats) {
        let names = match util::list_files(out_path) {
            Ok(names) => names,
            Err(_) => return,
        };
        let live: HashSet<&str> = emitted.iter().map(String::as_str).collect();
        for name in names {
            if live.contains(name.as_str()) {
                continue;
            }
            let stale = out_path.join(&name);
            match fs::remove_file(&stale) {
                Ok(()) => {
                    stats.removed += 1;
                    log::info!("file {stale:?} was deleted");
                }
                Err(err) => log::warn!("can not delete file {stale:?}: {err}"),
            }
        }
    }
}

fn render_cached<'a>(
    payload: &'a mut Option<Vec<u8>>,
    message: &Message,
    options: &ParseOptions,
) -> Option<&'a [u8]> {
    if payload.is_none() {
        match crate::sink::eml::render_payload(message, options.windows_format, options.compress) {
            Ok(bytes) => *payload = Some(bytes),
            Err(_) => return None,
        }
    }
    payload.as_deref()
}

fn format_local(epoch: i64) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%a %b %d %H:%M:%S %Y")
            .to_string(),
        None => epoch.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_window_from_ages() {
        let options = ParseOptions {
            age_min: 10,
            age_max: 30,
            ..Default::default()
        };
        let now = 1_000_000_000;
        let window = options.filter_window(now);
        assert_eq!(window.before, Some(now - 10 * 86400));
        assert_eq!(window.after, Some(now - 30 * 86400));
        // The band between the bounds is kept.
        assert!(!window.excludes(now - 20 * 86400));
        assert!(window.excludes(now - 5 * 86400));
        assert!(window.excludes(now - 40 * 86400));
    }

    #[test]
    fn test_filter_window_from_dates() {
        let options = ParseOptions {
            date_before: Some(100),
            date_after: Some(200),
            ..Default::default()
        };
        let window = options.filter_window(0);
        assert_eq!(window.before, Some(100));
        assert_eq!(window.after, Some(200));
    }

    fn sample_message(id: &str) -> String {
        format!(
            "From alice@example.com Thu Jan 02 15:37:45 2014\n\
From: Alice <alice@example.com>\n\
Date: Thu, 02 Jan 2014 10:00:00 +0000\n\
Message-ID: <{id}>\n\
\n\
body\n"
        )
    }

    #[test]
    fn test_oversized_span_is_skipped_and_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let mbox = tmp.path().join("inbox");
        let mut content = sample_message("first@x");
        content.push_str("From big@x Mon Oct 7 5:37:45 2011\n");
        // Outgrows the first read chunk so the next boundary is not yet
        // resident when the cap is hit.
        content.push_str(&"filler line without boundaries\n".repeat(45_000));
        content.push_str(&sample_message("last@x"));
        fs::write(&mbox, &content).unwrap();

        let parser = MboxParser {
            options: ParseOptions {
                extract: true,
                ..Default::default()
            },
            window_cap: 100_000,
        };
        let out = format!("{}/out/", tmp.path().display());
        let outcome = parser.parse(&mbox, &out, None).unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.stats.read, 3);
        assert_eq!(outcome.stats.invalid, 1);
        assert_eq!(outcome.stats.accepted, 2);
        assert_eq!(outcome.stats.extracted, 2);
        assert_eq!(outcome.emitted.len(), 2);
    }

    #[test]
    fn test_partial_scan_suppresses_destination_sync() {
        let tmp = tempfile::tempdir().unwrap();
        let mbox = tmp.path().join("inbox");
        let mut content = sample_message("only@x");
        content.push_str("From big@x Mon Oct 7 5:37:45 2011\n");
        content.push_str(&"tail without any further boundary\n".repeat(5_000));
        fs::write(&mbox, &content).unwrap();

        let out_dir = tmp.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("stale.eml"), b"old").unwrap();

        let parser = MboxParser {
            options: ParseOptions {
                extract: true,
                synchronize: true,
                ..Default::default()
            },
            window_cap: 100_000,
        };
        let out = format!("{}/", out_dir.display());
        let outcome = parser.parse(&mbox, &out, None).unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.stats.read, 2);
        assert_eq!(outcome.stats.invalid, 1);
        assert_eq!(outcome.stats.accepted, 1);
        // A partial scan must not delete anything from the destination.
        assert_eq!(outcome.stats.removed, 0);
        assert!(out_dir.join("stale.eml").exists());
        assert!(out_dir.join(&outcome.emitted[0]).exists());
    }
}
