//! End-to-end pipeline tests: parse fixture mboxes through the full
//! driver and check counters, emitted files and synchronisation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use mboxport::parser::classify::RetentionPolicy;
use mboxport::parser::{MboxParser, ParseOptions, ParseOutcome};

fn write_mbox(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn outdir(tmp: &TempDir, name: &str) -> String {
    format!("{}/{}/", tmp.path().display(), name)
}

fn run(options: ParseOptions, mbox: &Path, outdir: &str) -> ParseOutcome {
    MboxParser::new(options).parse(mbox, outdir, None).unwrap()
}

fn message(id: &str, date: &str, extra_headers: &str, body: &str) -> String {
    let mut s = String::from("From alice@example.com Thu Jan 02 15:37:45 2014\n");
    s.push_str("From: Alice <alice@example.com>\n");
    if !date.is_empty() {
        s.push_str(&format!("Date: {date}\n"));
    }
    if !id.is_empty() {
        s.push_str(&format!("Message-ID: <{id}>\n"));
    }
    if !extra_headers.is_empty() {
        s.push_str(extra_headers);
        s.push('\n');
    }
    s.push('\n');
    s.push_str(body);
    s.push('\n');
    s
}

fn extract_options() -> ParseOptions {
    ParseOptions {
        extract: true,
        ..Default::default()
    }
}

#[test]
fn test_deleted_message_skipped_by_default() {
    let tmp = TempDir::new().unwrap();
    let content = format!(
        "{}{}{}",
        message("a@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "one"),
        message("b@x", "Thu, 02 Jan 2014 11:00:00 +0000", "X-Mozilla-Status: 0009", "two"),
        message("c@x", "Thu, 02 Jan 2014 12:00:00 +0000", "", "three"),
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let outcome = run(extract_options(), &mbox, &out);

    assert_eq!(outcome.stats.read, 3);
    assert_eq!(outcome.stats.valid(), 3);
    assert_eq!(outcome.stats.invalid, 0);
    assert_eq!(outcome.stats.deleted, 1);
    assert_eq!(outcome.stats.accepted, 2);
    assert_eq!(outcome.stats.extracted, 2);
    assert_eq!(outcome.emitted.len(), 2);
    let files = fs::read_dir(Path::new(&out)).unwrap().count();
    assert_eq!(files, 2);
}

#[test]
fn test_deleted_message_retained_with_prefix() {
    let tmp = TempDir::new().unwrap();
    let content = message(
        "a@x",
        "Thu, 02 Jan 2014 10:00:00 +0000",
        "X-Mozilla-Status2: 80000000",
        "body",
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        extract: true,
        policy: RetentionPolicy {
            keep_deleted: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);

    assert_eq!(outcome.stats.deleted, 1);
    assert_eq!(outcome.stats.accepted, 1);
    assert!(outcome.emitted[0].starts_with("del_"));
    assert!(Path::new(&out).join(&outcome.emitted[0]).exists());
}

#[test]
fn test_duplicates_with_and_without_retention() {
    let tmp = TempDir::new().unwrap();
    let one = message("abc@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "first copy");
    let content = format!("{one}{one}{one}");
    let mbox = write_mbox(tmp.path(), "inbox", &content);

    // Retained: names carry dup1_/dup2_ prefixes over the same base.
    let out = outdir(&tmp, "kept");
    let options = ParseOptions {
        extract: true,
        policy: RetentionPolicy {
            keep_duplicated: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.read, 3);
    assert_eq!(outcome.stats.duplicated, 2);
    assert_eq!(outcome.stats.accepted, 3);
    assert_eq!(outcome.emitted[1], format!("dup1_{}", outcome.emitted[0]));
    assert_eq!(outcome.emitted[2], format!("dup2_{}", outcome.emitted[0]));
    assert!(outcome.emitted[0].ends_with(".eml"));

    // Dropped: only the first copy survives.
    let out = outdir(&tmp, "dropped");
    let outcome = run(extract_options(), &mbox, &out);
    assert_eq!(outcome.stats.duplicated, 2);
    assert_eq!(outcome.stats.accepted, 1);
    assert_eq!(outcome.stats.extracted, 1);
}

#[test]
fn test_compact_is_byte_identical_for_fully_accepted_input() {
    let tmp = TempDir::new().unwrap();
    let content = format!(
        "{}{}",
        message("a@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "one\nwith lines"),
        message("b@x", "Fri, 03 Jan 2014 11:00:00 +0000", "", "two"),
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        compact: true,
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.compact, 2);

    let compact_file = fs::read_dir(Path::new(&out))
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_string_lossy().starts_with("inbox_"))
        .expect("compact file present");
    assert_eq!(fs::read(compact_file).unwrap(), content.as_bytes());
}

#[test]
fn test_split_parts_respect_max_bytes() {
    let tmp = TempDir::new().unwrap();
    let mut content = String::new();
    for i in 0..6 {
        content.push_str(&message(
            &format!("m{i}@x"),
            "Thu, 02 Jan 2014 10:00:00 +0000",
            "",
            "0123456789",
        ));
    }
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        split_max: Some(400),
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.split, 6);
    assert!(outcome.stats.split_files >= 2);
    for entry in fs::read_dir(Path::new(&out)).unwrap() {
        let entry = entry.unwrap();
        assert!(entry.metadata().unwrap().len() <= 400);
        assert!(entry
            .file_name()
            .to_string_lossy()
            .starts_with("inbox."));
    }
}

#[test]
fn test_oversize_message_disables_split() {
    let tmp = TempDir::new().unwrap();
    let content = message(
        "big@x",
        "Thu, 02 Jan 2014 10:00:00 +0000",
        "",
        &"x".repeat(4096),
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        split_max: Some(512),
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.split, 0);
    assert_eq!(outcome.stats.split_files, 0);
    assert_eq!(outcome.stats.accepted, 1);
}

#[test]
fn test_extract_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let content = format!(
        "{}{}",
        message("a@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "one"),
        message("b@x", "Fri, 03 Jan 2014 11:00:00 +0000", "", "two"),
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        extract: true,
        synchronize: true,
        ..Default::default()
    };
    let first = run(options.clone(), &mbox, &out);
    assert_eq!(first.stats.extracted, 2);
    assert_eq!(first.stats.removed, 0);

    let second = run(options, &mbox, &out);
    assert_eq!(second.stats.extracted, 0);
    assert_eq!(second.stats.removed, 0);
    assert_eq!(second.emitted, first.emitted);
}

#[test]
fn test_synchronize_removes_stale_files() {
    let tmp = TempDir::new().unwrap();
    let content = message("a@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "one");
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");
    fs::create_dir_all(Path::new(&out)).unwrap();
    fs::write(Path::new(&out).join("stale.eml"), b"old").unwrap();

    let options = ParseOptions {
        extract: true,
        synchronize: true,
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.removed, 1);
    assert!(!Path::new(&out).join("stale.eml").exists());
    assert!(Path::new(&out).join(&outcome.emitted[0]).exists());
}

#[test]
fn test_body_from_line_does_not_split() {
    let tmp = TempDir::new().unwrap();
    let content = message(
        "a@x",
        "Thu, 02 Jan 2014 10:00:00 +0000",
        "",
        "From the beginning this line looks dangerous\nbut is body text",
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let outcome = run(extract_options(), &mbox, &out);
    assert_eq!(outcome.stats.read, 1);
    assert_eq!(outcome.stats.accepted, 1);

    let eml = fs::read(Path::new(&out).join(&outcome.emitted[0])).unwrap();
    assert!(String::from_utf8_lossy(&eml).contains("From the beginning"));
}

#[test]
fn test_single_message_without_trailing_newline() {
    let tmp = TempDir::new().unwrap();
    let content = "From a@b Thu Jan 02 15:37:45 2014\nFrom: A <a@b>\nDate: Thu, 02 Jan 2014 10:00:00 +0000\n\nno final newline";
    let mbox = write_mbox(tmp.path(), "inbox", content);
    let out = outdir(&tmp, "out");

    let outcome = run(extract_options(), &mbox, &out);
    assert_eq!(outcome.stats.read, 1);
    assert_eq!(outcome.stats.accepted, 1);

    let eml = fs::read(Path::new(&out).join(&outcome.emitted[0])).unwrap();
    assert!(eml.ends_with(b"no final newline"));
}

#[test]
fn test_windows_format_rewrites_line_endings() {
    let tmp = TempDir::new().unwrap();
    let content = message("a@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "line one\nline two");
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        extract: true,
        windows_format: true,
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    let eml = fs::read(Path::new(&out).join(&outcome.emitted[0])).unwrap();
    let text = String::from_utf8(eml).unwrap();
    assert!(text.contains("line one\r\nline two\r\n"));
    assert!(!text.replace("\r\n", "").contains('\r'));
}

#[test]
fn test_date_window_rejects_between_bounds() {
    let tmp = TempDir::new().unwrap();
    let content = format!(
        "{}{}{}",
        message("old@x", "Sun, 01 Dec 2019 12:00:00 +0000", "", "kept, before the window"),
        message("mid@x", "Mon, 01 Jun 2020 12:00:00 +0000", "", "excluded, inside"),
        message("new@x", "Sat, 01 Jan 2022 12:00:00 +0000", "", "kept, after the window"),
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        extract: true,
        date_before: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap().timestamp()),
        date_after: Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap().timestamp()),
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.read, 3);
    assert_eq!(outcome.stats.excluded, 1);
    assert_eq!(outcome.stats.accepted, 2);
}

#[test]
fn test_invalid_messages_counted_and_optionally_kept() {
    let tmp = TempDir::new().unwrap();
    let content = format!(
        "{}{}",
        message("a@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "valid"),
        message("", "", "", "no date header at all"),
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);

    let out = outdir(&tmp, "dropped");
    let outcome = run(extract_options(), &mbox, &out);
    assert_eq!(outcome.stats.read, 2);
    assert_eq!(outcome.stats.invalid, 1);
    assert_eq!(outcome.stats.valid(), 1);
    assert_eq!(outcome.stats.accepted, 1);

    let out = outdir(&tmp, "kept");
    let options = ParseOptions {
        extract: true,
        policy: RetentionPolicy {
            keep_invalid: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.accepted, 2);
    assert!(outcome
        .emitted
        .iter()
        .any(|name| name.starts_with("00000000000000_")));
}

#[test]
fn test_invalid_messages_bypass_date_window() {
    let tmp = TempDir::new().unwrap();
    let content = message("", "", "", "never excluded");
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let options = ParseOptions {
        extract: true,
        policy: RetentionPolicy {
            keep_invalid: true,
            ..Default::default()
        },
        // A window that would exclude everything with a date.
        date_after: Some(i64::MAX - 1),
        ..Default::default()
    };
    let outcome = run(options, &mbox, &out);
    assert_eq!(outcome.stats.excluded, 0);
    assert_eq!(outcome.stats.accepted, 1);
}

#[test]
fn test_extracted_eml_reparses_to_same_identity() {
    let tmp = TempDir::new().unwrap();
    let content = message("stable@x", "Thu, 02 Jan 2014 10:00:00 +0000", "", "payload");
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "first");

    let outcome = run(extract_options(), &mbox, &out);
    let name = outcome.emitted[0].clone();
    let eml = fs::read(Path::new(&out).join(&name)).unwrap();

    // Re-wrap the extracted eml in an envelope and parse it again.
    let mut rewrapped = b"From alice@example.com Thu Jan 02 15:37:45 2014\n".to_vec();
    rewrapped.extend_from_slice(&eml);
    let second_mbox = tmp.path().join("rewrapped");
    fs::write(&second_mbox, &rewrapped).unwrap();

    let out2 = outdir(&tmp, "second");
    let outcome2 = run(extract_options(), &second_mbox, &out2);
    assert_eq!(outcome2.emitted, vec![name]);
}

#[test]
fn test_empty_output_directory_is_removed() {
    let tmp = TempDir::new().unwrap();
    // Only a deleted message: nothing is written, so the directory goes.
    let content = message(
        "a@x",
        "Thu, 02 Jan 2014 10:00:00 +0000",
        "X-Mozilla-Status: 0008",
        "body",
    );
    let mbox = write_mbox(tmp.path(), "inbox", &content);
    let out = outdir(&tmp, "out");

    let outcome = run(extract_options(), &mbox, &out);
    assert_eq!(outcome.stats.accepted, 0);
    assert!(!Path::new(&out).exists());
}

#[test]
fn test_not_an_mbox_fails_fast() {
    let tmp = TempDir::new().unwrap();
    let path = write_mbox(tmp.path(), "notes.txt", "just some text\n");
    let out = outdir(&tmp, "out");

    let err = MboxParser::new(extract_options())
        .parse(&path, &out, None)
        .unwrap_err();
    assert!(matches!(err, mboxport::error::Error::NotAnMbox(_)));
    assert!(!Path::new(&out).exists());
}

#[test]
fn test_crlf_mbox_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let content = "From a@b Thu Jan 02 15:37:45 2014\r\nFrom: A <a@b>\r\nDate: Thu, 02 Jan 2014 10:00:00 +0000\r\nMessage-ID: <crlf@x>\r\n\r\nwindows body\r\n";
    let mbox = write_mbox(tmp.path(), "inbox", content);
    let out = outdir(&tmp, "out");

    let outcome = run(extract_options(), &mbox, &out);
    assert_eq!(outcome.stats.accepted, 1);
    let eml = fs::read(Path::new(&out).join(&outcome.emitted[0])).unwrap();
    assert!(eml.starts_with(b"From: A <a@b>\r\n"));
    assert!(eml.ends_with(b"windows body\r\n"));
}
