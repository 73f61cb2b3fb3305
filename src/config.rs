//! Command line surface and configuration loading.
//!
//! All options can come from the command line or from a configuration
//! file given as the only argument, containing flat `key=value` lines
//! (`true`/`false` for switches). The file is expanded into the
//! equivalent long options and parsed by the same clap definition, so
//! both paths validate identically.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use clap::error::ErrorKind;
use clap::Parser;

use crate::discover::DiscoverOptions;
use crate::error::{Error, Result};
use crate::logging::LogOptions;
use crate::parser::classify::RetentionPolicy;
use crate::parser::ParseOptions;
use crate::remote::crypto::derive_key;
use crate::remote::RemoteOptions;
use crate::util;

#[derive(Parser, Debug)]
#[command(
    name = "mboxport",
    version,
    about = "Extract, compact, split and upload emails from mbox mailboxes",
    after_help = "A configuration file with key=value lines may be given as the only argument."
)]
pub struct Args {
    /// Input mbox file, repeatable.
    #[arg(short, long, value_name = "FILE")]
    pub file: Vec<String>,

    /// Output directory.
    #[arg(short, long, value_name = "DIR", default_value = "")]
    pub output: String,

    /// Base input path; the part of an input file path following it is
    /// replicated below the output directory.
    #[arg(short, long, value_name = "PATH")]
    pub path: Option<String>,

    /// Extract emails to files named 'YYYYmmddHHMMSS_MD5.eml' (or .eml.gz).
    #[arg(short, long)]
    pub extract: bool,

    /// Compact the mbox into a file named 'mboxname_YYYYmmddHHMMSS'.
    #[arg(short, long)]
    pub compact: bool,

    /// Split the mbox into parts of at most N bytes, named 'mboxname.NN'.
    #[arg(short, long, value_name = "N")]
    pub split: Option<u64>,

    /// Discover Mozilla Thunderbird mbox files for the current user.
    #[arg(short, long)]
    pub auto: bool,

    /// Also process the Thunderbird Local Folders directory (with --auto).
    #[arg(long)]
    pub with_localfolders: bool,

    /// User name whose Thunderbird profiles are searched (with --auto).
    #[arg(long, value_name = "USER")]
    pub force_user: Option<String>,

    /// Keep only Thunderbird accounts of this domain (with --auto).
    #[arg(long, value_name = "DOMAIN")]
    pub email_domain: Option<String>,

    /// Comma separated case-insensitive regex list excluding mbox files
    /// from the Thunderbird search (with --auto).
    #[arg(long, value_name = "REGEX")]
    pub source_exclude: Option<String>,

    /// Convert extracted eml files to windows line endings.
    #[arg(short = 'w', long)]
    pub windows_format: bool,

    /// Remove destination files that no longer match an extracted email.
    #[arg(long)]
    pub synchronize: bool,

    /// Gzip extracted eml files and add the '.gz' extension.
    #[arg(short = 'z', long)]
    pub compress: bool,

    /// Retain invalid emails, named '00000000000000_MD5.eml'.
    #[arg(short = 'i', long)]
    pub with_invalid: bool,

    /// Retain duplicated emails.
    #[arg(short = 'x', long)]
    pub with_duplicated: bool,

    /// Retain emails marked deleted via the X-Mozilla-Status headers.
    #[arg(short = 'd', long)]
    pub with_deleted: bool,

    /// Upload endpoint for eml files; requires --key.
    #[arg(short = 'u', long, value_name = "URL")]
    pub url: Option<String>,

    /// Passphrase securing the exchanges with the remote host.
    #[arg(short = 'k', long, value_name = "KEY")]
    pub key: Option<String>,

    /// Select emails older than N days.
    #[arg(long, value_name = "N")]
    pub age_min: Option<u32>,

    /// Select emails younger than N days.
    #[arg(long, value_name = "N")]
    pub age_max: Option<u32>,

    /// Select emails before this date, 'YYYY-MM-DD[ HH:MM:SS]'.
    #[arg(long, value_name = "DATE")]
    pub date_before: Option<String>,

    /// Select emails after this date, same syntax as --date-before.
    #[arg(long, value_name = "DATE")]
    pub date_after: Option<String>,

    /// Remote request timeout in seconds; 0 disables the timeout.
    #[arg(long, value_name = "N", default_value_t = 600)]
    pub timeout: u64,

    /// Maximum upload speed in bytes per second; 0 is unlimited.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub speed_limit: u64,

    /// Verify TLS certificates. Off by default to match existing
    /// deployments of the upload endpoint.
    #[arg(long)]
    pub tls_verify: bool,

    /// Wait N seconds before starting.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub start_wait: u64,

    /// Add a random wait of up to N seconds to --start-wait.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub start_random: u64,

    /// Also write the log to FILE, rotated at 1 MiB.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Number of rotated log files to keep.
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub log_maxfiles: u32,

    /// Per-message log detail, 1..=3 (implies 3 when given bare).
    #[arg(short, long, value_name = "N", num_args = 0..=1, default_missing_value = "3")]
    pub verbose: Option<u8>,

    /// Configuration file with key=value lines.
    #[arg(value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

/// Parse the process arguments, expanding a configuration file when it is
/// the only argument. Help and version exit here.
pub fn load() -> Result<Args> {
    let argv: Vec<String> = std::env::args().collect();
    let result = if argv.len() == 2 && !argv[1].starts_with('-') {
        Args::try_parse_from(expand_config_file(Path::new(&argv[1]))?)
    } else {
        Args::try_parse_from(&argv)
    };
    match result {
        Ok(args) => {
            validate(&args)?;
            Ok(args)
        }
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => Err(Error::Config(err.to_string())),
    }
}

/// Turn `key=value` lines into the equivalent long options.
fn expand_config_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut argv = vec!["mboxport".to_string()];
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, ""),
        };
        if value.is_empty() {
            return Err(Error::Config(format!("empty value for option '{key}'")));
        }
        match value {
            "false" => {}
            "true" => argv.push(format!("--{key}")),
            _ => argv.push(format!("--{key}={value}")),
        }
    }
    Ok(argv)
}

/// Cross-option rules that clap cannot express.
pub fn validate(args: &Args) -> Result<()> {
    let fail = |msg: &str| Err(Error::Config(msg.to_string()));
    if args.config.is_some() {
        return fail("a configuration file must be the only argument");
    }
    if args.file.is_empty() && !args.auto {
        return fail("option 'file' or 'auto' is required");
    }
    if args.split == Some(0) {
        return fail("option 'split' requires a positive value");
    }
    if args.extract && (args.compact || args.split.is_some()) && args.synchronize {
        return fail("option 'extract' is not compatible with 'split' or 'compact' when sync is enabled");
    }
    if args.url.is_some() != args.key.is_some() {
        return fail("options 'url' and 'key' are linked and must both be configured");
    }
    if args.speed_limit > 0 && args.url.is_none() {
        return fail("option 'speed-limit' can not be used without options 'url' and 'key'");
    }
    if args.age_min.is_some() && args.date_before.is_some() {
        return fail("options 'age-min' and 'date-before' can not be specified at the same time");
    }
    if args.age_max.is_some() && args.date_after.is_some() {
        return fail("options 'age-max' and 'date-after' can not be specified at the same time");
    }
    if let Some(level) = args.verbose {
        if !(1..=3).contains(&level) {
            return fail("option 'verbose' requires a value between 1 and 3");
        }
    }
    Ok(())
}

/// Parse a `--date-before`/`--date-after` value as local time.
pub fn parse_filter_date(value: &str) -> Option<i64> {
    let value = value.trim();
    let naive: NaiveDateTime = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y/%m/%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

impl Args {
    pub fn parse_options(&self) -> Result<ParseOptions> {
        let date_before = match &self.date_before {
            Some(raw) => Some(
                parse_filter_date(raw)
                    .ok_or_else(|| Error::Config("'date-before' is not formatted properly".into()))?,
            ),
            None => None,
        };
        let date_after = match &self.date_after {
            Some(raw) => Some(
                parse_filter_date(raw)
                    .ok_or_else(|| Error::Config("'date-after' is not formatted properly".into()))?,
            ),
            None => None,
        };
        Ok(ParseOptions {
            extract: self.extract,
            compress: self.compress,
            compact: self.compact,
            split_max: self.split,
            windows_format: self.windows_format,
            synchronize: self.synchronize,
            policy: RetentionPolicy {
                keep_invalid: self.with_invalid,
                keep_deleted: self.with_deleted,
                keep_duplicated: self.with_duplicated,
            },
            age_min: self.age_min.unwrap_or(0),
            age_max: self.age_max.unwrap_or(0),
            date_before,
            date_after,
        })
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            verbosity: self.verbose.unwrap_or(0),
            log_file: self.log_file.clone(),
            max_files: self.log_maxfiles,
        }
    }

    pub fn remote_options(&self) -> Option<RemoteOptions> {
        let url = self.url.as_ref()?;
        let key = self.key.as_ref()?;
        Some(RemoteOptions {
            url: url.clone(),
            key: derive_key(key),
            timeout: self.timeout,
            speed_limit: self.speed_limit,
            tls_verify: self.tls_verify,
        })
    }

    pub fn discover_options(&self) -> DiscoverOptions {
        let source_exclude = self
            .source_exclude
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        DiscoverOptions {
            force_user: self.force_user.clone(),
            email_domain: self.email_domain.clone(),
            source_exclude,
            with_local_folders: self.with_localfolders,
        }
    }

    /// Input files normalised for processing.
    pub fn input_files(&self) -> Vec<String> {
        self.file.iter().map(|f| util::path_dusting(f)).collect()
    }
}
