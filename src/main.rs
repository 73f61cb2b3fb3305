//! Batch driver: load options, walk the mbox list (given or discovered),
//! parse each file through the pipeline and reconcile the destinations.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::Rng;

use mboxport::config::{self, Args};
use mboxport::discover::{self, MailboxGroup};
use mboxport::error::{Error, Result};
use mboxport::logging;
use mboxport::parser::stats::RunStats;
use mboxport::parser::{MboxParser, ParseOutcome};
use mboxport::remote::{RemoteClient, SyncKind, UploadSink};
use mboxport::sink::EmlConsumer;
use mboxport::util;

fn main() {
    let args = match config::load() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error parsing options: {err}");
            eprintln!("try --help for usage information");
            std::process::exit(1);
        }
    };
    logging::init(&args.log_options());

    if let Err(err) = run(&args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    start_delay(args);

    log::info!("STARTING mboxport");
    if args.speed_limit > 0 {
        log::info!(
            "maximum speed to upload files is set to {} B/s",
            args.speed_limit
        );
    }

    let options = args.parse_options()?;
    let parser = MboxParser::new(options);

    let mut groups: Vec<MailboxGroup> = Vec::new();
    if !args.file.is_empty() {
        groups.push(MailboxGroup {
            label: String::new(),
            root: args.path.clone().map(|p| util::path_dusting(&p)).unwrap_or_default(),
            mboxes: args.input_files(),
        });
    }
    if args.auto {
        log::info!("searching for Mozilla Thunderbird profiles");
        let found = discover::discover_thunderbird(&args.discover_options());
        if found.is_empty() {
            log::error!("no Mozilla Thunderbird mbox files found");
        }
        groups.extend(found);
    }

    let remote = match args.remote_options() {
        Some(remote_options) => Some(RemoteClient::connect(remote_options)?),
        None => None,
    };

    let wants_files = args.extract || args.compact || args.split.is_some();
    let mut totals = RunStats::default();
    let mut total_mbox = 0usize;
    let mut total_compact_files = 0usize;
    let mut total_uploads_succeeded = 0usize;
    let mut total_uploads_failed = 0usize;
    let mut labeled_outdirs: Vec<String> = Vec::new();

    for group in &groups {
        for mbox in &group.mboxes {
            let (infile, outdir, group_base) = resolve_paths(args, group, mbox);
            log::info!("INPUT FILE is \"{infile}\"");
            if outdir.is_empty() {
                log::info!("OUTPUT DIRECTORY is undefined");
            } else {
                log::info!("OUTPUT DIRECTORY is \"{outdir}\"");
            }

            // Per-file remote setup: health check, then the preflight
            // list of names the server already holds.
            let mut upload: Option<UploadSink> = None;
            let mut remote_ok = false;
            if let Some(client) = &remote {
                match client.is_available() {
                    Ok(true) => {
                        log::info!("remote connection to \"{}\" ready", client.url());
                        let known = match client.list_remote(&outdir) {
                            Ok(known) => known,
                            Err(err) => {
                                log::warn!("could not fetch the remote file list: {err}");
                                HashSet::new()
                            }
                        };
                        upload = Some(UploadSink::new(client, known));
                        remote_ok = true;
                    }
                    Ok(false) => {
                        log::error!("remote connection to \"{}\" unavailable", client.url());
                        if !wants_files {
                            continue;
                        }
                    }
                    Err(err) => {
                        log::error!(
                            "remote connection to \"{}\" unavailable: {err}",
                            client.url()
                        );
                        if !wants_files {
                            continue;
                        }
                    }
                }
            }

            total_mbox += 1;
            let mut parse_failed = false;
            let outcome = match parser.parse(
                Path::new(&infile),
                &outdir,
                upload.as_mut().map(|u| u as &mut dyn EmlConsumer),
            ) {
                Ok(outcome) => outcome,
                Err(Error::NotAnMbox(path)) => {
                    log::error!("input file is not mbox type: {path:?}");
                    continue;
                }
                Err(err) => {
                    log::error!("parse failure for \"{infile}\": {err}");
                    parse_failed = true;
                    ParseOutcome::default()
                }
            };

            if wants_files && !group_base.is_empty() {
                util::remove_empty_dirs(Path::new(&group_base));
            }

            // Remember which labelled destinations are still live; a
            // failed or partial parse keeps its directory so nothing
            // already exported gets thrown away.
            if (outcome.stats.accepted > 0 || parse_failed || outcome.partial)
                && !group.label.is_empty()
                && (args.extract || remote.is_some())
            {
                labeled_outdirs.push(outdir.clone());
            }

            log_summary(args, &outcome.stats, upload.as_ref());
            totals.merge(&outcome.stats);
            if args.compact {
                total_compact_files += 1;
            }
            if let Some(sink) = &upload {
                total_uploads_succeeded += sink.succeeded;
                total_uploads_failed += sink.failed;
            }

            if remote_ok && args.synchronize && !parse_failed && !outcome.partial {
                if let Some(client) = &remote {
                    log::info!("syncing files to \"{}\"", client.url());
                    match client.send_sync_list(SyncKind::Files, &outdir, &outcome.emitted) {
                        Ok(()) => log::info!("synchronization done"),
                        Err(err) => log::error!("synchronization not completed: {err}"),
                    }
                }
            }
        }
    }

    if args.synchronize && !labeled_outdirs.is_empty() {
        sync_directory_tree(args, remote.as_ref(), &labeled_outdirs);
    }

    if total_mbox > 1 {
        log::info!("summary of the {total_mbox} mbox files processed:");
        log::info!("-> {} available / {} found", totals.accepted, totals.read);
        log::info!("-> invalid = {}", totals.invalid);
        log::info!("-> deleted = {}", totals.deleted);
        log::info!("-> duplicated = {}", totals.duplicated);
        log::info!("-> excluded = {}", totals.excluded);
        if args.extract {
            if args.compress {
                log::info!("-> extracted to eml.gz = {}", totals.extracted);
            } else {
                log::info!("-> extracted to eml = {}", totals.extracted);
            }
            if args.synchronize {
                log::info!("-> removed from destination = {}", totals.removed);
            }
        }
        if args.compact {
            log::info!(
                "-> emails in {} compact files = {}",
                total_compact_files,
                totals.compact
            );
        }
        if args.split.is_some() {
            log::info!("-> emails in split files = {}", totals.split);
            log::info!("-> number of split files = {}", totals.split_files);
        }
        if remote.is_some() {
            log::info!("-> uploads succeed = {total_uploads_succeeded}");
            log::info!("-> uploads failed = {total_uploads_failed}");
        }
    }
    log::info!("ENDING mboxport");
    Ok(())
}

fn start_delay(args: &Args) {
    if args.start_wait == 0 && args.start_random == 0 {
        return;
    }
    let jitter = if args.start_random > 0 {
        rand::thread_rng().gen_range(0..=args.start_random)
    } else {
        0
    };
    let wait = args.start_wait + jitter;
    eprintln!("Waiting {wait} seconds before start...");
    std::thread::sleep(Duration::from_secs(wait));
}

/// Compute the input path and destination directory for one mbox.
///
/// Discovered groups map each mbox below the account root to
/// `<output>/<label>/<relative path>` with `.sbd/` components collapsed;
/// `--file` inputs combined with `--path` replicate the path suffix below
/// the output directory. The returned `group_base` is the directory the
/// empty-directory cleanup starts from.
fn resolve_paths(args: &Args, group: &MailboxGroup, mbox: &str) -> (String, String, String) {
    let mut outdir_final = args.output.clone();
    if !group.label.is_empty() {
        if !outdir_final.is_empty() && !outdir_final.ends_with('/') {
            outdir_final.push('/');
        }
        outdir_final.push_str(&group.label);
    }

    let mut infile = util::path_dusting(mbox);
    let mut outdir = outdir_final.clone();
    if !group.root.is_empty() {
        match mbox.find(&group.root) {
            Some(pos) => {
                outdir = format!("{outdir_final}/{}", &mbox[pos + group.root.len()..]);
            }
            None => {
                infile = format!("{}/{mbox}", group.root);
                outdir = format!("{outdir_final}/{mbox}");
            }
        }
    }
    if !group.label.is_empty() {
        outdir = outdir.replace(".sbd/", "/");
    }
    (
        infile,
        util::dir_with_slash(&outdir),
        util::path_dusting(&outdir_final),
    )
}

fn log_summary(args: &Args, stats: &RunStats, upload: Option<&UploadSink>) {
    log::info!("summary:");
    log::info!("-> {} available / {} found", stats.accepted, stats.read);
    log::info!("-> invalid = {}", stats.invalid);
    log::info!("-> deleted = {}", stats.deleted);
    log::info!("-> duplicated = {}", stats.duplicated);
    log::info!("-> excluded = {}", stats.excluded);
    if args.extract {
        if args.compress {
            log::info!("-> extracted to eml.gz = {}", stats.extracted);
        } else {
            log::info!("-> extracted to eml = {}", stats.extracted);
        }
        if args.synchronize {
            log::info!("-> removed from destination = {}", stats.removed);
        }
    }
    if args.compact {
        log::info!("-> emails in compact file = {}", stats.compact);
    }
    if args.split.is_some() {
        log::info!("-> emails in split files = {}", stats.split);
        log::info!("-> number of split files = {}", stats.split_files);
    }
    if let Some(sink) = upload {
        log::info!("-> uploads succeed = {}", sink.succeeded);
        log::info!("-> uploads failed = {}", sink.failed);
    }
}

/// After a discovered run with `--synchronize`, drop destination
/// directories that no longer correspond to a live account: tell the
/// server (when uploading) and clean the local tree (when extracting),
/// children before parents.
fn sync_directory_tree(args: &Args, remote: Option<&RemoteClient>, labeled: &[String]) {
    let first = &labeled[0];
    let start = args.output.len() + 1;
    let base = if first.len() > start {
        match first[start..].find('/') {
            Some(pos) => first[..start + pos].to_string(),
            None => first.clone(),
        }
    } else {
        first.clone()
    };

    if let Some(client) = remote {
        log::info!("syncing directories to \"{}\"", client.url());
        match client.send_sync_list(SyncKind::Directories, &base, labeled) {
            Ok(()) => log::info!("synchronization done"),
            Err(err) => log::error!("synchronization not completed: {err}"),
        }
    }

    if !args.extract {
        return;
    }
    let base_path = Path::new(base.trim_end_matches('/'));
    let mut all_dirs = vec![util::dir_with_slash(&base)];
    all_dirs.extend(
        util::list_subdirs_recursive(base_path)
            .iter()
            .map(|p| util::dir_with_slash(&p.to_string_lossy())),
    );

    let live: HashSet<&str> = labeled.iter().map(String::as_str).collect();
    let mut to_remove: Vec<String> = all_dirs
        .into_iter()
        .filter(|dir| !live.contains(dir.as_str()))
        .filter(|dir| !labeled.iter().any(|l| l.starts_with(dir.as_str())))
        .collect();
    to_remove.sort();
    to_remove.reverse();

    for dir in to_remove {
        let path = Path::new(dir.trim_end_matches('/'));
        if let Ok(files) = util::list_files(path) {
            for file in files {
                let _ = fs::remove_file(path.join(file));
            }
        }
        match fs::remove_dir(path) {
            Ok(()) => log::info!("directory \"{dir}\" was deleted"),
            Err(err) => log::warn!("can not delete directory \"{dir}\": {err}"),
        }
    }
}
