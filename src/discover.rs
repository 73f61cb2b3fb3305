//! Thunderbird mailbox discovery.
//!
//! Walks the current (or forced) user's Thunderbird installation:
//! `profiles.ini` names the profiles, each profile's `prefs.js` names the
//! identities, their accounts and the on-disk mail directories. Every
//! POP/local account becomes one [`MailboxGroup`] whose label encodes the
//! destination subtree `user/profile/email`.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::{escape, Regex, RegexBuilder};

use crate::util;

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Substitute this user name into the home directory path.
    pub force_user: Option<String>,
    /// Keep only identities whose address ends with this domain.
    pub email_domain: Option<String>,
    /// Case-insensitive regexes matched against the account-relative mbox
    /// path; matching files are skipped.
    pub source_exclude: Vec<String>,
    /// Also process the profile's Local Folders directory.
    pub with_local_folders: bool,
}

/// One discovered account directory and the mboxes below it.
#[derive(Debug, Clone)]
pub struct MailboxGroup {
    /// Destination subtree, `user/profile/email`.
    pub label: String,
    /// Account directory the mbox paths are relative to.
    pub root: String,
    /// Full mbox paths, sorted case-insensitively.
    pub mboxes: Vec<String>,
}

/// Discover all Thunderbird mboxes for the selected user.
pub fn discover_thunderbird(options: &DiscoverOptions) -> Vec<MailboxGroup> {
    let Some((user, userpath)) = resolve_user(options.force_user.as_deref()) else {
        return Vec::new();
    };
    let Some(tbpath) = thunderbird_path(&userpath) else {
        return Vec::new();
    };

    let excluded = compile_excludes(&options.source_exclude);

    let profiles = read_profiles(Path::new(&format!("{tbpath}/profiles.ini")));
    if profiles.is_empty() {
        log::error!("no Mozilla Thunderbird profiles found");
        return Vec::new();
    }

    let mut groups = Vec::new();
    for profile in profiles {
        log::info!("found profile \"{profile}\"");
        let profile_dir = format!("{tbpath}/{profile}");
        let profile_name = profile.rsplit('/').next().unwrap_or(&profile).to_string();
        let local_folders_dir = format!("{profile_dir}/Mail/Local Folders");

        let prefs = read_lines(Path::new(&format!("{profile_dir}/prefs.js")));
        let mut accounts_done: HashMap<String, String> = HashMap::new();
        let mut local_folders_done = false;

        for identity in identities(&prefs, options.email_domain.as_deref()) {
            let Some(account) = account_for_identity(&prefs, &identity.id) else {
                continue;
            };
            if let Some(first) = accounts_done.get(&account) {
                log::warn!(
                    "ignore \"{}\" account because merged with \"{first}\"",
                    identity.email
                );
                continue;
            }
            let Some(mut server) = server_for_account(&prefs, &account) else {
                continue;
            };
            match server_type(&prefs, &server) {
                Some(kind) if kind == "imap" => {
                    log::warn!(
                        "account \"{}\" is ignored because it has an imap type",
                        identity.email
                    );
                    continue;
                }
                Some(_) => {}
                None => continue,
            }
            // Storage deferred to another account, typically Local Folders.
            if let Some(deferred) = first_capture(
                &prefs,
                &format!(r#""mail\.server\.{}\.deferred_to_account",.* "(.*)""#, escape(&server)),
            ) {
                match server_for_account(&prefs, &deferred) {
                    Some(target) => server = target,
                    None => continue,
                }
            }
            let Some(directory_rel) = first_capture(
                &prefs,
                &format!(r#""mail\.server\.{}\.directory-rel",.* "(.*)""#, escape(&server)),
            ) else {
                continue;
            };
            let account_dir = util::path_dusting(&directory_rel)
                .replace("[ProfD]", &format!("{profile_dir}/"));

            log::info!("found account \"{}\"", identity.email);
            accounts_done.insert(account, identity.email.clone());

            if account_dir == local_folders_dir {
                local_folders_done = true;
                if options.with_local_folders {
                    log::info!(
                        "\"Local folders\" is merged with \"{}\" account",
                        identity.email
                    );
                }
            }

            let label = format!("{user}/{profile_name}/{}", identity.email);
            groups.push(collect_group(label, &account_dir, &excluded));
        }

        if options.with_local_folders && !local_folders_done {
            let label = format!("{user}/{profile_name}/Local Folders");
            groups.push(collect_group(label, &local_folders_dir, &excluded));
            log::info!("\"Local folders\" is processed separately");
        }
    }

    groups.retain(|g| !g.mboxes.is_empty());
    groups
}

/// True when the file starts with the literal `From ` prefix.
pub fn is_mbox_file(path: &Path) -> bool {
    let mut prefix = [0u8; 5];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut prefix)) {
        Ok(()) => &prefix == b"From ",
        Err(_) => false,
    }
}

struct Identity {
    id: String,
    email: String,
}

fn identities(prefs: &[String], domain: Option<&str>) -> Vec<Identity> {
    let domain = domain.unwrap_or("");
    let Some(re) = build_regex(&format!(
        r#""mail\.identity\.(.*)\.useremail",.* "(.*)@(.*){}""#,
        escape(domain)
    )) else {
        return Vec::new();
    };
    prefs
        .iter()
        .filter_map(|line| re.captures(line))
        .map(|caps| Identity {
            id: caps[1].to_string(),
            email: format!("{}@{}{}", &caps[2], &caps[3], domain),
        })
        .collect()
}

fn account_for_identity(prefs: &[String], id: &str) -> Option<String> {
    // An account can list several identities, "id1,id2".
    first_capture(
        prefs,
        &format!(r#""mail\.account\.(.*)\.identities",.* "(?:.*,)?{}(?:,.*)?""#, escape(id)),
    )
}

fn server_for_account(prefs: &[String], account: &str) -> Option<String> {
    first_capture(
        prefs,
        &format!(r#""mail\.account\.{}\.server",.* "(.*)""#, escape(account)),
    )
}

fn server_type(prefs: &[String], server: &str) -> Option<String> {
    first_capture(
        prefs,
        &format!(r#""mail\.server\.{}\.type",.* "(.*)""#, escape(server)),
    )
}

fn collect_group(label: String, root: &str, excluded: &[Regex]) -> MailboxGroup {
    let root = util::path_dusting(root);
    let root_path = PathBuf::from(&root);
    let mut dirs = vec![root_path.clone()];
    dirs.extend(util::list_subdirs_recursive(&root_path));

    let mut mboxes = Vec::new();
    for dir in dirs {
        for file in util::list_files(&dir).unwrap_or_default() {
            let full = dir.join(&file);
            if !is_mbox_file(&full) {
                continue;
            }
            let full = util::path_dusting(&full.to_string_lossy());
            let relative = full
                .strip_prefix(&format!("{root}/"))
                .unwrap_or(&full)
                .to_string();
            if excluded.iter().any(|re| re.is_match(&relative)) {
                log::warn!("ignore mbox file \"{full}\"");
                continue;
            }
            mboxes.push(full);
        }
    }
    mboxes.sort_by_key(|name| name.to_lowercase());
    MailboxGroup {
        label,
        root,
        mboxes,
    }
}

fn resolve_user(force_user: Option<&str>) -> Option<(String, String)> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    let home = util::path_dusting(&home);
    let pos = home.rfind('/')?;
    let userpath = match force_user {
        Some(user) => format!("{}{user}", &home[..pos + 1]),
        None => home,
    };
    let user = userpath[userpath.rfind('/')? + 1..].to_string();
    if !Path::new(&userpath).is_dir() {
        return None;
    }
    Some((user, userpath))
}

fn thunderbird_path(userpath: &str) -> Option<String> {
    let candidates: &[String] = &if cfg!(windows) {
        [
            format!("{userpath}/AppData/Roaming/Thunderbird"),
            format!("{userpath}/Application Data/Thunderbird"),
        ]
    } else {
        [format!("{userpath}/.thunderbird"), String::new()]
    };
    candidates
        .iter()
        .find(|p| !p.is_empty() && Path::new(p).is_dir())
        .cloned()
}

fn read_profiles(ini_path: &Path) -> Vec<String> {
    let content = match fs::read_to_string(ini_path) {
        Ok(content) => content,
        Err(_) => {
            log::error!("no Mozilla Thunderbird profiles.ini file found");
            return Vec::new();
        }
    };
    let mut profiles = Vec::new();
    let mut in_profile_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') && line.ends_with(']') {
            let section = &line[1..line.len() - 1];
            in_profile_section = section.to_ascii_lowercase().starts_with("profile");
        } else if in_profile_section {
            if let Some(value) = line.strip_prefix("Path=") {
                profiles.push(value.to_string());
            }
        }
    }
    profiles
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn first_capture(lines: &[String], pattern: &str) -> Option<String> {
    let re = build_regex(pattern)?;
    lines
        .iter()
        .find_map(|line| re.captures(line))
        .map(|caps| caps[1].to_string())
}

fn build_regex(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            log::warn!("invalid discovery pattern {pattern:?}: {err}");
            None
        }
    }
}

fn compile_excludes(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            match RegexBuilder::new(&format!("^(?:{p})$"))
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Some(re),
                Err(err) => {
                    log::warn!("invalid source-exclude pattern {p:?}: {err}");
                    None
                }
            }
        })
        .collect()
}
