//! Message classification: validity, deletion flags, the date window,
//! duplicate detection and the retention gates.
//!
//! The rules run in a fixed order. Validity needs `From:` and `Date:`
//! present plus a resolvable date. Deletion comes from the Mozilla status
//! headers and never overrides validity. The date window only applies to
//! valid messages that were not already dropped, and retained invalid
//! messages bypass it entirely because their date means nothing.
//! Duplicates are detected last, against the naming keys accepted earlier
//! in the same run.

use std::collections::HashMap;

use super::date::{resolve_date, ResolvedDate};
use super::header::Message;
use super::naming::{eml_filename, md5_hex};

/// `X-Mozilla-Status` bit for an expunged message.
pub const MOZILLA_EXPUNGED: u32 = 0x0008;

/// `X-Mozilla-Status2` bit for an IMAP-deleted message.
pub const MOZILLA_IMAP_DELETED: u32 = 0x8000_0000;

/// Date filter bounds, both optional, as UTC epochs.
///
/// With both bounds set, `after > before` rejects messages inside
/// `[before, after]` (the "keep before X or after Y" shape) while
/// `after < before` rejects messages outside `(after, before)` (the
/// combined age-window shape). Equal bounds disable the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterWindow {
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl FilterWindow {
    pub fn excludes(&self, epoch: i64) -> bool {
        match (self.after, self.before) {
            (None, None) => false,
            (Some(after), None) => epoch <= after,
            (None, Some(before)) => epoch >= before,
            (Some(after), Some(before)) => {
                if after == before {
                    false
                } else if after > before {
                    before <= epoch && epoch <= after
                } else {
                    epoch <= after || epoch >= before
                }
            }
        }
    }
}

/// Which classified categories survive to the sinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    pub keep_invalid: bool,
    pub keep_deleted: bool,
    pub keep_duplicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Normal,
    Invalid,
    Deleted,
    /// k-th duplicate of its naming key.
    Duplicate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Invalid,
    Deleted,
    Duplicate,
}

/// Routing decision for one message.
#[derive(Debug)]
pub enum Outcome {
    Accepted {
        category: Category,
        filename: String,
        date: Option<ResolvedDate>,
    },
    ExcludedByDate,
    Dropped(DropReason),
}

/// Conditions observed on the way to the decision, for the counters.
/// A retained deleted message still counts as deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Facets {
    pub invalid: bool,
    pub deleted: bool,
    pub duplicate: bool,
}

pub struct Classifier {
    filter: FilterWindow,
    policy: RetentionPolicy,
    compress: bool,
    /// Accepted naming keys and how often each was seen.
    seen: HashMap<String, u32>,
}

impl Classifier {
    pub fn new(filter: FilterWindow, policy: RetentionPolicy, compress: bool) -> Self {
        Self {
            filter,
            policy,
            compress,
            seen: HashMap::new(),
        }
    }

    pub fn classify(&mut self, message: &Message) -> (Outcome, Facets) {
        let mut facets = Facets::default();

        let date_raw = message.header_value("Date");
        let from = message.header_value("From");
        let resolved = match (&date_raw, &from) {
            (Some(raw), Some(_)) => resolve_date(message, raw),
            _ => None,
        };
        let deleted = is_deleted(message);

        let mut name = match resolved {
            None => {
                facets.invalid = true;
                if !self.policy.keep_invalid {
                    return (Outcome::Dropped(DropReason::Invalid), facets);
                }
                eml_filename(None, &md5_hex(message.after_envelope()), self.compress)
            }
            Some(date) => {
                if deleted {
                    facets.deleted = true;
                    if !self.policy.keep_deleted {
                        return (Outcome::Dropped(DropReason::Deleted), facets);
                    }
                }
                if self.filter.excludes(date.epoch) {
                    return (Outcome::ExcludedByDate, facets);
                }
                let identity = match message.header_value("Message-ID") {
                    Some(id) => md5_hex(id.as_bytes()),
                    None => md5_hex(message.after_envelope()),
                };
                eml_filename(Some(&date.local), &identity, self.compress)
            }
        };
        if deleted {
            name = format!("del_{name}");
        }

        let previously = self.seen.get(&name).copied().unwrap_or(0);
        if previously > 0 {
            facets.duplicate = true;
            if !self.policy.keep_duplicated {
                return (Outcome::Dropped(DropReason::Duplicate), facets);
            }
        }
        *self.seen.entry(name.clone()).or_insert(0) += 1;

        let filename = if previously > 0 {
            format!("dup{previously}_{name}")
        } else {
            name
        };
        let category = if facets.duplicate {
            Category::Duplicate(previously)
        } else if facets.invalid {
            Category::Invalid
        } else if facets.deleted {
            Category::Deleted
        } else {
            Category::Normal
        };
        (
            Outcome::Accepted {
                category,
                filename,
                date: resolved,
            },
            facets,
        )
    }
}

fn is_deleted(message: &Message) -> bool {
    if let Some(value) = message.field("X-Mozilla-Status") {
        if parse_hex_prefix(&value) & MOZILLA_EXPUNGED != 0 {
            return true;
        }
    }
    if let Some(value) = message.field("X-Mozilla-Status2") {
        if parse_hex_prefix(&value) & MOZILLA_IMAP_DELETED != 0 {
            return true;
        }
    }
    false
}

/// Leading hexadecimal digits of `value`, or zero.
fn parse_hex_prefix(value: &str) -> u32 {
    let end = value
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(value.len());
    u32::from_str_radix(&value[..end], 16).unwrap_or(0)
}
