//! mboxport reads Unix mbox mailboxes, classifies every message
//! (valid, invalid, deleted, duplicated, excluded by date) and emits the
//! selected ones through per-message eml files, a rewritten compact mbox,
//! size-bounded split mboxes and an authenticated encrypted upload, then
//! synchronises the destination with the emitted set.

pub mod config;
pub mod discover;
pub mod error;
pub mod logging;
pub mod parser;
pub mod remote;
pub mod sink;
pub mod util;
