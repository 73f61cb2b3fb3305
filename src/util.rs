//! Small filesystem and formatting helpers shared across the pipeline.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Normalise a path string: backslashes become `/` and runs of `//`
/// collapse to a single separator.
pub fn path_dusting(path: &str) -> String {
    let mut dusted = path.replace('\\', "/");
    while dusted.contains("//") {
        dusted = dusted.replace("//", "/");
    }
    dusted
}

/// Normalise a directory string and guarantee a trailing `/`.
/// An empty input stays empty.
pub fn dir_with_slash(path: &str) -> String {
    let mut dusted = path_dusting(path);
    if !dusted.is_empty() && !dusted.ends_with('/') {
        dusted.push('/');
    }
    dusted
}

/// Names of the plain files directly inside `dir`, no recursion.
pub fn list_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

/// True when `dir` exists and contains no entries at all.
pub fn dir_is_empty(dir: &Path) -> bool {
    match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}

/// Every subdirectory below `dir`, depth first, `dir` itself excluded.
pub fn list_subdirs_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return dirs,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path.clone());
            dirs.extend(list_subdirs_recursive(&path));
        }
    }
    dirs
}

/// Remove every empty directory below `dir`, children before parents.
pub fn remove_empty_dirs(dir: &Path) {
    let mut subdirs = list_subdirs_recursive(dir);
    subdirs.sort();
    subdirs.reverse();
    for sub in subdirs {
        if dir_is_empty(&sub) {
            let _ = fs::remove_dir(&sub);
        }
    }
}

/// Render a byte count as `B`, `KB`, `MB`, `GB`, `TB` with two decimals.
pub fn human_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    let units = [(KB * KB * KB * KB, "TB"), (KB * KB * KB, "GB"), (KB * KB, "MB"), (KB, "KB")];
    for (scale, unit) in units {
        if bytes >= scale {
            return format!("{:.2} {}", (bytes / scale * 100.0).floor() / 100.0, unit);
        }
    }
    format!("{} B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_dusting() {
        assert_eq!(path_dusting("a\\b\\c"), "a/b/c");
        assert_eq!(path_dusting("a//b///c"), "a/b/c");
        assert_eq!(path_dusting("already/clean"), "already/clean");
    }

    #[test]
    fn test_dir_with_slash() {
        assert_eq!(dir_with_slash("out"), "out/");
        assert_eq!(dir_with_slash("out/"), "out/");
        assert_eq!(dir_with_slash(""), "");
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512.0), "512 B");
        assert_eq!(human_bytes(2048.0), "2.00 KB");
        assert_eq!(human_bytes(3.5 * 1024.0 * 1024.0), "3.50 MB");
    }

    #[test]
    fn test_remove_empty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let keep = tmp.path().join("keep");
        let empty = tmp.path().join("a/b/c");
        fs::create_dir_all(&keep).unwrap();
        fs::create_dir_all(&empty).unwrap();
        fs::write(keep.join("file"), b"x").unwrap();

        remove_empty_dirs(tmp.path());

        assert!(keep.exists());
        assert!(!tmp.path().join("a").exists());
    }
}
