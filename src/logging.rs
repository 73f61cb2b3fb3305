//! Logger setup: console output through `env_logger`, an optional rotating
//! log file, and the per-message detail channels.
//!
//! Routine messages use the plain `log` macros at error/warn/info. Messages
//! that fire once per processed email are logged at debug level under the
//! targets `verbose1`, `verbose2` and `verbose3` and are only emitted when
//! `-v N` enables that channel (1 = per-message errors, 2 = also skips,
//! 3 = also successes). `RUST_LOG` still works for everything else.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use env_logger::Env;
use log::LevelFilter;

/// A single rotated log file is capped at 1 MiB before rolling.
const MAX_LOG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Per-message detail level, 0..=3.
    pub verbosity: u8,
    pub log_file: Option<PathBuf>,
    pub max_files: u32,
}

/// Install the global logger. Called once from `main`.
pub fn init(options: &LogOptions) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    for level in 1..=options.verbosity.min(3) {
        builder.filter_module(&format!("verbose{level}"), LevelFilter::Debug);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {} {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });
    if let Some(path) = &options.log_file {
        match RollingFile::open(path.clone(), options.max_files) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(Tee::new(file))));
            }
            Err(err) => {
                eprintln!("cannot open log file {path:?}: {err}");
            }
        }
    }
    builder.init();
}

/// Writer that mirrors everything to stderr while appending to the
/// rotating file.
struct Tee {
    file: RollingFile,
}

impl Tee {
    fn new(file: RollingFile) -> Self {
        Self { file }
    }
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Append-only log file that renames itself through a numbered backup
/// chain (`name.log.1` .. `name.log.N`) once it passes the size cap.
struct RollingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_files: u32,
}

impl RollingFile {
    fn open(path: PathBuf, max_files: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_files: max_files.max(1),
        })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for index in (1..self.max_files).rev() {
            let src = if index == 1 {
                self.path.clone()
            } else {
                self.backup_path(index - 1)
            };
            let dst = self.backup_path(index);
            if src.exists() {
                let _ = fs::remove_file(&dst);
                let _ = fs::rename(&src, &dst);
            }
        }
        if self.max_files == 1 {
            let _ = fs::remove_file(&self.path);
        }
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written >= MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
