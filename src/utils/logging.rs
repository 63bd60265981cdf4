//! Logger bootstrap.
//!
//! Lines go to stderr and, when a log file is configured, are appended to that
//! file as well. `RUST_LOG` directives are layered on top of the configured
//! level so individual modules can still be turned up or down.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use anyhow::{anyhow, Context, Result};

use crate::settings::LoggingConfig;

/// Copies every formatted record to stderr and to the log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create log directory {}", parent.display())
            })?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = config
        .level_filter()
        .ok_or_else(|| anyhow!("unknown log level '{}'", config.level))?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.target(),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = config.file.as_deref() {
        let file = open_log_file(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
    }

    builder
        .try_init()
        .map_err(|err| anyhow!("failed to install logger: {err}"))
}

/// Last `lines` lines of the configured log file. No file configured, or
/// nothing written yet, means no lines.
pub fn tail(config: &LoggingConfig, lines: usize) -> Result<Vec<String>> {
    let Some(path) = config.file.as_deref().filter(|path| path.exists()) else {
        return Ok(Vec::new());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read log file {}", path.display()))?;
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|line| line.to_string()).collect())
}
