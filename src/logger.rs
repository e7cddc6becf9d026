use log::LevelFilter;
use env_logger::{Builder, Target};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use chrono::Local;

/// Copies every log line to stderr and to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
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

pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

/// Installs the process logger. `RUST_LOG` overrides `level`.
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_env("RUST_LOG");

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }

    builder
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    log::info!("Logger initialized.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn tee_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation.log");
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let mut tee = Tee { file };

        tee.write_all(b"first line\n").unwrap();
        tee.write_all(b"second line\n").unwrap();
        tee.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first line\nsecond line\n");
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }
}
