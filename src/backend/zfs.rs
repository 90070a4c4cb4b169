//! `zfs` adapter for snapshots and send streams.

use anyhow::{bail, Context, Result};
use std::io::{self, Read, Write};

use super::BlockStorage;
use crate::process::Cmd;

#[derive(Debug, Clone)]
pub struct Zfs {
    program: String,
}

impl Zfs {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Zfs {
    fn default() -> Self {
        Self::new("zfs")
    }
}

impl BlockStorage for Zfs {
    fn snapshot(&self, snapshot: &str) -> Result<()> {
        Cmd::new(&self.program)
            .args(["snapshot", snapshot])
            .run()
            .with_context(|| format!("creating snapshot {snapshot}"))?;
        Ok(())
    }

    fn send(&self, snapshot: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut child = Cmd::new(&self.program)
            .args(["send", snapshot])
            .spawn_piped()?;

        let mut stdout = child.stdout.take().context("Failed to capture zfs send stdout")?;
        let mut stderr = child.stderr.take().context("Failed to capture zfs send stderr")?;

        // Drain stderr on its own thread so a chatty child can't block the stream.
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let copied = io::copy(&mut stdout, sink);
        drop(stdout);
        if copied.is_err() {
            let _ = child.kill();
        }
        let status = child
            .wait()
            .with_context(|| format!("waiting for zfs send of {snapshot}"))?;
        let stderr = stderr_reader.join().unwrap_or_default();

        let bytes = copied.with_context(|| format!("streaming zfs send of {snapshot}"))?;
        if !status.success() {
            bail!(
                "zfs send {} failed\n  Exit code: {}\n  stderr: {}",
                snapshot,
                status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Stand-in `zfs` that prints a fixed payload or fails.
    fn fake_zfs(temp: &TempDir, body: &str) -> Zfs {
        let path = temp.path().join("zfs");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Zfs::new(path.to_string_lossy().into_owned())
    }

    #[test]
    fn send_streams_stdout_into_sink() {
        let temp = TempDir::new().unwrap();
        let zfs = fake_zfs(&temp, "printf 'stream-bytes'");
        let mut sink = Vec::new();

        let n = zfs.send("zones/vm-disk0@20240101", &mut sink).unwrap();
        assert_eq!(n, 12);
        assert_eq!(sink, b"stream-bytes");
    }

    #[test]
    fn send_failure_carries_stderr() {
        let temp = TempDir::new().unwrap();
        let zfs = fake_zfs(&temp, "echo 'dataset does not exist' >&2; exit 1");
        let mut sink = Vec::new();

        let err = zfs.send("zones/missing@20240101", &mut sink).unwrap_err();
        assert!(format!("{err:#}").contains("dataset does not exist"));
    }

    /// Accepts a fixed number of bytes, then refuses further writes.
    struct ClosingSink {
        remaining: usize,
    }

    impl Write for ClosingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "build cancelled"));
            }
            let n = buf.len().min(self.remaining);
            self.remaining -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_sink_stops_an_endless_send() {
        let temp = TempDir::new().unwrap();
        let zfs = fake_zfs(&temp, "exec yes stream-block");
        let mut sink = ClosingSink { remaining: 64 * 1024 };

        let err = zfs.send("zones/vm-disk0@20240101", &mut sink).unwrap_err();
        assert!(format!("{err:#}").contains("build cancelled"));
    }

    #[test]
    fn snapshot_failure_is_an_error() {
        let temp = TempDir::new().unwrap();
        let zfs = fake_zfs(&temp, "exit 1");
        assert!(zfs.snapshot("zones/vm-disk0@20240101").is_err());
    }
}
