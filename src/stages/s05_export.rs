//! Snapshot the VM disk and stream it into a gzip artifact.
//!
//! The send stream goes straight through the encoder into
//! `<artifact>.partial`; nothing uncompressed ever touches disk. The partial
//! file is renamed into place only after the stream and encoder both finish.
//! A cancelled build stops the stream at the next write instead of letting
//! the whole send run to completion.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::backend::BlockStorage;
use crate::naming::partial_path;
use crate::signal::CancelToken;

/// What the export produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub artifact: PathBuf,
    /// Bytes read from the send stream.
    pub stream_bytes: u64,
    /// Bytes written to the artifact.
    pub compressed_bytes: u64,
    /// SHA-256 of the artifact, lowercase hex.
    pub sha256: String,
}

/// Create an immutable snapshot of the VM's primary disk.
pub fn snapshot_disk(storage: &dyn BlockStorage, snapshot: &str) -> Result<()> {
    storage
        .snapshot(snapshot)
        .with_context(|| format!("snapshotting VM disk as {snapshot}"))
}

/// Stream `snapshot` through gzip into `artifact`.
///
/// `artifact` is only replaced once the new stream is complete; a failed or
/// cancelled export leaves whatever was there before untouched.
pub fn export_snapshot(
    storage: &dyn BlockStorage,
    snapshot: &str,
    artifact: &Path,
    gzip_level: u32,
    cancel: &CancelToken,
) -> Result<ExportReport> {
    let partial = partial_path(artifact);

    let streamed = stream_compressed(storage, snapshot, &partial, gzip_level, cancel);
    let (stream_bytes, compressed_bytes, sha256) = match streamed {
        Ok(counts) => counts,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };

    fs::rename(&partial, artifact).with_context(|| {
        format!(
            "moving '{}' into place as '{}'",
            partial.display(),
            artifact.display()
        )
    })?;

    Ok(ExportReport {
        artifact: artifact.to_path_buf(),
        stream_bytes,
        compressed_bytes,
        sha256,
    })
}

fn stream_compressed(
    storage: &dyn BlockStorage,
    snapshot: &str,
    partial: &Path,
    gzip_level: u32,
    cancel: &CancelToken,
) -> Result<(u64, u64, String)> {
    let file = File::create(partial)
        .with_context(|| format!("creating artifact file '{}'", partial.display()))?;
    let counting = HashingWriter::new(BufWriter::new(file));
    let mut encoder = GzEncoder::new(counting, Compression::new(gzip_level));

    let stream_bytes = storage
        .send(snapshot, &mut CancelWriter::new(&mut encoder, cancel))
        .with_context(|| format!("exporting snapshot {snapshot}"))?;

    let counting = encoder
        .finish()
        .with_context(|| format!("finishing gzip stream for '{}'", partial.display()))?;
    let (writer, compressed_bytes, sha256) = counting.into_parts();
    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("flushing artifact '{}'", partial.display()))?;
    file.sync_all()
        .with_context(|| format!("syncing artifact '{}'", partial.display()))?;

    Ok((stream_bytes, compressed_bytes, sha256))
}

/// Writer that fails every write once the build is cancelled.
struct CancelWriter<'c, W> {
    inner: W,
    cancel: &'c CancelToken,
}

impl<'c, W: Write> CancelWriter<'c, W> {
    fn new(inner: W, cancel: &'c CancelToken) -> Self {
        Self { inner, cancel }
    }
}

impl<W: Write> Write for CancelWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Not ErrorKind::Interrupted: write_all would retry it forever.
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "build cancelled"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that hashes and counts everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn into_parts(self) -> (W, u64, String) {
        (self.inner, self.bytes, format!("{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
