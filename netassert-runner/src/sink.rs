//! Result sinks: one append-only file per target.
//!
//! A worker writes to `<name>.partial` and renames it on completion, so a
//! committed sink always means the worker ran to the end. Sinks of workers
//! killed by the class deadline stay partial and are not collected.

use std::path::{Path, PathBuf};

use netassert_core::tap::ERROR_PREFIX;
use netassert_types::{SinkName, Target, TargetError};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Directory holding every sink of one run.
///
/// Backed by a temporary directory removed when this value drops, unless
/// kept at a chosen path with [`SinkDir::at`].
#[derive(Debug)]
pub struct SinkDir {
    path: PathBuf,
    _temp: Option<tempfile::TempDir>,
}

impl SinkDir {
    /// Create a process-scoped temporary sink directory.
    pub fn temporary() -> std::io::Result<Self> {
        let temp = tempfile::Builder::new().prefix("netassert-").tempdir()?;
        Ok(Self {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    /// Keep sinks in `path` after the run, creating it if needed.
    ///
    /// The directory must be empty: sinks left by another run would be
    /// collected as this run's results.
    pub fn at(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        if std::fs::read_dir(&path)?.next().is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} is not empty", path.display()),
            ));
        }
        Ok(Self { path, _temp: None })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh sink for a target.
    pub async fn create(&self, target: &Target) -> std::io::Result<SinkWriter> {
        let name = SinkName::for_target(target);
        let partial = self.path.join(name.partial_file_name());
        let committed = self.path.join(name.file_name());
        let file = File::create(&partial).await?;
        Ok(SinkWriter {
            target: target.clone(),
            partial,
            committed,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    /// Read every committed, non-empty sink.
    ///
    /// Order is unspecified; callers key by target.
    pub async fn collect(&self) -> std::io::Result<Vec<(Target, String)>> {
        let mut sinks = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(target) = file_name.to_str().and_then(SinkName::parse) else {
                continue;
            };
            let content = tokio::fs::read_to_string(entry.path()).await?;
            if content.trim().is_empty() {
                tracing::warn!(target_id = %target, "Ignoring empty result sink");
                continue;
            }
            sinks.push((target, content));
        }
        Ok(sinks)
    }

    /// Targets whose sinks were left partial (worker did not finish).
    pub async fn incomplete(&self) -> std::io::Result<Vec<Target>> {
        let mut targets = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if let Some(target) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(".partial"))
                .and_then(SinkName::parse)
            {
                targets.push(target);
            }
        }
        targets.sort();
        Ok(targets)
    }
}

/// Append-only writer for one target's sink.
#[derive(Debug)]
pub struct SinkWriter {
    target: Target,
    partial: PathBuf,
    committed: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl SinkWriter {
    /// The target this sink belongs to.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Number of lines written so far.
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    /// Append one line of captured output.
    ///
    /// Each line is also logged as a single event, so concurrent workers
    /// interleave by whole lines.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        tracing::debug!(target_id = %self.target, "{}", line);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.lines += 1;
        Ok(())
    }

    /// Record a target-level error as failing output.
    pub async fn record_error(&mut self, error: &TargetError) -> std::io::Result<()> {
        let line = format!("{} {}", ERROR_PREFIX, error);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.lines += 1;
        Ok(())
    }

    /// Flush and publish the sink under its committed name.
    pub async fn commit(mut self) -> std::io::Result<PathBuf> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        tokio::fs::rename(&self.partial, &self.committed).await?;
        Ok(self.committed)
    }
}
