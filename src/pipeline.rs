//! # Stage Stack
//!
//! Compression and encryption are both stream decorators: a [`Stage`] wraps a
//! writable [`Sink`] for backups and a readable source for restores. A
//! [`StageStack`] holds the active stages outermost-first and is assembled once
//! per invocation from the configuration, so the pipelines never branch on
//! which layers are present.
//!
//! Every sink owns the sink beneath it. [`Sink::finish`] finalizes its own
//! frame and then finishes the layer it wraps, which releases the layers in
//! reverse acquisition order. [`SinkGuard`] runs the same cascade from `Drop`
//! when an error unwinds past it.

use crate::error::{ArchiverError, Result};

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Buffer size used at the file boundary.
const IO_BUFFER_SIZE: usize = 1024 * 1024;

/// A writable layer that can be finalized.
pub trait Sink: Write {
    /// Finalizes this layer's frame, then finishes the layer beneath it.
    fn finish(self: Box<Self>) -> Result<()>;
}

pub type BoxSink = Box<dyn Sink>;
pub type BoxSource = Box<dyn Read>;

/// A stream decorator with a write side (backup) and a read side (restore).
pub trait Stage {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Wraps `inner` so that bytes written to the result reach `inner` transformed.
    fn wrap_sink(&self, inner: BoxSink) -> Result<BoxSink>;

    /// Wraps `inner` so that reading from the result undoes [`Stage::wrap_sink`].
    fn wrap_source(&self, inner: BoxSource) -> Result<BoxSource>;
}

/// The ordered list of active stages, outermost (closest to the file) first.
#[derive(Default)]
pub struct StageStack {
    stages: Vec<Box<dyn Stage>>,
}

impl StageStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `stage` inside the stages pushed so far.
    pub fn push(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Human-readable layer order, outermost first, e.g. `"aes-256-gcm > zstd"`.
    pub fn describe(&self) -> String {
        if self.stages.is_empty() {
            return "raw".to_string();
        }
        self.stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" > ")
    }

    /// Builds the write side on top of `base`, outermost stage first.
    pub fn open_sink(&self, base: BoxSink) -> Result<SinkGuard> {
        let mut sink = base;
        for stage in &self.stages {
            sink = stage.wrap_sink(sink)?;
        }
        Ok(SinkGuard { sink: Some(sink) })
    }

    /// Builds the read side on top of `base`, in the same order as [`StageStack::open_sink`].
    pub fn open_source(&self, base: BoxSource) -> Result<BoxSource> {
        let mut source = base;
        for stage in &self.stages {
            source = stage.wrap_source(source)?;
        }
        Ok(source)
    }
}

/// Owns the innermost sink of an opened stack.
///
/// Call [`SinkGuard::finish`] on success. If the guard is dropped unfinished
/// (an error path), the stack is finalized anyway and any secondary failure
/// is logged rather than returned, so the original error reaches the caller.
pub struct SinkGuard {
    sink: Option<BoxSink>,
}

impl SinkGuard {
    pub fn finish(mut self) -> Result<()> {
        match self.sink.take() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }

    fn sink(&mut self) -> io::Result<&mut BoxSink> {
        self.sink
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stage stack already finished"))
    }
}

impl Write for SinkGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink()?.flush()
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.finish() {
                tracing::warn!(error = %e, "failed to finalize archive layers after an earlier error");
            }
        }
    }
}

/// The bottom of the write side: a buffered file that is flushed and synced on finish.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileSink {
    pub fn new(file: File, path: impl Into<PathBuf>) -> Self {
        Self { writer: BufWriter::with_capacity(IO_BUFFER_SIZE, file), path: path.into() }
    }

    fn tag(&self, err: io::Error) -> io::Error {
        ArchiverError::io(&self.path, err).into_io()
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf).map_err(|e| self.tag(e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().map_err(|e| self.tag(e))
    }
}

impl Sink for FileSink {
    fn finish(self: Box<Self>) -> Result<()> {
        let FileSink { writer, path } = *self;
        let file = writer.into_inner().map_err(|e| ArchiverError::io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| ArchiverError::io(&path, e))
    }
}

/// The bottom of the read side. Read errors carry the file path, which lets
/// the layers above tell a failing disk apart from corrupt content.
pub struct FileSource {
    reader: BufReader<File>,
    path: PathBuf,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ArchiverError::io(path, e))?;
        Ok(Self { reader: BufReader::with_capacity(IO_BUFFER_SIZE, file), path: path.to_path_buf() })
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).map_err(|e| ArchiverError::io(&self.path, e).into_io())
    }
}

/// Reads up to `len` bytes from the front of `reader` without losing them:
/// the returned source replays the prefix before continuing with `reader`.
pub fn peek_prefix(mut reader: BoxSource, len: usize) -> Result<(Vec<u8>, BoxSource)> {
    let mut head = Vec::with_capacity(len);
    (&mut reader).take(len as u64).read_to_end(&mut head)?;
    let replay: BoxSource = Box::new(io::Cursor::new(head.clone()).chain(reader));
    Ok((head, replay))
}

/// True if `err` came out of a lower layer or the file itself rather than
/// from the stage that observed it.
pub(crate) fn is_tagged(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<ArchiverError>())
}
