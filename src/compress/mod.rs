//! # Compression Layer
//!
//! Wraps the entry stream in a single zstd frame. The level is checked against
//! what the linked zstd library supports when the stage is built; an
//! out-of-range level is a configuration error, never silently clamped.

use crate::error::{ArchiverError, Result};
use crate::pipeline::{is_tagged, BoxSink, BoxSource, Sink, Stage};

use std::io::{self, Read, Write};
use std::ops::RangeInclusive;

/// Level used when none is given.
pub const DEFAULT_LEVEL: i32 = zstd::DEFAULT_COMPRESSION_LEVEL;

/// Levels accepted by [`ZstdStage::new`].
pub fn supported_levels() -> RangeInclusive<i32> {
    zstd::compression_level_range()
}

/// Checks `level` against [`supported_levels`].
pub fn validate_level(level: i32) -> Result<i32> {
    let range = supported_levels();
    if range.contains(&level) {
        Ok(level)
    } else {
        Err(ArchiverError::InvalidCompressionLevel { level, min: *range.start(), max: *range.end() })
    }
}

/// The zstd stream decorator.
#[derive(Debug, Clone, Copy)]
pub struct ZstdStage {
    level: i32,
}

impl ZstdStage {
    pub fn new(level: i32) -> Result<Self> {
        Ok(Self { level: validate_level(level)? })
    }
}

impl Default for ZstdStage {
    fn default() -> Self {
        Self { level: DEFAULT_LEVEL }
    }
}

impl Stage for ZstdStage {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn wrap_sink(&self, inner: BoxSink) -> Result<BoxSink> {
        let encoder = zstd::stream::write::Encoder::new(inner, self.level)?;
        Ok(Box::new(ZstdSink { encoder }))
    }

    fn wrap_source(&self, inner: BoxSource) -> Result<BoxSource> {
        let decoder = zstd::stream::read::Decoder::new(inner)?;
        Ok(Box::new(ZstdSource { decoder }))
    }
}

struct ZstdSink {
    encoder: zstd::stream::write::Encoder<'static, BoxSink>,
}

impl Write for ZstdSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl Sink for ZstdSink {
    fn finish(self: Box<Self>) -> Result<()> {
        let ZstdSink { encoder } = *self;
        encoder.finish()?.finish()
    }
}

/// Decoder side. zstd reports corrupt and truncated frames as plain
/// `io::Error`s; those become [`ArchiverError::Format`]. Errors raised by the
/// layers below (decryption, file reads) pass through untouched.
struct ZstdSource {
    decoder: zstd::stream::read::Decoder<'static, io::BufReader<BoxSource>>,
}

impl Read for ZstdSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf).map_err(|e| {
            if is_tagged(&e) {
                e
            } else {
                ArchiverError::Format(format!("zstd: {e}")).into_io()
            }
        })
    }
}
