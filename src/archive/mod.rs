//! # Entry Stream Format
//!
//! This module frames [`Entry`] headers and file payloads into a single
//! append-only byte stream. It has no knowledge of compression or encryption;
//! it reads from and writes to whatever stream the stage stack hands it.
//!
//! ```text
//! stream := MAGIC entry* END
//! entry  := kind:u8 mode:u32 size:u64 path_len:u32 path link_len:u32 link payload[size]
//! END    := kind:u8 = 0
//! ```
//!
//! All integers are little-endian. Only regular files carry a payload.

use crate::common::{Entry, EntryKind};
use crate::error::{ArchiverError, Result};

use std::io::{self, Read, Write};

pub const MAGIC_BYTES: &[u8; 8] = b"ARKSTRM1";

/// Upper bound for entry paths and link targets.
pub const MAX_NAME_LEN: usize = 64 * 1024;

const KIND_END: u8 = 0;
const KIND_FILE: u8 = 1;
const KIND_DIR: u8 = 2;
const KIND_SYMLINK: u8 = 3;
const KIND_OTHER: u8 = 4;

fn kind_tag(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::File => KIND_FILE,
        EntryKind::Dir => KIND_DIR,
        EntryKind::Symlink => KIND_SYMLINK,
        EntryKind::Other => KIND_OTHER,
    }
}

/// Rejects entry paths that could escape the restore root.
///
/// Accepted paths are `"."` or one or more `/`-separated names, none of which
/// is empty, `.` or `..`.
pub fn validate_entry_path(path: &str) -> Result<()> {
    if path == "." {
        return Ok(());
    }
    let bad = path.is_empty()
        || path.contains('\0')
        || path.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(ArchiverError::UnsafePath(path.to_string()));
    }
    #[cfg(windows)]
    if path.contains('\\') || path.contains(':') {
        return Err(ArchiverError::UnsafePath(path.to_string()));
    }
    Ok(())
}

/// Writes entries into an underlying stream.
pub struct EntryWriter<W: Write> {
    inner: W,
}

impl<W: Write> EntryWriter<W> {
    /// Writes the stream magic and returns a writer ready for entries.
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(MAGIC_BYTES)?;
        Ok(Self { inner })
    }

    /// Writes one entry header, followed by exactly `entry.size` bytes from
    /// `payload` for regular files.
    ///
    /// The payload must yield exactly `entry.size` bytes; a shorter or longer
    /// source is reported as [`ArchiverError::SizeMismatch`].
    pub fn write_entry(&mut self, entry: &Entry, payload: Option<&mut dyn Read>) -> Result<()> {
        validate_entry_path(&entry.path)?;
        check_len("entry path", entry.path.len())?;
        check_len("link target", entry.link_target.len())?;

        let size = if entry.kind == EntryKind::File { entry.size } else { 0 };
        let link = if entry.kind == EntryKind::Symlink { entry.link_target.as_bytes() } else { &[] };

        let mut header = Vec::with_capacity(1 + 4 + 8 + 4 + entry.path.len() + 4 + link.len());
        header.push(kind_tag(entry.kind));
        header.extend_from_slice(&entry.mode.to_le_bytes());
        header.extend_from_slice(&size.to_le_bytes());
        header.extend_from_slice(&(entry.path.len() as u32).to_le_bytes());
        header.extend_from_slice(entry.path.as_bytes());
        header.extend_from_slice(&(link.len() as u32).to_le_bytes());
        header.extend_from_slice(link);
        self.inner.write_all(&header)?;

        if entry.kind != EntryKind::File {
            return Ok(());
        }
        let mismatch = |actual| ArchiverError::SizeMismatch { path: entry.path.clone(), expected: size, actual };
        let Some(payload) = payload else {
            return if size == 0 { Ok(()) } else { Err(mismatch(0)) };
        };
        let copied = io::copy(&mut (&mut *payload).take(size), &mut self.inner)?;
        if copied != size {
            return Err(mismatch(copied));
        }
        let mut extra = [0u8; 1];
        if payload.read(&mut extra)? != 0 {
            return Err(mismatch(size + 1));
        }
        Ok(())
    }

    /// Writes the end-of-archive marker and hands back the underlying stream.
    pub fn finish(mut self) -> Result<W> {
        self.inner.write_all(&[KIND_END])?;
        Ok(self.inner)
    }
}

fn check_len(what: &'static str, len: usize) -> Result<()> {
    if len > MAX_NAME_LEN {
        return Err(ArchiverError::TooLong { what, len, max: MAX_NAME_LEN });
    }
    Ok(())
}

/// Reads entries from an underlying stream, one at a time.
///
/// The payload of the current entry must be consumed (through [`EntryReader::payload`])
/// or skipped before the next header can be read; [`EntryReader::next_entry`] skips
/// whatever is left automatically.
pub struct EntryReader<R: Read> {
    inner: R,
    current: Option<String>,
    remaining: u64,
    ended: bool,
}

impl<R: Read> EntryReader<R> {
    /// Reads and checks the stream magic.
    pub fn new(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        read_exact_or_format(&mut inner, &mut magic, "stream header")?;
        if &magic != MAGIC_BYTES {
            return Err(ArchiverError::Format("not an arkive entry stream (magic bytes mismatch)".into()));
        }
        Ok(Self { inner, current: None, remaining: 0, ended: false })
    }

    /// Returns the next entry header, or `None` once the end-of-archive marker is reached.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.ended {
            return Ok(None);
        }
        self.skip_payload()?;

        let mut tag = [0u8; 1];
        read_exact_or_format(&mut self.inner, &mut tag, "entry header")?;
        let kind = match tag[0] {
            KIND_END => {
                self.ended = true;
                return Ok(None);
            }
            KIND_FILE => EntryKind::File,
            KIND_DIR => EntryKind::Dir,
            KIND_SYMLINK => EntryKind::Symlink,
            KIND_OTHER => EntryKind::Other,
            other => return Err(ArchiverError::Format(format!("unknown entry kind {other}"))),
        };

        let mut fixed = [0u8; 12];
        read_exact_or_format(&mut self.inner, &mut fixed, "entry header")?;
        let mut mode = [0u8; 4];
        mode.copy_from_slice(&fixed[..4]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&fixed[4..]);
        let (mode, size) = (u32::from_le_bytes(mode), u64::from_le_bytes(size));
        let path = self.read_string("entry path")?;
        let link_target = self.read_string("link target")?;
        validate_entry_path(&path)?;

        if kind != EntryKind::File && size != 0 {
            return Err(ArchiverError::Format(format!("{kind} entry '{path}' declares a payload")));
        }

        self.current = Some(path.clone());
        self.remaining = size;
        Ok(Some(Entry { path, kind, mode, size, link_target }))
    }

    /// A reader over what is left of the current entry's payload.
    pub fn payload(&mut self) -> Payload<'_, R> {
        Payload { reader: self }
    }

    /// Discards the rest of the current payload.
    pub fn skip_payload(&mut self) -> Result<()> {
        if self.remaining > 0 {
            io::copy(&mut self.payload(), &mut io::sink())?;
        }
        Ok(())
    }

    /// Consumes the reader after the end-of-archive marker, making sure nothing
    /// follows it. Draining the stream also lets the outer layers verify their
    /// trailing frames.
    pub fn finish(mut self) -> Result<R> {
        if !self.ended {
            return Err(ArchiverError::Format("end-of-archive marker not reached".into()));
        }
        let trailing = io::copy(&mut self.inner, &mut io::sink())?;
        if trailing > 0 {
            return Err(ArchiverError::Format(format!("{trailing} bytes of trailing data after end-of-archive marker")));
        }
        Ok(self.inner)
    }

    fn read_string(&mut self, what: &'static str) -> Result<String> {
        let mut len = [0u8; 4];
        read_exact_or_format(&mut self.inner, &mut len, what)?;
        let len = u32::from_le_bytes(len) as usize;
        check_len(what, len).map_err(|_| ArchiverError::Format(format!("{what} length {len} exceeds limit")))?;
        let mut buf = vec![0u8; len];
        read_exact_or_format(&mut self.inner, &mut buf, what)?;
        String::from_utf8(buf).map_err(|_| ArchiverError::Format(format!("{what} is not valid UTF-8")))
    }
}

/// Payload view returned by [`EntryReader::payload`].
pub struct Payload<'a, R: Read> {
    reader: &'a mut EntryReader<R>,
}

impl<R: Read> Read for Payload<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.reader.remaining;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.reader.inner.read(&mut buf[..want])?;
        if n == 0 {
            let path = self.reader.current.clone().unwrap_or_default();
            return Err(ArchiverError::Format(format!("payload of '{path}' is truncated ({remaining} bytes missing)")).into_io());
        }
        self.reader.remaining -= n as u64;
        Ok(n)
    }
}

/// `read_exact`, with a premature end of stream reported as a format error.
fn read_exact_or_format<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiverError::Format(format!("stream ended inside {what}"))
        } else {
            ArchiverError::from(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(entries: &[(Entry, &[u8])]) -> Vec<u8> {
        let mut writer = EntryWriter::new(Vec::new()).unwrap();
        for (entry, payload) in entries {
            let mut payload: &[u8] = payload;
            writer.write_entry(entry, Some(&mut payload)).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn reads_back_headers_and_payloads() {
        let bytes = encode(&[
            (Entry::dir(".", 0o755), b""),
            (Entry::file("a.txt", 0o644, 2), b"hi"),
            (Entry::symlink("link", 0o777, "a.txt"), b""),
            (Entry::file("sub/b.txt", 0o600, 5), b"there"),
        ]);

        let mut reader = EntryReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.next_entry().unwrap(), Some(Entry::dir(".", 0o755)));

        let a = reader.next_entry().unwrap().unwrap();
        assert_eq!(a, Entry::file("a.txt", 0o644, 2));
        let mut content = String::new();
        reader.payload().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hi");

        let link = reader.next_entry().unwrap().unwrap();
        assert_eq!(link.link_target, "a.txt");

        // Payload of sub/b.txt is skipped implicitly.
        assert_eq!(reader.next_entry().unwrap().unwrap().path, "sub/b.txt");
        assert_eq!(reader.next_entry().unwrap(), None);
        assert_eq!(reader.next_entry().unwrap(), None);
        reader.finish().unwrap();
    }

    #[test]
    fn short_payload_is_rejected_on_write() {
        let mut writer = EntryWriter::new(Vec::new()).unwrap();
        let mut payload: &[u8] = b"abc";
        let err = writer.write_entry(&Entry::file("f", 0o644, 10), Some(&mut payload)).unwrap_err();
        assert!(matches!(err, ArchiverError::SizeMismatch { expected: 10, actual: 3, .. }));
    }

    #[test]
    fn long_payload_is_rejected_on_write() {
        let mut writer = EntryWriter::new(Vec::new()).unwrap();
        let mut payload: &[u8] = b"abcdef";
        let err = writer.write_entry(&Entry::file("f", 0o644, 3), Some(&mut payload)).unwrap_err();
        assert!(matches!(err, ArchiverError::SizeMismatch { expected: 3, .. }));
    }

    #[test]
    fn missing_end_marker_is_a_format_error() {
        let mut bytes = encode(&[(Entry::file("a", 0o644, 4), b"data")]);
        bytes.pop();
        let mut reader = EntryReader::new(Cursor::new(bytes)).unwrap();
        reader.next_entry().unwrap().unwrap();
        assert!(matches!(reader.next_entry(), Err(ArchiverError::Format(_))));
    }

    #[test]
    fn truncated_payload_is_a_format_error() {
        let mut bytes = encode(&[(Entry::file("a", 0o644, 4), b"data")]);
        bytes.truncate(bytes.len() - 3);
        let mut reader = EntryReader::new(Cursor::new(bytes)).unwrap();
        reader.next_entry().unwrap().unwrap();
        let err = reader.skip_payload().unwrap_err();
        assert!(matches!(err, ArchiverError::Format(_)), "{err}");
    }

    #[test]
    fn trailing_data_is_rejected() {
        let mut bytes = encode(&[]);
        bytes.extend_from_slice(b"junk");
        let mut reader = EntryReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.next_entry().unwrap(), None);
        assert!(matches!(reader.finish(), Err(ArchiverError::Format(_))));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.push(9);
        let mut reader = EntryReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.next_entry(), Err(ArchiverError::Format(_))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(EntryReader::new(Cursor::new(b"NOTMAGIC\0".to_vec())), Err(ArchiverError::Format(_))));
        assert!(matches!(EntryReader::new(Cursor::new(Vec::new())), Err(ArchiverError::Format(_))));
    }

    #[test]
    fn entry_paths_are_validated() {
        for ok in [".", "a", "a/b.txt", "dir/.hidden"] {
            validate_entry_path(ok).unwrap();
        }
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "a//b", "a/./b", "a/"] {
            assert!(matches!(validate_entry_path(bad), Err(ArchiverError::UnsafePath(_))), "{bad}");
        }
    }

    #[test]
    fn unsafe_path_in_stream_is_rejected() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.push(KIND_DIR);
        bytes.extend_from_slice(&0o755u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(b"../up");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let mut reader = EntryReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.next_entry(), Err(ArchiverError::UnsafePath(_))));
    }
}
