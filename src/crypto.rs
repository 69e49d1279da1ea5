//! Cryptography module for handling encryption and decryption.
//!
//! The encrypted frame is a small header followed by independently sealed
//! AES-256-GCM chunks:
//!
//! ```text
//! MAGIC "ARKENC01" | m_cost:u32 | t_cost:u32 | p_cost:u32 | salt[16] | nonce_prefix[7]
//! chunk*  where chunk := last:u8 | ct_len:u32 | ciphertext[ct_len]
//! ```
//!
//! The key comes from Argon2id over the passphrase and the salt. Chunk nonces
//! are `prefix ‖ counter:u32 BE ‖ last:u8` and every chunk authenticates the
//! full header as associated data. A chunk is only released after its tag
//! verifies, and the stream is only complete once a chunk flagged `last` has
//! been seen, so truncation, reordering and tampering all fail closed.

use crate::error::{ArchiverError, Result};
use crate::pipeline::{BoxSink, BoxSource, Sink, Stage};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

pub const MAGIC_BYTES: &[u8; 8] = b"ARKENC01";

const KEY_SIZE: usize = 32; // 256 bits for AES-256
const SALT_SIZE: usize = 16; // 128 bits for salt
const NONCE_PREFIX_SIZE: usize = 7;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 8 + 4 * 3 + SALT_SIZE + NONCE_PREFIX_SIZE;

/// Plaintext bytes per sealed chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Upper bounds for Argon2 costs. Headers are read before they can be
/// authenticated, so these also cap the work a forged header can demand.
const MAX_M_COST: u32 = 1024 * 1024; // KiB, i.e. 1 GiB
const MAX_T_COST: u32 = 64;
const MAX_P_COST: u32 = 64;

/// Argon2id cost parameters. Stored in the archive header so restores use
/// whatever the backup was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Number of passes.
    pub t_cost: u32,
    /// Degree of parallelism.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { m_cost: Params::DEFAULT_M_COST, t_cost: Params::DEFAULT_T_COST, p_cost: Params::DEFAULT_P_COST }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params> {
        if self.m_cost > MAX_M_COST {
            return Err(ArchiverError::Kdf(format!("memory cost {} KiB exceeds {} KiB", self.m_cost, MAX_M_COST)));
        }
        if !(1..=MAX_T_COST).contains(&self.t_cost) {
            return Err(ArchiverError::Kdf(format!("time cost {} is outside 1..={MAX_T_COST}", self.t_cost)));
        }
        if !(1..=MAX_P_COST).contains(&self.p_cost) {
            return Err(ArchiverError::Kdf(format!("parallelism {} is outside 1..={MAX_P_COST}", self.p_cost)));
        }
        Params::new(self.m_cost, self.t_cost, self.p_cost, Some(KEY_SIZE)).map_err(|e| ArchiverError::Kdf(e.to_string()))
    }
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn derive_key(passphrase: &str, salt: &[u8], params: KdfParams) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| ArchiverError::Kdf(e.to_string()))?;
    Ok(key)
}

fn chunk_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], counter: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..11].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = u8::from(last);
    nonce
}

/// Parsed frame header.
struct FrameHeader {
    params: KdfParams,
    salt: [u8; SALT_SIZE],
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl FrameHeader {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(MAGIC_BYTES);
        out.extend_from_slice(&self.params.m_cost.to_le_bytes());
        out.extend_from_slice(&self.params.t_cost.to_le_bytes());
        out.extend_from_slice(&self.params.p_cost.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce_prefix);
        out
    }

    fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &bytes[..8] != MAGIC_BYTES {
            return Err(ArchiverError::NotEncrypted);
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let params = KdfParams { m_cost: word(8), t_cost: word(12), p_cost: word(16) };
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[20..20 + SALT_SIZE]);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&bytes[20 + SALT_SIZE..]);
        Ok(Self { params, salt, nonce_prefix })
    }
}

/// The passphrase-based encryption stream decorator.
pub struct EncryptionStage {
    passphrase: Zeroizing<String>,
    params: KdfParams,
}

impl EncryptionStage {
    pub fn new(passphrase: &str, params: KdfParams) -> Self {
        Self { passphrase: Zeroizing::new(passphrase.to_owned()), params }
    }
}

impl std::fmt::Debug for EncryptionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionStage").field("params", &self.params).finish_non_exhaustive()
    }
}

impl Stage for EncryptionStage {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn wrap_sink(&self, inner: BoxSink) -> Result<BoxSink> {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        OsRng.fill_bytes(&mut nonce_prefix);
        let header = FrameHeader { params: self.params, salt: generate_salt(), nonce_prefix };
        let key = derive_key(&self.passphrase, &header.salt, header.params)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        Ok(Box::new(EncryptWriter {
            inner,
            cipher,
            header: header.to_bytes(),
            header_written: false,
            nonce_prefix,
            counter: 0,
            buf: Vec::with_capacity(CHUNK_SIZE + 1),
        }))
    }

    fn wrap_source(&self, mut inner: BoxSource) -> Result<BoxSource> {
        let mut raw = [0u8; HEADER_SIZE];
        inner.read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ArchiverError::NotEncrypted,
            _ => ArchiverError::from(e),
        })?;
        let header = FrameHeader::parse(&raw)?;
        // Costs out of bounds can only come from a damaged or forged header.
        let key = derive_key(&self.passphrase, &header.salt, header.params).map_err(|e| match e {
            ArchiverError::Kdf(reason) => {
                tracing::debug!(%reason, params = ?header.params, "rejecting key derivation costs from archive header");
                ArchiverError::Authentication
            }
            other => other,
        })?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        Ok(Box::new(DecryptReader {
            inner,
            cipher,
            header: raw.to_vec(),
            nonce_prefix: header.nonce_prefix,
            counter: 0,
            plain: Vec::new(),
            pos: 0,
            finished: false,
        }))
    }
}

/// Buffers plaintext and seals it in [`CHUNK_SIZE`] pieces. The header is
/// written together with the first chunk so that a failed stack setup leaves
/// nothing behind.
struct EncryptWriter {
    inner: BoxSink,
    cipher: Aes256Gcm,
    header: Vec<u8>,
    header_written: bool,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    buf: Vec<u8>,
}

impl EncryptWriter {
    fn seal(&mut self, len: usize, last: bool) -> Result<()> {
        if !self.header_written {
            self.inner.write_all(&self.header)?;
            self.header_written = true;
        }
        let nonce = chunk_nonce(&self.nonce_prefix, self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: &self.buf[..len], aad: &self.header })
            .map_err(|_| ArchiverError::Format("AES-GCM sealing failed".into()))?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| ArchiverError::Format("encrypted stream exceeds the chunk counter".into()))?;

        let mut frame = Vec::with_capacity(5);
        frame.push(u8::from(last));
        frame.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
        self.inner.write_all(&frame)?;
        self.inner.write_all(&ciphertext)?;
        self.buf.drain(..len);
        Ok(())
    }
}

impl Write for EncryptWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        // Keep at least one byte buffered past a full chunk so the final
        // chunk is always sealed by `finish` with the last flag set.
        while self.buf.len() > CHUNK_SIZE {
            self.seal(CHUNK_SIZE, false).map_err(ArchiverError::into_io)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Sink for EncryptWriter {
    fn finish(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        let len = this.buf.len();
        this.seal(len, true)?;
        this.inner.finish()
    }
}

/// Opens one chunk at a time; plaintext is handed out only after its tag verified.
struct DecryptReader {
    inner: BoxSource,
    cipher: Aes256Gcm,
    header: Vec<u8>,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    counter: u32,
    plain: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl DecryptReader {
    /// Loads the next chunk. Returns false once the stream is complete.
    fn next_chunk(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        let mut frame = [0u8; 5];
        read_sealed(&mut self.inner, &mut frame)?;
        let last = match frame[0] {
            0 => false,
            1 => true,
            _ => return Err(ArchiverError::Authentication),
        };
        let len = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if !(TAG_SIZE..=CHUNK_SIZE + TAG_SIZE).contains(&len) {
            return Err(ArchiverError::Authentication);
        }
        let mut ciphertext = vec![0u8; len];
        read_sealed(&mut self.inner, &mut ciphertext)?;

        let nonce = chunk_nonce(&self.nonce_prefix, self.counter, last);
        self.plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: &ciphertext, aad: &self.header })
            .map_err(|_| ArchiverError::Authentication)?;
        self.pos = 0;
        self.counter = self.counter.checked_add(1).ok_or(ArchiverError::Authentication)?;

        if last {
            self.finished = true;
            let mut extra = [0u8; 1];
            if self.inner.read(&mut extra)? != 0 {
                tracing::debug!("data found after the final encrypted chunk");
                return Err(ArchiverError::Authentication);
            }
        }
        Ok(true)
    }
}

impl Read for DecryptReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plain.len() {
            if !self.next_chunk().map_err(ArchiverError::into_io)? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.plain.len() - self.pos);
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// `read_exact` where running out of ciphertext counts as tampering.
fn read_sealed(reader: &mut BoxSource, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            tracing::debug!("encrypted stream ended before its final chunk");
            ArchiverError::Authentication
        } else {
            ArchiverError::from(e)
        }
    })
}
