//! Duplicate-content detection: hashes every regular file under a directory
//! and reports the paths whose contents hash identically.

use crate::common::EntryKind;
use crate::error::Result;
use crate::pipeline::FileSource;
use crate::walk::PathWalker;

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(clap::ValueEnum, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        })
    }
}

impl HashAlgorithm {
    /// Hex digest of everything `reader` yields.
    pub fn digest_reader(self, reader: &mut impl io::Read) -> io::Result<String> {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(reader, &mut hasher)?;
                Ok(hex::encode(hasher.finalize()))
            }
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                io::copy(reader, &mut hasher)?;
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }
}

/// Files sharing one digest.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub digest: String,
    pub paths: Vec<PathBuf>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateReport {
    pub algorithm: HashAlgorithm,
    pub files_scanned: usize,
    /// Only digests with two or more files, ordered by digest.
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty()
    }
}

/// Hashes every regular file below `root` (symlinks are not followed) and
/// groups identical contents. Any unreadable file aborts the scan.
pub fn hash_check(root: &Path, algorithm: HashAlgorithm) -> Result<DuplicateReport> {
    let mut files = Vec::new();
    for item in PathWalker::new(root, false)? {
        let item = item?;
        if item.kind() == EntryKind::File {
            files.push(item.absolute_path);
        }
    }
    tracing::info!(root = %root.display(), files = files.len(), %algorithm, "hashing files");

    let digests = files
        .par_iter()
        .map(|path| -> Result<(String, PathBuf)> {
            let mut source = FileSource::open(path)?;
            let digest = algorithm.digest_reader(&mut source)?;
            tracing::debug!(path = %path.display(), %digest, "hashed");
            Ok((digest, path.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut by_digest: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for (digest, path) in digests {
        by_digest.entry(digest).or_default().push(path);
    }
    let groups = by_digest
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(digest, mut paths)| {
            paths.sort();
            DuplicateGroup { digest, paths }
        })
        .collect();

    Ok(DuplicateReport { algorithm, files_scanned: files.len(), groups })
}
