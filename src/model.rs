use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use memmap2::Mmap;
use sha2::{Digest, Sha256};

/// Read-only memory map of a model file.
///
/// The mapping lives as long as the detector built from it. The fingerprint is
/// the SHA-256 of the mapped bytes, hashed on first use; it only feeds logging.
pub struct ModelBuffer {
    path: PathBuf,
    map: Mmap,
    fingerprint: OnceLock<[u8; 32]>,
}

impl ModelBuffer {
    pub fn map<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open model file {}", path.display()))?;
        let declared_len = file
            .metadata()
            .with_context(|| format!("failed to stat model file {}", path.display()))?
            .len();
        if declared_len == 0 {
            return Err(anyhow!("model file {} is empty", path.display()));
        }
        // SAFETY: the mapping is read-only and model files are not rewritten
        // while a detector holds them.
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("failed to map model file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            map,
            fingerprint: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        *self
            .fingerprint
            .get_or_init(|| Sha256::digest(&self.map[..]).into())
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }
}

impl std::fmt::Debug for ModelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBuffer")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish_non_exhaustive()
    }
}
