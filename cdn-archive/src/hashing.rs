//! Hashing wrappers for computing digests while writing, and for re-hashing
//! stored content.

use std::fs::File;
use std::io::{Result, Write};
use std::path::Path;

use digest::Digest;
use memmap2::Mmap;

/// The digest stored in `archive.md5`.
pub type ContentDigest = md5::Md5;

/// A writer wrapper that computes a hash digest while data is written through it.
///
/// The hash is updated only with the bytes the inner writer accepted.
pub struct HashingWriter<W, D> {
    inner: W,
    hasher: D,
    bytes_written: u64,
}

impl<W, D: Digest + Default> HashingWriter<W, D> {
    /// Create a new hashing writer wrapping the given writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: D::default(),
            bytes_written: 0,
        }
    }

    /// Get the total number of bytes written through this writer.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Lowercase hex of the digest so far, without consuming the hasher.
    pub fn hex_digest(&self) -> String
    where
        D: Clone,
    {
        to_hex(&self.hasher.clone().finalize())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Get the inner writer back along with the finished digest.
    pub fn finish(self) -> (W, String) {
        let digest = to_hex(&self.hasher.finalize());
        (self.inner, digest)
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes_written += n as u64;
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

/// Hash a stored file, returning its hex digest and length.
pub fn hash_file<D: Digest + Default>(path: &Path) -> Result<(String, u64)> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    if len == 0 {
        return Ok((to_hex(&D::default().finalize()), 0));
    }

    // Safety: the archive never truncates committed files in place, it
    // replaces them by rename, so the mapping stays valid while we hash it.
    let map = unsafe { Mmap::map(&file)? };
    let mut hasher = D::default();
    hasher.update(&map[..]);
    Ok((to_hex(&hasher.finalize()), len))
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
