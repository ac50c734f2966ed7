use std::fmt;

use bytemuck::Pod;
use zeroize::Zeroize;

/// A keyed authentication tag over a byte range.
///
/// Equality is evaluated in constant time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(blake3::Hash);

/// Message authentication code used to detect tampering of data kept outside the enclave.
pub struct Mac {
    key: [u8; blake3::KEY_LEN],
}

impl Mac {
    /// Creates a new `Mac` with the given key.
    pub fn new(key: [u8; blake3::KEY_LEN]) -> Self {
        Self { key }
    }

    /// Creates a new `Mac` with a fresh random key.
    pub fn random() -> Self {
        Self::new(rand::random())
    }

    /// Computes the tag of `bytes`.
    pub fn tag(&self, bytes: &[u8]) -> Tag {
        Tag(blake3::keyed_hash(&self.key, bytes))
    }

    /// Computes the tag of the raw bytes of `elems`.
    pub fn tag_elems<T: Pod>(&self, elems: &[T]) -> Tag {
        self.tag(bytemuck::cast_slice(elems))
    }

    /// Checks `bytes` against a previously recorded tag.
    ///
    /// # Returns
    /// Whether the data is authentic.
    pub fn verify(&self, bytes: &[u8], expected: &Tag) -> bool {
        self.tag(bytes) == *expected
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Mac { key: <redacted> }")
    }
}

impl Drop for Mac {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
