//! Content-based diagram identity.
//!
//! Provides [`Fingerprint`], the cache key and image file stem of a rendered
//! diagram.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::options::{ImageFormat, RenderOptions};

/// SHA-256 digest identifying one diagram rendering.
///
/// Covers everything that affects the rendered image: diagram source, every
/// resolved render option, and the output format. The hex form is 64
/// lowercase characters and safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `code` rendered with `options` to `format`.
    ///
    /// # Hash Format
    ///
    /// SHA-256 over length-prefixed frames: the format, then each canonical
    /// option field in key order, then the code. Length prefixes keep a value
    /// containing a separator from colliding with two shorter values.
    #[must_use]
    pub fn compute(code: &str, options: &RenderOptions, format: ImageFormat) -> Self {
        Self::from_parts(code, options.canonical_fields(), format)
    }

    /// Compute a fingerprint from option fields given in any order.
    ///
    /// Fields are sorted by name before hashing, so the result does not
    /// depend on iteration order.
    #[must_use]
    pub fn from_parts<'a, I>(code: &str, fields: I, format: ImageFormat) -> Self
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let fields: BTreeMap<&str, String> = fields.into_iter().collect();

        let mut hasher = Sha256::new();
        update_frame(&mut hasher, format.as_str().as_bytes());
        for (name, value) in &fields {
            update_frame(&mut hasher, name.as_bytes());
            update_frame(&mut hasher, value.as_bytes());
        }
        update_frame(&mut hasher, code.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Image file name for this fingerprint (`{hex}.{ext}`).
    #[must_use]
    pub fn file_name(&self, format: ImageFormat) -> String {
        format!("{}.{}", self.0, format.extension())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn update_frame(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
