//! Fixed-layout directory entry.
//!
//! ```text
//! [reserved: u8 = 0][lifetime: u16][url length: u16][url: utf-8][auth count: u8 = 0]
//! ```

use std::io::{self, Write};

/// A URL with a lifetime in seconds. Authentication blocks are not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntry {
    lifetime: u16,
    url: String,
}

impl UrlEntry {
    /// An entry for `url` valid for `lifetime` seconds.
    pub fn new(url: impl Into<String>, lifetime: u16) -> Self {
        Self {
            lifetime,
            url: url.into(),
        }
    }

    /// The service URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lifetime in seconds.
    pub fn lifetime(&self) -> u16 {
        self.lifetime
    }

    /// Number of bytes [`UrlEntry::write`] produces.
    pub fn encoded_len(&self) -> usize {
        1 + 2 + 2 + self.url.len() + 1
    }

    /// Write the entry to `out`, failing only if the sink does.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let length = u16::try_from(self.url.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "url longer than 65535 bytes"))?;

        out.write_all(&[0])?;
        out.write_all(&self.lifetime.to_be_bytes())?;
        out.write_all(&length.to_be_bytes())?;
        out.write_all(self.url.as_bytes())?;
        out.write_all(&[0])
    }
}
