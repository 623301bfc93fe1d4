//! The individual content-encoding strategies.
//!
//! All compressed variants share the same config switch
//! (`page_cache.compression.enabled`); the identity HTML strategy ignores it
//! and is always on, guaranteeing a servable artifact exists for every
//! cached page.

use std::io::Write;
use std::sync::Arc;

use crate::config::ConfigStore;

use super::{CompressionError, Compressor};

const COMPRESSION_ENABLED_KEY: &str = "page_cache.compression.enabled";

fn config_opt_in(config: &ConfigStore) -> bool {
    config.bool_or(COMPRESSION_ENABLED_KEY, true)
}

/// Identity strategy: the raw HTML bytes, no encoding header.
pub struct Html;

impl Html {
    pub const EXT: &'static str = "html";
}

impl Compressor for Html {
    fn supported(&self) -> bool {
        true
    }

    fn enabled(&self) -> bool {
        true
    }

    fn extension(&self) -> &'static str {
        Self::EXT
    }

    fn encoding(&self) -> &'static str {
        ""
    }

    fn compress(&self, content: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(content.to_vec())
    }
}

pub struct Gzip {
    config: Arc<ConfigStore>,
    level: u32,
}

impl Gzip {
    pub const EXT: &'static str = "gz";

    pub fn new(config: Arc<ConfigStore>, level: u32) -> Result<Self, CompressionError> {
        if level > 9 {
            return Err(CompressionError::InvalidLevel {
                strategy: "gzip",
                level: level as i64,
                min: 0,
                max: 9,
            });
        }

        Ok(Self { config, level })
    }
}

impl Compressor for Gzip {
    fn supported(&self) -> bool {
        true
    }

    fn enabled(&self) -> bool {
        self.supported() && config_opt_in(&self.config)
    }

    fn extension(&self) -> &'static str {
        Self::EXT
    }

    fn encoding(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, content: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));

        encoder
            .write_all(content)
            .and_then(|_| encoder.finish())
            .map_err(|source| CompressionError::Failed {
                strategy: "gzip",
                source,
            })
    }
}

/// Deflate strategy; zlib-wrapped, as browsers expect for `deflate`.
pub struct Deflate {
    config: Arc<ConfigStore>,
    level: u32,
}

impl Deflate {
    pub const EXT: &'static str = "df";

    pub fn new(config: Arc<ConfigStore>, level: u32) -> Result<Self, CompressionError> {
        if level > 9 {
            return Err(CompressionError::InvalidLevel {
                strategy: "deflate",
                level: level as i64,
                min: 0,
                max: 9,
            });
        }

        Ok(Self { config, level })
    }
}

impl Compressor for Deflate {
    fn supported(&self) -> bool {
        true
    }

    fn enabled(&self) -> bool {
        self.supported() && config_opt_in(&self.config)
    }

    fn extension(&self) -> &'static str {
        Self::EXT
    }

    fn encoding(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, content: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));

        encoder
            .write_all(content)
            .and_then(|_| encoder.finish())
            .map_err(|source| CompressionError::Failed {
                strategy: "deflate",
                source,
            })
    }
}

/// Brotli strategy. Browsers only accept `br` over secure transport, so
/// support additionally depends on the site being served via TLS.
pub struct Brotli {
    config: Arc<ConfigStore>,
    level: u32,
    secure_transport: bool,
}

impl Brotli {
    pub const EXT: &'static str = "br";

    pub fn new(
        config: Arc<ConfigStore>,
        level: u32,
        secure_transport: bool,
    ) -> Result<Self, CompressionError> {
        if level > 11 {
            return Err(CompressionError::InvalidLevel {
                strategy: "brotli",
                level: level as i64,
                min: 0,
                max: 11,
            });
        }

        Ok(Self {
            config,
            level,
            secure_transport,
        })
    }
}

impl Compressor for Brotli {
    fn supported(&self) -> bool {
        self.secure_transport
    }

    fn enabled(&self) -> bool {
        self.supported() && config_opt_in(&self.config)
    }

    fn extension(&self) -> &'static str {
        Self::EXT
    }

    fn encoding(&self) -> &'static str {
        "br"
    }

    fn compress(&self, content: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let params = brotli::enc::BrotliEncoderParams {
            quality: self.level as i32,
            ..Default::default()
        };

        let mut output = Vec::new();
        brotli::BrotliCompress(&mut &content[..], &mut output, &params).map_err(|source| {
            CompressionError::Failed {
                strategy: "brotli",
                source,
            }
        })?;

        Ok(output)
    }
}

pub struct Zstd {
    config: Arc<ConfigStore>,
    level: i32,
}

impl Zstd {
    pub const EXT: &'static str = "zstd";

    pub fn new(config: Arc<ConfigStore>, level: i32) -> Result<Self, CompressionError> {
        if !(1..=22).contains(&level) {
            return Err(CompressionError::InvalidLevel {
                strategy: "zstd",
                level: level as i64,
                min: 1,
                max: 22,
            });
        }

        Ok(Self { config, level })
    }
}

impl Compressor for Zstd {
    fn supported(&self) -> bool {
        true
    }

    fn enabled(&self) -> bool {
        self.supported() && config_opt_in(&self.config)
    }

    fn extension(&self) -> &'static str {
        Self::EXT
    }

    fn encoding(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, content: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::bulk::compress(content, self.level).map_err(|source| CompressionError::Failed {
            strategy: "zstd",
            source,
        })
    }
}
