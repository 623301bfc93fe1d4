//! Content-encoding strategies for stored artifacts.
//!
//! Every cached page is written once per enabled strategy, as sibling files
//! differing only by extension. The [`Collection`] negotiates a strategy
//! against the client's `Accept-Encoding` header; the identity HTML strategy
//! is always present and always enabled, so negotiation can never come up
//! empty-handed.

mod strategies;

use std::sync::Arc;

use thiserror::Error;

pub use strategies::{Brotli, Deflate, Gzip, Html, Zstd};

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("{strategy} compression level must be between {min} and {max}, got {level}")]
    InvalidLevel {
        strategy: &'static str,
        level: i64,
        min: i64,
        max: i64,
    },
    #[error("failed to compress content with {strategy}: {source}")]
    Failed {
        strategy: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// A pluggable content encoder.
pub trait Compressor: Send + Sync {
    /// Whether the runtime is capable of producing this encoding at all.
    fn supported(&self) -> bool;

    /// Supported and opted into by configuration.
    fn enabled(&self) -> bool;

    /// Artifact file extension, e.g. `gz`.
    fn extension(&self) -> &'static str;

    /// `Content-Encoding` header value; empty for the identity strategy.
    fn encoding(&self) -> &'static str;

    fn compress(&self, content: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Response headers a hit served with this encoding must carry.
    fn headers(&self) -> Vec<(String, String)> {
        if self.encoding().is_empty() {
            return Vec::new();
        }

        vec![("Content-Encoding".to_string(), self.encoding().to_string())]
    }
}

/// The set of known strategies plus `Accept-Encoding` negotiation.
pub struct Collection {
    compressors: Vec<Arc<dyn Compressor>>,
}

impl Collection {
    /// Builds a collection, appending the identity strategy if the caller
    /// left it out. Negotiation relies on it being present.
    pub fn new(compressors: Vec<Arc<dyn Compressor>>) -> Self {
        let mut compressors = compressors;

        if !compressors.iter().any(|c| c.extension() == Html::EXT) {
            compressors.push(Arc::new(Html));
        }

        Self { compressors }
    }

    pub fn all(&self) -> &[Arc<dyn Compressor>] {
        &self.compressors
    }

    /// Strategies that are currently enabled, evaluated against live config.
    pub fn enabled(&self) -> Vec<Arc<dyn Compressor>> {
        self.compressors
            .iter()
            .filter(|c| c.enabled())
            .cloned()
            .collect()
    }

    pub fn by_encoding(&self, encoding: &str) -> Option<Arc<dyn Compressor>> {
        if encoding.is_empty() {
            return None;
        }

        self.enabled()
            .into_iter()
            .find(|c| c.encoding() == encoding)
    }

    pub fn by_extension(&self, extension: &str) -> Option<Arc<dyn Compressor>> {
        if extension.is_empty() {
            return None;
        }

        self.enabled()
            .into_iter()
            .find(|c| c.extension() == extension)
    }

    /// The identity strategy; present by construction.
    pub fn identity(&self) -> Arc<dyn Compressor> {
        self.compressors
            .iter()
            .find(|c| c.extension() == Html::EXT)
            .cloned()
            .unwrap_or_else(|| Arc::new(Html))
    }

    /// Weighted negotiation against a raw `Accept-Encoding` header value.
    ///
    /// Splits on commas, honors `;q=` weights (default 1.0), and picks the
    /// highest-weight enabled strategy, keeping the client's declaration
    /// order on ties. An empty or unmatchable header falls back to identity.
    pub fn negotiate(&self, accept_encoding: &str) -> Arc<dyn Compressor> {
        let mut best: Option<(f32, Arc<dyn Compressor>)> = None;

        for declared in accept_encoding.split(',') {
            let declared = declared.trim();
            if declared.is_empty() {
                continue;
            }

            let mut parts = declared.split(';');
            let name = parts.next().unwrap_or("").trim();
            let weight = parts
                .find_map(|param| param.trim().strip_prefix("q="))
                .and_then(|value| value.parse::<f32>().ok())
                .unwrap_or(1.0);

            let Some(compressor) = self.by_encoding(name) else {
                continue;
            };

            match &best {
                Some((current, _)) if *current >= weight => {}
                _ => best = Some((weight, compressor)),
            }
        }

        match best {
            Some((_, compressor)) => compressor,
            None => self.identity(),
        }
    }
}
