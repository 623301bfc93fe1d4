//! Age-based artifact expiry.

use std::path::Path;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::warn;

/// One day, the default artifact lifetime.
pub const DEFAULT_EXPIRATION_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ExpirationError {
    #[error("the expiration seconds must be greater than 0")]
    NonPositive,
}

/// How long a cached artifact stays valid after it was written.
///
/// The length is re-read from live configuration on every serve, so a
/// settings change takes effect immediately; see [`Expiration::from_secs`]
/// for the lenient construction used on that hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    length: Duration,
}

impl Expiration {
    pub fn new(seconds: u64) -> Result<Self, ExpirationError> {
        if seconds == 0 {
            return Err(ExpirationError::NonPositive);
        }

        Ok(Self {
            length: Duration::from_secs(seconds),
        })
    }

    /// Lenient constructor for live-config values: an invalid length falls
    /// back to the default instead of failing the request.
    pub fn from_secs(seconds: u64) -> Self {
        match Self::new(seconds) {
            Ok(expiration) => expiration,
            Err(_) => {
                warn!(
                    seconds,
                    fallback = DEFAULT_EXPIRATION_SECS,
                    "Configured expiration is invalid, using the default"
                );
                Self {
                    length: Duration::from_secs(DEFAULT_EXPIRATION_SECS),
                }
            }
        }
    }

    pub fn length_secs(&self) -> u64 {
        self.length.as_secs()
    }

    pub fn set_length(&mut self, seconds: u64) -> Result<(), ExpirationError> {
        *self = Self::new(seconds)?;
        Ok(())
    }

    /// Whether the file at `path` is older than the configured length.
    ///
    /// Missing files and unreadable metadata count as expired so the caller
    /// falls through to a fresh render.
    pub fn is_expired(&self, path: &Path) -> bool {
        let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        };

        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > self.length,
            // Modified in the future relative to our clock; treat as fresh.
            Err(_) => false,
        }
    }
}
