use crate::error::BrokerError;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Number of random bytes behind a handle (128 bits).
pub const HANDLE_BYTES: usize = 16;

/// Opaque, URL-safe token that indexes a signing grant in the signature store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    pub fn generate() -> Self {
        let mut bytes = [0u8; HANDLE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form safe to put in logs.
    pub fn abbreviated(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(6)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl From<String> for Handle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Handle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}…)", self.abbreviated())
    }
}

/// Time-bounded upload authorization produced by the object store's signer.
#[derive(Clone)]
pub struct SigningGrant {
    pub target_key_pattern: String,
    pub expires_at: DateTime<Utc>,
    pub presigned_url: String,
}

impl SigningGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// The presigned URL embeds temporary credentials and must never reach logs.
impl fmt::Debug for SigningGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningGrant")
            .field("target_key_pattern", &self.target_key_pattern)
            .field("expires_at", &self.expires_at)
            .field("presigned_url", &"<redacted>")
            .finish()
    }
}

/// Logical category of an uploaded object; selects the key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Video,
    File,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::File => "file",
        }
    }
}

impl FromStr for FileCategory {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(FileCategory::Image),
            "video" => Ok(FileCategory::Video),
            "file" => Ok(FileCategory::File),
            other => Err(BrokerError::invalid(format!(
                "Unknown file type '{}', expected one of: image, video, file",
                other
            ))),
        }
    }
}

/// Terminal result of a successful upload job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub remote_key: String,
    pub public_url: String,
}
