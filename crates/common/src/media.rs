use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The media classes the messaging network can store and hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
    Video,
    Audio,
    Sticker,
}

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::Image,
        MediaKind::Document,
        MediaKind::Video,
        MediaKind::Audio,
        MediaKind::Sticker,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Sticker => "sticker",
        }
    }

    /// Wire name used by download requests (`imageMessage`, ...).
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Image => "imageMessage",
            Self::Document => "documentMessage",
            Self::Video => "videoMessage",
            Self::Audio => "audioMessage",
            Self::Sticker => "stickerMessage",
        }
    }

    /// Accepts the wire name only.
    pub fn from_message_type(s: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|k| k.message_type() == s)
            .ok_or_else(|| Error::validation(format!("invalid media type '{s}'")))
    }

    /// Accepts the short name, case-insensitively (`audio`, `Image`, ...).
    pub fn from_media_type(s: &str) -> Result<Self, Error> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| {
                Error::validation(
                    "invalid mediaType (use 'audio', 'video', 'image', 'sticker' or 'document')",
                )
            })
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields required to fetch and decrypt a previously uploaded media blob.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct MediaDescriptor {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    /// SHA-256 of the plaintext.
    pub file_sha256: Vec<u8>,
    /// SHA-256 of the ciphertext.
    pub file_enc_sha256: Vec<u8>,
    pub mimetype: String,
    pub file_length: u64,
}

impl fmt::Debug for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDescriptor")
            .field("url", &self.url)
            .field("direct_path", &self.direct_path)
            .field("media_key", &"[REDACTED]")
            .field("mimetype", &self.mimetype)
            .field("file_length", &self.file_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_lookup() {
        assert_eq!(
            MediaKind::from_message_type("stickerMessage").unwrap(),
            MediaKind::Sticker
        );
        assert!(MediaKind::from_message_type("contactMessage").is_err());
        assert!(MediaKind::from_message_type("image").is_err());
    }

    #[test]
    fn media_type_is_case_insensitive() {
        assert_eq!(MediaKind::from_media_type("Audio").unwrap(), MediaKind::Audio);
        assert!(MediaKind::from_media_type("gif").is_err());
    }

    #[test]
    fn debug_redacts_media_key() {
        let desc = MediaDescriptor {
            media_key: b"secret-key".to_vec(),
            ..Default::default()
        };
        let out = format!("{desc:?}");
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("secret"));
    }
}
