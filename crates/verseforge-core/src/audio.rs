//! Audio container normalization
//!
//! Providers return whatever their API emits (mpeg stream, RIFF wav, mp4
//! container). The normalize step sniffs the container from magic bytes and
//! tags the payload with a single `AudioFormat`, so downstream persistence
//! and naming branch on format alone, never on provider identity.
//! Unrecognized payloads (HTML error pages, empty bodies) are rejected as
//! permanent failures. Transcoding between codecs is out of scope.

use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;

/// Recognized audio containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    M4a,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::M4a => "m4a",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::M4a => "audio/mp4",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Normalized audio payload: raw bytes plus their identified container.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

/// Identify the container from leading magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<AudioFormat> {
    if bytes.len() < 12 {
        return None;
    }
    // ID3 tag or bare MPEG frame sync
    if bytes.starts_with(b"ID3") || (bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
        return Some(AudioFormat::Mp3);
    }
    if bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WAVE" {
        return Some(AudioFormat::Wav);
    }
    // MP4 family: "ftyp" box at offset 4
    if &bytes[4..8] == b"ftyp" {
        return Some(AudioFormat::M4a);
    }
    None
}

/// Validate and tag a provider payload.
pub fn normalize(bytes: Vec<u8>) -> Result<AudioData, SynthesisError> {
    match sniff_format(&bytes) {
        Some(format) => Ok(AudioData { format, bytes }),
        None => Err(SynthesisError::Permanent(format!(
            "provider returned unrecognized audio payload ({} bytes)",
            bytes.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut v = prefix.to_vec();
        v.resize(64, 0);
        v
    }

    #[test]
    fn test_sniff_mp3_id3() {
        assert_eq!(sniff_format(&padded(b"ID3\x04\x00")), Some(AudioFormat::Mp3));
    }

    #[test]
    fn test_sniff_mp3_frame_sync() {
        assert_eq!(
            sniff_format(&padded(&[0xFF, 0xFB, 0x90, 0x00])),
            Some(AudioFormat::Mp3)
        );
    }

    #[test]
    fn test_sniff_wav() {
        let mut bytes = b"RIFF\x24\x00\x00\x00WAVE".to_vec();
        bytes.resize(64, 0);
        assert_eq!(sniff_format(&bytes), Some(AudioFormat::Wav));
    }

    #[test]
    fn test_sniff_m4a() {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x20];
        bytes.extend_from_slice(b"ftypM4A ");
        bytes.resize(64, 0);
        assert_eq!(sniff_format(&bytes), Some(AudioFormat::M4a));
    }

    #[test]
    fn test_normalize_rejects_html_error_page() {
        let err = normalize(padded(b"<html><body>oops")).unwrap_err();
        assert!(matches!(err, SynthesisError::Permanent(_)));
    }

    #[test]
    fn test_normalize_rejects_short_payload() {
        assert!(normalize(vec![0xFF]).is_err());
    }
}
