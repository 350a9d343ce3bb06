//! Media model: target still-image formats and content sniffing.
//!
//! Sniffing inspects the leading bytes of a file instead of trusting its
//! name or a caller-declared content type. Still images are recognised with
//! [`image::guess_format`]; video containers by their magic bytes.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of leading bytes inspected when sniffing a file.
const SNIFF_LEN: usize = 256;

/// MPEG transport stream packet size.
const TS_PACKET_LEN: usize = 188;

/// A still-image format a job may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Every format on the allow-list.
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Webp];

    /// The MIME type naming this format.
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// File extension used for archive entries.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    /// The ffmpeg encoder producing this format.
    pub fn ffmpeg_codec(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "mjpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "libwebp",
        }
    }

    /// Whether a sniffed MIME type already is this format.
    pub fn matches_mime(self, mime: &str) -> bool {
        self.mime().eq_ignore_ascii_case(mime)
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ImageFormat::ALL
            .into_iter()
            .find(|f| f.matches_mime(s.trim()))
            .ok_or_else(|| Error::validation(format!("unsupported target type: {s}")))
    }
}

impl TryFrom<String> for ImageFormat {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ImageFormat> for String {
    fn from(format: ImageFormat) -> Self {
        format.mime().to_string()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Broad media kind of a sniffed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Result of content sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedType {
    pub kind: MediaKind,
    pub mime: &'static str,
}

impl SniffedType {
    fn image(mime: &'static str) -> Self {
        Self {
            kind: MediaKind::Image,
            mime,
        }
    }

    fn video(mime: &'static str) -> Self {
        Self {
            kind: MediaKind::Video,
            mime,
        }
    }
}

/// Sniff the media type of a file from its leading bytes.
///
/// Returns `Ok(None)` for files that are neither a recognised image nor a
/// recognised video container.
pub fn sniff_path(path: &Path) -> std::io::Result<Option<SniffedType>> {
    let file = std::fs::File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(sniff_bytes(&head))
}

/// Sniff the media type of an in-memory prefix.
pub fn sniff_bytes(head: &[u8]) -> Option<SniffedType> {
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return sniff_iso_brand(&head[8..12]);
    }

    if let Ok(format) = image::guess_format(head) {
        return Some(SniffedType::image(format.to_mime_type()));
    }

    sniff_video_container(head)
}

/// ISO base media files share the `ftyp` box; the major brand tells stills
/// (AVIF/HEIF) apart from movies.
fn sniff_iso_brand(brand: &[u8]) -> Option<SniffedType> {
    match brand {
        b"avif" | b"avis" => Some(SniffedType::image("image/avif")),
        b"heic" | b"heix" | b"mif1" | b"msf1" => Some(SniffedType::image("image/heic")),
        b"qt  " => Some(SniffedType::video("video/quicktime")),
        b"M4A " | b"M4B " | b"M4P " => None,
        b if b.starts_with(b"3g") => Some(SniffedType::video("video/3gpp")),
        _ => Some(SniffedType::video("video/mp4")),
    }
}

fn sniff_video_container(head: &[u8]) -> Option<SniffedType> {
    if head.len() < 4 {
        return None;
    }

    // Matroska/WebM (EBML header)
    if head[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        let is_webm = head.windows(4).any(|w| w == b"webm");
        return Some(SniffedType::video(if is_webm {
            "video/webm"
        } else {
            "video/x-matroska"
        }));
    }

    // QuickTime files that start with the movie atoms instead of `ftyp`
    if head.len() >= 8 && matches!(&head[4..8], b"moov" | b"mdat" | b"free" | b"wide") {
        return Some(SniffedType::video("video/quicktime"));
    }

    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"AVI " {
        return Some(SniffedType::video("video/x-msvideo"));
    }

    if head.starts_with(b"FLV\x01") {
        return Some(SniffedType::video("video/x-flv"));
    }

    if head.starts_with(&[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11]) {
        return Some(SniffedType::video("video/x-ms-asf"));
    }

    if head.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || head.starts_with(&[0x00, 0x00, 0x01, 0xB3])
    {
        return Some(SniffedType::video("video/mpeg"));
    }

    if head.len() > TS_PACKET_LEN && head[0] == 0x47 && head[TS_PACKET_LEN] == 0x47 {
        return Some(SniffedType::video("video/mp2t"));
    }

    None
}
