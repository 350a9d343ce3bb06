//! Cutting a concatenated image stream back into whole images.
//!
//! ffmpeg's `image2pipe` muxer writes encoded images back to back with no
//! framing, and pipe reads return arbitrary slices of that stream. The
//! [`FrameSplitter`] buffers incoming bytes and walks each format's own
//! structure to find where one image ends:
//!
//! - **PNG**: signature, then length-prefixed chunks up to `IEND`.
//! - **JPEG**: `SOI`, marker segments, entropy-coded scan data (where `FF00`
//!   stuffing and `RSTn` markers are skipped), up to `EOI`.
//! - **WebP**: a single RIFF container whose header carries its length.
//!
//! Scanning is resumable: a partial image leaves a cursor behind so later
//! pushes continue where the previous attempt stopped.

use bytes::{Bytes, BytesMut};
use mediabatch_common::ImageFormat;

/// Upper bound on a single encoded image.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Errors raised when the stream does not have the expected structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("stream does not start with a {format} signature")]
    BadSignature { format: ImageFormat },

    #[error("malformed {format} data at byte {offset}: {reason}")]
    Malformed {
        format: ImageFormat,
        offset: usize,
        reason: &'static str,
    },

    #[error("encoded image exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Incremental splitter for one format.
#[derive(Debug)]
pub struct FrameSplitter {
    format: ImageFormat,
    buf: BytesMut,
    /// Offset in `buf` up to which the current image has been validated.
    cursor: usize,
    /// JPEG only: the cursor is inside entropy-coded scan data.
    in_scan: bool,
}

impl FrameSplitter {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            buf: BytesMut::with_capacity(64 * 1024),
            cursor: 0,
            in_scan: false,
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as part of a complete image.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Return the next complete image, or `None` if more input is needed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, SplitError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let end = match self.format {
            ImageFormat::Png => self.scan_png()?,
            ImageFormat::Jpeg => self.scan_jpeg()?,
            ImageFormat::Webp => self.scan_webp()?,
        };

        match end {
            Some(end) => {
                self.cursor = 0;
                self.in_scan = false;
                Ok(Some(self.buf.split_to(end).freeze()))
            }
            None if self.buf.len() > MAX_FRAME_LEN => Err(SplitError::TooLarge {
                limit: MAX_FRAME_LEN,
            }),
            None => Ok(None),
        }
    }

    fn malformed(&self, offset: usize, reason: &'static str) -> SplitError {
        SplitError::Malformed {
            format: self.format,
            offset,
            reason,
        }
    }

    fn scan_png(&mut self) -> Result<Option<usize>, SplitError> {
        let buf = &self.buf[..];

        if self.cursor == 0 {
            if buf.len() < PNG_SIGNATURE.len() {
                return Ok(None);
            }
            if &buf[..8] != PNG_SIGNATURE {
                return Err(SplitError::BadSignature {
                    format: self.format,
                });
            }
            self.cursor = PNG_SIGNATURE.len();
        }

        // length (4) + type (4) + data + crc (4)
        loop {
            let at = self.cursor;
            if buf.len() < at + 8 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize;
            let chunk_end = at
                .checked_add(12)
                .and_then(|n| n.checked_add(len))
                .filter(|&n| n <= MAX_FRAME_LEN)
                .ok_or(SplitError::TooLarge {
                    limit: MAX_FRAME_LEN,
                })?;
            if buf.len() < chunk_end {
                return Ok(None);
            }
            let is_end = &buf[at + 4..at + 8] == b"IEND";
            self.cursor = chunk_end;
            if is_end {
                return Ok(Some(chunk_end));
            }
        }
    }

    fn scan_jpeg(&mut self) -> Result<Option<usize>, SplitError> {
        if self.cursor == 0 {
            if self.buf.len() < 2 {
                return Ok(None);
            }
            if self.buf[..2] != [0xFF, 0xD8] {
                return Err(SplitError::BadSignature {
                    format: self.format,
                });
            }
            self.cursor = 2;
        }

        loop {
            if self.in_scan {
                match self.skip_scan_data() {
                    Some(marker_at) => {
                        self.cursor = marker_at;
                        self.in_scan = false;
                    }
                    None => return Ok(None),
                }
            }

            let at = self.cursor;
            let buf = &self.buf[..];
            if buf.len() < at + 2 {
                return Ok(None);
            }
            if buf[at] != 0xFF {
                return Err(self.malformed(at, "expected a marker"));
            }

            match buf[at + 1] {
                // fill byte before a marker
                0xFF => self.cursor = at + 1,
                // EOI
                0xD9 => return Ok(Some(at + 2)),
                // standalone markers without a length
                0x01 | 0xD0..=0xD7 => self.cursor = at + 2,
                0xD8 => return Err(self.malformed(at, "nested start of image")),
                marker => {
                    if buf.len() < at + 4 {
                        return Ok(None);
                    }
                    let len = u16::from_be_bytes([buf[at + 2], buf[at + 3]]) as usize;
                    if len < 2 {
                        return Err(self.malformed(at, "segment length below 2"));
                    }
                    let segment_end = at + 2 + len;
                    if buf.len() < segment_end {
                        return Ok(None);
                    }
                    self.cursor = segment_end;
                    // SOS: entropy-coded data follows the header
                    if marker == 0xDA {
                        self.in_scan = true;
                    }
                }
            }
        }
    }

    /// Advance through scan data. Returns the offset of the marker ending
    /// the scan, or `None` after saving progress when input runs out.
    fn skip_scan_data(&mut self) -> Option<usize> {
        let buf = &self.buf[..];
        let mut pos = self.cursor;

        loop {
            let Some(offset) = buf[pos..].iter().position(|&b| b == 0xFF) else {
                self.cursor = buf.len();
                return None;
            };
            let at = pos + offset;
            if at + 1 >= buf.len() {
                self.cursor = at;
                return None;
            }
            match buf[at + 1] {
                0x00 | 0xD0..=0xD7 => pos = at + 2,
                0xFF => pos = at + 1,
                _ => return Some(at),
            }
        }
    }

    fn scan_webp(&mut self) -> Result<Option<usize>, SplitError> {
        let buf = &self.buf[..];
        if buf.len() < 12 {
            return Ok(None);
        }
        if &buf[..4] != b"RIFF" || &buf[8..12] != b"WEBP" {
            return Err(SplitError::BadSignature {
                format: self.format,
            });
        }

        let size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        let total = 8 + size + (size & 1);
        if total > MAX_FRAME_LEN {
            return Err(SplitError::TooLarge {
                limit: MAX_FRAME_LEN,
            });
        }
        self.cursor = 12;
        Ok((buf.len() >= total).then_some(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        out
    }

    fn fake_png(payload: u8) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        out.extend(png_chunk(b"IHDR", &[payload; 13]));
        out.extend(png_chunk(b"IDAT", &[payload, 0xFF, 0xD9, b'I', b'E', b'N', b'D']));
        out.extend(png_chunk(b"IEND", &[]));
        out
    }

    fn fake_jpeg(payload: u8) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        // APP0 with 14 bytes of body
        out.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        out.extend_from_slice(&[payload; 14]);
        // SOS header
        out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08]);
        out.extend_from_slice(&[1, 1, 0, 0, 63, 0]);
        // scan data with byte stuffing, a restart marker and fill bytes
        out.extend_from_slice(&[payload, 0xFF, 0x00, 0x34, 0xFF, 0xD3, 0x56, 0xFF, 0xFF]);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn fake_webp(payload: u8) -> Vec<u8> {
        let mut body = b"VP8L".to_vec();
        body.extend_from_slice(&5u32.to_le_bytes());
        body.extend_from_slice(&[payload; 5]);
        // odd chunk padding
        body.push(0);
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&((4 + body.len()) as u32).to_le_bytes());
        out.extend_from_slice(b"WEBP");
        out.extend_from_slice(&body);
        out
    }

    fn split_in_chunks(format: ImageFormat, stream: &[u8], chunk: usize) -> Vec<Bytes> {
        let mut splitter = FrameSplitter::new(format);
        let mut frames = Vec::new();
        for piece in stream.chunks(chunk) {
            splitter.push(piece);
            while let Some(frame) = splitter.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert!(splitter.is_empty(), "{} bytes left over", splitter.remaining());
        frames
    }

    fn check_format(format: ImageFormat, make: fn(u8) -> Vec<u8>) {
        let images: Vec<Vec<u8>> = (1..=3).map(make).collect();
        let stream = images.concat();
        for chunk in [1, 2, 3, 7, 64, stream.len()] {
            let frames = split_in_chunks(format, &stream, chunk);
            assert_eq!(frames.len(), images.len(), "chunk size {chunk}");
            for (frame, image) in frames.iter().zip(&images) {
                assert_eq!(&frame[..], &image[..], "chunk size {chunk}");
            }
        }
    }

    #[test]
    fn test_split_png_stream() {
        check_format(ImageFormat::Png, fake_png);
    }

    #[test]
    fn test_split_jpeg_stream() {
        check_format(ImageFormat::Jpeg, fake_jpeg);
    }

    #[test]
    fn test_split_webp_stream() {
        check_format(ImageFormat::Webp, fake_webp);
    }

    #[test]
    fn test_partial_frame_is_held_back() {
        let image = fake_png(9);
        let mut splitter = FrameSplitter::new(ImageFormat::Png);
        splitter.push(&image[..image.len() - 1]);
        assert_eq!(splitter.next_frame().unwrap(), None);
        assert_eq!(splitter.remaining(), image.len() - 1);

        splitter.push(&image[image.len() - 1..]);
        assert_eq!(splitter.next_frame().unwrap().unwrap().len(), image.len());
        assert!(splitter.is_empty());
    }

    #[test]
    fn test_wrong_signature() {
        let mut splitter = FrameSplitter::new(ImageFormat::Jpeg);
        splitter.push(&fake_png(1));
        assert_eq!(
            splitter.next_frame(),
            Err(SplitError::BadSignature {
                format: ImageFormat::Jpeg
            })
        );

        let mut splitter = FrameSplitter::new(ImageFormat::Webp);
        splitter.push(b"RIFF\x10\0\0\0AVI LIST....");
        assert!(matches!(
            splitter.next_frame(),
            Err(SplitError::BadSignature { .. })
        ));
    }

    #[test]
    fn test_jpeg_garbage_between_segments() {
        let mut splitter = FrameSplitter::new(ImageFormat::Jpeg);
        splitter.push(&[0xFF, 0xD8, 0x12, 0x34]);
        assert!(matches!(
            splitter.next_frame(),
            Err(SplitError::Malformed { offset: 2, .. })
        ));
    }

    #[test]
    fn test_empty_splitter_yields_nothing() {
        let mut splitter = FrameSplitter::new(ImageFormat::Png);
        assert_eq!(splitter.next_frame().unwrap(), None);
        assert_eq!(splitter.format(), ImageFormat::Png);
    }
}
