//! Streaming zip construction.
//!
//! [`ArchiveWriter`] appends entries to a zip written straight into an
//! async sink; nothing but the entry being written is held in memory. For
//! HTTP responses the sink is the write half of a bounded in-memory pipe
//! whose read half becomes the response body (see [`response_body`]), so a
//! slow client blocks `append` instead of growing a buffer.

use std::collections::HashSet;
use std::path::PathBuf;

use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use axum::body::Body;
use bytes::Bytes;
use futures::io::AsyncWriteExt as _;
use futures::StreamExt;
use mediabatch_common::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::DropGuard;

/// Read size when copying a file into an entry.
const COPY_CHUNK: usize = 64 * 1024;

/// Where an entry's bytes come from.
#[derive(Debug)]
pub enum EntrySource {
    /// An encoded buffer already in memory.
    Bytes(Bytes),
    /// A file copied verbatim, read in chunks while the entry is written.
    File(PathBuf),
}

/// Totals for a finished archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    /// Uncompressed bytes across all entries.
    pub bytes: u64,
}

/// Incremental zip writer over an async sink.
pub struct ArchiveWriter<W: AsyncWrite + Unpin> {
    zip: ZipFileWriter<W>,
    names: HashSet<String>,
    summary: ArchiveSummary,
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            zip: ZipFileWriter::with_tokio(sink),
            names: HashSet::new(),
            summary: ArchiveSummary::default(),
        }
    }

    /// Write one complete entry. Returns its uncompressed size.
    ///
    /// The entry's bytes are written contiguously. Any failure, including
    /// a source that fails midway, leaves the archive unusable: the caller
    /// must abandon it.
    pub async fn append(&mut self, name: &str, source: EntrySource) -> Result<u64> {
        if !self.names.insert(name.to_string()) {
            return Err(Error::archive(format!("duplicate entry name: {name}")));
        }

        let entry = ZipEntryBuilder::new(name.to_string().into(), Compression::Deflate);
        let size = match source {
            EntrySource::Bytes(data) => {
                self.zip
                    .write_entry_whole(entry, &data)
                    .await
                    .map_err(|e| Error::archive(format!("failed to write {name}: {e}")))?;
                data.len() as u64
            }
            EntrySource::File(path) => {
                let mut file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| Error::archive(format!("failed to open {name}: {e}")))?;
                let mut writer = self
                    .zip
                    .write_entry_stream(entry)
                    .await
                    .map_err(|e| Error::archive(format!("failed to start {name}: {e}")))?;
                let size = copy_into(&mut file, &mut writer).await?;
                writer
                    .close()
                    .await
                    .map_err(|e| Error::archive(format!("failed to finish {name}: {e}")))?;
                size
            }
        };

        self.summary.entries += 1;
        self.summary.bytes += size;
        tracing::trace!(entry = name, bytes = size, "Appended archive entry");
        Ok(size)
    }

    /// Entries written so far.
    pub fn entries(&self) -> usize {
        self.summary.entries
    }

    /// Write the central directory and hand back the sink.
    pub async fn finish(self) -> Result<(ArchiveSummary, W)> {
        let sink = self
            .zip
            .close()
            .await
            .map_err(|e| Error::archive(format!("failed to finalize archive: {e}")))?;
        Ok((self.summary, sink.into_inner()))
    }
}

async fn copy_into<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: futures::io::AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| Error::archive(format!("failed to write entry data: {e}")))?;
        total += n as u64;
    }
}

/// Turn the read half of the archive pipe into a response body.
///
/// The body yields archive bytes until the writer drops its half, then waits
/// for the writer's `outcome`: on failure it ends with an error so the
/// connection is closed abruptly instead of looking like a complete zip.
/// `guard` lives as long as the body, so dropping the body (client gone)
/// cancels the writer.
pub fn response_body<R>(
    reader: R,
    outcome: oneshot::Receiver<std::result::Result<(), String>>,
    guard: DropGuard,
) -> Body
where
    R: AsyncRead + Send + 'static,
{
    let data = ReaderStream::new(reader);
    let trailer = futures::stream::once(async move {
        match outcome.await {
            Ok(Ok(())) => None,
            Ok(Err(message)) => Some(Err(std::io::Error::other(message))),
            Err(_) => Some(Err(std::io::Error::other("archive writer stopped"))),
        }
    })
    .filter_map(|item| async move { item });

    let stream = data.chain(trailer).map(move |item| {
        let _ = &guard;
        item
    });

    Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io::{Cursor, Read};
    use tokio_util::sync::CancellationToken;

    fn read_back(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut file = zip.by_index(i).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_mixed_sources() {
        let dir = tempfile::tempdir().unwrap();
        let on_disk = dir.path().join("photo.png");
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&on_disk, &big).unwrap();

        let mut writer = ArchiveWriter::new(Vec::new());
        writer
            .append("task2/b.png", EntrySource::Bytes(Bytes::from_static(b"bbb")))
            .await
            .unwrap();
        writer
            .append("task1/photo.png", EntrySource::File(on_disk))
            .await
            .unwrap();
        writer
            .append("task1/empty.png", EntrySource::Bytes(Bytes::new()))
            .await
            .unwrap();
        assert_eq!(writer.entries(), 3);

        let (summary, sink) = writer.finish().await.unwrap();
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.bytes, 3 + big.len() as u64);

        let mut entries = read_back(sink);
        entries.sort();
        assert_eq!(entries[0], ("task1/empty.png".to_string(), Vec::new()));
        assert_eq!(entries[1], ("task1/photo.png".to_string(), big));
        assert_eq!(entries[2], ("task2/b.png".to_string(), b"bbb".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_archive_is_valid() {
        let (summary, sink) = ArchiveWriter::new(Vec::new()).finish().await.unwrap();
        assert_eq!(summary, ArchiveSummary::default());
        assert!(read_back(sink).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_fatal() {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer
            .append("img1.png", EntrySource::Bytes(Bytes::from_static(b"1")))
            .await
            .unwrap();
        let err = writer
            .append("img1.png", EntrySource::Bytes(Bytes::from_static(b"2")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[tokio::test]
    async fn test_missing_file_source_fails() {
        let mut writer = ArchiveWriter::new(Vec::new());
        let err = writer
            .append("x.png", EntrySource::File(PathBuf::from("/nonexistent/x.png")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
        assert!(err.to_string().contains("x.png"));
    }

    #[tokio::test]
    async fn test_body_streams_through_small_pipe() {
        let (reader, pipe) = tokio::io::duplex(1024);
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let body = response_body(reader, rx, token.clone().drop_guard());

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let expected = payload.clone();
        let producer = tokio::spawn(async move {
            let mut writer = ArchiveWriter::new(pipe);
            writer
                .append("big.bin", EntrySource::Bytes(Bytes::from(payload)))
                .await
                .unwrap();
            let (summary, pipe) = writer.finish().await.unwrap();
            drop(pipe);
            tx.send(Ok(())).unwrap();
            summary
        });

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(producer.await.unwrap().entries, 1);
        assert_eq!(read_back(bytes.to_vec()), vec![("big.bin".to_string(), expected)]);
    }

    #[tokio::test]
    async fn test_body_errors_when_writer_fails() {
        let (reader, pipe) = tokio::io::duplex(1024);
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let body = response_body(reader, rx, token.clone().drop_guard());

        drop(pipe);
        tx.send(Err("decode failed".to_string())).unwrap();

        assert!(body.collect().await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_body_cancels_writer() {
        let (reader, _pipe) = tokio::io::duplex(1024);
        let token = CancellationToken::new();
        let (_tx, rx) = oneshot::channel();
        let body = response_body(reader, rx, token.clone().drop_guard());

        assert!(!token.is_cancelled());
        drop(body);
        assert!(token.is_cancelled());
    }
}
