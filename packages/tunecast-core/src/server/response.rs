//! HTTP response writing.
//!
//! Every response carries an absolute `Content-Length` and a `DAAP-Server`
//! header; there is no chunked transfer encoding. File streaming reads the
//! source in 8 KiB blocks so a slow client throttles the disk side for
//! free.
//!
//! Partial content deliberately reproduces the upper bound the original
//! servers shipped: `Content-Range: bytes <off>-<len>/<len+1>` instead of
//! the RFC form. Deployed clients were written against it.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::dmap::Node;
use crate::library::AudioSource;

/// Streaming block size.
const FILE_CHUNK: usize = 8 * 1024;

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Serializes responses onto one connection's write half.
pub struct ResponseWriter<W> {
    writer: W,
    /// Value of the `DAAP-Server` header, e.g. `tunecast/0.4.2`.
    server: String,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(writer: W, server: impl Into<String>) -> Self {
        Self { writer, server: server.into() }
    }

    async fn write_head(
        &mut self,
        status: u16,
        content_length: u64,
        extra: &[(&str, &str)],
    ) -> io::Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", status, status_reason(status));
        head.push_str(&format!("DAAP-Server: {}\r\n", self.server));
        for (name, value) in extra {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {content_length}\r\n\r\n"));
        self.writer.write_all(head.as_bytes()).await
    }

    /// Status 200 with an encoded DMAP body.
    pub async fn write_dmap(&mut self, node: &Node) -> io::Result<()> {
        let body = Bytes::from(node.encode());
        self.write_head(
            200,
            body.len() as u64,
            &[("Content-Type", "application/x-dmap-tagged")],
        )
        .await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await
    }

    /// An error (or bare success) status with a short text body.
    pub async fn write_error(&mut self, status: u16, body: &str) -> io::Result<()> {
        self.write_head(
            status,
            body.len() as u64,
            &[("Content-Type", "text/plain; charset=utf-8")],
        )
        .await?;
        self.writer.write_all(body.as_bytes()).await?;
        self.writer.flush().await
    }

    /// 401 with a Basic challenge for `realm`.
    pub async fn write_auth_challenge(&mut self, realm: &str) -> io::Result<()> {
        let challenge = format!("Basic realm=\"{realm}\"");
        self.write_head(401, 0, &[("WWW-Authenticate", challenge.as_str())])
            .await?;
        self.writer.flush().await
    }

    /// Streams an audio source, honoring an open-ended range.
    ///
    /// `offset` 0 answers 200; anything else answers 206 with the
    /// compatibility `Content-Range` form. Stops after `len - offset`
    /// bytes, when the source runs dry, or when `cancel` fires mid-stream.
    pub async fn write_file(
        &mut self,
        mut source: AudioSource,
        offset: u64,
        mime: &str,
        cancel: &CancellationToken,
    ) -> io::Result<()> {
        let offset = offset.min(source.len);
        let remaining = source.len - offset;

        if offset == 0 {
            self.write_head(200, remaining, &[("Content-Type", mime)]).await?;
        } else {
            let content_range =
                format!("bytes {}-{}/{}", offset, source.len, source.len + 1);
            self.write_head(
                206,
                remaining,
                &[("Content-Type", mime), ("Content-Range", content_range.as_str())],
            )
            .await?;
        }

        // skip to the range start; sources hand us the file from byte 0
        if offset > 0 {
            tokio::io::copy(&mut (&mut source.reader).take(offset), &mut tokio::io::sink())
                .await?;
        }

        let mut left = remaining;
        let mut chunk = [0u8; FILE_CHUNK];
        while left > 0 {
            if cancel.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "server stopping"));
            }
            let want = FILE_CHUNK.min(left as usize);
            let n = source.reader.read(&mut chunk[..want]).await?;
            if n == 0 {
                break;
            }
            self.writer.write_all(&chunk[..n]).await?;
            left -= n as u64;
        }
        self.writer.flush().await
    }

    /// 200 with raw image bytes under `image/<subtype>`.
    pub async fn write_artwork(&mut self, bytes: &[u8], mime_subtype: &str) -> io::Result<()> {
        let content_type = format!("image/{mime_subtype}");
        self.write_head(200, bytes.len() as u64, &[("Content-Type", content_type.as_str())])
            .await?;
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }
}
