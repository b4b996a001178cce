//! Streaming adapters around [`CipherTransform`].
//!
//! - [`CipherWriter`] - encrypting/decrypting `std::io::Write` wrapper
//! - [`CipherReader`] - encrypting/decrypting `std::io::Read` wrapper
//! - [`CipherSink`] - chunk sink over a tokio `AsyncWrite`, used by the
//!   download pipeline

use std::io::{self, Read, Write};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::cipher::CipherTransform;
use super::CryptoError;

const READ_BUFFER: usize = 4096;

fn to_io(err: CryptoError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

// ============================================================================
// CipherWriter
// ============================================================================

/// Transforms everything written before passing it to the inner writer
///
/// [`finish`](Self::finish) must be called to emit the final block; dropping
/// the writer without it truncates the output.
pub struct CipherWriter<W: Write> {
    inner: W,
    transform: CipherTransform,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(inner: W, transform: CipherTransform) -> Self {
        Self { inner, transform }
    }

    /// Writes the final block, flushes, and returns the inner writer
    pub fn finish(self) -> io::Result<W> {
        let Self {
            mut inner,
            transform,
        } = self;
        let tail = transform.finish().map_err(to_io)?;
        inner.write_all(&tail)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let out = self.transform.update(buf);
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ============================================================================
// CipherReader
// ============================================================================

/// Transforms everything read from the inner reader
pub struct CipherReader<R: Read> {
    inner: R,
    transform: Option<CipherTransform>,
    out: Vec<u8>,
    pos: usize,
}

impl<R: Read> CipherReader<R> {
    pub fn new(inner: R, transform: CipherTransform) -> Self {
        Self {
            inner,
            transform: Some(transform),
            out: Vec::new(),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.out.len() {
                let n = buf.len().min(self.out.len() - self.pos);
                buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }

            let Some(transform) = self.transform.as_mut() else {
                return Ok(0);
            };

            let mut chunk = [0u8; READ_BUFFER];
            let n = self.inner.read(&mut chunk)?;
            self.out = if n == 0 {
                match self.transform.take() {
                    Some(t) => t.finish().map_err(to_io)?,
                    None => Vec::new(),
                }
            } else {
                transform.update(&chunk[..n])
            };
            self.pos = 0;
        }
    }
}

// ============================================================================
// CipherSink
// ============================================================================

/// Async chunk sink that optionally transforms data before writing
///
/// Without a transform the sink writes chunks through unchanged.
pub struct CipherSink<W> {
    inner: W,
    transform: Option<CipherTransform>,
}

impl<W: AsyncWrite + Unpin> CipherSink<W> {
    pub fn new(inner: W, transform: Option<CipherTransform>) -> Self {
        Self { inner, transform }
    }

    /// Sink that writes data unchanged
    pub fn plain(inner: W) -> Self {
        Self::new(inner, None)
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.transform.as_mut() {
            Some(transform) => {
                let out = transform.update(chunk);
                self.inner.write_all(&out).await
            }
            None => self.inner.write_all(chunk).await,
        }
    }

    /// Writes the final block, flushes, and returns the inner writer
    pub async fn finish(mut self) -> io::Result<W> {
        if let Some(transform) = self.transform.take() {
            let tail = transform.finish().map_err(to_io)?;
            self.inner.write_all(&tail).await?;
        }
        self.inner.flush().await?;
        Ok(self.inner)
    }
}
