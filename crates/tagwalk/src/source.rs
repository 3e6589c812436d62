//! Seekable byte sources the reader pulls from

use std::io::{Read, Seek, SeekFrom};

use crate::errors::{Error, Result};

/// Random-access byte source
///
/// `peek` is optional: sources that cannot look ahead without consuming keep
/// the default implementation, and any while-array or switch that needs to
/// inspect unconsumed bytes fails with [`Error::Capability`].
pub trait ByteSource {
    /// Move to an absolute position
    fn seek(&mut self, position: usize) -> Result<()>;

    /// Read up to `n` bytes and advance; fewer bytes means the data ran out
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;

    /// Return up to `n` bytes without advancing
    fn peek(&mut self, _n: usize) -> Result<Vec<u8>> {
        Err(Error::Capability("peek"))
    }

    /// Current absolute position
    fn position(&self) -> usize;

    /// Total length in bytes, if known
    fn len(&self) -> Option<usize>;
}

/// Byte source over a borrowed slice
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    /// Wrap a slice
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn window(&self, n: usize) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        let end = start.saturating_add(n).min(self.data.len());
        &self.data[start..end]
    }
}

impl ByteSource for SliceSource<'_> {
    fn seek(&mut self, position: usize) -> Result<()> {
        self.pos = position;
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let out = self.window(n).to_vec();
        self.pos += out.len();
        Ok(out)
    }

    fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.window(n).to_vec())
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn len(&self) -> Option<usize> {
        Some(self.data.len())
    }
}

/// Byte source over any `Read + Seek` stream. Peeking reads ahead and
/// seeks back.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    pos: usize,
}

impl<R: Read + Seek> StreamSource<R> {
    /// Wrap a stream positioned anywhere; reads start from offset 0
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    /// Unwrap the stream
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self, n: usize) -> Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(self.pos as u64))?;
        let mut out = Vec::with_capacity(n.min(64 * 1024));
        (&mut self.inner).take(n as u64).read_to_end(&mut out)?;
        Ok(out)
    }
}

impl<R: Read + Seek> ByteSource for StreamSource<R> {
    fn seek(&mut self, position: usize) -> Result<()> {
        self.pos = position;
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let out = self.fill(n)?;
        self.pos += out.len();
        Ok(out)
    }

    fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        self.fill(n)
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn len(&self) -> Option<usize> {
        None
    }
}

/// Byte source wrapper that hides `peek`, for sources that can only stream
#[derive(Debug)]
pub struct NoPeek<S>(pub S);

impl<S: ByteSource> ByteSource for NoPeek<S> {
    fn seek(&mut self, position: usize) -> Result<()> {
        self.0.seek(position)
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        self.0.read(n)
    }

    fn position(&self) -> usize {
        self.0.position()
    }

    fn len(&self) -> Option<usize> {
        self.0.len()
    }
}
