use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Result, ScatterError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    /// Byte offset of this chunk in the source stream.
    pub offset: u64,
    pub data: Vec<u8>,
}

pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}

/// Lazy fixed-size splitter. Every chunk but the last is exactly
/// `chunk_size` bytes; an input whose length is a multiple of
/// `chunk_size` has no short trailing chunk.
pub struct Chunker<R: Read> {
    inner: R,
    chunk_size: usize,
    next_index: u64,
    offset: u64,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(inner: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ScatterError::Config("chunk size must be > 0".into()));
        }
        Ok(Self {
            inner,
            chunk_size,
            next_index: 0,
            offset: 0,
            done: false,
        })
    }

    /// Fill `buf` completely unless EOF comes first; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> Chunker<R> {
    /// Resume splitting at a chunk boundary; numbering continues from
    /// `offset / chunk_size`.
    pub fn resume_at(mut inner: R, chunk_size: usize, offset: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ScatterError::Config("chunk size must be > 0".into()));
        }
        let cs = chunk_size as u64;
        if offset % cs != 0 {
            return Err(ScatterError::Ordering {
                expected: offset / cs,
                got: None,
            });
        }
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            inner,
            chunk_size,
            next_index: offset / cs,
            offset,
            done: false,
        })
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        let n = match self.fill(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };
        if n < self.chunk_size {
            self.done = true;
        }
        if n == 0 {
            return None;
        }
        buf.truncate(n);
        let chunk = Chunk {
            index: self.next_index,
            offset: self.offset,
            data: buf,
        };
        self.next_index += 1;
        self.offset += n as u64;
        Some(Ok(chunk))
    }
}

/// Ordered reassembly into a writer. Indices must arrive as 0, 1, 2, ...
pub struct Joiner<W: Write> {
    out: W,
    next_index: u64,
    written: u64,
}

impl<W: Write> Joiner<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            next_index: 0,
            written: 0,
        }
    }

    pub fn push(&mut self, index: u64, bytes: &[u8]) -> Result<()> {
        if index != self.next_index {
            return Err(ScatterError::Ordering {
                expected: self.next_index,
                got: Some(index),
            });
        }
        self.out.write_all(bytes)?;
        self.next_index += 1;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the writer; fails if fewer than `expected` chunks
    /// were pushed.
    pub fn finish(mut self, expected: u64) -> Result<W> {
        if self.next_index != expected {
            return Err(ScatterError::Ordering {
                expected: self.next_index,
                got: None,
            });
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Join an in-memory chunk sequence.
pub fn join<I>(chunks: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (u64, Vec<u8>)>,
{
    let mut joiner = Joiner::new(Vec::new());
    let mut count = 0u64;
    for (index, bytes) in chunks {
        joiner.push(index, &bytes)?;
        count += 1;
    }
    joiner.finish(count)
}
