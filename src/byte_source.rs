//! Seekable byte stream abstraction the frame reader drives.
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// A seekable byte stream with absolute position and size tracking.
///
/// `read` never turns a short read into an I/O error itself — it reports
/// the actual byte count and leaves it to the caller to decide whether a
/// count short of what it asked for means a truncated frame. This is what
/// lets `FrameReader` surface the dedicated `FrameError::Truncated` variant
/// for a short length prefix or frame body, rather than a generic `Io`.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes, filling `buf` from the start and
    /// returning how many bytes were actually read. Returns `0` only when
    /// already at EOF; a return value strictly between `0` and
    /// `buf.len()` means the stream ended partway through this read.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Seek to an absolute byte offset from the start of the stream.
    fn seek_absolute(&mut self, pos: u64) -> std::io::Result<()>;

    /// Seek by a signed offset relative to the current position.
    fn seek_relative(&mut self, delta: i64) -> std::io::Result<()>;

    /// Current absolute position.
    fn position(&mut self) -> std::io::Result<u64>;

    /// Total size of the stream.
    fn size(&self) -> u64;

    /// Whether the current position is at the end of the stream.
    fn eof(&mut self) -> std::io::Result<bool> {
        Ok(self.position()? >= self.size())
    }
}

/// `ByteSource` implementation over a buffered file handle.
pub struct FileSource {
    reader: BufReader<File>,
    size: u64,
}

impl FileSource {
    /// Open `path` for reading.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut read_total = 0;
        while read_total < buf.len() {
            match self.reader.read(&mut buf[read_total..]) {
                Ok(0) => break,
                Ok(n) => read_total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(read_total)
    }

    fn seek_absolute(&mut self, pos: u64) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn seek_relative(&mut self, delta: i64) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    fn position(&mut self) -> std::io::Result<u64> {
        self.reader.stream_position()
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// In-memory `ByteSource`, used by tests to build synthetic backup streams
/// without touching the filesystem.
pub struct MemorySource {
    data: Vec<u8>,
    pos: u64,
}

impl MemorySource {
    /// Wrap `data` as a seekable source starting at offset 0.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = self.pos as usize;
        let available = self.data.len().saturating_sub(pos);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek_absolute(&mut self, pos: u64) -> std::io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn seek_relative(&mut self, delta: i64) -> std::io::Result<()> {
        self.pos = (self.pos as i64 + delta).max(0) as u64;
        Ok(())
    }

    fn position(&mut self) -> std::io::Result<u64> {
        Ok(self.pos)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reports_eof_at_end() {
        let mut src = MemorySource::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert!(src.eof().unwrap());
        let mut empty = [0u8; 0];
        assert_eq!(src.read(&mut empty).unwrap(), 0);
    }

    #[test]
    fn memory_source_short_read_mid_stream_returns_partial_count() {
        let mut src = MemorySource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn seek_relative_and_absolute_agree() {
        let mut src = MemorySource::new(vec![0; 100]);
        src.seek_absolute(40).unwrap();
        src.seek_relative(10).unwrap();
        assert_eq!(src.position().unwrap(), 50);
    }
}
