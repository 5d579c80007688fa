use std::io;

use crate::{OpenMode, XFile, XFileBackend};

/// Memory buffer backend
///
/// Always seekable. Writes past the end grow the buffer, a seek beyond
/// the end followed by a write fills the gap with zeros.
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryBackend {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn checked_end(&self, count: u64) -> io::Result<usize> {
        usize::try_from(count)
            .ok()
            .and_then(|count| self.pos.checked_add(count))
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "memory xfile: {} bytes requested at offset {}, size {}",
                        count,
                        self.pos,
                        self.data.len()
                    ),
                )
            })
    }
}

impl XFileBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let end = self.checked_end(buf.len() as u64)?;
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let end = self.pos.checked_add(buf.len()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "memory xfile: {} bytes at offset {} overflow the buffer",
                    buf.len(),
                    self.pos
                ),
            )
        })?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Option<io::Result<()>> {
        Some(match usize::try_from(offset) {
            Ok(offset) => {
                self.pos = offset;
                Ok(())
            }
            Err(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("memory xfile: offset {} out of range", offset),
            )),
        })
    }

    fn skip(&mut self, count: u64) -> Option<io::Result<()>> {
        Some(self.checked_end(count).map(|end| self.pos = end))
    }

    fn contents(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}

/// Open a memory buffer as stream.
pub fn open_memory(data: Vec<u8>, mode: OpenMode) -> XFile {
    XFile::new(Box::new(MemoryBackend::new(data)), mode, true)
}

#[cfg(test)]
mod test {
    use anyhow::Error;

    use super::*;
    use crate::XFileError;

    #[test]
    fn test_memory_short_read_fails() -> Result<(), Error> {
        let mut xf = open_memory(b"abc".to_vec(), OpenMode::ReadOnly);
        let mut buf = [0u8; 4];
        let err = xf.read(&mut buf).unwrap_err();
        assert!(err.is_eof());
        // nothing was consumed
        assert_eq!(xf.tell()?, 0);
        xf.read(&mut buf[..3])?;
        assert_eq!(&buf[..3], b"abc");
        Ok(())
    }

    #[test]
    fn test_memory_write_and_overwrite() -> Result<(), Error> {
        let mut xf = open_memory(Vec::new(), OpenMode::ReadWrite);
        xf.write(b"hello world")?;
        xf.seek(6)?;
        xf.write(b"there")?;
        xf.seek(14)?;
        xf.write(b"!")?;
        assert_eq!(xf.contents(), Some(&b"hello there\0\0\0!"[..]));
        assert_eq!(xf.tell()?, 15);
        Ok(())
    }

    #[test]
    fn test_memory_skip_past_end() {
        let mut xf = open_memory(vec![0u8; 8], OpenMode::ReadOnly);
        assert!(xf.skip(9).unwrap_err().is_eof());
        assert_eq!(xf.position(), 0);
    }

    #[test]
    fn test_memory_write_offset_overflow() -> Result<(), Error> {
        let mut xf = open_memory(Vec::new(), OpenMode::ReadWrite);
        xf.seek(usize::MAX as u64 - 1)?;
        assert!(matches!(xf.write(b"abc"), Err(XFileError::Io(_))));
        assert_eq!(xf.position(), usize::MAX as u64 - 1);
        assert_eq!(xf.contents(), Some(&b""[..]));
        Ok(())
    }
}
