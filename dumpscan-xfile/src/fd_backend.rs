use std::io;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::unistd::{self, Whence};

use crate::{OpenMode, XFile, XFileBackend};

/// Backend for a raw file descriptor
///
/// The descriptor is owned and closed on `close`.
pub struct FdBackend {
    fd: RawFd,
    closed: bool,
}

impl FdBackend {
    fn lseek(&self, offset: i64, whence: Whence) -> io::Result<u64> {
        let pos = unistd::lseek(self.fd, offset, whence)?;
        Ok(pos as u64)
    }
}

impl XFileBackend for FdBackend {
    fn read(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match unistd::read(self.fd, buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("fd {}: unexpected end of file", self.fd),
                    ))
                }
                Ok(n) => buf = &mut buf[n..],
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match unistd::write(self.fd, buf) {
                Ok(0) => proxmox_lang::io_bail!("fd {}: write returned zero bytes", self.fd),
                Ok(n) => buf = &buf[n..],
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn tell(&mut self) -> Option<io::Result<u64>> {
        Some(self.lseek(0, Whence::SeekCur))
    }

    fn seek(&mut self, offset: u64) -> Option<io::Result<()>> {
        let offset = match i64::try_from(offset) {
            Ok(offset) => offset,
            Err(_) => {
                return Some(Err(proxmox_lang::io_format_err!(
                    "fd {}: seek offset {} out of range",
                    self.fd,
                    offset
                )))
            }
        };
        Some(self.lseek(offset, Whence::SeekSet).map(drop))
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        unistd::close(self.fd)?;
        Ok(())
    }
}

/// Open a stream on a file descriptor, taking ownership of it.
///
/// Pipes and sockets are detected as non-seekable. Those do not get a
/// position query either, so the counted position is used.
pub fn open_fd(fd: RawFd, mode: OpenMode) -> XFile {
    let seekable = unistd::lseek(fd, 0, Whence::SeekCur).is_ok();
    let backend = FdBackend { fd, closed: false };
    if seekable {
        XFile::new(Box::new(backend), mode, true)
    } else {
        XFile::new(Box::new(StreamFdBackend(backend)), mode, false)
    }
}

/// Non-seekable descriptor: read/write only.
struct StreamFdBackend(FdBackend);

impl XFileBackend for StreamFdBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.0.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.close()
    }
}

#[cfg(test)]
mod test {
    use std::os::unix::io::IntoRawFd;

    use anyhow::Error;

    use super::*;

    #[test]
    fn test_pipe_is_not_seekable() -> Result<(), Error> {
        let (rd, wr) = unistd::pipe()?;

        let mut writer = open_fd(wr, OpenMode::ReadWrite);
        let mut reader = open_fd(rd, OpenMode::ReadOnly);
        assert!(!reader.is_seekable());

        writer.write(b"abcdefgh")?;
        writer.close()?;

        // skip falls back to reading
        reader.skip(3)?;
        let mut buf = [0u8; 5];
        reader.read(&mut buf)?;
        assert_eq!(&buf, b"defgh");
        assert_eq!(reader.tell()?, 8);

        assert!(reader.read(&mut buf[..1]).unwrap_err().is_eof());
        Ok(())
    }

    #[test]
    fn test_regular_file_fd() -> Result<(), Error> {
        let mut path = std::path::PathBuf::from("./target/testout");
        path.push(std::module_path!());
        std::fs::create_dir_all(&path)?;
        path.push("fd-data");
        std::fs::write(&path, b"0123456789")?;

        let fd = std::fs::File::open(&path)?.into_raw_fd();
        let mut xf = open_fd(fd, OpenMode::ReadOnly);
        assert!(xf.is_seekable());
        xf.seek(7)?;
        let mut buf = [0u8; 3];
        xf.read(&mut buf)?;
        assert_eq!(&buf, b"789");
        assert_eq!(xf.tell()?, 10);
        Ok(())
    }
}
