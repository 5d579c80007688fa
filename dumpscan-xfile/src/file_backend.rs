use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{OpenMode, XFile, XFileBackend, XFileError};

/// Backend for `std::fs::File`
pub struct FileBackend {
    file: File,
}

impl XFileBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn tell(&mut self) -> Option<io::Result<u64>> {
        Some(self.file.stream_position())
    }

    fn seek(&mut self, offset: u64) -> Option<io::Result<()>> {
        Some(self.file.seek(SeekFrom::Start(offset)).map(drop))
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Wrap an already opened file.
///
/// Seekability is tested on open, so pipes and FIFOs end up non-seekable.
pub fn open_file(mut file: File, mode: OpenMode) -> XFile {
    let seekable = file.stream_position().is_ok();
    XFile::new(Box::new(FileBackend { file }), mode, seekable)
}

/// Open a file by path.
///
/// With [`OpenMode::ReadWrite`] the file is created if it does not exist.
pub fn open_path<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<XFile, XFileError> {
    let path = path.as_ref();
    let file = match mode {
        OpenMode::ReadOnly => File::open(path),
        OpenMode::ReadWrite => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path),
    }
    .map_err(|err| {
        log::debug!("unable to open {:?} - {}", path, err);
        err
    })?;

    Ok(open_file(file, mode))
}
