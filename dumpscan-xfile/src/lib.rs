//! Extensible file-like streams used to read and write AFS volume dumps.
//!
//! An [`XFile`] wraps one [`XFileBackend`] (a plain file, a file
//! descriptor, a memory buffer or an RPC call) and adds what the dump
//! codec needs on top of it:
//!
//! - a logical position counter, advanced by every successful transfer,
//! - capability flags (writable, seekable),
//! - `skip` emulation for backends which cannot skip or seek,
//! - an optional *passthru* target receiving a copy of every byte read.
//!
//! Backends either transfer the full amount of data or fail. A partial
//! read is reported as an `UnexpectedEof` error, the codec never
//! tolerates short primitive reads.

use std::io;

mod error;
pub use error::*;

mod fd_backend;
pub use fd_backend::*;

mod file_backend;
pub use file_backend::*;

mod memory_backend;
pub use memory_backend::*;

mod rpc_backend;
pub use rpc_backend::*;

mod primitive;

pub mod registry;
pub use registry::{open, register_xfile_type};

/// Chunk size used when skipping by reading.
pub const SKIP_SIZE: usize = 64 * 1024;

/// Access mode of an [`XFile`]
///
/// There is no write-only mode, a writable stream can always be read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    /// Map `open(2)` style access flags to a mode.
    ///
    /// `O_WRONLY` is rejected.
    pub fn from_open_flags(flags: libc::c_int) -> Result<Self, XFileError> {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => Ok(OpenMode::ReadOnly),
            libc::O_RDWR => Ok(OpenMode::ReadWrite),
            _ => Err(XFileError::InvalidArgs(format!(
                "unsupported open flags {:#o}",
                flags
            ))),
        }
    }

    pub fn is_writable(self) -> bool {
        self == OpenMode::ReadWrite
    }
}

/// Operations a stream backend provides
///
/// `read` and `write` must transfer the whole buffer or fail. The
/// positional operations are optional; returning `None` means the
/// backend does not implement them and the generic layer falls back (or
/// reports [`XFileError::NotSeekable`]).
pub trait XFileBackend {
    /// Fill the whole buffer.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Write the whole buffer.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Query the real position, if the backend knows it better than a
    /// simple byte count.
    fn tell(&mut self) -> Option<io::Result<u64>> {
        None
    }

    /// Set the absolute position.
    fn seek(&mut self, _offset: u64) -> Option<io::Result<()>> {
        None
    }

    /// Skip forward without producing data.
    fn skip(&mut self, _count: u64) -> Option<io::Result<()>> {
        None
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// In-memory backends expose their current contents.
    fn contents(&self) -> Option<&[u8]> {
        None
    }
}

/// Generic stream handle
pub struct XFile {
    backend: Option<Box<dyn XFileBackend>>,
    filepos: u64,
    seekable: bool,
    writable: bool,
    passthru: Option<Box<XFile>>,
    scratch: Vec<u8>,
}

impl XFile {
    /// Wrap a backend.
    ///
    /// `seekable` must only be set if the backend implements `seek`.
    pub fn new(backend: Box<dyn XFileBackend>, mode: OpenMode, seekable: bool) -> Self {
        Self {
            backend: Some(backend),
            filepos: 0,
            seekable,
            writable: mode.is_writable(),
            passthru: None,
            scratch: Vec::new(),
        }
    }

    fn backend_mut(&mut self) -> Result<&mut Box<dyn XFileBackend>, XFileError> {
        self.backend.as_mut().ok_or(XFileError::Closed)
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    /// The counted position, ignoring any backend position query.
    pub fn position(&self) -> u64 {
        self.filepos
    }

    /// Contents of an in-memory backend
    pub fn contents(&self) -> Option<&[u8]> {
        self.backend.as_ref().and_then(|backend| backend.contents())
    }

    /// Read exactly `buf.len()` bytes.
    ///
    /// If a passthru is attached, the data is written to it as well. A
    /// failing passthru write fails the read, although the data was
    /// already consumed from this stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), XFileError> {
        self.backend_mut()?.read(buf)?;
        self.filepos += buf.len() as u64;

        if let Some(passthru) = self.passthru.as_mut() {
            passthru.write(buf)?;
        }
        Ok(())
    }

    /// Write the whole buffer.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), XFileError> {
        if !self.writable {
            return Err(XFileError::ReadOnly);
        }
        self.backend_mut()?.write(buf)?;
        self.filepos += buf.len() as u64;
        Ok(())
    }

    /// Current position
    ///
    /// Uses the backend position query if there is one, the counted
    /// position otherwise.
    pub fn tell(&mut self) -> Result<u64, XFileError> {
        match self.backend_mut()?.tell() {
            Some(res) => Ok(res?),
            None => Ok(self.filepos),
        }
    }

    /// Move to an absolute position.
    pub fn seek(&mut self, offset: u64) -> Result<(), XFileError> {
        if !self.seekable {
            return Err(XFileError::NotSeekable);
        }
        match self.backend_mut()?.seek(offset) {
            Some(res) => res?,
            None => return Err(XFileError::NotSeekable),
        }
        self.filepos = offset;
        Ok(())
    }

    /// Skip `count` bytes forward.
    pub fn skip(&mut self, count: u32) -> Result<(), XFileError> {
        self.skip64(u64::from(count))
    }

    /// Skip `count` bytes forward (64 bit count).
    ///
    /// Backend skip and seek emulation are only used without passthru,
    /// because the passthru must see the skipped bytes.
    pub fn skip64(&mut self, count: u64) -> Result<(), XFileError> {
        if self.passthru.is_none() {
            if let Some(res) = self.backend_mut()?.skip(count) {
                res?;
                self.filepos += count;
                return Ok(());
            }

            if self.seekable {
                let target = self.tell()?.checked_add(count).ok_or_else(|| {
                    XFileError::InvalidArgs(format!("skip count {} overflows offset", count))
                })?;
                return self.seek(target);
            }
        }

        let mut buffer = std::mem::take(&mut self.scratch);
        if buffer.len() < SKIP_SIZE {
            buffer.resize(SKIP_SIZE, 0);
        }

        let mut remaining = count;
        let mut result = Ok(());
        while remaining > 0 {
            let n = remaining.min(SKIP_SIZE as u64) as usize;
            if let Err(err) = self.read(&mut buffer[..n]) {
                result = Err(err);
                break;
            }
            remaining -= n as u64;
        }

        self.scratch = buffer;
        result
    }

    /// Trust the backend position over the counted one.
    ///
    /// Returns the (possibly updated) position. Backends without position
    /// query keep the counted position.
    pub fn resync_position(&mut self) -> Result<u64, XFileError> {
        if let Some(res) = self.backend_mut()?.tell() {
            let pos = res?;
            if pos != self.filepos {
                log::debug!(
                    "xfile position resync: counted {} actual {}",
                    self.filepos,
                    pos
                );
            }
            self.filepos = pos;
        }
        Ok(self.filepos)
    }

    /// Attach a passthru target.
    ///
    /// Only one level is supported, and the target must be writable.
    pub fn set_passthru(&mut self, target: XFile) -> Result<(), XFileError> {
        if self.passthru.is_some() {
            return Err(XFileError::PassthruSet);
        }
        if !target.writable {
            return Err(XFileError::ReadOnly);
        }
        self.passthru = Some(Box::new(target));
        Ok(())
    }

    /// Detach the passthru target and hand it back.
    pub fn unset_passthru(&mut self) -> Result<XFile, XFileError> {
        match self.passthru.take() {
            Some(target) => Ok(*target),
            None => Err(XFileError::NoPassthru),
        }
    }

    pub fn passthru(&self) -> Option<&XFile> {
        self.passthru.as_deref()
    }

    /// Close the backend.
    ///
    /// Any attached passthru is dropped (and thereby closed) as well;
    /// use [`unset_passthru`](Self::unset_passthru) first to keep it.
    pub fn close(&mut self) -> Result<(), XFileError> {
        let mut backend = self.backend.take().ok_or(XFileError::Closed)?;
        self.passthru = None;
        self.filepos = 0;
        backend.close()?;
        Ok(())
    }
}

impl Drop for XFile {
    fn drop(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(err) = backend.close() {
                log::warn!("closing xfile failed - {}", err);
            }
        }
    }
}
