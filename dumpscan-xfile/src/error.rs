use std::io;

/// Base of the `xFil` status code table (com_err numbering).
pub const XFILE_ERROR_BASE: u32 = 0xC868_E600;

pub const ERROR_XFILE_EOF: u32 = XFILE_ERROR_BASE;
pub const ERROR_XFILE_TYPE: u32 = XFILE_ERROR_BASE + 1;
pub const ERROR_XFILE_ARGS: u32 = XFILE_ERROR_BASE + 2;
pub const ERROR_XFILE_RDONLY: u32 = XFILE_ERROR_BASE + 3;
pub const ERROR_XFILE_NOSEEK: u32 = XFILE_ERROR_BASE + 4;
pub const ERROR_XFILE_ISPASS: u32 = XFILE_ERROR_BASE + 5;
pub const ERROR_XFILE_NOPASS: u32 = XFILE_ERROR_BASE + 6;
pub const ERROR_XFILE_CLOSED: u32 = XFILE_ERROR_BASE + 7;

#[derive(thiserror::Error, Debug)]
pub enum XFileError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("unknown xfile type '{0}'")]
    UnknownType(String),
    #[error("invalid xfile arguments - {0}")]
    InvalidArgs(String),
    #[error("xfile is not writable")]
    ReadOnly,
    #[error("xfile does not support seeking")]
    NotSeekable,
    #[error("xfile already has a passthru")]
    PassthruSet,
    #[error("xfile has no passthru")]
    NoPassthru,
    #[error("xfile is closed")]
    Closed,
}

impl XFileError {
    /// Unified numeric status for this error.
    ///
    /// OS errors keep their errno, everything else gets a code from the
    /// `xFil` table. Never returns zero.
    pub fn code(&self) -> u32 {
        match self {
            XFileError::Io(err) => match err.raw_os_error() {
                Some(errno) if errno > 0 => errno as u32,
                _ if err.kind() == io::ErrorKind::UnexpectedEof => ERROR_XFILE_EOF,
                _ => libc::EIO as u32,
            },
            XFileError::UnknownType(_) => ERROR_XFILE_TYPE,
            XFileError::InvalidArgs(_) => ERROR_XFILE_ARGS,
            XFileError::ReadOnly => ERROR_XFILE_RDONLY,
            XFileError::NotSeekable => ERROR_XFILE_NOSEEK,
            XFileError::PassthruSet => ERROR_XFILE_ISPASS,
            XFileError::NoPassthru => ERROR_XFILE_NOPASS,
            XFileError::Closed => ERROR_XFILE_CLOSED,
        }
    }

    /// Returns true if the error was caused by running out of input.
    pub fn is_eof(&self) -> bool {
        matches!(self, XFileError::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}
