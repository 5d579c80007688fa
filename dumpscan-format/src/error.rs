use dumpscan_xfile::XFileError;

/// Base of the `AVds` status code table (com_err numbering).
pub const DUMP_ERROR_BASE: u32 = 0x0567_AD00;

pub const DSERR_MAGIC: u32 = DUMP_ERROR_BASE + 2;
pub const DSERR_TAG: u32 = DUMP_ERROR_BASE + 4;
pub const DSERR_FMT: u32 = DUMP_ERROR_BASE + 5;
pub const DSERR_DUP: u32 = DUMP_ERROR_BASE + 6;
pub const DSERR_HANDLER: u32 = DUMP_ERROR_BASE + 7;

#[derive(thiserror::Error, Debug)]
pub enum DumpError {
    #[error("{0}")]
    XFile(#[from] XFileError),
    #[error("bad magic number {found:#010x} (expected {expected:#010x})")]
    BadMagic { found: u32, expected: u32 },
    #[error("unexpected tag {tag:#04x} at offset {offset}")]
    BadTag { tag: u8, offset: u64 },
    #[error("{0}")]
    Format(String),
    #[error("duplicate vnode {0}")]
    Duplicate(u32),
    #[error("handler failed - {0}")]
    Handler(anyhow::Error),
}

impl DumpError {
    /// Unified numeric status, never zero.
    ///
    /// Stream errors keep their own code, handler errors caused by an OS
    /// error report its errno.
    pub fn code(&self) -> u32 {
        match self {
            DumpError::XFile(err) => err.code(),
            DumpError::BadMagic { .. } => DSERR_MAGIC,
            DumpError::BadTag { .. } => DSERR_TAG,
            DumpError::Format(_) => DSERR_FMT,
            DumpError::Duplicate(_) => DSERR_DUP,
            DumpError::Handler(err) => match err.downcast_ref::<std::io::Error>() {
                Some(ioerr) => match ioerr.raw_os_error() {
                    Some(errno) if errno > 0 => errno as u32,
                    _ => DSERR_HANDLER,
                },
                None => DSERR_HANDLER,
            },
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, DumpError::XFile(err) if err.is_eof())
    }
}

#[macro_export]
macro_rules! format_bail {
    ($($arg:tt)*) => {
        return Err($crate::DumpError::Format(format!($($arg)*)))
    };
}
