//! Big-endian integers and NUL-terminated strings.

use crate::{XFile, XFileError};

const STRING_CHUNK: usize = 256;

impl XFile {
    pub fn read_u8(&mut self) -> Result<u8, XFileError> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, XFileError> {
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, XFileError> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a NUL-terminated string.
    ///
    /// Reads byte by byte, so nothing after the terminator is consumed and
    /// the stream never needs to seek. The terminator is not part of the
    /// result. On error, the partial string is discarded.
    pub fn read_string(&mut self) -> Result<Vec<u8>, XFileError> {
        let mut result = Vec::new();
        let mut chunk = [0u8; STRING_CHUNK];

        loop {
            let mut len = 0;
            let mut terminated = false;
            while len < STRING_CHUNK {
                self.read(&mut chunk[len..len + 1])?;
                if chunk[len] == 0 {
                    terminated = true;
                    break;
                }
                len += 1;
            }
            result.extend_from_slice(&chunk[..len]);
            if terminated {
                return Ok(result);
            }
        }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), XFileError> {
        self.write(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), XFileError> {
        self.write(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), XFileError> {
        self.write(&value.to_be_bytes())
    }

    /// Write a string followed by a NUL terminator.
    ///
    /// The string must not contain NUL bytes itself.
    pub fn write_string(&mut self, value: &[u8]) -> Result<(), XFileError> {
        if value.contains(&0) {
            return Err(XFileError::InvalidArgs(
                "string contains NUL byte".to_string(),
            ));
        }
        self.write(value)?;
        self.write(&[0])
    }
}
