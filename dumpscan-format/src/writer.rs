use dumpscan_xfile::XFile;

use crate::file_formats::*;
use crate::{DumpError, DumpHeader, Vnode, VolumeHeader};

/// Buffer size used to copy vnode data between streams.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Write a vnode data field from memory.
pub fn write_vnode_data(output: &mut XFile, data: &[u8]) -> Result<(), DumpError> {
    let size = u32::try_from(data.len()).map_err(|_| {
        DumpError::Format(format!("vnode data too large ({} bytes)", data.len()))
    })?;
    output.write_u8(VTAG_DATA)?;
    output.write_u32(size)?;
    output.write(data)?;
    Ok(())
}

/// Write a vnode data field, copying `size` bytes from `input`.
///
/// The data is copied in bounded chunks, so arbitrarily large files never
/// need to be held in memory.
pub fn copy_vnode_data(output: &mut XFile, input: &mut XFile, size: u32) -> Result<(), DumpError> {
    output.write_u8(VTAG_DATA)?;
    output.write_u32(size)?;

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE.min(size as usize)];
    let mut remaining = size as usize;
    while remaining > 0 {
        let n = remaining.min(COPY_BUFFER_SIZE);
        input.read(&mut buffer[..n])?;
        output.write(&buffer[..n])?;
        remaining -= n;
    }
    Ok(())
}

/// Write the end marker.
pub fn write_dump_end(output: &mut XFile) -> Result<(), DumpError> {
    output.write_u8(TAG_DUMPEND)?;
    output.write_u32(DUMPENDMAGIC)?;
    Ok(())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WriterState {
    Start,
    DumpHeader,
    VolumeHeader,
    Vnode { data_written: bool },
    Finished,
}

/// Sequential dump encoder
///
/// Enforces the record order of a dump: dump header, volume header, any
/// number of vnodes (each optionally followed by its data), end marker.
pub struct DumpWriter<'a> {
    output: &'a mut XFile,
    state: WriterState,
    vnode_count: u64,
}

impl<'a> Drop for DumpWriter<'a> {
    fn drop(&mut self) {
        if self.state != WriterState::Finished && self.state != WriterState::Start {
            log::warn!("dump writer dropped without end marker");
        }
    }
}

impl<'a> DumpWriter<'a> {
    pub fn new(output: &'a mut XFile) -> Self {
        Self {
            output,
            state: WriterState::Start,
            vnode_count: 0,
        }
    }

    /// Allow access to the underlying stream
    pub fn output_mut(&mut self) -> &mut XFile {
        self.output
    }

    pub fn vnode_count(&self) -> u64 {
        self.vnode_count
    }

    fn check_state(&self, allowed: bool, what: &str) -> Result<(), DumpError> {
        if !allowed {
            crate::format_bail!("dump writer: cannot write {} in state {:?}", what, self.state);
        }
        Ok(())
    }

    pub fn dump_header(&mut self, hdr: &DumpHeader) -> Result<(), DumpError> {
        self.check_state(self.state == WriterState::Start, "dump header")?;
        hdr.write(self.output)?;
        self.state = WriterState::DumpHeader;
        Ok(())
    }

    pub fn volume_header(&mut self, hdr: &VolumeHeader) -> Result<(), DumpError> {
        self.check_state(self.state == WriterState::DumpHeader, "volume header")?;
        hdr.write(self.output)?;
        self.state = WriterState::VolumeHeader;
        Ok(())
    }

    pub fn vnode(&mut self, vnode: &Vnode) -> Result<(), DumpError> {
        self.check_state(
            matches!(self.state, WriterState::VolumeHeader | WriterState::Vnode { .. }),
            "vnode",
        )?;
        vnode.write(self.output)?;
        self.vnode_count += 1;
        self.state = WriterState::Vnode {
            data_written: false,
        };
        Ok(())
    }

    fn check_data_allowed(&self) -> Result<(), DumpError> {
        self.check_state(
            self.state == WriterState::Vnode {
                data_written: false,
            },
            "vnode data",
        )
    }

    /// Data of the last vnode, from memory.
    pub fn vnode_data(&mut self, data: &[u8]) -> Result<(), DumpError> {
        self.check_data_allowed()?;
        write_vnode_data(self.output, data)?;
        self.state = WriterState::Vnode { data_written: true };
        Ok(())
    }

    /// Data of the last vnode, copied from another stream.
    pub fn copy_vnode_data(&mut self, input: &mut XFile, size: u32) -> Result<(), DumpError> {
        self.check_data_allowed()?;
        copy_vnode_data(self.output, input, size)?;
        self.state = WriterState::Vnode { data_written: true };
        Ok(())
    }

    /// Write the end marker.
    pub fn finish(mut self) -> Result<(), DumpError> {
        self.check_state(
            matches!(self.state, WriterState::VolumeHeader | WriterState::Vnode { .. }),
            "end marker",
        )?;
        write_dump_end(self.output)?;
        self.state = WriterState::Finished;
        Ok(())
    }
}
