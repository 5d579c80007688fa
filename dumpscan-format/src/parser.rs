//! Dump parse driver
//!
//! Walks the top-level records of a dump (dump header, volume header,
//! vnodes, end marker) and hands every decoded record to a
//! [`DumpHandler`]. Problems are reported through
//! [`DumpHandler::error`], with a flag telling whether the parse is
//! aborted. Recovery is only attempted with repair flags enabled and a
//! seekable input.

use anyhow::Error;

use dumpscan_xfile::{XFile, XFileError};

use crate::directory::{parse_directory, DirEntry, DIR_MAX_PAGES, DIR_PAGE_SIZE};
use crate::file_formats::*;
use crate::tagged::{
    parse_tagged_data, FieldStep, ParseEnd, ReportError, TagParseFlags, TagParseInfo, TaggedField,
};
use crate::{
    dump_header_fields, volume_header_fields, vnode_fields, DumpError, DumpHeader, ParserConfig,
    RepairFlags, Vnode, VnodeDataReader, VnodeFields, VnodeKind, VolumeHeader,
    VolumeHeaderFields,
};

/// Largest symbolic link target kept in memory.
pub const MAX_LINK_TARGET: u32 = 64 * 1024;

/// Largest directory decoded into entries.
pub const MAX_DIRECTORY_SIZE: u32 = (8 * DIR_MAX_PAGES * DIR_PAGE_SIZE) as u32;

/// Receiver of decoded records
///
/// All methods default to doing nothing (errors are logged). Each record
/// method gets the input stream positioned right after the record and may
/// read or seek freely. On seekable input the parser restores the
/// position afterwards. Returning an error aborts the parse with
/// [`DumpError::Handler`].
///
/// The records only live for the duration of the call.
pub trait DumpHandler {
    fn dump_header(&mut self, _hdr: &DumpHeader, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    fn volume_header(&mut self, _hdr: &VolumeHeader, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    fn directory_vnode(&mut self, _vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    fn file_vnode(&mut self, _vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    fn symlink_vnode(&mut self, _vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    /// Vnode with only number and uniquifier.
    fn empty_vnode(&mut self, _vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    fn unknown_vnode(&mut self, _vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        Ok(())
    }

    /// Called for each entry of a directory vnode, before the vnode itself,
    /// if directory parsing is enabled.
    fn dir_entry(
        &mut self,
        _vnode: &Vnode,
        _entry: &DirEntry,
        _input: &mut XFile,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn error(&mut self, err: &DumpError, fatal: bool, msg: &str) {
        if fatal {
            log::error!("{} [{:#x}]", msg, err.code());
        } else {
            log::warn!("{} [{:#x}]", msg, err.code());
        }
    }
}

/// Dump parser
pub struct DumpParser<'h> {
    handler: &'h mut dyn DumpHandler,
    config: ParserConfig,
    repair: RepairFlags,
    vol_uniquifier: u32,
    vnode_count: u64,
    recovered: u64,
}

fn top_dump_header(
    input: &mut XFile,
    tag: &mut u8,
    _field: &TaggedField<DumpParser<'_>, ()>,
    _info: &mut TagParseInfo,
    parser: &mut DumpParser<'_>,
    _: &mut (),
) -> Result<FieldStep, DumpError> {
    parser.dump_header_record(input, tag)
}

fn top_volume_header(
    input: &mut XFile,
    tag: &mut u8,
    _field: &TaggedField<DumpParser<'_>, ()>,
    _info: &mut TagParseInfo,
    parser: &mut DumpParser<'_>,
    _: &mut (),
) -> Result<FieldStep, DumpError> {
    parser.volume_header_record(input, tag)
}

fn top_vnode(
    input: &mut XFile,
    tag: &mut u8,
    _field: &TaggedField<DumpParser<'_>, ()>,
    _info: &mut TagParseInfo,
    parser: &mut DumpParser<'_>,
    _: &mut (),
) -> Result<FieldStep, DumpError> {
    parser.vnode_record(input, tag)
}

fn top_dump_end(
    input: &mut XFile,
    _tag: &mut u8,
    _field: &TaggedField<DumpParser<'_>, ()>,
    _info: &mut TagParseInfo,
    parser: &mut DumpParser<'_>,
    _: &mut (),
) -> Result<FieldStep, DumpError> {
    parser.dump_end_record(input)
}

fn top_level_fields<'h>() -> [TaggedField<DumpParser<'h>, ()>; 4] {
    [
        TaggedField::special(TAG_DUMPHEADER, "dump header", top_dump_header, 0),
        TaggedField::special(TAG_VOLHEADER, "volume header", top_volume_header, 0),
        TaggedField::special(TAG_VNODE, "vnode", top_vnode, 0),
        TaggedField::special(TAG_DUMPEND, "dump end", top_dump_end, 0),
    ]
}

// vnode number, uniquifier and a sane following tag
fn looks_like_vnode(input: &mut XFile, max_uniq: u32) -> Result<bool, XFileError> {
    let vnode = input.read_u32()?;
    let uniq = input.read_u32()?;
    let next = input.read_u8()?;
    Ok(vnode != 0
        && uniq != 0
        && (max_uniq == 0 || uniq <= max_uniq)
        && (VNODE_FIELD_TAGS.contains(&next) || TOP_LEVEL_TAGS.contains(&next)))
}

impl<'h> DumpParser<'h> {
    pub fn new(handler: &'h mut dyn DumpHandler, config: &ParserConfig) -> Self {
        Self {
            handler,
            config: config.clone(),
            repair: config.repair_flags(),
            vol_uniquifier: 0,
            vnode_count: 0,
            recovered: 0,
        }
    }

    /// Vnodes handed to the handler so far.
    pub fn vnode_count(&self) -> u64 {
        self.vnode_count
    }

    /// Problems the parser recovered from.
    pub fn recovered_errors(&self) -> u64 {
        self.recovered
    }

    /// Repair flags in effect for the last parse.
    pub fn repair_flags(&self) -> RepairFlags {
        self.repair
    }

    fn prepare(&mut self, input: &XFile) {
        self.repair = self.config.repair_flags();
        if !self.repair.is_empty() && !input.is_seekable() {
            log::warn!("input is not seekable, dump repair disabled");
            self.repair = RepairFlags::empty();
        }
        // seeking back would tee bytes to the passthru a second time
        let seeking = RepairFlags::RSKIP | RepairFlags::VDSYNC | RepairFlags::VFSYNC;
        if self.repair.intersects(seeking) && input.passthru().is_some() {
            log::warn!("passthru attached, only forward skipping repair enabled");
            self.repair.remove(seeking);
        }
    }

    fn report(&mut self, err: &DumpError, fatal: bool, msg: &str) {
        if !fatal {
            self.recovered += 1;
        }
        self.handler.error(err, fatal, msg);
    }

    fn tag_info(&self) -> TagParseInfo {
        let mut flags = TagParseFlags::empty();
        flags.set(TagParseFlags::SKIP, self.repair.contains(RepairFlags::SKIP));
        flags.set(TagParseFlags::RSKIP, self.repair.contains(RepairFlags::RSKIP));
        TagParseInfo::new(flags, &TOP_LEVEL_TAGS, self.config.skip_limit)
    }

    /// Parse a whole dump, up to and including the end marker.
    pub fn parse_dump(&mut self, input: &mut XFile) -> Result<(), DumpError> {
        self.prepare(input);

        let mut tag = match input.read_u8() {
            Ok(tag) => tag,
            Err(err) => {
                let err = DumpError::from(err);
                self.report(&err, true, &format!("unable to read dump - {}", err));
                return Err(err);
            }
        };

        let fields = top_level_fields();
        loop {
            let mut info = TagParseInfo::new(TagParseFlags::empty(), &[], 0);
            match parse_tagged_data(input, &fields, &mut tag, &mut info, self, &mut ())? {
                ParseEnd::Finished => return Ok(()),
                ParseEnd::ForeignTag => {
                    let offset = input.tell()?.saturating_sub(1);
                    let err = DumpError::BadTag { tag, offset };
                    if !self.repair.contains(RepairFlags::VFSYNC) {
                        self.report(&err, true, &format!("unexpected tag {:#04x} at offset {}", tag, offset));
                        return Err(err);
                    }
                    self.report(
                        &err,
                        false,
                        &format!("unexpected tag {:#04x} at offset {}, searching for next record", tag, offset),
                    );
                    self.resync_or_fail(input, offset + 1, &mut tag)?;
                }
            }
        }
    }

    /// Parse a single dump header record, returning the tag following it.
    pub fn parse_dump_header(&mut self, input: &mut XFile) -> Result<u8, DumpError> {
        self.parse_single(input, TAG_DUMPHEADER)
    }

    /// Parse a single volume header record, returning the tag following it.
    pub fn parse_volume_header(&mut self, input: &mut XFile) -> Result<u8, DumpError> {
        self.parse_single(input, TAG_VOLHEADER)
    }

    /// Parse a single vnode record, returning the tag following it.
    pub fn parse_vnode(&mut self, input: &mut XFile) -> Result<u8, DumpError> {
        self.parse_single(input, TAG_VNODE)
    }

    fn parse_single(&mut self, input: &mut XFile, expected: u8) -> Result<u8, DumpError> {
        self.prepare(input);
        let offset = input.tell()?;
        let mut tag = input.read_u8()?;
        if tag != expected {
            let err = DumpError::BadTag { tag, offset };
            self.report(&err, true, &format!("expected tag {:#04x} at offset {}, found {:#04x}", expected, offset, tag));
            return Err(err);
        }
        match expected {
            TAG_DUMPHEADER => self.dump_header_record(input, &mut tag)?,
            TAG_VOLHEADER => self.volume_header_record(input, &mut tag)?,
            _ => self.vnode_record(input, &mut tag)?,
        };
        Ok(tag)
    }

    fn resync_or_fail(&mut self, input: &mut XFile, from: u64, tag: &mut u8) -> Result<(), DumpError> {
        if self.resync(input, from, tag)? {
            return Ok(());
        }
        let err = DumpError::Format(format!("no further record found after offset {}", from));
        self.report(&err, true, &format!("unable to resynchronize dump - {}", err));
        Err(err)
    }

    /// Scan forward from `from` for something which looks like the start
    /// of a vnode record or the end marker. On success, the stream is
    /// positioned after the tag, which is stored in `tag`.
    fn resync(&mut self, input: &mut XFile, from: u64, tag: &mut u8) -> Result<bool, DumpError> {
        let limit = from.saturating_add(self.config.resync_scan_limit);
        let mut pos = from;
        while pos < limit {
            input.seek(pos)?;
            let candidate = match input.read_u8() {
                Ok(byte) => byte,
                Err(err) if err.is_eof() => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            let plausible = match candidate {
                TAG_VNODE => looks_like_vnode(input, self.vol_uniquifier),
                TAG_DUMPEND => input.read_u32().map(|magic| magic == DUMPENDMAGIC),
                _ => Ok(false),
            };
            let found = match plausible {
                Ok(found) => found,
                Err(err) if err.is_eof() => false,
                Err(err) => return Err(err.into()),
            };
            if found {
                input.seek(pos + 1)?;
                *tag = candidate;
                log::info!("resynchronized at offset {} ({} bytes skipped)", pos, pos - from);
                return Ok(true);
            }
            pos += 1;
        }
        Ok(false)
    }

    /// Run a handler callback, restoring the stream position afterwards.
    fn call_handler<F>(&mut self, input: &mut XFile, func: F) -> Result<(), DumpError>
    where
        F: FnOnce(&mut dyn DumpHandler, &mut XFile) -> Result<(), Error>,
    {
        let saved = if input.is_seekable() {
            Some(input.tell()?)
        } else {
            None
        };
        let result = func(&mut *self.handler, input).map_err(DumpError::Handler);
        if let Some(pos) = saved {
            let restored = input.seek(pos);
            result?;
            restored?;
            return Ok(());
        }
        result
    }

    // fatal report for errors of a record, handler errors pass unreported
    fn check_record<T>(
        &mut self,
        result: Result<T, DumpError>,
        what: &str,
        offset: u64,
    ) -> Result<T, DumpError> {
        match result {
            Ok(value) => Ok(value),
            Err(err @ DumpError::Handler(_)) => Err(err),
            Err(err) => {
                self.report(&err, true, &format!("bad {} at offset {} - {}", what, offset, err));
                Err(err)
            }
        }
    }

    fn dump_header_record(&mut self, input: &mut XFile, tag: &mut u8) -> Result<FieldStep, DumpError> {
        let mut hdr = DumpHeader {
            offset: input.tell()?.saturating_sub(1),
            ..Default::default()
        };
        let result = self.read_dump_header(input, tag, &mut hdr);
        self.check_record(result, "dump header", hdr.offset)?;

        log::debug!("dump header for volume {} at offset {}", hdr.volid, hdr.offset);
        self.call_handler(input, |handler, input| handler.dump_header(&hdr, input))?;
        Ok(FieldStep::TagPending)
    }

    fn read_dump_header(
        &mut self,
        input: &mut XFile,
        tag: &mut u8,
        hdr: &mut DumpHeader,
    ) -> Result<(), DumpError> {
        hdr.magic = input.read_u32()?;
        hdr.version = input.read_u32()?;

        if hdr.magic != DUMPBEGINMAGIC {
            let err = DumpError::BadMagic {
                found: hdr.magic,
                expected: DUMPBEGINMAGIC,
            };
            if self.config.check_magic {
                return Err(err);
            }
            self.report(&err, false, &format!("bad dump header magic at offset {} - {}", hdr.offset, err));
        }
        if hdr.version != DUMPVERSION {
            let err = DumpError::Format(format!("dump version {}", hdr.version));
            self.report(&err, false, &format!("unexpected dump version {} at offset {}", hdr.version, hdr.offset));
        }

        *tag = input.read_u8()?;
        let mut info = self.tag_info();
        parse_tagged_data(input, &dump_header_fields(), tag, &mut info, self, hdr)?;
        Ok(())
    }

    fn volume_header_record(&mut self, input: &mut XFile, tag: &mut u8) -> Result<FieldStep, DumpError> {
        let mut hdr = VolumeHeader {
            offset: input.tell()?.saturating_sub(1),
            ..Default::default()
        };
        let result = self.read_volume_header(input, tag, &mut hdr);
        self.check_record(result, "volume header", hdr.offset)?;

        if hdr.fields.contains(VolumeHeaderFields::VOLUNIQ) {
            self.vol_uniquifier = hdr.voluniq;
        }
        log::debug!(
            "volume header '{}' at offset {}",
            String::from_utf8_lossy(&hdr.volname),
            hdr.offset
        );
        self.call_handler(input, |handler, input| handler.volume_header(&hdr, input))?;
        Ok(FieldStep::TagPending)
    }

    fn read_volume_header(
        &mut self,
        input: &mut XFile,
        tag: &mut u8,
        hdr: &mut VolumeHeader,
    ) -> Result<(), DumpError> {
        *tag = input.read_u8()?;
        let mut info = self.tag_info();
        parse_tagged_data(input, &volume_header_fields(), tag, &mut info, self, hdr)?;
        Ok(())
    }

    fn vnode_record(&mut self, input: &mut XFile, tag: &mut u8) -> Result<FieldStep, DumpError> {
        let offset = input.tell()?.saturating_sub(1);
        let vnode = match self.read_vnode(input, tag, offset) {
            Ok(vnode) => vnode,
            Err(err @ DumpError::Handler(_)) => return Err(err),
            Err(err) if self.repair.contains(RepairFlags::VFSYNC) => {
                self.report(
                    &err,
                    false,
                    &format!("bad vnode at offset {} - {}, searching for next record", offset, err),
                );
                self.resync_or_fail(input, offset + 1, tag)?;
                return Ok(FieldStep::TagPending);
            }
            Err(err) => {
                self.report(&err, true, &format!("bad vnode at offset {} - {}", offset, err));
                return Err(err);
            }
        };

        self.vnode_count += 1;
        log::debug!("vnode {}.{} at offset {}", vnode.vnode, vnode.uniq, vnode.offset);

        let vnode = &vnode;
        match vnode.kind() {
            VnodeKind::Directory => {
                self.call_handler(input, |handler, input| handler.directory_vnode(vnode, input))?
            }
            VnodeKind::File => {
                self.call_handler(input, |handler, input| handler.file_vnode(vnode, input))?
            }
            VnodeKind::Symlink => {
                self.call_handler(input, |handler, input| handler.symlink_vnode(vnode, input))?
            }
            VnodeKind::Empty => {
                self.call_handler(input, |handler, input| handler.empty_vnode(vnode, input))?
            }
            VnodeKind::Unknown(_) => {
                self.call_handler(input, |handler, input| handler.unknown_vnode(vnode, input))?
            }
        }
        Ok(FieldStep::TagPending)
    }

    fn read_vnode(&mut self, input: &mut XFile, tag: &mut u8, offset: u64) -> Result<Vnode, DumpError> {
        let number = input.read_u32()?;
        let uniq = input.read_u32()?;
        let mut vnode = Vnode::new(number, uniq);
        vnode.offset = offset;

        *tag = input.read_u8()?;
        let mut info = self.tag_info();
        parse_tagged_data(input, &vnode_fields(), tag, &mut info, self, &mut vnode)?;
        Ok(vnode)
    }

    fn dump_end_record(&mut self, input: &mut XFile) -> Result<FieldStep, DumpError> {
        let offset = input.tell()?.saturating_sub(1);
        let result = input.read_u32().map_err(DumpError::from);
        let magic = self.check_record(result, "dump end", offset)?;
        if magic != DUMPENDMAGIC {
            let err = DumpError::BadMagic {
                found: magic,
                expected: DUMPENDMAGIC,
            };
            self.report(&err, false, &format!("bad dump end magic at offset {} - {}", offset, err));
        }
        log::debug!("dump end at offset {}", offset);
        Ok(FieldStep::Finish)
    }

    fn directory_entries(
        &mut self,
        input: &mut XFile,
        vnode: &Vnode,
        data: &[u8],
    ) -> Result<(), DumpError> {
        let saved = if input.is_seekable() {
            Some(input.tell()?)
        } else {
            None
        };

        let handler = &mut *self.handler;
        let result = parse_directory(data, |entry| {
            handler
                .dir_entry(vnode, &entry, &mut *input)
                .map_err(DumpError::Handler)?;
            Ok(true)
        });

        if let Some(pos) = saved {
            input.seek(pos)?;
        }

        match result {
            Err(err @ DumpError::Handler(_)) => Err(err),
            Err(err) => {
                self.report(
                    &err,
                    false,
                    &format!("bad directory data in vnode {} - {}", vnode.vnode, err),
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    // after reading the data: the next byte must be a tag
    fn check_data_end(
        &mut self,
        input: &mut XFile,
        tag: &mut u8,
        vnode: &mut Vnode,
    ) -> Result<FieldStep, DumpError> {
        input.resync_position()?;
        match input.read_u8() {
            Ok(next) if VNODE_FIELD_TAGS.contains(&next) || TOP_LEVEL_TAGS.contains(&next) => {
                *tag = next;
                return Ok(FieldStep::TagPending);
            }
            Ok(_) => {}
            Err(err) if err.is_eof() => {}
            Err(err) => return Err(err.into()),
        }

        let err = DumpError::Format(format!(
            "data of vnode {} does not end at a record boundary",
            vnode.vnode
        ));
        self.report(
            &err,
            false,
            &format!("vnode {} data length {} looks wrong, searching for next record", vnode.vnode, vnode.size),
        );
        if !self.resync(input, vnode.d_offset, tag)? {
            return Err(err);
        }
        let found = input.tell()?.saturating_sub(1);
        vnode.size = u32::try_from(found - vnode.d_offset).unwrap_or(u32::MAX);
        Ok(FieldStep::TagPending)
    }
}

impl<'h> ReportError for DumpParser<'h> {
    fn report_error(&mut self, err: &DumpError, fatal: bool, msg: &str) {
        self.report(err, fatal, msg);
    }
}

impl<'h> VnodeDataReader for DumpParser<'h> {
    fn read_vnode_data(
        &mut self,
        input: &mut XFile,
        tag: &mut u8,
        vnode: &mut Vnode,
    ) -> Result<FieldStep, DumpError> {
        vnode.size = input.read_u32()?;
        vnode.d_offset = input.tell()?;
        vnode.fields |= VnodeFields::SIZE;
        if vnode.size > 0 {
            vnode.fields |= VnodeFields::DATA;
        }

        match vnode.kind() {
            VnodeKind::Symlink if vnode.size <= MAX_LINK_TARGET => {
                let mut target = vec![0u8; vnode.size as usize];
                input.read(&mut target)?;
                vnode.link_target = target;
            }
            VnodeKind::Directory
                if self.config.parse_directories
                    && vnode.size > 0
                    && vnode.size <= MAX_DIRECTORY_SIZE =>
            {
                let mut data = vec![0u8; vnode.size as usize];
                input.read(&mut data)?;
                self.directory_entries(input, vnode, &data)?;
            }
            _ => input.skip(vnode.size)?,
        }

        if self.repair.contains(RepairFlags::VDSYNC) {
            return self.check_data_end(input, tag, vnode);
        }
        Ok(FieldStep::Next)
    }
}
