use bitflags::bitflags;

use dumpscan_xfile::XFile;

use crate::file_formats::*;
use crate::tagged::{FieldKind, FieldStep, FieldValue, ReportError, TagParseInfo, TaggedField};
use crate::DumpError;

bitflags! {
    /// Optional volume header fields
    #[derive(Default)]
    pub struct VolumeHeaderFields: u32 {
        const VOLID        = 0x0000_0001;
        const VOLVERS      = 0x0000_0002;
        const VOLNAME      = 0x0000_0004;
        const INSERV       = 0x0000_0008;
        const BLESSED      = 0x0000_0010;
        const VOLUNIQ      = 0x0000_0020;
        const VOLTYPE      = 0x0000_0040;
        const PARENT       = 0x0000_0080;
        const CLONE        = 0x0000_0100;
        const MAXQ         = 0x0000_0200;
        const MINQ         = 0x0000_0400;
        const DISKUSED     = 0x0000_0800;
        const NFILES       = 0x0000_1000;
        const ACCOUNT      = 0x0000_2000;
        const OWNER        = 0x0000_4000;
        const CREATE_DATE  = 0x0000_8000;
        const ACCESS_DATE  = 0x0001_0000;
        const UPDATE_DATE  = 0x0002_0000;
        const EXPIRE_DATE  = 0x0004_0000;
        const BACKUP_DATE  = 0x0008_0000;
        const OFFLINE_MSG  = 0x0010_0000;
        const MOTD         = 0x0020_0000;
        const WEEKUSE      = 0x0040_0000;
        const DAYUSE       = 0x0080_0000;
        const DAYUSE_DATE  = 0x0100_0000;
    }
}

/// AFS volume header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeHeader {
    /// Stream offset of the record tag (set by the parser).
    pub offset: u64,
    pub fields: VolumeHeaderFields,
    pub volid: u32,
    pub volvers: u32,
    pub volname: Vec<u8>,
    pub inservice: bool,
    pub blessed: bool,
    /// Next uniquifier to hand out, larger than any vnode uniquifier.
    pub voluniq: u32,
    pub voltype: u8,
    pub parent_volid: u32,
    pub clone_volid: u32,
    pub maxquota: u32,
    pub minquota: u32,
    pub diskused: u32,
    pub nfiles: u32,
    pub account: u32,
    pub owner: u32,
    pub create_date: u32,
    pub access_date: u32,
    pub update_date: u32,
    pub expire_date: u32,
    pub backup_date: u32,
    pub offline_msg: Vec<u8>,
    pub motd: Vec<u8>,
    pub weekuse: [u32; WEEKUSE_DAYS],
    pub dayuse: u32,
    pub dayuse_date: u32,
}

impl VolumeHeader {
    /// Encode the record, including its top-level tag.
    pub fn write(&self, output: &mut XFile) -> Result<(), DumpError> {
        use VolumeHeaderFields as F;

        output.write_u8(TAG_VOLHEADER)?;

        let u32_field = |output: &mut XFile, flag: F, tag: u8, value: u32| -> Result<(), DumpError> {
            if self.fields.contains(flag) {
                output.write_u8(tag)?;
                output.write_u32(value)?;
            }
            Ok(())
        };
        let u8_field = |output: &mut XFile, flag: F, tag: u8, value: u8| -> Result<(), DumpError> {
            if self.fields.contains(flag) {
                output.write_u8(tag)?;
                output.write_u8(value)?;
            }
            Ok(())
        };
        let string_field = |output: &mut XFile, flag: F, tag: u8, value: &[u8]| -> Result<(), DumpError> {
            if self.fields.contains(flag) {
                output.write_u8(tag)?;
                output.write_string(value)?;
            }
            Ok(())
        };

        u32_field(output, F::VOLID, VHTAG_VOLID, self.volid)?;
        u32_field(output, F::VOLVERS, VHTAG_VERS, self.volvers)?;
        string_field(output, F::VOLNAME, VHTAG_VOLNAME, &self.volname)?;
        u8_field(output, F::INSERV, VHTAG_INSERV, self.inservice as u8)?;
        u8_field(output, F::BLESSED, VHTAG_BLESSED, self.blessed as u8)?;
        u32_field(output, F::VOLUNIQ, VHTAG_VUNIQ, self.voluniq)?;
        u8_field(output, F::VOLTYPE, VHTAG_TYPE, self.voltype)?;
        u32_field(output, F::PARENT, VHTAG_PARENT, self.parent_volid)?;
        u32_field(output, F::CLONE, VHTAG_CLONE, self.clone_volid)?;
        u32_field(output, F::MAXQ, VHTAG_MAXQUOTA, self.maxquota)?;
        u32_field(output, F::MINQ, VHTAG_MINQUOTA, self.minquota)?;
        u32_field(output, F::DISKUSED, VHTAG_DISKUSED, self.diskused)?;
        u32_field(output, F::NFILES, VHTAG_FILECOUNT, self.nfiles)?;
        u32_field(output, F::ACCOUNT, VHTAG_ACCOUNT, self.account)?;
        u32_field(output, F::OWNER, VHTAG_OWNER, self.owner)?;
        u32_field(output, F::CREATE_DATE, VHTAG_CREAT, self.create_date)?;
        u32_field(output, F::ACCESS_DATE, VHTAG_ACCESS, self.access_date)?;
        u32_field(output, F::UPDATE_DATE, VHTAG_UPDATE, self.update_date)?;
        u32_field(output, F::EXPIRE_DATE, VHTAG_EXPIRE, self.expire_date)?;
        u32_field(output, F::BACKUP_DATE, VHTAG_BACKUP, self.backup_date)?;
        string_field(output, F::OFFLINE_MSG, VHTAG_OFFLINE, &self.offline_msg)?;
        string_field(output, F::MOTD, VHTAG_MOTD, &self.motd)?;

        if self.fields.contains(F::WEEKUSE) {
            output.write_u8(VHTAG_WEEKUSE)?;
            output.write_u16(WEEKUSE_DAYS as u16)?;
            for value in self.weekuse.iter() {
                output.write_u32(*value)?;
            }
        }

        u32_field(output, F::DAYUSE_DATE, VHTAG_DUDATE, self.dayuse_date)?;
        u32_field(output, F::DAYUSE, VHTAG_DAYUSE, self.dayuse)?;
        Ok(())
    }
}

fn store_volume_field<G>(
    field: &TaggedField<G, VolumeHeader>,
    value: FieldValue,
    _global: &mut G,
    hdr: &mut VolumeHeader,
) -> Result<(), DumpError> {
    let num = value.as_u32();
    match field.tag {
        VHTAG_VOLID => hdr.volid = num,
        VHTAG_VERS => hdr.volvers = num,
        VHTAG_VOLNAME => hdr.volname = value.into_bytes(),
        VHTAG_INSERV => hdr.inservice = num != 0,
        VHTAG_BLESSED => hdr.blessed = num != 0,
        VHTAG_VUNIQ => hdr.voluniq = num,
        VHTAG_TYPE => hdr.voltype = num as u8,
        VHTAG_PARENT => hdr.parent_volid = num,
        VHTAG_CLONE => hdr.clone_volid = num,
        VHTAG_MAXQUOTA => hdr.maxquota = num,
        VHTAG_MINQUOTA => hdr.minquota = num,
        VHTAG_DISKUSED => hdr.diskused = num,
        VHTAG_FILECOUNT => hdr.nfiles = num,
        VHTAG_ACCOUNT => hdr.account = num,
        VHTAG_OWNER => hdr.owner = num,
        VHTAG_CREAT => hdr.create_date = num,
        VHTAG_ACCESS => hdr.access_date = num,
        VHTAG_UPDATE => hdr.update_date = num,
        VHTAG_EXPIRE => hdr.expire_date = num,
        VHTAG_BACKUP => hdr.backup_date = num,
        VHTAG_OFFLINE => hdr.offline_msg = value.into_bytes(),
        VHTAG_MOTD => hdr.motd = value.into_bytes(),
        VHTAG_DUDATE => hdr.dayuse_date = num,
        VHTAG_DAYUSE => hdr.dayuse = num,
        _ => return Ok(()),
    }
    hdr.fields |= VolumeHeaderFields::from_bits_truncate(field.refarg);
    Ok(())
}

// count, then `count` counters; anything beyond a week is dropped
fn parse_weekuse<G: ReportError>(
    input: &mut XFile,
    _tag: &mut u8,
    _field: &TaggedField<G, VolumeHeader>,
    _info: &mut TagParseInfo,
    global: &mut G,
    hdr: &mut VolumeHeader,
) -> Result<FieldStep, DumpError> {
    let count = input.read_u16()? as usize;
    if count != WEEKUSE_DAYS {
        global.report_error(
            &DumpError::Format(format!("weekuse count {}", count)),
            false,
            &format!("incorrect array count ({}) in weekuse data", count),
        );
    }

    for index in 0..count {
        let value = input.read_u32()?;
        if index < WEEKUSE_DAYS {
            hdr.weekuse[index] = value;
        }
    }
    hdr.fields |= VolumeHeaderFields::WEEKUSE;
    Ok(FieldStep::Next)
}

/// Field table of the volume header body.
pub fn volume_header_fields<G: ReportError>() -> [TaggedField<G, VolumeHeader>; 25] {
    use FieldKind as K;
    use VolumeHeaderFields as F;

    let store = |tag, kind, label, flag: F| {
        TaggedField::store(tag, kind, label, store_volume_field, flag.bits())
    };

    [
        store(VHTAG_VOLID, K::Int32, "Volume ID", F::VOLID),
        store(VHTAG_VERS, K::Int32, "Version", F::VOLVERS),
        store(VHTAG_VOLNAME, K::String, "Volume name", F::VOLNAME),
        store(VHTAG_INSERV, K::Flag, "In service?", F::INSERV),
        store(VHTAG_BLESSED, K::Flag, "Blessed?", F::BLESSED),
        store(VHTAG_VUNIQ, K::Int32, "Uniquifier", F::VOLUNIQ),
        store(VHTAG_TYPE, K::Byte, "Type", F::VOLTYPE),
        store(VHTAG_PARENT, K::Int32, "Parent ID", F::PARENT),
        store(VHTAG_CLONE, K::Int32, "Clone ID", F::CLONE),
        store(VHTAG_MAXQUOTA, K::Int32, "Max quota", F::MAXQ),
        store(VHTAG_MINQUOTA, K::Int32, "Min quota", F::MINQ),
        store(VHTAG_DISKUSED, K::Int32, "Disk used", F::DISKUSED),
        store(VHTAG_FILECOUNT, K::Int32, "File count", F::NFILES),
        store(VHTAG_ACCOUNT, K::Int32, "Account", F::ACCOUNT),
        store(VHTAG_OWNER, K::Int32, "Owner", F::OWNER),
        store(VHTAG_CREAT, K::Time, "Created", F::CREATE_DATE),
        store(VHTAG_ACCESS, K::Time, "Accessed", F::ACCESS_DATE),
        store(VHTAG_UPDATE, K::Time, "Updated", F::UPDATE_DATE),
        store(VHTAG_EXPIRE, K::Time, "Expires", F::EXPIRE_DATE),
        store(VHTAG_BACKUP, K::Time, "Backed up", F::BACKUP_DATE),
        store(VHTAG_OFFLINE, K::String, "Offine Msg", F::OFFLINE_MSG),
        store(VHTAG_MOTD, K::String, "MOTD", F::MOTD),
        TaggedField::special(VHTAG_WEEKUSE, "Weekuse", parse_weekuse, F::WEEKUSE.bits()),
        store(VHTAG_DUDATE, K::Time, "Dayuse Date", F::DAYUSE_DATE),
        store(VHTAG_DAYUSE, K::Int32, "Daily usage", F::DAYUSE),
    ]
}
