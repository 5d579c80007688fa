use bitflags::bitflags;

use dumpscan_xfile::XFile;

use crate::file_formats::*;
use crate::tagged::{FieldKind, FieldStep, FieldValue, ReportError, TagParseInfo, TaggedField};
use crate::DumpError;

bitflags! {
    /// Optional dump header fields
    #[derive(Default)]
    pub struct DumpHeaderFields: u32 {
        const VOLID   = 0x0000_0001;
        const VOLNAME = 0x0000_0002;
        const FROM    = 0x0000_0004;
        const TO      = 0x0000_0008;
    }
}

/// AFS dump header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpHeader {
    /// Stream offset of the record tag (set by the parser).
    pub offset: u64,
    pub fields: DumpHeaderFields,
    pub magic: u32,
    pub version: u32,
    pub volid: u32,
    pub volname: Vec<u8>,
    /// Reference date of an incremental dump.
    pub from_date: u32,
    /// Date of the dump.
    pub to_date: u32,
}

impl DumpHeader {
    /// Empty header with the current magic and version.
    pub fn new() -> Self {
        Self {
            magic: DUMPBEGINMAGIC,
            version: DUMPVERSION,
            ..Default::default()
        }
    }

    /// Encode the record, including its top-level tag.
    ///
    /// If only one of the dump dates is present, the other one is written
    /// as zero (from) or the current time (to).
    pub fn write(&self, output: &mut XFile) -> Result<(), DumpError> {
        output.write_u8(TAG_DUMPHEADER)?;
        output.write_u32(self.magic)?;
        output.write_u32(self.version)?;

        if self.fields.contains(DumpHeaderFields::VOLID) {
            output.write_u8(DHTAG_VOLID)?;
            output.write_u32(self.volid)?;
        }
        if self.fields.contains(DumpHeaderFields::VOLNAME) {
            output.write_u8(DHTAG_VOLNAME)?;
            output.write_string(&self.volname)?;
        }
        if self
            .fields
            .intersects(DumpHeaderFields::FROM | DumpHeaderFields::TO)
        {
            let from = if self.fields.contains(DumpHeaderFields::FROM) {
                self.from_date
            } else {
                0
            };
            let to = if self.fields.contains(DumpHeaderFields::TO) {
                self.to_date
            } else {
                proxmox_time::epoch_i64() as u32
            };
            output.write_u8(DHTAG_DUMPTIMES)?;
            output.write_u16(2)?;
            output.write_u32(from)?;
            output.write_u32(to)?;
        }
        Ok(())
    }
}

fn store_dump_header_field<G>(
    field: &TaggedField<G, DumpHeader>,
    value: FieldValue,
    _global: &mut G,
    hdr: &mut DumpHeader,
) -> Result<(), DumpError> {
    match field.tag {
        DHTAG_VOLID => hdr.volid = value.as_u32(),
        DHTAG_VOLNAME => hdr.volname = value.into_bytes(),
        _ => return Ok(()),
    }
    hdr.fields |= DumpHeaderFields::from_bits_truncate(field.refarg);
    Ok(())
}

// count, then `count` dates (from, to)
fn parse_dump_times<G: ReportError>(
    input: &mut XFile,
    _tag: &mut u8,
    _field: &TaggedField<G, DumpHeader>,
    _info: &mut TagParseInfo,
    global: &mut G,
    hdr: &mut DumpHeader,
) -> Result<FieldStep, DumpError> {
    let count = input.read_u16()?;
    if count != 2 {
        global.report_error(
            &DumpError::Format(format!("dump times count {}", count)),
            false,
            &format!("incorrect array count ({}) in dump times", count),
        );
    }

    for index in 0..count {
        let date = input.read_u32()?;
        match index {
            0 => {
                hdr.from_date = date;
                hdr.fields |= DumpHeaderFields::FROM;
            }
            1 => {
                hdr.to_date = date;
                hdr.fields |= DumpHeaderFields::TO;
            }
            _ => {}
        }
    }
    Ok(FieldStep::Next)
}

/// Field table of the dump header body.
pub fn dump_header_fields<G: ReportError>() -> [TaggedField<G, DumpHeader>; 3] {
    [
        TaggedField::store(
            DHTAG_VOLID,
            FieldKind::Int32,
            "Volume ID",
            store_dump_header_field,
            DumpHeaderFields::VOLID.bits(),
        ),
        TaggedField::store(
            DHTAG_VOLNAME,
            FieldKind::String,
            "Volume name",
            store_dump_header_field,
            DumpHeaderFields::VOLNAME.bits(),
        ),
        TaggedField::special(
            DHTAG_DUMPTIMES,
            "Dump times",
            parse_dump_times,
            (DumpHeaderFields::FROM | DumpHeaderFields::TO).bits(),
        ),
    ]
}

#[cfg(test)]
mod test {
    use anyhow::Error;

    use dumpscan_xfile::{open_memory, OpenMode};

    use super::*;
    use crate::tagged::{parse_tagged_data, LogReporter, ParseEnd, TagParseFlags};

    fn decode(data: &[u8]) -> Result<DumpHeader, Error> {
        let mut input = open_memory(data.to_vec(), OpenMode::ReadOnly);
        assert_eq!(input.read_u8()?, TAG_DUMPHEADER);
        let mut hdr = DumpHeader::new();
        hdr.magic = input.read_u32()?;
        hdr.version = input.read_u32()?;
        let mut tag = input.read_u8()?;
        let mut info = TagParseInfo::new(TagParseFlags::empty(), &TOP_LEVEL_TAGS, 0);
        let end = parse_tagged_data(
            &mut input,
            &dump_header_fields(),
            &mut tag,
            &mut info,
            &mut LogReporter,
            &mut hdr,
        )?;
        assert_eq!(end, ParseEnd::ForeignTag);
        assert_eq!(tag, TAG_DUMPEND);
        Ok(hdr)
    }

    fn encode(hdr: &DumpHeader) -> Result<Vec<u8>, Error> {
        let mut output = open_memory(Vec::new(), OpenMode::ReadWrite);
        hdr.write(&mut output)?;
        output.write_u8(TAG_DUMPEND)?;
        Ok(output.contents().unwrap_or_default().to_vec())
    }

    #[test]
    fn test_dump_header_roundtrip() -> Result<(), Error> {
        let mut hdr = DumpHeader::new();
        hdr.fields = DumpHeaderFields::VOLID | DumpHeaderFields::FROM | DumpHeaderFields::TO;
        hdr.volid = 536870915;
        hdr.from_date = 1000;
        hdr.to_date = 2000;
        hdr.volname = b"ignored".to_vec();

        let decoded = decode(&encode(&hdr)?)?;
        assert_eq!(decoded.fields, hdr.fields);
        assert_eq!(decoded.volid, 536870915);
        assert_eq!(decoded.from_date, 1000);
        assert_eq!(decoded.to_date, 2000);
        // absent
        assert!(decoded.volname.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_to_date_is_now() -> Result<(), Error> {
        let mut hdr = DumpHeader::new();
        hdr.fields = DumpHeaderFields::FROM;
        hdr.from_date = 77;

        let before = proxmox_time::epoch_i64() as u32;
        let decoded = decode(&encode(&hdr)?)?;
        assert_eq!(decoded.from_date, 77);
        assert!(decoded.to_date >= before);
        assert_eq!(decoded.fields, DumpHeaderFields::FROM | DumpHeaderFields::TO);
        Ok(())
    }

    // the dump dates share one field, so FROM and TO come as a pair
    #[test]
    fn test_single_field_presence() -> Result<(), Error> {
        let mut seen = DumpHeaderFields::empty();
        for field in dump_header_fields::<LogReporter>().iter() {
            let flag = DumpHeaderFields::from_bits_truncate(field.refarg);
            let mut hdr = DumpHeader::new();
            hdr.fields = flag;
            hdr.volid = 7;
            hdr.volname = b"vol".to_vec();
            hdr.from_date = 1;
            hdr.to_date = 2;

            let data = encode(&hdr)?;
            assert_eq!(data[9], field.tag, "{}", field.label);
            let decoded = decode(&data)?;
            assert_eq!(decoded.fields, flag, "{}", field.label);
            seen |= flag;
        }
        assert_eq!(seen, DumpHeaderFields::all());
        Ok(())
    }

    #[test]
    fn test_volname_bytes() -> Result<(), Error> {
        let mut hdr = DumpHeader::new();
        hdr.fields = DumpHeaderFields::VOLNAME;
        hdr.volname = b"root.cell".to_vec();

        let data = encode(&hdr)?;
        let mut expected = vec![TAG_DUMPHEADER];
        expected.extend_from_slice(&DUMPBEGINMAGIC.to_be_bytes());
        expected.extend_from_slice(&DUMPVERSION.to_be_bytes());
        expected.push(DHTAG_VOLNAME);
        expected.extend_from_slice(b"root.cell\0");
        expected.push(TAG_DUMPEND);
        assert_eq!(data, expected);

        assert_eq!(decode(&data)?.volname, b"root.cell");
        Ok(())
    }
}
