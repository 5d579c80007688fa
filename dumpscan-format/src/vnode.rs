use bitflags::bitflags;

use dumpscan_xfile::XFile;

use crate::file_formats::*;
use crate::tagged::{FieldKind, FieldStep, FieldValue, ReportError, TagParseInfo, TaggedField};
use crate::DumpError;

bitflags! {
    /// Optional vnode fields
    #[derive(Default)]
    pub struct VnodeFields: u32 {
        const TYPE   = 0x0000_0001;
        const NLINKS = 0x0000_0002;
        const PARENT = 0x0000_0004;
        const DVERS  = 0x0000_0008;
        const AUTHOR = 0x0000_0010;
        const OWNER  = 0x0000_0020;
        const GROUP  = 0x0000_0040;
        const MODE   = 0x0000_0080;
        const CDATE  = 0x0000_0100;
        const SDATE  = 0x0000_0200;
        const ACL    = 0x0000_0400;
        const SIZE   = 0x0000_0800;
        const DATA   = 0x0000_1000;
    }
}

/// Kind of file system object, from the vnode type field
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VnodeKind {
    File,
    Directory,
    Symlink,
    /// Only vnode number and uniquifier present.
    Empty,
    Unknown(u8),
}

/// AFS vnode record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vnode {
    /// Stream offset of the record tag (set by the parser).
    pub offset: u64,
    pub fields: VnodeFields,
    pub vnode: u32,
    pub uniq: u32,
    pub vtype: u8,
    pub nlinks: u16,
    pub parent: u32,
    pub datavers: u32,
    pub author: u32,
    pub owner: u32,
    pub group: u32,
    pub mode: u16,
    pub client_date: u32,
    pub server_date: u32,
    pub acl: [u8; VNODE_ACL_SIZE],
    /// Length of the vnode data.
    pub size: u32,
    /// Stream offset of the vnode data (set by the parser).
    pub d_offset: u64,
    /// Buffered data of a symbolic link.
    pub link_target: Vec<u8>,
}

impl Default for Vnode {
    fn default() -> Self {
        Self {
            offset: 0,
            fields: VnodeFields::empty(),
            vnode: 0,
            uniq: 0,
            vtype: 0,
            nlinks: 0,
            parent: 0,
            datavers: 0,
            author: 0,
            owner: 0,
            group: 0,
            mode: 0,
            client_date: 0,
            server_date: 0,
            acl: [0u8; VNODE_ACL_SIZE],
            size: 0,
            d_offset: 0,
            link_target: Vec::new(),
        }
    }
}

impl Vnode {
    pub fn new(vnode: u32, uniq: u32) -> Self {
        Self {
            vnode,
            uniq,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> VnodeKind {
        if self.fields.is_empty() {
            return VnodeKind::Empty;
        }
        match self.vtype {
            VNODE_TYPE_FILE => VnodeKind::File,
            VNODE_TYPE_DIR => VnodeKind::Directory,
            VNODE_TYPE_SYMLINK => VnodeKind::Symlink,
            other => VnodeKind::Unknown(other),
        }
    }

    pub fn has_data(&self) -> bool {
        self.fields.contains(VnodeFields::DATA)
    }

    /// Encode the record including its top-level tag, without data.
    ///
    /// Data follows separately, see [`write_vnode_data`](crate::write_vnode_data)
    /// and [`copy_vnode_data`](crate::copy_vnode_data).
    pub fn write(&self, output: &mut XFile) -> Result<(), DumpError> {
        use VnodeFields as F;

        output.write_u8(TAG_VNODE)?;
        output.write_u32(self.vnode)?;
        output.write_u32(self.uniq)?;

        let u32_field = |output: &mut XFile, flag: F, tag: u8, value: u32| -> Result<(), DumpError> {
            if self.fields.contains(flag) {
                output.write_u8(tag)?;
                output.write_u32(value)?;
            }
            Ok(())
        };

        if self.fields.contains(F::TYPE) {
            output.write_u8(VTAG_TYPE)?;
            output.write_u8(self.vtype)?;
        }
        if self.fields.contains(F::NLINKS) {
            output.write_u8(VTAG_NLINKS)?;
            output.write_u16(self.nlinks)?;
        }
        u32_field(output, F::DVERS, VTAG_DVERS, self.datavers)?;
        u32_field(output, F::SDATE, VTAG_SERVER_DATE, self.server_date)?;
        u32_field(output, F::AUTHOR, VTAG_AUTHOR, self.author)?;
        u32_field(output, F::OWNER, VTAG_OWNER, self.owner)?;
        u32_field(output, F::GROUP, VTAG_GROUP, self.group)?;
        if self.fields.contains(F::MODE) {
            output.write_u8(VTAG_MODE)?;
            output.write_u16(self.mode)?;
        }
        u32_field(output, F::PARENT, VTAG_PARENT, self.parent)?;
        u32_field(output, F::CDATE, VTAG_CLIENT_DATE, self.client_date)?;
        if self.fields.contains(F::ACL) {
            output.write_u8(VTAG_ACL)?;
            output.write(&self.acl)?;
        }
        Ok(())
    }
}

/// Reader of the vnode data field
///
/// The data field is the only field whose decoding depends on the parse
/// configuration (directories, symlinks, repair), so it is delegated to
/// the global parse state.
pub trait VnodeDataReader: ReportError {
    /// Consume the data field of `vnode`, starting at its length.
    fn read_vnode_data(
        &mut self,
        input: &mut XFile,
        tag: &mut u8,
        vnode: &mut Vnode,
    ) -> Result<FieldStep, DumpError>;
}

fn store_vnode_field<G>(
    field: &TaggedField<G, Vnode>,
    value: FieldValue,
    _global: &mut G,
    vnode: &mut Vnode,
) -> Result<(), DumpError> {
    let num = value.as_u32();
    match field.tag {
        VTAG_TYPE => vnode.vtype = num as u8,
        VTAG_NLINKS => vnode.nlinks = num as u16,
        VTAG_DVERS => vnode.datavers = num,
        VTAG_CLIENT_DATE => vnode.client_date = num,
        VTAG_AUTHOR => vnode.author = num,
        VTAG_OWNER => vnode.owner = num,
        VTAG_GROUP => vnode.group = num,
        VTAG_MODE => vnode.mode = num as u16,
        VTAG_PARENT => vnode.parent = num,
        VTAG_SERVER_DATE => vnode.server_date = num,
        _ => return Ok(()),
    }
    vnode.fields |= VnodeFields::from_bits_truncate(field.refarg);
    Ok(())
}

fn parse_acl<G>(
    input: &mut XFile,
    _tag: &mut u8,
    _field: &TaggedField<G, Vnode>,
    _info: &mut TagParseInfo,
    _global: &mut G,
    vnode: &mut Vnode,
) -> Result<FieldStep, DumpError> {
    input.read(&mut vnode.acl)?;
    vnode.fields |= VnodeFields::ACL;
    Ok(FieldStep::Next)
}

fn parse_vnode_data<G: VnodeDataReader>(
    input: &mut XFile,
    tag: &mut u8,
    _field: &TaggedField<G, Vnode>,
    _info: &mut TagParseInfo,
    global: &mut G,
    vnode: &mut Vnode,
) -> Result<FieldStep, DumpError> {
    global.read_vnode_data(input, tag, vnode)
}

/// Field table of the vnode body.
pub fn vnode_fields<G: VnodeDataReader>() -> [TaggedField<G, Vnode>; 12] {
    use FieldKind as K;
    use VnodeFields as F;

    let store = |tag, kind, label, flag: F| {
        TaggedField::store(tag, kind, label, store_vnode_field, flag.bits())
    };

    [
        store(VTAG_TYPE, K::Byte, "type", F::TYPE),
        store(VTAG_NLINKS, K::Int16, "link count", F::NLINKS),
        store(VTAG_DVERS, K::Int32, "version", F::DVERS),
        store(VTAG_CLIENT_DATE, K::Time, "client date", F::CDATE),
        store(VTAG_AUTHOR, K::Int32, "author", F::AUTHOR),
        store(VTAG_OWNER, K::Int32, "owner", F::OWNER),
        store(VTAG_GROUP, K::Int32, "group", F::GROUP),
        store(VTAG_MODE, K::Hex16, "mode", F::MODE),
        store(VTAG_PARENT, K::Int32, "parent", F::PARENT),
        store(VTAG_SERVER_DATE, K::Time, "server date", F::SDATE),
        TaggedField::special(VTAG_ACL, "ACL", parse_acl, F::ACL.bits()),
        TaggedField::special(
            VTAG_DATA,
            "data",
            parse_vnode_data,
            (F::SIZE | F::DATA).bits(),
        ),
    ]
}
