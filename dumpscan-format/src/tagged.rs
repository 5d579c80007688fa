//! Generic tagged-field engine.
//!
//! A record body is a sequence of fields, each introduced by a one byte
//! tag. There is no length prefix, the payload size follows from the
//! field [`FieldKind`] found in the descriptor table of the record. Kinds
//! which cannot be decoded generically are handed to a custom parser.
//!
//! Decoding a record stops at the first tag the table does not know. That
//! tag is left in `tag` for the caller, which owns the outer tag space and
//! decides what it means.

use bitflags::bitflags;

use dumpscan_xfile::XFile;

use crate::DumpError;

/// Wire shape of a field
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Noop,
    Byte,
    Hex8,
    Char,
    Flag,
    Int16,
    Hex16,
    Int32,
    Hex32,
    Time,
    String,
    /// Decoded by the custom parser of the descriptor.
    Special,
}

impl FieldKind {
    /// Fixed payload width, `None` for variable sized kinds.
    pub const fn width(self) -> Option<usize> {
        match self {
            FieldKind::Noop => Some(0),
            FieldKind::Byte | FieldKind::Hex8 | FieldKind::Char | FieldKind::Flag => Some(1),
            FieldKind::Int16 | FieldKind::Hex16 => Some(2),
            FieldKind::Int32 | FieldKind::Hex32 | FieldKind::Time => Some(4),
            FieldKind::String | FieldKind::Special => None,
        }
    }

    /// Render a decoded value the way this kind is meant to be displayed.
    pub fn display(self, value: &FieldValue) -> String {
        let num = value.as_u32();
        match self {
            FieldKind::Hex8 | FieldKind::Hex16 | FieldKind::Hex32 => format!("{:#x}", num),
            FieldKind::Char => match value {
                FieldValue::U8(byte) if byte.is_ascii_graphic() => format!("'{}'", *byte as char),
                _ => format!("{:#04x}", num),
            },
            FieldKind::Flag => (num != 0).to_string(),
            FieldKind::Time => format_time(num),
            FieldKind::String => match value {
                FieldValue::String(data) => format!("\"{}\"", String::from_utf8_lossy(data)),
                _ => String::from("\"\""),
            },
            FieldKind::Noop | FieldKind::Special => String::new(),
            _ => num.to_string(),
        }
    }
}

/// Format a dump time stamp (seconds since the epoch, UTC).
pub fn format_time(epoch: u32) -> String {
    match proxmox_time::epoch_to_rfc3339_utc(i64::from(epoch)) {
        Ok(text) => text,
        Err(_) => epoch.to_string(),
    }
}

/// A decoded payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Empty,
    U8(u8),
    U16(u16),
    U32(u32),
    String(Vec<u8>),
}

impl FieldValue {
    /// Integer value, zero for non-integer payloads.
    pub fn as_u32(&self) -> u32 {
        match self {
            FieldValue::U8(v) => u32::from(*v),
            FieldValue::U16(v) => u32::from(*v),
            FieldValue::U32(v) => *v,
            FieldValue::Empty | FieldValue::String(_) => 0,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FieldValue::String(data) => data,
            _ => Vec::new(),
        }
    }
}

/// What a custom parser did with the tag space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldStep {
    /// Field consumed, the engine reads the next tag.
    Next,
    /// Field consumed and the next tag was already read into `tag`.
    TagPending,
    /// Nothing follows, stop decoding.
    Finish,
}

/// How a record decode ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseEnd {
    /// `tag` holds a tag the table does not own, still unhandled.
    ForeignTag,
    /// A custom parser finished the stream.
    Finished,
}

/// Store a decoded value into the record under construction.
pub type StoreFn<G, L> =
    fn(field: &TaggedField<G, L>, value: FieldValue, global: &mut G, local: &mut L) -> Result<(), DumpError>;

/// Decode a [`FieldKind::Special`] field.
///
/// Must consume exactly the payload of its field, and report through the
/// returned [`FieldStep`] whether it already read the following tag.
pub type SpecialFn<G, L> = fn(
    input: &mut XFile,
    tag: &mut u8,
    field: &TaggedField<G, L>,
    info: &mut TagParseInfo,
    global: &mut G,
    local: &mut L,
) -> Result<FieldStep, DumpError>;

pub enum FieldAction<G, L> {
    /// Decode and drop.
    Ignore,
    Store(StoreFn<G, L>),
    Special(SpecialFn<G, L>),
}

/// Field descriptor
///
/// `refarg` is free for the action's own use, the record codecs keep the
/// presence bit of the field there.
pub struct TaggedField<G, L> {
    pub tag: u8,
    pub kind: FieldKind,
    pub label: &'static str,
    pub action: FieldAction<G, L>,
    pub refarg: u32,
}

impl<G, L> TaggedField<G, L> {
    pub fn store(
        tag: u8,
        kind: FieldKind,
        label: &'static str,
        store: StoreFn<G, L>,
        refarg: u32,
    ) -> Self {
        Self {
            tag,
            kind,
            label,
            action: FieldAction::Store(store),
            refarg,
        }
    }

    pub fn special(tag: u8, label: &'static str, parser: SpecialFn<G, L>, refarg: u32) -> Self {
        Self {
            tag,
            kind: FieldKind::Special,
            label,
            action: FieldAction::Special(parser),
            refarg,
        }
    }
}

bitflags! {
    /// Unknown tag handling
    #[derive(Default)]
    pub struct TagParseFlags: u32 {
        /// Skip bytes after an unknown tag until a known one shows up.
        const SKIP  = 0x0001;
        /// If the skip fails, seek back to the unknown tag.
        const RSKIP = 0x0002;
    }
}

/// Per-record parse state
pub struct TagParseInfo {
    pub flags: TagParseFlags,
    /// Bytes passed over by the last skip.
    pub shift_offset: u64,
    /// Stream offset of the tag where the last skip started.
    pub shift_start: u64,
    /// Upper bound for a single skip.
    pub skip_limit: u64,
    /// Tags owned by the enclosing scope, a skip never passes them.
    pub stop_tags: &'static [u8],
}

impl TagParseInfo {
    pub fn new(flags: TagParseFlags, stop_tags: &'static [u8], skip_limit: u64) -> Self {
        Self {
            flags,
            shift_offset: 0,
            shift_start: 0,
            skip_limit,
            stop_tags,
        }
    }

    pub fn is_stop_tag(&self, tag: u8) -> bool {
        self.stop_tags.contains(&tag)
    }
}

/// Receiver of problems found while decoding
pub trait ReportError {
    fn report_error(&mut self, err: &DumpError, fatal: bool, msg: &str);
}

/// Reports through the `log` facade.
pub struct LogReporter;

impl ReportError for LogReporter {
    fn report_error(&mut self, err: &DumpError, fatal: bool, msg: &str) {
        if fatal {
            log::error!("{} ({})", msg, err);
        } else {
            log::warn!("{} ({})", msg, err);
        }
    }
}

fn read_value<G, L>(input: &mut XFile, field: &TaggedField<G, L>) -> Result<FieldValue, DumpError> {
    let value = match field.kind {
        FieldKind::Noop => FieldValue::Empty,
        FieldKind::Byte | FieldKind::Hex8 | FieldKind::Char | FieldKind::Flag => {
            FieldValue::U8(input.read_u8()?)
        }
        FieldKind::Int16 | FieldKind::Hex16 => FieldValue::U16(input.read_u16()?),
        FieldKind::Int32 | FieldKind::Hex32 | FieldKind::Time => FieldValue::U32(input.read_u32()?),
        FieldKind::String => FieldValue::String(input.read_string()?),
        FieldKind::Special => {
            return Err(DumpError::Format(format!(
                "field '{}' has no generic decoding",
                field.label
            )))
        }
    };
    Ok(value)
}

/// Decode fields until a tag not in `fields` shows up.
///
/// `tag` must hold the first tag of the record body on entry. On
/// [`ParseEnd::ForeignTag`] it holds the tag which ended the record.
pub fn parse_tagged_data<G: ReportError, L>(
    input: &mut XFile,
    fields: &[TaggedField<G, L>],
    tag: &mut u8,
    info: &mut TagParseInfo,
    global: &mut G,
    local: &mut L,
) -> Result<ParseEnd, DumpError> {
    loop {
        let field = match fields.iter().find(|field| field.tag == *tag) {
            Some(field) => field,
            None => {
                if info.flags.contains(TagParseFlags::SKIP)
                    && !info.is_stop_tag(*tag)
                    && skip_unknown(input, fields, tag, info, global)?
                {
                    continue;
                }
                return Ok(ParseEnd::ForeignTag);
            }
        };

        match (&field.action, field.kind) {
            (FieldAction::Special(parser), FieldKind::Special) => {
                match parser(input, tag, field, info, global, local)? {
                    FieldStep::Next => {}
                    FieldStep::TagPending => continue,
                    FieldStep::Finish => return Ok(ParseEnd::Finished),
                }
            }
            (FieldAction::Special(_), _) | (_, FieldKind::Special) => {
                return Err(DumpError::Format(format!(
                    "field '{}' ({:#04x}) mixes custom and generic decoding",
                    field.label, field.tag
                )));
            }
            (FieldAction::Store(store), _) => {
                let value = read_value(input, field)?;
                log::trace!("{} {}", field.label, field.kind.display(&value));
                store(field, value, global, local)?;
            }
            (FieldAction::Ignore, _) => {
                read_value(input, field)?;
            }
        }

        *tag = input.read_u8()?;
    }
}

/// Pass over garbage after an unknown tag.
///
/// Returns true if a tag of this table was found (and is now in `tag`).
/// Returns false if the record ends here: either a stop tag was reached,
/// or nothing was found and the stream was rewound to the unknown tag.
fn skip_unknown<G: ReportError, L>(
    input: &mut XFile,
    fields: &[TaggedField<G, L>],
    tag: &mut u8,
    info: &mut TagParseInfo,
    global: &mut G,
) -> Result<bool, DumpError> {
    let unknown = *tag;
    info.shift_start = input.tell()?.saturating_sub(1);
    info.shift_offset = 0;

    let exhausted = loop {
        if info.shift_offset >= info.skip_limit {
            break DumpError::Format(format!("no known tag within {} bytes", info.skip_limit));
        }
        match input.read_u8() {
            Ok(byte) => *tag = byte,
            Err(err) if err.is_eof() => break err.into(),
            Err(err) => return Err(err.into()),
        }
        info.shift_offset += 1;

        if fields.iter().any(|field| field.tag == *tag) || info.is_stop_tag(*tag) {
            global.report_error(
                &DumpError::BadTag {
                    tag: unknown,
                    offset: info.shift_start,
                },
                false,
                &format!(
                    "skipped {} bytes after unknown tag {:#04x} at offset {}",
                    info.shift_offset, unknown, info.shift_start
                ),
            );
            return Ok(fields.iter().any(|field| field.tag == *tag));
        }
    };

    if info.flags.contains(TagParseFlags::RSKIP) {
        input.seek(info.shift_start)?;
        *tag = input.read_u8()?;
        global.report_error(
            &exhausted,
            false,
            &format!(
                "unknown tag {:#04x} at offset {}, rewound after failed skip",
                unknown, info.shift_start
            ),
        );
        info.shift_offset = 0;
        return Ok(false);
    }

    Err(exhausted)
}
