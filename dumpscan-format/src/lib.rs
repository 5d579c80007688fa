//! AFS volume dump format
//!
//! # Dump layout
//!
//! A dump is a sequence of top-level records, each introduced by a one
//! byte tag:
//!
//! - dump header (tag 1): magic, version, then tagged fields (volume id,
//!   volume name, dump dates),
//! - volume header (tag 2): tagged fields describing the volume,
//! - any number of vnodes (tag 3): vnode number, uniquifier, then tagged
//!   fields, the last of which may be the vnode data,
//! - end marker (tag 4) followed by the end magic.
//!
//! Fields inside a record are introduced by a printable tag byte and have
//! a fixed width per tag, except strings (NUL terminated) and a few
//! special fields (dump dates, weekly usage, ACL, vnode data). All numbers
//! are big-endian. A record ends at the first tag which is not one of its
//! fields, normally the tag of the next top-level record.
//!
//! # Reading
//!
//! [`DumpParser`] drives the tagged-field engine in [`tagged`] over a whole
//! dump and hands each decoded record to a [`DumpHandler`]. Damaged dumps
//! can be read with the repair strategies of [`RepairFlags`].
//!
//! [`PathIndex`] resolves vnode numbers to path names using the AFS
//! directory data (see [`directory`]) stored in the dump.
//!
//! # Writing
//!
//! Each record type has an encoder, [`DumpWriter`] checks the record
//! order. [`RootVolumeBuilder`] uses it to generate a `root.afs` volume.

mod error;
pub use error::*;

pub mod file_formats;
pub mod tagged;

mod dump_header;
pub use dump_header::*;

mod volume_header;
pub use volume_header::*;

mod vnode;
pub use vnode::*;

mod writer;
pub use writer::*;

mod config;
pub use config::{ParserConfig, RepairFlags};

pub mod directory;
pub use directory::{DirEntry, DirectoryBuilder};

mod parser;
pub use parser::*;

pub mod pathname;
pub use pathname::{PathEntry, PathIndex, PathLookup};

pub mod printer;
pub use printer::{DumpPrinter, OutputFormat, PrintFlags};

mod root_volume;
pub use root_volume::*;
