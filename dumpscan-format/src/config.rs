use std::path::Path;

use anyhow::{format_err, Error};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Repair strategies of the dump parser
    ///
    /// All of them need to seek, so they are ignored on streams which
    /// cannot.
    #[derive(Default)]
    pub struct RepairFlags: u32 {
        /// Skip unknown or null field tags instead of ending the record.
        const SKIP   = 0x0001;
        /// Seek back to the unknown tag if the skip fails.
        const RSKIP  = 0x0002;
        /// Trust the stream position after vnode data, and check the
        /// declared data length against the following tag.
        const VDSYNC = 0x0004;
        /// Scan forward for the next record after a bad vnode or tag.
        const VFSYNC = 0x0008;
    }
}

/// Dump parser configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ParserConfig {
    pub skip_unknown_tags: bool,
    pub rewind_after_skip: bool,
    pub resync_vnode_data: bool,
    pub resync_after_bad_vnode: bool,
    /// Decode directory vnode data into entries.
    pub parse_directories: bool,
    /// Treat a bad dump header magic as fatal.
    pub check_magic: bool,
    /// Maximum number of bytes passed over when skipping an unknown tag.
    pub skip_limit: u64,
    /// Maximum number of bytes scanned when looking for the next record.
    pub resync_scan_limit: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            skip_unknown_tags: false,
            rewind_after_skip: false,
            resync_vnode_data: false,
            resync_after_bad_vnode: false,
            parse_directories: false,
            check_magic: false,
            skip_limit: 4096,
            resync_scan_limit: 16 * 1024 * 1024,
        }
    }
}

impl ParserConfig {
    /// Enable every repair strategy.
    pub fn with_repairs(mut self) -> Self {
        self.skip_unknown_tags = true;
        self.rewind_after_skip = true;
        self.resync_vnode_data = true;
        self.resync_after_bad_vnode = true;
        self
    }

    pub fn repair_flags(&self) -> RepairFlags {
        let mut flags = RepairFlags::empty();
        flags.set(RepairFlags::SKIP, self.skip_unknown_tags);
        flags.set(RepairFlags::RSKIP, self.rewind_after_skip);
        flags.set(RepairFlags::VDSYNC, self.resync_vnode_data);
        flags.set(RepairFlags::VFSYNC, self.resync_after_bad_vnode);
        flags
    }

    /// Load from a JSON file. Missing keys keep their default.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| format_err!("unable to read parser config {:?} - {}", path, err))?;
        serde_json::from_str(&raw)
            .map_err(|err| format_err!("unable to parse parser config {:?} - {}", path, err))
    }
}
