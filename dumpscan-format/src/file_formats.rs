//! On-disk constants of the AFS volume dump format.
//!
//! A dump is a sequence of records. Every record starts with a one byte
//! top-level tag, followed by a record specific fixed part and a list of
//! tagged fields (one byte tag, kind specific payload). All integers are
//! big-endian.

// WARNING: PLEASE DO NOT MODIFY THOSE VALUES, THEY ARE PART OF THE FORMAT

pub const TAG_DUMPHEADER: u8 = 1;
pub const TAG_VOLHEADER: u8 = 2;
pub const TAG_VNODE: u8 = 3;
pub const TAG_DUMPEND: u8 = 4;

/// All top-level record tags.
pub const TOP_LEVEL_TAGS: [u8; 4] = [TAG_DUMPHEADER, TAG_VOLHEADER, TAG_VNODE, TAG_DUMPEND];

pub const DUMPBEGINMAGIC: u32 = 0xB3A1_1322;
pub const DUMPENDMAGIC: u32 = 0x3A21_4B6E;
pub const DUMPVERSION: u32 = 1;

// dump header fields
pub const DHTAG_VOLNAME: u8 = b'n';
pub const DHTAG_VOLID: u8 = b'v';
pub const DHTAG_DUMPTIMES: u8 = b't';

// volume header fields
pub const VHTAG_VOLID: u8 = b'i';
pub const VHTAG_VERS: u8 = b'v';
pub const VHTAG_VOLNAME: u8 = b'n';
pub const VHTAG_INSERV: u8 = b's';
pub const VHTAG_BLESSED: u8 = b'b';
pub const VHTAG_VUNIQ: u8 = b'u';
pub const VHTAG_TYPE: u8 = b't';
pub const VHTAG_PARENT: u8 = b'p';
pub const VHTAG_CLONE: u8 = b'c';
pub const VHTAG_MAXQUOTA: u8 = b'q';
pub const VHTAG_MINQUOTA: u8 = b'm';
pub const VHTAG_DISKUSED: u8 = b'd';
pub const VHTAG_FILECOUNT: u8 = b'f';
pub const VHTAG_ACCOUNT: u8 = b'a';
pub const VHTAG_OWNER: u8 = b'o';
pub const VHTAG_CREAT: u8 = b'C';
pub const VHTAG_ACCESS: u8 = b'A';
pub const VHTAG_UPDATE: u8 = b'U';
pub const VHTAG_EXPIRE: u8 = b'E';
pub const VHTAG_BACKUP: u8 = b'B';
pub const VHTAG_OFFLINE: u8 = b'O';
pub const VHTAG_MOTD: u8 = b'M';
pub const VHTAG_WEEKUSE: u8 = b'W';
pub const VHTAG_DUDATE: u8 = b'D';
pub const VHTAG_DAYUSE: u8 = b'Z';

// vnode fields
pub const VTAG_TYPE: u8 = b't';
pub const VTAG_NLINKS: u8 = b'l';
pub const VTAG_DVERS: u8 = b'v';
pub const VTAG_CLIENT_DATE: u8 = b'm';
pub const VTAG_AUTHOR: u8 = b'a';
pub const VTAG_OWNER: u8 = b'o';
pub const VTAG_GROUP: u8 = b'g';
pub const VTAG_MODE: u8 = b'b';
pub const VTAG_PARENT: u8 = b'p';
pub const VTAG_SERVER_DATE: u8 = b's';
pub const VTAG_ACL: u8 = b'A';
pub const VTAG_DATA: u8 = b'f';

/// All vnode field tags.
pub const VNODE_FIELD_TAGS: [u8; 12] = [
    VTAG_TYPE,
    VTAG_NLINKS,
    VTAG_DVERS,
    VTAG_CLIENT_DATE,
    VTAG_AUTHOR,
    VTAG_OWNER,
    VTAG_GROUP,
    VTAG_MODE,
    VTAG_PARENT,
    VTAG_SERVER_DATE,
    VTAG_ACL,
    VTAG_DATA,
];

pub const VNODE_TYPE_FILE: u8 = 1;
pub const VNODE_TYPE_DIR: u8 = 2;
pub const VNODE_TYPE_SYMLINK: u8 = 3;

/// The root directory of every volume.
pub const ROOT_VNODE: u32 = 1;

/// ACL blob carried in a vnode record (large minus small disk vnode).
pub const VNODE_ACL_SIZE: usize = 256 - 64;

/// Number of week use counters in a volume header.
pub const WEEKUSE_DAYS: usize = 7;
