//! Synthetic `root.afs` volume
//!
//! Builds a dump of a volume whose root directory holds one mount point per
//! cell (from a CellServDB file), optional read-only mount points, cell
//! alias symlinks and a recursive-find trap.

use std::io::BufRead;

use anyhow::Error;

use dumpscan_xfile::XFile;

use crate::file_formats::*;
use crate::{
    DirectoryBuilder, DumpError, DumpHeader, DumpHeaderFields, DumpWriter, Vnode, VnodeFields,
    VolumeHeader, VolumeHeaderFields,
};

/// Root volume of a cell.
pub const ROOT_CELL_VOLUME: &str = "root.cell";

/// Identifier of `system:administrators`.
const ACL_ADMINISTRATORS: i32 = -204;
/// Identifier of `system:anyuser`.
const ACL_ANYUSER: i32 = -101;
const ACL_VERSION: u32 = 1;
const RIGHTS_READ: u32 = 0x01;
const RIGHTS_LOOKUP: u32 = 0x08;
const RIGHTS_ALL: u32 = 0x7f;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RootItemKind {
    Symlink,
    /// Regular mount point (`#`).
    MountPoint,
    /// Read-only mount point (`%`).
    ReadOnlyMountPoint,
}

impl RootItemKind {
    fn prefix(self) -> Option<char> {
        match self {
            RootItemKind::Symlink => None,
            RootItemKind::MountPoint => Some('#'),
            RootItemKind::ReadOnlyMountPoint => Some('%'),
        }
    }

    fn mode(self) -> u16 {
        match self {
            RootItemKind::Symlink => 0o755,
            _ => 0o644,
        }
    }
}

/// An entry of the root directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootItem {
    pub name: String,
    pub vnode: u32,
    pub uniq: u32,
    /// Symlink contents, e.g. `#example.com:root.cell.`
    pub target: String,
    pub kind: RootItemKind,
}

/// Collects root directory entries and writes them as a volume dump
pub struct RootVolumeBuilder {
    items: Vec<RootItem>,
    directory: DirectoryBuilder,
    next_vnode: u32,
    next_uniq: u32,
}

impl RootVolumeBuilder {
    pub fn new() -> Result<Self, DumpError> {
        let mut directory = DirectoryBuilder::new();
        directory.add_entry(b".", ROOT_VNODE, 1)?;
        directory.add_entry(b"..", ROOT_VNODE, 1)?;
        Ok(Self {
            items: Vec::new(),
            directory,
            next_vnode: 2,
            next_uniq: 2,
        })
    }

    pub fn items(&self) -> &[RootItem] {
        &self.items
    }

    /// Add a mount point or symlink named `name`.
    ///
    /// Mount points refer to `cell:volume` (or just `volume` without a
    /// cell), a symlink simply points to `volume`.
    pub fn add_item(
        &mut self,
        name: &str,
        cell: Option<&str>,
        volume: &str,
        kind: RootItemKind,
    ) -> Result<(), DumpError> {
        let mut target = String::new();
        if let Some(prefix) = kind.prefix() {
            target.push(prefix);
        }
        if let Some(cell) = cell {
            target.push_str(cell);
            target.push(':');
        }
        target.push_str(volume);
        if kind != RootItemKind::Symlink {
            target.push('.');
        }

        log::debug!("root item {} -> {} ({:?})", name, target, kind);

        self.directory
            .add_entry(name.as_bytes(), self.next_vnode, self.next_uniq)?;
        self.items.push(RootItem {
            name: name.to_string(),
            vnode: self.next_vnode,
            uniq: self.next_uniq,
            target,
            kind,
        });
        self.next_vnode += 2;
        self.next_uniq += 1;
        Ok(())
    }

    /// Read-only mount point `.cell` for `cell`.
    pub fn add_ro_cell(&mut self, cell: &str) -> Result<(), DumpError> {
        self.add_item(
            &format!(".{}", cell),
            Some(cell),
            ROOT_CELL_VOLUME,
            RootItemKind::ReadOnlyMountPoint,
        )
    }

    /// Mount point catching tools which recurse into `/afs`.
    pub fn add_recursive_find_trap(&mut self) -> Result<(), DumpError> {
        self.add_item(".recursive-find-trap", None, "root.afs", RootItemKind::MountPoint)
    }

    /// Add a mount point for every cell listed in a CellServDB file, and a
    /// read-only one as well with `all_ro`.
    ///
    /// Returns the number of cells found.
    pub fn add_cellservdb<R: BufRead>(&mut self, reader: R, all_ro: bool) -> Result<usize, Error> {
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            let rest = match line.strip_prefix('>') {
                Some(rest) => rest,
                None => continue,
            };
            let cell = match rest.split_whitespace().next() {
                Some(cell) => cell,
                None => continue,
            };
            self.add_item(cell, Some(cell), ROOT_CELL_VOLUME, RootItemKind::MountPoint)?;
            if all_ro {
                self.add_ro_cell(cell)?;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Add a symlink for every `cell alias` line of a cell alias file.
    pub fn add_aliases<R: BufRead>(&mut self, reader: R) -> Result<usize, Error> {
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            let mut words = line.split_whitespace();
            if let (Some(cell), Some(alias)) = (words.next(), words.next()) {
                self.add_item(alias, None, cell, RootItemKind::Symlink)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Write the volume as a complete dump.
    pub fn write_dump(self, output: &mut XFile, volname: &str, volid: u32) -> Result<(), DumpError> {
        let now = proxmox_time::epoch_i64() as u32;
        let mut writer = DumpWriter::new(output);

        let mut dumphdr = DumpHeader::new();
        dumphdr.fields = DumpHeaderFields::all();
        dumphdr.volid = volid;
        dumphdr.volname = volname.as_bytes().to_vec();
        dumphdr.from_date = 0;
        dumphdr.to_date = now;
        writer.dump_header(&dumphdr)?;

        let volhdr = VolumeHeader {
            fields: VolumeHeaderFields::VOLID
                | VolumeHeaderFields::VOLVERS
                | VolumeHeaderFields::VOLNAME
                | VolumeHeaderFields::INSERV
                | VolumeHeaderFields::BLESSED
                | VolumeHeaderFields::VOLUNIQ
                | VolumeHeaderFields::VOLTYPE
                | VolumeHeaderFields::PARENT
                | VolumeHeaderFields::NFILES
                | VolumeHeaderFields::CREATE_DATE
                | VolumeHeaderFields::UPDATE_DATE,
            volid,
            volvers: 1,
            volname: volname.as_bytes().to_vec(),
            inservice: true,
            blessed: true,
            voluniq: self.next_uniq,
            parent_volid: volid,
            nfiles: self.items.len() as u32 + 1,
            create_date: now,
            update_date: now,
            ..Default::default()
        };
        writer.volume_header(&volhdr)?;

        let common = VnodeFields::TYPE
            | VnodeFields::NLINKS
            | VnodeFields::DVERS
            | VnodeFields::SDATE
            | VnodeFields::AUTHOR
            | VnodeFields::OWNER
            | VnodeFields::GROUP
            | VnodeFields::MODE
            | VnodeFields::CDATE
            | VnodeFields::PARENT;

        let mut root = Vnode::new(ROOT_VNODE, 1);
        root.fields = common | VnodeFields::ACL;
        root.vtype = VNODE_TYPE_DIR;
        root.nlinks = 2;
        root.datavers = 1;
        root.mode = 0o755;
        root.client_date = now;
        root.server_date = now;
        root.acl = default_acl();
        writer.vnode(&root)?;
        writer.vnode_data(&self.directory.finish())?;

        for item in &self.items {
            let mut vnode = Vnode::new(item.vnode, item.uniq);
            vnode.fields = common;
            vnode.vtype = VNODE_TYPE_SYMLINK;
            vnode.nlinks = 1;
            vnode.datavers = 1;
            vnode.mode = item.kind.mode();
            vnode.parent = ROOT_VNODE;
            vnode.client_date = now;
            vnode.server_date = now;
            writer.vnode(&vnode)?;
            writer.vnode_data(item.target.as_bytes())?;
        }

        writer.finish()
    }
}

/// Access list granting everything to administrators and read/lookup to
/// anyone, in network byte order.
fn default_acl() -> [u8; VNODE_ACL_SIZE] {
    let entries = [
        (ACL_ADMINISTRATORS, RIGHTS_ALL),
        (ACL_ANYUSER, RIGHTS_READ | RIGHTS_LOOKUP),
    ];
    let size = 20 + 8 * entries.len() as u32;
    let header = [size, ACL_VERSION, entries.len() as u32, entries.len() as u32, 0];

    let mut acl = [0u8; VNODE_ACL_SIZE];
    let mut words = header.to_vec();
    for (id, rights) in entries {
        words.push(id as u32);
        words.push(rights);
    }
    for (chunk, word) in acl.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    acl
}

#[cfg(test)]
mod test {
    use anyhow::Error;

    use dumpscan_xfile::{open_memory, OpenMode};

    use super::*;
    use crate::pathname::PathIndex;
    use crate::{DumpHandler, DumpParser, ParserConfig};

    const CELLSERVDB: &str = "\
>grand.central.org      #GCO Public CellServDB 25 Oct 2023
18.9.48.14                      #penn.central.org
>example.com   # test cell
10.0.0.1  #db1.example.com
>
";

    const ALIASES: &str = "grand.central.org gco\n\n   example.com  ex  \nlonely\n";

    #[derive(Default)]
    struct Links {
        targets: Vec<(u32, u16, Vec<u8>)>,
        root_mode: u16,
    }

    impl DumpHandler for Links {
        fn directory_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
            self.root_mode = vnode.mode;
            Ok(())
        }

        fn symlink_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
            self.targets
                .push((vnode.vnode, vnode.mode, vnode.link_target.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_item_numbering() -> Result<(), Error> {
        let mut builder = RootVolumeBuilder::new()?;
        builder.add_recursive_find_trap()?;
        assert_eq!(builder.add_cellservdb(CELLSERVDB.as_bytes(), true)?, 2);
        assert_eq!(builder.add_aliases(ALIASES.as_bytes())?, 2);

        let items: Vec<(&str, u32, u32, &str)> = builder
            .items()
            .iter()
            .map(|i| (i.name.as_str(), i.vnode, i.uniq, i.target.as_str()))
            .collect();
        assert_eq!(
            items,
            vec![
                (".recursive-find-trap", 2, 2, "#root.afs."),
                ("grand.central.org", 4, 3, "#grand.central.org:root.cell."),
                (".grand.central.org", 6, 4, "%grand.central.org:root.cell."),
                ("example.com", 8, 5, "#example.com:root.cell."),
                (".example.com", 10, 6, "%example.com:root.cell."),
                ("gco", 12, 7, "grand.central.org"),
                ("ex", 14, 8, "example.com"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_name() -> Result<(), Error> {
        let mut builder = RootVolumeBuilder::new()?;
        builder.add_cellservdb(CELLSERVDB.as_bytes(), false)?;
        assert!(builder.add_ro_cell("example.com").is_ok());
        assert!(builder.add_ro_cell("example.com").is_err());
        assert!(builder
            .add_item("a/b", None, "x", RootItemKind::Symlink)
            .is_err());
        Ok(())
    }

    #[test]
    fn test_write_dump() -> Result<(), Error> {
        let mut builder = RootVolumeBuilder::new()?;
        builder.add_cellservdb(CELLSERVDB.as_bytes(), false)?;
        builder.add_aliases(ALIASES.as_bytes())?;

        let mut output = open_memory(Vec::new(), OpenMode::ReadWrite);
        builder.write_dump(&mut output, "root.afs", 536870912)?;
        let dump = output.contents().unwrap_or_default().to_vec();

        let mut links = Links::default();
        let mut input = open_memory(dump.clone(), OpenMode::ReadOnly);
        DumpParser::new(&mut links, &ParserConfig::default()).parse_dump(&mut input)?;

        assert_eq!(links.root_mode, 0o755);
        assert_eq!(
            links.targets,
            vec![
                (2, 0o644, b"#grand.central.org:root.cell.".to_vec()),
                (4, 0o644, b"#example.com:root.cell.".to_vec()),
                (6, 0o755, b"grand.central.org".to_vec()),
                (8, 0o755, b"example.com".to_vec()),
            ]
        );

        let mut input = open_memory(dump, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), true)?;
        assert_eq!(index.follow(&mut input, b"/gco")?, Some(6));
        assert_eq!(index.build_path(&mut input, 4)?.path, b"/example.com");
        Ok(())
    }

    #[test]
    fn test_default_acl() {
        let acl = default_acl();
        assert_eq!(&acl[0..4], &36u32.to_be_bytes());
        assert_eq!(&acl[20..24], &(-204i32).to_be_bytes());
        assert_eq!(&acl[32..36], &9u32.to_be_bytes());
        assert!(acl[36..].iter().all(|b| *b == 0));
    }
}
