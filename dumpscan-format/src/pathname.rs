//! Pathname reconstruction
//!
//! A [`PathIndex`] is built in one forward pass over a dump and maps each
//! vnode number to its parent, the offset of its record and the location
//! of its data. Names are not kept in memory: resolving a path rereads the
//! directory data of every ancestor, which needs a seekable stream.

use std::collections::HashMap;

use anyhow::Error;

use dumpscan_xfile::XFile;

use crate::directory::{lookup_entry, parse_directory};
use crate::file_formats::ROOT_VNODE;
use crate::{DumpError, DumpHandler, DumpParser, ParserConfig, Vnode};

/// Location of one vnode in a dump
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathEntry {
    pub vnode: u32,
    pub parent: u32,
    /// Stream offset of the vnode record.
    pub offset: u64,
    /// Stream offset of the vnode data, zero if there is none.
    pub d_offset: u64,
    pub d_size: u32,
}

/// Result of a path lookup
///
/// If resolution stopped early, `missing` names the vnode which could not
/// be resolved and `path` holds the part found below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathLookup {
    pub path: Vec<u8>,
    pub missing: Option<u32>,
}

impl PathLookup {
    pub fn is_complete(&self) -> bool {
        self.missing.is_none()
    }

    pub fn to_string_lossy(&self) -> String {
        match self.missing {
            None => String::from_utf8_lossy(&self.path).into_owned(),
            Some(vnode) => format!("<vnode {}>/{}", vnode, String::from_utf8_lossy(&self.path)),
        }
    }
}

/// Vnode number to location map
#[derive(Default)]
pub struct PathIndex {
    entries: HashMap<u32, PathEntry>,
    vnodes: u64,
    directories: u64,
    files: u64,
    duplicates: u64,
}

/// Collects index entries while parsing.
struct PathCollector {
    index: PathIndex,
    full: bool,
}

impl PathCollector {
    fn add(&mut self, vnode: &Vnode, is_dir: bool) -> Result<(), Error> {
        self.index.vnodes += 1;
        if is_dir {
            self.index.directories += 1;
        } else {
            self.index.files += 1;
        }
        if !is_dir && !self.full {
            return Ok(());
        }

        let entry = PathEntry {
            vnode: vnode.vnode,
            parent: vnode.parent,
            offset: vnode.offset,
            d_offset: if vnode.has_data() { vnode.d_offset } else { 0 },
            d_size: vnode.size,
        };
        if let Err(err) = self.index.insert(entry) {
            let msg = format!("vnode {} at offset {} ignored - {}", vnode.vnode, vnode.offset, err);
            self.error(&err, false, &msg);
        }
        Ok(())
    }
}

impl DumpHandler for PathCollector {
    fn directory_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        self.add(vnode, true)
    }

    fn file_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        self.add(vnode, false)
    }

    fn symlink_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        self.add(vnode, false)
    }

    fn unknown_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        self.add(vnode, false)
    }
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from a dump, reading it once from start to end.
    ///
    /// Without `full`, only directories are indexed, which is enough to
    /// resolve the path of any vnode whose parent is known.
    pub fn prescan(input: &mut XFile, config: &ParserConfig, full: bool) -> Result<Self, DumpError> {
        let mut collector = PathCollector {
            index: PathIndex::new(),
            full,
        };
        let mut config = config.clone();
        config.parse_directories = false;

        DumpParser::new(&mut collector, &config).parse_dump(input)?;

        let index = collector.index;
        log::debug!(
            "path index: {} vnodes ({} directories, {} files), {} entries, {} duplicates",
            index.vnodes,
            index.directories,
            index.files,
            index.entries.len(),
            index.duplicates
        );
        Ok(index)
    }

    /// Add an entry. The first entry for a vnode number wins, a duplicate
    /// is counted and rejected.
    pub fn insert(&mut self, entry: PathEntry) -> Result<(), DumpError> {
        if self.entries.contains_key(&entry.vnode) {
            self.duplicates += 1;
            return Err(DumpError::Duplicate(entry.vnode));
        }
        self.entries.insert(entry.vnode, entry);
        Ok(())
    }

    pub fn get(&self, vnode: u32) -> Option<&PathEntry> {
        self.entries.get(&vnode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vnodes seen by the prescan.
    pub fn vnode_count(&self) -> u64 {
        self.vnodes
    }

    pub fn directory_count(&self) -> u64 {
        self.directories
    }

    pub fn file_count(&self) -> u64 {
        self.files
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates
    }

    /// Read the directory data of `vnode`. The stream position is kept.
    fn read_directory(&self, input: &mut XFile, vnode: u32) -> Result<Option<Vec<u8>>, DumpError> {
        let entry = match self.entries.get(&vnode) {
            Some(entry) if entry.d_offset != 0 && entry.d_size != 0 => entry,
            _ => return Ok(None),
        };

        let saved = input.tell()?;
        input.seek(entry.d_offset)?;
        let mut data = vec![0u8; entry.d_size as usize];
        let result = input.read(&mut data);
        input.seek(saved)?;
        result?;
        Ok(Some(data))
    }

    /// Name of `child` in directory `parent`.
    ///
    /// Returns `None` if the parent or its data are unknown, or the child
    /// is not listed.
    pub fn lookup_name(
        &self,
        input: &mut XFile,
        parent: u32,
        child: u32,
    ) -> Result<Option<Vec<u8>>, DumpError> {
        let data = match self.read_directory(input, parent)? {
            Some(data) => data,
            None => return Ok(None),
        };

        let mut name = None;
        parse_directory(&data, |entry| {
            if entry.vnode == child && !entry.is_dot_or_dotdot() {
                name = Some(entry.name);
                return Ok(false);
            }
            Ok(true)
        })?;
        Ok(name)
    }

    /// Full path of an indexed vnode.
    pub fn build_path(&self, input: &mut XFile, vnode: u32) -> Result<PathLookup, DumpError> {
        if vnode == ROOT_VNODE {
            return Ok(PathLookup {
                path: b"/".to_vec(),
                missing: None,
            });
        }
        match self.entries.get(&vnode) {
            Some(entry) => self.build_child_path(input, entry.parent, vnode),
            None => Ok(PathLookup {
                path: Vec::new(),
                missing: Some(vnode),
            }),
        }
    }

    /// Full path of `child` below directory `parent`.
    ///
    /// The child itself does not need to be indexed, so this also works
    /// for files with a directory-only index.
    pub fn build_child_path(
        &self,
        input: &mut XFile,
        parent: u32,
        child: u32,
    ) -> Result<PathLookup, DumpError> {
        let mut names: Vec<Vec<u8>> = Vec::new();
        let mut missing = None;
        let (mut parent, mut child) = (parent, child);

        loop {
            match self.lookup_name(input, parent, child)? {
                Some(name) => names.push(name),
                None => {
                    missing = Some(child);
                    break;
                }
            }
            if parent == ROOT_VNODE {
                break;
            }
            if names.len() > self.entries.len() {
                return Err(DumpError::Format(format!(
                    "directory loop above vnode {}",
                    child
                )));
            }
            match self.entries.get(&parent) {
                Some(entry) => {
                    child = parent;
                    parent = entry.parent;
                }
                None => {
                    missing = Some(parent);
                    break;
                }
            }
        }

        let mut path = Vec::new();
        for name in names.iter().rev() {
            if missing.is_none() || !path.is_empty() {
                path.push(b'/');
            }
            path.extend_from_slice(name);
        }
        Ok(PathLookup { path, missing })
    }

    /// Resolve a slash separated path, starting at the volume root.
    ///
    /// Returns the vnode number, or `None` if a component does not exist.
    pub fn follow(&self, input: &mut XFile, path: &[u8]) -> Result<Option<u32>, DumpError> {
        let mut current = ROOT_VNODE;
        for component in path.split(|b| *b == b'/') {
            match component {
                b"" | b"." => continue,
                b".." => {
                    if current != ROOT_VNODE {
                        current = match self.entries.get(&current) {
                            Some(entry) => entry.parent,
                            None => return Ok(None),
                        };
                    }
                }
                name => {
                    let data = match self.read_directory(input, current)? {
                        Some(data) => data,
                        None => return Ok(None),
                    };
                    current = match lookup_entry(&data, name)? {
                        Some(entry) => entry.vnode,
                        None => return Ok(None),
                    };
                }
            }
        }
        Ok(Some(current))
    }
}

#[cfg(test)]
mod test {
    use anyhow::Error;

    use dumpscan_xfile::{open_memory, OpenMode};

    use super::*;
    use crate::file_formats::*;
    use crate::{DirectoryBuilder, DumpHeader, DumpWriter, VnodeFields, VolumeHeader};

    fn dir_vnode(number: u32, parent: u32) -> Vnode {
        let mut vnode = Vnode::new(number, number);
        vnode.fields = VnodeFields::TYPE | VnodeFields::PARENT;
        vnode.vtype = VNODE_TYPE_DIR;
        vnode.parent = parent;
        vnode
    }

    fn file_vnode(number: u32, parent: u32) -> Vnode {
        let mut vnode = dir_vnode(number, parent);
        vnode.vtype = VNODE_TYPE_FILE;
        vnode
    }

    fn directory(entries: &[(&str, u32)]) -> Result<Vec<u8>, Error> {
        let mut builder = DirectoryBuilder::new();
        for (name, vnode) in entries {
            builder.add_entry(name.as_bytes(), *vnode, *vnode)?;
        }
        Ok(builder.finish())
    }

    /// / (1) -> usr (3) -> lib (5) -> libc.so (6); /README (2)
    /// vnode 7 is a file in directory 9, which is not in the dump
    fn tree_dump(duplicate: bool) -> Result<Vec<u8>, Error> {
        let mut output = open_memory(Vec::new(), OpenMode::ReadWrite);
        let mut writer = DumpWriter::new(&mut output);
        writer.dump_header(&DumpHeader::new())?;
        writer.volume_header(&VolumeHeader::default())?;

        writer.vnode(&dir_vnode(1, 0))?;
        writer.vnode_data(&directory(&[(".", 1), ("..", 1), ("README", 2), ("usr", 3)])?)?;
        writer.vnode(&file_vnode(2, 1))?;
        writer.vnode_data(b"read me")?;
        writer.vnode(&dir_vnode(3, 1))?;
        writer.vnode_data(&directory(&[(".", 3), ("..", 1), ("lib", 5)])?)?;
        writer.vnode(&dir_vnode(5, 3))?;
        writer.vnode_data(&directory(&[(".", 5), ("..", 3), ("libc.so", 6)])?)?;
        writer.vnode(&file_vnode(6, 5))?;
        writer.vnode(&file_vnode(7, 9))?;
        if duplicate {
            // same number, claims to live in the root
            writer.vnode(&dir_vnode(3, 1))?;
        }
        writer.finish()?;

        Ok(output.contents().unwrap_or_default().to_vec())
    }

    #[test]
    fn test_prescan_counters() -> Result<(), Error> {
        let mut input = open_memory(tree_dump(false)?, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), false)?;
        assert_eq!(index.vnode_count(), 6);
        assert_eq!(index.directory_count(), 3);
        assert_eq!(index.file_count(), 3);
        assert_eq!(index.len(), 3);
        assert!(index.get(2).is_none());

        let mut input = open_memory(tree_dump(false)?, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), true)?;
        assert_eq!(index.len(), 6);
        assert_eq!(index.get(2).map(|e| e.d_size), Some(7));
        assert_eq!(index.get(6).map(|e| e.d_offset), Some(0));
        Ok(())
    }

    #[test]
    fn test_build_path() -> Result<(), Error> {
        let mut input = open_memory(tree_dump(false)?, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), true)?;

        let lookup = index.build_path(&mut input, 6)?;
        assert!(lookup.is_complete());
        assert_eq!(lookup.path, b"/usr/lib/libc.so");

        assert_eq!(index.build_path(&mut input, 2)?.path, b"/README");
        assert_eq!(index.build_path(&mut input, ROOT_VNODE)?.path, b"/");

        assert_eq!(index.lookup_name(&mut input, 3, 5)?, Some(b"lib".to_vec()));
        assert_eq!(index.lookup_name(&mut input, 3, 6)?, None);
        Ok(())
    }

    #[test]
    fn test_partial_path() -> Result<(), Error> {
        let mut input = open_memory(tree_dump(false)?, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), true)?;

        let lookup = index.build_path(&mut input, 7)?;
        assert_eq!(lookup.missing, Some(7));
        assert!(lookup.path.is_empty());

        let lookup = index.build_path(&mut input, 42)?;
        assert_eq!(lookup.missing, Some(42));

        // directory-only index, parent known from the vnode record
        let index = {
            let mut input = open_memory(tree_dump(false)?, OpenMode::ReadOnly);
            PathIndex::prescan(&mut input, &ParserConfig::default(), false)?
        };
        let lookup = index.build_child_path(&mut input, 5, 6)?;
        assert_eq!(lookup.path, b"/usr/lib/libc.so");
        Ok(())
    }

    #[test]
    fn test_follow() -> Result<(), Error> {
        let mut input = open_memory(tree_dump(false)?, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), false)?;

        assert_eq!(index.follow(&mut input, b"/usr/lib/libc.so")?, Some(6));
        assert_eq!(index.follow(&mut input, b"usr//lib/../../README")?, Some(2));
        assert_eq!(index.follow(&mut input, b"/")?, Some(ROOT_VNODE));
        assert_eq!(index.follow(&mut input, b"/usr/missing")?, None);
        Ok(())
    }

    #[test]
    fn test_duplicate_keeps_first() -> Result<(), Error> {
        let mut input = open_memory(tree_dump(true)?, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), false)?;
        assert_eq!(index.duplicate_count(), 1);
        assert_eq!(index.get(3).map(|e| e.d_size), Some(2048));

        let mut index = PathIndex::new();
        let entry = PathEntry {
            vnode: 9,
            parent: 1,
            offset: 100,
            d_offset: 0,
            d_size: 0,
        };
        index.insert(entry.clone())?;
        assert!(matches!(
            index.insert(PathEntry { offset: 200, ..entry }),
            Err(DumpError::Duplicate(9))
        ));
        assert_eq!(index.get(9).map(|e| e.offset), Some(100));
        Ok(())
    }

    #[test]
    fn test_lookup_needs_seekable_stream() -> Result<(), Error> {
        let (rd, wr) = nix::unistd::pipe()?;
        let mut writer = dumpscan_xfile::open_fd(wr, OpenMode::ReadWrite);
        writer.write(&tree_dump(false)?)?;
        writer.close()?;

        let mut input = dumpscan_xfile::open_fd(rd, OpenMode::ReadOnly);
        let index = PathIndex::prescan(&mut input, &ParserConfig::default(), true)?;
        assert_eq!(index.len(), 6);
        assert!(index.build_path(&mut input, 6).is_err());
        Ok(())
    }
}
