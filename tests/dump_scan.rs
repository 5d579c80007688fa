use std::path::PathBuf;

use anyhow::Error;
use lazy_static::lazy_static;

use dumpscan::format::file_formats::*;
use dumpscan::format::{
    DirEntry, DumpHeader, RootVolumeBuilder, Vnode, VnodeFields, VolumeHeader,
    VolumeHeaderFields, DSERR_MAGIC,
};
use dumpscan::xfile::open_memory;
use dumpscan::{DumpError, DumpHandler, DumpParser, OpenMode, ParserConfig, PathIndex, XFile};

lazy_static! {
    /// Dump header with a foreign magic, volume header with a name, one
    /// file vnode with five bytes of data.
    ///
    /// 0xB6AF7111 is not DUMPBEGINMAGIC, so the scan reports one non-fatal
    /// DSERR_MAGIC and goes on.
    static ref SMALL_DUMP: Vec<u8> = {
        let mut data = vec![TAG_DUMPHEADER];
        data.extend_from_slice(&0xB6AF_7111u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.push(DHTAG_VOLID);
        data.extend_from_slice(&42u32.to_be_bytes());

        data.push(TAG_VOLHEADER);
        data.push(VHTAG_VOLNAME);
        data.extend_from_slice(b"testvol\0");

        data.push(TAG_VNODE);
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.push(VTAG_TYPE);
        data.push(VNODE_TYPE_FILE);
        data.push(VTAG_DATA);
        data.extend_from_slice(&5u32.to_be_bytes());
        data.extend_from_slice(b"hello");

        data.push(TAG_DUMPEND);
        data.extend_from_slice(&DUMPENDMAGIC.to_be_bytes());
        data
    };
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn testdir() -> Result<PathBuf, Error> {
    let mut path = PathBuf::from("./target/testout");
    path.push(std::module_path!());
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

#[derive(Default)]
struct Recorder {
    volids: Vec<u32>,
    volnames: Vec<Vec<u8>>,
    files: Vec<(u32, u32, Vec<u8>)>,
    directories: Vec<u32>,
    entries: Vec<Vec<u8>>,
    errors: Vec<(u32, bool)>,
}

impl DumpHandler for Recorder {
    fn dump_header(&mut self, hdr: &DumpHeader, _input: &mut XFile) -> Result<(), Error> {
        self.volids.push(hdr.volid);
        Ok(())
    }

    fn volume_header(&mut self, hdr: &VolumeHeader, _input: &mut XFile) -> Result<(), Error> {
        self.volnames.push(hdr.volname.clone());
        Ok(())
    }

    fn directory_vnode(&mut self, vnode: &Vnode, _input: &mut XFile) -> Result<(), Error> {
        self.directories.push(vnode.vnode);
        Ok(())
    }

    fn file_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        let mut data = vec![0u8; vnode.size as usize];
        if vnode.has_data() && input.is_seekable() {
            input.seek(vnode.d_offset)?;
            input.read(&mut data)?;
        }
        self.files.push((vnode.vnode, vnode.size, data));
        Ok(())
    }

    fn dir_entry(&mut self, _vnode: &Vnode, entry: &DirEntry, _input: &mut XFile) -> Result<(), Error> {
        self.entries.push(entry.name.clone());
        Ok(())
    }

    fn error(&mut self, err: &DumpError, fatal: bool, _msg: &str) {
        self.errors.push((err.code(), fatal));
    }
}

#[test]
fn scan_small_dump_file() -> Result<(), Error> {
    init_logger();

    let mut path = testdir()?;
    path.push("small.dump");
    std::fs::write(&path, &*SMALL_DUMP)?;

    let mut recorder = Recorder::default();
    let summary = dumpscan::scan_dump(
        &path.to_string_lossy(),
        &ParserConfig::default(),
        &mut recorder,
    )?;

    assert_eq!(summary.vnodes, 1);
    assert_eq!(summary.recovered_errors, 1);
    assert_eq!(recorder.volids, vec![42]);
    assert_eq!(recorder.volnames, vec![b"testvol".to_vec()]);
    assert_eq!(recorder.files, vec![(3, 5, b"hello".to_vec())]);
    assert_eq!(recorder.errors, vec![(DSERR_MAGIC, false)]);
    Ok(())
}

#[test]
fn unknown_top_level_tag() -> Result<(), Error> {
    let mut data = SMALL_DUMP[..14].to_vec();
    data.push(0x09);
    data.extend_from_slice(&SMALL_DUMP[14..]);

    let mut recorder = Recorder::default();
    let mut input = open_memory(data.clone(), OpenMode::ReadOnly);
    let next = DumpParser::new(&mut recorder, &ParserConfig::default()).parse_dump_header(&mut input)?;
    assert_eq!(next, 0x09);
    assert_eq!(input.tell()?, 15);
    assert_eq!(recorder.volids, vec![42]);

    let mut recorder = Recorder::default();
    let mut input = open_memory(data, OpenMode::ReadOnly);
    let result = DumpParser::new(&mut recorder, &ParserConfig::default()).parse_dump(&mut input);
    assert!(matches!(
        result,
        Err(DumpError::BadTag {
            tag: 0x09,
            offset: 14
        })
    ));
    assert!(recorder.volnames.is_empty());
    assert_eq!(recorder.errors.last().map(|e| e.1), Some(true));
    Ok(())
}

fn damaged_dump() -> Result<Vec<u8>, Error> {
    let mut output = open_memory(Vec::new(), OpenMode::ReadWrite);

    DumpHeader::new().write(&mut output)?;
    let volhdr = VolumeHeader {
        fields: VolumeHeaderFields::VOLID | VolumeHeaderFields::VOLUNIQ,
        volid: 536870999,
        voluniq: 100,
        ..Default::default()
    };
    volhdr.write(&mut output)?;

    let mut dir = Vnode::new(1, 1);
    dir.fields = VnodeFields::TYPE;
    dir.vtype = VNODE_TYPE_DIR;
    dir.write(&mut output)?;

    output.write(b"\x09\x09junk")?;

    let mut file = Vnode::new(2, 2);
    file.fields = VnodeFields::TYPE | VnodeFields::PARENT;
    file.vtype = VNODE_TYPE_FILE;
    file.parent = 1;
    file.write(&mut output)?;
    dumpscan::format::write_vnode_data(&mut output, b"payload")?;
    dumpscan::format::write_dump_end(&mut output)?;

    Ok(output.contents().unwrap_or_default().to_vec())
}

#[test]
fn repair_damaged_dump() -> Result<(), Error> {
    init_logger();
    let data = damaged_dump()?;

    let mut recorder = Recorder::default();
    let mut input = open_memory(data.clone(), OpenMode::ReadOnly);
    assert!(DumpParser::new(&mut recorder, &ParserConfig::default())
        .parse_dump(&mut input)
        .is_err());
    assert!(recorder.files.is_empty());

    let mut recorder = Recorder::default();
    let mut input = open_memory(data, OpenMode::ReadOnly);
    let config = ParserConfig::default().with_repairs();
    let mut parser = DumpParser::new(&mut recorder, &config);
    parser.parse_dump(&mut input)?;
    assert_eq!(parser.vnode_count(), 2);
    assert!(parser.recovered_errors() >= 1);

    assert_eq!(recorder.directories, vec![1]);
    assert_eq!(recorder.files, vec![(2, 7, b"payload".to_vec())]);
    assert!(recorder.errors.iter().all(|(_, fatal)| !fatal));
    Ok(())
}

fn root_volume_dump() -> Result<Vec<u8>, Error> {
    let mut builder = RootVolumeBuilder::new()?;
    builder.add_cellservdb(&b">example.com  #Example\n10.1.1.1 #db\n>test.org\n"[..], true)?;
    builder.add_aliases(&b"example.com ex\n"[..])?;
    builder.add_recursive_find_trap()?;

    let mut output = open_memory(Vec::new(), OpenMode::ReadWrite);
    builder.write_dump(&mut output, "root.afs", 536870912)?;
    Ok(output.contents().unwrap_or_default().to_vec())
}

#[test]
fn copy_through_passthru() -> Result<(), Error> {
    let data = root_volume_dump()?;

    let config = ParserConfig {
        parse_directories: true,
        ..Default::default()
    };
    let mut input = open_memory(data.clone(), OpenMode::ReadOnly);
    let output = open_memory(Vec::new(), OpenMode::ReadWrite);
    let output = dumpscan::copy_dump(&mut input, output, &config)?;

    assert_eq!(output.contents(), Some(&data[..]));
    assert!(input.passthru().is_none());
    Ok(())
}

#[test]
fn copy_damaged_dump_with_repairs() -> Result<(), Error> {
    let data = damaged_dump()?;

    let mut input = open_memory(data.clone(), OpenMode::ReadOnly);
    let output = open_memory(Vec::new(), OpenMode::ReadWrite);
    let config = ParserConfig::default().with_repairs();
    let output = dumpscan::copy_dump(&mut input, output, &config)?;

    assert_eq!(output.contents(), Some(&data[..]));
    Ok(())
}

#[test]
fn root_volume_paths() -> Result<(), Error> {
    let data = root_volume_dump()?;

    let mut recorder = Recorder::default();
    let config = ParserConfig {
        parse_directories: true,
        ..Default::default()
    };
    let mut input = open_memory(data.clone(), OpenMode::ReadOnly);
    DumpParser::new(&mut recorder, &config).parse_dump(&mut input)?;
    assert_eq!(recorder.volnames, vec![b"root.afs".to_vec()]);
    assert_eq!(recorder.entries.len(), 2 + 6);

    let mut input = open_memory(data, OpenMode::ReadOnly);
    let index = PathIndex::prescan(&mut input, &ParserConfig::default(), true)?;
    assert_eq!(index.directory_count(), 1);
    assert_eq!(index.file_count(), 6);

    let vnode = index.follow(&mut input, b"/.test.org")?;
    assert_eq!(vnode, Some(8));
    let lookup = index.build_path(&mut input, 10)?;
    assert!(lookup.is_complete());
    assert_eq!(lookup.path, b"/ex");
    Ok(())
}
