//! Human readable rendering of dump records
//!
//! [`DumpPrinter`] is a [`DumpHandler`] which writes every record it is
//! handed to a [`Write`] sink, either as indented text or as one JSON
//! object per line.

use std::io::Write;

use anyhow::Error;
use bitflags::bitflags;
use serde_json::{json, Map, Value};

use dumpscan_xfile::XFile;

use crate::file_formats::ROOT_VNODE;
use crate::pathname::PathIndex;
use crate::tagged::format_time;
use crate::{
    DirEntry, DumpHandler, DumpHeader, DumpHeaderFields, Vnode, VnodeFields, VnodeKind,
    VolumeHeader, VolumeHeaderFields,
};

bitflags! {
    /// What to print
    #[derive(Default)]
    pub struct PrintFlags: u32 {
        const DUMPHDR = 0x0001;
        const VOLHDR  = 0x0002;
        const VNODE   = 0x0004;
        /// Vnode access control lists, as hex.
        const ACL     = 0x0008;
        /// Directory entries.
        const DIR     = 0x0010;
        /// Full path of each vnode, needs a path index.
        const PATH    = 0x0020;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    /// One JSON object per record and line.
    Json,
}

struct Line {
    key: &'static str,
    label: &'static str,
    text: String,
    json: Value,
}

impl Line {
    fn num<N: Into<u64> + Copy>(key: &'static str, label: &'static str, value: N) -> Self {
        let value: u64 = value.into();
        Self {
            key,
            label,
            text: value.to_string(),
            json: json!(value),
        }
    }

    fn hex(key: &'static str, label: &'static str, value: u32) -> Self {
        Self {
            key,
            label,
            text: format!("{:#010x}", value),
            json: json!(value),
        }
    }

    fn time(key: &'static str, label: &'static str, value: u32) -> Self {
        Self {
            key,
            label,
            text: format!("{} = {}", value, format_time(value)),
            json: json!(value),
        }
    }

    fn string(key: &'static str, label: &'static str, value: &[u8]) -> Self {
        let value = String::from_utf8_lossy(value);
        Self {
            key,
            label,
            text: format!("\"{}\"", value),
            json: json!(value),
        }
    }

    fn text(key: &'static str, label: &'static str, value: String) -> Self {
        Self {
            key,
            label,
            json: json!(value),
            text: value,
        }
    }
}

/// Record printer
pub struct DumpPrinter<'a, W: Write> {
    output: W,
    flags: PrintFlags,
    format: OutputFormat,
    paths: Option<&'a PathIndex>,
}

impl<'a, W: Write> DumpPrinter<'a, W> {
    pub fn new(output: W, flags: PrintFlags, format: OutputFormat) -> Self {
        Self {
            output,
            flags,
            format,
            paths: None,
        }
    }

    /// Use `index` to print vnode paths (with [`PrintFlags::PATH`]).
    pub fn with_paths(mut self, index: &'a PathIndex) -> Self {
        self.paths = Some(index);
        self
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    fn emit(&mut self, record: &str, title: String, offset: u64, lines: Vec<Line>) -> Result<(), Error> {
        match self.format {
            OutputFormat::Text => {
                writeln!(self.output, "* {} [offset {}]:", title, offset)?;
                for line in lines {
                    writeln!(self.output, "  {:<16}{}", format!("{}:", line.label), line.text)?;
                }
            }
            OutputFormat::Json => {
                let mut object = Map::new();
                object.insert("record".to_string(), json!(record));
                object.insert("offset".to_string(), json!(offset));
                for line in lines {
                    object.insert(line.key.to_string(), line.json);
                }
                serde_json::to_writer(&mut self.output, &Value::Object(object))?;
                writeln!(self.output)?;
            }
        }
        Ok(())
    }

    fn path_line(&self, vnode: &Vnode, input: &mut XFile) -> Option<Line> {
        let index = self.paths?;
        let lookup = if vnode.vnode == ROOT_VNODE {
            index.build_path(input, ROOT_VNODE)
        } else if vnode.fields.contains(VnodeFields::PARENT) {
            index.build_child_path(input, vnode.parent, vnode.vnode)
        } else {
            index.build_path(input, vnode.vnode)
        };
        match lookup {
            Ok(lookup) => Some(Line::text("path", "Path", lookup.to_string_lossy())),
            Err(err) => {
                log::warn!("unable to build path of vnode {} - {}", vnode.vnode, err);
                None
            }
        }
    }

    fn print_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        if !self.flags.contains(PrintFlags::VNODE) {
            return Ok(());
        }
        use VnodeFields as F;

        let mut lines = vec![Line::num("uniq", "Uniquifier", vnode.uniq)];
        if vnode.fields.contains(F::TYPE) {
            let kind = match vnode.kind() {
                VnodeKind::File => "file",
                VnodeKind::Directory => "directory",
                VnodeKind::Symlink => "symlink",
                VnodeKind::Empty | VnodeKind::Unknown(_) => "unknown",
            };
            lines.push(Line::text("type", "Type", format!("{} ({})", vnode.vtype, kind)));
        }
        if vnode.fields.contains(F::NLINKS) {
            lines.push(Line::num("nlinks", "Link count", vnode.nlinks));
        }
        if vnode.fields.contains(F::DVERS) {
            lines.push(Line::num("datavers", "Version", vnode.datavers));
        }
        if vnode.fields.contains(F::SDATE) {
            lines.push(Line::time("server-date", "Server date", vnode.server_date));
        }
        if vnode.fields.contains(F::AUTHOR) {
            lines.push(Line::num("author", "Author", vnode.author));
        }
        if vnode.fields.contains(F::OWNER) {
            lines.push(Line::num("owner", "Owner", vnode.owner));
        }
        if vnode.fields.contains(F::GROUP) {
            lines.push(Line::num("group", "Group", vnode.group));
        }
        if vnode.fields.contains(F::MODE) {
            let mut line = Line::num("mode", "Mode", vnode.mode);
            line.text = format!("{:04o}", vnode.mode);
            lines.push(line);
        }
        if vnode.fields.contains(F::CDATE) {
            lines.push(Line::time("client-date", "Client date", vnode.client_date));
        }
        if vnode.fields.contains(F::PARENT) {
            lines.push(Line::num("parent", "Parent", vnode.parent));
        }
        if vnode.fields.contains(F::SIZE) {
            lines.push(Line::num("size", "Size", vnode.size));
        }
        if vnode.has_data() {
            lines.push(Line::num("data-offset", "Data offset", vnode.d_offset));
        }
        if vnode.kind() == VnodeKind::Symlink && !vnode.link_target.is_empty() {
            lines.push(Line::string("target", "Link target", &vnode.link_target));
        }
        if self.flags.contains(PrintFlags::ACL) && vnode.fields.contains(F::ACL) {
            lines.push(Line::text("acl", "ACL", hex::encode(vnode.acl)));
        }
        if self.flags.contains(PrintFlags::PATH) {
            if let Some(line) = self.path_line(vnode, input) {
                lines.push(line);
            }
        }

        let title = format!("VNODE {}", vnode.vnode);
        lines.insert(0, Line::num("vnode", "Vnode", vnode.vnode));
        self.emit("vnode", title, vnode.offset, lines)
    }
}

impl<'a, W: Write> DumpHandler for DumpPrinter<'a, W> {
    fn dump_header(&mut self, hdr: &DumpHeader, _input: &mut XFile) -> Result<(), Error> {
        if !self.flags.contains(PrintFlags::DUMPHDR) {
            return Ok(());
        }
        use DumpHeaderFields as F;

        let mut lines = vec![
            Line::hex("magic", "Magic", hdr.magic),
            Line::num("version", "Version", hdr.version),
        ];
        if hdr.fields.contains(F::VOLID) {
            lines.push(Line::num("volid", "Volume ID", hdr.volid));
        }
        if hdr.fields.contains(F::VOLNAME) {
            lines.push(Line::string("volname", "Volume name", &hdr.volname));
        }
        if hdr.fields.contains(F::FROM) {
            lines.push(Line::time("from-date", "From date", hdr.from_date));
        }
        if hdr.fields.contains(F::TO) {
            lines.push(Line::time("to-date", "To date", hdr.to_date));
        }
        self.emit("dump-header", "DUMP HEADER".to_string(), hdr.offset, lines)
    }

    fn volume_header(&mut self, hdr: &VolumeHeader, _input: &mut XFile) -> Result<(), Error> {
        if !self.flags.contains(PrintFlags::VOLHDR) {
            return Ok(());
        }
        use VolumeHeaderFields as F;

        let candidates = [
            (F::VOLID, Line::num("volid", "Volume ID", hdr.volid)),
            (F::VOLVERS, Line::num("volvers", "Version", hdr.volvers)),
            (F::VOLNAME, Line::string("volname", "Volume name", &hdr.volname)),
            (F::INSERV, Line::text("inservice", "In service?", yes_no(hdr.inservice))),
            (F::BLESSED, Line::text("blessed", "Blessed?", yes_no(hdr.blessed))),
            (F::VOLUNIQ, Line::num("voluniq", "Uniquifier", hdr.voluniq)),
            (F::VOLTYPE, Line::num("voltype", "Type", hdr.voltype)),
            (F::PARENT, Line::num("parent", "Parent ID", hdr.parent_volid)),
            (F::CLONE, Line::num("clone", "Clone ID", hdr.clone_volid)),
            (F::MAXQ, Line::num("maxquota", "Max quota", hdr.maxquota)),
            (F::MINQ, Line::num("minquota", "Min quota", hdr.minquota)),
            (F::DISKUSED, Line::num("diskused", "Disk used", hdr.diskused)),
            (F::NFILES, Line::num("nfiles", "File count", hdr.nfiles)),
            (F::ACCOUNT, Line::num("account", "Account", hdr.account)),
            (F::OWNER, Line::num("owner", "Owner", hdr.owner)),
            (F::CREATE_DATE, Line::time("create-date", "Created", hdr.create_date)),
            (F::ACCESS_DATE, Line::time("access-date", "Accessed", hdr.access_date)),
            (F::UPDATE_DATE, Line::time("update-date", "Updated", hdr.update_date)),
            (F::EXPIRE_DATE, Line::time("expire-date", "Expires", hdr.expire_date)),
            (F::BACKUP_DATE, Line::time("backup-date", "Backed up", hdr.backup_date)),
            (F::OFFLINE_MSG, Line::string("offline-msg", "Offline msg", &hdr.offline_msg)),
            (F::MOTD, Line::string("motd", "MOTD", &hdr.motd)),
            (F::WEEKUSE, weekuse_line(&hdr.weekuse)),
            (F::DAYUSE_DATE, Line::time("dayuse-date", "Day use date", hdr.dayuse_date)),
            (F::DAYUSE, Line::num("dayuse", "Daily usage", hdr.dayuse)),
        ];
        let lines = candidates
            .into_iter()
            .filter(|(flag, _)| hdr.fields.contains(*flag))
            .map(|(_, line)| line)
            .collect();

        self.emit("volume-header", "VOLUME HEADER".to_string(), hdr.offset, lines)
    }

    fn directory_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        self.print_vnode(vnode, input)
    }

    fn file_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        self.print_vnode(vnode, input)
    }

    fn symlink_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        self.print_vnode(vnode, input)
    }

    fn empty_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        self.print_vnode(vnode, input)
    }

    fn unknown_vnode(&mut self, vnode: &Vnode, input: &mut XFile) -> Result<(), Error> {
        self.print_vnode(vnode, input)
    }

    fn dir_entry(&mut self, vnode: &Vnode, entry: &DirEntry, _input: &mut XFile) -> Result<(), Error> {
        if !self.flags.contains(PrintFlags::DIR) {
            return Ok(());
        }
        let name = String::from_utf8_lossy(&entry.name);
        match self.format {
            OutputFormat::Text => writeln!(
                self.output,
                "  ==> {:<24} (vnode {}.{}, slot {}, in directory {})",
                name, entry.vnode, entry.uniq, entry.slot, vnode.vnode
            )?,
            OutputFormat::Json => {
                let value = json!({
                    "record": "dir-entry",
                    "directory": vnode.vnode,
                    "name": name,
                    "vnode": entry.vnode,
                    "uniq": entry.uniq,
                    "slot": entry.slot,
                });
                serde_json::to_writer(&mut self.output, &value)?;
                writeln!(self.output)?;
            }
        }
        Ok(())
    }
}

fn yes_no(value: bool) -> String {
    String::from(if value { "yes" } else { "no" })
}

fn weekuse_line(weekuse: &[u32]) -> Line {
    let text = weekuse
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    Line {
        key: "weekuse",
        label: "Weekly usage",
        text,
        json: json!(weekuse),
    }
}

#[cfg(test)]
mod test {
    use anyhow::Error;

    use dumpscan_xfile::{open_memory, OpenMode};

    use super::*;
    use crate::file_formats::*;
    use crate::{DirectoryBuilder, DumpParser, DumpWriter, ParserConfig};

    fn sample_dump() -> Result<Vec<u8>, Error> {
        let mut output = open_memory(Vec::new(), OpenMode::ReadWrite);
        let mut writer = DumpWriter::new(&mut output);

        let mut dumphdr = DumpHeader::new();
        dumphdr.fields = DumpHeaderFields::VOLID | DumpHeaderFields::VOLNAME;
        dumphdr.volid = 536870915;
        dumphdr.volname = b"user.test".to_vec();
        writer.dump_header(&dumphdr)?;

        let mut volhdr = VolumeHeader::default();
        volhdr.fields = VolumeHeaderFields::VOLID
            | VolumeHeaderFields::INSERV
            | VolumeHeaderFields::CREATE_DATE;
        volhdr.volid = 536870915;
        volhdr.inservice = true;
        volhdr.create_date = 86400;
        writer.volume_header(&volhdr)?;

        let mut root = Vnode::new(ROOT_VNODE, 1);
        root.fields = VnodeFields::TYPE | VnodeFields::MODE | VnodeFields::PARENT | VnodeFields::ACL;
        root.vtype = VNODE_TYPE_DIR;
        root.mode = 0o755;
        root.acl[0] = 0xab;
        writer.vnode(&root)?;
        let mut dir = DirectoryBuilder::new();
        dir.add_entry(b".", 1, 1)?;
        dir.add_entry(b"..", 1, 1)?;
        dir.add_entry(b"notes", 2, 2)?;
        writer.vnode_data(&dir.finish())?;

        let mut file = Vnode::new(2, 2);
        file.fields = VnodeFields::TYPE | VnodeFields::PARENT;
        file.vtype = VNODE_TYPE_FILE;
        file.parent = ROOT_VNODE;
        writer.vnode(&file)?;
        writer.vnode_data(b"hello")?;

        writer.finish()?;
        Ok(output.contents().unwrap_or_default().to_vec())
    }

    fn print(flags: PrintFlags, format: OutputFormat, parse_dirs: bool) -> Result<String, Error> {
        let mut input = open_memory(sample_dump()?, OpenMode::ReadOnly);
        let mut printer = DumpPrinter::new(Vec::new(), flags, format);
        let config = ParserConfig {
            parse_directories: parse_dirs,
            ..Default::default()
        };
        DumpParser::new(&mut printer, &config).parse_dump(&mut input)?;
        Ok(String::from_utf8(printer.into_inner())?)
    }

    #[test]
    fn test_text_output() -> Result<(), Error> {
        let text = print(PrintFlags::all() - PrintFlags::PATH, OutputFormat::Text, true)?;

        assert!(text.starts_with("* DUMP HEADER [offset 0]:\n  Magic:          0xb3a11322\n"));
        assert!(text.contains("  Volume name:    \"user.test\"\n"));
        assert!(text.contains("  In service?:    yes\n"));
        assert!(text.contains("  Created:        86400 = 1970-01-02T00:00:00Z\n"));
        assert!(text.contains("  Mode:           0755\n"));
        assert!(text.contains(&format!("  ACL:            ab{}\n", "00".repeat(VNODE_ACL_SIZE - 1))));
        assert!(text.contains("  ==> notes"));
        assert!(text.contains("* VNODE 2 [offset "));
        assert!(text.contains("  Size:           5\n"));

        // entries come before the directory vnode itself
        let entry = text.find("==> notes").unwrap_or(usize::MAX);
        let vnode = text.find("* VNODE 1 ").unwrap_or(0);
        assert!(entry < vnode);
        Ok(())
    }

    #[test]
    fn test_flag_selection() -> Result<(), Error> {
        let text = print(PrintFlags::VOLHDR, OutputFormat::Text, true)?;
        assert!(text.starts_with("* VOLUME HEADER"));
        assert!(!text.contains("VNODE"));
        assert!(!text.contains("==>"));

        let text = print(PrintFlags::VNODE, OutputFormat::Text, false)?;
        assert!(!text.contains("ACL:"));
        assert_eq!(text.matches("* VNODE").count(), 2);
        Ok(())
    }

    #[test]
    fn test_json_output() -> Result<(), Error> {
        let text = print(
            PrintFlags::DUMPHDR | PrintFlags::VNODE | PrintFlags::DIR,
            OutputFormat::Json,
            true,
        )?;
        let records: Vec<Value> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;

        assert_eq!(records.len(), 1 + 3 + 2);
        assert_eq!(records[0]["record"], "dump-header");
        assert_eq!(records[0]["volname"], "user.test");
        assert_eq!(records[0]["magic"], DUMPBEGINMAGIC);
        assert_eq!(records[3]["record"], "dir-entry");
        assert_eq!(records[3]["name"], "notes");
        assert_eq!(records[4]["vnode"], 1);
        assert_eq!(records[4]["mode"], 0o755);
        assert_eq!(records[5]["size"], 5);
        Ok(())
    }

    #[test]
    fn test_paths() -> Result<(), Error> {
        let dump = sample_dump()?;
        let index = {
            let mut input = open_memory(dump.clone(), OpenMode::ReadOnly);
            PathIndex::prescan(&mut input, &ParserConfig::default(), false)?
        };

        let mut input = open_memory(dump, OpenMode::ReadOnly);
        let mut printer =
            DumpPrinter::new(Vec::new(), PrintFlags::VNODE | PrintFlags::PATH, OutputFormat::Text)
                .with_paths(&index);
        DumpParser::new(&mut printer, &ParserConfig::default()).parse_dump(&mut input)?;
        let text = String::from_utf8(printer.into_inner())?;

        assert!(text.contains("  Path:           /\n"));
        assert!(text.contains("  Path:           /notes\n"));
        Ok(())
    }
}
