//! AFS directory format
//!
//! Directory vnode data is a sequence of 2048 byte pages, each divided
//! into 64 blobs of 32 bytes. Blob 0 of every page is the page header
//! (count, tag and allocation bitmap). Page 0 additionally carries the
//! directory header, an allocation map and a 128 bucket hash table, in
//! blobs 1 to 12.
//!
//! An entry occupies one or more consecutive blobs: flag, length, hash
//! chain link, vnode, uniquifier, then the NUL-terminated name, which may
//! run into the following blobs. All integers are big-endian.

use crate::DumpError;

pub const DIR_PAGE_SIZE: usize = 2048;
pub const DIR_BLOB_SIZE: usize = 32;
/// Blobs per page
pub const DIR_EPP: usize = 64;
pub const DIR_HASH_SIZE: usize = 128;
pub const DIR_MAX_PAGES: usize = 128;
pub const DIR_PAGE_TAG: u16 = 1234;

// blobs used by the directory header on page 0
const DIR_HEADER_BLOBS: usize = 12;
const ENTRY_FIRST: u8 = 1;
const NAME_OFFSET: usize = 12;

const FREE_COUNT_OFFSET: usize = 4;
const BITMAP_OFFSET: usize = 5;
const ALLOMAP_OFFSET: usize = DIR_BLOB_SIZE;
const HASH_OFFSET: usize = ALLOMAP_OFFSET + DIR_MAX_PAGES;

/// One directory entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Blob number of the entry (diagnostic only).
    pub slot: u32,
    pub name: Vec<u8>,
    pub vnode: u32,
    pub uniq: u32,
}

impl DirEntry {
    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

/// Number of blobs needed for an entry with a name of `len` bytes.
pub fn name_blobs(len: usize) -> usize {
    1 + ((len + 1 + 15) >> 5)
}

/// Hash bucket of a name.
pub fn dir_hash(name: &[u8]) -> usize {
    let mut hval: u32 = 0;
    for &c in name {
        // characters are signed
        hval = hval.wrapping_mul(173).wrapping_add(c as i8 as i32 as u32);
    }
    let tval = (hval & (DIR_HASH_SIZE as u32 - 1)) as usize;
    if tval == 0 {
        0
    } else if hval >= 1 << 31 {
        DIR_HASH_SIZE - tval
    } else {
        tval
    }
}

fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn blob_in_use(page: &[u8], blob: usize) -> bool {
    page[BITMAP_OFFSET + (blob >> 3)] & (1 << (blob & 7)) != 0
}

fn check_pages(data: &[u8]) -> Result<usize, DumpError> {
    if data.is_empty() || data.len() % DIR_PAGE_SIZE != 0 {
        crate::format_bail!("directory size {} is not a multiple of the page size", data.len());
    }
    let pages = data.len() / DIR_PAGE_SIZE;
    let tag = be16(data, 2);
    if tag != DIR_PAGE_TAG {
        crate::format_bail!("bad directory header page tag {}", tag);
    }
    Ok(pages)
}

fn read_entry(data: &[u8], entry: usize) -> Result<DirEntry, DumpError> {
    let offset = entry * DIR_BLOB_SIZE;
    if offset + DIR_BLOB_SIZE > data.len() {
        crate::format_bail!("directory entry {} out of range", entry);
    }
    let page_end = (offset / DIR_PAGE_SIZE + 1) * DIR_PAGE_SIZE;
    let name_area = &data[offset + NAME_OFFSET..page_end];
    let name_len = match name_area.iter().position(|b| *b == 0) {
        Some(len) => len,
        None => crate::format_bail!("unterminated name in directory entry {}", entry),
    };

    Ok(DirEntry {
        slot: entry as u32,
        name: name_area[..name_len].to_vec(),
        vnode: be32(data, offset + 4),
        uniq: be32(data, offset + 8),
    })
}

/// Enumerate all entries of a directory.
///
/// The callback returns `false` to stop the enumeration early.
pub fn parse_directory<F>(data: &[u8], mut callback: F) -> Result<(), DumpError>
where
    F: FnMut(DirEntry) -> Result<bool, DumpError>,
{
    let pages = check_pages(data)?;

    for pgno in 0..pages {
        let page = &data[pgno * DIR_PAGE_SIZE..(pgno + 1) * DIR_PAGE_SIZE];
        let tag = be16(page, 2);
        if tag != DIR_PAGE_TAG {
            log::warn!("directory page {} has bad tag {}, skipped", pgno, tag);
            continue;
        }

        let mut blob = if pgno == 0 { DIR_HEADER_BLOBS + 1 } else { 1 };
        while blob < DIR_EPP {
            if !blob_in_use(page, blob) || page[blob * DIR_BLOB_SIZE] & ENTRY_FIRST == 0 {
                blob += 1;
                continue;
            }
            let entry = read_entry(data, pgno * DIR_EPP + blob)?;
            blob += name_blobs(entry.name.len());
            if !callback(entry)? {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Find an entry by name, following the hash chain.
pub fn lookup_entry(data: &[u8], name: &[u8]) -> Result<Option<DirEntry>, DumpError> {
    let pages = check_pages(data)?;
    let total = pages * DIR_EPP;

    let mut next = be16(data, HASH_OFFSET + 2 * dir_hash(name)) as usize;
    let mut steps = 0;
    while next != 0 {
        if next >= total {
            crate::format_bail!("directory hash chain points to entry {} beyond end", next);
        }
        steps += 1;
        if steps > total {
            crate::format_bail!("directory hash chain loop");
        }
        let entry = read_entry(data, next)?;
        if entry.name == name {
            return Ok(Some(entry));
        }
        next = be16(data, next * DIR_BLOB_SIZE + 2) as usize;
    }
    Ok(None)
}

/// Builds directory data
pub struct DirectoryBuilder {
    data: Vec<u8>,
}

impl Default for DirectoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryBuilder {
    pub fn new() -> Self {
        let mut builder = Self { data: Vec::new() };
        builder.add_page();
        for blob in 1..=DIR_HEADER_BLOBS {
            builder.mark_used(0, blob);
        }
        builder.update_free(0, -(DIR_HEADER_BLOBS as i32));
        builder
    }

    fn pages(&self) -> usize {
        self.data.len() / DIR_PAGE_SIZE
    }

    fn add_page(&mut self) -> usize {
        let pgno = self.pages();
        self.data.resize((pgno + 1) * DIR_PAGE_SIZE, 0);
        let base = pgno * DIR_PAGE_SIZE;
        self.data[base + 2..base + 4].copy_from_slice(&DIR_PAGE_TAG.to_be_bytes());
        self.data[base + FREE_COUNT_OFFSET] = (DIR_EPP - 1) as u8;
        self.mark_used(pgno, 0);
        self.data[ALLOMAP_OFFSET + pgno] = (DIR_EPP - 1) as u8;

        let count = (pgno + 1) as u16;
        self.data[0..2].copy_from_slice(&count.to_be_bytes());
        pgno
    }

    fn mark_used(&mut self, pgno: usize, blob: usize) {
        self.data[pgno * DIR_PAGE_SIZE + BITMAP_OFFSET + (blob >> 3)] |= 1 << (blob & 7);
    }

    fn update_free(&mut self, pgno: usize, delta: i32) {
        let base = pgno * DIR_PAGE_SIZE;
        let free = (i32::from(self.data[base + FREE_COUNT_OFFSET]) + delta) as u8;
        self.data[base + FREE_COUNT_OFFSET] = free;
        self.data[ALLOMAP_OFFSET + pgno] = free;
    }

    fn find_free(&self, pgno: usize, count: usize) -> Option<usize> {
        let page = &self.data[pgno * DIR_PAGE_SIZE..(pgno + 1) * DIR_PAGE_SIZE];
        let mut run = 0;
        for blob in 1..DIR_EPP {
            if blob_in_use(page, blob) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    return Some(blob + 1 - count);
                }
            }
        }
        None
    }

    /// Add an entry. Names must be unique and must not contain NUL or `/`.
    pub fn add_entry(&mut self, name: &[u8], vnode: u32, uniq: u32) -> Result<(), DumpError> {
        if name.is_empty() || name.contains(&0) || name.contains(&b'/') {
            crate::format_bail!("invalid directory entry name {:?}", String::from_utf8_lossy(name));
        }
        let count = name_blobs(name.len());
        if count >= DIR_EPP {
            crate::format_bail!("directory entry name too long ({} bytes)", name.len());
        }
        if lookup_entry(&self.data, name)?.is_some() {
            crate::format_bail!("duplicate directory entry {:?}", String::from_utf8_lossy(name));
        }

        let mut slot = None;
        for pgno in 0..self.pages() {
            if let Some(blob) = self.find_free(pgno, count) {
                slot = Some((pgno, blob));
                break;
            }
        }
        let (pgno, blob) = match slot {
            Some(slot) => slot,
            None => {
                if self.pages() >= DIR_MAX_PAGES {
                    crate::format_bail!("directory is full");
                }
                let pgno = self.add_page();
                (pgno, 1)
            }
        };

        for b in blob..blob + count {
            self.mark_used(pgno, b);
        }
        self.update_free(pgno, -(count as i32));

        let entry = pgno * DIR_EPP + blob;
        let offset = entry * DIR_BLOB_SIZE;
        let bucket = HASH_OFFSET + 2 * dir_hash(name);
        let chain = be16(&self.data, bucket);

        self.data[offset] = ENTRY_FIRST;
        self.data[offset + 2..offset + 4].copy_from_slice(&chain.to_be_bytes());
        self.data[offset + 4..offset + 8].copy_from_slice(&vnode.to_be_bytes());
        self.data[offset + 8..offset + 12].copy_from_slice(&uniq.to_be_bytes());
        let name_start = offset + NAME_OFFSET;
        self.data[name_start..name_start + name.len()].copy_from_slice(name);
        self.data[name_start + name.len()] = 0;

        self.data[bucket..bucket + 2].copy_from_slice(&(entry as u16).to_be_bytes());
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}
