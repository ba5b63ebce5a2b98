//! The file-list tree: a share's exported content as a serializable tree
//! of {name, size, lastModified, hashVersion, hash, children?, fileCount}.
//! Two byte-reproducible wire flavours are supported: a compact binary
//! ("FILELIST") format and a legacy XML rendering, both driven off one
//! `FileListItem` so they can't drift apart.

use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::hash::Digest;
use crate::error::Fs2Error;

/// One node of a file list tree. `hash` is `Some` iff this is a file;
/// `children` is `Some` (possibly empty) iff this is a directory — the two
/// are kept consistent by construction (see [`FileListItem::file`] /
/// [`FileListItem::directory`]).
#[derive(Clone, Debug, PartialEq)]
pub struct FileListItem {
    pub name: String,
    pub size: u64,
    pub last_modified: u64,
    pub hash_version: u8,
    pub hash: Option<Digest>,
    pub children: Option<Vec<FileListItem>>,
    pub file_count: u64,
}

/// Digest algorithm version produced by this implementation's share
/// engine.
pub const CURRENT_HASH_VERSION: u8 = 1;

impl FileListItem {
    pub fn file(name: impl Into<String>, size: u64, last_modified: u64, hash: Digest) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified,
            hash_version: CURRENT_HASH_VERSION,
            hash: Some(hash),
            children: None,
            file_count: 1,
        }
    }

    pub fn directory(name: impl Into<String>, last_modified: u64, children: Vec<FileListItem>) -> Self {
        let size = children.iter().map(|c| c.size).sum();
        let file_count = children.iter().map(|c| c.file_count).sum();
        Self {
            name: name.into(),
            size,
            last_modified,
            hash_version: 0,
            hash: None,
            children: Some(children),
            file_count,
        }
    }

    pub fn is_file(&self) -> bool {
        self.hash.is_some()
    }

    pub fn is_dir(&self) -> bool {
        self.children.is_some()
    }

    /// Recompute `size` and `file_count` bottom-up. Used after a share
    /// refresh mutates a subtree in place.
    pub fn recompute_aggregates(&mut self) {
        if let Some(children) = &mut self.children {
            for c in children.iter_mut() {
                c.recompute_aggregates();
            }
            self.size = children.iter().map(|c| c.size).sum();
            self.file_count = children.iter().map(|c| c.file_count).sum();
        }
    }
}

// ============================== Binary codec ==============================
//
// Layout (little-endian):
//   u32 name_len, name bytes (utf8)
//   u64 size
//   u64 last_modified
//   u8  hash_version
//   u8  hash_len        (0 for directories, FILE_DIGEST_BYTES for files)
//   hash_len bytes       hash
//   u64 file_count
//   u32 child_count      (0 for files)
//   child_count * <recursive item>

pub fn encode_binary(root: &FileListItem) -> Vec<u8> {
    let mut buf = Vec::new();
    write_item(&mut buf, root);
    buf
}

fn write_item<W: Write>(w: &mut W, item: &FileListItem) {
    let name_bytes = item.name.as_bytes();
    w.write_all(&(name_bytes.len() as u32).to_le_bytes()).unwrap();
    w.write_all(name_bytes).unwrap();
    w.write_all(&item.size.to_le_bytes()).unwrap();
    w.write_all(&item.last_modified.to_le_bytes()).unwrap();
    w.write_all(&[item.hash_version]).unwrap();
    match &item.hash {
        Some(h) => {
            w.write_all(&[h.0.len() as u8]).unwrap();
            w.write_all(&h.0).unwrap();
        }
        None => {
            w.write_all(&[0u8]).unwrap();
        }
    }
    w.write_all(&item.file_count.to_le_bytes()).unwrap();

    let children = item.children.as_deref().unwrap_or(&[]);
    w.write_all(&(children.len() as u32).to_le_bytes()).unwrap();
    for c in children {
        write_item(w, c);
    }
}

pub fn decode_binary(bytes: &[u8]) -> Result<FileListItem, Fs2Error> {
    let mut cur = Cursor::new(bytes);
    read_item(&mut cur)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, Fs2Error> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(|_| Fs2Error::BinaryDecode("truncated u32".into()))?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, Fs2Error> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(|_| Fs2Error::BinaryDecode("truncated u64".into()))?;
    Ok(u64::from_le_bytes(b))
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, Fs2Error> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(|_| Fs2Error::BinaryDecode("truncated u8".into()))?;
    Ok(b[0])
}

fn read_item<R: Read>(r: &mut R) -> Result<FileListItem, Fs2Error> {
    let name_len = read_u32(r)? as usize;
    let mut name_bytes = vec![0u8; name_len];
    r.read_exact(&mut name_bytes)
        .map_err(|_| Fs2Error::BinaryDecode("truncated name".into()))?;
    let name = String::from_utf8(name_bytes)
        .map_err(|_| Fs2Error::BinaryDecode("invalid utf8 name".into()))?;

    let size = read_u64(r)?;
    let last_modified = read_u64(r)?;
    let hash_version = read_u8(r)?;
    let hash_len = read_u8(r)? as usize;

    let hash = if hash_len == 0 {
        None
    } else {
        let mut hash_bytes = vec![0u8; hash_len];
        r.read_exact(&mut hash_bytes)
            .map_err(|_| Fs2Error::BinaryDecode("truncated hash".into()))?;
        Some(Digest::from_bytes(&hash_bytes)?)
    };

    let file_count = read_u64(r)?;
    let child_count = read_u32(r)?;

    let children = if hash.is_some() {
        // A file never carries children, even if child_count were somehow
        // nonzero on a corrupt stream.
        if child_count != 0 {
            return Err(Fs2Error::BinaryDecode("file with children".into()));
        }
        None
    } else {
        let mut v = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            v.push(read_item(r)?);
        }
        Some(v)
    };

    Ok(FileListItem {
        name,
        size,
        last_modified,
        hash_version,
        hash,
        children,
        file_count,
    })
}

// ================================ XML codec ================================
//
// Legacy rendering: a `<fileList>` root wrapping nested `<dir>`/`<file>`
// elements, attributes for the scalar fields. Hand-rolled against
// quick_xml's event API (rather than serde derive) so the exact shape is
// under direct control, matching the "byte-reproducible" requirement.

pub fn encode_xml(root: &FileListItem) -> Result<String, Fs2Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut root_tag = BytesStart::new("fileList");
    root_tag.push_attribute(("name", root.name.as_str()));
    root_tag.push_attribute(("lastModified", root.last_modified.to_string().as_str()));
    root_tag.push_attribute(("fileCount", root.file_count.to_string().as_str()));
    writer
        .write_event(Event::Start(root_tag))
        .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;

    if let Some(children) = &root.children {
        for c in children {
            write_xml_item(&mut writer, c)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("fileList")))
        .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| Fs2Error::XmlDecode(e.to_string()))
}

fn write_xml_item<W: Write>(writer: &mut Writer<W>, item: &FileListItem) -> Result<(), Fs2Error> {
    let tag_name = if item.is_dir() { "dir" } else { "file" };
    let mut start = BytesStart::new(tag_name);
    start.push_attribute(("name", item.name.as_str()));
    start.push_attribute(("size", item.size.to_string().as_str()));
    start.push_attribute(("lastModified", item.last_modified.to_string().as_str()));
    start.push_attribute(("fileCount", item.file_count.to_string().as_str()));
    if let Some(hash) = &item.hash {
        start.push_attribute(("hashVersion", item.hash_version.to_string().as_str()));
        start.push_attribute(("hash", hash.to_hex().as_str()));
    }

    let has_children = matches!(&item.children, Some(c) if !c.is_empty());
    if !has_children {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;
    for c in item.children.as_ref().unwrap() {
        write_xml_item(writer, c)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(tag_name)))
        .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;
    Ok(())
}

pub fn decode_xml(xml: &str) -> Result<FileListItem, Fs2Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // (name, last_modified, file_count, children)
    let mut stack: Vec<(String, u64, u64, Vec<FileListItem>)> = Vec::new();
    let mut root: Option<FileListItem> = None;
    let mut root_attrs: Option<(String, u64, u64)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;
        match event {
            Event::Start(ref e) if e.name().as_ref() == b"fileList" => {
                let (name, last_modified, file_count) = parse_root_attrs(e)?;
                root_attrs = Some((name, last_modified, file_count));
                stack.push((String::new(), 0, 0, Vec::new()));
            }
            Event::End(ref e) if e.name().as_ref() == b"fileList" => {
                let (_, _, _, children) = stack.pop().unwrap();
                let (name, last_modified, file_count) = root_attrs.take().unwrap_or_default();
                root = Some(build_root(name, last_modified, file_count, children));
            }
            Event::Start(ref e) => {
                let item = parse_item_attrs(e, true)?;
                stack.push((
                    item.name,
                    item.last_modified,
                    item.file_count,
                    item.children.unwrap_or_default(),
                ));
            }
            Event::Empty(ref e) => {
                let is_dir = e.name().as_ref() == b"dir";
                let item = parse_item_attrs(e, is_dir)?;
                if let Some(top) = stack.last_mut() {
                    top.3.push(item);
                }
            }
            Event::End(ref e) if e.name().as_ref() == b"dir" => {
                let (name, last_modified, file_count, children) = stack.pop().unwrap();
                let item = FileListItem {
                    name,
                    size: children.iter().map(|c| c.size).sum(),
                    last_modified,
                    hash_version: 0,
                    hash: None,
                    children: Some(children),
                    file_count,
                };
                if let Some(top) = stack.last_mut() {
                    top.3.push(item);
                } else {
                    return Err(Fs2Error::XmlDecode("dir closed outside tree".into()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| Fs2Error::XmlDecode("missing fileList root".into()))
}

fn parse_root_attrs(e: &BytesStart) -> Result<(String, u64, u64), Fs2Error> {
    let mut name = String::new();
    let mut last_modified = 0u64;
    let mut file_count = 0u64;
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        let value = attr
            .unescape_value()
            .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;
        match key {
            b"name" => name = value.into_owned(),
            b"lastModified" => last_modified = value.parse().unwrap_or(0),
            b"fileCount" => file_count = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok((name, last_modified, file_count))
}

fn build_root(name: String, last_modified: u64, file_count: u64, children: Vec<FileListItem>) -> FileListItem {
    FileListItem {
        name,
        size: children.iter().map(|c| c.size).sum(),
        last_modified,
        hash_version: 0,
        hash: None,
        children: Some(children),
        file_count,
    }
}

fn parse_item_attrs(e: &BytesStart, is_dir: bool) -> Result<FileListItem, Fs2Error> {
    let mut name = String::new();
    let mut size = 0u64;
    let mut last_modified = 0u64;
    let mut file_count = 0u64;
    let mut hash_version = 0u8;
    let mut hash: Option<Digest> = None;

    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        let value = attr
            .unescape_value()
            .map_err(|e| Fs2Error::XmlDecode(e.to_string()))?;
        match key {
            b"name" => name = value.into_owned(),
            b"size" => size = value.parse().unwrap_or(0),
            b"lastModified" => last_modified = value.parse().unwrap_or(0),
            b"fileCount" => file_count = value.parse().unwrap_or(0),
            b"hashVersion" => hash_version = value.parse().unwrap_or(0),
            b"hash" => hash = Some(Digest::from_hex(&value)?),
            _ => {}
        }
    }

    if is_dir {
        // Empty `<dir .../>` element: no children yet, caller may still
        // push onto a stack if it later turns out to have content (never
        // happens for Event::Empty, which by definition has no body).
        let _ = &hash_version;
        Ok(FileListItem {
            name,
            size,
            last_modified,
            hash_version: 0,
            hash: None,
            children: Some(Vec::new()),
            file_count,
        })
    } else {
        let hash = hash.ok_or_else(|| Fs2Error::XmlDecode("file element missing hash".into()))?;
        Ok(FileListItem {
            name,
            size,
            last_modified,
            hash_version,
            hash: Some(hash),
            children: None,
            file_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> FileListItem {
        let song = FileListItem::file("song.ogg", 4096, 1_700_000_000, Digest([7u8; 32]));
        let notes = FileListItem::file("notes.txt", 12, 1_700_000_001, Digest([9u8; 32]));
        let music = FileListItem::directory("music", 1_700_000_002, vec![song, notes]);
        FileListItem::directory("share", 1_700_000_003, vec![music])
    }

    #[test]
    fn binary_round_trips() {
        let root = sample_tree();
        let bytes = encode_binary(&root);
        let decoded = decode_binary(&bytes).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn xml_round_trips() {
        let root = sample_tree();
        let xml = encode_xml(&root).unwrap();
        let decoded = decode_xml(&xml).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn xml_round_trip_preserves_directory_last_modified() {
        let inner = FileListItem::directory(
            "music",
            1_650_000_111,
            vec![FileListItem::file("song.ogg", 10, 1_650_000_222, Digest([3u8; 32]))],
        );
        let root = FileListItem::directory("share", 1_650_000_333, vec![inner]);

        let xml = encode_xml(&root).unwrap();
        let decoded = decode_xml(&xml).unwrap();
        assert_eq!(decoded, root);
        assert_eq!(decoded.last_modified, 1_650_000_333);
        assert_eq!(decoded.children.unwrap()[0].last_modified, 1_650_000_111);
    }

    #[test]
    fn empty_directory_round_trips() {
        let root = FileListItem::directory("empty", 0, Vec::new());
        let bytes = encode_binary(&root);
        let decoded = decode_binary(&bytes).unwrap();
        assert_eq!(decoded, root);

        let xml = encode_xml(&root).unwrap();
        let decoded_xml = decode_xml(&xml).unwrap();
        assert_eq!(decoded_xml.file_count, 0);
        assert!(decoded_xml.children.unwrap().is_empty());
    }

    #[test]
    fn corrupt_hash_length_is_rejected() {
        let mut bytes = encode_binary(&sample_tree());
        // Flip the hash_len byte of the root's first child's first child
        // (the file "song.ogg") to something invalid by scanning for the
        // hash_version=1 marker pattern is fragile; instead verify the
        // basic contract with a hand-built truncated buffer.
        bytes.truncate(bytes.len() - 1);
        assert!(decode_binary(&bytes).is_err());
    }

    #[test]
    fn file_count_aggregates_match_invariant() {
        let root = sample_tree();
        assert_eq!(root.file_count, 2);
        assert_eq!(root.size, 4096 + 12);
    }
}
