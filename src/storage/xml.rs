//! XML documents for index snapshots, views and database snapshots
//!
//! ```text
//! index_<v>.xml   <Index Version="v">
//!                   <IndexEntry FilenameId=".." Extension=".." Version="..">
//!                     <SrcTimestamp>ticks</SrcTimestamp>
//!                     <Properties AtomCount=".." AtomTypes="C¦N¦O" .../>
//!                   </IndexEntry>
//!                 </Index>
//! view.xml        <View Version="v" MoleculeCount="n" AverageAtomCount="a">
//!                   <Entry FilenameId=".." Extension=".." Version=".."/>
//!                 </View>
//! snapshot.xml    <Snapshot><Database Id=".."><Entry .../></Database></Snapshot>
//! ```
//!
//! The reader also accepts index entries whose identity is nested in an
//! `<Entry>` child instead of being carried as attributes.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::storage::entry::{Entry, IndexEntry, PropertyBag, PropertyValue};
use crate::storage::error::{StorageError, StorageResult};

const INDEX_ROOT: &str = "Index";
const INDEX_ENTRY: &str = "IndexEntry";
const ENTRY: &str = "Entry";
const TIMESTAMP: &str = "SrcTimestamp";
const PROPERTIES: &str = "Properties";
const DATABASE: &str = "Database";

type XmlWriter = Writer<Vec<u8>>;

fn new_writer() -> StorageResult<XmlWriter> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    Ok(writer)
}

fn finish(writer: XmlWriter) -> Vec<u8> {
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    bytes
}

fn entry_element<'a>(name: &'a str, filename_id: &str, extension: &str, version: u32) -> BytesStart<'a> {
    let mut element = BytesStart::new(name);
    element.push_attribute(("FilenameId", filename_id));
    element.push_attribute(("Extension", extension));
    element.push_attribute(("Version", version.to_string().as_str()));
    element
}

/// Encode an index snapshot; entries are written in the given order
pub fn encode_index(version: u32, entries: &[IndexEntry]) -> StorageResult<Vec<u8>> {
    let mut writer = new_writer()?;

    let mut root = BytesStart::new(INDEX_ROOT);
    root.push_attribute(("Version", version.to_string().as_str()));
    writer.write_event(Event::Start(root))?;

    for entry in entries {
        let element = entry_element(INDEX_ENTRY, &entry.filename_id, &entry.extension, entry.version);
        writer.write_event(Event::Start(element))?;

        if let Some(ticks) = entry.source_timestamp {
            writer.write_event(Event::Start(BytesStart::new(TIMESTAMP)))?;
            writer.write_event(Event::Text(BytesText::new(&ticks.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new(TIMESTAMP)))?;
        }

        let mut props = BytesStart::new(PROPERTIES);
        for (name, value) in entry.properties.iter() {
            props.push_attribute((name.as_str(), value.to_attribute_value().as_str()));
        }
        writer.write_event(Event::Empty(props))?;

        writer.write_event(Event::End(BytesEnd::new(INDEX_ENTRY)))?;
    }

    writer.write_event(Event::End(BytesEnd::new(INDEX_ROOT)))?;
    Ok(finish(writer))
}

fn attributes(element: &BytesStart) -> StorageResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

#[derive(Default)]
struct EntryFields {
    filename_id: Option<String>,
    extension: Option<String>,
    version: Option<u32>,
}

impl EntryFields {
    fn absorb(&mut self, attrs: &[(String, String)]) -> StorageResult<()> {
        for (key, value) in attrs {
            match key.as_str() {
                "FilenameId" => self.filename_id = Some(value.clone()),
                "Extension" => self.extension = Some(value.clone()),
                "Version" => {
                    self.version = Some(value.trim().parse().map_err(|_| {
                        StorageError::Xml(format!("Invalid entry version '{}'", value))
                    })?)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn build(self) -> StorageResult<Entry> {
        let filename_id = self
            .filename_id
            .ok_or_else(|| StorageError::Xml("Entry without FilenameId".to_string()))?;
        Ok(Entry::new(
            filename_id,
            self.extension.unwrap_or_default(),
            self.version.unwrap_or(0),
        ))
    }
}

#[derive(Default)]
struct PendingIndexEntry {
    fields: EntryFields,
    source_timestamp: Option<i64>,
    properties: PropertyBag,
}

/// Decode an index snapshot
pub fn decode_index(xml: &str) -> StorageResult<Vec<IndexEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut pending: Option<PendingIndexEntry> = None;
    let mut in_timestamp = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"IndexEntry" => {
                    let mut current = PendingIndexEntry::default();
                    current.fields.absorb(&attributes(&e)?)?;
                    pending = Some(current);
                }
                b"SrcTimestamp" => in_timestamp = true,
                b"Entry" => {
                    if let Some(current) = pending.as_mut() {
                        current.fields.absorb(&attributes(&e)?)?;
                    }
                }
                b"Properties" => {
                    if let Some(current) = pending.as_mut() {
                        read_properties(&e, &mut current.properties)?;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"Entry" => {
                    if let Some(current) = pending.as_mut() {
                        current.fields.absorb(&attributes(&e)?)?;
                    }
                }
                b"Properties" => {
                    if let Some(current) = pending.as_mut() {
                        read_properties(&e, &mut current.properties)?;
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if in_timestamp {
                    if let Some(current) = pending.as_mut() {
                        let text = t.unescape()?;
                        current.source_timestamp = Some(text.trim().parse().map_err(|_| {
                            StorageError::Xml(format!("Invalid source timestamp '{}'", text))
                        })?);
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"SrcTimestamp" => in_timestamp = false,
                b"IndexEntry" => {
                    if let Some(done) = pending.take() {
                        let entry = done.fields.build()?;
                        entries.push(IndexEntry::new(entry, done.source_timestamp, done.properties));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

fn read_properties(element: &BytesStart, bag: &mut PropertyBag) -> StorageResult<()> {
    for (key, value) in attributes(element)? {
        bag.insert(key, PropertyValue::parse(&value));
    }
    Ok(())
}

fn write_entries(writer: &mut XmlWriter, entries: &[Entry]) -> StorageResult<()> {
    for entry in entries {
        let element = entry_element(ENTRY, &entry.filename_id, &entry.extension, entry.version);
        writer.write_event(Event::Empty(element))?;
    }
    Ok(())
}

/// Encode a flat entry list under `root`, with `attrs` on the root element
pub fn encode_entry_list(root: &str, attrs: &[(&str, String)], entries: &[Entry]) -> StorageResult<Vec<u8>> {
    let mut writer = new_writer()?;
    let mut element = BytesStart::new(root);
    for (key, value) in attrs {
        element.push_attribute((*key, value.as_str()));
    }
    writer.write_event(Event::Start(element))?;
    write_entries(&mut writer, entries)?;
    writer.write_event(Event::End(BytesEnd::new(root)))?;
    Ok(finish(writer))
}

/// Attributes of the root element; empty for a document without one
pub fn decode_root_attributes(xml: &str) -> StorageResult<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => return attributes(&e),
            Event::Eof => return Ok(Vec::new()),
            _ => {}
        }
    }
}

/// Decode every `<Entry>` element of a document
pub fn decode_entry_list(xml: &str) -> StorageResult<Vec<Entry>> {
    Ok(decode_grouped(xml)?
        .into_iter()
        .flat_map(|(_, entries)| entries)
        .collect())
}

/// Encode entries grouped by database id
pub fn encode_grouped(root: &str, groups: &[(String, Vec<Entry>)]) -> StorageResult<Vec<u8>> {
    let mut writer = new_writer()?;
    writer.write_event(Event::Start(BytesStart::new(root)))?;
    for (database_id, entries) in groups {
        let mut element = BytesStart::new(DATABASE);
        element.push_attribute(("Id", database_id.as_str()));
        writer.write_event(Event::Start(element))?;
        write_entries(&mut writer, entries)?;
        writer.write_event(Event::End(BytesEnd::new(DATABASE)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(root)))?;
    Ok(finish(writer))
}

/// Decode entries grouped by `<Database Id>`; entries outside a group get an empty id
pub fn decode_grouped(xml: &str) -> StorageResult<Vec<(String, Vec<Entry>)>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut groups: Vec<(String, Vec<Entry>)> = Vec::new();
    let mut current: Option<(String, Vec<Entry>)> = None;
    let mut loose: Vec<Entry> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"Database" => {
                let id = attributes(&e)?
                    .into_iter()
                    .find(|(k, _)| k == "Id")
                    .map(|(_, v)| v)
                    .unwrap_or_default();
                current = Some((id, Vec::new()));
            }
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Entry" => {
                let mut fields = EntryFields::default();
                fields.absorb(&attributes(&e)?)?;
                let entry = fields.build()?;
                match current.as_mut() {
                    Some((_, entries)) => entries.push(entry),
                    None => loose.push(entry),
                }
            }
            Event::End(e) if e.name().as_ref() == b"Database" => {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !loose.is_empty() {
        groups.insert(0, (String::new(), loose));
    }
    Ok(groups)
}
