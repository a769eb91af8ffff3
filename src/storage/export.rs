//! CSV export of index entries
//!
//! One row per entry: identity columns followed by one column per computed
//! property. The property columns are the sorted union of the keys present
//! in the exported entries; an entry without a property leaves it blank.

use std::collections::BTreeSet;
use std::io::Write;

use crate::storage::entry::IndexEntry;
use crate::storage::error::StorageResult;

/// Write `rows` as CSV; `with_database` adds a leading `DatabaseId` column
///
/// Returns the number of rows written.
pub fn write_entries_csv<W: Write>(
    writer: W,
    rows: &[(&str, &IndexEntry)],
    with_database: bool,
) -> StorageResult<usize> {
    let properties: BTreeSet<&str> = rows
        .iter()
        .flat_map(|(_, entry)| entry.properties.iter().map(|(k, _)| k.as_str()))
        .collect();

    let mut csv = csv::Writer::from_writer(writer);
    let mut header: Vec<&str> = Vec::with_capacity(4 + properties.len());
    if with_database {
        header.push("DatabaseId");
    }
    header.extend(["FilenameId", "Extension", "Version"]);
    header.extend(properties.iter().copied());
    csv.write_record(&header)?;

    for (database_id, entry) in rows {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if with_database {
            record.push(database_id.to_string());
        }
        record.push(entry.filename_id.clone());
        record.push(entry.extension.clone());
        record.push(entry.version.to_string());
        for name in &properties {
            record.push(entry.get_string(name).unwrap_or_default());
        }
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(rows.len())
}
