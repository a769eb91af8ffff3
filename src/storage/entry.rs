//! Core data types for indexed structure files
//!
//! - `Entry`: identity of one structure file within a database
//! - `IndexEntry`: an `Entry` plus its source timestamp and computed properties
//! - `PropertyValue` / `PropertyBag`: the typed key/value store behind the
//!   computed properties

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Separator used for array-valued properties on disk
pub const VALUE_SEPARATOR: char = '¦';

/// Ticks (100 ns) between 0001-01-01 and the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Well-known property names
pub mod keys {
    pub const ATOM_COUNT: &str = "AtomCount";
    pub const SIZE_IN_BYTES: &str = "SizeInBytes";
    pub const ATOM_TYPES: &str = "AtomTypes";
    pub const RESIDUE_COUNT: &str = "ResidueCount";
    pub const RESIDUE_TYPES: &str = "ResidueTypes";
}

/// Convert a file system time to ticks (100 ns units since 0001-01-01 UTC)
pub fn system_time_to_ticks(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH_TICKS + (d.as_nanos() / 100) as i64,
        Err(e) => UNIX_EPOCH_TICKS - (e.duration().as_nanos() / 100) as i64,
    }
}

/// Normalize a filename id for case-insensitive comparison
pub fn normalize_id(id: &str) -> String {
    id.to_lowercase()
}

/// Identity of one structure file
///
/// `filename_id` is the unique key within a database and is stored in
/// lower case, so plain string equality is case-insensitive equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// File name without extension
    pub filename_id: String,
    /// Extension including the leading dot (".pdb")
    pub extension: String,
    /// Index generation in which the entry was last computed
    pub version: u32,
}

impl Entry {
    pub fn new(filename_id: impl AsRef<str>, extension: impl AsRef<str>, version: u32) -> Self {
        Self {
            filename_id: normalize_id(filename_id.as_ref()),
            extension: extension.as_ref().to_lowercase(),
            version,
        }
    }

    /// File name inside the database data directory
    pub fn filename(&self) -> String {
        format!("{}{}", self.filename_id, self.extension)
    }
}

/// A single computed property value
///
/// Values read back from disk stay [`PropertyValue::Text`] (or
/// [`PropertyValue::List`]) so their on-disk text is written back unchanged;
/// the numeric accessors parse on demand. Equality compares the on-disk form.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl PropertyValue {
    /// Value from its on-disk string form, keeping the text as written
    pub fn parse(raw: &str) -> Self {
        if raw.contains(VALUE_SEPARATOR) {
            return PropertyValue::List(raw.split(VALUE_SEPARATOR).map(String::from).collect());
        }
        PropertyValue::Text(raw.to_string())
    }

    /// On-disk string form (arrays joined with `¦`)
    pub fn to_attribute_value(&self) -> String {
        match self {
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::Text(s) => s.clone(),
            PropertyValue::List(xs) => xs.join(&VALUE_SEPARATOR.to_string()),
        }
    }

    /// True if the value would serialize to an empty string
    pub fn is_empty(&self) -> bool {
        match self {
            PropertyValue::Text(s) => s.is_empty(),
            PropertyValue::List(xs) => xs.iter().all(|x| x.is_empty()),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            PropertyValue::Text(s) => {
                let s = s.trim();
                s.parse().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && v.fract() == 0.0)
                        .map(|v| v as i64)
                })
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Text(s) => s.trim().parse().ok().filter(|v: &f64| v.is_finite()),
            _ => None,
        }
    }

    /// Values as a string array; scalars become a one-element array
    pub fn as_string_array(&self) -> Vec<String> {
        match self {
            PropertyValue::List(xs) => xs.clone(),
            other => vec![other.to_attribute_value()],
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_attribute_value() == other.to_attribute_value()
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_attribute_value())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<usize> for PropertyValue {
    fn from(v: usize) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::List(v)
    }
}

/// Ordered property map; ordering keeps serialized output byte-stable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    values: BTreeMap<String, PropertyValue>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; empty strings and empty arrays are skipped
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An entry of the database index
///
/// Write-once: persisted entries are superseded by a new entry with a
/// higher version, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub filename_id: String,
    pub extension: String,
    pub version: u32,
    /// Last-write time of the original source file, in ticks
    pub source_timestamp: Option<i64>,
    pub properties: PropertyBag,
}

impl IndexEntry {
    pub fn new(entry: Entry, source_timestamp: Option<i64>, properties: PropertyBag) -> Self {
        Self {
            filename_id: entry.filename_id,
            extension: entry.extension,
            version: entry.version,
            source_timestamp,
            properties,
        }
    }

    /// Identity part of this entry
    pub fn entry(&self) -> Entry {
        Entry {
            filename_id: self.filename_id.clone(),
            extension: self.extension.clone(),
            version: self.version,
        }
    }

    pub fn filename(&self) -> String {
        format!("{}{}", self.filename_id, self.extension)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.properties.get(name).and_then(PropertyValue::as_i64)
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(PropertyValue::as_f64)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.properties.get(name).map(PropertyValue::to_attribute_value)
    }

    pub fn get_string_array(&self, name: &str) -> Option<Vec<String>> {
        self.properties.get(name).map(PropertyValue::as_string_array)
    }

    /// Number of atoms (0 if the property is missing)
    pub fn atom_count(&self) -> i64 {
        self.get_int(keys::ATOM_COUNT).unwrap_or(0)
    }

    /// Size of the stored structure file (0 if the property is missing)
    pub fn size_in_bytes(&self) -> u64 {
        self.get_int(keys::SIZE_IN_BYTES)
            .map(|v| v.max(0) as u64)
            .unwrap_or(0)
    }

    /// Deterministic ordering used for persisted snapshots
    pub fn sort_key(&self) -> (u32, &str) {
        (self.version, self.filename_id.as_str())
    }
}

/// Ceiling of the mean atom count, 0 for an empty set
pub fn average_atom_count<'a>(entries: impl IntoIterator<Item = &'a IndexEntry>) -> u32 {
    let (sum, count) = entries
        .into_iter()
        .fold((0i64, 0i64), |(s, c), e| (s + e.atom_count(), c + 1));
    if count == 0 {
        return 0;
    }
    ((sum + count - 1) / count).max(0) as u32
}
