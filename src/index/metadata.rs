//! Structure metadata extraction
//!
//! The indexer only needs two things from a structure file: whether it is a
//! structure at all, and a handful of descriptive counts. Both come from a
//! [`StructureReader`]. [`BasicStructureReader`] does a line-oriented scan of
//! the common formats without any chemical validation.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors produced while reading structure metadata
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported structure format: {0}")]
    Unsupported(String),

    #[error("Malformed structure ({format}): {message}")]
    Malformed { format: StructureType, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recognized structure file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureType {
    Pdb,
    /// mmCIF
    PdbX,
    Mol,
    Sdf,
    Mol2,
    Xyz,
}

impl StructureType {
    /// Classify a filename by its extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdb" | "ent" => Some(Self::Pdb),
            "cif" | "mmcif" => Some(Self::PdbX),
            "mol" => Some(Self::Mol),
            "sdf" | "sd" => Some(Self::Sdf),
            "mol2" => Some(Self::Mol2),
            "xyz" => Some(Self::Xyz),
            _ => None,
        }
    }
}

impl std::fmt::Display for StructureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pdb => "PDB",
            Self::PdbX => "PDBx/mmCIF",
            Self::Mol => "MOL",
            Self::Sdf => "SDF",
            Self::Mol2 => "MOL2",
            Self::Xyz => "XYZ",
        };
        write!(f, "{}", s)
    }
}

/// Descriptive values computed for one structure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureMetadata {
    pub atom_count: usize,
    /// Distinct element symbols, sorted
    pub atom_types: Vec<String>,
    pub residue_count: usize,
    /// Distinct residue names, sorted
    pub residue_types: Vec<String>,
}

/// Source of structure metadata
pub trait StructureReader: Send + Sync {
    /// Format of `filename`, or `None` if it is not an indexable structure
    fn structure_type(&self, filename: &str) -> Option<StructureType> {
        StructureType::from_filename(filename)
    }

    fn compute_metadata(&self, path: &Path) -> Result<StructureMetadata, ParseError>;
}

/// Line-oriented reader for PDB, mmCIF, MOL/SDF, MOL2 and XYZ files
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicStructureReader;

impl StructureReader for BasicStructureReader {
    fn compute_metadata(&self, path: &Path) -> Result<StructureMetadata, ParseError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = self
            .structure_type(&filename)
            .ok_or_else(|| ParseError::Unsupported(filename.clone()))?;

        let bytes = fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);

        let metadata = match format {
            StructureType::Pdb => read_pdb(&text),
            StructureType::PdbX => read_mmcif(&text),
            StructureType::Mol | StructureType::Sdf => read_molfile(&text, format)?,
            StructureType::Mol2 => read_mol2(&text),
            StructureType::Xyz => read_xyz(&text)?,
        };

        if metadata.atom_count == 0 {
            return Err(ParseError::Malformed {
                format,
                message: "The structure contains no atoms".to_string(),
            });
        }
        Ok(metadata)
    }
}

/// Normalize an element symbol to `Fe` form
fn element_symbol(raw: &str) -> Option<String> {
    let letters: String = raw.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    let mut chars = letters.chars();
    let first = chars.next()?;
    let mut symbol = first.to_ascii_uppercase().to_string();
    symbol.extend(chars.map(|c| c.to_ascii_lowercase()));
    Some(symbol)
}

#[derive(Default)]
struct Accumulator {
    atoms: usize,
    elements: BTreeSet<String>,
    residues: HashSet<String>,
    residue_names: BTreeSet<String>,
}

impl Accumulator {
    fn atom(&mut self, element: Option<String>) {
        self.atoms += 1;
        if let Some(e) = element {
            self.elements.insert(e);
        }
    }

    fn residue(&mut self, key: String, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.residues.insert(key);
        self.residue_names.insert(name.to_uppercase());
    }

    fn finish(self) -> StructureMetadata {
        StructureMetadata {
            atom_count: self.atoms,
            atom_types: self.elements.into_iter().collect(),
            residue_count: self.residues.len(),
            residue_types: self.residue_names.into_iter().collect(),
        }
    }
}

fn columns(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("").trim()
}

fn read_pdb(text: &str) -> StructureMetadata {
    let mut acc = Accumulator::default();
    for line in text.lines() {
        if line.starts_with("ENDMDL") {
            break;
        }
        if !(line.starts_with("ATOM  ") || line.starts_with("HETATM")) {
            continue;
        }
        let element = match columns(line, 76, 78) {
            "" => element_symbol(columns(line, 12, 14)),
            e => element_symbol(e),
        };
        acc.atom(element);

        let residue_name = columns(line, 17, 20);
        let key = format!(
            "{}:{}:{}",
            columns(line, 21, 22),
            columns(line, 22, 26),
            columns(line, 26, 27)
        );
        acc.residue(key, residue_name);
    }
    acc.finish()
}

fn read_mmcif(text: &str) -> StructureMetadata {
    let mut acc = Accumulator::default();
    let mut header: Vec<&str> = Vec::new();
    let mut in_atom_site = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("_atom_site.") {
            if !in_atom_site {
                header.clear();
                in_atom_site = true;
            }
            header.push(trimmed.trim_start_matches("_atom_site.").trim());
            continue;
        }
        if !in_atom_site {
            continue;
        }
        if !(trimmed.starts_with("ATOM") || trimmed.starts_with("HETATM")) {
            if trimmed.starts_with('#') || trimmed.starts_with("loop_") || trimmed.starts_with('_') {
                in_atom_site = false;
            }
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let field = |name: &str| {
            header
                .iter()
                .position(|h| *h == name)
                .and_then(|i| fields.get(i).copied())
                .filter(|v| *v != "?" && *v != ".")
        };

        if field("pdbx_PDB_model_num").map(|m| m != "1").unwrap_or(false) {
            continue;
        }

        acc.atom(field("type_symbol").and_then(element_symbol));
        if let Some(name) = field("label_comp_id").or_else(|| field("auth_comp_id")) {
            let key = format!(
                "{}:{}:{}",
                field("label_asym_id").or_else(|| field("auth_asym_id")).unwrap_or(""),
                field("auth_seq_id").or_else(|| field("label_seq_id")).unwrap_or(""),
                field("pdbx_PDB_ins_code").unwrap_or("")
            );
            acc.residue(key, name);
        }
    }
    acc.finish()
}

fn read_molfile(text: &str, format: StructureType) -> Result<StructureMetadata, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let counts = lines.get(3).ok_or_else(|| ParseError::Malformed {
        format,
        message: "Missing counts line".to_string(),
    })?;

    let atom_count: usize = if counts.contains("V3000") {
        lines
            .iter()
            .find_map(|l| l.trim().strip_prefix("M  V30 COUNTS"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ParseError::Malformed {
                format,
                message: "Missing V3000 COUNTS line".to_string(),
            })?
    } else {
        columns(counts, 0, 3).parse().map_err(|_| ParseError::Malformed {
            format,
            message: format!("Invalid atom count in '{}'", counts.trim()),
        })?
    };

    let mut acc = Accumulator::default();
    if counts.contains("V3000") {
        let mut in_atoms = false;
        for line in &lines {
            let t = line.trim();
            if t.starts_with("M  V30 BEGIN ATOM") {
                in_atoms = true;
            } else if t.starts_with("M  V30 END ATOM") {
                break;
            } else if in_atoms {
                let element = t.split_whitespace().nth(3).and_then(element_symbol);
                acc.atom(element);
            }
        }
    } else {
        for line in lines.iter().skip(4).take(atom_count) {
            let element = line.split_whitespace().nth(3).and_then(element_symbol);
            acc.atom(element);
        }
    }

    if acc.atoms != atom_count {
        return Err(ParseError::Malformed {
            format,
            message: format!("Expected {} atoms, found {}", atom_count, acc.atoms),
        });
    }
    Ok(acc.finish())
}

fn read_mol2(text: &str) -> StructureMetadata {
    let mut acc = Accumulator::default();
    let mut in_atoms = false;
    for line in text.lines() {
        let t = line.trim();
        if t.starts_with("@<TRIPOS>") {
            if in_atoms {
                break;
            }
            in_atoms = t.eq_ignore_ascii_case("@<TRIPOS>ATOM");
            continue;
        }
        if !in_atoms || t.is_empty() {
            continue;
        }
        let fields: Vec<&str> = t.split_whitespace().collect();
        if fields.len() < 6 {
            continue;
        }
        let element = fields[5].split('.').next().and_then(element_symbol);
        acc.atom(element);
        if let (Some(id), Some(name)) = (fields.get(6), fields.get(7)) {
            acc.residue((*id).to_string(), name);
        }
    }
    acc.finish()
}

fn read_xyz(text: &str) -> Result<StructureMetadata, ParseError> {
    let mut lines = text.lines();
    let count: usize = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| ParseError::Malformed {
            format: StructureType::Xyz,
            message: "Missing atom count".to_string(),
        })?;

    let mut acc = Accumulator::default();
    for line in lines.skip(1).take(count) {
        acc.atom(line.split_whitespace().next().and_then(element_symbol));
    }
    if acc.atoms != count {
        return Err(ParseError::Malformed {
            format: StructureType::Xyz,
            message: format!("Expected {} atoms, found {}", count, acc.atoms),
        });
    }
    Ok(acc.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PDB: &str = "\
HEADER    OXIDOREDUCTASE
ATOM      1  N   ALA A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  ALA A   1      11.639   6.071  -5.147  1.00  0.00           C
ATOM      3  CA  GLY A   2      12.000   7.000  -4.000  1.00  0.00           C
HETATM    4 FE   HEM A 501      10.000   5.000  -3.000  1.00  0.00          FE
END
";

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(StructureType::from_filename("1TQN.PDB"), Some(StructureType::Pdb));
        assert_eq!(StructureType::from_filename("1tqn.cif"), Some(StructureType::PdbX));
        assert_eq!(StructureType::from_filename("lig.mol2"), Some(StructureType::Mol2));
        assert_eq!(StructureType::from_filename("notes.txt"), None);
        assert_eq!(StructureType::from_filename("README"), None);
    }

    #[test]
    fn test_read_pdb() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1tqn.pdb");
        fs::write(&path, PDB).unwrap();

        let meta = BasicStructureReader.compute_metadata(&path).unwrap();
        assert_eq!(meta.atom_count, 4);
        assert_eq!(meta.atom_types, vec!["C", "Fe", "N"]);
        assert_eq!(meta.residue_count, 3);
        assert_eq!(meta.residue_types, vec!["ALA", "GLY", "HEM"]);
    }

    #[test]
    fn test_read_mmcif() {
        let cif = "\
data_1TQN
loop_
_atom_site.group_PDB
_atom_site.id
_atom_site.type_symbol
_atom_site.label_atom_id
_atom_site.label_comp_id
_atom_site.label_asym_id
_atom_site.label_seq_id
ATOM   1 N N   ALA A 1
ATOM   2 C CA  ALA A 1
HETATM 3 FE FE HEM B .
#
";
        let dir = tempdir().unwrap();
        let path = dir.path().join("1tqn.cif");
        fs::write(&path, cif).unwrap();

        let meta = BasicStructureReader.compute_metadata(&path).unwrap();
        assert_eq!(meta.atom_count, 3);
        assert_eq!(meta.atom_types, vec!["C", "Fe", "N"]);
        assert_eq!(meta.residue_count, 2);
    }

    #[test]
    fn test_read_molfile() {
        let mol = "\
water
  test

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    0.9572    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
   -0.2400    0.9266    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  1  3  1  0
M  END
";
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.mol");
        fs::write(&path, mol).unwrap();

        let meta = BasicStructureReader.compute_metadata(&path).unwrap();
        assert_eq!(meta.atom_count, 3);
        assert_eq!(meta.atom_types, vec!["H", "O"]);
        assert_eq!(meta.residue_count, 0);
    }

    #[test]
    fn test_read_xyz_and_count_mismatch() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("m.xyz");
        fs::write(&good, "2\ncomment\nC 0 0 0\nO 0 0 1.2\n").unwrap();
        assert_eq!(BasicStructureReader.compute_metadata(&good).unwrap().atom_count, 2);

        let bad = dir.path().join("bad.xyz");
        fs::write(&bad, "5\ncomment\nC 0 0 0\n").unwrap();
        assert!(matches!(
            BasicStructureReader.compute_metadata(&bad),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_empty_structure_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.pdb");
        fs::write(&path, "HEADER\nEND\n").unwrap();
        assert!(BasicStructureReader.compute_metadata(&path).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hello").unwrap();
        assert!(matches!(
            BasicStructureReader.compute_metadata(&path),
            Err(ParseError::Unsupported(_))
        ));
    }
}
