//src/types.rs

use std::fmt::Write as FmtWrite;

/// A taxonomic identifier as assigned by the NCBI Taxonomy database.
/// Always externally assigned, never generated here.
pub type TaxId = u32;

/// Canonical BLAST tabular column headings, in the fixed output order
/// produced by `-outfmt "6 ... staxids ssciname scomname stitle"`.
/// A narrower file (e.g. plain 12-column fmt6) takes a prefix of this list.
pub const BLAST_COLUMNS: [&str; 16] = [
    "query",
    "subject",
    "identity",
    "align_length",
    "mismatches",
    "gaps",
    "qstart",
    "qend",
    "sstart",
    "send",
    "evalue",
    "bitscore",
    "taxid",
    "sci_name",
    "common_name",
    "subject_title",
];

/// How column headings are assigned when reading a hit table.
#[derive(Debug, Clone)]
pub enum SchemaMode {
    /// Take the first N canonical BLAST headings, N = actual column count.
    Auto,
    /// Apply this exact list; length must match the column count.
    Named(Vec<String>),
    /// Leave the table unlabeled.
    AsIs,
}

/// An ordered table of search hits sharing one column schema.
///
/// Rows are raw string cells as read from the delimited file; typed access
/// goes through the accessors below. A table is never mutated after parsing;
/// filtering builds a new, narrower table.
#[derive(Debug, Clone, Default)]
pub struct HitTable {
    /// Column headings; empty when the table is unlabeled (`SchemaMode::AsIs`).
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl HitTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column, if the table is labeled and has it.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Parse one column as f64. `None` entries are cells that are empty
    /// or not numeric.
    pub fn numeric(&self, col: usize) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| row.get(col).and_then(|c| c.trim().parse::<f64>().ok()))
            .collect()
    }

    /// Append a constant-valued column, e.g. a search-method provenance tag.
    pub fn push_constant_column(&mut self, name: &str, value: &str) {
        if !self.columns.is_empty() {
            self.columns.push(name.to_string());
        }
        for row in &mut self.rows {
            row.push(value.to_string());
        }
    }

    /// Render as tab-delimited text, header row first when labeled.
    /// This is the interchange convention for everything the pipeline writes.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        if !self.columns.is_empty() {
            let _ = writeln!(out, "{}", self.columns.join("\t"));
        }
        for row in &self.rows {
            let _ = writeln!(out, "{}", row.join("\t"));
        }
        out
    }
}

/// One per-query consensus call: the LCA of the query's surviving hit taxa,
/// with name and rank backfilled from the taxonomy maps when known.
#[derive(Debug, Clone)]
pub struct LcaAssignment {
    pub query: String,
    pub taxid: TaxId,
    pub sci_name: Option<String>,
    pub rank: Option<String>,
}
