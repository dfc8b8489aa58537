//src/blast.rs
//
// Hit Aggregator: read BLAST tabular hits, apply the relative-threshold
// filter, backfill missing taxids through the record lookup, and hand a
// deduplicated taxon set to the LCA step.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use thiserror::Error;

use crate::entrez::{resolve_taxid, RecordLookup};
use crate::types::{HitTable, SchemaMode, TaxId, BLAST_COLUMNS};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed delimited input: {0}")]
    Malformed(#[from] csv::Error),
    #[error("schema has {expected} names but table has {actual} columns")]
    SchemaMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("table has no '{0}' column")]
    MissingColumn(String),
    #[error("row {row}: '{cell}' is not numeric")]
    BadNumber { row: usize, cell: String },
    #[error("'{0}' is not a taxon identifier")]
    BadTaxid(String),
}

/// Read a delimited hit file into a [`HitTable`]. Files ending in `.gz`
/// are decompressed on the fly. `search_method` is stamped onto every row
/// as a provenance column.
pub fn parse_table<P: AsRef<Path>>(
    path: P,
    sep: u8,
    comment: Option<u8>,
    schema: &SchemaMode,
    search_method: &str,
) -> Result<HitTable, ParseError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    let reader: Box<dyn Read> = if is_gz {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_table_from(reader, sep, comment, schema, search_method)
}

/// Reader-based variant of [`parse_table`], used when the source is a
/// remote-store stream rather than a local file.
pub fn parse_table_from<R: Read>(
    reader: R,
    sep: u8,
    comment: Option<u8>,
    schema: &SchemaMode,
    search_method: &str,
) -> Result<HitTable, ParseError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(sep)
        .comment(comment)
        .has_headers(false)
        .from_reader(reader);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    let width = rows.first().map(Vec::len).unwrap_or(0);
    let columns = match schema {
        SchemaMode::Auto => BLAST_COLUMNS
            .iter()
            .take(width)
            .map(|c| c.to_string())
            .collect(),
        SchemaMode::Named(names) => {
            if names.len() != width {
                return Err(ParseError::SchemaMismatch {
                    expected: names.len(),
                    actual: width,
                });
            }
            names.clone()
        }
        SchemaMode::AsIs => Vec::new(),
    };

    let mut table = HitTable { columns, rows };
    table.push_constant_column("blast_type", search_method);
    Ok(table)
}

/// Fractional cutoffs for the relative filter, all in [0, 1].
/// A cutoff of 0 disables that criterion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub identity_cutoff: f64,
    pub align_len_cutoff: f64,
    pub bitscore_cutoff: f64,
}

/// One hit discarded because its taxid could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedHit {
    pub query: String,
    pub subject: String,
}

/// Outcome of [`filter_and_select`]. Both renderings of the survivors are
/// always available: the row-preserving table (taxid column fully
/// populated) and the deduplicated taxon set. `dropped` is the audit trail
/// of rows discarded as unresolvable, so callers no longer have to infer
/// drops from cardinality differences.
#[derive(Debug)]
pub struct Selection {
    pub hits: HitTable,
    pub taxids: BTreeSet<TaxId>,
    pub dropped: Vec<DroppedHit>,
}

fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan")
}

fn required_column(table: &HitTable, name: &str) -> Result<usize, SelectError> {
    table
        .column_index(name)
        .ok_or_else(|| SelectError::MissingColumn(name.to_string()))
}

fn column_max(values: &[Option<f64>], table: &HitTable, col: usize) -> Result<f64, SelectError> {
    let mut max = f64::NEG_INFINITY;
    for (row, v) in values.iter().enumerate() {
        match v {
            Some(v) => max = max.max(*v),
            None => {
                let cell = table.rows[row].get(col).cloned().unwrap_or_default();
                return Err(SelectError::BadNumber { row, cell });
            }
        }
    }
    Ok(max)
}

/// Reduce a raw hit table to the survivors that feed the LCA.
///
/// 1. Relative filtering, only when the table has more than one row: a hit
///    survives only if identity, alignment length AND bitscore each reach
///    the given fraction of that column's maximum over the whole input
///    table. Conjunctive, not ranked.
/// 2. Hits with no taxid are resolved through `lookup` (summary lookup,
///    then the replaced-by fallback) against `db`. Hits that still have no
///    taxid are dropped, not kept with a sentinel; lookup transport errors
///    count as unresolved (no retries).
/// 3. Surviving taxids are normalized to `TaxId`.
pub fn filter_and_select(
    table: &HitTable,
    lookup: &mut dyn RecordLookup,
    db: &str,
    opts: &FilterOptions,
) -> Result<Selection, SelectError> {
    // Relative filter against the input table's maxima.
    let keep: Vec<usize> = if table.len() > 1 {
        let ident_col = required_column(table, "identity")?;
        let len_col = required_column(table, "align_length")?;
        let bits_col = required_column(table, "bitscore")?;

        let ident = table.numeric(ident_col);
        let alen = table.numeric(len_col);
        let bits = table.numeric(bits_col);

        let ident_max = column_max(&ident, table, ident_col)?;
        let alen_max = column_max(&alen, table, len_col)?;
        let bits_max = column_max(&bits, table, bits_col)?;

        (0..table.len())
            .filter(|&i| {
                ident[i].unwrap_or(f64::NEG_INFINITY) >= opts.identity_cutoff * ident_max
                    && alen[i].unwrap_or(f64::NEG_INFINITY) >= opts.align_len_cutoff * alen_max
                    && bits[i].unwrap_or(f64::NEG_INFINITY) >= opts.bitscore_cutoff * bits_max
            })
            .collect()
    } else {
        (0..table.len()).collect()
    };

    let query_col = table.column_index("query");
    let subject_col = table.column_index("subject");
    let taxid_col = table.column_index("taxid");

    let mut columns = table.columns.clone();
    if taxid_col.is_none() && !columns.is_empty() {
        columns.push("taxid".to_string());
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut taxids: BTreeSet<TaxId> = BTreeSet::new();
    let mut dropped: Vec<DroppedHit> = Vec::new();

    for &i in &keep {
        let row = &table.rows[i];
        let cell = taxid_col
            .and_then(|c| row.get(c))
            .map(String::as_str)
            .unwrap_or("");

        let taxid: Option<TaxId> = if is_missing(cell) {
            let subject = subject_col
                .and_then(|c| row.get(c))
                .cloned()
                .ok_or_else(|| SelectError::MissingColumn("subject".to_string()))?;
            match resolve_taxid(lookup, &subject, db) {
                Ok(found) => found,
                Err(e) => {
                    log::warn!("lookup failed for {subject}: {e}");
                    None
                }
            }
        } else {
            Some(
                cell.trim()
                    .parse::<TaxId>()
                    .map_err(|_| SelectError::BadTaxid(cell.to_string()))?,
            )
        };

        match taxid {
            Some(id) => {
                let mut out = row.clone();
                match taxid_col {
                    Some(c) => out[c] = id.to_string(),
                    None => out.push(id.to_string()),
                }
                rows.push(out);
                taxids.insert(id);
            }
            None => dropped.push(DroppedHit {
                query: query_col
                    .and_then(|c| row.get(c))
                    .cloned()
                    .unwrap_or_default(),
                subject: subject_col
                    .and_then(|c| row.get(c))
                    .cloned()
                    .unwrap_or_default(),
            }),
        }
    }

    if !dropped.is_empty() {
        log::info!("{} hit(s) dropped as unresolvable", dropped.len());
    }
    Ok(Selection {
        hits: HitTable { columns, rows },
        taxids,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entrez::LookupError;
    use std::collections::HashMap;
    use std::io::Write;

    struct StubLookup {
        taxids: HashMap<String, TaxId>,
    }

    impl StubLookup {
        fn empty() -> Self {
            Self { taxids: HashMap::new() }
        }

        fn with(pairs: &[(&str, TaxId)]) -> Self {
            Self {
                taxids: pairs
                    .iter()
                    .map(|(acc, id)| (acc.to_string(), *id))
                    .collect(),
            }
        }
    }

    impl RecordLookup for StubLookup {
        fn taxid_for_accession(
            &mut self,
            acc: &str,
            _db: &str,
        ) -> Result<Option<TaxId>, LookupError> {
            Ok(self.taxids.get(acc).copied())
        }

        fn fetch_record(&mut self, _acc: &str, _db: &str) -> Result<Option<String>, LookupError> {
            Ok(None)
        }
    }

    /// query, subject, identity, align_length, bitscore, taxid
    fn hits(rows: &[(&str, &str, f64, f64, f64, &str)]) -> HitTable {
        HitTable {
            columns: ["query", "subject", "identity", "align_length", "bitscore", "taxid"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows: rows
                .iter()
                .map(|(q, s, id, len, bits, tax)| {
                    vec![
                        q.to_string(),
                        s.to_string(),
                        id.to_string(),
                        len.to_string(),
                        bits.to_string(),
                        tax.to_string(),
                    ]
                })
                .collect(),
        }
    }

    #[test]
    fn parse_auto_truncates_headings_to_actual_width() {
        let text = "c1\tACC1\t99.1\t500\t3\t0\t1\t500\t10\t510\t1e-50\t900\n";
        let table =
            parse_table_from(text.as_bytes(), b'\t', None, &SchemaMode::Auto, "nt").unwrap();
        // 12 canonical names plus the provenance column
        assert_eq!(table.columns.len(), 13);
        assert_eq!(&table.columns[..3], &["query", "subject", "identity"]);
        assert_eq!(table.columns[11], "bitscore");
        assert_eq!(table.columns[12], "blast_type");
        assert_eq!(table.rows[0].last().map(String::as_str), Some("nt"));
    }

    #[test]
    fn parse_named_schema_must_match_width() {
        let text = "a\tb\n";
        let schema = SchemaMode::Named(vec!["one".into(), "two".into(), "three".into()]);
        assert!(matches!(
            parse_table_from(text.as_bytes(), b'\t', None, &schema, "nt"),
            Err(ParseError::SchemaMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn parse_as_is_leaves_the_table_unlabeled() {
        let text = "a\tb\n";
        let table =
            parse_table_from(text.as_bytes(), b'\t', None, &SchemaMode::AsIs, "nr").unwrap();
        assert!(table.columns.is_empty());
        // provenance value still stamped on the row
        assert_eq!(table.rows[0], vec!["a", "b", "nr"]);
    }

    #[test]
    fn parse_rejects_ragged_input() {
        // second record is one field short
        let text = "c1\tACC1\t99.0\nc2\tACC2\n";
        assert!(matches!(
            parse_table_from(text.as_bytes(), b'\t', None, &SchemaMode::Auto, "nt"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn parse_skips_comment_lines() {
        let text = "# header comment\nc1\tACC1\n";
        let table =
            parse_table_from(text.as_bytes(), b'\t', Some(b'#'), &SchemaMode::AsIs, "nt").unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn parse_reads_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.tsv.gz");
        let mut enc = flate2::write::GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        enc.write_all(b"c1\tACC1\t99.0\n").unwrap();
        enc.finish().unwrap();

        let table = parse_table(&path, b'\t', None, &SchemaMode::Auto, "nt").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0][0], "c1");
    }

    #[test]
    fn relative_filter_keeps_rows_at_or_above_the_fractional_max() {
        let table = hits(&[
            ("c1", "A", 50.0, 100.0, 100.0, "561"),
            ("c1", "B", 90.0, 100.0, 100.0, "562"),
            ("c1", "C", 100.0, 100.0, 100.0, "563"),
        ]);
        let opts = FilterOptions { identity_cutoff: 0.9, ..Default::default() };
        let sel = filter_and_select(&table, &mut StubLookup::empty(), "nucleotide", &opts).unwrap();
        assert_eq!(sel.hits.len(), 2);
        let subjects: Vec<&str> = sel.hits.rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(subjects, vec!["B", "C"]);
    }

    #[test]
    fn filter_is_conjunctive_across_criteria() {
        // top identity but bottom bitscore: must be dropped, not rescued
        let table = hits(&[
            ("c1", "A", 100.0, 100.0, 10.0, "561"),
            ("c1", "B", 95.0, 100.0, 200.0, "562"),
        ]);
        let opts = FilterOptions {
            identity_cutoff: 0.9,
            bitscore_cutoff: 0.9,
            ..Default::default()
        };
        let sel = filter_and_select(&table, &mut StubLookup::empty(), "nucleotide", &opts).unwrap();
        assert_eq!(sel.hits.len(), 1);
        assert_eq!(sel.hits.rows[0][1], "B");
    }

    #[test]
    fn single_row_table_bypasses_the_relative_filter() {
        let table = hits(&[("c1", "A", 42.0, 30.0, 5.0, "562")]);
        let opts = FilterOptions {
            identity_cutoff: 1.0,
            align_len_cutoff: 1.0,
            bitscore_cutoff: 1.0,
        };
        let sel = filter_and_select(&table, &mut StubLookup::empty(), "nucleotide", &opts).unwrap();
        assert_eq!(sel.hits.len(), 1);
        assert_eq!(sel.taxids, BTreeSet::from([562]));
    }

    #[test]
    fn missing_taxids_are_resolved_through_the_lookup() {
        let table = hits(&[
            ("c1", "ACC_A", 99.0, 100.0, 200.0, ""),
            ("c1", "ACC_B", 98.0, 100.0, 199.0, "561"),
        ]);
        let mut lookup = StubLookup::with(&[("ACC_A", 562)]);
        let sel =
            filter_and_select(&table, &mut lookup, "nucleotide", &FilterOptions::default())
                .unwrap();
        assert_eq!(sel.hits.len(), 2);
        // no empty taxid cells remain
        let ti = sel.hits.column_index("taxid").unwrap();
        assert!(sel.hits.rows.iter().all(|r| !r[ti].is_empty()));
        assert_eq!(sel.taxids, BTreeSet::from([561, 562]));
        assert!(sel.dropped.is_empty());
    }

    #[test]
    fn unresolvable_rows_are_absent_from_both_outputs() {
        let table = hits(&[
            ("c1", "KNOWN", 99.0, 100.0, 200.0, "562"),
            ("c1", "GONE", 98.0, 100.0, 199.0, ""),
        ]);
        let sel = filter_and_select(
            &table,
            &mut StubLookup::empty(),
            "nucleotide",
            &FilterOptions::default(),
        )
        .unwrap();
        assert_eq!(sel.hits.len(), 1);
        assert_eq!(sel.taxids, BTreeSet::from([562]));
        assert_eq!(
            sel.dropped,
            vec![DroppedHit { query: "c1".into(), subject: "GONE".into() }]
        );
    }

    #[test]
    fn taxon_set_is_deduplicated() {
        let table = hits(&[
            ("c1", "A", 99.0, 100.0, 200.0, "562"),
            ("c1", "B", 98.0, 100.0, 199.0, "562"),
        ]);
        let sel = filter_and_select(
            &table,
            &mut StubLookup::empty(),
            "nucleotide",
            &FilterOptions::default(),
        )
        .unwrap();
        assert_eq!(sel.hits.len(), 2);
        assert_eq!(sel.taxids.len(), 1);
    }

    #[test]
    fn absent_taxid_column_is_backfilled_entirely() {
        // plain 12-column fmt6 table: no taxid column at all
        let text = "c1\tACC_A\t99.0\t100\t0\t0\t1\t100\t1\t100\t1e-30\t200\n";
        let table =
            parse_table_from(text.as_bytes(), b'\t', None, &SchemaMode::Auto, "nt").unwrap();
        let mut lookup = StubLookup::with(&[("ACC_A", 562)]);
        let sel =
            filter_and_select(&table, &mut lookup, "nucleotide", &FilterOptions::default())
                .unwrap();
        let ti = sel.hits.column_index("taxid").unwrap();
        assert_eq!(sel.hits.rows[0][ti], "562");
        assert_eq!(sel.taxids, BTreeSet::from([562]));
    }
}
