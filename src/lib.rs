// src/lib.rs
pub mod blast;
pub mod entrez;
pub mod store;
pub mod taxdb;
pub mod taxonomy;
pub mod types;

use std::fmt::Write as FmtWrite;
use std::path::PathBuf;

use thiserror::Error;

use crate::blast::{filter_and_select, parse_table, FilterOptions, ParseError, SelectError};
use crate::entrez::RecordLookup;
use crate::taxdb::TaxDbError;
use crate::taxonomy::{TaxonomyError, TaxonomyIndex};
use crate::types::{LcaAssignment, SchemaMode};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    TaxDb(#[from] TaxDbError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
}

/// Consensus calls for a batch of hit files. Text renderings are generated
/// on demand rather than stored.
pub struct LcaResults {
    /// One consensus row per input file, keyed by that file's first query id.
    pub assignments: Vec<LcaAssignment>,

    /// Total number of hits discarded because their taxid never resolved.
    pub dropped_unresolved: usize,
}

impl LcaResults {
    /// Render the consensus table as tab-delimited text.
    pub fn get_lca_table(&self) -> String {
        let mut output = String::new();
        output.push_str("query\ttaxid\tsci_name\trank\n");
        for a in &self.assignments {
            writeln!(
                output,
                "{}\t{}\t{}\t{}",
                a.query,
                a.taxid,
                a.sci_name.as_deref().unwrap_or("NA"),
                a.rank.as_deref().unwrap_or("NA"),
            )
            .unwrap();
        }
        output
    }
}

/// Unified entry point: load the taxonomy once, then reduce each BLAST hit
/// file to a single LCA call.
///
/// Per file: parse (tab-delimited, canonical column names, `search_method`
/// stamped as provenance), filter and resolve hits against `lookup` /
/// `lookup_db`, then compute the LCA of the surviving taxa.
pub fn assign_lca_from_files(
    taxdb_path: &str,
    hit_paths: Vec<PathBuf>,
    search_method: &str,
    lookup_db: &str,
    lookup: &mut dyn RecordLookup,
    opts: &FilterOptions,
) -> Result<LcaResults, PipelineError> {
    // 1. Load the reference tree once for the whole batch
    let taxonomy = TaxonomyIndex::from_taxdb(taxdb_path)?;

    let mut assignments = Vec::with_capacity(hit_paths.len());
    let mut dropped_unresolved = 0usize;

    for path in hit_paths {
        // 2. Parse this file's hit table
        let table = parse_table(&path, b'\t', None, &SchemaMode::Auto, search_method)?;

        // 3. Filter hits and resolve missing taxids
        let selection = filter_and_select(&table, lookup, lookup_db, opts)?;
        dropped_unresolved += selection.dropped.len();

        // 4. One LCA over the surviving taxa
        let taxids: Vec<_> = selection.taxids.iter().copied().collect();
        let lca = taxonomy.compute_lca(&taxids)?;

        let query = table
            .column_index("query")
            .and_then(|qi| table.rows.first().and_then(|r| r.get(qi)).cloned())
            .unwrap_or_else(|| path.display().to_string());

        assignments.push(LcaAssignment {
            query,
            taxid: lca,
            sci_name: taxonomy.name_of(lca).map(str::to_string),
            rank: taxonomy.rank_of(lca).map(str::to_string),
        });
    }

    Ok(LcaResults { assignments, dropped_unresolved })
}
