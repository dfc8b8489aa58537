//src/taxonomy.rs
//
// The Taxonomy Tree Index: LCA computation over a preloaded reference tree.

use std::collections::BTreeSet;
use std::path::Path;

use ahash::AHashSet;
use parking_lot::{RwLock, RwLockReadGuard};
use thiserror::Error;

use crate::taxdb::{parse_taxdb, NameMap, ParentMap, RankMap, TaxDbError};
use crate::types::{HitTable, TaxId};

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("no taxon identifiers to compute an LCA over")]
    EmptyInput,
    #[error("taxon {0} is not present in the reference tree")]
    UnknownTaxon(TaxId),
    #[error("table has no '{0}' column")]
    MissingColumn(String),
    #[error("'{0}' is not a taxon identifier")]
    BadTaxid(String),
}

/// Read-only view of the taxonomic reference tree, loaded once from a taxDB
/// file. Answers topology queries; never mutated after construction
/// (refresh builds a whole new index, see [`SharedTaxonomy`]).
#[derive(Debug, Default)]
pub struct TaxonomyIndex {
    parents: ParentMap,
    names: NameMap,
    ranks: RankMap,
}

impl TaxonomyIndex {
    pub fn from_maps(parents: ParentMap, names: NameMap, ranks: RankMap) -> Self {
        Self { parents, names, ranks }
    }

    pub fn from_taxdb<P: AsRef<Path>>(path: P) -> Result<Self, TaxDbError> {
        let (parents, names, ranks) = parse_taxdb(path)?;
        Ok(Self::from_maps(parents, names, ranks))
    }

    pub fn contains(&self, taxid: TaxId) -> bool {
        self.parents.contains_key(&taxid)
    }

    pub fn name_of(&self, taxid: TaxId) -> Option<&str> {
        self.names.get(&taxid).map(String::as_str)
    }

    pub fn rank_of(&self, taxid: TaxId) -> Option<&str> {
        self.ranks.get(&taxid).map(String::as_str)
    }

    /// Root-first ancestry chain of `taxid`, ending at `taxid` itself.
    /// Cycle-guarded: a repeated node or a self-parent terminates the climb.
    pub fn lineage(&self, taxid: TaxId) -> Result<Vec<TaxId>, TaxonomyError> {
        if !self.contains(taxid) {
            return Err(TaxonomyError::UnknownTaxon(taxid));
        }
        let mut chain = Vec::new();
        let mut seen = AHashSet::new();
        let mut node = taxid;
        loop {
            if !seen.insert(node) {
                break;
            }
            chain.push(node);
            match self.parents.get(&node) {
                Some(&p) if p != node && p != 0 => node = p,
                _ => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Lowest common ancestor of a set of taxa.
    ///
    /// Duplicates are harmless. A single distinct identifier is returned
    /// as-is (after a membership check, without walking the tree). The
    /// general case induces the minimal topology spanning the inputs by
    /// intersecting root-first lineages; the deepest shared node is the
    /// root of that topology, i.e. the LCA.
    pub fn compute_lca(&self, taxids: &[TaxId]) -> Result<TaxId, TaxonomyError> {
        if taxids.is_empty() {
            return Err(TaxonomyError::EmptyInput);
        }
        for &id in taxids {
            if !self.contains(id) {
                return Err(TaxonomyError::UnknownTaxon(id));
            }
        }

        let distinct: BTreeSet<TaxId> = taxids.iter().copied().collect();
        if distinct.len() == 1 {
            return Ok(taxids[0]);
        }

        let lineages: Vec<Vec<TaxId>> = distinct
            .iter()
            .map(|&id| self.lineage(id))
            .collect::<Result<_, _>>()?;

        let shortest = lineages.iter().map(Vec::len).min().unwrap_or(0);
        let mut lca = None;
        for depth in 0..shortest {
            let node = lineages[0][depth];
            if lineages.iter().all(|l| l[depth] == node) {
                lca = Some(node);
            } else {
                break;
            }
        }
        // Disconnected inputs share no prefix; fall back to the
        // conventional root taxon.
        Ok(lca.unwrap_or(1))
    }

    /// Grouped LCA over a query-keyed hit table.
    ///
    /// Only the first group encountered is processed: the group key of the
    /// first row selects the rows whose taxa feed the LCA, and the result
    /// is a one-row {group key, LCA} table. This matches the pipeline this
    /// tool descends from, which calls it once per contig file; it does NOT
    /// iterate the remaining groups.
    pub fn compute_lca_grouped(
        &self,
        table: &HitTable,
        group_col: &str,
        tax_col: &str,
    ) -> Result<HitTable, TaxonomyError> {
        if table.is_empty() {
            return Err(TaxonomyError::EmptyInput);
        }
        let gi = table
            .column_index(group_col)
            .ok_or_else(|| TaxonomyError::MissingColumn(group_col.to_string()))?;
        let ti = table
            .column_index(tax_col)
            .ok_or_else(|| TaxonomyError::MissingColumn(tax_col.to_string()))?;

        let key = table.rows[0]
            .get(gi)
            .cloned()
            .unwrap_or_default();

        let mut taxids = Vec::new();
        for row in &table.rows {
            if row.get(gi).map(String::as_str) != Some(key.as_str()) {
                continue;
            }
            let cell = row.get(ti).map(String::as_str).unwrap_or("");
            let id: TaxId = cell
                .trim()
                .parse()
                .map_err(|_| TaxonomyError::BadTaxid(cell.to_string()))?;
            taxids.push(id);
        }

        let lca = self.compute_lca(&taxids)?;
        Ok(HitTable {
            columns: vec![group_col.to_string(), tax_col.to_string()],
            rows: vec![vec![key, lca.to_string()]],
        })
    }
}

/// Process-wide, refreshable home for the reference tree.
///
/// Normal request handling only ever takes the read guard; `refresh_from`
/// is the explicit, infrequent maintenance operation that reloads the taxDB
/// under the write lock.
pub struct SharedTaxonomy {
    inner: RwLock<TaxonomyIndex>,
}

impl SharedTaxonomy {
    pub fn new(index: TaxonomyIndex) -> Self {
        Self { inner: RwLock::new(index) }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TaxDbError> {
        Ok(Self::new(TaxonomyIndex::from_taxdb(path)?))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TaxonomyIndex> {
        self.inner.read()
    }

    /// Re-parse the taxDB and swap the whole index in one write-lock hold.
    pub fn refresh_from<P: AsRef<Path>>(&self, path: P) -> Result<(), TaxDbError> {
        let fresh = TaxonomyIndex::from_taxdb(path)?;
        *self.inner.write() = fresh;
        log::info!("taxonomy refreshed from disk");
        Ok(())
    }
}
