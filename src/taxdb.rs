//src/taxdb.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use thiserror::Error;

use crate::types::TaxId;

pub type ParentMap = AHashMap<TaxId, TaxId>;
pub type NameMap = AHashMap<TaxId, String>;
pub type RankMap = AHashMap<TaxId, String>;

#[derive(Debug, Error)]
pub enum TaxDbError {
    #[error("failed to read taxDB: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses a taxDB file in the format:
/// ```text
/// <taxid>\t<parentid>\t<taxname>\t<rank>
/// ```
/// Returns:
/// - a `ParentMap` mapping child_taxid -> parent_taxid
/// - a `NameMap` mapping taxid -> taxname
/// - a `RankMap` mapping taxid -> rank
///
/// Malformed or non-numeric lines are skipped rather than failing the load.
pub fn parse_taxdb<P: AsRef<Path>>(
    filepath: P,
) -> Result<(ParentMap, NameMap, RankMap), TaxDbError> {
    let file = File::open(filepath)?;
    let reader = BufReader::new(file);

    let mut parent_map: ParentMap = AHashMap::new();
    let mut name_map: NameMap = AHashMap::new();
    let mut rank_map: RankMap = AHashMap::new();

    for line_result in reader.lines() {
        let line = line_result?;
        // Expecting 4 tab-separated fields: taxid, parentid, taxname, rank
        // e.g. "2   1   Eukaryota   domain"
        let parts: Vec<&str> = line.split('\t').collect();

        if parts.len() < 4 {
            continue;
        }

        let taxid: TaxId = parts[0].trim().parse().unwrap_or(0);
        let parentid: TaxId = parts[1].trim().parse().unwrap_or(0);
        let taxname = parts[2].trim();
        let rank = parts[3].trim();

        if taxid != 0 {
            parent_map.insert(taxid, parentid);
            name_map.insert(taxid, taxname.to_string());
            rank_map.insert(taxid, rank.to_string());
        }
    }

    log::info!("taxDB loaded: {} taxa", parent_map.len());
    Ok((parent_map, name_map, rank_map))
}
