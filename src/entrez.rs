//src/entrez.rs
//
// Blocking NCBI E-utilities client used to backfill missing taxids, plus
// the rate-limit throttle NCBI's usage policy requires.

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;

use crate::types::TaxId;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("entrez request failed: {0}")]
    Http(String),
    #[error("entrez response body unreadable: {0}")]
    Body(#[from] std::io::Error),
}

/// Blocking minimum-interval rate limiter.
///
/// Kept out of the aggregation logic so the pacing is testable and a test
/// double can skip it entirely. `pause()` blocks only as long as needed to
/// keep consecutive calls at least `min_interval` apart.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    pub fn pause(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// The record-database collaborator: summary lookup of a taxid for an
/// accession, and full-record fetch for the replaced-by fallback.
/// `&mut self` because real implementations carry throttle state.
pub trait RecordLookup {
    /// Primary summary lookup: accession -> taxid, if the record has one.
    fn taxid_for_accession(&mut self, acc: &str, db: &str) -> Result<Option<TaxId>, LookupError>;

    /// Fetch the full flat-text record for an accession, if any.
    fn fetch_record(&mut self, acc: &str, db: &str) -> Result<Option<String>, LookupError>;
}

/// NCBI E-utilities over plain blocking HTTP. One second between requests,
/// per NCBI's unkeyed-client policy.
pub struct EntrezClient {
    base_url: String,
    throttle: Throttle,
}

impl EntrezClient {
    pub fn new() -> Self {
        Self::with_base_url(EUTILS_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            throttle: Throttle::new(Duration::from_secs(1)),
        }
    }
}

impl Default for EntrezClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordLookup for EntrezClient {
    fn taxid_for_accession(&mut self, acc: &str, db: &str) -> Result<Option<TaxId>, LookupError> {
        self.throttle.pause();
        let url = format!("{}/esummary.fcgi", self.base_url);
        let resp = ureq::get(&url)
            .query("db", db)
            .query("id", acc)
            .query("retmode", "json")
            .call()
            .map_err(|e| LookupError::Http(e.to_string()))?;
        let json: serde_json::Value = resp.into_json()?;
        Ok(taxid_from_summary(&json))
    }

    fn fetch_record(&mut self, acc: &str, db: &str) -> Result<Option<String>, LookupError> {
        self.throttle.pause();
        let url = format!("{}/efetch.fcgi", self.base_url);
        let resp = ureq::get(&url)
            .query("db", db)
            .query("id", acc)
            .query("rettype", "gb")
            .query("retmode", "text")
            .call()
            .map_err(|e| LookupError::Http(e.to_string()))?;
        let text = resp.into_string()?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }
}

/// Pull the taxid out of an esummary json.2.0 payload: `result.uids[0]`
/// names the record object, which carries "taxid" when the database assigns
/// one. A value outside the u32 range is treated as absent, never truncated.
fn taxid_from_summary(json: &serde_json::Value) -> Option<TaxId> {
    json["result"]["uids"][0]
        .as_str()
        .and_then(|uid| json["result"][uid]["taxid"].as_u64())
        .and_then(|t| TaxId::try_from(t).ok())
}

fn gi_reference() -> &'static Regex {
    static GI_REF: OnceLock<Regex> = OnceLock::new();
    GI_REF.get_or_init(|| Regex::new(r"gi:(\d+)").expect("literal regex"))
}

/// Resolve an accession to a taxid, falling back to the replaced-by chain.
///
/// When the summary lookup comes back empty, the record itself may say it
/// superseded an older record ("... this sequence was replaced by
/// gi:NNNN"). Exactly one such reference is accepted; the summary lookup is
/// then repeated on the referenced identifier. No retries: any remaining
/// miss is simply "unresolved".
pub fn resolve_taxid(
    lookup: &mut dyn RecordLookup,
    acc: &str,
    db: &str,
) -> Result<Option<TaxId>, LookupError> {
    if let Some(taxid) = lookup.taxid_for_accession(acc, db)? {
        return Ok(Some(taxid));
    }

    let record = match lookup.fetch_record(acc, db)? {
        Some(text) => text,
        None => return Ok(None),
    };

    let refs: Vec<String> = record
        .lines()
        .filter(|line| line.contains("replace"))
        .filter_map(|line| {
            gi_reference()
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect();

    if refs.len() != 1 {
        log::debug!("{acc}: {} replaced-by references, not resolving", refs.len());
        return Ok(None);
    }
    lookup.taxid_for_accession(&refs[0], db)
}
