//src/store.rs
//
// Pipeline-edge object storage: locator parsing plus a narrow put/get
// interface. The core never touches this during aggregation.

use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::HitTable;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("'{0}' is not a store locator (expected scheme://container/path)")]
    BadLocator(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Split an `s3://bucket/some/path` locator into ("bucket", "some/path").
///
/// The scheme prefix is optional and duplicate separators are collapsed,
/// so `/bucket//a//b` parses the same as `s3://bucket/a/b`.
pub fn parse_locator(locator: &str) -> Result<(String, String), StoreError> {
    let rest = match locator.find("://") {
        Some(pos) => &locator[pos + 3..],
        None => locator,
    };
    let mut parts = rest.split('/').filter(|s| !s.is_empty());
    let container = parts.next().unwrap_or("").to_string();
    let path = parts.collect::<Vec<_>>().join("/");
    if container.is_empty() || path.is_empty() {
        return Err(StoreError::BadLocator(locator.to_string()));
    }
    Ok((container, path))
}

/// Narrow remote-store interface the pipeline edges use: upload a table as
/// tab-delimited text, or open a readable stream for a stored object.
pub trait ObjectStore {
    fn put_table(&self, table: &HitTable, locator: &str) -> Result<(), StoreError>;
    fn get(&self, locator: &str) -> Result<Box<dyn Read>, StoreError>;
}

/// Filesystem-backed store: `container/path` mapped under a root directory.
/// Used for local runs and tests.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, locator: &str) -> Result<PathBuf, StoreError> {
        let (container, path) = parse_locator(locator)?;
        Ok(self.root.join(container).join(path))
    }
}

impl ObjectStore for LocalStore {
    fn put_table(&self, table: &HitTable, locator: &str) -> Result<(), StoreError> {
        let path = self.object_path(locator)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, table.to_tsv())?;
        log::info!("wrote {} row(s) to {}", table.len(), path.display());
        Ok(())
    }

    fn get(&self, locator: &str) -> Result<Box<dyn Read>, StoreError> {
        let path = self.object_path(locator)?;
        Ok(Box::new(File::open(path)?))
    }
}
