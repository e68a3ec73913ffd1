//! Data object identifiers of the form `dataset[/filepath][#version]`.

use crate::error::{Error, Result};
use std::fmt;

/// A parsed data object identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub dataset: String,
    pub filepath: Option<String>,
    pub version: Option<String>,
}

impl ObjectId {
    /// Split an identifier on the first `#`, then the head on the first `/`.
    ///
    /// Empty filepath or version parts are treated as absent.
    pub fn parse(id: &str) -> Result<Self> {
        let (head, version) = match id.split_once('#') {
            Some((head, version)) => (head, Some(version)),
            None => (id, None),
        };
        let (dataset, filepath) = match head.split_once('/') {
            Some((dataset, filepath)) => (dataset, Some(filepath)),
            None => (head, None),
        };
        if dataset.is_empty() {
            return Err(Error::InvalidId(id.to_string()));
        }
        Ok(Self {
            dataset: dataset.to_string(),
            filepath: filepath.filter(|f| !f.is_empty()).map(str::to_string),
            version: version.filter(|v| !v.is_empty()).map(str::to_string),
        })
    }

    /// Identifier of a file within a dataset, optionally pinned to a version.
    pub fn file(dataset: &str, filepath: &str, version: Option<&str>) -> Self {
        Self {
            dataset: dataset.to_string(),
            filepath: Some(filepath.to_string()),
            version: version.map(str::to_string),
        }
    }

    /// True if this identifies a whole dataset rather than one file.
    pub fn is_dataset(&self) -> bool {
        self.filepath.is_none()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dataset)?;
        if let Some(fp) = &self.filepath {
            write!(f, "/{fp}")?;
        }
        if let Some(v) = &self.version {
            write!(f, "#{v}")?;
        }
        Ok(())
    }
}
