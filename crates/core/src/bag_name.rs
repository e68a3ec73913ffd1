//! Preservation bag naming conventions.
//!
//! Bags are named `DSID[.VERSION].mbagMM_NN-SEQ[.EXT]`, where `VERSION` uses
//! underscores in place of dots (`1_2_0`), `MM_NN` is the multibag profile
//! version and `SEQ` is a sequence number that increases with every bag
//! produced for the dataset.

use crate::error::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static UNVERSIONED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w-]+)\.mbag(\d+_\d+)-(\d+)(\..*)?$").expect("valid bag name pattern")
});

static VERSIONED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w-]+)\.(\d+(?:_\d+)*)\.mbag(\d+_\d+)-(\d+)(\..*)?$")
        .expect("valid bag name pattern")
});

/// The fields encoded in a bag name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BagName {
    pub dataset: String,
    /// Underscore-delimited version; empty for unversioned names.
    pub version: String,
    /// Underscore-delimited multibag profile version (e.g. `0_4`).
    pub multibag_version: String,
    pub sequence: String,
    /// Serialization extension without the leading dot; empty if none.
    pub extension: String,
}

impl BagName {
    /// Dotted form of the version, `"1"` for unversioned bags.
    pub fn dotted_version(&self) -> String {
        if self.version.is_empty() {
            "1".to_string()
        } else {
            self.version.replace('_', ".")
        }
    }

    fn sequence_number(&self) -> Option<u64> {
        self.sequence.parse().ok()
    }
}

/// Parse a bag (file) name into its fields.
pub fn parse_bag_name(name: &str) -> Result<BagName> {
    if let Some(caps) = UNVERSIONED_RE.captures(name) {
        return Ok(BagName {
            dataset: caps[1].to_string(),
            version: String::new(),
            multibag_version: caps[2].to_string(),
            sequence: caps[3].to_string(),
            extension: trim_ext(caps.get(4).map(|m| m.as_str())),
        });
    }
    if let Some(caps) = VERSIONED_RE.captures(name) {
        return Ok(BagName {
            dataset: caps[1].to_string(),
            version: caps[2].to_string(),
            multibag_version: caps[3].to_string(),
            sequence: caps[4].to_string(),
            extension: trim_ext(caps.get(5).map(|m| m.as_str())),
        });
    }
    Err(Error::InvalidBagName(name.to_string()))
}

fn trim_ext(ext: Option<&str>) -> String {
    ext.map(|e| e.trim_start_matches('.').to_string())
        .unwrap_or_default()
}

pub fn is_legal_bag_name(name: &str) -> bool {
    UNVERSIONED_RE.is_match(name) || VERSIONED_RE.is_match(name)
}

/// Dotted multibag profile version of a bag, or an empty string if the name
/// cannot be parsed.
pub fn multibag_version_of(name: &str) -> String {
    parse_bag_name(name)
        .map(|b| b.multibag_version.replace('_', "."))
        .unwrap_or_default()
}

/// Compare two version strings field by field (`.` or `_` delimited).
///
/// Non-numeric fields compare as zero; trailing zero fields are insignificant
/// so `1.2` equals `1.2.0`.
pub fn compare_versions(v1: &str, v2: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        if s.is_empty() {
            return Vec::new();
        }
        s.split(['.', '_'])
            .map(|f| f.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (f1, f2) = (parse(v1), parse(v2));
    let n = f1.len().max(f2.len());
    for i in 0..n {
        let a = f1.get(i).copied().unwrap_or(0);
        let b = f2.get(i).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Order bag names: dataset, then sequence number, then version, then
/// multibag profile version, then the raw name.
pub fn compare_bag_names(n1: &BagName, raw1: &str, n2: &BagName, raw2: &str) -> Ordering {
    n1.dataset
        .cmp(&n2.dataset)
        .then_with(|| match (n1.sequence_number(), n2.sequence_number()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        })
        .then_with(|| compare_versions(&n1.version, &n2.version))
        .then_with(|| compare_versions(&n1.multibag_version, &n2.multibag_version))
        .then_with(|| raw1.cmp(raw2))
}

/// Select the most recent head bag from a list of bag names.
///
/// Names that are not legal bag names are ignored.
pub fn find_latest_head_bag<S: AsRef<str>>(names: &[S]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| parse_bag_name(n.as_ref()).ok().map(|p| (p, n.as_ref())))
        .max_by(|(p1, r1), (p2, r2)| compare_bag_names(p1, r1, p2, r2))
        .map(|(_, raw)| raw.to_string())
}

/// Select the bags that belong to a particular dataset version.
///
/// Versions `0` and `1` also match bags carrying no version. If nothing
/// matches and the version ends in `.0`, the trailing field is dropped and
/// the match retried.
pub fn select_version<S: AsRef<str>>(names: &[S], version: &str) -> Vec<String> {
    let mut version = version.replace('.', "_");
    if version == "0" || version == "1" {
        let out = select_exact(names, "");
        if !out.is_empty() {
            return out;
        }
    }
    loop {
        let out = select_exact(names, &version);
        if !out.is_empty() || !version.ends_with("_0") {
            return out;
        }
        version.truncate(version.len() - 2);
    }
}

fn select_exact<S: AsRef<str>>(names: &[S], version: &str) -> Vec<String> {
    names
        .iter()
        .map(|n| n.as_ref())
        .filter(|n| matches!(parse_bag_name(n), Ok(p) if p.version == version))
        .map(str::to_string)
        .collect()
}
