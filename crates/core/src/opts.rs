//! Options attached to a caching request.
//!
//! Serialized into the caching-queue file as a comma-delimited list:
//! `re=0|1[,seq=<s>][,pr=<n>]`.

use crate::error::{Error, Result};
use crate::roles::CacheRoles;
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheOpts {
    /// Re-fetch even if already cached.
    pub recache: bool,
    /// Explicit role preference overriding the restorer's default.
    pub prefs: Option<CacheRoles>,
    /// Sequence (target prefix) the objects should be cached under.
    pub seq: Option<String>,
}

impl CacheOpts {
    pub fn recache(recache: bool) -> Self {
        Self {
            recache,
            ..Default::default()
        }
    }

    /// Parse the serialized form; `None`, empty and `"0"` give defaults and a
    /// bare `"1"` sets `recache`.
    pub fn parse(s: Option<&str>) -> Result<Self> {
        let s = match s.map(str::trim) {
            None | Some("") | Some("0") => return Ok(Self::default()),
            Some("1") => return Ok(Self::recache(true)),
            Some(s) => s,
        };

        let mut out = Self::default();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| Error::InvalidOptions(format!("missing value: {item}")))?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                return Err(Error::InvalidOptions(format!("missing key: {item}")));
            }
            if "recache".starts_with(key) {
                out.recache = match value {
                    "0" | "false" => false,
                    "1" | "true" => true,
                    other => {
                        return Err(Error::InvalidOptions(format!(
                            "bad recache value: {other}"
                        )));
                    }
                };
            } else if "sequence".starts_with(key) {
                out.seq = Some(value.to_string()).filter(|v| !v.is_empty());
            } else if "prefs".starts_with(key) {
                let bits: u32 = value
                    .parse()
                    .map_err(|_| Error::InvalidOptions(format!("bad prefs value: {value}")))?;
                out.prefs = Some(CacheRoles::from_bits(bits)).filter(|r| !r.is_empty());
            } else {
                return Err(Error::InvalidOptions(format!("unknown option: {key}")));
            }
        }
        Ok(out)
    }

    /// Serialized queue-file form.
    pub fn serialize(&self) -> String {
        let mut out = format!("re={}", if self.recache { 1 } else { 0 });
        if let Some(seq) = &self.seq {
            out.push_str(",seq=");
            out.push_str(seq);
        }
        if let Some(prefs) = &self.prefs {
            out.push_str(&format!(",pr={}", prefs.to_bits()));
        }
        out
    }
}

impl fmt::Display for CacheOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
