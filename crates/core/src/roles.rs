//! Volume roles and status levels.
//!
//! A volume advertises the kinds of objects it is meant to hold through a
//! [`CacheRoles`] set, and gates which operations are allowed on it through
//! its [`VolumeStatus`].

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Operational status of a cache volume.
///
/// Levels are ordered: a volume at a given level permits every operation
/// of the levels below it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    /// Not usable at all.
    Disabled,
    /// Contents may be described but not read.
    InfoOnly,
    /// Objects may be read.
    Get,
    /// Objects may be read, added and evicted.
    #[default]
    Update,
}

impl VolumeStatus {
    /// Integer form stored in the inventory.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Disabled => 0,
            Self::InfoOnly => 1,
            Self::Get => 2,
            Self::Update => 3,
        }
    }

    /// Parse the stored integer form.
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::InfoOnly),
            2 => Ok(Self::Get),
            3 => Ok(Self::Update),
            other => Err(Error::InvalidStatus(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::InfoOnly => "info_only",
            Self::Get => "get",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of roles a volume serves, or that a caller prefers for an object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CacheRoles {
    pub general: bool,
    pub fast: bool,
    pub small: bool,
    pub large: bool,
    pub old_versions: bool,
    pub restricted: bool,
    pub old_restricted: bool,
}

/// Role names paired with their legacy numeric weight, in canonical order.
const ROLE_TABLE: [(&str, u32); 7] = [
    ("general", 1),
    ("fast", 2),
    ("small", 4),
    ("large", 8),
    ("old_versions", 16),
    ("restricted", 32),
    ("old_restricted", 64),
];

impl CacheRoles {
    pub const NONE: CacheRoles = CacheRoles {
        general: false,
        fast: false,
        small: false,
        large: false,
        old_versions: false,
        restricted: false,
        old_restricted: false,
    };

    pub const GENERAL: CacheRoles = CacheRoles {
        general: true,
        ..Self::NONE
    };

    pub const FAST: CacheRoles = CacheRoles {
        fast: true,
        ..Self::NONE
    };

    pub const SMALL: CacheRoles = CacheRoles {
        small: true,
        ..Self::NONE
    };

    pub const LARGE: CacheRoles = CacheRoles {
        large: true,
        ..Self::NONE
    };

    pub const OLD_VERSIONS: CacheRoles = CacheRoles {
        old_versions: true,
        ..Self::NONE
    };

    pub const RESTRICTED: CacheRoles = CacheRoles {
        restricted: true,
        ..Self::NONE
    };

    pub const OLD_RESTRICTED: CacheRoles = CacheRoles {
        old_restricted: true,
        ..Self::NONE
    };

    fn flags(&self) -> [bool; 7] {
        [
            self.general,
            self.fast,
            self.small,
            self.large,
            self.old_versions,
            self.restricted,
            self.old_restricted,
        ]
    }

    fn from_flags(flags: [bool; 7]) -> Self {
        Self {
            general: flags[0],
            fast: flags[1],
            small: flags[2],
            large: flags[3],
            old_versions: flags[4],
            restricted: flags[5],
            old_restricted: flags[6],
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    /// True if the two sets share at least one role.
    pub fn intersects(&self, other: &CacheRoles) -> bool {
        self.flags()
            .iter()
            .zip(other.flags().iter())
            .any(|(a, b)| *a && *b)
    }

    pub fn union(&self, other: &CacheRoles) -> CacheRoles {
        let (a, b) = (self.flags(), other.flags());
        let mut out = [false; 7];
        for i in 0..7 {
            out[i] = a[i] || b[i];
        }
        Self::from_flags(out)
    }

    /// True if objects with these roles belong to a superseded version.
    pub fn is_versioned(&self) -> bool {
        self.old_versions || self.old_restricted
    }

    /// Role names present in this set, in canonical order.
    pub fn names(&self) -> Vec<&'static str> {
        self.flags()
            .iter()
            .zip(ROLE_TABLE.iter())
            .filter(|(set, _)| **set)
            .map(|(_, (name, _))| *name)
            .collect()
    }

    /// Build a role set from role names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut flags = [false; 7];
        for name in names {
            let name = name.as_ref();
            let idx = ROLE_TABLE
                .iter()
                .position(|(n, _)| *n == name)
                .ok_or_else(|| Error::InvalidRole(name.to_string()))?;
            flags[idx] = true;
        }
        Ok(Self::from_flags(flags))
    }

    /// Numeric encoding used by the persisted caching-queue format.
    pub fn to_bits(&self) -> u32 {
        self.flags()
            .iter()
            .zip(ROLE_TABLE.iter())
            .filter(|(set, _)| **set)
            .map(|(_, (_, bit))| *bit)
            .sum()
    }

    /// Decode the numeric queue-file encoding; unknown bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        let mut flags = [false; 7];
        for (i, (_, bit)) in ROLE_TABLE.iter().enumerate() {
            flags[i] = bits & bit != 0;
        }
        Self::from_flags(flags)
    }
}

impl fmt::Display for CacheRoles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("+"))
    }
}

impl Serialize for CacheRoles {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CacheRoles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        CacheRoles::from_names(&names).map_err(serde::de::Error::custom)
    }
}
