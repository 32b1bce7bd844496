//! Shared export types: resources, API versions, and request scoping.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Exportable resource collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Advisories,
    Packages,
    Systems,
}

impl Resource {
    /// All resources, in registry order.
    pub const ALL: [Resource; 3] = [Resource::Advisories, Resource::Packages, Resource::Systems];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Advisories => "advisories",
            Resource::Packages => "packages",
            Resource::Systems => "systems",
        }
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown export resource '{s}'"))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API version supplied by the routing layer.
///
/// Parsed from a path segment such as `v3`; field sets are gated on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(u8);

impl ApiVersion {
    pub const V1: ApiVersion = ApiVersion(1);
    pub const V2: ApiVersion = ApiVersion(2);
    pub const V3: ApiVersion = ApiVersion(3);

    /// Newest version served.
    pub const LATEST: ApiVersion = ApiVersion::V3;

    pub fn new(version: u8) -> Option<Self> {
        (1..=Self::LATEST.0).contains(&version).then_some(Self(version))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        digits
            .parse::<u8>()
            .ok()
            .and_then(ApiVersion::new)
            .ok_or_else(|| format!("unsupported API version '{s}'"))
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inventory groups visible to the caller, keyed by group id.
///
/// An empty map means the caller is not restricted to any group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryGroups(BTreeMap<String, String>);

impl InventoryGroups {
    pub fn new(groups: BTreeMap<String, String>) -> Self {
        Self(groups)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    /// Group ids in stable order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Caller identity resolved by the surrounding middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub account_id: i32,
    pub groups: InventoryGroups,
}
