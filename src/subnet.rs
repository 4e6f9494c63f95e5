// Closed set of known subnets; every request re-validates against it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ApiError;

/// A logical partition identifying which distributed network a check pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subnet {
    Walrus,
    Arweave,
    Allsyn,
}

impl Subnet {
    /// Canonical lowercase name, used as the storage column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subnet::Walrus => "walrus",
            Subnet::Arweave => "arweave",
            Subnet::Allsyn => "allsyn",
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subnet {
    type Err = ApiError;

    /// Case-insensitive match against the known set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "walrus" => Ok(Subnet::Walrus),
            "arweave" => Ok(Subnet::Arweave),
            "allsyn" => Ok(Subnet::Allsyn),
            _ => Err(ApiError::InvalidInput(format!("unknown subnet: {s}"))),
        }
    }
}
