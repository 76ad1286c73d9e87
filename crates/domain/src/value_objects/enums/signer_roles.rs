use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Owner,
    Renter,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown signer role: {0}")]
pub struct UnknownSignerRole(pub String);

impl SignerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerRole::Owner => "owner",
            SignerRole::Renter => "renter",
        }
    }
}

impl Display for SignerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignerRole {
    type Err = UnknownSignerRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(SignerRole::Owner),
            "renter" => Ok(SignerRole::Renter),
            _ => Err(UnknownSignerRole(value.to_string())),
        }
    }
}
