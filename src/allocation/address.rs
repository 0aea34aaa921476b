//! Blockchain address type

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::TimelineError;

/// A 20-byte EVM address, stored as lowercase `0x`-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EthAddress(String);

impl EthAddress {
    pub fn parse(value: &str) -> Result<Self, TimelineError> {
        let trimmed = value.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| TimelineError::InvalidInput(format!("Address missing 0x prefix: {value}")))?;

        if hex_part.len() != 40 {
            return Err(TimelineError::InvalidInput(format!(
                "Address must be 20 bytes: {value}"
            )));
        }

        hex::decode(hex_part)
            .map_err(|e| TimelineError::InvalidInput(format!("Invalid address {value}: {e}")))?;

        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EthAddress {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EthAddress {
    type Error = TimelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EthAddress> for String {
    fn from(address: EthAddress) -> Self {
        address.0
    }
}
