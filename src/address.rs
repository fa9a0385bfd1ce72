//! On-chain account and contract addresses.
//!
//! The address type is alloy's. Its `Display` renders the EIP-55 checksum
//! form, which is also what the checkpoint documents store, so they never
//! contain two spellings of the same contract.

use thiserror::Error;

pub use alloy::primitives::Address;

/// Errors produced while parsing an address string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address '{0}' must start with 0x")]
    MissingPrefix(String),

    #[error("Address '{0}' must be 40 hex characters after 0x")]
    InvalidLength(String),

    #[error("Address '{0}' contains non-hex characters")]
    InvalidHex(String),

    #[error("Address '{input}' fails its checksum (expected {expected})")]
    BadChecksum { input: String, expected: String },
}

/// Parse an address, accepting all-lowercase or all-uppercase hex as well
/// as correctly checksummed mixed case. Mixed case with a wrong checksum is
/// rejected.
pub fn parse_address(s: &str) -> Result<Address, AddressError> {
    let trimmed = s.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| AddressError::MissingPrefix(s.to_string()))?;

    if body.len() != 40 {
        return Err(AddressError::InvalidLength(s.to_string()));
    }

    let address: Address = body
        .parse()
        .map_err(|_| AddressError::InvalidHex(s.to_string()))?;

    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let expected = address.to_checksum(None);
        if expected[2..] != *body {
            return Err(AddressError::BadChecksum {
                input: s.to_string(),
                expected,
            });
        }
    }

    Ok(address)
}
