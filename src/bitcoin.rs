//! Bitcoin address validation and address-file loading.
//!
//! Accepts the three mainnet encodings the lookup service understands:
//! legacy P2PKH (`1…`), P2SH (`3…`) and bech32 segwit (`bc1…`).
//! Validation is purely syntactic; no checksum is verified.

use crate::schemas::ValidationError;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Base58 addresses: version prefix followed by 25-34 base58 characters
/// (no `0`, `O`, `I` or `l`).
static BASE58_ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("Invalid regex pattern")
});

/// Bech32 addresses: `bc1` followed by 39-59 lowercase alphanumerics
static BECH32_ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bc1[0-9a-z]{39,59}$").expect("Invalid regex pattern")
});

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid address format: {0:?}")]
    InvalidFormat(String),

    #[error("Failed to read address list: {0}")]
    Io(#[from] std::io::Error),
}

/// Address encoding, derived from the prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressKind {
    /// Pay-to-pubkey-hash, `1…`
    P2pkh,
    /// Pay-to-script-hash, `3…`
    P2sh,
    /// Native segwit, `bc1…`
    Bech32,
}

impl AddressKind {
    /// Classify a token, returning `None` when it matches no accepted pattern
    pub fn classify(token: &str) -> Option<Self> {
        if BECH32_ADDRESS_PATTERN.is_match(token) {
            Some(Self::Bech32)
        } else if BASE58_ADDRESS_PATTERN.is_match(token) {
            if token.starts_with('1') {
                Some(Self::P2pkh)
            } else {
                Some(Self::P2sh)
            }
        } else {
            None
        }
    }
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressKind::P2pkh => write!(f, "p2pkh"),
            AddressKind::P2sh => write!(f, "p2sh"),
            AddressKind::Bech32 => write!(f, "bech32"),
        }
    }
}

/// Returns true when `token` is a syntactically valid mainnet address.
///
/// Never fails. Surrounding whitespace is not stripped here; callers
/// trim before validating.
pub fn is_valid_address(token: &str) -> bool {
    AddressKind::classify(token).is_some()
}

/// Address that passed format validation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedAddress {
    value: String,
    kind: AddressKind,
}

impl ValidatedAddress {
    /// Parse and validate an address token (no trimming)
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let kind = AddressKind::classify(input)
            .ok_or_else(|| AddressError::InvalidFormat(input.to_string()))?;
        Ok(Self {
            value: input.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }
}

impl std::fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Result of loading an address list
#[derive(Debug, Default)]
pub struct LoadedAddresses {
    /// Valid addresses in file order, duplicates kept
    pub addresses: Vec<ValidatedAddress>,
    /// Lines that failed validation
    pub rejected: Vec<ValidationError>,
    /// Total lines read, blank ones included
    pub lines_read: usize,
}

impl LoadedAddresses {
    /// Number of valid addresses per encoding
    pub fn kind_counts(&self) -> BTreeMap<AddressKind, usize> {
        let mut counts = BTreeMap::new();
        for address in &self.addresses {
            *counts.entry(address.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Read one address per line, dropping blank lines and invalid tokens.
pub fn load_addresses<R: BufRead>(reader: R) -> Result<LoadedAddresses, AddressError> {
    let mut loaded = LoadedAddresses::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = idx + 1;
        loaded.lines_read = line_number;

        let token = line.trim();
        if token.is_empty() {
            debug!("Skipping blank line {}", line_number);
            continue;
        }

        match ValidatedAddress::parse(token) {
            Ok(address) => loaded.addresses.push(address),
            Err(_) => {
                warn!("Invalid BTC address on line {}: {}", line_number, token);
                loaded.rejected.push(ValidationError {
                    line_number,
                    token: token.to_string(),
                });
            }
        }
    }

    Ok(loaded)
}

/// Open `path` and load its addresses
pub fn load_address_file(path: &Path) -> Result<LoadedAddresses, AddressError> {
    let file = std::fs::File::open(path)?;
    load_addresses(std::io::BufReader::new(file))
}
