// SPDX-License-Identifier: Apache-2.0

//! Core data types for Ethereum application

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::instructions::length;

const HARDENED: u32 = 0x8000_0000;

/// BIP32 derivation path for Ethereum accounts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BipPath {
    /// Derivation indices (max 10 levels)
    pub indices: Vec<u32>,
}

impl BipPath {
    /// Create a new BIP32 path from derivation indices
    pub fn new(indices: Vec<u32>) -> Result<Self, String> {
        if indices.len() > length::MAX_BIP32_PATH_DEPTH {
            return Err(format!(
                "BIP32 path too deep: {} (max {})",
                indices.len(),
                length::MAX_BIP32_PATH_DEPTH
            ));
        }
        Ok(BipPath { indices })
    }

    /// Create a standard Ethereum derivation path: m/44'/60'/account'/0/address_index
    pub fn ethereum_standard(account: u32, address_index: u32) -> Self {
        BipPath {
            indices: vec![
                0x8000002C,        // 44' (hardened)
                0x8000003C,        // 60' (hardened) - Ethereum
                HARDENED | account, // account' (hardened)
                0,                 // 0 (external chain)
                address_index,     // address index
            ],
        }
    }

    /// Get the encoded length for APDU
    pub fn encoded_len(&self) -> usize {
        1 + self.indices.len() * length::BIP32_INDEX_SIZE
    }
}

impl Default for BipPath {
    fn default() -> Self {
        BipPath::ethereum_standard(0, 0)
    }
}

/// Accepts `44'/60'/0'/0/0`, `m/44'/60'/0'/0/0` and `h` as hardened marker
impl FromStr for BipPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("m/")
            .or_else(|| trimmed.strip_prefix("M/"))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err("Empty derivation path".to_string());
        }

        let indices = body
            .split('/')
            .map(|segment| {
                let (digits, hardened) = match segment
                    .strip_suffix('\'')
                    .or_else(|| segment.strip_suffix('h'))
                {
                    Some(digits) => (digits, true),
                    None => (segment, false),
                };
                let index: u32 = digits
                    .parse()
                    .map_err(|_| format!("Invalid path segment `{}`", segment))?;
                if index >= HARDENED {
                    return Err(format!("Path index out of range `{}`", segment));
                }
                Ok(if hardened { index | HARDENED } else { index })
            })
            .collect::<Result<Vec<_>, String>>()?;

        BipPath::new(indices)
    }
}

impl fmt::Display for BipPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.indices {
            if *index >= HARDENED {
                write!(f, "/{}'", index - HARDENED)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

/// Ethereum address information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthAddress {
    /// ASCII-encoded Ethereum address (with 0x prefix)
    pub address: String,
}

impl EthAddress {
    /// `0x` followed by 40 hex digits, any case
    pub fn new(address: String) -> Result<Self, String> {
        let Some(digits) = address.strip_prefix("0x") else {
            return Err("Ethereum address must start with 0x".to_string());
        };
        if digits.len() != 40 {
            return Err(format!(
                "Ethereum address must be 42 characters long, got {}",
                address.len()
            ));
        }
        if let Some((i, c)) = digits.char_indices().find(|(_, c)| !c.is_ascii_hexdigit()) {
            return Err(format!("Invalid character '{}' at position {}", c, i + 2));
        }
        Ok(EthAddress { address })
    }

    /// Address as the app prints it: ASCII, with or without the `0x` prefix
    pub fn from_ascii(raw: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(raw).map_err(|_| "Invalid UTF-8 in address".to_string())?;
        if text.starts_with("0x") {
            EthAddress::new(text.to_string())
        } else {
            EthAddress::new(format!("0x{}", text))
        }
    }

    /// Get the address without 0x prefix
    pub fn without_prefix(&self) -> &str {
        &self.address[2..]
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Public key information returned from device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyInfo {
    /// Uncompressed public key (65 bytes)
    pub public_key: Vec<u8>,
    /// Ethereum address derived from public key
    pub address: EthAddress,
    /// Optional chain code (32 bytes) if requested
    pub chain_code: Option<Vec<u8>>,
}

/// Signature result from signing operations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Recovery value (27 or 28 for personal messages)
    pub v: u8,
    /// Signature component r (32 bytes)
    pub r: Vec<u8>,
    /// Signature component s (32 bytes)
    pub s: Vec<u8>,
}

impl Signature {
    /// Create a new signature from components
    pub fn new(v: u8, r: Vec<u8>, s: Vec<u8>) -> Result<Self, String> {
        if r.len() != length::SIGNATURE_COMPONENT_SIZE {
            return Err(format!("Invalid r length: {} (expected 32)", r.len()));
        }
        if s.len() != length::SIGNATURE_COMPONENT_SIZE {
            return Err(format!("Invalid s length: {} (expected 32)", s.len()));
        }
        Ok(Signature { v, r, s })
    }

    /// Parse the `v || r || s` layout every signing instruction answers with
    pub fn from_response(data: &[u8]) -> Result<Self, String> {
        if data.len() != length::SIGNATURE_RESPONSE_SIZE {
            return Err(format!(
                "Invalid signature response length: {} bytes (expected {})",
                data.len(),
                length::SIGNATURE_RESPONSE_SIZE
            ));
        }
        Signature::new(data[0], data[1..33].to_vec(), data[33..65].to_vec())
    }
}

/// Parameters for GET ETH PUBLIC ADDRESS command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetAddressParams {
    /// BIP32 derivation path
    pub path: BipPath,
    /// Whether to display address on device and require confirmation
    pub display: bool,
    /// Whether to return chain code
    pub return_chain_code: bool,
    /// Optional chain ID for validation
    pub chain_id: Option<u64>,
}

impl GetAddressParams {
    /// Create new parameters for getting an address
    pub fn new(path: BipPath) -> Self {
        GetAddressParams {
            path,
            display: false,
            return_chain_code: false,
            chain_id: None,
        }
    }

    /// Enable display and confirmation on device
    pub fn with_display(mut self) -> Self {
        self.display = true;
        self
    }

    /// Enable chain code return
    pub fn with_chain_code(mut self) -> Self {
        self.return_chain_code = true;
        self
    }

    /// Set chain ID for validation
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }
}

/// Parameters for SIGN ETH PERSONAL MESSAGE command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignMessageParams {
    /// BIP32 derivation path
    pub path: BipPath,
    /// Message data to sign
    pub message: Vec<u8>,
}

impl SignMessageParams {
    /// Create new parameters for signing a personal message
    pub fn new(path: BipPath, message: Vec<u8>) -> Self {
        SignMessageParams { path, message }
    }
}

/// Parameters for SIGN ETH EIP 712 in hashed mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignEip712Params {
    /// BIP32 derivation path
    pub path: BipPath,
    /// EIP-712 domain separator
    pub domain_hash: [u8; 32],
    /// hashStruct of the primary message
    pub message_hash: [u8; 32],
}

impl SignEip712Params {
    pub fn new(path: BipPath, domain_hash: [u8; 32], message_hash: [u8; 32]) -> Self {
        SignEip712Params {
            path,
            domain_hash,
            message_hash,
        }
    }
}
