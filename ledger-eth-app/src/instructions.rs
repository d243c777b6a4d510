// SPDX-License-Identifier: Apache-2.0

//! APDU instruction constants for Ethereum application

/// APDU instruction codes for Ethereum application
pub mod ins {
    /// GET ETH PUBLIC ADDRESS
    pub const GET_ETH_PUBLIC_ADDRESS: u8 = 0x02;
    /// SIGN ETH PERSONAL MESSAGE
    pub const SIGN_ETH_PERSONAL_MESSAGE: u8 = 0x08;
    /// SIGN ETH EIP 712
    pub const SIGN_ETH_EIP712: u8 = 0x0C;
}

/// P1 parameter constants for GET ETH PUBLIC ADDRESS
pub mod p1_get_address {
    /// Return address without confirmation
    pub const RETURN_ADDRESS: u8 = 0x00;
    /// Display address and confirm before returning
    pub const DISPLAY_AND_CONFIRM: u8 = 0x01;
}

/// P2 parameter constants for GET ETH PUBLIC ADDRESS
pub mod p2_get_address {
    /// Do not return the chain code
    pub const NO_CHAIN_CODE: u8 = 0x00;
    /// Return the chain code
    pub const RETURN_CHAIN_CODE: u8 = 0x01;
}

/// P1 parameter constants for SIGN ETH PERSONAL MESSAGE
pub mod p1_sign_message {
    /// First message data block
    pub const FIRST_DATA_BLOCK: u8 = 0x00;
    /// Subsequent message data block
    pub const SUBSEQUENT_DATA_BLOCK: u8 = 0x80;
}

/// P1 parameter constants for SIGN ETH EIP 712
pub mod p1_sign_eip712 {
    /// Single chunk
    pub const FIRST_CHUNK: u8 = 0x00;
}

/// P2 parameter constants for SIGN ETH EIP 712
pub mod p2_sign_eip712 {
    /// Hashed mode: domain separator and message hash are sent precomputed
    pub const V0_IMPLEMENTATION: u8 = 0x00;
}

/// Data length constants
pub mod length {
    /// Maximum BIP 32 derivation path depth
    pub const MAX_BIP32_PATH_DEPTH: usize = 10;
    /// Size of each BIP 32 derivation index
    pub const BIP32_INDEX_SIZE: usize = 4;
    /// Size of chain code
    pub const CHAIN_CODE_SIZE: usize = 32;
    /// Size of signature component (r or s)
    pub const SIGNATURE_COMPONENT_SIZE: usize = 32;
    /// Size of a full v || r || s signature answer
    pub const SIGNATURE_RESPONSE_SIZE: usize = 65;
    /// Maximum message chunk size for chunked operations
    pub const MAX_MESSAGE_CHUNK_SIZE: usize = 255;
    /// Size of the EIP-712 domain separator
    pub const EIP712_DOMAIN_HASH_SIZE: usize = 32;
    /// Size of the EIP-712 message hash
    pub const EIP712_MESSAGE_HASH_SIZE: usize = 32;
}
