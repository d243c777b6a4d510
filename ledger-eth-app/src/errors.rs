// SPDX-License-Identifier: Apache-2.0

//! Error types for Ethereum application

use ledger_device_base::LedgerAppError;
use thiserror::Error;

/// Ethereum application specific errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EthAppError<E: std::error::Error> {
    /// Error from the underlying transport/device
    #[error("Transport error: {0}")]
    Transport(#[from] LedgerAppError<E>),

    /// Invalid BIP32 derivation path
    #[error("Invalid BIP32 path: {0}")]
    InvalidBip32Path(String),

    /// Invalid Ethereum address format
    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),

    /// Invalid signature format
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Malformed EIP-712 typed data
    #[error("Invalid EIP-712 data: {0}")]
    InvalidEip712Data(String),

    /// Device rejected the operation
    #[error("Operation rejected by device")]
    UserRejected,

    /// Invalid response data from device
    #[error("Invalid response data: {0}")]
    InvalidResponseData(String),
}

impl<E: std::error::Error> EthAppError<E> {
    /// Check if error is due to user rejection
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, EthAppError::UserRejected)
    }

    /// Raw status word behind this error, if the device answered with one
    pub fn status_word(&self) -> Option<u16> {
        match self {
            EthAppError::Transport(e) => e.status_word(),
            EthAppError::UserRejected => Some(0x6985),
            _ => None,
        }
    }
}

/// Lift a device-level error, recognising an explicit refusal on the device
pub fn map_ledger_error<E: std::error::Error>(err: LedgerAppError<E>) -> EthAppError<E> {
    match err.status_word() {
        Some(0x6985) => EthAppError::UserRejected,
        _ => EthAppError::Transport(err),
    }
}

/// Result type alias for Ethereum application operations
pub type EthAppResult<T, E> = Result<T, EthAppError<E>>;
