use thiserror::Error;

/// Errors shared by every Ledger application client
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum LedgerAppError<E: std::error::Error> {
    /// Invalid empty message
    #[error("message cannot be empty")]
    InvalidEmptyMessage,
    /// Invalid payload type in chunk
    #[error("The chunk payload type was invalid. First message should be Init")]
    InvalidChunkPayloadType,
    /// Message size is invalid (too big)
    #[error("message size is invalid (too big)")]
    InvalidMessageSize,
    /// The device answered without the expected signature payload
    #[error("no signature returned by the device")]
    NoSignature,
    /// Utf8 conversion error
    #[error("Utf8 conversion error")]
    Utf8,
    /// Response format ID not recognized
    #[error("response format ID not recognized")]
    InvalidFormatID,
    /// Application name too long to be sent in one APDU
    #[error("application name `{0}` is invalid")]
    InvalidAppName(String),
    /// Transport error
    #[error("Ledger | {0}")]
    TransportError(#[from] E),
    /// Status word reported by the device
    #[error("App Error: | {0:#06x} {1}")]
    AppSpecific(u16, String),
    /// Unknown status word
    #[error("Unknown error: {0:#06x}")]
    Unknown(u16),
}

impl<E: std::error::Error> LedgerAppError<E> {
    /// Raw status word carried by this error, if the device produced one
    pub fn status_word(&self) -> Option<u16> {
        match self {
            LedgerAppError::AppSpecific(code, _) | LedgerAppError::Unknown(code) => Some(*code),
            _ => None,
        }
    }
}
