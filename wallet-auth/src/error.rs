// SPDX-License-Identifier: Apache-2.0

//! Caller-facing errors

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure categories every fault is mapped into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    DeviceNotFound,
    UserRejected,
    DeviceLocked,
    AppNotOpen,
    TransportError,
    Timeout,
    /// The host cannot reach HID devices at all
    UnsupportedEnvironment,
    InvalidSignature,
    MalformedResponse,
    Unknown,
}

impl ErrorCategory {
    /// What the user should do next
    pub fn guidance(&self) -> &'static str {
        match self {
            ErrorCategory::DeviceNotFound => {
                "No Ledger device found. Connect it over USB, unlock it and try again."
            }
            ErrorCategory::UserRejected => "The request was rejected. Try again and approve it.",
            ErrorCategory::DeviceLocked => "Your Ledger is locked. Enter your PIN and try again.",
            ErrorCategory::AppNotOpen => {
                "Open the Ethereum app on your Ledger and try again."
            }
            ErrorCategory::TransportError => {
                "Lost the connection to the device. Reconnect it, close Ledger Live and other wallet apps, then retry."
            }
            ErrorCategory::Timeout => {
                "The device did not answer in time. Check the device screen, reconnect it and try again."
            }
            ErrorCategory::UnsupportedEnvironment => {
                "This environment cannot access USB devices. Use a supported browser or host."
            }
            ErrorCategory::InvalidSignature => {
                "The signature does not match the address. Sign in again."
            }
            ErrorCategory::MalformedResponse => {
                "The device returned an unexpected answer. Update the Ethereum app and retry."
            }
            ErrorCategory::Unknown => "Something went wrong. Reconnect your wallet and try again.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A classified failure with a plain-language message
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{category}: {message}")]
pub struct AuthError {
    pub category: ErrorCategory,
    pub message: String,
}

impl AuthError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        AuthError {
            category,
            message: message.into(),
        }
    }

    /// An error carrying only the category's own guidance
    pub fn from_category(category: ErrorCategory) -> Self {
        AuthError::new(category, category.guidance())
    }

    pub fn is_timeout(&self) -> bool {
        self.category == ErrorCategory::Timeout
    }

    /// Whether the hardware session should be dropped after this error.
    ///
    /// A timed-out command may still be waiting for its answer on the device, so the
    /// channel cannot be trusted for the next command.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::TransportError | ErrorCategory::DeviceNotFound | ErrorCategory::Timeout
        )
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
