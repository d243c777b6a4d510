// SPDX-License-Identifier: Apache-2.0

//! Map raw device and transport faults into [`ErrorCategory`] values.
//!
//! Faults reach this module in whatever shape the lower layers produced: a tagged
//! error, a bare status word, free text, untyped JSON, or an arbitrary error chain.
//! Extraction never trusts field presence and never panics.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use ledger_device_base::LedgerAppError;
use ledger_eth_app::EthAppError;
use serde_json::Value;

use crate::error::{AuthError, ErrorCategory};

const MAX_DEPTH: usize = 8;
const GENERIC_FAILURE: &str = "unknown device/connection failure";

/// A fault as reported by a device, transport or wallet
#[derive(Clone, Debug)]
pub enum DeviceFault {
    /// An error with a recognizable name, e.g. `TransportStatusError`
    Tagged {
        tag: String,
        message: String,
        status_code: Option<u16>,
    },
    StatusWord(u16),
    Message(String),
    /// Untyped payload, e.g. an error object handed over by a wallet
    Opaque(Value),
    Other(Arc<dyn StdError + Send + Sync>),
}

impl DeviceFault {
    pub fn tagged(tag: impl Into<String>, message: impl Into<String>) -> Self {
        DeviceFault::Tagged {
            tag: tag.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        DeviceFault::Message(message.into())
    }

    pub fn other<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        DeviceFault::Other(Arc::new(err))
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match extract_message(self) {
            Some(message) => f.write_str(&message),
            None => f.write_str(GENERIC_FAILURE),
        }
    }
}

impl<E: StdError> From<LedgerAppError<E>> for DeviceFault {
    fn from(err: LedgerAppError<E>) -> Self {
        match err.status_word() {
            Some(code) => DeviceFault::Tagged {
                tag: "TransportStatusError".to_string(),
                message: err.to_string(),
                status_code: Some(code),
            },
            None => match err {
                // keep only the transport's own text so phrase matching sees it
                LedgerAppError::TransportError(inner) => DeviceFault::Message(inner.to_string()),
                LedgerAppError::NoSignature => DeviceFault::Message(err.to_string()),
                other => DeviceFault::tagged("MalformedResponse", other.to_string()),
            },
        }
    }
}

impl<E: StdError> From<EthAppError<E>> for DeviceFault {
    fn from(err: EthAppError<E>) -> Self {
        match err {
            EthAppError::Transport(inner) => inner.into(),
            EthAppError::UserRejected => DeviceFault::Tagged {
                tag: "UserRejected".to_string(),
                message: err.to_string(),
                status_code: Some(0x6985),
            },
            EthAppError::InvalidSignature(_) | EthAppError::InvalidResponseData(_) => {
                DeviceFault::tagged("MalformedResponse", err.to_string())
            }
            other => DeviceFault::Message(other.to_string()),
        }
    }
}

/// Classify a fault. The returned message is never empty and never a bare `{}`.
pub fn classify(fault: &DeviceFault) -> AuthError {
    let extracted = extract_message(fault);

    let by_tag = match fault {
        DeviceFault::Tagged {
            tag, status_code, ..
        } => classify_tag(tag, *status_code),
        DeviceFault::StatusWord(code) => Some(classify_status_word(*code)),
        DeviceFault::Opaque(value) => opaque_tag(value, 0),
        _ => None,
    };
    if let Some(error) = by_tag {
        return error;
    }

    match extracted {
        Some(message) => match classify_phrase(&message) {
            Some(error) => error,
            None => AuthError::new(ErrorCategory::Unknown, format!("device error: {}", message)),
        },
        None => AuthError::new(ErrorCategory::Unknown, GENERIC_FAILURE),
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn classify_tag(tag: &str, status_code: Option<u16>) -> Option<AuthError> {
    let error = match normalize_tag(tag).as_str() {
        "transportstatuserror" | "invalidstatusword" | "statusword" => {
            return status_code.map(classify_status_word);
        }
        "userrejected" | "userrefusedondevice" | "userrejectedrequesterror" => {
            AuthError::new(
                ErrorCategory::UserRejected,
                "The request was rejected on the device. Approve it to continue.",
            )
        }
        "lockeddevice" | "lockeddeviceerror" | "devicelocked" => {
            AuthError::from_category(ErrorCategory::DeviceLocked)
        }
        "devicenotfound" | "nodevicefound" | "transportnodevice" => {
            AuthError::from_category(ErrorCategory::DeviceNotFound)
        }
        "transporterror" | "transportopenusercancelled" | "disconnecteddevice" => {
            AuthError::from_category(ErrorCategory::TransportError)
        }
        "timeout" | "timeouterror" => AuthError::from_category(ErrorCategory::Timeout),
        "malformedresponse" => AuthError::from_category(ErrorCategory::MalformedResponse),
        "unsupportedenvironment" | "transportinterfacenotavailable" => {
            AuthError::from_category(ErrorCategory::UnsupportedEnvironment)
        }
        _ => return None,
    };
    Some(error)
}

fn classify_status_word(code: u16) -> AuthError {
    match code {
        0x5515 | 0x6982 => AuthError::new(
            ErrorCategory::DeviceLocked,
            "Your Ledger is locked. Enter your PIN on the device and try again.",
        ),
        0x6985 | 0x5501 => AuthError::new(
            ErrorCategory::UserRejected,
            "The request was rejected on the device. Approve it to continue.",
        ),
        0x6511 | 0x6e00 | 0x6d00 | 0x6807 => AuthError::new(
            ErrorCategory::AppNotOpen,
            "Open the Ethereum app on your Ledger (install it from Ledger Live if missing) and try again.",
        ),
        0x6a80 => AuthError::new(
            ErrorCategory::MalformedResponse,
            "The Ethereum app refused the data. Enable blind signing in the app settings and retry.",
        ),
        other => AuthError::new(
            ErrorCategory::TransportError,
            format!(
                "The device answered with status {:#06x}. Reconnect it and try again.",
                other
            ),
        ),
    }
}

fn classify_phrase(message: &str) -> Option<AuthError> {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);
    // "locked" but not "unlocked"
    let has_word = |prefix: &str| {
        lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word.starts_with(prefix))
    };

    let error = if has("cannot open device") {
        AuthError::new(
            ErrorCategory::TransportError,
            "The device is busy. Close Ledger Live or any other wallet app using it, then retry.",
        )
    } else if has("timeout") || has("timed out") {
        AuthError::from_category(ErrorCategory::Timeout)
    } else if has("denied by user") || has("rejected") || has("refused") {
        AuthError::new(
            ErrorCategory::UserRejected,
            "The request was rejected. Try again and approve it.",
        )
    } else if has("webhid") || has("hidapi") || has("not supported on this platform") {
        AuthError::from_category(ErrorCategory::UnsupportedEnvironment)
    } else if has("not connected") || has("disconnected") {
        AuthError::new(
            ErrorCategory::TransportError,
            "The device is not connected. Plug it in, unlock it and reconnect.",
        )
    } else if has("app not open")
        || has("app does not seem to be open")
        || has("app is not open")
    {
        AuthError::from_category(ErrorCategory::AppNotOpen)
    } else if has_word("locked") {
        AuthError::from_category(ErrorCategory::DeviceLocked)
    } else if has("no signature returned") {
        AuthError::new(
            ErrorCategory::MalformedResponse,
            "The device did not return a signature. Try signing again.",
        )
    } else if has("device not found") || has("no device") {
        AuthError::from_category(ErrorCategory::DeviceNotFound)
    } else {
        return None;
    };
    Some(error)
}

/// Best-effort message for a fault, `None` when nothing meaningful is available
fn extract_message(fault: &DeviceFault) -> Option<String> {
    match fault {
        DeviceFault::Tagged { tag, message, .. } => {
            meaningful(message).or_else(|| meaningful(tag))
        }
        DeviceFault::StatusWord(code) => Some(format!("status word {:#06x}", code)),
        DeviceFault::Message(message) => meaningful(message),
        DeviceFault::Opaque(value) => opaque_message(value, 0),
        DeviceFault::Other(err) => chain_message(err.as_ref()),
    }
}

fn meaningful(text: &str) -> Option<String> {
    let trimmed = text.trim();
    match trimmed {
        "" | "{}" | "[]" | "null" | "undefined" | "[object Object]" => None,
        _ => Some(trimmed.to_string()),
    }
}

/// Walk `source()` links, stopping at the depth bound or when a link repeats
fn chain_message(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut seen = HashSet::new();
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    let mut depth = 0;

    while let Some(e) = current {
        let addr = e as *const dyn StdError as *const () as usize;
        if depth >= MAX_DEPTH || !seen.insert(addr) {
            break;
        }
        if let Some(text) = meaningful(&e.to_string()) {
            if !parts.contains(&text) {
                parts.push(text);
            }
        }
        current = e.source();
        depth += 1;
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(": "))
    }
}

fn opaque_tag(value: &Value, depth: usize) -> Option<AuthError> {
    if depth >= MAX_DEPTH {
        return None;
    }
    let object = value.as_object()?;

    let status_code = ["statusCode", "status_code", "code"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok());

    if let Some(tag) = ["name", "tag", "_tag"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(Value::as_str)
    {
        if let Some(error) = classify_tag(tag, status_code) {
            return Some(error);
        }
    }
    if let Some(code) = status_code {
        // EIP-1193 user rejection from a browser wallet
        if code == 4001 {
            return Some(AuthError::new(
                ErrorCategory::UserRejected,
                "The request was rejected in the wallet. Approve it to continue.",
            ));
        }
        if code >= 0x5000 {
            return Some(classify_status_word(code));
        }
    }

    ["error", "originalError", "cause"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|nested| opaque_tag(nested, depth + 1))
}

fn opaque_message(value: &Value, depth: usize) -> Option<String> {
    if depth >= MAX_DEPTH {
        return None;
    }
    match value {
        Value::String(text) => meaningful(text),
        Value::Object(object) => {
            for key in ["message", "error", "originalError", "cause", "reason"] {
                if let Some(found) = object.get(key).and_then(|v| opaque_message(v, depth + 1)) {
                    return Some(found);
                }
            }
            serde_json::to_string(value)
                .ok()
                .and_then(|text| meaningful(&text))
        }
        Value::Null => None,
        other => meaningful(&other.to_string()),
    }
}
