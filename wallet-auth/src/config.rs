// SPDX-License-Identifier: Apache-2.0

//! Tunables for discovery, device operations and the stored login

use std::time::Duration;

use ledger_eth_app::BipPath;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult, ErrorCategory};

pub const DEFAULT_DERIVATION_PATH: &str = "44'/60'/0'/0/0";
pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome to Pay-Peer-Roll App 🧻";
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Welcome to Pay-Peer-Roll App";
pub const DEFAULT_STORAGE_KEY: &str = "pay-peer-roll-auth";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// How long discovery keeps polling before giving up
    pub discovery_timeout_ms: u64,
    pub discovery_poll_interval_ms: u64,
    pub address_timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub typed_data_timeout_ms: u64,
    /// Delay between app-info probes while the device is locked or switching apps
    pub device_probe_interval_ms: u64,
    pub derivation_path: String,
    /// Show the address on the device during connect
    pub verify_address_on_device: bool,
    pub welcome_message: String,
    /// Sent to the device instead of a message it cannot display
    pub fallback_message: String,
    pub session_lifetime_ms: u64,
    pub storage_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            discovery_timeout_ms: 10_000,
            discovery_poll_interval_ms: 500,
            address_timeout_ms: 120_000,
            message_timeout_ms: 120_000,
            typed_data_timeout_ms: 180_000,
            device_probe_interval_ms: 1_000,
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
            verify_address_on_device: false,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            session_lifetime_ms: 24 * 60 * 60 * 1_000,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl AuthConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> AuthResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            AuthError::new(
                ErrorCategory::Unknown,
                format!("invalid configuration: {}", e),
            )
        })
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout_ms = millis(timeout);
        self
    }

    pub fn with_operation_timeouts(
        mut self,
        address: Duration,
        message: Duration,
        typed_data: Duration,
    ) -> Self {
        self.address_timeout_ms = millis(address);
        self.message_timeout_ms = millis(message);
        self.typed_data_timeout_ms = millis(typed_data);
        self
    }

    pub fn with_derivation_path(mut self, path: impl Into<String>) -> Self {
        self.derivation_path = path.into();
        self
    }

    pub fn with_address_verification(mut self) -> Self {
        self.verify_address_on_device = true;
        self
    }

    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = message.into();
        self
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime_ms = millis(lifetime);
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn address_timeout(&self) -> Duration {
        Duration::from_millis(self.address_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn typed_data_timeout(&self) -> Duration {
        Duration::from_millis(self.typed_data_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn discovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_interval_ms)
    }

    pub fn device_probe_interval(&self) -> Duration {
        Duration::from_millis(self.device_probe_interval_ms)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_millis(self.session_lifetime_ms)
    }

    pub fn bip_path(&self) -> AuthResult<BipPath> {
        self.derivation_path.parse().map_err(|e: String| {
            AuthError::new(
                ErrorCategory::Unknown,
                format!("invalid derivation path `{}`: {}", self.derivation_path, e),
            )
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
