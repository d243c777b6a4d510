// SPDX-License-Identifier: Apache-2.0

//! Sign-in entry points for hardware and browser-extension wallets

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledger_eth_app::TypedData;
use ledger_transport::Exchange;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::classifier::classify;
use crate::config::AuthConfig;
use crate::engine::{format_signature, SigningOperation, StatusUpdate};
use crate::error::{AuthError, AuthResult, ErrorCategory};
use crate::normalizer::{MessageNormalizer, SimplificationReason};
use crate::session::{hid_sessions, DeviceSession, Discovery, HidDiscovery, SessionManager};
use crate::signer::OperationOutput;
use crate::store::{AuthStorage, AuthStore, Clock, StoredAuthentication, SystemClock, WalletKind};
use crate::verifier;
use crate::wallet::ExtensionWallet;

/// Result of connecting a hardware wallet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConnection {
    pub address: String,
    pub session_id: String,
}

impl HardwareConnection {
    pub fn handle(&self) -> WalletHandle {
        WalletHandle::Hardware {
            session_id: self.session_id.clone(),
            address: self.address.clone(),
        }
    }
}

/// A connected wallet that can be asked for signatures
#[derive(Clone)]
pub enum WalletHandle {
    Browser {
        wallet: Arc<dyn ExtensionWallet>,
        address: String,
    },
    Hardware {
        session_id: String,
        address: String,
    },
}

impl WalletHandle {
    pub fn address(&self) -> &str {
        match self {
            WalletHandle::Browser { address, .. } | WalletHandle::Hardware { address, .. } => {
                address
            }
        }
    }

    pub fn kind(&self) -> WalletKind {
        match self {
            WalletHandle::Browser { .. } => WalletKind::BrowserExtension,
            WalletHandle::Hardware { .. } => WalletKind::HardwareDevice,
        }
    }
}

impl fmt::Debug for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletHandle::Browser { address, .. } => {
                f.debug_struct("Browser").field("address", address).finish()
            }
            WalletHandle::Hardware {
                session_id,
                address,
            } => f
                .debug_struct("Hardware")
                .field("session_id", session_id)
                .field("address", address)
                .finish(),
        }
    }
}

/// A signature together with the exact text it covers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub signature: String,
    /// The text that was signed. Verification must use this, not the requested message.
    pub effective_message: String,
    pub address: String,
    pub wallet_kind: WalletKind,
    /// Set when the requested message was replaced before signing
    #[serde(skip)]
    pub simplification: Option<SimplificationReason>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatus {
    pub is_authenticated: bool,
    pub address: Option<String>,
    pub wallet_kind: Option<WalletKind>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct Authenticator<D: Discovery, S, C = SystemClock> {
    config: AuthConfig,
    normalizer: MessageNormalizer,
    sessions: Arc<SessionManager<D>>,
    store: AuthStore<S, C>,
}

impl<S: AuthStorage> Authenticator<HidDiscovery, S> {
    /// USB hardware wallets through the process-wide session slot
    pub fn with_hid(config: AuthConfig, storage: S) -> Self {
        let store = AuthStore::new(storage, config.storage_key.clone(), config.session_lifetime());
        Authenticator::new(config, hid_sessions(), store)
    }
}

impl<D, S, C> Authenticator<D, S, C>
where
    D: Discovery,
    <D::Transport as Exchange>::Error: StdError + Send + Sync + 'static,
    S: AuthStorage,
    C: Clock,
{
    pub fn new(config: AuthConfig, sessions: Arc<SessionManager<D>>, store: AuthStore<S, C>) -> Self {
        Authenticator {
            normalizer: MessageNormalizer::new(config.fallback_message.clone()),
            config,
            sessions,
            store,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager<D>> {
        &self.sessions
    }

    /// Discover a device, connect, and read the account address
    pub async fn connect_hardware_device<F>(&self, mut on_status: F) -> AuthResult<HardwareConnection>
    where
        F: FnMut(StatusUpdate),
    {
        on_status(StatusUpdate::text("Looking for a Ledger device..."));
        let session = self.sessions.connect_first().await?;
        on_status(StatusUpdate::text(format!("Connected to {}", session.device().name)));

        let operation = SigningOperation::get_address(
            self.config.bip_path()?,
            self.config.verify_address_on_device,
            &self.config,
        );
        let address = match self.perform(&session, operation, &mut on_status).await? {
            OperationOutput::Address(address) => address,
            OperationOutput::Signature(_) => return Err(unexpected_output()),
        };

        info!("hardware wallet {} connected", address);
        on_status(StatusUpdate::text("Ledger connected"));
        Ok(HardwareConnection {
            address,
            session_id: session.session_id().to_string(),
        })
    }

    /// Ask an extension wallet for its first account
    pub async fn connect_browser_wallet(
        &self,
        wallet: Arc<dyn ExtensionWallet>,
    ) -> AuthResult<WalletHandle> {
        let accounts = wallet
            .request_accounts()
            .await
            .map_err(|fault| classify(&fault))?;
        let address = accounts.into_iter().next().ok_or_else(|| {
            AuthError::new(
                ErrorCategory::UserRejected,
                "The wallet did not share any account. Unlock it and allow access.",
            )
        })?;
        info!("browser wallet {} connected", address);
        Ok(WalletHandle::Browser { wallet, address })
    }

    /// Sign `message` with the given wallet.
    ///
    /// Hardware wallets sign the normalized message, browser wallets sign it as is.
    /// Either way `effective_message` is the text the signature covers.
    pub async fn sign_message<F>(
        &self,
        handle: &WalletHandle,
        message: &str,
        mut on_status: F,
    ) -> AuthResult<SignedMessage>
    where
        F: FnMut(StatusUpdate),
    {
        match handle {
            WalletHandle::Browser { wallet, address } => {
                on_status(StatusUpdate::text("Please sign the message in your wallet"));
                let signature = wallet
                    .personal_sign(message, address)
                    .await
                    .map_err(|fault| classify(&fault))?;
                Ok(SignedMessage {
                    signature,
                    effective_message: message.to_string(),
                    address: address.clone(),
                    wallet_kind: WalletKind::BrowserExtension,
                    simplification: None,
                })
            }
            WalletHandle::Hardware {
                session_id,
                address,
            } => {
                let session = self.active_session(session_id).await?;
                let normalized = self.normalizer.resolve(message);
                if let Some(reason) = normalized.reason {
                    warn!(
                        "signing fallback message instead of the requested one ({})",
                        reason.as_str()
                    );
                    on_status(StatusUpdate::text(
                        "Message simplified so the device can display it",
                    ));
                }

                let operation = SigningOperation::sign_message(
                    self.config.bip_path()?,
                    normalized.effective.clone(),
                    &self.config,
                );
                let raw = match self.perform(&session, operation, &mut on_status).await? {
                    OperationOutput::Signature(raw) => raw,
                    OperationOutput::Address(_) => return Err(unexpected_output()),
                };

                Ok(SignedMessage {
                    signature: format_signature(&raw)?,
                    effective_message: normalized.effective,
                    address: address.clone(),
                    wallet_kind: WalletKind::HardwareDevice,
                    simplification: normalized.reason,
                })
            }
        }
    }

    /// Sign EIP-712 typed data on the hardware wallet
    pub async fn sign_typed_data<F>(
        &self,
        handle: &WalletHandle,
        typed_data: TypedData,
        mut on_status: F,
    ) -> AuthResult<String>
    where
        F: FnMut(StatusUpdate),
    {
        let WalletHandle::Hardware { session_id, .. } = handle else {
            return Err(AuthError::new(
                ErrorCategory::UnsupportedEnvironment,
                "Typed data signing is only available with a hardware wallet.",
            ));
        };

        let session = self.active_session(session_id).await?;
        let operation =
            SigningOperation::sign_typed_data(self.config.bip_path()?, typed_data, &self.config);
        match self.perform(&session, operation, &mut on_status).await? {
            OperationOutput::Signature(raw) => format_signature(&raw),
            OperationOutput::Address(_) => Err(unexpected_output()),
        }
    }

    pub fn verify(&self, message: &str, signature: &str, address: &str) -> bool {
        verifier::verify(message, signature, address)
    }

    /// Verify and store a signed sign-in message
    pub fn persist_authentication(&self, signed: &SignedMessage) -> AuthResult<StoredAuthentication> {
        self.store.persist(
            &signed.address,
            &signed.signature,
            signed.wallet_kind,
            &signed.effective_message,
        )
    }

    /// Sign the welcome message and store the result
    pub async fn sign_in<F>(&self, handle: &WalletHandle, on_status: F) -> AuthResult<StoredAuthentication>
    where
        F: FnMut(StatusUpdate),
    {
        let signed = self
            .sign_message(handle, &self.config.welcome_message, on_status)
            .await?;
        self.persist_authentication(&signed)
    }

    pub fn check_stored_authentication(&self) -> AuthStatus {
        match self.store.read() {
            Some(record) => AuthStatus {
                is_authenticated: true,
                expires_at: self.store.expires_at(&record),
                address: Some(record.address),
                wallet_kind: Some(record.wallet_type),
            },
            None => AuthStatus::default(),
        }
    }

    /// Log out: forget the stored sign-in and drop any hardware session
    pub async fn clear_stored_authentication(&self) -> AuthResult<()> {
        self.sessions.disconnect().await;
        self.store.clear()
    }

    pub async fn disconnect(&self) {
        self.sessions.disconnect().await;
    }

    /// Run one device operation; a fatal failure ends the session
    async fn perform<F>(
        &self,
        session: &DeviceSession<D::Transport>,
        operation: SigningOperation,
        on_status: F,
    ) -> AuthResult<OperationOutput>
    where
        F: FnMut(StatusUpdate),
    {
        let result = session
            .signer(self.config.device_probe_interval())
            .perform(operation, on_status)
            .await;
        if let Err(err) = &result {
            if err.is_fatal_for_session() {
                warn!("dropping hardware session after: {}", err);
                self.sessions.disconnect().await;
            }
        }
        result
    }

    async fn active_session(&self, session_id: &str) -> AuthResult<DeviceSession<D::Transport>> {
        match self.sessions.current().await {
            Some(session) if session.session_id() == session_id => Ok(session),
            _ => Err(AuthError::new(
                ErrorCategory::TransportError,
                "The Ledger session has ended. Reconnect the device and try again.",
            )),
        }
    }
}

fn unexpected_output() -> AuthError {
    AuthError::new(ErrorCategory::MalformedResponse, "unexpected device output")
}
