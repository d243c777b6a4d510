// SPDX-License-Identifier: Apache-2.0

//! Wallet sign-in for Ledger hardware wallets and browser-extension wallets.
//!
//! A wallet signs a welcome message, the signature is checked against the claimed
//! address, and a short-lived record of the sign-in is kept. Hardware signing runs
//! as a state machine that walks the user through unlocking the device, opening
//! the Ethereum app and confirming on screen.
//!
//! ```no_run
//! use wallet_auth::{AuthConfig, Authenticator, MemoryStorage};
//!
//! # async fn run() -> wallet_auth::AuthResult<()> {
//! let auth = Authenticator::with_hid(AuthConfig::default(), MemoryStorage::new());
//! let connection = auth
//!     .connect_hardware_device(|status| println!("{}", status.message))
//!     .await?;
//! auth.sign_in(&connection.handle(), |status| println!("{}", status.message))
//!     .await?;
//! assert!(auth.check_stored_authentication().is_authenticated);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod session;
pub mod signer;
pub mod store;
pub mod verifier;
pub mod wallet;

pub use auth::{AuthStatus, Authenticator, HardwareConnection, SignedMessage, WalletHandle};
pub use classifier::{classify, DeviceFault};
pub use config::AuthConfig;
pub use engine::{
    format_signature, run_operation, DeviceAction, DeviceActionState, OperationKind,
    RawSignature, SigningOperation, StatusUpdate, UserInteraction,
};
pub use error::{AuthError, AuthResult, ErrorCategory};
pub use normalizer::{MessageNormalizer, NormalizedMessage, SimplificationReason};
pub use session::{hid_sessions, DeviceDescriptor, DeviceSession, Discovery, HidDiscovery, SessionManager};
pub use signer::LedgerSigner;
pub use store::{
    AuthStorage, AuthStore, Clock, FileStorage, ManualClock, MemoryStorage, StoredAuthentication,
    SystemClock, WalletKind,
};
pub use verifier::verify;
pub use wallet::{ExtensionWallet, LocalKeyWallet};
