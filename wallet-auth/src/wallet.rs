// SPDX-License-Identifier: Apache-2.0

//! Browser-extension wallets (Rabby and friends)

use async_trait::async_trait;
use k256::ecdsa::SigningKey;

use crate::classifier::DeviceFault;
use crate::error::{AuthError, AuthResult, ErrorCategory};
use crate::verifier::{address_of, hash_personal_message};

/// The slice of the EIP-1193 provider API sign-in needs
#[async_trait]
pub trait ExtensionWallet: Send + Sync {
    /// `eth_requestAccounts`
    async fn request_accounts(&self) -> Result<Vec<String>, DeviceFault>;

    /// `personal_sign`, returning the `0x` hex signature
    async fn personal_sign(&self, message: &str, address: &str) -> Result<String, DeviceFault>;
}

/// A wallet backed by an in-process secp256k1 key
pub struct LocalKeyWallet {
    key: SigningKey,
}

impl LocalKeyWallet {
    pub fn new(key: SigningKey) -> Self {
        LocalKeyWallet { key }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> AuthResult<Self> {
        SigningKey::from_slice(secret)
            .map(LocalKeyWallet::new)
            .map_err(|_| AuthError::new(ErrorCategory::Unknown, "invalid secp256k1 secret key"))
    }

    pub fn address(&self) -> String {
        address_of(self.key.verifying_key())
    }

    /// EIP-191 signature over `message`, `v` in {27, 28}
    pub fn sign_personal(&self, message: &str) -> AuthResult<String> {
        let hash = hash_personal_message(message.as_bytes());
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| AuthError::new(ErrorCategory::Unknown, format!("signing failed: {}", e)))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(27 + recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

#[async_trait]
impl ExtensionWallet for LocalKeyWallet {
    async fn request_accounts(&self) -> Result<Vec<String>, DeviceFault> {
        Ok(vec![self.address()])
    }

    async fn personal_sign(&self, message: &str, address: &str) -> Result<String, DeviceFault> {
        if !address.eq_ignore_ascii_case(&self.address()) {
            return Err(DeviceFault::tagged(
                "UserRejected",
                format!("account {} is not managed by this wallet", address),
            ));
        }
        self.sign_personal(message)
            .map_err(|e| DeviceFault::message(e.message))
    }
}
