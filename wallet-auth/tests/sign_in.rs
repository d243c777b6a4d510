// SPDX-License-Identifier: Apache-2.0

mod common;

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::{address_reply, app_info, authenticator, signature_reply, NOW_MS};
use ledger_transport::mock::MockReply;
use wallet_auth::config::DEFAULT_FALLBACK_MESSAGE;
use wallet_auth::{
    classify, normalizer, DeviceFault, ErrorCategory, LocalKeyWallet, SignedMessage,
    UserInteraction, WalletKind,
};

const SECRET: [u8; 32] = [0x5a; 32];

fn device_key() -> LocalKeyWallet {
    LocalKeyWallet::from_bytes(&SECRET).unwrap()
}

#[tokio::test(start_paused = true)]
async fn emoji_welcome_is_simplified_signed_and_stored() {
    let key = device_key();
    let device_signature = key.sign_personal(DEFAULT_FALLBACK_MESSAGE).unwrap();

    let (auth, _) = authenticator(vec![
        app_info("Ethereum"),
        address_reply(&key.address()),
        MockReply::status(0x5515),
        app_info("Ethereum"),
        signature_reply(&device_signature),
    ]);

    let connection = auth.connect_hardware_device(|_| {}).await.unwrap();
    assert_eq!(connection.address, key.address());

    let mut interactions = Vec::new();
    let signed = auth
        .sign_message(&connection.handle(), "Welcome 🧻", |update| {
            if let Some(interaction) = update.required_interaction {
                interactions.push(interaction);
            }
        })
        .await
        .unwrap();

    assert_eq!(
        interactions,
        vec![UserInteraction::UnlockDevice, UserInteraction::SignMessage]
    );
    assert_eq!(signed.effective_message, DEFAULT_FALLBACK_MESSAGE);
    assert!(signed.simplification.is_some());
    assert_eq!(signed.signature, device_signature);
    assert_eq!(signed.signature.len(), 2 + 64 + 64 + 2);
    assert!(auth.verify(&signed.effective_message, &signed.signature, &signed.address));

    let stored = auth.persist_authentication(&signed).unwrap();
    assert_eq!(stored.message, DEFAULT_FALLBACK_MESSAGE);

    let status = auth.check_stored_authentication();
    assert!(status.is_authenticated);
    assert_eq!(status.address.as_deref(), Some(key.address().as_str()));
    assert_eq!(status.wallet_kind, Some(WalletKind::HardwareDevice));
}

#[tokio::test]
async fn signature_over_original_message_fails_against_effective() {
    let key = device_key();
    let (auth, _) = authenticator(Vec::new());

    let signed = SignedMessage {
        signature: key.sign_personal("Welcome 🧻").unwrap(),
        effective_message: normalizer::resolve("Welcome 🧻").effective,
        address: key.address(),
        wallet_kind: WalletKind::HardwareDevice,
        simplification: None,
    };

    let err = auth.persist_authentication(&signed).unwrap_err();
    assert_eq!(err.category, ErrorCategory::InvalidSignature);
    assert!(!auth.check_stored_authentication().is_authenticated);
}

#[tokio::test(start_paused = true)]
async fn locked_device_times_out_and_ends_session() {
    let key = device_key();
    let mut replies = vec![app_info("Ethereum"), address_reply(&key.address())];
    replies.extend((0..500).map(|_| MockReply::status(0x5515)));
    let (auth, _) = authenticator(replies);

    let connection = auth.connect_hardware_device(|_| {}).await.unwrap();
    let transport = auth.sessions().current().await.unwrap().transport().clone();

    let mut updates = 0;
    let started = tokio::time::Instant::now();
    let err = auth
        .sign_message(&connection.handle(), "hello", |_| updates += 1)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_secs(120));
    assert_eq!(updates, 1);

    // the app-info request may still be in flight, so the channel is not reused
    assert!(!auth.sessions().is_active(&connection.session_id).await);
    assert!(transport.is_closed());
    let err = auth
        .sign_message(&connection.handle(), "hello", |_| {})
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::TransportError);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_ends_session() {
    let key = device_key();
    let (auth, _) = authenticator(vec![
        app_info("Ethereum"),
        address_reply(&key.address()),
        MockReply::Fail("device disconnected".to_string()),
    ]);

    let connection = auth.connect_hardware_device(|_| {}).await.unwrap();
    let err = auth
        .sign_message(&connection.handle(), "hello", |_| {})
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::TransportError);
    assert!(auth.sessions().current().await.is_none());

    // the old handle is no longer usable
    let err = auth
        .sign_message(&connection.handle(), "hello", |_| {})
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::TransportError);
}

#[tokio::test(start_paused = true)]
async fn rejection_on_device_is_reported() {
    let key = device_key();
    let (auth, _) = authenticator(vec![
        app_info("Ethereum"),
        address_reply(&key.address()),
        app_info("Ethereum"),
        MockReply::status(0x6985),
    ]);

    let connection = auth.connect_hardware_device(|_| {}).await.unwrap();
    let err = auth
        .sign_message(&connection.handle(), "hello", |_| {})
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::UserRejected);
    assert!(auth.sessions().current().await.is_some());
}

#[tokio::test]
async fn stored_sign_in_expires_after_a_day() {
    let wallet = Arc::new(device_key());
    let (auth, clock) = authenticator(Vec::new());
    let handle = auth.connect_browser_wallet(wallet).await.unwrap();
    let stored = auth.sign_in(&handle, |_| {}).await.unwrap();
    assert_eq!(stored.timestamp, NOW_MS);
    assert_eq!(stored.wallet_type, WalletKind::BrowserExtension);

    clock.advance(Duration::from_secs(24 * 60 * 60 - 1));
    assert!(auth.check_stored_authentication().is_authenticated);

    clock.advance(Duration::from_secs(1));
    assert!(!auth.check_stored_authentication().is_authenticated);
    assert!(!auth.check_stored_authentication().is_authenticated);
}

#[derive(Debug)]
struct SelfReferential;

impl fmt::Display for SelfReferential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{}")
    }
}

impl Error for SelfReferential {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self)
    }
}

#[test]
fn circular_fault_still_has_a_message() {
    let error = classify(&DeviceFault::other(SelfReferential));
    assert!(!error.message.is_empty());
    assert_ne!(error.message, "{}");
    assert_ne!(error.message, "[object Object]");
}
